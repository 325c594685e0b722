//! Standardized error codes for the Illustrator bridge.
//!
//! Two error spaces live here. [`BridgeErrorCode`] covers transport/runtime
//! failures surfaced by the executor (`DISCONNECTED`, `TIMEOUT`, ...), each
//! rendered as a stable prefix on the human-readable message. [`TaskErrorCode`]
//! covers the task protocol's validation (`V*`), runtime (`R*`) and system
//! (`S*`) failures that end up in a [`TaskReport`](crate::aibridge::protocol::TaskReport).

use std::error::Error;
use std::fmt;

/// Operator hint carried by every DISCONNECTED error.
pub const DISCONNECT_HINT: &str =
    "extension panel is not connected. Open Illustrator and ensure the panel shows 'Connected'.";

/// Transport/runtime error codes returned by the script executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeErrorCode {
    /// No extension peer is connected; the dispatch was never sent.
    Disconnected,
    /// The peer did not reply within the caller's deadline.
    Timeout,
    /// A write or transport failure occurred after dispatch.
    ExecutionError,
    /// Catch-all for unexpected bridge failures.
    ProxyError,
}

impl BridgeErrorCode {
    /// The stable wire string for this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeErrorCode::Disconnected => "DISCONNECTED",
            BridgeErrorCode::Timeout => "TIMEOUT",
            BridgeErrorCode::ExecutionError => "EXECUTION_ERROR",
            BridgeErrorCode::ProxyError => "PROXY_ERROR",
        }
    }

    /// Format a message with this code as its prefix.
    pub fn format(&self, message: &str) -> String {
        format!("{}: {}", self.as_str(), message)
    }

    /// Recover the code from a formatted error string, if it carries one.
    pub fn parse_prefix(message: &str) -> Option<BridgeErrorCode> {
        let code = message.split(':').next()?.trim();
        // A command context may be appended to the code, e.g. "TIMEOUT [draw]".
        let code = code.split_whitespace().next()?;
        match code {
            "DISCONNECTED" => Some(BridgeErrorCode::Disconnected),
            "TIMEOUT" => Some(BridgeErrorCode::Timeout),
            "EXECUTION_ERROR" => Some(BridgeErrorCode::ExecutionError),
            "PROXY_ERROR" => Some(BridgeErrorCode::ProxyError),
            _ => None,
        }
    }
}

impl fmt::Display for BridgeErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A dispatch failure: an error code plus its detail message.
///
/// This is what a pending request's future resolves to when the bridge (not
/// the peer) terminates the dispatch: timeout, peer loss, write failure.
#[derive(Debug, Clone)]
pub struct DispatchError {
    pub code: BridgeErrorCode,
    pub message: String,
}

impl DispatchError {
    pub fn new(code: BridgeErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// The formatted `CODE: message` string placed into a response.
    pub fn formatted(&self) -> String {
        self.code.format(&self.message)
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl Error for DispatchError {}

/// Execution stage of the task protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Validate,
    Collect,
    Compute,
    Apply,
    Export,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Validate => "validate",
            Stage::Collect => "collect",
            Stage::Compute => "compute",
            Stage::Apply => "apply",
            Stage::Export => "export",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task-protocol error codes, classified by prefix.
///
/// `V*` failures abort the task before any host mutation. `R003`/`R004`
/// (apply failures) never trigger a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskErrorCode {
    /// V001 — no document is open in the host.
    NoDocument,
    /// V002 — the task targets the selection but nothing is selected.
    NoSelection,
    /// V003 — invalid targets (query without filter, compound without children).
    InvalidTargets,
    /// V004 — an item ID collides with one already assigned to another item.
    IdCollision,
    /// V005 — unknown target type.
    UnknownTargetType,
    /// V006 — a required parameter is missing or has the wrong type.
    InvalidParam,
    /// V007 — payload does not match the task's schema.
    SchemaMismatch,
    /// V008 — the payload itself is malformed.
    InvalidPayload,
    /// R001 — target collection failed.
    CollectFailed,
    /// R002 — computation failed.
    ComputeFailed,
    /// R003 — apply failed globally.
    ApplyFailed,
    /// R004 — apply failed for a single item.
    ApplyItemFailed,
    /// R005 — a stage exceeded its time budget.
    StageTimeout,
    /// R006 — an index or coordinate was out of bounds.
    OutOfBounds,
    /// S001 — the host application reported an error.
    AppError,
    /// S002 — the script host itself failed.
    ScriptHostError,
    /// S003 — host-side I/O failure.
    IoError,
    /// S004 — the host ran out of memory.
    MemoryError,
}

impl TaskErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskErrorCode::NoDocument => "V001",
            TaskErrorCode::NoSelection => "V002",
            TaskErrorCode::InvalidTargets => "V003",
            TaskErrorCode::IdCollision => "V004",
            TaskErrorCode::UnknownTargetType => "V005",
            TaskErrorCode::InvalidParam => "V006",
            TaskErrorCode::SchemaMismatch => "V007",
            TaskErrorCode::InvalidPayload => "V008",
            TaskErrorCode::CollectFailed => "R001",
            TaskErrorCode::ComputeFailed => "R002",
            TaskErrorCode::ApplyFailed => "R003",
            TaskErrorCode::ApplyItemFailed => "R004",
            TaskErrorCode::StageTimeout => "R005",
            TaskErrorCode::OutOfBounds => "R006",
            TaskErrorCode::AppError => "S001",
            TaskErrorCode::ScriptHostError => "S002",
            TaskErrorCode::IoError => "S003",
            TaskErrorCode::MemoryError => "S004",
        }
    }

    /// Whether this code identifies a validation failure (`V*`).
    pub fn is_validation(&self) -> bool {
        self.as_str().starts_with('V')
    }

    /// Whether a stage failing with this code may be retried at all.
    ///
    /// Apply failures are excluded unconditionally; retrying a half-applied
    /// mutation can double-apply it.
    pub fn is_retry_eligible(&self) -> bool {
        !matches!(
            self,
            TaskErrorCode::ApplyFailed | TaskErrorCode::ApplyItemFailed
        ) && !self.is_validation()
    }
}

impl fmt::Display for TaskErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
