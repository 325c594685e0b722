//! Task protocol models.
//!
//! Declarative task envelopes exchanged with the script host: a
//! [`TaskPayload`] describes what to run and against which targets, and a
//! [`TaskReport`] comes back with stats, stage timings, warnings and errors.
//! Field names are camelCase on the wire, matching what the host-side runtime
//! consumes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::aibridge::errors::Stage;

fn default_version() -> String {
    "2.3.1".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retryable_stages() -> Vec<RetryableStage> {
    vec![RetryableStage::Collect]
}

fn default_retry_on_codes() -> Vec<String> {
    vec!["R001".to_string()]
}

fn default_true() -> bool {
    true
}

/// A target variant selecting items in the host document.
///
/// `compound` unions its (simple) children and applies its own exclusions;
/// nesting compounds is rejected during validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Target {
    /// The current UI selection.
    Selection,
    /// All items of a named layer, optionally descending into sublayers.
    Layer {
        layer: String,
        #[serde(default)]
        recursive: bool,
    },
    /// All items in the document.
    All {
        #[serde(default)]
        recursive: bool,
    },
    /// Filtered items; at least one filter is required.
    Query {
        #[serde(default, rename = "itemType", skip_serializing_if = "Option::is_none")]
        item_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pattern: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        layer: Option<String>,
        #[serde(default)]
        recursive: bool,
    },
    /// Set union of the children, minus the compound-level exclusions.
    Compound {
        #[serde(rename = "anyOf")]
        any_of: Vec<Target>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exclude: Option<ExcludeFilter>,
    },
}

/// Attribute-based exclusion applied after target resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ExcludeFilter {
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub guides: bool,
    #[serde(default)]
    pub clipped: bool,
}

impl ExcludeFilter {
    /// An exclusion filter that removes locked items.
    pub fn locked() -> Self {
        Self {
            locked: true,
            ..Self::default()
        }
    }
}

/// Ordering applied to the collected item list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderBy {
    ZOrder,
    ZOrderReverse,
    Reading,
    Column,
    Name,
    PositionX,
    PositionY,
    Area,
}

impl Default for OrderBy {
    fn default() -> Self {
        OrderBy::ZOrder
    }
}

/// A full target selector: a variant plus ordering and global exclusions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSelector {
    pub target: Target,
    #[serde(default, rename = "orderBy")]
    pub order_by: OrderBy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude: Option<ExcludeFilter>,
}

impl TargetSelector {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            order_by: OrderBy::default(),
            exclude: None,
        }
    }

    pub fn order_by(mut self, order_by: OrderBy) -> Self {
        self.order_by = order_by;
        self
    }

    pub fn exclude(mut self, exclude: ExcludeFilter) -> Self {
        self.exclude = Some(exclude);
        self
    }
}

/// Stages eligible for retry. `apply` is intentionally unrepresentable:
/// a policy declaring it fails deserialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryableStage {
    Collect,
    Compute,
}

impl RetryableStage {
    pub fn as_stage(&self) -> Stage {
        match self {
            RetryableStage::Collect => Stage::Collect,
            RetryableStage::Compute => Stage::Compute,
        }
    }
}

/// Caller-declared idempotency class of the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Idempotency {
    Safe,
    Unknown,
    Unsafe,
}

impl Default for Idempotency {
    fn default() -> Self {
        Idempotency::Unknown
    }
}

/// Retry policy for stage failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts", rename = "maxAttempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retryable_stages", rename = "retryableStages")]
    pub retryable_stages: Vec<RetryableStage>,
    #[serde(default = "default_retry_on_codes", rename = "retryOnCodes")]
    pub retry_on_codes: Vec<String>,
    #[serde(default = "default_true", rename = "requireIdempotent")]
    pub require_idempotent: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retryable_stages: default_retryable_stages(),
            retry_on_codes: default_retry_on_codes(),
            require_idempotent: true,
        }
    }
}

impl RetryPolicy {
    /// Whether `stage` failing with `code` is retryable under this policy.
    pub fn allows(&self, stage: Stage, code: &str) -> bool {
        self.retryable_stages.iter().any(|s| s.as_stage() == stage)
            && self.retry_on_codes.iter().any(|c| c == code)
    }
}

/// Governs when item IDs are assigned during a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdPolicy {
    /// Never assign IDs.
    None,
    /// Assign only to items whose refs were requested with identity.
    OptIn,
    /// Assign to every processed item.
    Always,
    /// Keep existing IDs untouched, never create new ones.
    Preserve,
}

impl Default for IdPolicy {
    fn default() -> Self {
        IdPolicy::None
    }
}

/// Where an item's identity is anchored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdSource {
    None,
    Note,
    Name,
}

impl Default for IdSource {
    fn default() -> Self {
        IdSource::None
    }
}

/// Task execution options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskOptions {
    #[serde(default, rename = "dryRun")]
    pub dry_run: bool,
    #[serde(default)]
    pub trace: bool,
    #[serde(default, rename = "idPolicy")]
    pub id_policy: IdPolicy,
    /// Per-task timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    #[serde(default)]
    pub idempotency: Idempotency,
}

/// Standard task payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    /// Task label, e.g. `draw_shapes`, `apply_styles`, `query_items`.
    pub task: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<TargetSelector>,
    #[serde(default)]
    pub params: serde_json::Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<TaskOptions>,
}

impl TaskPayload {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            version: default_version(),
            targets: None,
            params: serde_json::Map::new(),
            options: None,
        }
    }

    pub fn with_targets(mut self, targets: TargetSelector) -> Self {
        self.targets = Some(targets);
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn with_options(mut self, options: TaskOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// The effective options, defaulted when the payload carries none.
    pub fn options_or_default(&self) -> TaskOptions {
        self.options.clone().unwrap_or_default()
    }
}

/// Stable reference to a host item.
///
/// Carries three independent concerns: a positional locator (volatile), an
/// identity (persistent), and user-authored tags. Any subset may be present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemRef {
    /// Layer path, e.g. `"Layer 1/Group A"`.
    #[serde(rename = "layerPath")]
    pub layer_path: String,
    /// Index path within containers, e.g. `[0, 2, 5]`.
    #[serde(default, rename = "indexPath")]
    pub index_path: Vec<usize>,
    /// Persistent item ID, when assigned.
    #[serde(default, rename = "itemId", skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    /// Which field anchors the identity.
    #[serde(default, rename = "idSource")]
    pub id_source: IdSource,
    /// `@key=value` annotations parsed from the item's name/note.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub tags: HashMap<String, String>,
    /// Host item type, e.g. `"PathItem"`, `"TextFrame"`.
    #[serde(rename = "itemType")]
    pub item_type: String,
    #[serde(default, rename = "itemName", skip_serializing_if = "Option::is_none")]
    pub item_name: Option<String>,
}

impl ItemRef {
    /// The positional locator identifying this item: `(layerPath, indexPath)`.
    pub fn locator(&self) -> (&str, &[usize]) {
        (&self.layer_path, &self.index_path)
    }
}

/// Stage timings, in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimingInfo {
    #[serde(default)]
    pub collect_ms: f64,
    #[serde(default)]
    pub compute_ms: f64,
    #[serde(default)]
    pub apply_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_ms: Option<f64>,
    #[serde(default)]
    pub total_ms: f64,
}

/// Item counters for a task run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskStats {
    #[serde(default, rename = "itemsProcessed")]
    pub items_processed: usize,
    #[serde(default, rename = "itemsModified")]
    pub items_modified: usize,
    #[serde(default, rename = "itemsSkipped")]
    pub items_skipped: usize,
}

/// A non-fatal observation from a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskWarning {
    pub stage: Stage,
    pub message: String,
    #[serde(default, rename = "itemRef", skip_serializing_if = "Option::is_none")]
    pub item_ref: Option<ItemRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// A stage failure, with the item it concerns when item-scoped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskError {
    pub stage: Stage,
    /// Stable error code, e.g. `"V003"`, `"R004"`.
    pub code: String,
    pub message: String,
    #[serde(default, rename = "itemRef", skip_serializing_if = "Option::is_none")]
    pub item_ref: Option<ItemRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl TaskError {
    pub fn new(stage: Stage, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            stage,
            code: code.into(),
            message: message.into(),
            item_ref: None,
            line: None,
        }
    }

    pub fn with_item(mut self, item_ref: ItemRef) -> Self {
        self.item_ref = Some(item_ref);
        self
    }
}

/// Retry accounting echoed in the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryInfo {
    pub attempts: u32,
    pub succeeded: bool,
    #[serde(default, rename = "retriedStages")]
    pub retried_stages: Vec<Stage>,
    pub idempotency: Idempotency,
}

/// Standard task report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    /// `true` iff no errors occurred and no stage failed terminally.
    pub ok: bool,
    #[serde(default)]
    pub stats: TaskStats,
    #[serde(default)]
    pub timing: TimingInfo,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<TaskWarning>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<TaskError>,
    /// Task-defined outputs, e.g. `{"exportedPath": "/path/to/file.svg"}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<serde_json::Map<String, Value>>,
    /// Human-readable trace lines, present when `options.trace` was set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<Vec<String>>,
    #[serde(default, rename = "retryInfo", skip_serializing_if = "Option::is_none")]
    pub retry_info: Option<RetryInfo>,
}

impl TaskReport {
    /// An empty failing report carrying a single error.
    pub fn failed(error: TaskError) -> Self {
        Self {
            ok: false,
            stats: TaskStats::default(),
            timing: TimingInfo::default(),
            warnings: Vec::new(),
            errors: vec![error],
            artifacts: None,
            trace: None,
            retry_info: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_compound_target_structure() {
        let target = Target::Compound {
            any_of: vec![
                Target::Layer {
                    layer: "Layer 1".to_string(),
                    recursive: false,
                },
                Target::Selection,
            ],
            exclude: Some(ExcludeFilter::locked()),
        };
        let value = serde_json::to_value(&target).unwrap();
        assert_eq!(value["type"], "compound");
        assert_eq!(value["anyOf"][0]["type"], "layer");
        assert_eq!(value["anyOf"][0]["layer"], "Layer 1");
        assert_eq!(value["anyOf"][1]["type"], "selection");
        assert_eq!(value["exclude"]["locked"], true);
    }

    #[test]
    fn test_selector_wire_shape() {
        let selector = TargetSelector::new(Target::Selection)
            .order_by(OrderBy::Reading)
            .exclude(ExcludeFilter {
                hidden: true,
                ..ExcludeFilter::default()
            });
        let value = serde_json::to_value(&selector).unwrap();
        assert_eq!(value["target"]["type"], "selection");
        assert_eq!(value["orderBy"], "reading");
        assert_eq!(value["exclude"]["hidden"], true);
    }

    #[test]
    fn test_order_by_serialization() {
        let expected = [
            (OrderBy::ZOrder, "zOrder"),
            (OrderBy::ZOrderReverse, "zOrderReverse"),
            (OrderBy::Reading, "reading"),
            (OrderBy::Column, "column"),
            (OrderBy::Name, "name"),
            (OrderBy::PositionX, "positionX"),
            (OrderBy::PositionY, "positionY"),
            (OrderBy::Area, "area"),
        ];
        for (mode, wire) in expected {
            let selector = TargetSelector::new(Target::Selection).order_by(mode);
            let value = serde_json::to_value(&selector).unwrap();
            assert_eq!(value["orderBy"], wire);
        }
    }

    #[test]
    fn test_payload_version_default() {
        let payload: TaskPayload = serde_json::from_value(json!({"task": "test"})).unwrap();
        assert_eq!(payload.version, "2.3.1");
        assert!(payload.targets.is_none());
        assert!(payload.params.is_empty());
    }

    #[test]
    fn test_payload_round_trip() {
        let payload = TaskPayload::new("align_items")
            .with_targets(TargetSelector::new(Target::Selection).order_by(OrderBy::PositionX))
            .with_param("axis", json!("x"));
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["targets"]["orderBy"], "positionX");
        assert_eq!(value["targets"]["target"]["type"], "selection");

        let parsed: TaskPayload = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, payload);
    }

    #[test]
    fn test_retry_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.retryable_stages, vec![RetryableStage::Collect]);
        assert!(policy.require_idempotent);
        assert!(policy.allows(Stage::Collect, "R001"));
        assert!(!policy.allows(Stage::Compute, "R001"));
        assert!(!policy.allows(Stage::Collect, "R002"));
    }

    #[test]
    fn test_retry_policy_rejects_apply_stage() {
        let result: Result<RetryPolicy, _> = serde_json::from_value(json!({
            "maxAttempts": 2,
            "retryableStages": ["collect", "apply"]
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_apply_is_unrepresentable_as_retryable() {
        for stage in [RetryableStage::Collect, RetryableStage::Compute] {
            assert_ne!(stage.as_stage(), Stage::Apply);
        }
    }

    #[test]
    fn test_unknown_target_type_fails_deserialization() {
        let result: Result<Target, _> =
            serde_json::from_value(json!({"type": "galaxy", "arm": 3}));
        assert!(result.is_err());
    }

    #[test]
    fn test_id_policy_wire_values() {
        assert_eq!(
            serde_json::to_value(IdPolicy::OptIn).unwrap(),
            json!("opt_in")
        );
        let parsed: IdPolicy = serde_json::from_value(json!("preserve")).unwrap();
        assert_eq!(parsed, IdPolicy::Preserve);
    }

    #[test]
    fn test_idempotency_values() {
        assert_eq!(serde_json::to_value(Idempotency::Safe).unwrap(), json!("safe"));
        assert_eq!(
            serde_json::to_value(Idempotency::Unknown).unwrap(),
            json!("unknown")
        );
        assert_eq!(
            serde_json::to_value(Idempotency::Unsafe).unwrap(),
            json!("unsafe")
        );
    }

    #[test]
    fn test_item_ref_wire_shape() {
        let item_ref = ItemRef {
            layer_path: "Layer 1/Group A".to_string(),
            index_path: vec![0, 2],
            item_id: Some("badge-1".to_string()),
            id_source: IdSource::Note,
            item_type: "PathItem".to_string(),
            ..ItemRef::default()
        };
        let value = serde_json::to_value(&item_ref).unwrap();
        assert_eq!(value["layerPath"], "Layer 1/Group A");
        assert_eq!(value["indexPath"], json!([0, 2]));
        assert_eq!(value["itemId"], "badge-1");
        assert_eq!(value["idSource"], "note");
        assert_eq!(value["itemType"], "PathItem");
    }

    #[test]
    fn test_report_serialization_skips_empty() {
        let report = TaskReport {
            ok: true,
            stats: TaskStats {
                items_processed: 3,
                items_modified: 2,
                items_skipped: 1,
            },
            timing: TimingInfo::default(),
            warnings: Vec::new(),
            errors: Vec::new(),
            artifacts: None,
            trace: None,
            retry_info: None,
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["ok"], true);
        assert_eq!(value["stats"]["itemsProcessed"], 3);
        assert!(value.get("warnings").is_none());
        assert!(value.get("retryInfo").is_none());
    }
}
