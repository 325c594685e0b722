//! Task envelope runtime.
//!
//! Executes a [`TaskPayload`] in four stages — validate → collect → compute →
//! apply (with an optional export side-effect) — and produces a
//! [`TaskReport`]. The stage split is a protocol contract: timings and error
//! stages are reported faithfully, and `apply` is never retried.
//!
//! The task itself plugs in through [`TaskHandler`]: compute turns collected
//! items into opaque [`Action`]s without touching the document, apply
//! consumes them and mutates it. The engine owns everything else — target
//! resolution, retry, dry-run suppression, ID assignment, report assembly.

use std::time::Instant;

use serde_json::Value;

use crate::aibridge::document::DocumentModel;
use crate::aibridge::errors::{Stage, TaskErrorCode};
use crate::aibridge::protocol::{
    IdPolicy, IdSource, ItemRef, RetryInfo, RetryPolicy, Target, TaskError, TaskOptions,
    TaskPayload, TaskReport, TaskStats, TaskWarning, TimingInfo,
};
use crate::aibridge::targets::{collect, validate_target, CollectOutcome, CollectedItem};

/// Fixed pause between retry attempts. The protocol allows up to 50 ms.
const RETRY_DELAY_MS: u64 = 25;

/// An opaque mutation descriptor produced by compute and consumed by apply.
#[derive(Debug, Clone)]
pub struct Action {
    /// Action discriminator, meaningful to the handler only.
    pub kind: String,
    /// The item this action mutates, when item-scoped.
    pub target: Option<ItemRef>,
    /// Handler-defined parameters.
    pub payload: Value,
}

impl Action {
    pub fn new(kind: impl Into<String>, target: Option<ItemRef>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            target,
            payload,
        }
    }
}

/// What applying one action did to the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Modified,
    Unchanged,
}

/// A task implementation plugged into the runtime.
pub trait TaskHandler: Send + Sync {
    /// Task label this handler serves.
    fn name(&self) -> &str;

    /// Whether the payload must carry a target selector.
    fn requires_targets(&self) -> bool {
        true
    }

    /// Field identity assignments are written to.
    fn id_source(&self) -> IdSource {
        IdSource::Note
    }

    /// Validate task-specific params. Failures are `V006`/`V007`.
    fn validate_params(&self, _params: &serde_json::Map<String, Value>) -> Result<(), TaskError> {
        Ok(())
    }

    /// Turn collected items and params into actions.
    ///
    /// Compute is pure with respect to the document: it sees item snapshots
    /// only and must not mutate host state. Failures are `R002`.
    fn compute(
        &self,
        items: &[CollectedItem],
        params: &serde_json::Map<String, Value>,
    ) -> Result<Vec<Action>, TaskError>;

    /// Apply one action to the document.
    ///
    /// Item-scoped failures should use `R004` (the run continues with the
    /// remaining actions); `R003` aborts the stage.
    fn apply(&self, doc: &mut DocumentModel, action: &Action) -> Result<ApplyOutcome, TaskError>;

    /// Optional export side-effect, run after apply. Returns artifacts.
    fn export(
        &self,
        _doc: &DocumentModel,
        _params: &serde_json::Map<String, Value>,
    ) -> Result<Option<serde_json::Map<String, Value>>, TaskError> {
        Ok(None)
    }

    /// Whether this task has an export step.
    fn has_export(&self) -> bool {
        false
    }
}

/// Retry bookkeeping across the retryable stages.
struct RetryState {
    policy: Option<RetryPolicy>,
    attempts: u32,
    retried: Vec<Stage>,
}

impl RetryState {
    fn new(options: &TaskOptions) -> (Self, Option<TaskWarning>) {
        let mut warning = None;
        let policy = match &options.retry {
            Some(policy) => {
                if policy.require_idempotent
                    && options.idempotency != crate::aibridge::protocol::Idempotency::Safe
                {
                    // Retry demands an idempotency declaration it didn't get.
                    warning = Some(TaskWarning {
                        stage: Stage::Validate,
                        message: "retry disabled: policy requires idempotency=safe".to_string(),
                        item_ref: None,
                        suggestion: Some("declare options.idempotency = \"safe\"".to_string()),
                    });
                    None
                } else {
                    Some(policy.clone())
                }
            }
            None => None,
        };
        (
            Self {
                policy,
                attempts: 0,
                retried: Vec::new(),
            },
            warning,
        )
    }

    /// Run `stage` under the retry policy. `apply` must never go through
    /// here; the runtime calls it exactly once.
    fn run<T>(
        &mut self,
        stage: Stage,
        mut op: impl FnMut() -> Result<T, TaskError>,
    ) -> Result<T, TaskError> {
        let max_attempts = self
            .policy
            .as_ref()
            .map(|p| p.max_attempts.max(1))
            .unwrap_or(1);
        loop {
            self.attempts += 1;
            match op() {
                Ok(value) => return Ok(value),
                Err(error) => {
                    let may_retry = self
                        .policy
                        .as_ref()
                        .map(|p| p.allows(stage, &error.code))
                        .unwrap_or(false);
                    let attempts_this_stage =
                        1 + self.retried.iter().filter(|s| **s == stage).count() as u32;
                    if may_retry && attempts_this_stage < max_attempts {
                        log::debug!(
                            "Retrying stage {} after {} (attempt {})",
                            stage,
                            error.code,
                            attempts_this_stage + 1
                        );
                        self.retried.push(stage);
                        std::thread::sleep(std::time::Duration::from_millis(RETRY_DELAY_MS));
                        continue;
                    }
                    return Err(error);
                }
            }
        }
    }

    fn info(&self, succeeded: bool, options: &TaskOptions) -> Option<RetryInfo> {
        options.retry.as_ref().map(|_| {
            let mut stages = self.retried.clone();
            stages.dedup();
            RetryInfo {
                attempts: self.attempts,
                succeeded,
                retried_stages: stages,
                idempotency: options.idempotency,
            }
        })
    }
}

/// Statically validate a payload without a document.
///
/// This is the subset of the validate stage the tool surface runs before
/// dispatching: task label, target well-formedness, and options sanity.
pub fn validate_payload(payload: &TaskPayload) -> Result<(), TaskError> {
    if payload.task.trim().is_empty() {
        return Err(TaskError::new(
            Stage::Validate,
            TaskErrorCode::InvalidPayload.as_str(),
            "task label must not be empty",
        ));
    }
    if let Some(selector) = &payload.targets {
        validate_target(&selector.target)?;
    }
    Ok(())
}

/// Execute a task against a document, producing the canonical report.
pub fn run_task(handler: &dyn TaskHandler, doc: &mut DocumentModel, payload: &TaskPayload) -> TaskReport {
    let options = payload.options_or_default();
    let total_timer = Instant::now();
    let mut timing = TimingInfo::default();
    let mut warnings: Vec<TaskWarning> = Vec::new();
    let mut errors: Vec<TaskError> = Vec::new();
    let tracing = options.trace;
    let mut trace: Vec<String> = Vec::new();
    let mut stats = TaskStats::default();

    let (mut retry, retry_warning) = RetryState::new(&options);
    if let Some(warning) = retry_warning {
        warnings.push(warning);
    }

    // ── Validate ─────────────────────────────────────────────────────────
    if let Err(error) = validate(handler, doc, payload, &options) {
        let mut report = TaskReport::failed(error);
        report.warnings = warnings;
        report.timing.total_ms = elapsed_ms(&total_timer);
        report.retry_info = retry.info(false, &options);
        return report;
    }
    if tracing {
        trace.push("validate: ok".to_string());
    }

    // ── Collect ──────────────────────────────────────────────────────────
    let collect_timer = Instant::now();
    let collected = match payload.targets.as_ref() {
        Some(selector) => retry.run(Stage::Collect, || {
            collect(doc, selector).map_err(|mut e| {
                e.stage = Stage::Collect;
                e.code = TaskErrorCode::CollectFailed.as_str().to_string();
                e
            })
        }),
        None => Ok(CollectOutcome::default()),
    };
    timing.collect_ms = elapsed_ms(&collect_timer);
    let collected = match collected {
        Ok(outcome) => outcome,
        Err(error) => {
            errors.push(error);
            return finish(
                false, stats, timing, warnings, errors, None, trace, tracing,
                retry.info(false, &options), total_timer,
            );
        }
    };
    stats.items_processed = collected.items.len();
    stats.items_skipped = collected.skipped;
    if tracing {
        trace.push(format!(
            "collect: {} items ({} skipped) in {:.1}ms",
            collected.items.len(),
            collected.skipped,
            timing.collect_ms
        ));
    }

    // ── Compute ──────────────────────────────────────────────────────────
    let compute_timer = Instant::now();
    let actions = retry.run(Stage::Compute, || {
        handler.compute(&collected.items, &payload.params)
    });
    timing.compute_ms = elapsed_ms(&compute_timer);
    let actions = match actions {
        Ok(actions) => actions,
        Err(error) => {
            errors.push(error);
            return finish(
                false, stats, timing, warnings, errors, None, trace, tracing,
                retry.info(false, &options), total_timer,
            );
        }
    };
    if tracing {
        trace.push(format!(
            "compute: {} actions in {:.1}ms",
            actions.len(),
            timing.compute_ms
        ));
    }

    // ── Apply ────────────────────────────────────────────────────────────
    // Never retried. On dryRun the stage runs against a scratch copy so the
    // real document stays byte-identical.
    let apply_timer = Instant::now();
    let mut scratch = if options.dry_run { Some(doc.clone()) } else { None };
    {
        let target_doc: &mut DocumentModel = match scratch.as_mut() {
            Some(scratch) => scratch,
            None => &mut *doc,
        };
        for action in &actions {
            match handler.apply(target_doc, action) {
                Ok(ApplyOutcome::Modified) => stats.items_modified += 1,
                Ok(ApplyOutcome::Unchanged) => {}
                Err(error) => {
                    let aborts = error.code == TaskErrorCode::ApplyFailed.as_str();
                    errors.push(error);
                    if aborts {
                        break;
                    }
                    stats.items_skipped += 1;
                }
            }
        }

        assign_ids(
            handler,
            target_doc,
            &collected.items,
            &actions,
            &options,
            &mut warnings,
            &mut errors,
        );
    }
    if options.dry_run {
        warnings.push(TaskWarning {
            stage: Stage::Apply,
            message: format!(
                "dryRun: {} mutation(s) computed but not persisted",
                stats.items_modified
            ),
            item_ref: None,
            suggestion: None,
        });
    }
    timing.apply_ms = elapsed_ms(&apply_timer);
    if tracing {
        trace.push(format!(
            "apply: {} modified, {} error(s) in {:.1}ms{}",
            stats.items_modified,
            errors.len(),
            timing.apply_ms,
            if options.dry_run { " (dryRun)" } else { "" }
        ));
    }

    // ── Export ───────────────────────────────────────────────────────────
    let mut artifacts = None;
    if handler.has_export() && errors.is_empty() && !options.dry_run {
        let export_timer = Instant::now();
        match handler.export(doc, &payload.params) {
            Ok(result) => artifacts = result,
            Err(error) => errors.push(error),
        }
        timing.export_ms = Some(elapsed_ms(&export_timer));
        if tracing {
            trace.push(format!(
                "export: {} in {:.1}ms",
                if artifacts.is_some() { "done" } else { "skipped" },
                timing.export_ms.unwrap_or(0.0)
            ));
        }
    } else if handler.has_export() && options.dry_run {
        warnings.push(TaskWarning {
            stage: Stage::Export,
            message: "dryRun: export suppressed".to_string(),
            item_ref: None,
            suggestion: None,
        });
    }

    let ok = errors.is_empty();
    finish(
        ok, stats, timing, warnings, errors, artifacts, trace, tracing,
        retry.info(ok, &options), total_timer,
    )
}

/// The document-aware validate stage.
fn validate(
    handler: &dyn TaskHandler,
    doc: &DocumentModel,
    payload: &TaskPayload,
    options: &TaskOptions,
) -> Result<(), TaskError> {
    validate_payload(payload)?;

    if handler.requires_targets() && payload.targets.is_none() {
        return Err(TaskError::new(
            Stage::Validate,
            TaskErrorCode::InvalidTargets.as_str(),
            "task requires a target selector",
        ));
    }

    if doc.is_empty() {
        return Err(TaskError::new(
            Stage::Validate,
            TaskErrorCode::NoDocument.as_str(),
            "no document is open",
        ));
    }

    if let Some(selector) = &payload.targets {
        if targets_selection(&selector.target) && !doc.has_selection() {
            return Err(TaskError::new(
                Stage::Validate,
                TaskErrorCode::NoSelection.as_str(),
                "nothing is selected",
            ));
        }
    }

    handler.validate_params(&payload.params)?;

    // Duplicate identities in the document break every idPolicy that touches
    // IDs; surface them before any mutation.
    if options.id_policy != IdPolicy::None {
        let mut seen: std::collections::HashMap<String, (String, Vec<usize>)> =
            std::collections::HashMap::new();
        for item in doc.items() {
            if let Some((id, _)) = item.identity() {
                if let Some((layer_path, index_path)) = seen.get(&id) {
                    return Err(TaskError::new(
                        Stage::Validate,
                        TaskErrorCode::IdCollision.as_str(),
                        format!(
                            "id '{}' present on both {}[{:?}] and {}[{:?}]",
                            id, layer_path, index_path, item.layer_path, item.index_path
                        ),
                    ));
                }
                seen.insert(id, item.locator());
            }
        }
    }

    Ok(())
}

/// Whether a target (or any compound child) reads the UI selection.
fn targets_selection(target: &Target) -> bool {
    match target {
        Target::Selection => true,
        Target::Compound { any_of, .. } => any_of.iter().any(targets_selection),
        _ => false,
    }
}

/// Assign item IDs per the payload's `idPolicy`.
///
/// `none` and `preserve` never create IDs; `always` covers every processed
/// item; `opt_in` covers only items the task's actions explicitly named.
fn assign_ids(
    handler: &dyn TaskHandler,
    doc: &mut DocumentModel,
    collected: &[CollectedItem],
    actions: &[Action],
    options: &TaskOptions,
    warnings: &mut Vec<TaskWarning>,
    errors: &mut Vec<TaskError>,
) {
    let candidates: Vec<&CollectedItem> = match options.id_policy {
        IdPolicy::None | IdPolicy::Preserve => return,
        IdPolicy::Always => collected.iter().collect(),
        IdPolicy::OptIn => {
            let requested: std::collections::HashSet<(String, Vec<usize>)> = actions
                .iter()
                .filter_map(|action| action.target.as_ref())
                .map(|r| (r.layer_path.clone(), r.index_path.clone()))
                .collect();
            collected
                .iter()
                .filter(|c| {
                    requested.contains(&(c.item.layer_path.clone(), c.item.index_path.clone()))
                })
                .collect()
        }
    };

    for candidate in candidates {
        if candidate.item_ref.item_id.is_some() {
            continue;
        }
        let id = new_item_id();
        let (layer_path, index_path) = candidate.item.locator();
        if doc.owner_of_id(&id, None).is_some() {
            errors.push(
                TaskError::new(
                    Stage::Apply,
                    TaskErrorCode::ApplyItemFailed.as_str(),
                    format!("generated id '{}' collides with an existing item", id),
                )
                .with_item(candidate.item_ref.clone()),
            );
            continue;
        }
        if doc.assign_id(&layer_path, &index_path, &id, handler.id_source()) {
            log::debug!("Assigned id '{}' to {}[{:?}]", id, layer_path, index_path);
        } else {
            warnings.push(TaskWarning {
                stage: Stage::Apply,
                message: format!("could not assign id to {}[{:?}]", layer_path, index_path),
                item_ref: Some(candidate.item_ref.clone()),
                suggestion: None,
            });
        }
    }
}

/// Generate a fresh item identity.
fn new_item_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("itm_{}", &hex[..8])
}

fn elapsed_ms(timer: &Instant) -> f64 {
    timer.elapsed().as_secs_f64() * 1000.0
}

#[allow(clippy::too_many_arguments)]
fn finish(
    ok: bool,
    stats: TaskStats,
    mut timing: TimingInfo,
    warnings: Vec<TaskWarning>,
    errors: Vec<TaskError>,
    artifacts: Option<serde_json::Map<String, Value>>,
    trace: Vec<String>,
    tracing: bool,
    retry_info: Option<RetryInfo>,
    total_timer: Instant,
) -> TaskReport {
    timing.total_ms = elapsed_ms(&total_timer);
    TaskReport {
        ok,
        stats,
        timing,
        warnings,
        errors,
        artifacts,
        trace: if tracing { Some(trace) } else { None },
        retry_info,
    }
}
