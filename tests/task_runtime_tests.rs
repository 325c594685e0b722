//! End-to-end tests for the task envelope runtime: compound target
//! collection, report assembly, and dry-run behavior over a realistic
//! document.

use serde_json::{json, Value};

use aibridge::document::{DocumentModel, HostItem};
use aibridge::errors::{Stage, TaskErrorCode};
use aibridge::protocol::{
    ExcludeFilter, OrderBy, Target, TargetSelector, TaskError, TaskOptions, TaskPayload,
};
use aibridge::targets::{collect, CollectedItem};
use aibridge::task_runtime::{run_task, Action, ApplyOutcome, TaskHandler};

/// Tags every collected item's note with a `@seen=<n>` marker.
struct TagTask;

impl TaskHandler for TagTask {
    fn name(&self) -> &str {
        "tag_items"
    }

    fn compute(
        &self,
        items: &[CollectedItem],
        _params: &serde_json::Map<String, Value>,
    ) -> Result<Vec<Action>, TaskError> {
        Ok(items
            .iter()
            .enumerate()
            .map(|(i, c)| {
                Action::new(
                    "tag",
                    Some(c.item_ref.clone()),
                    json!({ "marker": format!("@seen={}", i) }),
                )
            })
            .collect())
    }

    fn apply(&self, doc: &mut DocumentModel, action: &Action) -> Result<ApplyOutcome, TaskError> {
        let target = action.target.as_ref().expect("tag actions carry targets");
        let marker = action.payload["marker"].as_str().unwrap_or_default();
        match doc.find_mut(&target.layer_path, &target.index_path) {
            Some(item) => {
                if item.note.is_empty() {
                    item.note = marker.to_string();
                } else {
                    item.note = format!("{} {}", item.note, marker);
                }
                Ok(ApplyOutcome::Modified)
            }
            None => Err(TaskError::new(
                Stage::Apply,
                TaskErrorCode::ApplyItemFailed.as_str(),
                "target item vanished",
            )
            .with_item(target.clone())),
        }
    }
}

/// The document from the compound-collect scenario: layer `L1` holds `a` and
/// `b`, layer `L2` holds the locked `c` between them on the x axis.
fn scenario_document() -> DocumentModel {
    let mut doc = DocumentModel::new();
    doc.push(HostItem::new("L1", vec![0], "PathItem").named("a").at(10.0, 10.0));
    doc.push(HostItem::new("L1", vec![1], "PathItem").named("b").at(30.0, 10.0));
    doc.push(
        HostItem::new("L2", vec![0], "PathItem")
            .named("c")
            .at(20.0, 10.0)
            .locked(),
    );
    doc
}

fn compound_selector(exclude_locked: bool) -> TargetSelector {
    TargetSelector::new(Target::Compound {
        any_of: vec![
            Target::Layer {
                layer: "L1".to_string(),
                recursive: false,
            },
            Target::Layer {
                layer: "L2".to_string(),
                recursive: false,
            },
        ],
        exclude: if exclude_locked {
            Some(ExcludeFilter::locked())
        } else {
            None
        },
    })
    .order_by(OrderBy::PositionX)
}

#[test]
fn test_compound_collect_without_exclude_keeps_locked_item() {
    let doc = scenario_document();
    let outcome = collect(&doc, &compound_selector(false)).unwrap();
    let names: Vec<&str> = outcome.items.iter().map(|c| c.item.name.as_str()).collect();
    assert_eq!(names, vec!["a", "c", "b"]);
}

#[test]
fn test_compound_collect_with_exclude_repeats_exactly() {
    let doc = scenario_document();
    for _ in 0..3 {
        let outcome = collect(&doc, &compound_selector(true)).unwrap();
        let names: Vec<&str> = outcome.items.iter().map(|c| c.item.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}

#[test]
fn test_task_over_compound_target_produces_full_report() {
    let mut doc = scenario_document();
    let payload = TaskPayload::new("tag_items")
        .with_targets(compound_selector(true))
        .with_options(TaskOptions {
            trace: true,
            ..TaskOptions::default()
        });

    let report = run_task(&TagTask, &mut doc, &payload);

    assert!(report.ok);
    assert_eq!(report.stats.items_processed, 2);
    assert_eq!(report.stats.items_modified, 2);
    assert_eq!(report.stats.items_skipped, 1);
    assert!(report.timing.total_ms >= 0.0);
    assert!(report.trace.is_some());

    // `a` and `b` were tagged in positionX order; locked `c` untouched.
    assert_eq!(doc.find("L1", &[0]).unwrap().note, "@seen=0");
    assert_eq!(doc.find("L1", &[1]).unwrap().note, "@seen=1");
    assert_eq!(doc.find("L2", &[0]).unwrap().note, "");
}

#[test]
fn test_dry_run_is_byte_identical() {
    let mut doc = scenario_document();
    let before = doc.clone();
    let payload = TaskPayload::new("tag_items")
        .with_targets(compound_selector(true))
        .with_options(TaskOptions {
            dry_run: true,
            ..TaskOptions::default()
        });

    let report = run_task(&TagTask, &mut doc, &payload);

    assert!(report.ok);
    assert_eq!(report.stats.items_modified, 2);
    assert_eq!(doc, before);
}

#[test]
fn test_report_serializes_with_camel_case_keys() {
    let mut doc = scenario_document();
    let payload = TaskPayload::new("tag_items").with_targets(compound_selector(true));
    let report = run_task(&TagTask, &mut doc, &payload);

    let value = serde_json::to_value(&report).unwrap();
    assert_eq!(value["ok"], true);
    assert_eq!(value["stats"]["itemsProcessed"], 2);
    assert_eq!(value["stats"]["itemsSkipped"], 1);
    assert!(value["timing"]["total_ms"].is_number());
}

#[test]
fn test_repeated_runs_collect_identically() {
    // Tagging appends to notes but never moves items, so collection order
    // must be stable across repeated runs.
    let mut doc = scenario_document();
    let payload = TaskPayload::new("tag_items").with_targets(compound_selector(true));

    let first = run_task(&TagTask, &mut doc, &payload);
    let second = run_task(&TagTask, &mut doc, &payload);
    assert!(first.ok && second.ok);
    assert_eq!(doc.find("L1", &[0]).unwrap().note, "@seen=0 @seen=0");
    assert_eq!(doc.find("L1", &[1]).unwrap().note, "@seen=1 @seen=1");
}
