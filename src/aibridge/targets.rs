//! Target resolution for the task runtime's collect stage.
//!
//! Resolves a [`TargetSelector`] against a [`DocumentModel`] into an ordered
//! list of items. Resolution is deterministic: equal-keyed orderings tie-break
//! by `(layerPath, indexPath)`, so repeated collection over an unchanged
//! document yields an identical item order.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::aibridge::document::{DocumentModel, HostItem};
use crate::aibridge::errors::{Stage, TaskErrorCode};
use crate::aibridge::protocol::{ExcludeFilter, ItemRef, OrderBy, Target, TargetSelector, TaskError};

/// One collected item: a snapshot of the host item plus its stable reference.
#[derive(Debug, Clone)]
pub struct CollectedItem {
    pub item: HostItem,
    pub item_ref: ItemRef,
}

/// Result of the collect stage.
#[derive(Debug, Clone, Default)]
pub struct CollectOutcome {
    /// Items in final order, deduplicated by locator.
    pub items: Vec<CollectedItem>,
    /// Items dropped by exclusion filters.
    pub skipped: usize,
}

/// Statically check a target variant.
///
/// `query` without any filter and `compound` without children are invalid
/// targets; compound children must be simple variants.
pub fn validate_target(target: &Target) -> Result<(), TaskError> {
    match target {
        Target::Query {
            item_type,
            pattern,
            layer,
            ..
        } => {
            if item_type.is_none() && pattern.is_none() && layer.is_none() {
                return Err(TaskError::new(
                    Stage::Validate,
                    TaskErrorCode::InvalidTargets.as_str(),
                    "query target requires at least one of itemType, pattern, layer",
                ));
            }
            Ok(())
        }
        Target::Compound { any_of, .. } => {
            if any_of.is_empty() {
                return Err(TaskError::new(
                    Stage::Validate,
                    TaskErrorCode::InvalidTargets.as_str(),
                    "compound target must list at least one child",
                ));
            }
            for child in any_of {
                if matches!(child, Target::Compound { .. }) {
                    return Err(TaskError::new(
                        Stage::Validate,
                        TaskErrorCode::InvalidTargets.as_str(),
                        "compound targets must list simple children",
                    ));
                }
                validate_target(child)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Resolve a selector into its final, ordered, deduplicated item list.
pub fn collect(doc: &DocumentModel, selector: &TargetSelector) -> Result<CollectOutcome, TaskError> {
    validate_target(&selector.target).map_err(|e| TaskError {
        stage: Stage::Collect,
        code: TaskErrorCode::CollectFailed.as_str().to_string(),
        ..e
    })?;

    let mut items = resolve_variant(doc, &selector.target);

    // Duplicates (same locator) are removed before anything downstream.
    let mut seen: HashSet<(String, Vec<usize>)> = HashSet::new();
    items.retain(|item| seen.insert(item.locator()));

    let before = items.len();
    if let Some(exclude) = &selector.exclude {
        items.retain(|item| !excluded(item, exclude));
    }
    let skipped = before - items.len();

    items.sort_by(|a, b| order_cmp(a, b, selector.order_by));

    Ok(CollectOutcome {
        items: items
            .into_iter()
            .map(|item| {
                let item_ref = item.item_ref();
                CollectedItem { item, item_ref }
            })
            .collect(),
        skipped,
    })
}

/// Resolve one variant into item snapshots (pre-exclusion, pre-ordering).
fn resolve_variant(doc: &DocumentModel, target: &Target) -> Vec<HostItem> {
    match target {
        Target::Selection => doc
            .items()
            .iter()
            .filter(|item| item.selected)
            .cloned()
            .collect(),
        Target::Layer { layer, recursive } => doc
            .items()
            .iter()
            .filter(|item| in_layer(item, layer, *recursive))
            .cloned()
            .collect(),
        Target::All { recursive } => doc
            .items()
            .iter()
            .filter(|item| {
                if *recursive {
                    true
                } else {
                    // Immediate children of top-level layers only.
                    !item.layer_path.contains('/') && item.index_path.len() == 1
                }
            })
            .cloned()
            .collect(),
        Target::Query {
            item_type,
            pattern,
            layer,
            recursive,
        } => doc
            .items()
            .iter()
            .filter(|item| {
                if let Some(layer) = layer {
                    if !in_layer(item, layer, *recursive) {
                        return false;
                    }
                }
                if let Some(item_type) = item_type {
                    if &item.item_type != item_type {
                        return false;
                    }
                }
                if let Some(pattern) = pattern {
                    if !wildcard_match(&item.name, pattern) {
                        return false;
                    }
                }
                true
            })
            .cloned()
            .collect(),
        Target::Compound { any_of, exclude } => {
            let mut union: Vec<HostItem> = Vec::new();
            let mut seen: HashSet<(String, Vec<usize>)> = HashSet::new();
            for child in any_of {
                for item in resolve_variant(doc, child) {
                    if seen.insert(item.locator()) {
                        union.push(item);
                    }
                }
            }
            if let Some(exclude) = exclude {
                union.retain(|item| !excluded(item, exclude));
            }
            union
        }
    }
}

/// Whether `item` belongs to `layer`, at the immediate level or recursively.
fn in_layer(item: &HostItem, layer: &str, recursive: bool) -> bool {
    if recursive {
        item.layer_path == layer || item.layer_path.starts_with(&format!("{}/", layer))
    } else {
        item.layer_path == layer && item.index_path.len() == 1
    }
}

/// Whether an exclusion filter drops the item.
fn excluded(item: &HostItem, exclude: &ExcludeFilter) -> bool {
    (exclude.locked && item.locked)
        || (exclude.hidden && item.hidden)
        || (exclude.guides && item.guide)
        || (exclude.clipped && item.clipping)
}

/// `*`-wildcard match over item names.
pub fn wildcard_match(name: &str, pattern: &str) -> bool {
    if !pattern.contains('*') {
        return name == pattern;
    }
    let segments: Vec<&str> = pattern.split('*').collect();
    let mut rest = name;
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(segment) {
                Some(after) => rest = after,
                None => return false,
            }
        } else if i == segments.len() - 1 {
            return rest.ends_with(segment);
        } else {
            match rest.find(segment) {
                Some(pos) => rest = &rest[pos + segment.len()..],
                None => return false,
            }
        }
    }
    true
}

/// Full ordering comparator: primary key per `order_by`, then the stable
/// positional tie-break.
fn order_cmp(a: &HostItem, b: &HostItem, order_by: OrderBy) -> Ordering {
    let primary = match order_by {
        OrderBy::ZOrder => a.z.cmp(&b.z),
        OrderBy::ZOrderReverse => b.z.cmp(&a.z),
        // Reading order: top row first (larger y is higher on the artboard),
        // then left to right.
        OrderBy::Reading => b.y.total_cmp(&a.y).then(a.x.total_cmp(&b.x)),
        OrderBy::Column => a.x.total_cmp(&b.x).then(b.y.total_cmp(&a.y)),
        OrderBy::Name => a.name.cmp(&b.name),
        OrderBy::PositionX => a.x.total_cmp(&b.x),
        OrderBy::PositionY => a.y.total_cmp(&b.y),
        OrderBy::Area => a.area().total_cmp(&b.area()),
    };
    primary
        .then_with(|| a.layer_path.cmp(&b.layer_path))
        .then_with(|| a.index_path.cmp(&b.index_path))
}
