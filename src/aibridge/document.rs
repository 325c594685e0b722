//! In-process model of the host document.
//!
//! [`DocumentModel`] is the item tree the task runtime's collect/apply stages
//! operate on: a flat, z-ordered list of [`HostItem`]s, each addressed by its
//! positional locator (`layerPath` + `indexPath`). Items carry the annotation
//! fields (name, note) that identity and `@key=value` tags are parsed from.

use std::collections::HashMap;

use crate::aibridge::protocol::{IdSource, ItemRef};

/// One page item in the host document.
#[derive(Debug, Clone, PartialEq)]
pub struct HostItem {
    /// Layer path, e.g. `"Layer 1"` or `"Layer 1/Sub"`.
    pub layer_path: String,
    /// Position chain within the layer's containers.
    pub index_path: Vec<usize>,
    /// Host type name, e.g. `"PathItem"`, `"TextFrame"`, `"GroupItem"`.
    pub item_type: String,
    pub name: String,
    pub note: String,
    pub locked: bool,
    pub hidden: bool,
    pub guide: bool,
    pub clipping: bool,
    pub selected: bool,
    /// Left edge of the bounding box.
    pub x: f64,
    /// Top edge of the bounding box.
    pub y: f64,
    pub width: f64,
    pub height: f64,
    /// Global stacking order, assigned by the model on insertion.
    pub(crate) z: usize,
}

impl HostItem {
    pub fn new(
        layer_path: impl Into<String>,
        index_path: Vec<usize>,
        item_type: impl Into<String>,
    ) -> Self {
        Self {
            layer_path: layer_path.into(),
            index_path,
            item_type: item_type.into(),
            name: String::new(),
            note: String::new(),
            locked: false,
            hidden: false,
            guide: false,
            clipping: false,
            selected: false,
            x: 0.0,
            y: 0.0,
            width: 0.0,
            height: 0.0,
            z: 0,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = note.into();
        self
    }

    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.x = x;
        self.y = y;
        self
    }

    pub fn sized(mut self, width: f64, height: f64) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn locked(mut self) -> Self {
        self.locked = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn guide(mut self) -> Self {
        self.guide = true;
        self
    }

    pub fn clipping(mut self) -> Self {
        self.clipping = true;
        self
    }

    pub fn selected(mut self) -> Self {
        self.selected = true;
        self
    }

    /// Bounding-box area.
    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    /// The positional locator `(layerPath, indexPath)` as an owned key.
    pub fn locator(&self) -> (String, Vec<usize>) {
        (self.layer_path.clone(), self.index_path.clone())
    }

    /// `@key=value` tags parsed from the name and note. Note entries win on
    /// duplicate keys.
    pub fn tags(&self) -> HashMap<String, String> {
        let mut tags = parse_tags(&self.name);
        tags.extend(parse_tags(&self.note));
        tags
    }

    /// The item's persistent identity, if one is anchored in its note or name.
    pub fn identity(&self) -> Option<(String, IdSource)> {
        if let Some(id) = parse_tags(&self.note).remove("id") {
            return Some((id, IdSource::Note));
        }
        if let Some(id) = parse_tags(&self.name).remove("id") {
            return Some((id, IdSource::Name));
        }
        None
    }

    /// Build the stable reference handed to callers for this item.
    pub fn item_ref(&self) -> ItemRef {
        let (item_id, id_source) = match self.identity() {
            Some((id, source)) => (Some(id), source),
            None => (None, IdSource::None),
        };
        ItemRef {
            layer_path: self.layer_path.clone(),
            index_path: self.index_path.clone(),
            item_id,
            id_source,
            tags: self.tags(),
            item_type: self.item_type.clone(),
            item_name: if self.name.is_empty() {
                None
            } else {
                Some(self.name.clone())
            },
        }
    }
}

/// Parse `@key=value` tokens out of an annotation string.
fn parse_tags(text: &str) -> HashMap<String, String> {
    let mut tags = HashMap::new();
    for token in text.split_whitespace() {
        let body = match token.strip_prefix('@') {
            Some(body) => body,
            None => continue,
        };
        if let Some(eq) = body.find('=') {
            let (key, value) = body.split_at(eq);
            if !key.is_empty() {
                tags.insert(key.to_string(), value[1..].to_string());
            }
        }
    }
    tags
}

/// The document the runtime collects from and applies to.
///
/// Items are kept in stacking order: the first pushed item is frontmost
/// (z = 0), matching how the host enumerates page items.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentModel {
    items: Vec<HostItem>,
}

impl DocumentModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an item, assigning its stacking order.
    pub fn push(&mut self, mut item: HostItem) {
        item.z = self.items.len();
        self.items.push(item);
    }

    pub fn items(&self) -> &[HostItem] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether any item is part of the current UI selection.
    pub fn has_selection(&self) -> bool {
        self.items.iter().any(|item| item.selected)
    }

    /// Look up an item by its positional locator.
    pub fn find(&self, layer_path: &str, index_path: &[usize]) -> Option<&HostItem> {
        self.items
            .iter()
            .find(|item| item.layer_path == layer_path && item.index_path == index_path)
    }

    /// Mutable lookup by positional locator.
    pub fn find_mut(&mut self, layer_path: &str, index_path: &[usize]) -> Option<&mut HostItem> {
        self.items
            .iter_mut()
            .find(|item| item.layer_path == layer_path && item.index_path == index_path)
    }

    /// The item (if any) other than `excluding` that already carries `id`.
    pub fn owner_of_id(
        &self,
        id: &str,
        excluding: Option<(&str, &[usize])>,
    ) -> Option<&HostItem> {
        self.items.iter().find(|item| {
            if let Some((layer_path, index_path)) = excluding {
                if item.layer_path == layer_path && item.index_path == index_path {
                    return false;
                }
            }
            matches!(item.identity(), Some((existing, _)) if existing == id)
        })
    }

    /// Write an `@id=` annotation into the item's note or name.
    ///
    /// Returns `false` when the locator resolves to nothing. Writing to an
    /// item that already carries an identity in the chosen field replaces it.
    pub fn assign_id(
        &mut self,
        layer_path: &str,
        index_path: &[usize],
        id: &str,
        source: IdSource,
    ) -> bool {
        let item = match self.find_mut(layer_path, index_path) {
            Some(item) => item,
            None => return false,
        };
        let tag = format!("@id={}", id);
        match source {
            IdSource::Note => item.note = splice_tag(&item.note, &tag),
            IdSource::Name => item.name = splice_tag(&item.name, &tag),
            IdSource::None => return false,
        }
        true
    }
}

/// Replace any existing `@id=` token in `text` with `tag`, or append it.
fn splice_tag(text: &str, tag: &str) -> String {
    let mut parts: Vec<&str> = text
        .split_whitespace()
        .filter(|token| !token.starts_with("@id="))
        .collect();
    parts.push(tag);
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_parsing() {
        let item = HostItem::new("L1", vec![0], "PathItem")
            .named("badge @slot=3")
            .with_note("@color=red plain text @id=b-7");
        let tags = item.tags();
        assert_eq!(tags.get("slot").map(String::as_str), Some("3"));
        assert_eq!(tags.get("color").map(String::as_str), Some("red"));
        assert_eq!(tags.get("id").map(String::as_str), Some("b-7"));
    }

    #[test]
    fn test_identity_prefers_note() {
        let item = HostItem::new("L1", vec![0], "PathItem")
            .named("@id=from-name")
            .with_note("@id=from-note");
        assert_eq!(
            item.identity(),
            Some(("from-note".to_string(), IdSource::Note))
        );
    }

    #[test]
    fn test_identity_from_name() {
        let item = HostItem::new("L1", vec![0], "PathItem").named("logo @id=n-1");
        assert_eq!(item.identity(), Some(("n-1".to_string(), IdSource::Name)));
    }

    #[test]
    fn test_item_ref_concerns_are_independent() {
        let bare = HostItem::new("L1", vec![2], "TextFrame");
        let item_ref = bare.item_ref();
        assert_eq!(item_ref.layer_path, "L1");
        assert_eq!(item_ref.index_path, vec![2]);
        assert!(item_ref.item_id.is_none());
        assert_eq!(item_ref.id_source, IdSource::None);
        assert!(item_ref.tags.is_empty());
        assert!(item_ref.item_name.is_none());
    }

    #[test]
    fn test_push_assigns_stacking_order() {
        let mut doc = DocumentModel::new();
        doc.push(HostItem::new("L1", vec![0], "PathItem"));
        doc.push(HostItem::new("L1", vec![1], "PathItem"));
        assert_eq!(doc.items()[0].z, 0);
        assert_eq!(doc.items()[1].z, 1);
    }

    #[test]
    fn test_assign_id_into_note() {
        let mut doc = DocumentModel::new();
        doc.push(HostItem::new("L1", vec![0], "PathItem").with_note("existing"));
        assert!(doc.assign_id("L1", &[0], "fresh-1", IdSource::Note));
        let item = doc.find("L1", &[0]).unwrap();
        assert_eq!(item.note, "existing @id=fresh-1");
        assert_eq!(
            item.identity(),
            Some(("fresh-1".to_string(), IdSource::Note))
        );
    }

    #[test]
    fn test_assign_id_replaces_previous() {
        let mut doc = DocumentModel::new();
        doc.push(HostItem::new("L1", vec![0], "PathItem").with_note("@id=old"));
        assert!(doc.assign_id("L1", &[0], "new", IdSource::Note));
        let item = doc.find("L1", &[0]).unwrap();
        assert_eq!(item.identity(), Some(("new".to_string(), IdSource::Note)));
        assert!(!item.note.contains("old"));
    }

    #[test]
    fn test_owner_of_id_excludes_self() {
        let mut doc = DocumentModel::new();
        doc.push(HostItem::new("L1", vec![0], "PathItem").with_note("@id=x"));
        doc.push(HostItem::new("L1", vec![1], "PathItem"));
        assert!(doc.owner_of_id("x", Some(("L1", &[0]))).is_none());
        assert!(doc.owner_of_id("x", Some(("L1", &[1]))).is_some());
        assert!(doc.owner_of_id("x", None).is_some());
    }
}
