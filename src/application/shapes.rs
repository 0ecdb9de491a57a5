//! Item-list shape detection.
//!
//! Retailer feeds nest their item lists in a handful of ways. Each shape is a
//! strategy that either finds a list containing at least one well-formed item
//! or reports that it does not apply; strategies are tried in
//! [`ItemShape::PRIORITY`] order and the first hit wins.

use std::fmt;

use serde_json::{Map, Value};

use crate::domain::field_map::FieldMap;

/// Observed feeds nest grouping nodes at most this deep.
pub const MAX_GROUP_DEPTH: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemShape {
    /// `Items` directly under the top level.
    TopLevel,
    /// `Category -> Items`.
    Grouped,
    /// `Category -> SubCategory [-> SubCategory] -> Items`.
    NestedGroups,
}

impl fmt::Display for ItemShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemShape::TopLevel => write!(f, "top-level items"),
            ItemShape::Grouped => write!(f, "grouped items"),
            ItemShape::NestedGroups => write!(f, "nested group items"),
        }
    }
}

impl ItemShape {
    pub const PRIORITY: [ItemShape; 3] = [ItemShape::TopLevel, ItemShape::Grouped, ItemShape::NestedGroups];

    /// Raw items for this shape, or `None` when the shape yields no
    /// well-formed item.
    pub fn locate(&self, top: &Value, fields: &FieldMap) -> Option<Vec<Map<String, Value>>> {
        let items = match self {
            ItemShape::TopLevel => items_under(top, fields),
            ItemShape::Grouped => groups_of(top, fields)
                .flat_map(|group| items_under(group, fields))
                .collect(),
            ItemShape::NestedGroups => {
                let mut found = Vec::new();
                collect_nested(top, 1, fields, &mut found);
                found
            }
        };
        items
            .iter()
            .any(|item| item.contains_key(&fields.barcode))
            .then_some(items)
    }
}

/// Tries every shape in priority order.
pub fn detect(top: &Value, fields: &FieldMap) -> Option<(ItemShape, Vec<Map<String, Value>>)> {
    ItemShape::PRIORITY
        .iter()
        .find_map(|shape| shape.locate(top, fields).map(|items| (*shape, items)))
}

/// The content of the single root element, unless the root itself is an
/// item list or grouping node.
pub fn top_level<'a>(doc: &'a Value, fields: &FieldMap) -> &'a Value {
    match doc.as_object() {
        Some(map) if map.len() == 1 => match map.iter().next() {
            Some((key, value)) if !fields.is_item_list(key) && !fields.is_group(key) => value,
            _ => doc,
        },
        _ => doc,
    }
}

/// Cardinality-1 fields are scalars, cardinality-N are arrays.
pub fn as_sequence(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

fn groups_of<'a>(node: &'a Value, fields: &'a FieldMap) -> impl Iterator<Item = &'a Value> + 'a {
    fields
        .groups
        .iter()
        .filter_map(move |key| node.get(key))
        .flat_map(as_sequence)
}

fn collect_nested(node: &Value, depth: usize, fields: &FieldMap, out: &mut Vec<Map<String, Value>>) {
    if depth > MAX_GROUP_DEPTH {
        return;
    }
    for group in groups_of(node, fields) {
        if depth >= 2 {
            out.extend(items_under(group, fields));
        }
        collect_nested(group, depth + 1, fields, out);
    }
}

/// Items held by any item-list key of `node`, unwrapping `<Items><Item/>`
/// style element wrappers and promotion-style nested item containers.
fn items_under(node: &Value, fields: &FieldMap) -> Vec<Map<String, Value>> {
    let mut items = Vec::new();
    for key in &fields.item_lists {
        let Some(list) = node.get(key) else { continue };
        for entry in as_sequence(list) {
            let Some(entry_map) = entry.as_object() else { continue };
            let wrapped = fields
                .item_elements
                .iter()
                .find_map(|element| entry_map.get(element));
            match wrapped {
                Some(inner) => {
                    for item in as_sequence(inner) {
                        if let Some(item) = item.as_object() {
                            expand_nested(item, fields, &mut items);
                        }
                    }
                }
                None => expand_nested(entry_map, fields, &mut items),
            }
        }
    }
    items
}

/// A raw item carrying a nested item container becomes one item per nested
/// child, each inheriting the parent's fields unless it overrides them.
fn expand_nested(item: &Map<String, Value>, fields: &FieldMap, out: &mut Vec<Map<String, Value>>) {
    let Some(nested) = &fields.nested_items else {
        out.push(item.clone());
        return;
    };
    let Some(container) = item.get(&nested.container) else {
        out.push(item.clone());
        return;
    };
    let children: Vec<&Value> = as_sequence(container)
        .into_iter()
        .filter_map(|c| c.get(&nested.element))
        .flat_map(as_sequence)
        .collect();

    for child in children {
        let Some(child) = child.as_object() else { continue };
        let mut merged: Map<String, Value> = item
            .iter()
            .filter(|(k, _)| **k != nested.container)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (k, v) in child {
            merged.insert(k.clone(), v.clone());
        }
        out.push(merged);
    }
}
