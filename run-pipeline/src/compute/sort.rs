use std::cmp::Ordering;

use serde_json::Value;
use shared_types::{SortDirection, SortKey};

use super::{as_number, as_text, lookup};

/// Stable multi-key sort. Items missing a key go last whatever the direction;
/// items equal on every key keep their input order. Numbers (and numeric
/// strings) order before other values in ascending order.
pub fn sort_items(mut items: Vec<Value>, keys: &[SortKey]) -> Vec<Value> {
    if keys.is_empty() {
        return items;
    }
    items.sort_by(|a, b| compare_items(a, b, keys));
    items
}

fn compare_items(a: &Value, b: &Value, keys: &[SortKey]) -> Ordering {
    for sort_key in keys {
        let ordering = match (lookup(a, &sort_key.key), lookup(b, &sort_key.key)) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(left), Some(right)) => {
                let ordering = compare_values(left, right);
                match sort_key.direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                }
            }
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn compare_values(left: &Value, right: &Value) -> Ordering {
    match (as_number(left), as_number(right)) {
        (Some(left), Some(right)) => left.total_cmp(&right),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => as_text(left).cmp(&as_text(right)),
    }
}
