use serde_json::Value;
use shared_types::{FilterOperator, FilterPredicate};

use super::{as_number, as_text, lookup};

/// Keep items matching every predicate.
pub fn filter_items(items: Vec<Value>, filters: &[FilterPredicate]) -> Vec<Value> {
    items
        .into_iter()
        .filter(|item| filters.iter().all(|predicate| matches(item, predicate)))
        .collect()
}

/// A missing field never matches. `includes` ignores case; the other string
/// operators do not.
pub fn matches(item: &Value, predicate: &FilterPredicate) -> bool {
    let Some(field) = lookup(item, &predicate.key) else {
        return false;
    };
    let target = &predicate.value;

    match predicate.operator {
        FilterOperator::Includes => as_text(field)
            .to_lowercase()
            .contains(&as_text(target).to_lowercase()),
        FilterOperator::Equals => match (as_number(field), as_number(target)) {
            (Some(left), Some(right)) => left == right,
            _ => field == target || as_text(field) == as_text(target),
        },
        FilterOperator::StartsWith => as_text(field).starts_with(&as_text(target)),
        FilterOperator::EndsWith => as_text(field).ends_with(&as_text(target)),
        FilterOperator::GreaterThan => {
            matches!((as_number(field), as_number(target)), (Some(left), Some(right)) if left > right)
        }
        FilterOperator::LessThan => {
            matches!((as_number(field), as_number(target)), (Some(left), Some(right)) if left < right)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn predicate(key: &str, operator: FilterOperator, value: Value) -> FilterPredicate {
        FilterPredicate {
            key: key.to_string(),
            operator,
            value,
        }
    }

    #[test]
    fn test_operators() {
        let item = json!({"name": "Planner Agent", "score": 7, "tag": "alpha-1"});
        assert!(matches(&item, &predicate("name", FilterOperator::Includes, json!("planner"))));
        assert!(matches(&item, &predicate("score", FilterOperator::Equals, json!("7"))));
        assert!(matches(&item, &predicate("tag", FilterOperator::StartsWith, json!("alpha"))));
        assert!(!matches(&item, &predicate("tag", FilterOperator::StartsWith, json!("Alpha"))));
        assert!(matches(&item, &predicate("tag", FilterOperator::EndsWith, json!("-1"))));
        assert!(matches(&item, &predicate("score", FilterOperator::GreaterThan, json!(6))));
        assert!(!matches(&item, &predicate("score", FilterOperator::LessThan, json!(7))));
        assert!(!matches(&item, &predicate("name", FilterOperator::GreaterThan, json!(1))));
        assert!(!matches(&item, &predicate("missing", FilterOperator::Equals, json!(null))));
    }

    #[test]
    fn test_predicates_are_anded() {
        let items = vec![
            json!({"id": 1, "kind": "gauge", "v": 5}),
            json!({"id": 2, "kind": "gauge", "v": 50}),
            json!({"id": 3, "kind": "counter", "v": 50}),
        ];
        let kept = filter_items(
            items,
            &[
                predicate("kind", FilterOperator::Equals, json!("gauge")),
                predicate("v", FilterOperator::GreaterThan, json!(10)),
            ],
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0]["id"], 2);

        let everything = filter_items(vec![json!({"a": 1})], &[]);
        assert_eq!(everything.len(), 1);
    }
}
