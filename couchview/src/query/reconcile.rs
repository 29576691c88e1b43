use super::filter::{Condition, Direction, OrderTerm};
use super::planner::ViewPlan;
use super::value::{compare_values, values_equal};
use crate::document::{from_storage, normalize_for, Record, ID_FIELD, PUBLIC_ID};
use crate::error::Result;
use crate::schema::ModelDefinition;
use crate::store::ViewRow;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashSet;

/// Turn raw view rows into the final record list for `plan`.
///
/// Rows are unwrapped to their documents (exposing `_id` as `id`) with
/// repeated documents dropped, filtered
/// by the full where-clause, stably sorted, sliced when pagination was not
/// pushed to the store, and finally decoded.
pub fn reconcile(model: &ModelDefinition, rows: Vec<ViewRow>, plan: &ViewPlan) -> Result<Vec<Record>> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut docs: Vec<Map<String, Value>> = rows
        .into_iter()
        .filter_map(unwrap_row)
        .filter(|doc| match doc.get(PUBLIC_ID).and_then(Value::as_str) {
            Some(id) => seen.insert(id.to_string()),
            None => true,
        })
        .collect();

    if !plan.residual.is_empty() {
        docs.retain(|doc| matches(model, doc, &plan.residual));
    }

    if !plan.order.is_empty() {
        docs.sort_by(|a, b| compare_docs(a, b, &plan.order));
    }

    let docs: Vec<Map<String, Value>> = if plan.paginate_locally {
        let page = docs.into_iter().skip(plan.offset);
        match plan.limit {
            Some(limit) => page.take(limit).collect(),
            None => page.collect(),
        }
    } else {
        docs
    };

    let mut records = Vec::with_capacity(docs.len());
    for doc in docs {
        if let Some(record) = from_storage(model, Some(Value::Object(doc)))? {
            records.push(record);
        }
    }
    Ok(records)
}

fn unwrap_row(row: ViewRow) -> Option<Map<String, Value>> {
    match row.doc {
        Some(Value::Object(doc)) => {
            let mut unwrapped = Map::with_capacity(doc.len());
            if let Some(id) = doc.get(ID_FIELD) {
                unwrapped.insert(PUBLIC_ID.into(), id.clone());
            }
            for (key, value) in doc {
                if key != ID_FIELD {
                    unwrapped.insert(key, value);
                }
            }
            Some(unwrapped)
        }
        _ => {
            log::warn!(
                "View row {} carried no document, skipping",
                row.id.as_deref().unwrap_or("<unknown>")
            );
            None
        }
    }
}

/// Every condition must hold. Conditions on date properties compare in
/// epoch milliseconds, as stored.
fn matches(model: &ModelDefinition, doc: &Map<String, Value>, conditions: &[(String, Condition)]) -> bool {
    conditions.iter().all(|(property, condition)| {
        let actual = match doc.get(property) {
            Some(actual) => actual,
            None => return false,
        };
        match condition {
            Condition::Equals(expected) => values_equal(actual, &normalize_for(model, property, expected)),
            Condition::In(candidates) => candidates
                .iter()
                .any(|candidate| values_equal(actual, &normalize_for(model, property, candidate))),
        }
    })
}

fn compare_docs(a: &Map<String, Value>, b: &Map<String, Value>, order: &[OrderTerm]) -> Ordering {
    for term in order {
        let ordering = compare_values(a.get(&term.property), b.get(&term.property));
        let ordering = match term.direction {
            Direction::Asc => ordering,
            Direction::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}
