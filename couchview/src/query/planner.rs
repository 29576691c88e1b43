use super::filter::{Condition, Filter, OrderTerm};
use super::value::{is_truthy, values_equal};
use crate::document::normalize_for;
use crate::schema::ModelDefinition;
use crate::store::ViewParams;
use crate::view::{design_name, view_name, CATCH_ALL_DESIGN, CATCH_ALL_VIEW};
use serde::Serialize;
use serde_json::Value;

/// How a filter is answered.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Plan {
    /// Fetch one document by id.
    Lookup { id: String },
    /// Query a view and reconcile the rows in process.
    View(ViewPlan),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewPlan {
    pub design: String,
    pub view: String,
    pub params: ViewParams,
    /// The full where-clause, re-applied to every row.
    pub residual: Vec<(String, Condition)>,
    pub order: Vec<OrderTerm>,
    pub offset: usize,
    pub limit: Option<usize>,
    /// Whether offset and limit are applied after filtering and sorting
    /// instead of being pushed to the store.
    pub paginate_locally: bool,
}

/// Choose a view and parameters for `filter` against `model`.
///
/// The first indexed condition whose values the index can actually return
/// (truthy values only, since the generated views skip falsy ones) narrows
/// the query to that property's view. Otherwise the catch-all view is keyed
/// by model name. Skip and limit go to the store only when nothing is left
/// to filter or sort in process.
pub fn plan(model: &ModelDefinition, filter: &Filter) -> Plan {
    if let Some(id) = filter.lookup_id() {
        return Plan::Lookup { id };
    }

    let residual = filter.conditions().to_vec();
    let order = filter.order_terms();

    let mut design = CATCH_ALL_DESIGN.to_string();
    let mut view = CATCH_ALL_VIEW.to_string();
    let mut params = ViewParams {
        keys: Some(vec![Value::String(model.name.clone())]),
        include_docs: true,
        ..Default::default()
    };

    for (property, condition) in &residual {
        if !model.is_indexed(property) {
            continue;
        }
        match condition {
            Condition::Equals(value) if is_truthy(value) => {
                params.keys = None;
                params.key = Some(normalize_for(model, property, value));
            }
            Condition::In(values) if !values.is_empty() && values.iter().all(is_truthy) => {
                params.keys = Some(distinct_keys(model, property, values));
            }
            _ => continue,
        }
        design = design_name(&model.name);
        view = view_name(property);
        break;
    }

    let paginate_locally = !residual.is_empty() || !order.is_empty();
    if !paginate_locally {
        params.skip = Some(filter.effective_offset()).filter(|o| *o > 0);
        params.limit = filter.effective_limit();
    }

    Plan::View(ViewPlan {
        design,
        view,
        params,
        residual,
        order,
        offset: filter.effective_offset(),
        limit: filter.effective_limit(),
        paginate_locally,
    })
}

/// Normalized in-list keys with repeats dropped, first occurrence kept.
/// The store answers one row per requested key, so a repeated key would
/// return the same document twice.
fn distinct_keys(model: &ModelDefinition, property: &str, values: &[Value]) -> Vec<Value> {
    let mut keys: Vec<Value> = Vec::with_capacity(values.len());
    for value in values {
        let key = normalize_for(model, property, value);
        if !keys.iter().any(|k| values_equal(k, &key)) {
            keys.push(key);
        }
    }
    keys
}
