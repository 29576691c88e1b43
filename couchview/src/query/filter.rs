use crate::document::{number_to_id, PUBLIC_ID};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// Key that turns a where-clause value into an in-list.
pub const IN_OPERATOR: &str = "inq";

/// A single where-clause condition.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Equals(Value),
    In(Vec<Value>),
}

impl From<Value> for Condition {
    fn from(value: Value) -> Self {
        if let Value::Object(obj) = &value {
            if obj.len() == 1 {
                if let Some(Value::Array(list)) = obj.get(IN_OPERATOR) {
                    return Condition::In(list.clone());
                }
            }
        }
        Condition::Equals(value)
    }
}

impl From<Condition> for Value {
    fn from(condition: Condition) -> Self {
        match condition {
            Condition::Equals(value) => value,
            Condition::In(list) => {
                let mut obj = Map::new();
                obj.insert(IN_OPERATOR.into(), Value::Array(list));
                Value::Object(obj)
            }
        }
    }
}

/// Conditions in the order they were declared.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct Where {
    pub conditions: Vec<(String, Condition)>,
}

impl Where {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, property: &str, value: Value) -> Self {
        self.conditions
            .push((property.to_string(), Condition::Equals(value)));
        self
    }

    pub fn any_of(mut self, property: &str, values: Vec<Value>) -> Self {
        self.conditions
            .push((property.to_string(), Condition::In(values)));
        self
    }

    pub fn get(&self, property: &str) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|(name, _)| name == property)
            .map(|(_, condition)| condition)
    }
}

impl From<Map<String, Value>> for Where {
    fn from(map: Map<String, Value>) -> Self {
        Where {
            conditions: map
                .into_iter()
                .map(|(key, value)| (key, Condition::from(value)))
                .collect(),
        }
    }
}

impl From<Where> for Map<String, Value> {
    fn from(clause: Where) -> Self {
        clause
            .conditions
            .into_iter()
            .map(|(key, condition)| (key, Value::from(condition)))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Asc,
    Desc,
}

/// One sort key: `"made DESC"` parses to `made` descending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderTerm {
    pub property: String,
    pub direction: Direction,
}

impl OrderTerm {
    pub fn parse(term: &str) -> Self {
        static DIRECTION: OnceLock<Regex> = OnceLock::new();
        let direction_re =
            DIRECTION.get_or_init(|| Regex::new(r"(?i)\s+(A|DE)SC$").expect("valid regex"));

        let term = term.trim();
        match direction_re.captures(term) {
            Some(caps) => {
                let direction = if caps[1].eq_ignore_ascii_case("DE") {
                    Direction::Desc
                } else {
                    Direction::Asc
                };
                let end = caps.get(0).map(|m| m.start()).unwrap_or(term.len());
                OrderTerm {
                    property: term[..end].to_string(),
                    direction,
                }
            }
            None => OrderTerm {
                property: term.to_string(),
                direction: Direction::Asc,
            },
        }
    }
}

/// `order` accepts a single key or a list of keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Order {
    One(String),
    Many(Vec<String>),
}

/// Query filter as supplied by the ORM.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(rename = "where", default, skip_serializing_if = "Option::is_none")]
    pub where_: Option<Where>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<Order>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(alias = "skip", default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<Value>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_where(clause: Where) -> Self {
        Filter {
            where_: Some(clause),
            ..Default::default()
        }
    }

    pub fn order(mut self, order: &str) -> Self {
        self.order = Some(Order::One(order.to_string()));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn include(mut self, include: Value) -> Self {
        self.include = Some(include);
        self
    }

    /// Declared conditions; an absent where-clause has none.
    pub fn conditions(&self) -> &[(String, Condition)] {
        self.where_
            .as_ref()
            .map(|w| w.conditions.as_slice())
            .unwrap_or(&[])
    }

    /// The id of a point lookup, if the where-clause names one.
    pub fn lookup_id(&self) -> Option<String> {
        match self.where_.as_ref()?.get(PUBLIC_ID)? {
            Condition::Equals(Value::String(id)) if !id.is_empty() => Some(id.clone()),
            Condition::Equals(Value::Number(n)) => Some(number_to_id(n)),
            _ => None,
        }
    }

    pub fn order_terms(&self) -> Vec<OrderTerm> {
        match &self.order {
            None => Vec::new(),
            Some(Order::One(term)) => vec![OrderTerm::parse(term)],
            Some(Order::Many(terms)) => terms.iter().map(|t| OrderTerm::parse(t)).collect(),
        }
    }

    /// Effective limit; zero means unlimited.
    pub fn effective_limit(&self) -> Option<usize> {
        self.limit.filter(|l| *l > 0)
    }

    pub fn effective_offset(&self) -> usize {
        self.offset.unwrap_or(0)
    }
}
