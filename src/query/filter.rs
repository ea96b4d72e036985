//! Property filters, ordering and client-side predicates.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{Edge, Node, Props};

/// Declarative filter over an entity's properties, evaluated after each storage round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Filter {
    /// Property equals the value.
    Eq(String, Value),
    /// Property is absent or differs from the value.
    Ne(String, Value),
    /// Property is greater than the value.
    Gt(String, Value),
    /// Property is greater than or equal to the value.
    Ge(String, Value),
    /// Property is less than the value.
    Lt(String, Value),
    /// Property is less than or equal to the value.
    Le(String, Value),
    /// Property equals one of the values.
    In(String, Vec<Value>),
    /// Property is present and not null.
    Exists(String),
    /// Every child filter matches.
    And(Vec<Filter>),
    /// At least one child filter matches.
    Or(Vec<Filter>),
    /// Child filter does not match.
    Not(Box<Filter>),
}

impl Filter {
    /// `prop == value`.
    pub fn eq(prop: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(prop.into(), value.into())
    }

    /// `prop > value`.
    pub fn gt(prop: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gt(prop.into(), value.into())
    }

    /// `prop < value`.
    pub fn lt(prop: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Lt(prop.into(), value.into())
    }

    /// Conjunction with another filter.
    pub fn and(self, other: Filter) -> Self {
        match self {
            Filter::And(mut args) => {
                args.push(other);
                Filter::And(args)
            }
            first => Filter::And(vec![first, other]),
        }
    }

    /// Evaluates the filter against a property bag.
    pub fn matches(&self, props: &Props) -> bool {
        match self {
            Filter::Eq(prop, value) => props.get(prop).is_some_and(|v| values_equal(v, value)),
            Filter::Ne(prop, value) => !props.get(prop).is_some_and(|v| values_equal(v, value)),
            Filter::Gt(prop, value) => compare(props.get(prop), value) == Some(Ordering::Greater),
            Filter::Ge(prop, value) => matches!(
                compare(props.get(prop), value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Filter::Lt(prop, value) => compare(props.get(prop), value) == Some(Ordering::Less),
            Filter::Le(prop, value) => matches!(
                compare(props.get(prop), value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Filter::In(prop, values) => props
                .get(prop)
                .is_some_and(|v| values.iter().any(|candidate| values_equal(v, candidate))),
            Filter::Exists(prop) => props.get(prop).is_some_and(|v| !v.is_null()),
            Filter::And(args) => args.iter().all(|f| f.matches(props)),
            Filter::Or(args) => args.iter().any(|f| f.matches(props)),
            Filter::Not(inner) => !inner.matches(props),
        }
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn compare(left: Option<&Value>, right: &Value) -> Option<Ordering> {
    match (left?, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Sort order of a connection.
///
/// Node connections may order by id or by an indexed scalar property; edge
/// hops always order by the id of the opposite endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Property to order by; `None` orders by id.
    pub prop: Option<String>,
    /// Descending when `true`.
    pub descending: bool,
}

impl Order {
    /// Ascending by id.
    pub fn by_id() -> Self {
        Self::default()
    }

    /// Ascending by a property.
    pub fn by_prop(prop: impl Into<String>) -> Self {
        Self {
            prop: Some(prop.into()),
            descending: false,
        }
    }

    /// Flips to descending order.
    pub fn desc(mut self) -> Self {
        self.descending = true;
        self
    }
}

/// Client-side predicate applied by `Where` connections.
pub struct Predicate<T> {
    label: String,
    test: Arc<dyn Fn(&T) -> bool + Send + Sync>,
}

/// Predicate over nodes.
pub type NodePredicate = Predicate<Node>;
/// Predicate over edges.
pub type EdgePredicate = Predicate<Edge>;

impl<T> Predicate<T> {
    /// Wraps a closure; `label` only shows up in debug output and logs.
    pub fn new(label: impl Into<String>, test: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        Self {
            label: label.into(),
            test: Arc::new(test),
        }
    }

    /// Evaluates the predicate.
    pub fn test(&self, value: &T) -> bool {
        (self.test)(value)
    }

    /// Debug label.
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl<T> Clone for Predicate<T> {
    fn clone(&self) -> Self {
        Self {
            label: self.label.clone(),
            test: Arc::clone(&self.test),
        }
    }
}

impl<T> fmt::Debug for Predicate<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Predicate").field(&self.label).finish()
    }
}
