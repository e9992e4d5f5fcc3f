use std::sync::Arc;

use crate::{frame::Frame, models::Instance, path::Path, value::Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Exists,
}

impl CompareOp {
    pub fn is_ordering(&self) -> bool {
        matches!(self, CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge)
    }
}

/// One predicate over an instance's slot frame.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryTerm {
    pub path: Path,
    pub op: CompareOp,
    pub value: Option<Value>,
}

impl QueryTerm {
    /// Ordering operators only match values of the same tag.
    pub fn matches(&self, slots: &Frame) -> bool {
        let slot = slots.get_path(&self.path);
        match (self.op, slot, &self.value) {
            (CompareOp::Exists, found, _) => found.is_some(),
            (_, None, _) | (_, _, None) => false,
            (op, Some(actual), Some(expected)) => {
                if actual.tag() != expected.tag() {
                    return op == CompareOp::Ne;
                }
                let ord = actual.cmp(expected);
                match op {
                    CompareOp::Eq => ord.is_eq(),
                    CompareOp::Ne => ord.is_ne(),
                    CompareOp::Lt => ord.is_lt(),
                    CompareOp::Le => ord.is_le(),
                    CompareOp::Gt => ord.is_gt(),
                    CompareOp::Ge => ord.is_ge(),
                    CompareOp::Exists => true,
                }
            }
        }
    }
}

/// Backend-independent query: instances of one id type whose slots satisfy every term.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub search_for: Arc<str>,
    pub terms: Vec<QueryTerm>,
    pub max_results: Option<usize>,
}

impl Query {
    pub fn new(search_for: &str) -> Self {
        Self {
            search_for: Arc::from(search_for),
            terms: Vec::new(),
            max_results: None,
        }
    }

    pub fn filter(mut self, path: Path, op: CompareOp, value: Value) -> Self {
        self.terms.push(QueryTerm {
            path,
            op,
            value: Some(value),
        });
        self
    }

    pub fn exists(mut self, path: Path) -> Self {
        self.terms.push(QueryTerm {
            path,
            op: CompareOp::Exists,
            value: None,
        });
        self
    }

    pub fn limit(mut self, max_results: usize) -> Self {
        self.max_results = Some(max_results);
        self
    }

    pub fn matches(&self, instance: &Instance) -> bool {
        instance.id_type == self.search_for
            && !instance.destroying
            && self.terms.iter().all(|t| t.matches(instance.slots()))
    }
}
