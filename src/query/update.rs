use super::Filter;
use crate::core::Value;

/// Immutable description of an update issued against one master engine.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpdateQuery {
    pub table: String,
    pub assignments: Vec<(String, Value)>,
    pub filter: Option<Filter>,
}

impl UpdateQuery {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.assignments.push((column.into(), value.into()));
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(filter),
            None => filter,
        });
        self
    }
}
