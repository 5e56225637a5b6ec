use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::delegation::FilterOperator;

/// What a data source can evaluate on its side.
///
/// Column sets hold logical names. `display_names` maps a display name to its logical name;
/// [`DelegationCapabilities::resolve_column`] is the single place either form is accepted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DelegationCapabilities {
    pub columns: BTreeSet<String>,
    pub sortable: BTreeSet<String>,
    pub filterable: BTreeSet<String>,
    pub filter_operators: BTreeSet<FilterOperator>,
    pub supports_top: bool,
    pub display_names: BTreeMap<String, String>,
}

impl DelegationCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn with_sortable<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for column in columns {
            let column = column.into();
            self.columns.insert(column.clone());
            self.sortable.insert(column);
        }
        self
    }

    pub fn with_filterable<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for column in columns {
            let column = column.into();
            self.columns.insert(column.clone());
            self.filterable.insert(column);
        }
        self
    }

    pub fn with_filter_operators(mut self, ops: impl IntoIterator<Item = FilterOperator>) -> Self {
        self.filter_operators.extend(ops);
        self
    }

    /// Every comparison and logical operator.
    pub fn with_all_filter_operators(self) -> Self {
        self.with_filter_operators([
            FilterOperator::Eq,
            FilterOperator::NotEq,
            FilterOperator::Lt,
            FilterOperator::LtEq,
            FilterOperator::Gt,
            FilterOperator::GtEq,
            FilterOperator::And,
            FilterOperator::Or,
            FilterOperator::Not,
        ])
    }

    pub fn with_top(mut self, supports_top: bool) -> Self {
        self.supports_top = supports_top;
        self
    }

    pub fn with_display_name(mut self, display: impl Into<String>, logical: impl Into<String>) -> Self {
        let logical = logical.into();
        self.columns.insert(logical.clone());
        self.display_names.insert(display.into(), logical);
        self
    }

    /// Logical column for `name`: an exact logical name wins over a display name.
    pub fn resolve_column<'a>(&'a self, name: &'a str) -> Option<&'a str> {
        if self.columns.contains(name) {
            return Some(name);
        }
        self.display_names.get(name).map(String::as_str)
    }

    pub fn can_sort(&self, name: &str) -> bool {
        self.resolve_column(name)
            .is_some_and(|column| self.sortable.contains(column))
    }

    pub fn can_filter(&self, name: &str) -> bool {
        self.resolve_column(name)
            .is_some_and(|column| self.filterable.contains(column))
    }

    pub fn supports_operator(&self, op: FilterOperator) -> bool {
        self.filter_operators.contains(&op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logical_name_takes_precedence_over_display_name() {
        let caps = DelegationCapabilities::new()
            .with_sortable(["name", "Title"])
            .with_display_name("Account Name", "name")
            // A display name that collides with another column's logical name.
            .with_display_name("Title", "job_title");

        assert_eq!(caps.resolve_column("Account Name"), Some("name"));
        assert_eq!(caps.resolve_column("Title"), Some("Title"));
        assert_eq!(caps.resolve_column("missing"), None);
        assert!(caps.can_sort("Account Name"));
        assert!(!caps.can_sort("job_title"));
    }
}
