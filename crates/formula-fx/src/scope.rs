//! Row-scope symbols.
//!
//! The binder creates one [`ScopeSymbol`] per lambda-taking call (`Filter`, `Sum`, `With`, a user
//! function's parameter list, ...) and records every field name the lambda body reads. IR nodes
//! refer to those fields by `(scope, index)` pairs ([`ScopeAccessSymbol`]), so the evaluator never
//! has to hash field names while walking a row.
//!
//! Scopes live in a [`ScopeSymbolTable`] arena owned by whoever produced the IR. Access symbols
//! are plain indices into that arena; they are only meaningful together with the table that
//! created them.
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeId(u32);

impl ScopeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScopeSymbol {
    id: ScopeId,
    accessed_fields: Vec<String>,
    field_index: HashMap<String, usize>,
}

impl ScopeSymbol {
    fn new(id: ScopeId) -> Self {
        Self {
            id,
            accessed_fields: Vec::new(),
            field_index: HashMap::new(),
        }
    }

    pub fn id(&self) -> ScopeId {
        self.id
    }

    /// Field names in order of first access.
    pub fn accessed_fields(&self) -> &[String] {
        &self.accessed_fields
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.field_index.get(name).copied()
    }

    /// Return the index already assigned to `name`, or append it and return the new index.
    pub fn add_or_get_index_for_field(&mut self, name: &str) -> usize {
        if let Some(idx) = self.field_index.get(name) {
            return *idx;
        }
        let idx = self.accessed_fields.len();
        self.accessed_fields.push(name.to_string());
        self.field_index.insert(name.to_string(), idx);
        idx
    }
}

/// `(parent scope, field index)` reference to one accessed field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeAccessSymbol {
    pub parent: ScopeId,
    pub index: usize,
}

impl ScopeAccessSymbol {
    /// Resolve the field name through the table that issued this symbol.
    pub fn name<'t>(&self, table: &'t ScopeSymbolTable) -> Option<&'t str> {
        table
            .get(self.parent)?
            .accessed_fields
            .get(self.index)
            .map(String::as_str)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScopeSymbolTable {
    scopes: Vec<ScopeSymbol>,
}

impl ScopeSymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_scope(&mut self) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(ScopeSymbol::new(id));
        id
    }

    pub fn get(&self, id: ScopeId) -> Option<&ScopeSymbol> {
        self.scopes.get(id.index())
    }

    pub fn get_mut(&mut self, id: ScopeId) -> Option<&mut ScopeSymbol> {
        self.scopes.get_mut(id.index())
    }

    /// Register a field read in `scope` and hand back the symbol the IR should carry.
    ///
    /// Returns `None` only when `scope` was not created by this table.
    pub fn access(&mut self, scope: ScopeId, field: &str) -> Option<ScopeAccessSymbol> {
        let index = self.get_mut(scope)?.add_or_get_index_for_field(field);
        Some(ScopeAccessSymbol {
            parent: scope,
            index,
        })
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScopeSymbol> {
        self.scopes.iter()
    }
}
