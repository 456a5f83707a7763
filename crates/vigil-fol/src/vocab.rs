//! Vocabulary declarations: sorts and symbols.

use serde::{Deserialize, Serialize};

use crate::syntax::{Formula, SortedVar};

/// An uninterpreted domain. A model assigns it a finite universe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortDecl {
    pub name: String,
}

/// Definition attached to a derived relation: the interpretation of the
/// relation is fixed by `forall binders. rel(binders) <-> body` rather than
/// chosen freely by a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedDef {
    pub binders: Vec<SortedVar>,
    pub body: Formula,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDecl {
    pub name: String,
    pub arity: Vec<String>,
    /// Mutable symbols get one interpretation per epoch key; immutable ones
    /// are shared across all epoch keys of a query.
    pub mutable: bool,
    pub derived: Option<DerivedDef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstantDecl {
    pub name: String,
    pub sort: String,
    pub mutable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: String,
    pub domain: Vec<String>,
    pub range: String,
    pub mutable: bool,
}

/// What kind of symbol a name resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Relation,
    Constant,
    Function,
}

/// The declared vocabulary of a program. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vocabulary {
    pub sorts: Vec<SortDecl>,
    pub relations: Vec<RelationDecl>,
    pub constants: Vec<ConstantDecl>,
    pub functions: Vec<FunctionDecl>,
}

impl Vocabulary {
    pub fn sort(&self, name: &str) -> Option<&SortDecl> {
        self.sorts.iter().find(|s| s.name == name)
    }

    pub fn relation(&self, name: &str) -> Option<&RelationDecl> {
        self.relations.iter().find(|r| r.name == name)
    }

    pub fn constant(&self, name: &str) -> Option<&ConstantDecl> {
        self.constants.iter().find(|c| c.name == name)
    }

    pub fn function(&self, name: &str) -> Option<&FunctionDecl> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn symbol_kind(&self, name: &str) -> Option<SymbolKind> {
        if self.relation(name).is_some() {
            Some(SymbolKind::Relation)
        } else if self.constant(name).is_some() {
            Some(SymbolKind::Constant)
        } else if self.function(name).is_some() {
            Some(SymbolKind::Function)
        } else {
            None
        }
    }

    /// Whether `name` is a declared mutable symbol (of any kind).
    pub fn is_mutable(&self, name: &str) -> bool {
        self.relation(name).map(|r| r.mutable).unwrap_or(false)
            || self.constant(name).map(|c| c.mutable).unwrap_or(false)
            || self.function(name).map(|f| f.mutable).unwrap_or(false)
    }

    /// Names of all mutable symbols, in declaration order.
    pub fn mutable_symbols(&self) -> Vec<&str> {
        let mut out = Vec::new();
        out.extend(
            self.relations
                .iter()
                .filter(|r| r.mutable)
                .map(|r| r.name.as_str()),
        );
        out.extend(
            self.constants
                .iter()
                .filter(|c| c.mutable)
                .map(|c| c.name.as_str()),
        );
        out.extend(
            self.functions
                .iter()
                .filter(|f| f.mutable)
                .map(|f| f.name.as_str()),
        );
        out
    }
}
