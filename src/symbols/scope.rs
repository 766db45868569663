use std::collections::HashMap;

use super::Symbol;

/// Index of a scope in the symbol table's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeKind {
    Model,
    Update,
    Function(String),
    Block,
}

#[derive(Debug, Clone)]
pub struct Scope {
    parent: Option<ScopeId>,
    kind: ScopeKind,
    symbols: HashMap<String, Symbol>,
    order: Vec<String>,
}

impl Scope {
    pub fn new(parent: Option<ScopeId>, kind: ScopeKind) -> Self {
        Self {
            parent,
            kind,
            symbols: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn parent(&self) -> Option<ScopeId> {
        self.parent
    }

    pub fn kind(&self) -> &ScopeKind {
        &self.kind
    }

    pub fn get(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.symbols.contains_key(name)
    }

    /// Inserts a symbol, handing it back if the name is already taken in this scope.
    pub fn insert(&mut self, symbol: Symbol) -> Result<(), Symbol> {
        if self.symbols.contains_key(symbol.name()) {
            return Err(symbol);
        }
        self.order.push(symbol.name().to_string());
        self.symbols.insert(symbol.name().to_string(), symbol);
        Ok(())
    }

    /// Symbols in declaration order.
    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.order.iter().filter_map(|name| self.symbols.get(name))
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}
