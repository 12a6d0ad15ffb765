//! The scope tree.
//!
//! One arena owns every scope; lookup consults a scope's own symbol table
//! and then walks the parent chain. The tree is the single owner of all
//! symbols, so a `Symbol` is cloned out on resolution rather than borrowed
//! across mutation of the tree.

use std::collections::HashMap;

use super::symbol::{ModuleId, Symbol};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(u32);

impl ScopeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Global,
    Function,
    Anonymous,
    Struct,
    Enum,
    Namespace,
    Module,
    Impl,
}

#[derive(Debug)]
pub struct Scope {
    pub name: String,
    pub kind: ScopeKind,
    pub parent: Option<ScopeId>,
    pub children: Vec<ScopeId>,
    pub symbols: HashMap<String, Symbol>,
    /// Back pointer set on module scopes, used for qualified-name formation.
    pub module: Option<ModuleId>,
}

#[derive(Default)]
pub struct ScopeTree {
    scopes: Vec<Scope>,
}

impl ScopeTree {
    pub fn new() -> Self {
        ScopeTree::default()
    }

    pub fn create(
        &mut self,
        name: impl Into<String>,
        kind: ScopeKind,
        parent: Option<ScopeId>,
    ) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope {
            name: name.into(),
            kind,
            parent,
            children: Vec::new(),
            symbols: HashMap::new(),
            module: None,
        });

        if let Some(parent) = parent {
            self.scopes[parent.index()].children.push(id);
        }

        id
    }

    pub fn get(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.index()]
    }

    pub fn get_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.index()]
    }

    pub fn add_symbol(&mut self, scope: ScopeId, name: impl Into<String>, symbol: Symbol) {
        self.get_mut(scope).symbols.insert(name.into(), symbol);
    }

    /// Look `name` up in `scope`, then in its ancestors.
    pub fn resolve(&self, scope: ScopeId, name: &str) -> Option<&Symbol> {
        let mut current = Some(scope);

        while let Some(id) = current {
            let scope = self.get(id);
            if let Some(symbol) = scope.symbols.get(name) {
                return Some(symbol);
            }

            current = scope.parent;
        }

        None
    }

    /// Look `name` up in `scope` only, without walking parents.
    pub fn resolve_local(&self, scope: ScopeId, name: &str) -> Option<&Symbol> {
        self.get(scope).symbols.get(name)
    }

    /// The closest enclosing scope of the given kind, including `scope`
    /// itself.
    pub fn enclosing(&self, scope: ScopeId, kind: ScopeKind) -> Option<ScopeId> {
        let mut current = Some(scope);

        while let Some(id) = current {
            if self.get(id).kind == kind {
                return Some(id);
            }

            current = self.get(id).parent;
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::symbol::{Variable, VariableFlags};
    use crate::language::type_registry::TypeRegistry;
    use crate::source_map::Span;

    fn variable(name: &str, types: &mut TypeRegistry) -> Symbol {
        Symbol::Variable(Variable {
            name: name.into(),
            index: 0,
            type_id: types.i32(),
            flags: VariableFlags::empty(),
            initializer: None,
            span: Span::default(),
        })
    }

    #[test]
    fn test_resolution_walks_parents() {
        let mut types = TypeRegistry::new(8);
        let mut tree = ScopeTree::new();

        let global = tree.create("", ScopeKind::Global, None);
        let function = tree.create("main", ScopeKind::Function, Some(global));
        let block = tree.create("", ScopeKind::Anonymous, Some(function));

        tree.add_symbol(global, "g", variable("g", &mut types));
        tree.add_symbol(function, "x", variable("x", &mut types));

        assert!(tree.resolve(block, "x").is_some());
        assert!(tree.resolve(block, "g").is_some());
        assert!(tree.resolve(global, "x").is_none());
        assert!(tree.resolve(block, "missing").is_none());
    }

    #[test]
    fn test_shadowing_prefers_innermost() {
        let mut types = TypeRegistry::new(8);
        let mut tree = ScopeTree::new();

        let global = tree.create("", ScopeKind::Global, None);
        let inner = tree.create("f", ScopeKind::Function, Some(global));

        let mut outer_var = variable("x", &mut types);
        if let Symbol::Variable(variable) = &mut outer_var {
            variable.index = 1;
        }

        tree.add_symbol(global, "x", outer_var);
        tree.add_symbol(inner, "x", variable("x", &mut types));

        let Some(Symbol::Variable(resolved)) = tree.resolve(inner, "x") else {
            panic!("expected a variable");
        };
        assert_eq!(resolved.index, 0);
    }

    #[test]
    fn test_enclosing() {
        let mut tree = ScopeTree::new();

        let global = tree.create("", ScopeKind::Global, None);
        let module = tree.create("m", ScopeKind::Module, Some(global));
        let function = tree.create("f", ScopeKind::Function, Some(module));

        assert_eq!(tree.enclosing(function, ScopeKind::Module), Some(module));
        assert_eq!(tree.enclosing(function, ScopeKind::Global), Some(global));
        assert_eq!(tree.enclosing(global, ScopeKind::Module), None);
    }
}
