//! Compilation state.
//!
//! `State` is the single mutable owner of every subsystem: the type
//! registry, the constant pool, the scope tree, the entity arenas and the
//! bytecode generator. Generation threads `&mut State` through the AST
//! walk; all cross references between entities are arena handles, which
//! stay valid for the whole compilation.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::bytecode::{BlockId, Generator, Instruction, Operand, Register};
use crate::compiler::MangleStyle;
use crate::errors::{Error, Result};
use crate::source_map::{SourceMap, Span};
use crate::target::Target;

use super::constants::{ConstantId, ConstantPool};
use super::enums::Enum;
use super::functions::Function;
use super::impls::{match_impl_type, Impl};
use super::modules::Module;
use super::scopes::{ScopeId, ScopeKind, ScopeTree};
use super::structs::Struct;
use super::symbol::{
    AliasId, EnumId, FunctionId, ImplId, ModuleId, StructId, Symbol, TraitId, Variable,
};
use super::traits::Trait;
use super::type_alias::TypeAlias;
use super::type_registry::TypeRegistry;
use super::types::{TypeId, TypeKind};

/// A module-level slot, always initialized with a compile-time constant.
pub struct GlobalSlot {
    pub name: String,
    pub type_id: TypeId,
    pub initializer: Option<ConstantId>,
    pub is_mutable: bool,
}

pub struct State {
    pub sources: SourceMap,
    pub types: TypeRegistry,
    pub constants: ConstantPool,
    pub scopes: ScopeTree,
    pub generator: Generator,

    pub functions: Vec<Function>,
    pub structs: Vec<Struct>,
    pub enums: Vec<Enum>,
    pub modules: Vec<Module>,
    pub aliases: Vec<TypeAlias>,
    pub traits: Vec<Trait>,
    pub impls: Vec<Impl>,

    pub globals: Vec<GlobalSlot>,

    /// Types of every allocated register; a register is monomorphic for
    /// its whole lifetime.
    register_types: Vec<Option<TypeId>>,

    pub global_scope: ScopeId,
    current_scope: ScopeId,
    pub current_function: Option<FunctionId>,
    pub current_struct: Option<StructId>,
    pub current_module: Option<ModuleId>,

    pub self_type: Option<TypeId>,
    pub self_operand: Option<Operand>,

    pub target: Target,
    pub import_paths: Vec<PathBuf>,
    pub library_path: Option<PathBuf>,
    /// Directory of the primary input file, for relative imports while no
    /// module is active.
    pub root_dir: Option<PathBuf>,
    pub entry_name: String,
    pub mangle_style: MangleStyle,
    /// Modules already loaded, keyed by canonical file path.
    pub loaded_modules: HashMap<PathBuf, ModuleId>,
}

impl State {
    pub fn new(target: Target) -> Self {
        let word_size = target.pointer_size();
        let mut scopes = ScopeTree::new();
        let global_scope = scopes.create("", ScopeKind::Global, None);

        State {
            sources: SourceMap::new(),
            types: TypeRegistry::new(word_size),
            constants: ConstantPool::new(),
            scopes,
            generator: Generator::new(),
            functions: Vec::new(),
            structs: Vec::new(),
            enums: Vec::new(),
            modules: Vec::new(),
            aliases: Vec::new(),
            traits: Vec::new(),
            impls: Vec::new(),
            globals: Vec::new(),
            register_types: Vec::new(),
            global_scope,
            current_scope: global_scope,
            current_function: None,
            current_struct: None,
            current_module: None,
            self_type: None,
            self_operand: None,
            target,
            import_paths: Vec::new(),
            library_path: None,
            root_dir: None,
            entry_name: "main".into(),
            mangle_style: MangleStyle::Minimal,
            loaded_modules: HashMap::new(),
        }
    }

    /// The directory relative imports resolve against.
    pub fn current_directory(&self) -> Option<PathBuf> {
        if let Some(module) = self.current_module {
            return self.modules[module.index()]
                .path
                .parent()
                .map(|parent| parent.to_path_buf());
        }

        self.root_dir.clone()
    }

    /// The symbol name a function declared in `scope` gets at the LLVM
    /// level, before `link(name = ...)` or C linkage overrides.
    pub fn mangled_name(&self, scope: ScopeId, name: &str) -> String {
        match self.mangle_style {
            MangleStyle::None => name.to_string(),
            MangleStyle::Minimal | MangleStyle::Full => self.qualified_name(scope, name),
        }
    }

    // ------------------------------------------------------------------
    // Scope cursor
    // ------------------------------------------------------------------

    pub fn scope(&self) -> ScopeId {
        self.current_scope
    }

    pub fn set_current_scope(&mut self, scope: ScopeId) {
        self.current_scope = scope;
    }

    pub fn resolve(&self, name: &str) -> Option<&Symbol> {
        self.scopes.resolve(self.current_scope, name)
    }

    pub fn add_symbol(&mut self, name: impl Into<String>, symbol: Symbol) {
        self.scopes.add_symbol(self.current_scope, name, symbol);
    }

    /// Form the `::`-qualified name for a symbol declared in `scope`.
    /// Walking upward, struct, enum, namespace and impl scopes contribute
    /// their names; crossing into a module scope appends that module's own
    /// qualified name once and stops.
    pub fn qualified_name(&self, scope: ScopeId, name: &str) -> String {
        let mut parts = vec![name.to_string()];
        let mut current = Some(scope);

        while let Some(id) = current {
            let scope = self.scopes.get(id);
            match scope.kind {
                ScopeKind::Module => {
                    if let Some(module) = scope.module {
                        let qualified = &self.modules[module.index()].qualified_name;
                        if !qualified.is_empty() {
                            parts.push(qualified.clone());
                        }
                    }
                    break;
                }
                ScopeKind::Struct | ScopeKind::Enum | ScopeKind::Namespace | ScopeKind::Impl => {
                    if !scope.name.is_empty() {
                        parts.push(scope.name.clone());
                    }
                }
                _ => {}
            }

            current = scope.parent;
        }

        parts.reverse();
        parts.join("::")
    }

    // ------------------------------------------------------------------
    // Entity arenas
    // ------------------------------------------------------------------

    pub fn add_function(&mut self, function: Function) -> FunctionId {
        self.functions.push(function);
        FunctionId(self.functions.len() as u32 - 1)
    }

    pub fn function(&self, id: FunctionId) -> &Function {
        &self.functions[id.index()]
    }

    pub fn function_mut(&mut self, id: FunctionId) -> &mut Function {
        &mut self.functions[id.index()]
    }

    pub fn add_struct(&mut self, structure: Struct) -> StructId {
        self.structs.push(structure);
        StructId(self.structs.len() as u32 - 1)
    }

    pub fn structure(&self, id: StructId) -> &Struct {
        &self.structs[id.index()]
    }

    pub fn add_enum(&mut self, enumeration: Enum) -> EnumId {
        self.enums.push(enumeration);
        EnumId(self.enums.len() as u32 - 1)
    }

    pub fn add_module(&mut self, module: Module) -> ModuleId {
        self.modules.push(module);
        ModuleId(self.modules.len() as u32 - 1)
    }

    pub fn add_alias(&mut self, alias: TypeAlias) -> AliasId {
        self.aliases.push(alias);
        AliasId(self.aliases.len() as u32 - 1)
    }

    pub fn add_trait(&mut self, trait_: Trait) -> TraitId {
        self.traits.push(trait_);
        TraitId(self.traits.len() as u32 - 1)
    }

    pub fn add_impl(&mut self, impl_: Impl) -> ImplId {
        self.impls.push(impl_);
        ImplId(self.impls.len() as u32 - 1)
    }

    /// Whether this function is the program entry point.
    pub fn is_entry_function(&self, id: FunctionId) -> bool {
        self.function(id).name == self.entry_name
    }

    /// Find the struct entity backing a struct type.
    pub fn struct_for_type(&self, type_id: TypeId) -> Option<StructId> {
        self.structs
            .iter()
            .position(|structure| structure.type_id == type_id)
            .map(|index| StructId(index as u32))
    }

    // ------------------------------------------------------------------
    // Bytecode plumbing
    // ------------------------------------------------------------------

    pub fn create_block(&mut self, name: impl Into<String>) -> BlockId {
        self.generator.create_block(name)
    }

    /// Create a block and append it to the current function's block list.
    pub fn append_block(&mut self, name: impl Into<String>) -> BlockId {
        let block = self.generator.create_block(name);
        if let Some(function) = self.current_function {
            self.function_mut(function).insert_block(block);
        }

        block
    }

    pub fn switch_to(&mut self, block: Option<BlockId>) {
        self.generator.switch_to(block);
    }

    pub fn emit(&mut self, instruction: Instruction) {
        self.generator.emit(instruction);
    }

    pub fn allocate_register(&mut self) -> Register {
        self.generator.allocate_register()
    }

    /// Record the type of a register. Rebinding a register at a different
    /// type is an internal compiler error.
    pub fn set_register_type(&mut self, register: Register, type_id: TypeId) {
        if self.register_types.len() <= register.index() {
            self.register_types.resize(register.index() + 1, None);
        }

        let slot = &mut self.register_types[register.index()];
        match slot {
            Some(existing) if *existing != type_id => panic!(
                "register r{} rebound from {} to {}",
                register.0,
                self.types.str(*existing),
                self.types.str(type_id)
            ),
            _ => *slot = Some(type_id),
        }
    }

    pub fn register_type(&self, register: Register) -> TypeId {
        self.register_types
            .get(register.index())
            .copied()
            .flatten()
            .unwrap_or_else(|| panic!("register r{} has no recorded type", register.0))
    }

    pub fn operand_type(&self, operand: Operand) -> TypeId {
        match operand {
            Operand::Register(register) => self.register_type(register),
            Operand::Immediate { type_id, .. } => type_id,
            Operand::None => panic!("operand has no type"),
        }
    }

    /// Allocate a typed register in one step.
    pub fn typed_register(&mut self, type_id: TypeId) -> Register {
        let register = self.allocate_register();
        self.set_register_type(register, type_id);
        register
    }

    pub fn allocate_global(
        &mut self,
        name: impl Into<String>,
        type_id: TypeId,
        initializer: Option<ConstantId>,
        is_mutable: bool,
    ) -> u32 {
        self.globals.push(GlobalSlot {
            name: name.into(),
            type_id,
            initializer,
            is_mutable,
        });

        (self.globals.len() - 1) as u32
    }

    // ------------------------------------------------------------------
    // Type checking helpers
    // ------------------------------------------------------------------

    /// Check that `operand` is usable where `expected` is required,
    /// inserting a widening cast when the types differ but coerce safely.
    pub fn type_check_and_cast(
        &mut self,
        span: Span,
        operand: Operand,
        expected: TypeId,
        context: &str,
    ) -> Result<Operand> {
        let actual = self.operand_type(operand);
        if actual == expected {
            return Ok(operand);
        }

        if !self.types.can_safely_cast(actual, expected) {
            return Err(Error::new(
                span,
                format!(
                    "{context}: expected '{}' but found '{}'",
                    self.types.str(expected),
                    self.types.str(actual)
                ),
            ));
        }

        let dst = self.typed_register(expected);
        self.emit(Instruction::Cast {
            dst,
            src: operand,
            type_id: expected,
        });

        Ok(Operand::Register(dst))
    }

    // ------------------------------------------------------------------
    // Impl resolution
    // ------------------------------------------------------------------

    /// The scope of methods attached to `type_id`, if any impl applies.
    /// Generic impls are elaborated on demand; the returned scope is
    /// memoized per concrete type.
    pub fn find_impl_scope(&self, type_id: TypeId) -> Option<ScopeId> {
        for impl_ in &self.impls {
            if impl_.underlying == Some(type_id) {
                return impl_.scope;
            }

            if let Some(scope) = impl_.cache.get(&type_id) {
                return Some(*scope);
            }
        }

        None
    }

    /// Generic impls whose pattern structurally matches `type_id` but that
    /// have not been elaborated for it yet.
    pub fn matching_generic_impl(&self, type_id: TypeId) -> Option<(ImplId, HashMap<String, TypeId>)> {
        for (index, impl_) in self.impls.iter().enumerate() {
            let Some(pattern) = impl_.pattern else {
                continue;
            };
            if impl_.cache.contains_key(&type_id) {
                continue;
            }

            let mut bindings = HashMap::new();
            if match_impl_type(&self.types, &mut bindings, pattern, type_id) {
                return Some((ImplId(index as u32), bindings));
            }
        }

        None
    }

    /// Whether `type_id` provides every method `trait_id` requires, either
    /// through its struct scope or an impl scope.
    pub fn type_implements(&self, type_id: TypeId, trait_id: TraitId) -> bool {
        let trait_ = &self.traits[trait_id.index()];

        let mut scopes = Vec::new();
        if let Some(structure) = self.struct_for_type(type_id) {
            scopes.push(self.structure(structure).scope);
        }
        if let Some(scope) = self.find_impl_scope(type_id) {
            scopes.push(scope);
        }

        trait_.methods.iter().all(|method| {
            scopes
                .iter()
                .any(|&scope| self.scopes.resolve_local(scope, method).is_some())
        })
    }

    // ------------------------------------------------------------------
    // Warnings
    // ------------------------------------------------------------------

    pub fn warn_unused(&self, scope: ScopeId) {
        let scope = self.scopes.get(scope);

        for symbol in scope.symbols.values() {
            if let Symbol::Variable(variable) = symbol {
                if !variable.flags.contains(super::symbol::VariableFlags::USED)
                    && !variable.name.starts_with('_')
                {
                    log::warn!(
                        "{}",
                        self.sources.format_warning(
                            variable.span,
                            &format!("unused variable '{}'", variable.name),
                        )
                    );
                }
            }
        }
    }

    pub fn variable_mut(&mut self, scope: ScopeId, name: &str) -> Option<&mut Variable> {
        match self.scopes.get_mut(scope).symbols.get_mut(name) {
            Some(Symbol::Variable(variable)) => Some(variable),
            _ => None,
        }
    }
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State")
            .field("functions", &self.functions.len())
            .field("structs", &self.structs.len())
            .field("modules", &self.modules.len())
            .field("globals", &self.globals.len())
            .field("registers", &self.generator.register_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> State {
        State::new(Target::new("x86_64-unknown-linux-gnu"))
    }

    #[test]
    fn test_register_types_are_monomorphic() {
        let mut state = state();
        let i32 = state.types.i32();

        let register = state.typed_register(i32);
        // Re-recording the same type is fine.
        state.set_register_type(register, i32);
        assert_eq!(state.register_type(register), i32);
    }

    #[test]
    #[should_panic(expected = "rebound")]
    fn test_conflicting_register_type_panics() {
        let mut state = state();
        let i32 = state.types.i32();
        let f64 = state.types.f64();

        let register = state.typed_register(i32);
        state.set_register_type(register, f64);
    }

    #[test]
    fn test_qualified_names_cross_scopes() {
        let mut state = state();

        let outer = state
            .scopes
            .create("Vec", ScopeKind::Struct, Some(state.global_scope));
        assert_eq!(state.qualified_name(outer, "push"), "Vec::push");

        let plain = state
            .scopes
            .create("f", ScopeKind::Function, Some(state.global_scope));
        assert_eq!(state.qualified_name(plain, "local"), "local");
    }

    #[test]
    fn test_type_check_and_cast_inserts_widening_cast() {
        let mut state = state();
        let i8 = state.types.i8();
        let i32 = state.types.i32();

        let entry = state.create_block("entry");
        state.switch_to(Some(entry));

        let operand = Operand::Immediate {
            value: 5,
            type_id: i8,
        };
        let widened = state
            .type_check_and_cast(Span::default(), operand, i32, "argument")
            .unwrap();

        assert!(matches!(widened, Operand::Register(_)));
        assert_eq!(state.operand_type(widened), i32);
        assert!(matches!(
            state.generator.block(entry).instructions[0],
            Instruction::Cast { .. }
        ));
    }

    #[test]
    fn test_type_check_rejects_narrowing() {
        let mut state = state();
        let i8 = state.types.i8();
        let i32 = state.types.i32();

        let operand = Operand::Immediate {
            value: 5,
            type_id: i32,
        };
        let error = state
            .type_check_and_cast(Span::default(), operand, i8, "argument")
            .unwrap_err();

        assert!(error.message().contains("expected 'i8'"));
    }
}
