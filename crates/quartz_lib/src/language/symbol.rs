//! Named entities stored in scopes.

use bitflags::bitflags;

use crate::source_map::Span;

use super::constants::ConstantId;
use super::types::TypeId;

macro_rules! define_arena_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

define_arena_id!(FunctionId);
define_arena_id!(StructId);
define_arena_id!(EnumId);
define_arena_id!(AliasId);
define_arena_id!(ModuleId);
define_arena_id!(TraitId);
define_arena_id!(ImplId);

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VariableFlags: u8 {
        const REFERENCE = 1 << 0;
        const MUTABLE   = 1 << 1;
        const USED      = 1 << 2;
        const MUTATED   = 1 << 3;
        const CONSTANT  = 1 << 4;
        const PUBLIC    = 1 << 5;
        const GLOBAL    = 1 << 6;
    }
}

/// A local or global slot binding. `index` addresses the current function's
/// locals, or the module global table when `GLOBAL` is set.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub index: u32,
    pub type_id: TypeId,
    pub flags: VariableFlags,
    /// Set for constants and globals so the constant evaluator can fold
    /// references to them.
    pub initializer: Option<ConstantId>,
    pub span: Span,
}

impl Variable {
    pub fn is_mutable(&self) -> bool {
        self.flags.contains(VariableFlags::MUTABLE)
    }

    pub fn is_constant(&self) -> bool {
        self.flags.contains(VariableFlags::CONSTANT)
    }

    pub fn is_global(&self) -> bool {
        self.flags.contains(VariableFlags::GLOBAL)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Symbol {
    Variable(Variable),
    Function(FunctionId),
    Struct(StructId),
    Enum(EnumId),
    TypeAlias(AliasId),
    Module(ModuleId),
    Trait(TraitId),
}

impl Symbol {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Symbol::Variable(_) => "variable",
            Symbol::Function(_) => "function",
            Symbol::Struct(_) => "struct",
            Symbol::Enum(_) => "enum",
            Symbol::TypeAlias(_) => "type alias",
            Symbol::Module(_) => "module",
            Symbol::Trait(_) => "trait",
        }
    }
}
