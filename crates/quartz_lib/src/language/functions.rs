//! Function symbols and their IR container.
//!
//! A `Function` doubles as the semantic entity and the owner of the
//! function's bytecode shape: entry block, block list, local slot types and
//! the innermost loop targets used by `break`/`continue`.

use std::collections::HashMap;
use std::rc::Rc;

use bitflags::bitflags;

use crate::bytecode::BlockId;
use crate::parser::ast::{Expr, FunctionDecl, Linkage};
use crate::source_map::Span;

use super::scopes::ScopeId;
use super::symbol::FunctionId;
use super::type_alias::GenericTypeParameter;
use super::types::TypeId;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ParameterFlags: u8 {
        const KEYWORD  = 1 << 0;
        const MUTABLE  = 1 << 1;
        const SELF     = 1 << 2;
        const VARIADIC = 1 << 3;
    }
}

#[derive(Debug, Clone)]
pub struct FunctionParameter {
    pub name: String,
    pub type_id: TypeId,
    pub flags: ParameterFlags,
    pub index: u32,
    pub span: Span,
}

impl FunctionParameter {
    pub fn is_keyword(&self) -> bool {
        self.flags.contains(ParameterFlags::KEYWORD)
    }

    pub fn is_mutable(&self) -> bool {
        self.flags.contains(ParameterFlags::MUTABLE)
    }

    pub fn is_self(&self) -> bool {
        self.flags.contains(ParameterFlags::SELF)
    }

    pub fn is_variadic(&self) -> bool {
        self.flags.contains(ParameterFlags::VARIADIC)
    }
}

/// Jump targets for the innermost active loop.
#[derive(Debug, Clone, Copy)]
pub struct Loop {
    pub start: BlockId,
    pub end: BlockId,
}

pub struct Function {
    pub name: String,
    pub qualified_name: String,
    pub linkage: Linkage,
    /// `link(name = ...)` override, used verbatim.
    pub link_name: Option<String>,
    /// `link(section = ...)` placement.
    pub link_section: Option<String>,

    pub type_id: TypeId,
    pub parameters: Vec<FunctionParameter>,
    pub scope: ScopeId,

    pub entry_block: Option<BlockId>,
    pub blocks: Vec<BlockId>,
    pub locals: Vec<TypeId>,
    pub current_loop: Option<Loop>,

    pub is_public: bool,
    pub is_used: bool,
    /// Declaration without a body (extern or trait method).
    pub is_decl: bool,
    pub noreturn: bool,
    pub intrinsic: Option<String>,

    /// Present on generic templates: the unexpanded declaration plus the
    /// instantiation cache keyed by concrete parameter types.
    pub generics: Vec<GenericTypeParameter>,
    pub template: Option<Rc<FunctionDecl>>,
    pub specializations: HashMap<Vec<TypeId>, FunctionId>,

    pub span: Span,
}

impl Function {
    pub fn is_generic(&self) -> bool {
        !self.generics.is_empty()
    }

    pub fn allocate_local(&mut self, type_id: TypeId) -> u32 {
        self.locals.push(type_id);
        (self.locals.len() - 1) as u32
    }

    pub fn set_entry_block(&mut self, block: BlockId) {
        self.entry_block = Some(block);
        self.blocks.push(block);
    }

    pub fn insert_block(&mut self, block: BlockId) {
        self.blocks.push(block);
    }

    /// The symbol name used at the LLVM level.
    pub fn symbol_name(&self) -> &str {
        if let Some(link_name) = &self.link_name {
            return link_name;
        }

        if self.linkage == Linkage::C {
            return &self.name;
        }

        &self.qualified_name
    }

    /// Whether the template body is available for specialization.
    pub fn template_body(&self) -> Option<&[Expr]> {
        self.template
            .as_deref()
            .and_then(|decl| decl.body.as_deref())
    }
}
