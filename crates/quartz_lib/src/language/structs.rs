//! Struct symbols.

use bitflags::bitflags;

use crate::source_map::Span;

use super::scopes::ScopeId;
use super::types::TypeId;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FieldFlags: u8 {
        const PRIVATE  = 1 << 0;
        const READONLY = 1 << 1;
        const MUTABLE  = 1 << 2;
    }
}

#[derive(Debug, Clone)]
pub struct StructField {
    pub name: String,
    pub index: u32,
    pub type_id: TypeId,
    pub flags: FieldFlags,
}

impl StructField {
    pub fn is_private(&self) -> bool {
        self.flags.contains(FieldFlags::PRIVATE)
    }

    pub fn is_readonly(&self) -> bool {
        self.flags.contains(FieldFlags::READONLY)
    }
}

pub struct Struct {
    pub name: String,
    pub qualified_name: String,
    pub type_id: TypeId,
    pub fields: Vec<StructField>,
    /// Methods live here as `Function` symbols.
    pub scope: ScopeId,
    pub opaque: bool,
    pub packed: bool,
    pub is_public: bool,
    pub span: Span,
}

impl Struct {
    pub fn find_field(&self, name: &str) -> Option<&StructField> {
        self.fields.iter().find(|field| field.name == name)
    }
}
