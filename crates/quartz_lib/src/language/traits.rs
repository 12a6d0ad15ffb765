//! Trait symbols. A trait is a named set of required method signatures;
//! satisfaction is checked by name at constraint sites.

use crate::source_map::Span;

use super::scopes::ScopeId;
use super::types::TypeId;

pub struct Trait {
    pub name: String,
    pub type_id: TypeId,
    /// Holds the required methods as declaration-only functions.
    pub scope: ScopeId,
    pub methods: Vec<String>,
    pub is_public: bool,
    pub span: Span,
}
