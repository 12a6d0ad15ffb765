//! Enum symbols. Variants are stored in the enum's scope as constant
//! variables typed with the enum itself.

use crate::source_map::Span;

use super::scopes::ScopeId;
use super::types::TypeId;

pub struct Enum {
    pub name: String,
    pub qualified_name: String,
    pub type_id: TypeId,
    pub inner: TypeId,
    pub scope: ScopeId,
    pub is_public: bool,
    pub span: Span,
}
