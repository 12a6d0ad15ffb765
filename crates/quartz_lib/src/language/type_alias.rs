//! Type alias symbols, concrete or generic.

use std::collections::HashMap;

use crate::parser::ast::TypeExpr;
use crate::source_map::Span;

use super::types::TypeId;

#[derive(Debug, Clone)]
pub struct GenericTypeParameter {
    pub name: String,
    pub constraints: Vec<TypeId>,
    pub default_type: Option<TypeId>,
    pub span: Span,
}

impl GenericTypeParameter {
    pub fn is_optional(&self) -> bool {
        self.default_type.is_some()
    }
}

pub struct TypeAlias {
    pub name: String,
    /// Set for concrete aliases; generic aliases keep the unevaluated
    /// expression instead.
    pub underlying: Option<TypeId>,
    pub parameters: Vec<GenericTypeParameter>,
    pub expr: Option<TypeExpr>,
    /// Instantiations keyed by the argument type vector.
    pub cache: HashMap<Vec<TypeId>, TypeId>,
    pub is_public: bool,
}

impl TypeAlias {
    pub fn concrete(name: impl Into<String>, underlying: TypeId, is_public: bool) -> Self {
        TypeAlias {
            name: name.into(),
            underlying: Some(underlying),
            parameters: Vec::new(),
            expr: None,
            cache: HashMap::new(),
            is_public,
        }
    }

    pub fn generic(
        name: impl Into<String>,
        parameters: Vec<GenericTypeParameter>,
        expr: TypeExpr,
        is_public: bool,
    ) -> Self {
        TypeAlias {
            name: name.into(),
            underlying: None,
            parameters,
            expr: Some(expr),
            cache: HashMap::new(),
            is_public,
        }
    }

    pub fn is_generic(&self) -> bool {
        self.underlying.is_none()
    }

    pub fn all_parameters_have_default(&self) -> bool {
        self.parameters.iter().all(|parameter| parameter.is_optional())
    }
}

pub fn format_generic_type_name(name: &str, args: &[String]) -> String {
    format!("{name}<{}>", args.join(", "))
}
