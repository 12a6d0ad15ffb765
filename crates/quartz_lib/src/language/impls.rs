//! Impl blocks.
//!
//! A plain impl attaches a scope of methods to one concrete type. A generic
//! impl keeps its body and a pattern type containing `Empty` placeholders;
//! elaboration for a concrete target happens on demand and is memoized per
//! target type.

use std::collections::HashMap;
use std::rc::Rc;

use crate::parser::ast::Expr;

use super::scopes::ScopeId;
use super::type_registry::TypeRegistry;
use super::types::{TypeId, TypeKind};

pub struct Impl {
    /// Concrete target for plain impls.
    pub underlying: Option<TypeId>,
    pub scope: Option<ScopeId>,

    /// Pattern type and retained body for generic impls.
    pub pattern: Option<TypeId>,
    pub body: Rc<Vec<Expr>>,
    pub cache: HashMap<TypeId, ScopeId>,
}

impl Impl {
    pub fn plain(underlying: TypeId, scope: ScopeId) -> Self {
        Impl {
            underlying: Some(underlying),
            scope: Some(scope),
            pattern: None,
            body: Rc::new(Vec::new()),
            cache: HashMap::new(),
        }
    }

    pub fn generic(pattern: TypeId, body: Rc<Vec<Expr>>) -> Self {
        Impl {
            underlying: None,
            scope: None,
            pattern: Some(pattern),
            body,
            cache: HashMap::new(),
        }
    }

    pub fn is_generic(&self) -> bool {
        self.pattern.is_some()
    }
}

/// Structurally match `target` against `pattern`, binding `Empty`
/// placeholders in `bindings`. A placeholder seen twice must bind the same
/// type both times.
pub fn match_impl_type(
    types: &TypeRegistry,
    bindings: &mut HashMap<String, TypeId>,
    pattern: TypeId,
    target: TypeId,
) -> bool {
    match types.kind(pattern) {
        TypeKind::Empty { name } => {
            if let Some(&bound) = bindings.get(name) {
                return bound == target;
            }

            bindings.insert(name.clone(), target);
            true
        }
        TypeKind::Pointer {
            pointee: pattern_pointee,
            mutable: pattern_mutable,
        } => {
            let TypeKind::Pointer { pointee, mutable } = types.kind(target) else {
                return false;
            };

            pattern_mutable == mutable
                && match_impl_type(types, bindings, *pattern_pointee, *pointee)
        }
        TypeKind::Reference {
            referent: pattern_referent,
            mutable: pattern_mutable,
        } => {
            let TypeKind::Reference { referent, mutable } = types.kind(target) else {
                return false;
            };

            pattern_mutable == mutable
                && match_impl_type(types, bindings, *pattern_referent, *referent)
        }
        TypeKind::Function {
            return_type: pattern_return,
            params: pattern_params,
            ..
        } => {
            let TypeKind::Function {
                return_type,
                params,
                ..
            } = types.kind(target)
            else {
                return false;
            };

            if pattern_params.len() != params.len() {
                return false;
            }

            let params_match = pattern_params
                .iter()
                .zip(params.clone())
                .all(|(&pattern_param, param)| {
                    match_impl_type(types, bindings, pattern_param, param)
                });

            params_match && match_impl_type(types, bindings, *pattern_return, *return_type)
        }
        TypeKind::Array {
            element: pattern_element,
            size: pattern_size,
        } => {
            let TypeKind::Array { element, size } = types.kind(target) else {
                return false;
            };

            pattern_size == size && match_impl_type(types, bindings, *pattern_element, *element)
        }
        TypeKind::Tuple {
            elements: pattern_elements,
        } => {
            let TypeKind::Tuple { elements } = types.kind(target) else {
                return false;
            };

            if pattern_elements.len() != elements.len() {
                return false;
            }

            pattern_elements
                .iter()
                .zip(elements.clone())
                .all(|(&pattern_element, element)| {
                    match_impl_type(types, bindings, pattern_element, element)
                })
        }
        _ => pattern == target,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_binds_and_reoccurrence_must_agree() {
        let mut types = TypeRegistry::new(8);
        let t = types.empty("T");
        let i32 = types.i32();
        let u8 = types.u8();

        let pattern = types.tuple_of(vec![t, t]);
        let same = types.tuple_of(vec![i32, i32]);
        let mixed = types.tuple_of(vec![i32, u8]);

        let mut bindings = HashMap::new();
        assert!(match_impl_type(&types, &mut bindings, pattern, same));
        assert_eq!(bindings.get("T"), Some(&i32));

        let mut bindings = HashMap::new();
        assert!(!match_impl_type(&types, &mut bindings, pattern, mixed));
    }

    #[test]
    fn test_pointer_pattern_requires_matching_mutability() {
        let mut types = TypeRegistry::new(8);
        let t = types.empty("T");
        let i32 = types.i32();

        let pattern = types.pointer_to(t, true);
        let mutable = types.pointer_to(i32, true);
        let constant = types.pointer_to(i32, false);

        let mut bindings = HashMap::new();
        assert!(match_impl_type(&types, &mut bindings, pattern, mutable));

        let mut bindings = HashMap::new();
        assert!(!match_impl_type(&types, &mut bindings, pattern, constant));
    }

    #[test]
    fn test_function_pattern_matches_structurally() {
        let mut types = TypeRegistry::new(8);
        let t = types.empty("T");
        let i32 = types.i32();
        let void = types.void();

        let pattern = types.function(t, vec![t], false);
        let target = types.function(i32, vec![i32], false);
        let mismatched = types.function(void, vec![i32], false);

        let mut bindings = HashMap::new();
        assert!(match_impl_type(&types, &mut bindings, pattern, target));

        let mut bindings = HashMap::new();
        assert!(!match_impl_type(&types, &mut bindings, pattern, mismatched));
    }

    #[test]
    fn test_concrete_pattern_is_identity() {
        let mut types = TypeRegistry::new(8);
        let i32 = types.i32();
        let u8 = types.u8();

        let mut bindings = HashMap::new();
        assert!(match_impl_type(&types, &mut bindings, i32, i32));
        assert!(!match_impl_type(&types, &mut bindings, i32, u8));
    }
}
