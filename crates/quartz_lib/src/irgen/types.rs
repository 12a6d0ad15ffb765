//! Type expression evaluation and the generic machinery.
//!
//! Named types resolve builtins first, then symbols; generic aliases are
//! instantiated through a transient scope binding each parameter to a
//! concrete alias, with the result memoized per argument vector. The same
//! binding trick drives generic impl elaboration and function
//! specialization, using `Empty` placeholder types as pattern variables.

use std::collections::HashMap;
use std::rc::Rc;

use crate::errors::{Error, Result};
use crate::language::consteval::ConstantEvaluator;
use crate::language::constants::ConstantKind;
use crate::language::impls::match_impl_type;
use crate::language::scopes::{ScopeId, ScopeKind};
use crate::language::symbol::{AliasId, FunctionId, ImplId, Symbol, TraitId};
use crate::language::type_alias::{format_generic_type_name, TypeAlias};
use crate::language::types::{TypeId, TypeKind};
use crate::language::State;
use crate::parser::ast::{Path, TypeExpr, TypeExprKind};
use crate::source_map::Span;

pub fn evaluate_type(state: &mut State, ty: &TypeExpr) -> Result<TypeId> {
    match &ty.kind {
        TypeExprKind::Pointer { pointee, mutable } => {
            let pointee = evaluate_type(state, pointee)?;
            Ok(state.types.pointer_to(pointee, *mutable))
        }
        TypeExprKind::Reference { inner, mutable } => {
            let inner = evaluate_type(state, inner)?;
            Ok(state.types.reference_to(inner, *mutable))
        }
        TypeExprKind::Array { element, size } => {
            let element = evaluate_type(state, element)?;

            let constant = ConstantEvaluator::new(state).evaluate(size)?;
            let ConstantKind::Int(length) = state.constants.get(constant).kind else {
                return Err(Error::new(size.span, "array size must be an integer constant"));
            };

            Ok(state.types.array_of(element, length as usize))
        }
        TypeExprKind::Tuple { elements } => {
            let mut evaluated = Vec::with_capacity(elements.len());
            for element in elements {
                evaluated.push(evaluate_type(state, element)?);
            }

            Ok(state.types.tuple_of(evaluated))
        }
        TypeExprKind::Function {
            params,
            return_type,
            var_arg,
        } => {
            let mut evaluated = Vec::with_capacity(params.len());
            for param in params {
                evaluated.push(evaluate_type(state, param)?);
            }

            let return_type = match return_type {
                Some(ty) => evaluate_type(state, ty)?,
                None => state.types.void(),
            };

            Ok(state.types.function(return_type, evaluated, *var_arg))
        }
        TypeExprKind::Named { path, args } => evaluate_named_type(state, ty.span, path, args),
    }
}

fn builtin_type(state: &mut State, name: &str) -> Option<TypeId> {
    let word_size = state.target.word_size();

    let type_id = match name {
        "void" => state.types.void(),
        "bool" => state.types.i1(),
        "i8" => state.types.i8(),
        "i16" => state.types.i16(),
        "i32" => state.types.i32(),
        "i64" => state.types.i64(),
        "u8" => state.types.u8(),
        "u16" => state.types.u16(),
        "u32" => state.types.u32(),
        "u64" => state.types.u64(),
        "f32" => state.types.f32(),
        "f64" => state.types.f64(),
        // `char` is the signed byte so string elements and character
        // literals agree.
        "char" => state.types.i8(),
        "cstr" => state.types.cstr(),
        "isize" => state.types.int(word_size, true),
        "usize" => state.types.int(word_size, false),
        _ => return None,
    };

    Some(type_id)
}

fn evaluate_named_type(
    state: &mut State,
    span: Span,
    path: &Path,
    args: &[TypeExpr],
) -> Result<TypeId> {
    if path.is_plain() {
        let name = &path.segments[0].name;

        if name == "Self" {
            return state
                .self_type
                .ok_or_else(|| Error::new(span, "'Self' is only available inside an impl block"));
        }

        if args.is_empty() {
            if let Some(builtin) = builtin_type(state, name) {
                return Ok(builtin);
            }
        }
    }

    let symbol = resolve_path_symbol(state, path)?;
    symbol_as_type(state, span, &path.segments.last().unwrap().name, symbol, args)
}

fn symbol_as_type(
    state: &mut State,
    span: Span,
    name: &str,
    symbol: Symbol,
    args: &[TypeExpr],
) -> Result<TypeId> {
    match symbol {
        Symbol::Struct(id) => {
            expect_no_generic_args(span, name, args)?;
            Ok(state.structure(id).type_id)
        }
        Symbol::Enum(id) => {
            expect_no_generic_args(span, name, args)?;
            Ok(state.enums[id.index()].type_id)
        }
        Symbol::Trait(id) => {
            expect_no_generic_args(span, name, args)?;
            Ok(state.traits[id.index()].type_id)
        }
        Symbol::TypeAlias(id) => {
            if state.aliases[id.index()].is_generic() {
                let mut evaluated = Vec::with_capacity(args.len());
                for arg in args {
                    evaluated.push(evaluate_type(state, arg)?);
                }

                evaluate_alias(state, id, &evaluated, span)
            } else {
                expect_no_generic_args(span, name, args)?;
                Ok(state.aliases[id.index()].underlying.unwrap())
            }
        }
        other => Err(Error::new(
            span,
            format!("{} '{name}' is not a type", other.kind_name()),
        )),
    }
}

fn expect_no_generic_args(span: Span, name: &str, args: &[TypeExpr]) -> Result<()> {
    if !args.is_empty() {
        return Err(Error::new(
            span,
            format!("'{name}' does not take generic arguments"),
        ));
    }

    Ok(())
}

/// Resolve a `::` path to the symbol it names, enforcing visibility when
/// crossing into a module.
pub fn resolve_path_symbol(state: &State, path: &Path) -> Result<Symbol> {
    let first = &path.segments[0];
    let mut symbol = state
        .resolve(&first.name)
        .cloned()
        .ok_or_else(|| Error::new(first.span, format!("undefined identifier '{}'", first.name)))?;

    for (index, segment) in path.segments.iter().enumerate().skip(1) {
        let (scope, is_module) = symbol_scope(state, &symbol).ok_or_else(|| {
            Error::new(
                path.segments[index - 1].span,
                format!("'{}' is not a namespace", path.segments[index - 1].name),
            )
        })?;

        let resolved = state
            .scopes
            .resolve_local(scope, &segment.name)
            .or_else(|| {
                // Methods of a type may live in an impl scope rather than
                // the type's own scope.
                symbol_impl_scope(state, &symbol)
                    .and_then(|scope| state.scopes.resolve_local(scope, &segment.name))
            })
            .cloned()
            .ok_or_else(|| {
                Error::new(
                    segment.span,
                    format!(
                        "'{}' has no member named '{}'",
                        path.segments[index - 1].name, segment.name
                    ),
                )
            })?;

        if is_module && !symbol_is_public(state, &resolved) {
            return Err(Error::new(
                segment.span,
                format!("'{}' is private", segment.name),
            ));
        }

        symbol = resolved;
    }

    Ok(symbol)
}

fn symbol_scope(state: &State, symbol: &Symbol) -> Option<(ScopeId, bool)> {
    match symbol {
        Symbol::Module(id) => Some((state.modules[id.index()].scope, true)),
        Symbol::Struct(id) => Some((state.structure(*id).scope, false)),
        Symbol::Enum(id) => Some((state.enums[id.index()].scope, false)),
        Symbol::Trait(id) => Some((state.traits[id.index()].scope, false)),
        _ => None,
    }
}

fn symbol_impl_scope(state: &State, symbol: &Symbol) -> Option<ScopeId> {
    let type_id = match symbol {
        Symbol::Struct(id) => state.structure(*id).type_id,
        Symbol::Enum(id) => state.enums[id.index()].type_id,
        _ => return None,
    };

    state.find_impl_scope(type_id)
}

pub fn symbol_is_public(state: &State, symbol: &Symbol) -> bool {
    match symbol {
        Symbol::Variable(variable) => variable
            .flags
            .contains(crate::language::symbol::VariableFlags::PUBLIC),
        Symbol::Function(id) => state.function(*id).is_public,
        Symbol::Struct(id) => state.structure(*id).is_public,
        Symbol::Enum(id) => state.enums[id.index()].is_public,
        Symbol::TypeAlias(id) => state.aliases[id.index()].is_public,
        Symbol::Trait(id) => state.traits[id.index()].is_public,
        Symbol::Module(_) => true,
    }
}

/// Instantiate a generic alias for the given argument types. Results are
/// memoized per argument vector, so repeated uses share one type.
pub fn evaluate_alias(
    state: &mut State,
    alias: AliasId,
    args: &[TypeId],
    span: Span,
) -> Result<TypeId> {
    let parameters = state.aliases[alias.index()].parameters.clone();

    let args: Vec<TypeId> = if args.is_empty() && !parameters.is_empty() {
        if !state.aliases[alias.index()].all_parameters_have_default() {
            return Err(Error::new(
                span,
                format!(
                    "'{}' expects {} generic argument(s)",
                    state.aliases[alias.index()].name,
                    parameters.len()
                ),
            ));
        }

        parameters
            .iter()
            .map(|parameter| parameter.default_type.unwrap())
            .collect()
    } else {
        args.to_vec()
    };

    if args.len() != parameters.len() {
        return Err(Error::new(
            span,
            format!(
                "'{}' expects {} generic argument(s) but {} were provided",
                state.aliases[alias.index()].name,
                parameters.len(),
                args.len()
            ),
        ));
    }

    if let Some(&cached) = state.aliases[alias.index()].cache.get(&args) {
        return Ok(cached);
    }

    check_constraints(state, span, &parameters, &args)?;

    // Evaluate the stored expression under a transient scope that binds
    // each parameter name to its concrete argument.
    let scope = state
        .scopes
        .create("", ScopeKind::Anonymous, Some(state.global_scope));
    for (parameter, &arg) in parameters.iter().zip(args.iter()) {
        bind_type_parameter(state, scope, &parameter.name, arg);
    }

    let expr = state.aliases[alias.index()].expr.clone().unwrap();

    let previous = state.scope();
    state.set_current_scope(scope);
    let result = evaluate_type(state, &expr);
    state.set_current_scope(previous);

    let type_id = result?;
    state.aliases[alias.index()].cache.insert(args, type_id);

    Ok(type_id)
}

fn bind_type_parameter(state: &mut State, scope: ScopeId, name: &str, type_id: TypeId) {
    let alias = state.add_alias(TypeAlias::concrete(name, type_id, false));
    state.scopes.add_symbol(scope, name, Symbol::TypeAlias(alias));
}

fn check_constraints(
    state: &mut State,
    span: Span,
    parameters: &[crate::language::type_alias::GenericTypeParameter],
    args: &[TypeId],
) -> Result<()> {
    for (parameter, &arg) in parameters.iter().zip(args.iter()) {
        for &constraint in &parameter.constraints {
            let Some(trait_id) = trait_for_type(state, constraint) else {
                continue;
            };

            if !state.type_implements(arg, trait_id) {
                return Err(Error::new(
                    span,
                    format!(
                        "type '{}' does not satisfy trait '{}'",
                        state.types.str(arg),
                        state.types.str(constraint)
                    ),
                ));
            }
        }
    }

    Ok(())
}

fn trait_for_type(state: &State, type_id: TypeId) -> Option<TraitId> {
    state
        .traits
        .iter()
        .position(|trait_| trait_.type_id == type_id)
        .map(|index| TraitId(index as u32))
}

/// Elaborate a generic impl for a concrete target type. The body is
/// generated once per target under a fresh impl scope seeded with the
/// pattern bindings and `self = target`; the scope is memoized.
pub fn elaborate_impl(
    state: &mut State,
    impl_id: ImplId,
    target: TypeId,
    bindings: HashMap<String, TypeId>,
) -> Result<ScopeId> {
    if let Some(&scope) = state.impls[impl_id.index()].cache.get(&target) {
        return Ok(scope);
    }

    let name = format!("<{}>", state.types.str(target));
    let scope = state
        .scopes
        .create(name, ScopeKind::Impl, Some(state.global_scope));

    for (name, type_id) in bindings {
        bind_type_parameter(state, scope, &name, type_id);
    }

    let body = Rc::clone(&state.impls[impl_id.index()].body);

    let previous_scope = state.scope();
    let previous_self = state.self_type;
    let previous_block = state.generator.current_block();

    state.set_current_scope(scope);
    state.self_type = Some(target);
    state.switch_to(None);

    let result = super::stmt::generate_impl_body(state, &body);

    state.set_current_scope(previous_scope);
    state.self_type = previous_self;
    state.switch_to(previous_block);

    result?;
    state.impls[impl_id.index()].cache.insert(target, scope);

    Ok(scope)
}

/// The method scope for `type_id`, elaborating a matching generic impl on
/// first use.
pub fn method_scope_for(state: &mut State, type_id: TypeId) -> Result<Option<ScopeId>> {
    if let Some(scope) = state.find_impl_scope(type_id) {
        return Ok(Some(scope));
    }

    if let Some((impl_id, bindings)) = state.matching_generic_impl(type_id) {
        return Ok(Some(elaborate_impl(state, impl_id, type_id, bindings)?));
    }

    Ok(None)
}

/// Specialize a generic function for the given call argument types.
/// Parameter type expressions are evaluated with the generic names bound
/// to `Empty` placeholders and structurally matched against the argument
/// types; the clone is lowered once and cached by its parameter vector.
pub fn specialize_function(
    state: &mut State,
    template: FunctionId,
    arg_types: &[TypeId],
    span: Span,
) -> Result<FunctionId> {
    let decl = Rc::clone(
        state
            .function(template)
            .template
            .as_ref()
            .expect("specialize_function called on a non-template"),
    );
    let generics = state.function(template).generics.clone();
    let template_scope = state.function(template).scope;

    let positional: Vec<_> = decl
        .params
        .iter()
        .filter(|param| !param.is_self && !param.is_variadic)
        .cloned()
        .collect();

    if positional.len() != arg_types.len() {
        return Err(Error::new(
            span,
            format!(
                "'{}' expects {} argument(s) but {} were provided",
                decl.name.name,
                positional.len(),
                arg_types.len()
            ),
        ));
    }

    // Evaluate the declared parameter types with every generic name bound
    // to a placeholder, then bind placeholders by matching against the
    // actual argument types.
    let pattern_scope = state
        .scopes
        .create("", ScopeKind::Anonymous, Some(template_scope));
    for parameter in &generics {
        let placeholder = state.types.empty(&parameter.name);
        bind_type_parameter(state, pattern_scope, &parameter.name, placeholder);
    }

    let previous = state.scope();
    state.set_current_scope(pattern_scope);

    let mut patterns = Vec::with_capacity(positional.len());
    for param in &positional {
        let ty = param.ty.as_ref().unwrap();
        match evaluate_type(state, ty) {
            Ok(pattern) => patterns.push(pattern),
            Err(error) => {
                state.set_current_scope(previous);
                return Err(error);
            }
        }
    }
    state.set_current_scope(previous);

    let mut bindings: HashMap<String, TypeId> = HashMap::new();
    for (&pattern, &arg) in patterns.iter().zip(arg_types.iter()) {
        if !match_impl_type(&state.types, &mut bindings, pattern, arg) {
            return Err(Error::new(
                span,
                format!(
                    "argument type '{}' does not match parameter pattern '{}'",
                    state.types.str(arg),
                    state.types.str(pattern)
                ),
            ));
        }
    }

    let mut bound = Vec::with_capacity(generics.len());
    for parameter in &generics {
        let Some(&type_id) = bindings.get(&parameter.name) else {
            return Err(Error::new(
                span,
                format!(
                    "could not infer generic parameter '{}' of '{}'",
                    parameter.name, decl.name.name
                ),
            ));
        };

        bound.push(type_id);
    }

    check_constraints(state, span, &generics, &bound)?;

    if let Some(&existing) = state.function(template).specializations.get(arg_types) {
        return Ok(existing);
    }

    let argument_names: Vec<String> = bound.iter().map(|&arg| state.types.str(arg)).collect();
    let name = format_generic_type_name(&decl.name.name, &argument_names);

    log::debug!("specializing '{}'", name);

    let specialized =
        super::stmt::instantiate_template(state, &decl, &generics, &bound, &name, template_scope)?;

    state
        .function_mut(template)
        .specializations
        .insert(arg_types.to_vec(), specialized);

    Ok(specialized)
}
