//! Declaration and statement generation.
//!
//! A program is generated in three stages: every declaration is registered
//! first (struct names, then traits, enums and aliases, then struct field
//! completion and function signatures), module-level statements run second,
//! and function bodies are lowered last so they can forward-reference
//! anything declared in the file.

use std::rc::Rc;

use crate::bytecode::Instruction;
use crate::errors::{Error, Result};
use crate::language::consteval::ConstantEvaluator;
use crate::language::constants::ConstantKind;
use crate::language::enums::Enum;
use crate::language::functions::{Function, FunctionParameter, ParameterFlags};
use crate::language::impls::Impl;
use crate::language::modules::{search_import_paths, Module, ModuleState};
use crate::language::scopes::{ScopeId, ScopeKind};
use crate::language::structs::{FieldFlags, Struct, StructField};
use crate::language::symbol::{
    FunctionId, StructId, Symbol, Variable, VariableFlags,
};
use crate::language::traits::Trait;
use crate::language::type_alias::{GenericTypeParameter, TypeAlias};
use crate::language::types::TypeId;
use crate::language::State;
use crate::parser::ast::{
    Attribute, AttributeKind, Expr, ExprKind, FunctionDecl, LetTarget, Linkage, StructFieldDecl,
    TuplePatternItem,
};
use crate::parser::Parser;
use crate::lexer::Lexer;
use crate::source_map::Span;

use super::expr::generate_expr;
use super::types::evaluate_type;

/// Run the full three-stage generation for one file's worth of top-level
/// expressions, in the current scope.
pub fn generate_program(state: &mut State, exprs: &[Expr]) -> Result<()> {
    let functions = register_declarations(state, exprs)?;

    for expr in exprs {
        match &expr.kind {
            ExprKind::Function(_)
            | ExprKind::StructDecl { .. }
            | ExprKind::EnumDecl { .. }
            | ExprKind::TypeAliasDecl { .. }
            | ExprKind::TraitDecl { .. }
            | ExprKind::Block(_) => {}
            ExprKind::Let { .. }
            | ExprKind::Import { .. }
            | ExprKind::ModuleDecl { .. }
            | ExprKind::Impl { .. }
            | ExprKind::StaticAssert { .. } => {
                generate_expr(state, expr, None)?;
            }
            _ => {
                return Err(Error::new(
                    expr.span,
                    "expected a declaration at module scope",
                ));
            }
        }
    }

    for (function, decl) in functions {
        if let Some(body) = &decl.body {
            define_function(state, function, body)?;
        }
    }

    Ok(())
}

/// Stages one through three of declaration registration. Returns the
/// registered functions in declaration order, paired with their AST.
fn register_declarations<'a>(
    state: &mut State,
    exprs: &'a [Expr],
) -> Result<Vec<(FunctionId, &'a FunctionDecl)>> {
    let mut structs: Vec<(StructId, &[StructFieldDecl])> = Vec::new();

    for expr in exprs {
        if let ExprKind::StructDecl {
            name,
            fields,
            attrs,
            is_public,
        } = &expr.kind
        {
            let id = declare_struct(state, &name.name, attrs, *is_public, expr.span)?;
            structs.push((id, fields.as_slice()));
        }
    }

    for expr in exprs {
        match &expr.kind {
            ExprKind::TraitDecl {
                name,
                methods,
                is_public,
            } => declare_trait(state, &name.name, methods, *is_public, expr.span)?,
            ExprKind::EnumDecl {
                name,
                underlying,
                variants,
                is_public,
            } => declare_enum(state, &name.name, underlying.as_ref(), variants, *is_public, expr.span)?,
            _ => {}
        }
    }

    for expr in exprs {
        if let ExprKind::TypeAliasDecl {
            name,
            generics,
            ty,
            is_public,
        } = &expr.kind
        {
            declare_alias(state, &name.name, generics, ty, *is_public)?;
        }
    }

    for (id, fields) in structs {
        complete_struct(state, id, fields)?;
    }

    let mut functions = Vec::new();
    collect_functions(state, exprs, &mut functions)?;

    Ok(functions)
}

fn collect_functions<'a>(
    state: &mut State,
    exprs: &'a [Expr],
    out: &mut Vec<(FunctionId, &'a FunctionDecl)>,
) -> Result<()> {
    for expr in exprs {
        match &expr.kind {
            ExprKind::Function(decl) => {
                if let Some(id) = register_function(state, decl)? {
                    out.push((id, decl.as_ref()));
                }
            }
            // Extern blocks group their declarations.
            ExprKind::Block(inner) => collect_functions(state, inner, out)?,
            _ => {}
        }
    }

    Ok(())
}

// ----------------------------------------------------------------------
// Structs, enums, aliases, traits
// ----------------------------------------------------------------------

fn declare_struct(
    state: &mut State,
    name: &str,
    attrs: &[Attribute],
    is_public: bool,
    span: Span,
) -> Result<StructId> {
    let packed = attrs
        .iter()
        .any(|attr| matches!(attr.kind, AttributeKind::Packed));

    let qualified = state.qualified_name(state.scope(), name);
    let type_id = state.types.structure(&qualified, Vec::new());
    let scope = state.scopes.create(name, ScopeKind::Struct, Some(state.scope()));

    let id = state.add_struct(Struct {
        name: name.into(),
        qualified_name: qualified,
        type_id,
        fields: Vec::new(),
        scope,
        opaque: true,
        packed,
        is_public,
        span,
    });
    state.add_symbol(name, Symbol::Struct(id));

    Ok(id)
}

fn complete_struct(state: &mut State, id: StructId, fields: &[StructFieldDecl]) -> Result<()> {
    let mut field_types = Vec::with_capacity(fields.len());
    let mut field_records = Vec::with_capacity(fields.len());

    for (index, field) in fields.iter().enumerate() {
        let type_id = evaluate_type(state, &field.ty)?;

        let mut flags = FieldFlags::empty();
        if !field.is_public {
            flags |= FieldFlags::PRIVATE;
        }
        if field.is_readonly {
            flags |= FieldFlags::READONLY;
        }
        if field.is_mutable {
            flags |= FieldFlags::MUTABLE;
        }

        field_types.push(type_id);
        field_records.push(StructField {
            name: field.name.name.clone(),
            index: index as u32,
            type_id,
            flags,
        });
    }

    let type_id = state.structure(id).type_id;
    state.types.complete_struct(type_id, field_types);

    let structure = &mut state.structs[id.index()];
    structure.fields = field_records;
    structure.opaque = false;

    // Declare the struct in the global instruction stream so lowering sees
    // types in registration order.
    let block = state.generator.current_block();
    state.switch_to(None);
    state.emit(Instruction::NewStruct { structure: id });
    state.switch_to(block);

    Ok(())
}

fn declare_enum(
    state: &mut State,
    name: &str,
    underlying: Option<&crate::parser::ast::TypeExpr>,
    variants: &[(crate::parser::ast::Ident, Option<Expr>)],
    is_public: bool,
    span: Span,
) -> Result<()> {
    let inner = match underlying {
        Some(ty) => {
            let inner = evaluate_type(state, ty)?;
            if !state.types.is_int(inner) {
                return Err(Error::new(
                    ty.span,
                    "enum underlying type must be an integer type",
                ));
            }
            inner
        }
        None => state.types.i32(),
    };

    let qualified = state.qualified_name(state.scope(), name);
    let type_id = state.types.enumeration(&qualified, inner);
    let scope = state.scopes.create(name, ScopeKind::Enum, Some(state.scope()));

    let mut next_value: u64 = 0;
    for (variant, value) in variants {
        let discriminant = match value {
            Some(expr) => {
                let constant = ConstantEvaluator::new(state).evaluate(expr)?;
                let ConstantKind::Int(value) = state.constants.get(constant).kind else {
                    return Err(Error::new(
                        expr.span,
                        "enum discriminant must be an integer constant",
                    ));
                };
                value
            }
            None => next_value,
        };
        next_value = discriminant.wrapping_add(1);

        let initializer = state.constants.int(type_id, discriminant);
        state.scopes.add_symbol(
            scope,
            &variant.name,
            Symbol::Variable(Variable {
                name: variant.name.clone(),
                index: 0,
                type_id,
                flags: VariableFlags::CONSTANT | VariableFlags::PUBLIC,
                initializer: Some(initializer),
                span: variant.span,
            }),
        );
    }

    let id = state.add_enum(Enum {
        name: name.into(),
        qualified_name: qualified,
        type_id,
        inner,
        scope,
        is_public,
        span,
    });
    state.add_symbol(name, Symbol::Enum(id));

    Ok(())
}

fn declare_alias(
    state: &mut State,
    name: &str,
    generics: &[crate::parser::ast::GenericParameter],
    ty: &crate::parser::ast::TypeExpr,
    is_public: bool,
) -> Result<()> {
    let alias = if generics.is_empty() {
        let underlying = evaluate_type(state, ty)?;
        TypeAlias::concrete(name, underlying, is_public)
    } else {
        let parameters = evaluate_generic_parameters(state, generics)?;
        TypeAlias::generic(name, parameters, ty.clone(), is_public)
    };

    let id = state.add_alias(alias);
    state.add_symbol(name, Symbol::TypeAlias(id));

    Ok(())
}

fn evaluate_generic_parameters(
    state: &mut State,
    generics: &[crate::parser::ast::GenericParameter],
) -> Result<Vec<GenericTypeParameter>> {
    let mut parameters = Vec::with_capacity(generics.len());

    for parameter in generics {
        let mut constraints = Vec::with_capacity(parameter.constraints.len());
        for constraint in &parameter.constraints {
            constraints.push(evaluate_type(state, constraint)?);
        }

        let default_type = match &parameter.default {
            Some(ty) => Some(evaluate_type(state, ty)?),
            None => None,
        };

        parameters.push(GenericTypeParameter {
            name: parameter.name.name.clone(),
            constraints,
            default_type,
            span: parameter.name.span,
        });
    }

    Ok(parameters)
}

fn declare_trait(
    state: &mut State,
    name: &str,
    methods: &[FunctionDecl],
    is_public: bool,
    span: Span,
) -> Result<()> {
    let qualified = state.qualified_name(state.scope(), name);
    let type_id = state.types.trait_type(&qualified);
    let scope = state
        .scopes
        .create(name, ScopeKind::Namespace, Some(state.scope()));

    let previous = state.scope();
    let previous_self = state.self_type;

    // `self` in a required method signature stands for the implementing
    // type; the trait's own type is the placeholder.
    state.set_current_scope(scope);
    state.self_type = Some(type_id);

    let mut method_names = Vec::with_capacity(methods.len());
    for method in methods {
        method_names.push(method.name.name.clone());
        let result = register_function(state, method);
        if let Err(error) = result {
            state.set_current_scope(previous);
            state.self_type = previous_self;
            return Err(error);
        }
    }

    state.set_current_scope(previous);
    state.self_type = previous_self;

    let id = state.add_trait(Trait {
        name: name.into(),
        type_id,
        scope,
        methods: method_names,
        is_public,
        span,
    });
    state.add_symbol(name, Symbol::Trait(id));

    Ok(())
}

// ----------------------------------------------------------------------
// Functions
// ----------------------------------------------------------------------

/// Register a function symbol and signature without lowering its body.
/// Returns `None` when a `link` attribute filters the declaration out for
/// the current build target.
pub fn register_function(state: &mut State, decl: &FunctionDecl) -> Result<Option<FunctionId>> {
    let mut noreturn = false;
    let mut intrinsic = None;
    let mut link_name = None;
    let mut link_section = None;

    for attr in &decl.attrs {
        match &attr.kind {
            AttributeKind::NoReturn => noreturn = true,
            AttributeKind::LlvmIntrinsic(name) => intrinsic = Some(name.clone()),
            AttributeKind::Link(link) => {
                if let Some(platform) = &link.platform {
                    if platform != state.target.os() {
                        log::debug!(
                            "skipping '{}': platform '{platform}' does not match '{}'",
                            decl.name.name,
                            state.target.os()
                        );
                        return Ok(None);
                    }
                }

                if let Some(arch) = &link.arch {
                    if arch != state.target.arch() {
                        return Ok(None);
                    }
                }

                link_name = link.name.clone();
                link_section = link.section.clone();
            }
            AttributeKind::Packed => {
                return Err(Error::new(attr.span, "'packed' only applies to structs"));
            }
        }
    }

    let name = &decl.name.name;
    let scope = state
        .scopes
        .create(name.clone(), ScopeKind::Function, Some(state.scope()));

    // Generic templates keep their declaration for later specialization
    // and get no signature of their own.
    if !decl.generics.is_empty() {
        let generics = evaluate_generic_parameters(state, &decl.generics)?;
        let void = state.types.void();
        let placeholder = state.types.function(void, Vec::new(), false);

        let id = state.add_function(Function {
            name: name.clone(),
            qualified_name: name.clone(),
            linkage: decl.linkage,
            link_name,
            link_section: link_section.clone(),
            type_id: placeholder,
            parameters: Vec::new(),
            scope,
            entry_block: None,
            blocks: Vec::new(),
            locals: Vec::new(),
            current_loop: None,
            is_public: decl.is_public,
            is_used: false,
            is_decl: decl.body.is_none(),
            noreturn,
            intrinsic,
            generics,
            template: Some(Rc::new(decl.clone())),
            specializations: Default::default(),
            span: decl.span,
        });
        state.add_symbol(name, Symbol::Function(id));

        return Ok(Some(id));
    }

    let (parameters, param_types, var_arg) = evaluate_parameters(state, decl)?;

    let return_type = match &decl.return_type {
        Some(ty) => evaluate_type(state, ty)?,
        None => state.types.void(),
    };
    let type_id = state.types.function(return_type, param_types, var_arg);

    let qualified = match decl.linkage {
        Linkage::C => name.clone(),
        _ => state.mangled_name(state.scope(), name),
    };

    let id = state.add_function(Function {
        name: name.clone(),
        qualified_name: qualified,
        linkage: decl.linkage,
        link_name,
        link_section,
        type_id,
        parameters,
        scope,
        entry_block: None,
        blocks: Vec::new(),
        locals: Vec::new(),
        current_loop: None,
        is_public: decl.is_public,
        is_used: false,
        is_decl: decl.body.is_none(),
        noreturn,
        intrinsic,
        generics: Vec::new(),
        template: None,
        specializations: Default::default(),
        span: decl.span,
    });
    state.add_symbol(name, Symbol::Function(id));

    Ok(Some(id))
}

fn evaluate_parameters(
    state: &mut State,
    decl: &FunctionDecl,
) -> Result<(Vec<FunctionParameter>, Vec<TypeId>, bool)> {
    let mut parameters = Vec::new();
    let mut param_types = Vec::new();
    let mut var_arg = false;

    for param in &decl.params {
        if param.is_variadic {
            var_arg = true;
            continue;
        }

        let mut flags = ParameterFlags::empty();
        if param.is_keyword {
            flags |= ParameterFlags::KEYWORD;
        }
        if param.is_mutable {
            flags |= ParameterFlags::MUTABLE;
        }

        let type_id = if param.is_self {
            let Some(self_type) = state.self_type else {
                return Err(Error::new(
                    param.span,
                    "'self' is only allowed on methods inside an impl block",
                ));
            };

            flags |= ParameterFlags::SELF;
            state.types.reference_to(self_type, param.is_mutable)
        } else {
            evaluate_type(state, param.ty.as_ref().unwrap())?
        };

        param_types.push(type_id);
        parameters.push(FunctionParameter {
            name: param.name.name.clone(),
            type_id,
            flags,
            index: (parameters.len()) as u32,
            span: param.span,
        });
    }

    Ok((parameters, param_types, var_arg))
}

/// Lower a function body into a fresh CFG. Emits the `NewFunction` marker
/// into the global stream, builds the entry block, binds parameters as the
/// first locals and generates the body expressions.
pub fn define_function(state: &mut State, id: FunctionId, body: &[Expr]) -> Result<()> {
    let previous_function = state.current_function;
    let previous_scope = state.scope();
    let previous_block = state.generator.current_block();

    state.switch_to(None);
    state.emit(Instruction::NewFunction { function: id });

    let entry = state.create_block("entry");
    state.function_mut(id).set_entry_block(entry);

    state.current_function = Some(id);
    state.set_current_scope(state.function(id).scope);
    state.switch_to(Some(entry));
    state.emit(Instruction::NewLocalScope { function: id });

    let parameters = state.function(id).parameters.clone();
    for parameter in &parameters {
        let local = state.function_mut(id).allocate_local(parameter.type_id);

        let mut flags = VariableFlags::empty();
        if parameter.is_mutable() {
            flags |= VariableFlags::MUTABLE;
        }
        if state.types.is_reference(parameter.type_id) {
            flags |= VariableFlags::REFERENCE;
        }
        if parameter.is_self() {
            flags |= VariableFlags::USED;
        }

        state.add_symbol(
            parameter.name.clone(),
            Symbol::Variable(Variable {
                name: parameter.name.clone(),
                index: local,
                type_id: parameter.type_id,
                flags,
                initializer: None,
                span: parameter.span,
            }),
        );
    }

    let mut result = Ok(());
    for expr in body {
        if let Err(error) = generate_expr(state, expr, None) {
            result = Err(error);
            break;
        }
    }

    if result.is_ok() && !state.generator.is_terminated() {
        let return_type = state.types.function_return_type(state.function(id).type_id);
        if state.types.is_void(return_type) {
            state.emit(Instruction::Return { value: None });
        } else if block_has_predecessors(state, id) {
            result = Err(Error::new(
                state.function(id).span,
                format!(
                    "function '{}' does not return a value on all control paths",
                    state.function(id).name
                ),
            ));
        }
        // An unreachable trailing block (every path already returned) is
        // left unterminated; the dead-block pass deletes it.
    }

    if result.is_ok() {
        state.warn_unused(state.function(id).scope);
    }

    state.current_function = previous_function;
    state.set_current_scope(previous_scope);
    state.switch_to(previous_block);

    result
}

/// Whether any jump in `function` targets its current block, or the
/// current block is the entry. Distinguishes a genuine fall-off-the-end
/// from a dead join block left behind when every path returned.
fn block_has_predecessors(state: &State, function: FunctionId) -> bool {
    let Some(current) = state.generator.current_block() else {
        return false;
    };

    if state.function(function).entry_block == Some(current) {
        return true;
    }

    for &block in &state.function(function).blocks {
        for instruction in &state.generator.block(block).instructions {
            match instruction {
                Instruction::Jump { target } if *target == current => return true,
                Instruction::JumpIf {
                    true_target,
                    false_target,
                    ..
                } if *true_target == current || *false_target == current => return true,
                _ => {}
            }
        }
    }

    false
}

/// Build one concrete clone of a generic function template under the given
/// bindings and lower it.
pub fn instantiate_template(
    state: &mut State,
    decl: &FunctionDecl,
    generics: &[GenericTypeParameter],
    bound: &[TypeId],
    name: &str,
    template_scope: ScopeId,
) -> Result<FunctionId> {
    let Some(body) = decl.body.clone() else {
        return Err(Error::new(
            decl.span,
            format!("generic function '{}' has no body", decl.name.name),
        ));
    };

    let parent = state.scopes.get(template_scope).parent;
    let scope = state
        .scopes
        .create(name.to_string(), ScopeKind::Function, parent);

    for (parameter, &type_id) in generics.iter().zip(bound.iter()) {
        let alias = state.add_alias(TypeAlias::concrete(&parameter.name, type_id, false));
        state
            .scopes
            .add_symbol(scope, &parameter.name, Symbol::TypeAlias(alias));
    }

    let previous = state.scope();
    state.set_current_scope(scope);

    let evaluated = evaluate_parameters(state, decl).and_then(|evaluated| {
        let return_type = match &decl.return_type {
            Some(ty) => evaluate_type(state, ty)?,
            None => state.types.void(),
        };
        Ok((evaluated, return_type))
    });

    state.set_current_scope(previous);
    let ((parameters, param_types, var_arg), return_type) = evaluated?;

    let type_id = state.types.function(return_type, param_types, var_arg);
    let qualified = match parent {
        Some(parent) => state.mangled_name(parent, name),
        None => name.to_string(),
    };

    let id = state.add_function(Function {
        name: name.to_string(),
        qualified_name: qualified,
        linkage: decl.linkage,
        link_name: None,
        link_section: None,
        type_id,
        parameters,
        scope,
        entry_block: None,
        blocks: Vec::new(),
        locals: Vec::new(),
        current_loop: None,
        is_public: decl.is_public,
        is_used: false,
        is_decl: false,
        noreturn: false,
        intrinsic: None,
        generics: Vec::new(),
        template: None,
        specializations: Default::default(),
        span: decl.span,
    });

    define_function(state, id, &body)?;
    Ok(id)
}

// ----------------------------------------------------------------------
// Impl blocks
// ----------------------------------------------------------------------

pub fn generate_impl(state: &mut State, expr: &Expr) -> Result<()> {
    let ExprKind::Impl { generics, ty, body } = &expr.kind else {
        unreachable!()
    };

    if generics.is_empty() {
        let target = evaluate_type(state, ty)?;
        // The scope carries the target's name so methods mangle as
        // `Point::method`.
        let name = state.types.str(target);
        let scope = state
            .scopes
            .create(name, ScopeKind::Impl, Some(state.scope()));

        let previous_scope = state.scope();
        let previous_self = state.self_type;

        state.set_current_scope(scope);
        state.self_type = Some(target);

        let result = generate_impl_body(state, body);

        state.set_current_scope(previous_scope);
        state.self_type = previous_self;
        result?;

        state.add_impl(Impl::plain(target, scope));
        return Ok(());
    }

    // A generic impl evaluates its target with every parameter bound to a
    // placeholder; the result is a pattern matched against concrete types
    // at use sites.
    let pattern_scope = state
        .scopes
        .create("", ScopeKind::Anonymous, Some(state.scope()));
    for parameter in generics {
        let placeholder = state.types.empty(&parameter.name);
        let alias = state.add_alias(TypeAlias::concrete(&parameter.name, placeholder, false));
        state
            .scopes
            .add_symbol(pattern_scope, &parameter.name, Symbol::TypeAlias(alias));
    }

    let previous = state.scope();
    state.set_current_scope(pattern_scope);
    let pattern = evaluate_type(state, ty);
    state.set_current_scope(previous);

    state.add_impl(Impl::generic(pattern?, Rc::new(body.clone())));
    Ok(())
}

/// Register and lower the function declarations of an impl body in the
/// current scope.
pub fn generate_impl_body(state: &mut State, body: &[Expr]) -> Result<()> {
    let mut methods = Vec::new();

    for expr in body {
        let ExprKind::Function(decl) = &expr.kind else {
            return Err(Error::new(
                expr.span,
                "only function declarations are allowed in an impl block",
            ));
        };

        if let Some(id) = register_function(state, decl)? {
            methods.push((id, decl));
        }
    }

    for (id, decl) in methods {
        if let Some(body) = &decl.body {
            define_function(state, id, body)?;
        }
    }

    Ok(())
}

// ----------------------------------------------------------------------
// Let bindings
// ----------------------------------------------------------------------

pub fn generate_let(state: &mut State, expr: &Expr) -> Result<()> {
    let ExprKind::Let {
        target,
        ty,
        value,
        is_mutable,
        is_const,
        is_public,
    } = &expr.kind
    else {
        unreachable!()
    };

    let declared = match ty {
        Some(ty) => Some(evaluate_type(state, ty)?),
        None => None,
    };

    match target {
        LetTarget::Name(name) => {
            if *is_const {
                return generate_constant(state, expr, name, declared, value.as_deref(), *is_public);
            }

            if state.current_function.is_none() {
                return generate_global(state, expr, name, declared, value.as_deref(), *is_mutable, *is_public);
            }

            generate_local(state, expr, name, declared, value.as_deref(), *is_mutable)
        }
        LetTarget::Tuple(items) => generate_tuple_let(state, expr, items, declared, value.as_deref()),
    }
}

fn generate_constant(
    state: &mut State,
    expr: &Expr,
    name: &crate::parser::ast::Ident,
    declared: Option<TypeId>,
    value: Option<&Expr>,
    is_public: bool,
) -> Result<()> {
    let Some(value) = value else {
        return Err(Error::new(expr.span, "a constant requires an initializer"));
    };

    let mut constant = ConstantEvaluator::new(state).evaluate(value)?;
    let mut type_id = state.constants.get(constant).type_id;

    if let Some(declared) = declared {
        if type_id != declared && !state.types.can_safely_cast(type_id, declared) {
            return Err(Error::new(
                value.span,
                format!(
                    "constant initializer has type '{}' but '{}' was declared",
                    state.types.str(type_id),
                    state.types.str(declared)
                ),
            ));
        }

        constant = coerce_constant(state, constant, declared, value.span)?;
        type_id = declared;
    }

    let mut flags = VariableFlags::CONSTANT;
    if is_public {
        flags |= VariableFlags::PUBLIC;
    }

    state.add_symbol(
        name.name.clone(),
        Symbol::Variable(Variable {
            name: name.name.clone(),
            index: 0,
            type_id,
            flags,
            initializer: Some(constant),
            span: name.span,
        }),
    );

    Ok(())
}

fn generate_global(
    state: &mut State,
    expr: &Expr,
    name: &crate::parser::ast::Ident,
    declared: Option<TypeId>,
    value: Option<&Expr>,
    is_mutable: bool,
    is_public: bool,
) -> Result<()> {
    let initializer = match value {
        Some(value) => {
            let mut evaluator = ConstantEvaluator::new(state);
            if !evaluator.is_constant_expression(value) {
                return Err(Error::new(
                    value.span,
                    "global initializers must be constant expressions",
                ));
            }

            Some(evaluator.evaluate(value)?)
        }
        None => None,
    };

    let type_id = match (declared, initializer) {
        (Some(declared), _) => declared,
        (None, Some(initializer)) => state.constants.get(initializer).type_id,
        (None, None) => {
            return Err(Error::new(
                expr.span,
                "a global without an initializer requires a type annotation",
            ));
        }
    };

    let initializer = match initializer {
        Some(initializer) => {
            let actual = state.constants.get(initializer).type_id;
            if actual != type_id && !state.types.can_safely_cast(actual, type_id) {
                return Err(Error::new(
                    expr.span,
                    format!(
                        "global initializer has type '{}' but '{}' was declared",
                        state.types.str(actual),
                        state.types.str(type_id)
                    ),
                ));
            }

            Some(coerce_constant(state, initializer, type_id, expr.span)?)
        }
        None => None,
    };

    let index = state.allocate_global(&name.name, type_id, initializer, is_mutable);

    let mut flags = VariableFlags::GLOBAL;
    if is_mutable {
        flags |= VariableFlags::MUTABLE;
    }
    if is_public {
        flags |= VariableFlags::PUBLIC;
    }

    state.add_symbol(
        name.name.clone(),
        Symbol::Variable(Variable {
            name: name.name.clone(),
            index,
            type_id,
            flags,
            initializer,
            span: name.span,
        }),
    );

    Ok(())
}

fn generate_local(
    state: &mut State,
    expr: &Expr,
    name: &crate::parser::ast::Ident,
    declared: Option<TypeId>,
    value: Option<&Expr>,
    is_mutable: bool,
) -> Result<()> {
    let value_operand = match value {
        Some(value) => Some((generate_expr(state, value, None)?, value.span)),
        None => None,
    };

    let type_id = match (declared, &value_operand) {
        (Some(declared), _) => declared,
        (None, Some((operand, _))) => state.operand_type(*operand),
        (None, None) => {
            return Err(Error::new(
                expr.span,
                "a variable without an initializer requires a type annotation",
            ));
        }
    };

    let function = state.current_function.unwrap();
    let local = state.function_mut(function).allocate_local(type_id);

    if let Some((operand, span)) = value_operand {
        let operand = state.type_check_and_cast(span, operand, type_id, "initializer")?;
        state.emit(Instruction::SetLocal {
            index: local,
            src: operand,
        });
    }

    let mut flags = VariableFlags::empty();
    if is_mutable {
        flags |= VariableFlags::MUTABLE;
    }
    if state.types.is_reference(type_id) {
        flags |= VariableFlags::REFERENCE;
    }

    state.add_symbol(
        name.name.clone(),
        Symbol::Variable(Variable {
            name: name.name.clone(),
            index: local,
            type_id,
            flags,
            initializer: None,
            span: name.span,
        }),
    );

    Ok(())
}

/// `let (a, *rest, b) = value` takes the tuple apart element-wise. The
/// consume pattern binds the middle elements as a fresh tuple; it only
/// applies to direct tuple values, not pointers to tuples.
fn generate_tuple_let(
    state: &mut State,
    expr: &Expr,
    items: &[TuplePatternItem],
    declared: Option<TypeId>,
    value: Option<&Expr>,
) -> Result<()> {
    let Some(value) = value else {
        return Err(Error::new(expr.span, "tuple destructuring requires an initializer"));
    };

    let operand = generate_expr(state, value, None)?;
    let mut tuple_type = state.operand_type(operand);
    if let Some(declared) = declared {
        let operand_type = tuple_type;
        if operand_type != declared {
            return Err(Error::new(
                value.span,
                format!(
                    "initializer has type '{}' but '{}' was declared",
                    state.types.str(operand_type),
                    state.types.str(declared)
                ),
            ));
        }
        tuple_type = declared;
    }

    if state.types.is_pointer(tuple_type) || state.types.is_reference(tuple_type) {
        return Err(Error::new(
            value.span,
            "cannot destructure through a pointer; dereference the tuple first",
        ));
    }

    let crate::language::types::TypeKind::Tuple { elements } = state.types.kind(tuple_type).clone()
    else {
        return Err(Error::new(
            value.span,
            format!("'{}' is not a tuple", state.types.str(tuple_type)),
        ));
    };

    let rest_position = items
        .iter()
        .position(|item| matches!(item, TuplePatternItem::Rest(_)));
    let named = items.len() - rest_position.map(|_| 1).unwrap_or(0);

    if rest_position.is_none() && named != elements.len() {
        return Err(Error::new(
            expr.span,
            format!(
                "pattern has {named} name(s) but the tuple has {} element(s)",
                elements.len()
            ),
        ));
    }
    if named > elements.len() {
        return Err(Error::new(
            expr.span,
            format!(
                "pattern needs at least {named} element(s) but the tuple has {}",
                elements.len()
            ),
        ));
    }

    let function = state.current_function.ok_or_else(|| {
        Error::new(expr.span, "tuple destructuring is only allowed inside a function")
    })?;

    let mut element_index = 0usize;
    for (item_index, item) in items.iter().enumerate() {
        match item {
            TuplePatternItem::Name(name) => {
                // Names after the rest pattern bind from the tuple's end.
                let index = if rest_position.map(|rest| item_index > rest).unwrap_or(false) {
                    elements.len() - (items.len() - item_index)
                } else {
                    element_index
                };
                element_index = index + 1;

                let element_type = elements[index];
                let dst = state.typed_register(element_type);
                state.emit(Instruction::GetMember {
                    dst,
                    value: operand,
                    index: index as u32,
                });

                let local = state.function_mut(function).allocate_local(element_type);
                state.emit(Instruction::SetLocal {
                    index: local,
                    src: crate::bytecode::Operand::Register(dst),
                });

                state.add_symbol(
                    name.name.clone(),
                    Symbol::Variable(Variable {
                        name: name.name.clone(),
                        index: local,
                        type_id: element_type,
                        flags: VariableFlags::empty(),
                        initializer: None,
                        span: name.span,
                    }),
                );
            }
            TuplePatternItem::Rest(name) => {
                let trailing = items.len() - item_index - 1;
                let count = elements.len() - trailing - element_index;

                let rest_types: Vec<TypeId> =
                    elements[element_index..element_index + count].to_vec();
                let rest_type = state.types.tuple_of(rest_types.clone());

                let mut parts = Vec::with_capacity(count);
                for offset in 0..count {
                    let element_type = rest_types[offset];
                    let dst = state.typed_register(element_type);
                    state.emit(Instruction::GetMember {
                        dst,
                        value: operand,
                        index: (element_index + offset) as u32,
                    });
                    parts.push(crate::bytecode::Operand::Register(dst));
                }

                let dst = state.typed_register(rest_type);
                state.emit(Instruction::Construct {
                    dst,
                    type_id: rest_type,
                    arguments: parts,
                });

                let local = state.function_mut(function).allocate_local(rest_type);
                state.emit(Instruction::SetLocal {
                    index: local,
                    src: crate::bytecode::Operand::Register(dst),
                });

                state.add_symbol(
                    name.name.clone(),
                    Symbol::Variable(Variable {
                        name: name.name.clone(),
                        index: local,
                        type_id: rest_type,
                        flags: VariableFlags::empty(),
                        initializer: None,
                        span: name.span,
                    }),
                );

                element_index += count;
            }
        }
    }

    Ok(())
}

// ----------------------------------------------------------------------
// Imports & inline modules
// ----------------------------------------------------------------------

pub fn generate_import(state: &mut State, expr: &Expr) -> Result<()> {
    let ExprKind::Import { path } = &expr.kind else {
        unreachable!()
    };

    let segments: Vec<String> = path
        .segments
        .iter()
        .map(|segment| segment.name.clone())
        .collect();

    let relative = state.current_directory();
    let found = search_import_paths(
        &segments,
        relative.as_deref(),
        &state.import_paths.clone(),
        state.library_path.clone().as_deref(),
    );

    let Some(file) = found else {
        return Err(Error::new(
            path.span,
            format!("could not find module '{}'", segments.join("::")),
        ));
    };

    let canonical = file.canonicalize().unwrap_or(file.clone());

    if let Some(&existing) = state.loaded_modules.get(&canonical) {
        if state.modules[existing.index()].state == ModuleState::Importing {
            return Err(Error::new(
                path.span,
                format!(
                    "circular dependency detected while importing '{}'",
                    segments.join("::")
                ),
            ));
        }

        let name = segments.last().unwrap().clone();
        state.add_symbol(name, Symbol::Module(existing));
        return Ok(());
    }

    log::info!("importing '{}' from '{}'", segments.join("::"), file.display());

    let source = state
        .sources
        .load(&file)
        .map_err(|error| Error::new(path.span, format!("could not read '{}': {error}", file.display())))?;
    let code = state.sources.get(source).unwrap().code().to_string();

    let tokens = Lexer::new(&code, source).lex()?;
    let ast = Parser::new(tokens).parse()?;

    let name = segments.last().unwrap().clone();
    let qualified = segments.join("::");

    let scope = state
        .scopes
        .create(name.clone(), ScopeKind::Module, Some(state.global_scope));
    let id = state.add_module(Module {
        name: name.clone(),
        qualified_name: qualified,
        path: canonical.clone(),
        scope,
        state: ModuleState::Importing,
        parent: state.current_module,
    });
    state.scopes.get_mut(scope).module = Some(id);
    state.loaded_modules.insert(canonical, id);

    let previous_scope = state.scope();
    let previous_module = state.current_module;
    let previous_block = state.generator.current_block();

    state.set_current_scope(scope);
    state.current_module = Some(id);
    state.switch_to(None);

    let result = generate_program(state, &ast);

    state.set_current_scope(previous_scope);
    state.current_module = previous_module;
    state.switch_to(previous_block);
    result?;

    state.modules[id.index()].state = ModuleState::Ready;
    state.add_symbol(name, Symbol::Module(id));

    Ok(())
}

pub fn generate_module_decl(state: &mut State, expr: &Expr) -> Result<()> {
    let ExprKind::ModuleDecl { name, body } = &expr.kind else {
        unreachable!()
    };

    let qualified = state.qualified_name(state.scope(), &name.name);
    let scope = state
        .scopes
        .create(name.name.clone(), ScopeKind::Namespace, Some(state.scope()));

    let id = state.add_module(Module {
        name: name.name.clone(),
        qualified_name: qualified,
        path: Default::default(),
        scope,
        state: ModuleState::Ready,
        parent: state.current_module,
    });

    let previous = state.scope();
    state.set_current_scope(scope);
    let result = generate_program(state, body);
    state.set_current_scope(previous);
    result?;

    state.add_symbol(name.name.clone(), Symbol::Module(id));
    Ok(())
}

// ----------------------------------------------------------------------
// static_assert
// ----------------------------------------------------------------------

pub fn generate_static_assert(state: &mut State, expr: &Expr) -> Result<()> {
    let ExprKind::StaticAssert { condition, message } = &expr.kind else {
        unreachable!()
    };

    let constant = ConstantEvaluator::new(state).evaluate(condition)?;
    let ConstantKind::Int(value) = state.constants.get(constant).kind else {
        return Err(Error::new(
            condition.span,
            "static_assert condition must be an integer constant",
        ));
    };

    if value == 0 {
        return Err(Error::new(
            expr.span,
            format!("static assertion failed: {message}"),
        ));
    }

    Ok(())
}

/// Re-intern a constant at the type a binding declares, sign extending
/// widened integers.
fn coerce_constant(
    state: &mut State,
    constant: crate::language::ConstantId,
    target: TypeId,
    span: Span,
) -> Result<crate::language::ConstantId> {
    let value = state.constants.get(constant).clone();
    if value.type_id == target {
        return Ok(constant);
    }

    match value.kind {
        ConstantKind::Int(bits) => {
            let extended = match state.types.kind(value.type_id) {
                crate::language::TypeKind::Int {
                    bits: width,
                    signed: true,
                } if *width < 64 => {
                    let shift = 64 - width;
                    (((bits << shift) as i64) >> shift) as u64
                }
                _ => bits,
            };

            Ok(state.constants.int(target, extended))
        }
        ConstantKind::Float(float) => Ok(state.constants.float(target, float)),
        ConstantKind::Null => Ok(state.constants.null(target)),
        _ => Err(Error::new(
            span,
            format!(
                "initializer cannot be converted to '{}'",
                state.types.str(target)
            ),
        )),
    }
}
