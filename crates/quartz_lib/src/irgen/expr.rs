//! Expression generation.
//!
//! Each AST node lowers to an [`Operand`]: literals become typed
//! immediates, statements return `Operand::None`. Assignment re-analyzes
//! its left side as a place; reads of fields and elements go through
//! references so the same path handles values and addresses.

use crate::bytecode::{Instruction, Operand, Register};
use crate::errors::{Error, Result};
use crate::language::consteval::ConstantEvaluator;
use crate::language::constants::{ConstantId, ConstantKind};
use crate::language::scopes::ScopeKind;
use crate::language::structs::StructField;
use crate::language::symbol::{FunctionId, StructId, Symbol, VariableFlags};
use crate::language::types::{TypeId, TypeKind};
use crate::language::State;
use crate::parser::ast::{BinaryOp, Expr, ExprKind, Ident, MatchArm, UnaryOp};
use crate::source_map::Span;

use super::stmt;
use super::types::{evaluate_type, method_scope_for, resolve_path_symbol, specialize_function};

pub fn generate_expr(state: &mut State, expr: &Expr, dst: Option<Register>) -> Result<Operand> {
    let operand = match &expr.kind {
        ExprKind::Integer(value) => {
            let type_id = if i32::try_from(*value).is_ok() {
                state.types.i32()
            } else {
                state.types.i64()
            };

            Operand::Immediate {
                value: *value,
                type_id,
            }
        }
        ExprKind::Float(value) => {
            let f64 = state.types.f64();
            Operand::Immediate {
                value: value.to_bits(),
                type_id: f64,
            }
        }
        ExprKind::Bool(value) => {
            // With an explicit destination the boolean is materialized,
            // otherwise it stays an immediate.
            if let Some(dst) = dst {
                let i1 = state.types.i1();
                state.set_register_type(dst, i1);
                state.emit(Instruction::Boolean { dst, value: *value });
                return Ok(Operand::Register(dst));
            }

            Operand::Immediate {
                value: *value as u64,
                type_id: state.types.i1(),
            }
        }
        ExprKind::Char(value) => Operand::Immediate {
            value: *value as u64 & 0xff,
            type_id: state.types.i8(),
        },
        ExprKind::String(value) => {
            let cstr = state.types.cstr();
            let dst = dst.unwrap_or_else(|| state.allocate_register());
            state.set_register_type(dst, cstr);
            state.emit(Instruction::NewString {
                dst,
                value: value.clone(),
            });

            return Ok(Operand::Register(dst));
        }
        ExprKind::Null => {
            let void = state.types.void();
            let pointer = state.types.pointer_to(void, false);
            let dst = dst.unwrap_or_else(|| state.allocate_register());
            state.set_register_type(dst, pointer);
            state.emit(Instruction::Null {
                dst,
                type_id: pointer,
            });

            return Ok(Operand::Register(dst));
        }
        ExprKind::Identifier(name) => generate_identifier(state, expr.span, name, dst)?,
        ExprKind::Path(path) => {
            let symbol = resolve_path_symbol(state, path)?;
            materialize_symbol(state, expr.span, symbol, dst)?
        }
        ExprKind::Attribute { value, field } => generate_attribute_read(state, value, field, dst)?,
        ExprKind::Index { value, index } => generate_index_read(state, expr.span, value, index)?,
        ExprKind::Array(elements) => generate_array_literal(state, expr.span, elements, dst)?,
        ExprKind::Tuple(elements) => generate_tuple_literal(state, elements, dst)?,
        ExprKind::Unary { op, value } => generate_unary(state, expr.span, *op, value)?,
        ExprKind::Binary { op, lhs, rhs } => generate_binary(state, expr.span, *op, lhs, rhs)?,
        ExprKind::Assign { target, value } => {
            generate_assignment(state, target, value)?;
            Operand::None
        }
        ExprKind::Cast { value, ty } => generate_cast(state, expr.span, value, ty)?,
        ExprKind::Call {
            callee,
            args,
            kwargs,
        } => generate_call(state, expr.span, callee, args, kwargs, dst)?,
        ExprKind::Return(value) => {
            generate_return(state, expr.span, value.as_deref())?;
            Operand::None
        }
        ExprKind::If {
            condition,
            then_block,
            else_block,
        } => {
            generate_if(state, condition, then_block, else_block.as_deref())?;
            Operand::None
        }
        ExprKind::Ternary {
            condition,
            true_value,
            false_value,
        } => generate_ternary(state, condition, true_value, false_value)?,
        ExprKind::While { condition, body } => {
            generate_while(state, condition, body)?;
            Operand::None
        }
        ExprKind::Break => {
            let function = state.current_function.and_then(|id| state.function(id).current_loop);
            let Some(active) = function else {
                return Err(Error::new(expr.span, "'break' outside of a loop"));
            };

            state.emit(Instruction::Jump { target: active.end });
            Operand::None
        }
        ExprKind::Continue => {
            let function = state.current_function.and_then(|id| state.function(id).current_loop);
            let Some(active) = function else {
                return Err(Error::new(expr.span, "'continue' outside of a loop"));
            };

            state.emit(Instruction::Jump {
                target: active.start,
            });
            Operand::None
        }
        ExprKind::Match { value, arms } => generate_match(state, expr.span, value, arms)?,
        ExprKind::Block(body) => {
            let scope = state
                .scopes
                .create("", ScopeKind::Anonymous, Some(state.scope()));
            let previous = state.scope();
            state.set_current_scope(scope);

            let mut result = Ok(());
            for expr in body {
                if state.generator.is_terminated() {
                    break;
                }

                if let Err(error) = generate_expr(state, expr, None) {
                    result = Err(error);
                    break;
                }
            }

            state.set_current_scope(previous);
            result?;
            Operand::None
        }
        ExprKind::Let { .. } => {
            stmt::generate_let(state, expr)?;
            Operand::None
        }
        ExprKind::Function(decl) => {
            if let Some(id) = stmt::register_function(state, decl)? {
                if let Some(body) = &decl.body {
                    stmt::define_function(state, id, body)?;
                }
            }
            Operand::None
        }
        ExprKind::Import { .. } => {
            stmt::generate_import(state, expr)?;
            Operand::None
        }
        ExprKind::ModuleDecl { .. } => {
            stmt::generate_module_decl(state, expr)?;
            Operand::None
        }
        ExprKind::Impl { .. } => {
            stmt::generate_impl(state, expr)?;
            Operand::None
        }
        ExprKind::StaticAssert { .. } => {
            stmt::generate_static_assert(state, expr)?;
            Operand::None
        }
        ExprKind::Sizeof { .. } | ExprKind::Offsetof { .. } => {
            let constant = ConstantEvaluator::new(state).evaluate(expr)?;
            constant_to_operand(state, expr.span, constant, dst)?
        }
        ExprKind::StructDecl { .. }
        | ExprKind::EnumDecl { .. }
        | ExprKind::TypeAliasDecl { .. }
        | ExprKind::TraitDecl { .. } => {
            return Err(Error::new(
                expr.span,
                "declarations are only allowed at module scope",
            ));
        }
    };

    finish(state, dst, operand)
}

/// Route a produced operand into the requested destination register.
fn finish(state: &mut State, dst: Option<Register>, operand: Operand) -> Result<Operand> {
    let Some(dst) = dst else {
        return Ok(operand);
    };

    if operand.is_none() {
        return Ok(operand);
    }
    if operand.as_register() == Some(dst) {
        return Ok(operand);
    }

    let type_id = state.operand_type(operand);
    state.set_register_type(dst, type_id);
    state.emit(Instruction::Move { dst, src: operand });

    Ok(Operand::Register(dst))
}

// ----------------------------------------------------------------------
// Names
// ----------------------------------------------------------------------

fn generate_identifier(
    state: &mut State,
    span: Span,
    name: &str,
    dst: Option<Register>,
) -> Result<Operand> {
    let symbol = state
        .resolve(name)
        .cloned()
        .ok_or_else(|| Error::new(span, format!("undefined identifier '{name}'")))?;

    materialize_symbol(state, span, symbol, dst)
}

fn materialize_symbol(
    state: &mut State,
    span: Span,
    symbol: Symbol,
    dst: Option<Register>,
) -> Result<Operand> {
    match symbol {
        Symbol::Variable(variable) => {
            mark_variable(state, &variable.name, VariableFlags::USED);

            if variable.is_constant() {
                let initializer = variable.initializer.ok_or_else(|| {
                    Error::new(span, format!("'{}' has no constant value", variable.name))
                })?;
                return constant_to_operand(state, span, initializer, dst);
            }

            let dst = dst.unwrap_or_else(|| state.allocate_register());
            state.set_register_type(dst, variable.type_id);

            if variable.is_global() {
                state.emit(Instruction::GetGlobal {
                    dst,
                    index: variable.index,
                });
            } else {
                state.emit(Instruction::GetLocal {
                    dst,
                    index: variable.index,
                });
            }

            Ok(Operand::Register(dst))
        }
        Symbol::Function(id) => {
            if state.function(id).is_generic() {
                return Err(Error::new(
                    span,
                    format!(
                        "generic function '{}' must be called to take its address",
                        state.function(id).name
                    ),
                ));
            }

            let type_id = state.function(id).type_id;
            let dst = dst.unwrap_or_else(|| state.allocate_register());
            state.set_register_type(dst, type_id);
            state.emit(Instruction::GetFunction { dst, function: id });

            Ok(Operand::Register(dst))
        }
        other => Err(Error::new(
            span,
            format!("{} is not a value", other.kind_name()),
        )),
    }
}

fn mark_variable(state: &mut State, name: &str, flag: VariableFlags) {
    // Walk outward to the scope holding the binding.
    let mut current = Some(state.scope());
    while let Some(scope) = current {
        if state.scopes.resolve_local(scope, name).is_some() {
            if let Some(variable) = state.variable_mut(scope, name) {
                variable.flags |= flag;
            }
            return;
        }

        current = state.scopes.get(scope).parent;
    }
}

/// Materialize a pooled constant as an operand.
pub fn constant_to_operand(
    state: &mut State,
    span: Span,
    constant: ConstantId,
    dst: Option<Register>,
) -> Result<Operand> {
    let value = state.constants.get(constant).clone();

    let operand = match &value.kind {
        ConstantKind::Int(bits) => Operand::Immediate {
            value: *bits,
            type_id: value.type_id,
        },
        ConstantKind::Float(float) => Operand::Immediate {
            value: float.to_bits(),
            type_id: value.type_id,
        },
        ConstantKind::String(text) => {
            let dst = dst.unwrap_or_else(|| state.allocate_register());
            state.set_register_type(dst, value.type_id);
            state.emit(Instruction::NewString {
                dst,
                value: text.clone(),
            });

            return Ok(Operand::Register(dst));
        }
        ConstantKind::Null => {
            let dst = dst.unwrap_or_else(|| state.allocate_register());
            state.set_register_type(dst, value.type_id);
            state.emit(Instruction::Null {
                dst,
                type_id: value.type_id,
            });

            return Ok(Operand::Register(dst));
        }
        ConstantKind::Array(elements) => {
            let mut operands = Vec::with_capacity(elements.len());
            for &element in elements {
                operands.push(constant_to_operand(state, span, element, None)?);
            }

            let dst = dst.unwrap_or_else(|| state.allocate_register());
            state.set_register_type(dst, value.type_id);
            state.emit(Instruction::NewArray {
                dst,
                elements: operands,
            });

            return Ok(Operand::Register(dst));
        }
        ConstantKind::Struct(elements) => {
            let mut operands = Vec::with_capacity(elements.len());
            for &element in elements {
                operands.push(constant_to_operand(state, span, element, None)?);
            }

            let dst = dst.unwrap_or_else(|| state.allocate_register());
            state.set_register_type(dst, value.type_id);
            state.emit(Instruction::Construct {
                dst,
                type_id: value.type_id,
                arguments: operands,
            });

            return Ok(Operand::Register(dst));
        }
    };

    Ok(operand)
}

// ----------------------------------------------------------------------
// Static type prediction for place analysis
// ----------------------------------------------------------------------

/// Best-effort static type of an expression without emitting anything.
/// Only the shapes place analysis needs are covered.
fn infer_expr_type(state: &State, expr: &Expr) -> Option<TypeId> {
    match &expr.kind {
        ExprKind::Identifier(name) => match state.resolve(name) {
            Some(Symbol::Variable(variable)) => Some(variable.type_id),
            Some(Symbol::Function(id)) => Some(state.function(*id).type_id),
            _ => None,
        },
        ExprKind::Attribute { value, field } => {
            let base = infer_expr_type(state, value)?;
            let stripped = state.types.underlying_type(base).unwrap_or(base);
            let structure = state.struct_for_type(stripped)?;

            state
                .structure(structure)
                .find_field(&field.name)
                .map(|field| field.type_id)
        }
        ExprKind::Index { value, .. } => {
            let base = infer_expr_type(state, value)?;
            let stripped = state.types.underlying_type(base).unwrap_or(base);

            match state.types.kind(stripped) {
                TypeKind::Array { element, .. } => Some(*element),
                TypeKind::Pointer { pointee, .. } => Some(*pointee),
                _ => None,
            }
        }
        ExprKind::Unary {
            op: UnaryOp::Deref,
            value,
        } => {
            let base = infer_expr_type(state, value)?;
            state.types.underlying_type(base)
        }
        _ => None,
    }
}

/// Whether the place named by `expr` may be written through.
fn is_mutable_place(state: &State, expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Identifier(name) => match state.resolve(name) {
            Some(Symbol::Variable(variable)) => {
                if variable.flags.contains(VariableFlags::REFERENCE) {
                    state.types.is_mutable(variable.type_id)
                } else {
                    variable.is_mutable()
                }
            }
            _ => false,
        },
        ExprKind::Attribute { value, .. } => is_mutable_place(state, value),
        ExprKind::Index { value, .. } => {
            let base = infer_expr_type(state, value);
            match base.map(|base| state.types.kind(base)) {
                Some(TypeKind::Pointer { mutable, .. }) => *mutable,
                Some(TypeKind::Reference { mutable, .. }) => *mutable,
                _ => is_mutable_place(state, value),
            }
        }
        ExprKind::Unary {
            op: UnaryOp::Deref,
            value,
        } => infer_expr_type(state, value)
            .map(|pointer| state.types.is_mutable(pointer))
            .unwrap_or(false),
        _ => false,
    }
}

// ----------------------------------------------------------------------
// References and places
// ----------------------------------------------------------------------

/// Lower `expr` to a register holding its address. Temporaries are
/// spilled to a stack slot so even rvalues can be referenced.
pub fn generate_reference(state: &mut State, expr: &Expr, mutable: bool) -> Result<Register> {
    match &expr.kind {
        ExprKind::Identifier(name) => {
            let symbol = state.resolve(name).cloned().ok_or_else(|| {
                Error::new(expr.span, format!("undefined identifier '{name}'"))
            })?;

            let variable = match symbol {
                Symbol::Variable(variable) => variable,
                other => {
                    return Err(Error::new(
                        expr.span,
                        format!("cannot take a reference to a {}", other.kind_name()),
                    ));
                }
            };

            if variable.is_constant() {
                return Err(Error::new(
                    expr.span,
                    format!("cannot take a reference to constant '{}'", variable.name),
                ));
            }

            if mutable && !variable.is_mutable() && !variable.flags.contains(VariableFlags::REFERENCE)
            {
                return Err(Error::new(
                    expr.span,
                    format!("cannot mutably borrow immutable variable '{}'", variable.name),
                ));
            }

            mark_variable(state, name, VariableFlags::USED);
            if mutable {
                mark_variable(state, name, VariableFlags::MUTATED);
            }

            // A reference variable already holds an address; hand it out
            // instead of stacking another level of indirection.
            if variable.flags.contains(VariableFlags::REFERENCE) {
                if mutable && !state.types.is_mutable(variable.type_id) {
                    return Err(Error::new(
                        expr.span,
                        format!("'{}' is not a mutable reference", variable.name),
                    ));
                }

                let dst = state.typed_register(variable.type_id);
                state.emit(Instruction::GetLocal {
                    dst,
                    index: variable.index,
                });
                return Ok(dst);
            }

            let reference = state.types.reference_to(variable.type_id, mutable);
            let dst = state.typed_register(reference);

            if variable.is_global() {
                state.emit(Instruction::GetGlobalRef {
                    dst,
                    index: variable.index,
                });
            } else {
                state.emit(Instruction::GetLocalRef {
                    dst,
                    index: variable.index,
                });
            }

            Ok(dst)
        }
        ExprKind::Attribute { value, field } => {
            let (base, structure) = generate_aggregate_base(state, value, mutable)?;
            let field = lookup_field(state, value.span, structure, field)?;

            if mutable && field.is_readonly() {
                return Err(Error::new(
                    expr.span,
                    format!("field '{}' is readonly", field.name),
                ));
            }

            let reference = state.types.reference_to(field.type_id, mutable);
            let dst = state.typed_register(reference);
            state.emit(Instruction::GetMemberRef {
                dst,
                value: base,
                index: field.index,
            });

            Ok(dst)
        }
        ExprKind::Index { value, index } => generate_element_address(state, expr.span, value, index, mutable),
        ExprKind::Unary {
            op: UnaryOp::Deref,
            value,
        } => {
            let operand = generate_expr(state, value, None)?;
            let pointer = into_register(state, operand);
            let type_id = state.register_type(pointer);

            if state.types.underlying_type(type_id).is_none() {
                return Err(Error::new(
                    value.span,
                    format!("cannot dereference '{}'", state.types.str(type_id)),
                ));
            }
            if mutable && !state.types.is_mutable(type_id) {
                return Err(Error::new(
                    value.span,
                    format!("cannot write through '{}'", state.types.str(type_id)),
                ));
            }

            Ok(pointer)
        }
        _ => {
            // Spill the temporary to a fresh stack slot.
            let operand = generate_expr(state, expr, None)?;
            let type_id = state.operand_type(operand);
            let pointer = state.types.pointer_to(type_id, true);

            let slot = state.typed_register(pointer);
            state.emit(Instruction::Alloca {
                dst: slot,
                type_id,
            });
            state.emit(Instruction::Write {
                dst: slot,
                src: operand,
            });

            Ok(slot)
        }
    }
}

/// Lower the base of a member access to an address of a struct, resolving
/// through one level of pointer or reference.
fn generate_aggregate_base(
    state: &mut State,
    base: &Expr,
    mutable: bool,
) -> Result<(Register, StructId)> {
    let base_type = infer_expr_type(state, base);

    // `p.field` where `p` is already a pointer to a struct reads `p` by
    // value and indexes through it.
    if let Some(type_id) = base_type {
        if state.types.underlying_type(type_id).is_some() {
            let operand = generate_expr(state, base, None)?;
            let register = into_register(state, operand);

            if mutable && !state.types.is_mutable(type_id) {
                return Err(Error::new(
                    base.span,
                    format!("cannot write through '{}'", state.types.str(type_id)),
                ));
            }

            let pointee = state.types.underlying_type(type_id).unwrap();
            let structure = state.struct_for_type(pointee).ok_or_else(|| {
                Error::new(
                    base.span,
                    format!("'{}' has no fields", state.types.str(pointee)),
                )
            })?;

            return Ok((register, structure));
        }
    }

    if mutable && !is_mutable_place(state, base) {
        return Err(Error::new(base.span, "cannot mutate an immutable value"));
    }

    let reference = generate_reference(state, base, mutable)?;
    let referent = state
        .types
        .underlying_type(state.register_type(reference))
        .unwrap();

    let structure = state.struct_for_type(referent).ok_or_else(|| {
        Error::new(
            base.span,
            format!("'{}' has no fields", state.types.str(referent)),
        )
    })?;

    Ok((reference, structure))
}

fn lookup_field(
    state: &State,
    span: Span,
    structure: StructId,
    field: &Ident,
) -> Result<StructField> {
    let record = state.structure(structure);

    let Some(found) = record.find_field(&field.name) else {
        return Err(Error::new(
            field.span,
            format!("'{}' has no field named '{}'", record.name, field.name),
        ));
    };

    // Private fields are only visible below the struct's own scope.
    if found.is_private() {
        let inside = state
            .scopes
            .enclosing(state.scope(), ScopeKind::Struct)
            .map(|scope| scope == record.scope)
            .unwrap_or(false)
            || state.self_type == Some(record.type_id);

        if !inside {
            return Err(Error::new(
                span,
                format!("field '{}' of '{}' is private", field.name, record.name),
            ));
        }
    }

    Ok(found.clone())
}

/// Address of `value[index]`. Constant indexes into arrays go through
/// member references with a bounds check; everything else is pointer
/// arithmetic.
fn generate_element_address(
    state: &mut State,
    span: Span,
    value: &Expr,
    index: &Expr,
    mutable: bool,
) -> Result<Register> {
    let base_type = infer_expr_type(state, value);

    // Pointer bases are read by value; `p[i]` is `*(p + i)`.
    if let Some(type_id) = base_type {
        if state.types.is_pointer(type_id) {
            if mutable && !state.types.is_mutable(type_id) {
                return Err(Error::new(
                    value.span,
                    format!("cannot write through '{}'", state.types.str(type_id)),
                ));
            }

            let pointer = generate_expr(state, value, None)?;
            let offset = generate_expr(state, index, None)?;
            let offset_type = state.operand_type(offset);
            if !state.types.is_int(offset_type) {
                return Err(Error::new(index.span, "index must be an integer"));
            }

            let dst = state.typed_register(type_id);
            state.emit(Instruction::Binary {
                op: BinaryOp::Add,
                dst,
                lhs: pointer,
                rhs: offset,
            });

            return Ok(dst);
        }
    }

    let base = generate_reference(state, value, mutable)?;
    let base_type = state.register_type(base);
    let aggregate = state.types.underlying_type(base_type).unwrap();

    let TypeKind::Array { element, size } = state.types.kind(aggregate).clone() else {
        return Err(Error::new(
            span,
            format!("'{}' cannot be indexed", state.types.str(aggregate)),
        ));
    };

    // Constant indexes are bounds checked at compile time.
    let mut evaluator = ConstantEvaluator::new(state);
    if evaluator.is_constant_expression(index) {
        let constant = evaluator.evaluate(index)?;
        let ConstantKind::Int(position) = state.constants.get(constant).kind else {
            return Err(Error::new(index.span, "index must be an integer"));
        };

        if position as usize >= size {
            return Err(Error::new(
                index.span,
                format!("index {position} is out of bounds for '[{}; {size}]'", {
                    state.types.str(element)
                }),
            ));
        }

        let reference = state.types.reference_to(element, mutable);
        let dst = state.typed_register(reference);
        state.emit(Instruction::GetMemberRef {
            dst,
            value: base,
            index: position as u32,
        });

        return Ok(dst);
    }

    let offset = generate_expr(state, index, None)?;
    let offset_type = state.operand_type(offset);
    if !state.types.is_int(offset_type) {
        return Err(Error::new(index.span, "index must be an integer"));
    }

    // Decay the array reference to an element pointer and offset it.
    let element_pointer = state.types.pointer_to(element, mutable);
    let decayed = state.typed_register(element_pointer);
    state.emit(Instruction::Cast {
        dst: decayed,
        src: Operand::Register(base),
        type_id: element_pointer,
    });

    let dst = state.typed_register(element_pointer);
    state.emit(Instruction::Binary {
        op: BinaryOp::Add,
        dst,
        lhs: Operand::Register(decayed),
        rhs: offset,
    });

    Ok(dst)
}

fn into_register(state: &mut State, operand: Operand) -> Register {
    match operand {
        Operand::Register(register) => register,
        Operand::Immediate { type_id, .. } => {
            let dst = state.typed_register(type_id);
            state.emit(Instruction::Move { dst, src: operand });
            dst
        }
        Operand::None => panic!("expected a value-producing operand"),
    }
}

// ----------------------------------------------------------------------
// Reads
// ----------------------------------------------------------------------

fn generate_attribute_read(
    state: &mut State,
    value: &Expr,
    field: &Ident,
    dst: Option<Register>,
) -> Result<Operand> {
    // Without an addressable base, extract straight from the value.
    let addressable = matches!(
        value.kind,
        ExprKind::Identifier(_)
            | ExprKind::Attribute { .. }
            | ExprKind::Index { .. }
            | ExprKind::Unary {
                op: UnaryOp::Deref,
                ..
            }
    ) || infer_expr_type(state, value)
        .map(|type_id| state.types.underlying_type(type_id).is_some())
        .unwrap_or(false);

    if !addressable {
        let operand = generate_expr(state, value, None)?;
        let type_id = state.operand_type(operand);
        let structure = state.struct_for_type(type_id).ok_or_else(|| {
            Error::new(
                value.span,
                format!("'{}' has no fields", state.types.str(type_id)),
            )
        })?;

        let record = lookup_field(state, value.span, structure, field)?;
        let dst = dst.unwrap_or_else(|| state.allocate_register());
        state.set_register_type(dst, record.type_id);
        state.emit(Instruction::GetMember {
            dst,
            value: operand,
            index: record.index,
        });

        return Ok(Operand::Register(dst));
    }

    let (base, structure) = generate_aggregate_base(state, value, false)?;
    let record = lookup_field(state, value.span, structure, field)?;

    let reference = state.types.reference_to(record.type_id, false);
    let address = state.typed_register(reference);
    state.emit(Instruction::GetMemberRef {
        dst: address,
        value: base,
        index: record.index,
    });

    let dst = dst.unwrap_or_else(|| state.allocate_register());
    state.set_register_type(dst, record.type_id);
    state.emit(Instruction::Read { dst, src: address });

    Ok(Operand::Register(dst))
}

fn generate_index_read(
    state: &mut State,
    span: Span,
    value: &Expr,
    index: &Expr,
) -> Result<Operand> {
    let address = generate_element_address(state, span, value, index, false)?;
    let element = state
        .types
        .underlying_type(state.register_type(address))
        .unwrap();

    let dst = state.typed_register(element);
    state.emit(Instruction::Read { dst, src: address });

    Ok(Operand::Register(dst))
}

// ----------------------------------------------------------------------
// Literals
// ----------------------------------------------------------------------

fn generate_array_literal(
    state: &mut State,
    span: Span,
    elements: &[Expr],
    dst: Option<Register>,
) -> Result<Operand> {
    if elements.is_empty() {
        return Err(Error::new(span, "cannot infer the type of an empty array"));
    }

    let mut operands = Vec::with_capacity(elements.len());
    for element in elements {
        operands.push((generate_expr(state, element, None)?, element.span));
    }

    // Every element must unify with the first one's type; safely castable
    // mismatches get an explicit cast.
    let element_type = state.operand_type(operands[0].0);
    let mut unified = Vec::with_capacity(operands.len());
    for (operand, span) in operands {
        unified.push(state.type_check_and_cast(span, operand, element_type, "array element")?);
    }

    let array_type = state.types.array_of(element_type, unified.len());
    let dst = dst.unwrap_or_else(|| state.allocate_register());
    state.set_register_type(dst, array_type);
    state.emit(Instruction::NewArray {
        dst,
        elements: unified,
    });

    Ok(Operand::Register(dst))
}

fn generate_tuple_literal(
    state: &mut State,
    elements: &[Expr],
    dst: Option<Register>,
) -> Result<Operand> {
    let mut operands = Vec::with_capacity(elements.len());
    let mut types = Vec::with_capacity(elements.len());

    for element in elements {
        let operand = generate_expr(state, element, None)?;
        types.push(state.operand_type(operand));
        operands.push(operand);
    }

    let tuple_type = state.types.tuple_of(types);
    let dst = dst.unwrap_or_else(|| state.allocate_register());
    state.set_register_type(dst, tuple_type);
    state.emit(Instruction::Construct {
        dst,
        type_id: tuple_type,
        arguments: operands,
    });

    Ok(Operand::Register(dst))
}

// ----------------------------------------------------------------------
// Operators
// ----------------------------------------------------------------------

fn generate_unary(state: &mut State, span: Span, op: UnaryOp, value: &Expr) -> Result<Operand> {
    match op {
        UnaryOp::Ref { mutable } => {
            let register = generate_reference(state, value, mutable)?;
            Ok(Operand::Register(register))
        }
        UnaryOp::Deref => {
            let operand = generate_expr(state, value, None)?;
            let pointer = into_register(state, operand);
            let type_id = state.register_type(pointer);

            let Some(pointee) = state.types.underlying_type(type_id) else {
                return Err(Error::new(
                    span,
                    format!("cannot dereference '{}'", state.types.str(type_id)),
                ));
            };
            if state.types.is_void(pointee) {
                return Err(Error::new(span, "cannot dereference a void pointer"));
            }

            let dst = state.typed_register(pointee);
            state.emit(Instruction::Read { dst, src: pointer });
            Ok(Operand::Register(dst))
        }
        UnaryOp::Neg => {
            let operand = generate_expr(state, value, None)?;
            let type_id = state.operand_type(operand);
            if !state.types.kind(type_id).is_numeric() {
                return Err(Error::new(
                    span,
                    format!("cannot negate '{}'", state.types.str(type_id)),
                ));
            }

            let zero = Operand::Immediate { value: 0, type_id };
            let dst = state.typed_register(type_id);
            state.emit(Instruction::Binary {
                op: BinaryOp::Sub,
                dst,
                lhs: zero,
                rhs: operand,
            });

            Ok(Operand::Register(dst))
        }
        UnaryOp::Not => {
            let operand = generate_expr(state, value, None)?;
            let type_id = state.operand_type(operand);
            if !state.types.is_bool(type_id) {
                return Err(Error::new(
                    span,
                    format!("expected 'bool' but found '{}'", state.types.str(type_id)),
                ));
            }

            let dst = state.typed_register(type_id);
            state.emit(Instruction::Binary {
                op: BinaryOp::Xor,
                dst,
                lhs: operand,
                rhs: Operand::Immediate { value: 1, type_id },
            });

            Ok(Operand::Register(dst))
        }
        UnaryOp::BinaryNot => {
            let operand = generate_expr(state, value, None)?;
            let type_id = state.operand_type(operand);
            if !state.types.is_int(type_id) {
                return Err(Error::new(
                    span,
                    format!("cannot apply '~' to '{}'", state.types.str(type_id)),
                ));
            }

            let dst = state.typed_register(type_id);
            state.emit(Instruction::Binary {
                op: BinaryOp::Xor,
                dst,
                lhs: operand,
                rhs: Operand::Immediate {
                    value: u64::MAX,
                    type_id,
                },
            });

            Ok(Operand::Register(dst))
        }
    }
}

fn generate_binary(
    state: &mut State,
    span: Span,
    op: BinaryOp,
    lhs: &Expr,
    rhs: &Expr,
) -> Result<Operand> {
    let left = generate_expr(state, lhs, None)?;
    let right = generate_expr(state, rhs, None)?;

    let left_type = state.operand_type(left);
    let right_type = state.operand_type(right);

    if op.is_logical() {
        let i1 = state.types.i1();
        let left = state.type_check_and_cast(lhs.span, left, i1, "operand")?;
        let right = state.type_check_and_cast(rhs.span, right, i1, "operand")?;

        let dst = state.typed_register(i1);
        state.emit(Instruction::Binary {
            op,
            dst,
            lhs: left,
            rhs: right,
        });
        return Ok(Operand::Register(dst));
    }

    // Pointer arithmetic keeps the pointer's type.
    if state.types.is_pointer(left_type) && matches!(op, BinaryOp::Add | BinaryOp::Sub) {
        if !state.types.is_int(right_type) {
            return Err(Error::new(rhs.span, "pointer offsets must be integers"));
        }

        let dst = state.typed_register(left_type);
        state.emit(Instruction::Binary {
            op,
            dst,
            lhs: left,
            rhs: right,
        });
        return Ok(Operand::Register(dst));
    }

    // Unify the operand types, in either direction.
    let (left, right, common) = if left_type == right_type {
        (left, right, left_type)
    } else if state.types.can_safely_cast(right_type, left_type) {
        let right = state.type_check_and_cast(rhs.span, right, left_type, "operand")?;
        (left, right, left_type)
    } else if state.types.can_safely_cast(left_type, right_type) {
        let left = state.type_check_and_cast(lhs.span, left, right_type, "operand")?;
        (left, right, right_type)
    } else {
        return Err(Error::new(
            span,
            format!(
                "operator '{}' cannot combine '{}' and '{}'",
                op.str(),
                state.types.str(left_type),
                state.types.str(right_type)
            ),
        ));
    };

    if !state.types.kind(common).is_numeric() && !op.is_comparison() {
        return Err(Error::new(
            span,
            format!(
                "operator '{}' is not defined for '{}'",
                op.str(),
                state.types.str(common)
            ),
        ));
    }

    let result_type = if op.is_comparison() {
        state.types.i1()
    } else {
        common
    };

    let dst = state.typed_register(result_type);
    state.emit(Instruction::Binary {
        op,
        dst,
        lhs: left,
        rhs: right,
    });

    Ok(Operand::Register(dst))
}

fn generate_cast(
    state: &mut State,
    span: Span,
    value: &Expr,
    ty: &crate::parser::ast::TypeExpr,
) -> Result<Operand> {
    let operand = generate_expr(state, value, None)?;
    let source = state.operand_type(operand);
    let target = evaluate_type(state, ty)?;

    if source == target {
        return Ok(operand);
    }

    if !state.types.can_explicitly_cast(source, target) {
        return Err(Error::new(
            span,
            format!(
                "illegal cast from '{}' to '{}'",
                state.types.str(source),
                state.types.str(target)
            ),
        ));
    }

    let dst = state.typed_register(target);
    state.emit(Instruction::Cast {
        dst,
        src: operand,
        type_id: target,
    });

    Ok(Operand::Register(dst))
}

// ----------------------------------------------------------------------
// Assignment
// ----------------------------------------------------------------------

fn generate_assignment(state: &mut State, target: &Expr, value: &Expr) -> Result<()> {
    match &target.kind {
        ExprKind::Identifier(name) => {
            let symbol = state.resolve(name).cloned().ok_or_else(|| {
                Error::new(target.span, format!("undefined identifier '{name}'"))
            })?;

            let variable = match symbol {
                Symbol::Variable(variable) => variable,
                other => {
                    return Err(Error::new(
                        target.span,
                        format!("cannot assign to a {}", other.kind_name()),
                    ));
                }
            };

            if variable.is_constant() {
                return Err(Error::new(
                    target.span,
                    format!("cannot assign to constant '{}'", variable.name),
                ));
            }

            // Assigning to a reference variable writes through it.
            if variable.flags.contains(VariableFlags::REFERENCE) {
                if !state.types.is_mutable(variable.type_id) {
                    return Err(Error::new(
                        target.span,
                        format!("cannot assign through immutable reference '{}'", variable.name),
                    ));
                }

                let referent = state.types.underlying_type(variable.type_id).unwrap();
                let pointer = state.typed_register(variable.type_id);
                state.emit(Instruction::GetLocal {
                    dst: pointer,
                    index: variable.index,
                });

                let operand = generate_expr(state, value, None)?;
                let operand =
                    state.type_check_and_cast(value.span, operand, referent, "assignment")?;
                state.emit(Instruction::Write {
                    dst: pointer,
                    src: operand,
                });

                mark_variable(state, name, VariableFlags::USED);
                return Ok(());
            }

            if !variable.is_mutable() {
                return Err(Error::new(
                    target.span,
                    format!("cannot assign to immutable variable '{}'", variable.name),
                ));
            }

            let operand = generate_expr(state, value, None)?;
            let operand =
                state.type_check_and_cast(value.span, operand, variable.type_id, "assignment")?;

            if variable.is_global() {
                state.emit(Instruction::SetGlobal {
                    index: variable.index,
                    src: operand,
                });
            } else {
                state.emit(Instruction::SetLocal {
                    index: variable.index,
                    src: operand,
                });
            }

            mark_variable(state, name, VariableFlags::MUTATED);
            Ok(())
        }
        ExprKind::Attribute {
            value: base,
            field,
        } => {
            let (reference, structure) = generate_aggregate_base(state, base, true)?;
            let record = lookup_field(state, base.span, structure, field)?;

            if record.is_readonly() {
                let inside = state.self_type == Some(state.structure(structure).type_id);
                if !inside {
                    return Err(Error::new(
                        target.span,
                        format!("field '{}' is readonly", record.name),
                    ));
                }
            }

            let operand = generate_expr(state, value, None)?;
            let operand =
                state.type_check_and_cast(value.span, operand, record.type_id, "assignment")?;

            state.emit(Instruction::SetMember {
                value: reference,
                index: record.index,
                src: operand,
            });

            Ok(())
        }
        ExprKind::Index { value: base, index } => {
            let address = generate_element_address(state, target.span, base, index, true)?;
            let element = state
                .types
                .underlying_type(state.register_type(address))
                .unwrap();

            let operand = generate_expr(state, value, None)?;
            let operand = state.type_check_and_cast(value.span, operand, element, "assignment")?;

            state.emit(Instruction::Write {
                dst: address,
                src: operand,
            });

            Ok(())
        }
        ExprKind::Unary {
            op: UnaryOp::Deref,
            value: pointer,
        } => {
            let operand = generate_expr(state, pointer, None)?;
            let register = into_register(state, operand);
            let type_id = state.register_type(register);

            let Some(pointee) = state.types.underlying_type(type_id) else {
                return Err(Error::new(
                    pointer.span,
                    format!("cannot dereference '{}'", state.types.str(type_id)),
                ));
            };
            if !state.types.is_mutable(type_id) {
                return Err(Error::new(
                    target.span,
                    format!("cannot write through '{}'", state.types.str(type_id)),
                ));
            }

            let operand = generate_expr(state, value, None)?;
            let operand = state.type_check_and_cast(value.span, operand, pointee, "assignment")?;

            state.emit(Instruction::Write {
                dst: register,
                src: operand,
            });

            Ok(())
        }
        _ => Err(Error::new(target.span, "expression is not assignable")),
    }
}

// ----------------------------------------------------------------------
// Control flow
// ----------------------------------------------------------------------

fn generate_condition(state: &mut State, condition: &Expr) -> Result<Operand> {
    let operand = generate_expr(state, condition, None)?;
    let type_id = state.operand_type(operand);

    if !state.types.is_bool(type_id) {
        return Err(Error::new(
            condition.span,
            format!("expected 'bool' but found '{}'", state.types.str(type_id)),
        ));
    }

    Ok(operand)
}

fn generate_block_body(state: &mut State, body: &[Expr]) -> Result<()> {
    let scope = state
        .scopes
        .create("", ScopeKind::Anonymous, Some(state.scope()));
    let previous = state.scope();
    state.set_current_scope(scope);

    let mut result = Ok(());
    for expr in body {
        if state.generator.is_terminated() {
            break;
        }

        if let Err(error) = generate_expr(state, expr, None) {
            result = Err(error);
            break;
        }
    }

    state.set_current_scope(previous);
    result
}

fn generate_if(
    state: &mut State,
    condition: &Expr,
    then_block: &[Expr],
    else_block: Option<&[Expr]>,
) -> Result<()> {
    let operand = generate_condition(state, condition)?;

    let then_target = state.append_block("then");
    let merge = state.append_block("merge");
    let else_target = match else_block {
        Some(_) => state.append_block("else"),
        None => merge,
    };

    state.emit(Instruction::JumpIf {
        condition: operand,
        true_target: then_target,
        false_target: else_target,
    });

    state.switch_to(Some(then_target));
    generate_block_body(state, then_block)?;
    if !state.generator.is_terminated() {
        state.emit(Instruction::Jump { target: merge });
    }

    if let Some(else_block) = else_block {
        state.switch_to(Some(else_target));
        generate_block_body(state, else_block)?;
        if !state.generator.is_terminated() {
            state.emit(Instruction::Jump { target: merge });
        }
    }

    state.switch_to(Some(merge));
    Ok(())
}

fn generate_ternary(
    state: &mut State,
    condition: &Expr,
    true_value: &Expr,
    false_value: &Expr,
) -> Result<Operand> {
    let function = state.current_function.ok_or_else(|| {
        Error::new(condition.span, "'?:' is only allowed inside a function")
    })?;

    let operand = generate_condition(state, condition)?;

    let then_target = state.append_block("ternary.then");
    let else_target = state.append_block("ternary.else");
    let merge = state.append_block("ternary.merge");

    state.emit(Instruction::JumpIf {
        condition: operand,
        true_target: then_target,
        false_target: else_target,
    });

    // Both branches meet through a stack slot; the frame allocation in the
    // entry block picks the slot up like any other local.
    state.switch_to(Some(then_target));
    let first = generate_expr(state, true_value, None)?;
    let result_type = state.operand_type(first);
    let slot = state.function_mut(function).allocate_local(result_type);
    state.emit(Instruction::SetLocal {
        index: slot,
        src: first,
    });
    state.emit(Instruction::Jump { target: merge });

    state.switch_to(Some(else_target));
    let other = generate_expr(state, false_value, None)?;
    let other = state.type_check_and_cast(false_value.span, other, result_type, "ternary branch")?;
    state.emit(Instruction::SetLocal {
        index: slot,
        src: other,
    });
    state.emit(Instruction::Jump { target: merge });

    state.switch_to(Some(merge));
    let result = state.typed_register(result_type);
    state.emit(Instruction::GetLocal {
        dst: result,
        index: slot,
    });

    Ok(Operand::Register(result))
}

fn generate_while(state: &mut State, condition: &Expr, body: &[Expr]) -> Result<()> {
    let function = state.current_function.ok_or_else(|| {
        Error::new(condition.span, "'while' is only allowed inside a function")
    })?;

    let header = state.append_block("loop.header");
    let body_target = state.append_block("loop.body");
    let end = state.append_block("loop.end");

    state.emit(Instruction::Jump { target: header });

    state.switch_to(Some(header));
    let operand = generate_condition(state, condition)?;
    state.emit(Instruction::JumpIf {
        condition: operand,
        true_target: body_target,
        false_target: end,
    });

    let previous_loop = state.function(function).current_loop;
    state.function_mut(function).current_loop = Some(crate::language::functions::Loop {
        start: header,
        end,
    });

    state.switch_to(Some(body_target));
    let result = generate_block_body(state, body);
    if result.is_ok() && !state.generator.is_terminated() {
        state.emit(Instruction::Jump { target: header });
    }

    state.function_mut(function).current_loop = previous_loop;
    state.switch_to(Some(end));

    result
}

fn generate_return(state: &mut State, span: Span, value: Option<&Expr>) -> Result<()> {
    let Some(function) = state.current_function else {
        return Err(Error::new(span, "'return' outside of a function"));
    };

    let return_type = state.types.function_return_type(state.function(function).type_id);

    match value {
        Some(value) => {
            if state.types.is_void(return_type) {
                return Err(Error::new(
                    value.span,
                    format!("'{}' does not return a value", state.function(function).name),
                ));
            }

            let operand = generate_expr(state, value, None)?;
            let operand =
                state.type_check_and_cast(value.span, operand, return_type, "return value")?;
            state.emit(Instruction::Return {
                value: Some(operand),
            });
        }
        None => {
            if !state.types.is_void(return_type) {
                return Err(Error::new(
                    span,
                    format!(
                        "'{}' must return '{}'",
                        state.function(function).name,
                        state.types.str(return_type)
                    ),
                ));
            }

            state.emit(Instruction::Return { value: None });
        }
    }

    Ok(())
}

/// Lower a match to an equality chain. Arms are tested in source order,
/// falling through to the `_` arm; when every arm produces a value the
/// match is an expression and all arms must agree on the result type.
fn generate_match(
    state: &mut State,
    span: Span,
    value: &Expr,
    arms: &[MatchArm],
) -> Result<Operand> {
    if arms.is_empty() {
        return Err(Error::new(span, "match must have at least one arm"));
    }

    let scrutinee = generate_expr(state, value, None)?;
    let scrutinee_type = state.operand_type(scrutinee);

    let default = arms.iter().find(|arm| arm.pattern.is_none());
    let cases: Vec<&MatchArm> = arms.iter().filter(|arm| arm.pattern.is_some()).collect();

    let function = state
        .current_function
        .ok_or_else(|| Error::new(span, "'match' is only allowed inside a function"))?;

    let merge = state.append_block("match.merge");
    let default_target = match default {
        Some(_) => state.append_block("match.default"),
        None => merge,
    };

    // Valued matches route every arm through one stack slot, typed by the
    // first arm.
    let mut result_slot: Option<(u32, TypeId)> = None;
    let mut valued = true;

    let mut arm_targets = Vec::with_capacity(cases.len());
    for (position, arm) in cases.iter().enumerate() {
        let pattern = arm.pattern.as_ref().unwrap();

        let test = generate_expr(state, pattern, None)?;
        let test = state.type_check_and_cast(pattern.span, test, scrutinee_type, "match pattern")?;

        let i1 = state.types.i1();
        let comparison = state.typed_register(i1);
        state.emit(Instruction::Binary {
            op: BinaryOp::Eq,
            dst: comparison,
            lhs: scrutinee,
            rhs: test,
        });

        let arm_target = state.append_block("match.arm");
        let next = if position == cases.len() - 1 {
            default_target
        } else {
            state.append_block("match.test")
        };

        state.emit(Instruction::JumpIf {
            condition: Operand::Register(comparison),
            true_target: arm_target,
            false_target: next,
        });

        arm_targets.push((arm_target, *arm));
        if next != default_target {
            state.switch_to(Some(next));
        }
    }

    let lower_arm = |state: &mut State,
                     arm: &MatchArm,
                     valued: &mut bool,
                     result_slot: &mut Option<(u32, TypeId)>|
     -> Result<()> {
        let operand = generate_expr(state, &arm.body, None)?;

        if operand.is_none() {
            *valued = false;
        } else if *valued {
            let operand = match *result_slot {
                Some((_, expected)) => {
                    state.type_check_and_cast(arm.span, operand, expected, "match arm")?
                }
                None => {
                    let type_id = state.operand_type(operand);
                    let slot = state.function_mut(function).allocate_local(type_id);
                    *result_slot = Some((slot, type_id));
                    operand
                }
            };

            let (slot, _) = result_slot.unwrap();
            state.emit(Instruction::SetLocal {
                index: slot,
                src: operand,
            });
        }

        if !state.generator.is_terminated() {
            state.emit(Instruction::Jump { target: merge });
        }

        Ok(())
    };

    for (target, arm) in arm_targets {
        state.switch_to(Some(target));
        lower_arm(state, arm, &mut valued, &mut result_slot)?;
    }

    if let Some(default) = default {
        state.switch_to(Some(default_target));
        lower_arm(state, default, &mut valued, &mut result_slot)?;
    }

    state.switch_to(Some(merge));

    match result_slot {
        Some((slot, type_id)) if valued && default.is_some() => {
            let result = state.typed_register(type_id);
            state.emit(Instruction::GetLocal {
                dst: result,
                index: slot,
            });

            Ok(Operand::Register(result))
        }
        _ => Ok(Operand::None),
    }
}

// ----------------------------------------------------------------------
// Calls
// ----------------------------------------------------------------------

fn generate_call(
    state: &mut State,
    span: Span,
    callee: &Expr,
    args: &[Expr],
    kwargs: &[(Ident, Expr)],
    dst: Option<Register>,
) -> Result<Operand> {
    match &callee.kind {
        ExprKind::Identifier(name) => {
            let symbol = state.resolve(name).cloned().ok_or_else(|| {
                Error::new(callee.span, format!("undefined identifier '{name}'"))
            })?;

            generate_symbol_call(state, span, symbol, None, args, kwargs, dst)
        }
        ExprKind::Path(path) => {
            let symbol = resolve_path_symbol(state, path)?;
            generate_symbol_call(state, span, symbol, None, args, kwargs, dst)
        }
        ExprKind::Attribute { value, field } => {
            generate_method_call(state, span, value, field, args, kwargs, dst)
        }
        _ => {
            // Anything else must evaluate to a function value.
            let operand = generate_expr(state, callee, None)?;
            let type_id = state.operand_type(operand);

            if !matches!(state.types.kind(type_id), TypeKind::Function { .. }) {
                return Err(Error::new(
                    callee.span,
                    format!("'{}' is not callable", state.types.str(type_id)),
                ));
            }

            generate_indirect_call(state, span, operand, type_id, None, args, kwargs, dst)
        }
    }
}

fn generate_symbol_call(
    state: &mut State,
    span: Span,
    symbol: Symbol,
    self_operand: Option<Operand>,
    args: &[Expr],
    kwargs: &[(Ident, Expr)],
    dst: Option<Register>,
) -> Result<Operand> {
    match symbol {
        Symbol::Function(id) => {
            if state.function(id).is_generic() {
                if !kwargs.is_empty() {
                    return Err(Error::new(
                        span,
                        "keyword arguments are not supported on generic functions",
                    ));
                }

                // Arguments are lowered first so their types can drive the
                // specialization.
                let mut operands = Vec::with_capacity(args.len());
                let mut types = Vec::with_capacity(args.len());
                for arg in args {
                    let operand = generate_expr(state, arg, None)?;
                    types.push(state.operand_type(operand));
                    operands.push((operand, arg.span));
                }

                let specialized = specialize_function(state, id, &types, span)?;
                return generate_direct_call(state, specialized, operands, dst);
            }

            let operands = place_arguments(state, span, id, self_operand, args, kwargs)?;
            generate_direct_call(state, id, operands, dst)
        }
        Symbol::Struct(id) => generate_construct(state, span, id, args, kwargs, dst),
        Symbol::Variable(variable) => {
            if !matches!(state.types.kind(variable.type_id), TypeKind::Function { .. }) {
                return Err(Error::new(
                    span,
                    format!("'{}' is not callable", variable.name),
                ));
            }

            let function = materialize_symbol(state, span, Symbol::Variable(variable.clone()), None)?;
            generate_indirect_call(
                state,
                span,
                function,
                variable.type_id,
                self_operand,
                args,
                kwargs,
                dst,
            )
        }
        other => Err(Error::new(
            span,
            format!("a {} cannot be called", other.kind_name()),
        )),
    }
}

/// Positional arguments fill non-keyword parameter slots in order; keyword
/// arguments land at their recorded parameter index. Variadic extras are
/// collected after the declared parameters.
fn place_arguments(
    state: &mut State,
    span: Span,
    function: FunctionId,
    self_operand: Option<Operand>,
    args: &[Expr],
    kwargs: &[(Ident, Expr)],
) -> Result<Vec<(Operand, Span)>> {
    let parameters = state.function(function).parameters.clone();
    let var_arg = match state.types.kind(state.function(function).type_id) {
        TypeKind::Function { var_arg, .. } => *var_arg,
        _ => false,
    };

    let mut slots: Vec<Option<(Operand, Span)>> = vec![None; parameters.len()];
    let mut extras: Vec<(Operand, Span)> = Vec::new();

    if let Some(self_operand) = self_operand {
        if parameters.first().map(|parameter| parameter.is_self()) != Some(true) {
            return Err(Error::new(
                span,
                format!("'{}' is not a method", state.function(function).name),
            ));
        }

        slots[0] = Some((self_operand, span));
    }

    let positional_slots: Vec<usize> = parameters
        .iter()
        .enumerate()
        .filter(|(index, parameter)| {
            !parameter.is_keyword() && !(self_operand.is_some() && *index == 0)
        })
        .map(|(index, _)| index)
        .collect();

    let mut next_positional = 0usize;
    for arg in args {
        let operand = generate_expr(state, arg, None)?;

        if next_positional < positional_slots.len() {
            slots[positional_slots[next_positional]] = Some((operand, arg.span));
            next_positional += 1;
        } else if var_arg {
            extras.push((operand, arg.span));
        } else {
            return Err(Error::new(
                arg.span,
                format!(
                    "'{}' expects {} argument(s)",
                    state.function(function).name,
                    positional_slots.len()
                ),
            ));
        }
    }

    for (name, value) in kwargs {
        let Some(index) = parameters
            .iter()
            .position(|parameter| parameter.name == name.name)
        else {
            return Err(Error::new(
                name.span,
                format!(
                    "'{}' has no parameter named '{}'",
                    state.function(function).name,
                    name.name
                ),
            ));
        };

        if slots[index].is_some() {
            return Err(Error::new(
                name.span,
                format!("argument '{}' was provided twice", name.name),
            ));
        }

        let operand = generate_expr(state, value, None)?;
        slots[index] = Some((operand, value.span));
    }

    let mut placed = Vec::with_capacity(parameters.len() + extras.len());
    for (slot, parameter) in slots.into_iter().zip(parameters.iter()) {
        let Some(entry) = slot else {
            return Err(Error::new(
                span,
                format!(
                    "missing argument '{}' in call to '{}'",
                    parameter.name,
                    state.function(function).name
                ),
            ));
        };

        placed.push(entry);
    }
    placed.extend(extras);

    Ok(placed)
}

fn generate_direct_call(
    state: &mut State,
    function: FunctionId,
    arguments: Vec<(Operand, Span)>,
    dst: Option<Register>,
) -> Result<Operand> {
    let type_id = state.function(function).type_id;
    let parameters = state.function(function).parameters.clone();

    let mut operands = Vec::with_capacity(arguments.len());
    for (index, (operand, arg_span)) in arguments.into_iter().enumerate() {
        // Variadic extras are passed through unchecked.
        let operand = match parameters.get(index) {
            Some(parameter) => {
                state.type_check_and_cast(arg_span, operand, parameter.type_id, "argument")?
            }
            None => operand,
        };

        operands.push(operand);
    }

    let callee = state.typed_register(type_id);
    state.emit(Instruction::GetFunction {
        dst: callee,
        function,
    });

    let return_type = state.types.function_return_type(type_id);
    let result = dst.unwrap_or_else(|| state.allocate_register());

    if !state.types.is_void(return_type) {
        state.set_register_type(result, return_type);
    }

    state.emit(Instruction::Call {
        dst: result,
        function: Operand::Register(callee),
        function_type: type_id,
        arguments: operands,
    });

    if state.types.is_void(return_type) {
        Ok(Operand::None)
    } else {
        Ok(Operand::Register(result))
    }
}

#[allow(clippy::too_many_arguments)]
fn generate_indirect_call(
    state: &mut State,
    span: Span,
    function: Operand,
    type_id: TypeId,
    self_operand: Option<Operand>,
    args: &[Expr],
    kwargs: &[(Ident, Expr)],
    dst: Option<Register>,
) -> Result<Operand> {
    if !kwargs.is_empty() {
        return Err(Error::new(
            span,
            "keyword arguments require a named function",
        ));
    }

    let TypeKind::Function {
        return_type,
        params,
        var_arg,
    } = state.types.kind(type_id).clone()
    else {
        unreachable!()
    };

    let mut operands = Vec::new();
    if let Some(self_operand) = self_operand {
        operands.push(self_operand);
    }

    for arg in args {
        let operand = generate_expr(state, arg, None)?;
        let position = operands.len();

        let operand = match params.get(position) {
            Some(&parameter) => {
                state.type_check_and_cast(arg.span, operand, parameter, "argument")?
            }
            None if var_arg => operand,
            None => {
                return Err(Error::new(
                    arg.span,
                    format!("function expects {} argument(s)", params.len()),
                ));
            }
        };

        operands.push(operand);
    }

    if operands.len() < params.len() {
        return Err(Error::new(
            span,
            format!(
                "function expects {} argument(s) but {} were provided",
                params.len(),
                operands.len()
            ),
        ));
    }

    let result = dst.unwrap_or_else(|| state.allocate_register());
    if !state.types.is_void(return_type) {
        state.set_register_type(result, return_type);
    }

    state.emit(Instruction::Call {
        dst: result,
        function,
        function_type: type_id,
        arguments: operands,
    });

    if state.types.is_void(return_type) {
        Ok(Operand::None)
    } else {
        Ok(Operand::Register(result))
    }
}

fn generate_method_call(
    state: &mut State,
    span: Span,
    base: &Expr,
    field: &Ident,
    args: &[Expr],
    kwargs: &[(Ident, Expr)],
    dst: Option<Register>,
) -> Result<Operand> {
    let base_type = infer_expr_type(state, base);

    // A field holding a function value is an indirect call, not a method.
    if let Some(type_id) = base_type {
        let stripped = state.types.underlying_type(type_id).unwrap_or(type_id);
        if let Some(structure) = state.struct_for_type(stripped) {
            if let Some(record) = state.structure(structure).find_field(&field.name) {
                if matches!(state.types.kind(record.type_id), TypeKind::Function { .. }) {
                    let function_type = record.type_id;
                    let function = generate_attribute_read(state, base, field, None)?;
                    return generate_indirect_call(
                        state, span, function, function_type, None, args, kwargs, dst,
                    );
                }
            }
        }
    }

    let method = resolve_method(state, span, base, field)?;
    let (function, self_operand) = method;

    let operands = place_arguments(state, span, function, Some(self_operand), args, kwargs)?;
    generate_direct_call(state, function, operands, dst)
}

/// Find `field` as a method of `base`'s type, taking `self` as a reference
/// whose mutability matches the method's declaration.
fn resolve_method(
    state: &mut State,
    span: Span,
    base: &Expr,
    field: &Ident,
) -> Result<(FunctionId, Operand)> {
    let base_type = infer_expr_type(state, base).ok_or_else(|| {
        Error::new(
            base.span,
            "cannot determine the receiver type of this method call",
        )
    })?;

    let receiver_type = state.types.underlying_type(base_type).unwrap_or(base_type);

    // Struct scope first, then impls (elaborating generic ones on demand).
    let mut function = None;
    if let Some(structure) = state.struct_for_type(receiver_type) {
        let scope = state.structure(structure).scope;
        if let Some(Symbol::Function(id)) = state.scopes.resolve_local(scope, &field.name) {
            function = Some(*id);
        }
    }

    if function.is_none() {
        if let Some(scope) = method_scope_for(state, receiver_type)? {
            if let Some(Symbol::Function(id)) = state.scopes.resolve_local(scope, &field.name) {
                function = Some(*id);
            }
        }
    }

    let Some(function) = function else {
        return Err(Error::new(
            span,
            format!(
                "'{}' has no method named '{}'",
                state.types.str(receiver_type),
                field.name
            ),
        ));
    };

    let wants_mutable = state
        .function(function)
        .parameters
        .first()
        .map(|parameter| parameter.is_self() && parameter.is_mutable())
        .unwrap_or(false);

    // A pointer-typed receiver is passed by value; everything else is
    // borrowed in place.
    let self_operand = if state.types.underlying_type(base_type).is_some() {
        generate_expr(state, base, None)?
    } else {
        Operand::Register(generate_reference(state, base, wants_mutable)?)
    };

    Ok((function, self_operand))
}

// ----------------------------------------------------------------------
// Struct construction
// ----------------------------------------------------------------------

/// `Point(x: 1, y: 2)` or positionally `Point(1, 2)`.
fn generate_construct(
    state: &mut State,
    span: Span,
    structure: StructId,
    args: &[Expr],
    kwargs: &[(Ident, Expr)],
    dst: Option<Register>,
) -> Result<Operand> {
    let record = state.structure(structure);
    if record.opaque {
        return Err(Error::new(
            span,
            format!("cannot construct opaque struct '{}'", record.name),
        ));
    }

    let fields = record.fields.clone();
    let type_id = record.type_id;
    let name = record.name.clone();

    if args.len() + kwargs.len() != fields.len() {
        return Err(Error::new(
            span,
            format!(
                "'{name}' has {} field(s) but {} value(s) were provided",
                fields.len(),
                args.len() + kwargs.len()
            ),
        ));
    }

    let mut slots: Vec<Option<(Operand, Span)>> = vec![None; fields.len()];

    for (index, arg) in args.iter().enumerate() {
        let operand = generate_expr(state, arg, None)?;
        slots[index] = Some((operand, arg.span));
    }

    for (field_name, value) in kwargs {
        let Some(field) = fields.iter().find(|field| field.name == field_name.name) else {
            return Err(Error::new(
                field_name.span,
                format!("'{name}' has no field named '{}'", field_name.name),
            ));
        };

        if slots[field.index as usize].is_some() {
            return Err(Error::new(
                field_name.span,
                format!("field '{}' was provided twice", field_name.name),
            ));
        }

        let operand = generate_expr(state, value, None)?;
        slots[field.index as usize] = Some((operand, value.span));
    }

    let mut operands = Vec::with_capacity(fields.len());
    for (slot, field) in slots.into_iter().zip(fields.iter()) {
        let Some((operand, value_span)) = slot else {
            return Err(Error::new(
                span,
                format!("missing value for field '{}'", field.name),
            ));
        };

        let operand =
            state.type_check_and_cast(value_span, operand, field.type_id, "field value")?;
        operands.push(operand);
    }

    let dst = dst.unwrap_or_else(|| state.allocate_register());
    state.set_register_type(dst, type_id);
    state.emit(Instruction::Construct {
        dst,
        type_id,
        arguments: operands,
    });

    Ok(Operand::Register(dst))
}
