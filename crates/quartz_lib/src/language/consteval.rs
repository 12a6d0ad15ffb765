//! Compile-time constant evaluation.
//!
//! Answers `is_constant_expression` and folds qualifying expressions into
//! pooled [`Constant`](super::constants::Constant)s. Drives array sizes,
//! enum discriminants, `static_assert`, `sizeof`/`offsetof` and global
//! initializers.

use crate::errors::{Error, Result};
use crate::parser::ast::{BinaryOp, Expr, ExprKind, UnaryOp};

use super::constants::{ConstantId, ConstantKind};
use super::state::State;
use super::symbol::Symbol;
use super::types::TypeKind;

pub struct ConstantEvaluator<'a> {
    state: &'a mut State,
}

impl<'a> ConstantEvaluator<'a> {
    pub fn new(state: &'a mut State) -> Self {
        ConstantEvaluator { state }
    }

    pub fn is_constant_expression(&self, expr: &Expr) -> bool {
        match &expr.kind {
            ExprKind::Integer(_)
            | ExprKind::Float(_)
            | ExprKind::String(_)
            | ExprKind::Char(_)
            | ExprKind::Bool(_)
            | ExprKind::Null
            | ExprKind::Sizeof { .. }
            | ExprKind::Offsetof { .. } => true,
            ExprKind::Identifier(name) => self.is_constant_symbol(name),
            ExprKind::Path(path) => {
                matches!(
                    crate::irgen::types::resolve_path_symbol(self.state, path),
                    Ok(Symbol::Variable(variable))
                        if variable.is_constant() && variable.initializer.is_some()
                )
            }
            ExprKind::Unary { op, value } => {
                !matches!(op, UnaryOp::Deref | UnaryOp::Ref { .. })
                    && self.is_constant_expression(value)
            }
            ExprKind::Binary { lhs, rhs, .. } => {
                self.is_constant_expression(lhs) && self.is_constant_expression(rhs)
            }
            ExprKind::Cast { value, .. } => self.is_constant_expression(value),
            ExprKind::Array(elements) | ExprKind::Tuple(elements) => elements
                .iter()
                .all(|element| self.is_constant_expression(element)),
            _ => false,
        }
    }

    fn is_constant_symbol(&self, name: &str) -> bool {
        match self.state.resolve(name) {
            Some(Symbol::Variable(variable)) => {
                variable.is_constant() && variable.initializer.is_some()
            }
            _ => false,
        }
    }

    pub fn evaluate(&mut self, expr: &Expr) -> Result<ConstantId> {
        match &expr.kind {
            ExprKind::Integer(value) => {
                let type_id = if i32::try_from(*value).is_ok() {
                    self.state.types.i32()
                } else {
                    self.state.types.i64()
                };

                Ok(self.state.constants.int(type_id, *value))
            }
            ExprKind::Float(value) => {
                let f64 = self.state.types.f64();
                Ok(self.state.constants.float(f64, *value))
            }
            ExprKind::Bool(value) => {
                let i1 = self.state.types.i1();
                Ok(self.state.constants.int(i1, *value as u64))
            }
            ExprKind::Char(value) => {
                let i8 = self.state.types.i8();
                Ok(self.state.constants.int(i8, *value as u64 & 0xff))
            }
            ExprKind::String(value) => {
                let cstr = self.state.types.cstr();
                Ok(self.state.constants.string(cstr, value.clone()))
            }
            ExprKind::Null => {
                let void = self.state.types.void();
                let pointer = self.state.types.pointer_to(void, false);
                Ok(self.state.constants.null(pointer))
            }
            ExprKind::Identifier(name) => {
                let Some(Symbol::Variable(variable)) = self.state.resolve(name) else {
                    return Err(Error::new(
                        expr.span,
                        format!("'{name}' is not a constant"),
                    ));
                };

                variable.initializer.ok_or_else(|| {
                    Error::new(expr.span, format!("'{name}' has no constant initializer"))
                })
            }
            ExprKind::Path(path) => {
                let symbol = crate::irgen::types::resolve_path_symbol(self.state, path)?;
                let Symbol::Variable(variable) = symbol else {
                    return Err(Error::new(expr.span, "path does not name a constant"));
                };

                variable
                    .initializer
                    .ok_or_else(|| Error::new(expr.span, "path does not name a constant"))
            }
            ExprKind::Unary { op, value } => self.evaluate_unary(expr, *op, value),
            ExprKind::Binary { op, lhs, rhs } => {
                let lhs = self.evaluate(lhs)?;
                let rhs = self.evaluate(rhs)?;
                self.evaluate_binary_operation(expr, *op, lhs, rhs)
            }
            ExprKind::Sizeof { ty } => {
                let type_id = crate::irgen::types::evaluate_type(self.state, ty)?;
                let size = self.state.types.size_of(type_id) as u64;
                let u64_type = self.state.types.u64();

                Ok(self.state.constants.int(u64_type, size))
            }
            ExprKind::Offsetof { ty, field } => {
                let type_id = crate::irgen::types::evaluate_type(self.state, ty)?;
                let Some(structure) = self.state.struct_for_type(type_id) else {
                    return Err(Error::new(
                        ty.span,
                        format!("'{}' is not a struct type", self.state.types.str(type_id)),
                    ));
                };

                let Some(index) = self
                    .state
                    .structure(structure)
                    .find_field(&field.name)
                    .map(|field| field.index as usize)
                else {
                    return Err(Error::new(
                        field.span,
                        format!(
                            "'{}' has no field named '{}'",
                            self.state.types.str(type_id),
                            field.name
                        ),
                    ));
                };

                let offset = self.state.types.offset_of(type_id, index) as u64;
                let u64_type = self.state.types.u64();

                Ok(self.state.constants.int(u64_type, offset))
            }
            ExprKind::Cast { value, ty } => {
                let constant = self.evaluate(value)?;
                let target = crate::irgen::types::evaluate_type(self.state, ty)?;

                let source = self.state.constants.get(constant).clone();
                match (&source.kind, self.state.types.kind(target).clone()) {
                    (ConstantKind::Int(bits), TypeKind::Int { bits: width, .. }) => {
                        let truncated = truncate(*bits, width);
                        Ok(self.state.constants.int(target, truncated))
                    }
                    (ConstantKind::Int(bits), TypeKind::Enum { .. }) => {
                        Ok(self.state.constants.int(target, *bits))
                    }
                    (ConstantKind::Float(value), TypeKind::Int { bits: width, .. }) => {
                        Ok(self.state.constants.int(target, truncate(*value as u64, width)))
                    }
                    (ConstantKind::Int(bits), TypeKind::Float | TypeKind::Double) => {
                        Ok(self.state.constants.float(target, *bits as f64))
                    }
                    (ConstantKind::Float(value), TypeKind::Float | TypeKind::Double) => {
                        Ok(self.state.constants.float(target, *value))
                    }
                    _ => Err(Error::new(expr.span, "unsupported constant cast")),
                }
            }
            _ => Err(Error::new(
                expr.span,
                "expression is not constant at compile time",
            )),
        }
    }

    fn evaluate_unary(&mut self, expr: &Expr, op: UnaryOp, value: &Expr) -> Result<ConstantId> {
        let constant = self.evaluate(value)?;
        let source = self.state.constants.get(constant).clone();

        match (op, &source.kind) {
            (UnaryOp::Neg, ConstantKind::Int(bits)) => {
                let negated = (*bits as i64).wrapping_neg() as u64;
                let width = self.int_width(source.type_id);
                Ok(self.state.constants.int(source.type_id, truncate(negated, width)))
            }
            (UnaryOp::Neg, ConstantKind::Float(value)) => {
                Ok(self.state.constants.float(source.type_id, -value))
            }
            (UnaryOp::Not, ConstantKind::Int(bits)) => {
                let i1 = self.state.types.i1();
                Ok(self.state.constants.int(i1, (*bits == 0) as u64))
            }
            (UnaryOp::BinaryNot, ConstantKind::Int(bits)) => {
                let width = self.int_width(source.type_id);
                Ok(self.state.constants.int(source.type_id, truncate(!bits, width)))
            }
            _ => Err(Error::new(expr.span, "unsupported constant operation")),
        }
    }

    fn int_width(&self, type_id: super::types::TypeId) -> u32 {
        match self.state.types.kind(type_id) {
            TypeKind::Int { bits, .. } => *bits,
            TypeKind::Enum { inner, .. } => self.int_width(*inner),
            _ => 64,
        }
    }

    fn evaluate_binary_operation(
        &mut self,
        expr: &Expr,
        op: BinaryOp,
        lhs: ConstantId,
        rhs: ConstantId,
    ) -> Result<ConstantId> {
        let left = self.state.constants.get(lhs).clone();
        let right = self.state.constants.get(rhs).clone();

        match (&left.kind, &right.kind) {
            (ConstantKind::Int(a), ConstantKind::Int(b)) => {
                let signed = self.state.types.is_int_signed(left.type_id);
                let width = self.int_width(left.type_id);

                if matches!(op, BinaryOp::Div | BinaryOp::Mod) && *b == 0 {
                    return Err(Error::new(expr.span, "division by zero in constant expression"));
                }

                if op.is_comparison() || op.is_logical() {
                    let result = if signed {
                        compare_ints(op, *a as i64, *b as i64)
                    } else {
                        compare_ints(op, *a, *b)
                    };

                    let i1 = self.state.types.i1();
                    return Ok(self.state.constants.int(i1, result as u64));
                }

                let value = if signed {
                    arithmetic_ints(op, *a as i64, *b as i64) as u64
                } else {
                    arithmetic_ints(op, *a, *b)
                };

                Ok(self.state.constants.int(left.type_id, truncate(value, width)))
            }
            (ConstantKind::Float(a), ConstantKind::Float(b)) => {
                if op.is_comparison() {
                    let result = match op {
                        BinaryOp::Eq => a == b,
                        BinaryOp::Neq => a != b,
                        BinaryOp::Gt => a > b,
                        BinaryOp::Lt => a < b,
                        BinaryOp::Gte => a >= b,
                        BinaryOp::Lte => a <= b,
                        _ => unreachable!(),
                    };

                    let i1 = self.state.types.i1();
                    return Ok(self.state.constants.int(i1, result as u64));
                }

                let value = match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Div => a / b,
                    BinaryOp::Mod => a % b,
                    _ => {
                        return Err(Error::new(
                            expr.span,
                            format!("operator '{}' is not defined for floats", op.str()),
                        ));
                    }
                };

                Ok(self.state.constants.float(left.type_id, value))
            }
            _ => Err(Error::new(
                expr.span,
                "constant operands have incompatible types",
            )),
        }
    }
}

fn truncate(value: u64, bits: u32) -> u64 {
    if bits >= 64 {
        value
    } else {
        value & ((1u64 << bits) - 1)
    }
}

trait ConstInt: Copy {
    fn arithmetic(op: BinaryOp, a: Self, b: Self) -> u64;
    fn compare(op: BinaryOp, a: Self, b: Self) -> bool;
}

fn arithmetic_ints<T>(op: BinaryOp, a: T, b: T) -> u64
where
    T: ConstInt,
{
    T::arithmetic(op, a, b)
}

fn compare_ints<T>(op: BinaryOp, a: T, b: T) -> bool
where
    T: ConstInt,
{
    T::compare(op, a, b)
}

macro_rules! impl_const_int {
    ($ty:ty) => {
        impl ConstInt for $ty {
            fn arithmetic(op: BinaryOp, a: Self, b: Self) -> u64 {
                let result = match op {
                    BinaryOp::Add => a.wrapping_add(b),
                    BinaryOp::Sub => a.wrapping_sub(b),
                    BinaryOp::Mul => a.wrapping_mul(b),
                    BinaryOp::Div => a.wrapping_div(b),
                    BinaryOp::Mod => a.wrapping_rem(b),
                    BinaryOp::Or => a | b,
                    BinaryOp::And => a & b,
                    BinaryOp::Xor => a ^ b,
                    BinaryOp::Shl => a.wrapping_shl(b as u32),
                    BinaryOp::Shr => a.wrapping_shr(b as u32),
                    _ => unreachable!("not an arithmetic operator"),
                };

                result as u64
            }

            fn compare(op: BinaryOp, a: Self, b: Self) -> bool {
                match op {
                    BinaryOp::Eq => a == b,
                    BinaryOp::Neq => a != b,
                    BinaryOp::Gt => a > b,
                    BinaryOp::Lt => a < b,
                    BinaryOp::Gte => a >= b,
                    BinaryOp::Lte => a <= b,
                    BinaryOp::LogicalAnd => a != 0 && b != 0,
                    BinaryOp::LogicalOr => a != 0 || b != 0,
                    _ => unreachable!("not a comparison operator"),
                }
            }
        }
    };
}

impl_const_int!(u64);
impl_const_int!(i64);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::state::State;
    use crate::lexer::Lexer;
    use crate::parser::Parser;
    use crate::target::Target;

    fn parse_expr(input: &str) -> Expr {
        let tokens = Lexer::new(input, 1).lex().unwrap();
        let mut parser = Parser::new(tokens);
        parser.parse_expr().unwrap()
    }

    fn evaluate(input: &str) -> (State, ConstantId) {
        let mut state = State::new(Target::new("x86_64-unknown-linux-gnu"));
        let expr = parse_expr(input);

        let id = ConstantEvaluator::new(&mut state).evaluate(&expr).unwrap();
        (state, id)
    }

    #[test]
    fn test_integer_arithmetic() {
        let (state, id) = evaluate("2 + 3 * 4");
        assert_eq!(state.constants.get(id).kind, ConstantKind::Int(14));
    }

    #[test]
    fn test_comparison_yields_bool() {
        let (state, id) = evaluate("1 == 2");
        let constant = state.constants.get(id);

        assert_eq!(constant.kind, ConstantKind::Int(0));
        assert_eq!(constant.type_id, state.types.i1());
    }

    #[test]
    fn test_idempotent_interning() {
        let mut state = State::new(Target::new("x86_64-unknown-linux-gnu"));
        let expr = parse_expr("40 + 2");

        let first = ConstantEvaluator::new(&mut state).evaluate(&expr).unwrap();
        let second = ConstantEvaluator::new(&mut state).evaluate(&expr).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_division_by_zero_is_an_error() {
        let mut state = State::new(Target::new("x86_64-unknown-linux-gnu"));
        let expr = parse_expr("1 / 0");

        let error = ConstantEvaluator::new(&mut state).evaluate(&expr).unwrap_err();
        assert!(error.message().contains("division by zero"));
    }

    #[test]
    fn test_negation_wraps_in_type_width() {
        let (state, id) = evaluate("-1");
        let constant = state.constants.get(id);

        assert_eq!(constant.kind, ConstantKind::Int(0xffff_ffff));
    }

    #[test]
    fn test_sizeof_folds() {
        let (state, id) = evaluate("sizeof([i32; 4])");
        assert_eq!(state.constants.get(id).kind, ConstantKind::Int(16));
    }

    #[test]
    fn test_non_constant_expression_is_rejected() {
        let mut state = State::new(Target::new("x86_64-unknown-linux-gnu"));
        let expr = parse_expr("foo()");

        let evaluator = ConstantEvaluator::new(&mut state);
        assert!(!evaluator.is_constant_expression(&expr));
    }
}
