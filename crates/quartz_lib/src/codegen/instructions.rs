//! Per-instruction lowering.
//!
//! Builder failures and malformed IR (missing blocks, unwritten registers,
//! module-level instructions inside a block) panic: by this stage they are
//! compiler bugs, not user diagnostics.

use inkwell::values::{AggregateValueEnum, BasicMetadataValueEnum, BasicValueEnum, IntValue, PointerValue};
use inkwell::{FloatPredicate, IntPredicate};

use crate::bytecode::{Instruction, Operand, Register};
use crate::errors::Result;
use crate::language::symbol::FunctionId;
use crate::language::types::{TypeId, TypeKind};
use crate::language::State;
use crate::parser::ast::BinaryOp;

use super::LlvmCodegen;

impl<'ctx> LlvmCodegen<'ctx> {
    pub(super) fn lower_instruction(
        &mut self,
        state: &State,
        function: FunctionId,
        instruction: &Instruction,
    ) -> Result<()> {
        match instruction {
            Instruction::Move { dst, src } => {
                let value = self.valueof(state, *src);
                self.set_register(*dst, value);
            }
            Instruction::NewString { dst, value } => {
                let string = self
                    .builder
                    .build_global_string_ptr(value, "str")
                    .unwrap();
                self.set_register(*dst, string.as_pointer_value().into());
            }
            Instruction::NewArray { dst, elements } => {
                let array_type = state.register_type(*dst);
                let TypeKind::Array { element, .. } = state.types.kind(array_type).clone() else {
                    panic!("NewArray destination is not array typed");
                };

                let llvm_element = self.basic_type(state, element);
                let mut aggregate: AggregateValueEnum =
                    llvm_element.array_type(elements.len() as u32).get_undef().into();

                for (index, operand) in elements.iter().enumerate() {
                    let value = self.valueof(state, *operand);
                    aggregate = self
                        .builder
                        .build_insert_value(aggregate, value, index as u32, "array")
                        .unwrap();
                }

                self.set_register(*dst, aggregate.into_array_value().into());
            }
            Instruction::NewLocalScope { function: id } => {
                self.lower_local_scope(state, *id);
            }
            Instruction::GetLocal { dst, index } => {
                let type_id = state.function(function).locals[*index as usize];
                let llvm_type = self.basic_type(state, type_id);
                let value = self
                    .builder
                    .build_load(llvm_type, self.local(*index), "local")
                    .unwrap();
                self.set_register(*dst, value);
            }
            Instruction::GetLocalRef { dst, index } => {
                self.set_register(*dst, self.local(*index).into());
            }
            Instruction::SetLocal { index, src } => {
                let value = self.valueof(state, *src);
                self.builder.build_store(self.local(*index), value).unwrap();
            }
            Instruction::GetGlobal { dst, index } => {
                let type_id = state.globals[*index as usize].type_id;
                let llvm_type = self.basic_type(state, type_id);
                let value = self
                    .builder
                    .build_load(llvm_type, self.global(*index).as_pointer_value(), "global")
                    .unwrap();
                self.set_register(*dst, value);
            }
            Instruction::GetGlobalRef { dst, index } => {
                self.set_register(*dst, self.global(*index).as_pointer_value().into());
            }
            Instruction::SetGlobal { index, src } => {
                let value = self.valueof(state, *src);
                self.builder
                    .build_store(self.global(*index).as_pointer_value(), value)
                    .unwrap();
            }
            Instruction::Read { dst, src } => {
                let pointer_type = state.register_type(*src);
                let pointee = state
                    .types
                    .underlying_type(pointer_type)
                    .expect("Read through a non-pointer register");

                let llvm_type = self.basic_type(state, pointee);
                let pointer = self.register_value(*src).into_pointer_value();
                let value = self.builder.build_load(llvm_type, pointer, "read").unwrap();
                self.set_register(*dst, value);
            }
            Instruction::Write { dst, src } => {
                let pointer = self.register_value(*dst).into_pointer_value();
                let value = self.valueof(state, *src);
                self.builder.build_store(pointer, value).unwrap();
            }
            Instruction::GetMember { dst, value, index } => {
                let aggregate = as_aggregate(self.valueof(state, *value));
                let extracted = self
                    .builder
                    .build_extract_value(aggregate, *index, "member")
                    .unwrap();
                self.set_register(*dst, extracted);
            }
            Instruction::GetMemberRef { dst, value, index } => {
                let pointer = self.member_pointer(state, *value, *index);
                self.set_register(*dst, pointer.into());
            }
            Instruction::SetMember { value, index, src } => {
                let pointer = self.member_pointer(state, *value, *index);
                let stored = self.valueof(state, *src);
                self.builder.build_store(pointer, stored).unwrap();
            }
            Instruction::Binary { op, dst, lhs, rhs } => {
                self.lower_binary(state, *op, *dst, *lhs, *rhs);
            }
            Instruction::Cast { dst, src, type_id } => {
                self.lower_cast(state, *dst, *src, *type_id);
            }
            Instruction::Jump { target } => {
                self.builder
                    .build_unconditional_branch(self.block(*target))
                    .unwrap();
            }
            Instruction::JumpIf {
                condition,
                true_target,
                false_target,
            } => {
                let condition = self.valueof(state, *condition).into_int_value();
                self.builder
                    .build_conditional_branch(
                        condition,
                        self.block(*true_target),
                        self.block(*false_target),
                    )
                    .unwrap();
            }
            Instruction::GetFunction { dst, function } => {
                let value = self.functions[function];
                self.set_register(*dst, value.as_global_value().as_pointer_value().into());
            }
            Instruction::Return { value } => match value {
                Some(operand) => {
                    let value = self.valueof(state, *operand);
                    self.builder.build_return(Some(&value)).unwrap();
                }
                None => {
                    self.builder.build_return(None).unwrap();
                }
            },
            Instruction::Call {
                dst,
                function,
                function_type,
                arguments,
            } => {
                let fn_type = self.function_type(state, *function_type);
                let pointer = self.valueof(state, *function).into_pointer_value();

                let args: Vec<BasicMetadataValueEnum> = arguments
                    .iter()
                    .map(|argument| self.valueof(state, *argument).into())
                    .collect();

                let call = self
                    .builder
                    .build_indirect_call(fn_type, pointer, &args, "call")
                    .unwrap();

                if let Some(value) = call.try_as_basic_value().left() {
                    self.set_register(*dst, value);
                }
            }
            Instruction::Construct {
                dst,
                type_id,
                arguments,
            } => {
                let llvm_type = self.basic_type(state, *type_id).into_struct_type();
                let mut aggregate: AggregateValueEnum = llvm_type.get_undef().into();

                for (index, operand) in arguments.iter().enumerate() {
                    let value = self.valueof(state, *operand);
                    aggregate = self
                        .builder
                        .build_insert_value(aggregate, value, index as u32, "construct")
                        .unwrap();
                }

                self.set_register(*dst, aggregate.into_struct_value().into());
            }
            Instruction::Alloca { dst, type_id } => {
                let llvm_type = self.basic_type(state, *type_id);
                let slot = self.builder.build_alloca(llvm_type, "tmp").unwrap();
                self.set_register(*dst, slot.into());
            }
            Instruction::Null { dst, .. } => {
                let null = self
                    .context
                    .ptr_type(inkwell::AddressSpace::default())
                    .const_null();
                self.set_register(*dst, null.into());
            }
            Instruction::Boolean { dst, value } => {
                let boolean = self.context.bool_type().const_int(*value as u64, false);
                self.set_register(*dst, boolean.into());
            }
            Instruction::NewFunction { .. } | Instruction::NewStruct { .. } => {
                panic!("'{}' may only appear at module level", instruction.name());
            }
        }

        Ok(())
    }

    /// Allocate the stack frame: one alloca per local, with the incoming
    /// parameters stored into the leading slots.
    fn lower_local_scope(&mut self, state: &State, id: FunctionId) {
        let function = state.function(id);
        let value = self.functions[&id];

        self.locals.clear();
        for (index, &type_id) in function.locals.iter().enumerate() {
            let llvm_type = self.basic_type(state, type_id);
            let slot = self
                .builder
                .build_alloca(llvm_type, &format!("local{index}"))
                .unwrap();
            self.locals.push(slot);
        }

        for index in 0..function.parameters.len() {
            let parameter = value
                .get_nth_param(index as u32)
                .expect("parameter count mismatch");
            self.builder.build_store(self.locals[index], parameter).unwrap();
        }
    }

    /// Address of member `index` behind an aggregate pointer register.
    fn member_pointer(&mut self, state: &State, value: Register, index: u32) -> PointerValue<'ctx> {
        let pointer_type = state.register_type(value);
        let aggregate = state
            .types
            .underlying_type(pointer_type)
            .expect("member access through a non-pointer register");

        let pointer = self.register_value(value).into_pointer_value();

        match state.types.kind(aggregate) {
            TypeKind::Struct { .. } | TypeKind::Tuple { .. } => {
                let llvm_type = self.basic_type(state, aggregate);
                self.builder
                    .build_struct_gep(llvm_type, pointer, index, "member")
                    .unwrap()
            }
            TypeKind::Array { .. } => {
                let llvm_type = self.basic_type(state, aggregate);
                let i32_type = self.context.i32_type();
                let indices = [i32_type.const_zero(), i32_type.const_int(index as u64, false)];

                unsafe {
                    self.builder
                        .build_gep(llvm_type, pointer, &indices, "element")
                        .unwrap()
                }
            }
            other => panic!("member access into '{other:?}'"),
        }
    }

    // ------------------------------------------------------------------
    // Binary operators
    // ------------------------------------------------------------------

    /// Signedness and float/pointer handling come from the type recorded
    /// for the left operand.
    fn lower_binary(
        &mut self,
        state: &State,
        op: BinaryOp,
        dst: Register,
        lhs: Operand,
        rhs: Operand,
    ) {
        let type_id = strip_enum(state, state.operand_type(lhs));

        if state.types.is_pointer(type_id) {
            return self.lower_pointer_binary(state, op, dst, lhs, rhs, type_id);
        }

        if state.types.is_floating_point(type_id) {
            return self.lower_float_binary(state, op, dst, lhs, rhs);
        }

        let signed = state.types.is_int_signed(type_id);
        let left = self.valueof(state, lhs).into_int_value();
        let right = self.valueof(state, rhs).into_int_value();

        let value: IntValue = match op {
            BinaryOp::Add => self.builder.build_int_add(left, right, "add").unwrap(),
            BinaryOp::Sub => self.builder.build_int_sub(left, right, "sub").unwrap(),
            BinaryOp::Mul => self.builder.build_int_mul(left, right, "mul").unwrap(),
            BinaryOp::Div => {
                if signed {
                    self.builder.build_int_signed_div(left, right, "div").unwrap()
                } else {
                    self.builder
                        .build_int_unsigned_div(left, right, "div")
                        .unwrap()
                }
            }
            BinaryOp::Mod => {
                if signed {
                    self.builder.build_int_signed_rem(left, right, "rem").unwrap()
                } else {
                    self.builder
                        .build_int_unsigned_rem(left, right, "rem")
                        .unwrap()
                }
            }
            BinaryOp::Or | BinaryOp::LogicalOr => {
                self.builder.build_or(left, right, "or").unwrap()
            }
            BinaryOp::And | BinaryOp::LogicalAnd => {
                self.builder.build_and(left, right, "and").unwrap()
            }
            BinaryOp::Xor => self.builder.build_xor(left, right, "xor").unwrap(),
            BinaryOp::Shl => self.builder.build_left_shift(left, right, "shl").unwrap(),
            BinaryOp::Shr => self
                .builder
                .build_right_shift(left, right, signed, "shr")
                .unwrap(),
            BinaryOp::Eq
            | BinaryOp::Neq
            | BinaryOp::Gt
            | BinaryOp::Lt
            | BinaryOp::Gte
            | BinaryOp::Lte => self
                .builder
                .build_int_compare(int_predicate(op, signed), left, right, "cmp")
                .unwrap(),
        };

        self.set_register(dst, value.into());
    }

    fn lower_float_binary(
        &mut self,
        state: &State,
        op: BinaryOp,
        dst: Register,
        lhs: Operand,
        rhs: Operand,
    ) {
        let left = self.valueof(state, lhs).into_float_value();
        let right = self.valueof(state, rhs).into_float_value();

        let value: BasicValueEnum = match op {
            BinaryOp::Add => self.builder.build_float_add(left, right, "fadd").unwrap().into(),
            BinaryOp::Sub => self.builder.build_float_sub(left, right, "fsub").unwrap().into(),
            BinaryOp::Mul => self.builder.build_float_mul(left, right, "fmul").unwrap().into(),
            BinaryOp::Div => self.builder.build_float_div(left, right, "fdiv").unwrap().into(),
            BinaryOp::Mod => self.builder.build_float_rem(left, right, "frem").unwrap().into(),
            BinaryOp::Eq
            | BinaryOp::Neq
            | BinaryOp::Gt
            | BinaryOp::Lt
            | BinaryOp::Gte
            | BinaryOp::Lte => self
                .builder
                .build_float_compare(float_predicate(op), left, right, "fcmp")
                .unwrap()
                .into(),
            other => panic!("operator '{}' on float operands", other.str()),
        };

        self.set_register(dst, value);
    }

    /// `ptr + n` and `ptr - n` are element-scaled address arithmetic;
    /// pointer comparisons go through an address-sized integer.
    fn lower_pointer_binary(
        &mut self,
        state: &State,
        op: BinaryOp,
        dst: Register,
        lhs: Operand,
        rhs: Operand,
        pointer_type: TypeId,
    ) {
        match op {
            BinaryOp::Add | BinaryOp::Sub => {
                let pointee = state.types.underlying_type(pointer_type).unwrap();
                let llvm_pointee = self.basic_type(state, pointee);

                let pointer = self.valueof(state, lhs).into_pointer_value();
                let mut offset = self.valueof(state, rhs).into_int_value();

                if op == BinaryOp::Sub {
                    offset = self.builder.build_int_neg(offset, "neg").unwrap();
                }

                let element = unsafe {
                    self.builder
                        .build_gep(llvm_pointee, pointer, &[offset], "offset")
                        .unwrap()
                };

                self.set_register(dst, element.into());
            }
            BinaryOp::Eq
            | BinaryOp::Neq
            | BinaryOp::Gt
            | BinaryOp::Lt
            | BinaryOp::Gte
            | BinaryOp::Lte => {
                let word = self
                    .context
                    .custom_width_int_type(state.target.word_size());

                let left = self.valueof(state, lhs).into_pointer_value();
                let right = self.valueof(state, rhs).into_pointer_value();

                let left = self.builder.build_ptr_to_int(left, word, "addr").unwrap();
                let right = self.builder.build_ptr_to_int(right, word, "addr").unwrap();

                let compared = self
                    .builder
                    .build_int_compare(int_predicate(op, false), left, right, "cmp")
                    .unwrap();
                self.set_register(dst, compared.into());
            }
            other => panic!("operator '{}' on pointer operands", other.str()),
        }
    }

    // ------------------------------------------------------------------
    // Casts
    // ------------------------------------------------------------------

    fn lower_cast(&mut self, state: &State, dst: Register, src: Operand, target: TypeId) {
        let source = state.operand_type(src);
        let value = self.valueof(state, src);

        if source == target {
            self.set_register(dst, value);
            return;
        }

        let from = strip_enum(state, source);
        let to = strip_enum(state, target);

        let from_kind = state.types.kind(from).clone();
        let to_kind = state.types.kind(to).clone();

        let result: BasicValueEnum = match (&from_kind, &to_kind) {
            (
                TypeKind::Int { bits: from_bits, signed },
                TypeKind::Int { bits: to_bits, .. },
            ) => {
                let value = value.into_int_value();

                if *to_bits == 1 {
                    // Casting to bool is a truth test, not a bit slice.
                    let zero = self.context.custom_width_int_type(*from_bits).const_zero();
                    self.builder
                        .build_int_compare(IntPredicate::NE, value, zero, "tobool")
                        .unwrap()
                        .into()
                } else if to_bits < from_bits {
                    let target_type = self.context.custom_width_int_type(*to_bits);
                    self.builder
                        .build_int_truncate(value, target_type, "trunc")
                        .unwrap()
                        .into()
                } else if to_bits > from_bits {
                    let target_type = self.context.custom_width_int_type(*to_bits);
                    if *signed {
                        self.builder
                            .build_int_s_extend(value, target_type, "sext")
                            .unwrap()
                            .into()
                    } else {
                        self.builder
                            .build_int_z_extend(value, target_type, "zext")
                            .unwrap()
                            .into()
                    }
                } else {
                    // Same width, signedness change only.
                    value.into()
                }
            }
            (TypeKind::Int { signed, .. }, TypeKind::Float | TypeKind::Double) => {
                let value = value.into_int_value();
                let target_type = self.basic_type(state, to).into_float_type();

                if *signed {
                    self.builder
                        .build_signed_int_to_float(value, target_type, "sitofp")
                        .unwrap()
                        .into()
                } else {
                    self.builder
                        .build_unsigned_int_to_float(value, target_type, "uitofp")
                        .unwrap()
                        .into()
                }
            }
            (TypeKind::Float | TypeKind::Double, TypeKind::Int { signed, .. }) => {
                let value = value.into_float_value();
                let target_type = self.basic_type(state, to).into_int_type();

                if *signed {
                    self.builder
                        .build_float_to_signed_int(value, target_type, "fptosi")
                        .unwrap()
                        .into()
                } else {
                    self.builder
                        .build_float_to_unsigned_int(value, target_type, "fptoui")
                        .unwrap()
                        .into()
                }
            }
            (TypeKind::Float, TypeKind::Double) => {
                let target_type = self.context.f64_type();
                self.builder
                    .build_float_ext(value.into_float_value(), target_type, "fpext")
                    .unwrap()
                    .into()
            }
            (TypeKind::Double, TypeKind::Float) => {
                let target_type = self.context.f32_type();
                self.builder
                    .build_float_trunc(value.into_float_value(), target_type, "fptrunc")
                    .unwrap()
                    .into()
            }
            (TypeKind::Pointer { .. }, TypeKind::Int { bits, .. }) => {
                let target_type = self.context.custom_width_int_type(*bits);
                self.builder
                    .build_ptr_to_int(value.into_pointer_value(), target_type, "ptrtoint")
                    .unwrap()
                    .into()
            }
            (TypeKind::Int { .. }, TypeKind::Pointer { .. }) => {
                let target_type = self.context.ptr_type(inkwell::AddressSpace::default());
                self.builder
                    .build_int_to_ptr(value.into_int_value(), target_type, "inttoptr")
                    .unwrap()
                    .into()
            }
            // With opaque pointers every pointer-shaped value is already
            // the right representation.
            (
                TypeKind::Pointer { .. } | TypeKind::Reference { .. } | TypeKind::Function { .. },
                TypeKind::Pointer { .. } | TypeKind::Reference { .. },
            ) => value,
            (TypeKind::Array { .. }, TypeKind::Array { .. }) => value,
            (TypeKind::Tuple { .. }, TypeKind::Tuple { .. }) => value,
            (from, to) => panic!(
                "cast from '{from:?}' to '{to:?}' passed the front end but has no lowering"
            ),
        };

        self.set_register(dst, result);
    }
}

fn strip_enum(state: &State, type_id: TypeId) -> TypeId {
    match state.types.kind(type_id) {
        TypeKind::Enum { inner, .. } => *inner,
        _ => type_id,
    }
}

fn as_aggregate(value: BasicValueEnum) -> AggregateValueEnum {
    match value {
        BasicValueEnum::StructValue(value) => AggregateValueEnum::StructValue(value),
        BasicValueEnum::ArrayValue(value) => AggregateValueEnum::ArrayValue(value),
        other => panic!("'{other:?}' is not an aggregate"),
    }
}

fn int_predicate(op: BinaryOp, signed: bool) -> IntPredicate {
    match (op, signed) {
        (BinaryOp::Eq, _) => IntPredicate::EQ,
        (BinaryOp::Neq, _) => IntPredicate::NE,
        (BinaryOp::Gt, true) => IntPredicate::SGT,
        (BinaryOp::Gt, false) => IntPredicate::UGT,
        (BinaryOp::Lt, true) => IntPredicate::SLT,
        (BinaryOp::Lt, false) => IntPredicate::ULT,
        (BinaryOp::Gte, true) => IntPredicate::SGE,
        (BinaryOp::Gte, false) => IntPredicate::UGE,
        (BinaryOp::Lte, true) => IntPredicate::SLE,
        (BinaryOp::Lte, false) => IntPredicate::ULE,
        (other, _) => panic!("'{}' is not a comparison", other.str()),
    }
}

fn float_predicate(op: BinaryOp) -> FloatPredicate {
    match op {
        BinaryOp::Eq => FloatPredicate::OEQ,
        BinaryOp::Neq => FloatPredicate::ONE,
        BinaryOp::Gt => FloatPredicate::OGT,
        BinaryOp::Lt => FloatPredicate::OLT,
        BinaryOp::Gte => FloatPredicate::OGE,
        BinaryOp::Lte => FloatPredicate::OLE,
        other => panic!("'{}' is not a comparison", other.str()),
    }
}
