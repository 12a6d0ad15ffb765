//! Bytecode to LLVM lowering.
//!
//! A structural translation: one LLVM function per used bytecode function,
//! one LLVM basic block per bytecode block, allocas for locals, and a
//! per-instruction dispatch. Signedness and mutability distinctions come
//! from the types recorded for registers during generation. Any internal
//! inconsistency here is a compiler bug and panics; user errors were all
//! reported before this stage.

mod instructions;

use std::collections::HashMap;
use std::path::Path;

use inkwell::basic_block::BasicBlock as LlvmBlock;
use inkwell::builder::Builder;
use inkwell::context::Context;
use inkwell::module::Module;
use inkwell::targets::{
    CodeModel, FileType, InitializationConfig, RelocMode, Target as LlvmTarget, TargetTriple,
};
use inkwell::types::{BasicMetadataTypeEnum, BasicType, BasicTypeEnum, FunctionType};
use inkwell::values::{BasicValueEnum, FunctionValue, GlobalValue, PointerValue};
use inkwell::{AddressSpace, OptimizationLevel as LlvmOptLevel};

use crate::bytecode::{BlockId, Instruction, Operand, Register};
use crate::compiler::{CompilerOptions, OptimizationLevel, OutputFormat};
use crate::errors::{Error, Result};
use crate::language::constants::ConstantKind;
use crate::language::symbol::FunctionId;
use crate::language::types::{TypeId, TypeKind};
use crate::language::State;
use crate::source_map::Span;

pub struct LlvmCodegen<'ctx> {
    context: &'ctx Context,
    module: Module<'ctx>,
    builder: Builder<'ctx>,

    registers: Vec<Option<BasicValueEnum<'ctx>>>,
    globals: Vec<GlobalValue<'ctx>>,

    blocks: HashMap<BlockId, LlvmBlock<'ctx>>,
    functions: HashMap<FunctionId, FunctionValue<'ctx>>,
    /// Backing LLVM struct types for named structs and tuples, keyed by
    /// the interned type.
    struct_types: HashMap<TypeId, inkwell::types::StructType<'ctx>>,

    /// Stack slots of the function currently being lowered.
    locals: Vec<PointerValue<'ctx>>,
}

impl<'ctx> LlvmCodegen<'ctx> {
    pub fn new(context: &'ctx Context, module_name: &str) -> Self {
        LlvmCodegen {
            context,
            module: context.create_module(module_name),
            builder: context.create_builder(),
            registers: Vec::new(),
            globals: Vec::new(),
            blocks: HashMap::new(),
            functions: HashMap::new(),
            struct_types: HashMap::new(),
            locals: Vec::new(),
        }
    }

    pub fn module(&self) -> &Module<'ctx> {
        &self.module
    }

    /// Lower the whole program held in `state`.
    pub fn generate(&mut self, state: &State) -> Result<()> {
        self.module
            .set_triple(&TargetTriple::create(state.target.triple()));
        self.registers.resize(state.generator.register_count(), None);

        // The global instruction stream carries struct declarations and the
        // function definition order.
        let mut defined = Vec::new();
        for instruction in state.generator.global_instructions() {
            match instruction {
                Instruction::NewStruct { structure } => {
                    let type_id = state.structure(*structure).type_id;
                    self.struct_backing_type(state, type_id);
                }
                Instruction::NewFunction { function } => defined.push(*function),
                other => panic!("'{}' is not a module level instruction", other.name()),
            }
        }

        self.define_globals(state);

        // Declarations first so calls can reference functions defined later.
        for index in 0..state.functions.len() as u32 {
            let id = FunctionId(index);
            let function = state.function(id);

            if function.is_generic() || !function.is_used {
                continue;
            }

            self.declare_function(state, id);
        }

        for id in defined {
            if state.function(id).is_used && !state.function(id).is_decl {
                self.define_function(state, id)?;
            }
        }

        if let Err(message) = self.module.verify() {
            panic!("LLVM module verification failed: {}", message.to_string());
        }

        Ok(())
    }

    fn define_globals(&mut self, state: &State) {
        for slot in &state.globals {
            let type_id = slot.type_id;
            let llvm_type = self.basic_type(state, type_id);
            let global = self.module.add_global(llvm_type, None, &slot.name);

            match slot.initializer {
                Some(initializer) => {
                    let value = self.constant_value(state, initializer);
                    global.set_initializer(&value);
                }
                None => {
                    global.set_initializer(&zero_value(llvm_type));
                }
            }

            global.set_constant(!slot.is_mutable);
            self.globals.push(global);
        }
    }

    fn declare_function(&mut self, state: &State, id: FunctionId) {
        let function = state.function(id);
        let fn_type = self.function_type(state, function.type_id);

        let name = match &function.intrinsic {
            Some(intrinsic) => intrinsic.as_str(),
            None => function.symbol_name(),
        };

        log::debug!("declaring '{name}'");
        let value = self.module.add_function(name, fn_type, None);

        if let Some(section) = &function.link_section {
            value.as_global_value().set_section(Some(section));
        }

        self.functions.insert(id, value);
    }

    fn define_function(&mut self, state: &State, id: FunctionId) -> Result<()> {
        let function = state.function(id);
        let value = self.functions[&id];

        // One LLVM block per bytecode block, in insertion order.
        for &block in &function.blocks {
            let name = &state.generator.block(block).name;
            let llvm_block = self.context.append_basic_block(value, name);
            self.blocks.insert(block, llvm_block);
        }

        self.locals.clear();

        for &block in &function.blocks {
            self.builder.position_at_end(self.blocks[&block]);

            for instruction in &state.generator.block(block).instructions {
                self.lower_instruction(state, id, instruction)?;
            }
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Types
    // ------------------------------------------------------------------

    pub(super) fn basic_type(&mut self, state: &State, type_id: TypeId) -> BasicTypeEnum<'ctx> {
        match state.types.kind(type_id) {
            TypeKind::Int { bits, .. } => self.context.custom_width_int_type(*bits).into(),
            TypeKind::Float => self.context.f32_type().into(),
            TypeKind::Double => self.context.f64_type().into(),
            TypeKind::Pointer { .. } | TypeKind::Reference { .. } | TypeKind::Function { .. } => {
                self.context.ptr_type(AddressSpace::default()).into()
            }
            TypeKind::Array { element, size } => {
                let element = self.basic_type(state, *element);
                element.array_type(*size as u32).into()
            }
            TypeKind::Enum { inner, .. } => self.basic_type(state, *inner),
            TypeKind::Struct { .. } | TypeKind::Tuple { .. } => {
                self.struct_backing_type(state, type_id).into()
            }
            TypeKind::Void | TypeKind::Trait { .. } | TypeKind::Empty { .. } => {
                panic!(
                    "'{}' has no value representation",
                    state.types.str(type_id)
                );
            }
        }
    }

    /// The backing LLVM struct for a struct or tuple type, created once per
    /// interned type.
    fn struct_backing_type(
        &mut self,
        state: &State,
        type_id: TypeId,
    ) -> inkwell::types::StructType<'ctx> {
        if let Some(&backing) = self.struct_types.get(&type_id) {
            return backing;
        }

        match state.types.kind(type_id).clone() {
            TypeKind::Struct { name, fields } => {
                let backing = self.context.opaque_struct_type(&name);
                // Insert before lowering the fields so recursive structs
                // (through pointers) terminate.
                self.struct_types.insert(type_id, backing);

                let packed = state
                    .struct_for_type(type_id)
                    .map(|id| state.structure(id).packed)
                    .unwrap_or(false);

                let field_types: Vec<BasicTypeEnum> = fields
                    .iter()
                    .map(|&field| self.basic_type(state, field))
                    .collect();
                backing.set_body(&field_types, packed);

                backing
            }
            TypeKind::Tuple { elements } => {
                let element_types: Vec<BasicTypeEnum> = elements
                    .iter()
                    .map(|&element| self.basic_type(state, element))
                    .collect();

                let backing = self.context.struct_type(&element_types, false);
                self.struct_types.insert(type_id, backing);
                backing
            }
            other => panic!("'{other:?}' has no struct backing"),
        }
    }

    pub(super) fn function_type(&mut self, state: &State, type_id: TypeId) -> FunctionType<'ctx> {
        let TypeKind::Function {
            return_type,
            params,
            var_arg,
        } = state.types.kind(type_id).clone()
        else {
            panic!("'{}' is not a function type", state.types.str(type_id));
        };

        let param_types: Vec<BasicMetadataTypeEnum> = params
            .iter()
            .map(|&param| self.basic_type(state, param).into())
            .collect();

        if state.types.is_void(return_type) {
            self.context.void_type().fn_type(&param_types, var_arg)
        } else {
            self.basic_type(state, return_type)
                .fn_type(&param_types, var_arg)
        }
    }

    // ------------------------------------------------------------------
    // Values
    // ------------------------------------------------------------------

    pub(super) fn valueof(&self, state: &State, operand: Operand) -> BasicValueEnum<'ctx> {
        match operand {
            Operand::Register(register) => self.register_value(register),
            Operand::Immediate { value, type_id } => self.immediate(state, value, type_id),
            Operand::None => panic!("operand carries no value"),
        }
    }

    fn immediate(&self, state: &State, value: u64, type_id: TypeId) -> BasicValueEnum<'ctx> {
        match state.types.kind(type_id) {
            TypeKind::Int { bits, signed } => self
                .context
                .custom_width_int_type(*bits)
                .const_int(value, *signed)
                .into(),
            TypeKind::Enum { inner, .. } => self.immediate(state, value, *inner),
            TypeKind::Float => self
                .context
                .f32_type()
                .const_float(f64::from_bits(value))
                .into(),
            TypeKind::Double => self
                .context
                .f64_type()
                .const_float(f64::from_bits(value))
                .into(),
            TypeKind::Pointer { .. } => self
                .context
                .ptr_type(AddressSpace::default())
                .const_null()
                .into(),
            other => panic!("immediate of type '{other:?}'"),
        }
    }

    pub(super) fn register_value(&self, register: Register) -> BasicValueEnum<'ctx> {
        self.registers[register.index()]
            .unwrap_or_else(|| panic!("register r{} was never written", register.0))
    }

    pub(super) fn set_register(&mut self, register: Register, value: BasicValueEnum<'ctx>) {
        if self.registers.len() <= register.index() {
            self.registers.resize(register.index() + 1, None);
        }

        self.registers[register.index()] = Some(value);
    }

    pub(super) fn block(&self, id: BlockId) -> LlvmBlock<'ctx> {
        *self
            .blocks
            .get(&id)
            .unwrap_or_else(|| panic!("block b{} was never created", id.0))
    }

    pub(super) fn global(&self, index: u32) -> GlobalValue<'ctx> {
        self.globals[index as usize]
    }

    pub(super) fn local(&self, index: u32) -> PointerValue<'ctx> {
        self.locals[index as usize]
    }

    /// Materialize a pooled constant as an LLVM constant value.
    fn constant_value(&mut self, state: &State, id: crate::language::ConstantId) -> BasicValueEnum<'ctx> {
        let constant = state.constants.get(id).clone();

        match &constant.kind {
            ConstantKind::Int(value) => self.immediate(state, *value, constant.type_id),
            ConstantKind::Float(value) => self.immediate(state, value.to_bits(), constant.type_id),
            ConstantKind::Null => self
                .context
                .ptr_type(AddressSpace::default())
                .const_null()
                .into(),
            ConstantKind::String(text) => {
                let global = self.module.add_global(
                    self.context
                        .i8_type()
                        .array_type(text.len() as u32 + 1),
                    None,
                    "str",
                );
                global.set_initializer(&self.context.const_string(text.as_bytes(), true));
                global.set_constant(true);
                global.as_pointer_value().into()
            }
            ConstantKind::Array(elements) => {
                let TypeKind::Array { element, .. } = state.types.kind(constant.type_id).clone()
                else {
                    panic!("array constant without an array type");
                };

                let element_type = self.basic_type(state, element);
                let values: Vec<BasicValueEnum> = elements
                    .iter()
                    .map(|&element| self.constant_value(state, element))
                    .collect();

                const_array(element_type, &values).into()
            }
            ConstantKind::Struct(elements) => {
                let values: Vec<BasicValueEnum> = elements
                    .iter()
                    .map(|&element| self.constant_value(state, element))
                    .collect();

                self.context.const_struct(&values, false).into()
            }
        }
    }

    // ------------------------------------------------------------------
    // Output
    // ------------------------------------------------------------------

    /// Write the module out in the requested format. For executables and
    /// shared libraries this produces the object file; linking is the
    /// driver's job.
    pub fn emit(&self, options: &CompilerOptions, output: &Path) -> Result<()> {
        match options.format {
            OutputFormat::LlvmIr => self
                .module
                .print_to_file(output)
                .map_err(|message| emit_error(output, message.to_string())),
            OutputFormat::LlvmBitcode => {
                if !self.module.write_bitcode_to_path(output) {
                    return Err(emit_error(output, "could not write bitcode".into()));
                }
                Ok(())
            }
            OutputFormat::Assembly => self.emit_machine_code(options, output, FileType::Assembly),
            OutputFormat::Object | OutputFormat::Executable | OutputFormat::SharedLibrary => {
                self.emit_machine_code(options, output, FileType::Object)
            }
        }
    }

    fn emit_machine_code(
        &self,
        options: &CompilerOptions,
        output: &Path,
        file_type: FileType,
    ) -> Result<()> {
        LlvmTarget::initialize_all(&InitializationConfig::default());

        let triple = self.module.get_triple();
        let target = LlvmTarget::from_triple(&triple)
            .map_err(|message| emit_error(output, message.to_string()))?;

        let machine = target
            .create_target_machine(
                &triple,
                "generic",
                "",
                optimization_level(options.optimization),
                RelocMode::PIC,
                CodeModel::Default,
            )
            .ok_or_else(|| emit_error(output, "could not create a target machine".into()))?;

        self.module
            .set_data_layout(&machine.get_target_data().get_data_layout());

        machine
            .write_to_file(&self.module, file_type, output)
            .map_err(|message| emit_error(output, message.to_string()))
    }
}

fn optimization_level(level: OptimizationLevel) -> LlvmOptLevel {
    match level {
        OptimizationLevel::O0 => LlvmOptLevel::None,
        OptimizationLevel::O1 => LlvmOptLevel::Less,
        OptimizationLevel::O2 | OptimizationLevel::Os | OptimizationLevel::Oz => {
            LlvmOptLevel::Default
        }
        OptimizationLevel::O3 => LlvmOptLevel::Aggressive,
    }
}

fn emit_error(output: &Path, message: String) -> Error {
    Error::new(
        Span::default(),
        format!("could not emit '{}': {message}", output.display()),
    )
}

fn zero_value(ty: BasicTypeEnum) -> BasicValueEnum {
    match ty {
        BasicTypeEnum::IntType(ty) => ty.const_zero().into(),
        BasicTypeEnum::FloatType(ty) => ty.const_zero().into(),
        BasicTypeEnum::PointerType(ty) => ty.const_null().into(),
        BasicTypeEnum::ArrayType(ty) => ty.const_zero().into(),
        BasicTypeEnum::StructType(ty) => ty.const_zero().into(),
        BasicTypeEnum::VectorType(ty) => ty.const_zero().into(),
        BasicTypeEnum::ScalableVectorType(ty) => ty.const_zero().into(),
    }
}

fn const_array<'ctx>(
    element_type: BasicTypeEnum<'ctx>,
    values: &[BasicValueEnum<'ctx>],
) -> inkwell::values::ArrayValue<'ctx> {
    match element_type {
        BasicTypeEnum::IntType(ty) => ty.const_array(
            &values.iter().map(|value| value.into_int_value()).collect::<Vec<_>>(),
        ),
        BasicTypeEnum::FloatType(ty) => ty.const_array(
            &values.iter().map(|value| value.into_float_value()).collect::<Vec<_>>(),
        ),
        BasicTypeEnum::PointerType(ty) => ty.const_array(
            &values.iter().map(|value| value.into_pointer_value()).collect::<Vec<_>>(),
        ),
        BasicTypeEnum::StructType(ty) => ty.const_array(
            &values.iter().map(|value| value.into_struct_value()).collect::<Vec<_>>(),
        ),
        BasicTypeEnum::ArrayType(ty) => ty.const_array(
            &values.iter().map(|value| value.into_array_value()).collect::<Vec<_>>(),
        ),
        other => panic!("unsupported constant array element type '{other:?}'"),
    }
}
