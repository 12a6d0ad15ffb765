//! Bytecode emission machinery.
//!
//! The generator owns every basic block of the compilation plus the
//! module-level instruction stream. Instructions go to the current block
//! when one is active, otherwise to the global stream; registers come from
//! one program-wide counter.

use super::basic_block::{BasicBlock, BlockId};
use super::instruction::{Instruction, Register};

#[derive(Default)]
pub struct Generator {
    blocks: Vec<BasicBlock>,
    current: Option<BlockId>,

    global_instructions: Vec<Instruction>,

    next_register: u32,
    next_block: u32,
}

impl Generator {
    pub fn new() -> Self {
        Generator::default()
    }

    pub fn create_block(&mut self, name: impl Into<String>) -> BlockId {
        let mut name = name.into();
        if name.is_empty() {
            name = format!("bb{}", self.next_block);
        }
        self.next_block += 1;

        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BasicBlock::new(name));
        id
    }

    pub fn switch_to(&mut self, block: Option<BlockId>) {
        self.current = block;
    }

    pub fn current_block(&self) -> Option<BlockId> {
        self.current
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.index()]
    }

    /// Whether the current block can still accept instructions.
    pub fn is_terminated(&self) -> bool {
        self.current
            .map(|block| self.block(block).is_terminated())
            .unwrap_or(false)
    }

    pub fn emit(&mut self, instruction: Instruction) {
        match self.current {
            Some(block) => self.blocks[block.index()].add_instruction(instruction),
            None => self.global_instructions.push(instruction),
        }
    }

    pub fn global_instructions(&self) -> &[Instruction] {
        &self.global_instructions
    }

    pub fn allocate_register(&mut self) -> Register {
        let register = Register(self.next_register);
        self.next_register += 1;
        register
    }

    pub fn register_count(&self) -> usize {
        self.next_register as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::instruction::Operand;

    #[test]
    fn test_emit_targets_current_block() {
        let mut generator = Generator::new();
        let block = generator.create_block("entry");

        generator.emit(Instruction::Boolean {
            dst: Register(0),
            value: true,
        });
        assert_eq!(generator.global_instructions().len(), 1);

        generator.switch_to(Some(block));
        generator.emit(Instruction::Move {
            dst: Register(1),
            src: Operand::None,
        });

        assert_eq!(generator.block(block).instructions.len(), 1);
        assert_eq!(generator.global_instructions().len(), 1);
    }

    #[test]
    fn test_register_allocation_is_sequential() {
        let mut generator = Generator::new();

        assert_eq!(generator.allocate_register(), Register(0));
        assert_eq!(generator.allocate_register(), Register(1));
        assert_eq!(generator.register_count(), 2);
    }

    #[test]
    fn test_blocks_are_auto_named() {
        let mut generator = Generator::new();

        let first = generator.create_block("");
        let second = generator.create_block("merge");

        assert_eq!(generator.block(first).name, "bb0");
        assert_eq!(generator.block(second).name, "merge");
    }
}
