//! Bytecode passes.
//!
//! Passes walk every function's blocks and instructions, then get one
//! finalize call once the whole module has been seen. They may delete
//! blocks and flip function flags but never reorder anything.

use std::collections::{HashMap, HashSet};

use crate::language::symbol::FunctionId;
use crate::language::State;

use super::basic_block::BlockId;
use super::instruction::Instruction;

pub trait Pass {
    fn run(&mut self, state: &mut State, function: FunctionId);

    fn finalize(&mut self, _state: &mut State) {}
}

#[derive(Default)]
pub struct PassManager {
    passes: Vec<Box<dyn Pass>>,
}

impl PassManager {
    pub fn new() -> Self {
        PassManager::default()
    }

    pub fn default_passes() -> Self {
        let mut manager = PassManager::new();
        manager.add_pass(Box::new(EliminateUnreachableBlocks::new()));
        manager
    }

    pub fn add_pass(&mut self, pass: Box<dyn Pass>) {
        self.passes.push(pass);
    }

    pub fn run(&mut self, state: &mut State) {
        let function_ids: Vec<FunctionId> = (0..state.functions.len() as u32)
            .map(FunctionId)
            .collect();

        for pass in &mut self.passes {
            for &function in &function_ids {
                pass.run(state, function);
            }

            pass.finalize(state);
        }
    }
}

/// Removes basic blocks nothing jumps to and computes which functions are
/// reachable from the entry point through `GetFunction` references.
pub struct EliminateUnreachableBlocks {
    block_use_count: HashMap<BlockId, usize>,
    /// Callers per function, from `GetFunction` sites.
    function_callers: HashMap<FunctionId, HashSet<FunctionId>>,
}

impl EliminateUnreachableBlocks {
    pub fn new() -> Self {
        EliminateUnreachableBlocks {
            block_use_count: HashMap::new(),
            function_callers: HashMap::new(),
        }
    }

    fn count_uses(&mut self, state: &State, function: FunctionId) {
        for &block in &state.function(function).blocks {
            for instruction in &state.generator.block(block).instructions {
                match instruction {
                    Instruction::Jump { target } => {
                        *self.block_use_count.entry(*target).or_default() += 1;
                    }
                    Instruction::JumpIf {
                        true_target,
                        false_target,
                        ..
                    } => {
                        *self.block_use_count.entry(*true_target).or_default() += 1;
                        *self.block_use_count.entry(*false_target).or_default() += 1;
                    }
                    Instruction::GetFunction {
                        function: callee, ..
                    } => {
                        self.function_callers
                            .entry(*callee)
                            .or_default()
                            .insert(function);
                    }
                    _ => {}
                }
            }
        }
    }

    /// Whether any chain of callers eventually reaches the entry point.
    /// `visited` breaks recursion cycles in the call graph.
    fn is_called(
        &self,
        state: &State,
        function: FunctionId,
        visited: &mut HashSet<FunctionId>,
    ) -> bool {
        if !visited.insert(function) {
            return false;
        }

        let Some(callers) = self.function_callers.get(&function) else {
            return false;
        };

        for &caller in callers {
            if caller == function {
                continue;
            }

            if state.is_entry_function(caller) || self.is_called(state, caller, visited) {
                return true;
            }
        }

        false
    }
}

impl Default for EliminateUnreachableBlocks {
    fn default() -> Self {
        EliminateUnreachableBlocks::new()
    }
}

impl Pass for EliminateUnreachableBlocks {
    fn run(&mut self, state: &mut State, function: FunctionId) {
        self.count_uses(state, function);

        let entry = state.function(function).entry_block;
        let unreachable: Vec<BlockId> = state
            .function(function)
            .blocks
            .iter()
            .copied()
            .filter(|&block| {
                Some(block) != entry
                    && self.block_use_count.get(&block).copied().unwrap_or(0) == 0
            })
            .collect();

        if !unreachable.is_empty() {
            log::debug!(
                "removing {} unreachable block(s) from '{}'",
                unreachable.len(),
                state.function(function).name
            );

            state
                .function_mut(function)
                .blocks
                .retain(|block| !unreachable.contains(block));
        }
    }

    fn finalize(&mut self, state: &mut State) {
        for index in 0..state.functions.len() as u32 {
            let function = FunctionId(index);

            if state.is_entry_function(function) {
                state.function_mut(function).is_used = true;
                continue;
            }

            let used = match self.function_callers.get(&function) {
                None => false,
                Some(callers) => callers.iter().any(|&caller| {
                    caller != function
                        && (state.is_entry_function(caller)
                            || self.is_called(state, caller, &mut HashSet::new()))
                }),
            };

            state.function_mut(function).is_used = used;
        }
    }
}
