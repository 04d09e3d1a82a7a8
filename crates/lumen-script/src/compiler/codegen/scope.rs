//! Local slot tracking for code generation.
//!
//! Locals live on the operand stack directly above the frame base: a `let`
//! leaves its initializer on the stack and that position becomes the slot.
//! Every block remembers the depth it was opened at so leaving it can pop
//! exactly the locals it introduced.

use rustc_hash::FxHashMap;

use crate::ast::LocalId;
use crate::bytecode::Label;

/// Jump targets and unwind depths of an enclosing loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopTarget {
    /// Where `break` jumps
    pub break_label: Label,
    /// Where `continue` jumps
    pub continue_label: Label,
    /// Live locals at loop entry
    pub depth: u16,
    /// Active try regions at loop entry
    pub tries: u32,
}

/// Slot and nesting state of the function being compiled.
#[derive(Debug, Default)]
pub struct Scope {
    slots: FxHashMap<LocalId, u16>,
    depth: u16,
    blocks: Vec<u16>,
    loops: Vec<LoopTarget>,
    tries: u32,
}

impl Scope {
    /// Starts a function whose first `arity` slots hold its parameters.
    pub fn for_function(arity: u16) -> Self {
        Self {
            slots: (0..arity).map(|i| (LocalId(i as u32), i)).collect(),
            depth: arity,
            ..Self::default()
        }
    }

    /// Number of live local slots.
    pub fn depth(&self) -> u16 {
        self.depth
    }

    /// Opens a block.
    pub fn begin_block(&mut self) {
        self.blocks.push(self.depth);
    }

    /// Closes the innermost block and returns how many slots to pop.
    pub fn end_block(&mut self) -> u16 {
        let start = self.blocks.pop().unwrap_or(0);
        let count = self.depth - start;
        self.depth = start;
        count
    }

    /// Binds `id` to the next slot. `None` if the frame is full.
    pub fn declare(&mut self, id: LocalId) -> Option<u16> {
        let slot = self.depth;
        self.depth = self.depth.checked_add(1)?;
        self.slots.insert(id, slot);
        Some(slot)
    }

    /// Slot of a declared local.
    pub fn slot(&self, id: LocalId) -> Option<u16> {
        self.slots.get(&id).copied()
    }

    /// Enters a loop body.
    pub fn push_loop(&mut self, break_label: Label, continue_label: Label) {
        self.loops.push(LoopTarget {
            break_label,
            continue_label,
            depth: self.depth,
            tries: self.tries,
        });
    }

    /// Leaves the innermost loop.
    pub fn pop_loop(&mut self) {
        self.loops.pop();
    }

    /// The innermost loop.
    pub fn innermost_loop(&self) -> Option<LoopTarget> {
        self.loops.last().copied()
    }

    /// Enters a try region.
    pub fn enter_try(&mut self) {
        self.tries += 1;
    }

    /// Leaves a try region.
    pub fn exit_try(&mut self) {
        self.tries = self.tries.saturating_sub(1);
    }

    /// Active try regions.
    pub fn tries(&self) -> u32 {
        self.tries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameters_occupy_first_slots() {
        let scope = Scope::for_function(2);
        assert_eq!(scope.depth(), 2);
        assert_eq!(scope.slot(LocalId(1)), Some(1));
        assert_eq!(scope.slot(LocalId(2)), None);
    }

    #[test]
    fn test_block_pops_its_own_locals() {
        let mut scope = Scope::for_function(1);
        scope.begin_block();
        assert_eq!(scope.declare(LocalId(1)), Some(1));
        scope.begin_block();
        assert_eq!(scope.declare(LocalId(2)), Some(2));
        assert_eq!(scope.declare(LocalId(3)), Some(3));
        assert_eq!(scope.end_block(), 2);
        assert_eq!(scope.end_block(), 1);
        assert_eq!(scope.depth(), 1);
    }

    #[test]
    fn test_loop_records_entry_state() {
        let mut scope = Scope::for_function(0);
        scope.declare(LocalId(0));
        scope.enter_try();
        scope.push_loop(Label(0), Label(1));
        let target = scope.innermost_loop().unwrap();
        assert_eq!((target.depth, target.tries), (1, 1));
        scope.pop_loop();
        assert!(scope.innermost_loop().is_none());
    }
}
