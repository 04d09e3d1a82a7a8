//! Execution thread state.

use parking_lot::Mutex;

use crate::bytecode::REGISTER_COUNT;
use crate::runtime::Value;

/// Size of the register file.
pub(crate) const REGISTERS: usize = REGISTER_COUNT as usize;

/// Register holding the value returned by the last call.
pub(crate) const RETURN_REGISTER: usize = 0;
/// Register holding the exception a handler is entered with.
pub(crate) const EXCEPTION_REGISTER: usize = 1;

/// Lifecycle of an execution thread.
///
/// ```text
/// Idle ──call──▶ Running ──throw──▶ Unwinding ──handler──▶ Running
///   ▲              │                    │
///   └───return─────┘                    └──unhandled──▶ Halted
/// ```
///
/// VM-fatal conditions move any state straight to `Halted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    /// Waiting for work
    Idle,
    /// Executing bytecode
    Running,
    /// Searching for an exception handler
    Unwinding,
    /// Stopped by an unhandled exception or a fatal error
    Halted,
}

/// An active call.
#[derive(Debug, Clone)]
pub(crate) struct Frame {
    /// Stack index of the callee's first argument
    pub(crate) base: usize,
    /// Caller's chunk
    pub(crate) return_chunk: u32,
    /// Caller's next instruction
    pub(crate) return_ip: usize,
    /// Caller's registers, restored on return
    pub(crate) saved: [Value; REGISTERS],
    /// Returning from this frame hands control back to the host
    pub(crate) host_entry: bool,
}

/// An active try region.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Guard {
    /// Handler offset
    pub(crate) handler: usize,
    /// Chunk the handler lives in
    pub(crate) chunk: u32,
    /// Frame count when the region was entered
    pub(crate) frames: usize,
    /// Stack height when the region was entered
    pub(crate) height: usize,
}

/// The stack, registers, frames and guards of one thread.
#[derive(Debug)]
pub(crate) struct ThreadContext {
    pub(crate) stack: Vec<Value>,
    pub(crate) registers: [Value; REGISTERS],
    pub(crate) frames: Vec<Frame>,
    pub(crate) guards: Vec<Guard>,
    pub(crate) status: ThreadStatus,
}

impl ThreadContext {
    pub(crate) fn new() -> Self {
        Self {
            stack: Vec::new(),
            registers: [Value::None; REGISTERS],
            frames: Vec::new(),
            guards: Vec::new(),
            status: ThreadStatus::Idle,
        }
    }

    /// Every value this thread keeps alive.
    pub(crate) fn roots(&self) -> impl Iterator<Item = Value> + '_ {
        self.stack
            .iter()
            .chain(self.registers.iter())
            .chain(self.frames.iter().flat_map(|frame| frame.saved.iter()))
            .copied()
    }

    /// Drops everything and returns to idle.
    pub(crate) fn clear(&mut self) {
        *self = Self::new();
    }
}

/// A thread table entry.
#[derive(Debug)]
pub(crate) struct ThreadSlot {
    pub(crate) id: usize,
    pub(crate) context: Mutex<ThreadContext>,
}

impl ThreadSlot {
    pub(crate) fn new(id: usize) -> Self {
        Self {
            id,
            context: Mutex::new(ThreadContext::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::GcRef;

    #[test]
    fn test_roots_cover_saved_registers() {
        let mut context = ThreadContext::new();
        let a = Value::Ref(GcRef::new(1, 0));
        let b = Value::Ref(GcRef::new(2, 0));
        let c = Value::Ref(GcRef::new(3, 0));
        context.stack.push(a);
        context.registers[EXCEPTION_REGISTER] = b;
        let mut saved = [Value::None; REGISTERS];
        saved[2] = c;
        context.frames.push(Frame {
            base: 0,
            return_chunk: 0,
            return_ip: 0,
            saved,
            host_entry: true,
        });
        let refs: Vec<_> = context.roots().filter_map(|v| v.as_ref()).collect();
        assert_eq!(refs.len(), 3);
        for value in [a, b, c] {
            assert!(refs.contains(&value.as_ref().unwrap()));
        }
    }
}
