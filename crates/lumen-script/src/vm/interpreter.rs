//! The bytecode interpreter.
//!
//! Each step decodes one instruction from the shared byte stream and
//! executes it against the thread's context. A step either continues,
//! returns to the host, or fails with a [`Fault`]: a thrown value that the
//! loop unwinds to the innermost guard, or a fatal error that halts the
//! thread and makes the VM bad.
//!
//! Operands that an allocation needs stay on the stack until the
//! allocation is done, so a collection triggered by it still sees them.

use bytes::Bytes;
use parking_lot::MutexGuard;
use tracing::{debug, trace, warn};

use super::state::{MAIN_THREAD, VmState};
use super::thread::{
    EXCEPTION_REGISTER, Frame, Guard, RETURN_REGISTER, ThreadContext, ThreadSlot, ThreadStatus,
};
use crate::bytecode::{FLAG_NATIVE, Instruction, Static};
use crate::gc::{GcRef, Heap, HeapObject};
use crate::runtime::{ArithOp, CompareOp, NativeCall, NativeRef, NativeStatus, Value, ValueError};
use crate::{Error, Result};

/// Why a step did not complete.
#[derive(Debug)]
enum Fault {
    /// A script exception
    Throw(Value),
    /// A VM-fatal condition
    Fatal(String),
}

type Step<T = ()> = std::result::Result<T, Fault>;

enum Flow {
    Continue,
    Return(Value),
}

/// Failure of a heap object access.
enum Access {
    Null,
    OutOfRange { index: i128, len: usize },
    Invalid(&'static str),
}

fn fatal(message: impl Into<String>) -> Fault {
    Fault::Fatal(message.into())
}

/// Calls a script function on a thread and runs it to completion.
pub(crate) fn invoke(
    state: &VmState,
    slot: &ThreadSlot,
    chunk: u32,
    function: u32,
    args: &[Value],
) -> Result<Value> {
    let (entry, arity, name) = match state.program.static_object(chunk, function) {
        Some(Static::Function {
            entry,
            arity,
            flags,
            name,
        }) if flags & FLAG_NATIVE == 0 => (*entry, *arity, name.as_str()),
        _ => return Err(Error::InvalidCall("not a script function".into())),
    };
    if usize::from(arity) != args.len() {
        return Err(Error::InvalidCall(format!(
            "'{}' takes {} arguments, {} given",
            name,
            arity,
            args.len()
        )));
    }
    let code = state
        .program
        .chunk(chunk)
        .map(|c| c.code().clone())
        .ok_or_else(|| Error::InvalidCall("no such chunk".into()))?;

    let mut ctx = slot.context.lock();
    if ctx.status != ThreadStatus::Idle {
        return Err(Error::InvalidCall(format!(
            "thread {} is {:?}",
            slot.id, ctx.status
        )));
    }
    let base = ctx.stack.len();
    let entry_frames = ctx.frames.len();
    let entry_guards = ctx.guards.len();
    ctx.stack.extend_from_slice(args);
    let saved = ctx.registers;
    ctx.frames.push(Frame {
        base,
        return_chunk: chunk,
        return_ip: 0,
        saved,
        host_entry: true,
    });
    ctx.status = ThreadStatus::Running;
    trace!(thread = slot.id, function = name, "invoke");

    let mut interpreter = Interpreter {
        state,
        thread: slot.id,
        ctx,
        chunk,
        code,
        ip: entry as usize,
        base,
        entry_frames,
        entry_guards,
        ticks: 0,
    };
    interpreter.run()
}

struct Interpreter<'s> {
    state: &'s VmState,
    thread: usize,
    ctx: MutexGuard<'s, ThreadContext>,
    chunk: u32,
    code: Bytes,
    ip: usize,
    /// Stack index of the current function's first argument
    base: usize,
    entry_frames: usize,
    entry_guards: usize,
    ticks: u32,
}

impl<'s> Interpreter<'s> {
    fn run(&mut self) -> Result<Value> {
        loop {
            self.safepoint();
            let fault = match self.step() {
                Ok(Flow::Continue) => continue,
                Ok(Flow::Return(value)) => {
                    self.ctx.status = ThreadStatus::Idle;
                    return Ok(value);
                }
                Err(fault) => fault,
            };
            match fault {
                Fault::Throw(exception) => self.unwind(exception)?,
                Fault::Fatal(message) => return Err(self.halt_fatal(message)),
            }
        }
    }

    /// Yields the context to a waiting collector now and then.
    #[inline]
    fn safepoint(&mut self) {
        self.ticks += 1;
        if self.ticks >= self.state.config.safepoint_interval {
            self.ticks = 0;
            MutexGuard::bump(&mut self.ctx);
        }
    }

    fn step(&mut self) -> Step<Flow> {
        let (instruction, next) =
            Instruction::decode(&self.code, self.ip).map_err(|err| fatal(err.to_string()))?;
        self.ip = next;

        match instruction {
            Instruction::Nop => {}
            Instruction::Push(value) => self.push(value),
            Instruction::LoadStatic(id) => self.load_static(id)?,
            Instruction::Pop => {
                self.pop()?;
            }
            Instruction::PopN(n) => {
                let start = self.top(usize::from(n))?;
                self.ctx.stack.truncate(start);
            }
            Instruction::Dup => {
                let value = self.peek(0)?;
                self.push(value);
            }
            Instruction::Dup2 => {
                let (a, b) = (self.peek(1)?, self.peek(0)?);
                self.push(a);
                self.push(b);
            }
            Instruction::LoadLocal(slot) => {
                let value = *self.local(slot)?;
                self.push(value);
            }
            Instruction::StoreLocal(slot) => {
                let value = self.pop()?;
                *self.local(slot)? = value;
            }
            Instruction::LoadGlobal(index) => {
                let value = self
                    .state
                    .globals
                    .read()
                    .get(self.chunk as usize)
                    .and_then(|table| table.get(index as usize))
                    .copied()
                    .ok_or_else(|| fatal(format!("global {} out of range", index)))?;
                self.push(value);
            }
            Instruction::StoreGlobal(index) => {
                let value = self.pop()?;
                self.set_global(index, value)?;
            }
            Instruction::InitGlobals(count) => {
                let mut globals = self.state.globals.write();
                let table = globals
                    .get_mut(self.chunk as usize)
                    .ok_or_else(|| fatal("no global table"))?;
                *table = vec![Value::None; count as usize];
            }
            Instruction::BindGlobal { global, name } => {
                let program = &self.state.program;
                let value = match program.static_object(self.chunk, name) {
                    Some(Static::String(name)) => program.global_binding(name),
                    _ => None,
                }
                .ok_or_else(|| fatal("unbound native global"))?;
                self.set_global(global, value)?;
            }
            Instruction::LoadReg(r) => {
                let value = self.ctx.registers[usize::from(r)];
                self.push(value);
            }
            Instruction::StoreReg(r) => {
                let value = self.pop()?;
                self.ctx.registers[usize::from(r)] = value;
            }
            Instruction::Arith(op) => self.arith(op)?,
            Instruction::Compare(op) => self.compare(op)?,
            Instruction::Not | Instruction::TestZero => {
                let value = self.pop()?;
                self.push(Value::Bool(value.is_zero()));
            }
            Instruction::Neg => {
                let value = self.pop()?;
                let result = value.negate().map_err(|_| mismatch("-", value))?;
                self.push(result);
            }
            Instruction::BitNot => {
                let value = self.pop()?;
                let result = value.complement().map_err(|_| mismatch("~", value))?;
                self.push(result);
            }
            Instruction::Convert(tag) => {
                let value = self.peek(0)?;
                match value.convert(tag) {
                    Some(converted) => {
                        self.pop()?;
                        self.push(converted);
                    }
                    None => {
                        let message = format!("cannot convert {} to {}", value.tag().name(), tag.name());
                        return Err(self.raise(&message));
                    }
                }
            }
            Instruction::Jump(target) => self.ip = target as usize,
            Instruction::JumpIfTrue(target) => {
                if !self.pop()?.is_zero() {
                    self.ip = target as usize;
                }
            }
            Instruction::JumpIfFalse(target) => {
                if self.pop()?.is_zero() {
                    self.ip = target as usize;
                }
            }
            Instruction::Call { function, argc } => self.call(self.chunk, function, argc)?,
            Instruction::CallValue(argc) => self.call_value(argc)?,
            Instruction::Ret => {
                let value = self.pop()?;
                return self.ret(Some(value));
            }
            Instruction::RetVoid => return self.ret(None),
            Instruction::NewArray(count) => {
                let start = self.top(usize::from(count))?;
                let values = self.ctx.stack[start..].to_vec();
                let r = self.allocate(HeapObject::Array(values))?;
                self.ctx.stack.truncate(start);
                self.push(Value::Ref(r));
            }
            Instruction::NewStruct(descriptor) => {
                let count = match self.state.program.static_object(self.chunk, descriptor) {
                    Some(Static::Aggregate { members, .. }) => members.len(),
                    _ => return Err(fatal("NewStruct without an aggregate descriptor")),
                };
                let start = self.top(count)?;
                let fields = self.ctx.stack[start..].to_vec();
                let r = self.allocate(HeapObject::Struct {
                    chunk: self.chunk,
                    descriptor,
                    fields,
                })?;
                self.ctx.stack.truncate(start);
                self.push(Value::Ref(r));
            }
            Instruction::GetField(index) => {
                let target = self.peek(0)?;
                let value = self.access(target, |object| match object {
                    HeapObject::Struct { fields, .. } => fields
                        .get(usize::from(index))
                        .copied()
                        .ok_or(Access::Invalid("field index out of range")),
                    _ => Err(Access::Invalid("field access on a non-struct")),
                })?;
                self.pop()?;
                self.push(value);
            }
            Instruction::SetField(index) => {
                let (target, value) = (self.peek(1)?, self.peek(0)?);
                self.access(target, |object| match object {
                    HeapObject::Struct { fields, .. } => fields
                        .get_mut(usize::from(index))
                        .map(|field| *field = value)
                        .ok_or(Access::Invalid("field index out of range")),
                    _ => Err(Access::Invalid("field access on a non-struct")),
                })?;
                let start = self.top(2)?;
                self.ctx.stack.truncate(start);
            }
            Instruction::GetIndex => {
                let (target, index) = (self.peek(1)?, self.index_operand(0)?);
                let value = self.access(target, |object| match object {
                    HeapObject::Array(values) => element(values, index).copied(),
                    _ => Err(Access::Invalid("indexing a non-array")),
                })?;
                let start = self.top(2)?;
                self.ctx.stack.truncate(start);
                self.push(value);
            }
            Instruction::SetIndex => {
                let (target, index, value) = (self.peek(2)?, self.index_operand(1)?, self.peek(0)?);
                self.access(target, |object| match object {
                    HeapObject::Array(values) => {
                        *element(values, index)? = value;
                        Ok(())
                    }
                    _ => Err(Access::Invalid("indexing a non-array")),
                })?;
                let start = self.top(3)?;
                self.ctx.stack.truncate(start);
            }
            Instruction::Len => {
                let target = self.peek(0)?;
                let len = self.access(target, |object| match object {
                    HeapObject::Str(s) => Ok(s.len()),
                    HeapObject::Array(values) => Ok(values.len()),
                    _ => Err(Access::Invalid("length of a non-sequence")),
                })?;
                self.pop()?;
                self.push(Value::I32(len as i32));
            }
            Instruction::TryBegin(id) => {
                let handler = match self.state.program.static_object(self.chunk, id) {
                    Some(Static::Label(handler)) => *handler as usize,
                    _ => return Err(fatal("TryBegin without a label")),
                };
                let guard = Guard {
                    handler,
                    chunk: self.chunk,
                    frames: self.ctx.frames.len(),
                    height: self.ctx.stack.len(),
                };
                self.ctx.guards.push(guard);
            }
            Instruction::TryEnd => {
                if self.ctx.guards.len() <= self.entry_guards {
                    return Err(fatal("TryEnd without a try region"));
                }
                self.ctx.guards.pop();
            }
            Instruction::Throw => {
                let exception = self.pop()?;
                return Err(Fault::Throw(exception));
            }
        }

        if self.ctx.stack.len() > self.state.config.stack_limit {
            return Err(self.raise("stack overflow"));
        }
        Ok(Flow::Continue)
    }

    // ========================================================================
    // Stack
    // ========================================================================

    #[inline]
    fn push(&mut self, value: Value) {
        self.ctx.stack.push(value);
    }

    #[inline]
    fn pop(&mut self) -> Step<Value> {
        if self.ctx.stack.len() <= self.base {
            return Err(fatal("stack underflow"));
        }
        self.ctx.stack.pop().ok_or_else(|| fatal("stack underflow"))
    }

    /// The value `depth` places below the top.
    #[inline]
    fn peek(&self, depth: usize) -> Step<Value> {
        let at = self.top(depth + 1)?;
        Ok(self.ctx.stack[at])
    }

    /// Index of the lowest of the top `count` values.
    #[inline]
    fn top(&self, count: usize) -> Step<usize> {
        self.ctx
            .stack
            .len()
            .checked_sub(count)
            .filter(|start| *start >= self.base)
            .ok_or_else(|| fatal("stack underflow"))
    }

    fn local(&mut self, slot: u16) -> Step<&mut Value> {
        let at = self.base + usize::from(slot);
        self.ctx
            .stack
            .get_mut(at)
            .ok_or_else(|| fatal(format!("local {} out of range", slot)))
    }

    fn set_global(&mut self, index: u32, value: Value) -> Step {
        let mut globals = self.state.globals.write();
        let global = globals
            .get_mut(self.chunk as usize)
            .and_then(|table| table.get_mut(index as usize))
            .ok_or_else(|| fatal(format!("global {} out of range", index)))?;
        *global = value;
        Ok(())
    }

    fn index_operand(&self, depth: usize) -> Step<i128> {
        let value = self.peek(depth)?;
        value
            .as_i128()
            .ok_or_else(|| fatal(format!("index is {}", value.tag().name())))
    }

    // ========================================================================
    // Heap
    // ========================================================================

    /// Locks the heap without blocking while holding the context.
    fn heap(&mut self) -> MutexGuard<'s, Heap> {
        let state = self.state;
        if let Some(heap) = state.heap.try_lock() {
            return heap;
        }
        MutexGuard::unlocked(&mut self.ctx, || state.heap.lock())
    }

    fn allocate(&mut self, object: HeapObject) -> Step<GcRef> {
        let state = self.state;
        let mut heap = self.heap();
        state
            .allocate_in(&mut heap, Some((self.thread, &*self.ctx)), object)
            .map_err(|err| fatal(err.to_string()))
    }

    /// Runs `f` on the object `target` refers to.
    fn access<T>(
        &mut self,
        target: Value,
        f: impl FnOnce(&mut HeapObject) -> std::result::Result<T, Access>,
    ) -> Step<T> {
        let outcome = match target {
            Value::Ref(r) => {
                let mut heap = self.heap();
                match heap.get_mut(r) {
                    Some(object) => f(object),
                    None => Err(Access::Invalid("dangling reference")),
                }
            }
            Value::None => Err(Access::Null),
            _ => Err(Access::Invalid("not a reference")),
        };
        outcome.map_err(|access| match access {
            Access::Null => self.raise("null dereference"),
            Access::OutOfRange { index, len } => {
                self.raise(&format!("index {} out of range for length {}", index, len))
            }
            Access::Invalid(what) => fatal(what),
        })
    }

    /// Builds a catchable exception carrying `message`.
    fn raise(&mut self, message: &str) -> Fault {
        match self.allocate(HeapObject::Str(message.to_string())) {
            Ok(r) => Fault::Throw(Value::Ref(r)),
            Err(fault) => fault,
        }
    }

    fn load_static(&mut self, id: u32) -> Step {
        let state = self.state;
        let value = match state.program.static_object(self.chunk, id) {
            Some(Static::String(s)) => Value::Ref(self.allocate(HeapObject::Str(s.clone()))?),
            Some(Static::Function { flags, .. }) if flags & FLAG_NATIVE != 0 => {
                let native = state
                    .program
                    .native_ref(self.chunk, id)
                    .ok_or_else(|| fatal("unbound native"))?;
                Value::Native(native)
            }
            Some(Static::Function { .. }) => Value::Ref(self.allocate(HeapObject::Closure {
                chunk: self.chunk,
                function: id,
            })?),
            _ => return Err(fatal(format!("static {} cannot be loaded", id))),
        };
        self.push(value);
        Ok(())
    }

    // ========================================================================
    // Operators
    // ========================================================================

    fn arith(&mut self, op: ArithOp) -> Step {
        let (a, b) = (self.peek(1)?, self.peek(0)?);
        let result = match (op, a, b) {
            (ArithOp::Add, Value::Ref(x), Value::Ref(y)) => {
                let joined = {
                    let heap = self.heap();
                    match (heap.string(x), heap.string(y)) {
                        (Some(x), Some(y)) => Some([x, y].concat()),
                        _ => None,
                    }
                };
                let joined = joined.ok_or_else(|| fatal("'+' on non-string references"))?;
                Value::Ref(self.allocate(HeapObject::Str(joined))?)
            }
            _ => match Value::arith(op, a, b) {
                Ok(value) => value,
                Err(ValueError::DivisionByZero) => return Err(self.raise("division by zero")),
                Err(ValueError::TypeMismatch) => {
                    return Err(fatal(format!(
                        "operand mismatch: {} {:?} {}",
                        a.tag().name(),
                        op,
                        b.tag().name()
                    )));
                }
            },
        };
        let start = self.top(2)?;
        self.ctx.stack.truncate(start);
        self.push(result);
        Ok(())
    }

    fn compare(&mut self, op: CompareOp) -> Step {
        let b = self.pop()?;
        let a = self.pop()?;
        let result = match (op, a, b) {
            (CompareOp::Eq | CompareOp::Ne, Value::Ref(x), Value::Ref(y)) => {
                let heap = self.heap();
                let same = match (heap.string(x), heap.string(y)) {
                    (Some(left), Some(right)) => left == right,
                    _ => x == y,
                };
                same == (op == CompareOp::Eq)
            }
            _ => Value::compare(op, a, b).map_err(|_| {
                fatal(format!(
                    "cannot compare {} with {}",
                    a.tag().name(),
                    b.tag().name()
                ))
            })?,
        };
        self.push(Value::Bool(result));
        Ok(())
    }

    // ========================================================================
    // Calls
    // ========================================================================

    fn switch_chunk(&mut self, chunk: u32) -> Step {
        if chunk != self.chunk {
            self.code = self
                .state
                .program
                .chunk(chunk)
                .map(|c| c.code().clone())
                .ok_or_else(|| fatal(format!("no chunk {}", chunk)))?;
            self.chunk = chunk;
        }
        Ok(())
    }

    /// Calls the function descriptor `id` of `chunk` with the top `argc`
    /// values as arguments.
    fn call(&mut self, chunk: u32, id: u32, argc: u8) -> Step {
        let state = self.state;
        let (entry, arity) = match state.program.static_object(chunk, id) {
            Some(Static::Function { flags, .. }) if flags & FLAG_NATIVE != 0 => {
                let native = state
                    .program
                    .native_ref(chunk, id)
                    .ok_or_else(|| fatal("unbound native"))?;
                return self.call_native(native, argc, false);
            }
            Some(Static::Function { entry, arity, .. }) => (*entry as usize, *arity),
            _ => return Err(fatal(format!("static {} is not a function", id))),
        };
        if arity != argc {
            return Err(fatal(format!("function expects {} arguments, got {}", arity, argc)));
        }
        if self.ctx.frames.len() >= state.config.frame_limit {
            return Err(self.raise("stack overflow"));
        }
        let base = self.top(usize::from(argc))?;
        let saved = self.ctx.registers;
        self.ctx.frames.push(Frame {
            base,
            return_chunk: self.chunk,
            return_ip: self.ip,
            saved,
            host_entry: false,
        });
        self.switch_chunk(chunk)?;
        self.ip = entry;
        self.base = base;
        Ok(())
    }

    /// Calls the function value below the top `argc` values.
    fn call_value(&mut self, argc: u8) -> Step {
        let callee = self.peek(usize::from(argc))?;
        match callee {
            Value::Native(native) => self.call_native(native, argc, true),
            Value::Ref(_) => {
                let (chunk, function) = self.access(callee, |object| match object {
                    HeapObject::Closure { chunk, function } => Ok((*chunk, *function)),
                    _ => Err(Access::Invalid("calling a non-function")),
                })?;
                let at = self.top(usize::from(argc) + 1)?;
                self.ctx.stack.remove(at);
                self.call(chunk, function, argc)
            }
            Value::None => Err(self.raise("null dereference")),
            other => Err(fatal(format!("calling a {}", other.tag().name()))),
        }
    }

    fn call_native(&mut self, native: NativeRef, argc: u8, has_callee: bool) -> Step {
        let state = self.state;
        let entry = state
            .program
            .native(native)
            .ok_or_else(|| fatal("unbound native"))?;
        if entry.arity != argc {
            return Err(fatal(format!(
                "native '{}' expects {} arguments, got {}",
                entry.name, entry.arity, argc
            )));
        }
        let start = self.top(usize::from(argc) + usize::from(has_callee))?;
        let args = self.ctx.stack[start + usize::from(has_callee)..].to_vec();

        // The arguments stay on the stack, rooted, while the context is
        // released for the call.
        let thread = self.thread;
        let (status, outcome) = MutexGuard::unlocked(&mut self.ctx, || {
            let mut call = NativeCall::new(state, thread, &args);
            let status = (entry.function)(&mut call);
            (status, call.finish())
        });

        self.ctx.stack.truncate(start);
        if outcome.overflow.is_none() && status == NativeStatus::Ok && !entry.void {
            self.push(outcome.result);
        }
        // Root the result before unpinning; raise only after.
        if !outcome.pinned.is_empty() {
            let mut heap = self.heap();
            for r in outcome.pinned {
                heap.unpin(r);
            }
        }
        if let Some(err) = outcome.overflow {
            return Err(fatal(err.to_string()));
        }
        match status {
            NativeStatus::Ok => Ok(()),
            NativeStatus::Error => {
                let message = outcome
                    .error
                    .unwrap_or_else(|| format!("native '{}' failed", entry.name));
                Err(self.raise(&message))
            }
        }
    }

    fn ret(&mut self, value: Option<Value>) -> Step<Flow> {
        let frame = self
            .ctx
            .frames
            .pop()
            .ok_or_else(|| fatal("return without a frame"))?;
        let depth = self.ctx.frames.len();
        while self.ctx.guards.last().is_some_and(|guard| guard.frames > depth) {
            self.ctx.guards.pop();
        }
        self.ctx.stack.truncate(frame.base);
        self.ctx.registers = frame.saved;
        let result = value.unwrap_or_default();
        self.ctx.registers[RETURN_REGISTER] = result;

        if frame.host_entry {
            return Ok(Flow::Return(result));
        }
        self.switch_chunk(frame.return_chunk)?;
        self.ip = frame.return_ip;
        self.base = self.ctx.frames.last().map_or(0, |f| f.base);
        if value.is_some() {
            self.push(result);
        }
        Ok(Flow::Continue)
    }

    // ========================================================================
    // Exceptions
    // ========================================================================

    /// Transfers control to the innermost handler of this invocation, or
    /// halts the thread when there is none.
    fn unwind(&mut self, exception: Value) -> Result<()> {
        self.ctx.status = ThreadStatus::Unwinding;
        // Rooted until a handler takes it or the thread halts.
        self.ctx.registers[EXCEPTION_REGISTER] = exception;
        if self.ctx.guards.len() > self.entry_guards {
            if let Some(guard) = self.ctx.guards.pop() {
                while self.ctx.frames.len() > guard.frames {
                    if let Some(frame) = self.ctx.frames.pop() {
                        self.ctx.registers = frame.saved;
                    }
                }
                self.ctx.stack.truncate(guard.height);
                self.ctx.registers[EXCEPTION_REGISTER] = exception;
                if self.switch_chunk(guard.chunk).is_err() {
                    return Err(self.halt_fatal(format!("no chunk {}", guard.chunk)));
                }
                self.ip = guard.handler;
                self.base = self.ctx.frames.last().map_or(0, |f| f.base);
                self.ctx.status = ThreadStatus::Running;
                trace!(thread = self.thread, handler = guard.handler, "exception caught");
                return Ok(());
            }
        }

        let message = self.describe(exception);
        self.halt();
        warn!(thread = self.thread, %message, "unhandled exception");
        if self.thread == MAIN_THREAD {
            self.state.set_bad("unhandled exception on the main thread");
        }
        Err(Error::Unhandled {
            thread: self.thread,
            message,
        })
    }

    fn describe(&mut self, exception: Value) -> String {
        match exception {
            Value::Ref(r) => {
                let heap = self.heap();
                match heap.get(r) {
                    Some(HeapObject::Str(s)) => s.clone(),
                    Some(object) => format!("[{}]", object.kind()),
                    None => "[dangling reference]".to_string(),
                }
            }
            other => other.to_string(),
        }
    }

    /// Drops this invocation's frames, guards and values and halts.
    fn halt(&mut self) {
        let entry = self.entry_frames;
        if let Some(frame) = self.ctx.frames.get(entry).cloned() {
            self.ctx.stack.truncate(frame.base);
            self.ctx.registers = frame.saved;
        }
        self.ctx.frames.truncate(entry);
        self.ctx.guards.truncate(self.entry_guards);
        self.ctx.status = ThreadStatus::Halted;
        debug!(thread = self.thread, "thread halted");
    }

    fn halt_fatal(&mut self, message: String) -> Error {
        self.halt();
        self.state.set_bad(&message);
        Error::Fatal(message)
    }
}

/// The element at `index`, or an out-of-range access.
fn element(values: &mut [Value], index: i128) -> std::result::Result<&mut Value, Access> {
    let len = values.len();
    usize::try_from(index)
        .ok()
        .and_then(|i| values.get_mut(i))
        .ok_or(Access::OutOfRange { index, len })
}

fn mismatch(operator: &str, value: Value) -> Fault {
    fatal(format!("operator '{}' on {}", operator, value.tag().name()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Artifact, Chunk};
    use crate::config::VmConfig;
    use crate::runtime::BindingContext;
    use crate::vm::program::Program;
    use bytes::BytesMut;

    fn state(code: &[Instruction]) -> VmState {
        state_with_arity(code, 0)
    }

    fn state_with_arity(code: &[Instruction], arity: u8) -> VmState {
        let mut out = BytesMut::new();
        for instruction in code {
            instruction.encode(&mut out);
        }
        let chunk = Chunk::new(
            out.freeze(),
            vec![Static::Function {
                name: "f".into(),
                entry: 0,
                arity,
                flags: 0,
            }],
        );
        let program = Program::load(&Artifact::new(vec![chunk]), &BindingContext::new()).unwrap();
        VmState::new(program, VmConfig::default())
    }

    fn run(state: &VmState) -> Result<Value> {
        let main = state.main().unwrap();
        invoke(state, &main, 0, 0, &[])
    }

    #[test]
    fn test_dup2_and_registers() {
        let state = state(&[
            Instruction::Push(Value::I32(2)),
            Instruction::Push(Value::I32(5)),
            Instruction::Dup2,
            Instruction::Arith(ArithOp::Mul),
            Instruction::StoreReg(2),
            Instruction::Arith(ArithOp::Sub),
            Instruction::LoadReg(2),
            Instruction::Arith(ArithOp::Add),
            Instruction::Ret,
        ]);
        assert_eq!(run(&state).unwrap(), Value::I32(7));
        assert!(state.is_good());
    }

    #[test]
    fn test_stack_underflow_is_fatal() {
        let state = state(&[Instruction::Pop, Instruction::RetVoid]);
        assert!(matches!(run(&state), Err(Error::Fatal(msg)) if msg == "stack underflow"));
        assert!(!state.is_good());
        assert_eq!(state.main().unwrap().context.lock().status, ThreadStatus::Halted);
    }

    #[test]
    fn test_operand_mismatch_is_fatal() {
        let state = state(&[
            Instruction::Push(Value::I32(1)),
            Instruction::Push(Value::Bool(true)),
            Instruction::Arith(ArithOp::Add),
            Instruction::Ret,
        ]);
        assert!(matches!(run(&state), Err(Error::Fatal(_))));
        assert!(!state.is_good());
    }

    #[test]
    fn test_try_end_outside_a_region_is_fatal() {
        let state = state(&[Instruction::TryEnd, Instruction::RetVoid]);
        assert!(matches!(run(&state), Err(Error::Fatal(_))));
    }

    #[test]
    fn test_failed_conversion_throws() {
        let state = state(&[
            Instruction::Push(Value::None),
            Instruction::Convert(crate::runtime::Tag::I32),
            Instruction::Ret,
        ]);
        assert!(matches!(
            run(&state),
            Err(Error::Unhandled { thread: 0, message }) if message.starts_with("cannot convert")
        ));
    }

    #[test]
    fn test_idle_after_return() {
        let state = state(&[Instruction::Push(Value::Bool(true)), Instruction::Ret]);
        assert_eq!(run(&state).unwrap(), Value::Bool(true));
        let main = state.main().unwrap();
        let context = main.context.lock();
        assert_eq!(context.status, ThreadStatus::Idle);
        assert!(context.stack.is_empty());
        assert!(context.frames.is_empty());
        assert_eq!(context.registers[RETURN_REGISTER], Value::Bool(true));
    }

    #[test]
    fn test_thrown_value_stays_rooted_while_waiting_for_the_heap() {
        // The argument is the only other reference and is cleared before the throw.
        let state = state_with_arity(
            &[
                Instruction::LoadLocal(0),
                Instruction::Push(Value::None),
                Instruction::StoreLocal(0),
                Instruction::Throw,
            ],
            1,
        );
        let main = state.main().unwrap();
        let mut heap = state.heap.lock();
        let message = heap.insert(HeapObject::Str("kept".into())).unwrap();

        let result = std::thread::scope(|scope| {
            let thrower = scope.spawn(|| invoke(&state, &main, 0, 0, &[Value::Ref(message)]));
            loop {
                if let Some(context) = main.context.try_lock() {
                    if context.status == ThreadStatus::Unwinding {
                        break;
                    }
                }
                std::thread::yield_now();
            }
            state.collect(&mut heap, None);
            assert!(heap.get(message).is_some());
            drop(heap);
            thrower.join().unwrap()
        });
        assert!(matches!(result, Err(Error::Unhandled { message, .. }) if message == "kept"));
    }
}
