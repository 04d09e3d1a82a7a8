//! Host functions and bindings.
//!
//! A native function receives a [`NativeCall`] holding copies of its
//! arguments, writes its result into it and returns a [`NativeStatus`].
//! The calling thread's context is released for the duration of the call,
//! so a slow native does not hold up collections on other threads.
//!
//! Objects a native allocates through the call stay pinned until the
//! interpreter has stored the result, so they survive any collection that
//! runs in between.

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::Value;
use crate::gc::{GcRef, HeapError, HeapObject};
use crate::vm::VmState;

/// Outcome of a native call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeStatus {
    /// The result slot holds the return value
    Ok,
    /// The error slot holds a message; it is thrown as a script exception
    Error,
}

/// A host function callable from scripts.
pub type NativeFn = Arc<dyn Fn(&mut NativeCall<'_>) -> NativeStatus + Send + Sync>;

/// One invocation of a native function.
pub struct NativeCall<'a> {
    thread: usize,
    args: &'a [Value],
    result: Value,
    error: Option<String>,
    state: &'a VmState,
    pinned: Vec<GcRef>,
    overflow: Option<HeapError>,
}

/// What the interpreter needs back from a finished native call.
pub(crate) struct NativeOutcome {
    pub(crate) result: Value,
    pub(crate) error: Option<String>,
    pub(crate) pinned: Vec<GcRef>,
    pub(crate) overflow: Option<HeapError>,
}

impl<'a> NativeCall<'a> {
    pub(crate) fn new(state: &'a VmState, thread: usize, args: &'a [Value]) -> Self {
        Self {
            thread,
            args,
            result: Value::None,
            error: None,
            state,
            pinned: Vec::new(),
            overflow: None,
        }
    }

    /// Id of the execution thread making the call.
    pub fn thread(&self) -> usize {
        self.thread
    }

    /// Number of arguments passed.
    pub fn argc(&self) -> usize {
        self.args.len()
    }

    /// All arguments, in order.
    pub fn args(&self) -> &[Value] {
        self.args
    }

    /// Argument `index`, or none when absent.
    pub fn arg(&self, index: usize) -> Value {
        self.args.get(index).copied().unwrap_or_default()
    }

    /// Sets the return value.
    pub fn set_result(&mut self, value: Value) {
        self.result = value;
    }

    /// The return value set so far.
    pub fn result(&self) -> Value {
        self.result
    }

    /// Records an error message and returns [`NativeStatus::Error`].
    pub fn fail(&mut self, message: impl Into<String>) -> NativeStatus {
        self.error = Some(message.into());
        NativeStatus::Error
    }

    /// The recorded error message.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Allocates a string on the script heap.
    pub fn new_string(&mut self, s: impl Into<String>) -> Result<Value, HeapError> {
        self.allocate(HeapObject::Str(s.into()))
    }

    /// Allocates an array on the script heap.
    pub fn new_array(&mut self, values: Vec<Value>) -> Result<Value, HeapError> {
        self.allocate(HeapObject::Array(values))
    }

    fn allocate(&mut self, object: HeapObject) -> Result<Value, HeapError> {
        match self.state.allocate_pinned(object) {
            Ok(r) => {
                self.pinned.push(r);
                Ok(Value::Ref(r))
            }
            Err(err) => {
                self.overflow = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Copies out the contents of a string value.
    pub fn string(&self, value: Value) -> Option<String> {
        let r = value.as_ref()?;
        self.state.heap.lock().string(r).map(str::to_string)
    }

    /// Copies out the elements of an array or the fields of a struct.
    pub fn values(&self, value: Value) -> Option<Vec<Value>> {
        let r = value.as_ref()?;
        self.state.heap.lock().get(r)?.values().map(<[Value]>::to_vec)
    }

    pub(crate) fn finish(self) -> NativeOutcome {
        NativeOutcome {
            result: self.result,
            error: self.error,
            pinned: self.pinned,
            overflow: self.overflow,
        }
    }
}

/// Host implementations and values bound to a script by name.
///
/// ```
/// use lumen_script::{BindingContext, NativeStatus, Value};
///
/// let mut bindings = BindingContext::new();
/// bindings
///     .bind_native("twice", |call| {
///         match call.arg(0) {
///             Value::I32(v) => call.set_result(Value::I32(v * 2)),
///             _ => return call.fail("expected i32"),
///         }
///         NativeStatus::Ok
///     })
///     .bind_global("limit", Value::I32(10));
/// assert!(bindings.native("twice").is_some());
/// ```
#[derive(Clone, Default)]
pub struct BindingContext {
    natives: FxHashMap<String, NativeFn>,
    globals: FxHashMap<String, Value>,
}

impl BindingContext {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a native function implementation.
    pub fn bind_native<F>(&mut self, name: impl Into<String>, function: F) -> &mut Self
    where
        F: Fn(&mut NativeCall<'_>) -> NativeStatus + Send + Sync + 'static,
    {
        self.natives.insert(name.into(), Arc::new(function));
        self
    }

    /// Binds the initial value of a native global.
    ///
    /// Bound values are scalars or native references; heap values do not
    /// exist before the VM does.
    pub fn bind_global(&mut self, name: impl Into<String>, value: Value) -> &mut Self {
        self.globals.insert(name.into(), value);
        self
    }

    /// Looks up a native implementation.
    pub fn native(&self, name: &str) -> Option<&NativeFn> {
        self.natives.get(name)
    }

    /// Looks up a global value.
    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.get(name).copied()
    }
}

impl fmt::Debug for BindingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut natives: Vec<_> = self.natives.keys().collect();
        natives.sort();
        let mut globals: Vec<_> = self.globals.iter().collect();
        globals.sort_by(|a, b| a.0.cmp(b.0));
        f.debug_struct("BindingContext")
            .field("natives", &natives)
            .field("globals", &globals)
            .finish()
    }
}
