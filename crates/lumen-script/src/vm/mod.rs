//! The virtual machine.
//!
//! A [`Script`] owns a loaded program, a garbage-collected heap and a table
//! of execution threads. The main thread runs chunk initializers and host
//! calls; [`Script::spawn`] starts a function on a new OS thread that
//! shares the heap and the globals.
//!
//! ```text
//!              ┌────────────── VmState ──────────────┐
//!  host ──────▶│ program   heap   globals   threads  │
//!              └──────────────────────────┬──────────┘
//!                      ┌──────────────────┼─────────────┐
//!                   main (0)          thread 1   ...  thread n
//! ```

mod interpreter;
mod program;
mod state;
mod thread;

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{self, Receiver};
use tracing::{debug, info};

use crate::bytecode::{Artifact, FLAG_NATIVE, FLAG_VOID, Static};
use crate::config::VmConfig;
use crate::gc::{HeapObject, HeapStats};
use crate::runtime::{BindingContext, Value};
use crate::{Error, Result};

use program::Program;
use thread::ThreadSlot;

pub(crate) use state::VmState;
pub use thread::ThreadStatus;

/// A script function resolved by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionHandle {
    chunk: u32,
    function: u32,
    arity: u8,
    void: bool,
}

impl FunctionHandle {
    /// Number of parameters.
    pub fn arity(&self) -> u8 {
        self.arity
    }

    /// Whether the function returns nothing.
    pub fn is_void(&self) -> bool {
        self.void
    }
}

/// A running script.
///
/// Cloning yields another handle to the same VM.
#[derive(Clone)]
pub struct Script {
    state: Arc<VmState>,
}

impl Script {
    /// Loads `artifact`, binds its natives from `bindings` and runs every
    /// chunk's initializer on the main thread.
    pub fn run(artifact: &Artifact, bindings: &BindingContext, config: VmConfig) -> Result<Self> {
        let program = Program::load(artifact, bindings)?;
        let script = Self {
            state: Arc::new(VmState::new(program, config)),
        };
        script.initialize()?;
        info!(
            chunks = artifact.chunks().len(),
            threads = script.state.config.max_threads,
            "script started"
        );
        Ok(script)
    }

    fn initialize(&self) -> Result<()> {
        let main = self.main()?;
        let _entry = self.state.main_entry.lock();
        for (index, chunk) in self.state.program.chunks().iter().enumerate() {
            if let Some(init) = chunk.init() {
                debug!(chunk = index, "running initializer");
                interpreter::invoke(&self.state, &main, index as u32, init, &[])?;
            }
        }
        Ok(())
    }

    fn main(&self) -> Result<Arc<ThreadSlot>> {
        self.state
            .main()
            .ok_or_else(|| Error::InvalidCall("main thread is gone".into()))
    }

    /// Looks up a script function by name, searching chunks in order.
    pub fn function(&self, name: &str) -> Option<FunctionHandle> {
        self.state
            .program
            .chunks()
            .iter()
            .enumerate()
            .find_map(|(index, chunk)| {
                let id = chunk.function(name)?;
                match chunk.statics().get(id as usize)? {
                    Static::Function { arity, flags, .. } if flags & FLAG_NATIVE == 0 => {
                        Some(FunctionHandle {
                            chunk: index as u32,
                            function: id,
                            arity: *arity,
                            void: flags & FLAG_VOID != 0,
                        })
                    }
                    _ => None,
                }
            })
    }

    /// Calls a function on the main thread and returns its result, or
    /// [`Value::None`] for a void function.
    ///
    /// Calls from several host threads are serialized.
    pub fn call_function(&self, function: &FunctionHandle, args: &[Value]) -> Result<Value> {
        if !self.is_good() {
            return Err(Error::VmNotGood);
        }
        let main = self.main()?;
        let _entry = self.state.main_entry.lock();
        interpreter::invoke(&self.state, &main, function.chunk, function.function, args)
    }

    /// Starts a function on a new execution thread.
    ///
    /// Fails with [`Error::ThreadLimit`] when `max_threads` threads are
    /// already running, counting the main thread.
    pub fn spawn(&self, function: &FunctionHandle, args: &[Value]) -> Result<ThreadHandle> {
        if !self.is_good() {
            return Err(Error::VmNotGood);
        }
        if usize::from(function.arity) != args.len() {
            return Err(Error::InvalidCall(format!(
                "function takes {} arguments, {} given",
                function.arity,
                args.len()
            )));
        }

        let slot = {
            let mut threads = self.state.threads.write();
            let live = threads.iter().flatten().count();
            let limit = self.state.config.max_threads;
            if live >= limit {
                return Err(Error::ThreadLimit(limit));
            }
            let id = threads
                .iter()
                .skip(1)
                .position(Option::is_none)
                .map_or(threads.len(), |free| free + 1);
            let slot = Arc::new(ThreadSlot::new(id));
            if id == threads.len() {
                threads.push(Some(slot.clone()));
            } else {
                threads[id] = Some(slot.clone());
            }
            slot
        };

        let id = slot.id;
        let state = self.state.clone();
        let function = *function;
        let args = args.to_vec();
        let (sender, receiver) = channel::bounded(1);
        let spawned = std::thread::Builder::new()
            .name(format!("lumen-{}", id))
            .spawn(move || {
                let result =
                    interpreter::invoke(&state, &slot, function.chunk, function.function, &args);
                release_slot(&state, &slot);
                debug!(thread = id, ok = result.is_ok(), "thread finished");
                let _ = sender.send(result);
            });

        match spawned {
            Ok(handle) => {
                debug!(thread = id, "thread spawned");
                Ok(ThreadHandle {
                    id,
                    receiver,
                    handle: Some(handle),
                })
            }
            Err(err) => {
                let mut threads = self.state.threads.write();
                if let Some(entry) = threads.get_mut(id) {
                    *entry = None;
                }
                Err(Error::Spawn(err.to_string()))
            }
        }
    }

    /// Returns false once a fatal error occurred or the main thread halted
    /// on an unhandled exception.
    pub fn is_good(&self) -> bool {
        self.state.is_good()
    }

    /// Purges all runtime state, then runs the initializers again.
    ///
    /// Fails with [`Error::InvalidCall`] while spawned threads are alive.
    pub fn reset(&self) -> Result<()> {
        {
            let _entry = self.state.main_entry.lock();
            let spawned = self.state.spawned_threads();
            if spawned > 0 {
                return Err(Error::InvalidCall(format!(
                    "{} spawned threads are still running",
                    spawned
                )));
            }
            self.state.reset();
        }
        self.initialize()
    }

    /// Heap occupancy and collection counters.
    pub fn heap_stats(&self) -> HeapStats {
        self.state.heap.lock().stats()
    }

    /// Runs a full collection now and returns the number of objects freed.
    pub fn collect_garbage(&self) -> usize {
        let mut heap = self.state.heap.lock();
        self.state.collect(&mut heap, None)
    }

    /// Allocates a string for passing to script functions.
    ///
    /// The string stays alive until [`Script::release`] is called on it.
    pub fn new_string(&self, s: impl Into<String>) -> Result<Value> {
        self.state
            .allocate_pinned(HeapObject::Str(s.into()))
            .map(Value::Ref)
            .map_err(|err| Error::Fatal(err.to_string()))
    }

    /// Allows a value returned by [`Script::new_string`] to be collected.
    pub fn release(&self, value: Value) {
        if let Some(r) = value.as_ref() {
            self.state.heap.lock().unpin(r);
        }
    }

    /// Copies out the contents of a string value.
    ///
    /// Values a script returned are only guaranteed to be alive until the
    /// next call into the script.
    pub fn read_string(&self, value: Value) -> Option<String> {
        let r = value.as_ref()?;
        self.state.heap.lock().string(r).map(str::to_string)
    }

    /// Copies out the elements of an array or the fields of a struct.
    pub fn values(&self, value: Value) -> Option<Vec<Value>> {
        let r = value.as_ref()?;
        self.state.heap.lock().get(r)?.values().map(<[Value]>::to_vec)
    }
}

impl std::fmt::Debug for Script {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Script")
            .field("good", &self.is_good())
            .field("chunks", &self.state.program.chunks().len())
            .finish()
    }
}

fn release_slot(state: &VmState, slot: &Arc<ThreadSlot>) {
    let mut threads = state.threads.write();
    if let Some(entry) = threads.get_mut(slot.id) {
        if entry.as_ref().is_some_and(|s| Arc::ptr_eq(s, slot)) {
            *entry = None;
        }
    }
}

/// A spawned execution thread.
#[derive(Debug)]
pub struct ThreadHandle {
    id: usize,
    receiver: Receiver<Result<Value>>,
    handle: Option<JoinHandle<()>>,
}

impl ThreadHandle {
    /// The thread's id.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Whether the thread has finished.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Waits for the thread and returns its function's result.
    pub fn join(mut self) -> Result<Value> {
        let result = self
            .receiver
            .recv()
            .map_err(|_| Error::Fatal(format!("thread {} died", self.id)));
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        result?
    }
}
