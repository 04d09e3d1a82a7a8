//! Compiler and VM configuration.

/// Settings for one VM instance.
///
/// ```
/// use lumen_script::VmConfig;
///
/// let config = VmConfig::default().with_max_threads(4).with_gc_threshold(256);
/// assert_eq!(config.max_threads, 4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmConfig {
    /// Live object count that triggers the first collection
    pub gc_threshold: usize,
    /// Hard ceiling on live objects; reaching it is fatal
    pub heap_limit: usize,
    /// Execution threads alive at once, the main thread included
    pub max_threads: usize,
    /// Operand stack depth per thread
    pub stack_limit: usize,
    /// Call depth per thread
    pub frame_limit: usize,
    /// Instructions between yields of a thread's context
    pub safepoint_interval: u32,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            gc_threshold: 1024,
            heap_limit: 1 << 20,
            max_threads: 16,
            stack_limit: 64 * 1024,
            frame_limit: 1024,
            safepoint_interval: 1024,
        }
    }
}

impl VmConfig {
    /// Sets the initial collection threshold.
    pub fn with_gc_threshold(mut self, threshold: usize) -> Self {
        self.gc_threshold = threshold;
        self
    }

    /// Sets the hard heap ceiling.
    pub fn with_heap_limit(mut self, limit: usize) -> Self {
        self.heap_limit = limit;
        self
    }

    /// Sets the thread cap.
    pub fn with_max_threads(mut self, max: usize) -> Self {
        self.max_threads = max;
        self
    }

    /// Sets the operand stack depth.
    pub fn with_stack_limit(mut self, limit: usize) -> Self {
        self.stack_limit = limit;
        self
    }

    /// Sets the call depth.
    pub fn with_frame_limit(mut self, limit: usize) -> Self {
        self.frame_limit = limit;
        self
    }

    /// Sets how often a running thread yields its context.
    pub fn with_safepoint_interval(mut self, interval: u32) -> Self {
        self.safepoint_interval = interval.max(1);
        self
    }
}

/// Settings for one compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    /// Run the AST optimizer
    pub optimize: bool,
    /// File name used in diagnostics
    pub file_name: String,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            optimize: true,
            file_name: "<script>".to_string(),
        }
    }
}

impl CompileOptions {
    /// Turns the optimizer on or off.
    pub fn with_optimize(mut self, optimize: bool) -> Self {
        self.optimize = optimize;
        self
    }

    /// Sets the file name reported in diagnostics.
    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = name.into();
        self
    }
}
