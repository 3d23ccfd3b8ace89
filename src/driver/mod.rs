//! The GPU driver surface, abstracted as a trait so the rest of the crate is
//! testable without a real device.
//!
//! Splits a thin, opaque FFI handle layer from a wrapping layer that turns
//! raw statuses into `Result`s — here the FFI layer is the `Driver`
//! implementation and every handle is an opaque newtype the core logic
//! never inspects, only threads back through.

#[cfg(feature = "cuda")]
pub mod cuda;
pub mod fake;

use crate::error::Result;

/// A device context, pushed/popped around context-scoped driver calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(pub u64);

/// A caller-supplied stream; launches and async copies are enqueued on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle(pub u64);

/// A loaded module, scoped to the context it was loaded into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleHandle(pub u64);

/// A resolved device function, scoped to `(module, context)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionHandle(pub u64);

/// A timing event used to bracket a Benchmark run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventHandle(pub u64);

/// The numeric value of a device pointer, as handed in the `buffers` array.
/// Divisibility checks operate directly on this integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DevicePtr(pub u64);

/// Device attributes the module/function resolver queries when configuring
/// dynamic shared memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceAttribute {
    MaxSharedMemoryPerBlockOptin,
    MaxSharedMemoryPerMultiprocessor,
}

/// An argument slot passed to `launch_kernel`: either the address of a
/// caller-held scalar, or the address of a buffer-pointer slot. The driver
/// backend treats both uniformly as a `*const c_void` in the kernel-argument
/// array, matching the launch ABI's `void**`.
#[derive(Debug, Clone, Copy)]
pub enum KernelArg {
    /// The raw numeric value of a device pointer (an Array parameter).
    Pointer(DevicePtr),
    Bool(bool),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
}

/// The GPU driver API surface this crate depends on: context management,
/// module/function resolution, async memory ops, kernel launch, and timing
/// events. Every method returns `Result`; implementations never panic on a
/// recoverable driver failure.
pub trait Driver: Send + Sync {
    /// Lowers `asm_text` for `(cc_major, cc_minor)` into a loadable binary
    /// image via the external assembly compiler.
    fn compile_gpu_asm(&self, cc_major: i32, cc_minor: i32, asm_text: &str) -> Result<Vec<u8>>;

    /// Pushes `context` as the thread's current context.
    fn context_push_current(&self, context: ContextId) -> Result<()>;

    /// Pops the thread's current context, restoring whatever was current
    /// before the matching push.
    fn context_pop_current(&self) -> Result<()>;

    /// Returns the context a stream is bound to.
    fn stream_get_context(&self, stream: StreamHandle) -> Result<ContextId>;

    /// Blocks until all work enqueued on `stream` has completed.
    fn stream_synchronize(&self, stream: StreamHandle) -> Result<()>;

    /// Queries a device attribute for the device backing `context`.
    fn device_attribute(&self, context: ContextId, attr: DeviceAttribute) -> Result<i64>;

    /// Loads `image` as a module into the current context.
    fn module_load(&self, image: &[u8]) -> Result<ModuleHandle>;

    /// Resolves `function_name` within `module` (the current context's
    /// binding of that module).
    fn module_get_function(&self, module: ModuleHandle, function_name: &str) -> Result<FunctionHandle>;

    /// Sets the function's cache-config preference to prefer shared memory.
    fn function_set_cache_config_prefer_shared(&self, function: FunctionHandle) -> Result<()>;

    /// Sets the function's dynamic shared-memory ceiling for one launch.
    fn function_set_max_dynamic_shared_size(&self, function: FunctionHandle, bytes: i64) -> Result<()>;

    /// Returns the function's static (non-dynamic) shared memory usage.
    fn function_static_shared_size_bytes(&self, function: FunctionHandle) -> Result<i64>;

    /// Asynchronously zeroes `len` bytes at `ptr` on `stream`.
    fn memset_async(&self, stream: StreamHandle, ptr: DevicePtr, len: u64) -> Result<()>;

    /// Asynchronously copies `len` bytes from `src` (device) to `dst` (host).
    fn memcpy_dtoh_async(&self, stream: StreamHandle, dst: &mut [u8], src: DevicePtr, len: u64) -> Result<()>;

    /// Asynchronously copies `len` bytes from `src` (host) to `dst` (device).
    fn memcpy_htod_async(&self, stream: StreamHandle, dst: DevicePtr, src: &[u8], len: u64) -> Result<()>;

    /// Enqueues a kernel launch on `stream`.
    #[allow(clippy::too_many_arguments)]
    fn launch_kernel(
        &self,
        stream: StreamHandle,
        function: FunctionHandle,
        grid: (u32, u32, u32),
        block: (u32, u32, u32),
        shared_mem_bytes: u32,
        args: &[KernelArg],
    ) -> Result<()>;

    /// Creates a timing event.
    fn event_create(&self) -> Result<EventHandle>;

    /// Records `event` on `stream`.
    fn event_record(&self, event: EventHandle, stream: StreamHandle) -> Result<()>;

    /// Blocks until `event` has been recorded and reached.
    fn event_synchronize(&self, event: EventHandle) -> Result<()>;

    /// Returns the elapsed time, in milliseconds, between two recorded
    /// events.
    fn event_elapsed_ms(&self, start: EventHandle, stop: EventHandle) -> Result<f64>;

    /// Destroys an event.
    fn event_destroy(&self, event: EventHandle) -> Result<()>;
}

/// Pushes `context` as current, runs `f`, and pops on every exit path
/// (including when `f` errors), matching the context discipline every
/// context-scoped driver call in this crate follows. If both `f` and the
/// pop itself fail, the pop's error is what's returned; `f`'s error is lost.
pub fn with_context<T>(driver: &dyn Driver, context: ContextId, f: impl FnOnce() -> Result<T>) -> Result<T> {
    driver.context_push_current(context)?;
    let result = f();
    driver.context_pop_current()?;
    result
}
