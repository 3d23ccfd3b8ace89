//! An in-memory `Driver` double used by this crate's own tests.
//!
//! Simulates device memory as a plain byte-vector map and kernel execution
//! time as a per-stream virtual clock advanced by a configurable
//! per-function duration, which is enough to exercise every testable
//! property in isolation from a real device.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::driver::{ContextId, DeviceAttribute, Driver, EventHandle, FunctionHandle, KernelArg,
    ModuleHandle, StreamHandle};
use crate::error::{Error, Result};

#[derive(Default)]
struct State {
    memory: HashMap<u64, Vec<u8>>,
    functions: HashMap<(ModuleHandle, String), FunctionHandle>,
    function_names: HashMap<FunctionHandle, String>,
    durations_ms: HashMap<String, f64>,
    corrupt: HashMap<String, (u64, Vec<u8>)>,
    device_attrs: HashMap<(ContextId, DeviceAttributeKey), i64>,
    static_shared: HashMap<String, i64>,
    stream_clock: HashMap<u64, f64>,
    events: HashMap<u64, f64>,
    context_stack: Vec<ContextId>,
}

#[derive(PartialEq, Eq, Hash, Clone, Copy)]
enum DeviceAttributeKey {
    Optin,
    PerMultiprocessor,
}

/// A fake `Driver` for tests. Every counter below is a total call count,
/// exposed for assertions against the identity/memoization properties the
/// real caches promise.
#[derive(Default)]
pub struct FakeDriver {
    state: Mutex<State>,
    next_handle: AtomicU64,
    /// Number of times `compile_gpu_asm` has been invoked.
    pub compile_calls: AtomicU64,
    /// Number of times `module_load` has been invoked.
    pub module_loads: AtomicU64,
    /// Number of times `launch_kernel` has been invoked.
    pub launches: AtomicU64,
    /// Number of times `function_set_cache_config_prefer_shared` has been invoked.
    pub cache_config_prefer_shared_calls: AtomicU64,
    /// The `bytes` argument of the most recent `function_set_max_dynamic_shared_size` call.
    last_max_dynamic_shared_size: Mutex<Option<i64>>,
}

impl FakeDriver {
    pub fn new() -> FakeDriver {
        FakeDriver::default()
    }

    fn mint(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }

    /// Sets the simulated execution time, in milliseconds, for every launch
    /// of the function named `kernel_name`. Defaults to `1.0` if unset.
    pub fn set_duration_ms(&self, kernel_name: &str, ms: f64) {
        self.state.lock().unwrap().durations_ms.insert(kernel_name.to_string(), ms);
    }

    /// Registers that every launch of `kernel_name` overwrites `len` bytes
    /// at device pointer `ptr` with `fill`, simulating a candidate that
    /// corrupts an aliased buffer.
    pub fn set_corruption(&self, kernel_name: &str, ptr: u64, len: u64, fill: u8) {
        self.state.lock().unwrap().corrupt.insert(kernel_name.to_string(), (ptr, vec![fill; len as usize]));
    }

    /// Sets the device attribute value a `device_attribute` query returns.
    pub fn set_max_shared_memory_per_block_optin(&self, context: ContextId, bytes: i64) {
        self.state.lock().unwrap().device_attrs.insert((context, DeviceAttributeKey::Optin), bytes);
    }

    /// Sets the device attribute value a `device_attribute` query returns.
    pub fn set_max_shared_memory_per_multiprocessor(&self, context: ContextId, bytes: i64) {
        self.state.lock().unwrap().device_attrs.insert((context, DeviceAttributeKey::PerMultiprocessor), bytes);
    }

    /// Sets the static (non-dynamic) shared memory a function reports.
    pub fn set_static_shared_size(&self, kernel_name: &str, bytes: i64) {
        self.state.lock().unwrap().static_shared.insert(kernel_name.to_string(), bytes);
    }

    /// Directly writes bytes into the simulated device memory at `ptr`,
    /// for seeding a test's initial buffer contents.
    pub fn write_device_memory(&self, ptr: u64, bytes: &[u8]) {
        self.state.lock().unwrap().memory.insert(ptr, bytes.to_vec());
    }

    /// The `bytes` argument of the most recent `function_set_max_dynamic_shared_size`
    /// call, for asserting the dynamic shared-memory arithmetic.
    pub fn last_max_dynamic_shared_size(&self) -> Option<i64> {
        *self.last_max_dynamic_shared_size.lock().unwrap()
    }

    /// Reads back the simulated device memory at `ptr`, for asserting
    /// post-launch contents.
    pub fn read_device_memory(&self, ptr: u64, len: u64) -> Vec<u8> {
        let state = self.state.lock().unwrap();
        match state.memory.get(&ptr) {
            Some(buf) => {
                let mut out = buf.clone();
                out.resize(len as usize, 0);
                out
            }
            None => vec![0u8; len as usize],
        }
    }
}

impl Driver for FakeDriver {
    fn compile_gpu_asm(&self, cc_major: i32, cc_minor: i32, asm_text: &str) -> Result<Vec<u8>> {
        self.compile_calls.fetch_add(1, Ordering::Relaxed);
        Ok(format!("image:{}.{}:{}", cc_major, cc_minor, asm_text).into_bytes())
    }

    fn context_push_current(&self, context: ContextId) -> Result<()> {
        self.state.lock().unwrap().context_stack.push(context);
        Ok(())
    }

    fn context_pop_current(&self) -> Result<()> {
        self.state.lock().unwrap().context_stack.pop();
        Ok(())
    }

    fn stream_get_context(&self, stream: StreamHandle) -> Result<ContextId> {
        // A fake stream is bound to a context with the same numeric id;
        // every test that cares about distinct contexts uses distinct
        // stream handles to match.
        Ok(ContextId(stream.0))
    }

    fn stream_synchronize(&self, _stream: StreamHandle) -> Result<()> {
        Ok(())
    }

    fn device_attribute(&self, context: ContextId, attr: DeviceAttribute) -> Result<i64> {
        let key = match attr {
            DeviceAttribute::MaxSharedMemoryPerBlockOptin => DeviceAttributeKey::Optin,
            DeviceAttribute::MaxSharedMemoryPerMultiprocessor => DeviceAttributeKey::PerMultiprocessor,
        };
        let state = self.state.lock().unwrap();
        Ok(*state.device_attrs.get(&(context, key)).unwrap_or(&(64 * 1024)))
    }

    fn module_load(&self, _image: &[u8]) -> Result<ModuleHandle> {
        self.module_loads.fetch_add(1, Ordering::Relaxed);
        Ok(ModuleHandle(self.mint()))
    }

    fn module_get_function(&self, module: ModuleHandle, function_name: &str) -> Result<FunctionHandle> {
        let mut state = self.state.lock().unwrap();
        if let Some(handle) = state.functions.get(&(module, function_name.to_string())) {
            return Ok(*handle);
        }
        let handle = FunctionHandle(self.mint());
        state.functions.insert((module, function_name.to_string()), handle);
        state.function_names.insert(handle, function_name.to_string());
        Ok(handle)
    }

    fn function_set_cache_config_prefer_shared(&self, _function: FunctionHandle) -> Result<()> {
        self.cache_config_prefer_shared_calls.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn function_set_max_dynamic_shared_size(&self, _function: FunctionHandle, bytes: i64) -> Result<()> {
        *self.last_max_dynamic_shared_size.lock().unwrap() = Some(bytes);
        Ok(())
    }

    fn function_static_shared_size_bytes(&self, function: FunctionHandle) -> Result<i64> {
        let state = self.state.lock().unwrap();
        let name = state.function_names.get(&function).cloned().unwrap_or_default();
        Ok(*state.static_shared.get(&name).unwrap_or(&0))
    }

    fn memset_async(&self, _stream: StreamHandle, ptr: crate::driver::DevicePtr, len: u64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.memory.insert(ptr.0, vec![0u8; len as usize]);
        Ok(())
    }

    fn memcpy_dtoh_async(&self, _stream: StreamHandle, dst: &mut [u8], src: crate::driver::DevicePtr, len: u64) -> Result<()> {
        let state = self.state.lock().unwrap();
        let data = state.memory.get(&src.0).cloned().unwrap_or_default();
        for i in 0..(len as usize).min(dst.len()) {
            dst[i] = *data.get(i).unwrap_or(&0);
        }
        Ok(())
    }

    fn memcpy_htod_async(&self, _stream: StreamHandle, dst: crate::driver::DevicePtr, src: &[u8], len: u64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let mut buf = vec![0u8; len as usize];
        for i in 0..(len as usize).min(src.len()) {
            buf[i] = src[i];
        }
        state.memory.insert(dst.0, buf);
        Ok(())
    }

    fn launch_kernel(
        &self,
        stream: StreamHandle,
        function: FunctionHandle,
        _grid: (u32, u32, u32),
        _block: (u32, u32, u32),
        _shared_mem_bytes: u32,
        _args: &[KernelArg],
    ) -> Result<()> {
        self.launches.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock().unwrap();
        let name = state.function_names.get(&function).cloned().unwrap_or_default();
        let duration = *state.durations_ms.get(&name).unwrap_or(&1.0);
        *state.stream_clock.entry(stream.0).or_insert(0.0) += duration;

        if let Some((ptr, pattern)) = state.corrupt.get(&name).cloned() {
            state.memory.insert(ptr, pattern);
        }
        Ok(())
    }

    fn event_create(&self) -> Result<EventHandle> {
        Ok(EventHandle(self.mint()))
    }

    fn event_record(&self, event: EventHandle, stream: StreamHandle) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let now = *state.stream_clock.get(&stream.0).unwrap_or(&0.0);
        state.events.insert(event.0, now);
        Ok(())
    }

    fn event_synchronize(&self, _event: EventHandle) -> Result<()> {
        Ok(())
    }

    fn event_elapsed_ms(&self, start: EventHandle, stop: EventHandle) -> Result<f64> {
        let state = self.state.lock().unwrap();
        let t0 = *state.events.get(&start.0).ok_or_else(|| Error::device("unknown start event"))?;
        let t1 = *state.events.get(&stop.0).ok_or_else(|| Error::device("unknown stop event"))?;
        Ok(t1 - t0)
    }

    fn event_destroy(&self, event: EventHandle) -> Result<()> {
        self.state.lock().unwrap().events.remove(&event.0);
        Ok(())
    }
}
