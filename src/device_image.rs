//! The device-image cache and per-image module/function resolver.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::driver::{self, ContextId, DeviceAttribute, Driver, FunctionHandle, ModuleHandle};
use crate::error::{Error, Result};

/// Shared memory above this is "dynamic" and requires device-specific
/// opt-in; at or below it, the driver's static default suffices.
const STATIC_SHARED_MEM_LIMIT: u32 = 48 * 1024;

/// A compiled binary device image plus its per-context load/resolve state.
///
/// `binary_image` never changes after construction; `loaded` is guarded by
/// a single lock covering lookup-or-(load + resolve + shared-mem
/// configuration), matching the per-`ModuleImage` locking this crate's
/// concurrency model prescribes.
#[derive(Debug)]
pub struct ModuleImage {
    pub kernel_name: String,
    pub binary_image: Vec<u8>,
    pub shared_mem_bytes: u32,
    loaded: Mutex<Loaded>,
}

#[derive(Debug, Default)]
struct Loaded {
    modules: Vec<ModuleHandle>,
    functions: HashMap<ContextId, FunctionHandle>,
}

impl ModuleImage {
    fn new(kernel_name: String, binary_image: Vec<u8>, shared_mem_bytes: u32) -> ModuleImage {
        ModuleImage { kernel_name, binary_image, shared_mem_bytes, loaded: Mutex::new(Loaded::default()) }
    }

    /// Returns the function handle for `context`, loading the module into
    /// that context on first request. On miss, pushes `context` current,
    /// loads the module, resolves the symbol, applies the dynamic
    /// shared-memory policy, and pops the context on every exit path
    /// (including error paths), leaving no partial state in the maps on
    /// failure.
    pub fn function_for_context(&self, driver: &dyn Driver, context: ContextId) -> Result<FunctionHandle> {
        let mut loaded = self.loaded.lock();
        if let Some(handle) = loaded.functions.get(&context) {
            return Ok(*handle);
        }

        let (module, function) = driver::with_context(driver, context, || self.load_and_resolve(driver, context))?;

        loaded.modules.push(module);
        loaded.functions.insert(context, function);
        log::debug!(
            "kernelcall: loaded module for kernel \"{}\" into context {:?}",
            self.kernel_name, context
        );
        Ok(function)
    }

    fn load_and_resolve(&self, driver: &dyn Driver, context: ContextId) -> Result<(ModuleHandle, FunctionHandle)> {
        let module = driver.module_load(&self.binary_image)?;
        let function = driver.module_get_function(module, &self.kernel_name)?;
        self.configure_shared_memory(driver, context, function)?;
        Ok((module, function))
    }

    fn configure_shared_memory(&self, driver: &dyn Driver, context: ContextId, function: FunctionHandle) -> Result<()> {
        if self.shared_mem_bytes <= STATIC_SHARED_MEM_LIMIT {
            return Ok(());
        }

        let optin = driver.device_attribute(context, DeviceAttribute::MaxSharedMemoryPerBlockOptin)?;
        if i64::from(self.shared_mem_bytes) > optin {
            return Err(Error::invalid_argument("Shared memory requested exceeds device resources."));
        }

        driver.function_set_cache_config_prefer_shared(function)?;
        let _per_mp = driver.device_attribute(context, DeviceAttribute::MaxSharedMemoryPerMultiprocessor)?;
        let static_shared = driver.function_static_shared_size_bytes(function)?;
        driver.function_set_max_dynamic_shared_size(function, optin - static_shared)?;
        Ok(())
    }
}

type ImageKey = (String, u32, String, i32);

static DEVICE_IMAGE_CACHE: OnceLock<Mutex<HashMap<ImageKey, Arc<ModuleImage>>>> = OnceLock::new();

fn cache() -> &'static Mutex<HashMap<ImageKey, Arc<ModuleImage>>> {
    DEVICE_IMAGE_CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Returns the `ModuleImage` for `(kernel_name, shared_mem_bytes, asm_text,
/// compute_capability)`, compiling it via the external assembly compiler on
/// a cache miss. Held under a single process-wide lock for the duration of
/// the lookup-and-possibly-compile: compilation can be slow, but blocking
/// concurrent duplicate work is preferable to wasted compilation.
pub fn get_module_image(
    driver: &dyn Driver,
    kernel_name: &str,
    shared_mem_bytes: u32,
    asm_text: &str,
    compute_capability: i32,
) -> Result<Arc<ModuleImage>> {
    let key: ImageKey = (kernel_name.to_string(), shared_mem_bytes, asm_text.to_string(), compute_capability);
    let mut cache = cache().lock();
    if let Some(image) = cache.get(&key) {
        return Ok(image.clone());
    }

    log::debug!(
        "kernelcall: compiling kernel \"{}\" (shared_mem_bytes={}, compute_capability={})",
        kernel_name, shared_mem_bytes, compute_capability
    );
    let cc_major = compute_capability / 10;
    let cc_minor = compute_capability % 10;
    let binary = driver.compile_gpu_asm(cc_major, cc_minor, asm_text)?;

    let image = Arc::new(ModuleImage::new(kernel_name.to_string(), binary, shared_mem_bytes));
    cache.insert(key, image.clone());
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::FakeDriver;

    #[test]
    fn identical_keys_share_an_image() {
        let driver = FakeDriver::new();
        let a = get_module_image(&driver, "devimg-a", 0, "asm", 80).unwrap();
        let b = get_module_image(&driver, "devimg-a", 0, "asm", 80).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(driver.compile_calls.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[test]
    fn differing_key_produces_distinct_image() {
        let driver = FakeDriver::new();
        let a = get_module_image(&driver, "devimg-b", 0, "asm", 80).unwrap();
        let b = get_module_image(&driver, "devimg-b", 0, "asm", 86).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn function_for_context_memoizes_per_context() {
        let driver = FakeDriver::new();
        let image = get_module_image(&driver, "devimg-c", 0, "asm", 80).unwrap();

        let f1 = image.function_for_context(&driver, ContextId(1)).unwrap();
        let f1_again = image.function_for_context(&driver, ContextId(1)).unwrap();
        assert_eq!(f1, f1_again);
        assert_eq!(driver.module_loads.load(std::sync::atomic::Ordering::Relaxed), 1);

        let f2 = image.function_for_context(&driver, ContextId(2)).unwrap();
        assert_ne!(f1, f2);
        assert_eq!(driver.module_loads.load(std::sync::atomic::Ordering::Relaxed), 2);
    }

    #[test]
    fn shared_memory_over_static_limit_is_rejected_beyond_optin() {
        let driver = FakeDriver::new();
        driver.set_max_shared_memory_per_block_optin(ContextId(1), 64 * 1024);
        let image = get_module_image(&driver, "devimg-d", 100 * 1024, "asm", 80).unwrap();

        let err = image.function_for_context(&driver, ContextId(1)).unwrap_err();
        assert_eq!(err.to_string(), "Shared memory requested exceeds device resources.");
    }

    #[test]
    fn shared_memory_within_optin_configures_dynamic_size() {
        let driver = FakeDriver::new();
        driver.set_max_shared_memory_per_block_optin(ContextId(1), 96 * 1024);
        driver.set_static_shared_size("devimg-e", 2 * 1024);
        let image = get_module_image(&driver, "devimg-e", 64 * 1024, "asm", 80).unwrap();

        image.function_for_context(&driver, ContextId(1)).unwrap();

        assert_eq!(driver.cache_config_prefer_shared_calls.load(std::sync::atomic::Ordering::Relaxed), 1);
        assert_eq!(driver.last_max_dynamic_shared_size(), Some(96 * 1024 - 2 * 1024));
    }
}
