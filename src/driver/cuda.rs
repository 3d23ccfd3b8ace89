//! `CudaDriver`: the real `Driver` backend, over the raw `cuda-sys` FFI
//! bindings. Every `unsafe` call is wrapped in a method that turns a
//! non-`CUDA_SUCCESS` status into `Error::DeviceError`.

use std::ffi::CString;
use std::os::raw::c_void;

use cuda_sys::cuda::{self, CUcontext, CUdeviceptr, CUevent, CUfunction, CUmodule, CUresult, CUstream};

use crate::driver::{ContextId, DeviceAttribute, Driver, DevicePtr, EventHandle, FunctionHandle, KernelArg,
    ModuleHandle, StreamHandle};
use crate::error::{Error, Result};

fn to_result(status: CUresult) -> Result<()> {
    if status == cuda::cudaError_enum::CUDA_SUCCESS {
        Ok(())
    } else {
        Err(Error::device(format!("CUDA driver call failed: {:?}", status)))
    }
}

/// Reinterprets an opaque handle newtype as the raw pointer-sized CUDA
/// handle it was minted from. Every handle this backend hands back to the
/// core logic is the bit pattern of the real driver handle, so the
/// round-trip is a plain cast.
fn as_ptr<T>(handle: u64) -> *mut T {
    handle as usize as *mut T
}

fn from_ptr<T>(ptr: *mut T) -> u64 {
    ptr as usize as u64
}

/// The production `Driver`, backed by the real CUDA driver API.
///
/// `compile_gpu_asm` is the one method this backend cannot implement with
/// `cuda-sys` alone (lowering PTX/assembly to a loadable image is the
/// external compiler's job); it is supplied at construction as a boxed
/// closure so the rest of this file stays pure driver-API plumbing.
pub struct CudaDriver {
    compile: Box<dyn Fn(i32, i32, &str) -> Result<Vec<u8>> + Send + Sync>,
}

impl CudaDriver {
    /// Builds a `CudaDriver` that lowers assembly via `compile`.
    pub fn new(compile: impl Fn(i32, i32, &str) -> Result<Vec<u8>> + Send + Sync + 'static) -> CudaDriver {
        CudaDriver { compile: Box::new(compile) }
    }
}

impl Driver for CudaDriver {
    fn compile_gpu_asm(&self, cc_major: i32, cc_minor: i32, asm_text: &str) -> Result<Vec<u8>> {
        (self.compile)(cc_major, cc_minor, asm_text)
    }

    fn context_push_current(&self, context: ContextId) -> Result<()> {
        unsafe { to_result(cuda::cuCtxPushCurrent_v2(as_ptr::<CUcontext>(context.0) as CUcontext)) }
    }

    fn context_pop_current(&self) -> Result<()> {
        let mut popped: CUcontext = std::ptr::null_mut();
        unsafe { to_result(cuda::cuCtxPopCurrent_v2(&mut popped)) }
    }

    fn stream_get_context(&self, stream: StreamHandle) -> Result<ContextId> {
        let mut context: CUcontext = std::ptr::null_mut();
        unsafe {
            to_result(cuda::cuStreamGetCtx(as_ptr::<CUstream>(stream.0) as CUstream, &mut context))?;
        }
        Ok(ContextId(from_ptr(context)))
    }

    fn stream_synchronize(&self, stream: StreamHandle) -> Result<()> {
        unsafe { to_result(cuda::cuStreamSynchronize(as_ptr::<CUstream>(stream.0) as CUstream)) }
    }

    fn device_attribute(&self, context: ContextId, attr: DeviceAttribute) -> Result<i64> {
        let mut device: cuda::CUdevice = 0;
        unsafe {
            to_result(cuda::cuCtxPushCurrent_v2(as_ptr::<CUcontext>(context.0) as CUcontext))?;
            let got_device = to_result(cuda::cuCtxGetDevice(&mut device));
            // If both the device query and the pop fail, the pop's error wins and
            // `got_device`'s is lost — same tradeoff as `driver::with_context`.
            let mut popped: CUcontext = std::ptr::null_mut();
            to_result(cuda::cuCtxPopCurrent_v2(&mut popped))?;
            got_device?;

            let raw_attr = match attr {
                DeviceAttribute::MaxSharedMemoryPerBlockOptin => {
                    cuda::CUdevice_attribute_enum::CU_DEVICE_ATTRIBUTE_MAX_SHARED_MEMORY_PER_BLOCK_OPTIN
                }
                DeviceAttribute::MaxSharedMemoryPerMultiprocessor => {
                    cuda::CUdevice_attribute_enum::CU_DEVICE_ATTRIBUTE_MAX_SHARED_MEMORY_PER_MULTIPROCESSOR
                }
            };
            let mut value = 0i32;
            to_result(cuda::cuDeviceGetAttribute(&mut value, raw_attr, device))?;
            Ok(value as i64)
        }
    }

    fn module_load(&self, image: &[u8]) -> Result<ModuleHandle> {
        let mut module: CUmodule = std::ptr::null_mut();
        unsafe {
            to_result(cuda::cuModuleLoadData(&mut module, image.as_ptr() as *const c_void))?;
        }
        Ok(ModuleHandle(from_ptr(module)))
    }

    fn module_get_function(&self, module: ModuleHandle, function_name: &str) -> Result<FunctionHandle> {
        let name = CString::new(function_name)
            .map_err(|_| Error::invalid_argument("kernel symbol name contains an embedded NUL byte"))?;
        let mut function: CUfunction = std::ptr::null_mut();
        unsafe {
            to_result(cuda::cuModuleGetFunction(
                &mut function,
                as_ptr::<CUmodule>(module.0) as CUmodule,
                name.as_ptr(),
            ))?;
        }
        Ok(FunctionHandle(from_ptr(function)))
    }

    fn function_set_cache_config_prefer_shared(&self, function: FunctionHandle) -> Result<()> {
        unsafe {
            to_result(cuda::cuFuncSetCacheConfig(
                as_ptr::<CUfunction>(function.0) as CUfunction,
                cuda::CUfunc_cache_enum::CU_FUNC_CACHE_PREFER_SHARED,
            ))
        }
    }

    fn function_set_max_dynamic_shared_size(&self, function: FunctionHandle, bytes: i64) -> Result<()> {
        unsafe {
            to_result(cuda::cuFuncSetAttribute(
                as_ptr::<CUfunction>(function.0) as CUfunction,
                cuda::CUfunction_attribute_enum::CU_FUNC_ATTRIBUTE_MAX_DYNAMIC_SHARED_SIZE_BYTES,
                bytes as i32,
            ))
        }
    }

    fn function_static_shared_size_bytes(&self, function: FunctionHandle) -> Result<i64> {
        let mut value = 0i32;
        unsafe {
            to_result(cuda::cuFuncGetAttribute(
                &mut value,
                cuda::CUfunction_attribute_enum::CU_FUNC_ATTRIBUTE_SHARED_SIZE_BYTES,
                as_ptr::<CUfunction>(function.0) as CUfunction,
            ))?;
        }
        Ok(value as i64)
    }

    fn memset_async(&self, stream: StreamHandle, ptr: DevicePtr, len: u64) -> Result<()> {
        unsafe {
            to_result(cuda::cuMemsetD8Async(
                ptr.0 as CUdeviceptr,
                0,
                len as usize,
                as_ptr::<CUstream>(stream.0) as CUstream,
            ))
        }
    }

    fn memcpy_dtoh_async(&self, stream: StreamHandle, dst: &mut [u8], src: DevicePtr, len: u64) -> Result<()> {
        unsafe {
            to_result(cuda::cuMemcpyDtoHAsync_v2(
                dst.as_mut_ptr() as *mut c_void,
                src.0 as CUdeviceptr,
                len as usize,
                as_ptr::<CUstream>(stream.0) as CUstream,
            ))
        }
    }

    fn memcpy_htod_async(&self, stream: StreamHandle, dst: DevicePtr, src: &[u8], len: u64) -> Result<()> {
        unsafe {
            to_result(cuda::cuMemcpyHtoDAsync_v2(
                dst.0 as CUdeviceptr,
                src.as_ptr() as *const c_void,
                len as usize,
                as_ptr::<CUstream>(stream.0) as CUstream,
            ))
        }
    }

    fn launch_kernel(
        &self,
        stream: StreamHandle,
        function: FunctionHandle,
        grid: (u32, u32, u32),
        block: (u32, u32, u32),
        shared_mem_bytes: u32,
        args: &[KernelArg],
    ) -> Result<()> {
        // `cuLaunchKernel` wants a `void**`: one pointer per argument,
        // pointing at that argument's storage. Scalars are boxed here so
        // their address is stable for the duration of the call; Array
        // arguments already carry the device pointer's own storage.
        let mut storage: Vec<Box<dyn std::any::Any>> = Vec::with_capacity(args.len());
        let mut arg_ptrs: Vec<*mut c_void> = Vec::with_capacity(args.len());

        for arg in args {
            let ptr: *mut c_void = match *arg {
                KernelArg::Pointer(p) => {
                    let boxed = Box::new(p.0 as CUdeviceptr);
                    let ptr = boxed.as_ref() as *const CUdeviceptr as *mut c_void;
                    storage.push(boxed);
                    ptr
                }
                KernelArg::Bool(v) => {
                    let boxed = Box::new(v as u8);
                    let ptr = boxed.as_ref() as *const u8 as *mut c_void;
                    storage.push(boxed);
                    ptr
                }
                KernelArg::I32(v) => {
                    let boxed = Box::new(v);
                    let ptr = boxed.as_ref() as *const i32 as *mut c_void;
                    storage.push(boxed);
                    ptr
                }
                KernelArg::U32(v) => {
                    let boxed = Box::new(v);
                    let ptr = boxed.as_ref() as *const u32 as *mut c_void;
                    storage.push(boxed);
                    ptr
                }
                KernelArg::I64(v) => {
                    let boxed = Box::new(v);
                    let ptr = boxed.as_ref() as *const i64 as *mut c_void;
                    storage.push(boxed);
                    ptr
                }
                KernelArg::U64(v) => {
                    let boxed = Box::new(v);
                    let ptr = boxed.as_ref() as *const u64 as *mut c_void;
                    storage.push(boxed);
                    ptr
                }
            };
            arg_ptrs.push(ptr);
        }

        unsafe {
            to_result(cuda::cuLaunchKernel(
                as_ptr::<CUfunction>(function.0) as CUfunction,
                grid.0, grid.1, grid.2,
                block.0, block.1, block.2,
                shared_mem_bytes,
                as_ptr::<CUstream>(stream.0) as CUstream,
                arg_ptrs.as_mut_ptr(),
                std::ptr::null_mut(),
            ))
        }
    }

    fn event_create(&self) -> Result<EventHandle> {
        let mut event: CUevent = std::ptr::null_mut();
        unsafe {
            to_result(cuda::cuEventCreate(&mut event, cuda::CUevent_flags_enum::CU_EVENT_DEFAULT as u32))?;
        }
        Ok(EventHandle(from_ptr(event)))
    }

    fn event_record(&self, event: EventHandle, stream: StreamHandle) -> Result<()> {
        unsafe {
            to_result(cuda::cuEventRecord(
                as_ptr::<CUevent>(event.0) as CUevent,
                as_ptr::<CUstream>(stream.0) as CUstream,
            ))
        }
    }

    fn event_synchronize(&self, event: EventHandle) -> Result<()> {
        unsafe { to_result(cuda::cuEventSynchronize(as_ptr::<CUevent>(event.0) as CUevent)) }
    }

    fn event_elapsed_ms(&self, start: EventHandle, stop: EventHandle) -> Result<f64> {
        let mut ms = 0f32;
        unsafe {
            to_result(cuda::cuEventElapsedTime(
                &mut ms,
                as_ptr::<CUevent>(start.0) as CUevent,
                as_ptr::<CUevent>(stop.0) as CUevent,
            ))?;
        }
        Ok(ms as f64)
    }

    fn event_destroy(&self, event: EventHandle) -> Result<()> {
        unsafe { to_result(cuda::cuEventDestroy_v2(as_ptr::<CUevent>(event.0) as CUevent)) }
    }
}
