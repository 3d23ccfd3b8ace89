//! `KernelCall`: one `Kernel` + grid + parameter list, launchable on a
//! caller-supplied stream.

use crate::driver::{Driver, DevicePtr, KernelArg, StreamHandle};
use crate::error::{Error, Result};
use crate::kernel::{Kernel, Parameter};
use crate::wire::WireKernelCall;

/// One launchable unit: a `Kernel` bound to a grid and an ordered parameter
/// list whose Array entries consume pointers from the caller's buffers
/// array in occurrence order.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelCall {
    pub kernel: Kernel,
    pub grid: (u32, u32, u32),
    pub parameters: Vec<Parameter>,
}

impl From<WireKernelCall> for KernelCall {
    fn from(w: WireKernelCall) -> KernelCall {
        KernelCall {
            kernel: Kernel::from(w.kernel),
            grid: (w.grid_0, w.grid_1, w.grid_2),
            parameters: w.parameters.into_iter().map(Parameter::from).collect(),
        }
    }
}

impl KernelCall {
    /// Launches the kernel on `stream` using `buffers`. Marshals
    /// parameters in declaration order, consuming one pointer from
    /// `buffers` per Array parameter; enforces each Array's alignment
    /// contract and issues its zero-fill before the launch is enqueued.
    pub fn launch(&self, driver: &dyn Driver, stream: StreamHandle, buffers: &[u64]) -> Result<()> {
        let mut args = Vec::with_capacity(self.parameters.len());
        let mut next_buffer = 0usize;

        for (idx, param) in self.parameters.iter().enumerate() {
            match *param {
                Parameter::Array { bytes_to_zero, ptr_divisibility } => {
                    let ptr = *buffers.get(next_buffer).ok_or_else(|| {
                        Error::invalid_argument(format!(
                            "Parameter {} expects a buffer but only {} were supplied.",
                            idx, next_buffer
                        ))
                    })?;
                    next_buffer += 1;

                    if ptr_divisibility != 0 && ptr % ptr_divisibility != 0 {
                        return Err(Error::invalid_argument(format!(
                            "Parameter {} (0x{:x}) is not divisible by {}.",
                            idx, ptr, ptr_divisibility
                        )));
                    }

                    if bytes_to_zero > 0 {
                        driver.memset_async(stream, DevicePtr(ptr), bytes_to_zero)?;
                    }

                    args.push(KernelArg::Pointer(DevicePtr(ptr)));
                }
                Parameter::Bool(v) => args.push(KernelArg::Bool(v)),
                Parameter::I32(v) => args.push(KernelArg::I32(v)),
                Parameter::U32(v) => args.push(KernelArg::U32(v)),
                Parameter::I64(v) => args.push(KernelArg::I64(v)),
                Parameter::U64(v) => args.push(KernelArg::U64(v)),
            }
        }

        let image = self.kernel.module_image(driver)?;
        let context = driver.stream_get_context(stream)?;
        let function = image.function_for_context(driver, context)?;

        driver.launch_kernel(
            stream,
            function,
            self.grid,
            self.kernel.block_dim(),
            self.kernel.shared_mem_bytes,
            &args,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::ContextId;
    use crate::driver::fake::FakeDriver;
    use crate::wire::WireKernel;
    use std::sync::atomic::Ordering;

    fn call(parameters: Vec<Parameter>) -> KernelCall {
        KernelCall {
            kernel: Kernel::from(WireKernel {
                kernel_name: "add_kernel".into(),
                num_warps: 4,
                shared_mem_bytes: 0,
                ptx: "asm".into(),
                ttir: "ir".into(),
                compute_capability: 80,
            }),
            grid: (1, 1, 1),
            parameters,
        }
    }

    #[test]
    fn misaligned_pointer_fails_with_exact_message() {
        let driver = FakeDriver::new();
        let kc = call(vec![
            Parameter::Array { bytes_to_zero: 16, ptr_divisibility: 16 },
            Parameter::I32(7),
        ]);

        let err = kc.launch(&driver, StreamHandle(1), &[0x1008]).unwrap_err();
        assert_eq!(err.to_string(), "Parameter 0 (0x1008) is not divisible by 16.");
    }

    #[test]
    fn aligned_pointer_memsets_and_launches_with_derived_block_dim() {
        let driver = FakeDriver::new();
        let kc = call(vec![
            Parameter::Array { bytes_to_zero: 16, ptr_divisibility: 16 },
            Parameter::I32(7),
        ]);

        kc.launch(&driver, StreamHandle(1), &[0x1000]).unwrap();

        assert_eq!(driver.launches.load(Ordering::Relaxed), 1);
        assert_eq!(driver.read_device_memory(0x1000, 16), vec![0u8; 16]);
        assert_eq!(kc.kernel.block_dim(), (128, 1, 1));
    }

    #[test]
    fn zero_bytes_to_zero_performs_no_memset() {
        let driver = FakeDriver::new();
        let kc = call(vec![Parameter::Array { bytes_to_zero: 0, ptr_divisibility: 0 }]);
        kc.launch(&driver, StreamHandle(1), &[0x77]).unwrap();
        // No seed write happened, so the fake driver reports all zeros either way;
        // the behavioral claim here is just that launch succeeds without a memset.
        assert_eq!(driver.launches.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn single_kernel_two_contexts_compiles_once_loads_twice() {
        let driver = FakeDriver::new();
        let kc = call(vec![Parameter::I32(1)]);

        kc.launch(&driver, StreamHandle(1), &[]).unwrap();
        kc.launch(&driver, StreamHandle(2), &[]).unwrap();

        assert_eq!(driver.compile_calls.load(Ordering::Relaxed), 1);
        assert_eq!(driver.module_loads.load(Ordering::Relaxed), 2);

        let image = kc.kernel.module_image(&driver).unwrap();
        let f1 = image.function_for_context(&driver, ContextId(1)).unwrap();
        let f2 = image.function_for_context(&driver, ContextId(2)).unwrap();
        assert_ne!(f1, f2);
    }
}
