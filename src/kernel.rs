//! `Kernel` and `Parameter`: the immutable description of a launchable
//! device function and its argument list.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::device_image::ModuleImage;
use crate::error::Result;
use crate::wire::{WireKernel, WireParameter};

/// A tagged parameter value. The value set is closed over `{Array, bool,
/// i32, u32, i64, u64}`; dispatched on tag by the marshaller rather than
/// modeled as subclass polymorphism.
#[derive(Debug, Clone, PartialEq)]
pub enum Parameter {
    /// No pointer value is stored here; the pointer is supplied at launch
    /// time from the caller's buffers array.
    Array { bytes_to_zero: u64, ptr_divisibility: u64 },
    Bool(bool),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
}

impl From<WireParameter> for Parameter {
    fn from(w: WireParameter) -> Parameter {
        match w {
            WireParameter::Array { bytes_to_zero, ptr_divisibility } => {
                Parameter::Array { bytes_to_zero, ptr_divisibility }
            }
            WireParameter::Bool(b) => Parameter::Bool(b),
            WireParameter::I32(v) => Parameter::I32(v),
            WireParameter::U32(v) => Parameter::U32(v),
            WireParameter::I64(v) => Parameter::I64(v),
            WireParameter::U64(v) => Parameter::U64(v),
        }
    }
}

/// An immutable description of a device function, bound lazily to a
/// compiled `ModuleImage`.
#[derive(Debug, Clone)]
pub struct Kernel {
    pub kernel_name: String,
    pub num_warps: u32,
    pub shared_mem_bytes: u32,
    pub asm_text: String,
    pub auxiliary_ir: String,
    pub compute_capability: i32,
    module_image: Arc<Mutex<Option<Arc<ModuleImage>>>>,
}

impl PartialEq for Kernel {
    fn eq(&self, other: &Kernel) -> bool {
        self.kernel_name == other.kernel_name
            && self.num_warps == other.num_warps
            && self.shared_mem_bytes == other.shared_mem_bytes
            && self.asm_text == other.asm_text
            && self.auxiliary_ir == other.auxiliary_ir
            && self.compute_capability == other.compute_capability
    }
}

impl Kernel {
    /// `block_dim_x = num_warps * 32`; `block_dim_y = block_dim_z = 1`.
    pub fn block_dim(&self) -> (u32, u32, u32) {
        (self.num_warps * 32, 1, 1)
    }

    /// Returns the memoized `ModuleImage`, resolving it from the
    /// device-image cache on first call and remembering it for the life of
    /// this `Kernel`. A compile failure is not memoized, so a later launch
    /// may retry it.
    pub fn module_image(&self, driver: &dyn crate::driver::Driver) -> Result<Arc<ModuleImage>> {
        let mut slot = self.module_image.lock();
        if let Some(image) = slot.as_ref() {
            return Ok(image.clone());
        }

        let image = crate::device_image::get_module_image(
            driver,
            &self.kernel_name,
            self.shared_mem_bytes,
            &self.asm_text,
            self.compute_capability,
        )?;
        *slot = Some(image.clone());
        Ok(image)
    }
}

impl From<WireKernel> for Kernel {
    fn from(w: WireKernel) -> Kernel {
        Kernel {
            kernel_name: w.kernel_name,
            num_warps: w.num_warps,
            shared_mem_bytes: w.shared_mem_bytes,
            asm_text: w.ptx,
            auxiliary_ir: w.ttir,
            compute_capability: w.compute_capability,
            module_image: Arc::new(Mutex::new(None)),
        }
    }
}
