//! The call cache: maps an opaque blob, verbatim, to its decoded call
//! object.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::autotune::AutotunedKernelCall;
use crate::call::KernelCall;
use crate::driver::{Driver, StreamHandle};
use crate::error::Result;

/// The decoded form of one custom-call site's opaque blob.
pub enum CallKind {
    Single(KernelCall),
    Autotuned(AutotunedKernelCall),
}

impl CallKind {
    pub fn launch(&self, driver: &dyn Driver, stream: StreamHandle, buffers: &[u64]) -> Result<()> {
        match self {
            CallKind::Single(kc) => kc.launch(driver, stream, buffers),
            CallKind::Autotuned(atc) => atc.launch(driver, stream, buffers),
        }
    }
}

static BLOB_CACHE: OnceLock<Mutex<HashMap<Vec<u8>, Arc<CallKind>>>> = OnceLock::new();

fn cache() -> &'static Mutex<HashMap<Vec<u8>, Arc<CallKind>>> {
    BLOB_CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Returns the decoded call for `opaque`, keyed by the exact compressed
/// bytes, building it via the blob decoder on a miss. Held under a single
/// process-wide lock for the duration of the lookup-or-build; build
/// includes decompress and parse, not launch.
pub fn get_kernel_call(opaque: &[u8]) -> Result<Arc<CallKind>> {
    let mut cache = cache().lock();
    if let Some(call) = cache.get(opaque) {
        return Ok(call.clone());
    }

    let call = Arc::new(crate::blob::decode(opaque)?);
    cache.insert(opaque.to_vec(), call.clone());
    Ok(call)
}
