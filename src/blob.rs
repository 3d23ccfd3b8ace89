//! The blob decoder: decompresses and parses an opaque blob into a decoded
//! call object.

use std::io::Read;

use flate2::read::ZlibDecoder;

use crate::cache::CallKind;
use crate::config::config;
use crate::error::{Error, Result};
use crate::wire::WireCustomCall;

/// Decompresses and parses `opaque` into a `CallKind`. Decompression starts
/// with an output buffer sized `decompress_initial_factor * opaque.len()`
/// and doubles on a too-small buffer; any other decompression failure, or
/// any parse failure, fails with `InvalidArgument`.
pub fn decode(opaque: &[u8]) -> Result<CallKind> {
    let inflated = decompress(opaque)?;
    let call: WireCustomCall = bincode::deserialize(&inflated)?;

    let kind = match call {
        WireCustomCall::KernelCall(kc) => {
            let call = crate::call::KernelCall::from(kc);
            log::trace!("kernelcall: decoded kernel_call \"{}\"", call.kernel.kernel_name);
            CallKind::Single(call)
        }
        WireCustomCall::AutotunedKernelCall(atc) => {
            let call = crate::autotune::AutotunedKernelCall::from(atc);
            log::trace!("kernelcall: decoded autotuned_kernel_call \"{}\"", call.name);
            CallKind::Autotuned(call)
        }
    };

    Ok(kind)
}

/// Decompresses into a buffer that starts at
/// `decompress_initial_factor * compressed.len()` and doubles when the
/// inflated payload outgrows it, mirroring the `ZlibUncompress` contract's
/// start-capacity-and-retry behavior even though `ZlibDecoder`'s `Read`
/// impl will itself grow the `Vec` past the initial reservation.
fn decompress(compressed: &[u8]) -> Result<Vec<u8>> {
    if compressed.is_empty() {
        return Err(Error::invalid_argument("empty opaque blob"));
    }

    let mut capacity = (config().decompress_initial_factor * compressed.len()).max(1);

    loop {
        let mut decoder = ZlibDecoder::new(compressed);
        let mut out = Vec::with_capacity(capacity);
        match decoder.read_to_end(&mut out) {
            Ok(_) => return Ok(out),
            Err(_) if out.len() >= capacity => capacity *= 2,
            Err(err) => return Err(Error::from(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zlib(bytes: &[u8]) -> Vec<u8> {
        let mut enc = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(bytes).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn empty_blob_fails_invalid_argument() {
        let err = decode(&[]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn decodes_a_compressed_kernel_call() {
        let wire = WireCustomCall::KernelCall(crate::wire::WireKernelCall {
            kernel: crate::wire::WireKernel {
                kernel_name: "add_kernel".into(),
                num_warps: 4,
                shared_mem_bytes: 0,
                ptx: "asm".into(),
                ttir: "ir".into(),
                compute_capability: 80,
            },
            grid_0: 1,
            grid_1: 1,
            grid_2: 1,
            parameters: vec![],
        });
        let inflated = bincode::serialize(&wire).unwrap();
        let compressed = zlib(&inflated);

        let decoded = decode(&compressed).unwrap();
        match decoded {
            CallKind::Single(kc) => assert_eq!(kc.kernel.kernel_name, "add_kernel"),
            CallKind::Autotuned(_) => panic!("expected a single kernel call"),
        }
    }

    #[test]
    fn garbage_bytes_fail_invalid_argument() {
        let err = decode(&[1, 2, 3, 4, 5]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
