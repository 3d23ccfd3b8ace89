//! The single custom-call entry point dispatched by the host framework.

use std::panic::{self, AssertUnwindSafe};

use crate::cache;
use crate::driver::{Driver, StreamHandle};
use crate::error::Result;

/// Where the entry point writes an error message on failure. Success
/// leaves it untouched, matching the host framework's status-sink
/// contract.
pub trait StatusSink {
    fn report_error(&mut self, message: &str);
}

/// A `StatusSink` that just remembers the last message, for tests and for
/// callers that want to inspect rather than forward it.
#[derive(Debug, Default)]
pub struct MessageSink(Option<String>);

impl MessageSink {
    pub fn new() -> MessageSink {
        MessageSink(None)
    }

    pub fn message(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl StatusSink for MessageSink {
    fn report_error(&mut self, message: &str) {
        self.0 = Some(message.to_string());
    }
}

/// Looks up the decoded call for `opaque`, launches it on `stream` using
/// `buffers`, and writes any failure's message into `status_sink`. Never
/// panics across this boundary: a panic anywhere in the lookup/launch path
/// is caught and reported like any other error.
pub fn triton_kernel_call(
    driver: &dyn Driver,
    stream: StreamHandle,
    buffers: &[u64],
    opaque: &[u8],
    status_sink: &mut dyn StatusSink,
) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| dispatch(driver, stream, buffers, opaque)));

    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(err)) => status_sink.report_error(&err.to_string()),
        Err(_) => status_sink.report_error("kernelcall: internal panic while servicing custom call"),
    }
}

fn dispatch(driver: &dyn Driver, stream: StreamHandle, buffers: &[u64], opaque: &[u8]) -> Result<()> {
    let call = cache::get_kernel_call(opaque)?;
    call.launch(driver, stream, buffers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::FakeDriver;
    use crate::wire::{WireCustomCall, WireKernel, WireKernelCall};
    use std::io::Write;

    fn compressed(kernel_name: &str) -> Vec<u8> {
        let wire = WireCustomCall::KernelCall(WireKernelCall {
            kernel: WireKernel {
                kernel_name: kernel_name.into(),
                num_warps: 2,
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
        let mut enc = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(&inflated).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn success_leaves_status_sink_untouched() {
        let driver = FakeDriver::new();
        let opaque = compressed("entry-success");
        let mut sink = MessageSink::new();

        triton_kernel_call(&driver, StreamHandle(1), &[], &opaque, &mut sink);

        assert_eq!(sink.message(), None);
    }

    #[test]
    fn empty_blob_reports_an_error_message() {
        let driver = FakeDriver::new();
        let mut sink = MessageSink::new();

        triton_kernel_call(&driver, StreamHandle(1), &[], &[], &mut sink);

        assert!(sink.message().is_some());
    }
}
