//! A GPU custom-call runtime: kernel-call cache, module/function manager,
//! parameter marshaller, and autotuner for dispatching precompiled GPU
//! kernels from a host tensor-compiler custom call.
//!
//! A host compiler hands [`entry::triton_kernel_call`] an opaque blob
//! describing one kernel invocation, or a family of candidates to
//! autotune. This crate materializes the device code, resolves per-context
//! device function handles, marshals parameters, optionally benchmarks
//! variants, and launches the kernel on a caller-supplied stream.
//!
//! The driver surface is the [`driver::Driver`] trait, so the whole
//! pipeline — blob decode, caching, marshalling, autotune bookkeeping — is
//! testable on a developer machine against [`driver::fake::FakeDriver`],
//! while [`driver::cuda::CudaDriver`] (behind the `cuda` feature) talks to
//! the real CUDA driver API via `cuda-sys` for production use.
//!
//! What this crate does not do: compile or optimize the GPU program
//! (assembly arrives pre-lowered), own device memory for user buffers,
//! schedule across streams, or select launch grids beyond those encoded in
//! the opaque blob.

pub mod autotune;
pub mod blob;
pub mod cache;
pub mod call;
pub mod config;
pub mod device_image;
pub mod driver;
pub mod entry;
pub mod error;
pub mod kernel;
pub mod wire;

pub use autotune::{Alias, AutotunedKernelCall, Config as AutotuneConfig};
pub use cache::{get_kernel_call, CallKind};
pub use call::KernelCall;
pub use driver::{ContextId, DeviceAttribute, Driver, DevicePtr, EventHandle, FunctionHandle, KernelArg,
    ModuleHandle, StreamHandle};
pub use entry::{triton_kernel_call, MessageSink, StatusSink};
pub use error::{Error, Result};
pub use kernel::{Kernel, Parameter};
