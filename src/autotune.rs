//! `AutotunedKernelCall`: a set of candidate `KernelCall`s that benchmarks
//! itself on first launch, then behaves like a single `KernelCall`.

use parking_lot::Mutex;
use std::sync::OnceLock;

use crate::call::KernelCall;
use crate::config::config;
use crate::driver::{self, Driver, DevicePtr, EventHandle, StreamHandle};
use crate::error::{Error, Result};
use crate::wire::WireAutotunedKernelCall;

/// One candidate configuration: a launchable call plus a human-readable
/// description (surfaced in logs, not consulted by the algorithm).
#[derive(Debug, Clone)]
pub struct Config {
    pub kernel_call: KernelCall,
    pub description: String,
}

/// An (input_idx, output_idx, size_bytes) aliasing: the same device pointer
/// is passed as both an input and an output, so its contents must be
/// restored after autotuning corrupts them.
#[derive(Debug, Clone, Copy)]
pub struct Alias {
    pub input_idx: usize,
    pub output_idx: usize,
    pub size_bytes: u64,
}

/// A set of candidate `KernelCall`s plus aliasing metadata. Benchmarks its
/// candidates exactly once, across all callers and threads, then collapses
/// to the winner.
pub struct AutotunedKernelCall {
    pub name: String,
    configs: Mutex<Vec<Config>>,
    pub input_output_aliases: Vec<Alias>,
    needs_autotune: bool,
    once: OnceLock<Result<(), Error>>,
}

impl From<WireAutotunedKernelCall> for AutotunedKernelCall {
    fn from(w: WireAutotunedKernelCall) -> AutotunedKernelCall {
        let configs: Vec<Config> = w
            .configs
            .into_iter()
            .map(|c| Config { kernel_call: KernelCall::from(c.kernel_call), description: c.description })
            .collect();
        let needs_autotune = configs.len() > 1;
        let aliases = w
            .input_output_aliases
            .into_iter()
            .map(|a| Alias {
                input_idx: a.input_buffer_idx as usize,
                output_idx: a.output_buffer_idx as usize,
                size_bytes: a.buffer_size_bytes,
            })
            .collect();

        AutotunedKernelCall {
            name: w.name,
            configs: Mutex::new(configs),
            input_output_aliases: aliases,
            needs_autotune,
            once: OnceLock::new(),
        }
    }
}

impl AutotunedKernelCall {
    /// On first call, if there is more than one candidate, runs the
    /// autotune protocol exactly once across all threads; the outcome is
    /// remembered and replayed to every later launch. Then launches the
    /// winner (always `configs[0]`).
    pub fn launch(&self, driver: &dyn Driver, stream: StreamHandle, buffers: &[u64]) -> Result<()> {
        if self.needs_autotune {
            self.once.get_or_init(|| self.run_autotune(driver, stream, buffers)).clone()?;
        }

        let winner = self.configs.lock()[0].kernel_call.clone();
        winner.launch(driver, stream, buffers)
    }

    fn run_autotune(&self, driver: &dyn Driver, stream: StreamHandle, buffers: &[u64]) -> Result<()> {
        let context = driver.stream_get_context(stream)?;
        driver::with_context(driver, context, || self.autotune_body(driver, stream, buffers))
    }

    fn autotune_body(&self, driver: &dyn Driver, stream: StreamHandle, buffers: &[u64]) -> Result<()> {
        let staged = self.backup_aliased_inputs(driver, stream, buffers)?;

        let configs = self.configs.lock().clone();
        let cfg = config();

        let mut calibration = Vec::with_capacity(configs.len());
        for c in &configs {
            calibration.push(benchmark(driver, stream, buffers, &c.kernel_call, 1)?);
        }
        let best = calibration.iter().cloned().fold(f64::INFINITY, f64::min);
        let timed_iters = ((cfg.autotune_target_ms / best).floor() as u32)
            .max(1)
            .min(cfg.autotune_max_iters);
        log::trace!("kernelcall: autotune \"{}\" calibrated timed_iters={}", self.name, timed_iters);

        let mut winner_idx = 0usize;
        let mut winner_ms = f64::INFINITY;
        for (idx, c) in configs.iter().enumerate() {
            let elapsed = benchmark(driver, stream, buffers, &c.kernel_call, timed_iters)?;
            log::trace!("kernelcall: autotune \"{}\" candidate {} elapsed={}ms", self.name, idx, elapsed);
            if elapsed < winner_ms {
                winner_ms = elapsed;
                winner_idx = idx;
            }
        }

        log::info!(
            "kernelcall: autotune \"{}\" selected candidate {} (\"{}\") in {}ms over {} iterations",
            self.name, winner_idx, configs[winner_idx].description, winner_ms, timed_iters
        );

        *self.configs.lock() = vec![configs[winner_idx].clone()];

        self.restore_aliased_inputs(driver, stream, buffers, staged)?;
        driver.stream_synchronize(stream)?;
        Ok(())
    }

    fn backup_aliased_inputs(
        &self,
        driver: &dyn Driver,
        stream: StreamHandle,
        buffers: &[u64],
    ) -> Result<Vec<Option<Vec<u8>>>> {
        let mut staged = Vec::with_capacity(self.input_output_aliases.len());
        for alias in &self.input_output_aliases {
            let in_ptr = buffers.get(alias.input_idx).copied();
            let out_ptr = buffers.get(alias.output_idx).copied();
            if in_ptr.is_some() && in_ptr == out_ptr {
                let mut host_buf = vec![0u8; alias.size_bytes as usize];
                driver.memcpy_dtoh_async(stream, &mut host_buf, DevicePtr(in_ptr.unwrap()), alias.size_bytes)?;
                staged.push(Some(host_buf));
            } else {
                staged.push(None);
            }
        }
        Ok(staged)
    }

    fn restore_aliased_inputs(
        &self,
        driver: &dyn Driver,
        stream: StreamHandle,
        buffers: &[u64],
        staged: Vec<Option<Vec<u8>>>,
    ) -> Result<()> {
        for (alias, host_buf) in self.input_output_aliases.iter().zip(staged.into_iter()) {
            if let Some(host_buf) = host_buf {
                let in_ptr = buffers[alias.input_idx];
                driver.memcpy_htod_async(stream, DevicePtr(in_ptr), &host_buf, alias.size_bytes)?;
            }
        }
        Ok(())
    }
}

/// Times `n` launches of `kernel_call`, preceded by one untimed warm-up
/// launch. Any driver error aborts and propagates.
fn benchmark(driver: &dyn Driver, stream: StreamHandle, buffers: &[u64], kernel_call: &KernelCall, n: u32) -> Result<f64> {
    let start = driver.event_create()?;
    let stop = driver.event_create()?;

    let result = benchmark_inner(driver, stream, buffers, kernel_call, n, start, stop);

    driver.event_destroy(start)?;
    driver.event_destroy(stop)?;
    result
}

fn benchmark_inner(
    driver: &dyn Driver,
    stream: StreamHandle,
    buffers: &[u64],
    kernel_call: &KernelCall,
    n: u32,
    start: EventHandle,
    stop: EventHandle,
) -> Result<f64> {
    kernel_call.launch(driver, stream, buffers)?;

    driver.event_record(start, stream)?;
    for _ in 0..n {
        kernel_call.launch(driver, stream, buffers)?;
    }
    driver.event_record(stop, stream)?;

    driver.event_synchronize(stop)?;
    driver.event_elapsed_ms(start, stop)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{Kernel, Parameter};
    use crate::wire::WireKernel;
    use std::sync::atomic::Ordering;

    fn kernel_call(name: &str) -> KernelCall {
        KernelCall {
            kernel: Kernel::from(WireKernel {
                kernel_name: name.into(),
                num_warps: 1,
                shared_mem_bytes: 0,
                ptx: "asm".into(),
                ttir: "ir".into(),
                compute_capability: 80,
            }),
            grid: (1, 1, 1),
            parameters: vec![Parameter::I32(0)],
        }
    }

    fn autotuned(configs: Vec<Config>, aliases: Vec<Alias>) -> AutotunedKernelCall {
        let needs_autotune = configs.len() > 1;
        AutotunedKernelCall {
            name: "test".into(),
            configs: Mutex::new(configs),
            input_output_aliases: aliases,
            needs_autotune,
            once: OnceLock::new(),
        }
    }

    #[test]
    fn ties_resolve_to_earlier_indexed_candidate() {
        let _ = env_logger::try_init();
        let driver = crate::driver::fake::FakeDriver::new();
        driver.set_duration_ms("cand_a", 2.0);
        driver.set_duration_ms("cand_b", 2.0);

        let atc = autotuned(
            vec![
                Config { kernel_call: kernel_call("cand_a"), description: "a".into() },
                Config { kernel_call: kernel_call("cand_b"), description: "b".into() },
            ],
            vec![],
        );

        atc.launch(&driver, StreamHandle(1), &[]).unwrap();
        assert_eq!(atc.configs.lock().len(), 1);
        assert_eq!(atc.configs.lock()[0].kernel_call.kernel.kernel_name, "cand_a");

        let launches_after_first = driver.launches.load(Ordering::Relaxed);
        atc.launch(&driver, StreamHandle(1), &[]).unwrap();
        assert_eq!(driver.launches.load(Ordering::Relaxed), launches_after_first + 1);
    }

    #[test]
    fn single_candidate_skips_autotuning_entirely() {
        let driver = crate::driver::fake::FakeDriver::new();
        let atc = autotuned(vec![Config { kernel_call: kernel_call("only"), description: "only".into() }], vec![]);

        atc.launch(&driver, StreamHandle(1), &[]).unwrap();
        // One launch (the real launch), no warm-up or calibration launches.
        assert_eq!(driver.launches.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn alias_restoration_survives_a_corrupting_candidate() {
        let driver = crate::driver::fake::FakeDriver::new();
        driver.write_device_memory(0x2000, &[0xAB; 32]);
        driver.set_corruption("corrupter", 0x2000, 32, 0xFF);

        let atc = autotuned(
            vec![Config { kernel_call: kernel_call("corrupter"), description: "c".into() }, Config {
                kernel_call: kernel_call("clean"),
                description: "clean".into(),
            }],
            vec![Alias { input_idx: 0, output_idx: 1, size_bytes: 32 }],
        );

        atc.launch(&driver, StreamHandle(1), &[0x2000, 0x2000]).unwrap();

        assert_eq!(driver.read_device_memory(0x2000, 32), vec![0xAB; 32]);
    }

    #[test]
    fn iteration_cap_is_honored() {
        let driver = crate::driver::fake::FakeDriver::new();
        driver.set_duration_ms("slow", 20.0);
        driver.set_duration_ms("fast", 0.01);

        let atc = autotuned(
            vec![
                Config { kernel_call: kernel_call("slow"), description: "slow".into() },
                Config { kernel_call: kernel_call("fast"), description: "fast".into() },
            ],
            vec![],
        );
        atc.launch(&driver, StreamHandle(1), &[]).unwrap();
        assert_eq!(atc.configs.lock()[0].kernel_call.kernel.kernel_name, "fast");
    }
}
