//! Process-wide tunables, overridable by environment variable.

use std::sync::OnceLock;

/// The autotune time budget and iteration cap, plus the decompression
/// buffer's initial growth factor.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Target wall-clock time, in milliseconds, used to derive how many
    /// timed iterations to run per autotune candidate. Default: `10.0`.
    pub autotune_target_ms: f64,
    /// Upper bound on timed iterations per autotune candidate. Default:
    /// `100`.
    pub autotune_max_iters: u32,
    /// Initial zlib-decompression output-buffer size, as a multiple of the
    /// compressed input length. Default: `5`.
    pub decompress_initial_factor: usize,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            autotune_target_ms: 10.0,
            autotune_max_iters: 100,
            decompress_initial_factor: 5,
        }
    }
}

impl Config {
    fn from_env() -> Config {
        let mut cfg = Config::default();

        if let Some(v) = env_f64("KERNELCALL_AUTOTUNE_TARGET_MS") {
            cfg.autotune_target_ms = v;
        }
        if let Some(v) = env_u32("KERNELCALL_AUTOTUNE_MAX_ITERS") {
            cfg.autotune_max_iters = v;
        }
        if let Some(v) = env_usize("KERNELCALL_DECOMPRESS_INITIAL_FACTOR") {
            cfg.decompress_initial_factor = v;
        }

        cfg
    }
}

fn env_f64(key: &str) -> Option<f64> {
    std::env::var(key).ok()?.parse().ok()
}

fn env_u32(key: &str) -> Option<u32> {
    std::env::var(key).ok()?.parse().ok()
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok()?.parse().ok()
}

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Returns the process-wide configuration, reading environment variables
/// the first time this is called and caching the result thereafter.
pub fn config() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}
