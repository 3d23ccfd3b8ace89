//! Serde structs mirroring the opaque blob's inflated wire schema.
//!
//! These are decoded with `bincode`, which encodes enum variants as a
//! leading `u32` tag followed by the variant's fields and `Vec<T>`/`String`
//! as a length prefix followed by bytes — satisfying the tag-based
//! length-delimited encoding a custom call opaque blob is expected to use.

use serde::{Deserialize, Serialize};

/// The inflated payload's outer record: exactly one of a single call or an
/// autotuned call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WireCustomCall {
    KernelCall(WireKernelCall),
    AutotunedKernelCall(WireAutotunedKernelCall),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireKernel {
    pub kernel_name: String,
    pub num_warps: u32,
    pub shared_mem_bytes: u32,
    pub ptx: String,
    pub ttir: String,
    pub compute_capability: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WireParameter {
    Array { bytes_to_zero: u64, ptr_divisibility: u64 },
    Bool(bool),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireKernelCall {
    pub kernel: WireKernel,
    pub grid_0: u32,
    pub grid_1: u32,
    pub grid_2: u32,
    pub parameters: Vec<WireParameter>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireConfig {
    pub kernel_call: WireKernelCall,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireAlias {
    pub input_buffer_idx: u64,
    pub output_buffer_idx: u64,
    pub buffer_size_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireAutotunedKernelCall {
    pub name: String,
    pub configs: Vec<WireConfig>,
    pub input_output_aliases: Vec<WireAlias>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_call_round_trips_through_bincode() {
        let call = WireCustomCall::KernelCall(WireKernelCall {
            kernel: WireKernel {
                kernel_name: "add_kernel".into(),
                num_warps: 4,
                shared_mem_bytes: 0,
                ptx: "// ptx".into(),
                ttir: "// ttir".into(),
                compute_capability: 80,
            },
            grid_0: 1,
            grid_1: 1,
            grid_2: 1,
            parameters: vec![
                WireParameter::Array { bytes_to_zero: 16, ptr_divisibility: 16 },
                WireParameter::I32(7),
            ],
        });

        let encoded = bincode::serialize(&call).unwrap();
        let decoded: WireCustomCall = bincode::deserialize(&encoded).unwrap();

        match decoded {
            WireCustomCall::KernelCall(kc) => {
                assert_eq!(kc.kernel.kernel_name, "add_kernel");
                assert_eq!(kc.parameters.len(), 2);
            }
            _ => panic!("expected KernelCall variant"),
        }
    }

    #[test]
    fn autotuned_kernel_call_round_trips_through_bincode() {
        let wire_kernel = |name: &str| WireKernel {
            kernel_name: name.into(),
            num_warps: 2,
            shared_mem_bytes: 0,
            ptx: "// ptx".into(),
            ttir: "// ttir".into(),
            compute_capability: 80,
        };
        let wire_kernel_call = |name: &str| WireKernelCall {
            kernel: wire_kernel(name),
            grid_0: 1,
            grid_1: 1,
            grid_2: 1,
            parameters: vec![WireParameter::Array { bytes_to_zero: 0, ptr_divisibility: 16 }],
        };

        let call = WireCustomCall::AutotunedKernelCall(WireAutotunedKernelCall {
            name: "matmul".into(),
            configs: vec![
                WireConfig { kernel_call: wire_kernel_call("matmul_v1"), description: "v1".into() },
                WireConfig { kernel_call: wire_kernel_call("matmul_v2"), description: "v2".into() },
            ],
            input_output_aliases: vec![WireAlias { input_buffer_idx: 0, output_buffer_idx: 1, buffer_size_bytes: 256 }],
        });

        let encoded = bincode::serialize(&call).unwrap();
        let decoded: WireCustomCall = bincode::deserialize(&encoded).unwrap();

        match decoded {
            WireCustomCall::AutotunedKernelCall(atc) => {
                assert_eq!(atc.name, "matmul");
                assert_eq!(atc.configs.len(), 2);
                assert_eq!(atc.configs[0].kernel_call.kernel.kernel_name, "matmul_v1");
                assert_eq!(atc.configs[1].description, "v2");
                assert_eq!(atc.input_output_aliases.len(), 1);
                assert_eq!(atc.input_output_aliases[0].buffer_size_bytes, 256);
            }
            _ => panic!("expected AutotunedKernelCall variant"),
        }
    }
}
