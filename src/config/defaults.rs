//! Built-in defaults (layer 1)

use serde::{Deserialize, Serialize};

/// Built-in default configuration values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    /// Root of the tool's support files (default: ".")
    pub root_dir: String,

    /// Emulation target platform
    pub device: String,

    /// Shell snippet sourced before running the emulator
    pub setup_commands: String,

    /// Include directory of the device runtime headers
    pub runtime_include: String,

    /// Include directory of the vendor HLS headers
    pub vendor_include: String,

    /// Library directory of the device runtime
    pub runtime_lib: String,

    /// Device config generator binary on the remote host
    pub emconfigutil: String,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            root_dir: ".".to_string(),
            device: "xilinx_u50_gen3x16_xdma_201920_3".to_string(),
            setup_commands: "source /scratch/opt/Xilinx/Vitis/2020.2/settings64.sh && source /opt/xilinx/xrt/setup.sh".to_string(),
            runtime_include: "/opt/xilinx/xrt/include".to_string(),
            vendor_include: "/scratch/opt/Xilinx/Vivado/2020.2/include".to_string(),
            runtime_lib: "/opt/xilinx/xrt/lib".to_string(),
            emconfigutil: "/scratch/opt/Xilinx/Vitis/2020.2/bin/emconfigutil".to_string(),
        }
    }
}

impl BuiltinDefaults {
    /// Convert to JSON Value for merging
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "global": {
                "root_dir": self.root_dir,
            },
            "stages": {
                "wdb": {
                    "device": self.device,
                    "setup_commands": self.setup_commands,
                    "runtime_include": self.runtime_include,
                    "vendor_include": self.vendor_include,
                    "runtime_lib": self.runtime_lib,
                    "emconfigutil": self.emconfigutil,
                }
            }
        })
    }
}
