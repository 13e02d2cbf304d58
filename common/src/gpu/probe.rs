use crate::error::{DeployError, Result, SoftWarning};
use crate::inputs::{read_flag, EnvSnapshot};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::process::Command;

static HOPPER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(gh200|h100|h200|h800|h20)\b").unwrap());

static ADA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(l40s?|l4|rtx\s*40[5-9]0(\s*ti)?|rtx\s*[2-6]000\s*ada|ada)\b").unwrap()
});

static AMPERE_DATACENTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(a100|a800|a30)\b").unwrap());

static AMPERE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(a40|a16|a10g?|a2|rtx\s*30[5-9]0(\s*ti)?|rtx\s*a[2-6]000)\b").unwrap()
});

/// arch list compiled for when the accelerator could not be identified
pub const PORTABLE_CUDA_ARCH_LIST: &str = "8.0;8.6;8.9;9.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GpuTier {
    HopperAda,
    Ampere,
    Unknown,
}

impl GpuTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            GpuTier::HopperAda => "hopper_ada",
            GpuTier::Ampere => "ampere",
            GpuTier::Unknown => "unknown",
        }
    }
}

impl fmt::Display for GpuTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuProfile {
    /// raw vendor string, empty when no accelerator was found
    pub name: String,
    pub tier: GpuTier,
    pub has_fast_attention_kernel: bool,
}

impl GpuProfile {
    pub fn new(name: impl Into<String>, has_fast_attention_kernel: bool) -> Self {
        let name = name.into();
        Self {
            tier: classify_tier(&name),
            name,
            has_fast_attention_kernel,
        }
    }

    /// cuda arch identifier for this accelerator
    pub fn cuda_arch(&self) -> &'static str {
        if HOPPER.is_match(&self.name) {
            "9.0"
        } else if ADA.is_match(&self.name) {
            "8.9"
        } else if AMPERE_DATACENTER.is_match(&self.name) {
            "8.0"
        } else if AMPERE.is_match(&self.name) {
            "8.6"
        } else {
            PORTABLE_CUDA_ARCH_LIST
        }
    }
}

pub fn classify_tier(name: &str) -> GpuTier {
    if HOPPER.is_match(name) || ADA.is_match(name) {
        GpuTier::HopperAda
    } else if AMPERE_DATACENTER.is_match(name) || AMPERE.is_match(name) {
        GpuTier::Ampere
    } else {
        GpuTier::Unknown
    }
}

fn is_wsl() -> bool {
    #[cfg(target_os = "linux")]
    {
        if let Ok(release) = std::fs::read_to_string("/proc/version") {
            let release_lower = release.to_lowercase();
            return release_lower.contains("microsoft") || release_lower.contains("wsl");
        }
    }
    false
}

fn has_nvidia_device() -> bool {
    if is_wsl() && Path::new("/usr/lib/wsl/lib/libcuda.so.1").exists() {
        return true;
    }

    let dev_dir = Path::new("/dev");
    dev_dir.join("nvidia0").exists() || dev_dir.join("nvidiactl").exists()
}

/// first accelerator name reported by nvidia-smi
fn query_gpu_name() -> Result<String> {
    let output = Command::new("nvidia-smi")
        .args(["--query-gpu=name", "--format=csv,noheader"])
        .output()
        .map_err(|e| DeployError::GpuDetection(format!("nvidia-smi unavailable: {}", e)))?;

    if !output.status.success() {
        return Err(DeployError::GpuDetection(format!(
            "nvidia-smi exited with {}",
            output.status
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
        .ok_or_else(|| DeployError::GpuDetection("nvidia-smi listed no devices".to_string()))
}

fn has_flashinfer() -> bool {
    Command::new("python3")
        .args(["-c", "import flashinfer"])
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// detect the accelerator; never fails, an undetectable gpu is `Unknown`.
/// an unreadable kernel override is coerced to false with a warning.
pub fn probe(env: &EnvSnapshot) -> (GpuProfile, Vec<SoftWarning>) {
    let mut warnings = Vec::new();

    let name = match env.get("GPU_NAME") {
        Some(name) => name.to_string(),
        None if has_nvidia_device() => {
            query_gpu_name().unwrap_or_else(|e| {
                tracing::debug!("{}", e);
                String::new()
            })
        }
        None => String::new(),
    };

    let has_fast_attention_kernel = match read_flag(env, "FLASHINFER_AVAILABLE", &mut warnings) {
        Some(flag) => flag,
        None => has_flashinfer(),
    };

    let profile = GpuProfile::new(name, has_fast_attention_kernel);

    tracing::info!(
        gpu = %if profile.name.is_empty() { "none" } else { profile.name.as_str() },
        tier = %profile.tier,
        fast_attention = profile.has_fast_attention_kernel,
        "gpu probed"
    );

    (profile, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_hopper_and_ada() {
        assert_eq!(classify_tier("NVIDIA H100 80GB HBM3"), GpuTier::HopperAda);
        assert_eq!(classify_tier("NVIDIA GH200 480GB"), GpuTier::HopperAda);
        assert_eq!(classify_tier("NVIDIA L40S"), GpuTier::HopperAda);
        assert_eq!(classify_tier("NVIDIA GeForce RTX 4090"), GpuTier::HopperAda);
        assert_eq!(classify_tier("NVIDIA RTX 6000 Ada Generation"), GpuTier::HopperAda);
    }

    #[test]
    fn test_classify_ampere() {
        assert_eq!(classify_tier("NVIDIA A100-SXM4-80GB"), GpuTier::Ampere);
        assert_eq!(classify_tier("NVIDIA A10G"), GpuTier::Ampere);
        assert_eq!(classify_tier("NVIDIA GeForce RTX 3090"), GpuTier::Ampere);
        assert_eq!(classify_tier("NVIDIA RTX A6000"), GpuTier::Ampere);
    }

    #[test]
    fn test_classify_unknown() {
        assert_eq!(classify_tier(""), GpuTier::Unknown);
        assert_eq!(classify_tier("Tesla T4"), GpuTier::Unknown);
        assert_eq!(classify_tier("Tesla V100-SXM2-16GB"), GpuTier::Unknown);
    }

    #[test]
    fn test_cuda_arch() {
        assert_eq!(GpuProfile::new("H100", true).cuda_arch(), "9.0");
        assert_eq!(GpuProfile::new("NVIDIA L4", true).cuda_arch(), "8.9");
        assert_eq!(GpuProfile::new("NVIDIA A100-PCIE-40GB", false).cuda_arch(), "8.0");
        assert_eq!(GpuProfile::new("NVIDIA A10G", false).cuda_arch(), "8.6");
        assert_eq!(GpuProfile::new("", false).cuda_arch(), PORTABLE_CUDA_ARCH_LIST);
    }

    #[test]
    fn test_probe_respects_environment_overrides() {
        let env = EnvSnapshot::from_pairs([("GPU_NAME", "H100"), ("FLASHINFER_AVAILABLE", "1")]);
        let (profile, warnings) = probe(&env);
        assert_eq!(profile.name, "H100");
        assert_eq!(profile.tier, GpuTier::HopperAda);
        assert!(profile.has_fast_attention_kernel);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_unreadable_kernel_flag_is_coerced_to_false() {
        let env = EnvSnapshot::from_pairs([("GPU_NAME", "H100"), ("FLASHINFER_AVAILABLE", "maybe")]);
        let (profile, warnings) = probe(&env);
        assert!(!profile.has_fast_attention_kernel);
        assert_eq!(
            warnings,
            vec![SoftWarning::CoercedValue {
                variable: "FLASHINFER_AVAILABLE".to_string(),
                value: "maybe".to_string(),
                fallback: "false".to_string(),
            }]
        );
    }
}
