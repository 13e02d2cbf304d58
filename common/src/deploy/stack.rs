//! Stack presets.
//!
//! Each docker stack (base, awq, fp8, mixed, tool-only, trt) is a row of data
//! here rather than its own launch script.

use crate::deploy::mode::DeploymentMode;
use crate::gpu::TuningOverrides;
use crate::quant::{Quantization, QuantizationPolicy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Engine {
    Vllm,
    TensorrtLlm,
}

impl Engine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::Vllm => "vllm",
            Engine::TensorrtLlm => "tensorrt-llm",
        }
    }

    /// formats the engine can serve
    pub fn supports(&self, quantization: Quantization) -> bool {
        match self {
            Engine::Vllm => true,
            Engine::TensorrtLlm => matches!(
                quantization,
                Quantization::Awq | Quantization::Fp8 | Quantization::None
            ),
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stack {
    Base,
    Awq,
    Fp8,
    Mixed,
    ToolOnly,
    Trt,
}

impl Stack {
    pub const ALL: [Stack; 6] = [
        Stack::Base,
        Stack::Awq,
        Stack::Fp8,
        Stack::Mixed,
        Stack::ToolOnly,
        Stack::Trt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stack::Base => "base",
            Stack::Awq => "awq",
            Stack::Fp8 => "fp8",
            Stack::Mixed => "mixed",
            Stack::ToolOnly => "tool-only",
            Stack::Trt => "trt",
        }
    }

    pub fn engine(&self) -> Engine {
        match self {
            Stack::Trt => Engine::TensorrtLlm,
            _ => Engine::Vllm,
        }
    }

    /// policy used when QUANTIZATION is unset
    pub fn default_policy(&self) -> QuantizationPolicy {
        match self {
            Stack::Awq => QuantizationPolicy::Awq,
            Stack::Fp8 | Stack::Trt => QuantizationPolicy::Fp8,
            Stack::Base | Stack::Mixed | Stack::ToolOnly => QuantizationPolicy::Auto,
        }
    }

    pub fn allowed_modes(&self) -> &'static [DeploymentMode] {
        match self {
            Stack::Mixed => &[DeploymentMode::Both],
            Stack::ToolOnly => &[DeploymentMode::Tool],
            // its awq default would be refused by every tool classifier
            Stack::Awq | Stack::Trt => &[DeploymentMode::Chat, DeploymentMode::Both],
            Stack::Base | Stack::Fp8 => &[
                DeploymentMode::Chat,
                DeploymentMode::Tool,
                DeploymentMode::Both,
            ],
        }
    }

    /// stack-level tuning; sits between explicit input and gpu-tier defaults
    pub fn tuning(&self) -> TuningOverrides {
        match self {
            Stack::Trt => TuningOverrides {
                attention_backend: Some("TRTLLM".to_string()),
                enforce_eager: Some(false),
                ..Default::default()
            },
            _ => TuningOverrides::default(),
        }
    }
}

impl fmt::Display for Stack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stack {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace('_', "-");
        Stack::ALL
            .into_iter()
            .find(|stack| stack.as_str() == wanted)
            .ok_or_else(|| format!("unknown stack '{}'", s))
    }
}
