use crate::error::SoftWarning;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// which engines a deployment runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentMode {
    Chat,
    Tool,
    Both,
}

/// addressable model role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineSlot {
    Chat,
    Tool,
}

impl DeploymentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentMode::Chat => "chat",
            DeploymentMode::Tool => "tool",
            DeploymentMode::Both => "both",
        }
    }

    pub fn active_slots(&self) -> &'static [EngineSlot] {
        match self {
            DeploymentMode::Chat => &[EngineSlot::Chat],
            DeploymentMode::Tool => &[EngineSlot::Tool],
            DeploymentMode::Both => &[EngineSlot::Chat, EngineSlot::Tool],
        }
    }

    pub fn activates(&self, slot: EngineSlot) -> bool {
        self.active_slots().contains(&slot)
    }
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "chat" => Ok(DeploymentMode::Chat),
            "tool" => Ok(DeploymentMode::Tool),
            "both" => Ok(DeploymentMode::Both),
            other => Err(format!("unknown deployment mode '{}'", other)),
        }
    }
}

impl EngineSlot {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineSlot::Chat => "chat",
            EngineSlot::Tool => "tool",
        }
    }

    pub fn model_var(&self) -> &'static str {
        match self {
            EngineSlot::Chat => "CHAT_MODEL",
            EngineSlot::Tool => "TOOL_MODEL",
        }
    }

    pub fn fraction_var(&self) -> &'static str {
        match self {
            EngineSlot::Chat => "CHAT_GPU_FRAC",
            EngineSlot::Tool => "TOOL_GPU_FRAC",
        }
    }

    pub fn quantization_var(&self) -> &'static str {
        match self {
            EngineSlot::Chat => "CHAT_QUANTIZATION",
            EngineSlot::Tool => "TOOL_QUANTIZATION",
        }
    }

    pub fn batched_tokens_var(&self) -> &'static str {
        match self {
            EngineSlot::Chat => "CHAT_MAX_NUM_BATCHED_TOKENS",
            EngineSlot::Tool => "TOOL_MAX_NUM_BATCHED_TOKENS",
        }
    }
}

impl fmt::Display for EngineSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// outcome of mode selection, including the warning emitted for a coerced value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeSelection {
    pub mode: DeploymentMode,
    pub active: Vec<EngineSlot>,
    pub warning: Option<SoftWarning>,
}

/// map a raw DEPLOY_MODELS value to a mode; anything unrecognised becomes `both`
pub fn select_mode(raw: &str) -> ModeSelection {
    let (mode, warning) = match raw.parse::<DeploymentMode>() {
        Ok(mode) => (mode, None),
        Err(_) => (
            DeploymentMode::Both,
            Some(SoftWarning::coerced("DEPLOY_MODELS", raw, DeploymentMode::Both).emit()),
        ),
    };

    ModeSelection {
        mode,
        active: mode.active_slots().to_vec(),
        warning,
    }
}
