//! Environment snapshot and the single parsing step from raw strings to typed inputs.

use crate::deploy::{select_mode, EngineSlot, ModeSelection, Stack};
use crate::error::SoftWarning;
use crate::gpu::TuningOverrides;
use crate::quant::{PushRequest, QuantizationPolicy, QuantizerSettings};
use crate::validate::ValidationError;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_API_KEY: &str = "yap_token";

/// immutable copy of the process environment taken once at startup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSnapshot {
    vars: BTreeMap<String, String>,
}

impl EnvSnapshot {
    pub fn from_env() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// returns a copy with `key` replaced, used for cli overrides
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.vars.insert(key.to_string(), value.into());
        self
    }

    /// value as set, including empty strings
    pub fn raw(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// trimmed value, treating empty as unset
    pub fn get(&self, key: &str) -> Option<&str> {
        self.raw(key).map(str::trim).filter(|s| !s.is_empty())
    }

    pub fn get_owned(&self, key: &str) -> Option<String> {
        self.get(key).map(str::to_string)
    }
}

/// parse a truthy/falsy flag; `None` when the value is neither
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// boolean input; unrecognised values coerce to false with a warning
pub fn read_flag(env: &EnvSnapshot, key: &str, warnings: &mut Vec<SoftWarning>) -> Option<bool> {
    let value = env.get(key)?;
    match parse_flag(value) {
        Some(flag) => Some(flag),
        None => {
            warnings.push(SoftWarning::coerced(key, value, false).emit());
            Some(false)
        }
    }
}

/// numeric input; malformed values become validation errors
pub fn read_number<T: FromStr>(
    env: &EnvSnapshot,
    key: &str,
    errors: &mut Vec<ValidationError>,
) -> Option<T> {
    let value = env.get(key)?;
    match value.parse::<T>() {
        Ok(n) => Some(n),
        Err(_) => {
            errors.push(ValidationError::InvalidNumber {
                variable: key.to_string(),
                value: value.to_string(),
            });
            None
        }
    }
}

fn read_policy(
    env: &EnvSnapshot,
    key: &str,
    warnings: &mut Vec<SoftWarning>,
) -> Option<QuantizationPolicy> {
    let value = env.get(key)?;
    match value.parse::<QuantizationPolicy>() {
        Ok(policy) => Some(policy),
        Err(_) => {
            warnings.push(SoftWarning::coerced(key, value, "unset").emit());
            None
        }
    }
}

/// every operator input, converted to closed types exactly once
#[derive(Debug, Clone)]
pub struct DeploymentInputs {
    pub stack: Stack,
    pub mode: ModeSelection,
    pub chat_model: Option<String>,
    pub tool_model: Option<String>,
    pub policy: QuantizationPolicy,
    pub chat_override: Option<QuantizationPolicy>,
    pub tool_override: Option<QuantizationPolicy>,
    pub chat_gpu_frac: Option<f64>,
    pub tool_gpu_frac: Option<f64>,
    pub tuning: TuningOverrides,
    pub quantizer: QuantizerSettings,
    pub push: Option<PushRequest>,
    pub api_key: String,
    pub warnings: Vec<SoftWarning>,
    pub errors: Vec<ValidationError>,
}

impl DeploymentInputs {
    pub fn parse(env: &EnvSnapshot) -> Self {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        let stack = match env.get("DEPLOY_STACK") {
            None => Stack::Base,
            Some(raw) => raw.parse::<Stack>().unwrap_or_else(|_| {
                warnings.push(SoftWarning::coerced("DEPLOY_STACK", raw, Stack::Base).emit());
                Stack::Base
            }),
        };

        // an empty DEPLOY_MODELS is an invalid value, an absent one is the default
        let mode = match env.raw("DEPLOY_MODELS") {
            None => select_mode("both"),
            Some(raw) => select_mode(raw),
        };
        warnings.extend(mode.warning.clone());

        let policy = match env.get("QUANTIZATION") {
            None => stack.default_policy(),
            Some(raw) => raw.parse::<QuantizationPolicy>().unwrap_or_else(|_| {
                let fallback = stack.default_policy();
                warnings.push(SoftWarning::coerced("QUANTIZATION", raw, fallback).emit());
                fallback
            }),
        };

        let chat_override = read_policy(env, EngineSlot::Chat.quantization_var(), &mut warnings);
        let tool_override = read_policy(env, EngineSlot::Tool.quantization_var(), &mut warnings);

        let chat_gpu_frac = read_number(env, EngineSlot::Chat.fraction_var(), &mut errors);
        let tool_gpu_frac = read_number(env, EngineSlot::Tool.fraction_var(), &mut errors);

        let tuning = TuningOverrides {
            kv_cache_dtype: env.get_owned("KV_CACHE_DTYPE"),
            attention_backend: env.get_owned("ATTENTION_BACKEND"),
            cuda_arch_list: env.get_owned("TORCH_CUDA_ARCH_LIST"),
            chat_max_batched_tokens: read_number(
                env,
                EngineSlot::Chat.batched_tokens_var(),
                &mut errors,
            ),
            tool_max_batched_tokens: read_number(
                env,
                EngineSlot::Tool.batched_tokens_var(),
                &mut errors,
            ),
            enforce_eager: read_flag(env, "ENFORCE_EAGER", &mut warnings),
            cuda_alloc_conf: env.get_owned("PYTORCH_CUDA_ALLOC_CONF"),
        };

        let quantizer = QuantizerSettings {
            cache_dir: env
                .get("AWQ_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(QuantizerSettings::DEFAULT_CACHE_DIR)),
            command: env
                .get_owned("AWQ_QUANTIZER_CMD")
                .unwrap_or_else(|| QuantizerSettings::DEFAULT_COMMAND.to_string()),
        };

        let push = env.get_owned("AWQ_PUSH_REPO").map(|repo| PushRequest {
            repo,
            private: read_flag(env, "AWQ_PUSH_PRIVATE", &mut warnings).unwrap_or(true),
            token: env.get_owned("HF_TOKEN"),
        });

        Self {
            stack,
            mode,
            chat_model: env.get_owned(EngineSlot::Chat.model_var()),
            tool_model: env.get_owned(EngineSlot::Tool.model_var()),
            policy,
            chat_override,
            tool_override,
            chat_gpu_frac,
            tool_gpu_frac,
            tuning,
            quantizer,
            push,
            api_key: env
                .get_owned("TEXT_API_KEY")
                .unwrap_or_else(|| DEFAULT_API_KEY.to_string()),
            warnings,
            errors,
        }
    }

    pub fn model(&self, slot: EngineSlot) -> Option<&str> {
        match slot {
            EngineSlot::Chat => self.chat_model.as_deref(),
            EngineSlot::Tool => self.tool_model.as_deref(),
        }
    }

    pub fn quantization_override(&self, slot: EngineSlot) -> Option<QuantizationPolicy> {
        match slot {
            EngineSlot::Chat => self.chat_override,
            EngineSlot::Tool => self.tool_override,
        }
    }

    pub fn explicit_fractions(&self) -> BTreeMap<EngineSlot, f64> {
        let mut fractions = BTreeMap::new();
        if let Some(frac) = self.chat_gpu_frac {
            fractions.insert(EngineSlot::Chat, frac);
        }
        if let Some(frac) = self.tool_gpu_frac {
            fractions.insert(EngineSlot::Tool, frac);
        }
        fractions
    }
}
