use crate::deploy::{DeploymentMode, Engine, EngineSlot, Stack};
use crate::error::Result;
use crate::gpu::{GpuProfile, TuningBundle};
use crate::quant::{Quantization, QuantizationPolicy, SlotPolicy, SlotQuantization};
use crate::validate::ValidationError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

pub const HEALTH_PATH: &str = "/healthz";
pub const STATUS_PATH: &str = "/status";

/// paths and credentials the server launcher binds to
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct ServerContract {
    /// unauthenticated
    pub health_path: String,
    /// requires the api key
    pub status_path: String,
    #[serde(skip_serializing)]
    api_key: String,
}

impl ServerContract {
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            health_path: HEALTH_PATH.to_string(),
            status_path: STATUS_PATH.to_string(),
            api_key: api_key.into(),
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl fmt::Debug for ServerContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerContract")
            .field("health_path", &self.health_path)
            .field("status_path", &self.status_path)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// where a slot's quantization stands before validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuantState {
    Resolved(SlotQuantization),
    /// the external quantizer still has to run
    Pending { source: String, output_dir: PathBuf },
    /// no model, or the plan was rejected
    Unresolved,
}

#[derive(Debug, Clone)]
pub struct SlotDraft {
    pub slot: EngineSlot,
    pub model: Option<String>,
    pub policy: SlotPolicy,
    pub explicit_override: Option<QuantizationPolicy>,
    pub quantization: QuantState,
    pub gpu_memory_fraction: f64,
}

/// merged output of every component, not yet accepted
#[derive(Debug, Clone)]
pub struct ConfigDraft {
    pub stack: Stack,
    pub gpu: GpuProfile,
    pub mode: DeploymentMode,
    pub slots: BTreeMap<EngineSlot, SlotDraft>,
    pub tuning: TuningBundle,
    pub server: ServerContract,
    /// problems already found while parsing and planning
    pub errors: Vec<ValidationError>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedSlot {
    pub model: String,
    pub source_model: Option<String>,
    pub explicit_override: Option<QuantizationPolicy>,
    pub resolved_quantization: Quantization,
    pub pre_quantized: bool,
    pub gpu_memory_fraction: f64,
}

/// accepted configuration. only the validator constructs one and nothing mutates it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedConfiguration {
    stack: Stack,
    engine: Engine,
    gpu: GpuProfile,
    mode: DeploymentMode,
    slots: BTreeMap<EngineSlot, ResolvedSlot>,
    tuning: TuningBundle,
    server: ServerContract,
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

impl ResolvedConfiguration {
    pub(crate) fn new(
        stack: Stack,
        gpu: GpuProfile,
        mode: DeploymentMode,
        slots: BTreeMap<EngineSlot, ResolvedSlot>,
        tuning: TuningBundle,
        server: ServerContract,
    ) -> Self {
        Self {
            engine: stack.engine(),
            stack,
            gpu,
            mode,
            slots,
            tuning,
            server,
        }
    }

    pub fn stack(&self) -> Stack {
        self.stack
    }

    pub fn engine(&self) -> Engine {
        self.engine
    }

    pub fn gpu(&self) -> &GpuProfile {
        &self.gpu
    }

    pub fn mode(&self) -> DeploymentMode {
        self.mode
    }

    pub fn slots(&self) -> &BTreeMap<EngineSlot, ResolvedSlot> {
        &self.slots
    }

    pub fn slot(&self, slot: EngineSlot) -> Option<&ResolvedSlot> {
        self.slots.get(&slot)
    }

    pub fn tuning(&self) -> &TuningBundle {
        &self.tuning
    }

    pub fn server(&self) -> &ServerContract {
        &self.server
    }

    fn max_batched_tokens(&self, slot: EngineSlot) -> u32 {
        match slot {
            EngineSlot::Chat => self.tuning.chat_max_batched_tokens,
            EngineSlot::Tool => self.tuning.tool_max_batched_tokens,
        }
    }

    /// environment handed to the server launcher
    pub fn to_env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        let mut set = |key: &str, value: String| {
            env.insert(key.to_string(), value);
        };

        set("DEPLOY_STACK", self.stack.to_string());
        set("INFERENCE_ENGINE", self.engine.to_string());
        set("DEPLOY_MODELS", self.mode.to_string());
        set("GPU_NAME", self.gpu.name.clone());
        set("GPU_TIER", self.gpu.tier.to_string());

        for (slot, resolved) in &self.slots {
            let prefix = slot.as_str().to_uppercase();
            set(slot.model_var(), resolved.model.clone());
            if let Some(source) = &resolved.source_model {
                set(&format!("{}_SOURCE_MODEL", prefix), source.clone());
            }
            set(
                &format!("{}_RESOLVED_QUANTIZATION", prefix),
                resolved.resolved_quantization.to_string(),
            );
            set(
                &format!("{}_PRE_QUANTIZED", prefix),
                resolved.pre_quantized.to_string(),
            );
            set(slot.fraction_var(), format!("{:.2}", resolved.gpu_memory_fraction));
            set(
                slot.batched_tokens_var(),
                self.max_batched_tokens(*slot).to_string(),
            );
        }

        set("KV_CACHE_DTYPE", self.tuning.kv_cache_dtype.clone());
        set("ATTENTION_BACKEND", self.tuning.attention_backend.clone());
        if self.engine == Engine::Vllm {
            set("VLLM_ATTENTION_BACKEND", self.tuning.attention_backend.clone());
        }
        set("TORCH_CUDA_ARCH_LIST", self.tuning.cuda_arch_list.clone());
        set("ENFORCE_EAGER", self.tuning.enforce_eager.to_string());
        set("PYTORCH_CUDA_ALLOC_CONF", self.tuning.cuda_alloc_conf.clone());
        set("HEALTH_PATH", self.server.health_path.clone());
        set("STATUS_PATH", self.server.status_path.clone());
        set("TEXT_API_KEY", self.server.api_key.clone());

        env
    }

    /// shell-sourceable `KEY='value'` lines, sorted by key
    pub fn to_env_file(&self) -> String {
        self.to_env()
            .iter()
            .map(|(key, value)| format!("{}={}\n", key, shell_quote(value)))
            .collect()
    }

    pub fn write_env_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_env_file())?;
        tracing::info!(output = %path.display(), "wrote resolved environment");
        Ok(())
    }

    /// pretty json; the api key is never included
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// human-readable summary lines
    pub fn summary(&self) -> Vec<String> {
        let gpu = if self.gpu.name.is_empty() {
            "none detected"
        } else {
            self.gpu.name.as_str()
        };

        let mut lines = vec![
            format!(
                "deploy mode: {} (stack {}, engine {})",
                self.mode, self.stack, self.engine
            ),
            format!(
                "gpu: {} (tier {}, fast attention {})",
                gpu,
                self.gpu.tier,
                if self.gpu.has_fast_attention_kernel { "available" } else { "unavailable" }
            ),
        ];

        for (slot, resolved) in &self.slots {
            let source = resolved
                .source_model
                .as_ref()
                .map(|s| format!(" (from {})", s))
                .unwrap_or_default();
            lines.push(format!(
                "{} model: {}{} quantization={} pre_quantized={} gpu_frac={:.2} max_batched_tokens={}",
                slot,
                resolved.model,
                source,
                resolved.resolved_quantization,
                resolved.pre_quantized,
                resolved.gpu_memory_fraction,
                self.max_batched_tokens(*slot),
            ));
        }

        lines.push(format!(
            "kv cache dtype: {}, attention backend: {}, cuda arch: {}, enforce eager: {}",
            self.tuning.kv_cache_dtype,
            self.tuning.attention_backend,
            self.tuning.cuda_arch_list,
            self.tuning.enforce_eager,
        ));

        lines
    }

    pub fn log_summary(&self) {
        for line in self.summary() {
            tracing::info!("{}", line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::GpuProfile;

    fn config() -> ResolvedConfiguration {
        let slots = BTreeMap::from([(
            EngineSlot::Chat,
            ResolvedSlot {
                model: "org/it's-awq".to_string(),
                source_model: None,
                explicit_override: None,
                resolved_quantization: Quantization::Awq,
                pre_quantized: true,
                gpu_memory_fraction: 0.9,
            },
        )]);
        ResolvedConfiguration::new(
            Stack::Base,
            GpuProfile::new("H100", true),
            DeploymentMode::Chat,
            slots,
            TuningBundle {
                kv_cache_dtype: "fp8".to_string(),
                attention_backend: "FLASHINFER".to_string(),
                cuda_arch_list: "9.0".to_string(),
                chat_max_batched_tokens: 6144,
                tool_max_batched_tokens: 4096,
                enforce_eager: false,
                cuda_alloc_conf: "expandable_segments:True".to_string(),
            },
            ServerContract::with_api_key("s3cret"),
        )
    }

    #[test]
    fn test_env_export() {
        let env = config().to_env();
        assert_eq!(env["DEPLOY_MODELS"], "chat");
        assert_eq!(env["CHAT_RESOLVED_QUANTIZATION"], "awq");
        assert_eq!(env["CHAT_GPU_FRAC"], "0.90");
        assert_eq!(env["VLLM_ATTENTION_BACKEND"], "FLASHINFER");
        assert_eq!(env["TEXT_API_KEY"], "s3cret");
        assert!(!env.contains_key("TOOL_MODEL"));
    }

    #[test]
    fn test_env_file_quotes_values() {
        let file = config().to_env_file();
        assert!(file.contains("CHAT_MODEL='org/it'\\''s-awq'\n"));
        assert!(file.lines().all(|line| line.contains("='")));
    }

    #[test]
    fn test_api_key_never_leaks() {
        let config = config();
        assert!(!config.to_json().unwrap().contains("s3cret"));
        assert!(!format!("{:?}", config).contains("s3cret"));
        assert!(!config.summary().join("\n").contains("s3cret"));
    }

    #[test]
    fn test_summary_mentions_resolved_values() {
        let summary = config().summary().join("\n");
        assert!(summary.contains("deploy mode: chat"));
        assert!(summary.contains("quantization=awq"));
        assert!(summary.contains("kv cache dtype: fp8"));
        assert!(summary.contains("gpu: H100"));
    }
}
