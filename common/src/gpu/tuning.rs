use crate::error::SoftWarning;
use crate::gpu::probe::{GpuProfile, GpuTier};
use crate::quant::Quantization;
use serde::{Deserialize, Serialize};

pub const FAST_ATTENTION_BACKEND: &str = "FLASHINFER";
pub const FALLBACK_ATTENTION_BACKEND: &str = "FLASH_ATTN";
/// for accelerators too old or unidentified for flash-attn
pub const PORTABLE_ATTENTION_BACKEND: &str = "XFORMERS";
pub const DEFAULT_CUDA_ALLOC_CONF: &str = "expandable_segments:True";

/// values supplied by the operator (or a stack preset); every `Some` is kept verbatim
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TuningOverrides {
    pub kv_cache_dtype: Option<String>,
    pub attention_backend: Option<String>,
    pub cuda_arch_list: Option<String>,
    pub chat_max_batched_tokens: Option<u32>,
    pub tool_max_batched_tokens: Option<u32>,
    pub enforce_eager: Option<bool>,
    pub cuda_alloc_conf: Option<String>,
}

impl TuningOverrides {
    /// field-by-field merge, `self` wins wherever it is set
    pub fn or(self, fallback: TuningOverrides) -> TuningOverrides {
        TuningOverrides {
            kv_cache_dtype: self.kv_cache_dtype.or(fallback.kv_cache_dtype),
            attention_backend: self.attention_backend.or(fallback.attention_backend),
            cuda_arch_list: self.cuda_arch_list.or(fallback.cuda_arch_list),
            chat_max_batched_tokens: self
                .chat_max_batched_tokens
                .or(fallback.chat_max_batched_tokens),
            tool_max_batched_tokens: self
                .tool_max_batched_tokens
                .or(fallback.tool_max_batched_tokens),
            enforce_eager: self.enforce_eager.or(fallback.enforce_eager),
            cuda_alloc_conf: self.cuda_alloc_conf.or(fallback.cuda_alloc_conf),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TuningBundle {
    pub kv_cache_dtype: String,
    pub attention_backend: String,
    pub cuda_arch_list: String,
    pub chat_max_batched_tokens: u32,
    pub tool_max_batched_tokens: u32,
    pub enforce_eager: bool,
    pub cuda_alloc_conf: String,
}

/// one cell of the tier x quantization table
struct TierDefaults {
    kv_cache_dtype: &'static str,
    chat_max_batched_tokens: u32,
    tool_max_batched_tokens: u32,
    enforce_eager: bool,
}

fn tier_defaults(tier: GpuTier, quantization: Quantization) -> TierDefaults {
    // 4-bit kernels are memory-bound at large prefill chunks
    let four_bit = matches!(quantization, Quantization::Awq | Quantization::GptqMarlin);

    match tier {
        GpuTier::HopperAda => TierDefaults {
            kv_cache_dtype: "fp8",
            chat_max_batched_tokens: if four_bit { 6144 } else { 8192 },
            tool_max_batched_tokens: 4096,
            enforce_eager: false,
        },
        GpuTier::Ampere => TierDefaults {
            kv_cache_dtype: "auto",
            chat_max_batched_tokens: if four_bit { 3072 } else { 4096 },
            tool_max_batched_tokens: 2048,
            enforce_eager: false,
        },
        GpuTier::Unknown => TierDefaults {
            kv_cache_dtype: "auto",
            chat_max_batched_tokens: 2048,
            tool_max_batched_tokens: 1024,
            enforce_eager: true,
        },
    }
}

/// derive the tuning bundle; explicit values are never replaced
pub fn tune(
    profile: &GpuProfile,
    quantization: Quantization,
    explicit: &TuningOverrides,
) -> (TuningBundle, Vec<SoftWarning>) {
    let defaults = tier_defaults(profile.tier, quantization);
    let mut warnings = Vec::new();

    let attention_backend = match &explicit.attention_backend {
        Some(backend) => backend.clone(),
        None if profile.has_fast_attention_kernel => FAST_ATTENTION_BACKEND.to_string(),
        None => {
            let fallback = match profile.tier {
                GpuTier::Unknown => PORTABLE_ATTENTION_BACKEND,
                GpuTier::HopperAda | GpuTier::Ampere => FALLBACK_ATTENTION_BACKEND,
            };
            warnings.push(
                SoftWarning::FastAttentionUnavailable {
                    fallback: fallback.to_string(),
                }
                .emit(),
            );
            fallback.to_string()
        }
    };

    let bundle = TuningBundle {
        kv_cache_dtype: explicit
            .kv_cache_dtype
            .clone()
            .unwrap_or_else(|| defaults.kv_cache_dtype.to_string()),
        attention_backend,
        cuda_arch_list: explicit
            .cuda_arch_list
            .clone()
            .unwrap_or_else(|| profile.cuda_arch().to_string()),
        chat_max_batched_tokens: explicit
            .chat_max_batched_tokens
            .unwrap_or(defaults.chat_max_batched_tokens),
        tool_max_batched_tokens: explicit
            .tool_max_batched_tokens
            .unwrap_or(defaults.tool_max_batched_tokens),
        enforce_eager: explicit.enforce_eager.unwrap_or(defaults.enforce_eager),
        cuda_alloc_conf: explicit
            .cuda_alloc_conf
            .clone()
            .unwrap_or_else(|| DEFAULT_CUDA_ALLOC_CONF.to_string()),
    };

    tracing::debug!(
        tier = %profile.tier,
        quantization = %quantization,
        kv_cache_dtype = %bundle.kv_cache_dtype,
        attention_backend = %bundle.attention_backend,
        "tuning resolved"
    );

    (bundle, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_explicit() -> TuningOverrides {
        TuningOverrides {
            kv_cache_dtype: Some("fp8_e5m2".to_string()),
            attention_backend: Some("TORCH_SDPA".to_string()),
            cuda_arch_list: Some("7.5".to_string()),
            chat_max_batched_tokens: Some(777),
            tool_max_batched_tokens: Some(333),
            enforce_eager: Some(true),
            cuda_alloc_conf: Some("max_split_size_mb:512".to_string()),
        }
    }

    #[test]
    fn test_hopper_fast_path() {
        let (bundle, warnings) = tune(
            &GpuProfile::new("H100", true),
            Quantization::Awq,
            &TuningOverrides::default(),
        );
        assert_eq!(bundle.kv_cache_dtype, "fp8");
        assert_eq!(bundle.attention_backend, FAST_ATTENTION_BACKEND);
        assert_eq!(bundle.cuda_arch_list, "9.0");
        assert_eq!(bundle.chat_max_batched_tokens, 6144);
        assert!(!bundle.enforce_eager);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_missing_fast_kernel_falls_back_with_note() {
        let (bundle, warnings) = tune(
            &GpuProfile::new("NVIDIA A100-SXM4-80GB", false),
            Quantization::Fp8,
            &TuningOverrides::default(),
        );
        assert_eq!(bundle.attention_backend, FALLBACK_ATTENTION_BACKEND);
        assert_eq!(bundle.kv_cache_dtype, "auto");
        assert_eq!(bundle.chat_max_batched_tokens, 4096);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_unknown_tier_is_conservative() {
        let (bundle, _) = tune(
            &GpuProfile::new("", false),
            Quantization::None,
            &TuningOverrides::default(),
        );
        assert_eq!(bundle.attention_backend, PORTABLE_ATTENTION_BACKEND);
        assert!(bundle.enforce_eager);
        assert_eq!(bundle.tool_max_batched_tokens, 1024);
    }

    #[test]
    fn test_explicit_values_always_win() {
        let profiles = [
            GpuProfile::new("H100", true),
            GpuProfile::new("NVIDIA A10G", false),
            GpuProfile::new("", false),
        ];
        let quantizations = [
            Quantization::Awq,
            Quantization::Fp8,
            Quantization::GptqMarlin,
            Quantization::None,
        ];
        let explicit = all_explicit();

        for profile in &profiles {
            for &quantization in &quantizations {
                let (bundle, warnings) = tune(profile, quantization, &explicit);
                assert_eq!(bundle.kv_cache_dtype, "fp8_e5m2");
                assert_eq!(bundle.attention_backend, "TORCH_SDPA");
                assert_eq!(bundle.cuda_arch_list, "7.5");
                assert_eq!(bundle.chat_max_batched_tokens, 777);
                assert_eq!(bundle.tool_max_batched_tokens, 333);
                assert!(bundle.enforce_eager);
                assert_eq!(bundle.cuda_alloc_conf, "max_split_size_mb:512");
                assert!(warnings.is_empty());
            }
        }
    }

    #[test]
    fn test_precedence_is_per_field() {
        let explicit = TuningOverrides {
            kv_cache_dtype: Some("auto".to_string()),
            ..Default::default()
        };
        let (bundle, _) = tune(&GpuProfile::new("H100", true), Quantization::Fp8, &explicit);
        assert_eq!(bundle.kv_cache_dtype, "auto");
        assert_eq!(bundle.cuda_arch_list, "9.0");
        assert_eq!(bundle.chat_max_batched_tokens, 8192);
    }

    #[test]
    fn test_merge_prefers_self() {
        let user = TuningOverrides {
            attention_backend: Some("FLASH_ATTN".to_string()),
            ..Default::default()
        };
        let preset = TuningOverrides {
            attention_backend: Some("TRTLLM".to_string()),
            enforce_eager: Some(false),
            ..Default::default()
        };
        let merged = user.or(preset);
        assert_eq!(merged.attention_backend.as_deref(), Some("FLASH_ATTN"));
        assert_eq!(merged.enforce_eager, Some(false));
    }
}
