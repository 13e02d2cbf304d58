//! Last gate before launch: every rule runs and every failure is reported together.

use crate::deploy::{DeploymentMode, Engine, EngineSlot, Stack};
use crate::models::{is_allowed_tool_model, is_local_path, is_repo_reference, TOOL_MODEL_ALLOW_LIST};
use crate::quant::{QuantError, Quantization, QuantizationPolicy};
use crate::resolve::config::{ConfigDraft, QuantState, ResolvedConfiguration, ResolvedSlot, SlotDraft};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("{variable} is required for the active deployment mode but is empty")]
    MissingModel { variable: &'static str },

    #[error("{variable}='{value}' is not a repository reference of the form owner/name")]
    MalformedRepoReference { variable: &'static str, value: String },

    #[error("TOOL_MODEL='{value}' is not an allowed classifier (allowed: {})", TOOL_MODEL_ALLOW_LIST.join(", "))]
    ToolModelNotAllowed { value: String },

    #[error(transparent)]
    Quantization(#[from] QuantError),

    #[error("{model_var} has no resolved quantization under {variable}={policy}")]
    MissingQuantization {
        model_var: &'static str,
        variable: &'static str,
        policy: QuantizationPolicy,
    },

    #[error("{variable}='{value}' is not a valid number")]
    InvalidNumber { variable: String, value: String },

    #[error("{variable}={value} must be greater than 0 and at most 1")]
    FractionOutOfRange { variable: &'static str, value: f64 },

    #[error("DEPLOY_MODELS={mode} is not supported by DEPLOY_STACK={stack}")]
    ModeNotAllowed { stack: Stack, mode: DeploymentMode },

    #[error("{engine} cannot serve {quantization} for {model_var}")]
    UnsupportedQuantization {
        engine: Engine,
        model_var: &'static str,
        quantization: Quantization,
    },

    #[error("{slot} engine is configured but DEPLOY_MODELS={mode} does not activate it")]
    SlotModeMismatch { slot: EngineSlot, mode: DeploymentMode },
}

/// non-empty list of everything wrong with a configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    errors: Vec<ValidationError>,
}

impl ValidationReport {
    fn from_errors(errors: Vec<ValidationError>) -> Option<Self> {
        if errors.is_empty() {
            None
        } else {
            Some(Self { errors })
        }
    }

    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.errors.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "  - {}", error)?;
        }
        Ok(())
    }
}

/// identifier the operator supplied, before any local rewrite
fn source_model(slot: &SlotDraft) -> Option<&str> {
    match &slot.quantization {
        QuantState::Resolved(resolved) => resolved
            .source_model
            .as_deref()
            .or(slot.model.as_deref()),
        QuantState::Pending { source, .. } => Some(source.as_str()),
        QuantState::Unresolved => slot.model.as_deref(),
    }
}

fn check_slot(draft: &ConfigDraft, slot: &SlotDraft, errors: &mut Vec<ValidationError>) {
    let model_var = slot.slot.model_var();

    if !draft.mode.activates(slot.slot) {
        errors.push(ValidationError::SlotModeMismatch {
            slot: slot.slot,
            mode: draft.mode,
        });
    }

    match source_model(slot) {
        None => errors.push(ValidationError::MissingModel {
            variable: model_var,
        }),
        Some(model) => {
            if !is_local_path(model) && !is_repo_reference(model) {
                errors.push(ValidationError::MalformedRepoReference {
                    variable: model_var,
                    value: model.to_string(),
                });
            }
            if slot.slot == EngineSlot::Tool && !is_allowed_tool_model(model) {
                errors.push(ValidationError::ToolModelNotAllowed {
                    value: model.to_string(),
                });
            }
        }
    }

    let fraction = slot.gpu_memory_fraction;
    if !(fraction > 0.0 && fraction <= 1.0) {
        errors.push(ValidationError::FractionOutOfRange {
            variable: slot.slot.fraction_var(),
            value: fraction,
        });
    }

    if let QuantState::Resolved(resolved) = &slot.quantization {
        let engine = draft.stack.engine();
        if !engine.supports(resolved.quantization) {
            errors.push(ValidationError::UnsupportedQuantization {
                engine,
                model_var,
                quantization: resolved.quantization,
            });
        }
    }
}

fn check_inputs(draft: &ConfigDraft) -> Vec<ValidationError> {
    let mut errors = draft.errors.clone();

    if !draft.stack.allowed_modes().contains(&draft.mode) {
        errors.push(ValidationError::ModeNotAllowed {
            stack: draft.stack,
            mode: draft.mode,
        });
    }

    for slot in draft.slots.values() {
        check_slot(draft, slot, &mut errors);
    }

    errors
}

fn has_quantization_error(errors: &[ValidationError], model_var: &str) -> bool {
    errors.iter().any(|error| match error {
        ValidationError::Quantization(QuantError::Conflicting { model_var: v, .. })
        | ValidationError::Quantization(QuantError::ToolRuntimeQuantization { model_var: v, .. }) => {
            *v == model_var
        }
        _ => false,
    })
}

/// every rule except the one that needs quantization to have run
pub fn preflight(draft: &ConfigDraft) -> Result<(), ValidationReport> {
    match ValidationReport::from_errors(check_inputs(draft)) {
        Some(report) => Err(report),
        None => Ok(()),
    }
}

/// accept the draft as an immutable configuration, or reject it with every failure
pub fn validate(draft: ConfigDraft) -> Result<ResolvedConfiguration, ValidationReport> {
    let mut errors = check_inputs(&draft);

    for slot in draft.slots.values() {
        let model_var = slot.slot.model_var();
        let missing = match &slot.quantization {
            QuantState::Resolved(_) => false,
            QuantState::Pending { .. } => true,
            QuantState::Unresolved => {
                slot.model.is_some() && !has_quantization_error(&errors, model_var)
            }
        };
        if missing {
            errors.push(ValidationError::MissingQuantization {
                model_var,
                variable: slot.policy.variable,
                policy: slot.policy.policy,
            });
        }
    }

    if let Some(report) = ValidationReport::from_errors(errors) {
        tracing::error!(errors = report.len(), "configuration rejected");
        return Err(report);
    }

    let slots: BTreeMap<EngineSlot, ResolvedSlot> = draft
        .slots
        .into_values()
        .filter_map(|slot| match slot.quantization {
            QuantState::Resolved(resolved) => Some((
                slot.slot,
                ResolvedSlot {
                    model: resolved.model,
                    source_model: resolved.source_model,
                    explicit_override: slot.explicit_override,
                    resolved_quantization: resolved.quantization,
                    pre_quantized: resolved.pre_quantized,
                    gpu_memory_fraction: slot.gpu_memory_fraction,
                },
            )),
            _ => None,
        })
        .collect();

    Ok(ResolvedConfiguration::new(
        draft.stack,
        draft.gpu,
        draft.mode,
        slots,
        draft.tuning,
        draft.server,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{GpuProfile, TuningBundle};
    use crate::quant::{SlotPolicy, SlotQuantization};
    use crate::resolve::config::ServerContract;
    use std::path::PathBuf;

    fn tuning() -> TuningBundle {
        TuningBundle {
            kv_cache_dtype: "auto".to_string(),
            attention_backend: "FLASH_ATTN".to_string(),
            cuda_arch_list: "8.0".to_string(),
            chat_max_batched_tokens: 4096,
            tool_max_batched_tokens: 2048,
            enforce_eager: false,
            cuda_alloc_conf: "expandable_segments:True".to_string(),
        }
    }

    fn resolved(model: &str, quantization: Quantization) -> QuantState {
        QuantState::Resolved(SlotQuantization {
            model: model.to_string(),
            source_model: None,
            quantization,
            pre_quantized: false,
        })
    }

    fn slot(slot: EngineSlot, model: Option<&str>, quantization: QuantState, fraction: f64) -> SlotDraft {
        SlotDraft {
            slot,
            model: model.map(str::to_string),
            policy: SlotPolicy::new(QuantizationPolicy::Auto, "QUANTIZATION"),
            explicit_override: None,
            quantization,
            gpu_memory_fraction: fraction,
        }
    }

    fn draft(mode: DeploymentMode, slots: Vec<SlotDraft>) -> ConfigDraft {
        ConfigDraft {
            stack: Stack::Base,
            gpu: GpuProfile::new("NVIDIA A100-SXM4-80GB", false),
            mode,
            slots: slots.into_iter().map(|s| (s.slot, s)).collect(),
            tuning: tuning(),
            server: ServerContract::with_api_key("yap_token"),
            errors: Vec::new(),
        }
    }

    #[test]
    fn test_accepts_valid_draft() {
        let draft = draft(
            DeploymentMode::Chat,
            vec![slot(
                EngineSlot::Chat,
                Some("org/chat"),
                resolved("org/chat", Quantization::Fp8),
                0.9,
            )],
        );
        let config = validate(draft).unwrap();
        assert_eq!(config.mode(), DeploymentMode::Chat);
        assert_eq!(
            config.slot(EngineSlot::Chat).unwrap().resolved_quantization,
            Quantization::Fp8
        );
    }

    #[test]
    fn test_rejects_unlisted_tool_model() {
        let draft = draft(
            DeploymentMode::Tool,
            vec![slot(
                EngineSlot::Tool,
                Some("evil-org/unlisted-model"),
                resolved("evil-org/unlisted-model", Quantization::None),
                0.9,
            )],
        );
        let report = validate(draft).unwrap_err();
        assert!(report
            .errors()
            .iter()
            .any(|e| matches!(e, ValidationError::ToolModelNotAllowed { .. })));
    }

    #[test]
    fn test_collects_every_error() {
        let draft = draft(
            DeploymentMode::Both,
            vec![
                slot(EngineSlot::Chat, Some("chatmodel"), resolved("chatmodel", Quantization::Fp8), 1.5),
                slot(EngineSlot::Tool, None, QuantState::Unresolved, 0.2),
            ],
        );
        let report = validate(draft).unwrap_err();
        assert_eq!(report.len(), 3);
        let rendered = report.to_string();
        assert!(rendered.contains("CHAT_MODEL='chatmodel'"));
        assert!(rendered.contains("CHAT_GPU_FRAC=1.5"));
        assert!(rendered.contains("TOOL_MODEL is required"));
        assert_eq!(rendered.lines().count(), 3);
    }

    #[test]
    fn test_local_paths_are_not_repo_references() {
        let draft = draft(
            DeploymentMode::Chat,
            vec![slot(
                EngineSlot::Chat,
                Some("/models/chat"),
                resolved("/models/chat", Quantization::Fp8),
                0.9,
            )],
        );
        assert!(validate(draft).is_ok());
    }

    #[test]
    fn test_pending_quantization_passes_preflight_only() {
        let pending = QuantState::Pending {
            source: "org/chat".to_string(),
            output_dir: PathBuf::from(".awq/org--chat-awq"),
        };
        let mut chat = slot(EngineSlot::Chat, Some("org/chat"), pending, 0.9);
        chat.policy = SlotPolicy::new(QuantizationPolicy::Awq, "QUANTIZATION");
        let draft = draft(DeploymentMode::Chat, vec![chat]);

        assert!(preflight(&draft).is_ok());
        let report = validate(draft).unwrap_err();
        assert!(matches!(
            report.errors(),
            [ValidationError::MissingQuantization {
                policy: QuantizationPolicy::Awq,
                ..
            }]
        ));
    }

    #[test]
    fn test_stack_restrictions() {
        let mut draft = draft(
            DeploymentMode::Chat,
            vec![slot(
                EngineSlot::Chat,
                Some("org/chat-gptq"),
                resolved("org/chat-gptq", Quantization::GptqMarlin),
                0.9,
            )],
        );
        draft.stack = Stack::Mixed;
        let report = preflight(&draft).unwrap_err();
        assert!(report
            .errors()
            .iter()
            .any(|e| matches!(e, ValidationError::ModeNotAllowed { .. })));

        draft.stack = Stack::Trt;
        let report = preflight(&draft).unwrap_err();
        assert!(matches!(
            report.errors(),
            [ValidationError::UnsupportedQuantization { .. }]
        ));
    }

    #[test]
    fn test_slot_outside_mode_is_rejected() {
        let draft = draft(
            DeploymentMode::Chat,
            vec![
                slot(EngineSlot::Chat, Some("org/chat"), resolved("org/chat", Quantization::Fp8), 0.9),
                slot(
                    EngineSlot::Tool,
                    Some("yapwithai/yap-modernbert-screenshot-intent"),
                    resolved("yapwithai/yap-modernbert-screenshot-intent", Quantization::None),
                    0.2,
                ),
            ],
        );
        let report = validate(draft).unwrap_err();
        assert!(matches!(
            report.errors(),
            [ValidationError::SlotModeMismatch {
                slot: EngineSlot::Tool,
                ..
            }]
        ));
    }
}
