//! Per-slot quantization decisions.
//!
//! Planning is pure and runs for every active slot before anything expensive
//! happens; execution only runs the external quantizer for plans that need it.

use crate::deploy::{DeploymentMode, EngineSlot};
use crate::error::{DeployError, Result, SoftWarning};
use crate::inputs::DeploymentInputs;
use crate::models::{detect_marker, QuantMarker};
use crate::quant::policy::{Quantization, QuantizationPolicy};
use crate::quant::push::{ArtifactPusher, PushRequest};
use crate::quant::quantizer::{has_sentinel, Quantizer, QuantizerSettings};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuantError {
    #[error("{policy_var}={policy} conflicts with {model_var}='{model}', which is marked {marker}")]
    Conflicting {
        model_var: &'static str,
        model: String,
        policy_var: &'static str,
        policy: QuantizationPolicy,
        marker: QuantMarker,
    },

    #[error(
        "{policy_var}=awq would quantize tool classifier {model_var}='{model}' at startup; \
         classifiers must already be quantized"
    )]
    ToolRuntimeQuantization {
        model_var: &'static str,
        model: String,
        policy_var: &'static str,
    },
}

/// the policy that governs one slot and the variable it came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotPolicy {
    pub policy: QuantizationPolicy,
    pub variable: &'static str,
}

impl SlotPolicy {
    pub fn new(policy: QuantizationPolicy, variable: &'static str) -> Self {
        Self { policy, variable }
    }

    /// per-slot override first; QUANTIZATION targets the chat engine, and the
    /// tool engine only when it runs alone
    pub fn for_slot(slot: EngineSlot, inputs: &DeploymentInputs) -> Self {
        if let Some(policy) = inputs.quantization_override(slot) {
            return Self::new(policy, slot.quantization_var());
        }

        match slot {
            EngineSlot::Chat => Self::new(inputs.policy, "QUANTIZATION"),
            EngineSlot::Tool if inputs.mode.mode == DeploymentMode::Tool => {
                Self::new(inputs.policy, "QUANTIZATION")
            }
            EngineSlot::Tool => Self::new(QuantizationPolicy::Auto, slot.quantization_var()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotQuantization {
    /// identifier handed to the engine; an output directory after local quantization
    pub model: String,
    /// original identifier when `model` was rewritten
    pub source_model: Option<String>,
    pub quantization: Quantization,
    pub pre_quantized: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuantPlan {
    Ready(SlotQuantization),
    Quantize { source: String, output_dir: PathBuf },
}

fn ready(model: &str, quantization: Quantization, pre_quantized: bool) -> QuantPlan {
    QuantPlan::Ready(SlotQuantization {
        model: model.to_string(),
        source_model: None,
        quantization,
        pre_quantized,
    })
}

fn reuse(source: &str, output_dir: &Path) -> SlotQuantization {
    SlotQuantization {
        model: output_dir.display().to_string(),
        source_model: Some(source.to_string()),
        quantization: Quantization::Awq,
        pre_quantized: false,
    }
}

/// decide how a slot is served without running anything
pub fn plan(
    slot: EngineSlot,
    model: &str,
    policy: SlotPolicy,
    settings: &QuantizerSettings,
) -> std::result::Result<QuantPlan, QuantError> {
    // an output directory from an earlier run carries the awq marker
    let marker = if has_sentinel(Path::new(model)) {
        Some(QuantMarker::Awq)
    } else {
        detect_marker(model)
    };

    if let Some(marker) = marker {
        let quantization = match policy.policy.explicit() {
            Some(requested) if !marker.accepts(requested) => {
                return Err(QuantError::Conflicting {
                    model_var: slot.model_var(),
                    model: model.to_string(),
                    policy_var: policy.variable,
                    policy: policy.policy,
                    marker,
                });
            }
            Some(requested) => requested,
            None => marker.default_format(),
        };
        return Ok(ready(model, quantization, true));
    }

    match (slot, policy.policy) {
        (EngineSlot::Tool, QuantizationPolicy::Awq) => Err(QuantError::ToolRuntimeQuantization {
            model_var: slot.model_var(),
            model: model.to_string(),
            policy_var: policy.variable,
        }),
        (EngineSlot::Tool, QuantizationPolicy::Auto) => Ok(ready(model, Quantization::None, false)),
        (EngineSlot::Chat, QuantizationPolicy::Awq) => {
            let output_dir = settings.output_dir(model);
            if has_sentinel(&output_dir) {
                Ok(QuantPlan::Ready(reuse(model, &output_dir)))
            } else {
                Ok(QuantPlan::Quantize {
                    source: model.to_string(),
                    output_dir,
                })
            }
        }
        (EngineSlot::Chat, QuantizationPolicy::Auto) => Ok(ready(model, Quantization::Fp8, false)),
        (_, QuantizationPolicy::Fp8) => Ok(ready(model, Quantization::Fp8, false)),
        (_, QuantizationPolicy::GptqMarlin) => Ok(ready(model, Quantization::GptqMarlin, false)),
    }
}

/// runs the external collaborators for plans that need them
pub struct QuantizationResolver<'a> {
    settings: &'a QuantizerSettings,
    quantizer: &'a dyn Quantizer,
    pusher: &'a dyn ArtifactPusher,
    push: Option<&'a PushRequest>,
}

impl<'a> QuantizationResolver<'a> {
    pub fn new(
        settings: &'a QuantizerSettings,
        quantizer: &'a dyn Quantizer,
        pusher: &'a dyn ArtifactPusher,
        push: Option<&'a PushRequest>,
    ) -> Self {
        Self {
            settings,
            quantizer,
            pusher,
            push,
        }
    }

    pub fn plan(
        &self,
        slot: EngineSlot,
        model: &str,
        policy: SlotPolicy,
    ) -> std::result::Result<QuantPlan, QuantError> {
        plan(slot, model, policy, self.settings)
    }

    /// quantization failure is fatal and not retried
    pub fn execute(&self, plan: QuantPlan) -> Result<(SlotQuantization, Vec<SoftWarning>)> {
        let (source, output_dir) = match plan {
            QuantPlan::Ready(resolved) => return Ok((resolved, Vec::new())),
            QuantPlan::Quantize { source, output_dir } => (source, output_dir),
        };

        if has_sentinel(&output_dir) {
            tracing::info!(output = %output_dir.display(), "reusing quantized output");
            return Ok((reuse(&source, &output_dir), Vec::new()));
        }

        tracing::info!(
            model = %source,
            output = %output_dir.display(),
            "quantizing model to awq"
        );
        self.quantizer.quantize(&source, &output_dir)?;

        if !has_sentinel(&output_dir) {
            return Err(DeployError::QuantizationFailed {
                model: source,
                reason: format!(
                    "quantizer finished but {} has no completion marker",
                    output_dir.display()
                ),
            });
        }

        let mut warnings = Vec::new();
        if let Some(request) = self.push {
            if let Err(e) = self.pusher.push(&output_dir, request) {
                warnings.push(
                    SoftWarning::PushFailed {
                        repo: request.repo.clone(),
                        reason: e.to_string(),
                    }
                    .emit(),
                );
            }
        }

        Ok((reuse(&source, &output_dir), warnings))
    }

    pub fn resolve(
        &self,
        slot: EngineSlot,
        model: &str,
        policy: SlotPolicy,
    ) -> Result<(SlotQuantization, Vec<SoftWarning>)> {
        let plan = self.plan(slot, model, policy)?;
        self.execute(plan)
    }
}
