use crate::deploy::{allocate, EngineSlot};
use crate::error::{Result, SoftWarning};
use crate::gpu::{tune, GpuProfile};
use crate::inputs::{DeploymentInputs, EnvSnapshot};
use crate::quant::{
    plan, ArtifactPusher, QuantPlan, Quantization, QuantizationResolver, Quantizer, SlotPolicy,
};
use crate::resolve::config::{ConfigDraft, QuantState, ResolvedConfiguration, ServerContract, SlotDraft};
use crate::validate::{self, ValidationReport};
use std::collections::BTreeMap;

/// accepted configuration plus every soft warning raised on the way
#[derive(Debug, Clone)]
pub struct Resolution {
    pub config: ResolvedConfiguration,
    pub warnings: Vec<SoftWarning>,
}

/// format that drives the tuning table: the chat engine's when it runs
fn primary_quantization(slots: &BTreeMap<EngineSlot, SlotDraft>) -> Quantization {
    let planned = |slot: &SlotDraft| match &slot.quantization {
        QuantState::Resolved(resolved) => Some(resolved.quantization),
        QuantState::Pending { .. } => Some(Quantization::Awq),
        QuantState::Unresolved => None,
    };

    slots
        .get(&EngineSlot::Chat)
        .and_then(planned)
        .or_else(|| slots.get(&EngineSlot::Tool).and_then(planned))
        .unwrap_or(Quantization::None)
}

/// run every component except the quantizer and merge the results
pub fn build_draft(inputs: &DeploymentInputs, gpu: &GpuProfile) -> (ConfigDraft, Vec<SoftWarning>) {
    let mut errors = inputs.errors.clone();
    let mut warnings = inputs.warnings.clone();

    let fractions = allocate(&inputs.mode.active, &inputs.explicit_fractions());

    let mut slots = BTreeMap::new();
    for &slot in &inputs.mode.active {
        let policy = SlotPolicy::for_slot(slot, inputs);
        let model = inputs.model(slot).map(str::to_string);

        let quantization = match model.as_deref() {
            None => QuantState::Unresolved,
            Some(model) => match plan(slot, model, policy, &inputs.quantizer) {
                Ok(QuantPlan::Ready(resolved)) => QuantState::Resolved(resolved),
                Ok(QuantPlan::Quantize { source, output_dir }) => {
                    QuantState::Pending { source, output_dir }
                }
                Err(e) => {
                    errors.push(e.into());
                    QuantState::Unresolved
                }
            },
        };

        slots.insert(
            slot,
            SlotDraft {
                slot,
                model,
                policy,
                explicit_override: inputs.quantization_override(slot),
                quantization,
                gpu_memory_fraction: fractions[&slot],
            },
        );
    }

    let overrides = inputs.tuning.clone().or(inputs.stack.tuning());
    let (tuning, tuning_warnings) = tune(gpu, primary_quantization(&slots), &overrides);
    warnings.extend(tuning_warnings);

    let draft = ConfigDraft {
        stack: inputs.stack,
        gpu: gpu.clone(),
        mode: inputs.mode.mode,
        slots,
        tuning,
        server: ServerContract::with_api_key(inputs.api_key.clone()),
        errors,
    };

    (draft, warnings)
}

/// validate inputs without running the quantizer
pub fn check(
    env: &EnvSnapshot,
    gpu: &GpuProfile,
) -> std::result::Result<Vec<SoftWarning>, ValidationReport> {
    let inputs = DeploymentInputs::parse(env);
    let (draft, warnings) = build_draft(&inputs, gpu);
    validate::preflight(&draft)?;
    Ok(warnings)
}

/// full resolution: parse, plan, preflight, quantize, validate
#[tracing::instrument(skip_all, fields(gpu = %gpu.name))]
pub fn resolve(
    env: &EnvSnapshot,
    gpu: &GpuProfile,
    quantizer: &dyn Quantizer,
    pusher: &dyn ArtifactPusher,
) -> Result<Resolution> {
    let inputs = DeploymentInputs::parse(env);
    let (mut draft, mut warnings) = build_draft(&inputs, gpu);

    // nothing expensive runs for a configuration that is already wrong
    validate::preflight(&draft)?;

    let resolver = QuantizationResolver::new(
        &inputs.quantizer,
        quantizer,
        pusher,
        inputs.push.as_ref(),
    );

    for slot in draft.slots.values_mut() {
        if let QuantState::Pending { source, output_dir } = &slot.quantization {
            let (resolved, push_warnings) = resolver.execute(QuantPlan::Quantize {
                source: source.clone(),
                output_dir: output_dir.clone(),
            })?;
            slot.quantization = QuantState::Resolved(resolved);
            warnings.extend(push_warnings);
        }
    }

    let config = validate::validate(draft)?;
    tracing::info!(mode = %config.mode(), "configuration accepted");

    Ok(Resolution { config, warnings })
}
