//! Known models and the naming conventions that signal a pre-quantized checkpoint.

use crate::quant::Quantization;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// classifier models the tool engine is allowed to serve
pub const TOOL_MODEL_ALLOW_LIST: &[&str] = &[
    "yapwithai/yap-modernbert-screenshot-intent",
    "yapwithai/yap-longformer-screenshot-intent",
];

/// format a checkpoint already carries, from its name or its config
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuantMarker {
    Awq,
    Gptq,
    W4a16,
    CompressedTensors,
    AutoRound,
    Fp8,
}

// checked in order, first hit wins
static NAME_MARKERS: Lazy<Vec<(QuantMarker, Regex)>> = Lazy::new(|| {
    vec![
        (QuantMarker::Awq, Regex::new(r"(?i)awq").unwrap()),
        (QuantMarker::Gptq, Regex::new(r"(?i)gptq").unwrap()),
        (QuantMarker::W4a16, Regex::new(r"(?i)w4a16").unwrap()),
        (
            QuantMarker::CompressedTensors,
            Regex::new(r"(?i)compressed[-_]tensors").unwrap(),
        ),
        (QuantMarker::AutoRound, Regex::new(r"(?i)auto[-_]?round").unwrap()),
    ]
});

impl QuantMarker {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuantMarker::Awq => "awq",
            QuantMarker::Gptq => "gptq",
            QuantMarker::W4a16 => "w4a16",
            QuantMarker::CompressedTensors => "compressed-tensors",
            QuantMarker::AutoRound => "autoround",
            QuantMarker::Fp8 => "fp8",
        }
    }

    /// format used when the policy leaves the choice open
    pub fn default_format(&self) -> Quantization {
        match self {
            QuantMarker::Gptq => Quantization::GptqMarlin,
            QuantMarker::Fp8 => Quantization::Fp8,
            QuantMarker::Awq
            | QuantMarker::W4a16
            | QuantMarker::CompressedTensors
            | QuantMarker::AutoRound => Quantization::Awq,
        }
    }

    /// whether an explicitly requested format can load this checkpoint
    pub fn accepts(&self, quantization: Quantization) -> bool {
        match self {
            QuantMarker::Awq => quantization == Quantization::Awq,
            QuantMarker::Gptq => quantization == Quantization::GptqMarlin,
            QuantMarker::Fp8 => quantization == Quantization::Fp8,
            QuantMarker::W4a16 | QuantMarker::CompressedTensors | QuantMarker::AutoRound => {
                matches!(quantization, Quantization::Awq | Quantization::GptqMarlin)
            }
        }
    }

    fn from_quant_method(method: &str) -> Option<Self> {
        match method.to_lowercase().as_str() {
            "awq" => Some(QuantMarker::Awq),
            "gptq" | "gptq_marlin" | "marlin" => Some(QuantMarker::Gptq),
            "compressed-tensors" | "compressed_tensors" => Some(QuantMarker::CompressedTensors),
            "auto-round" | "autoround" => Some(QuantMarker::AutoRound),
            "fp8" | "fbgemm_fp8" => Some(QuantMarker::Fp8),
            _ => None,
        }
    }
}

impl fmt::Display for QuantMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// case-insensitive naming-convention match on a model identifier
pub fn name_marker(model_id: &str) -> Option<QuantMarker> {
    NAME_MARKERS
        .iter()
        .find(|(_, pattern)| pattern.is_match(model_id))
        .map(|(marker, _)| *marker)
}

#[derive(Deserialize)]
struct RawQuantizationConfig {
    quant_method: Option<String>,
}

#[derive(Deserialize)]
struct RawModelConfig {
    quantization_config: Option<RawQuantizationConfig>,
}

/// config.json for a local directory, or from the local hugging face cache.
/// never touches the network.
fn local_config_path(model_id: &str) -> Option<PathBuf> {
    let dir = Path::new(model_id);
    if dir.is_dir() {
        let path = dir.join("config.json");
        return path.is_file().then_some(path);
    }

    if !is_repo_reference(model_id) {
        return None;
    }

    hf_hub::Cache::default()
        .model(model_id.to_string())
        .get("config.json")
}

/// marker read from `quantization_config.quant_method` in a locally available config
pub fn config_marker(model_id: &str) -> Option<QuantMarker> {
    let path = local_config_path(model_id)?;
    let content = std::fs::read_to_string(&path).ok()?;
    let config: RawModelConfig = match serde_json::from_str(&content) {
        Ok(config) => config,
        Err(e) => {
            tracing::debug!(path = %path.display(), "unreadable model config: {}", e);
            return None;
        }
    };

    config
        .quantization_config
        .and_then(|q| q.quant_method)
        .and_then(|method| QuantMarker::from_quant_method(&method))
}

/// name marker first, then a locally available model config
pub fn detect_marker(model_id: &str) -> Option<QuantMarker> {
    name_marker(model_id).or_else(|| config_marker(model_id))
}

pub fn is_allowed_tool_model(model_id: &str) -> bool {
    TOOL_MODEL_ALLOW_LIST.contains(&model_id)
}

/// identifiers that name a filesystem location rather than a hub repository
pub fn is_local_path(model_id: &str) -> bool {
    model_id.starts_with('/')
        || model_id.starts_with("./")
        || model_id.starts_with("../")
        || model_id.starts_with('~')
        || Path::new(model_id).is_dir()
}

/// `owner/name` with both halves present
pub fn is_repo_reference(model_id: &str) -> bool {
    match model_id.split_once('/') {
        Some((owner, name)) => !owner.is_empty() && !name.is_empty(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_markers_are_case_insensitive() {
        assert_eq!(name_marker("org/chat-awq"), Some(QuantMarker::Awq));
        assert_eq!(name_marker("org/Foo-GPTQ"), Some(QuantMarker::Gptq));
        assert_eq!(name_marker("org/Model-W4A16"), Some(QuantMarker::W4a16));
        assert_eq!(
            name_marker("org/model-compressed-tensors"),
            Some(QuantMarker::CompressedTensors)
        );
        assert_eq!(name_marker("org/model-AutoRound"), Some(QuantMarker::AutoRound));
        assert_eq!(name_marker("org/plain-model"), None);
    }

    #[test]
    fn test_marker_compatibility() {
        assert!(QuantMarker::Awq.accepts(Quantization::Awq));
        assert!(!QuantMarker::Gptq.accepts(Quantization::Awq));
        assert!(QuantMarker::W4a16.accepts(Quantization::GptqMarlin));
        assert!(!QuantMarker::W4a16.accepts(Quantization::Fp8));
        assert_eq!(QuantMarker::Gptq.default_format(), Quantization::GptqMarlin);
    }

    #[test]
    fn test_allow_list() {
        assert!(is_allowed_tool_model("yapwithai/yap-modernbert-screenshot-intent"));
        assert!(!is_allowed_tool_model("evil-org/unlisted-model"));
        assert!(!is_allowed_tool_model("YAPWITHAI/yap-modernbert-screenshot-intent"));
    }

    #[test]
    fn test_repo_reference_shape() {
        assert!(is_repo_reference("org/model"));
        assert!(!is_repo_reference("model"));
        assert!(!is_repo_reference("/model"));
        assert!(!is_repo_reference("org/"));
    }

    #[test]
    fn test_config_marker_from_local_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.json"),
            r#"{"model_type": "llama", "quantization_config": {"quant_method": "awq", "bits": 4}}"#,
        )
        .unwrap();

        let model_id = dir.path().to_str().unwrap();
        assert!(is_local_path(model_id));
        assert_eq!(config_marker(model_id), Some(QuantMarker::Awq));
    }

    #[test]
    fn test_config_without_quantization() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.json"), r#"{"model_type": "llama"}"#).unwrap();
        assert_eq!(config_marker(dir.path().to_str().unwrap()), None);
    }
}
