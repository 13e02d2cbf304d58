use crate::error::{DeployError, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

/// file the quantizer leaves in a finished output directory
pub const AWQ_SENTINEL: &str = ".awq_complete";

pub fn has_sentinel(dir: &Path) -> bool {
    dir.join(AWQ_SENTINEL).is_file()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantizerSettings {
    /// root under which quantized outputs are written
    pub cache_dir: PathBuf,
    /// program plus leading arguments; model and output dir are appended
    pub command: String,
}

impl QuantizerSettings {
    pub const DEFAULT_CACHE_DIR: &'static str = ".awq";
    pub const DEFAULT_COMMAND: &'static str = "awq-quantize";

    /// deterministic output directory for a source model
    pub fn output_dir(&self, model_id: &str) -> PathBuf {
        let name = model_id
            .trim_matches('/')
            .replace('/', "--")
            .replace(char::is_whitespace, "_");
        self.cache_dir.join(format!("{}-awq", name))
    }
}

impl Default for QuantizerSettings {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(Self::DEFAULT_CACHE_DIR),
            command: Self::DEFAULT_COMMAND.to_string(),
        }
    }
}

/// external step that turns a model into an awq checkpoint
pub trait Quantizer {
    fn quantize(&self, model_id: &str, output_dir: &Path) -> Result<()>;
}

/// runs the configured quantizer command as a child process
pub struct CommandQuantizer {
    program: String,
    args: Vec<String>,
}

impl CommandQuantizer {
    pub fn new(command: &str) -> Result<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or_else(|| DeployError::QuantizationFailed {
            model: String::new(),
            reason: "quantizer command is empty".to_string(),
        })?;

        Ok(Self {
            program,
            args: parts.collect(),
        })
    }
}

impl Quantizer for CommandQuantizer {
    #[tracing::instrument(skip(self), fields(program = %self.program))]
    fn quantize(&self, model_id: &str, output_dir: &Path) -> Result<()> {
        if let Some(parent) = output_dir.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!("running quantizer (this may take a while)");

        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(model_id)
            .arg(output_dir)
            .status()
            .map_err(|e| DeployError::QuantizationFailed {
                model: model_id.to_string(),
                reason: format!("could not start '{}': {}", self.program, e),
            })?;

        if !status.success() {
            return Err(DeployError::QuantizationFailed {
                model: model_id.to_string(),
                reason: format!("'{}' exited with {}", self.program, status),
            });
        }

        Ok(())
    }
}
