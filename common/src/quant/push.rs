use crate::error::{DeployError, Result};
use std::fmt;
use std::path::Path;
use std::process::Command;

/// optional upload of a freshly quantized checkpoint
#[derive(Clone, PartialEq, Eq)]
pub struct PushRequest {
    pub repo: String,
    pub private: bool,
    pub token: Option<String>,
}

impl fmt::Debug for PushRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushRequest")
            .field("repo", &self.repo)
            .field("private", &self.private)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

pub trait ArtifactPusher {
    fn push(&self, source_dir: &Path, request: &PushRequest) -> Result<()>;
}

/// uploads with `huggingface-cli upload`
pub struct HfCliPusher;

impl ArtifactPusher for HfCliPusher {
    #[tracing::instrument(skip(self, request), fields(repo = %request.repo, private = request.private))]
    fn push(&self, source_dir: &Path, request: &PushRequest) -> Result<()> {
        let mut command = Command::new("huggingface-cli");
        command
            .arg("upload")
            .arg(&request.repo)
            .arg(source_dir)
            .arg(".");
        if request.private {
            command.arg("--private");
        }
        // token goes through the environment so it never shows in the process list
        if let Some(token) = &request.token {
            command.env("HF_TOKEN", token);
        }

        let status = command
            .status()
            .map_err(|e| DeployError::Push(format!("could not start huggingface-cli: {}", e)))?;

        if !status.success() {
            return Err(DeployError::Push(format!(
                "huggingface-cli exited with {}",
                status
            )));
        }

        tracing::info!("pushed {}", source_dir.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_token() {
        let request = PushRequest {
            repo: "org/out".to_string(),
            private: true,
            token: Some("hf_secret".to_string()),
        };
        let rendered = format!("{:?}", request);
        assert!(!rendered.contains("hf_secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
