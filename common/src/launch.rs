use crate::error::{DeployError, Result};
use crate::resolve::ResolvedConfiguration;
use tokio::process::Command;

/// exit code reported when the operator interrupts the server
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

/// run the server launcher with the resolved environment and return its exit code
pub async fn launch(config: &ResolvedConfiguration, command: &[String]) -> Result<i32> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| DeployError::Launch("no launcher command given".to_string()))?;

    tracing::info!(program = %program, mode = %config.mode(), "starting server launcher");

    let mut child = Command::new(program)
        .args(args)
        .envs(config.to_env())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| DeployError::Launch(format!("could not start '{}': {}", program, e)))?;

    tokio::select! {
        status = child.wait() => {
            let status = status?;
            // a signal-terminated child has no code
            let code = status.code().unwrap_or(1);
            tracing::info!(code, "server launcher exited");
            Ok(code)
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupted, stopping server launcher");
            child.kill().await?;
            Ok(INTERRUPTED_EXIT_CODE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::GpuProfile;
    use crate::inputs::{DeploymentInputs, EnvSnapshot};
    use crate::resolve::build_draft;
    use crate::validate::validate;

    fn config() -> ResolvedConfiguration {
        let env = EnvSnapshot::from_pairs([("DEPLOY_MODELS", "chat"), ("CHAT_MODEL", "org/chat")]);
        let inputs = DeploymentInputs::parse(&env);
        let (draft, _) = build_draft(&inputs, &GpuProfile::new("H100", true));
        validate(draft).unwrap()
    }

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn test_launcher_sees_resolved_environment() {
        let script = r#"[ "$CHAT_RESOLVED_QUANTIZATION" = fp8 ] && [ "$DEPLOY_MODELS" = chat ]"#;
        let code = launch(&config(), &sh(script)).await.unwrap();
        assert_eq!(code, 0);
    }

    #[tokio::test]
    async fn test_exit_code_is_passed_through() {
        assert_eq!(launch(&config(), &sh("exit 7")).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_empty_command_is_an_error() {
        assert!(matches!(
            launch(&config(), &[]).await,
            Err(DeployError::Launch(_))
        ));
    }
}
