use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use common::gpu::probe;
use common::inputs::EnvSnapshot;
use common::launch::launch;
use common::quant::{CommandQuantizer, HfCliPusher, QuantizerSettings};
use common::resolve::{check, resolve, Resolution};
use common::tracing::init_tracing;
use common::DeployError;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "deployctl")]
#[command(about = "resolve inference server deployment configuration", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve the configuration, quantizing the chat model if required
    Resolve {
        /// Deployment stack preset
        #[arg(long, env = "DEPLOY_STACK")]
        stack: Option<String>,

        /// Output format for the resolved configuration
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Write the resolved environment as a shell-sourceable file
        #[arg(long)]
        export: Option<PathBuf>,
    },
    /// Check the configuration without running the quantizer
    Validate {
        /// Deployment stack preset
        #[arg(long, env = "DEPLOY_STACK")]
        stack: Option<String>,
    },
    /// Resolve, then run the server launcher with the resolved environment
    Launch {
        /// Deployment stack preset
        #[arg(long, env = "DEPLOY_STACK")]
        stack: Option<String>,

        /// Launcher command and its arguments
        #[arg(trailing_var_arg = true, required = true, num_args = 1..)]
        command: Vec<String>,
    },
    /// Print the detected GPU profile
    Probe,
}

impl Cli {
    pub async fn execute(self) -> Result<ExitCode> {
        let _guard = init_tracing("deployctl")?;

        match self.command {
            Commands::Resolve {
                stack,
                format,
                export,
            } => {
                let resolution = resolve_from_env(stack)?;
                print_resolution(&resolution, format)?;
                if let Some(path) = export {
                    resolution.config.write_env_file(&path)?;
                }
                Ok(ExitCode::SUCCESS)
            }
            Commands::Validate { stack } => {
                let env = snapshot(stack);
                let (gpu, mut warnings) = probe(&env);
                warnings.extend(check(&env, &gpu).map_err(DeployError::from)?);
                tracing::info!(warnings = warnings.len(), "configuration valid");
                println!("configuration valid ({} warnings)", warnings.len());
                Ok(ExitCode::SUCCESS)
            }
            Commands::Launch { stack, command } => {
                let resolution = resolve_from_env(stack)?;
                resolution.config.log_summary();
                let code = launch(&resolution.config, &command).await?;
                Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
            }
            Commands::Probe => {
                let (gpu, warnings) = probe(&EnvSnapshot::from_env());
                println!("{}", serde_json::to_string_pretty(&gpu)?);
                println!("cuda arch list: {}", gpu.cuda_arch());
                for warning in &warnings {
                    println!("warning: {}", warning);
                }
                Ok(ExitCode::SUCCESS)
            }
        }
    }
}

/// process environment with the cli stack taking precedence
fn snapshot(stack: Option<String>) -> EnvSnapshot {
    let env = EnvSnapshot::from_env();
    match stack {
        Some(stack) => env.with("DEPLOY_STACK", stack),
        None => env,
    }
}

fn resolve_from_env(stack: Option<String>) -> Result<Resolution> {
    let env = snapshot(stack);
    let (gpu, probe_warnings) = probe(&env);

    let quantizer = CommandQuantizer::new(
        env.get("AWQ_QUANTIZER_CMD")
            .unwrap_or(QuantizerSettings::DEFAULT_COMMAND),
    )?;

    tracing::info!(
        stack = env.get("DEPLOY_STACK").unwrap_or("base"),
        "resolving deployment configuration"
    );
    let mut resolution = resolve(&env, &gpu, &quantizer, &HfCliPusher)?;

    // probe warnings come first, in the order they were raised
    let mut warnings = probe_warnings;
    warnings.append(&mut resolution.warnings);
    resolution.warnings = warnings;
    Ok(resolution)
}

fn print_resolution(resolution: &Resolution, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            for line in resolution.config.summary() {
                println!("{}", line);
            }
            for warning in &resolution.warnings {
                println!("warning: {}", warning);
            }
        }
        OutputFormat::Json => println!("{}", resolution.config.to_json()?),
    }
    Ok(())
}
