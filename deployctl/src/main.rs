use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

mod cmd;

use clap::Parser;
use common::DeployError;
use std::process::ExitCode;

/// configuration rejected by validation
const EXIT_REJECTED: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let args = cmd::Cli::parse();
    match args.execute().await {
        Ok(code) => code,
        Err(e) => match e.downcast_ref::<DeployError>() {
            Some(DeployError::Validation(report)) => {
                eprintln!("configuration rejected ({} errors):\n{}", report.len(), report);
                ExitCode::from(EXIT_REJECTED)
            }
            _ => {
                eprintln!("error: {:#}", e);
                ExitCode::FAILURE
            }
        },
    }
}
