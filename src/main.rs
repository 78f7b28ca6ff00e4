// SPDX-License-Identifier: MIT

use std::process::ExitCode;

use tee_launcher::{LauncherConfig, logging, run_launcher};

fn main() -> ExitCode {
    let config = match LauncherConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("tee-launcher: {e}");
            return ExitCode::FAILURE;
        }
    };
    logging::init(&config.log);

    match run_launcher(config) {
        Ok(reason) => {
            tracing::info!(?reason, "launcher exited");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "launcher failed");
            ExitCode::FAILURE
        }
    }
}
