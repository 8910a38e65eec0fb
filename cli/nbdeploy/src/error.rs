//! Error handling and display for the CLI.

use colored::Colorize;
use nbdeploy_cdn::CdnError;
use nbdeploy_compute::ComputeError;
use nbdeploy_reconcile::ReconcileError;
use nbdeploy_runtime::RuntimeError;
use thiserror::Error;

use crate::liveness::LivenessError;
use crate::smoke::SmokeError;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Missing secret {0}")]
    MissingSecret(String),

    #[error("Cannot ask for confirmation: {0}")]
    NotInteractive(String),
}

/// First error of type `T` in the chain.
fn find<T: std::error::Error + 'static>(err: &anyhow::Error) -> Option<&T> {
    err.chain().find_map(|e| e.downcast_ref::<T>())
}

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {}", "Error:".red().bold(), err);

    // Causes already rendered by their parent's message are skipped.
    let mut previous = err.to_string();
    for cause in err.chain().skip(1) {
        let message = cause.to_string();
        if !previous.contains(&message) {
            eprintln!("  {} {}", "caused by:".dimmed(), message);
        }
        previous = message;
    }

    if let Some(hint) = hint(err) {
        eprintln!("\n{}", format!("Hint: {hint}").yellow());
    }
}

/// Hint for known failure modes.
pub fn hint(err: &anyhow::Error) -> Option<String> {
    if let Some(cli_err) = find::<CliError>(err) {
        return match cli_err {
            CliError::MissingSecret(key) => Some(format!(
                "Add {key} to the credentials file or set NBDEPLOY_{key}."
            )),
            CliError::NotInteractive(_) => {
                Some("Pass --yes to run without a prompt.".to_string())
            }
        };
    }

    if let Some(reconcile_err) = find::<ReconcileError>(err) {
        match reconcile_err {
            ReconcileError::MissingTemplate { .. } => {
                return Some(
                    "Set [cdn.default_template] in nbdeploy.toml to seed an empty backend pool."
                        .to_string(),
                )
            }
            ReconcileError::Apply { .. } => {
                return Some(
                    "The draft version keeps the changes made so far; run `nbdeploy reconcile` again to finish."
                        .to_string(),
                )
            }
            ReconcileError::Cdn(_) => {}
        }
    }

    if let Some(cdn_err) = find::<CdnError>(err) {
        match cdn_err.status() {
            Some(401) | Some(403) => {
                return Some("Check FASTLY_KEY and FASTLY_SERVICE_ID.".to_string())
            }
            _ if matches!(cdn_err, CdnError::Transport(_)) => {
                return Some("Check your network connection and [cdn] api_url.".to_string())
            }
            _ => {}
        }
    }

    if let Some(runtime_err) = find::<RuntimeError>(err) {
        if matches!(runtime_err, RuntimeError::Http(_) | RuntimeError::Endpoint(_)) {
            return Some("Check that Docker is running and DOCKER_HOST is correct.".to_string());
        }
    }

    if let Some(ComputeError::Auth(_)) = find::<ComputeError>(err) {
        return Some("Check OS_USERNAME, OS_PASSWORD and [compute] region.".to_string());
    }

    if let Some(LivenessError::Timeout { .. }) = find::<LivenessError>(err) {
        return Some(
            "The replacement container did not answer; inspect it with `docker logs`. Remaining instances were left untouched."
                .to_string(),
        );
    }

    if let Some(SmokeError::Notebooks { .. }) = find::<SmokeError>(err) {
        return Some("Check the instances behind the CDN with `nbdeploy status`.".to_string());
    }

    None
}
