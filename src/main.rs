// ABOUTME: Main entry point for voicekeeper
// ABOUTME: Loads the env file, sets up logging, dedups accounts by token, and starts one client per token

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use voicekeeper::{env_file, logging, paths};
use voicekeeper_core::{resolve_accounts, CredentialGroups, OrchestratorSettings};

#[derive(Parser, Debug)]
#[command(name = "voicekeeper", version, about = "Keep voice identities connected")]
struct Args {
    /// Env file with the account keys (defaults to ENV_FILE, CONFIG_FILE, CONFIG, then .env)
    #[arg(short = 'e', long = "env", visible_alias = "config")]
    env: Option<PathBuf>,

    /// File the log is appended to
    #[arg(long, default_value = paths::DEFAULT_LOG_FILE)]
    log_file: PathBuf,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = logging::init(&args.log_file)?;

    let env_path = env_file::resolve_env_path_from_process(args.env.as_deref());
    tracing::info!(path = %env_path.display(), "Using env file");
    let loaded = env_file::load_env(&env_path);

    let accounts = resolve_accounts(&loaded.vars);
    if accounts.is_empty() {
        tracing::warn!(
            path = %loaded.path.display(),
            "No eligible accounts: need TOKEN_N, GUILD_ID_N and VOICE_CHANNEL_ID_N"
        );
    }

    let groups = CredentialGroups::from_accounts(accounts);
    let settings = OrchestratorSettings::from_env(&loaded.vars);
    tracing::info!(
        accounts = groups.len(),
        rejected = groups.rejected_ids().len(),
        ready_timeout_ms = settings.ready_timeout_ms,
        "Configuration loaded"
    );

    start_clients(&groups, &settings);

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    Ok(())
}

#[cfg(feature = "discord")]
fn start_clients(groups: &CredentialGroups, settings: &OrchestratorSettings) {
    for account in groups.active_accounts() {
        let account = account.clone();
        let settings = settings.clone();
        tokio::spawn(async move {
            let id = account.id.clone();
            if let Err(e) = voicekeeper::discord::run_account(account, settings).await {
                tracing::error!(account = %id, error = %e, "Gateway client failed");
            }
        });
    }
}

#[cfg(not(feature = "discord"))]
fn start_clients(groups: &CredentialGroups, _settings: &OrchestratorSettings) {
    for account in groups.active_accounts() {
        tracing::error!(
            account = %account.id,
            "No transport compiled in, rebuild with --features discord"
        );
    }
}
