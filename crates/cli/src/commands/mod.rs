// CLI subcommand dispatch.

use std::time::Duration;

use clap::{Args, Subcommand};
use intelhub_client::ClientConfig;

pub mod listen;
pub mod send;

#[derive(Subcommand)]
pub enum Command {
    /// Print live hub events until interrupted
    Listen(listen::ListenArgs),
    /// Publish one notification to every connected user
    Send(send::SendArgs),
}

pub fn run(cmd: Command) -> anyhow::Result<()> {
    match cmd {
        Command::Listen(args) => listen::run(args),
        Command::Send(args) => send::run(args),
    }
}

/// Connection flags shared by every subcommand.
#[derive(Debug, Args)]
pub struct HubArgs {
    /// Hub websocket endpoint.
    #[arg(long, env = "INTELHUB_URL", default_value = "ws://localhost:5000/ws")]
    pub url: String,
    /// Session token issued by the login path.
    #[arg(long, env = "INTELHUB_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
    /// Force JSON output.
    #[arg(long)]
    pub json: bool,
}

impl HubArgs {
    pub fn client_config(&self) -> anyhow::Result<ClientConfig> {
        let config = ClientConfig::new(&self.url)?;
        Ok(match &self.token {
            Some(token) => config.with_session_token(token.clone()),
            None => config,
        })
    }
}

pub(crate) fn block_on<F: std::future::Future>(future: F) -> anyhow::Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    Ok(runtime.block_on(future))
}

pub(crate) fn millis(value: u64) -> Duration {
    Duration::from_millis(value)
}
