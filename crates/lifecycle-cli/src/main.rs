//! CLI binary to start, stop and inspect Gaia nodes through the task manager contract.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::process::ExitCode;
use std::time::Duration;

use clap::{ArgGroup, Parser};
use gaia_ledger_gateway_evm::{EvmLedgerGateway, EvmLedgerGatewayOptions};
use gaia_lifecycle::{LifecycleClient, LifecycleClientOptions, TaskId};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use url::Url;

/// CLI-specific error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Status could not be rendered
    #[error("failed to encode status: {0}")]
    Encode(#[from] serde_json::Error),

    /// RPC endpoint could not be built from host and port
    #[error("invalid RPC endpoint: {0}")]
    Endpoint(#[from] url::ParseError),

    /// Gateway setup error
    #[error("gateway error: {0}")]
    Gateway(#[from] gaia_ledger_gateway_evm::Error),

    /// Lifecycle operation error
    #[error(transparent)]
    Lifecycle(#[from] gaia_lifecycle::Error),

    /// Stop without a task id while the ledger has no tasks
    #[error("no task has been started yet")]
    NoTask,
}

impl Error {
    /// Process exit status for this error.
    const fn exit_code(&self) -> u8 {
        match self {
            Self::Lifecycle(gaia_lifecycle::Error::Submission(_)) => 2,
            Self::Lifecycle(gaia_lifecycle::Error::ConfirmationTimeout { .. }) => 3,
            Self::Lifecycle(gaia_lifecycle::Error::OperationReverted(_)) => 4,
            Self::Lifecycle(gaia_lifecycle::Error::UnknownTask(_)) | Self::NoTask => 5,
            Self::Lifecycle(gaia_lifecycle::Error::Transport(_)) => 6,
            _ => 1,
        }
    }
}

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
#[command(group(
    ArgGroup::new("action")
        .required(true)
        .args(["start", "stop", "status", "latest"])
))]
struct Args {
    /// Start a Gaia node
    #[arg(short, long)]
    start: bool,

    /// Stop a Gaia node by task id, or the latest task when no id is given
    #[arg(short = 'x', long, value_name = "TASK_ID", num_args = 0..=1)]
    stop: Option<Option<u32>>,

    /// Print the status of a Gaia node by task id
    #[arg(long, value_name = "TASK_ID")]
    status: Option<u32>,

    /// Print the latest task id
    #[arg(long)]
    latest: bool,

    /// Seconds to wait for a transaction to be confirmed
    #[arg(long, default_value_t = 120, env = "GAIA_CONFIRMATION_TIMEOUT_SECS")]
    confirmation_timeout_secs: u64,

    /// Address of the task manager contract
    #[arg(long, env = "GAIA_CONTRACT_ADDRESS")]
    contract_address: String,

    /// Data directory passed to started nodes
    #[arg(long, default_value = "data/gaia/node1", env = "GAIA_DATA_DIR")]
    data_dir: String,

    /// Network passed to started nodes
    #[arg(long, default_value = "testnet", env = "GAIA_NETWORK")]
    network: String,

    /// Milliseconds between confirmation polls
    #[arg(long, default_value_t = 1000, env = "GAIA_POLL_INTERVAL_MS")]
    poll_interval_ms: u64,

    /// Port number of the JSON-RPC endpoint
    #[arg(short, long, default_value_t = 55002, env = "GAIA_RPC_PORT")]
    port: u16,

    /// Private key used to sign transactions
    #[arg(long, env = "GAIA_PRIVATE_KEY", hide_env_values = true)]
    private_key: String,

    /// Blocks that must include a transaction before it counts as confirmed
    #[arg(long, default_value_t = 1, env = "GAIA_REQUIRED_CONFIRMATIONS")]
    required_confirmations: u64,

    /// Host of the JSON-RPC endpoint
    #[arg(long, default_value = "localhost", env = "GAIA_RPC_HOST")]
    rpc_host: String,
}

impl Args {
    fn rpc_url(&self) -> Result<Url, Error> {
        Ok(Url::parse(&format!("http://{}:{}", self.rpc_host, self.port))?)
    }

    fn gateway_options(&self) -> Result<EvmLedgerGatewayOptions, Error> {
        Ok(EvmLedgerGatewayOptions {
            contract_address: self.contract_address.clone(),
            private_key: self.private_key.clone(),
            required_confirmations: self.required_confirmations,
            rpc_url: self.rpc_url()?,
        })
    }

    fn client_options(&self) -> LifecycleClientOptions {
        LifecycleClientOptions {
            confirmation_timeout: Duration::from_secs(self.confirmation_timeout_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            ..LifecycleClientOptions::default()
        }
    }
}

async fn run(args: Args) -> Result<(), Error> {
    let gateway = EvmLedgerGateway::new(args.gateway_options()?)?;
    let client = LifecycleClient::new(gateway, args.client_options());

    if args.start {
        let task_id = client.start_node(&args.network, &args.data_dir).await?;
        info!("node started as task {task_id}");
        println!("{task_id}");
    } else if let Some(task_id) = args.stop {
        let task_id = match task_id {
            Some(task_id) => TaskId::new(task_id),
            None => {
                let latest = client.get_latest_task_id().await?.ok_or(Error::NoTask)?;
                info!("latest task id: {latest}");
                latest
            }
        };
        client.stop_node(task_id).await?;
        info!("task {task_id} stopped");
    } else if let Some(task_id) = args.status {
        let status = client.get_status(TaskId::new(task_id)).await?;
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else if args.latest {
        match client.get_latest_task_id().await? {
            Some(task_id) => println!("{task_id}"),
            None => println!("none"),
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if matches!(&e, Error::Lifecycle(inner) if inner.is_outcome_unknown()) {
                error!("{e}; query the task status later to learn the outcome");
            } else {
                error!("{e}");
            }
            ExitCode::from(e.exit_code())
        }
    }
}
