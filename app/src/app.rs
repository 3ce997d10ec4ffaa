use crate::metrics;
use crate::store::LevelDbStore;
use clap::builder::ArgPredicate;
use clap::Parser;
use ethers::types::Address;
use eyre::{eyre, Result};
use futures::pin_mut;
use std::str::FromStr;
use std::time::Duration;
use std::{future::Future, sync::Arc};
use synchronizer::{
    BatchSynchronizer, EthL1Client, JsonRpcMemberClient, KeyValueStore, MemoryStore,
    SynchronizerConfig,
};
use tokio_util::sync::CancellationToken;
use tracing::*;
use tracing_subscriber::{prelude::*, EnvFilter};

pub const DEV_L1_WS_URL: &str = "ws://127.0.0.1:8546";

#[inline]
pub fn run() -> Result<()> {
    App::parse().run()
}

pub fn parse_address(s: &str) -> Result<Address, eyre::Error> {
    Address::from_str(s.trim_start_matches("0x"))
        .map_err(|_err| eyre::Error::msg("Failed to parse address"))
}

pub fn parse_duration_secs(s: &str) -> Result<Duration, eyre::Error> {
    let secs: u64 = s.parse()?;
    if secs == 0 {
        return Err(eyre!("Duration must be at least one second"));
    }
    Ok(Duration::from_secs(secs))
}

#[derive(Parser)]
#[command(author, about = "DAC batch synchronizer", long_about = None)]
pub struct App {
    #[arg(
        long = "l1-ws-url",
        env = "L1_WS_URL",
        default_value_if("dev", ArgPredicate::IsPresent, Some(DEV_L1_WS_URL)),
        required_unless_present = "dev"
    )]
    pub l1_ws_url: Option<String>,

    /// Address of the contract emitting `SequenceBatches`
    #[arg(long = "supernets2-address", env = "SUPERNETS2_ADDRESS", value_parser = parse_address)]
    pub supernets2_address: Address,

    #[arg(
        long = "data-committee-address",
        env = "DATA_COMMITTEE_ADDRESS",
        value_parser = parse_address
    )]
    pub data_committee_address: Address,

    /// This node's committee address, never queried for data
    #[arg(
        long = "self-address",
        env = "SELF_ADDRESS",
        value_parser = parse_address,
        default_value = "0x0000000000000000000000000000000000000000"
    )]
    pub self_address: Address,

    #[arg(
        long = "retry-interval",
        value_name = "SECONDS",
        value_parser = parse_duration_secs,
        default_value = "1"
    )]
    pub retry_interval: Duration,

    #[arg(
        long = "subscription-timeout",
        value_name = "SECONDS",
        value_parser = parse_duration_secs,
        default_value = "60"
    )]
    pub subscription_timeout: Duration,

    #[arg(
        long = "rpc-timeout",
        value_name = "SECONDS",
        value_parser = parse_duration_secs,
        default_value = "3"
    )]
    pub rpc_timeout: Duration,

    #[arg(
        long = "db-timeout",
        value_name = "SECONDS",
        value_parser = parse_duration_secs,
        default_value = "2"
    )]
    pub db_timeout: Duration,

    #[arg(long = "db-path")]
    pub db_path: Option<String>,

    #[arg(
        long = "full-log-context",
        env = "FULL_LOG_CONTEXT",
        default_value_t = false
    )]
    pub full_log_context: bool,

    /// Keep synced data in memory and default to a local L1 node
    #[arg(long)]
    pub dev: bool,

    #[clap(long, help = "Port for the metrics server")]
    pub metrics_port: Option<u16>,
}

impl App {
    pub fn run(self) -> Result<()> {
        self.init_tracing();
        let tokio_runtime = tokio_runtime()?;
        let stop = CancellationToken::new();
        tokio_runtime.block_on(run_until_ctrl_c(self.execute(stop.clone()), stop))?;
        Ok(())
    }

    fn init_tracing(&self) {
        let rust_log_level = Level::from_str(
            std::env::var("RUST_LOG")
                .unwrap_or("info".to_string())
                .as_str(),
        )
        .unwrap_or(Level::INFO);

        let filter = if self.full_log_context {
            EnvFilter::builder().parse_lossy(rust_log_level.as_str())
        } else {
            let filter_tag = format!("app={rust_log_level},synchronizer={rust_log_level}");
            EnvFilter::builder().parse_lossy(filter_tag.as_str())
        };

        let main_layer = tracing_subscriber::fmt::layer().with_target(true);

        let layers = if rust_log_level == Level::DEBUG || rust_log_level == Level::TRACE {
            vec![main_layer
                .with_file(true)
                .with_line_number(true)
                .with_filter(filter)
                .boxed()]
        } else {
            vec![main_layer.with_filter(filter).boxed()]
        };

        tracing_subscriber::registry().with(layers).init();
    }

    fn config(&self) -> SynchronizerConfig {
        SynchronizerConfig::new(self.self_address)
            .with_retry_interval(self.retry_interval)
            .with_subscription_timeout(self.subscription_timeout)
            .with_rpc_timeout(self.rpc_timeout)
            .with_db_timeout(self.db_timeout)
    }

    async fn execute(self, stop: CancellationToken) -> Result<()> {
        let config = self.config();
        config.validate()?;
        info!("Synchronizer config: {}", serde_json::to_string(&config)?);

        let l1_ws_url = self
            .l1_ws_url
            .ok_or_else(|| eyre!("L1 websocket url is not configured"))?;
        let l1 = Arc::new(
            EthL1Client::connect(
                &l1_ws_url,
                self.supernets2_address,
                self.data_committee_address,
            )
            .await?,
        );

        metrics::start_server(self.metrics_port).await;

        if self.dev {
            info!("Running with in-memory storage");
            sync_until_stopped(config, l1, Arc::new(MemoryStore::open()), stop).await
        } else {
            let db = Arc::new(LevelDbStore::new_disk(self.db_path)?);
            sync_until_stopped(config, l1, db, stop).await
        }
    }
}

async fn sync_until_stopped<S: KeyValueStore>(
    config: SynchronizerConfig,
    l1: Arc<EthL1Client>,
    db: Arc<S>,
    stop: CancellationToken,
) -> Result<()> {
    let members = Arc::new(JsonRpcMemberClient);
    let synchronizer = BatchSynchronizer::new(config, l1, members, db)
        .await?
        .with_stop_token(stop);

    info!(
        "Resolved {} committee members",
        synchronizer.committee().len().await
    );
    synchronizer.start().await;
    Ok(())
}

pub fn tokio_runtime() -> Result<tokio::runtime::Runtime, std::io::Error> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
}

/// Drive `fut` to completion. On ctrl-c or SIGTERM `stop` is cancelled and
/// `fut` is still awaited so in-flight work can wind down.
async fn run_until_ctrl_c<F, E>(fut: F, stop: CancellationToken) -> Result<(), E>
where
    F: Future<Output = Result<(), E>>,
    E: Send + Sync + 'static + From<std::io::Error>,
{
    let ctrl_c = tokio::signal::ctrl_c();

    let mut stream = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let sigterm = stream.recv();
    pin_mut!(sigterm, ctrl_c, fut);

    tokio::select! {
        _ = ctrl_c => {
            info!("Received ctrl-c");
        },
        _ = sigterm => {
            info!("Received SIGTERM");
        },
        res = &mut fut => return res,
    }

    stop.cancel();
    fut.await
}
