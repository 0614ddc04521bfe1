//! mondod - the mondo server binary
//!
//! Wires the embedded SQL backend, the optional OLAP proxy, the query
//! router, and the wire protocol listener together from CLI flags and
//! environment variables. Configuration is construction-time only; there
//! is no persisted config file.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use mondo_backends::{Backend, ProxyBackend, ProxyConfig, SqliteBackend, SqliteBackendConfig};
use mondo_router::{QueryRouter, RouterConfig};
use mondo_wire::WireServer;

#[derive(Debug, Parser)]
#[command(name = "mondod", about = "MongoDB-wire-compatible dual-engine document database")]
struct Args {
    /// Address the wire protocol listener binds to.
    #[arg(long, env = "MONDO_LISTEN", default_value = "127.0.0.1:27017")]
    listen: String,

    /// Directory holding one sqlite file per database.
    #[arg(long, env = "MONDO_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// OLAP proxy endpoint; omit to run OLTP-only.
    #[arg(long, env = "MONDO_OLAP_ENDPOINT")]
    olap_endpoint: Option<String>,

    /// Bearer token for the OLAP proxy.
    #[arg(long, env = "MONDO_OLAP_TOKEN")]
    olap_token: Option<String>,

    /// Per-call OLAP timeout in seconds.
    #[arg(long, env = "MONDO_OLAP_TIMEOUT_SECS", default_value_t = 30)]
    olap_timeout_secs: u64,

    /// Attempts per OLAP call, first try included.
    #[arg(long, env = "MONDO_OLAP_RETRIES", default_value_t = 3)]
    olap_retries: u32,

    /// Fixed delay between OLAP retries, in milliseconds.
    #[arg(long, env = "MONDO_OLAP_RETRY_DELAY_MS", default_value_t = 500)]
    olap_retry_delay_ms: u64,

    /// Row estimate above which reads route to OLAP.
    #[arg(long, env = "MONDO_ROW_THRESHOLD", default_value_t = 10_000)]
    row_threshold: u64,

    /// Comma-separated timestamp field names for time-range detection.
    #[arg(
        long,
        env = "MONDO_TIMESTAMP_FIELDS",
        default_value = "_cdc_timestamp,created_at,updated_at,timestamp"
    )]
    timestamp_fields: String,

    /// Disable per-query routing analysis; everything runs on OLTP.
    #[arg(long, env = "MONDO_NO_AUTO_ROUTING")]
    no_auto_routing: bool,

    /// Prefer OLAP for any pipeline with OLAP-suggesting stages.
    #[arg(long, env = "MONDO_PREFER_OLAP_AGGREGATIONS")]
    prefer_olap_aggregations: bool,

    /// Largest `$in` list on _id still treated as an id lookup.
    #[arg(long, env = "MONDO_ID_IN_MAX", default_value_t = 100)]
    id_in_max: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let oltp = SqliteBackend::new(SqliteBackendConfig {
        data_dir: args.data_dir.clone(),
    })
    .context("failed to open the embedded SQL backend")?;

    let olap = match &args.olap_endpoint {
        Some(endpoint) => {
            let proxy = ProxyBackend::new(ProxyConfig {
                endpoint: endpoint.clone(),
                auth_token: args.olap_token.clone(),
                timeout: Duration::from_secs(args.olap_timeout_secs),
                retry_attempts: args.olap_retries,
                retry_delay: Duration::from_millis(args.olap_retry_delay_ms),
            })
            .context("failed to configure the OLAP proxy backend")?;
            Some(Backend::from(proxy))
        }
        None => None,
    };

    let config = RouterConfig {
        row_threshold: args.row_threshold,
        timestamp_fields: args
            .timestamp_fields
            .split(',')
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect(),
        auto_routing: !args.no_auto_routing,
        prefer_olap_for_aggregations: args.prefer_olap_aggregations,
        id_in_max: args.id_in_max,
    };
    tracing::info!(
        olap = olap.is_some(),
        auto_routing = config.auto_routing,
        row_threshold = config.row_threshold,
        "router configured"
    );

    let router = Arc::new(QueryRouter::new(Backend::from(oltp), olap, config));
    let server = WireServer::new(router);

    let listener = TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received");
            let _ = shutdown_tx.send(true);
        }
    });

    server
        .serve(listener, shutdown_rx)
        .await
        .context("wire server terminated abnormally")?;
    Ok(())
}
