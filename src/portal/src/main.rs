//! Portal: command-line client for the BI portal backend.
//!
//! Wires the request client (cache, single-flight, bounded queue) onto the
//! HTTP transport and runs one command against it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use portal_cache::build_key;
use portal_client::{HttpTransport, Portal, RequestClient};
use portal_core::config::AppConfig;
use portal_core::TenantCode;
use serde_json::{Map, Value};
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "portal")]
#[command(about = "Command-line client for the BI portal backend")]
#[command(version)]
struct Cli {
    /// Backend base URL (overrides config)
    #[arg(long, env = "PORTAL__API__BASE_URL")]
    base_url: Option<String>,

    /// Platform code to act under (overrides config)
    #[arg(long, env = "PORTAL__API__DEFAULT_TENANT")]
    tenant: Option<String>,

    /// Maximum concurrent backend requests (overrides config)
    #[arg(long, env = "PORTAL__QUEUE__MAX_CONCURRENT")]
    max_concurrent: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Cached GET of any endpoint
    Get {
        endpoint: String,
        /// Query parameter, repeatable
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
    },
    /// List stations of the tenant
    Stations {
        #[arg(long)]
        workshop: Option<String>,
    },
    /// List dashboards of the tenant
    Dashboards,
    /// Show the signed-in user
    Me,
    /// Look up a work order by its QR code
    WorkOrder { qr_code: String },
    /// Re-read an endpoint on an interval, showing cache reuse
    Watch {
        endpoint: String,
        #[arg(long, default_value_t = 5)]
        interval_secs: u64,
        /// Stop after this many reads (runs until Ctrl-C when absent)
        #[arg(long)]
        count: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "portal=info,portal_client=info".into()),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    if let Some(base_url) = cli.base_url {
        config.api.base_url = base_url;
    }
    if let Some(tenant) = cli.tenant {
        config.api.default_tenant = Some(tenant);
    }
    if let Some(max) = cli.max_concurrent {
        config.queue.max_concurrent = max;
    }
    config.validate()?;

    let tenant = config
        .api
        .default_tenant
        .as_deref()
        .map(TenantCode::parse)
        .transpose()?;

    info!(
        base_url = %config.api.base_url,
        tenant = tenant.as_ref().map(TenantCode::as_str).unwrap_or("none"),
        max_concurrent = config.queue.max_concurrent,
        default_ttl_secs = config.cache.default_ttl_secs,
        "Configuration loaded"
    );

    let transport = Arc::new(HttpTransport::new(&config.api)?);
    let client = RequestClient::from_config(&config, transport);
    let portal = Portal::new(client);

    // Spawn cache maintenance task
    let maintenance = portal.clone();
    let every = Duration::from_secs(config.cache.maintenance_interval_secs.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let evicted = maintenance.purge_expired();
            debug!(evicted = evicted, "Cache maintenance pass");
        }
    });

    let tenant = tenant.as_ref();
    match cli.command {
        Command::Get { endpoint, params } => {
            let adhoc = portal.client().resource::<Value>("adhoc");
            let query = parse_params(&params)?;
            let body = portal
                .client()
                .get_json(&adhoc, &endpoint, query, tenant)
                .await?;
            print_json(&body)?;
        }
        Command::Stations { workshop } => {
            let stations = portal
                .stations
                .list_stations(workshop.as_deref(), tenant)
                .await?;
            print_json(&stations)?;
        }
        Command::Dashboards => {
            print_json(&portal.dashboards.list_dashboards(tenant).await?)?;
        }
        Command::Me => {
            print_json(&portal.users.current_user().await?)?;
        }
        Command::WorkOrder { qr_code } => {
            print_json(&portal.stations.work_order_by_qr(&qr_code, tenant).await?)?;
        }
        Command::Watch {
            endpoint,
            interval_secs,
            count,
        } => {
            let adhoc = portal.client().resource::<Value>("watch");
            let key = build_key(&endpoint, None, tenant);
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
            let mut reads = 0u64;
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = tokio::signal::ctrl_c() => {
                        info!("Interrupted");
                        break;
                    }
                }
                let served_from_cache = adhoc.cache().contains_key(&key);
                let body = portal
                    .client()
                    .get_json(&adhoc, &endpoint, None, tenant)
                    .await?;
                info!(
                    endpoint = %endpoint,
                    read = reads + 1,
                    cached = served_from_cache,
                    "Read complete"
                );
                print_json(&body)?;

                reads += 1;
                if count.is_some_and(|limit| reads >= limit) {
                    break;
                }
            }
        }
    }

    Ok(())
}

/// Turn repeated `key=value` flags into a JSON query object. Values stay
/// strings; the backend parses them.
fn parse_params(params: &[String]) -> anyhow::Result<Option<Value>> {
    if params.is_empty() {
        return Ok(None);
    }
    let mut query = Map::new();
    for param in params {
        let Some((key, value)) = param.split_once('=') else {
            bail!("invalid --param '{param}', expected KEY=VALUE");
        };
        if key.is_empty() {
            bail!("invalid --param '{param}', empty key");
        }
        query.insert(key.to_string(), Value::String(value.to_string()));
    }
    Ok(Some(Value::Object(query)))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    let text = serde_json::to_string_pretty(value).context("failed to render response")?;
    println!("{text}");
    Ok(())
}
