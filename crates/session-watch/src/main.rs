//! Reference pxGrid consumer.
//!
//! Creates (if needed) and activates an account, then subscribes to the
//! session and group topics and prints every message as a JSON line until
//! interrupted.
//!
//! Usage:
//!   px-session-watch --host ise-pan.corp:8910 --node-name watcher --password secret
//!
//! Env vars:
//!   PXGRID_CONFIG     config file (default: "pxgrid.toml", optional)
//!   PXGRID_NODE_NAME  node name
//!   PXGRID_PASSWORD   account password
//!   RUST_LOG          log filter (default: "info")

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use px_grid::capabilities::session_directory::{GroupTopicMessage, SessionTopicMessage};
use px_grid::config::PxGridConfig;
use px_grid::{Controller, Message, PxGridConsumer, Subscription, Transport};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Watch pxGrid session and group topics.
#[derive(Debug, Parser)]
#[command(name = "px-session-watch", version, about)]
struct Cli {
    /// Control host as `host[:port]`; repeat for failover.
    #[arg(short = 'a', long = "host")]
    hosts: Vec<String>,
    /// This consumer's node name.
    #[arg(short = 'n', long, env = "PXGRID_NODE_NAME")]
    node_name: Option<String>,
    /// Account password. Without one (and without a client cert) a new
    /// account is created.
    #[arg(short = 'w', long, env = "PXGRID_PASSWORD", hide_env_values = true)]
    password: Option<String>,
    /// Description sent with AccountActivate.
    #[arg(short = 'd', long)]
    description: Option<String>,
    /// Client certificate chain (PEM).
    #[arg(short = 'c', long)]
    cert: Option<PathBuf>,
    /// Client private key (PEM).
    #[arg(short = 'k', long)]
    key: Option<PathBuf>,
    /// CA bundle to trust instead of the system roots; repeatable.
    #[arg(short = 's', long = "ca-file")]
    ca_files: Vec<PathBuf>,
    /// DNS server to resolve node names with.
    #[arg(long)]
    dns: Option<String>,
    /// Skip server certificate verification.
    #[arg(long)]
    insecure: bool,
    /// Seconds between AccountActivate polls while pending.
    #[arg(long, default_value_t = 60)]
    activate_interval: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let (mut config, config_path) = load_config()?;
    apply_overrides(&mut config, &cli)?;
    tracing::info!(config = %config_path, hosts = config.hosts.len(), "configuration loaded");

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupted, shutting down");
                cancel.cancel();
            }
        });
    }

    activate(&mut config, Duration::from_secs(cli.activate_interval), &cancel).await?;

    let consumer = PxGridConsumer::new(config)?;
    let sessions = consumer.session_directory();
    let mut session_sub = sessions
        .on_session_topic()
        .subscribe(&cancel)
        .await
        .context("subscribing to session topic")?;
    let mut group_sub = sessions
        .on_group_topic()
        .subscribe(&cancel)
        .await
        .context("subscribing to group topic")?;
    tracing::info!(
        sessions = %session_sub.topic(),
        groups = %group_sub.topic(),
        "watching topics"
    );

    let result = watch(&mut session_sub, &mut group_sub, &cancel).await;
    consumer.disconnect().await;
    result
}

/// Load the config file named by `PXGRID_CONFIG`; a missing file yields
/// defaults so everything can come from flags.
fn load_config() -> anyhow::Result<(PxGridConfig, String)> {
    let config_path = std::env::var("PXGRID_CONFIG").unwrap_or_else(|_| "pxgrid.toml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        PxGridConfig::default()
    };

    Ok((config, config_path))
}

fn apply_overrides(config: &mut PxGridConfig, cli: &Cli) -> anyhow::Result<()> {
    if !cli.hosts.is_empty() {
        config.hosts.clear();
        for raw in &cli.hosts {
            let (host, port) = parse_host(raw)?;
            config.add_host(host, port);
        }
    }
    if let Some(name) = &cli.node_name {
        config.node_name = name.clone();
    }
    if let Some(password) = &cli.password {
        config.auth.password = Some(password.clone());
    }
    if let Some(description) = &cli.description {
        config.description = Some(description.clone());
    }
    if let Some(cert) = &cli.cert {
        config.tls.client_cert = Some(cert.clone());
    }
    if let Some(key) = &cli.key {
        config.tls.client_key = Some(key.clone());
    }
    config.tls.ca_files.extend(cli.ca_files.iter().cloned());
    if let Some(dns) = &cli.dns {
        config.dns.server = Some(dns.clone());
    }
    config.tls.insecure |= cli.insecure;
    Ok(())
}

/// `host`, `host:port`, `[v6]` or `[v6]:port`. Port 0 means the default.
fn parse_host(raw: &str) -> anyhow::Result<(String, u16)> {
    if let Some(rest) = raw.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .with_context(|| format!("unterminated IPv6 literal in {raw:?}"))?;
        let port = match tail.strip_prefix(':') {
            Some(p) => p.parse().with_context(|| format!("invalid port in {raw:?}"))?,
            None => 0,
        };
        return Ok((host.to_owned(), port));
    }
    match raw.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => {
            let port = port.parse().with_context(|| format!("invalid port in {raw:?}"))?;
            Ok((host.to_owned(), port))
        }
        _ => Ok((raw.to_owned(), 0)),
    }
}

fn controller(config: &PxGridConfig) -> anyhow::Result<Controller> {
    let transport = Arc::new(Transport::new(config)?);
    Ok(Controller::new(config, transport))
}

/// Create an account when there are no credentials, then poll
/// AccountActivate until the account is enabled.
async fn activate(
    config: &mut PxGridConfig,
    interval: Duration,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let has_password = config.auth.password.as_deref().is_some_and(|p| !p.is_empty());
    if !has_password && config.tls.client_cert.is_none() {
        let created = controller(config)?
            .account_create(cancel)
            .await
            .context("AccountCreate")?;
        tracing::info!(node_name = %created.node_name, "account created");
        config.auth.password = Some(created.password);
    }

    let ctl = controller(config)?;
    loop {
        let resp = ctl.account_activate(cancel).await.context("AccountActivate")?;
        tracing::info!(state = ?resp.account_state, version = %resp.version, "account activate");
        if resp.is_enabled() {
            return Ok(());
        }
        tokio::select! {
            _ = cancel.cancelled() => anyhow::bail!("cancelled while waiting for approval"),
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

async fn watch(
    sessions: &mut Subscription<SessionTopicMessage>,
    groups: &mut Subscription<GroupTopicMessage>,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            msg = sessions.recv() => print_message("session", msg)?,
            msg = groups.recv() => print_message("group", msg)?,
        }
    }
}

fn print_message<T: serde::Serialize>(topic: &str, msg: Option<Message<T>>) -> anyhow::Result<()> {
    match msg {
        None => anyhow::bail!("{topic} subscription ended"),
        Some(Message::Body { body, .. }) => {
            println!("{}", serde_json::to_string(&body)?);
            Ok(())
        }
        Some(Message::DecodeError { error, raw }) => {
            tracing::warn!(topic, error = %error, bytes = raw.len(), "undecodable message");
            Ok(())
        }
        Some(Message::TransportError(error)) => Err(error).context(format!("{topic} subscription")),
    }
}
