//! Proxy binary.
//!
//! Startup order matters: config first (it decides the log level), then
//! logging, TLS material, the HTTPS listener (a conflict here is fatal),
//! and finally the relay with its two datagram sockets. `SIGINT`/`SIGTERM`
//! trigger a graceful shutdown: scheduled tasks are canceled, both peers
//! disconnected, and the HTTPS listener closed.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use gtproxy_server::relay::{ProxyEvent, Relay};
use gtproxy_server::resolve::{DnsResolver, ResolveIpv4};
use gtproxy_server::{tls, web};
use gtproxy_shared::config::ProxyConfig;
use tokio::net::TcpListener;
use tracing::{info, warn};

const CONFIG_PATH: &str = "config.json";

fn load_or_create_config(path: &Path) -> anyhow::Result<ProxyConfig> {
    if path.exists() {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read {}", path.display()))?;
        return ProxyConfig::from_json_str(&text)
            .with_context(|| format!("parse {}", path.display()));
    }
    let config = ProxyConfig::default();
    std::fs::write(path, config.to_json_string().context("serialize config")?)
        .with_context(|| format!("write {}", path.display()))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_or_create_config(Path::new(CONFIG_PATH))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log.level_or_default().into()),
        )
        .init();

    // Both TLS stacks in the process are ring-backed; pin the provider so
    // neither panics over an ambiguous default.
    let _ = rustls::crypto::ring::default_provider().install_default();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        upstream = %config.server.address,
        "starting gtproxy"
    );

    let resolver: Arc<dyn ResolveIpv4> = Arc::new(
        DnsResolver::from_setting(&config.client.dns_server).context("dns resolver")?,
    );

    let acceptor = tls::load_or_generate(
        Path::new(&config.web.cert_path),
        Path::new(&config.web.key_path),
    )
    .context("tls material")?;

    // The game insists on 443; a conflict here cannot be worked around.
    let web_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), config.web.port);
    let web_listener = TcpListener::bind(web_addr)
        .await
        .with_context(|| format!("bind https listener on {web_addr}"))?;

    let (relay, events_tx, listen_port) =
        Relay::build(config.clone(), Arc::clone(&resolver)).await?;
    info!(udp = listen_port, https = config.web.port, "listeners ready");

    let web_state = Arc::new(web::WebState {
        config: config.clone(),
        listen_port,
        resolver,
        events: events_tx.clone(),
    });
    let web_task = tokio::spawn(web::run(web_state, acceptor, web_listener));
    let relay_task = tokio::spawn(relay.run());

    wait_for_shutdown().await;
    info!("termination signal received, shutting down");

    let _ = events_tx.send(ProxyEvent::Shutdown);
    let _ = relay_task.await;
    web_task.abort();

    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(err) => {
            warn!(error = %err, "sigterm handler unavailable");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
}
