//! HTTPS interceptor.
//!
//! The hosts file points the game's domains at this listener. Two request
//! classes:
//! - the bootstrap endpoint, whose response names the UDP endpoint the
//!   client should dial: the true endpoint is recorded for the relay and
//!   the body rewritten to point at the proxy;
//! - everything else, reverse-proxied to the resolved upstream untouched
//!   apart from hop-by-hop headers.
//!
//! Upstream attempts fan out over candidate hosts and up to two resolved
//! addresses each, 2500 ms per attempt. Upstream certificate verification
//! is disabled; the SNI is pinned to the target host while the TCP
//! connection goes to the resolved address.

use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{CONTENT_TYPE, HOST};
use hyper::http::request::Parts;
use hyper::service::service_fn;
use hyper::{HeaderMap, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use gtproxy_shared::config::ProxyConfig;
use gtproxy_shared::text::TextParse;

use crate::relay::{PendingEndpoint, ProxyEvent};
use crate::resolve::ResolveIpv4;
use crate::tls::INTERCEPT_DOMAINS;

/// The endpoint-discovery path the game calls before dialing UDP.
pub const BOOTSTRAP_PATH: &str = "/growtopia/server_data.php";

/// Padding for the bootstrap candidate list.
const FALLBACK_BOOTSTRAP_HOSTS: [&str; 2] = ["www.growtopia1.com", "www.growtopia2.com"];

/// Per-attempt upstream budget.
const UPSTREAM_TIMEOUT: Duration = Duration::from_millis(2500);

/// Stripped from both directions; `Content-Length` is recomputed.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Shared interceptor state.
pub struct WebState {
    pub config: ProxyConfig,
    /// The relay's actual UDP listen port, rewritten into bootstrap
    /// responses.
    pub listen_port: u16,
    pub resolver: Arc<dyn ResolveIpv4>,
    pub events: mpsc::UnboundedSender<ProxyEvent>,
}

/// Serves TLS connections off the listener until the task is dropped.
pub async fn run(state: Arc<WebState>, acceptor: TlsAcceptor, listener: TcpListener) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!(error = %err, "https accept failed");
                continue;
            }
        };
        let acceptor = acceptor.clone();
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let tls = match acceptor.accept(stream).await {
                Ok(tls) => tls,
                Err(err) => {
                    debug!(%peer, error = %err, "tls handshake failed");
                    return;
                }
            };
            let service = service_fn(move |req| handle(Arc::clone(&state), req));
            if let Err(err) = hyper::server::conn::http1::Builder::new()
                .serve_connection(TokioIo::new(tls), service)
                .await
            {
                debug!(%peer, error = %err, "https connection error");
            }
        });
    }
}

async fn handle(
    state: Arc<WebState>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            debug!(error = %err, "request body error");
            return Ok(simple(StatusCode::BAD_REQUEST, "body error"));
        }
    };

    let host = request_host(&parts.headers);
    debug!(method = %parts.method, uri = %parts.uri, host = host.as_deref().unwrap_or("-"), "https request");

    let response = if parts.uri.path() == BOOTSTRAP_PATH {
        bootstrap(&state, &parts, host.as_deref(), &body).await
    } else {
        passthrough(&state, &parts, host.as_deref(), &body).await
    };
    Ok(response)
}

/// The `Host` header, without port, lowercased.
fn request_host(headers: &HeaderMap) -> Option<String> {
    headers
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .map(|host| {
            host.split(':')
                .next()
                .unwrap_or(host)
                .trim()
                .to_lowercase()
        })
        .filter(|host| !host.is_empty())
}

// ─── Bootstrap ───

async fn bootstrap(
    state: &WebState,
    parts: &Parts,
    host: Option<&str>,
    body: &Bytes,
) -> Response<Full<Bytes>> {
    let config = &state.config;
    let hosts = bootstrap_hosts(host, &config.server.address);
    let query = parts.uri.query();
    let body_text = String::from_utf8_lossy(body);
    let wants_login = form_param(query, &body_text, "platform").as_deref() == Some("0");

    for host in &hosts {
        let addrs = match state.resolver.lookup(host).await {
            Ok(addrs) => addrs,
            Err(err) => {
                debug!(%host, error = %err, "bootstrap host resolution failed");
                continue;
            }
        };
        for ip in addrs {
            let attempt = bootstrap_attempt(host, ip, parts, query, body).await;
            match attempt {
                Ok(text) => {
                    if wants_login && !text.contains("loginurl|") {
                        warn!(%host, %ip, "bootstrap response missing loginurl, falling over");
                        continue;
                    }
                    let (rewritten, endpoint) = rewrite_bootstrap(
                        &text,
                        state.listen_port,
                        config.web.ignore_maintenance,
                    );
                    if let Some(endpoint) = endpoint {
                        let _ = state.events.send(ProxyEvent::Bootstrap(endpoint));
                    }
                    info!(%host, %ip, "bootstrap intercepted");
                    return html(rewritten);
                }
                Err(err) => {
                    debug!(%host, %ip, error = %err, "bootstrap attempt failed");
                }
            }
        }
    }

    warn!("bootstrap candidates exhausted");
    simple(StatusCode::INTERNAL_SERVER_ERROR, "upstream unavailable")
}

/// Candidate order: request host, configured primary, fixed fallbacks;
/// deduplicated case-insensitively.
fn bootstrap_hosts(request_host: Option<&str>, primary: &str) -> Vec<String> {
    let mut hosts = Vec::with_capacity(4);
    if let Some(host) = request_host {
        push_unique(&mut hosts, host);
    }
    push_unique(&mut hosts, primary);
    for fallback in FALLBACK_BOOTSTRAP_HOSTS {
        push_unique(&mut hosts, fallback);
    }
    hosts
}

fn push_unique(hosts: &mut Vec<String>, candidate: &str) {
    let candidate = candidate.trim();
    if candidate.is_empty() {
        return;
    }
    if !hosts.iter().any(|h| h.eq_ignore_ascii_case(candidate)) {
        hosts.push(candidate.to_lowercase());
    }
}

/// Finds `key` in the URL query or a form body (first hit wins).
fn form_param(query: Option<&str>, body: &str, key: &str) -> Option<String> {
    for source in [query.unwrap_or(""), body] {
        for pair in source.split('&') {
            let mut split = pair.splitn(2, '=');
            if split.next() == Some(key) {
                return Some(split.next().unwrap_or("").to_string());
            }
        }
    }
    None
}

async fn bootstrap_attempt(
    host: &str,
    ip: Ipv4Addr,
    parts: &Parts,
    query: Option<&str>,
    body: &Bytes,
) -> anyhow::Result<String> {
    let client = upstream_client(host, ip)?;
    let mut url = format!("https://{host}{BOOTSTRAP_PATH}");
    if let Some(query) = query {
        url.push('?');
        url.push_str(query);
    }

    let request = if parts.method == Method::GET {
        client.get(&url)
    } else {
        let content_type = parts
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/x-www-form-urlencoded")
            .to_string();
        client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body.to_vec())
    };

    let response = request.send().await.context("upstream request")?;
    anyhow::ensure!(
        response.status().is_success(),
        "upstream status {}",
        response.status()
    );
    response.text().await.context("upstream body")
}

/// Rewrites a bootstrap body so the client dials the proxy: records the
/// true endpoint, overwrites `server`/`port`, ensures `type|1`, forces
/// `type2|1`, optionally strips maintenance lines, and re-appends
/// non-record sentinel lines.
pub fn rewrite_bootstrap(
    body: &str,
    listen_port: u16,
    ignore_maintenance: bool,
) -> (String, Option<PendingEndpoint>) {
    let normalized = body
        .replace("\r\n", "\n")
        .replace("\rtype|", "\ntype|")
        .replace("\rbeta_type|", "\nbeta_type|")
        .replace("\rmeta|", "\nmeta|");

    let mut records = TextParse::parse(&normalized);
    let endpoint = PendingEndpoint::new(records.get("server", 0), records.get_int("port", 0));

    records.set("server", vec!["127.0.0.1"]);
    records.set("port", vec![listen_port.to_string()]);
    if !records.contains("type") {
        records.set("type", vec!["1"]);
    }
    records.set("type2", vec!["1"]);
    if ignore_maintenance && records.contains("#maint") {
        records.remove_all("#maint");
        records.remove_all("maint");
    }

    let mut out = records.to_string();
    for line in normalized.split('\n') {
        if !line.is_empty() && !line.contains('|') {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(line);
        }
    }

    (out, endpoint.is_valid().then_some(endpoint))
}

// ─── Generic passthrough ───

async fn passthrough(
    state: &WebState,
    parts: &Parts,
    host: Option<&str>,
    body: &Bytes,
) -> Response<Full<Bytes>> {
    let hosts = passthrough_hosts(host, &state.config.server.address);
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let mut last: Option<Response<Full<Bytes>>> = None;
    'hosts: for host in &hosts {
        let addrs = match state.resolver.lookup(host).await {
            Ok(addrs) => addrs,
            Err(err) => {
                debug!(%host, error = %err, "passthrough host resolution failed");
                continue;
            }
        };
        for ip in addrs {
            match passthrough_attempt(host, ip, parts, &path_and_query, body).await {
                Ok(response) => {
                    if retry_status(response.status()) {
                        debug!(%host, %ip, status = %response.status(), "passthrough falling over");
                        last = Some(response);
                        continue 'hosts;
                    }
                    return response;
                }
                Err(err) => {
                    debug!(%host, %ip, error = %err, "passthrough attempt failed");
                }
            }
        }
    }

    last.unwrap_or_else(|| simple(StatusCode::BAD_GATEWAY, "upstream unavailable"))
}

/// Statuses that push the passthrough to the next candidate host.
fn retry_status(status: StatusCode) -> bool {
    status == StatusCode::FORBIDDEN || status == StatusCode::NOT_FOUND || status.is_server_error()
}

/// Candidate order: for intercept domains the configured primary comes
/// first; anything else prefers the requested host.
fn passthrough_hosts(request_host: Option<&str>, primary: &str) -> Vec<String> {
    let mut hosts = Vec::with_capacity(2);
    match request_host {
        Some(host) if INTERCEPT_DOMAINS.iter().any(|d| d.eq_ignore_ascii_case(host)) => {
            push_unique(&mut hosts, primary);
            push_unique(&mut hosts, host);
        }
        Some(host) => {
            push_unique(&mut hosts, host);
            push_unique(&mut hosts, primary);
        }
        None => push_unique(&mut hosts, primary),
    }
    hosts
}

async fn passthrough_attempt(
    host: &str,
    ip: Ipv4Addr,
    parts: &Parts,
    path_and_query: &str,
    body: &Bytes,
) -> anyhow::Result<Response<Full<Bytes>>> {
    let client = upstream_client(host, ip)?;
    let method = reqwest::Method::from_bytes(parts.method.as_str().as_bytes())
        .context("forward method")?;
    let url = format!("https://{host}{path_and_query}");

    let mut request = client.request(method, &url);
    for (name, value) in parts.headers.iter() {
        if skip_header(name.as_str()) {
            continue;
        }
        if let Ok(value) = value.to_str() {
            request = request.header(name.as_str(), value);
        }
    }
    if !body.is_empty() {
        request = request.body(body.to_vec());
    }

    let upstream = request.send().await.context("upstream request")?;
    let status = StatusCode::from_u16(upstream.status().as_u16()).context("upstream status")?;
    let headers = upstream.headers().clone();
    let bytes = upstream.bytes().await.context("upstream body")?;

    let mut builder = Response::builder().status(status);
    for (name, value) in headers.iter() {
        if skip_header(name.as_str()) {
            continue;
        }
        builder = builder.header(name.as_str(), value.as_bytes());
    }
    builder
        .body(Full::new(bytes))
        .context("assemble response")
}

/// Hop-by-hop headers plus the recomputed ones.
fn skip_header(name: &str) -> bool {
    name.eq_ignore_ascii_case("host")
        || name.eq_ignore_ascii_case("content-length")
        || HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Upstream client pinned to one resolved address, SNI kept on the host,
/// certificate verification off.
fn upstream_client(host: &str, ip: Ipv4Addr) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .resolve(host, SocketAddr::new(IpAddr::V4(ip), 443))
        .timeout(UPSTREAM_TIMEOUT)
        .build()
        .context("build upstream client")
}

fn simple(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Full::new(Bytes::from(message.to_string())))
        .expect("build response")
}

fn html(body: String) -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "text/html")
        .body(Full::new(Bytes::from(body)))
        .expect("build response")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_candidates_dedupe_case_insensitively() {
        let hosts = bootstrap_hosts(Some("WWW.Growtopia1.COM"), "www.growtopia1.com");
        assert_eq!(hosts, vec!["www.growtopia1.com", "www.growtopia2.com"]);

        let hosts = bootstrap_hosts(Some("other.example"), "www.growtopia1.com");
        assert_eq!(
            hosts,
            vec![
                "other.example",
                "www.growtopia1.com",
                "www.growtopia2.com"
            ]
        );

        let hosts = bootstrap_hosts(None, "proxy.example");
        assert_eq!(
            hosts,
            vec!["proxy.example", "www.growtopia1.com", "www.growtopia2.com"]
        );
    }

    #[test]
    fn passthrough_prefers_primary_for_intercept_domains() {
        let hosts = passthrough_hosts(Some("www.growtopia1.com"), "real.example");
        assert_eq!(hosts, vec!["real.example", "www.growtopia1.com"]);

        let hosts = passthrough_hosts(Some("cdn.example"), "real.example");
        assert_eq!(hosts, vec!["cdn.example", "real.example"]);
    }

    #[test]
    fn form_param_checks_query_then_body() {
        assert_eq!(
            form_param(Some("platform=0&version=4.61"), "", "platform").as_deref(),
            Some("0")
        );
        assert_eq!(
            form_param(None, "version=4.61&platform=1", "platform").as_deref(),
            Some("1")
        );
        assert_eq!(form_param(None, "version=4.61", "platform"), None);
    }

    #[test]
    fn rewrite_points_client_at_proxy() {
        let upstream = "server|1.2.3.4\nport|17091\ntype|1\nloginurl|https://x\n";
        let (body, endpoint) = rewrite_bootstrap(upstream, 16999, false);

        assert_eq!(endpoint, Some(PendingEndpoint::new("1.2.3.4", 17091)));
        let records = TextParse::parse(&body);
        assert_eq!(records.get("server", 0), "127.0.0.1");
        assert_eq!(records.get("port", 0), "16999");
        assert_eq!(records.get("type", 0), "1");
        assert_eq!(records.get("type2", 0), "1");
        assert_eq!(records.get("loginurl", 0), "https://x");
    }

    #[test]
    fn rewrite_normalizes_carriage_returns() {
        let upstream = "server|1.2.3.4\r\nport|17091\rtype|1\rbeta_type|0\rmeta|abc";
        let (body, _) = rewrite_bootstrap(upstream, 16999, false);
        let records = TextParse::parse(&body);
        assert_eq!(records.get("type", 0), "1");
        assert_eq!(records.get("beta_type", 0), "0");
        assert_eq!(records.get("meta", 0), "abc");
    }

    #[test]
    fn rewrite_adds_missing_type_line() {
        let (body, _) = rewrite_bootstrap("server|a\nport|1\n", 16999, false);
        let records = TextParse::parse(&body);
        assert_eq!(records.get("type", 0), "1");
    }

    #[test]
    fn rewrite_strips_maintenance_when_asked() {
        let upstream = "#maint|hello\nserver|a\nport|1\ntype|1\nmaint|msg\n";

        let (kept, _) = rewrite_bootstrap(upstream, 16999, false);
        assert!(TextParse::parse(&kept).contains("#maint"));

        let (stripped, _) = rewrite_bootstrap(upstream, 16999, true);
        let records = TextParse::parse(&stripped);
        assert!(!records.contains("#maint"));
        assert!(!records.contains("maint"));
        assert_eq!(records.get("server", 0), "127.0.0.1");
        assert_eq!(records.get("port", 0), "16999");
    }

    #[test]
    fn rewrite_reappends_sentinel_lines() {
        let upstream = "server|a\nport|1\ntype|1\nRTENDMARKERBS1001";
        let (body, _) = rewrite_bootstrap(upstream, 16999, false);
        assert!(body.ends_with("RTENDMARKERBS1001"));
    }

    #[test]
    fn invalid_upstream_endpoint_not_recorded() {
        let (_, endpoint) = rewrite_bootstrap("type|1\n", 16999, false);
        assert_eq!(endpoint, None);
        let (_, endpoint) = rewrite_bootstrap("server|a\nport|99999\n", 16999, false);
        assert_eq!(endpoint, None);
    }

    #[test]
    fn hop_by_hop_headers_are_skipped() {
        for header in HOP_BY_HOP {
            assert!(skip_header(header));
        }
        assert!(skip_header("Transfer-Encoding"));
        assert!(skip_header("host"));
        assert!(skip_header("content-length"));
        assert!(!skip_header("content-type"));
        assert!(!skip_header("user-agent"));
    }
}
