// Host runtime for the Archivo Ontology Time Machine: binds the proxy listener(s),
// terminates CONNECT tunnels (blind or MITM), and drives the Proxy Plugin's hook points
// against live sockets. This is one concrete host runtime implementation of the
// external contract described in SPEC_FULL.md §6; the core crates know nothing about
// hyper, tokio-rustls, or sockets.

mod request_adapter;
mod tls;

use crate::request_adapter::{empty_body, full_body, owned_request_from, response_from_rendered, target_host, BoxedBody};
use crate::tls::CertAuthority;
use archivo_core::archive_index::ArchiveIndexHandle;
use archivo_core::config::{Cli, Config, OntoVersion};
use archivo_core::request::{Method as CoreMethod, OwnedRequest};
use archivo_fetch::UpstreamFetcher;
use archivo_observability::Metrics;
use archivo_plugin::{on_connect, pre_upstream, ConnectDecision, ConnectionConfig};
use archivo_refresh::Refresher;
use clap::Parser;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

/// Global shutdown flag — checked by the signal handler and the run loop.
static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// Process-lifetime state shared across every connection and listener.
struct ServerState {
    startup_config: Config,
    archive_index: ArchiveIndexHandle,
    fetcher: UpstreamFetcher,
    metrics: Metrics,
    cert_authority: CertAuthority,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = Config::load(&cli)?;
    archivo_observability::logger::init(cfg.log_level_base, cfg.log_level_time_machine);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cfg))
}

async fn run(cfg: Config) -> anyhow::Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "archivo-server starting");

    let archive_index = ArchiveIndexHandle::default();
    let refresher = Arc::new(Refresher::new(&cfg, archive_index.clone()));
    if let Err(e) = refresher.ensure_loaded().await {
        warn!(error = %e, "initial archive index load failed, starting with an empty index");
    }
    archivo_refresh::spawn_daily_schedule(Arc::clone(&refresher), 3, 0);

    // A signing CA is always available, even under `httpsInterception = none` at
    // startup: a per-connection proxy-authorization override can still request MITM for
    // an individual connection (SPEC_FULL.md §4.2), and generating it eagerly avoids a
    // first-connection latency spike under load.
    let cert_authority = CertAuthority::load_or_create(&cfg.ca_cert_path, &cfg.ca_key_path)?;

    let state = Arc::new(ServerState {
        startup_config: cfg.clone(),
        archive_index,
        fetcher: UpstreamFetcher::new(),
        metrics: Metrics::new().map_err(|e| anyhow::anyhow!("prometheus registry init: {e}"))?,
        cert_authority,
    });

    let metrics_addr: SocketAddr = format!("{}:{}", bind_host(&cfg.host), cfg.port.saturating_add(1)).parse()?;
    tokio::spawn(serve_metrics(metrics_addr, Arc::clone(&state)));

    let mut listeners = Vec::new();
    for host in &cfg.host {
        let addr: SocketAddr = format!("{host}:{}", cfg.port).parse()?;
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "archivo-server listening");
        listeners.push((addr, listener));
    }

    let mut handles = Vec::new();
    for (addr, listener) in listeners {
        let state = Arc::clone(&state);
        handles.push(tokio::spawn(async move {
            accept_loop(listener, addr, state).await;
        }));
    }

    // ── Graceful shutdown: wait for SIGTERM/SIGINT ──
    setup_signal_handler();
    while !SHUTDOWN.load(Ordering::Relaxed) {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    info!("shutdown signal received, stopping");

    // Listener tasks run an infinite accept loop with no per-task cancellation today;
    // aborting them and letting the OS reclaim the sockets is sufficient for a process
    // that's about to exit. Future improvement: drain in-flight connections first.
    for handle in handles {
        handle.abort();
    }

    info!("archivo-server stopped");
    Ok(())
}

fn setup_signal_handler() {
    // SIGTERM (docker stop) + SIGINT (Ctrl+C)
    for sig in [libc::SIGTERM, libc::SIGINT] {
        unsafe {
            libc::signal(sig, signal_handler as libc::sighandler_t);
        }
    }
}

extern "C" fn signal_handler(_sig: libc::c_int) {
    SHUTDOWN.store(true, Ordering::Relaxed);
}

/// First bindable address from the configured list, used to co-locate the metrics
/// listener next to the proxy listener(s).
fn bind_host(hosts: &[String]) -> &str {
    hosts.first().map(String::as_str).unwrap_or("0.0.0.0")
}

async fn accept_loop(listener: TcpListener, addr: SocketAddr, state: Arc<ServerState>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    if let Err(e) = serve_plain_connection(stream, "http", state).await {
                        debug!(%peer, %addr, error = %e, "connection ended");
                    }
                });
            }
            Err(e) => {
                error!(%addr, error = %e, "accept failed");
            }
        }
    }
}

/// Serve one HTTP/1.1 connection (plain forward-proxy traffic, or the decrypted side of
/// a MITM-terminated tunnel) with upgrade support for CONNECT.
async fn serve_plain_connection(stream: impl tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static, scheme: &'static str, state: Arc<ServerState>) -> anyhow::Result<()> {
    let conn_config = Arc::new(ConnectionConfig::new(state.startup_config.clone()));
    let io = TokioIo::new(stream);

    let service = service_fn(move |req: Request<Incoming>| {
        let state = Arc::clone(&state);
        let conn_config = Arc::clone(&conn_config);
        async move { handle_request(req, state, conn_config, scheme).await }
    });

    http1::Builder::new()
        .serve_connection(io, service)
        .with_upgrades()
        .await
        .map_err(|e| anyhow::anyhow!("http/1 connection error: {e}"))
}

/// The single entry point every request (CONNECT, plain HTTP, or a decrypted
/// MITM-tunneled request) passes through before reaching the Proxy Plugin.
async fn handle_request(
    req: Request<Incoming>,
    state: Arc<ServerState>,
    conn_config: Arc<ConnectionConfig>,
    scheme: &'static str,
) -> Result<Response<BoxedBody>, std::convert::Infallible> {
    if req.method() == hyper::Method::CONNECT {
        return Ok(handle_connect(req, state, conn_config).await);
    }

    let host = target_host(&req).unwrap_or_default();
    let mut owned = owned_request_from(&req, scheme, &host);

    let resolved_cfg = conn_config.resolve(&owned).ok();
    let rendered = pre_upstream(&mut owned, &conn_config, &state.archive_index, &state.fetcher).await;

    if let Some(cfg) = resolved_cfg {
        state
            .metrics
            .requests_total
            .with_label_values(&[onto_version_label(cfg.onto_version), outcome_label(rendered.status)])
            .inc();
    }

    Ok(response_from_rendered(rendered))
}

fn onto_version_label(v: OntoVersion) -> &'static str {
    match v {
        OntoVersion::Original => "original",
        OntoVersion::OriginalFailoverLiveLatest => "original_failover_live_latest",
        OntoVersion::LatestArchived => "latest_archived",
        OntoVersion::TimestampArchived => "timestamp_archived",
        OntoVersion::DependencyManifest => "dependency_manifest",
    }
}

fn outcome_label(status: u16) -> &'static str {
    match status {
        200..=299 => "ok",
        300..=399 => "redirect",
        400..=499 => "client_error",
        _ => "server_error",
    }
}

/// CONNECT gating: decide tunnel / MITM / reject, then — for anything but reject —
/// upgrade the connection and hand the raw bytes to the matching handler in a detached
/// task, per the hyper upgrade protocol (the 200 response must be returned first).
async fn handle_connect(req: Request<Incoming>, state: Arc<ServerState>, conn_config: Arc<ConnectionConfig>) -> Response<BoxedBody> {
    let authority = match req.uri().authority().map(|a| a.to_string()) {
        Some(a) => a,
        None => return status_response(400, "CONNECT request missing authority"),
    };
    let host_only = authority.split(':').next().unwrap_or(&authority).to_string();

    let probe = OwnedRequest::new(CoreMethod::Connect, "https", &host_only, "/");
    let cfg = match conn_config.resolve(&probe) {
        Ok(cfg) => cfg,
        Err(e) => return status_response(e.status_code(), &e.to_string()),
    };

    match on_connect(&cfg) {
        ConnectDecision::Reject => status_response(403, "CONNECT refused by httpsInterception=block"),
        ConnectDecision::Tunnel => {
            tokio::spawn(async move {
                match hyper::upgrade::on(req).await {
                    Ok(upgraded) => {
                        if let Err(e) = tunnel_blind(upgraded, &authority).await {
                            warn!(%authority, error = %e, "blind tunnel failed");
                        }
                    }
                    Err(e) => warn!(%authority, error = %e, "CONNECT upgrade failed"),
                }
            });
            connect_established_response()
        }
        ConnectDecision::Mitm => {
            tokio::spawn(async move {
                match hyper::upgrade::on(req).await {
                    Ok(upgraded) => {
                        if let Err(e) = serve_mitm(upgraded, host_only, state).await {
                            warn!(%authority, error = %e, "MITM session failed");
                        }
                    }
                    Err(e) => warn!(%authority, error = %e, "CONNECT upgrade failed"),
                }
            });
            connect_established_response()
        }
    }
}

fn connect_established_response() -> Response<BoxedBody> {
    Response::builder()
        .status(200)
        .body(empty_body())
        .unwrap_or_else(|_| Response::new(empty_body()))
}

fn status_response(status: u16, message: &str) -> Response<BoxedBody> {
    let body = format!("<html><body><h1>{status} {message}</h1></body></html>").into_bytes();
    Response::builder()
        .status(status)
        .header("content-type", "text/html")
        .body(full_body(body))
        .unwrap_or_else(|_| Response::new(empty_body()))
}

/// Relay raw bytes between the client and the tunnel's real destination, blind to their
/// content — `httpsInterception = none`'s contract.
async fn tunnel_blind(upgraded: hyper::upgrade::Upgraded, authority: &str) -> anyhow::Result<()> {
    let mut upgraded = TokioIo::new(upgraded);
    let mut target = TcpStream::connect(authority).await?;
    tokio::io::copy_bidirectional(&mut upgraded, &mut target).await?;
    Ok(())
}

/// Terminate TLS at the proxy with a CA-signed leaf certificate for `host`, then serve
/// the decrypted traffic as ordinary HTTP/1.1 through the same pre-upstream pipeline.
///
/// The `archivo` interception mode's second (`interception_decision`) check is evaluated
/// per decrypted request for metrics/logging purposes only: once TLS has been terminated
/// for this connection there is no meaningful way to "downgrade" to a blind tunnel
/// mid-session, so this demo host runtime keeps serving MITM for the connection's
/// remainder regardless of the per-request verdict (see archivo-plugin::connect for the
/// documented Open Question resolution this approximates).
async fn serve_mitm(upgraded: hyper::upgrade::Upgraded, host: String, state: Arc<ServerState>) -> anyhow::Result<()> {
    let server_config = state.cert_authority.server_config_for_host(&host)?;
    let acceptor = TlsAcceptor::from(server_config);
    let tls_stream = acceptor.accept(TokioIo::new(upgraded)).await?;
    serve_plain_connection(tls_stream, "https", state).await
}

/// Minimal `/metrics` scrape endpoint, co-located on `port + 1`. Diagnostics only; it
/// never touches the core pipeline.
async fn serve_metrics(addr: SocketAddr, state: Arc<ServerState>) {
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            warn!(%addr, error = %e, "metrics listener failed to bind, metrics scraping disabled");
            return;
        }
    };
    info!(%addr, "metrics endpoint listening");

    loop {
        let (stream, _peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "metrics accept failed");
                continue;
            }
        };
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let service = service_fn(move |_req: Request<Incoming>| {
                let state = Arc::clone(&state);
                async move {
                    let body = state.metrics.encode_text();
                    Ok::<_, std::convert::Infallible>(
                        Response::builder()
                            .status(200)
                            .header("content-type", "text/plain; version=0.0.4")
                            .body(full_body(body.into_bytes()))
                            .unwrap_or_else(|_| Response::new(empty_body())),
                    )
                }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!(error = %e, "metrics connection ended");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_host_picks_first_configured_address() {
        let hosts = vec!["127.0.0.1".to_string(), "::1".to_string()];
        assert_eq!(bind_host(&hosts), "127.0.0.1");
    }

    #[test]
    fn test_bind_host_falls_back_when_empty() {
        assert_eq!(bind_host(&[]), "0.0.0.0");
    }

    #[test]
    fn test_onto_version_label_covers_every_variant() {
        assert_eq!(onto_version_label(OntoVersion::Original), "original");
        assert_eq!(
            onto_version_label(OntoVersion::OriginalFailoverLiveLatest),
            "original_failover_live_latest"
        );
        assert_eq!(onto_version_label(OntoVersion::LatestArchived), "latest_archived");
        assert_eq!(onto_version_label(OntoVersion::TimestampArchived), "timestamp_archived");
        assert_eq!(onto_version_label(OntoVersion::DependencyManifest), "dependency_manifest");
    }

    #[test]
    fn test_outcome_label_buckets_by_status_class() {
        assert_eq!(outcome_label(200), "ok");
        assert_eq!(outcome_label(304), "redirect");
        assert_eq!(outcome_label(404), "client_error");
        assert_eq!(outcome_label(502), "server_error");
    }
}
