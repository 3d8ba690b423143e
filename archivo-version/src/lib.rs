//! The version-policy state machine: `original` / `originalFailoverLiveLatest` /
//! `latestArchived` / `timestampArchived`. Ties together the Content Negotiator, the
//! Archive Index, and the Upstream Fetcher into the single decision the Proxy Plugin
//! needs: what response (if any) goes back to the client.

use archivo_core::archive_index::ArchiveIndexHandle;
use archivo_core::config::{Config, OntoVersion};
use archivo_core::error::ArchivoError;
use archivo_core::request::{Method, RequestView, UpstreamResponse};
use archivo_fetch::UpstreamFetcher;
use archivo_negotiate::{apply_accept, archive_format, content_type_accepted};
use std::collections::HashMap;
use tracing::{debug, warn};

/// HTTP status codes the failover logic treats as "the upstream answered meaningfully;
/// no failover needed on status alone" (SPEC_FULL.md §4.4).
fn is_passthrough_status(status: u16) -> bool {
    matches!(status, 100..=103 | 200 | 300..=304 | 307 | 308 | 451)
}

/// Resolve the response for `req` under `cfg`, dispatching on `cfg.onto_version`.
///
/// Rewrites `req`'s Accept header in place (via the Content Negotiator) before any
/// fetch, then dispatches. Never panics; every failure mode — including a failed
/// upstream or archive call — comes back as `Err(ArchivoError)` for the caller to render.
pub async fn resolve<R: RequestView>(
    req: &mut R,
    cfg: &Config,
    index: &ArchiveIndexHandle,
    fetcher: &UpstreamFetcher,
) -> Result<UpstreamResponse, ArchivoError> {
    if cfg.onto_version == OntoVersion::TimestampArchived && cfg.timestamp.is_empty() {
        return Err(ArchivoError::Internal(
            "onto_version timestamp-archived requires a non-empty timestamp".to_string(),
        ));
    }

    apply_accept(req, cfg);
    let original_url = req.url();

    match cfg.onto_version {
        OntoVersion::Original => resolve_original(req, fetcher, cfg.disable_removing_redirects).await,
        OntoVersion::OriginalFailoverLiveLatest => {
            resolve_failover(req, cfg, index, fetcher, &original_url).await
        }
        OntoVersion::LatestArchived => {
            resolve_archived(req, cfg, index, fetcher, &original_url, None).await
        }
        OntoVersion::TimestampArchived => {
            resolve_archived(req, cfg, index, fetcher, &original_url, Some(cfg.timestamp.as_str())).await
        }
        OntoVersion::DependencyManifest => Err(ArchivoError::Internal(
            "onto_version dependencyManifest has no implemented state".to_string(),
        )),
    }
}

/// `original`: whatever the Upstream Fetcher returns, errors included (Testable
/// Property 3 — the engine's return equals the fetcher's return).
async fn resolve_original<R: RequestView>(
    req: &R,
    fetcher: &UpstreamFetcher,
    disable_removing_redirects: bool,
) -> Result<UpstreamResponse, ArchivoError> {
    let headers = forwarded_headers(req);
    fetcher
        .fetch(req.method(), &req.url(), &headers, disable_removing_redirects)
        .await
}

/// `originalFailoverLiveLatest`: try upstream; fall back to the archive unless upstream
/// answered with a passthrough status *and* a Content-Type the client actually accepts.
async fn resolve_failover<R: RequestView>(
    req: &mut R,
    cfg: &Config,
    index: &ArchiveIndexHandle,
    fetcher: &UpstreamFetcher,
    original_url: &str,
) -> Result<UpstreamResponse, ArchivoError> {
    let accept = req.header_get("accept").map(str::to_string);
    let headers = forwarded_headers(req);
    let outcome = fetcher
        .fetch(req.method(), &req.url(), &headers, cfg.disable_removing_redirects)
        .await;

    match outcome {
        Ok(resp)
            if is_passthrough_status(resp.status)
                && resp
                    .content_type()
                    .map(|ct| content_type_accepted(ct, accept.as_deref()))
                    .unwrap_or(false) =>
        {
            Ok(resp)
        }
        Ok(resp) => {
            debug!(status = resp.status, "upstream answered but failed over to archive");
            resolve_archived(req, cfg, index, fetcher, original_url, None).await
        }
        Err(e) => {
            warn!(error = %e, "upstream fetch failed, failing over to archive");
            resolve_archived(req, cfg, index, fetcher, original_url, None).await
        }
    }
}

/// `latestArchived` / `timestampArchived`: require archive membership, pick an
/// archive-compatible format token from the client's Accept header, and fetch the
/// archive API. Archive-layer failures are returned as-is — never re-failed-over
/// (SPEC_FULL.md §7).
async fn resolve_archived<R: RequestView>(
    req: &R,
    cfg: &Config,
    index: &ArchiveIndexHandle,
    fetcher: &UpstreamFetcher,
    original_url: &str,
    timestamp: Option<&str>,
) -> Result<UpstreamResponse, ArchivoError> {
    if index.contains(req.host(), req.path()).is_none() {
        return Err(ArchivoError::NotFoundInArchive);
    }

    let accept = req.header_get("accept").map(str::to_string);
    let token = archive_format(accept.as_deref()).ok_or_else(|| {
        ArchivoError::Internal("no archive-compatible format available for request".to_string())
    })?;

    let archive_url = build_archive_url(&cfg.archive_api, original_url, token.token(), timestamp);
    let headers = forwarded_headers(req);
    fetcher
        .fetch(req.method(), &archive_url, &headers, cfg.disable_removing_redirects)
        .await
}

/// Build `archive-api?o={iri}&f={token}[&v={timestamp}]`, percent-encoding the
/// ontology IRI and timestamp as query parameters.
fn build_archive_url(base: &str, iri: &str, token: &str, timestamp: Option<&str>) -> String {
    let encoded_o: String = url::form_urlencoded::byte_serialize(iri.as_bytes()).collect();
    let mut out = format!("{base}?o={encoded_o}&f={token}");
    if let Some(ts) = timestamp {
        let encoded_v: String = url::form_urlencoded::byte_serialize(ts.as_bytes()).collect();
        out.push_str(&format!("&v={encoded_v}"));
    }
    out
}

/// The only header the core forwards on a fetch is the (possibly rewritten) Accept
/// header — `RequestView` deliberately exposes no header enumeration, so byte-level
/// header passthrough for a successful upstream response is the host runtime's concern,
/// not the Version Engine's.
fn forwarded_headers<R: RequestView>(req: &R) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    if let Some(accept) = req.header_get("accept") {
        headers.insert("accept".to_string(), accept.to_string());
    }
    headers
}
