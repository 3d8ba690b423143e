//! The pre-upstream hook: resolve the effective config, enforce `restrictedAccess`,
//! then hand off to the Version Engine. The result — success or error — is always
//! rendered into a response here; nothing propagates past this boundary as an
//! `ArchivoError` (SPEC_FULL.md §4.6).

use crate::connection::ConnectionConfig;
use archivo_core::archive_index::ArchiveIndexHandle;
use archivo_core::error::ArchivoError;
use archivo_core::request::{RequestView, UpstreamResponse};
use archivo_fetch::UpstreamFetcher;
use std::collections::HashMap;
use tracing::warn;

/// A response ready to be written back to the client: either a fetched
/// `UpstreamResponse` or a synthesized minimal-HTML error body.
#[derive(Debug, Clone)]
pub struct RenderedResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl From<UpstreamResponse> for RenderedResponse {
    fn from(resp: UpstreamResponse) -> Self {
        Self {
            status: resp.status,
            headers: resp.headers,
            body: resp.body,
        }
    }
}

impl From<&ArchivoError> for RenderedResponse {
    fn from(err: &ArchivoError) -> Self {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "text/html".to_string());
        Self {
            status: err.status_code(),
            headers,
            body: err.html_body(),
        }
    }
}

/// Handle a parsed HTTP request ready for the ontology-repair pipeline. Always
/// produces a `RenderedResponse`; the Proxy Plugin never lets the request "fall
/// through" to a separate blind-forward path because the Version Engine performs the
/// (possibly archive-substituted) fetch itself.
pub async fn pre_upstream<R: RequestView>(
    req: &mut R,
    conn: &ConnectionConfig,
    archive_index: &ArchiveIndexHandle,
    fetcher: &UpstreamFetcher,
) -> RenderedResponse {
    let cfg = match conn.resolve(req) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(error = %e, "config resolution failed");
            return RenderedResponse::from(&e);
        }
    };

    if cfg.restricted_access && archive_index.contains(req.host(), req.path()).is_none() {
        warn!(host = req.host(), path = req.path(), "restricted access denied non-archive IRI");
        return RenderedResponse::from(&ArchivoError::Restricted);
    }

    match archivo_version::resolve(req, &cfg, archive_index, fetcher).await {
        Ok(resp) => RenderedResponse::from(resp),
        Err(e) => {
            warn!(error = %e, "version engine returned an error");
            RenderedResponse::from(&e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archivo_core::config::{Config, OntoVersion};
    use archivo_core::request::{Method, OwnedRequest};
    use std::collections::HashSet;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_s3_restricted_access_rejects_non_member_without_upstream_call() {
        let mut cfg = Config::default();
        cfg.restricted_access = true;
        let conn = ConnectionConfig::new(cfg);
        let archive_index = ArchiveIndexHandle::default();
        let fetcher = UpstreamFetcher::new();

        let mut req = OwnedRequest::new(Method::Get, "http", "example.org", "/not-in-index");
        let resp = pre_upstream(&mut req, &conn, &archive_index, &fetcher).await;

        assert_eq!(resp.status, 403);
        assert!(String::from_utf8(resp.body).unwrap().contains("403 Forbidden"));
    }

    #[tokio::test]
    async fn test_restricted_access_allows_archive_member() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let mut cfg = Config::default();
        cfg.restricted_access = true;
        cfg.onto_version = OntoVersion::Original;
        let conn = ConnectionConfig::new(cfg);

        let mock_url = url::Url::parse(&server.uri()).unwrap();
        let host = format!("{}:{}", mock_url.host_str().unwrap(), mock_url.port().unwrap());
        let archive_index = ArchiveIndexHandle::new(archivo_core::archive_index::ArchiveIndex::new(
            HashSet::from([(host.clone(), "/onto".to_string())]),
        ));
        let fetcher = UpstreamFetcher::new();

        let mut req = OwnedRequest::new(Method::Get, "http", &host, "/onto");
        let resp = pre_upstream(&mut req, &conn, &archive_index, &fetcher).await;
        assert_eq!(resp.status, 200);
    }

    #[tokio::test]
    async fn test_config_resolution_failure_renders_internal_error() {
        let mut cfg = Config::default();
        cfg.client_config_via_proxy_auth = archivo_core::config::ClientConfigViaProxyAuth::Required;
        let conn = ConnectionConfig::new(cfg);
        let archive_index = ArchiveIndexHandle::default();
        let fetcher = UpstreamFetcher::new();

        let mut req = OwnedRequest::new(Method::Get, "http", "h", "/p");
        let resp = pre_upstream(&mut req, &conn, &archive_index, &fetcher).await;
        assert_eq!(resp.status, 500);
    }
}
