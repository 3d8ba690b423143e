use thiserror::Error;

/// Normalized error taxonomy shared by every core component.
///
/// Every fallible operation that can be observed by a client ends up as one of these
/// variants rather than an arbitrary `anyhow`/`io` error — this is what lets the Version
/// Engine decide, purely by matching on the kind, whether a failure triggers failover or
/// must be surfaced verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArchivoError {
    #[error("DNS resolution failed for {0}")]
    Dns(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("TLS handshake failed: {0}")]
    Tls(String),

    #[error("request timed out")]
    Timeout,

    #[error("too many redirects (limit {0})")]
    TooManyRedirects(u8),

    #[error("network error: {0}")]
    NetworkOther(String),

    #[error("access restricted to archived ontologies")]
    Restricted,

    #[error("ontology not present in the archive index")]
    NotFoundInArchive,

    #[error("internal: {0}")]
    Internal(String),
}

impl ArchivoError {
    /// Map to the HTTP status code a client should see.
    pub fn status_code(&self) -> u16 {
        match self {
            ArchivoError::Dns(_) => 502,
            ArchivoError::Transport(_) => 502,
            ArchivoError::Tls(_) => 502,
            ArchivoError::Timeout => 504,
            ArchivoError::TooManyRedirects(_) => 502,
            ArchivoError::NetworkOther(_) => 502,
            ArchivoError::Restricted => 403,
            ArchivoError::NotFoundInArchive => 404,
            ArchivoError::Internal(_) => 500,
        }
    }

    /// Whether this error kind is a fetch-layer failure (eligible for failover in
    /// `originalFailoverLiveLatest` mode), as opposed to a policy/config decision.
    pub fn is_fetch_failure(&self) -> bool {
        matches!(
            self,
            ArchivoError::Dns(_)
                | ArchivoError::Transport(_)
                | ArchivoError::Tls(_)
                | ArchivoError::Timeout
                | ArchivoError::TooManyRedirects(_)
                | ArchivoError::NetworkOther(_)
        )
    }

    /// Minimal HTML body: a single `<h1>` summary at the mapped status, per the
    /// user-visible failure contract. Mirrors the literal bodies synthesized by the
    /// original mock responses rather than a JSON error envelope.
    pub fn html_body(&self) -> Vec<u8> {
        let status = self.status_code();
        let summary = status_summary(status);
        format!("<html><body><h1>{status} {summary}</h1></body></html>").into_bytes()
    }
}

fn status_summary(status: u16) -> &'static str {
    match status {
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        504 => "Gateway Timeout",
        _ => "Error",
    }
}
