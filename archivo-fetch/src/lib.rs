//! Performs GET/HEAD against a target URL with timeouts, redirect policy, and a
//! normalized error taxonomy. Never panics or lets a `reqwest::Error` cross the core
//! boundary — every outcome becomes an `UpstreamResponse` or an `ArchivoError`.

use archivo_core::error::ArchivoError;
use archivo_core::request::{Method, UpstreamResponse};
use std::collections::HashMap;
use std::error::Error as StdError;
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_REDIRECT_DEPTH: usize = 10;

/// Two pre-built clients sharing the same timeout/connection-pool configuration but
/// differing in redirect policy, selected per request by `disable_removing_redirects`.
pub struct UpstreamFetcher {
    following: reqwest::Client,
    verbatim: reqwest::Client,
    redirect_depth: usize,
}

impl UpstreamFetcher {
    pub fn new() -> Self {
        Self::with_timeout_and_depth(DEFAULT_TIMEOUT, DEFAULT_REDIRECT_DEPTH)
    }

    pub fn with_timeout_and_depth(timeout: Duration, redirect_depth: usize) -> Self {
        let following = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(redirect_depth))
            .build()
            .expect("reqwest client construction is infallible for this configuration");
        let verbatim = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("reqwest client construction is infallible for this configuration");
        Self {
            following,
            verbatim,
            redirect_depth,
        }
    }

    /// Fetch `url`, issuing HEAD when `method == Method::Head`, GET otherwise. Redirects
    /// are followed transparently up to the configured depth unless
    /// `disable_removing_redirects` is set, in which case the first redirect response is
    /// returned to the caller unchanged.
    pub async fn fetch(
        &self,
        method: Method,
        url: &str,
        headers: &HashMap<String, String>,
        disable_removing_redirects: bool,
    ) -> Result<UpstreamResponse, ArchivoError> {
        let client = if disable_removing_redirects {
            &self.verbatim
        } else {
            &self.following
        };

        let mut builder = match method {
            Method::Head => client.head(url),
            _ => client.get(url),
        };

        for (name, value) in headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|e| classify_error(&e, self.redirect_depth))?;

        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_ascii_lowercase(), v.to_string())))
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| classify_error(&e, self.redirect_depth))?
            .to_vec();

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}

impl Default for UpstreamFetcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Map a `reqwest::Error` into the normalized error taxonomy. Classification walks the
/// same signal reqwest itself exposes (`is_timeout`, `is_redirect`, `is_connect`) before
/// falling back to inspecting the error's source chain for a DNS-resolution failure.
fn classify_error(err: &reqwest::Error, redirect_depth: usize) -> ArchivoError {
    if err.is_timeout() {
        return ArchivoError::Timeout;
    }
    if err.is_redirect() {
        return ArchivoError::TooManyRedirects(redirect_depth as u8);
    }
    if is_dns_error(err) {
        return ArchivoError::Dns(err.to_string());
    }
    if err.is_connect() {
        return ArchivoError::Transport(err.to_string());
    }
    if is_tls_error(err) {
        return ArchivoError::Tls(err.to_string());
    }
    ArchivoError::NetworkOther(err.to_string())
}

fn is_dns_error(err: &reqwest::Error) -> bool {
    let mut source: Option<&(dyn StdError + 'static)> = StdError::source(err);
    while let Some(s) = source {
        if s.to_string().to_ascii_lowercase().contains("dns") {
            return true;
        }
        source = s.source();
    }
    false
}

fn is_tls_error(err: &reqwest::Error) -> bool {
    err.to_string().to_ascii_lowercase().contains("tls")
        || err.to_string().to_ascii_lowercase().contains("certificate")
}
