//! The Config Resolver: produces the effective per-request `Config` by merging the
//! startup config with an optional per-connection override decoded from
//! proxy-authorization (SPEC_FULL.md §4.2).

use archivo_core::config::{parse_argument_overrides, ClientConfigViaProxyAuth, Config};
use archivo_core::error::ArchivoError;
use archivo_core::request::RequestView;
use std::sync::Mutex;

/// Owned by a single client connection. Resolves and caches the effective `Config` the
/// first time it's asked, so every later request on the same connection reuses it
/// without re-parsing proxy-authorization.
pub struct ConnectionConfig {
    startup: Config,
    resolved: Mutex<Option<Config>>,
}

impl ConnectionConfig {
    pub fn new(startup: Config) -> Self {
        Self {
            startup,
            resolved: Mutex::new(None),
        }
    }

    /// Resolve the effective `Config` for `req`. On the first call that isn't
    /// `ignore`, this parses proxy-authorization and caches the result (success or
    /// fallback) for the remainder of the connection's lifetime.
    pub fn resolve<R: RequestView>(&self, req: &R) -> Result<Config, ArchivoError> {
        if self.startup.client_config_via_proxy_auth == ClientConfigViaProxyAuth::Ignore {
            return Ok(self.startup.clone());
        }

        let mut guard = self.resolved.lock().expect("connection config mutex poisoned");
        if let Some(cfg) = guard.as_ref() {
            return Ok(cfg.clone());
        }

        let effective = self.resolve_uncached(req)?;
        *guard = Some(effective.clone());
        Ok(effective)
    }

    fn resolve_uncached<R: RequestView>(&self, req: &R) -> Result<Config, ArchivoError> {
        match decode_proxy_auth_username(req) {
            Some(username) => match parse_argument_overrides(&username, self.startup.clone()) {
                Ok(cfg) => Ok(cfg),
                Err(e) => match self.startup.client_config_via_proxy_auth {
                    ClientConfigViaProxyAuth::Required => Err(e),
                    _ => Ok(self.startup.clone()),
                },
            },
            None => match self.startup.client_config_via_proxy_auth {
                ClientConfigViaProxyAuth::Required => Err(ArchivoError::Internal(
                    "proxy-authorization required but absent or malformed".to_string(),
                )),
                _ => Ok(self.startup.clone()),
            },
        }
    }
}

/// Decode the `Basic` proxy-authorization username: the password is ignored, per
/// SPEC_FULL.md §6.
fn decode_proxy_auth_username<R: RequestView>(req: &R) -> Option<String> {
    let header = req.header_get("proxy-authorization")?;
    let encoded = header
        .strip_prefix("Basic ")
        .or_else(|| header.strip_prefix("basic "))?
        .trim();
    use base64::Engine;
    let decoded = base64::engine::general_purpose::STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    Some(decoded.split(':').next().unwrap_or("").to_string())
}
