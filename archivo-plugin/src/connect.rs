//! CONNECT gating and the `archivo` interception mode's deferred membership check
//! (SPEC_FULL.md §4.6, §9 Open Question resolution).

use archivo_core::archive_index::ArchiveIndexHandle;
use archivo_core::config::{Config, HttpsInterception};
use archivo_core::request::RequestView;

/// What the host runtime should do with a CONNECT tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectDecision {
    /// Forward the tunnel's bytes without TLS interception.
    Tunnel,
    /// Terminate TLS at the proxy with a CA-signed leaf certificate.
    Mitm,
    /// Refuse the CONNECT outright.
    Reject,
}

/// The on-connect hook: decide what to do with a CONNECT request before any bytes of
/// the tunneled traffic are visible.
///
/// Under `httpsInterception = archivo`, SNI alone cannot tell us the path the archive
/// index keys on, so this always requests MITM; `interception_decision` — invoked once
/// the first request line inside the tunnel is parsed — performs the real membership
/// check and may downgrade the connection to a blind tunnel for its remainder. This is
/// the resolved Open Question from SPEC_FULL.md §9: defer, not SNI-only.
pub fn on_connect(cfg: &Config) -> ConnectDecision {
    match cfg.https_interception {
        HttpsInterception::Block => ConnectDecision::Reject,
        HttpsInterception::None => ConnectDecision::Tunnel,
        HttpsInterception::All => ConnectDecision::Mitm,
        HttpsInterception::Archivo => ConnectDecision::Mitm,
    }
}

/// The interception-decision hook: once the first HTTP request line inside a
/// MITM-terminated tunnel is visible, decide whether to keep intercepting for the rest
/// of the connection. Only `archivo` mode narrows here; every other mode's decision was
/// already final at `on_connect`.
pub fn interception_decision<R: RequestView>(
    cfg: &Config,
    req: &R,
    archive_index: &ArchiveIndexHandle,
) -> ConnectDecision {
    match cfg.https_interception {
        HttpsInterception::Archivo => {
            if archive_index.contains(req.host(), req.path()).is_some() {
                ConnectDecision::Mitm
            } else {
                ConnectDecision::Tunnel
            }
        }
        HttpsInterception::Block => ConnectDecision::Reject,
        HttpsInterception::None => ConnectDecision::Tunnel,
        HttpsInterception::All => ConnectDecision::Mitm,
    }
}
