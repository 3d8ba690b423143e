//! Content negotiation: rewriting the outbound Accept header per format policy, and
//! picking an archive-compatible format token out of an inbound Accept header.

use archivo_core::config::{Config, OntoPrecedence, OntoVersion};
use archivo_core::request::RequestView;

/// One of the three archive-compatible format tokens understood by the archive API's
/// `f=` query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Owl,
    Ttl,
    Nt,
}

impl ArchiveFormat {
    pub fn token(&self) -> &'static str {
        match self {
            ArchiveFormat::Owl => "owl",
            ArchiveFormat::Ttl => "ttl",
            ArchiveFormat::Nt => "nt",
        }
    }

    fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            "application/rdf+xml" => Some(ArchiveFormat::Owl),
            "application/owl+xml" => Some(ArchiveFormat::Owl),
            "text/turtle" => Some(ArchiveFormat::Ttl),
            "application/n-triples" => Some(ArchiveFormat::Nt),
            _ => None,
        }
    }
}

/// A single parsed entry of an Accept header: `(mime, q)`, q defaulting to 1.0.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptEntry {
    pub mime: String,
    pub q: f32,
}

/// Deterministically parse an Accept header into `(mime, q)` pairs in input order. Ties
/// in `q` are broken by input order, never by an incidental sort — see SPEC_FULL.md §9.
pub fn parse_accept(header: &str) -> Vec<AcceptEntry> {
    header
        .split(',')
        .filter_map(|part| {
            let part = part.trim();
            if part.is_empty() {
                return None;
            }
            let mut pieces = part.split(';');
            let mime = pieces.next()?.trim().to_string();
            if mime.is_empty() {
                return None;
            }
            let mut q = 1.0f32;
            for param in pieces {
                let param = param.trim();
                if let Some(v) = param.strip_prefix("q=") {
                    q = v.trim().parse().unwrap_or(1.0);
                }
            }
            Some(AcceptEntry { mime, q })
        })
        .collect()
}

/// Select an archive-compatible format token from an inbound Accept header: take the
/// highest-q entries, then the first (in input order) whose MIME is archive-compatible.
/// Returns `None` if no archive-compatible MIME is present at all.
pub fn archive_format(accept_header: Option<&str>) -> Option<ArchiveFormat> {
    let header = accept_header?;
    let entries = parse_accept(header);
    let entries: Vec<&AcceptEntry> = entries.iter().filter(|e| e.q > 0.0).collect();
    if entries.is_empty() {
        return None;
    }
    let max_q = entries
        .iter()
        .map(|e| e.q)
        .fold(f32::MIN, |a, b| a.max(b));

    entries
        .iter()
        .filter(|e| (e.q - max_q).abs() < f32::EPSILON)
        .find_map(|e| ArchiveFormat::from_mime(&e.mime))
}

/// Whether `content_type` (already stripped of parameters) appears among the client's
/// accepted MIMEs at any non-zero q, used by the failover Content-Type check.
pub fn content_type_accepted(content_type: &str, accept_header: Option<&str>) -> bool {
    match accept_header {
        None => false,
        Some(header) => parse_accept(header)
            .iter()
            .any(|e| e.q > 0.0 && e.mime == content_type),
    }
}

/// Rewrite `req`'s Accept header in place per the format policy. Idempotent: calling
/// this twice in a row with the same `cfg` yields the same header both times (Testable
/// Property 1) because the decision depends only on the *current* header value, and once
/// rewritten to `M` the "inbound is absent/`*/*`/ambiguous" triggers no longer hold while
/// the unconditional `always` case rewrites to the same value again.
pub fn apply_accept<R: RequestView>(req: &mut R, cfg: &Config) {
    if cfg.onto_version == OntoVersion::Original && !cfg.onto_format.patch_accept_upstream {
        return;
    }

    let mime = cfg.onto_format.format.mime();
    let inbound = req.header_get("accept").map(str::to_string);

    let should_rewrite = match inbound.as_deref() {
        None => matches!(
            cfg.onto_format.precedence,
            OntoPrecedence::Default | OntoPrecedence::EnforcedPriority
        ),
        Some("*/*") => matches!(
            cfg.onto_format.precedence,
            OntoPrecedence::Default | OntoPrecedence::EnforcedPriority
        ),
        Some(h) => {
            let entries = parse_accept(h);
            let lists_multiple = entries.len() > 1;
            // A literal "*/*" entry accepts every MIME, M included, so it counts as M
            // being present even though it isn't a literal string match.
            let mime_present = entries.iter().any(|e| e.mime == mime || e.mime == "*/*");
            cfg.onto_format.precedence == OntoPrecedence::Always
                || (lists_multiple
                    && mime_present
                    && cfg.onto_format.precedence == OntoPrecedence::EnforcedPriority)
        }
    };

    if should_rewrite {
        req.header_set("accept", mime.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archivo_core::config::{OntoFormat, OntoFormatConfig};
    use archivo_core::request::{Method, OwnedRequest};

    fn cfg_with(format: OntoFormat, precedence: OntoPrecedence, patch_upstream: bool) -> Config {
        let mut cfg = Config::default();
        cfg.onto_format = OntoFormatConfig {
            format,
            precedence,
            patch_accept_upstream: patch_upstream,
        };
        cfg
    }

    #[test]
    fn test_parse_accept_defaults_q_to_one() {
        let entries = parse_accept("text/turtle, */*");
        assert_eq!(entries[0], AcceptEntry { mime: "text/turtle".into(), q: 1.0 });
        assert_eq!(entries[1], AcceptEntry { mime: "*/*".into(), q: 1.0 });
    }

    #[test]
    fn test_parse_accept_explicit_q() {
        let entries = parse_accept("text/turtle;q=1.0, */*;q=0.1");
        assert_eq!(entries[0].q, 1.0);
        assert_eq!(entries[1].q, 0.1);
    }

    #[test]
    fn test_archive_format_picks_highest_q_archive_compatible() {
        let fmt = archive_format(Some("text/html, text/turtle;q=0.9, */*;q=0.1"));
        assert_eq!(fmt, Some(ArchiveFormat::Ttl));
    }

    #[test]
    fn test_archive_format_none_when_no_archive_mime_present() {
        assert_eq!(archive_format(Some("text/html, application/json")), None);
    }

    #[test]
    fn test_archive_format_none_when_header_absent() {
        assert_eq!(archive_format(None), None);
    }

    #[test]
    fn test_archive_format_ignores_zero_q_entries() {
        // Boundary case: Accept with q=0 entries must not be selected.
        let fmt = archive_format(Some("text/turtle;q=0, application/n-triples;q=0.5"));
        assert_eq!(fmt, Some(ArchiveFormat::Nt));
    }

    #[test]
    fn test_rewrite_when_absent_and_enforced_priority() {
        let cfg = cfg_with(OntoFormat::Turtle, OntoPrecedence::EnforcedPriority, false);
        let mut req = OwnedRequest::new(Method::Get, "http", "h", "/p");
        apply_accept(&mut req, &cfg);
        assert_eq!(req.header_get("accept"), Some("text/turtle"));
    }

    #[test]
    fn test_rewrite_when_star_star_and_default() {
        let cfg = cfg_with(OntoFormat::Rdfxml, OntoPrecedence::Default, false);
        let mut req = OwnedRequest::new(Method::Get, "http", "h", "/p").with_header("accept", "*/*");
        apply_accept(&mut req, &cfg);
        assert_eq!(req.header_get("accept"), Some("application/rdf+xml"));
    }

    #[test]
    fn test_always_rewrites_unconditionally() {
        let cfg = cfg_with(OntoFormat::Ntriples, OntoPrecedence::Always, false);
        let mut req =
            OwnedRequest::new(Method::Get, "http", "h", "/p").with_header("accept", "text/html");
        apply_accept(&mut req, &cfg);
        assert_eq!(req.header_get("accept"), Some("application/n-triples"));
    }

    #[test]
    fn test_enforced_priority_does_not_rewrite_single_unrelated_type() {
        let cfg = cfg_with(OntoFormat::Turtle, OntoPrecedence::EnforcedPriority, false);
        let mut req =
            OwnedRequest::new(Method::Get, "http", "h", "/p").with_header("accept", "text/html");
        apply_accept(&mut req, &cfg);
        assert_eq!(req.header_get("accept"), Some("text/html"));
    }

    #[test]
    fn test_original_mode_suppresses_rewrite_without_patch_upstream() {
        let mut cfg = cfg_with(OntoFormat::Turtle, OntoPrecedence::Always, false);
        cfg.onto_version = OntoVersion::Original;
        let mut req =
            OwnedRequest::new(Method::Get, "http", "h", "/p").with_header("accept", "text/html");
        apply_accept(&mut req, &cfg);
        assert_eq!(req.header_get("accept"), Some("text/html"));
    }

    #[test]
    fn test_original_mode_with_patch_upstream_still_rewrites() {
        let mut cfg = cfg_with(OntoFormat::Turtle, OntoPrecedence::Always, true);
        cfg.onto_version = OntoVersion::Original;
        let mut req =
            OwnedRequest::new(Method::Get, "http", "h", "/p").with_header("accept", "text/html");
        apply_accept(&mut req, &cfg);
        assert_eq!(req.header_get("accept"), Some("text/turtle"));
    }

    #[test]
    fn test_idempotence_of_accept_rewrite() {
        let cfg = cfg_with(OntoFormat::Turtle, OntoPrecedence::EnforcedPriority, false);
        let mut req =
            OwnedRequest::new(Method::Get, "http", "h", "/p").with_header("accept", "text/html");
        apply_accept(&mut req, &cfg);
        let once = req.header_get("accept").map(str::to_string);
        apply_accept(&mut req, &cfg);
        let twice = req.header_get("accept").map(str::to_string);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_content_type_accepted() {
        assert!(content_type_accepted(
            "text/turtle",
            Some("text/turtle;q=1.0, */*;q=0.1")
        ));
        assert!(!content_type_accepted("text/html", Some("text/turtle")));
        assert!(!content_type_accepted("text/html", None));
    }
}
