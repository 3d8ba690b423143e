use std::collections::HashMap;

/// HTTP methods the core cares about. Anything else is treated as `Other` and proxied
/// without the ontology-repair pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Connect,
    Other,
}

impl Method {
    pub fn from_str(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Method::Get,
            "HEAD" => Method::Head,
            "CONNECT" => Method::Connect,
            _ => Method::Other,
        }
    }
}

/// A thin capability set decoupling the core from the host runtime's concrete request
/// type. The host runtime (`archivo-server`) implements this trait over its own parsed
/// request; every core component only ever talks to a `RequestView`.
pub trait RequestView {
    fn method(&self) -> Method;
    fn host(&self) -> &str;
    /// Path with any fragment already stripped (fragments are never sent on the wire and
    /// must not participate in archive-membership lookups or upstream dispatch).
    fn path(&self) -> &str;
    fn header_get(&self, name: &str) -> Option<&str>;
    fn header_set(&mut self, name: &str, value: String);
    /// Absolute URL this request resolves to (scheme + host + path + query).
    fn url(&self) -> String;
}

/// Concrete, owned request used by the core's unit tests and by `archivo-plugin` when
/// constructing a view over a parsed `hyper` request.
#[derive(Debug, Clone)]
pub struct OwnedRequest {
    pub method: Method,
    pub host: String,
    pub path: String,
    pub scheme: String,
    pub headers: HashMap<String, String>,
}

impl OwnedRequest {
    pub fn new(method: Method, scheme: &str, host: &str, path: &str) -> Self {
        // Strip a fragment if present, per the RequestView contract.
        let path = path.split('#').next().unwrap_or("").to_string();
        Self {
            method,
            host: host.to_string(),
            path,
            scheme: scheme.to_string(),
            headers: HashMap::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }
}

impl RequestView for OwnedRequest {
    fn method(&self) -> Method {
        self.method
    }

    fn host(&self) -> &str {
        &self.host
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn header_get(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    fn header_set(&mut self, name: &str, value: String) {
        self.headers.insert(name.to_ascii_lowercase(), value);
    }

    fn url(&self) -> String {
        format!("{}://{}{}", self.scheme, self.host, self.path)
    }
}

/// Normalized response produced by the Upstream Fetcher and consumed by the Version
/// Engine / Proxy Plugin. Lives for a single request.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl UpstreamResponse {
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get("content-type")
            .map(|v| v.split(';').next().unwrap_or(v).trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_from_str_is_case_insensitive() {
        assert_eq!(Method::from_str("get"), Method::Get);
        assert_eq!(Method::from_str("CONNECT"), Method::Connect);
        assert_eq!(Method::from_str("PUT"), Method::Other);
    }

    #[test]
    fn test_fragment_is_stripped_on_construction() {
        let req = OwnedRequest::new(Method::Get, "http", "example.org", "/onto#Class1");
        assert_eq!(req.path(), "/onto");
    }

    #[test]
    fn test_header_get_set_is_case_insensitive() {
        let mut req = OwnedRequest::new(Method::Get, "http", "example.org", "/onto");
        req.header_set("Accept", "text/turtle".to_string());
        assert_eq!(req.header_get("accept"), Some("text/turtle"));
    }

    #[test]
    fn test_url_reconstruction() {
        let req = OwnedRequest::new(Method::Get, "https", "example.org", "/onto");
        assert_eq!(req.url(), "https://example.org/onto");
    }

    #[test]
    fn test_content_type_strips_parameters() {
        let resp = UpstreamResponse {
            status: 200,
            headers: HashMap::from([(
                "content-type".to_string(),
                "text/turtle; charset=utf-8".to_string(),
            )]),
            body: vec![],
        };
        assert_eq!(resp.content_type(), Some("text/turtle"));
    }
}
