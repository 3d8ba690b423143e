use arc_swap::ArcSwap;
use std::collections::HashSet;
use std::sync::Arc;

/// Immutable set of `(host, path)` pairs known to the archive, with the longest-prefix /
/// ancestor matching described in SPEC_FULL.md §4.1.
///
/// `ArchiveIndex` itself is just the snapshot; `ArchiveIndexHandle` is the
/// atomically-published pointer the Archive Refresher swaps and request paths read, so a
/// globally-visible membership set never needs a lock on the read path.
#[derive(Debug, Default)]
pub struct ArchiveIndex {
    entries: HashSet<(String, String)>,
}

impl ArchiveIndex {
    pub fn new(entries: HashSet<(String, String)>) -> Self {
        Self { entries }
    }

    /// Parse a newline-delimited list of absolute ontology IRIs into an index.
    pub fn from_iri_list(text: &str) -> Self {
        let mut entries = HashSet::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Ok(url) = url::Url::parse(line) {
                let host = url.host_str().unwrap_or("").to_string();
                entries.insert((host, url.path().to_string()));
            }
        }
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the matched path variant on the first hit, trying in order: the path as
    /// given, the path with a trailing `/` stripped, the parent path (with and without a
    /// trailing `/`), then the grandparent path (with and without a trailing `/`).
    pub fn contains(&self, host: &str, path: &str) -> Option<String> {
        if self.entries.contains(&(host.to_string(), path.to_string())) {
            return Some(path.to_string());
        }

        let rstripped = path.trim_end_matches('/');
        if rstripped != path && self.entries.contains(&(host.to_string(), rstripped.to_string())) {
            return Some(rstripped.to_string());
        }

        for ancestor_depth in 1..=2 {
            if let Some(parent) = ancestor(rstripped, ancestor_depth) {
                if self.entries.contains(&(host.to_string(), parent.clone())) {
                    return Some(parent);
                }
                let with_slash = format!("{parent}/");
                if self.entries.contains(&(host.to_string(), with_slash.clone())) {
                    return Some(with_slash);
                }
            }
        }

        None
    }
}

/// Strip the last `depth` `/`-separated segments from `path`. Returns `None` once there
/// are no more segments to strip (i.e. `path` is already `""` or `"/"`).
fn ancestor(path: &str, depth: usize) -> Option<String> {
    let mut segments: Vec<&str> = path.split('/').collect();
    // A path like "/a/b/c" splits into ["", "a", "b", "c"]; stripping `depth` trailing
    // segments requires at least `depth` real (non-leading-empty) segments to remove.
    let removable = segments.len().saturating_sub(1);
    if removable < depth {
        return None;
    }
    for _ in 0..depth {
        segments.pop();
    }
    Some(segments.join("/"))
}

/// Atomically-published handle over the current `ArchiveIndex`. Readers snapshot the
/// pointer once per lookup; the Archive Refresher publishes a new snapshot by
/// replacement, never by mutation — this is what makes index rebuilds atomic (Invariant
/// in SPEC_FULL.md §3, Testable Property 6).
#[derive(Clone)]
pub struct ArchiveIndexHandle {
    inner: Arc<ArcSwap<ArchiveIndex>>,
}

impl ArchiveIndexHandle {
    pub fn new(initial: ArchiveIndex) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(initial)),
        }
    }

    pub fn contains(&self, host: &str, path: &str) -> Option<String> {
        self.inner.load().contains(host, path)
    }

    pub fn publish(&self, new_index: ArchiveIndex) {
        self.inner.store(Arc::new(new_index));
    }

    pub fn len(&self) -> usize {
        self.inner.load().len()
    }
}

impl Default for ArchiveIndexHandle {
    fn default() -> Self {
        Self::new(ArchiveIndex::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_of(pairs: &[(&str, &str)]) -> ArchiveIndex {
        ArchiveIndex::new(
            pairs
                .iter()
                .map(|(h, p)| (h.to_string(), p.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_exact_match() {
        let idx = index_of(&[("example.org", "/onto")]);
        assert_eq!(idx.contains("example.org", "/onto"), Some("/onto".into()));
    }

    #[test]
    fn test_trailing_slash_stripped() {
        let idx = index_of(&[("example.org", "/onto")]);
        assert_eq!(
            idx.contains("example.org", "/onto/"),
            Some("/onto".into())
        );
    }

    #[test]
    fn test_parent_match_without_slash() {
        let idx = index_of(&[("example.org", "/onto")]);
        assert_eq!(
            idx.contains("example.org", "/onto/Class1"),
            Some("/onto".into())
        );
    }

    #[test]
    fn test_parent_match_with_slash() {
        let idx = index_of(&[("example.org", "/onto/")]);
        assert_eq!(
            idx.contains("example.org", "/onto/Class1"),
            Some("/onto/".into())
        );
    }

    #[test]
    fn test_grandparent_match() {
        let idx = index_of(&[("example.org", "/ns/onto")]);
        assert_eq!(
            idx.contains("example.org", "/ns/onto/sub/Class1"),
            Some("/ns/onto".into())
        );
    }

    #[test]
    fn test_grandparent_match_with_slash() {
        let idx = index_of(&[("example.org", "/ns/onto/")]);
        assert_eq!(
            idx.contains("example.org", "/ns/onto/sub/Class1"),
            Some("/ns/onto/".into())
        );
    }

    #[test]
    fn test_no_match() {
        let idx = index_of(&[("example.org", "/onto")]);
        assert_eq!(idx.contains("example.org", "/unrelated"), None);
    }

    #[test]
    fn test_case_sensitive_host_and_path() {
        let idx = index_of(&[("example.org", "/Onto")]);
        assert_eq!(idx.contains("Example.org", "/Onto"), None);
        assert_eq!(idx.contains("example.org", "/onto"), None);
    }

    #[test]
    fn test_root_path_does_not_panic_and_does_not_match_beyond_bound() {
        let idx = index_of(&[("example.org", "/")]);
        assert_eq!(idx.contains("example.org", "/"), Some("/".into()));
        assert_eq!(idx.contains("example.org", "/x/y"), None);
    }

    #[test]
    fn test_two_segment_path_parent_is_root() {
        let idx = index_of(&[("example.org", "")]);
        // "/a" has one removable segment; ancestor(1) yields "".
        assert_eq!(idx.contains("example.org", "/a"), Some("".into()));
    }

    #[test]
    fn test_from_iri_list_parses_host_and_path() {
        let idx = ArchiveIndex::from_iri_list(
            "https://example.org/onto\nhttp://other.org/ns/thing\n\n",
        );
        assert_eq!(idx.len(), 2);
        assert!(idx.contains("example.org", "/onto").is_some());
        assert!(idx.contains("other.org", "/ns/thing").is_some());
    }

    #[test]
    fn test_handle_atomic_publish_visible_to_new_lookups() {
        let handle = ArchiveIndexHandle::new(index_of(&[("a.org", "/one")]));
        assert!(handle.contains("a.org", "/one").is_some());
        assert!(handle.contains("a.org", "/two").is_none());

        handle.publish(index_of(&[("a.org", "/two")]));
        assert!(handle.contains("a.org", "/two").is_some());
        assert!(handle.contains("a.org", "/one").is_none());
    }
}
