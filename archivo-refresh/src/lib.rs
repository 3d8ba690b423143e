//! Background task that periodically downloads the archive index source (a CSV whose
//! first column is an ontology IRI), hashes it, and atomically swaps the in-memory
//! `ArchiveIndex` published through an `ArchiveIndexHandle`.
//!
//! Follows a rebuild-then-swap pattern (never mutate in place), specialized to
//! SPEC_FULL.md §4.7's download/hash/publish cycle.

use archivo_core::archive_index::{ArchiveIndex, ArchiveIndexHandle};
use archivo_core::config::Config;
use archivo_core::error::ArchivoError;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Default time between scheduled refreshes when nothing triggers one sooner.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Outcome of a single refresh attempt, used by callers/tests that care whether the
/// index was actually replaced.
#[derive(Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The downloaded CSV hashed the same as last time; nothing was published.
    Unchanged,
    /// The hash changed; a new index was parsed and published.
    Updated { entry_count: usize },
}

/// Owns the download/hash/publish cycle and the atomically-published `ArchiveIndexHandle`
/// request paths read from.
pub struct Refresher {
    client: reqwest::Client,
    index_url: String,
    list_path: PathBuf,
    hash_path: PathBuf,
    refresh_interval: Duration,
    handle: ArchiveIndexHandle,
    /// Single-flight guard: at most one refresh network operation runs at a time;
    /// concurrent triggers coalesce on this lock (SPEC_FULL.md §5).
    inflight: Mutex<()>,
    /// Unix-epoch seconds of the last successful refresh attempt (success or no-op),
    /// used by `trigger_if_stale`. 0 means "never".
    last_refreshed_at: AtomicU64,
}

impl Refresher {
    pub fn new(cfg: &Config, handle: ArchiveIndexHandle) -> Self {
        Self {
            client: reqwest::Client::new(),
            index_url: cfg.archive_index_url.clone(),
            list_path: PathBuf::from(&cfg.archive_list_path),
            hash_path: PathBuf::from(&cfg.archive_hash_path),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            handle,
            inflight: Mutex::new(()),
            last_refreshed_at: AtomicU64::new(0),
        }
    }

    pub fn handle(&self) -> ArchiveIndexHandle {
        self.handle.clone()
    }

    /// Populate the index at first use: load the local IRI list if present, otherwise
    /// perform an initial refresh before returning.
    pub async fn ensure_loaded(&self) -> Result<(), ArchivoError> {
        if self.list_path.exists() {
            let text = tokio::fs::read_to_string(&self.list_path)
                .await
                .map_err(|e| ArchivoError::Internal(format!("reading archive list: {e}")))?;
            self.handle.publish(ArchiveIndex::from_iri_list(&text));
            self.mark_refreshed();
            debug!(entries = self.handle.len(), "loaded archive index from disk");
            return Ok(());
        }

        info!("no local archive list found, performing initial refresh");
        self.refresh_now().await.map(|_| ())
    }

    /// Run one refresh cycle: download, hash, compare, and on mismatch parse + publish.
    /// Concurrent callers serialize on `inflight` rather than racing downloads.
    pub async fn refresh_now(&self) -> Result<RefreshOutcome, ArchivoError> {
        let _guard = self.inflight.lock().await;
        let outcome = self.refresh_locked().await;
        self.mark_refreshed();
        outcome
    }

    /// Trigger a refresh in the background iff the last refresh (or load) is older than
    /// `self.refresh_interval`. Non-blocking: spawns the refresh and returns immediately,
    /// since a stale index is still safe to answer membership queries from while a fresh
    /// one downloads (SPEC_FULL.md §4.7, "additionally on demand").
    pub fn trigger_if_stale(self: &Arc<Self>) {
        if self.age_since_refresh() < self.refresh_interval {
            return;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.refresh_now().await {
                warn!(error = %e, "on-demand archive refresh failed");
            }
        });
    }

    fn age_since_refresh(&self) -> Duration {
        let last = self.last_refreshed_at.load(Ordering::Relaxed);
        if last == 0 {
            return Duration::MAX;
        }
        let now = now_unix();
        Duration::from_secs(now.saturating_sub(last))
    }

    fn mark_refreshed(&self) {
        self.last_refreshed_at.store(now_unix(), Ordering::Relaxed);
    }

    async fn refresh_locked(&self) -> Result<RefreshOutcome, ArchivoError> {
        let csv_bytes = download(&self.client, &self.index_url).await?;
        let new_hash = hex_sha256(&csv_bytes);

        let previous_hash = tokio::fs::read_to_string(&self.hash_path).await.ok();
        if previous_hash.as_deref().map(str::trim) == Some(new_hash.as_str()) {
            debug!("archive index unchanged, discarding download");
            return Ok(RefreshOutcome::Unchanged);
        }

        let iri_list = extract_first_column(&csv_bytes)?;
        write_atomically(&self.list_path, iri_list.join("\n").as_bytes()).await?;
        write_atomically(&self.hash_path, new_hash.as_bytes()).await?;

        let index = ArchiveIndex::from_iri_list(&iri_list.join("\n"));
        let entry_count = index.len();
        self.handle.publish(index);
        info!(entries = entry_count, "published refreshed archive index");
        Ok(RefreshOutcome::Updated { entry_count })
    }
}

/// Spawn the daily-schedule background task. Sleeps until the next occurrence of
/// `hour:minute` local time, refreshes, repeats forever. Errors are logged; the
/// previous index remains in service (SPEC_FULL.md §4.7).
pub fn spawn_daily_schedule(refresher: Arc<Refresher>, hour: u32, minute: u32) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let sleep_for = duration_until_next(hour, minute);
            tokio::time::sleep(sleep_for).await;
            match refresher.refresh_now().await {
                Ok(RefreshOutcome::Updated { entry_count }) => {
                    info!(entries = entry_count, "scheduled archive refresh published a new index");
                }
                Ok(RefreshOutcome::Unchanged) => {
                    debug!("scheduled archive refresh found no change");
                }
                Err(e) => {
                    error!(error = %e, "scheduled archive refresh failed, keeping previous index");
                }
            }
        }
    })
}

/// Seconds until the next local wall-clock occurrence of `hour:minute`.
fn duration_until_next(hour: u32, minute: u32) -> Duration {
    let now = chrono::Local::now();
    let mut next = now
        .date_naive()
        .and_hms_opt(hour, minute, 0)
        .expect("valid hour/minute")
        .and_local_timezone(chrono::Local)
        .single()
        .unwrap_or_else(|| now);
    if next <= now {
        next += chrono::Duration::days(1);
    }
    (next - now).to_std().unwrap_or(Duration::from_secs(60))
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

async fn download(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, ArchivoError> {
    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| ArchivoError::NetworkOther(format!("archive index download failed: {e}")))?;
    if !resp.status().is_success() {
        return Err(ArchivoError::NetworkOther(format!(
            "archive index download returned status {}",
            resp.status()
        )));
    }
    resp.bytes()
        .await
        .map(|b| b.to_vec())
        .map_err(|e| ArchivoError::NetworkOther(format!("archive index download failed: {e}")))
}

fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Parse the CSV and extract the first column of each row as an IRI.
fn extract_first_column(csv_bytes: &[u8]) -> Result<Vec<String>, ArchivoError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(csv_bytes);

    let mut out = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| ArchivoError::Internal(format!("malformed archive index CSV: {e}")))?;
        if let Some(first) = record.get(0) {
            let first = first.trim();
            if !first.is_empty() {
                out.push(first.to_string());
            }
        }
    }
    Ok(out)
}

/// Write `contents` to `path` via a temp-file-then-rename so a reader never observes a
/// partially-written file.
async fn write_atomically(path: &Path, contents: &[u8]) -> Result<(), ArchivoError> {
    let tmp_path = path.with_extension("tmp");
    tokio::fs::write(&tmp_path, contents)
        .await
        .map_err(|e| ArchivoError::Internal(format!("writing {}: {e}", tmp_path.display())))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| ArchivoError::Internal(format!("publishing {}: {e}", path.display())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn temp_paths() -> (tempfile::TempDir, PathBuf, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("ontologies.txt");
        let hash = dir.path().join("ontologies.sha256");
        (dir, list, hash)
    }

    fn refresher_for(server: &MockServer, list: &Path, hash: &Path) -> Refresher {
        let mut cfg = Config::default();
        cfg.archive_index_url = server.uri();
        cfg.archive_list_path = list.to_string_lossy().to_string();
        cfg.archive_hash_path = hash.to_string_lossy().to_string();
        Refresher::new(&cfg, ArchiveIndexHandle::default())
    }

    #[test]
    fn test_extract_first_column() {
        let csv = b"http://example.org/onto,official,2024\nhttp://other.org/ns,official,2024\n";
        let out = extract_first_column(csv).unwrap();
        assert_eq!(out, vec!["http://example.org/onto", "http://other.org/ns"]);
    }

    #[tokio::test]
    async fn test_refresh_publishes_new_index_on_first_download() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("http://example.org/onto,official\n"))
            .mount(&server)
            .await;

        let (_dir, list, hash) = temp_paths();
        let refresher = refresher_for(&server, &list, &hash);

        let outcome = refresher.refresh_now().await.unwrap();
        assert_eq!(outcome, RefreshOutcome::Updated { entry_count: 1 });
        assert!(refresher.handle().contains("example.org", "/onto").is_some());
        assert!(list.exists());
        assert!(hash.exists());
    }

    #[tokio::test]
    async fn test_refresh_no_op_when_hash_matches() {
        let server = MockServer::start().await;
        let body = "http://example.org/onto,official\n";
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let (_dir, list, hash) = temp_paths();
        let refresher = refresher_for(&server, &list, &hash);

        refresher.refresh_now().await.unwrap();
        let second = refresher.refresh_now().await.unwrap();
        assert_eq!(second, RefreshOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_network_failure_leaves_previous_index_in_service() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let (_dir, list, hash) = temp_paths();
        let refresher = refresher_for(&server, &list, &hash);
        refresher
            .handle()
            .publish(ArchiveIndex::new(std::collections::HashSet::from([(
                "example.org".to_string(),
                "/onto".to_string(),
            )])));

        let err = refresher.refresh_now().await;
        assert!(err.is_err());
        assert!(refresher.handle().contains("example.org", "/onto").is_some());
    }

    #[tokio::test]
    async fn test_ensure_loaded_reads_existing_list_file() {
        let server = MockServer::start().await;
        let (_dir, list, hash) = temp_paths();
        tokio::fs::write(&list, "http://example.org/onto\n").await.unwrap();
        let refresher = refresher_for(&server, &list, &hash);

        refresher.ensure_loaded().await.unwrap();
        assert!(refresher.handle().contains("example.org", "/onto").is_some());
    }

    #[test]
    fn test_hex_sha256_is_deterministic() {
        assert_eq!(hex_sha256(b"hello"), hex_sha256(b"hello"));
        assert_ne!(hex_sha256(b"hello"), hex_sha256(b"world"));
    }
}
