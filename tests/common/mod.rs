//! Shared fakes for pipeline and workflow tests.
#![allow(dead_code)]

pub mod contract;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use regex::Regex;
use stageq::error::{Error, Result};
use stageq::pipeline::Processor;
use stageq::storage::MemoryStore;
use stageq::transform::{Artifact, Scratch, TransformConfig};
use stageq::transport::locator::ImapLocator;
use stageq::transport::{LocalObjectStore, Sink, Source, basename};
use stageq::workflow::WorkflowConfig;

/// In-memory source. The listing is returned as given (duplicates
/// included) after pattern filtering.
#[derive(Default)]
pub struct FakeSource {
    listing: Mutex<Vec<String>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    corrupt: Mutex<HashSet<String>>,
    list_failures: AtomicUsize,
    remove_failures: AtomicUsize,
    pub fetches: AtomicUsize,
    pub removed: Mutex<Vec<String>>,
    pub archived: Mutex<Vec<(String, String)>>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, id: &str, contents: &[u8]) -> Self {
        self.listing.lock().unwrap().push(id.to_string());
        self.files
            .lock()
            .unwrap()
            .insert(id.to_string(), contents.to_vec());
        self
    }

    /// Add a name to the listing without contents.
    pub fn with_listed(self, id: &str) -> Self {
        self.listing.lock().unwrap().push(id.to_string());
        self
    }

    /// Fetching `id` reports a malformed stored identifier.
    pub fn with_corrupt(self, id: &str) -> Self {
        self.listing.lock().unwrap().push(id.to_string());
        self.corrupt.lock().unwrap().insert(id.to_string());
        self
    }

    /// The next `n` listings fail.
    pub fn fail_next_lists(&self, n: usize) {
        self.list_failures.store(n, Ordering::SeqCst);
    }

    /// The next `n` removals fail.
    pub fn fail_next_removes(&self, n: usize) {
        self.remove_failures.store(n, Ordering::SeqCst);
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Source for FakeSource {
    fn kind(&self) -> &'static str {
        "fake"
    }

    async fn list(&self, _location: &str, pattern: &Regex) -> Result<Vec<String>> {
        let remaining = self.list_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.list_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::transport("fake", "listing refused"));
        }
        Ok(self
            .listing
            .lock()
            .unwrap()
            .iter()
            .filter(|id| pattern.is_match(id))
            .cloned()
            .collect())
    }

    async fn fetch(&self, id: &str, _pattern: &Regex, scratch: &Scratch) -> Result<Vec<Artifact>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.corrupt.lock().unwrap().contains(id) {
            id.parse::<ImapLocator>()?;
        }
        let contents = self
            .files
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::transport("fake", format!("{id} does not exist")))?;
        Ok(vec![Artifact::from_bytes(scratch, basename(id), &contents)?])
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let remaining = self.remove_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.remove_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::transport("fake", "permission denied"));
        }
        self.removed.lock().unwrap().push(id.to_string());
        Ok(())
    }

    async fn archive(&self, id: &str, destination: &str) -> Result<()> {
        self.archived
            .lock()
            .unwrap()
            .push((id.to_string(), destination.to_string()));
        Ok(())
    }
}

/// Local object store whose next `n` puts fail.
pub struct FlakySink {
    pub inner: LocalObjectStore,
    put_failures: AtomicUsize,
    pub puts: AtomicUsize,
}

impl FlakySink {
    pub fn new(root: &Path) -> Self {
        Self {
            inner: LocalObjectStore::new(root),
            put_failures: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
        }
    }

    pub fn fail_next_puts(&self, n: usize) {
        self.put_failures.store(n, Ordering::SeqCst);
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sink for FlakySink {
    fn kind(&self) -> &'static str {
        "flaky"
    }

    async fn put(&self, key: &str, artifact: &Artifact) -> Result<()> {
        let remaining = self.put_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.put_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::transport("flaky", "connection reset"));
        }
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(key, artifact).await
    }

    async fn get(&self, key: &str, scratch: &Scratch) -> Result<Artifact> {
        self.inner.get(key, scratch).await
    }
}

/// Records every file it is handed. The next `n` calls fail.
#[derive(Default)]
pub struct RecordingProcessor {
    pub seen: Mutex<Vec<(String, Vec<u8>)>>,
    failures: AtomicUsize,
}

impl RecordingProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn seen(&self) -> Vec<(String, Vec<u8>)> {
        self.seen.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.seen().into_iter().map(|(name, _)| name).collect()
    }
}

#[async_trait]
impl Processor for RecordingProcessor {
    async fn process(&self, path: &Path) -> anyhow::Result<()> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            anyhow::bail!("downstream unavailable");
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let bytes = std::fs::read(path)?;
        self.seen.lock().unwrap().push((name, bytes));
        Ok(())
    }
}

/// Everything a pipeline test needs, rooted in one temp dir.
pub struct Harness {
    pub dir: tempfile::TempDir,
    pub store: Arc<MemoryStore>,
    pub source: Arc<FakeSource>,
    pub sink: Arc<FlakySink>,
    pub processor: Arc<RecordingProcessor>,
}

impl Harness {
    pub fn new(source: FakeSource) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(FlakySink::new(&dir.path().join("objects")));
        Self {
            store: Arc::new(MemoryStore::new()),
            source: Arc::new(source),
            sink,
            processor: Arc::new(RecordingProcessor::new()),
            dir,
        }
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.dir.path().join("scratch")
    }

    pub fn object_path(&self, key: &str) -> PathBuf {
        self.dir.path().join("objects").join(key)
    }

    /// Workflow "vendor" over the harness fakes: pattern `\.csv$`,
    /// objects under `out`.
    pub fn config(&self, transforms: TransformConfig) -> WorkflowConfig {
        let (upload_queue, process_queue) = WorkflowConfig::default_queue_names("vendor");
        WorkflowConfig {
            name: "vendor".to_string(),
            upload_queue,
            process_queue,
            source: self.source.clone(),
            location: "/outbox".to_string(),
            pattern: Regex::new(r"\.csv$").unwrap(),
            sink: self.sink.clone(),
            object_directory: "out".to_string(),
            transforms,
            scratch: Scratch::in_dir(self.scratch_dir()),
            cleanup: None,
            processor: self.processor.clone(),
        }
    }
}

pub fn compress_only() -> TransformConfig {
    TransformConfig {
        compress: true,
        ..Default::default()
    }
}
