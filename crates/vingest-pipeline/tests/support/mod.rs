//! Shared fakes for pipeline tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use vingest_analysis::{AnalysisError, AnalysisRequest, AnalysisResult, AnalysisService};
use vingest_media::{plan_segments, MediaError, MediaResult, SegmentFile, Transcoder};
use vingest_models::{ChunkOutcome, InitiateRequest, SessionId};
use vingest_pipeline::{IngestPipeline, PipelineConfig, PipelineContext};
use vingest_session::SessionRepository;
use vingest_storage::{
    keys, DeliveryConfig, MemoryObjectStore, ObjectStore, StorageError, StorageResult,
};

/// Writes one small file per planned segment instead of running FFmpeg.
pub struct FakeTranscoder {
    duration: f64,
    fail_next: Mutex<Option<MediaError>>,
    split_delay: Mutex<Option<Duration>>,
    pub splits: AtomicUsize,
    running: AtomicUsize,
    /// Most splits observed running at once
    pub peak_running: AtomicUsize,
    /// Signalled each time a split starts
    pub split_started: Notify,
    /// Bytes of the last source handed to `split`
    pub last_input: Mutex<Vec<u8>>,
}

impl FakeTranscoder {
    pub fn new(duration: f64) -> Self {
        Self {
            duration,
            fail_next: Mutex::new(None),
            split_delay: Mutex::new(None),
            splits: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            peak_running: AtomicUsize::new(0),
            split_started: Notify::new(),
            last_input: Mutex::new(Vec::new()),
        }
    }

    /// Hold every split for `delay` before producing output.
    pub fn delay_splits(&self, delay: Duration) {
        *self.split_delay.lock().unwrap() = Some(delay);
    }

    pub fn fail_next_split(&self, error: MediaError) {
        *self.fail_next.lock().unwrap() = Some(error);
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn probe_duration(&self, input: &Path) -> MediaResult<f64> {
        if !input.exists() {
            return Err(MediaError::FileNotFound(input.to_path_buf()));
        }
        Ok(self.duration)
    }

    async fn split(
        &self,
        input: &Path,
        output_dir: &Path,
        max_segment_secs: f64,
        cancel: CancellationToken,
    ) -> MediaResult<Vec<SegmentFile>> {
        self.splits.fetch_add(1, Ordering::SeqCst);
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_running.fetch_max(running, Ordering::SeqCst);
        self.split_started.notify_one();

        let result = self.run_split(input, output_dir, max_segment_secs, cancel).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn check_available(&self) -> MediaResult<()> {
        Ok(())
    }
}

impl FakeTranscoder {
    async fn run_split(
        &self,
        input: &Path,
        output_dir: &Path,
        max_segment_secs: f64,
        cancel: CancellationToken,
    ) -> MediaResult<Vec<SegmentFile>> {
        let input_bytes = tokio::fs::read(input).await?;
        *self.last_input.lock().unwrap() = input_bytes;

        let delay = *self.split_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::select! {
                _ = cancel.cancelled() => return Err(MediaError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
        if cancel.is_cancelled() {
            return Err(MediaError::Cancelled);
        }

        let injected = self.fail_next.lock().unwrap().take();
        if let Some(error) = injected {
            return Err(error);
        }

        tokio::fs::create_dir_all(output_dir).await?;
        let mut files = Vec::new();
        for planned in plan_segments(self.duration, max_segment_secs) {
            let path: PathBuf = output_dir.join(format!("segment_{:03}.mp4", planned.index));
            let body = format!("segment-{}", planned.index).into_bytes();
            tokio::fs::write(&path, &body).await?;
            files.push(SegmentFile {
                index: planned.index,
                path,
                start_secs: planned.start_secs,
                duration_secs: planned.duration_secs,
                size_bytes: body.len() as u64,
            });
        }
        Ok(files)
    }
}

/// Replays queued responses, then succeeds with a fixed result.
pub struct FakeAnalysis {
    responses: Mutex<VecDeque<AnalysisResult<serde_json::Value>>>,
    delay: Option<Duration>,
    pub requests: Mutex<Vec<AnalysisRequest>>,
}

impl FakeAnalysis {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push_response(&self, response: AnalysisResult<serde_json::Value>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn push_error(&self, error: AnalysisError) {
        self.push_response(Err(error));
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl AnalysisService for FakeAnalysis {
    async fn analyze(&self, request: &AnalysisRequest) -> AnalysisResult<serde_json::Value> {
        {
            self.requests.lock().unwrap().push(request.clone());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let queued = self.responses.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| Ok(json!({ "highlights": [], "segments": request.segments.len() })))
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// Delegates to a [`MemoryObjectStore`], failing one chosen segment upload.
pub struct FaultyStore {
    inner: Arc<MemoryObjectStore>,
    segment_puts: AtomicUsize,
    fail_segment_put: Mutex<Option<usize>>,
}

impl FaultyStore {
    pub fn new(inner: Arc<MemoryObjectStore>) -> Self {
        Self {
            inner,
            segment_puts: AtomicUsize::new(0),
            fail_segment_put: Mutex::new(None),
        }
    }

    /// Fail the `nth` (1-based) segment upload from now on.
    pub fn fail_segment_put(&self, nth: usize) {
        self.segment_puts.store(0, Ordering::SeqCst);
        *self.fail_segment_put.lock().unwrap() = Some(nth);
    }
}

#[async_trait]
impl ObjectStore for FaultyStore {
    fn backend_name(&self) -> &'static str {
        "faulty"
    }

    async fn presign_put(
        &self,
        key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> StorageResult<String> {
        self.inner.presign_put(key, content_type, expires_in).await
    }

    async fn presign_get(&self, key: &str, expires_in: Duration) -> StorageResult<String> {
        self.inner.presign_get(key, expires_in).await
    }

    async fn put_file(&self, path: &Path, key: &str, content_type: &str) -> StorageResult<u64> {
        if key.contains("/segments/") {
            let n = self.segment_puts.fetch_add(1, Ordering::SeqCst) + 1;
            if *self.fail_segment_put.lock().unwrap() == Some(n) {
                return Err(StorageError::UploadFailed(format!("injected failure for {}", key)));
            }
        }
        self.inner.put_file(path, key, content_type).await
    }

    async fn put_bytes(&self, data: Vec<u8>, key: &str, content_type: &str) -> StorageResult<()> {
        self.inner.put_bytes(data, key, content_type).await
    }

    async fn get_bytes(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.inner.get_bytes(key).await
    }

    async fn get_to_file(&self, key: &str, path: &Path) -> StorageResult<u64> {
        self.inner.get_to_file(key, path).await
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.exists(key).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.inner.delete(key).await
    }

    async fn check_connectivity(&self) -> StorageResult<()> {
        self.inner.check_connectivity().await
    }
}

pub struct Harness {
    pub pipeline: IngestPipeline,
    pub store: Arc<MemoryObjectStore>,
    pub faults: Arc<FaultyStore>,
    pub transcoder: Arc<FakeTranscoder>,
    pub analysis: Arc<FakeAnalysis>,
    pub work_dir: TempDir,
}

impl Harness {
    pub fn new(duration: f64) -> Self {
        Self::with(duration, |_| {}, FakeAnalysis::new())
    }

    pub fn with(
        duration: f64,
        tweak: impl FnOnce(&mut PipelineConfig),
        analysis: FakeAnalysis,
    ) -> Self {
        let work_dir = tempfile::tempdir().unwrap();
        let mut config = PipelineConfig {
            work_dir: work_dir.path().to_path_buf(),
            analysis_retry_base_delay: Duration::from_millis(1),
            ..PipelineConfig::default()
        };
        tweak(&mut config);

        let store = Arc::new(MemoryObjectStore::new("test"));
        let faults = Arc::new(FaultyStore::new(store.clone()));
        let transcoder = Arc::new(FakeTranscoder::new(duration));
        let analysis = Arc::new(analysis);
        let ctx = PipelineContext::new(
            config,
            SessionRepository::in_memory(),
            faults.clone() as Arc<dyn ObjectStore>,
            DeliveryConfig::default(),
            transcoder.clone(),
            analysis.clone(),
        );

        Self {
            pipeline: IngestPipeline::new(Arc::new(ctx)),
            store,
            faults,
            transcoder,
            analysis,
            work_dir,
        }
    }

    /// Initiate a session and upload every chunk, leaving it `uploading`
    /// with all chunks recorded.
    pub async fn uploaded_session(&self, name: &str, chunk_count: Option<u32>) -> SessionId {
        let response = self
            .pipeline
            .uploads()
            .initiate(&InitiateRequest {
                file_name: name.to_string(),
                file_size: 1000,
                chunk_count,
            })
            .await
            .unwrap();
        let id = response.session_id;

        match chunk_count {
            None => {
                self.store
                    .put_bytes(b"whole-file".to_vec(), &keys::original_key(&id, name), "video/mp4")
                    .await
                    .unwrap();
            }
            Some(n) => {
                for i in 0..n {
                    self.store
                        .put_bytes(
                            format!("chunk-{};", i).into_bytes(),
                            &keys::chunk_key(&id, i),
                            "application/octet-stream",
                        )
                        .await
                        .unwrap();
                }
            }
        }

        for i in 0..chunk_count.unwrap_or(1) {
            self.pipeline
                .uploads()
                .record_chunk_complete(&id, i, &ChunkOutcome::Success)
                .await
                .unwrap();
        }
        id
    }

    /// A session that is `chunked` and ready for dispatch.
    pub async fn chunked_session(&self, name: &str) -> SessionId {
        let id = self.uploaded_session(name, None).await;
        self.pipeline.uploads().complete_upload(&id).await.unwrap();
        self.pipeline.segment(&id).await.unwrap();
        id
    }

    /// Segment keys currently in the store.
    pub async fn segment_keys(&self, id: &SessionId) -> Vec<String> {
        self.store
            .keys_with_prefix(&format!("sessions/{}/segments/", id))
            .await
    }

    /// Entries left in the scratch directory.
    pub fn scratch_entries(&self) -> usize {
        std::fs::read_dir(self.work_dir.path())
            .map(|d| d.count())
            .unwrap_or(0)
    }
}
