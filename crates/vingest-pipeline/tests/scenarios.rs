//! End-to-end lifecycle scenarios over in-memory collaborators.

mod support;

use std::sync::atomic::Ordering;
use std::time::Duration;

use futures::future::join_all;
use serde_json::json;
use support::{FakeAnalysis, Harness};
use vingest_analysis::{AnalysisError, SegmentSource};
use vingest_media::MediaError;
use vingest_models::{
    AccessMethod, ArtifactRole, ChunkOutcome, IngestionSession, InitiateRequest, PlaybackSource,
    SessionId, SessionStatus, UploadStrategy,
};
use vingest_pipeline::{
    AnalysisPayload, ErrorKind, IngestError, PlaybackMode, SegmentationMode, CANCELLED_MESSAGE,
};
use vingest_storage::{keys, ObjectStore};

/// Poll until the session reaches `status`.
async fn wait_for_status(h: &Harness, id: &SessionId, status: SessionStatus) -> IngestionSession {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let session = h.pipeline.uploads().session(id).await.unwrap();
            if session.status == status {
                return session;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("session never reached {}", status))
}

fn request(name: &str, size: u64, chunks: Option<u32>) -> InitiateRequest {
    InitiateRequest {
        file_name: name.to_string(),
        file_size: size,
        chunk_count: chunks,
    }
}

#[tokio::test]
async fn initiate_creates_uploading_session_with_declared_chunks() {
    let h = Harness::new(250.0);
    let response = h
        .pipeline
        .uploads()
        .initiate(&request("a.mp4", 1000, Some(4)))
        .await
        .unwrap();

    assert_eq!(response.strategy, UploadStrategy::Chunked);
    assert_eq!(response.total_chunks, 4);
    assert_eq!(response.credentials.len(), 4);
    for (i, credential) in response.credentials.iter().enumerate() {
        assert_eq!(credential.role, ArtifactRole::Chunk);
        assert_eq!(credential.index, Some(i as u32));
        assert_eq!(credential.method, AccessMethod::Put);
        assert_eq!(credential.key, keys::chunk_key(&response.session_id, i as u32));
    }

    let progress = h.pipeline.uploads().status(&response.session_id).await.unwrap();
    assert_eq!(progress.status, SessionStatus::Uploading);
    assert_eq!(progress.total_chunks, 4);
    assert!(progress.completed_chunk_indices.is_empty());
    assert_eq!(progress.remaining_chunk_indices, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn initiate_without_chunk_count_issues_one_credential() {
    let h = Harness::new(250.0);
    let response = h
        .pipeline
        .uploads()
        .initiate(&request("a.mp4", 1000, None))
        .await
        .unwrap();

    assert_eq!(response.strategy, UploadStrategy::SingleFile);
    assert_eq!(response.total_chunks, 1);
    assert_eq!(response.credentials.len(), 1);
    assert_eq!(response.credentials[0].role, ArtifactRole::Original);
    assert_eq!(
        response.credentials[0].key,
        keys::original_key(&response.session_id, "a.mp4")
    );
    assert_eq!(response.credentials[0].content_type.as_deref(), Some("video/mp4"));
}

#[tokio::test]
async fn initiate_rejects_bad_input() {
    let h = Harness::new(250.0);
    for bad in [
        request("a.mp4", 0, None),
        request("", 1000, None),
        request("   ", 1000, None),
        request("a.mp4", 1000, Some(0)),
    ] {
        let err = h.pipeline.uploads().initiate(&bad).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest, "{:?}", bad);
    }
}

#[tokio::test]
async fn single_chunk_reported_stays_uploading() {
    let h = Harness::new(250.0);
    let response = h
        .pipeline
        .uploads()
        .initiate(&request("a.mp4", 1000, Some(1)))
        .await
        .unwrap();
    let id = response.session_id;

    let progress = h
        .pipeline
        .uploads()
        .record_chunk_complete(&id, 0, &ChunkOutcome::Success)
        .await
        .unwrap();

    assert_eq!(progress.completed_chunk_indices, vec![0]);
    assert!(progress.remaining_chunk_indices.is_empty());
    assert_eq!(progress.status, SessionStatus::Uploading);
}

#[tokio::test]
async fn failed_chunk_outcome_leaves_set_unchanged() {
    let h = Harness::new(250.0);
    let id = h
        .pipeline
        .uploads()
        .initiate(&request("a.mp4", 1000, Some(2)))
        .await
        .unwrap()
        .session_id;

    let progress = h
        .pipeline
        .uploads()
        .record_chunk_complete(
            &id,
            1,
            &ChunkOutcome::Failed {
                error: Some("connection reset".to_string()),
            },
        )
        .await
        .unwrap();
    assert!(progress.completed_chunk_indices.is_empty());

    let err = h
        .pipeline
        .uploads()
        .record_chunk_complete(&id, 2, &ChunkOutcome::Success)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
}

#[tokio::test]
async fn refresh_credentials_defaults_to_remaining() {
    let h = Harness::new(250.0);
    let id = h
        .pipeline
        .uploads()
        .initiate(&request("a.mp4", 1000, Some(3)))
        .await
        .unwrap()
        .session_id;
    h.pipeline
        .uploads()
        .record_chunk_complete(&id, 1, &ChunkOutcome::Success)
        .await
        .unwrap();

    let remaining = h.pipeline.uploads().refresh_credentials(&id, None).await.unwrap();
    let indices: Vec<_> = remaining.iter().map(|c| c.index).collect();
    assert_eq!(indices, vec![Some(0), Some(2)]);

    let explicit = h
        .pipeline
        .uploads()
        .refresh_credentials(&id, Some(&[2, 1, 2]))
        .await
        .unwrap();
    let indices: Vec<_> = explicit.iter().map(|c| c.index).collect();
    assert_eq!(indices, vec![Some(1), Some(2)]);

    let err = h
        .pipeline
        .uploads()
        .refresh_credentials(&id, Some(&[3]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
}

#[tokio::test]
async fn complete_upload_requires_every_chunk_and_object() {
    let h = Harness::new(250.0);
    let id = h
        .pipeline
        .uploads()
        .initiate(&request("a.mp4", 1000, Some(2)))
        .await
        .unwrap()
        .session_id;

    h.pipeline
        .uploads()
        .record_chunk_complete(&id, 0, &ChunkOutcome::Success)
        .await
        .unwrap();
    let err = h.pipeline.uploads().complete_upload(&id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotReady);

    h.pipeline
        .uploads()
        .record_chunk_complete(&id, 1, &ChunkOutcome::Success)
        .await
        .unwrap();
    // Reported but never written to the store.
    let err = h.pipeline.uploads().complete_upload(&id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotReady);
    assert!(err.to_string().contains(&keys::chunk_key(&id, 0)));

    for i in 0..2 {
        h.store
            .put_bytes(vec![i as u8], &keys::chunk_key(&id, i), "application/octet-stream")
            .await
            .unwrap();
    }
    let completion = h.pipeline.uploads().complete_upload(&id).await.unwrap();
    assert!(completion.advanced);
    assert_eq!(completion.session.status, SessionStatus::Processing);

    let again = h.pipeline.uploads().complete_upload(&id).await.unwrap();
    assert!(!again.advanced);
}

#[tokio::test]
async fn segmentation_of_250s_source_yields_three_ordered_segments() {
    let h = Harness::new(250.0);
    let id = h.uploaded_session("a.mp4", None).await;
    h.pipeline.uploads().complete_upload(&id).await.unwrap();

    let refs = h.pipeline.segment(&id).await.unwrap();

    assert_eq!(refs.len(), 3);
    let durations: Vec<f64> = refs.iter().map(|r| r.duration_secs.unwrap()).collect();
    assert_eq!(durations, vec![120.0, 120.0, 10.0]);
    for (i, r) in refs.iter().enumerate() {
        assert_eq!(r.index, i as u32);
        assert_eq!(r.key, keys::segment_key(&id, i as u32, "mp4"));
        assert!(h.store.exists(&r.key).await.unwrap());
    }

    let session = h.pipeline.uploads().session(&id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Chunked);
    assert_eq!(session.segment_refs.as_ref(), Some(&refs));
    assert!(session.processed_at.is_some());
    assert!(session.invariant_violations().is_empty());
    assert_eq!(h.scratch_entries(), 0);
}

#[tokio::test]
async fn chunked_upload_is_assembled_in_index_order() {
    let h = Harness::new(100.0);
    let id = h.uploaded_session("clip.MOV", Some(3)).await;
    h.pipeline.uploads().complete_upload(&id).await.unwrap();

    let refs = h.pipeline.segment(&id).await.unwrap();
    assert_eq!(refs.len(), 1);
    assert_eq!(refs[0].key, keys::segment_key(&id, 0, "mov"));

    let expected = b"chunk-0;chunk-1;chunk-2;".to_vec();
    assert_eq!(*h.transcoder.last_input.lock().unwrap(), expected);

    let original = keys::original_key(&id, "clip.MOV");
    assert_eq!(h.store.get_bytes(&original).await.unwrap(), expected);
    assert_eq!(h.store.content_type(&original).await.as_deref(), Some("video/quicktime"));
}

#[tokio::test]
async fn passthrough_publishes_chunks_without_transcoding() {
    let h = Harness::with(
        250.0,
        |c| c.segmentation_mode = SegmentationMode::Passthrough,
        FakeAnalysis::new(),
    );
    let id = h.uploaded_session("a.mp4", Some(3)).await;
    h.pipeline.uploads().complete_upload(&id).await.unwrap();

    let refs = h.pipeline.segment(&id).await.unwrap();
    let keys_published: Vec<_> = refs.iter().map(|r| r.key.clone()).collect();
    assert_eq!(
        keys_published,
        (0..3).map(|i| keys::chunk_key(&id, i)).collect::<Vec<_>>()
    );
    assert_eq!(h.transcoder.splits.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn segmentation_failure_is_persisted_and_resumable() {
    let h = Harness::new(250.0);
    let id = h.uploaded_session("a.mp4", None).await;
    h.pipeline.uploads().complete_upload(&id).await.unwrap();

    h.transcoder.fail_next_split(MediaError::ffmpeg_failed(
        "FFmpeg exited with non-zero status",
        Some("moov atom not found".to_string()),
        Some(1),
    ));
    let err = h.pipeline.segment(&id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExternalFailure);

    let session = h.pipeline.uploads().session(&id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
    assert_eq!(session.failed_stage, Some(SessionStatus::Processing));
    assert!(session.last_error.as_deref().unwrap().contains("moov atom not found"));
    assert!(session.segment_refs.is_none());
    assert!(h.store.keys_with_prefix(&format!("sessions/{}/segments/", id)).await.is_empty());
    assert_eq!(h.scratch_entries(), 0);

    // Segmentation can be retried from the failed stage.
    let completion = h.pipeline.uploads().complete_upload(&id).await.unwrap();
    assert!(completion.advanced);
    assert!(completion.session.last_error.is_none());
    assert_eq!(h.pipeline.segment(&id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn segment_requires_processing() {
    let h = Harness::new(250.0);
    let id = h.uploaded_session("a.mp4", None).await;

    let err = h.pipeline.segment(&id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotReady);
    let session = h.pipeline.uploads().session(&id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Uploading);
}

#[tokio::test]
async fn dispatch_failure_marks_session_failed() {
    let analysis = FakeAnalysis::new();
    analysis.push_error(AnalysisError::Failed("model overloaded".to_string()));
    let h = Harness::with(250.0, |_| {}, analysis);
    let id = h.chunked_session("a.mp4").await;

    let err = h.pipeline.dispatch(&id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExternalFailure);

    let session = h.pipeline.uploads().session(&id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
    assert!(!session.last_error.as_deref().unwrap_or_default().is_empty());
    assert!(session.analysis_result.is_none());
    assert_eq!(session.segment_refs.as_ref().map(Vec::len), Some(3));
    assert!(session.invariant_violations().is_empty());
}

#[tokio::test]
async fn redispatch_after_failure_completes() {
    let analysis = FakeAnalysis::new();
    analysis.push_error(AnalysisError::Failed("model overloaded".to_string()));
    let h = Harness::with(250.0, |_| {}, analysis);
    let id = h.chunked_session("a.mp4").await;

    assert!(h.pipeline.dispatch(&id).await.is_err());
    let session = h.pipeline.dispatch(&id).await.unwrap();

    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.analysis_result, Some(json!({ "highlights": [], "segments": 3 })));
    assert!(session.last_error.is_none());
    assert!(session.completed_at.is_some());
    assert_eq!(h.analysis.call_count(), 2);
    assert!(session.invariant_violations().is_empty());
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let h = Harness::new(250.0);
    let id = SessionId::from_string("does-not-exist");

    assert_eq!(
        h.pipeline.uploads().status(&id).await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert_eq!(
        h.pipeline.playback().resolve(&id).await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert_eq!(
        h.pipeline
            .uploads()
            .record_chunk_complete(&id, 0, &ChunkOutcome::Success)
            .await
            .unwrap_err()
            .kind(),
        ErrorKind::NotFound
    );
    assert_eq!(h.pipeline.dispatch(&id).await.unwrap_err().kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn dispatch_on_uploading_session_is_not_ready() {
    let h = Harness::new(250.0);
    let id = h.uploaded_session("a.mp4", None).await;

    let err = h.pipeline.dispatch(&id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotReady);
    assert_eq!(h.analysis.call_count(), 0);
    let session = h.pipeline.uploads().session(&id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Uploading);
    assert!(session.last_error.is_none());
}

#[tokio::test]
async fn transient_analysis_errors_retry_when_configured() {
    let analysis = FakeAnalysis::new();
    analysis.push_error(AnalysisError::ServiceUnavailable {
        status: 503,
        body: "warming up".to_string(),
    });
    let h = Harness::with(250.0, |c| c.analysis_max_retries = 2, analysis);
    let id = h.chunked_session("a.mp4").await;

    let session = h.pipeline.dispatch(&id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(h.analysis.call_count(), 2);
}

#[tokio::test]
async fn analysis_is_not_retried_by_default() {
    let analysis = FakeAnalysis::new();
    analysis.push_error(AnalysisError::RateLimited);
    let h = Harness::with(250.0, |_| {}, analysis);
    let id = h.chunked_session("a.mp4").await;

    assert!(h.pipeline.dispatch(&id).await.is_err());
    assert_eq!(h.analysis.call_count(), 1);
}

#[tokio::test]
async fn reference_payload_carries_read_urls_in_order() {
    let h = Harness::new(250.0);
    let id = h.chunked_session("a.mp4").await;
    h.pipeline.dispatch(&id).await.unwrap();

    let requests = h.analysis.requests.lock().unwrap();
    let segments = &requests[0].segments;
    assert_eq!(segments.len(), 3);
    for (i, s) in segments.iter().enumerate() {
        assert_eq!(s.index, i as u32);
        match &s.source {
            SegmentSource::Url { url } => assert!(url.contains("method=GET")),
            other => panic!("expected url source, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn inline_payload_embeds_segment_bytes() {
    let h = Harness::with(250.0, |c| c.analysis_payload = AnalysisPayload::Inline, FakeAnalysis::new());
    let id = h.chunked_session("a.mp4").await;
    h.pipeline.dispatch(&id).await.unwrap();

    let requests = h.analysis.requests.lock().unwrap();
    assert_eq!(requests[0].segments[1].source, SegmentSource::inline(b"segment-1"));
}

#[tokio::test]
async fn cancelled_dispatch_fails_session_and_can_be_redispatched() {
    let h = Harness::with(
        250.0,
        |_| {},
        FakeAnalysis::new().with_delay(Duration::from_secs(30)),
    );
    let id = h.chunked_session("a.mp4").await;

    let pipeline = h.pipeline.clone();
    let dispatch_id = id.clone();
    let handle = tokio::spawn(async move { pipeline.dispatch(&dispatch_id).await });

    // Wait until the dispatch is registered and analyzing.
    while h.pipeline.uploads().session(&id).await.unwrap().status != SessionStatus::Analyzing
        || !h.pipeline.cancel_dispatch(&id).await
    {
        tokio::task::yield_now().await;
    }

    let err = handle.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExternalFailure);

    let session = h.pipeline.uploads().session(&id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
    assert_eq!(session.last_error.as_deref(), Some(CANCELLED_MESSAGE));
    assert!(session.segment_refs.is_some());
    assert!(!h.pipeline.cancel_dispatch(&id).await);
}

#[tokio::test]
async fn process_runs_segmentation_then_dispatch() {
    let h = Harness::new(250.0);
    let id = h.uploaded_session("a.mp4", None).await;
    h.pipeline.uploads().complete_upload(&id).await.unwrap();

    let session = h.pipeline.process(&id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert!(session.processed_at.unwrap() <= session.completed_at.unwrap());
}

#[tokio::test]
async fn process_stops_at_chunked_without_auto_dispatch() {
    let h = Harness::with(250.0, |c| c.auto_dispatch = false, FakeAnalysis::new());
    let id = h.uploaded_session("a.mp4", None).await;
    h.pipeline.uploads().complete_upload(&id).await.unwrap();

    let session = h.pipeline.process(&id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Chunked);
    assert_eq!(h.analysis.call_count(), 0);
}

#[tokio::test]
async fn shutdown_leaves_spawned_processing_recoverable() {
    let h = Harness::new(250.0);
    let id = h.uploaded_session("a.mp4", None).await;
    h.pipeline.uploads().complete_upload(&id).await.unwrap();

    h.pipeline.spawn_process(id.clone());
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.pipeline.shutdown().await;

    // Work cut short by shutdown stays in its stage for another host to
    // resume; it is never recorded as failed.
    let session = h.pipeline.uploads().session(&id).await.unwrap();
    assert!(matches!(
        session.status,
        SessionStatus::Completed
            | SessionStatus::Chunked
            | SessionStatus::Processing
            | SessionStatus::Analyzing
    ));
    assert!(session.last_error.is_none());
    assert!(session.invariant_violations().is_empty());
}

#[tokio::test]
async fn playback_serves_original_then_segments() {
    let h = Harness::new(250.0);
    let response = h
        .pipeline
        .uploads()
        .initiate(&request("a.mp4", 1000, None))
        .await
        .unwrap();
    let id = response.session_id;

    let err = h.pipeline.playback().resolve(&id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotReady);

    h.store
        .put_bytes(b"whole".to_vec(), &keys::original_key(&id, "a.mp4"), "video/mp4")
        .await
        .unwrap();
    h.pipeline
        .uploads()
        .record_chunk_complete(&id, 0, &ChunkOutcome::Success)
        .await
        .unwrap();

    let original = h.pipeline.playback().resolve(&id).await.unwrap();
    assert_eq!(original.source, PlaybackSource::Original);
    assert_eq!(original.keys(), vec![keys::original_key(&id, "a.mp4").as_str()]);
    assert!(original.descriptors[0].expires_in_secs > 86400);

    h.pipeline.uploads().complete_upload(&id).await.unwrap();
    h.pipeline.segment(&id).await.unwrap();

    let first = h.pipeline.playback().resolve(&id).await.unwrap();
    let second = h.pipeline.playback().resolve(&id).await.unwrap();
    assert_eq!(first.source, PlaybackSource::Segments);
    assert_eq!(first.descriptors.len(), 3);
    assert_eq!(first.keys(), second.keys());
    let indices: Vec<_> = first.descriptors.iter().map(|d| d.index).collect();
    assert_eq!(indices, vec![Some(0), Some(1), Some(2)]);
}

#[tokio::test]
async fn playback_first_segment_mode() {
    let h = Harness::with(250.0, |c| c.playback_mode = PlaybackMode::FirstSegment, FakeAnalysis::new());
    let id = h.chunked_session("a.mp4").await;

    let playback = h.pipeline.playback().resolve(&id).await.unwrap();
    assert_eq!(playback.descriptors.len(), 1);
    assert_eq!(playback.descriptors[0].key, keys::segment_key(&id, 0, "mp4"));
}

#[tokio::test]
async fn chunked_upload_is_not_playable_before_assembly() {
    let h = Harness::new(250.0);
    let id = h.uploaded_session("a.mp4", Some(2)).await;

    let err = h.pipeline.playback().resolve(&id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotReady);
}

#[tokio::test]
async fn dropped_dispatch_call_runs_to_completion() {
    let h = Harness::with(
        250.0,
        |_| {},
        FakeAnalysis::new().with_delay(Duration::from_millis(200)),
    );
    let id = h.chunked_session("a.mp4").await;

    let abandoned = tokio::time::timeout(Duration::from_millis(20), h.pipeline.dispatch(&id)).await;
    assert!(abandoned.is_err());

    // The dispatch keeps its slot while it runs on.
    let err = h.pipeline.dispatch(&id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotReady);

    let session = wait_for_status(&h, &id, SessionStatus::Completed).await;
    assert!(session.invariant_violations().is_empty());
    assert_eq!(h.analysis.call_count(), 1);
}

#[tokio::test]
async fn dropped_dispatch_call_can_still_be_cancelled() {
    let h = Harness::with(
        250.0,
        |_| {},
        FakeAnalysis::new().with_delay(Duration::from_secs(30)),
    );
    let id = h.chunked_session("a.mp4").await;

    let abandoned = tokio::time::timeout(Duration::from_millis(20), h.pipeline.dispatch(&id)).await;
    assert!(abandoned.is_err());
    assert!(h.pipeline.cancel_dispatch(&id).await);

    let session = wait_for_status(&h, &id, SessionStatus::Failed).await;
    assert_eq!(session.last_error.as_deref(), Some(CANCELLED_MESSAGE));

    // The registry slot is released once the task ends.
    tokio::time::timeout(Duration::from_secs(5), async {
        while h.pipeline.ensure_dispatchable(&id).await.is_err() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert!(!h.pipeline.cancel_dispatch(&id).await);
}

#[tokio::test]
async fn abandoned_analysis_is_redispatched_after_its_lease_expires() {
    let h = Harness::with(
        250.0,
        |c| c.stage_lease = Duration::from_millis(200),
        FakeAnalysis::new(),
    );
    let id = h.chunked_session("a.mp4").await;

    // A host that died mid-dispatch leaves the session analyzing with
    // nobody renewing it.
    h.pipeline
        .context()
        .sessions
        .update(&id, |s| s.begin_analysis().map_err(IngestError::from))
        .await
        .unwrap();

    let err = h.pipeline.dispatch(&id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotReady);

    tokio::time::sleep(Duration::from_millis(300)).await;
    h.pipeline.ensure_dispatchable(&id).await.unwrap();
    let session = h.pipeline.dispatch(&id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert!(session.invariant_violations().is_empty());
    assert_eq!(h.analysis.call_count(), 1);
}

#[tokio::test]
async fn abandoned_segmentation_resumes_after_its_lease_expires() {
    let h = Harness::with(
        250.0,
        |c| c.stage_lease = Duration::from_millis(200),
        FakeAnalysis::new(),
    );
    let id = h.uploaded_session("a.mp4", None).await;
    assert!(h.pipeline.uploads().complete_upload(&id).await.unwrap().advanced);

    // Still leased: a repeat call is a no-op.
    let repeat = h.pipeline.uploads().complete_upload(&id).await.unwrap();
    assert!(!repeat.advanced);
    assert_eq!(repeat.session.status, SessionStatus::Processing);

    tokio::time::sleep(Duration::from_millis(300)).await;
    let resumed = h.pipeline.uploads().complete_upload(&id).await.unwrap();
    assert!(resumed.advanced);
    assert_eq!(resumed.session.status, SessionStatus::Processing);
    assert!(resumed.session.last_error.is_none());

    assert_eq!(h.pipeline.segment(&id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn running_segmentation_keeps_its_lease() {
    let h = Harness::with(
        250.0,
        |c| c.stage_lease = Duration::from_millis(100),
        FakeAnalysis::new(),
    );
    h.transcoder.delay_splits(Duration::from_millis(400));
    let id = h.uploaded_session("a.mp4", None).await;
    h.pipeline.uploads().complete_upload(&id).await.unwrap();

    let pipeline = h.pipeline.clone();
    let run_id = id.clone();
    let run = tokio::spawn(async move { pipeline.segment(&run_id).await });
    h.transcoder.split_started.notified().await;

    tokio::time::sleep(Duration::from_millis(250)).await;
    let repeat = h.pipeline.uploads().complete_upload(&id).await.unwrap();
    assert!(!repeat.advanced);

    assert_eq!(run.await.unwrap().unwrap().len(), 3);
    assert_eq!(h.transcoder.splits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn shutdown_interrupts_segmentation_without_failing_the_session() {
    let h = Harness::new(250.0);
    h.transcoder.delay_splits(Duration::from_secs(30));
    let id = h.uploaded_session("a.mp4", None).await;
    h.pipeline.uploads().complete_upload(&id).await.unwrap();

    let pipeline = h.pipeline.clone();
    let run_id = id.clone();
    let run = tokio::spawn(async move { pipeline.segment(&run_id).await });
    h.transcoder.split_started.notified().await;
    h.pipeline.shutdown().await;

    let err = run.await.unwrap().unwrap_err();
    assert!(err.is_interrupted());

    let session = h.pipeline.uploads().session(&id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Processing);
    assert!(session.last_error.is_none());
    assert!(h.segment_keys(&id).await.is_empty());
    assert_eq!(h.scratch_entries(), 0);
}

#[tokio::test]
async fn segmentations_never_exceed_the_slot_count() {
    let h = Harness::with(
        250.0,
        |c| c.max_concurrent_segmentations = 2,
        FakeAnalysis::new(),
    );
    h.transcoder.delay_splits(Duration::from_millis(50));

    let mut ids = Vec::new();
    for i in 0..6 {
        let id = h.uploaded_session(&format!("{}.mp4", i), None).await;
        h.pipeline.uploads().complete_upload(&id).await.unwrap();
        ids.push(id);
    }

    let results = join_all(ids.iter().map(|id| h.pipeline.segment(id))).await;
    for result in results {
        assert_eq!(result.unwrap().len(), 3);
    }
    assert_eq!(h.transcoder.splits.load(Ordering::SeqCst), 6);
    assert_eq!(h.transcoder.peak_running.load(Ordering::SeqCst), 2);
    assert_eq!(h.pipeline.active_segmentations(), 0);
}

#[tokio::test]
async fn failed_segment_upload_publishes_nothing() {
    let h = Harness::new(250.0);
    let id = h.uploaded_session("a.mp4", None).await;
    h.pipeline.uploads().complete_upload(&id).await.unwrap();

    h.faults.fail_segment_put(2);
    let err = h.pipeline.segment(&id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExternalFailure);

    let session = h.pipeline.uploads().session(&id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
    assert_eq!(session.failed_stage, Some(SessionStatus::Processing));
    assert!(session.last_error.as_deref().unwrap().contains("injected failure"));
    assert!(session.segment_refs.is_none());
    assert!(h.segment_keys(&id).await.is_empty());
    assert_eq!(h.scratch_entries(), 0);

    assert!(h.pipeline.uploads().complete_upload(&id).await.unwrap().advanced);
    assert_eq!(h.pipeline.segment(&id).await.unwrap().len(), 3);
    assert_eq!(h.segment_keys(&id).await.len(), 3);
}

#[tokio::test]
async fn segments_are_discarded_when_the_session_moved_on_mid_run() {
    let h = Harness::new(250.0);
    h.transcoder.delay_splits(Duration::from_millis(100));
    let id = h.uploaded_session("a.mp4", None).await;
    h.pipeline.uploads().complete_upload(&id).await.unwrap();

    let pipeline = h.pipeline.clone();
    let run_id = id.clone();
    let run = tokio::spawn(async move { pipeline.segment(&run_id).await });
    h.transcoder.split_started.notified().await;

    // The session leaves processing while the split runs, so the refs
    // cannot be published.
    h.pipeline
        .context()
        .sessions
        .update(&id, |s| s.fail("superseded").map_err(IngestError::from))
        .await
        .unwrap();

    let err = run.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotReady);

    let session = h.pipeline.uploads().session(&id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
    assert!(session.segment_refs.is_none());
    assert!(h.segment_keys(&id).await.is_empty());
    assert_eq!(h.scratch_entries(), 0);
}
