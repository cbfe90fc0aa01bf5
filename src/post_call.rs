//! Work that runs after a call: transcript flush and recording archive.
//!
//! Finalizers are registered while the call starts and run once at teardown, each on its own
//! task.  A finalizer that fails or panics is logged and does not affect the others.

use crate::config::ManifestRetryPolicy;
use crate::db_types::NewCallRecord;
use crate::error::PostCallError;
use crate::livekit_types::EgressManifest;
use crate::recording::{normalize_segment_url, ManifestFetcher, RecordingCoordinator, RecordingJob};
use crate::store::CallStore;
use crate::transcript::{read_transcript, write_transcript};
use crate::types::{CallJob, SharedTranscript};

use futures_util::future::BoxFuture;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What the finalizers know about how the call ended.
#[derive(Debug, Clone)]
pub struct TeardownContext {
    /// A human was confirmed on the line.
    pub connected: bool,
    pub reason: String,
}

type FinalizerFn =
    Box<dyn FnOnce(TeardownContext) -> BoxFuture<'static, Result<(), PostCallError>> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizerOutcome {
    Completed,
    Failed(String),
    Panicked,
}

#[derive(Debug, Clone)]
pub struct FinalizerReport {
    pub name: &'static str,
    pub outcome: FinalizerOutcome,
}

#[derive(Default)]
pub struct Finalizers {
    entries: Vec<(&'static str, FinalizerFn)>,
}

impl Finalizers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(&mut self, name: &'static str, f: F)
    where
        F: FnOnce(TeardownContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), PostCallError>> + Send + 'static,
    {
        self.entries.push((
            name,
            Box::new(move |ctx: TeardownContext| Box::pin(f(ctx)) as BoxFuture<'static, _>),
        ));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run every finalizer concurrently and wait for all of them.
    pub async fn run_all(self, ctx: TeardownContext) -> Vec<FinalizerReport> {
        let handles: Vec<(&'static str, JoinHandle<Result<(), PostCallError>>)> = self
            .entries
            .into_iter()
            .map(|(name, f)| (name, tokio::spawn(f(ctx.clone()))))
            .collect();

        let mut reports = Vec::with_capacity(handles.len());
        for (name, handle) in handles {
            let outcome = match handle.await {
                Ok(Ok(())) => {
                    debug!(finalizer = name, "finalizer completed");
                    FinalizerOutcome::Completed
                }
                Ok(Err(e)) => {
                    warn!(finalizer = name, error=%e, "finalizer failed");
                    FinalizerOutcome::Failed(e.to_string())
                }
                Err(e) if e.is_panic() => {
                    error!(finalizer = name, "finalizer panicked");
                    FinalizerOutcome::Panicked
                }
                Err(e) => {
                    warn!(finalizer = name, error=%e, "finalizer cancelled");
                    FinalizerOutcome::Failed(e.to_string())
                }
            };
            reports.push(FinalizerReport { name, outcome });
        }
        reports
    }
}

/// Write the call's transcript artifact, then signal `flushed`.
pub async fn flush_transcript(
    dir: PathBuf,
    room: String,
    transcript: SharedTranscript,
    flushed: oneshot::Sender<PathBuf>,
) -> Result<(), PostCallError> {
    let turns = transcript.read().await.clone();
    let path = write_transcript(&dir, &room, &turns).await?;
    info!(room=%room, turns = turns.len(), path=%path.display(), "transcript flushed");
    let _ = flushed.send(path);
    Ok(())
}

/// Recording retrieval and persistence for one call.
pub struct ArchiveJob {
    pub job: Arc<CallJob>,
    /// Resolves to the recording, or `None` when it never started.
    pub recording: JoinHandle<Option<RecordingJob>>,
    pub recorder: Arc<RecordingCoordinator>,
    pub manifests: Arc<dyn ManifestFetcher>,
    pub store: Arc<dyn CallStore>,
    pub policy: ManifestRetryPolicy,
    pub transcript_flushed: oneshot::Receiver<PathBuf>,
}

impl ArchiveJob {
    /// Returns the id of the created record, or `None` when the archive was skipped.
    pub async fn run(self, ctx: TeardownContext) -> Result<Option<Uuid>, PostCallError> {
        let ArchiveJob {
            job,
            recording,
            recorder,
            manifests,
            store,
            policy,
            transcript_flushed,
        } = self;
        let call_id = job.call_id.as_str();
        let recording = match recording.await {
            Ok(recording) => recording,
            Err(e) => {
                warn!(call_id, error=%e, "recording task did not complete");
                None
            }
        };

        if !ctx.connected {
            if let Some(recording) = &recording {
                if let Err(e) = recorder.stop_recording(recording).await {
                    warn!(call_id, error=%e, "failed to stop recording of unconnected call");
                }
            }
            info!(call_id, "call never connected; skipping archive");
            return Ok(None);
        }

        let (record, recording) = match recording {
            Some(mut recording) if recording.recording_id().is_some() => {
                if let Err(e) = recorder.stop_recording(&recording).await {
                    debug!(call_id, error=%e, "egress already stopped");
                }
                let manifest_url = recording.manifest_url.clone().unwrap_or_else(|| {
                    recorder
                        .storage()
                        .manifest_url(recording.recording_id().unwrap_or_default())
                });
                let manifest = fetch_with_retry(&*manifests, &manifest_url, &policy)
                    .await
                    .map_err(|e| {
                        warn!(call_id, error=%e, "recording manifest unavailable; no record created");
                        e
                    })?;
                let segments: Vec<String> = manifest
                    .segment_locations()
                    .filter_map(|loc| normalize_segment_url(loc, recorder.storage()))
                    .collect();
                recording.set_segments(segments);
                let record = new_record(&job, Some(&recording), Some(&manifest));
                (record, Some(recording))
            }
            other => {
                warn!(call_id, "no recording for call; archiving without audio");
                (new_record(&job, other.as_ref(), None), other)
            }
        };

        let id = store.insert_call_record(&record).await?;
        info!(
            call_id,
            record=%id,
            recording_id=?recording.as_ref().and_then(|r| r.recording_id()),
            segments = record.segments.len(),
            "call record created"
        );

        let path = match transcript_flushed.await {
            Ok(path) => path,
            Err(_) => {
                warn!(call_id, "transcript was not flushed; record keeps no transcript");
                return Ok(Some(id));
            }
        };
        match read_transcript(&path).await? {
            Some(artifact) => {
                let attached = store
                    .attach_transcript(id, &serde_json::to_value(&artifact)?)
                    .await?;
                debug!(record=%id, attached, "transcript attached");
            }
            None => warn!(path=%path.display(), "transcript artifact missing"),
        }
        Ok(Some(id))
    }
}

fn new_record(
    job: &CallJob,
    recording: Option<&RecordingJob>,
    manifest: Option<&EgressManifest>,
) -> NewCallRecord {
    let from_nanos = |n: Option<i64>| {
        n.and_then(|n| OffsetDateTime::from_unix_timestamp_nanos(n as i128).ok())
    };
    NewCallRecord {
        call_id: job.call_id.clone(),
        customer_name: job.customer_name.clone(),
        phone_number: job.phone_number.clone(),
        customer_id: job.profile.customer_id(),
        product_name: job.primary_product_name().map(str::to_string),
        recording_id: recording
            .and_then(|r| r.recording_id())
            .map(str::to_string),
        started_at: manifest
            .and_then(|m| from_nanos(m.started_at))
            .or_else(|| recording.map(|r| r.started_at)),
        ended_at: manifest.and_then(|m| from_nanos(m.ended_at)),
        segments: recording
            .map(|r| r.segments().to_vec())
            .unwrap_or_default(),
    }
}

/// Wait out the settle delay, then fetch with doubling backoff between attempts.
pub async fn fetch_with_retry(
    fetcher: &dyn ManifestFetcher,
    url: &str,
    policy: &ManifestRetryPolicy,
) -> Result<EgressManifest, PostCallError> {
    tokio::time::sleep(policy.settle_delay).await;
    let attempts = policy.max_attempts.max(1);
    let mut backoff = policy.backoff;
    let mut attempt = 1;
    loop {
        match fetcher.fetch(url).await {
            Ok(manifest) => return Ok(manifest),
            Err(e) if attempt < attempts => {
                debug!(url, attempt, error=%e, "manifest not ready; retrying");
                tokio::time::sleep(backoff).await;
                backoff *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RecordingError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn failing_finalizers_do_not_stop_others() {
        let ran = Arc::new(AtomicU32::new(0));
        let mut finalizers = Finalizers::new();
        finalizers.register("fails", |_| async {
            Err(PostCallError::Recording(RecordingError::ManifestInvalid("x".into())))
        });
        finalizers.register("panics", |_| async {
            if true {
                panic!("boom");
            }
            Ok(())
        });
        let counter = ran.clone();
        finalizers.register("counts", move |_| async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let reports = finalizers
            .run_all(TeardownContext {
                connected: true,
                reason: "test".into(),
            })
            .await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(matches!(reports[0].outcome, FinalizerOutcome::Failed(_)));
        assert_eq!(reports[1].outcome, FinalizerOutcome::Panicked);
        assert_eq!(reports[2].outcome, FinalizerOutcome::Completed);
    }

    struct FlakyFetcher {
        calls: AtomicU32,
        succeed_on: u32,
    }

    #[async_trait]
    impl ManifestFetcher for FlakyFetcher {
        async fn fetch(&self, url: &str) -> Result<EgressManifest, RecordingError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.succeed_on {
                Ok(EgressManifest::default())
            } else {
                Err(RecordingError::ManifestUnavailable {
                    url: url.to_string(),
                    reason: "status 404".into(),
                })
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retry_waits_settle_then_backs_off() {
        let fetcher = FlakyFetcher {
            calls: AtomicU32::new(0),
            succeed_on: 3,
        };
        let policy = ManifestRetryPolicy {
            settle_delay: Duration::from_secs(20),
            max_attempts: 3,
            backoff: Duration::from_secs(5),
        };
        let started = tokio::time::Instant::now();
        fetch_with_retry(&fetcher, "https://m", &policy).await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(20 + 5 + 10));
        assert!(waited < Duration::from_secs(36));
    }

    #[tokio::test(start_paused = true)]
    async fn single_attempt_policy_gives_up_after_one_failure() {
        let fetcher = FlakyFetcher {
            calls: AtomicU32::new(0),
            succeed_on: 2,
        };
        let res = fetch_with_retry(&fetcher, "https://m", &ManifestRetryPolicy::default()).await;
        assert!(matches!(
            res,
            Err(PostCallError::Recording(RecordingError::ManifestUnavailable { .. }))
        ));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }
}
