//! # Job Executor
//!
//! Runs transcription jobs off the request path. Submission handlers create
//! a job record, hand the work to the executor and return the id; everything
//! after that point happens in a background task owned by the executor.
//!
//! ## Guarantees:
//! - Remote sources are resolved to local files before the run step starts;
//!   a retrieval failure marks the job `failed`, it is never dropped
//! - Every source is normalized before the recognizer sees it
//! - Every failure (retrieval, decode, transcription) becomes a terminal
//!   `failed` status with a message - nothing escapes a job task to take the
//!   process down
//! - A temporary media file is removed exactly once on every path (RAII
//!   guard, see `media::TempAudioFile`)
//! - Exactly one terminal update per job: one owning task per id, and the
//!   store rejects double writes as a backstop
//!
//! ## Concurrency:
//! A semaphore bounds how many jobs run at once; submissions beyond the cap
//! queue inside their task while the record stays visible as `processing`.
//! Abort handles for running tasks are retained so cancellation or timeouts
//! can be added without restructuring.

use crate::audio::normalizer;
use crate::error::AppError;
use crate::jobs::store::{JobOutcome, JobStore};
use crate::media::{MediaRetriever, TempAudioFile};
use crate::transcription::SpeechRecognizer;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info};

/// An audio source handed over by a submission handler.
pub enum Submission {
    /// In-memory payload from a local file upload
    Upload(Vec<u8>),

    /// Remote media URL; resolved to a local file before the run step
    Remote(String),
}

/// A resolved source the run step consumes: either an in-memory buffer or an
/// owned file on local disk.
enum AudioSource {
    Buffer(Vec<u8>),
    File(TempAudioFile),
}

pub struct JobExecutor {
    store: Arc<JobStore>,
    recognizer: Arc<dyn SpeechRecognizer>,
    retriever: Arc<MediaRetriever>,
    limiter: Arc<Semaphore>,
    running: Arc<DashMap<String, AbortHandle>>,
}

impl JobExecutor {
    pub fn new(
        store: Arc<JobStore>,
        recognizer: Arc<dyn SpeechRecognizer>,
        retriever: Arc<MediaRetriever>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            store,
            recognizer,
            retriever,
            limiter: Arc::new(Semaphore::new(max_concurrent)),
            running: Arc::new(DashMap::new()),
        }
    }

    /// Schedule a job for background execution and return its task handle.
    ///
    /// The caller must have created `id` in the store already; this method
    /// never blocks on retrieval or transcription. The returned handle is
    /// mainly useful to tests; the executor keeps its own abort handle per
    /// job as the hook point for future cancellation support.
    pub fn submit(&self, id: String, submission: Submission) -> JoinHandle<()> {
        // Drop bookkeeping for tasks that already finished.
        self.running.retain(|_, handle| !handle.is_finished());

        let store = self.store.clone();
        let recognizer = self.recognizer.clone();
        let retriever = self.retriever.clone();
        let limiter = self.limiter.clone();
        let running = self.running.clone();
        let task_id = id.clone();

        let handle = tokio::spawn(async move {
            // Queue behind the concurrency cap. The record is already visible
            // as `processing`, so waiting here is invisible to clients beyond
            // added latency.
            let _permit = match limiter.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    // Semaphore closed - only happens during teardown.
                    let _ = store.update(
                        &task_id,
                        JobOutcome::Failed("service is shutting down".to_string()),
                    );
                    return;
                }
            };

            debug!("Job {} started", task_id);
            let result = match Self::resolve(&retriever, submission).await {
                Ok(source) => Self::execute(&*recognizer, source).await,
                Err(err) => Err(err),
            };

            let outcome = match result {
                Ok(text) => {
                    info!("Job {} completed ({} chars)", task_id, text.len());
                    JobOutcome::Completed(text)
                }
                Err(err) => {
                    let message = err.to_string();
                    info!("Job {} failed: {}", task_id, message);
                    JobOutcome::Failed(message)
                }
            };

            // A rejected update here means a second terminal write for this
            // id - a bug worth shouting about, but never worth crashing over.
            if let Err(err) = store.update(&task_id, outcome) {
                error!("Job {}: terminal update rejected: {}", task_id, err);
            }

            running.remove(&task_id);
        });

        self.running.insert(id, handle.abort_handle());
        handle
    }

    /// Number of jobs currently queued or running.
    pub fn running_jobs(&self) -> usize {
        self.running
            .iter()
            .filter(|entry| !entry.value().is_finished())
            .count()
    }

    /// Turn a submission into a local audio source. Remote URLs are fetched
    /// here, before the run step begins.
    async fn resolve(
        retriever: &MediaRetriever,
        submission: Submission,
    ) -> Result<AudioSource, AppError> {
        match submission {
            Submission::Upload(bytes) => Ok(AudioSource::Buffer(bytes)),
            Submission::Remote(url) => Ok(AudioSource::File(retriever.fetch(&url).await?)),
        }
    }

    /// Normalize the source and run recognition.
    ///
    /// A file source lives exactly as long as its match arm; both the
    /// success path and every error path drop (and thereby remove) it before
    /// this function returns.
    async fn execute(
        recognizer: &dyn SpeechRecognizer,
        source: AudioSource,
    ) -> Result<String, AppError> {
        let samples = match source {
            AudioSource::Buffer(bytes) => normalizer::wav_bytes_to_mono_16k(&bytes)?,
            AudioSource::File(media) => normalizer::file_to_mono_16k(media.path())?,
        };

        recognizer
            .transcribe(&samples)
            .await
            .map_err(|e| AppError::Transcription(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MediaConfig;
    use crate::jobs::store::JobStatus;
    use async_trait::async_trait;
    use std::io::Cursor;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Recognizer that reports how many samples it saw.
    struct EchoRecognizer;

    #[async_trait]
    impl SpeechRecognizer for EchoRecognizer {
        async fn transcribe(&self, samples: &[f32]) -> anyhow::Result<String> {
            Ok(format!("len={}", samples.len()))
        }
    }

    /// Recognizer that always fails.
    struct BrokenRecognizer;

    #[async_trait]
    impl SpeechRecognizer for BrokenRecognizer {
        async fn transcribe(&self, _samples: &[f32]) -> anyhow::Result<String> {
            Err(anyhow::anyhow!("engine exploded"))
        }
    }

    /// Recognizer that tracks how many transcriptions overlap.
    struct CountingRecognizer {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl SpeechRecognizer for CountingRecognizer {
        async fn transcribe(&self, _samples: &[f32]) -> anyhow::Result<String> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(25)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(String::new())
        }
    }

    fn executor_with(
        recognizer: Arc<dyn SpeechRecognizer>,
        max_concurrent: usize,
    ) -> (Arc<JobStore>, JobExecutor) {
        let store = Arc::new(JobStore::new());
        let retriever = Arc::new(
            MediaRetriever::new(&MediaConfig {
                request_timeout_secs: 5,
                max_download_bytes: 1024 * 1024,
            })
            .unwrap(),
        );
        let executor = JobExecutor::new(store.clone(), recognizer, retriever, max_concurrent);
        (store, executor)
    }

    fn silent_wav(samples: usize) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut buffer, spec).unwrap();
            for _ in 0..samples {
                writer.write_sample(0_i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        buffer.into_inner()
    }

    /// Builds a TempAudioFile the way the retriever would, pointing at a
    /// file this test writes itself.
    fn temp_media(dir: &Path, contents: &[u8]) -> TempAudioFile {
        let media = TempAudioFile::for_tests(dir);
        std::fs::write(media.path(), contents).unwrap();
        media
    }

    #[tokio::test]
    async fn test_upload_job_completes() {
        let (store, executor) = executor_with(Arc::new(EchoRecognizer), 4);

        let id = store.create();
        executor
            .submit(id.clone(), Submission::Upload(silent_wav(16_000)))
            .await
            .unwrap();

        let record = store.get(&id).unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.result.as_deref(), Some("len=16000"));
        assert!(record.error.is_none());
    }

    #[tokio::test]
    async fn test_malformed_upload_fails_with_decode_message() {
        let (store, executor) = executor_with(Arc::new(EchoRecognizer), 4);

        let id = store.create();
        executor
            .submit(
                id.clone(),
                Submission::Upload(b"this is not audio".to_vec()),
            )
            .await
            .unwrap();

        let record = store.get(&id).unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        let message = record.error.unwrap();
        assert!(message.contains("Decode"), "got: {}", message);
        assert!(!message.is_empty());
    }

    #[tokio::test]
    async fn test_engine_failure_marks_job_failed() {
        let (store, executor) = executor_with(Arc::new(BrokenRecognizer), 4);

        let id = store.create();
        executor
            .submit(id.clone(), Submission::Upload(silent_wav(16_000)))
            .await
            .unwrap();

        let record = store.get(&id).unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.error.unwrap().contains("engine exploded"));
    }

    #[tokio::test]
    async fn test_failed_retrieval_marks_job_failed() {
        let (store, executor) = executor_with(Arc::new(EchoRecognizer), 4);

        let id = store.create();
        // Port 1 on loopback refuses connections immediately.
        executor
            .submit(
                id.clone(),
                Submission::Remote("http://127.0.0.1:1/clip.wav".to_string()),
            )
            .await
            .unwrap();

        let record = store.get(&id).unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.error.unwrap().contains("Retrieval"));
    }

    #[tokio::test]
    async fn test_temp_file_removed_after_success() {
        let dir = tempfile::tempdir().unwrap();
        let media = temp_media(dir.path(), &silent_wav(16_000));
        let path = media.path().to_path_buf();

        let result = JobExecutor::execute(&EchoRecognizer, AudioSource::File(media)).await;

        assert_eq!(result.unwrap(), "len=16000");
        assert!(!path.exists(), "temp file must be gone after completion");
    }

    #[tokio::test]
    async fn test_temp_file_removed_after_decode_failure() {
        let dir = tempfile::tempdir().unwrap();
        let media = temp_media(dir.path(), b"garbage, not audio");
        let path = media.path().to_path_buf();

        let result = JobExecutor::execute(&EchoRecognizer, AudioSource::File(media)).await;

        assert!(result.is_err());
        assert!(!path.exists(), "temp file must be gone after failure");
    }

    #[tokio::test]
    async fn test_temp_file_removed_after_engine_failure() {
        let dir = tempfile::tempdir().unwrap();
        let media = temp_media(dir.path(), &silent_wav(16_000));
        let path = media.path().to_path_buf();

        let result = JobExecutor::execute(&BrokenRecognizer, AudioSource::File(media)).await;

        assert!(result.is_err());
        assert!(!path.exists(), "temp file must be gone after engine failure");
    }

    #[tokio::test]
    async fn test_concurrency_cap_is_respected() {
        let counting = Arc::new(CountingRecognizer {
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        });
        let (store, executor) = executor_with(counting.clone(), 1);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let id = store.create();
            handles.push(executor.submit(id, Submission::Upload(silent_wav(16_000))));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(counting.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(store.counts().completed, 4);
    }
}
