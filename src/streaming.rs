//! # Streaming Transcription Handler
//!
//! Real-time transcription over a persistent WebSocket connection at `/ws`.
//!
//! ## Protocol:
//! - **Client → Server**: binary frames, each one complete chunk of canonical
//!   audio (mono, 16 kHz, little-endian f32 samples, typically a few seconds)
//! - **Server → Client**: one plain text frame per chunk with its
//!   transcription
//!
//! Chunks are transcribed independently; the session keeps no recognition
//! state between frames. Responses are strictly in arrival order: every
//! connection owns a FIFO channel drained by a single worker task, so only
//! one chunk is in flight at a time and results cannot overtake each other.
//!
//! ## Connection Lifecycle:
//! connect → receive/reply loop → closed (by either side, or by the server on
//! the first transport/transcription error). The actor's `stopped` hook runs
//! on every exit path and releases the session's bookkeeping.

use crate::audio::normalizer;
use crate::state::AppState;
use crate::transcription::SpeechRecognizer;
use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// How often the server pings an idle connection.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Connections silent for longer than this are dropped.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(90);

/// Outcome of transcribing one chunk, delivered back to the actor by the
/// session's worker task.
#[derive(Message)]
#[rtype(result = "()")]
struct ChunkResult(Result<String, String>);

/// One WebSocket transcription session.
///
/// Each connection is an independent actor; an error on one session closes
/// that connection only and never disturbs the listener or other sessions.
pub struct StreamSession {
    state: AppState,
    recognizer: Arc<dyn SpeechRecognizer>,

    /// Sending half of the session's chunk queue; dropped on stop so the
    /// worker task winds down with the connection.
    chunks: Option<mpsc::UnboundedSender<Vec<f32>>>,

    last_heartbeat: Instant,
}

impl StreamSession {
    pub fn new(state: AppState) -> Self {
        let recognizer: Arc<dyn SpeechRecognizer> = state.engine.clone();
        Self {
            state,
            recognizer,
            chunks: None,
            last_heartbeat: Instant::now(),
        }
    }
}

impl Actor for StreamSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("Streaming session connected");
        self.state.increment_active_streams();

        // Heartbeat: ping periodically, drop clients that stay silent.
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!("Streaming session heartbeat timeout, closing");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });

        // One worker per connection: chunks are processed strictly in the
        // order they arrived, one at a time.
        let (tx, rx) = mpsc::unbounded_channel();
        self.chunks = Some(tx);

        let recognizer = self.recognizer.clone();
        let addr = ctx.address();
        tokio::spawn(async move {
            transcribe_chunks(recognizer, rx, move |outcome| {
                let keep_going = outcome.is_ok();
                addr.do_send(ChunkResult(outcome));
                keep_going
            })
            .await;
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!("Streaming session closed");
        self.chunks = None;
        self.state.decrement_active_streams();
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for StreamSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Binary(data)) => match normalizer::chunk_to_samples(&data) {
                Ok(samples) => {
                    if let Some(tx) = &self.chunks {
                        if tx.send(samples).is_err() {
                            error!("Streaming worker is gone, closing session");
                            ctx.stop();
                        }
                    }
                }
                Err(err) => {
                    warn!("Closing streaming session: {}", err);
                    ctx.close(Some(ws::CloseReason {
                        code: ws::CloseCode::Invalid,
                        description: Some(err.to_string()),
                    }));
                    ctx.stop();
                }
            },
            Ok(ws::Message::Text(_)) => {
                warn!("Ignoring text frame; the streaming protocol is binary in, text out");
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!("Streaming session closed by client: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("Unexpected continuation frame on streaming session");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!("WebSocket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

impl Handler<ChunkResult> for StreamSession {
    type Result = ();

    fn handle(&mut self, msg: ChunkResult, ctx: &mut Self::Context) {
        match msg.0 {
            Ok(text) => ctx.text(text),
            Err(err) => {
                error!("Streaming transcription failed: {}", err);
                ctx.close(Some(ws::CloseReason {
                    code: ws::CloseCode::Error,
                    description: Some(err),
                }));
                ctx.stop();
            }
        }
    }
}

/// Drain `chunks` through the recognizer one at a time, delivering each
/// outcome in order. Stops when the channel closes or `deliver` returns
/// false (the session is closing after an error).
async fn transcribe_chunks<F>(
    recognizer: Arc<dyn SpeechRecognizer>,
    mut chunks: mpsc::UnboundedReceiver<Vec<f32>>,
    mut deliver: F,
) where
    F: FnMut(Result<String, String>) -> bool,
{
    while let Some(chunk) = chunks.recv().await {
        let outcome = recognizer
            .transcribe(&chunk)
            .await
            .map_err(|e| e.to_string());
        if !deliver(outcome) {
            break;
        }
    }
}

/// HTTP endpoint upgrading to the streaming WebSocket.
pub async fn stream_transcribe(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!(
        "New streaming connection request from {:?}",
        req.connection_info().peer_addr()
    );
    ws::start(StreamSession::new(state.get_ref().clone()), &req, stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Recognizer that labels each chunk by its sample count, with a delay
    /// inversely proportional to arrival order - if ordering were not
    /// enforced, later chunks would finish first.
    struct SlowFirstRecognizer;

    #[async_trait]
    impl SpeechRecognizer for SlowFirstRecognizer {
        async fn transcribe(&self, samples: &[f32]) -> anyhow::Result<String> {
            let delay = 40_u64.saturating_sub(10 * samples.len() as u64);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(format!("chunk-{}", samples.len()))
        }
    }

    /// Recognizer that fails on two-sample chunks.
    struct PickyRecognizer;

    #[async_trait]
    impl SpeechRecognizer for PickyRecognizer {
        async fn transcribe(&self, samples: &[f32]) -> anyhow::Result<String> {
            if samples.len() == 2 {
                Err(anyhow::anyhow!("bad chunk"))
            } else {
                Ok(format!("chunk-{}", samples.len()))
            }
        }
    }

    #[tokio::test]
    async fn test_chunks_are_answered_in_arrival_order() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(vec![0.0; 1]).unwrap();
        tx.send(vec![0.0; 2]).unwrap();
        tx.send(vec![0.0; 3]).unwrap();
        drop(tx);

        let mut delivered = Vec::new();
        transcribe_chunks(Arc::new(SlowFirstRecognizer), rx, |outcome| {
            delivered.push(outcome.unwrap());
            true
        })
        .await;

        assert_eq!(delivered, vec!["chunk-1", "chunk-2", "chunk-3"]);
    }

    #[tokio::test]
    async fn test_worker_stops_after_failed_chunk() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(vec![0.0; 1]).unwrap();
        tx.send(vec![0.0; 2]).unwrap(); // fails
        tx.send(vec![0.0; 3]).unwrap(); // must never be processed
        drop(tx);

        let mut delivered = Vec::new();
        transcribe_chunks(Arc::new(PickyRecognizer), rx, |outcome| {
            let keep_going = outcome.is_ok();
            delivered.push(outcome);
            keep_going
        })
        .await;

        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0].as_deref(), Ok("chunk-1"));
        assert!(delivered[1].is_err());
    }
}
