//! WebSocket client for the live ordering agent.
//!
//! `connect` opens the socket, sends the session setup, and splits the
//! connection into a writer task fed by one outbound queue and a reader
//! task that turns wire messages into the ordered [`AgentEvent`] stream.
//! All sends are fire-and-forget appends to the queue, so the capture
//! callback can push audio without ever blocking on the network.

pub mod events;
pub mod wire;

pub use events::AgentEvent;

use crate::config::SessionConfig;
use crate::pcm::AudioFrame;
use events::events_from_server;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use wire::{
    tool_declarations, AudioFormatSpec, AudioInput, ClientMessage, ServerMessage, SessionSetup,
    TextInput, ToolResponse, ToolResult,
};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("WebSocket connection failed: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),
    #[error("Message serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Handle to a live agent session. Cloneable; all clones feed the same
/// outbound queue and observe the same open flag.
#[derive(Clone)]
pub struct AgentSession {
    outbound: mpsc::UnboundedSender<ClientMessage>,
    open: Arc<AtomicBool>,
    cancel: CancellationToken,
}

/// Opens the session: connects, sends setup, and starts the writer and
/// reader tasks. Events arrive on the returned receiver in server order,
/// starting with `Opened` once the agent acknowledges setup and ending
/// with `Closed`, or with `Error` when a fatal server error kills the
/// stream.
pub async fn connect(
    config: &SessionConfig,
    instructions: String,
) -> Result<(AgentSession, mpsc::Receiver<AgentEvent>), ClientError> {
    let mut url = config.endpoint.clone();
    url.query_pairs_mut().append_pair("key", config.api_key());

    log::info!("🔌 Connecting to ordering agent at {}", config.endpoint);
    let (ws_stream, _) = connect_async(url.as_str()).await?;
    let (mut write, mut read) = ws_stream.split();

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ClientMessage>();
    let (event_tx, event_rx) = mpsc::channel::<AgentEvent>(256);
    let open = Arc::new(AtomicBool::new(false));
    let cancel = CancellationToken::new();

    // Setup goes through the same queue as everything else, so it is
    // guaranteed to be the first message on the wire.
    let setup = ClientMessage::Setup(SessionSetup {
        instructions,
        voice: config.voice.clone(),
        input_audio_format: AudioFormatSpec::default(),
        output_audio_format: AudioFormatSpec::default(),
        tools: tool_declarations(),
    });
    let _ = outbound_tx.send(setup);

    let writer_cancel = cancel.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = writer_cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
                msg = outbound_rx.recv() => match msg {
                    Some(msg) => {
                        let json = match msg.to_json() {
                            Ok(json) => json,
                            Err(e) => {
                                log::warn!("Session: failed to serialize outbound message: {e}");
                                continue;
                            }
                        };
                        if write.send(Message::Text(json.into())).await.is_err() {
                            log::warn!("Session: send failed, connection is closing");
                            break;
                        }
                    }
                    None => {
                        let _ = write.close().await;
                        break;
                    }
                }
            }
        }
        log::debug!("Session: writer task finished");
    });

    let reader_cancel = cancel.clone();
    let reader_open = open.clone();
    tokio::spawn(async move {
        let mut next_seq = 0u64;
        loop {
            tokio::select! {
                _ = reader_cancel.cancelled() => {
                    let _ = event_tx.send(AgentEvent::Closed).await;
                    break;
                }
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        match ServerMessage::from_json(&text.to_string()) {
                            Ok(server_msg) => {
                                if matches!(server_msg, ServerMessage::SetupComplete(_)) {
                                    reader_open.store(true, Ordering::Release);
                                }
                                let mut fatal = false;
                                for event in events_from_server(server_msg, &mut next_seq) {
                                    fatal |= matches!(event, AgentEvent::Error(_));
                                    if event_tx.send(event).await.is_err() {
                                        fatal = true;
                                        break;
                                    }
                                }
                                if fatal {
                                    break;
                                }
                            }
                            // Unknown message shapes are skipped so a wire
                            // addition on the agent side cannot kill us.
                            Err(e) => log::warn!("Session: ignoring unparseable message: {e}"),
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        log::info!("Session: agent closed the connection: {frame:?}");
                        let _ = event_tx.send(AgentEvent::Closed).await;
                        break;
                    }
                    Some(Ok(_)) => {} // ping/pong/binary
                    Some(Err(e)) => {
                        log::error!("Session: WebSocket error: {e}");
                        let _ = event_tx.send(AgentEvent::Error(e.to_string())).await;
                        break;
                    }
                    None => {
                        let _ = event_tx.send(AgentEvent::Closed).await;
                        break;
                    }
                }
            }
        }
        reader_open.store(false, Ordering::Release);
        log::debug!("Session: reader task finished");
    });

    let session = AgentSession {
        outbound: outbound_tx,
        open,
        cancel,
    };
    Ok((session, event_rx))
}

impl AgentSession {
    /// Queues one captured frame. Fire-and-forget; a frame that cannot be
    /// queued is dropped, matching the lossy capture path.
    pub fn send_audio(&self, frame: &AudioFrame) {
        let msg = ClientMessage::AudioInput(AudioInput {
            chunk: frame.to_chunk(),
        });
        if self.outbound.send(msg).is_err() {
            log::debug!("Session: dropped audio frame {}, writer gone", frame.seq());
        }
    }

    /// Queues a text message (typed customer input or guidance prompts).
    pub fn send_text(&self, text: &str) {
        let msg = ClientMessage::TextInput(TextInput {
            text: text.to_string(),
        });
        if self.outbound.send(msg).is_err() {
            log::warn!("Session: failed to queue text, writer gone");
        }
    }

    /// Queues one acknowledgement batch. The whole batch rides in a single
    /// message so the agent never observes a partially answered turn.
    pub fn send_tool_results(&self, results: Vec<ToolResult>) {
        if results.is_empty() {
            return;
        }
        let count = results.len();
        let msg = ClientMessage::ToolResponse(ToolResponse { results });
        if self.outbound.send(msg).is_err() {
            log::warn!("Session: failed to queue {count} tool result(s), writer gone");
        }
    }

    /// True between the agent's setup acknowledgement and close/teardown.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.cancel.is_cancelled()
    }

    /// Tears the session down. Safe to call any number of times, from any
    /// task; the writer sends a close frame and both tasks wind down.
    pub fn close(&self) {
        if !self.cancel.is_cancelled() {
            log::info!("👋 Closing agent session");
        }
        self.open.store(false, Ordering::Release);
        self.cancel.cancel();
    }
}
