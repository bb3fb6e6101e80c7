//! Typed events emitted by the session client.
//!
//! Everything the remote agent does reaches the rest of the system as one
//! ordered stream of these events, consumed by a single handler loop. The
//! capture callback is the only thing that runs outside that loop.

use crate::pcm::AudioFrame;
use crate::session::wire::{ServerMessage, ToolCall};

#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// Setup acknowledged; the agent is listening.
    Opened,
    /// One block of synthesized speech.
    AudioChunk(AudioFrame),
    /// Partial transcript text for the current agent turn.
    TextChunk(String),
    /// A batch of tool calls. Every call must be acknowledged before the
    /// agent's turn can progress.
    ToolCalls(Vec<ToolCall>),
    /// The agent finished its turn.
    TurnComplete,
    /// The customer spoke over the agent; buffered playback is stale.
    Interrupted,
    /// Agent-reported failure. Terminal for the session.
    Error(String),
    /// The connection is gone. Always the last event.
    Closed,
}

/// Expands one wire message into the events it carries, in produced order.
///
/// A `serverContent` may carry several fields at once; interruption comes
/// first since it invalidates earlier buffers, then new audio, text, and
/// the turn boundary. An audio chunk that fails to decode is logged and
/// dropped without disturbing the rest of the message.
pub fn events_from_server(message: ServerMessage, next_seq: &mut u64) -> Vec<AgentEvent> {
    match message {
        ServerMessage::SetupComplete(_) => vec![AgentEvent::Opened],
        ServerMessage::ToolCall(batch) => vec![AgentEvent::ToolCalls(batch.function_calls)],
        ServerMessage::Error(err) => vec![AgentEvent::Error(err.message)],
        ServerMessage::ServerContent(content) => {
            let mut events = Vec::new();
            if content.interrupted {
                events.push(AgentEvent::Interrupted);
            }
            if let Some(chunk) = content.audio {
                match AudioFrame::from_chunk(*next_seq, &chunk) {
                    Ok(frame) => {
                        *next_seq += 1;
                        events.push(AgentEvent::AudioChunk(frame));
                    }
                    Err(e) => log::warn!("Dropping undecodable audio chunk: {e}"),
                }
            }
            if let Some(text) = content.text {
                events.push(AgentEvent::TextChunk(text));
            }
            if content.turn_complete {
                events.push(AgentEvent::TurnComplete);
            }
            events
        }
    }
}
