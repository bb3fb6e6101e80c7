//! JSON wire model for the agent session.
//!
//! Every WebSocket text message is one externally tagged envelope, camelCase
//! on the wire. Outbound audio rides base64-encoded inside `audioInput`;
//! inbound audio arrives the same way inside `serverContent`. The declared
//! tool schemas are a fixed contract with the remote agent and must not
//! drift: `updateOrder` for incremental cart edits, `completeOrder` for
//! finalization.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Mime type for both audio directions.
pub const AUDIO_MIME: &str = "audio/pcm;rate=24000";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(SessionSetup),
    AudioInput(AudioInput),
    TextInput(TextInput),
    ToolResponse(ToolResponse),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSetup {
    pub instructions: String,
    pub voice: String,
    pub input_audio_format: AudioFormatSpec,
    pub output_audio_format: AudioFormatSpec,
    pub tools: Vec<ToolDeclaration>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFormatSpec {
    pub mime_type: String,
}

impl Default for AudioFormatSpec {
    fn default() -> Self {
        AudioFormatSpec {
            mime_type: AUDIO_MIME.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioInput {
    pub chunk: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextInput {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub results: Vec<ToolResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub id: String,
    pub response: Value,
}

impl ToolResult {
    /// The tool contract has no failure path; every call is acknowledged
    /// with success so the agent's turn can progress.
    pub fn success(id: impl Into<String>) -> Self {
        ToolResult {
            id: id.into(),
            response: json!({"success": true}),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ServerMessage {
    SetupComplete(SetupComplete),
    ServerContent(ServerContent),
    ToolCall(ToolCallMessage),
    Error(ServerError),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetupComplete {}

/// One chunk of an agent turn. Any combination of fields may be present;
/// `interrupted` means the customer spoke over the agent and everything
/// already buffered for playback is stale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub turn_complete: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub interrupted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallMessage {
    pub function_calls: Vec<ToolCall>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerError {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ClientMessage {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl ServerMessage {
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

/// The two tools the ordering agent may call. Shapes are part of the wire
/// contract with the remote side.
pub fn tool_declarations() -> Vec<ToolDeclaration> {
    vec![
        ToolDeclaration {
            name: "updateOrder".to_string(),
            description: "Add, update, or remove one item in the customer's cart. \
                          Call this immediately every time the cart changes."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "action": {
                        "type": "string",
                        "enum": ["add", "update", "remove"]
                    },
                    "item": {
                        "type": "object",
                        "properties": {
                            "name": {"type": "string"},
                            "variation": {"type": "string"},
                            "price": {"type": "number"},
                            "quantity": {"type": "integer"}
                        },
                        "required": ["name", "variation"]
                    }
                },
                "required": ["action", "item"]
            }),
        },
        ToolDeclaration {
            name: "completeOrder".to_string(),
            description: "Finalize the order once the customer confirms they are done. \
                          Include contact details, pickup or delivery, and the address \
                          when delivering."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "customerName": {"type": "string"},
                    "customerPhone": {"type": "string"},
                    "orderType": {
                        "type": "string",
                        "enum": ["pickup", "delivery"]
                    },
                    "deliveryAddress": {"type": "string"},
                    "summary": {"type": "string"}
                },
                "required": ["customerName", "customerPhone", "orderType", "summary"]
            }),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_envelope_shape() {
        let msg = ClientMessage::Setup(SessionSetup {
            instructions: "Take orders.".to_string(),
            voice: "amber".to_string(),
            input_audio_format: AudioFormatSpec::default(),
            output_audio_format: AudioFormatSpec::default(),
            tools: tool_declarations(),
        });
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["setup"]["voice"], "amber");
        assert_eq!(value["setup"]["inputAudioFormat"]["mimeType"], AUDIO_MIME);
        assert_eq!(value["setup"]["tools"][0]["name"], "updateOrder");
        assert_eq!(value["setup"]["tools"][1]["name"], "completeOrder");
    }

    #[test]
    fn test_audio_input_round_trip() {
        let msg = ClientMessage::AudioInput(AudioInput {
            chunk: "AAAA".to_string(),
        });
        let json = msg.to_json().unwrap();
        assert_eq!(json, r#"{"audioInput":{"chunk":"AAAA"}}"#);
        let back: ClientMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_tool_response_always_reports_success() {
        let msg = ClientMessage::ToolResponse(ToolResponse {
            results: vec![ToolResult::success("call-1"), ToolResult::success("call-2")],
        });
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        let results = value["toolResponse"]["results"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["id"], "call-1");
        assert_eq!(results[0]["response"]["success"], true);
    }

    #[test]
    fn test_server_content_with_partial_fields() {
        let msg =
            ServerMessage::from_json(r#"{"serverContent":{"text":"Hola","turnComplete":true}}"#)
                .unwrap();
        match msg {
            ServerMessage::ServerContent(content) => {
                assert_eq!(content.text.as_deref(), Some("Hola"));
                assert!(content.turn_complete);
                assert!(!content.interrupted);
                assert!(content.audio.is_none());
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_tool_call_batch_parses() {
        let raw = r#"{"toolCall":{"functionCalls":[
            {"id":"a","name":"updateOrder","args":{"action":"add","item":{"name":"Pozole","variation":"Chico"}}},
            {"id":"b","name":"completeOrder","args":{"orderType":"pickup"}}
        ]}}"#;
        match ServerMessage::from_json(raw).unwrap() {
            ServerMessage::ToolCall(batch) => {
                assert_eq!(batch.function_calls.len(), 2);
                assert_eq!(batch.function_calls[0].name, "updateOrder");
                assert_eq!(batch.function_calls[1].args["orderType"], "pickup");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_tool_call_without_args_defaults_to_null() {
        let raw = r#"{"toolCall":{"functionCalls":[{"id":"a","name":"updateOrder"}]}}"#;
        match ServerMessage::from_json(raw).unwrap() {
            ServerMessage::ToolCall(batch) => assert!(batch.function_calls[0].args.is_null()),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_setup_complete_parses() {
        assert!(matches!(
            ServerMessage::from_json(r#"{"setupComplete":{}}"#).unwrap(),
            ServerMessage::SetupComplete(_)
        ));
    }

    #[test]
    fn test_unknown_envelope_is_an_error() {
        assert!(ServerMessage::from_json(r#"{"somethingElse":{}}"#).is_err());
    }
}
