//! Wire shapes for the generative-AI service.
//!
//! Two surfaces share these types: the request/response `generateContent`
//! HTTP calls and the bidirectional live WebSocket. Field names follow the
//! service's camelCase JSON; optional fields are skipped when absent so
//! request bodies stay minimal.

use serde::{Deserialize, Serialize};

/// One part of a content turn: text, an inline binary payload, or a
/// reasoning-trace fragment flagged by the service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought: Option<bool>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn inline_data(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            inline_data: Some(InlineData {
                mime_type: mime_type.into(),
                data: data.into(),
            }),
            ..Default::default()
        }
    }
}

/// Base64 payload plus its MIME descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    pub parts: Vec<Part>,
}

impl Content {
    pub fn from_parts(parts: Vec<Part>) -> Self {
        Self { parts }
    }
}

// ---- generateContent request ----

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_config: Option<ToolConfig>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_config: Option<ThinkingConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_modalities: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThinkingConfig {
    pub thinking_budget: u32,
    pub include_thoughts: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

/// Grounding tool declarations. Serialized as `{"googleSearch": {}}` etc.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub google_search: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub google_maps: Option<serde_json::Value>,
}

impl Tool {
    pub fn google_search() -> Self {
        Self {
            google_search: Some(serde_json::json!({})),
            ..Default::default()
        }
    }

    pub fn google_maps() -> Self {
        Self {
            google_maps: Some(serde_json::json!({})),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfig {
    pub retrieval_config: RetrievalConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalConfig {
    pub lat_lng: LatLng,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct LatLng {
    pub latitude: f64,
    pub longitude: f64,
}

// ---- generateContent response ----

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

impl GenerateContentResponse {
    /// First non-thought text part of the first candidate.
    pub fn text(&self) -> Option<&str> {
        self.candidates.first().and_then(|c| {
            c.content.as_ref().and_then(|content| {
                content
                    .parts
                    .iter()
                    .find(|p| p.thought != Some(true))
                    .and_then(|p| p.text.as_deref())
            })
        })
    }

    /// First reasoning-trace part, if the model exposed one.
    pub fn thought(&self) -> Option<&str> {
        self.candidates.first().and_then(|c| {
            c.content.as_ref().and_then(|content| {
                content
                    .parts
                    .iter()
                    .find(|p| p.thought == Some(true))
                    .and_then(|p| p.text.as_deref())
            })
        })
    }

    /// First inline payload (TTS responses carry audio here).
    pub fn inline_data(&self) -> Option<&InlineData> {
        self.candidates.first().and_then(|c| {
            c.content
                .as_ref()
                .and_then(|content| content.parts.iter().find_map(|p| p.inline_data.as_ref()))
        })
    }

    /// Grounding citations of the first candidate, web and maps alike.
    pub fn citations(&self) -> Vec<Citation> {
        self.candidates
            .first()
            .and_then(|c| c.grounding_metadata.as_ref())
            .map(|gm| {
                gm.grounding_chunks
                    .iter()
                    .filter_map(|chunk| chunk.web.clone().or_else(|| chunk.maps.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub content: Option<Content>,
    pub grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroundingMetadata {
    #[serde(default)]
    pub grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroundingChunk {
    pub web: Option<Citation>,
    pub maps: Option<Citation>,
}

/// A grounded source reference shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub uri: String,
    #[serde(default)]
    pub title: Option<String>,
}

// ---- live session (bidirectional WebSocket) ----

/// First client frame after the socket opens.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupMessage {
    pub setup: Setup,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
}

/// Realtime audio input event: `{data: <base64>, mimeType: "audio/pcm;rate=16000"}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputMessage {
    pub realtime_input: RealtimeInput,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub audio: InlineData,
}

impl RealtimeInputMessage {
    pub fn audio(data: String, mime_type: impl Into<String>) -> Self {
        Self {
            realtime_input: RealtimeInput {
                audio: InlineData {
                    mime_type: mime_type.into(),
                    data,
                },
            },
        }
    }
}

/// One inbound live-session frame, optionally carrying inline audio.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveServerMessage {
    pub setup_complete: Option<serde_json::Value>,
    pub server_content: Option<ServerContent>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub turn_complete: bool,
}

impl LiveServerMessage {
    /// The embedded inline audio payload, if this frame has one.
    pub fn inline_audio(&self) -> Option<&InlineData> {
        self.server_content
            .as_ref()
            .and_then(|sc| sc.model_turn.as_ref())
            .and_then(|turn| turn.parts.iter().find_map(|p| p.inline_data.as_ref()))
    }

    /// Whether this frame marks the end of the model's turn.
    pub fn turn_complete(&self) -> bool {
        self.server_content
            .as_ref()
            .is_some_and(|sc| sc.turn_complete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn realtime_input_serializes_to_the_documented_shape() {
        let msg = RealtimeInputMessage::audio("AAAA".into(), "audio/pcm;rate=16000");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json["realtimeInput"]["audio"],
            serde_json::json!({"data": "AAAA", "mimeType": "audio/pcm;rate=16000"})
        );
    }

    #[test]
    fn tools_serialize_as_empty_objects() {
        let json = serde_json::to_value(Tool::google_search()).unwrap();
        assert_eq!(json, serde_json::json!({"googleSearch": {}}));
        let json = serde_json::to_value(Tool::google_maps()).unwrap();
        assert_eq!(json, serde_json::json!({"googleMaps": {}}));
    }

    #[test]
    fn response_accessors_skip_thought_parts() {
        let raw = serde_json::json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "weighing the request...", "thought": true},
                    {"text": "no."}
                ]}
            }]
        });
        let resp: GenerateContentResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(resp.text(), Some("no."));
        assert_eq!(resp.thought(), Some("weighing the request..."));
    }

    #[test]
    fn citations_merge_web_and_maps_chunks() {
        let raw = serde_json::json!({
            "candidates": [{
                "content": {"parts": [{"text": "found it"}]},
                "groundingMetadata": {"groundingChunks": [
                    {"web": {"uri": "https://a.example", "title": "A"}},
                    {"maps": {"uri": "https://maps.example/b", "title": "B"}},
                    {}
                ]}
            }]
        });
        let resp: GenerateContentResponse = serde_json::from_value(raw).unwrap();
        let citations = resp.citations();
        assert_eq!(citations.len(), 2);
        assert_eq!(citations[0].uri, "https://a.example");
        assert_eq!(citations[1].title.as_deref(), Some("B"));
    }

    #[test]
    fn live_message_extracts_inline_audio() {
        let raw = serde_json::json!({
            "serverContent": {
                "modelTurn": {"parts": [
                    {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "UEND"}}
                ]},
                "turnComplete": false
            }
        });
        let msg: LiveServerMessage = serde_json::from_value(raw).unwrap();
        assert_eq!(msg.inline_audio().unwrap().data, "UEND");
    }

    #[test]
    fn live_message_without_audio_is_fine() {
        let msg: LiveServerMessage = serde_json::from_str(r#"{"setupComplete": {}}"#).unwrap();
        assert!(msg.inline_audio().is_none());
        assert!(msg.setup_complete.is_some());
    }
}
