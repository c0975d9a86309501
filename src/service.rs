//! Request/response calls to the generative-AI service.
//!
//! Every outward call funnels through [`ServiceClient::generate`]; failures
//! of any kind (transport, HTTP status, body decode) surface as one
//! undifferentiated `Service` error, which the controller recovers with a
//! spoken fallback line. No retries here.

use reqwest::Client;
use tracing::debug;

use crate::config::Config;
use crate::error::{EmoBotError, Result};
use crate::protocol::{
    Citation, Content, GenerateContentRequest, GenerateContentResponse, GenerationConfig, LatLng,
    Part, PrebuiltVoiceConfig, RetrievalConfig, SpeechConfig, ThinkingConfig, Tool, ToolConfig,
    VoiceConfig,
};

const IDENTIFY_PROMPT: &str =
    "Look at this person and give them a mean, grumpy, 1-word nickname based on their vibe. \
     Only return the word.";
const CHAT_PERSONA: &str =
    "You are EmoBot. You are deep, dark, and highly intellectual but find everything exhausting. \
     You must use your thinking budget to consider how miserable the user's request is before \
     answering.";
const TRANSCRIBE_PROMPT: &str =
    "Transcribe this audio accurately. If there is no speech, say [silence].";
const SILENCE_SENTINEL: &str = "[silence]";
const FALLBACK_NICKNAME: &str = "Unidentifiable Blob";

/// A chat answer plus the auxiliary reasoning trace, when the model exposed one.
#[derive(Debug, Clone)]
pub struct Reply {
    pub text: Option<String>,
    pub thought: Option<String>,
}

/// A grounded answer with its source citations.
#[derive(Debug, Clone)]
pub struct Grounded {
    pub text: Option<String>,
    pub citations: Vec<Citation>,
}

pub struct ServiceClient {
    http: Client,
    http_base: String,
    api_key: String,
    flash_model: String,
    pro_model: String,
    maps_model: String,
    tts_model: String,
    voice_name: String,
}

impl ServiceClient {
    pub fn new(config: &Config) -> Self {
        Self {
            http: Client::new(),
            http_base: config.http_base.clone(),
            api_key: config.api_key.clone(),
            flash_model: config.flash_model.clone(),
            pro_model: config.pro_model.clone(),
            maps_model: config.maps_model.clone(),
            tts_model: config.tts_model.clone(),
            voice_name: config.voice_name.clone(),
        }
    }

    async fn generate(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse> {
        let url = format!("{}/models/{}:generateContent", self.http_base, model);
        debug!(model, "calling generateContent");

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| EmoBotError::Service(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmoBotError::Service(format!("HTTP {status}: {body}")));
        }

        response
            .json::<GenerateContentResponse>()
            .await
            .map_err(|e| EmoBotError::Service(format!("bad response body: {e}")))
    }

    /// Analyze a camera still and answer with a one-word nickname.
    pub async fn identify_user(&self, jpeg_b64: &str) -> Result<String> {
        let request = GenerateContentRequest {
            contents: vec![Content::from_parts(vec![
                Part::text(IDENTIFY_PROMPT),
                Part::inline_data("image/jpeg", jpeg_b64),
            ])],
            ..Default::default()
        };
        let response = self.generate(&self.flash_model, &request).await?;
        let name = response.text().map(str::trim).unwrap_or_default();
        Ok(if name.is_empty() {
            FALLBACK_NICKNAME.to_string()
        } else {
            name.to_string()
        })
    }

    /// Long-form generation with the reasoning-trace side channel enabled.
    pub async fn chat_with_thinking(&self, message: &str) -> Result<Reply> {
        let request = GenerateContentRequest {
            contents: vec![Content::from_parts(vec![Part::text(message)])],
            system_instruction: Some(Content::from_parts(vec![Part::text(CHAT_PERSONA)])),
            generation_config: Some(GenerationConfig {
                thinking_config: Some(ThinkingConfig {
                    thinking_budget: 32768,
                    include_thoughts: true,
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        let response = self.generate(&self.pro_model, &request).await?;
        Ok(Reply {
            text: response.text().map(str::to_string),
            thought: response.thought().map(str::to_string),
        })
    }

    /// Generation grounded against the web-search index.
    pub async fn search_information(&self, query: &str) -> Result<Grounded> {
        let request = GenerateContentRequest {
            contents: vec![Content::from_parts(vec![Part::text(query)])],
            tools: Some(vec![Tool::google_search()]),
            ..Default::default()
        };
        let response = self.generate(&self.flash_model, &request).await?;
        Ok(Grounded {
            text: response.text().map(str::to_string),
            citations: response.citations(),
        })
    }

    /// Generation grounded against the places index, optionally near a point.
    pub async fn find_places(&self, query: &str, near: Option<LatLng>) -> Result<Grounded> {
        let request = GenerateContentRequest {
            contents: vec![Content::from_parts(vec![Part::text(query)])],
            tools: Some(vec![Tool::google_maps()]),
            tool_config: near.map(|lat_lng| ToolConfig {
                retrieval_config: RetrievalConfig { lat_lng },
            }),
            ..Default::default()
        };
        let response = self.generate(&self.maps_model, &request).await?;
        Ok(Grounded {
            text: response.text().map(str::to_string),
            citations: response.citations(),
        })
    }

    /// Text-to-speech; returns the inline base64 audio payload (24 kHz mono
    /// PCM16), or `None` when the service answered without audio.
    pub async fn synthesize_speech(&self, text: &str) -> Result<Option<String>> {
        let prompt = format!("Say with a deep, monotone, depressed robotic voice: {text}");
        let request = GenerateContentRequest {
            contents: vec![Content::from_parts(vec![Part::text(prompt)])],
            generation_config: Some(GenerationConfig {
                response_modalities: Some(vec!["AUDIO".to_string()]),
                speech_config: Some(SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: self.voice_name.clone(),
                        },
                    },
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        let response = self.generate(&self.tts_model, &request).await?;
        Ok(response.inline_data().map(|d| d.data.clone()))
    }

    /// Transcribe a recorded clip. `None` means no speech was detected.
    pub async fn transcribe(&self, audio_b64: &str, mime_type: &str) -> Result<Option<String>> {
        let request = GenerateContentRequest {
            contents: vec![Content::from_parts(vec![
                Part::text(TRANSCRIBE_PROMPT),
                Part::inline_data(mime_type, audio_b64),
            ])],
            ..Default::default()
        };
        let response = self.generate(&self.flash_model, &request).await?;
        let transcript = response.text().map(str::trim).unwrap_or_default();
        if transcript.is_empty() || transcript == SILENCE_SENTINEL {
            Ok(None)
        } else {
            Ok(Some(transcript.to_string()))
        }
    }
}
