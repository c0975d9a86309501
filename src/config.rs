use anyhow::Context;
use tracing::{info, warn};
use uuid::Uuid;

const CLIENT_ID_FILE: &str = "emobot_client_id.txt";

/// Runtime configuration, read from the environment.
///
/// Only `EMOBOT_API_KEY` is required; everything else has a default matching
/// the service's current public surface. Audio parameters mirror the live
/// session contract: 16 kHz mono uplink, 24 kHz mono downlink.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub http_base: String,
    pub live_ws_url: String,

    pub flash_model: String,
    pub pro_model: String,
    pub maps_model: String,
    pub tts_model: String,
    pub live_model: String,
    pub voice_name: String,

    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub output_channels: u16,
    pub playback_device: String,
    pub capture_device: String,

    /// Client identity, persisted across restarts.
    pub client_id: String,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = std::env::var("EMOBOT_API_KEY")
            .context("EMOBOT_API_KEY is not set; the service client cannot authenticate")?;

        Ok(Self {
            api_key,
            http_base: env_or(
                "EMOBOT_HTTP_BASE",
                "https://generativelanguage.googleapis.com/v1beta",
            ),
            live_ws_url: env_or(
                "EMOBOT_LIVE_WS_URL",
                "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent",
            ),
            flash_model: env_or("EMOBOT_FLASH_MODEL", "gemini-3-flash-preview"),
            pro_model: env_or("EMOBOT_PRO_MODEL", "gemini-3-pro-preview"),
            maps_model: env_or("EMOBOT_MAPS_MODEL", "gemini-2.5-flash"),
            tts_model: env_or("EMOBOT_TTS_MODEL", "gemini-2.5-flash-preview-tts"),
            live_model: env_or(
                "EMOBOT_LIVE_MODEL",
                "gemini-2.5-flash-native-audio-preview-12-2025",
            ),
            voice_name: env_or("EMOBOT_VOICE", "Charon"),
            input_sample_rate: 16000,
            output_sample_rate: 24000,
            output_channels: 1,
            playback_device: env_or("EMOBOT_PLAYBACK_DEVICE", "default"),
            capture_device: env_or("EMOBOT_CAPTURE_DEVICE", "default"),
            client_id: load_or_create_client_id(),
        })
    }

    /// MIME descriptor for uplink microphone audio.
    pub fn input_mime(&self) -> String {
        format!("audio/pcm;rate={}", self.input_sample_rate)
    }
}

/// Generate-and-save on first run so the identity survives restarts.
fn load_or_create_client_id() -> String {
    if let Ok(content) = std::fs::read_to_string(CLIENT_ID_FILE) {
        let trimmed = content.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let id = Uuid::new_v4().to_string();
    match std::fs::write(CLIENT_ID_FILE, &id) {
        Ok(()) => info!(client_id = %id, "generated new client id"),
        Err(e) => warn!("failed to persist client id: {e}"),
    }
    id
}
