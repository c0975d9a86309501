//! WebSocket task for the bidirectional live session.
//!
//! One task per session: connect, send the setup frame, then pump commands
//! out and server messages in until either side closes. There is no
//! reconnect loop; a dropped link is surfaced once as `Closed` and the
//! orchestrator decides what the user hears about it.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Config;
use crate::protocol::{
    Content, GenerationConfig, LiveServerMessage, Part, RealtimeInputMessage, Setup, SetupMessage,
};

const LIVE_PERSONA: &str =
    "You are EmoBot in a live conversation. Be concise, moody, sarcastic, and extremely bored \
     with human existence. Use the voice provided to sound deep and robotic.";

#[derive(Debug)]
pub enum LinkEvent {
    Opened,
    Message(LiveServerMessage),
    Closed,
}

#[derive(Debug)]
pub enum LinkCommand {
    /// Base64-encoded PCM16 microphone frame.
    SendRealtimeAudio(String),
    Close,
}

pub struct LiveLink {
    config: Config,
    tx: mpsc::Sender<LinkEvent>,
    rx_cmd: mpsc::Receiver<LinkCommand>,
}

impl LiveLink {
    pub fn new(
        config: Config,
        tx: mpsc::Sender<LinkEvent>,
        rx_cmd: mpsc::Receiver<LinkCommand>,
    ) -> Self {
        Self { config, tx, rx_cmd }
    }

    pub async fn run(mut self) {
        if let Err(e) = self.connect_and_loop().await {
            warn!("live link ended with error: {e}");
        }
        // Always announce closure so the orchestrator can release capture.
        let _ = self.tx.send(LinkEvent::Closed).await;
    }

    async fn connect_and_loop(&mut self) -> anyhow::Result<()> {
        let url = Url::parse(&self.config.live_ws_url)?;
        let host = url.host_str().unwrap_or("generativelanguage.googleapis.com");

        let request = tokio_tungstenite::tungstenite::http::Request::builder()
            .method("GET")
            .uri(self.config.live_ws_url.as_str())
            .header("Host", host)
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header(
                "Sec-WebSocket-Key",
                tokio_tungstenite::tungstenite::handshake::client::generate_key(),
            )
            .header("x-goog-api-key", &self.config.api_key)
            .body(())?;

        info!("connecting live session to {host}...");
        let (ws_stream, _) = connect_async(request).await?;
        info!("live session connected");

        let (mut write, mut read) = ws_stream.split();

        let setup = SetupMessage {
            setup: Setup {
                model: format!("models/{}", self.config.live_model),
                generation_config: GenerationConfig {
                    response_modalities: Some(vec!["AUDIO".to_string()]),
                    ..Default::default()
                },
                system_instruction: Some(Content::from_parts(vec![Part::text(LIVE_PERSONA)])),
            },
        };
        write
            .send(Message::Text(serde_json::to_string(&setup)?.into()))
            .await?;

        self.tx.send(LinkEvent::Opened).await?;

        let input_mime = self.config.input_mime();

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.forward_server_frame(text.as_bytes()).await?;
                        }
                        // The service delivers JSON frames as binary too.
                        Some(Ok(Message::Binary(data))) => {
                            self.forward_server_frame(&data).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!("server closed live session: {frame:?}");
                            return Ok(());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => return Ok(()),
                    }
                }
                cmd = self.rx_cmd.recv() => {
                    match cmd {
                        Some(LinkCommand::SendRealtimeAudio(data)) => {
                            let event = RealtimeInputMessage::audio(data, input_mime.clone());
                            let json = serde_json::to_string(&event)?;
                            write.send(Message::Text(json.into())).await?;
                        }
                        Some(LinkCommand::Close) | None => {
                            let _ = write.send(Message::Close(None)).await;
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    async fn forward_server_frame(&self, raw: &[u8]) -> anyhow::Result<()> {
        match serde_json::from_slice::<LiveServerMessage>(raw) {
            Ok(msg) => self.tx.send(LinkEvent::Message(msg)).await?,
            Err(e) => debug!("ignoring unparseable live frame: {e}"),
        }
        Ok(())
    }
}
