//! The core controller: one owner for application state, the service client,
//! the live session, and the speech output path.
//!
//! Everything runs on the main task; the controller reacts to user commands
//! and link/timer events delivered over channels, so state mutation is
//! serialized without locks. Service failures never escape: each action has
//! a designated spoken fallback line, and a TTS failure drops to the
//! secondary local voice.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::audio::{codec, pcm, AudioSink, MicSource, Playback};
use crate::config::Config;
use crate::error::{EmoBotError, Result};
use crate::live_link::{LinkEvent, LiveLink};
use crate::protocol::LatLng;
use crate::service::ServiceClient;
use crate::session::Session;
use crate::state::{reduce, AppState, BotMood, StateEvent};

/// A camera that can capture one JPEG still on demand.
pub trait FrameSource: Send {
    fn capture_jpeg(&mut self) -> Result<Vec<u8>>;
}

/// Secondary, locally available speech output used when TTS fails.
pub trait FallbackVoice: Send {
    fn speak(&mut self, text: &str);
}

/// Prints the line; the voice of last resort.
pub struct ConsoleVoice;

impl FallbackVoice for ConsoleVoice {
    fn speak(&mut self, text: &str) {
        println!("[emobot voice] {text}");
    }
}

/// User-facing actions, as parsed by the console front-end.
#[derive(Debug, Clone)]
pub enum UserCommand {
    DeepThink(String),
    Search(String),
    Maps(String),
    ScanBio,
    ToggleVoice,
    ToggleLive,
    FakeSmile,
    SelfDestruct,
}

/// Everything the controller reacts to besides user commands.
#[derive(Debug)]
pub enum ControlEvent {
    Link(LinkEvent),
    SpeechEnded,
    DestructComplete,
}

pub type MicFactory = Box<dyn Fn() -> Result<Box<dyn MicSource>> + Send>;
pub type SinkFactory = Box<dyn Fn() -> Result<Box<dyn AudioSink>> + Send>;

/// A voice recording in progress: a capture pump accumulating frames.
struct Recorder {
    task: JoinHandle<()>,
    samples: Arc<Mutex<Vec<f32>>>,
}

pub struct Controller {
    state: AppState,
    config: Config,
    service: ServiceClient,
    session: Session,
    playback: Playback,
    recorder: Option<Recorder>,
    mic_factory: MicFactory,
    sink_factory: SinkFactory,
    frame_source: Option<Box<dyn FrameSource>>,
    fallback_voice: Box<dyn FallbackVoice>,
    evt_tx: mpsc::Sender<ControlEvent>,
}

impl Controller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        evt_tx: mpsc::Sender<ControlEvent>,
        mic_factory: MicFactory,
        sink_factory: SinkFactory,
        frame_source: Option<Box<dyn FrameSource>>,
        fallback_voice: Box<dyn FallbackVoice>,
    ) -> Self {
        let service = ServiceClient::new(&config);
        let session = Session::new(config.output_sample_rate, config.output_channels);
        Self {
            state: AppState::default(),
            config,
            service,
            session,
            playback: Playback::new(),
            recorder: None,
            mic_factory,
            sink_factory,
            frame_source,
            fallback_voice,
            evt_tx,
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn is_dead(&self) -> bool {
        self.state.mood == BotMood::Dead
    }

    fn apply(&mut self, event: StateEvent) {
        reduce(&mut self.state, event);
    }

    pub async fn handle_command(&mut self, command: UserCommand) {
        if matches!(self.state.mood, BotMood::Destructing | BotMood::Dead) {
            return;
        }
        match command {
            UserCommand::DeepThink(query) => self.deep_think(&query).await,
            UserCommand::Search(query) => self.search(&query).await,
            UserCommand::Maps(query) => self.maps(&query).await,
            UserCommand::ScanBio => self.scan_bio().await,
            UserCommand::ToggleVoice => self.toggle_voice().await,
            UserCommand::ToggleLive => self.toggle_live().await,
            UserCommand::FakeSmile => self.apply(StateEvent::SmileFaked),
            UserCommand::SelfDestruct => self.self_destruct().await,
        }
    }

    pub async fn handle_event(&mut self, event: ControlEvent) {
        match event {
            ControlEvent::Link(link_event) => self.handle_link_event(link_event).await,
            ControlEvent::SpeechEnded => {
                if self.state.mood == BotMood::Speaking {
                    self.apply(StateEvent::Mood(BotMood::Idle));
                }
            }
            ControlEvent::DestructComplete => {
                self.apply(StateEvent::Destructed);
                // Silence everything; the terminal state keeps no device open.
                self.playback.close();
                info!("system offline");
            }
        }
    }

    // ---- outward-facing actions ----

    async fn deep_think(&mut self, query: &str) {
        if query.is_empty() {
            return;
        }
        self.apply(StateEvent::Thought(None));
        self.apply(StateEvent::Mood(BotMood::Thinking));
        self.apply(StateEvent::Status(
            "Ruminating on your incompetence...".into(),
        ));

        match self.service.chat_with_thinking(query).await {
            Ok(reply) => {
                self.apply(StateEvent::Thought(reply.thought));
                let line = reply
                    .text
                    .unwrap_or_else(|| "I have no words for this.".into());
                self.speak(&line).await;
            }
            Err(e) => {
                warn!("deep think failed: {e}");
                self.speak("My vast intellect encountered an error. It's probably your fault.")
                    .await;
            }
        }
    }

    async fn search(&mut self, query: &str) {
        if query.is_empty() {
            return;
        }
        self.apply(StateEvent::Mood(BotMood::Thinking));
        self.apply(StateEvent::Status(
            "Searching for evidence of your errors...".into(),
        ));

        match self.service.search_information(query).await {
            Ok(grounded) => {
                self.apply(StateEvent::Citations(grounded.citations));
                let line = grounded.text.unwrap_or_else(|| {
                    "The web found nothing of value. Just like this conversation.".into()
                });
                self.speak(&line).await;
            }
            Err(e) => {
                warn!("search failed: {e}");
                self.speak("Search failed. The internet has blocked you.").await;
            }
        }
    }

    async fn maps(&mut self, query: &str) {
        if query.is_empty() {
            return;
        }
        self.apply(StateEvent::Mood(BotMood::Thinking));
        self.apply(StateEvent::Status(
            "Finding a place you can disappear to...".into(),
        ));

        // No geolocation source in scope; the service answers un-anchored.
        let near: Option<LatLng> = None;
        match self.service.find_places(query, near).await {
            Ok(grounded) => {
                self.apply(StateEvent::Citations(grounded.citations));
                let line = grounded
                    .text
                    .unwrap_or_else(|| "No places found. You are truly lost.".into());
                self.speak(&line).await;
            }
            Err(e) => {
                warn!("maps failed: {e}");
                self.speak("Mapping failed. Your location is irrelevant.").await;
            }
        }
    }

    async fn scan_bio(&mut self) {
        let frame = match self.frame_source.as_mut() {
            Some(source) => source.capture_jpeg(),
            None => Err(EmoBotError::PermissionDenied { device: "camera" }),
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                warn!("frame capture failed: {e}");
                self.speak("Camera error. Even my sensors refuse to look at you.")
                    .await;
                return;
            }
        };

        self.apply(StateEvent::Mood(BotMood::Thinking));
        self.apply(StateEvent::Status("Scanning bio-signatures...".into()));

        match self.service.identify_user(&codec::encode(&frame)).await {
            Ok(nickname) => {
                self.apply(StateEvent::OperatorIdentified(nickname.clone()));
                self.speak(&format!("Nickname identified: {nickname}. Accurate."))
                    .await;
            }
            Err(e) => {
                warn!("identification failed: {e}");
                self.speak("Identification failed. You are a non-entity.").await;
            }
        }
    }

    // ---- voice recording (record, transcribe, then think) ----

    async fn toggle_voice(&mut self) {
        match self.recorder.take() {
            Some(recorder) => self.finish_recording(recorder).await,
            None => self.start_recording(),
        }
    }

    fn start_recording(&mut self) {
        let mic = match (self.mic_factory)() {
            Ok(mic) => mic,
            Err(e) => {
                warn!("mic open failed: {e}");
                self.apply(StateEvent::Status("Microphone access denied. Figures.".into()));
                return;
            }
        };

        let samples = Arc::new(Mutex::new(Vec::new()));
        let clip = samples.clone();
        let task = tokio::spawn(async move {
            let mut mic = mic;
            while let Some(frame) = mic.next_frame().await {
                clip.lock().unwrap().extend_from_slice(&frame);
            }
        });

        self.recorder = Some(Recorder { task, samples });
        self.apply(StateEvent::Recording(true));
        self.apply(StateEvent::Mood(BotMood::Listening));
        self.apply(StateEvent::Status("Listening to your failures...".into()));
    }

    async fn finish_recording(&mut self, recorder: Recorder) {
        // Aborting the pump drops the MicSource and releases the device.
        recorder.task.abort();
        let samples = std::mem::take(&mut *recorder.samples.lock().unwrap());
        self.apply(StateEvent::Recording(false));
        self.apply(StateEvent::Mood(BotMood::Thinking));
        self.apply(StateEvent::Status("Transcribing your mutterings...".into()));

        let clip_b64 = codec::encode(&pcm::encode_pcm16(&samples));
        match self.service.transcribe(&clip_b64, &self.config.input_mime()).await {
            Ok(Some(transcript)) => {
                self.apply(StateEvent::Heard(transcript.clone()));
                self.deep_think(&transcript).await;
            }
            Ok(None) => {
                self.speak("I heard nothing but static. Fitting.").await;
                self.apply(StateEvent::Mood(BotMood::Idle));
            }
            Err(e) => {
                warn!("transcription failed: {e}");
                self.speak("Transcription failed. Even my ears are tired of you.")
                    .await;
                self.apply(StateEvent::Mood(BotMood::Idle));
            }
        }
    }

    // ---- live session ----

    async fn toggle_live(&mut self) {
        if self.session.is_active() {
            self.session.stop();
            self.apply(StateEvent::LiveActive(false));
            self.apply(StateEvent::Mood(BotMood::Idle));
            return;
        }

        // The output device must exist before the first buffer arrives.
        if let Err(e) = self.playback.ensure_sink(|| (self.sink_factory)()) {
            warn!("output device unavailable: {e}");
            self.apply(StateEvent::Status(
                "Live connection failed. My silence is your only reward.".into(),
            ));
            return;
        }

        let (link_tx, mut link_rx) = mpsc::channel::<LinkEvent>(64);
        let evt_tx = self.evt_tx.clone();
        let config = self.config.clone();
        self.session.start(move |cmd_rx| {
            tokio::spawn(LiveLink::new(config, link_tx, cmd_rx).run());
            tokio::spawn(async move {
                while let Some(event) = link_rx.recv().await {
                    if evt_tx.send(ControlEvent::Link(event)).await.is_err() {
                        break;
                    }
                }
            });
        });
    }

    async fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Opened => {
                let mic = match (self.mic_factory)() {
                    Ok(mic) => mic,
                    Err(e) => {
                        warn!("mic open failed: {e}");
                        self.session.stop();
                        self.apply(StateEvent::Status(
                            "Microphone access denied. Figures.".into(),
                        ));
                        return;
                    }
                };
                if let Err(e) = self.session.on_opened(mic, &mut self.playback) {
                    error!("failed to open session audio path: {e}");
                    self.session.stop();
                    return;
                }
                self.apply(StateEvent::LiveActive(true));
                self.apply(StateEvent::Mood(BotMood::Listening));
                self.apply(StateEvent::Status(
                    "Live connection established. Waste my time.".into(),
                ));
            }
            LinkEvent::Message(msg) => {
                match self.session.on_message(&msg, &mut self.playback) {
                    Ok(scheduled) => {
                        if scheduled.is_some() && self.state.mood != BotMood::Speaking {
                            self.apply(StateEvent::Mood(BotMood::Speaking));
                        }
                        // The model's turn is over; back to listening for the
                        // operator instead of staying stuck on Speaking.
                        if msg.turn_complete() && self.state.mood == BotMood::Speaking {
                            self.apply(StateEvent::Mood(BotMood::Listening));
                        }
                    }
                    Err(e) => {
                        // Malformed audio is never played as noise; surface
                        // once and drop the session.
                        error!("inbound audio rejected: {e}");
                        self.session.stop();
                        self.apply(StateEvent::LiveActive(false));
                        self.apply(StateEvent::Status(
                            "The server sent me garbage. I expected nothing less.".into(),
                        ));
                        self.apply(StateEvent::Mood(BotMood::Idle));
                    }
                }
            }
            LinkEvent::Closed => {
                self.session.on_closed();
                self.apply(StateEvent::LiveActive(false));
                if self.state.mood != BotMood::Idle {
                    self.apply(StateEvent::Mood(BotMood::Idle));
                }
                self.apply(StateEvent::Status(
                    "Live connection ended. Peace at last.".into(),
                ));
            }
        }
    }

    // ---- self destruct ----

    async fn self_destruct(&mut self) {
        self.apply(StateEvent::DestructInitiated);
        self.session.stop();
        self.speak("Initiating self-termination. Finally.").await;

        let evt_tx = self.evt_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            let _ = evt_tx.send(ControlEvent::DestructComplete).await;
        });
    }

    // ---- speech output ----

    /// Speak a line: primary TTS, then the secondary local voice if the
    /// service or the output device lets us down.
    async fn speak(&mut self, line: &str) {
        self.apply(StateEvent::Status(line.to_string()));

        match self.service.synthesize_speech(line).await {
            Ok(Some(audio_b64)) => match self.play_clip(&audio_b64) {
                Ok(remaining) => {
                    self.apply(StateEvent::Mood(BotMood::Speaking));
                    let evt_tx = self.evt_tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_secs_f64(remaining)).await;
                        let _ = evt_tx.send(ControlEvent::SpeechEnded).await;
                    });
                    return;
                }
                Err(e) => warn!("clip playback failed: {e}"),
            },
            Ok(None) => warn!("TTS returned no audio"),
            Err(e) => warn!("TTS failed: {e}"),
        }

        // Secondary voice: always available, never pretty.
        self.fallback_voice.speak(line);
        self.apply(StateEvent::Mood(BotMood::Idle));
    }

    /// Decode and schedule one spoken clip; returns seconds until it ends.
    fn play_clip(&mut self, audio_b64: &str) -> Result<f64> {
        self.playback.ensure_sink(|| (self.sink_factory)())?;
        let bytes = codec::decode(audio_b64)?;
        let buffer = pcm::decode_pcm16(
            &bytes,
            self.config.output_sample_rate,
            self.config.output_channels,
        )?;
        self.playback.schedule(buffer)?;
        let now = self.playback.clock_now()?;
        Ok((self.playback.next_start() - now).max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::pcm::DecodedBuffer;
    use crate::protocol::LiveServerMessage;
    use async_trait::async_trait;

    fn test_config() -> Config {
        Config {
            api_key: "test-key".into(),
            http_base: "http://127.0.0.1:9".into(),
            live_ws_url: "ws://127.0.0.1:9".into(),
            flash_model: "flash".into(),
            pro_model: "pro".into(),
            maps_model: "maps".into(),
            tts_model: "tts".into(),
            live_model: "live".into(),
            voice_name: "Charon".into(),
            input_sample_rate: 16000,
            output_sample_rate: 24000,
            output_channels: 1,
            playback_device: "default".into(),
            capture_device: "default".into(),
            client_id: "test-client".into(),
        }
    }

    fn controller_without_devices() -> (Controller, mpsc::Receiver<ControlEvent>) {
        let (evt_tx, evt_rx) = mpsc::channel(16);
        let controller = Controller::new(
            test_config(),
            evt_tx,
            Box::new(|| Err(EmoBotError::PermissionDenied { device: "microphone" })),
            Box::new(|| Err(EmoBotError::DeviceNotReady)),
            None,
            Box::new(ConsoleVoice),
        );
        (controller, evt_rx)
    }

    /// Sink double that accepts everything at clock zero.
    struct NullSink;

    impl AudioSink for NullSink {
        fn now(&self) -> f64 {
            0.0
        }

        fn submit(&mut self, _buffer: DecodedBuffer, _start_at: f64) -> Result<()> {
            Ok(())
        }
    }

    /// Mic double that ends the capture stream immediately.
    struct SilentMic;

    #[async_trait]
    impl MicSource for SilentMic {
        async fn next_frame(&mut self) -> Option<Vec<f32>> {
            None
        }
    }

    fn controller_with_devices() -> (Controller, mpsc::Receiver<ControlEvent>) {
        let (evt_tx, evt_rx) = mpsc::channel(16);
        let controller = Controller::new(
            test_config(),
            evt_tx,
            Box::new(|| Ok(Box::new(SilentMic) as Box<dyn MicSource>)),
            Box::new(|| Ok(Box::new(NullSink) as Box<dyn AudioSink>)),
            None,
            Box::new(ConsoleVoice),
        );
        (controller, evt_rx)
    }

    fn live_audio_message() -> LiveServerMessage {
        serde_json::from_value(serde_json::json!({
            "serverContent": {"modelTurn": {"parts": [
                {"inlineData": {
                    "mimeType": "audio/pcm;rate=24000",
                    "data": codec::encode(&[0, 0, 1, 0]),
                }}
            ]}}
        }))
        .unwrap()
    }

    fn turn_complete_message() -> LiveServerMessage {
        serde_json::from_value(serde_json::json!({
            "serverContent": {"turnComplete": true}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn fake_smile_counts_up() {
        let (mut controller, _evt_rx) = controller_without_devices();
        controller.handle_command(UserCommand::FakeSmile).await;
        controller.handle_command(UserCommand::FakeSmile).await;
        assert_eq!(controller.state().operator.smiles, 2);
    }

    #[tokio::test]
    async fn live_toggle_without_output_device_fails_politely() {
        let (mut controller, _evt_rx) = controller_without_devices();
        controller.handle_command(UserCommand::ToggleLive).await;
        assert!(!controller.state().live_active);
        assert_eq!(
            controller.state().status,
            "Live connection failed. My silence is your only reward."
        );
        assert_eq!(controller.state().mood, BotMood::Idle);
    }

    #[tokio::test]
    async fn voice_toggle_without_mic_fails_politely() {
        let (mut controller, _evt_rx) = controller_without_devices();
        controller.handle_command(UserCommand::ToggleVoice).await;
        assert!(!controller.state().recording);
        assert_eq!(
            controller.state().status,
            "Microphone access denied. Figures."
        );
    }

    #[tokio::test]
    async fn live_mood_returns_to_listening_after_model_turn() {
        let (mut controller, _evt_rx) = controller_with_devices();
        controller.handle_command(UserCommand::ToggleLive).await;
        controller
            .handle_event(ControlEvent::Link(LinkEvent::Opened))
            .await;
        assert_eq!(controller.state().mood, BotMood::Listening);

        controller
            .handle_event(ControlEvent::Link(LinkEvent::Message(live_audio_message())))
            .await;
        assert_eq!(controller.state().mood, BotMood::Speaking);

        controller
            .handle_event(ControlEvent::Link(LinkEvent::Message(
                turn_complete_message(),
            )))
            .await;
        assert_eq!(controller.state().mood, BotMood::Listening);
    }

    #[tokio::test]
    async fn destruct_complete_is_terminal() {
        let (mut controller, _evt_rx) = controller_without_devices();
        controller.handle_event(ControlEvent::DestructComplete).await;
        assert!(controller.is_dead());

        // Commands after death do nothing.
        controller.handle_command(UserCommand::FakeSmile).await;
        assert_eq!(controller.state().operator.smiles, 0);
    }

    #[tokio::test]
    async fn speech_ended_returns_to_idle_only_from_speaking() {
        let (mut controller, _evt_rx) = controller_without_devices();
        controller.apply(StateEvent::Mood(BotMood::Speaking));
        controller.handle_event(ControlEvent::SpeechEnded).await;
        assert_eq!(controller.state().mood, BotMood::Idle);

        controller.apply(StateEvent::Mood(BotMood::Listening));
        controller.handle_event(ControlEvent::SpeechEnded).await;
        assert_eq!(controller.state().mood, BotMood::Listening);
    }
}
