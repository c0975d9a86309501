//! Live-session orchestration.
//!
//! At most one bidirectional session exists at a time. The session owns the
//! uplink path (microphone frames → PCM16 → transport codec → realtime input
//! events) and routes every inbound inline-audio payload through the decode
//! chain into the playback scheduler. All state transitions happen on the
//! controller thread; the link and microphone pump are spawned tasks that
//! only talk back over channels.

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::audio::{codec, pcm, AudioChunk, MicSource, Playback};
use crate::error::Result;
use crate::live_link::LinkCommand;
use crate::protocol::LiveServerMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Opening,
    Open,
    Closing,
}

pub struct Session {
    state: SessionState,
    cmd_tx: Option<mpsc::Sender<LinkCommand>>,
    mic_task: Option<JoinHandle<()>>,
    output_sample_rate: u32,
    output_channels: u16,
}

impl Session {
    pub fn new(output_sample_rate: u32, output_channels: u16) -> Self {
        Self {
            state: SessionState::Closed,
            cmd_tx: None,
            mic_task: None,
            output_sample_rate,
            output_channels,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Opening or Open; a session in either state refuses a second `start`.
    pub fn is_active(&self) -> bool {
        matches!(self.state, SessionState::Opening | SessionState::Open)
    }

    /// Begin opening a session. `spawn_link` receives the command receiver
    /// and is expected to spawn the link task. Returns `false` without side
    /// effects when a session is already active.
    pub fn start<F>(&mut self, spawn_link: F) -> bool
    where
        F: FnOnce(mpsc::Receiver<LinkCommand>),
    {
        if self.is_active() {
            debug!("session already active, start is a no-op");
            return false;
        }
        let (cmd_tx, cmd_rx) = mpsc::channel::<LinkCommand>(64);
        spawn_link(cmd_rx);
        self.cmd_tx = Some(cmd_tx);
        self.state = SessionState::Opening;
        true
    }

    /// The link reported open: snap the playback cursor to the output clock
    /// and start pumping microphone frames as realtime input events.
    pub fn on_opened(&mut self, mic: Box<dyn MicSource>, playback: &mut Playback) -> Result<()> {
        playback.reset_cursor()?;
        if let Some(cmd_tx) = self.cmd_tx.clone() {
            self.mic_task = Some(spawn_mic_pump(mic, cmd_tx));
        }
        self.state = SessionState::Open;
        info!("live session open");
        Ok(())
    }

    /// Route one inbound message. Returns the scheduled start instant when
    /// the message carried audio, `None` otherwise. Codec and PCM errors
    /// propagate; malformed data is never played as noise.
    pub fn on_message(
        &mut self,
        msg: &LiveServerMessage,
        playback: &mut Playback,
    ) -> Result<Option<f64>> {
        if msg.turn_complete() {
            debug!("model turn complete");
        }
        let Some(inline) = msg.inline_audio() else {
            return Ok(None);
        };
        let chunk = AudioChunk::new(
            Bytes::from(codec::decode(&inline.data)?),
            inline.mime_type.as_str(),
        );
        debug!(mime = %chunk.mime_type, bytes = chunk.data.len(), "inbound audio chunk");
        let buffer =
            pcm::decode_pcm16(&chunk.data, self.output_sample_rate, self.output_channels)?;
        if buffer.frames() == 0 {
            return Ok(None);
        }
        playback.schedule(buffer).map(Some)
    }

    /// Close the session. Idempotent: a second call finds nothing to tear
    /// down. Audio already handed to the sink keeps playing; the cursor is
    /// simply abandoned until the next open resets it.
    pub fn stop(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closing;
        if let Some(task) = self.mic_task.take() {
            // Aborting drops the MicSource, which releases the capture device.
            task.abort();
        }
        if let Some(cmd_tx) = self.cmd_tx.take() {
            let _ = cmd_tx.try_send(LinkCommand::Close);
        }
        self.state = SessionState::Closed;
        info!("live session closed");
    }

    /// The remote side closed the link.
    pub fn on_closed(&mut self) {
        self.stop();
    }
}

fn spawn_mic_pump(
    mut mic: Box<dyn MicSource>,
    cmd_tx: mpsc::Sender<LinkCommand>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = mic.next_frame().await {
            let bytes = pcm::encode_pcm16(&frame);
            let encoded = codec::encode(&bytes);
            if cmd_tx
                .send(LinkCommand::SendRealtimeAudio(encoded))
                .await
                .is_err()
            {
                break;
            }
        }
        debug!("mic pump finished");
    })
}
