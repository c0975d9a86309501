//! audio - transport codec, PCM interpretation, and playback scheduling.
//!
//! The live session's audio path runs entirely through this module:
//! inbound base64 payloads are decoded ([`codec`]), interpreted as PCM16
//! ([`pcm`]), and sequenced gaplessly onto the output sink ([`scheduler`]).
//! Hardware backends live behind the `alsa-audio` feature.

pub mod codec;
pub mod pcm;
pub mod scheduler;

#[cfg(feature = "alsa-audio")]
pub mod alsa;

pub use pcm::{AudioChunk, DecodedBuffer};
pub use scheduler::{AudioSink, Playback};

use async_trait::async_trait;

/// A source of captured microphone frames.
///
/// Frames are normalized mono samples in capture order; `None` means capture
/// has ended. Dropping the source releases the device.
#[async_trait]
pub trait MicSource: Send {
    async fn next_frame(&mut self) -> Option<Vec<f32>>;
}
