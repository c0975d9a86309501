//! Gapless playback sequencing for live-session audio.
//!
//! Inbound buffers arrive in generation order but at unpredictable wall-clock
//! intervals. The scheduler keeps one cursor, the earliest permissible start
//! instant for the next buffer on the sink's clock, and pins every buffer to
//! `max(cursor, now)`: consecutive buffers touch exactly when data keeps up,
//! and producer lag turns into silence rather than overlap or reordering.
//!
//! The scheduler is a pass-through sequencer. It holds no queue of its own;
//! once a buffer is submitted to the sink it is the sink's to play out, and
//! cancelling pending audio means closing the sink.

use tracing::trace;

use super::pcm::DecodedBuffer;
use crate::error::{EmoBotError, Result};

/// An audio output device with its own clock.
///
/// `now` reports the device clock in seconds; `submit` hands over a buffer to
/// begin playing at `start_at` on that same clock. Implementations own all
/// buffering past this point.
pub trait AudioSink: Send {
    fn now(&self) -> f64;
    fn submit(&mut self, buffer: DecodedBuffer, start_at: f64) -> Result<()>;
}

/// Owns the lazily created output sink and the next-start cursor.
pub struct Playback {
    sink: Option<Box<dyn AudioSink>>,
    next_start: f64,
}

impl Playback {
    pub fn new() -> Self {
        Self {
            sink: None,
            next_start: 0.0,
        }
    }

    /// Lazily open the output sink. A second call is a no-op, so callers can
    /// invoke this on every path that might be first.
    pub fn ensure_sink<F>(&mut self, open: F) -> Result<()>
    where
        F: FnOnce() -> Result<Box<dyn AudioSink>>,
    {
        if self.sink.is_none() {
            self.sink = Some(open()?);
        }
        Ok(())
    }

    pub fn sink_ready(&self) -> bool {
        self.sink.is_some()
    }

    /// Snap the cursor to the sink clock's current time.
    ///
    /// Called whenever a live session (re)opens; the previous session's
    /// cursor is discarded rather than carried across sessions.
    pub fn reset_cursor(&mut self) -> Result<()> {
        let sink = self.sink.as_ref().ok_or(EmoBotError::DeviceNotReady)?;
        self.next_start = sink.now();
        Ok(())
    }

    /// Schedule one decoded buffer for gapless playback.
    ///
    /// Returns the start instant chosen on the sink clock. The cursor only
    /// advances after the sink accepts the buffer, and never moves backwards.
    pub fn schedule(&mut self, buffer: DecodedBuffer) -> Result<f64> {
        let sink = self.sink.as_mut().ok_or(EmoBotError::DeviceNotReady)?;
        let now = sink.now();
        let start_at = self.next_start.max(now);
        let duration = buffer.duration();
        sink.submit(buffer, start_at)?;
        self.next_start = start_at + duration;
        trace!(start_at, duration, cursor = self.next_start, "scheduled buffer");
        Ok(start_at)
    }

    pub fn next_start(&self) -> f64 {
        self.next_start
    }

    /// Current time on the sink clock.
    pub fn clock_now(&self) -> Result<f64> {
        let sink = self.sink.as_ref().ok_or(EmoBotError::DeviceNotReady)?;
        Ok(sink.now())
    }

    /// Drop the sink, abandoning any audio it still holds.
    pub fn close(&mut self) {
        self.sink = None;
    }
}

impl Default for Playback {
    fn default() -> Self {
        Self::new()
    }
}

/// Write-queue accounting for sinks that render scheduler gaps as silence.
///
/// Tracks the end instant of audio handed to the device, on the device
/// clock. The queue never ends earlier than the clock: after an underrun the
/// device plays new data immediately, so idle time is not bridged with
/// silence.
#[derive(Debug, Default)]
pub struct DeviceQueue {
    written_end: f64,
}

impl DeviceQueue {
    /// Seconds of silence to write before a buffer pinned at `start_at`.
    ///
    /// `frames_dropped` marks that the device discarded part of an earlier
    /// write, leaving the real queue end unknown; the clock is the only safe
    /// estimate then.
    pub fn lead_in(&mut self, now: f64, start_at: f64, frames_dropped: bool) -> f64 {
        if frames_dropped {
            self.written_end = now;
        }
        let queue_end = self.written_end.max(now);
        (start_at - queue_end).max(0.0)
    }

    /// Record a buffer handed to the device.
    pub fn advance(&mut self, start_at: f64, duration: f64) {
        self.written_end = start_at + duration;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::pcm::decode_pcm16;
    use std::sync::{Arc, Mutex};

    /// Sink double with a hand-advanced clock and a submission log.
    struct ManualSink {
        clock: Arc<Mutex<f64>>,
        submissions: Arc<Mutex<Vec<(f64, f64)>>>,
    }

    impl AudioSink for ManualSink {
        fn now(&self) -> f64 {
            *self.clock.lock().unwrap()
        }

        fn submit(&mut self, buffer: DecodedBuffer, start_at: f64) -> Result<()> {
            self.submissions
                .lock()
                .unwrap()
                .push((start_at, buffer.duration()));
            Ok(())
        }
    }

    fn playback_with_manual_sink() -> (Playback, Arc<Mutex<f64>>, Arc<Mutex<Vec<(f64, f64)>>>) {
        let clock = Arc::new(Mutex::new(0.0));
        let submissions = Arc::new(Mutex::new(Vec::new()));
        let mut playback = Playback::new();
        let sink = ManualSink {
            clock: clock.clone(),
            submissions: submissions.clone(),
        };
        playback.ensure_sink(|| Ok(Box::new(sink))).unwrap();
        (playback, clock, submissions)
    }

    /// 0.5 s of 24 kHz mono silence.
    fn half_second_buffer() -> DecodedBuffer {
        decode_pcm16(&vec![0u8; 24000], 24000, 1).unwrap()
    }

    #[test]
    fn schedule_without_sink_is_device_not_ready() {
        let mut playback = Playback::new();
        assert!(matches!(
            playback.schedule(half_second_buffer()),
            Err(EmoBotError::DeviceNotReady)
        ));
    }

    #[test]
    fn ensure_sink_is_idempotent() {
        let (mut playback, _, _) = playback_with_manual_sink();
        let mut called = false;
        playback
            .ensure_sink(|| {
                called = true;
                unreachable!("sink already open")
            })
            .unwrap();
        assert!(!called);
        assert!(playback.sink_ready());
    }

    #[test]
    fn early_second_buffer_is_delayed_not_overlapped() {
        let (mut playback, clock, submissions) = playback_with_manual_sink();
        playback.reset_cursor().unwrap();

        // First 0.5 s buffer arrives at t=0.0, second at t=0.3 while the
        // first is still playing.
        assert_eq!(playback.schedule(half_second_buffer()).unwrap(), 0.0);
        *clock.lock().unwrap() = 0.3;
        assert_eq!(playback.schedule(half_second_buffer()).unwrap(), 0.5);

        let log = submissions.lock().unwrap();
        assert_eq!(log.as_slice(), &[(0.0, 0.5), (0.5, 0.5)]);
    }

    #[test]
    fn lagging_producer_gets_silence_not_overlap() {
        let (mut playback, clock, _) = playback_with_manual_sink();
        playback.reset_cursor().unwrap();

        playback.schedule(half_second_buffer()).unwrap(); // cursor now 0.5
        assert_eq!(playback.next_start(), 0.5);

        // Next buffer only arrives at t=2.0: play immediately, accept the gap.
        *clock.lock().unwrap() = 2.0;
        assert_eq!(playback.schedule(half_second_buffer()).unwrap(), 2.0);
        assert_eq!(playback.next_start(), 2.5);
    }

    #[test]
    fn schedule_is_monotone_and_tight_under_jitter() {
        let (mut playback, clock, submissions) = playback_with_manual_sink();
        playback.reset_cursor().unwrap();

        // Arrival times with both bunching and lag.
        let arrivals = [0.0, 0.1, 0.2, 1.9, 1.95, 4.0];
        for &t in &arrivals {
            *clock.lock().unwrap() = t;
            playback.schedule(half_second_buffer()).unwrap();
        }

        let log = submissions.lock().unwrap();
        for window in log.windows(2) {
            let (prev_start, prev_dur) = window[0];
            let (next_start, _) = window[1];
            assert!(next_start >= prev_start + prev_dur, "overlap at {next_start}");
        }
        // No unnecessary delay: each start is exactly max(arrival, prev end).
        let mut expected_cursor = 0.0f64;
        for (&arrival, &(start, dur)) in arrivals.iter().zip(log.iter()) {
            assert_eq!(start, expected_cursor.max(arrival));
            expected_cursor = start + dur;
        }
    }

    #[test]
    fn cursor_resets_to_clock_on_session_open() {
        let (mut playback, clock, _) = playback_with_manual_sink();
        playback.reset_cursor().unwrap();
        playback.schedule(half_second_buffer()).unwrap();
        assert_eq!(playback.next_start(), 0.5);

        // Session restart at t=10: the old cursor is discarded.
        *clock.lock().unwrap() = 10.0;
        playback.reset_cursor().unwrap();
        assert_eq!(playback.next_start(), 10.0);
    }

    #[test]
    fn close_requires_reinit() {
        let (mut playback, _, _) = playback_with_manual_sink();
        playback.close();
        assert!(!playback.sink_ready());
        assert!(matches!(
            playback.schedule(half_second_buffer()),
            Err(EmoBotError::DeviceNotReady)
        ));
    }

    #[test]
    fn device_queue_bridges_only_real_gaps() {
        let mut queue = DeviceQueue::default();

        // Busy stream: buffers touch, no silence needed.
        assert_eq!(queue.lead_in(0.0, 0.0, false), 0.0);
        queue.advance(0.0, 0.5);
        assert_eq!(queue.lead_in(0.25, 0.5, false), 0.0);
        queue.advance(0.5, 0.5);

        // The next buffer is pinned past the queue end: bridge the gap.
        assert_eq!(queue.lead_in(0.75, 1.5, false), 0.5);
    }

    #[test]
    fn device_queue_does_not_bridge_idle_time() {
        let mut queue = DeviceQueue::default();
        queue.advance(0.0, 1.0);

        // Long idle, the device underran: writes play immediately, so a
        // buffer pinned at the current clock needs no lead-in.
        assert_eq!(queue.lead_in(32.0, 32.0, false), 0.0);
    }

    #[test]
    fn device_queue_resets_to_clock_after_dropped_frames() {
        let mut queue = DeviceQueue::default();
        queue.advance(0.0, 8.0);

        // The device dropped part of that write; the recorded end is a lie.
        // Accounting restarts from the clock.
        assert_eq!(queue.lead_in(2.0, 3.0, true), 1.0);
        queue.advance(3.0, 1.0);
        assert_eq!(queue.lead_in(3.5, 4.0, false), 0.0);
    }
}
