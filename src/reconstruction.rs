//! Turns one raw capture into calibrated, trigger-aligned channel waveforms.
//!
//! The capture is a flat byte buffer with the channels interleaved: byte `i`
//! belongs to channel `i % CHANNELS`. The first [`SKIP_BYTES`] bytes carry a
//! hardware glitch and are never displayed.
//!
//! The edge search runs on the trigger source only. It is a two phase search:
//! a gate that waits for a sample clearly on the starting side of the level
//! whose far look-ahead agrees with the slope, then a confirmation phase that
//! counts crossings. The first crossing becomes the trigger offset once enough
//! of them have been seen. All other channels start reading at the same offset
//! so they stay aligned to the same event.

use crate::calibration::CalibrationProfile;
use crate::device_model::CHANNELS;
use crate::publisher::SampleBuffers;
use crate::trigger_config::{TriggerSettings, TriggerTuning, LOOKAHEAD_SHIFTS};

/// Bytes skipped at the front of every capture. Even, so channel parity is kept.
pub const SKIP_BYTES: usize = 8;

/// Per-cycle configuration snapshot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleSettings {
    pub calibration: [CalibrationProfile; CHANNELS],
    pub trigger: TriggerSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Waveforms start at the confirmed edge, a byte offset into the capture
    Triggered { offset: usize },
    /// No edge found, waveforms start right after the skipped bytes
    FreeRun,
    /// No edge found and the trigger mode forbids free-running. Buffers untouched.
    Discarded,
}

/// Byte index of `channel` at `position`, wrapped around the capture
#[inline]
pub fn ring_index(position: usize, channel: usize, length: usize) -> usize {
    (position + channel) % length
}

#[derive(Debug, Default)]
pub struct ReconstructionEngine {
    tuning: TriggerTuning,
    /// Offset confirmed during the running cycle. Cleared when the cycle ends.
    confirmed_offset: Option<usize>,
}

impl ReconstructionEngine {
    pub fn new(tuning: TriggerTuning) -> Self {
        Self {
            tuning,
            confirmed_offset: None,
        }
    }

    pub fn tuning(&self) -> &TriggerTuning {
        &self.tuning
    }

    pub fn set_tuning(&mut self, tuning: TriggerTuning) {
        self.tuning = tuning;
    }

    /// Reconstruct all channels of `raw` into `buffers`
    pub fn reconstruct(
        &mut self,
        raw: &[u8],
        settings: &CycleSettings,
        buffers: &mut SampleBuffers,
    ) -> CycleOutcome {
        #[cfg(feature = "cpu-profiling")]
        let _span = tracy_client::Client::running()
            .map(|client| client.span(tracy_client::span_location!("reconstruct"), 0));

        let length = raw.len();
        let per_channel = (length / CHANNELS).saturating_sub(SKIP_BYTES);
        let source = settings.trigger.source % CHANNELS;

        self.confirmed_offset = self.find_trigger(raw, source, settings);
        let outcome = match self.confirmed_offset {
            Some(offset) => CycleOutcome::Triggered { offset },
            None if settings.trigger.mode.requires_trigger() => {
                log::trace!("No trigger in {} byte capture, frame dropped", length);
                return CycleOutcome::Discarded;
            }
            None => CycleOutcome::FreeRun,
        };

        // Start at the trigger source, the others follow its offset
        for channel in (0..CHANNELS).map(|k| (source + k) % CHANNELS) {
            let (mut position, count) = match self.confirmed_offset {
                Some(offset) => (offset, per_channel.saturating_sub(offset / CHANNELS)),
                None => (SKIP_BYTES, per_channel),
            };

            let profile = &settings.calibration[channel];
            for sample in buffers.prepare(channel, count) {
                *sample = profile.volts(raw[ring_index(position, channel, length)]);
                position += CHANNELS;
            }
        }

        self.confirmed_offset = None;
        outcome
    }

    /// Byte offset of the first confirmed edge within the first half of the capture
    fn find_trigger(&self, raw: &[u8], channel: usize, settings: &CycleSettings) -> Option<usize> {
        let length = raw.len();
        let window = length / CHANNELS / 2;
        let horizon = LOOKAHEAD_SHIFTS
            .iter()
            .map(|shift| length >> shift)
            .max()
            .unwrap_or(0);

        let profile = &settings.calibration[channel];
        let slope = settings.trigger.slope;
        let level = profile.trigger_level;

        let mut gate_open = false;
        let mut hits = 0;
        let mut first_hit = None;
        let mut previous = 0.0;
        let mut position = SKIP_BYTES;

        for _ in 0..window {
            let code = raw[ring_index(position, channel, length)];
            let value = profile.volts(code);

            if !gate_open
                && position + horizon + channel < length
                && slope.is_pre_crossing(value, level, self.tuning.deadband_volts)
            {
                let votes = LOOKAHEAD_SHIFTS
                    .iter()
                    .filter(|&&shift| slope.heads_toward(code, raw[position + (length >> shift) + channel]))
                    .count();
                gate_open = votes >= self.tuning.gate_votes;
            }

            if gate_open && slope.crossed(value, previous, level) {
                hits += 1;
                let first = *first_hit.get_or_insert(position);
                if hits >= self.tuning.confirm_hits {
                    log::trace!("Trigger confirmed at byte {} after {} hits", first, hits);
                    return Some(first);
                }
            }

            previous = value;
            position += CHANNELS;
        }

        None
    }
}
