//! Mapping of requested sample rates and buffer sizes onto the three fixed
//! hardware clocks.
//!
//! Below 24 MS/s the hardware floor of 240 kS/s is too fast for slow signals,
//! so the capture is stretched: the acquisition loop reads `multiplier` times
//! as many bytes per frame.

use crate::device_model::CHANNELS;

/// Requests above this get the 48 MS/s clock
const FAST_TIER_THRESHOLD: u64 = 240_000_000;
/// Requests above this (and up to the fast threshold) get the 2.4 MS/s clock
const MEDIUM_TIER_THRESHOLD: u64 = 24_000_000;
/// Numerator of the buffer stretch for the slow tier
const STRETCH_NUMERATOR: u64 = 1_179_648;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TimebaseError {
    #[error("Sample rate must be greater than zero")]
    ZeroRate,
}

/// The three sample clocks of the hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareRate {
    Msps48,
    Msps2_4,
    Ksps240,
}

impl HardwareRate {
    pub fn hz(self) -> u64 {
        match self {
            Self::Msps48 => 48_000_000,
            Self::Msps2_4 => 2_400_000,
            Self::Ksps240 => 240_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleRateSetting {
    pub hardware: HardwareRate,
    /// Buffer stretch factor, always >= 1
    pub multiplier: u64,
    /// Achieved sample rate in S/s
    pub achieved: u64,
    /// `max_rate / achieved`
    pub divider: u64,
}

impl SampleRateSetting {
    pub fn for_requested(requested: u64, max_rate: u64) -> Result<Self, TimebaseError> {
        if requested == 0 {
            return Err(TimebaseError::ZeroRate);
        }

        let (hardware, multiplier) = if requested > FAST_TIER_THRESHOLD {
            (HardwareRate::Msps48, 1)
        } else if requested > MEDIUM_TIER_THRESHOLD {
            (HardwareRate::Msps2_4, 1)
        } else {
            (HardwareRate::Ksps240, STRETCH_NUMERATOR / requested + 1)
        };

        let achieved = hardware.hz();
        Ok(Self {
            hardware,
            multiplier,
            achieved,
            divider: (max_rate / achieved).max(1),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferSize {
    Small,
    Large,
}

impl BufferSize {
    pub fn for_requested(requested: u64) -> Self {
        if requested <= Self::Small.samples() {
            Self::Small
        } else {
            Self::Large
        }
    }

    pub fn samples(self) -> u64 {
        match self {
            Self::Small => 2048,
            Self::Large => 32768,
        }
    }
}

/// Current timebase as shared between the control surface and the acquisition loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timebase {
    pub rate: SampleRateSetting,
    pub buffer_size: BufferSize,
    /// Maximum sample rate of the current setup in S/s
    pub max_rate: u64,
}

impl Timebase {
    pub fn new(max_rate: u64) -> Self {
        Self {
            rate: SampleRateSetting {
                hardware: HardwareRate::Msps2_4,
                multiplier: 1,
                achieved: HardwareRate::Msps2_4.hz(),
                divider: (max_rate / HardwareRate::Msps2_4.hz()).max(1),
            },
            buffer_size: BufferSize::Small,
            max_rate,
        }
    }

    /// Bytes to request from the device for one frame
    pub fn capture_bytes(&self) -> u64 {
        self.buffer_size.samples() * CHANNELS as u64 * self.rate.multiplier
    }

    /// Sample rate reported alongside published samples
    pub fn effective_rate(&self) -> f64 {
        self.max_rate as f64 / self.rate.divider as f64
    }
}
