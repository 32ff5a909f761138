//! Runtime settings of the driver.
//!
//! Loaded from a TOML file, overridden by `BUUDAI_` prefixed environment
//! variables with `__` separating nested keys:
//!
//! ```text
//! BUUDAI_ACQUISITION__READ_ATTEMPTS=5
//! BUUDAI_TRIGGER__DEADBAND_VOLTS=0.05
//! ```
//!
//! Every field has a default, so an empty or missing file is valid.

use crate::calibration::{CalibrationError, CalibrationProfile};
use crate::device_model::CHANNELS;
use crate::trigger_config::{TriggerTuning, LOOKAHEAD_SHIFTS};
use crate::usb_transport::DEFAULT_ATTEMPTS;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Smallest capture that still holds one small buffer of both channels
const MIN_CAPTURE_BYTES: usize = 2048 * CHANNELS;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration load error: {0}")]
    Load(#[from] figment::Error),

    #[error("Invalid calibration: {0}")]
    Calibration(#[from] CalibrationError),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeSettings {
    pub acquisition: AcquisitionSettings,
    pub trigger: TriggerTuning,
    pub channels: [ChannelCalibration; CHANNELS],
    /// Events buffered per subscriber before new ones are dropped
    pub event_queue_depth: usize,
}

impl Default for ScopeSettings {
    fn default() -> Self {
        Self {
            acquisition: AcquisitionSettings::default(),
            trigger: TriggerTuning::default(),
            channels: [ChannelCalibration::factory(0), ChannelCalibration::factory(1)],
            event_queue_depth: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionSettings {
    /// Pause after each cycle when the capture is not stretched
    pub frame_interval_us: u64,
    /// Poll interval of an idle loop
    pub idle_poll_us: u64,
    pub read_attempts: u32,
    /// Upper bound for one capture, larger requests are clamped
    pub max_capture_bytes: usize,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            frame_interval_us: 32_768,
            idle_poll_us: 1_000,
            read_attempts: DEFAULT_ATTEMPTS,
            max_capture_bytes: 64 * 1024 * 1024,
        }
    }
}

impl AcquisitionSettings {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_micros(self.frame_interval_us)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_micros(self.idle_poll_us)
    }
}

/// Stored calibration of one channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelCalibration {
    /// ADC code at full scale
    pub sample_range: u16,
    /// ADC code of 0 V
    pub zero_code: f64,
    pub calibration_factor: f64,
}

impl ChannelCalibration {
    pub fn factory(channel: usize) -> Self {
        let profile = CalibrationProfile::factory(channel);
        Self {
            sample_range: u16::from(profile.sample_range()),
            zero_code: profile.real_offset() * f64::from(profile.sample_range()),
            calibration_factor: profile.calibration_factor(),
        }
    }

    pub fn profile(&self) -> Result<CalibrationProfile, CalibrationError> {
        CalibrationProfile::new(
            self.sample_range,
            self.zero_code / f64::from(self.sample_range),
            self.calibration_factor,
        )
    }
}

impl ScopeSettings {
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let settings: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("BUUDAI_").split("__"))
            .extract()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.acquisition.read_attempts == 0 {
            return Err(ConfigError::Validation(
                "read_attempts must be at least 1".to_string(),
            ));
        }
        if self.acquisition.max_capture_bytes < MIN_CAPTURE_BYTES {
            return Err(ConfigError::Validation(format!(
                "max_capture_bytes must be at least {}",
                MIN_CAPTURE_BYTES
            )));
        }
        if !(1..=LOOKAHEAD_SHIFTS.len()).contains(&self.trigger.gate_votes) {
            return Err(ConfigError::Validation(format!(
                "gate_votes must be between 1 and {}",
                LOOKAHEAD_SHIFTS.len()
            )));
        }
        if self.trigger.confirm_hits == 0 {
            return Err(ConfigError::Validation(
                "confirm_hits must be at least 1".to_string(),
            ));
        }
        if !self.trigger.deadband_volts.is_finite() || self.trigger.deadband_volts < 0.0 {
            return Err(ConfigError::Validation(
                "deadband_volts must be a non-negative number".to_string(),
            ));
        }
        for channel in &self.channels {
            channel.profile()?;
        }
        Ok(())
    }

    pub fn calibration_profiles(&self) -> Result<[CalibrationProfile; CHANNELS], ConfigError> {
        Ok([self.channels[0].profile()?, self.channels[1].profile()?])
    }
}
