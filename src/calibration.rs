use serde::{Deserialize, Serialize};

/// Gain steps, named after their volts/div setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gain {
    Mv50,
    Mv100,
    Mv200,
    Mv500,
    V1,
}

impl Gain {
    pub const COUNT: usize = 5;
    pub const ALL: [Self; Self::COUNT] = [Self::Mv50, Self::Mv100, Self::Mv200, Self::Mv500, Self::V1];

    /// Full screen range in volts
    pub fn volts(self) -> f64 {
        match self {
            Self::Mv50 => 0.5,
            Self::Mv100 => 1.0,
            Self::Mv200 => 2.0,
            Self::Mv500 => 5.0,
            Self::V1 => 10.0,
        }
    }

    /// Smallest step covering `requested` volts, the largest step otherwise
    pub fn for_requested(requested: f64) -> Self {
        Self::ALL
            .into_iter()
            .find(|gain| gain.volts() >= requested)
            .unwrap_or(Self::V1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Coupling {
    Ac,
    Dc,
    /// Not available on Buudai hardware
    Gnd,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CalibrationError {
    #[error("Sample range must be between 1 and 255, got {0}")]
    SampleRangeOutOfBounds(u16),

    #[error("Calibration factor must be finite and non-zero, got {0}")]
    InvalidFactor(f64),
}

/// Per-channel conversion from ADC codes to volts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationProfile {
    sample_range: u8,
    real_offset: f64,
    calibration_factor: f64,
    pub gain: Gain,
    /// Trigger level in V
    pub trigger_level: f64,
}

impl CalibrationProfile {
    pub fn new(
        sample_range: u16,
        real_offset: f64,
        calibration_factor: f64,
    ) -> Result<Self, CalibrationError> {
        let sample_range = u8::try_from(sample_range)
            .ok()
            .filter(|range| *range > 0)
            .ok_or(CalibrationError::SampleRangeOutOfBounds(sample_range))?;
        if !calibration_factor.is_finite() || calibration_factor == 0.0 {
            return Err(CalibrationError::InvalidFactor(calibration_factor));
        }

        Ok(Self {
            sample_range,
            real_offset,
            calibration_factor,
            gain: Gain::Mv500,
            trigger_level: 0.0,
        })
    }

    /// Factory values of the given channel. The zero code is quantized, so
    /// the offset is stored as a fraction of the sample range.
    pub fn factory(channel: usize) -> Self {
        let (zero_code, factor) = if channel == 0 { (136.0, 1.18) } else { (132.0, 1.21) };
        Self {
            sample_range: u8::MAX,
            real_offset: zero_code / f64::from(u8::MAX),
            calibration_factor: factor,
            gain: Gain::Mv500,
            trigger_level: 0.0,
        }
    }

    pub fn sample_range(&self) -> u8 {
        self.sample_range
    }

    pub fn real_offset(&self) -> f64 {
        self.real_offset
    }

    pub fn calibration_factor(&self) -> f64 {
        self.calibration_factor
    }

    /// Convert raw ADC code to voltage
    #[inline]
    pub fn volts(&self, code: u8) -> f64 {
        (f64::from(code) / f64::from(self.sample_range) - self.real_offset)
            * self.gain.volts()
            * self.calibration_factor
    }

    /// Nearest ADC code for a voltage, saturating at the code range
    pub fn code_for_volts(&self, volts: f64) -> u8 {
        let fraction = volts / (self.gain.volts() * self.calibration_factor) + self.real_offset;
        (fraction * f64::from(self.sample_range)).round().clamp(0.0, 255.0) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gain_for_requested() {
        assert_eq!(Gain::for_requested(0.1), Gain::Mv50);
        assert_eq!(Gain::for_requested(0.5), Gain::Mv50);
        assert_eq!(Gain::for_requested(0.6), Gain::Mv100);
        assert_eq!(Gain::for_requested(4.0), Gain::Mv500);
        assert_eq!(Gain::for_requested(80.0), Gain::V1);
    }

    #[test]
    fn test_sample_range_validation() {
        assert!(CalibrationProfile::new(255, 0.5, 1.0).is_ok());
        assert_eq!(
            CalibrationProfile::new(0, 0.5, 1.0),
            Err(CalibrationError::SampleRangeOutOfBounds(0))
        );
        assert_eq!(
            CalibrationProfile::new(256, 0.5, 1.0),
            Err(CalibrationError::SampleRangeOutOfBounds(256))
        );
        assert!(CalibrationProfile::new(200, 0.5, 0.0).is_err());
    }

    #[test]
    fn test_factory_zero_code_is_zero_volts() {
        let ch1 = CalibrationProfile::factory(0);
        let ch2 = CalibrationProfile::factory(1);
        assert!(ch1.volts(136).abs() < 1e-12);
        assert!(ch2.volts(132).abs() < 1e-12);
        assert!(ch1.volts(255) > 0.0);
        assert!(ch1.volts(0) < 0.0);
    }

    #[test]
    fn test_code_for_volts_inverts_volts() {
        let mut profile = CalibrationProfile::new(255, 0.5, 1.0).unwrap();
        profile.gain = Gain::Mv50;
        for code in [0u8, 17, 128, 200, 255] {
            assert_eq!(profile.code_for_volts(profile.volts(code)), code);
        }
        assert_eq!(profile.code_for_volts(100.0), 255);
    }
}
