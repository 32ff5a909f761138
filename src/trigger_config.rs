use serde::{Deserialize, Serialize};

/// Look-ahead distances of the gate vote, as right shifts of the capture length
pub const LOOKAHEAD_SHIFTS: [u32; 5] = [11, 10, 9, 8, 7];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TriggerSlope {
    #[default]
    Rising,
    Falling,
}

impl TriggerSlope {
    /// Value sits on the side of the level the edge starts from, clear of the deadband
    #[inline]
    pub fn is_pre_crossing(self, value: f64, level: f64, deadband: f64) -> bool {
        match self {
            Self::Rising => value < level - deadband,
            Self::Falling => value > level + deadband,
        }
    }

    /// A later raw code continues in the direction of the edge
    #[inline]
    pub fn heads_toward(self, current: u8, ahead: u8) -> bool {
        match self {
            Self::Rising => current < ahead,
            Self::Falling => current > ahead,
        }
    }

    /// Value moved past the level in the direction of the edge
    #[inline]
    pub fn crossed(self, value: f64, previous: f64, level: f64) -> bool {
        match self {
            Self::Rising => value > previous && value > level,
            Self::Falling => value < previous && value < level,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TriggerMode {
    /// Free-run when no edge is found
    #[default]
    Auto,
    /// Only publish frames with a confirmed edge
    Normal,
    /// Publish the first frame with a confirmed edge, then stop sampling
    Single,
}

impl TriggerMode {
    pub fn requires_trigger(self) -> bool {
        !matches!(self, Self::Auto)
    }
}

/// Knobs of the edge search. The defaults were tuned against the noise of
/// real DDS120 captures.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerTuning {
    /// Distance from the level a sample needs before the gate may open, in V
    pub deadband_volts: f64,
    /// Look-ahead comparisons (out of 5) that must agree with the slope
    pub gate_votes: usize,
    /// Crossings needed to confirm the first one
    pub confirm_hits: usize,
}

impl Default for TriggerTuning {
    fn default() -> Self {
        Self {
            deadband_volts: 0.02,
            gate_votes: 3,
            confirm_hits: 4,
        }
    }
}

/// Trigger parameters shared between the control surface and the acquisition loop
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TriggerSettings {
    pub source: usize,
    pub slope: TriggerSlope,
    pub mode: TriggerMode,
    /// Pretrigger position in sample pairs
    pub position: u64,
    /// Pretrigger position as last requested, in s
    pub position_time: f64,
}

/// A complete edge trigger, built with [`EdgeTrigger::start_capturing_when`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeTrigger {
    pub source: usize,
    pub level: f64,
    pub slope: TriggerSlope,
    pub mode: TriggerMode,
}

#[derive(Debug)]
pub struct EdgeTriggerBuilder {
    volts: f64,
    source: usize,
    mode: TriggerMode,
}

impl EdgeTrigger {
    pub fn start_capturing_when(volts: f64) -> EdgeTriggerBuilder {
        EdgeTriggerBuilder {
            volts,
            source: 0,
            mode: TriggerMode::Auto,
        }
    }
}

impl EdgeTriggerBuilder {
    pub fn on_channel(mut self, channel: usize) -> Self {
        self.source = channel;
        self
    }

    /// Drop frames without an edge instead of free-running
    pub fn normal(mut self) -> Self {
        self.mode = TriggerMode::Normal;
        self
    }

    pub fn single(mut self) -> Self {
        self.mode = TriggerMode::Single;
        self
    }

    pub fn rising_edge(self) -> EdgeTrigger {
        self.into_trigger(TriggerSlope::Rising)
    }

    pub fn falling_edge(self) -> EdgeTrigger {
        self.into_trigger(TriggerSlope::Falling)
    }

    fn into_trigger(self, slope: TriggerSlope) -> EdgeTrigger {
        EdgeTrigger {
            source: self.source,
            level: self.volts,
            slope,
            mode: self.mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rising_slope_predicates() {
        let slope = TriggerSlope::Rising;
        assert!(slope.is_pre_crossing(-0.05, 0.0, 0.02));
        assert!(!slope.is_pre_crossing(-0.01, 0.0, 0.02));
        assert!(slope.heads_toward(10, 11));
        assert!(!slope.heads_toward(10, 10));
        assert!(slope.crossed(0.1, 0.05, 0.0));
        assert!(!slope.crossed(0.1, 0.2, 0.0));
        assert!(!slope.crossed(-0.1, -0.2, 0.0));
    }

    #[test]
    fn test_falling_slope_predicates() {
        let slope = TriggerSlope::Falling;
        assert!(slope.is_pre_crossing(0.05, 0.0, 0.02));
        assert!(!slope.is_pre_crossing(0.01, 0.0, 0.02));
        assert!(slope.heads_toward(11, 10));
        assert!(slope.crossed(-0.1, -0.05, 0.0));
        assert!(!slope.crossed(-0.1, -0.2, 0.0));
    }

    #[test]
    fn test_builder() {
        let trigger = EdgeTrigger::start_capturing_when(1.5)
            .on_channel(1)
            .single()
            .falling_edge();

        assert_eq!(trigger.source, 1);
        assert!((trigger.level - 1.5).abs() < f64::EPSILON);
        assert_eq!(trigger.slope, TriggerSlope::Falling);
        assert_eq!(trigger.mode, TriggerMode::Single);
        assert!(trigger.mode.requires_trigger());
    }

    #[test]
    fn test_default_tuning() {
        let tuning = TriggerTuning::default();
        assert_eq!(tuning.gate_votes, 3);
        assert_eq!(tuning.confirm_hits, 4);
        assert!((tuning.deadband_volts - 0.02).abs() < f64::EPSILON);
        assert!(!TriggerMode::Auto.requires_trigger());
    }
}
