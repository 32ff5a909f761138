use crate::acquisition::{AcquisitionHandle, AcquisitionLoop, AcquisitionState, ScopeState, SharedTransport};
use crate::calibration::{CalibrationProfile, Coupling, Gain};
use crate::config::{ConfigError, ScopeSettings};
use crate::device_model::{Model, RegisterTable, RegisterWrite, CHANNELS, SPECIAL_CHANNELS};
use crate::publisher::{Publisher, ScopeEvent, SharedSamples};
use crate::reconstruction::ReconstructionEngine;
use crate::timebase::{BufferSize, SampleRateSetting, Timebase, TimebaseError};
use crate::trigger_config::{EdgeTrigger, TriggerMode, TriggerSettings, TriggerSlope};
use crate::usb_transport::{Transport, TransportError, CONTROL_ENDPOINT};
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("Device is not connected")]
    NotConnected,

    #[error("Invalid channel {0}")]
    InvalidChannel(usize),

    #[error("{0} is not supported by the hardware")]
    InvalidMode(&'static str),

    #[error("Invalid trigger position {0} s")]
    InvalidPosition(f64),

    #[error("Invalid sample rate: {0}")]
    InvalidRate(#[from] TimebaseError),

    #[error("USB error: {0}")]
    Transport(#[from] TransportError),

    #[error("Failed to start acquisition: {0}")]
    Spawn(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ControlError {
    /// Negative status for hosts expecting numeric error codes
    pub fn code(&self) -> i32 {
        match self {
            Self::NotConnected => -2,
            Self::Transport(e) => e.code(),
            _ => -1,
        }
    }
}

/// Control surface of a connected Buudai oscilloscope.
///
/// Configuration calls take effect on the next acquisition cycle. Samples
/// are delivered through [`BuudaiScope::subscribe`].
pub struct BuudaiScope {
    model: Model,
    registers: &'static RegisterTable,
    transport: SharedTransport,
    state: Arc<Mutex<ScopeState>>,
    publisher: Arc<Publisher>,
    acquisition: AcquisitionHandle,
}

impl BuudaiScope {
    /// Configure the device and start the (idle) acquisition thread
    pub fn connect(
        transport: Box<dyn Transport>,
        model: Model,
        settings: &ScopeSettings,
    ) -> Result<Self, ControlError> {
        settings.validate()?;
        if !transport.is_connected() {
            return Err(ControlError::NotConnected);
        }
        if !model.officially_supported() {
            log::warn!(
                "The {} isn't supported officially yet, so it may not be working as expected",
                model.as_str()
            );
        }

        let registers = model.registers();
        let transport: SharedTransport = Arc::new(Mutex::new(transport));
        let state = ScopeState::new(settings.calibration_profiles()?, registers.samplerate_channel_max);

        let mut init = vec![registers.iso_transport_on(), registers.fifo_clear()];
        for (channel, profile) in state.calibration.iter().enumerate() {
            init.extend(registers.gain(channel, profile.gain));
        }
        init.push(registers.sample_rate(state.timebase.rate.hardware));
        for write in init {
            send_request(&transport, write)?;
        }

        let state = Arc::new(Mutex::new(state));
        let publisher = Arc::new(Publisher::new(settings.event_queue_depth));
        let acquisition = AcquisitionLoop::new(
            Arc::clone(&transport),
            registers,
            Arc::clone(&state),
            Arc::clone(&publisher),
            ReconstructionEngine::new(settings.trigger),
            settings.acquisition.clone(),
        )
        .spawn()?;

        log::info!("Connected to {}", model.as_str());
        Ok(Self {
            model,
            registers,
            transport,
            state,
            publisher,
            acquisition,
        })
    }

    pub fn model(&self) -> Model {
        self.model
    }

    pub fn channel_count(&self) -> usize {
        CHANNELS
    }

    pub fn is_connected(&self) -> bool {
        self.acquisition.state() != AcquisitionState::Stopped && self.transport.lock().is_connected()
    }

    fn ensure_connected(&self) -> Result<(), ControlError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ControlError::NotConnected)
        }
    }

    fn ensure_channel(channel: usize) -> Result<(), ControlError> {
        if channel < CHANNELS {
            Ok(())
        } else {
            Err(ControlError::InvalidChannel(channel))
        }
    }

    fn send(&self, write: RegisterWrite) -> Result<u8, ControlError> {
        send_request(&self.transport, write)
    }

    /// Events of every following cycle
    pub fn subscribe(&self) -> Receiver<ScopeEvent> {
        self.publisher.subscribe()
    }

    /// The sample buffer lock, see [`SharedSamples`]
    pub fn samples(&self) -> SharedSamples {
        self.publisher.samples()
    }

    pub fn start_sampling(&self) -> Result<(), ControlError> {
        self.ensure_connected()?;
        self.acquisition.start();
        Ok(())
    }

    pub fn stop_sampling(&self) -> Result<(), ControlError> {
        self.ensure_connected()?;
        self.acquisition.pause();
        Ok(())
    }

    pub fn acquisition_state(&self) -> AcquisitionState {
        self.acquisition.state()
    }

    /// Set the sample rate. Returns the rate that has been set in S/s.
    pub fn set_sample_rate(&self, sample_rate: u64) -> Result<u64, ControlError> {
        self.ensure_connected()?;
        let setting = SampleRateSetting::for_requested(sample_rate, self.registers.samplerate_channel_max)?;
        self.send(self.registers.sample_rate(setting.hardware))?;

        self.state.lock().timebase.rate = setting;
        log::debug!(
            "Sample rate {} S/s requested, {} S/s set with buffer multiplier {}",
            sample_rate,
            setting.achieved,
            setting.multiplier
        );
        Ok(setting.achieved)
    }

    /// Set the buffer size in samples. Returns the size that has been set.
    pub fn set_buffer_size(&self, size: u64) -> Result<u64, ControlError> {
        self.ensure_connected()?;
        let buffer_size = BufferSize::for_requested(size);
        let rate = self.state.lock().timebase.rate;
        self.send(self.registers.sample_rate(rate.hardware))?;

        let (position_time, slope) = {
            let mut state = self.state.lock();
            state.timebase.buffer_size = buffer_size;
            (state.trigger.position_time, state.trigger.slope)
        };
        self.set_trigger_position(position_time)?;
        self.set_trigger_slope(slope)?;

        Ok(buffer_size.samples())
    }

    pub fn set_coupling(&self, channel: usize, coupling: Coupling) -> Result<(), ControlError> {
        self.ensure_connected()?;
        Self::ensure_channel(channel)?;
        let write = self
            .registers
            .coupling(channel, coupling)
            .ok_or(ControlError::InvalidMode("GND coupling"))?;
        self.send(write)?;
        Ok(())
    }

    /// Set the gain in V for the full screen. Returns the gain that has been set.
    pub fn set_gain(&self, channel: usize, gain: f64) -> Result<f64, ControlError> {
        self.ensure_connected()?;
        let step = Gain::for_requested(gain);
        let write = self
            .registers
            .gain(channel, step)
            .ok_or(ControlError::InvalidChannel(channel))?;
        self.send(write)?;

        self.state.lock().calibration[channel].gain = step;
        Ok(step.volts())
    }

    /// The hardware has no offset control. Validates the channel and returns 0.
    pub fn set_offset(&self, channel: usize, _offset: f64) -> Result<f64, ControlError> {
        self.ensure_connected()?;
        Self::ensure_channel(channel)?;
        Ok(0.0)
    }

    /// All channels are always sampled. Validates the channel and does nothing else.
    pub fn set_channel_used(&self, channel: usize, _used: bool) -> Result<(), ControlError> {
        self.ensure_connected()?;
        Self::ensure_channel(channel)
    }

    pub fn set_trigger_mode(&self, mode: TriggerMode) -> Result<(), ControlError> {
        self.ensure_connected()?;
        self.state.lock().trigger.mode = mode;
        Ok(())
    }

    /// Set the trigger source. Special sources (EXT, ...) don't exist on this hardware.
    pub fn set_trigger_source(&self, special: bool, id: usize) -> Result<(), ControlError> {
        self.ensure_connected()?;
        if special {
            if id >= SPECIAL_CHANNELS {
                return Err(ControlError::InvalidChannel(id));
            }
        } else {
            Self::ensure_channel(id)?;
        }

        self.state.lock().trigger.source = id;
        Ok(())
    }

    /// Set the trigger level of a channel in V. Returns the level that has been set.
    pub fn set_trigger_level(&self, channel: usize, level: f64) -> Result<f64, ControlError> {
        self.ensure_connected()?;
        Self::ensure_channel(channel)?;
        self.state.lock().calibration[channel].trigger_level = level;
        Ok(level)
    }

    pub fn set_trigger_slope(&self, slope: TriggerSlope) -> Result<(), ControlError> {
        self.ensure_connected()?;
        self.state.lock().trigger.slope = slope;
        Ok(())
    }

    /// Set the pretrigger position in s. Returns the position that has been set,
    /// quantized to the current sample rate.
    pub fn set_trigger_position(&self, position: f64) -> Result<f64, ControlError> {
        self.ensure_connected()?;
        if !position.is_finite() || position < 0.0 {
            return Err(ControlError::InvalidPosition(position));
        }
        let mut state = self.state.lock();
        let Timebase { rate, max_rate, .. } = state.timebase;

        // All trigger positions are measured in samples
        let samples = (position * max_rate as f64 / rate.divider as f64) as u64;
        state.trigger.position = samples.saturating_add(1) / 2;
        state.trigger.position_time = position;

        Ok(samples as f64 / max_rate as f64 * rate.divider as f64)
    }

    /// Apply source, level, slope and mode of a complete trigger
    pub fn apply_trigger(&self, trigger: EdgeTrigger) -> Result<(), ControlError> {
        self.ensure_connected()?;
        Self::ensure_channel(trigger.source)?;
        let mut state = self.state.lock();
        state.trigger.source = trigger.source;
        state.trigger.slope = trigger.slope;
        state.trigger.mode = trigger.mode;
        state.calibration[trigger.source].trigger_level = trigger.level;
        Ok(())
    }

    pub fn timebase(&self) -> Timebase {
        self.state.lock().timebase
    }

    pub fn trigger_settings(&self) -> TriggerSettings {
        self.state.lock().trigger
    }

    pub fn calibration(&self, channel: usize) -> Option<CalibrationProfile> {
        self.state.lock().calibration.get(channel).copied()
    }

    /// Stop acquisition and release the device
    pub fn disconnect(&mut self) {
        self.acquisition.stop();
    }
}

fn send_request(transport: &SharedTransport, write: RegisterWrite) -> Result<u8, ControlError> {
    let mut data = [0u8; 1];
    transport.lock().control_transfer(
        CONTROL_ENDPOINT,
        write.request,
        &mut data,
        u16::from(write.value),
        0,
        1,
    )?;
    log::debug!("Request {:#04x} <- {:#04x}", write.request, write.value);
    Ok(data[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usb_transport::{ControlRequest, RequestLog, SimulatedTransport, Signal};
    use std::time::Duration;

    fn connect(ch1: Signal, ch2: Signal) -> (BuudaiScope, RequestLog) {
        let transport = SimulatedTransport::new(ch1, ch2);
        let log = transport.request_log();
        let mut settings = ScopeSettings::default();
        settings.acquisition.frame_interval_us = 0;
        let scope = BuudaiScope::connect(Box::new(transport), Model::Dds120, &settings).unwrap();
        (scope, log)
    }

    fn flat_scope() -> (BuudaiScope, RequestLog) {
        connect(Signal::Flat(136), Signal::Flat(132))
    }

    fn last_request(log: &RequestLog) -> Option<ControlRequest> {
        log.lock().last().copied()
    }

    #[test]
    fn test_connect_initializes_device() {
        let (scope, log) = flat_scope();

        let requests: Vec<(u8, u16)> = log.lock().iter().map(|r| (r.request, r.value)).collect();
        assert_eq!(
            requests,
            [(0x31, 0x00), (0x33, 0x00), (0x22, 0x06), (0x23, 0x12), (0x94, 0x01)]
        );
        assert_eq!(scope.acquisition_state(), AcquisitionState::Idle);
        assert_eq!(scope.timebase().rate.achieved, 2_400_000);
    }

    #[test]
    fn test_connect_requires_device() {
        let mut transport = SimulatedTransport::new(Signal::Flat(0), Signal::Flat(0));
        transport.disconnect();

        let result = BuudaiScope::connect(Box::new(transport), Model::Dds120, &ScopeSettings::default());

        assert!(matches!(result, Err(ControlError::NotConnected)));
    }

    #[test]
    fn test_set_sample_rate() {
        let (scope, log) = flat_scope();

        assert_eq!(scope.set_sample_rate(500_000_000).unwrap(), 48_000_000);
        assert_eq!(last_request(&log), Some(ControlRequest { request: 0x94, value: 0x10 }));

        assert_eq!(scope.set_sample_rate(100_000).unwrap(), 240_000);
        assert_eq!(last_request(&log), Some(ControlRequest { request: 0x94, value: 0x11 }));
        let timebase = scope.timebase();
        assert_eq!(timebase.rate.multiplier, 12);
        assert_eq!(timebase.rate.divider, 200);

        let err = scope.set_sample_rate(0).unwrap_err();
        assert_eq!(err.code(), -1);
        assert_eq!(scope.timebase().rate.achieved, 240_000);
    }

    #[test]
    fn test_set_buffer_size_keeps_rate() {
        let (scope, log) = flat_scope();
        scope.set_sample_rate(500_000_000).unwrap();

        assert_eq!(scope.set_buffer_size(10_000).unwrap(), 32768);
        assert_eq!(scope.timebase().buffer_size, BufferSize::Large);
        assert_eq!(scope.set_buffer_size(100).unwrap(), 2048);
        assert_eq!(last_request(&log), Some(ControlRequest { request: 0x94, value: 0x10 }));
        assert_eq!(scope.timebase().rate.achieved, 48_000_000);
    }

    #[test]
    fn test_set_gain() {
        let (scope, log) = flat_scope();

        assert!((scope.set_gain(1, 0.3).unwrap() - 0.5).abs() < f64::EPSILON);
        assert_eq!(last_request(&log), Some(ControlRequest { request: 0x23, value: 0x20 }));
        assert_eq!(scope.calibration(1).map(|p| p.gain), Some(Gain::Mv50));

        assert!((scope.set_gain(0, 20.0).unwrap() - 10.0).abs() < f64::EPSILON);
        assert_eq!(last_request(&log), Some(ControlRequest { request: 0x22, value: 0x02 }));
    }

    #[test]
    fn test_invalid_channel_leaves_state() {
        let (scope, log) = flat_scope();
        let before = log.lock().len();

        let err = scope.set_gain(2, 1.0).unwrap_err();
        assert!(matches!(err, ControlError::InvalidChannel(2)));
        assert_eq!(err.code(), -1);
        assert!(scope.set_trigger_level(5, 1.0).is_err());
        assert!(scope.set_trigger_source(false, 2).is_err());
        assert!(scope.set_trigger_source(true, 0).is_err());
        assert!(scope.set_offset(3, 0.0).is_err());

        assert_eq!(log.lock().len(), before);
        assert_eq!(scope.trigger_settings().source, 0);
    }

    #[test]
    fn test_set_coupling() {
        let (scope, log) = flat_scope();

        scope.set_coupling(1, Coupling::Dc).unwrap();
        assert_eq!(last_request(&log), Some(ControlRequest { request: 0x25, value: 0x01 }));
        scope.set_coupling(0, Coupling::Ac).unwrap();
        assert_eq!(last_request(&log), Some(ControlRequest { request: 0x24, value: 0x00 }));

        assert!(matches!(scope.set_coupling(0, Coupling::Gnd), Err(ControlError::InvalidMode(_))));
    }

    #[test]
    fn test_trigger_settings() {
        let (scope, _log) = flat_scope();

        scope.set_trigger_source(false, 1).unwrap();
        assert!((scope.set_trigger_level(1, 0.25).unwrap() - 0.25).abs() < f64::EPSILON);
        scope.set_trigger_slope(TriggerSlope::Falling).unwrap();
        scope.set_trigger_mode(TriggerMode::Normal).unwrap();

        let trigger = scope.trigger_settings();
        assert_eq!(trigger.source, 1);
        assert_eq!(trigger.slope, TriggerSlope::Falling);
        assert_eq!(trigger.mode, TriggerMode::Normal);
        assert_eq!(scope.calibration(1).map(|p| p.trigger_level), Some(0.25));

        scope
            .apply_trigger(EdgeTrigger::start_capturing_when(-1.0).on_channel(0).rising_edge())
            .unwrap();
        let trigger = scope.trigger_settings();
        assert_eq!((trigger.source, trigger.slope, trigger.mode), (0, TriggerSlope::Rising, TriggerMode::Auto));
    }

    #[test]
    fn test_set_trigger_position_quantizes() {
        let (scope, _log) = flat_scope();

        // 2^-10 s at 2.4 MS/s is 2343.75 samples
        let applied = scope.set_trigger_position(0.000_976_562_5).unwrap();

        assert!((applied - 2343.0 * 20.0 / 48e6).abs() < 1e-12);
        assert_eq!(scope.trigger_settings().position, 1172);
    }

    #[test]
    fn test_trigger_position_rejects_unusable_values() {
        let (scope, _log) = flat_scope();
        scope.set_trigger_position(0.001).unwrap();
        let before = scope.trigger_settings();

        for position in [f64::INFINITY, f64::NEG_INFINITY, f64::NAN, -0.5] {
            let err = scope.set_trigger_position(position).unwrap_err();
            assert!(matches!(err, ControlError::InvalidPosition(_)));
            assert_eq!(err.code(), -1);
        }
        assert_eq!(scope.trigger_settings(), before);

        // Saturates instead of overflowing
        scope.set_trigger_position(1e300).unwrap();
        assert_eq!(scope.trigger_settings().position, u64::MAX / 2);
    }

    #[test]
    fn test_failed_request_leaves_timebase() {
        // Connect sends five requests, everything after fails
        let transport =
            SimulatedTransport::new(Signal::Flat(136), Signal::Flat(132)).fail_controls_after(5);
        let scope =
            BuudaiScope::connect(Box::new(transport), Model::Dds120, &ScopeSettings::default()).unwrap();
        let before = scope.timebase();

        let err = scope.set_buffer_size(10_000).unwrap_err();
        assert!(matches!(err, ControlError::Transport(_)));
        assert_eq!(err.code(), -1);
        assert!(scope.set_sample_rate(100_000).is_err());

        assert_eq!(scope.timebase(), before);
        assert_eq!(scope.timebase().buffer_size, BufferSize::Small);
    }

    #[test]
    fn test_set_channel_used() {
        let (mut scope, log) = flat_scope();
        let before = log.lock().len();

        assert!(scope.set_channel_used(1, false).is_ok());
        assert!(matches!(scope.set_channel_used(2, true), Err(ControlError::InvalidChannel(2))));
        assert_eq!(log.lock().len(), before);

        scope.disconnect();
        assert_eq!(scope.set_channel_used(0, true).unwrap_err().code(), -2);
    }

    #[test]
    fn test_acquires_after_start() {
        let (scope, _log) = flat_scope();
        let events = scope.subscribe();

        scope.start_sampling().unwrap();
        let event = events.recv_timeout(Duration::from_secs(5)).unwrap();
        scope.stop_sampling().unwrap();

        let (lengths, sample_rate, samples) = match event {
            ScopeEvent::SamplesAvailable { lengths, sample_rate, samples, .. } => (lengths, sample_rate, samples),
            other => panic!("unexpected event {:?}", other),
        };
        assert_eq!(lengths, [2040, 2040]);
        assert!((sample_rate - 2_400_000.0).abs() < f64::EPSILON);
        let frame = samples.snapshot();
        assert_eq!(frame.channels.len(), CHANNELS);
        assert!(frame.channels[0].iter().all(|v| v.abs() < 1e-12));
    }

    #[test]
    fn test_disconnect_rejects_further_calls() {
        let (mut scope, _log) = flat_scope();
        let events = scope.subscribe();

        scope.disconnect();

        assert!(!scope.is_connected());
        let err = scope.set_gain(0, 1.0).unwrap_err();
        assert!(matches!(err, ControlError::NotConnected));
        assert_eq!(err.code(), -2);
        assert!(scope.start_sampling().is_err());

        let received: Vec<ScopeEvent> = events.try_iter().collect();
        assert!(received.iter().any(|e| matches!(e, ScopeEvent::Disconnected)));
    }
}
