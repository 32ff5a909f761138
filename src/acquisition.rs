use crate::calibration::CalibrationProfile;
use crate::config::AcquisitionSettings;
use crate::device_model::{RegisterTable, CHANNELS};
use crate::publisher::{Publisher, ScopeEvent};
use crate::reconstruction::{CycleOutcome, CycleSettings, ReconstructionEngine};
use crate::timebase::Timebase;
use crate::trigger_config::{TriggerMode, TriggerSettings};
use crate::usb_transport::{Transport, TransportError, CONTROL_ENDPOINT};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// The transport lock. Every control request and every bulk read holds it.
pub type SharedTransport = Arc<Mutex<Box<dyn Transport>>>;

/// Configuration shared between the control surface and the acquisition loop
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScopeState {
    pub calibration: [CalibrationProfile; CHANNELS],
    pub trigger: TriggerSettings,
    pub timebase: Timebase,
}

impl ScopeState {
    pub fn new(calibration: [CalibrationProfile; CHANNELS], max_rate: u64) -> Self {
        Self {
            calibration,
            trigger: TriggerSettings::default(),
            timebase: Timebase::new(max_rate),
        }
    }

    pub fn cycle_settings(&self) -> CycleSettings {
        CycleSettings {
            calibration: self.calibration,
            trigger: self.trigger,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    Idle,
    Sampling,
    /// Terminal, the transport has been released
    Stopped,
}

/// Moves to `next` unless already stopped. Returns the resulting state.
fn transition(status: &Mutex<AcquisitionState>, next: AcquisitionState) -> AcquisitionState {
    let mut current = status.lock();
    if *current != AcquisitionState::Stopped {
        *current = next;
    }
    *current
}

pub struct AcquisitionLoop {
    transport: SharedTransport,
    registers: &'static RegisterTable,
    state: Arc<Mutex<ScopeState>>,
    status: Arc<Mutex<AcquisitionState>>,
    publisher: Arc<Publisher>,
    engine: ReconstructionEngine,
    settings: AcquisitionSettings,
    capture: Vec<u8>,
}

impl AcquisitionLoop {
    pub fn new(
        transport: SharedTransport,
        registers: &'static RegisterTable,
        state: Arc<Mutex<ScopeState>>,
        publisher: Arc<Publisher>,
        engine: ReconstructionEngine,
        settings: AcquisitionSettings,
    ) -> Self {
        Self {
            transport,
            registers,
            state,
            status: Arc::new(Mutex::new(AcquisitionState::Idle)),
            publisher,
            engine,
            settings,
            capture: Vec::new(),
        }
    }

    /// Run the loop on its own thread, idle until started
    pub fn spawn(self) -> std::io::Result<AcquisitionHandle> {
        let status = Arc::clone(&self.status);
        let thread = thread::Builder::new()
            .name("buudai-acquisition".to_string())
            .spawn(move || self.run())?;

        Ok(AcquisitionHandle {
            status,
            thread: Some(thread),
        })
    }

    /// Handles all USB traffic until stopped or the device disappears
    pub fn run(mut self) {
        let _span = tracing::info_span!("acquisition").entered();
        log::info!("Acquisition loop started");

        loop {
            let status = *self.status.lock();
            match status {
                AcquisitionState::Stopped => break,
                AcquisitionState::Idle => {
                    thread::sleep(self.settings.idle_poll());
                    continue;
                }
                AcquisitionState::Sampling => {}
            }

            let stretched = self.state.lock().timebase.rate.multiplier >= 2;
            match self.run_cycle() {
                Ok(_) => {
                    // The transfer itself is slow enough for stretched captures
                    if !stretched {
                        thread::sleep(self.settings.frame_interval());
                    }
                }
                Err(TransportError::Disconnected) => {
                    log::info!("Device disconnected during acquisition");
                    *self.status.lock() = AcquisitionState::Stopped;
                }
                Err(e) => {
                    log::warn!("Getting sample data failed: {} (status {})", e, e.code());
                }
            }
        }

        self.transport.lock().disconnect();
        self.publisher.notify(&ScopeEvent::Status(
            "The device has been disconnected".to_string(),
        ));
        self.publisher.notify(&ScopeEvent::Disconnected);
        log::info!("Acquisition loop stopped");
    }

    /// Capture, reconstruct and publish one frame
    pub fn run_cycle(&mut self) -> Result<CycleOutcome, TransportError> {
        let state = *self.state.lock();

        let requested = state.timebase.capture_bytes();
        let length = usize::try_from(requested)
            .unwrap_or(usize::MAX)
            .min(self.settings.max_capture_bytes);
        if (length as u64) < requested {
            log::warn!("Capture of {} bytes clamped to {}", requested, length);
        }
        self.capture.resize(length, 0);

        let received = {
            let mut transport = self.transport.lock();
            let fifo = self.registers.fifo_clear();
            let mut reply = [0u8; 1];
            transport.control_transfer(
                CONTROL_ENDPOINT,
                fifo.request,
                &mut reply,
                u16::from(fifo.value),
                0,
                1,
            )?;
            transport.bulk_read_multi(&mut self.capture, self.settings.read_attempts)?
        };
        let raw = &self.capture[..received.min(length)];

        let samples = self.publisher.samples();
        let mut buffers = samples.lock();
        let outcome = self
            .engine
            .reconstruct(raw, &state.cycle_settings(), &mut buffers);
        if outcome == CycleOutcome::Discarded {
            return Ok(outcome);
        }
        self.publisher
            .publish(buffers, state.timebase.effective_rate());

        if state.trigger.mode == TriggerMode::Single {
            if let CycleOutcome::Triggered { offset } = outcome {
                log::debug!("Single trigger at byte {}, sampling paused", offset);
                transition(&self.status, AcquisitionState::Idle);
            }
        }

        Ok(outcome)
    }

    pub fn state(&self) -> AcquisitionState {
        *self.status.lock()
    }

    pub fn start(&self) -> AcquisitionState {
        transition(&self.status, AcquisitionState::Sampling)
    }
}

/// Control over a spawned acquisition loop
#[derive(Debug)]
pub struct AcquisitionHandle {
    status: Arc<Mutex<AcquisitionState>>,
    thread: Option<JoinHandle<()>>,
}

impl AcquisitionHandle {
    pub fn state(&self) -> AcquisitionState {
        *self.status.lock()
    }

    pub fn start(&self) -> AcquisitionState {
        transition(&self.status, AcquisitionState::Sampling)
    }

    pub fn pause(&self) -> AcquisitionState {
        transition(&self.status, AcquisitionState::Idle)
    }

    /// Stop the loop and wait for it to release the transport
    pub fn stop(&mut self) {
        *self.status.lock() = AcquisitionState::Stopped;
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Acquisition thread panicked");
            }
        }
    }
}

impl Drop for AcquisitionHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
