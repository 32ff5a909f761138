use parking_lot::Mutex;
use std::f64::consts::TAU;
use std::sync::Arc;

/// Endpoint used for all vendor control requests
pub const CONTROL_ENDPOINT: u8 = 0x00;
/// Number of attempts for a bulk read before giving up
pub const DEFAULT_ATTEMPTS: u32 = 3;

// libusb status codes
const STATUS_IO: i32 = -1;
const STATUS_NO_DEVICE: i32 = -4;
const STATUS_TIMEOUT: i32 = -7;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("USB transfer failed with status {code}")]
    Usb { code: i32 },

    #[error("USB transfer timed out after {attempts} attempts")]
    Timeout { attempts: u32 },

    #[error("Device has been disconnected")]
    Disconnected,
}

impl TransportError {
    /// Negative status code as reported by libusb
    pub fn code(&self) -> i32 {
        match self {
            Self::Usb { code } => *code,
            Self::Timeout { .. } => STATUS_TIMEOUT,
            Self::Disconnected => STATUS_NO_DEVICE,
        }
    }
}

/// Byte-level access to the digitizer.
///
/// Implementations own the USB handle and drain samples from the bulk IN
/// endpoint (0x82 on Buudai hardware). Every call blocks for at most
/// `attempts` times the per-transfer timeout (500 ms on Buudai hardware); there is no
/// cancellation beyond that.
pub trait Transport: Send {
    /// Vendor control request. Returns the number of bytes transferred.
    fn control_transfer(
        &mut self,
        endpoint: u8,
        request: u8,
        buffer: &mut [u8],
        value: u16,
        index: u16,
        attempts: u32,
    ) -> Result<usize, TransportError>;

    /// Bulk read of up to `buffer.len()` raw bytes. Returns the number of bytes received.
    fn bulk_read_multi(&mut self, buffer: &mut [u8], attempts: u32) -> Result<usize, TransportError>;

    fn is_connected(&self) -> bool;

    fn disconnect(&mut self);
}

/// A control request as seen by the simulated device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRequest {
    pub request: u8,
    pub value: u16,
}

pub type RequestLog = Arc<Mutex<Vec<ControlRequest>>>;

type SampleFn = dyn Fn(u64, usize) -> u8 + Send;

/// Waveform generator for one simulated channel
pub enum Signal {
    Flat(u8),
    Square { low: u8, high: u8, period: usize },
    Sine { center: f64, amplitude: f64, period: usize },
    Ramp { start: u8, step: u8 },
    /// Called with (capture number, sample index)
    Custom(Box<SampleFn>),
}

impl Signal {
    pub fn custom(f: impl Fn(u64, usize) -> u8 + Send + 'static) -> Self {
        Self::Custom(Box::new(f))
    }

    fn code(&self, capture: u64, sample: usize) -> u8 {
        match self {
            Self::Flat(code) => *code,
            Self::Square { low, high, period } => {
                let period = (*period).max(2);
                let phase = (sample + Self::jitter(capture, period)) % period;
                if phase < period / 2 {
                    *low
                } else {
                    *high
                }
            }
            Self::Sine {
                center,
                amplitude,
                period,
            } => {
                let period = (*period).max(1);
                let phase = (sample + Self::jitter(capture, period)) % period;
                let value = center + amplitude * (TAU * phase as f64 / period as f64).sin();
                value.round().clamp(0.0, 255.0) as u8
            }
            Self::Ramp { start, step } => start.wrapping_add(step.wrapping_mul(sample as u8)),
            Self::Custom(f) => f(capture, sample),
        }
    }

    // Captures start at an arbitrary point of the waveform
    fn jitter(capture: u64, period: usize) -> usize {
        (capture.wrapping_mul(7919) % period as u64) as usize
    }
}

/// In-process stand-in for a DDS120, producing interleaved two-channel captures
pub struct SimulatedTransport {
    signals: [Signal; 2],
    connected: bool,
    captures: u64,
    failing_reads: usize,
    disconnect_after: Option<u64>,
    max_read: Option<usize>,
    control_limit: Option<usize>,
    requests: RequestLog,
}

impl SimulatedTransport {
    pub fn new(ch1: Signal, ch2: Signal) -> Self {
        Self {
            signals: [ch1, ch2],
            connected: true,
            captures: 0,
            failing_reads: 0,
            disconnect_after: None,
            max_read: None,
            control_limit: None,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// The next `count` bulk reads fail with an I/O status
    pub fn fail_next_reads(mut self, count: usize) -> Self {
        self.failing_reads = count;
        self
    }

    /// Report the device as gone once `captures` reads have been served
    pub fn disconnect_after(mut self, captures: u64) -> Self {
        self.disconnect_after = Some(captures);
        self
    }

    /// Deliver short reads of at most `bytes`
    pub fn limit_reads(mut self, bytes: usize) -> Self {
        self.max_read = Some(bytes);
        self
    }

    /// Control requests fail with an I/O status once `requests` have been accepted
    pub fn fail_controls_after(mut self, requests: usize) -> Self {
        self.control_limit = Some(requests);
        self
    }

    /// Shared handle on every control request received so far
    pub fn request_log(&self) -> RequestLog {
        Arc::clone(&self.requests)
    }

    pub fn captures(&self) -> u64 {
        self.captures
    }
}

impl Transport for SimulatedTransport {
    fn control_transfer(
        &mut self,
        _endpoint: u8,
        request: u8,
        buffer: &mut [u8],
        value: u16,
        _index: u16,
        _attempts: u32,
    ) -> Result<usize, TransportError> {
        if !self.connected {
            return Err(TransportError::Disconnected);
        }
        let mut requests = self.requests.lock();
        if self.control_limit.is_some_and(|limit| requests.len() >= limit) {
            return Err(TransportError::Usb { code: STATUS_IO });
        }
        requests.push(ControlRequest { request, value });
        buffer.fill(0);
        Ok(buffer.len())
    }

    fn bulk_read_multi(&mut self, buffer: &mut [u8], _attempts: u32) -> Result<usize, TransportError> {
        if !self.connected {
            return Err(TransportError::Disconnected);
        }
        if self.disconnect_after.is_some_and(|limit| self.captures >= limit) {
            self.connected = false;
            return Err(TransportError::Disconnected);
        }
        if self.failing_reads > 0 {
            self.failing_reads -= 1;
            return Err(TransportError::Usb { code: STATUS_IO });
        }

        let length = self.max_read.map_or(buffer.len(), |max| max.min(buffer.len()));
        for (i, byte) in buffer[..length].iter_mut().enumerate() {
            *byte = self.signals[i % 2].code(self.captures, i / 2);
        }
        self.captures += 1;
        Ok(length)
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bulk_read_interleaves_channels() {
        let mut transport = SimulatedTransport::new(Signal::Flat(10), Signal::Flat(200));
        let mut buffer = vec![0u8; 16];

        assert_eq!(transport.bulk_read_multi(&mut buffer, DEFAULT_ATTEMPTS), Ok(16));
        for (i, byte) in buffer.iter().enumerate() {
            assert_eq!(*byte, if i % 2 == 0 { 10 } else { 200 });
        }
    }

    #[test]
    fn test_short_reads_and_failures() {
        let mut transport = SimulatedTransport::new(Signal::Flat(1), Signal::Flat(2))
            .fail_next_reads(1)
            .limit_reads(6);
        let mut buffer = vec![0u8; 16];

        let err = transport.bulk_read_multi(&mut buffer, 1).unwrap_err();
        assert!(err.code() < 0);
        assert_eq!(transport.bulk_read_multi(&mut buffer, 1), Ok(6));
        assert_eq!(transport.captures(), 1);
    }

    #[test]
    fn test_disconnect_after() {
        let mut transport =
            SimulatedTransport::new(Signal::Flat(1), Signal::Flat(2)).disconnect_after(1);
        let mut buffer = vec![0u8; 4];

        assert!(transport.bulk_read_multi(&mut buffer, 1).is_ok());
        assert_eq!(
            transport.bulk_read_multi(&mut buffer, 1),
            Err(TransportError::Disconnected)
        );
        assert!(!transport.is_connected());
        assert_eq!(TransportError::Disconnected.code(), STATUS_NO_DEVICE);
    }

    #[test]
    fn test_control_requests_are_logged() {
        let mut transport = SimulatedTransport::new(Signal::Flat(0), Signal::Flat(0));
        let log = transport.request_log();
        let mut data = [0xffu8; 1];

        transport
            .control_transfer(CONTROL_ENDPOINT, 0x94, &mut data, 0x11, 0, 1)
            .unwrap();

        assert_eq!(data, [0]);
        assert_eq!(
            log.lock().as_slice(),
            &[ControlRequest {
                request: 0x94,
                value: 0x11
            }]
        );
    }

    #[test]
    fn test_failing_control_requests() {
        let mut transport =
            SimulatedTransport::new(Signal::Flat(0), Signal::Flat(0)).fail_controls_after(1);
        let log = transport.request_log();
        let mut data = [0u8; 1];

        assert!(transport.control_transfer(CONTROL_ENDPOINT, 0x33, &mut data, 0, 0, 1).is_ok());
        assert_eq!(
            transport.control_transfer(CONTROL_ENDPOINT, 0x94, &mut data, 0x10, 0, 1),
            Err(TransportError::Usb { code: STATUS_IO })
        );
        assert_eq!(log.lock().len(), 1);
    }

    #[test]
    fn test_ramp_wraps() {
        let ramp = Signal::Ramp { start: 250, step: 2 };
        assert_eq!(ramp.code(0, 0), 250);
        assert_eq!(ramp.code(0, 3), 0);
    }
}
