//! # Buudai RS
//!
//! A Rust library for acquiring and reconstructing waveforms from Buudai / Sainsmart
//! DDS120 two-channel USB oscilloscopes.
//!
//! The device streams interleaved 8-bit samples from a ring buffer without telling
//! where the ring begins. This library finds a trigger edge in each capture, rotates
//! both channels so they start at it, calibrates the codes into volts and hands the
//! result to any number of consumers.
//!
//! ## Features
//!
//! - **Pluggable transport**: The USB layer is a [`Transport`] trait, with a
//!   [`SimulatedTransport`] for tests and demos
//! - **Timebase control**: Requested rates are mapped onto the three hardware tiers
//! - **Trigger configuration**: Edge triggers with a builder pattern, Auto / Normal / Single modes
//! - **Background acquisition**: A dedicated thread captures, reconstructs and publishes
//! - **DataFrame output**: Published frames convert to `polars` frames and CSV
//! - **Configuration**: Calibration and tuning from TOML files and `BUUDAI_` environment variables
//!
//! ## Examples
//!
//! ### Connecting and reading frames
//!
//! ```rust,no_run
//! use buudai_rs::{BuudaiScope, Model, ScopeEvent, ScopeSettings, Signal, SimulatedTransport};
//!
//! let transport = SimulatedTransport::new(
//!     Signal::Sine { center: 136.0, amplitude: 60.0, period: 480 },
//!     Signal::Flat(132),
//! );
//! let scope = BuudaiScope::connect(Box::new(transport), Model::Dds120, &ScopeSettings::default())?;
//!
//! let events = scope.subscribe();
//! scope.set_sample_rate(240_000)?;
//! scope.start_sampling()?;
//!
//! if let Ok(ScopeEvent::SamplesAvailable { samples, .. }) = events.recv() {
//!     let buffers = samples.lock();
//!     println!("Captured {} samples on CH1", buffers.channel(0).len());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ### Edge Trigger
//!
//! ```rust
//! use buudai_rs::trigger_config::{EdgeTrigger, TriggerMode, TriggerSlope};
//!
//! let trigger = EdgeTrigger::start_capturing_when(0.25)
//!     .on_channel(1)
//!     .normal()
//!     .falling_edge();
//!
//! assert_eq!(trigger.slope, TriggerSlope::Falling);
//! assert_eq!(trigger.mode, TriggerMode::Normal);
//! ```
//!
//! ### Exporting a frame
//!
//! ```rust,no_run
//! # use buudai_rs::{BuudaiScope, Model, ScopeSettings, Signal, SimulatedTransport};
//! # let transport = SimulatedTransport::new(Signal::Flat(136), Signal::Flat(132));
//! # let scope = BuudaiScope::connect(Box::new(transport), Model::Dds120, &ScopeSettings::default())?;
//! let frame = scope.samples().snapshot();
//! let df = frame.to_lazy_frame()?.collect()?;
//! println!("{}", df);
//!
//! frame.write_csv(std::fs::File::create("capture.csv")?)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod acquisition;
pub mod buudai_scope;
pub mod calibration;
pub mod config;
pub mod device_model;
pub mod publisher;
pub mod reconstruction;
pub mod timebase;
pub mod trigger_config;
pub mod usb_transport;

// Re-export the main types for convenience
pub use trigger_config::{EdgeTrigger, EdgeTriggerBuilder, TriggerMode, TriggerSlope, TriggerTuning};

pub use usb_transport::{Signal, SimulatedTransport, Transport, TransportError};

pub use calibration::{CalibrationProfile, Coupling, Gain};

pub use config::{ConfigError, ScopeSettings};

pub use device_model::Model;

pub use publisher::{Frame, SampleBuffers, ScopeEvent, SharedSamples};

pub use acquisition::AcquisitionState;

pub use buudai_scope::{BuudaiScope, ControlError};
