use crate::calibration::{Coupling, Gain};
use crate::timebase::HardwareRate;

/// Number of physical channels
pub const CHANNELS: usize = 2;
/// Number of special trigger sources (EXT, ...)
pub const SPECIAL_CHANNELS: usize = 0;

/// Supported Buudai DSO models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Model {
    Dds120,
    Dds140,
}

impl Model {
    pub fn from_vendor_id(vendor_id: u16) -> Option<Self> {
        match vendor_id {
            0x8102 => Some(Self::Dds120),
            0x8312 => Some(Self::Dds140),
            _ => None,
        }
    }

    pub fn vendor_id(self) -> u16 {
        match self {
            Self::Dds120 => 0x8102,
            Self::Dds140 => 0x8312,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dds120 => "DDS120",
            Self::Dds140 => "DDS140",
        }
    }

    /// Register codes for this model
    pub fn registers(self) -> &'static RegisterTable {
        match self {
            Self::Dds120 => &DDS120_REGISTERS,
            Self::Dds140 => &DDS140_REGISTERS,
        }
    }

    /// Whether the model has been verified against real hardware
    pub fn officially_supported(self) -> bool {
        matches!(self, Self::Dds120)
    }
}

/// A register and the value to write into it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterWrite {
    pub request: u8,
    pub value: u8,
}

#[derive(Debug)]
pub struct ChannelRegisters {
    pub gain: u8,
    /// Indexed by `Gain as usize`
    pub gain_codes: [u8; Gain::COUNT],
    pub coupling: u8,
    pub coupling_dc: u8,
    pub coupling_ac: u8,
}

/// Static register map of one model, resolved once at connect time
#[derive(Debug)]
pub struct RegisterTable {
    pub channels: [ChannelRegisters; CHANNELS],
    pub sample_rate: u8,
    /// Indexed by `HardwareRate as usize`
    pub sample_rate_codes: [u8; 3],
    pub fifo_control: u8,
    pub fifo_clear: u8,
    pub iso_transport: u8,
    pub iso_transport_on: u8,
    /// Maximum sample rate of a single channel in S/s
    pub samplerate_channel_max: u64,
    /// Maximum sample rate in fast rate mode in S/s
    pub samplerate_fast_max: u64,
}

impl RegisterTable {
    pub fn gain(&self, channel: usize, gain: Gain) -> Option<RegisterWrite> {
        let regs = self.channels.get(channel)?;
        Some(RegisterWrite {
            request: regs.gain,
            value: regs.gain_codes[gain as usize],
        })
    }

    /// `None` for an invalid channel or a coupling the hardware can't do
    pub fn coupling(&self, channel: usize, coupling: Coupling) -> Option<RegisterWrite> {
        let regs = self.channels.get(channel)?;
        let value = match coupling {
            Coupling::Dc => regs.coupling_dc,
            Coupling::Ac => regs.coupling_ac,
            Coupling::Gnd => return None,
        };
        Some(RegisterWrite {
            request: regs.coupling,
            value,
        })
    }

    pub fn sample_rate(&self, rate: HardwareRate) -> RegisterWrite {
        RegisterWrite {
            request: self.sample_rate,
            value: self.sample_rate_codes[rate as usize],
        }
    }

    pub fn fifo_clear(&self) -> RegisterWrite {
        RegisterWrite {
            request: self.fifo_control,
            value: self.fifo_clear,
        }
    }

    pub fn iso_transport_on(&self) -> RegisterWrite {
        RegisterWrite {
            request: self.iso_transport,
            value: self.iso_transport_on,
        }
    }
}

const BUUDAI_CHANNEL_REGISTERS: [ChannelRegisters; CHANNELS] = [
    ChannelRegisters {
        gain: 0x22,
        gain_codes: [0x08, 0x04, 0x00, 0x06, 0x02],
        coupling: 0x24,
        coupling_dc: 0x08,
        coupling_ac: 0x00,
    },
    ChannelRegisters {
        gain: 0x23,
        gain_codes: [0x20, 0x10, 0x00, 0x12, 0x02],
        coupling: 0x25,
        coupling_dc: 0x01,
        coupling_ac: 0x00,
    },
];

static DDS120_REGISTERS: RegisterTable = RegisterTable {
    channels: BUUDAI_CHANNEL_REGISTERS,
    sample_rate: 0x94,
    sample_rate_codes: [0x10, 0x01, 0x11],
    fifo_control: 0x33,
    fifo_clear: 0x00,
    iso_transport: 0x31,
    iso_transport_on: 0x00,
    samplerate_channel_max: 48_000_000,
    samplerate_fast_max: 48_000_000,
};

// Same register map, faster ADC in fast rate mode
static DDS140_REGISTERS: RegisterTable = RegisterTable {
    channels: BUUDAI_CHANNEL_REGISTERS,
    sample_rate: 0x94,
    sample_rate_codes: [0x10, 0x01, 0x11],
    fifo_control: 0x33,
    fifo_clear: 0x00,
    iso_transport: 0x31,
    iso_transport_on: 0x00,
    samplerate_channel_max: 48_000_000,
    samplerate_fast_max: 100_000_000,
};
