//! Data model (spec §3): protocol variants, acquisition data source, the
//! state machine's principal state variable, channel identity, and the
//! per-acquisition context.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Retry caps and timing constants, named rather than inlined as magic
/// numbers (spec §9).
pub const MAX_READ_RETRIES: u32 = 5;
pub const MAX_EMPTY_RETRIES: u32 = 5;
pub const TRIGGER_WAIT_SECONDS: u64 = 3;
pub const POLL_INTERVAL_US: u64 = 10_000;

/// Fixed-size prefix of every waveform block: transport framing (15
/// bytes) followed by the WaveDescriptor. Authoritative; the "361 vs 363"
/// discrepancy in the original driver's comments is just a stale comment,
/// this constant is the one true value (spec §9, I6).
pub const SIGLENT_HEADER_SIZE: usize = 363;

/// Offset of the descriptor-block-length field within the WaveDescriptor
/// (i.e. 15 bytes after the start of the raw block).
pub const DESC_LENGTH_OFFSET: usize = 15 + 36;
/// Offset of the data-block-length field within the WaveDescriptor.
pub const DATA_LENGTH_OFFSET: usize = 15 + 60;

/// Maximum USBTMC packet size on this hardware; the header read loop must
/// tolerate short reads at this granularity.
pub const MAX_USBTMC_PACKET: usize = 64;

/// Maximum number of logic channels (D0..D15).
pub const MAX_LOGIC_CHANNELS: usize = 16;
/// Maximum number of analog channels (C1..C8, though most SDS models ship
/// with 2 or 4).
pub const MAX_ANALOG_CHANNELS: usize = 8;

/// The three command-and-detection dialects spoken by SDS firmware
/// generations. Immutable once a device has been identified (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ProtocolVariant {
    /// Sequence-and-play-out models: support `ARM`/`:INR?` arming.
    SpoModel,
    /// Older, non-SPO models: arm straight into trigger wait.
    NonSpoModel,
    /// Current E-series: `:TRMD`-driven arming and stop detection.
    ESeries,
}

/// Where acquired samples are drawn from (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DataSource {
    /// Live single-shot capture off the screen buffer.
    Screen,
    /// One or more frames out of the device's history buffer.
    History,
    /// Read whatever is already captured, without re-arming.
    ReadOnly,
}

/// The ASM's principal state variable (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum WaitEvent {
    /// No wait in progress; continue the in-progress payload read.
    None,
    /// Waiting for the device to report a trigger.
    Trigger,
    /// Waiting to begin reading the next block (no device wait needed).
    Block,
    /// Waiting for the device to report it has stopped.
    Stop,
}

/// Secondary mode bit combined with [`WaitEvent`] and [`ProtocolVariant`]
/// to disambiguate "wait for trigger" from "wait for stop" (spec §3, I4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum WaitStatus {
    Trigger = 1,
    Stop = 2,
}

/// What kind of samples a channel carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ChannelKind {
    Analog,
    Logic,
}

/// Identity of one enabled channel (spec §3). `index` is 0-based within
/// its kind (analog `0..8`, logic `0..16`).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChannelDescriptor {
    pub index: u8,
    pub kind: ChannelKind,
    pub name: String,
}

impl ChannelDescriptor {
    pub fn analog(index: u8) -> Self {
        ChannelDescriptor {
            index,
            kind: ChannelKind::Analog,
            name: format!("C{}", index + 1),
        }
    }

    pub fn logic(index: u8) -> Self {
        ChannelDescriptor {
            index,
            kind: ChannelKind::Logic,
            name: format!("D{index}"),
        }
    }
}

/// Per-channel vertical settings read once at acquisition start by the
/// DCR and treated as read-only thereafter.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct VerticalSettings {
    pub vdiv: f64,
    pub offset: f64,
    pub attenuation: f64,
}

/// The device configuration snapshot taken once per acquisition at start
/// (spec §3 lifecycle, spec §4.2).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceConfiguration {
    pub timebase: f64,
    pub num_horizontal_divs: f64,
    pub vertical: [VerticalSettings; MAX_ANALOG_CHANNELS],
    pub coupling: [String; MAX_ANALOG_CHANNELS],
    pub trigger_source: String,
    pub trigger_delay_s: f64,
    pub trigger_slope: String,
    pub trigger_level: Option<f64>,
    pub memory_depth_analog: f64,
    pub memory_depth_digital: f64,
    pub samplerate: f64,
}

impl Default for DeviceConfiguration {
    fn default() -> Self {
        DeviceConfiguration {
            timebase: 0.0,
            num_horizontal_divs: 10.0,
            vertical: [VerticalSettings::default(); MAX_ANALOG_CHANNELS],
            coupling: Default::default(),
            trigger_source: String::new(),
            trigger_delay_s: 0.0,
            trigger_slope: String::new(),
            trigger_level: None,
            memory_depth_analog: 0.0,
            memory_depth_digital: 0.0,
            samplerate: 0.0,
        }
    }
}

/// Block-reassembly progress within the current channel fetch (spec §3
/// "Block progress").
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BlockProgress {
    pub num_header_bytes: usize,
    pub num_block_bytes: usize,
    pub num_samples: usize,
    pub num_block_read: u32,
}

/// Options a host supplies at acquisition start (spec §6 "Configuration
/// knobs"). This is the entirety of the configuration surface the core
/// exposes: it reads device settings, it does not choose them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartOptions {
    pub data_source: DataSource,
    /// `0` means "let the device/history tell us" (spec §4.4 history
    /// arming derives `limit_frames` from `FPAR?`/`:FRAM?`).
    pub limit_frames: u64,
    /// Optional early-stop bound on total samples per channel.
    pub limit_samples: Option<u64>,
}
