//! An acquisition state machine and waveform block decoder for
//! Siglent SDS-family oscilloscopes, talking SCPI over a USBTMC-like
//! transport.
//!
//! This crate is [sans-I/O](https://sans-io.readthedocs.io/how-to-sans-io.html):
//! it never opens a device itself. A host implements [`Transport`] against
//! whatever USBTMC/VISA/socket library it already uses, then drives an
//! [`Acquisition`] by calling [`Acquisition::poll`] in a loop, reading
//! [`Event`]s out of the sink it supplies. This mirrors the split between a
//! bitstream decoder and whatever feeds it bytes: the protocol and the
//! transport never need to know about each other's I/O model.
//!
//! Common abbreviations used throughout this crate:
//!
//! - DCR: device configuration reader;
//! - WBD: waveform block decoder;
//! - ASM: acquisition state machine;
//! - SPO: sequence-and-play-out (one of the three SDS firmware dialects);
//! - vdiv: volts-per-division, a channel's vertical gain setting.

pub mod acquisition;
pub mod config;
pub mod decoder;
pub mod emitter;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod types;

pub use acquisition::Acquisition;
pub use config::{read_device_state, DeviceState};
pub use decoder::{
    analog_digits, bitplane_logic_channels, decode_analog_samples, parse_descriptor_lengths,
    HeaderOutcome, HeaderReader, WaveDescriptor,
};
pub use emitter::{Event, Unit};
pub use error::AcqError;
pub use transport::Transport;
pub use types::{
    ChannelDescriptor, ChannelKind, DataSource, DeviceConfiguration, ProtocolVariant,
    StartOptions, VerticalSettings, WaitEvent, WaitStatus,
};
