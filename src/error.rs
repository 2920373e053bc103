//! Errors surfaced to the host. See (spec §7) for the full taxonomy.
//!
//! [`Retry`] is deliberately not part of [`AcqError`]: it models the two
//! internal-only conditions (a transient USBTMC send-buffer drain, and a
//! device that answered with only the two line-feed terminator bytes)
//! that the acquisition state machine recovers from locally via bounded
//! retry. Neither ever reaches a caller.

use thiserror::Error;

/// Terminal errors that end an in-progress acquisition.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AcqError {
    /// The underlying transport returned an I/O failure that isn't one of
    /// the recoverable `-1`/`0` sentinels.
    #[error("transport error: {0}")]
    Transport(String),

    /// A trigger-wait or stop-wait exceeded `TRIGGER_WAIT_SECONDS`.
    #[error("timed out waiting for trigger/stop")]
    Timeout,

    /// A response did not have the shape the protocol guarantees (e.g.
    /// `TRSE?` returned fewer than 4 comma-separated fields, or `FPAR?`
    /// reported a frame count below 1).
    #[error("protocol malformed: {0}")]
    ProtocolMalformed(String),

    /// The device reported a zero-length waveform and the 3-byte probe
    /// after the header confirmed only the two terminator bytes followed.
    #[error("empty waveform")]
    EmptyWaveform,

    /// The device reported a zero-length waveform and the 3-byte probe
    /// did not match the expected two-terminator-byte shape.
    #[error("garbage waveform")]
    GarbageWaveform,

    /// The state machine observed a [`crate::types::WaitEvent`] it has no
    /// transition for. This should be unreachable; surfaced rather than
    /// panicking so a host can log and recover the session.
    #[error("state machine bug: {0}")]
    StateBug(String),
}

/// Internal-only recoverable conditions. Consumed entirely within
/// [`crate::acquisition::Acquisition::poll`]; never returned to a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Retry {
    /// `read_data` returned `-1`: the 61,440-byte USBTMC send buffer on
    /// the instrument is refilling. Retry after a short backoff.
    TransientDrain,

    /// The device replied with exactly the two line-feed terminator
    /// bytes and nothing else: retry the channel fetch from scratch.
    EmptyWaveformRetry,
}

pub type Result<T> = std::result::Result<T, AcqError>;
