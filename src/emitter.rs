//! Frame Emitter (FE, spec §4.5): the host-facing event vocabulary that
//! the acquisition state machine pushes into a caller-supplied sink as it
//! progresses, rather than owning a framework session-bus type it has no
//! business depending on.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use chrono::{DateTime, Utc};

use crate::types::ChannelDescriptor;

/// Feed version carried on every [`Event::Header`]. Grounded in the
/// sibling UNI-T DMM driver's `SR_DF_HEADER` packet (`header.feed_version
/// = 1`, `original_source/hardware/uni-t-dmm/api.c`) -- the session-bus
/// header shape this core's host-facing events mirror, even though that
/// driver itself is out of scope (spec §1).
pub const FEED_VERSION: u32 = 1;

/// Physical unit an analog payload carries. Only volts are produced
/// today; the type exists so a host need not infer it from channel kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Unit {
    Volt,
}

/// One unit of host-facing output from an [`crate::acquisition::Acquisition`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Event {
    /// Emitted once, before the first frame: announces the channels that
    /// will appear in every subsequent frame, the feed version, and the
    /// wall-clock time the acquisition started (spec §4.5/§6).
    Header {
        feed_version: u32,
        start_time: DateTime<Utc>,
        analog: Vec<ChannelDescriptor>,
        logic: Vec<ChannelDescriptor>,
    },
    /// Emitted once per analog channel, right after `Header`: display
    /// metadata (`digits`) a host needs before the first sample arrives.
    MetaAnalog {
        channel: ChannelDescriptor,
        digits: i32,
    },
    /// One chunk of decoded analog samples. Chunks may be smaller than
    /// the full channel length; their lengths sum to it (spec P2).
    AnalogPayload {
        channel: ChannelDescriptor,
        samples: Vec<f32>,
        unit: Unit,
    },
    /// The combined, bit-planed logic payload for one frame (spec §4.3):
    /// at most one per frame, present only when logic channels are
    /// enabled.
    LogicPayload { samples: Vec<u8>, unit_size: u8 },
    /// Emitted at the start of every frame, including the first.
    FrameBegin,
    /// Emitted once a frame's channels have all been read, or the
    /// acquisition aborts mid-frame.
    FrameEnd,
    /// Emitted exactly once, when the acquisition has fully stopped:
    /// normal completion, frame limit reached, error, or cancellation.
    End,
}
