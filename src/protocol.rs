//! Per-[`ProtocolVariant`] behavior (spec §4.4, §9): the small set of
//! operations that differ between SDS firmware generations. Spec §9 asks
//! for this to be modeled as "a tagged variant with a small vtable of
//! operations, not inheritance" -- with only three variants and no plans
//! to add more at runtime, a closed `match` over [`ProtocolVariant`] *is*
//! that vtable: zero-cost, exhaustiveness-checked by the compiler, and
//! free of the `dyn`-trait lifetime contortions a runtime vtable would
//! need here.

use crate::types::{ChannelDescriptor, ChannelKind, DeviceConfiguration, ProtocolVariant};

/// `:INR?` bit masks consulted by `ARM`-based arming (SPO models only).
/// `protocol.h` was not part of the retrieval pack this crate was built
/// from; these two values are inferred from the bit-0 "signal acquired"
/// convention `:INR?` uses everywhere else in this driver (spec §6), not
/// copied from a header we could read. Treat as provisional pending
/// verification against real hardware (see DESIGN.md).
pub(crate) const DEVICE_STATE_TRIG_RDY: i64 = 1;
/// Not currently consulted by the SPO arm sequence (see
/// `acquisition::Acquisition::capture_start` and DESIGN.md) -- kept as a
/// named constant rather than dropped, since a model that reports
/// block-readiness as a distinct `:INR?` bit would need exactly this.
#[allow(dead_code)]
pub(crate) const DEVICE_STATE_DATA_TRIG_RDY: i64 = 2;

/// The SCPI command that starts a channel fetch, or `None` when this
/// protocol variant never requests this channel kind directly (E-series
/// logic channels are folded into the combined digital-phase fetch
/// instead, see `acquisition::Acquisition::run_logic_phase`).
pub(crate) fn channel_fetch_cmd(protocol: ProtocolVariant, ch: &ChannelDescriptor) -> Option<String> {
    match (protocol, ch.kind) {
        (ProtocolVariant::ESeries, ChannelKind::Logic) => None,
        (_, ChannelKind::Analog) => Some(format!("C{}:WF? ALL", ch.index + 1)),
        (_, ChannelKind::Logic) => Some(format!("D{}:WF?", ch.index)),
    }
}

/// Microseconds to sleep before issuing `read_begin` for a fresh block,
/// letting the instrument fill its output buffers (spec §4.4).
pub(crate) fn pre_block_sleep_us(protocol: ProtocolVariant, cfg: &DeviceConfiguration) -> u64 {
    match protocol {
        ProtocolVariant::SpoModel | ProtocolVariant::NonSpoModel => {
            (cfg.memory_depth_analog * 2.5).max(0.0) as u64
        }
        ProtocolVariant::ESeries => {
            let computed = (cfg.timebase * cfg.num_horizontal_divs * 100_000.0).max(0.0) as u64;
            computed.min(10_000)
        }
    }
}

/// Microseconds to sleep once a trigger has been observed, letting the
/// acquisition buffer fill before the header read begins. Implemented
/// literally per `original_source/.../protocol.c`'s
/// `timebase * num_horizontal_divs * 1000` expression; see DESIGN.md for
/// why this does not actually compute "85% of sweep time" despite the
/// comment it carries there.
pub(crate) fn trigger_settle_sleep_us(cfg: &DeviceConfiguration) -> u64 {
    if cfg.timebase > 0.99e-6 && cfg.timebase < 0.51 {
        (cfg.timebase * cfg.num_horizontal_divs * 1000.0).max(0.0) as u64
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VerticalSettings;

    fn cfg(timebase: f64, memory_depth_analog: f64) -> DeviceConfiguration {
        DeviceConfiguration {
            timebase,
            num_horizontal_divs: 10.0,
            vertical: [VerticalSettings::default(); 8],
            coupling: Default::default(),
            trigger_source: String::new(),
            trigger_delay_s: 0.0,
            trigger_slope: String::new(),
            trigger_level: None,
            memory_depth_analog,
            memory_depth_digital: 0.0,
            samplerate: 0.0,
        }
    }

    #[test]
    fn eseries_pre_block_sleep_is_capped() {
        let c = cfg(1.0, 0.0); // timebase*divs*100000 = 1_000_000, capped to 10_000
        assert_eq!(pre_block_sleep_us(ProtocolVariant::ESeries, &c), 10_000);
    }

    #[test]
    fn spo_pre_block_sleep_scales_with_memory_depth() {
        let c = cfg(0.0, 1000.0);
        assert_eq!(pre_block_sleep_us(ProtocolVariant::SpoModel, &c), 2500);
    }

    #[test]
    fn settle_sleep_only_applies_in_timebase_window() {
        let slow = cfg(1.0, 0.0); // outside the 0.51s window
        assert_eq!(trigger_settle_sleep_us(&slow), 0);
        let fast = cfg(0.001, 0.0);
        assert_eq!(trigger_settle_sleep_us(&fast), 10);
    }

    #[test]
    fn eseries_logic_channel_has_no_direct_fetch() {
        let ch = ChannelDescriptor::logic(0);
        assert_eq!(channel_fetch_cmd(ProtocolVariant::ESeries, &ch), None);
    }

    #[test]
    fn spo_logic_channel_fetch_cmd() {
        let ch = ChannelDescriptor::logic(3);
        assert_eq!(
            channel_fetch_cmd(ProtocolVariant::SpoModel, &ch),
            Some("D3:WF?".to_string())
        );
    }
}
