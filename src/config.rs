//! Device Configuration Reader (DCR, spec §4.2): the one-shot query
//! sequence the ASM runs at acquisition start to snapshot the channels,
//! vertical/horizontal settings and trigger configuration it needs to
//! decode and label waveform blocks. Read-only: choosing these settings
//! is explicitly out of scope (spec §1 Non-goals).

use crate::error::AcqError;
use crate::transport::Transport;
use crate::types::{
    ChannelDescriptor, DeviceConfiguration, ProtocolVariant, VerticalSettings,
    MAX_LOGIC_CHANNELS,
};
use tracing::debug;

/// Everything the DCR reads back from the instrument in one sweep, bundled
/// so the ASM can move it into an [`crate::acquisition::Acquisition`] in
/// one step.
#[derive(Debug, Clone)]
pub struct DeviceState {
    pub config: DeviceConfiguration,
    pub enabled_analog: Vec<ChannelDescriptor>,
    pub enabled_logic: Vec<ChannelDescriptor>,
    pub logic_enabled: bool,
}

/// Runs the full DCR query sequence (spec §4.2).
///
/// `num_analog_channels` and `num_horizontal_divs` are model constants
/// (how many `C`-channels and the panel's fixed division count) rather
/// than anything queried over SCPI; `has_digital` says whether this model
/// has a logic-analyzer pod at all.
pub fn read_device_state<T: Transport>(
    t: &mut T,
    protocol: ProtocolVariant,
    num_analog_channels: usize,
    num_horizontal_divs: f64,
    has_digital: bool,
) -> Result<DeviceState, AcqError> {
    let mut enabled_analog = Vec::new();
    for i in 0..num_analog_channels {
        let cmd = format!("C{}:TRA?", i + 1);
        if get_bool(t, &cmd)? {
            enabled_analog.push(ChannelDescriptor::analog(i as u8));
        }
    }
    debug!(count = enabled_analog.len(), "analog channels enabled");

    let mut enabled_logic = Vec::new();
    let mut logic_enabled = false;
    if has_digital {
        logic_enabled = get_bool(t, "DI:SW?")?;
        debug!(logic_enabled, "logic analyzer pod state");
        if logic_enabled {
            for i in 0..MAX_LOGIC_CHANNELS {
                let cmd = format!("D{i}:TRA?");
                if get_bool(t, &cmd)? {
                    enabled_logic.push(ChannelDescriptor::logic(i as u8));
                }
            }
        }
    }

    let timebase = get_float(t, ":TDIV?")?;

    let mut vertical = [VerticalSettings::default(); 8];
    let mut coupling: [String; 8] = Default::default();
    for i in 0..num_analog_channels.min(8) {
        vertical[i].attenuation = get_float(t, &format!("C{}:ATTN?", i + 1))?;
        vertical[i].vdiv = get_float(t, &format!("C{}:VDIV?", i + 1))?;
        vertical[i].offset = get_float(t, &format!("C{}:OFST?", i + 1))?;
        coupling[i] = get_string(t, &format!("C{}:CPL?", i + 1))?;
    }

    let trse = get_string(t, "TRSE?")?;
    let tokens: Vec<&str> = trse.split(',').collect();
    if tokens.len() < 4 {
        return Err(AcqError::ProtocolMalformed(format!(
            "TRSE? response has {} fields, need at least 4: {trse:?}",
            tokens.len()
        )));
    }
    let trigger_source = tokens[2].trim().to_string();

    // The original driver reads tokens[4] unconditionally after only
    // checking tokens.len() >= 4 -- an out-of-bounds access when the
    // response has exactly 4 fields. We treat a missing 5th field as "no
    // delay reported" instead of replicating that bug.
    let trigger_delay_s = tokens
        .get(4)
        .map(|s| parse_trigger_delay(s))
        .unwrap_or(0.0);

    let trigger_slope = get_string(t, &format!("{trigger_source}:TRSL?"))?;

    let trigger_level = if trigger_source.starts_with('C') {
        Some(get_float(t, &format!("{trigger_source}:TRLV?"))?)
    } else {
        None
    };

    let (memory_depth_analog, memory_depth_digital) = match protocol {
        ProtocolVariant::SpoModel | ProtocolVariant::NonSpoModel => {
            let resp = get_string(t, "SANU? C1")?;
            (parse_pts_suffix(&resp), 0.0)
        }
        ProtocolVariant::ESeries => {
            let analog = get_float(t, "SANU? C1")?.trunc();
            let digital = if logic_enabled {
                get_float(t, "SANU? D0")?.trunc()
            } else {
                0.0
            };
            (analog, digital)
        }
    };

    let samplerate = memory_depth_analog / (timebase * num_horizontal_divs);
    debug!(samplerate, memory_depth_analog, "derived samplerate");

    let config = DeviceConfiguration {
        timebase,
        num_horizontal_divs,
        vertical,
        coupling,
        trigger_source,
        trigger_delay_s,
        trigger_slope,
        trigger_level,
        memory_depth_analog,
        memory_depth_digital,
        samplerate,
    };

    Ok(DeviceState {
        config,
        enabled_analog,
        enabled_logic,
        logic_enabled,
    })
}

/// Scales a `TRSE?` trigger-delay field by its unit suffix. Implemented
/// literally per `original_source/.../protocol.c` rather than "fixed":
/// the denominators it divides by (`1e9` for `us`, `1e6` for `ns`, `1e3`
/// for `ms`) do not actually convert those units to seconds -- see
/// DESIGN.md for the analysis. A firmware response without one of the
/// four recognized suffixes yields 0.0, matching the original's
/// fall-through (uninitialized-looking `trigger_pos` left at its initial
/// value).
fn parse_trigger_delay(field: &str) -> f64 {
    let trimmed = field.trim();
    let value: f64 = trimmed
        .trim_end_matches(|c: char| c.is_alphabetic())
        .parse()
        .unwrap_or(0.0);
    let lower = trimmed.to_ascii_lowercase();
    if lower.ends_with("us") {
        value / 1_000_000_000.0
    } else if lower.ends_with("ns") {
        value / 1_000_000.0
    } else if lower.ends_with("ms") {
        value / 1_000.0
    } else if lower.ends_with('s') {
        value
    } else {
        0.0
    }
}

/// Scales a `SANU?` response carrying a `Mpts`/`Kpts` suffix. Implemented
/// literally per the original driver: `Kpts` scales by `1e4`, not `1e3`
/// as the suffix alone would suggest (see DESIGN.md). A response with
/// neither suffix is a bare point count and is returned unscaled (spec
/// §4.2).
fn parse_pts_suffix(s: &str) -> f64 {
    let trimmed = s.trim();
    if let Some(stripped) = trimmed.strip_suffix("Mpts") {
        stripped.trim().parse::<f64>().unwrap_or(0.0) * 1_000_000.0
    } else if let Some(stripped) = trimmed.strip_suffix("Kpts") {
        stripped.trim().parse::<f64>().unwrap_or(0.0) * 10_000.0
    } else {
        trimmed.parse::<f64>().unwrap_or(0.0)
    }
}

fn get_bool<T: Transport>(t: &mut T, query: &str) -> Result<bool, AcqError> {
    t.get_bool(query).map_err(AcqError::Transport)
}

fn get_float<T: Transport>(t: &mut T, query: &str) -> Result<f64, AcqError> {
    t.get_float(query).map_err(AcqError::Transport)
}

fn get_string<T: Transport>(t: &mut T, query: &str) -> Result<String, AcqError> {
    t.get_string(query).map_err(AcqError::Transport)
}
