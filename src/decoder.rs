//! Waveform Block Decoder (WBD, spec §4.3): parses the fixed-size block
//! prefix, extracts the descriptor/data lengths, and converts raw analog
//! and logic samples into physical values.

use crate::error::AcqError;
use crate::transport::{Transport, READ_TRANSIENT_DRAIN};
use crate::types::{DATA_LENGTH_OFFSET, DESC_LENGTH_OFFSET, SIGLENT_HEADER_SIZE};
use std::collections::BTreeMap;

/// The two length fields carried in every WaveDescriptor (spec I7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveDescriptor {
    pub desc_length: i32,
    pub data_length: i32,
}

/// Extracts [`WaveDescriptor::desc_length`] and
/// [`WaveDescriptor::data_length`] from a fully-read 363-byte block
/// prefix (spec I6, I7).
pub fn parse_descriptor_lengths(block: &[u8]) -> Result<WaveDescriptor, AcqError> {
    if block.len() < SIGLENT_HEADER_SIZE {
        return Err(AcqError::ProtocolMalformed(format!(
            "block prefix shorter than SIGLENT_HEADER_SIZE ({} < {SIGLENT_HEADER_SIZE})",
            block.len()
        )));
    }

    let desc_length = i32::from_le_bytes(
        block[DESC_LENGTH_OFFSET..DESC_LENGTH_OFFSET + 4]
            .try_into()
            .unwrap(),
    );
    let data_length = i32::from_le_bytes(
        block[DATA_LENGTH_OFFSET..DATA_LENGTH_OFFSET + 4]
            .try_into()
            .unwrap(),
    );

    Ok(WaveDescriptor {
        desc_length,
        data_length,
    })
}

/// Incremental reader for the 363-byte block prefix. Tolerates the short
/// reads a USBTMC transport delivers (packets capped at 64 bytes) by
/// accumulating across repeated [`HeaderReader::poll`] calls (spec §4.3
/// "Header phase").
pub struct HeaderReader {
    buf: [u8; SIGLENT_HEADER_SIZE],
    filled: usize,
}

/// Result of one [`HeaderReader::poll`] call.
pub enum HeaderOutcome {
    /// Not enough bytes have arrived yet; call again on the next poll.
    Pending,
    /// The prefix is complete and declares a non-zero payload.
    Ready {
        /// `desc_length + 15`, the full size of descriptor + framing.
        block_header_size: usize,
        /// Declared payload length in bytes (`data_length`).
        num_samples: usize,
    },
}

impl HeaderReader {
    pub fn new() -> Self {
        HeaderReader {
            buf: [0; SIGLENT_HEADER_SIZE],
            filled: 0,
        }
    }

    /// Advance the header read by whatever the transport has available
    /// right now. On reaching `SIGLENT_HEADER_SIZE` bytes, also performs
    /// the "empty vs garbage waveform" probe spec §4.3 describes for a
    /// zero-length payload.
    pub fn poll<T: Transport + ?Sized>(&mut self, t: &mut T) -> Result<HeaderOutcome, AcqError> {
        if self.filled < SIGLENT_HEADER_SIZE {
            let want = SIGLENT_HEADER_SIZE - self.filled;
            let n = t.read_data(&mut self.buf[self.filled..], want);
            if n == READ_TRANSIENT_DRAIN {
                return Err(AcqError::Transport(
                    "read error while reading waveform header".into(),
                ));
            }
            if n == 0 {
                return Ok(HeaderOutcome::Pending);
            }
            self.filled += n as usize;
            if self.filled < SIGLENT_HEADER_SIZE {
                return Ok(HeaderOutcome::Pending);
            }
        }

        let desc = parse_descriptor_lengths(&self.buf)?;
        if desc.data_length == 0 {
            let mut probe = [0u8; 3];
            let n = t.read_data(&mut probe, 3);
            return if n == 2 {
                Err(AcqError::EmptyWaveform)
            } else {
                Err(AcqError::GarbageWaveform)
            };
        }

        Ok(HeaderOutcome::Ready {
            block_header_size: (desc.desc_length + 15) as usize,
            num_samples: desc.data_length as usize,
        })
    }
}

impl Default for HeaderReader {
    fn default() -> Self {
        Self::new()
    }
}

/// Converts a chunk of raw signed-8-bit analog codes to volts (spec
/// §4.3, P3): `voltage = vdiv * (raw / 25.0) - offset`.
pub fn decode_analog_samples(raw: &[u8], vdiv: f64, offset: f64) -> Vec<f32> {
    raw.iter()
        .map(|&b| {
            let code = b as i8;
            ((vdiv * (code as f64 / 25.0)) - offset) as f32
        })
        .collect()
}

/// Display-digits metadata for an analog channel, derived from its
/// vertical gain: `-floor(log10(vdiv)) + (log10(vdiv) < 0 ? 1 : 0)`.
pub fn analog_digits(vdiv: f64) -> i32 {
    let log = vdiv.log10();
    let bias = if log < 0.0 { 1.0 } else { 0.0 };
    (-log.floor() + bias) as i32
}

/// Bit-planes raw per-logic-channel byte streams into an interleaved
/// 16-bit-wide sample stream (spec §4.3 "Logic payload", P4).
///
/// `raw_per_channel` maps a logic channel index (`0..16`) to its raw
/// bytes with the 15-byte transport header already stripped. Each byte
/// holds 8 consecutive samples, LSB first. Channels `0..8` land in the
/// low byte of each output word, `8..16` in the high byte; channels with
/// no entry contribute all-zero bits. The returned buffer has exactly
/// `2 * memory_depth_digital` bytes (unit size 2, spec §4.5).
pub fn bitplane_logic_channels(
    raw_per_channel: &BTreeMap<u8, Vec<u8>>,
    memory_depth_digital: usize,
) -> Vec<u8> {
    let mut low = vec![0u8; memory_depth_digital];
    let mut high = vec![0u8; memory_depth_digital];

    for (&ch, raw) in raw_per_channel {
        let (acc, bit) = if ch < 8 {
            (&mut low, ch)
        } else {
            (&mut high, ch - 8)
        };

        let mut sample_index = 0usize;
        'bytes: for &byte in raw {
            let mut sample = byte;
            for _ in 0..8 {
                if sample_index >= memory_depth_digital {
                    break 'bytes;
                }
                if sample & 1 != 0 {
                    acc[sample_index] |= 1 << bit;
                }
                sample >>= 1;
                sample_index += 1;
            }
        }
    }

    let mut out = Vec::with_capacity(memory_depth_digital * 2);
    for i in 0..memory_depth_digital {
        out.push(low[i]);
        out.push(high[i]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analog_conversion_is_exact() {
        let raw = [25i8 as u8, (-25i8) as u8, 50i8 as u8, 0u8];
        let samples = decode_analog_samples(&raw, 1.0, 0.0);
        assert_eq!(samples, vec![1.0, -1.0, 2.0, 0.0]);
    }

    #[test]
    fn analog_conversion_applies_offset() {
        let raw = [25i8 as u8];
        let samples = decode_analog_samples(&raw, 2.0, 0.5);
        // (2.0 * (25/25.0)) - 0.5 = 2.0 - 0.5 = 1.5
        assert_eq!(samples, vec![1.5]);
    }

    #[test]
    fn digits_matches_formula() {
        assert_eq!(analog_digits(1.0), 0);
        assert_eq!(analog_digits(0.1), 1);
        assert_eq!(analog_digits(0.01), 2);
        assert_eq!(analog_digits(10.0), -1);
    }

    #[test]
    fn descriptor_lengths_parse_at_correct_offsets() {
        let mut block = vec![0u8; SIGLENT_HEADER_SIZE];
        block[DESC_LENGTH_OFFSET..DESC_LENGTH_OFFSET + 4].copy_from_slice(&346i32.to_le_bytes());
        block[DATA_LENGTH_OFFSET..DATA_LENGTH_OFFSET + 4].copy_from_slice(&1400i32.to_le_bytes());
        let desc = parse_descriptor_lengths(&block).unwrap();
        assert_eq!(desc.desc_length, 346);
        assert_eq!(desc.data_length, 1400);
    }

    #[test]
    fn bitplane_single_channel_is_identity() {
        let mut raw = BTreeMap::new();
        // D0, one byte: 0b0000_0001 -> sample 0 set, samples 1..8 clear.
        raw.insert(0u8, vec![0b0000_0001]);
        let out = bitplane_logic_channels(&raw, 8);
        assert_eq!(out[0], 1); // low[0]
        assert_eq!(out[1], 0); // high[0]
        for i in 1..8 {
            assert_eq!(out[2 * i], 0);
            assert_eq!(out[2 * i + 1], 0);
        }
    }

    #[test]
    fn bitplane_missing_channels_contribute_zero() {
        let raw = BTreeMap::new();
        let out = bitplane_logic_channels(&raw, 4);
        assert_eq!(out, vec![0u8; 8]);
    }

    #[test]
    fn bitplane_packs_low_and_high_independently() {
        let mut raw = BTreeMap::new();
        raw.insert(0u8, vec![0xFFu8]); // D0 set for all 8 samples
        raw.insert(8u8, vec![0xFFu8]); // D8 set for all 8 samples
        let out = bitplane_logic_channels(&raw, 8);
        for i in 0..8 {
            assert_eq!(out[2 * i], 0b0000_0001); // low bit 0 (D0)
            assert_eq!(out[2 * i + 1], 0b0000_0001); // high bit 0 (D8)
        }
    }
}
