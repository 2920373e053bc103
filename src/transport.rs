//! Transport Adapter (TA, spec §4.1): the sans-I/O boundary between the
//! acquisition core and the byte-oriented SCPI/USBTMC transport.
//!
//! The core is generic over [`Transport`] rather than owning a concrete
//! USBTMC handle; this mirrors the teacher crate's separation between the
//! ITM packet decoder (which only ever sees bytes pushed into it) and
//! whatever feeds it those bytes. Production code implements `Transport`
//! against the real SCPI link; tests implement it with a scripted
//! in-memory fake (see `tests/scenarios.rs`).

/// Sentinel returned by [`Transport::read_data`] in place of a byte count.
pub const READ_TRANSIENT_DRAIN: isize = -1;

/// A byte-oriented command/response transport to a Siglent SDS instrument.
///
/// Implementors are not required to be `Send`/`Sync`; the acquisition core
/// drives exactly one transport from a single poll loop (spec §5).
pub trait Transport {
    /// Send a formatted SCPI command or query. No response is read.
    fn send(&mut self, cmd: &str) -> Result<(), String>;

    /// Send a query and return its text response, trimmed of any line
    /// terminator.
    fn get_string(&mut self, query: &str) -> Result<String, String>;

    /// Send a query and parse its response as an integer.
    fn get_int(&mut self, query: &str) -> Result<i64, String> {
        let s = self.get_string(query)?;
        s.trim()
            .parse()
            .map_err(|e| format!("{query}: not an integer ({e})"))
    }

    /// Send a query and parse its response as a float.
    fn get_float(&mut self, query: &str) -> Result<f64, String> {
        let s = self.get_string(query)?;
        s.trim()
            .parse()
            .map_err(|e| format!("{query}: not a float ({e})"))
    }

    /// Send a query and parse its response per SCPI boolean conventions
    /// (`ON`/`1` vs `OFF`/`0`).
    fn get_bool(&mut self, query: &str) -> Result<bool, String> {
        let s = self.get_string(query)?;
        match s.trim() {
            "ON" | "1" => Ok(true),
            "OFF" | "0" => Ok(false),
            other => Err(format!("{query}: not a boolean ({other:?})")),
        }
    }

    /// Signal the start of an unbounded binary response (e.g. a waveform
    /// block). Must be called once before the matching sequence of
    /// [`Transport::read_data`] calls.
    fn read_begin(&mut self) -> Result<(), String>;

    /// Read up to `n` bytes of the current binary response into `buf`
    /// (which must be at least `n` bytes long).
    ///
    /// Returns the number of bytes read in `0..=n`, or
    /// [`READ_TRANSIENT_DRAIN`] if the instrument's internal send buffer
    /// (~61,440 bytes) is refilling — not fatal by itself (spec I8); or
    /// `0` at end of response.
    fn read_data(&mut self, buf: &mut [u8], n: usize) -> isize;

    /// Whether the current binary response has been fully consumed.
    fn read_complete(&mut self) -> bool;
}
