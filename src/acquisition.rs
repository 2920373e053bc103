//! Acquisition State Machine (ASM, spec §4.4): the single-threaded,
//! cooperative `poll()` entry point that drives arming, trigger/stop
//! waits, chunked block reads, and channel/frame progression to
//! completion, emitting [`crate::emitter::Event`]s as it goes.

use std::collections::BTreeMap;
use std::thread::sleep;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::config::{self, DeviceState};
use crate::decoder::{analog_digits, bitplane_logic_channels, decode_analog_samples, HeaderOutcome, HeaderReader};
use crate::emitter::{Event, Unit};
use crate::error::AcqError;
use crate::protocol::{self, DEVICE_STATE_TRIG_RDY};
use crate::transport::{Transport, READ_TRANSIENT_DRAIN};
use crate::types::{
    BlockProgress, ChannelDescriptor, DataSource, DeviceConfiguration, ProtocolVariant,
    StartOptions, WaitEvent, WaitStatus, MAX_EMPTY_RETRIES, MAX_READ_RETRIES, SIGLENT_HEADER_SIZE,
    TRIGGER_WAIT_SECONDS,
};

/// Position within a frame's channel list (spec §9: explicit cursor, not
/// a linked list). `Logic` is not an index into anything -- the logic
/// phase reads every enabled logic channel in one combined step, so
/// there is nothing to iterate further once it's reached (spec I3:
/// `channel_cursor` is `None` iff no acquisition is running).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    Channel(usize),
    Logic,
}

enum PollFlow {
    /// Preserve all progress and return control to the host; call
    /// `poll()` again later.
    Yield,
    /// The current analog channel's block has been fully read.
    ChannelDone,
    /// The combined logic payload for this frame has been emitted.
    LogicDone,
}

/// Drives one acquisition (arm through final frame) against a borrowed
/// [`Transport`]. Not `Sync`: exactly one poll loop, on one thread, owns
/// this for the acquisition's lifetime (spec §5).
pub struct Acquisition<'a, T: Transport> {
    transport: &'a mut T,
    protocol: ProtocolVariant,
    data_source: DataSource,
    config: DeviceConfiguration,
    enabled_analog: Vec<ChannelDescriptor>,
    enabled_logic: Vec<ChannelDescriptor>,
    logic_enabled: bool,
    cursor: Option<Cursor>,
    wait_event: WaitEvent,
    wait_status: WaitStatus,
    block: BlockProgress,
    header_reader: Option<HeaderReader>,
    retry_count: u32,
    empty_retry_count: u32,
    limit_frames: u64,
    limit_samples: Option<u64>,
    num_frames: u64,
    close_history: bool,
    cancel_requested: bool,
    frame_open: bool,
    finished: bool,
}

impl<'a, T: Transport> Acquisition<'a, T> {
    /// Runs the DCR query sequence and arms the first frame (spec §4.2,
    /// §4.4 "Arming"), emitting `Header`, one `MetaAnalog` per analog
    /// channel, and the first `FrameBegin` into `sink`.
    pub fn start(
        transport: &'a mut T,
        protocol: ProtocolVariant,
        num_analog_channels: usize,
        num_horizontal_divs: f64,
        has_digital: bool,
        opts: StartOptions,
        sink: &mut Vec<Event>,
    ) -> Result<Self, AcqError> {
        let DeviceState {
            config,
            enabled_analog,
            enabled_logic,
            logic_enabled,
        } = config::read_device_state(
            &mut *transport,
            protocol,
            num_analog_channels,
            num_horizontal_divs,
            has_digital,
        )?;

        debug!(
            analog = enabled_analog.len(),
            logic = enabled_logic.len(),
            ?protocol,
            "starting acquisition"
        );

        let mut acq = Acquisition {
            transport,
            protocol,
            data_source: opts.data_source,
            config,
            enabled_analog,
            enabled_logic,
            logic_enabled,
            cursor: None,
            wait_event: WaitEvent::None,
            wait_status: WaitStatus::Trigger,
            block: BlockProgress::default(),
            header_reader: None,
            retry_count: 0,
            empty_retry_count: 0,
            limit_frames: opts.limit_frames,
            limit_samples: opts.limit_samples,
            num_frames: 0,
            close_history: false,
            cancel_requested: false,
            frame_open: false,
            finished: false,
        };

        sink.push(Event::Header {
            feed_version: crate::emitter::FEED_VERSION,
            start_time: chrono::Utc::now(),
            analog: acq.enabled_analog.clone(),
            logic: acq.enabled_logic.clone(),
        });
        for ch in acq.enabled_analog.clone() {
            let digits = analog_digits(acq.config.vertical[ch.index as usize].vdiv);
            sink.push(Event::MetaAnalog {
                channel: ch,
                digits,
            });
        }

        match acq.first_cursor() {
            None => {
                acq.terminate(sink);
                return Ok(acq);
            }
            Some(c) => acq.cursor = Some(c),
        }

        acq.capture_start()?;
        sink.push(Event::FrameBegin);
        acq.frame_open = true;

        Ok(acq)
    }

    /// Cooperative cancellation (spec §5): checked at the next poll
    /// entry, never pre-empts an in-flight transport call.
    pub fn cancel(&mut self) {
        self.cancel_requested = true;
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Advances the state machine by one bounded unit of work, pushing
    /// any resulting events into `sink`. Returns `Ok(true)` while the
    /// host should keep calling `poll()`, `Ok(false)` once the
    /// acquisition has fully stopped, and `Err` on a terminal error (the
    /// acquisition is also stopped in that case; `End` has already been
    /// pushed to `sink`).
    pub fn poll(&mut self, sink: &mut Vec<Event>) -> Result<bool, AcqError> {
        if self.finished {
            return Ok(false);
        }
        if self.cancel_requested {
            trace!("cancellation observed at poll entry");
            self.terminate(sink);
            return Ok(false);
        }

        if let Err(e) = self.dispatch_wait() {
            self.terminate(sink);
            return Err(e);
        }

        let flow = match self.cursor {
            Some(Cursor::Channel(idx)) => {
                let ch = self.enabled_analog[idx].clone();
                self.poll_analog_block(&ch, sink)
            }
            Some(Cursor::Logic) => self.run_logic_phase(sink),
            None => {
                return Err(AcqError::StateBug(
                    "poll() called with no channel cursor set".into(),
                ))
            }
        };

        match flow {
            Ok(PollFlow::Yield) => Ok(true),
            Ok(PollFlow::ChannelDone) => {
                self.advance_after_channel(sink)?;
                Ok(!self.finished)
            }
            Ok(PollFlow::LogicDone) => {
                // The original driver calls dev_acquisition_stop
                // unconditionally right after emitting the logic packet,
                // even when more frames remain (see DESIGN.md) -- we
                // reproduce that rather than silently fixing it, since a
                // multi-frame logic capture was apparently never
                // exercised upstream.
                self.terminate(sink);
                Ok(false)
            }
            Err(e) => {
                self.terminate(sink);
                Err(e)
            }
        }
    }

    fn dispatch_wait(&mut self) -> Result<(), AcqError> {
        match self.wait_event {
            WaitEvent::None => Ok(()),
            WaitEvent::Trigger => {
                self.trigger_wait()?;
                self.channel_start()
            }
            WaitEvent::Block => self.channel_start(),
            WaitEvent::Stop => {
                self.stop_wait()?;
                self.channel_start()
            }
        }
    }

    fn first_cursor(&self) -> Option<Cursor> {
        if !self.enabled_analog.is_empty() {
            Some(Cursor::Channel(0))
        } else if self.logic_enabled && !self.enabled_logic.is_empty() {
            Some(Cursor::Logic)
        } else {
            None
        }
    }

    /// Mirrors `siglent_sds_set_wait_event`: `WaitEvent::Stop` only takes
    /// effect on E-series (every other variant leaves `wait_event`
    /// untouched, see DESIGN.md) -- `wait_status` is set regardless.
    fn set_wait_event(&mut self, event: WaitEvent) {
        if event == WaitEvent::Stop {
            self.wait_status = WaitStatus::Stop;
            if self.protocol == ProtocolVariant::ESeries {
                self.wait_event = WaitEvent::Stop;
            }
        } else {
            self.wait_status = WaitStatus::Trigger;
            self.wait_event = event;
        }
    }

    fn capture_start(&mut self) -> Result<(), AcqError> {
        self.retry_count = 0;
        self.empty_retry_count = 0;
        match self.protocol {
            ProtocolVariant::SpoModel => match self.data_source {
                DataSource::Screen => {
                    self.send("ARM")?;
                    // `:INR?` bit 0 ("signal acquired", spec §6) is the one
                    // semantic shared by every consumer of this query in
                    // this driver, so arming polls it the same way
                    // trigger_wait/stop_wait do below. By the time this loop
                    // exits the trigger has already been observed, so there
                    // is nothing left to wait for -- proceed straight into
                    // the channel fetch rather than re-entering
                    // trigger_wait to watch the same bit a second time. Bit
                    // 1 is kept only as a (currently unused) hook for models
                    // that report block-readiness separately; see DESIGN.md.
                    let start = Instant::now();
                    let _out = loop {
                        if start.elapsed() >= Duration::from_secs(TRIGGER_WAIT_SECONDS) {
                            return Err(AcqError::Timeout);
                        }
                        let out = self.get_int(":INR?")?;
                        if out & DEVICE_STATE_TRIG_RDY != 0 {
                            break out;
                        }
                        sleep(Duration::from_micros(crate::types::POLL_INTERVAL_US));
                    };
                    self.set_wait_event(WaitEvent::Block);
                }
                DataSource::History => {
                    self.send("FPAR?")?;
                    let mut header = [0u8; 200];
                    let n = self.transport.read_data(&mut header, 200);
                    if n == READ_TRANSIENT_DRAIN || n == 0 {
                        return Err(AcqError::Transport(
                            "read error while reading history frame header".into(),
                        ));
                    }
                    let framecount = i32::from_le_bytes(header[40..44].try_into().unwrap()).max(0) as u64;
                    if self.limit_frames > framecount {
                        warn!(
                            limit_frames = self.limit_frames,
                            framecount, "frame limit higher than frames in device buffer"
                        );
                    } else if self.limit_frames == 0 {
                        self.limit_frames = framecount;
                    }
                    self.send(&format!("FRAM {}", self.num_frames + 1))?;
                    self.channel_start()?;
                    self.set_wait_event(WaitEvent::Stop);
                }
                DataSource::ReadOnly => {
                    self.set_wait_event(WaitEvent::Stop);
                }
            },
            ProtocolVariant::ESeries => match self.data_source {
                DataSource::Screen => {
                    self.limit_frames = 1;
                    self.close_history = false;
                    self.send(":TRMD SINGLE")?;
                    self.set_wait_event(WaitEvent::Stop);
                }
                DataSource::History => {
                    let trmd = self.get_string(":TRMD?")?;
                    self.close_history = trmd.trim() != "STOP";

                    let hsmd = self.get_string(":HSMD?")?;
                    if hsmd.trim() == "OFF" {
                        self.send(":HSMD ON")?;
                    } else {
                        self.send(":FRAM 10000000")?;
                    }

                    let framecount = self.get_int(":FRAM?")?;
                    if framecount < 1 {
                        return Err(AcqError::ProtocolMalformed(format!(
                            ":FRAM? reported {framecount}, expected at least 1"
                        )));
                    }
                    self.limit_frames = framecount as u64;
                    self.send(":FRAM 1")?;
                    self.set_wait_event(WaitEvent::Stop);
                }
                DataSource::ReadOnly => {
                    self.close_history = false;
                    self.limit_frames = 1;
                    self.set_wait_event(WaitEvent::Stop);
                }
            },
            ProtocolVariant::NonSpoModel => {
                self.set_wait_event(WaitEvent::Trigger);
            }
        }
        Ok(())
    }

    /// Sends the per-channel fetch command for the current cursor
    /// position and resets block progress (spec §4.4 "Channel start").
    fn channel_start(&mut self) -> Result<(), AcqError> {
        if let Some(Cursor::Channel(idx)) = self.cursor {
            let ch = self.enabled_analog[idx].clone();
            if let Some(cmd) = protocol::channel_fetch_cmd(self.protocol, &ch) {
                self.send(&cmd)?;
            }
        }
        self.block = BlockProgress::default();
        self.header_reader = None;
        self.empty_retry_count = 0;
        self.set_wait_event(WaitEvent::None);
        Ok(())
    }

    fn trigger_wait(&mut self) -> Result<(), AcqError> {
        let start = Instant::now();
        loop {
            if start.elapsed() >= Duration::from_secs(TRIGGER_WAIT_SECONDS) {
                debug!("timed out waiting for trigger");
                return Err(AcqError::Timeout);
            }
            let out = self.get_int(":INR?")?;
            if out & 1 == 1 {
                break;
            }
            sleep(Duration::from_micros(crate::types::POLL_INTERVAL_US));
        }

        let settle = protocol::trigger_settle_sleep_us(&self.config);
        if settle > 0 {
            sleep(Duration::from_micros(settle));
        }
        Ok(())
    }

    fn stop_wait(&mut self) -> Result<(), AcqError> {
        let start = Instant::now();
        match self.protocol {
            ProtocolVariant::ESeries => loop {
                if start.elapsed() >= Duration::from_secs(TRIGGER_WAIT_SECONDS) {
                    debug!("timed out waiting for stop");
                    return Err(AcqError::Timeout);
                }
                let trmd = self.get_string(":TRMD?")?;
                if trmd.trim() == "STOP" {
                    break;
                }
                sleep(Duration::from_micros(crate::types::POLL_INTERVAL_US));
            },
            _ => loop {
                if start.elapsed() >= Duration::from_secs(TRIGGER_WAIT_SECONDS) {
                    debug!("timed out waiting for stop");
                    return Err(AcqError::Timeout);
                }
                let out = self.get_int(":INR?")?;
                if out & 1 == 1 {
                    break;
                }
                sleep(Duration::from_micros(crate::types::POLL_INTERVAL_US));
            },
        }
        self.set_wait_event(WaitEvent::None);
        Ok(())
    }

    fn poll_analog_block(
        &mut self,
        ch: &ChannelDescriptor,
        sink: &mut Vec<Event>,
    ) -> Result<PollFlow, AcqError> {
        if self.block.num_block_bytes == 0 && self.block.num_samples == 0 {
            if self.header_reader.is_none() {
                // One-time setup for this block: the settle sleep and
                // `read_begin` must run exactly once, not on every poll that
                // finds the header still `Pending` (the 363-byte prefix
                // routinely spans several poll() ticks given 64-byte USBTMC
                // packets) -- gated on the reader's presence rather than the
                // block-progress counters, which don't move while the header
                // is still being accumulated.
                let sleep_us = protocol::pre_block_sleep_us(self.protocol, &self.config);
                match self.protocol {
                    ProtocolVariant::SpoModel | ProtocolVariant::NonSpoModel => {
                        sleep(Duration::from_micros(sleep_us));
                        self.transport.read_begin().map_err(AcqError::Transport)?;
                    }
                    ProtocolVariant::ESeries => {
                        self.transport.read_begin().map_err(AcqError::Transport)?;
                        sleep(Duration::from_micros(sleep_us));
                    }
                }
                self.header_reader = Some(HeaderReader::new());
            }

            let reader = self.header_reader.as_mut().unwrap();
            let outcome = match reader.poll(self.transport) {
                Ok(outcome) => outcome,
                // A header declaring a zero-length payload, confirmed by the
                // 3-byte probe, is retried exactly like the "just the
                // terminator" case below -- both are the device reporting
                // "nothing here yet". Only once MAX_EMPTY_RETRIES is
                // exhausted does this surface as a terminal error (spec §7).
                Err(e @ (AcqError::EmptyWaveform | AcqError::GarbageWaveform)) => {
                    self.header_reader = None;
                    if self.empty_retry_count < MAX_EMPTY_RETRIES {
                        self.empty_retry_count += 1;
                        sleep(Duration::from_millis(100));
                        self.set_wait_event(WaitEvent::Block);
                        return Ok(PollFlow::Yield);
                    }
                    return Err(e);
                }
                Err(e) => return Err(e),
            };
            match outcome {
                HeaderOutcome::Pending => return Ok(PollFlow::Yield),
                HeaderOutcome::Ready { num_samples, .. } => {
                    self.header_reader = None;
                    let capped = match self.limit_samples {
                        Some(limit) if (limit as usize) < num_samples => limit as usize,
                        _ => num_samples,
                    };
                    self.block = BlockProgress {
                        num_header_bytes: SIGLENT_HEADER_SIZE,
                        num_block_bytes: 0,
                        num_samples: capped,
                        num_block_read: 0,
                    };
                }
            }
        }

        loop {
            if self.block.num_block_bytes > self.block.num_samples {
                return Err(AcqError::ProtocolMalformed(
                    "negative remaining waveform length".into(),
                ));
            }
            let remaining = self.block.num_samples - self.block.num_block_bytes;
            let cap = remaining.min(10_240);
            let mut loop_bytes_read = 0usize;
            let mut chunk = Vec::new();

            loop {
                let want = self.block.num_samples - self.block.num_block_bytes;
                let mut buf = vec![0u8; want];
                let n = self.transport.read_data(&mut buf, want);

                if n == READ_TRANSIENT_DRAIN {
                    if loop_bytes_read > 0 {
                        break;
                    } else if self.retry_count < MAX_READ_RETRIES {
                        self.retry_count += 1;
                        sleep(Duration::from_millis(1));
                        return Ok(PollFlow::Yield);
                    } else {
                        return Err(AcqError::Transport(
                            "read error, aborting capture".into(),
                        ));
                    }
                } else if n == 0 {
                    return Err(AcqError::Transport(
                        "read returned zero bytes, aborting capture".into(),
                    ));
                } else if n == 2 && self.block.num_block_read == 0 {
                    if self.empty_retry_count < MAX_EMPTY_RETRIES {
                        self.empty_retry_count += 1;
                        sleep(Duration::from_millis(100));
                        self.set_wait_event(WaitEvent::Block);
                        return Ok(PollFlow::Yield);
                    }
                    break;
                }

                let n = n as usize;
                loop_bytes_read += n;
                chunk.extend_from_slice(&buf[..n]);
                self.block.num_block_bytes += n;
                self.block.num_block_read += 1;
                if loop_bytes_read >= cap {
                    break;
                }
            }

            self.retry_count = 0;
            if loop_bytes_read == 0 {
                break;
            }

            let vertical = self.config.vertical[ch.index as usize];
            let samples = decode_analog_samples(&chunk, vertical.vdiv, vertical.offset);
            sink.push(Event::AnalogPayload {
                channel: ch.clone(),
                samples,
                unit: Unit::Volt,
            });

            if self.block.num_block_bytes >= self.block.num_samples {
                let mut term = [0u8; 3];
                let n = self.transport.read_data(&mut term, 3);
                if n != 2 || !self.transport.read_complete() {
                    return Err(AcqError::Transport(
                        "expected terminator bytes after waveform block".into(),
                    ));
                }
                self.empty_retry_count = 0;
                self.block = BlockProgress::default();
                break;
            }
        }

        Ok(PollFlow::ChannelDone)
    }

    /// Reads every enabled logic channel's `DAT2` response and bit-planes
    /// them into one combined payload (spec §4.3 "Logic payload"). Unlike
    /// the original driver, this does not first send a per-channel
    /// `D%d:WF?` via `channel_start` -- that command's reply is never
    /// consumed on the original path either, and skipping it avoids
    /// leaving an unread reply on the wire (see DESIGN.md).
    fn run_logic_phase(&mut self, sink: &mut Vec<Event>) -> Result<PollFlow, AcqError> {
        let mut raw: BTreeMap<u8, Vec<u8>> = BTreeMap::new();

        for ch in self.enabled_logic.clone() {
            self.send(&format!("D{}:WF? DAT2", ch.index))?;
            self.transport.read_begin().map_err(AcqError::Transport)?;

            let mut channel_buf = Vec::new();
            loop {
                let mut buf = [0u8; 4096];
                let n = self.transport.read_data(&mut buf, buf.len());
                if n == READ_TRANSIENT_DRAIN {
                    // No progress was persisted for this frame; the next
                    // poll() call restarts the logic phase from scratch,
                    // matching the original's lack of partial state here.
                    return Ok(PollFlow::Yield);
                }
                if n == 0 {
                    break;
                }
                channel_buf.extend_from_slice(&buf[..n as usize]);
            }

            if channel_buf.len() > 15 {
                raw.insert(ch.index, channel_buf[15..].to_vec());
            }
        }

        let memory_depth_digital = self.config.memory_depth_digital as usize;
        let samples = bitplane_logic_channels(&raw, memory_depth_digital);
        sink.push(Event::LogicPayload {
            samples,
            unit_size: 2,
        });
        Ok(PollFlow::LogicDone)
    }

    fn advance_after_channel(&mut self, sink: &mut Vec<Event>) -> Result<(), AcqError> {
        if let Some(Cursor::Channel(idx)) = self.cursor {
            if idx + 1 < self.enabled_analog.len() {
                self.cursor = Some(Cursor::Channel(idx + 1));
                self.set_wait_event(WaitEvent::Block);
                return Ok(());
            }
        }
        if self.logic_enabled && !self.enabled_logic.is_empty() {
            self.cursor = Some(Cursor::Logic);
            self.set_wait_event(WaitEvent::None);
            return Ok(());
        }
        self.finish_frame(sink)
    }

    fn finish_frame(&mut self, sink: &mut Vec<Event>) -> Result<(), AcqError> {
        sink.push(Event::FrameEnd);
        self.frame_open = false;
        self.num_frames += 1;

        if self.num_frames >= self.limit_frames {
            if self.protocol == ProtocolVariant::ESeries
                && self.data_source == DataSource::History
                && self.close_history
            {
                if let Err(e) = self.send(":HSMD OFF") {
                    warn!(error = %e, "failed to close history mode");
                }
            }
            self.terminate(sink);
            return Ok(());
        }

        match self.first_cursor() {
            None => {
                self.terminate(sink);
                return Ok(());
            }
            Some(c) => self.cursor = Some(c),
        }

        match self.protocol {
            ProtocolVariant::ESeries => {
                self.send(&format!(":FRAM {}", self.num_frames + 1))?;
                sink.push(Event::FrameBegin);
                self.frame_open = true;
                self.set_wait_event(WaitEvent::Block);
            }
            ProtocolVariant::SpoModel | ProtocolVariant::NonSpoModel => {
                self.capture_start()?;
                sink.push(Event::FrameBegin);
                self.frame_open = true;
            }
        }
        Ok(())
    }

    fn terminate(&mut self, sink: &mut Vec<Event>) {
        if self.frame_open {
            sink.push(Event::FrameEnd);
            self.frame_open = false;
        }
        if !self.finished {
            sink.push(Event::End);
            self.finished = true;
        }
    }

    fn send(&mut self, cmd: &str) -> Result<(), AcqError> {
        self.transport.send(cmd).map_err(AcqError::Transport)
    }

    fn get_string(&mut self, query: &str) -> Result<String, AcqError> {
        self.transport.get_string(query).map_err(AcqError::Transport)
    }

    fn get_int(&mut self, query: &str) -> Result<i64, AcqError> {
        self.transport.get_int(query).map_err(AcqError::Transport)
    }
}
