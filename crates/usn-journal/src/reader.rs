//! The journal read loop and its error policy.
//!
//! OS error codes 87 (invalid parameter) and 1181 (journal entry
//! deleted) are advancement conditions, not failures: 87 advances the
//! cursor in small steps, 1181 probes forward for the first readable USN
//! and records the skipped range as a gap. The loop terminates on EOF,
//! on a cursor that stops advancing, and on the global-timeout and
//! stall guards.
//!
//! [`UsnReadCursor`] is the pull-based state machine; [`run_read_loop`]
//! drives it with callbacks for the batch-insert pass, and
//! [`UsnEventStream`] flattens it into an event iterator.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use chrono::Utc;
use core_types::{FileTime, UsnEvent, UsnGap, VolumeId};
use tracing::{debug, info, warn};

use crate::exclusion::ExclusionFilter;
use crate::record::parse_read_buffer;
use crate::{UsnError, UsnResult};

pub const ERROR_HANDLE_EOF: u32 = 38;
pub const ERROR_INVALID_PARAMETER: u32 = 87;
pub const ERROR_NO_DATA: u32 = 232;
pub const ERROR_JOURNAL_NOT_ACTIVE: u32 = 1179;
pub const ERROR_JOURNAL_ENTRY_DELETED: u32 = 1181;

/// Step used for error-87 advancement.
const ERR87_STEP: i64 = 64;
/// Jump used after repeated error-87 at the same cursor.
const ERR87_JUMP: i64 = 1024 * 1024;
/// Consecutive error-87 occurrences tolerated before the jump kicks in.
const ERR87_MAX_RETRIES: u32 = 5;
/// Gap probing starts at 8 bytes and doubles up to this bound.
const GAP_PROBE_MAX: i64 = 1024;
/// Probe reads use a deliberately small buffer.
const GAP_PROBE_BUFFER: usize = 1024;

/// Journal identity and extent as returned by QUERY_USN_JOURNAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsnJournalData {
    pub journal_id: u64,
    pub first_usn: i64,
    pub next_usn: i64,
    pub lowest_valid_usn: i64,
    pub max_usn: i64,
    /// Query structure version that succeeded (2, 1, or 0).
    pub query_version: u8,
}

/// Failure of a single read request, carrying the OS error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JournalIoError {
    pub code: u32,
}

/// Port over the journal ioctls. The Windows implementation issues
/// DeviceIoControl; tests script responses and keep the port by
/// mutable reference via the blanket impl below.
pub trait JournalIo {
    /// QUERY_USN_JOURNAL, attempted v2 then v1 then v0.
    fn query(&mut self) -> UsnResult<UsnJournalData>;

    /// READ_USN_JOURNAL from `start_usn` into a buffer of `buffer_size`.
    fn read(
        &mut self,
        start_usn: i64,
        journal_id: u64,
        buffer_size: usize,
    ) -> Result<Vec<u8>, JournalIoError>;
}

impl<T: JournalIo> JournalIo for &mut T {
    fn query(&mut self) -> UsnResult<UsnJournalData> {
        (**self).query()
    }

    fn read(
        &mut self,
        start_usn: i64,
        journal_id: u64,
        buffer_size: usize,
    ) -> Result<Vec<u8>, JournalIoError> {
        (**self).read(start_usn, journal_id, buffer_size)
    }
}

/// Read-loop knobs; defaults mirror the engine configuration.
#[derive(Debug, Clone)]
pub struct UsnReadConfig {
    pub buffer_size: usize,
    pub max_processing_time: Duration,
    pub stall_detection: Duration,
}

impl Default for UsnReadConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1024 * 1024,
            max_processing_time: Duration::from_secs(3600),
            stall_detection: Duration::from_secs(300),
        }
    }
}

/// Counters for one completed pass.
#[derive(Debug, Clone, Default)]
pub struct UsnPassStats {
    pub events_emitted: u64,
    pub events_excluded: u64,
    pub gaps_recorded: u64,
    pub reads: u64,
    pub last_usn: i64,
}

/// One step of the cursor: a batch of decoded events, or a recorded
/// wrap gap.
#[derive(Debug)]
pub enum CursorStep {
    Events(Vec<UsnEvent>),
    Gap(UsnGap),
}

/// Pull-based journal reader holding the whole loop state.
pub struct UsnReadCursor<IO: JournalIo> {
    io: IO,
    volume: VolumeId,
    config: UsnReadConfig,
    filter: ExclusionFilter,
    journal: UsnJournalData,
    start_usn: i64,
    last_emitted_usn: i64,
    err87_count: u32,
    started: Instant,
    stall_usn: i64,
    stall_since: Instant,
    stats: UsnPassStats,
    done: bool,
}

impl<IO: JournalIo> UsnReadCursor<IO> {
    /// Query the journal and position the cursor at `FirstUsn`.
    pub fn new(
        mut io: IO,
        volume: VolumeId,
        config: UsnReadConfig,
        filter: ExclusionFilter,
    ) -> UsnResult<Self> {
        let journal = io.query()?;
        info!(
            volume = %volume,
            journal_id = journal.journal_id,
            first_usn = journal.first_usn,
            next_usn = journal.next_usn,
            query_version = journal.query_version,
            "USN journal opened"
        );
        let start_usn = journal.first_usn;
        Ok(UsnReadCursor {
            io,
            volume,
            config,
            filter,
            journal,
            start_usn,
            last_emitted_usn: i64::MIN,
            err87_count: 0,
            started: Instant::now(),
            stall_usn: start_usn,
            stall_since: Instant::now(),
            stats: UsnPassStats::default(),
            done: false,
        })
    }

    pub fn journal(&self) -> &UsnJournalData {
        &self.journal
    }

    /// Counters so far; `last_usn` and the exclusion count are final
    /// once the cursor returns `None`.
    pub fn stats(&self) -> UsnPassStats {
        let mut stats = self.stats.clone();
        stats.events_excluded = self.filter.excluded_count();
        stats.last_usn = self.start_usn;
        stats
    }

    /// Advance to the next batch of events or the next gap. `Ok(None)`
    /// means the pass is over.
    pub fn next_step(&mut self) -> UsnResult<Option<CursorStep>> {
        while !self.done {
            if self.started.elapsed() > self.config.max_processing_time {
                warn!(volume = %self.volume, "USN pass hit the global processing timeout");
                break;
            }
            if self.stall_since.elapsed() > self.config.stall_detection {
                if self.start_usn == self.stall_usn {
                    warn!(
                        volume = %self.volume,
                        usn = self.start_usn,
                        "USN cursor stalled; stopping pass"
                    );
                    break;
                }
                self.stall_usn = self.start_usn;
                self.stall_since = Instant::now();
            }

            self.stats.reads += 1;
            match self
                .io
                .read(self.start_usn, self.journal.journal_id, self.config.buffer_size)
            {
                Ok(buffer) => {
                    self.err87_count = 0;
                    if buffer.len() < 8 {
                        break;
                    }
                    let Some(parsed) = parse_read_buffer(&buffer, self.volume) else {
                        break;
                    };

                    let mut events = Vec::with_capacity(parsed.events.len());
                    for event in parsed.events {
                        if self.filter.check(&event.file_name) {
                            continue;
                        }
                        if event.usn < self.last_emitted_usn {
                            debug!(
                                usn = event.usn,
                                last = self.last_emitted_usn,
                                "journal returned out-of-order USN; kept"
                            );
                        }
                        self.last_emitted_usn = self.last_emitted_usn.max(event.usn);
                        events.push(event);
                    }

                    // A response that does not move the cursor means the
                    // journal has nothing further for us.
                    if parsed.next_usn == 0 || parsed.next_usn <= self.start_usn {
                        self.done = true;
                    } else {
                        self.start_usn = parsed.next_usn;
                    }

                    if events.is_empty() {
                        continue;
                    }
                    self.stats.events_emitted += events.len() as u64;
                    return Ok(Some(CursorStep::Events(events)));
                }
                Err(JournalIoError { code: ERROR_HANDLE_EOF | ERROR_NO_DATA }) => {
                    info!(volume = %self.volume, "reached end of USN journal");
                    break;
                }
                Err(JournalIoError {
                    code: ERROR_JOURNAL_NOT_ACTIVE,
                }) => {
                    self.done = true;
                    return Err(UsnError::JournalNotActive);
                }
                Err(JournalIoError {
                    code: ERROR_INVALID_PARAMETER,
                }) => {
                    // Consecutive occurrences accumulate; any successful
                    // read resets the counter.
                    self.err87_count += 1;
                    if self.err87_count > ERR87_MAX_RETRIES {
                        warn!(
                            volume = %self.volume,
                            usn = self.start_usn,
                            "repeated invalid-parameter errors; jumping 1 MiB forward"
                        );
                        self.start_usn += ERR87_JUMP;
                        self.err87_count = 0;
                    } else {
                        self.start_usn += ERR87_STEP;
                    }
                    if self.start_usn >= self.journal.next_usn {
                        info!(
                            volume = %self.volume,
                            "cursor reached journal end during error-87 handling"
                        );
                        break;
                    }
                }
                Err(JournalIoError {
                    code: ERROR_JOURNAL_ENTRY_DELETED,
                }) => {
                    let gap_start = self.start_usn;
                    let gap_end = self.probe_past_gap(gap_start);
                    let gap = UsnGap {
                        volume: self.volume,
                        gap_start_usn: gap_start,
                        gap_end_usn: gap_end,
                        detection_time: FileTime::from_datetime(Utc::now()),
                    };
                    debug!(
                        volume = %self.volume,
                        gap_start,
                        gap_end,
                        significance = gap.significance().name(),
                        "journal wrapped past cursor; gap recorded"
                    );
                    self.stats.gaps_recorded += 1;
                    self.start_usn = gap_end;
                    return Ok(Some(CursorStep::Gap(gap)));
                }
                Err(JournalIoError { code }) => {
                    self.done = true;
                    return Err(UsnError::Read { code });
                }
            }
        }

        self.done = true;
        info!(
            volume = %self.volume,
            events = self.stats.events_emitted,
            excluded = self.filter.excluded_count(),
            gaps = self.stats.gaps_recorded,
            "USN pass finished"
        );
        Ok(None)
    }

    /// Find the smallest forward increment (8 bytes doubling to 1024)
    /// that reads without error 1181; the skipped range becomes the gap.
    fn probe_past_gap(&mut self, gap_start: i64) -> i64 {
        let mut increment = 8i64;
        while increment <= GAP_PROBE_MAX {
            let candidate = gap_start + increment;
            match self
                .io
                .read(candidate, self.journal.journal_id, GAP_PROBE_BUFFER)
            {
                Err(JournalIoError {
                    code: ERROR_JOURNAL_ENTRY_DELETED,
                }) => increment *= 2,
                // Success or any different error means the journal is
                // readable (or differently broken) from here.
                _ => return candidate,
            }
        }
        gap_start + GAP_PROBE_MAX
    }
}

/// Drive the read loop, feeding decoded events and gaps to the sinks.
///
/// Events arrive at `on_event` in ascending USN order (strictly
/// non-decreasing across gap skips); already-excluded file names never
/// reach the sink.
pub fn run_read_loop<IO: JournalIo>(
    io: IO,
    volume: VolumeId,
    config: &UsnReadConfig,
    filter: ExclusionFilter,
    mut on_event: impl FnMut(UsnEvent),
    mut on_gap: impl FnMut(UsnGap),
) -> UsnResult<UsnPassStats> {
    let mut cursor = UsnReadCursor::new(io, volume, config.clone(), filter)?;
    while let Some(step) = cursor.next_step()? {
        match step {
            CursorStep::Events(events) => events.into_iter().for_each(&mut on_event),
            CursorStep::Gap(gap) => on_gap(gap),
        }
    }
    Ok(cursor.stats())
}

/// Iterator view of a journal pass; gaps are collected on the side.
///
/// The stream is finite and not restartable. A terminal read error ends
/// iteration; `take_error` reports it afterwards.
pub struct UsnEventStream<IO: JournalIo> {
    cursor: UsnReadCursor<IO>,
    buffered: VecDeque<UsnEvent>,
    gaps: Vec<UsnGap>,
    error: Option<UsnError>,
}

impl<IO: JournalIo> UsnEventStream<IO> {
    pub fn new(
        io: IO,
        volume: VolumeId,
        config: UsnReadConfig,
        filter: ExclusionFilter,
    ) -> UsnResult<Self> {
        Ok(UsnEventStream {
            cursor: UsnReadCursor::new(io, volume, config, filter)?,
            buffered: VecDeque::new(),
            gaps: Vec::new(),
            error: None,
        })
    }

    pub fn gaps(&self) -> &[UsnGap] {
        &self.gaps
    }

    pub fn stats(&self) -> UsnPassStats {
        self.cursor.stats()
    }

    /// The error that terminated the stream early, if any.
    pub fn take_error(&mut self) -> Option<UsnError> {
        self.error.take()
    }
}

impl<IO: JournalIo> Iterator for UsnEventStream<IO> {
    type Item = UsnEvent;

    fn next(&mut self) -> Option<UsnEvent> {
        loop {
            if let Some(event) = self.buffered.pop_front() {
                return Some(event);
            }
            if self.error.is_some() {
                return None;
            }
            match self.cursor.next_step() {
                Ok(Some(CursorStep::Events(events))) => self.buffered.extend(events),
                Ok(Some(CursorStep::Gap(gap))) => self.gaps.push(gap),
                Ok(None) => return None,
                Err(err) => {
                    self.error = Some(err);
                    return None;
                }
            }
        }
    }
}
