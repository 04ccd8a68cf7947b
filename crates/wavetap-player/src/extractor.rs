//! PCM → loudness extraction on the sampling worker thread.
//!
//! The worker reads the sampler's stdout without blocking, folds mono s16le
//! samples into fixed-size chunks and pushes one RMS level per chunk into the
//! [`LevelBuffer`]. When the sampler exits while the session is still current
//! it is respawned through the [`SamplerLink`] and reading continues.

use std::io::{ErrorKind, Read};
use std::process::ExitStatus;
use std::time::{Duration, Instant};

use crate::config::{CHUNK_SAMPLES, READ_BUFFER_BYTES, RMS_GAIN, RestartPolicy};
use crate::error::Result;
use crate::levels::LevelBuffer;

/// Loudness of one chunk: RMS over `[-1, 1]`-normalized samples, scaled by
/// [`RMS_GAIN`] and clamped to `0.0..=1.0`.
pub fn chunk_level(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples
        .iter()
        .map(|&s| {
            let v = s as f64 / 32768.0;
            v * v
        })
        .sum();
    let rms = (sum_squares / samples.len() as f64).sqrt();
    (rms * RMS_GAIN).min(1.0) as f32
}

/// Accumulates raw little-endian bytes into chunks and emits levels.
#[derive(Debug)]
pub struct LevelMeter {
    chunk: Vec<i16>,
    chunk_samples: usize,
    /// Low byte of a sample split across two reads.
    carry: Option<u8>,
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new(CHUNK_SAMPLES)
    }
}

impl LevelMeter {
    pub fn new(chunk_samples: usize) -> Self {
        let chunk_samples = chunk_samples.max(1);
        Self {
            chunk: Vec::with_capacity(chunk_samples),
            chunk_samples,
            carry: None,
        }
    }

    /// Feed bytes from the pipe; returns how many levels were pushed.
    pub fn feed(&mut self, mut bytes: &[u8], levels: &LevelBuffer) -> usize {
        let mut produced = 0;
        if let Some(lo) = self.carry.take() {
            match bytes.split_first() {
                Some((&hi, rest)) => {
                    produced += self.push_sample(i16::from_le_bytes([lo, hi]), levels);
                    bytes = rest;
                }
                None => {
                    self.carry = Some(lo);
                    return 0;
                }
            }
        }
        let mut pairs = bytes.chunks_exact(2);
        for pair in &mut pairs {
            produced += self.push_sample(i16::from_le_bytes([pair[0], pair[1]]), levels);
        }
        if let [lo] = pairs.remainder() {
            self.carry = Some(*lo);
        }
        produced
    }

    fn push_sample(&mut self, sample: i16, levels: &LevelBuffer) -> usize {
        self.chunk.push(sample);
        if self.chunk.len() < self.chunk_samples {
            return 0;
        }
        levels.push(chunk_level(&self.chunk));
        self.chunk.clear();
        1
    }

    /// Drop a partial chunk and any split byte (new stream, new alignment).
    pub fn reset(&mut self) {
        self.chunk.clear();
        self.carry = None;
    }

    pub fn pending_samples(&self) -> usize {
        self.chunk.len()
    }
}

/// The worker's view of the sampler process it reads from.
pub trait SamplerLink {
    type Reader: Read;

    /// Whether the owning session is still active and has not been superseded.
    fn is_current(&self) -> bool;

    /// Reap the current sampler if it has exited.
    fn poll_exit(&mut self) -> Option<ExitStatus>;

    /// Spawn a replacement sampler for the same URL/token and return its
    /// non-blocking output. `Ok(None)` when the session ended first.
    fn respawn(&mut self) -> Result<Option<Self::Reader>>;
}

/// Timing knobs for the worker loop.
#[derive(Clone, Debug)]
pub struct ExtractorSettings {
    pub idle_poll: Duration,
    pub read_error_backoff: Duration,
    pub restart: RestartPolicy,
}

/// Why the worker loop returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtractorExit {
    /// The session was stopped or replaced.
    Cancelled,
    /// A restart could not be performed; sampling is off for this session.
    SamplingDisabled,
}

/// Worker body: read, meter, respawn on exit, until the session ends.
pub struct SampleExtractor<'a, L: SamplerLink> {
    link: L,
    levels: &'a LevelBuffer,
    settings: ExtractorSettings,
    meter: LevelMeter,
    /// Consecutive sampler runs that exited without producing a byte.
    empty_streak: u32,
}

impl<'a, L: SamplerLink> SampleExtractor<'a, L> {
    pub fn new(link: L, levels: &'a LevelBuffer, settings: ExtractorSettings) -> Self {
        Self {
            link,
            levels,
            settings,
            meter: LevelMeter::default(),
            empty_streak: 0,
        }
    }

    pub fn run(mut self, mut reader: L::Reader) -> ExtractorExit {
        let mut buf = [0u8; READ_BUFFER_BYTES];
        let mut run_bytes: u64 = 0;
        let mut read_error_logged = false;

        while self.link.is_current() {
            match reader.read(&mut buf) {
                Ok(0) => {
                    // Write end closed; the process is gone or about to be.
                    if !self.handle_possible_exit(&mut reader, &mut run_bytes) {
                        return self.exit_reason();
                    }
                }
                Ok(n) => {
                    run_bytes += n as u64;
                    read_error_logged = false;
                    self.meter.feed(&buf[..n], self.levels);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if !self.handle_possible_exit(&mut reader, &mut run_bytes) {
                        return self.exit_reason();
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    if !read_error_logged {
                        tracing::warn!(error = %e, "sampler pipe read error");
                        read_error_logged = true;
                    }
                    std::thread::sleep(self.settings.read_error_backoff);
                }
            }
        }
        ExtractorExit::Cancelled
    }

    fn exit_reason(&self) -> ExtractorExit {
        if self.link.is_current() {
            ExtractorExit::SamplingDisabled
        } else {
            ExtractorExit::Cancelled
        }
    }

    /// No data right now. Respawn if the sampler has exited, otherwise idle.
    /// Returns `false` when the loop must end.
    fn handle_possible_exit(&mut self, reader: &mut L::Reader, run_bytes: &mut u64) -> bool {
        let Some(status) = self.link.poll_exit() else {
            std::thread::sleep(self.settings.idle_poll);
            return true;
        };
        if !self.link.is_current() {
            return false;
        }

        if *run_bytes == 0 {
            self.empty_streak = self.empty_streak.saturating_add(1);
        } else {
            self.empty_streak = 0;
        }
        tracing::debug!(
            status = %status,
            bytes = *run_bytes,
            empty_streak = self.empty_streak,
            "sampler exited; respawning"
        );

        let delay = self.settings.restart.delay_for(self.empty_streak);
        if !delay.is_zero() && !self.sleep_while_current(delay) {
            return false;
        }

        match self.link.respawn() {
            Ok(Some(next)) => {
                *reader = next;
                *run_bytes = 0;
                self.meter.reset();
                true
            }
            Ok(None) => {
                tracing::debug!("session ended before sampler restart");
                false
            }
            Err(e) => {
                if self.link.is_current() {
                    tracing::warn!(error = %e, "sampler restart failed; level sampling disabled");
                }
                false
            }
        }
    }

    /// Sleep up to `total`, waking every `idle_poll` to observe cancellation.
    fn sleep_while_current(&self, total: Duration) -> bool {
        let deadline = Instant::now() + total;
        let step = self.settings.idle_poll.max(Duration::from_millis(1));
        loop {
            if !self.link.is_current() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(step.min(deadline - now));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SupervisorError;
    use std::collections::VecDeque;
    use std::io;
    use std::os::unix::process::ExitStatusExt;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn le_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn silent_chunk_is_exactly_zero() {
        assert_eq!(chunk_level(&[0i16; CHUNK_SAMPLES]), 0.0);
    }

    #[test]
    fn full_scale_chunk_saturates_to_one() {
        assert_eq!(chunk_level(&[i16::MIN; CHUNK_SAMPLES]), 1.0);
        assert_eq!(chunk_level(&[i16::MAX; CHUNK_SAMPLES]), 1.0);
        let alternating: Vec<i16> = (0..CHUNK_SAMPLES)
            .map(|i| if i % 2 == 0 { i16::MAX } else { i16::MIN })
            .collect();
        assert_eq!(chunk_level(&alternating), 1.0);
    }

    #[test]
    fn quarter_scale_square_wave_reads_half() {
        let samples: Vec<i16> = (0..CHUNK_SAMPLES)
            .map(|i| if i % 2 == 0 { 8192 } else { -8192 })
            .collect();
        let level = chunk_level(&samples);
        assert!((level - 0.5).abs() < 1e-6, "level={level}");
    }

    #[test]
    fn empty_chunk_is_zero() {
        assert_eq!(chunk_level(&[]), 0.0);
    }

    #[test]
    fn meter_pushes_one_level_per_full_chunk() {
        let levels = LevelBuffer::default();
        let mut meter = LevelMeter::default();
        let bytes = le_bytes(&vec![0i16; CHUNK_SAMPLES * 2 + 10]);
        assert_eq!(meter.feed(&bytes, &levels), 2);
        assert_eq!(levels.len(), 2);
        assert_eq!(meter.pending_samples(), 10);
        assert_eq!(levels.get_current(), 0.0);
    }

    #[test]
    fn meter_keeps_alignment_across_odd_reads() {
        let levels = LevelBuffer::default();
        let mut meter = LevelMeter::new(2);
        let bytes = le_bytes(&[i16::MIN, i16::MIN, 0, 0]);
        // 3 + 1 + 4 bytes: splits the second sample across reads.
        assert_eq!(meter.feed(&bytes[..3], &levels), 0);
        assert_eq!(meter.feed(&bytes[3..4], &levels), 1);
        assert_eq!(meter.feed(&bytes[4..], &levels), 1);
        assert_eq!(levels.snapshot(), vec![1.0, 0.0]);
    }

    #[test]
    fn meter_reset_discards_partial_state() {
        let levels = LevelBuffer::default();
        let mut meter = LevelMeter::new(4);
        meter.feed(&[1, 2, 3], &levels);
        meter.reset();
        assert_eq!(meter.pending_samples(), 0);
        assert_eq!(meter.feed(&le_bytes(&[0; 4]), &levels), 1);
    }

    /// Reader that yields scripted results, then reports would-block forever.
    struct ScriptedReader {
        steps: VecDeque<io::Result<Vec<u8>>>,
    }

    impl ScriptedReader {
        fn new(steps: Vec<io::Result<Vec<u8>>>) -> Self {
            Self {
                steps: steps.into(),
            }
        }
    }

    impl Read for ScriptedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.steps.pop_front() {
                Some(Ok(bytes)) => {
                    let n = bytes.len().min(buf.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                    if n < bytes.len() {
                        self.steps.push_front(Ok(bytes[n..].to_vec()));
                    }
                    Ok(n)
                }
                Some(Err(e)) => Err(e),
                None => Err(io::Error::from(ErrorKind::WouldBlock)),
            }
        }
    }

    struct FakeLink {
        active: Arc<AtomicBool>,
        /// Readers handed out by successive respawns.
        next_readers: VecDeque<ScriptedReader>,
        respawns: Arc<AtomicUsize>,
        /// Exit statuses reported by successive polls after EOF.
        exits: VecDeque<ExitStatus>,
        fail_respawn: bool,
    }

    impl SamplerLink for FakeLink {
        type Reader = ScriptedReader;

        fn is_current(&self) -> bool {
            self.active.load(Ordering::SeqCst)
        }

        fn poll_exit(&mut self) -> Option<ExitStatus> {
            self.exits.pop_front()
        }

        fn respawn(&mut self) -> Result<Option<ScriptedReader>> {
            if self.fail_respawn {
                return Err(SupervisorError::Pipe("no pipe".into()));
            }
            self.respawns.fetch_add(1, Ordering::SeqCst);
            match self.next_readers.pop_front() {
                Some(r) => Ok(Some(r)),
                None => {
                    // Out of script: the session ends under the restart.
                    self.active.store(false, Ordering::SeqCst);
                    Ok(None)
                }
            }
        }
    }

    fn settings() -> ExtractorSettings {
        ExtractorSettings {
            idle_poll: Duration::from_millis(1),
            read_error_backoff: Duration::from_millis(1),
            restart: RestartPolicy::default(),
        }
    }

    #[test]
    fn clean_exit_after_one_chunk_respawns_and_keeps_level() {
        let levels = LevelBuffer::default();
        let respawns = Arc::new(AtomicUsize::new(0));
        let link = FakeLink {
            active: Arc::new(AtomicBool::new(true)),
            next_readers: VecDeque::new(),
            respawns: respawns.clone(),
            exits: VecDeque::from([ExitStatus::from_raw(0)]),
            fail_respawn: false,
        };
        let first = ScriptedReader::new(vec![Ok(le_bytes(&[0; CHUNK_SAMPLES])), Ok(Vec::new())]);
        let exit = SampleExtractor::new(link, &levels, settings()).run(first);

        assert_eq!(exit, ExtractorExit::Cancelled);
        assert_eq!(respawns.load(Ordering::SeqCst), 1);
        assert_eq!(levels.get_current(), 0.0);
        assert_eq!(levels.get_recent(5), vec![0.0; 5]);
        assert_eq!(levels.total_pushed(), 1);
    }

    #[test]
    fn error_exit_respawns_and_sampling_resumes() {
        let levels = LevelBuffer::default();
        let respawns = Arc::new(AtomicUsize::new(0));
        let second = ScriptedReader::new(vec![
            Ok(le_bytes(&[i16::MIN; CHUNK_SAMPLES])),
            Ok(Vec::new()),
        ]);
        let link = FakeLink {
            active: Arc::new(AtomicBool::new(true)),
            next_readers: VecDeque::from([second]),
            respawns: respawns.clone(),
            // exit code 1, then clean exit of the replacement
            exits: VecDeque::from([ExitStatus::from_raw(1 << 8), ExitStatus::from_raw(0)]),
            fail_respawn: false,
        };
        let first = ScriptedReader::new(vec![Ok(Vec::new())]);
        SampleExtractor::new(link, &levels, settings()).run(first);

        assert_eq!(respawns.load(Ordering::SeqCst), 2);
        assert_eq!(levels.snapshot(), vec![1.0]);
    }

    #[test]
    fn failed_respawn_disables_sampling() {
        let levels = LevelBuffer::default();
        let link = FakeLink {
            active: Arc::new(AtomicBool::new(true)),
            next_readers: VecDeque::new(),
            respawns: Arc::new(AtomicUsize::new(0)),
            exits: VecDeque::from([ExitStatus::from_raw(0)]),
            fail_respawn: true,
        };
        let first = ScriptedReader::new(vec![Ok(Vec::new())]);
        let exit = SampleExtractor::new(link, &levels, settings()).run(first);
        assert_eq!(exit, ExtractorExit::SamplingDisabled);
    }

    #[test]
    fn session_ending_during_restart_is_a_cancellation() {
        let levels = LevelBuffer::default();
        let active = Arc::new(AtomicBool::new(true));
        let link = FakeLink {
            active: active.clone(),
            next_readers: VecDeque::new(),
            respawns: Arc::new(AtomicUsize::new(0)),
            exits: VecDeque::from([ExitStatus::from_raw(0)]),
            fail_respawn: false,
        };
        let first = ScriptedReader::new(vec![Ok(le_bytes(&[0; CHUNK_SAMPLES / 2]))]);
        let exit = SampleExtractor::new(link, &levels, settings()).run(first);

        assert_eq!(exit, ExtractorExit::Cancelled);
        assert!(!active.load(Ordering::SeqCst));
        assert_eq!(levels.total_pushed(), 0);
    }

    #[test]
    fn inactive_session_never_respawns() {
        let levels = LevelBuffer::default();
        let respawns = Arc::new(AtomicUsize::new(0));
        let link = FakeLink {
            active: Arc::new(AtomicBool::new(false)),
            next_readers: VecDeque::new(),
            respawns: respawns.clone(),
            exits: VecDeque::from([ExitStatus::from_raw(0)]),
            fail_respawn: false,
        };
        let first = ScriptedReader::new(vec![Ok(Vec::new())]);
        let exit = SampleExtractor::new(link, &levels, settings()).run(first);
        assert_eq!(exit, ExtractorExit::Cancelled);
        assert_eq!(respawns.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn transient_read_errors_do_not_end_the_loop() {
        let levels = LevelBuffer::default();
        let link = FakeLink {
            active: Arc::new(AtomicBool::new(true)),
            next_readers: VecDeque::new(),
            respawns: Arc::new(AtomicUsize::new(0)),
            exits: VecDeque::from([ExitStatus::from_raw(0)]),
            fail_respawn: false,
        };
        let first = ScriptedReader::new(vec![
            Err(io::Error::from(ErrorKind::Interrupted)),
            Err(io::Error::other("boom")),
            Ok(le_bytes(&[0; CHUNK_SAMPLES])),
            Ok(Vec::new()),
        ]);
        SampleExtractor::new(link, &levels, settings()).run(first);
        assert_eq!(levels.total_pushed(), 1);
    }
}
