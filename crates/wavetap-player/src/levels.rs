//! Rolling buffer of normalized loudness levels.
//!
//! Written by the sampling worker, read by the UI thread. Every operation takes
//! the single internal lock for a bounded amount of work, so readers never wait
//! on I/O.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::MAX_SAMPLES;

/// Thread-safe FIFO of levels in `0.0..=1.0`, capped at a fixed capacity.
#[derive(Debug)]
pub struct LevelBuffer {
    inner: Mutex<LevelInner>,
    capacity: usize,
}

#[derive(Debug)]
struct LevelInner {
    levels: VecDeque<f32>,
    current: f32,
    /// Total pushes since creation; never reset, so cursors stay valid across `clear`.
    pushed: u64,
}

/// Levels pushed after a cursor, oldest first.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LevelBatch {
    pub levels: Vec<f32>,
    /// Pass back to [`LevelBuffer::since`] on the next poll.
    pub cursor: u64,
}

impl Default for LevelBuffer {
    fn default() -> Self {
        Self::new(MAX_SAMPLES)
    }
}

impl LevelBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(LevelInner {
                levels: VecDeque::with_capacity(capacity),
                current: 0.0,
                pushed: 0,
            }),
            capacity,
        }
    }

    /// Create a buffer with the default capacity behind an `Arc`.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, LevelInner> {
        // Plain floats cannot be left half-written, so a poisoned guard is still usable.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a level, clamped to `0.0..=1.0`; NaN is stored as `0.0`.
    pub fn push(&self, level: f32) {
        let level = clamp_level(level);
        let mut g = self.lock();
        g.levels.push_back(level);
        while g.levels.len() > self.capacity {
            g.levels.pop_front();
        }
        g.current = level;
        g.pushed = g.pushed.wrapping_add(1);
    }

    /// Exactly `count` levels, oldest first, left-padded with `0.0`.
    pub fn get_recent(&self, count: usize) -> Vec<f32> {
        let g = self.lock();
        let available = g.levels.len().min(count);
        let mut out = Vec::with_capacity(count);
        out.resize(count - available, 0.0);
        out.extend(g.levels.iter().skip(g.levels.len() - available).copied());
        out
    }

    /// Last pushed level, or `0.0` when empty.
    pub fn get_current(&self) -> f32 {
        let g = self.lock();
        if g.levels.is_empty() { 0.0 } else { g.current }
    }

    /// Levels pushed after `cursor` that are still buffered.
    ///
    /// A reader that falls more than `capacity` pushes behind only sees the
    /// retained tail.
    pub fn since(&self, cursor: u64) -> LevelBatch {
        let g = self.lock();
        let fresh = g.pushed.saturating_sub(cursor).min(g.levels.len() as u64) as usize;
        LevelBatch {
            levels: g.levels.iter().skip(g.levels.len() - fresh).copied().collect(),
            cursor: g.pushed,
        }
    }

    /// Copy of every buffered level, oldest first.
    pub fn snapshot(&self) -> Vec<f32> {
        self.lock().levels.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().levels.is_empty()
    }

    /// Total number of levels ever pushed.
    pub fn total_pushed(&self) -> u64 {
        self.lock().pushed
    }

    /// Drop all levels and reset the current level to `0.0`.
    pub fn clear(&self) {
        let mut g = self.lock();
        g.levels.clear();
        g.current = 0.0;
    }
}

fn clamp_level(level: f32) -> f32 {
    if level.is_nan() { 0.0 } else { level.clamp(0.0, 1.0) }
}
