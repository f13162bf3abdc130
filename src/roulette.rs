use itertools::Itertools;
use std::time::{
    Duration,
    Instant,
};
use thiserror::Error;

pub const DEFAULT_REVEAL_DELAY: Duration = Duration::from_millis(3000);
pub const MIN_REVEAL_DELAY: Duration = Duration::from_millis(3000);
pub const MAX_REVEAL_DELAY: Duration = Duration::from_millis(4000);

/// Copies of the catalog laid out on each side of the winning cell.
const CATALOG_COPIES_PER_SIDE: usize = 2;

/// Decoy cells around the true outcome, arranged so a fixed centre pointer
/// lands on it when the scroll finishes.
#[derive(Clone, Debug, PartialEq)]
pub struct RouletteStrip<T> {
    cells: Vec<T>,
}

impl<T> RouletteStrip<T> {
    pub fn cells(&self) -> &[T] {
        &self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn pointer_index(&self) -> usize {
        pointer_index(self.cells.len())
    }

    pub fn winner(&self) -> Option<&T> {
        self.cells.get(self.pointer_index())
    }
}

/// Lays out `catalog, catalog, outcome, catalog, catalog`.
///
/// For a catalog of `n` items the strip holds `4n + 1` cells and the outcome
/// sits at `2n`. An empty catalog yields the outcome alone.
pub fn build_strip<T: Clone>(catalog: &[T], outcome: T) -> RouletteStrip<T> {
    let side = || {
        std::iter::repeat_n(catalog, CATALOG_COPIES_PER_SIDE)
            .flatten()
            .cloned()
    };
    let cells = side()
        .chain(std::iter::once(outcome))
        .chain(side())
        .collect_vec();
    RouletteStrip { cells }
}

/// Centre of a strip of `len` cells. Always derived from the length that was
/// actually built.
pub fn pointer_index(len: usize) -> usize {
    len / 2
}

/// Leftmost visible cell (fractional) for a viewport `visible` cells wide
/// after `progress` of the scroll. At progress 1 the viewport centre sits on
/// the pointer index; at 0 the strip starts from its first cell.
pub fn scroll_position(len: usize, visible: usize, progress: f64) -> f64 {
    let travel = travel_cells(len, visible);
    travel * ease_out_cubic(progress.clamp(0.0, 1.0))
}

/// Distance the strip scrolls over a full reveal, in cells.
pub fn travel_cells(len: usize, visible: usize) -> f64 {
    let centre = (visible / 2) as f64;
    pointer_index(len) as f64 - centre
}

pub fn ease_out_cubic(t: f64) -> f64 {
    let inv = 1.0 - t;
    1.0 - inv * inv * inv
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum RevealPhase {
    #[default]
    Idle,
    Suspense,
    Result,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum RevealError {
    #[error("a case opening is already in progress ({0:?})")]
    AlreadyActive(RevealPhase),
    #[error("nothing to dismiss while {0:?}")]
    NotRevealed(RevealPhase),
}

/// Timed reveal lifecycle: `Idle -> Suspense -> Result -> Idle`.
///
/// The suspense phase always lasts `delay`. Only dismissal is driven by the
/// user. Time is passed in, so callers decide how the clock advances.
#[derive(Debug)]
pub struct RevealSequencer<T> {
    phase: RevealPhase,
    delay: Duration,
    started_at: Option<Instant>,
    payload: Option<T>,
}

impl<T> Default for RevealSequencer<T> {
    fn default() -> Self {
        Self::new(DEFAULT_REVEAL_DELAY)
    }
}

impl<T> RevealSequencer<T> {
    pub fn new(delay: Duration) -> Self {
        Self {
            phase: RevealPhase::Idle,
            delay,
            started_at: None,
            payload: None,
        }
    }

    pub fn phase(&self) -> RevealPhase {
        self.phase
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn payload(&self) -> Option<&T> {
        self.payload.as_ref()
    }

    pub fn is_idle(&self) -> bool {
        self.phase == RevealPhase::Idle
    }

    /// When the pending Suspense -> Result transition fires.
    pub fn deadline(&self) -> Option<Instant> {
        match self.phase {
            RevealPhase::Suspense => self.started_at.map(|t| t + self.delay),
            _ => None,
        }
    }

    pub fn begin(&mut self, payload: T, now: Instant) -> Result<(), RevealError> {
        if self.phase != RevealPhase::Idle {
            return Err(RevealError::AlreadyActive(self.phase));
        }
        self.phase = RevealPhase::Suspense;
        self.started_at = Some(now);
        self.payload = Some(payload);
        Ok(())
    }

    /// Advances the clock. Returns true when this call moved Suspense to Result.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.deadline() {
            Some(deadline) if now >= deadline => {
                self.phase = RevealPhase::Result;
                true
            }
            _ => false,
        }
    }

    pub fn dismiss(&mut self) -> Result<T, RevealError> {
        if self.phase != RevealPhase::Result {
            return Err(RevealError::NotRevealed(self.phase));
        }
        self.phase = RevealPhase::Idle;
        self.started_at = None;
        self.payload
            .take()
            .ok_or(RevealError::NotRevealed(RevealPhase::Idle))
    }

    /// Elapsed fraction of the suspense phase in [0, 1].
    pub fn progress(&self, now: Instant) -> f64 {
        match (self.phase, self.started_at) {
            (RevealPhase::Suspense, Some(start)) => {
                if self.delay.is_zero() {
                    return 1.0;
                }
                let elapsed = now.saturating_duration_since(start);
                (elapsed.as_secs_f64() / self.delay.as_secs_f64()).min(1.0)
            }
            (RevealPhase::Result, _) => 1.0,
            _ => 0.0,
        }
    }
}
