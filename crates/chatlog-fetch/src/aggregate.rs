//! Fan-out/fan-in aggregation.
//!
//! A caller that issues `N` independent downloads creates one [`FanIn`] with
//! `remaining = N`. Every completion folds its part into the shared
//! [`Gather`]; the last one closes the batch and runs the final continuation.
//!
//! ```text
//!  download 0 ──complete(p0)──┐
//!  download 1 ──complete(p1)──┼──► Mutex<State> ──(remaining == 0)──► on_done(Done(out))
//!  download 2 ──fail(reason)──┘                  ──(first failure)──► on_done(Failed(reason))
//! ```
//!
//! The continuation runs exactly once, after the lock is released. Anything
//! arriving after the batch closed is dropped.

use chatlog_core::Line;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Accumulates per-target parts into one answer.
pub trait Gather: Send + 'static {
    type Part;
    type Output;

    fn fold(&mut self, part: Self::Part);
    fn finish(self) -> Self::Output;
}

/// Running sum of match counts.
#[derive(Debug, Default)]
pub struct CountGather {
    total: usize,
}

impl Gather for CountGather {
    type Part = usize;
    type Output = usize;

    fn fold(&mut self, part: usize) {
        self.total += part;
    }

    fn finish(self) -> usize {
        self.total
    }
}

/// Collected matching lines, sorted by timestamp on finish.
#[derive(Debug, Default)]
pub struct FindGather {
    lines: Vec<Line>,
}

impl Gather for FindGather {
    type Part = Vec<Line>;
    type Output = Vec<Line>;

    fn fold(&mut self, part: Vec<Line>) {
        self.lines.extend(part);
    }

    fn finish(mut self) -> Vec<Line> {
        self.lines.sort_by_key(Line::time);
        self.lines
    }
}

/// Render lines as `YYYY-MM-DD HH:MM:SS author: message`, one per line.
pub fn render_transcript(lines: &[Line]) -> String {
    let mut out = String::new();
    for line in lines {
        let _ = writeln!(out, "{line}");
    }
    out
}

/// How a batch ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Done(T),
    Failed(String),
}

type Continuation<T> = Box<dyn FnOnce(Outcome<T>) + Send>;

struct State<G: Gather> {
    remaining: usize,
    closed: bool,
    gather: Option<G>,
    on_done: Option<Continuation<G::Output>>,
}

/// Shared completion state for one batch.
pub struct FanIn<G: Gather> {
    state: Mutex<State<G>>,
}

impl<G: Gather> FanIn<G> {
    /// A batch expecting `expected` completions. With `expected == 0` the
    /// continuation runs before this returns.
    pub fn new(
        expected: usize,
        gather: G,
        on_done: impl FnOnce(Outcome<G::Output>) + Send + 'static,
    ) -> Arc<Self> {
        let fan = Arc::new(Self {
            state: Mutex::new(State {
                remaining: expected,
                closed: false,
                gather: Some(gather),
                on_done: Some(Box::new(on_done)),
            }),
        });
        if expected == 0 {
            let fire = {
                let mut state = fan.lock();
                state.close()
            };
            if let Some((on_done, gather)) = fire {
                on_done(Outcome::Done(gather.finish()));
            }
        }
        fan
    }

    fn lock(&self) -> MutexGuard<'_, State<G>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fold one target's part. Returns `false` when the batch was already
    /// closed and the part was dropped.
    pub fn complete(&self, part: G::Part) -> bool {
        let fire = {
            let mut state = self.lock();
            if state.closed {
                tracing::debug!("late completion dropped");
                return false;
            }
            if let Some(gather) = state.gather.as_mut() {
                gather.fold(part);
            }
            state.remaining = state.remaining.saturating_sub(1);
            if state.remaining == 0 {
                state.close()
            } else {
                None
            }
        };
        if let Some((on_done, gather)) = fire {
            on_done(Outcome::Done(gather.finish()));
        }
        true
    }

    /// Close the batch with a failure answer. Returns `false` when it was
    /// already closed.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        let on_done = {
            let mut state = self.lock();
            if state.closed {
                tracing::debug!("late failure dropped");
                return false;
            }
            state.close().map(|(on_done, _)| on_done)
        };
        if let Some(on_done) = on_done {
            on_done(Outcome::Failed(reason.into()));
        }
        true
    }

    pub fn remaining(&self) -> usize {
        self.lock().remaining
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl<G: Gather> State<G> {
    fn close(&mut self) -> Option<(Continuation<G::Output>, G)> {
        self.closed = true;
        self.remaining = 0;
        Some((self.on_done.take()?, self.gather.take()?))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
