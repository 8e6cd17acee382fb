//! Release/complete/fail protocol for walking a graph in dependency order.
//!
//! A walker hands out modules whose dependencies have all completed, at most
//! `parallelism` at a time. A single coordinating thread calls
//! [`GraphWalker::release_next`] in a loop while worker threads report back
//! through [`GraphWalker::on_complete`] and [`GraphWalker::on_failure`].
//!
//! Two implementations share the same contract:
//!
//! - [`ReadyQueueWalker`]: counts unmet dependencies per module and keeps a
//!   rank-ordered ready queue
//! - [`RescanWalker`]: rescans the pending modules in ranked order on every
//!   release

mod ready_queue;
mod rescan;

pub use ready_queue::ReadyQueueWalker;
pub use rescan::RescanWalker;

use crate::{BoxError, Error, ExecutionFailure, Result};
use std::fmt;
use tracing::warn;

/// Outcome of [`GraphWalker::release_next`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Release<M> {
    /// A module that may be processed now. It is already marked running.
    Ready(M),
    /// Every module has been released.
    Exhausted,
    /// A failure was recorded; nothing else will be released.
    Halted,
}

/// Lifecycle of a module within one walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    /// Not released yet.
    Pending,
    /// Released and not reported back yet.
    Running,
    /// Processed successfully.
    Completed,
    /// Processing failed.
    Failed,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(state)
    }
}

/// Scheduler driving one walk over a dependency graph.
///
/// All methods take `&self` and are safe to call from several threads.
pub trait GraphWalker<M>: Send + Sync {
    /// Total number of modules.
    fn size(&self) -> usize;

    /// Block until a module is ready and a permit is free, then mark it
    /// running and return it.
    ///
    /// Returns [`Release::Exhausted`] once every module was released and
    /// [`Release::Halted`] once a failure was recorded.
    fn release_next(&self) -> Release<M>;

    /// Report that `module` finished successfully.
    fn on_complete(&self, module: &M);

    /// Report that `module` failed.
    ///
    /// The first failure is kept; later ones are attached to it.
    fn on_failure(&self, module: &M, error: BoxError);

    /// Whether all modules completed, or a failure was recorded and no
    /// module is still running.
    fn is_completed(&self) -> bool;

    /// Block until [`is_completed`](Self::is_completed) holds.
    ///
    /// # Errors
    ///
    /// Returns the recorded failure. The failure is handed out once.
    fn await_completion(&self) -> std::result::Result<(), ExecutionFailure>;

    /// Current state of `module`, `None` if it is not part of the graph.
    fn node_state(&self, module: &M) -> Option<NodeState>;
}

/// Whether the next module may be released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Gate {
    Open,
    Saturated,
    Exhausted,
    Halted,
}

/// Per-walk bookkeeping shared by the walker implementations.
///
/// Always accessed under the walker's mutex.
#[derive(Debug)]
pub(crate) struct Ledger {
    states: Vec<NodeState>,
    parallelism: usize,
    running: usize,
    released: usize,
    completed: usize,
    halted: bool,
    failure: Option<ExecutionFailure>,
}

impl Ledger {
    pub(crate) fn new(size: usize, parallelism: usize) -> Result<Self> {
        if parallelism == 0 {
            return Err(Error::InvalidParallelism { parallelism });
        }
        Ok(Self {
            states: vec![NodeState::Pending; size],
            parallelism,
            running: 0,
            released: 0,
            completed: 0,
            halted: false,
            failure: None,
        })
    }

    pub(crate) fn size(&self) -> usize {
        self.states.len()
    }

    pub(crate) fn state(&self, ix: usize) -> NodeState {
        self.states[ix]
    }

    pub(crate) fn gate(&self) -> Gate {
        if self.halted {
            Gate::Halted
        } else if self.released == self.states.len() {
            Gate::Exhausted
        } else if self.running >= self.parallelism {
            Gate::Saturated
        } else {
            Gate::Open
        }
    }

    pub(crate) fn start(&mut self, ix: usize) {
        self.states[ix] = NodeState::Running;
        self.running += 1;
        self.released += 1;
    }

    /// Mark `ix` completed. Returns `false` if it was not running.
    pub(crate) fn complete(&mut self, ix: usize, module: &dyn fmt::Display) -> bool {
        if !self.finish(ix, module, NodeState::Completed) {
            return false;
        }
        self.completed += 1;
        true
    }

    /// Mark `ix` failed and record `error`.
    pub(crate) fn fail(&mut self, ix: usize, module: &dyn fmt::Display, error: BoxError) {
        if !self.finish(ix, module, NodeState::Failed) {
            return;
        }
        match &mut self.failure {
            Some(failure) => {
                warn!(module = %module, error = %error, "Suppressed failure after earlier failure");
                failure.suppress(module, error);
            }
            None if self.halted => {
                warn!(module = %module, error = %error, "Dropping failure reported after the walk failed");
            }
            None => {
                warn!(module = %module, error = %error, "Module failed, halting walk");
                self.halted = true;
                self.failure = Some(ExecutionFailure::new(module, error));
            }
        }
    }

    pub(crate) fn is_halted(&self) -> bool {
        self.halted
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.completed == self.states.len() || (self.halted && self.running == 0)
    }

    pub(crate) fn take_failure(&mut self) -> Option<ExecutionFailure> {
        self.failure.take()
    }

    fn finish(&mut self, ix: usize, module: &dyn fmt::Display, to: NodeState) -> bool {
        let state = self.states[ix];
        if state != NodeState::Running {
            warn!(module = %module, %state, outcome = %to, "Ignoring report for module that is not running");
            return false;
        }
        self.states[ix] = to;
        self.running -= 1;
        true
    }
}
