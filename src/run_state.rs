//! Run State Machine
//!
//! Authoritative record of where a migration run is. Transitions are
//! validated so a run cannot reach MERGING without a verified connection or
//! skip EXECUTING on its way to DONE.
//!
//! # Stage Flow
//!
//! ```text
//! Idle
//!   ↓
//! Resolving ──────────┐ (STATUS, CONNECTION_ONLY)
//!   ↓                 │
//! Merging             │
//!   ↓                 │
//! Executing           │
//!   ↓                 │
//! Done  ◄─────────────┘
//!
//! (Any non-terminal stage can transition to Failed)
//! ```

use strum::Display;
use thiserror::Error;

/// Orchestrator stages in sequential order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum RunStage {
    /// Run created, nothing touched yet
    Idle = 0,

    /// Connecting, reading markers and choosing version tags
    Resolving = 1,

    /// Building the aggregate plan from the tagged blocks
    Merging = 2,

    /// Running the plan against the database
    Executing = 3,

    /// Run finished (terminal state)
    Done = 4,

    /// Run aborted (terminal state)
    Failed = 255,
}

impl RunStage {
    #[inline]
    pub const fn order(self) -> u8 {
        self as u8
    }

    /// Returns true if this is a terminal state (Done or Failed)
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Returns the next stage in the sequence, or None if at a terminal state
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Idle => Some(Self::Resolving),
            Self::Resolving => Some(Self::Merging),
            Self::Merging => Some(Self::Executing),
            Self::Executing => Some(Self::Done),
            Self::Done | Self::Failed => None,
        }
    }
}

/// Errors that can occur during state transitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunTransitionError {
    /// Attempted to skip one or more stages
    #[error("Cannot skip from {from} to {to}")]
    SkippedStage { from: RunStage, to: RunStage },

    /// Attempted to go backwards
    #[error("Cannot go backwards from {from} to {to}")]
    BackwardTransition { from: RunStage, to: RunStage },

    /// Attempted to transition from a terminal state
    #[error("Cannot transition from terminal state {from}")]
    FromTerminalState { from: RunStage },

    /// MERGING requires a verified database connection
    #[error("Cannot enter {stage} before the database connection is verified")]
    ConnectionNotVerified { stage: RunStage },

    /// Only STATUS and CONNECTION_ONLY runs may finish straight from RESOLVING
    #[error("Only short-circuit actions may finish from {from}")]
    ShortCircuitNotAllowed { from: RunStage },

    #[error("Already at stage {stage}")]
    AlreadyAtStage { stage: RunStage },
}

/// Context for tracking one run's state.
///
/// # Example
///
/// ```
/// use modmigrate::run_state::{RunContext, RunStage};
///
/// let mut ctx = RunContext::new(false);
/// ctx.advance().unwrap();
/// assert_eq!(ctx.current_stage(), RunStage::Resolving);
///
/// // MERGING needs a verified connection
/// assert!(ctx.advance().is_err());
/// ctx.confirm_connection();
/// assert_eq!(ctx.advance().unwrap(), RunStage::Merging);
/// ```
#[derive(Debug, Clone)]
pub struct RunContext {
    current: RunStage,

    /// Stage at which failure occurred (if any)
    failed_at: Option<RunStage>,

    connection_verified: bool,

    /// Whether the action may finish from RESOLVING
    short_circuit: bool,
}

impl RunContext {
    /// Create a context in the Idle state
    pub fn new(short_circuit: bool) -> Self {
        Self {
            current: RunStage::Idle,
            failed_at: None,
            connection_verified: false,
            short_circuit,
        }
    }

    #[inline]
    pub fn current_stage(&self) -> RunStage {
        self.current
    }

    #[inline]
    pub fn failed_at(&self) -> Option<RunStage> {
        self.failed_at
    }

    /// Record that the database answered. One-way flag.
    pub fn confirm_connection(&mut self) {
        self.connection_verified = true;
    }

    /// Advance to the next stage in sequence.
    ///
    /// # Errors
    ///
    /// - `FromTerminalState` if already at Done or Failed
    /// - `ConnectionNotVerified` if entering Merging without a verified connection
    pub fn advance(&mut self) -> Result<RunStage, RunTransitionError> {
        let next = self
            .current
            .next()
            .ok_or(RunTransitionError::FromTerminalState { from: self.current })?;
        self.transition_to(next)
    }

    /// Transition to a specific stage.
    ///
    /// Only the immediate next stage is accepted, plus Resolving → Done for
    /// short-circuit runs.
    pub fn transition_to(&mut self, target: RunStage) -> Result<RunStage, RunTransitionError> {
        if self.current.is_terminal() {
            return Err(RunTransitionError::FromTerminalState { from: self.current });
        }

        if target == self.current {
            return Err(RunTransitionError::AlreadyAtStage { stage: target });
        }

        // Use fail() for failures
        if target == RunStage::Failed {
            return Err(RunTransitionError::SkippedStage {
                from: self.current,
                to: target,
            });
        }

        if target.order() < self.current.order() {
            return Err(RunTransitionError::BackwardTransition {
                from: self.current,
                to: target,
            });
        }

        if self.current == RunStage::Resolving && target == RunStage::Done {
            if !self.short_circuit {
                return Err(RunTransitionError::ShortCircuitNotAllowed { from: self.current });
            }
        } else if self.current.next() != Some(target) {
            return Err(RunTransitionError::SkippedStage {
                from: self.current,
                to: target,
            });
        }

        if target == RunStage::Merging && !self.connection_verified {
            return Err(RunTransitionError::ConnectionNotVerified { stage: target });
        }

        log::debug!("Run stage {} -> {}", self.current, target);
        self.current = target;
        Ok(target)
    }

    /// Mark the run as failed, remembering where.
    ///
    /// # Errors
    ///
    /// - `FromTerminalState` if already at Done or Failed
    pub fn fail(&mut self) -> Result<(), RunTransitionError> {
        if self.current.is_terminal() {
            return Err(RunTransitionError::FromTerminalState { from: self.current });
        }

        log::debug!("Run failed during {}", self.current);
        self.failed_at = Some(self.current);
        self.current = RunStage::Failed;
        Ok(())
    }
}
