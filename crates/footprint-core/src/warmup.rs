//! Background metadata warm-up.
//!
//! The first scan of a remote dataset pays for listing objects and fetching
//! footers. A [`WarmUp`] does that work once, in the background, so the first
//! real query starts warm. Queries never wait on it.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::engine::{ColumnarEngine, ScanSource};

/// Lifecycle of a [`WarmUp`]. Only `Idle` can move to `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum WarmUpState {
    Idle = 0,
    Running = 1,
    Complete = 2,
    Failed = 3,
    Cancelled = 4,
}

impl WarmUpState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::Complete,
            3 => Self::Failed,
            4 => Self::Cancelled,
            _ => Self::Idle,
        }
    }
}

impl fmt::Display for WarmUpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// A one-shot, cancellable warm-up task with an observable state.
#[derive(Debug)]
pub struct WarmUp {
    state: Arc<AtomicU8>,
    cancel: CancellationToken,
}

impl Default for WarmUp {
    fn default() -> Self {
        Self::new()
    }
}

impl WarmUp {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(WarmUpState::Idle as u8)),
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> WarmUpState {
        WarmUpState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.state() == WarmUpState::Complete
    }

    /// Spawn the warm-up on the current tokio runtime.
    ///
    /// Only the first call does anything. Later or concurrent calls return
    /// `None`, whatever state the first warm-up reached.
    pub fn start(
        &self,
        engine: Arc<dyn ColumnarEngine>,
        source: ScanSource,
    ) -> Option<JoinHandle<WarmUpState>> {
        self.state
            .compare_exchange(
                WarmUpState::Idle as u8,
                WarmUpState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .ok()?;

        let state = Arc::clone(&self.state);
        let cancel = self.cancel.clone();
        Some(tokio::spawn(async move {
            info!("Warming up dataset metadata");
            let outcome = tokio::select! {
                () = cancel.cancelled() => WarmUpState::Cancelled,
                result = engine.warm_up(&source) => match result {
                    Ok(()) => WarmUpState::Complete,
                    Err(e) => {
                        warn!("Warm-up failed: {e}");
                        WarmUpState::Failed
                    },
                },
            };
            state.store(outcome as u8, Ordering::Release);
            info!("Warm-up {outcome}");
            outcome
        }))
    }

    /// Stop a running warm-up. A warm-up that has not started never will.
    pub fn cancel(&self) {
        self.cancel.cancel();
        let _ = self.state.compare_exchange(
            WarmUpState::Idle as u8,
            WarmUpState::Cancelled as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}
