//! Cancellable collection loads.
//!
//! Each load takes a [`LoadTicket`] from a [`LoadGuard`]. Starting a new
//! load or calling [`LoadGuard::cancel`] retires the previous ticket: its
//! token fires, and [`LoadGuard::is_current`] reports false, so a late
//! result is dropped instead of overwriting newer state.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::backend::BackendError;
use crate::error::{ContentError, ContentResult};

struct Current {
    generation: u64,
    token: CancellationToken,
}

/// Issues load tickets for one collection.
pub struct LoadGuard {
    current: Mutex<Current>,
}

/// Handle for one load attempt.
#[derive(Debug, Clone)]
pub struct LoadTicket {
    generation: u64,
    token: CancellationToken,
}

impl LoadTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl LoadGuard {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(Current {
                generation: 0,
                token: CancellationToken::new(),
            }),
        }
    }

    /// Retire the current ticket and issue a new one.
    pub fn begin(&self) -> LoadTicket {
        let mut current = self.current.lock();
        current.token.cancel();
        current.generation += 1;
        current.token = CancellationToken::new();
        LoadTicket {
            generation: current.generation,
            token: current.token.clone(),
        }
    }

    /// Retire the current ticket without issuing a new one.
    pub fn cancel(&self) {
        let mut current = self.current.lock();
        current.token.cancel();
        current.generation += 1;
        current.token = CancellationToken::new();
    }

    /// Whether results for `ticket` may still be applied.
    pub fn is_current(&self, ticket: &LoadTicket) -> bool {
        let current = self.current.lock();
        current.generation == ticket.generation && !ticket.token.is_cancelled()
    }
}

impl Default for LoadGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Run `fut` bounded by `limit` and the ticket's token.
///
/// Returns `None` if the ticket was retired first; the remote future is
/// dropped at that point.
pub async fn run_bounded<T, F>(
    ticket: &LoadTicket,
    limit: Duration,
    fut: F,
) -> Option<ContentResult<T>>
where
    F: Future<Output = Result<T, BackendError>>,
{
    tokio::select! {
        _ = ticket.token.cancelled() => None,
        res = tokio::time::timeout(limit, fut) => Some(match res {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(ContentError::Remote(e)),
            Err(_) => Err(ContentError::Timeout(limit)),
        }),
    }
}
