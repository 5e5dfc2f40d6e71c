use crossbeam::atomic::AtomicCell;
use log::info;

mod player;
mod publisher;
mod reconciler;
mod state;

pub use player::*;
pub use publisher::*;
pub use reconciler::*;
pub use state::*;

use crate::{SessionCode, SyncContext, SyncEvent};

/// Whether the local runtime is in front of the user.
/// Backgrounded runtimes get throttled, and may be paused by the platform.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    #[default]
    Foreground,
    Background,
}

/// The health of a session's connection to the store.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// Nothing has been written or received yet.
    #[default]
    Connecting,
    /// The last write or delivery succeeded.
    Synced,
    /// The last write or delivery failed. Recovers on the next success.
    Error,
}

/// The sync status of a session, emitting an event whenever it changes.
#[derive(Debug)]
pub struct SyncStatusSignal {
    context: SyncContext,
    code: SessionCode,
    status: AtomicCell<SyncStatus>,
}

impl SyncStatusSignal {
    pub fn new(context: &SyncContext, code: SessionCode) -> Self {
        Self {
            context: context.clone(),
            code,
            status: Default::default(),
        }
    }

    pub fn get(&self) -> SyncStatus {
        self.status.load()
    }

    pub fn set(&self, new_status: SyncStatus) {
        let previous = self.status.swap(new_status);

        if previous != new_status {
            info!(
                "Session {} sync status: {:?} -> {:?}",
                self.code, previous, new_status
            );

            self.context.emit(SyncEvent::SyncStatusUpdate {
                code: self.code.clone(),
                new_status,
            });
        }
    }
}
