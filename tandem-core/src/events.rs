use crossbeam::channel::{Receiver, Sender};

use crate::{
    DiscardReason, MediaRef, PlaybackState, PlayerCommand, PlayerErrorCode, PublishTrigger,
    SessionCode, SyncStatus,
};

pub type EventSender = Sender<SyncEvent>;
pub type EventReceiver = Receiver<SyncEvent>;

/// Describes the events that can be emitted by the sync engine.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// The host wrote a new snapshot to the store.
    SnapshotPublished {
        code: SessionCode,
        snapshot: PlaybackState,
        trigger: PublishTrigger,
    },
    /// The sync status of a session changed.
    SyncStatusUpdate {
        code: SessionCode,
        new_status: SyncStatus,
    },
    /// A follower reconciled against a snapshot.
    SnapshotApplied {
        code: SessionCode,
        snapshot: PlaybackState,
        /// The operations issued to the local player, in order.
        commands: Vec<PlayerCommand>,
    },
    /// A follower ignored a snapshot.
    SnapshotDiscarded {
        code: SessionCode,
        reason: DiscardReason,
    },
    /// The host's player can't play the loaded media.
    MediaUnavailable {
        code: SessionCode,
        media_ref: MediaRef,
        error: PlayerErrorCode,
    },
    /// The local playback position, reported periodically for display.
    PositionUpdate {
        code: SessionCode,
        /// The current position of the player, in seconds.
        position: f64,
        /// The duration of the loaded media, in seconds.
        duration: f64,
    },
}
