use std::time::Duration;

use crossbeam::channel::{select, Receiver, Sender};
use tandem_core::{SessionCode, SyncEvent};

use crate::{MemberSet, Participant};

pub type EventSender = Sender<CollabEvent>;
pub type EventReceiver = Receiver<CollabEvent>;

/// Events emitted by the collab system
#[derive(Debug, Clone)]
pub enum CollabEvent {
    /// The member set of a session changed
    MembersUpdate {
        code: SessionCode,
        members: MemberSet,
    },
    /// A participant appeared in a session
    ParticipantJoined {
        code: SessionCode,
        participant: Participant,
    },
    /// A participant left a session, or was removed when its connection dropped
    ParticipantLeft {
        code: SessionCode,
        display_name: String,
    },
    /// A session was found empty and will be removed after the grace period
    ReclamationScheduled {
        code: SessionCode,
        grace: Duration,
    },
    /// Somebody joined before an empty session was removed
    ReclamationCancelled { code: SessionCode },
    /// An empty session was removed from the store
    SessionReclaimed { code: SessionCode },
    /// An event from the sync engine
    Sync(SyncEvent),
}

impl From<SyncEvent> for CollabEvent {
    fn from(event: SyncEvent) -> Self {
        Self::Sync(event)
    }
}

/// Every event of one collab system: its own, and those of its sync engine.
///
/// Events from the same source arrive in order. Receivers are shared, so each event
/// is delivered to only one clone.
#[derive(Debug, Clone)]
pub struct CollabEvents {
    own: EventReceiver,
    sync: tandem_core::EventReceiver,
}

impl CollabEvents {
    pub(crate) fn new(own: EventReceiver, sync: tandem_core::EventReceiver) -> Self {
        Self { own, sync }
    }

    /// Blocks until an event arrives. Returns `None` once every sender is gone.
    pub fn recv(&self) -> Option<CollabEvent> {
        select! {
            recv(self.own) -> event => match event {
                Ok(event) => Some(event),
                Err(_) => self.sync.recv().ok().map(CollabEvent::from),
            },
            recv(self.sync) -> event => match event {
                Ok(event) => Some(event.into()),
                Err(_) => self.own.recv().ok(),
            },
        }
    }

    /// Returns the events that are already waiting, without blocking.
    pub fn try_iter(&self) -> impl Iterator<Item = CollabEvent> + '_ {
        self.own
            .try_iter()
            .chain(self.sync.try_iter().map(CollabEvent::from))
    }
}
