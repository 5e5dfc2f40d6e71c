use std::sync::Arc;

use crossbeam::atomic::AtomicCell;
use tandem_core::{Id, SessionCode};

use super::{DisplayName, Participant, Role};

pub type MembershipId = Id<MembershipHandle>;

/// Represents a client's presence in a session, returned by a successful join
#[derive(Debug, Clone)]
pub struct MembershipHandle {
    pub id: MembershipId,
    pub code: SessionCode,
    pub display_name: DisplayName,
    pub participant: Participant,
    left: Arc<AtomicCell<bool>>,
}

impl MembershipHandle {
    pub(crate) fn new(code: SessionCode, display_name: DisplayName, participant: Participant) -> Self {
        Self {
            id: MembershipId::new(),
            code,
            display_name,
            participant,
            left: Default::default(),
        }
    }

    pub fn role(&self) -> Role {
        self.participant.role
    }

    pub fn has_left(&self) -> bool {
        self.left.load()
    }

    /// Marks the handle as left. Returns false if it already was.
    pub(crate) fn mark_left(&self) -> bool {
        !self.left.swap(true)
    }
}
