use futures_util::{stream::BoxStream, StreamExt};
use log::{debug, info, warn};
use tandem_core::{
    DisconnectAction, KeyedTimers, ReplicatedStore, SessionCode, StoreExt, StorePath,
    StoreResult,
};

use crate::{events::CollabEvent, CollabContext};

use super::{
    CollabError, DisplayName, IntoCollabError, MemberSet, MembershipHandle, Participant, Role,
};

/// Manages participant records, and removes sessions once nobody is left in them.
///
/// Owns the reclamation timers of every session this client has seen,
/// so they outlive the [Session](super::Session) that scheduled them.
pub struct Membership<S> {
    context: CollabContext<S>,
    reclamations: KeyedTimers<SessionCode>,
}

impl<S> Membership<S>
where
    S: ReplicatedStore,
{
    pub fn new(context: &CollabContext<S>) -> Self {
        Self {
            context: context.clone(),
            reclamations: Default::default(),
        }
    }

    /// Writes a participant record, and registers its removal for when this client disconnects.
    /// Nothing is left behind if joining fails.
    pub async fn join(
        &self,
        code: &SessionCode,
        display_name: &DisplayName,
        role: Role,
    ) -> Result<MembershipHandle, CollabError> {
        let store = &self.context.store;
        let path = StorePath::member(code, display_name.as_str());

        if store.exists(&path).await.or_unreachable()? {
            return Err(CollabError::IdentityConflict {
                code: code.clone(),
                display_name: display_name.to_string(),
            });
        }

        let participant = Participant::new(display_name, role);

        store
            .write_as(&path, &participant)
            .await
            .or_conflict(code, display_name)?;

        if let Err(error) = store.on_disconnect(&path, DisconnectAction::Remove).await {
            warn!(
                "Could not register cleanup for {} in {}, undoing join: {}",
                display_name, code, error
            );

            if let Err(error) = store.remove(&path).await {
                warn!("Could not remove {} from {}: {}", display_name, code, error);
            }

            return Err(CollabError::SessionUnreachable(error));
        }

        self.cancel_reclamation(code);

        info!("{} joined session {} as {:?}", display_name, code, role);

        Ok(MembershipHandle::new(
            code.clone(),
            display_name.clone(),
            participant,
        ))
    }

    /// Reads the current member set once.
    pub async fn members(&self, code: &SessionCode) -> StoreResult<MemberSet> {
        let value = self.context.store.read(&StorePath::members(code)).await?;
        Ok(MemberSet::from_value(value))
    }

    /// Returns a stream of the full member set, delivered on every change.
    pub fn subscribe_members(&self, code: &SessionCode) -> BoxStream<'static, StoreResult<MemberSet>> {
        self.context
            .store
            .subscribe_children(&StorePath::members(code))
            .map(|children| children.map(MemberSet::from_children))
            .boxed()
    }

    /// Removes the participant record of the handle. Failures are logged, never returned,
    /// and leaving twice does nothing.
    pub async fn leave(&self, handle: &MembershipHandle) {
        if !handle.mark_left() {
            debug!("{} already left {}", handle.display_name, handle.code);
            return;
        }

        let store = &self.context.store;
        let code = &handle.code;
        let path = StorePath::member(code, handle.display_name.as_str());

        match store.remove(&path).await {
            Ok(()) => {
                info!("{} left session {}", handle.display_name, code);

                if let Err(error) = store.cancel_on_disconnect(&path).await {
                    warn!("Could not cancel cleanup for {}: {}", path, error);
                }
            }
            Err(error) => warn!(
                "Could not remove {} from {}, leaving it to the disconnect cleanup: {}",
                handle.display_name, code, error
            ),
        }

        match self.members(code).await {
            Ok(members) if members.is_empty() => {
                self.schedule_reclamation(code);
            }
            Ok(_) => {}
            Err(error) => warn!("Could not check whether {} is empty: {}", code, error),
        }
    }

    /// Reacts to a member set update, scheduling or cancelling reclamation.
    pub fn observe(&self, code: &SessionCode, members: &MemberSet) {
        if members.is_empty() {
            self.schedule_reclamation(code);
        } else {
            self.cancel_reclamation(code);
        }
    }

    /// Removes the session after the grace period, unless somebody joins first.
    /// Returns false if a reclamation is already pending.
    pub fn schedule_reclamation(&self, code: &SessionCode) -> bool {
        let grace = self.context.config.reclamation_grace();
        let task = reclaim(self.context.clone(), code.clone());

        let scheduled = self.reclamations.schedule(code.clone(), grace, task);

        if scheduled {
            info!("Session {} is empty, removing it in {:?}", code, grace);

            self.context.emit(CollabEvent::ReclamationScheduled {
                code: code.clone(),
                grace,
            });
        }

        scheduled
    }

    pub fn cancel_reclamation(&self, code: &SessionCode) -> bool {
        let cancelled = self.reclamations.cancel(code);

        if cancelled {
            info!("Session {} is in use again, keeping it", code);

            self.context
                .emit(CollabEvent::ReclamationCancelled { code: code.clone() });
        }

        cancelled
    }

    pub fn is_reclamation_scheduled(&self, code: &SessionCode) -> bool {
        self.reclamations.is_scheduled(code)
    }

    /// Cancels every pending reclamation.
    pub fn shutdown(&self) {
        self.reclamations.cancel_all();
    }
}

/// Removes the session if it is still empty.
async fn reclaim<S>(context: CollabContext<S>, code: SessionCode)
where
    S: ReplicatedStore,
{
    let store = &context.store;

    // Somebody may have joined through another client
    let members = match store.read(&StorePath::members(&code)).await {
        Ok(value) => MemberSet::from_value(value),
        Err(error) => {
            warn!("Could not check members of {}, not removing it: {}", code, error);
            return;
        }
    };

    if !members.is_empty() {
        info!("Session {} has members again, not removing it", code);
        return;
    }

    match store.remove(&StorePath::session(&code)).await {
        Ok(()) => {
            info!("Removed empty session {}", code);
            context.emit(CollabEvent::SessionReclaimed { code });
        }
        Err(error) => warn!("Could not remove empty session {}: {}", code, error),
    }
}
