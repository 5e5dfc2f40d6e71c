mod events;
mod sessions;
mod util;

use std::sync::Arc;

use crossbeam::channel::unbounded;
use log::info;
use tandem_core::{
    Config, Player, ReplicatedStore, SessionCode, StoreExt, StorePath, SyncContext,
};

pub use events::*;
pub use sessions::*;
use util::random_code;

/// The tandem collab system, facilitating session creation, membership, and playback sync.
pub struct Collab<S> {
    context: CollabContext<S>,
    membership: Arc<Membership<S>>,
    events: CollabEvents,
}

/// A type passed to various components of the collab system, to access the store and emit events.
pub struct CollabContext<S> {
    pub config: Config,
    pub store: Arc<S>,
    pub sync: SyncContext,

    event_sender: EventSender,
}

impl<S> Collab<S>
where
    S: ReplicatedStore,
{
    pub fn new(config: Config, store: Arc<S>) -> Self {
        let (sync, sync_events) = SyncContext::new(config.clone());
        let (event_sender, event_receiver) = unbounded();

        let context = CollabContext {
            config,
            store,
            sync,
            event_sender,
        };

        let membership = Arc::new(Membership::new(&context));

        Self {
            context,
            membership,
            events: CollabEvents::new(event_receiver, sync_events),
        }
    }

    /// Creates a session under a fresh code and joins it as the host.
    pub async fn create_session<P>(
        &self,
        display_name: &str,
        player: Arc<P>,
    ) -> Result<Session<S, P>, CollabError>
    where
        P: Player,
    {
        let display_name = DisplayName::parse(display_name)?;
        let length = self.context.config.session_code_length;
        let attempts = self.context.config.max_code_attempts.max(1);

        for _ in 0..attempts {
            let code = SessionCode::parse(&random_code(length), length)?;

            if self.session_exists(&code).await? {
                info!("Session code {} is taken, trying another", code);
                continue;
            }

            return self.start(code, display_name, Role::Host, player).await;
        }

        Err(CollabError::CodeSpaceExhausted(attempts))
    }

    /// Creates a session under the given code and joins it as the host.
    pub async fn create_session_with_code<P>(
        &self,
        code: &str,
        display_name: &str,
        player: Arc<P>,
    ) -> Result<Session<S, P>, CollabError>
    where
        P: Player,
    {
        let code = SessionCode::parse(code, self.context.config.session_code_length)?;
        let display_name = DisplayName::parse(display_name)?;

        if self.session_exists(&code).await? {
            return Err(CollabError::SessionExists(code));
        }

        self.start(code, display_name, Role::Host, player).await
    }

    /// Joins an existing session as a follower. The code is case-insensitive.
    pub async fn join_session<P>(
        &self,
        code: &str,
        display_name: &str,
        player: Arc<P>,
    ) -> Result<Session<S, P>, CollabError>
    where
        P: Player,
    {
        let code = SessionCode::parse(code, self.context.config.session_code_length)?;
        let display_name = DisplayName::parse(display_name)?;

        self.start(code, display_name, Role::Follower, player).await
    }

    pub fn membership(&self) -> &Arc<Membership<S>> {
        &self.membership
    }

    pub fn config(&self) -> &Config {
        &self.context.config
    }

    /// Returns the events emitted by this client, including those of its sync engine.
    pub fn events(&self) -> CollabEvents {
        self.events.clone()
    }

    /// Cancels pending reclamations. Sessions stop on their own when left or dropped.
    pub fn shutdown(&self) {
        self.membership.shutdown();
    }

    async fn session_exists(&self, code: &SessionCode) -> Result<bool, CollabError> {
        self.context
            .store
            .exists(&StorePath::session(code))
            .await
            .or_unreachable()
    }

    async fn start<P>(
        &self,
        code: SessionCode,
        display_name: DisplayName,
        role: Role,
        player: Arc<P>,
    ) -> Result<Session<S, P>, CollabError>
    where
        P: Player,
    {
        let handle = self.membership.join(&code, &display_name, role).await?;

        Ok(Session::start(
            &self.context,
            self.membership.clone(),
            handle,
            player,
        ))
    }
}

impl<S> CollabContext<S> {
    pub fn emit(&self, event: CollabEvent) {
        let _ = self.event_sender.send(event);
    }
}

impl<S> Clone for CollabContext<S> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            store: self.store.clone(),
            sync: self.sync.clone(),
            event_sender: self.event_sender.clone(),
        }
    }
}
