use std::{sync::Arc, time::Duration};

use futures_util::StreamExt;
use log::{debug, warn};
use parking_lot::RwLock;
use serde_json::Value;
use tandem_core::{
    Config, DiscardReason, MediaRef, PlaybackState, Player, PlayerCommand, PlayerEvent,
    PublishTrigger, Publisher, Reconciler, Reconciliation, ReplicatedStore, SessionCode,
    StorePath, SyncContext, SyncEvent, SyncStatus, SyncStatusSignal, TaskScope, Visibility,
};
use tokio::{
    sync::{broadcast::error::RecvError, watch, Notify},
    task::JoinHandle,
    time::{interval, interval_at, sleep, Instant, Interval, MissedTickBehavior},
};

use crate::{events::CollabEvent, CollabContext};

use super::{CollabError, DisplayName, MemberSet, Membership, MembershipHandle, Role};

/// How long to wait before subscribing again after a subscription ended
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);
/// Timers never tick faster than this
const MIN_TICK: Duration = Duration::from_millis(50);

/// A client's participation in a session.
///
/// A host session publishes its player to the store, a follower session reconciles
/// its player against what the host publishes. All background work stops when the
/// session is left or dropped.
pub struct Session<S, P> {
    membership: Arc<Membership<S>>,
    handle: MembershipHandle,
    player: Arc<P>,
    publisher: Option<Arc<Publisher<S, P>>>,
    members: Arc<RwLock<MemberSet>>,
    status: Arc<SyncStatusSignal>,
    visibility: watch::Sender<Visibility>,
    force_sync: Arc<Notify>,
    tasks: TaskScope,
}

impl<S, P> Session<S, P>
where
    S: ReplicatedStore,
    P: Player,
{
    pub(crate) fn start(
        context: &CollabContext<S>,
        membership: Arc<Membership<S>>,
        handle: MembershipHandle,
        player: Arc<P>,
    ) -> Self {
        let code = handle.code.clone();
        let tasks = TaskScope::new();

        let status = Arc::new(SyncStatusSignal::new(&context.sync, code.clone()));
        // The member record was just written
        status.set(SyncStatus::Synced);

        let members: Arc<RwLock<MemberSet>> = Default::default();
        let (visibility, _) = watch::channel(Visibility::default());
        let (host_sender, host_receiver) = watch::channel(None);
        let force_sync = Arc::new(Notify::new());

        tasks.spawn(watch_members(
            context.clone(),
            membership.clone(),
            code.clone(),
            members.clone(),
            host_sender,
            status.clone(),
        ));

        tasks.spawn(report_position(
            context.sync.clone(),
            code.clone(),
            player.clone(),
        ));

        let publisher = match handle.role() {
            Role::Host => {
                let publisher = Arc::new(Publisher::new(
                    &context.sync,
                    code.clone(),
                    handle.display_name.as_str(),
                    context.store.clone(),
                    player.clone(),
                    status.clone(),
                ));

                tasks.spawn(drive_host(
                    publisher.clone(),
                    player.clone(),
                    context.config.clone(),
                    visibility.subscribe(),
                    force_sync.clone(),
                ));

                Some(publisher)
            }
            Role::Follower => {
                let follower = Follower {
                    context: context.clone(),
                    code,
                    player: player.clone(),
                    status: status.clone(),
                    reconciler: Reconciler::new(
                        context.config.clone(),
                        handle.display_name.as_str(),
                    ),
                    host: host_receiver,
                    visibility: visibility.subscribe(),
                };

                tasks.spawn(follower.run());

                None
            }
        };

        Self {
            membership,
            handle,
            player,
            publisher,
            members,
            status,
            visibility,
            force_sync,
            tasks,
        }
    }

    pub fn code(&self) -> &SessionCode {
        &self.handle.code
    }

    pub fn display_name(&self) -> &DisplayName {
        &self.handle.display_name
    }

    pub fn role(&self) -> Role {
        self.handle.role()
    }

    pub fn is_host(&self) -> bool {
        self.publisher.is_some()
    }

    pub fn handle(&self) -> &MembershipHandle {
        &self.handle
    }

    /// The last member set received from the store.
    pub fn members(&self) -> MemberSet {
        self.members.read().clone()
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.status.get()
    }

    pub fn player(&self) -> &Arc<P> {
        &self.player
    }

    /// The media the host loaded last, with its title.
    pub fn now_playing(&self) -> Option<(MediaRef, String)> {
        self.publisher.as_ref().and_then(|p| p.now_playing())
    }

    /// Tells the session whether the local runtime is backgrounded.
    pub fn set_visibility(&self, visibility: Visibility) {
        self.visibility.send_replace(visibility);
    }

    pub fn visibility(&self) -> Visibility {
        *self.visibility.borrow()
    }

    /// Loads new media for everyone, stopped at the start.
    pub async fn load_media(
        &self,
        media: MediaRef,
        title: &str,
    ) -> Result<PlaybackState, CollabError> {
        let publisher = self.publisher.as_ref().ok_or(CollabError::NotHost)?;
        Ok(publisher.load_media(media, title).await?)
    }

    pub fn play(&self) -> Result<(), CollabError> {
        self.ensure_host()?;
        self.player.play();
        Ok(())
    }

    pub fn pause(&self) -> Result<(), CollabError> {
        self.ensure_host()?;
        self.player.pause();
        Ok(())
    }

    pub fn set_volume(&self, volume: u8) -> Result<(), CollabError> {
        self.ensure_host()?;
        self.player.set_volume(volume.min(PlaybackState::MAX_VOLUME));
        Ok(())
    }

    /// Seeks the host's player, then publishes where it ended up.
    pub fn seek(&self, position: f64) -> Result<(), CollabError> {
        self.ensure_host()?;
        self.player.seek(position);
        self.force_sync.notify_one();
        Ok(())
    }

    /// Publishes the host's player right away.
    pub fn force_sync(&self) -> Result<(), CollabError> {
        self.ensure_host()?;
        self.force_sync.notify_one();
        Ok(())
    }

    /// Stops all background work and removes this participant from the session.
    /// The removal runs in the background, and its failures are only logged.
    pub fn leave(self) -> JoinHandle<()> {
        self.tasks.cancel();

        let membership = self.membership;
        let handle = self.handle;

        tokio::spawn(async move { membership.leave(&handle).await })
    }

    fn ensure_host(&self) -> Result<(), CollabError> {
        match self.publisher {
            Some(_) => Ok(()),
            None => Err(CollabError::NotHost),
        }
    }
}

fn timer(period: Duration) -> Interval {
    let period = period.max(MIN_TICK);

    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

async fn watch_members<S>(
    context: CollabContext<S>,
    membership: Arc<Membership<S>>,
    code: SessionCode,
    members: Arc<RwLock<MemberSet>>,
    host: watch::Sender<Option<String>>,
    status: Arc<SyncStatusSignal>,
) where
    S: ReplicatedStore,
{
    loop {
        let mut updates = membership.subscribe_members(&code);

        while let Some(update) = updates.next().await {
            let new_members = match update {
                Ok(new_members) => new_members,
                Err(error) => {
                    warn!("Lost member updates of {}: {}", code, error);
                    status.set(SyncStatus::Error);
                    continue;
                }
            };

            status.set(SyncStatus::Synced);

            let previous = std::mem::replace(&mut *members.write(), new_members.clone());

            for participant in new_members.iter() {
                if !previous.contains(&participant.display_name) {
                    context.emit(CollabEvent::ParticipantJoined {
                        code: code.clone(),
                        participant: participant.clone(),
                    });
                }
            }

            for participant in previous.iter() {
                if !new_members.contains(&participant.display_name) {
                    context.emit(CollabEvent::ParticipantLeft {
                        code: code.clone(),
                        display_name: participant.display_name.clone(),
                    });
                }
            }

            if let Some(current_host) = new_members.host() {
                host.send_replace(Some(current_host.display_name.clone()));
            }

            membership.observe(&code, &new_members);

            context.emit(CollabEvent::MembersUpdate {
                code: code.clone(),
                members: new_members,
            });
        }

        debug!("Member updates of {} ended, resubscribing", code);
        sleep(RESUBSCRIBE_DELAY).await;
    }
}

async fn report_position<P>(sync: SyncContext, code: SessionCode, player: Arc<P>)
where
    P: Player,
{
    let mut ticker = interval(sync.config.position_refresh_interval().max(MIN_TICK));

    loop {
        ticker.tick().await;

        sync.emit(SyncEvent::PositionUpdate {
            code: code.clone(),
            position: player.position(),
            duration: player.duration(),
        });
    }
}

/// Publishes on player events, on every heartbeat while playing, and when asked to.
async fn drive_host<S, P>(
    publisher: Arc<Publisher<S, P>>,
    player: Arc<P>,
    config: Config,
    mut visibility: watch::Receiver<Visibility>,
    force_sync: Arc<Notify>,
) where
    S: ReplicatedStore,
    P: Player,
{
    let mut player_events = player.subscribe();
    let mut heartbeat = timer(config.heartbeat_interval(*visibility.borrow()));
    let mut visibility_open = true;

    // Publish errors are logged and reflected in the sync status by the publisher
    loop {
        tokio::select! {
            event = player_events.recv() => match event {
                Ok(event) => {
                    let _ = publisher.handle_player_event(&event).await;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Host missed {} player events", skipped);
                    let _ = publisher.publish(PublishTrigger::StateChange).await;
                }
                Err(RecvError::Closed) => break,
            },
            _ = heartbeat.tick() => {
                if publisher.should_heartbeat() {
                    let _ = publisher.publish(PublishTrigger::Heartbeat).await;
                }
            }
            _ = force_sync.notified() => {
                let _ = publisher.publish(PublishTrigger::ForceSync).await;
            }
            changed = visibility.changed(), if visibility_open => match changed {
                Ok(()) => {
                    let current = *visibility.borrow();
                    debug!("Host is now {:?}", current);
                    heartbeat = timer(config.heartbeat_interval(current));
                }
                Err(_) => visibility_open = false,
            },
        }
    }
}

/// Reconciles the local player against the snapshots in the store.
struct Follower<S, P> {
    context: CollabContext<S>,
    code: SessionCode,
    player: Arc<P>,
    status: Arc<SyncStatusSignal>,
    reconciler: Reconciler,
    host: watch::Receiver<Option<String>>,
    visibility: watch::Receiver<Visibility>,
}

impl<S, P> Follower<S, P>
where
    S: ReplicatedStore,
    P: Player,
{
    async fn run(mut self) {
        let path = StorePath::playback(&self.code);
        let mut snapshots = self.context.store.subscribe(&path);
        let mut player_events = self.player.subscribe();
        let mut host_open = true;

        self.observe_host();

        loop {
            tokio::select! {
                item = snapshots.next() => match item {
                    Some(Ok(Some(value))) => {
                        self.status.set(SyncStatus::Synced);
                        self.handle_snapshot(value);
                    }
                    Some(Ok(None)) => self.status.set(SyncStatus::Synced),
                    Some(Err(error)) => {
                        warn!("Lost playback updates of {}: {}", self.code, error);
                        self.status.set(SyncStatus::Error);
                    }
                    None => {
                        debug!("Playback updates of {} ended, resubscribing", self.code);
                        sleep(RESUBSCRIBE_DELAY).await;
                        snapshots = self.context.store.subscribe(&path);
                    }
                },
                event = player_events.recv() => match event {
                    Ok(event) => self.handle_player_event(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Follower missed {} player events", skipped);
                    }
                    Err(RecvError::Closed) => break,
                },
                changed = self.host.changed(), if host_open => match changed {
                    Ok(()) => self.observe_host(),
                    Err(_) => host_open = false,
                },
            }
        }
    }

    fn observe_host(&mut self) {
        let host = self.host.borrow().clone();

        if let Some(held) = self.reconciler.observe_host(host.as_deref()) {
            debug!("Host of {} is known, applying the held snapshot", self.code);
            self.reconcile(held);
        }
    }

    fn handle_snapshot(&mut self, value: Value) {
        match PlaybackState::from_value(value) {
            Ok(snapshot) => self.reconcile(snapshot),
            Err(error) => {
                warn!("Ignoring malformed snapshot in {}: {}", self.code, error);
                self.discard(DiscardReason::Malformed(error.to_string()));
            }
        }
    }

    fn reconcile(&mut self, snapshot: PlaybackState) {
        let local = self.player.playback();

        match self.reconciler.on_snapshot(snapshot.clone(), &local) {
            Reconciliation::Applied(commands) => self.apply(snapshot, commands),
            Reconciliation::Deferred => {
                debug!("Queued snapshot for {} until it can be applied", self.code)
            }
            Reconciliation::Discarded(reason) => self.discard(reason),
        }
    }

    fn handle_player_event(&mut self, event: &PlayerEvent) {
        let visibility = *self.visibility.borrow();
        let local = self.player.playback();

        let commands = self
            .reconciler
            .on_player_event(event, &local, visibility);

        if commands.is_empty() {
            return;
        }

        match self.reconciler.target().cloned() {
            Some(target) => self.apply(target, commands),
            None => commands
                .iter()
                .for_each(|c| c.apply(self.player.as_ref())),
        }
    }

    fn apply(&self, snapshot: PlaybackState, commands: Vec<PlayerCommand>) {
        for command in &commands {
            command.apply(self.player.as_ref());
        }

        self.context.sync.emit(SyncEvent::SnapshotApplied {
            code: self.code.clone(),
            snapshot,
            commands,
        });
    }

    fn discard(&self, reason: DiscardReason) {
        self.context.sync.emit(SyncEvent::SnapshotDiscarded {
            code: self.code.clone(),
            reason,
        });
    }
}
