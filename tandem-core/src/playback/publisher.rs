use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use log::{debug, info, warn};
use parking_lot::Mutex;
use thiserror::Error;

use crate::{
    MediaRef, PlaybackState, Player, PlayerErrorCode, PlayerEvent, ReplicatedStore, SessionCode,
    StoreError, StorePath, SyncContext, SyncEvent, SyncStatus, SyncStatusSignal,
};

/// Why the host published a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishTrigger {
    /// New media was loaded, invalidating every follower's target.
    MediaLoaded,
    /// The host's player changed state.
    StateChange,
    /// Periodic publish while playing.
    Heartbeat,
    /// The host asked for a sync.
    ForceSync,
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("{media_ref} can't be played: {error:?}")]
    MediaUnavailable {
        media_ref: MediaRef,
        error: PlayerErrorCode,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
struct NowPlaying {
    media: MediaRef,
    title: String,
}

/// Publishes the host's playback to the store. Only exists for the host.
///
/// The publisher never controls the player. It only observes it, so every published
/// snapshot reflects what the host's player is actually doing.
pub struct Publisher<S, P> {
    context: SyncContext,
    code: SessionCode,
    host: String,
    store: Arc<S>,
    player: Arc<P>,
    status: Arc<SyncStatusSignal>,
    now_playing: Mutex<Option<NowPlaying>>,
    last_updated: Mutex<Option<DateTime<Utc>>>,
}

impl<S, P> Publisher<S, P>
where
    S: ReplicatedStore,
    P: Player,
{
    pub fn new(
        context: &SyncContext,
        code: SessionCode,
        host: impl Into<String>,
        store: Arc<S>,
        player: Arc<P>,
        status: Arc<SyncStatusSignal>,
    ) -> Self {
        Self {
            context: context.clone(),
            code,
            host: host.into(),
            store,
            player,
            status,
            now_playing: Default::default(),
            last_updated: Default::default(),
        }
    }

    /// Loads new media on the host's player, stopped at the start, and publishes it right away.
    pub async fn load_media(
        &self,
        media: MediaRef,
        title: impl Into<String>,
    ) -> Result<PlaybackState, PublishError> {
        let title = title.into();
        info!("Loading {} ({}) in session {}", title, media, self.code);

        self.player.load(&media, 0.);
        self.player.pause();

        *self.now_playing.lock() = Some(NowPlaying {
            media: media.clone(),
            title: title.clone(),
        });

        let snapshot = self.stamp(PlaybackState {
            media_ref: media,
            title,
            is_playing: false,
            position_seconds: 0.,
            volume: self.player.playback().volume,
            duration_seconds: 0.,
            last_updated: Utc::now(),
            updated_by: self.host.clone(),
        });

        self.write(snapshot, PublishTrigger::MediaLoaded).await
    }

    /// Publishes the player's current state. Returns `None` if nothing is loaded.
    pub async fn publish(
        &self,
        trigger: PublishTrigger,
    ) -> Result<Option<PlaybackState>, PublishError> {
        let Some(now_playing) = self.now_playing.lock().clone() else {
            debug!("Nothing loaded in {}, skipping {:?} publish", self.code, trigger);
            return Ok(None);
        };

        let local = self.player.playback();

        // The player may still report the previous media while the new one loads.
        let (is_playing, position, duration) = if local.media.as_ref() == Some(&now_playing.media)
        {
            (local.is_playing, local.position, local.duration)
        } else {
            (false, 0., 0.)
        };

        let snapshot = self.stamp(
            PlaybackState {
                media_ref: now_playing.media,
                title: now_playing.title,
                is_playing,
                position_seconds: position,
                volume: local.volume,
                duration_seconds: duration,
                last_updated: Utc::now(),
                updated_by: self.host.clone(),
            }
            .sanitized(),
        );

        self.write(snapshot, trigger).await.map(Some)
    }

    /// Reacts to an event from the host's player.
    pub async fn handle_player_event(
        &self,
        event: &PlayerEvent,
    ) -> Result<Option<PlaybackState>, PublishError> {
        match event {
            PlayerEvent::Ready
            | PlayerEvent::Playing
            | PlayerEvent::Paused
            | PlayerEvent::Ended
            | PlayerEvent::VolumeChanged(_) => self.publish(PublishTrigger::StateChange).await,
            PlayerEvent::Buffering => Ok(None),
            PlayerEvent::Error(error) => self.handle_player_error(*error),
        }
    }

    /// Returns true if a heartbeat should be published now.
    pub fn should_heartbeat(&self) -> bool {
        self.now_playing.lock().is_some() && self.player.playback().is_playing
    }

    pub fn now_playing(&self) -> Option<(MediaRef, String)> {
        self.now_playing
            .lock()
            .as_ref()
            .map(|n| (n.media.clone(), n.title.clone()))
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.status.get()
    }

    fn handle_player_error(
        &self,
        error: PlayerErrorCode,
    ) -> Result<Option<PlaybackState>, PublishError> {
        let Some(now_playing) = self.now_playing.lock().clone() else {
            return Ok(None);
        };

        warn!(
            "Player error {:?} for {} in session {}",
            error, now_playing.media, self.code
        );

        if !error.is_media_unavailable() {
            return Ok(None);
        }

        self.context.emit(SyncEvent::MediaUnavailable {
            code: self.code.clone(),
            media_ref: now_playing.media.clone(),
            error,
        });

        Err(PublishError::MediaUnavailable {
            media_ref: now_playing.media,
            error,
        })
    }

    /// Stamps the snapshot with a timestamp strictly later than any previous one.
    /// Timestamps travel as milliseconds, so they are truncated to that first.
    fn stamp(&self, mut snapshot: PlaybackState) -> PlaybackState {
        let now = Utc::now();
        let now = Utc
            .timestamp_millis_opt(now.timestamp_millis())
            .single()
            .unwrap_or(now);

        let mut last_updated = self.last_updated.lock();
        let stamped = match *last_updated {
            Some(previous) if previous >= now => previous + Duration::milliseconds(1),
            _ => now,
        };

        *last_updated = Some(stamped);

        snapshot.last_updated = stamped;
        snapshot.updated_by = self.host.clone();
        snapshot
    }

    async fn write(
        &self,
        snapshot: PlaybackState,
        trigger: PublishTrigger,
    ) -> Result<PlaybackState, PublishError> {
        let path = StorePath::playback(&self.code);

        match self.store.write(&path, snapshot.to_value()).await {
            Ok(()) => {
                debug!(
                    "Published {:?} snapshot to {}: playing={} at {:.1}s",
                    trigger, self.code, snapshot.is_playing, snapshot.position_seconds
                );

                self.status.set(SyncStatus::Synced);
                self.context.emit(SyncEvent::SnapshotPublished {
                    code: self.code.clone(),
                    snapshot: snapshot.clone(),
                    trigger,
                });

                Ok(snapshot)
            }
            Err(error) => {
                // Not retried, the next heartbeat or state change writes again.
                warn!("Failed to publish to {}: {}", self.code, error);
                self.status.set(SyncStatus::Error);

                Err(error.into())
            }
        }
    }
}

#[cfg(test)]
mod test {
    use crate::{
        testing::{FlatStore, ScriptedPlayer},
        Config, PlayerCommand,
    };

    use super::*;

    fn setup() -> (
        Publisher<FlatStore, ScriptedPlayer>,
        Arc<FlatStore>,
        Arc<ScriptedPlayer>,
        crate::EventReceiver,
    ) {
        let (context, events) = SyncContext::new(Config::default());
        let code = SessionCode::parse("ABC123", 6).unwrap();
        let store = Arc::new(FlatStore::default());
        let player = Arc::new(ScriptedPlayer::new());
        let status = Arc::new(SyncStatusSignal::new(&context, code.clone()));

        let publisher = Publisher::new(
            &context,
            code,
            "host",
            store.clone(),
            player.clone(),
            status,
        );

        (publisher, store, player, events)
    }

    fn stored_snapshot(store: &FlatStore) -> PlaybackState {
        let path = StorePath::parse("session/ABC123/playback");
        let value = store.values.lock().get(&path).cloned().unwrap();

        PlaybackState::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_load_media_publishes_stopped_at_start() {
        let (publisher, store, player, _events) = setup();
        player.ready_with("old", 42., 100., true);

        let snapshot = publisher
            .load_media(MediaRef::new("vid1"), "Song")
            .await
            .unwrap();

        assert_eq!(snapshot.media_ref, MediaRef::new("vid1"));
        assert!(!snapshot.is_playing, "new media starts stopped");
        assert_eq!(snapshot.position_seconds, 0.);
        assert_eq!(snapshot.updated_by, "host");
        assert_eq!(stored_snapshot(&store), snapshot);

        let commands = player.commands.lock().clone();
        assert_eq!(
            commands,
            vec![
                PlayerCommand::Load {
                    media: MediaRef::new("vid1"),
                    at_position: 0.
                },
                PlayerCommand::Pause
            ]
        );
        assert_eq!(publisher.sync_status(), SyncStatus::Synced);
    }

    #[tokio::test]
    async fn test_publish_reflects_player() {
        let (publisher, store, player, _events) = setup();

        assert!(
            publisher
                .publish(PublishTrigger::Heartbeat)
                .await
                .unwrap()
                .is_none(),
            "nothing to publish before media is loaded"
        );

        publisher
            .load_media(MediaRef::new("vid1"), "Song")
            .await
            .unwrap();
        player.ready_with("vid1", 12.5, 300., true);

        let snapshot = publisher
            .handle_player_event(&PlayerEvent::Playing)
            .await
            .unwrap()
            .unwrap();

        assert!(snapshot.is_playing);
        assert_eq!(snapshot.position_seconds, 12.5);
        assert_eq!(snapshot.duration_seconds, 300.);
        assert_eq!(stored_snapshot(&store), snapshot);
        assert!(publisher.should_heartbeat());
    }

    #[tokio::test]
    async fn test_timestamps_strictly_increase() {
        let (publisher, _store, player, _events) = setup();

        publisher
            .load_media(MediaRef::new("vid1"), "Song")
            .await
            .unwrap();
        player.ready_with("vid1", 0., 300., true);

        let mut previous = None;

        for _ in 0..20 {
            let snapshot = publisher
                .publish(PublishTrigger::ForceSync)
                .await
                .unwrap()
                .unwrap();

            if let Some(previous) = previous {
                assert!(snapshot.last_updated > previous, "timestamp increased");
            }

            previous = Some(snapshot.last_updated);
        }
    }

    #[tokio::test]
    async fn test_store_failure_sets_error_status() {
        let (publisher, store, _player, events) = setup();
        store.unreachable.store(true);

        let result = publisher.load_media(MediaRef::new("vid1"), "Song").await;

        assert!(matches!(
            result,
            Err(PublishError::Store(StoreError::Unreachable(_)))
        ));
        assert_eq!(publisher.sync_status(), SyncStatus::Error);

        store.unreachable.store(false);
        publisher.publish(PublishTrigger::ForceSync).await.unwrap();
        assert_eq!(publisher.sync_status(), SyncStatus::Synced, "recovers");

        let statuses: Vec<_> = events
            .try_iter()
            .filter_map(|e| match e {
                SyncEvent::SyncStatusUpdate { new_status, .. } => Some(new_status),
                _ => None,
            })
            .collect();

        assert_eq!(statuses, vec![SyncStatus::Error, SyncStatus::Synced]);
    }

    #[tokio::test]
    async fn test_media_errors_are_surfaced() {
        let (publisher, _store, _player, events) = setup();

        publisher
            .load_media(MediaRef::new("vid1"), "Song")
            .await
            .unwrap();

        let result = publisher
            .handle_player_event(&PlayerEvent::Error(PlayerErrorCode::NotEmbeddable))
            .await;

        assert!(matches!(
            result,
            Err(PublishError::MediaUnavailable { .. })
        ));
        assert!(events
            .try_iter()
            .any(|e| matches!(e, SyncEvent::MediaUnavailable { .. })));

        let unknown = publisher
            .handle_player_event(&PlayerEvent::Error(PlayerErrorCode::Other(7)))
            .await;

        assert!(matches!(unknown, Ok(None)), "unknown errors are only logged");
    }
}
