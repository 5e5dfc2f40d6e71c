//! Minimal store and player doubles for unit tests in this crate.

use std::collections::HashMap;

use async_trait::async_trait;
use crossbeam::atomic::AtomicCell;
use futures_util::{stream, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::{
    DisconnectAction, LocalPlayback, MediaRef, Player, PlayerCommand, PlayerEvent,
    PlayerEventReceiver, PlayerEventSender, PlayerStatus, ReplicatedStore, StoreError, StorePath,
    StoreResult, Subscription,
};

/// A flat map of paths to values. Subscriptions only yield the current value.
#[derive(Default)]
pub struct FlatStore {
    pub values: Mutex<HashMap<StorePath, Value>>,
    pub writes: Mutex<Vec<(StorePath, Value)>>,
    pub unreachable: AtomicCell<bool>,
}

impl FlatStore {
    fn check(&self) -> StoreResult<()> {
        if self.unreachable.load() {
            return Err(StoreError::Unreachable("offline".to_string()));
        }

        Ok(())
    }
}

#[async_trait]
impl ReplicatedStore for FlatStore {
    async fn write(&self, path: &StorePath, value: Value) -> StoreResult<()> {
        self.check()?;
        self.writes.lock().push((path.clone(), value.clone()));
        self.values.lock().insert(path.clone(), value);
        Ok(())
    }

    async fn read(&self, path: &StorePath) -> StoreResult<Option<Value>> {
        self.check()?;
        Ok(self.values.lock().get(path).cloned())
    }

    async fn remove(&self, path: &StorePath) -> StoreResult<()> {
        self.check()?;
        self.values.lock().remove(path);
        Ok(())
    }

    fn subscribe(&self, path: &StorePath) -> Subscription {
        let current = self.values.lock().get(path).cloned();
        stream::iter(vec![Ok(current)]).boxed()
    }

    async fn on_disconnect(&self, _path: &StorePath, _action: DisconnectAction) -> StoreResult<()> {
        self.check()
    }

    async fn cancel_on_disconnect(&self, _path: &StorePath) -> StoreResult<()> {
        self.check()
    }
}

/// A player whose state is set directly by the test, recording every command it receives.
pub struct ScriptedPlayer {
    pub state: Mutex<LocalPlayback>,
    pub commands: Mutex<Vec<PlayerCommand>>,
    events: PlayerEventSender,
}

impl ScriptedPlayer {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);

        Self {
            state: Mutex::new(LocalPlayback {
                volume: 50,
                ..Default::default()
            }),
            commands: Default::default(),
            events,
        }
    }

    pub fn ready_with(&self, media: &str, position: f64, duration: f64, is_playing: bool) {
        let mut state = self.state.lock();

        state.media = Some(MediaRef::new(media));
        state.status = PlayerStatus::Ready;
        state.position = position;
        state.duration = duration;
        state.is_playing = is_playing;
    }

    fn record(&self, command: PlayerCommand) {
        self.commands.lock().push(command);
    }
}

impl Player for ScriptedPlayer {
    fn load(&self, media: &MediaRef, at_position: f64) {
        let mut state = self.state.lock();
        state.media = Some(media.clone());
        state.status = PlayerStatus::Buffering;
        state.position = at_position;
        state.is_playing = false;
        drop(state);

        self.record(PlayerCommand::Load {
            media: media.clone(),
            at_position,
        });
    }

    fn play(&self) {
        self.state.lock().is_playing = true;
        self.record(PlayerCommand::Play);
    }

    fn pause(&self) {
        self.state.lock().is_playing = false;
        self.record(PlayerCommand::Pause);
    }

    fn seek(&self, position: f64) {
        self.state.lock().position = position;
        self.record(PlayerCommand::Seek(position));
    }

    fn set_volume(&self, volume: u8) {
        self.state.lock().volume = volume;
        self.record(PlayerCommand::SetVolume(volume));
        let _ = self.events.send(PlayerEvent::VolumeChanged(volume));
    }

    fn position(&self) -> f64 {
        self.state.lock().position
    }

    fn duration(&self) -> f64 {
        self.state.lock().duration
    }

    fn playback(&self) -> LocalPlayback {
        self.state.lock().clone()
    }

    fn subscribe(&self) -> PlayerEventReceiver {
        self.events.subscribe()
    }
}
