use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use log::debug;
use parking_lot::Mutex;
use tandem_core::{
    LocalPlayback, MediaRef, Player, PlayerCommand, PlayerErrorCode, PlayerEvent,
    PlayerEventReceiver, PlayerEventSender, PlayerStatus,
};
use tokio::{
    sync::broadcast,
    time::{sleep, Instant},
};

/// What the simulated backend knows about a piece of media.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CatalogEntry {
    Available { duration: f64 },
    Unavailable(PlayerErrorCode),
}

#[derive(Debug, Clone)]
pub struct SimulatedPlayerConfig {
    /// How long a load takes before the player is ready
    pub load_delay: Duration,
    /// The duration of media missing from the catalog, in seconds
    pub default_duration: f64,
    pub initial_volume: u8,
}

impl Default for SimulatedPlayerConfig {
    fn default() -> Self {
        Self {
            load_delay: Duration::from_millis(100),
            default_duration: 300.,
            initial_volume: 50,
        }
    }
}

#[derive(Debug, Default)]
struct PlayerState {
    media: Option<MediaRef>,
    status: PlayerStatus,
    duration: f64,
    volume: u8,
    /// The position when playback last started or stopped.
    base_position: f64,
    playing_since: Option<Instant>,
    /// Play was requested while buffering.
    autoplay: bool,
    /// Incremented on every load, so that a superseded load never completes.
    generation: u64,
}

impl PlayerState {
    fn position(&self) -> f64 {
        let elapsed = self
            .playing_since
            .map(|since| since.elapsed().as_secs_f64())
            .unwrap_or(0.);

        let position = self.base_position + elapsed;

        if self.duration > 0. {
            position.min(self.duration)
        } else {
            position
        }
    }

    fn is_playing(&self) -> bool {
        self.playing_since.is_some()
    }

    fn start(&mut self) {
        self.playing_since = Some(Instant::now());
    }

    fn stop(&mut self) {
        self.base_position = self.position();
        self.playing_since = None;
    }
}

/// A player that advances a clock instead of decoding anything.
///
/// Uses tokio's clock, so tests can run it with paused time.
pub struct SimulatedPlayer {
    config: SimulatedPlayerConfig,
    state: Arc<Mutex<PlayerState>>,
    catalog: DashMap<MediaRef, CatalogEntry>,
    history: Mutex<Vec<PlayerCommand>>,
    events: PlayerEventSender,
}

impl SimulatedPlayer {
    pub fn new(config: SimulatedPlayerConfig) -> Self {
        let (events, _) = broadcast::channel(64);

        let state = PlayerState {
            volume: config.initial_volume,
            ..Default::default()
        };

        Self {
            config,
            state: Arc::new(Mutex::new(state)),
            catalog: Default::default(),
            history: Default::default(),
            events,
        }
    }

    /// Registers media with a known duration.
    pub fn with_media(self, media: MediaRef, duration: f64) -> Self {
        self.catalog
            .insert(media, CatalogEntry::Available { duration });
        self
    }

    /// Registers media that fails to load with the given error.
    pub fn with_unavailable(self, media: MediaRef, error: PlayerErrorCode) -> Self {
        self.catalog.insert(media, CatalogEntry::Unavailable(error));
        self
    }

    /// Simulates the platform pausing playback on its own, e.g. when backgrounded.
    pub fn interrupt(&self) {
        let mut state = self.state.lock();

        if !state.is_playing() {
            return;
        }

        state.stop();
        drop(state);

        debug!("Simulated player was interrupted");
        self.emit(PlayerEvent::Paused);
    }

    /// Returns every control operation issued to the player, in order.
    pub fn history(&self) -> Vec<PlayerCommand> {
        self.history.lock().clone()
    }

    fn record(&self, command: PlayerCommand) {
        self.history.lock().push(command);
    }

    fn emit(&self, event: PlayerEvent) {
        let _ = self.events.send(event);
    }

    fn lookup(&self, media: &MediaRef) -> CatalogEntry {
        self.catalog
            .get(media)
            .map(|entry| *entry)
            .unwrap_or(CatalogEntry::Available {
                duration: self.config.default_duration,
            })
    }

    /// Emits [PlayerEvent::Ended] if playback ran past the end.
    fn check_ended(&self) {
        let mut state = self.state.lock();

        let reached_end =
            state.is_playing() && state.duration > 0. && state.position() >= state.duration;

        if reached_end {
            state.stop();
            drop(state);

            self.emit(PlayerEvent::Ended);
        }
    }
}

impl Player for SimulatedPlayer {
    fn load(&self, media: &MediaRef, at_position: f64) {
        self.record(PlayerCommand::Load {
            media: media.clone(),
            at_position,
        });

        let generation = {
            let mut state = self.state.lock();

            state.generation += 1;
            state.media = Some(media.clone());
            state.status = PlayerStatus::Buffering;
            state.duration = 0.;
            state.base_position = at_position.max(0.);
            state.playing_since = None;
            state.autoplay = false;

            state.generation
        };

        self.emit(PlayerEvent::Buffering);

        let entry = self.lookup(media);
        let state = self.state.clone();
        let events = self.events.clone();
        let delay = self.config.load_delay;

        tokio::spawn(async move {
            sleep(delay).await;

            let mut state = state.lock();

            if state.generation != generation {
                return;
            }

            let mut to_emit = vec![];

            match entry {
                CatalogEntry::Available { duration } => {
                    state.status = PlayerStatus::Ready;
                    state.duration = duration;
                    state.base_position = state.base_position.min(duration);
                    to_emit.push(PlayerEvent::Ready);

                    if state.autoplay {
                        state.autoplay = false;
                        state.start();
                        to_emit.push(PlayerEvent::Playing);
                    }
                }
                CatalogEntry::Unavailable(error) => {
                    state.status = PlayerStatus::Unstarted;
                    to_emit.push(PlayerEvent::Error(error));
                }
            }

            drop(state);

            for event in to_emit {
                let _ = events.send(event);
            }
        });
    }

    fn play(&self) {
        self.record(PlayerCommand::Play);

        let mut state = self.state.lock();
        let status = state.status;

        match status {
            PlayerStatus::Buffering => state.autoplay = true,
            PlayerStatus::Ready if !state.is_playing() => {
                if state.duration > 0. && state.position() >= state.duration {
                    state.base_position = 0.;
                }

                state.start();
                drop(state);

                self.emit(PlayerEvent::Playing);
            }
            _ => {}
        }
    }

    fn pause(&self) {
        self.record(PlayerCommand::Pause);

        let mut state = self.state.lock();
        state.autoplay = false;

        if state.is_playing() {
            state.stop();
            drop(state);

            self.emit(PlayerEvent::Paused);
        }
    }

    fn seek(&self, position: f64) {
        self.record(PlayerCommand::Seek(position));

        let mut state = self.state.lock();

        let position = position.max(0.);
        state.base_position = if state.duration > 0. {
            position.min(state.duration)
        } else {
            position
        };

        if state.is_playing() {
            state.start();
        }
    }

    fn set_volume(&self, volume: u8) {
        self.record(PlayerCommand::SetVolume(volume));

        let volume = volume.min(100);
        let changed = {
            let mut state = self.state.lock();
            let changed = state.volume != volume;
            state.volume = volume;
            changed
        };

        if changed {
            self.emit(PlayerEvent::VolumeChanged(volume));
        }
    }

    /// Polling the position is what notices the end of the media.
    fn position(&self) -> f64 {
        self.check_ended();
        self.state.lock().position()
    }

    fn duration(&self) -> f64 {
        self.state.lock().duration
    }

    fn playback(&self) -> LocalPlayback {
        self.check_ended();
        let state = self.state.lock();

        LocalPlayback {
            media: state.media.clone(),
            status: state.status,
            is_playing: state.is_playing(),
            position: state.position(),
            duration: state.duration,
            volume: state.volume,
        }
    }

    fn subscribe(&self) -> PlayerEventReceiver {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn player() -> SimulatedPlayer {
        SimulatedPlayer::new(SimulatedPlayerConfig::default())
            .with_media(MediaRef::new("vid1"), 300.)
            .with_unavailable(MediaRef::new("gone"), PlayerErrorCode::NotFound)
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_then_play() {
        let player = player();
        let mut events = player.subscribe();

        player.load(&MediaRef::new("vid1"), 10.);
        player.play();
        assert_eq!(events.recv().await.unwrap(), PlayerEvent::Buffering);
        assert_eq!(player.playback().status, PlayerStatus::Buffering);

        assert_eq!(events.recv().await.unwrap(), PlayerEvent::Ready);
        assert_eq!(
            events.recv().await.unwrap(),
            PlayerEvent::Playing,
            "play while buffering starts once ready"
        );

        sleep(Duration::from_secs(5)).await;

        let playback = player.playback();
        assert!(playback.is_playing);
        assert!((playback.position - 15.).abs() < 0.01);
        assert_eq!(playback.duration, 300.);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_media_errors() {
        let player = player();
        let mut events = player.subscribe();

        player.load(&MediaRef::new("gone"), 0.);

        assert_eq!(events.recv().await.unwrap(), PlayerEvent::Buffering);
        assert_eq!(
            events.recv().await.unwrap(),
            PlayerEvent::Error(PlayerErrorCode::NotFound)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_load_never_completes() {
        let player = player();
        let mut events = player.subscribe();

        player.load(&MediaRef::new("gone"), 0.);
        player.load(&MediaRef::new("vid1"), 0.);

        assert_eq!(events.recv().await.unwrap(), PlayerEvent::Buffering);
        assert_eq!(events.recv().await.unwrap(), PlayerEvent::Buffering);
        assert_eq!(events.recv().await.unwrap(), PlayerEvent::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_seek_clamps_and_end_is_reported() {
        let player = player();
        let mut events = player.subscribe();

        player.load(&MediaRef::new("vid1"), 0.);
        sleep(Duration::from_millis(200)).await;

        player.seek(500.);
        assert_eq!(player.position(), 300.);

        player.seek(298.);
        player.play();
        sleep(Duration::from_secs(3)).await;

        assert_eq!(player.position(), 300.);
        assert!(!player.playback().is_playing);

        let events: Vec<_> = std::iter::from_fn(|| events.try_recv().ok()).collect();
        assert_eq!(events.last(), Some(&PlayerEvent::Ended));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_is_not_a_command() {
        let player = player();

        player.load(&MediaRef::new("vid1"), 0.);
        player.play();
        sleep(Duration::from_millis(200)).await;

        player.interrupt();

        assert!(!player.playback().is_playing);
        assert_eq!(
            player.history(),
            vec![
                PlayerCommand::Load {
                    media: MediaRef::new("vid1"),
                    at_position: 0.
                },
                PlayerCommand::Play
            ]
        );
    }
}
