use tokio::sync::broadcast;

use crate::MediaRef;

pub type PlayerEventSender = broadcast::Sender<PlayerEvent>;
pub type PlayerEventReceiver = broadcast::Receiver<PlayerEvent>;

/// The readiness of a player's loaded media.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum PlayerStatus {
    /// Nothing has been loaded yet.
    #[default]
    Unstarted,
    /// Media is loading, or the player ran out of data.
    Buffering,
    /// The loaded media can be played.
    Ready,
}

/// Events emitted by a player backend.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    /// Loaded media is ready to be played.
    Ready,
    Playing,
    Paused,
    Buffering,
    Ended,
    /// The volume was changed locally.
    VolumeChanged(u8),
    Error(PlayerErrorCode),
}

/// Error codes reported by a player backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerErrorCode {
    /// The media identifier is malformed
    InvalidParameter,
    /// The media can't be played by the backend
    Html5,
    /// The media does not exist or was removed
    NotFound,
    /// The owner does not allow the media to be played in embedded players
    NotEmbeddable,
    Other(i32),
}

impl PlayerErrorCode {
    pub fn from_code(code: i32) -> Self {
        match code {
            2 => Self::InvalidParameter,
            5 => Self::Html5,
            100 => Self::NotFound,
            101 | 150 => Self::NotEmbeddable,
            other => Self::Other(other),
        }
    }

    /// Returns true if the media itself can't be played, so the host has to pick something else.
    pub fn is_media_unavailable(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

/// What a player reports about itself at a point in time.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LocalPlayback {
    pub media: Option<MediaRef>,
    pub status: PlayerStatus,
    pub is_playing: bool,
    /// The current position in seconds.
    pub position: f64,
    /// The duration of the loaded media in seconds, 0 if unknown.
    pub duration: f64,
    pub volume: u8,
}

/// An opaque media backend with imperative transport controls.
///
/// All controls return immediately. Completion of [Player::load] is reported through
/// [PlayerEvent::Ready], and transport changes through the other events.
pub trait Player: Send + Sync + 'static {
    fn load(&self, media: &MediaRef, at_position: f64);
    fn play(&self);
    fn pause(&self);
    fn seek(&self, position: f64);
    fn set_volume(&self, volume: u8);

    fn position(&self) -> f64;
    fn duration(&self) -> f64;
    fn playback(&self) -> LocalPlayback;

    /// Returns a receiver of every event emitted from now on.
    fn subscribe(&self) -> PlayerEventReceiver;
}

/// An operation issued to a [Player] by the sync engine.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerCommand {
    Load { media: MediaRef, at_position: f64 },
    Seek(f64),
    Play,
    Pause,
    SetVolume(u8),
}

impl PlayerCommand {
    pub fn apply<P>(&self, player: &P)
    where
        P: Player + ?Sized,
    {
        match self {
            Self::Load { media, at_position } => player.load(media, *at_position),
            Self::Seek(position) => player.seek(*position),
            Self::Play => player.play(),
            Self::Pause => player.pause(),
            Self::SetVolume(volume) => player.set_volume(*volume),
        }
    }
}
