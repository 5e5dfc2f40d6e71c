use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use crate::{
    Config, LocalPlayback, MediaRef, PlaybackState, PlayerCommand, PlayerEvent, PlayerStatus,
    Visibility,
};

/// Why a follower ignored a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum DiscardReason {
    /// A newer snapshot was already accepted.
    Stale {
        received: DateTime<Utc>,
        newest: DateTime<Utc>,
    },
    /// The snapshot was written under this follower's own identity.
    OwnEcho,
    /// The snapshot was written by someone other than the host.
    NotFromHost { updated_by: String },
    /// The payload could not be decoded.
    Malformed(String),
}

/// The outcome of feeding a snapshot to the [Reconciler].
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    /// The commands to issue to the local player, in order.
    Applied(Vec<PlayerCommand>),
    /// Media is loading or the host is not known yet, the snapshot is queued until then.
    Deferred,
    Discarded(DiscardReason),
}

#[derive(Debug, Clone, PartialEq)]
enum Phase {
    /// Nothing has been reconciled yet.
    Idle,
    /// A load was issued and the player hasn't reported ready yet.
    Loading(MediaRef),
    Ready(MediaRef),
}

/// Converges a follower's local player to the host's snapshots.
///
/// The reconciler is a plain state machine. It never touches the player itself,
/// it returns the commands the caller should issue, in order.
#[derive(Debug)]
pub struct Reconciler {
    config: Config,
    identity: String,
    host: Option<String>,
    phase: Phase,
    /// The newest accepted snapshot.
    newest: Option<PlaybackState>,
    /// The snapshot to apply once the current load completes.
    queued: Option<PlaybackState>,
    /// The newest snapshot received before the host was known.
    unconfirmed: Option<PlaybackState>,
}

impl Reconciler {
    pub fn new(config: Config, identity: impl Into<String>) -> Self {
        Self {
            config,
            identity: identity.into(),
            host: None,
            phase: Phase::Idle,
            newest: None,
            queued: None,
            unconfirmed: None,
        }
    }

    /// Updates the host identity from the member set.
    /// A departed host is remembered, so nobody else can take over playback.
    ///
    /// Returns the snapshot held back while the host was unknown, if the host wrote it.
    /// The caller feeds it to [Reconciler::on_snapshot].
    pub fn observe_host(&mut self, host: Option<&str>) -> Option<PlaybackState> {
        if let Some(host) = host {
            if self.host.as_deref() != Some(host) {
                debug!("{} now follows host {}", self.identity, host);
                self.host = Some(host.to_string());
            }
        }

        let host = self.host.as_deref()?;
        let held = self.unconfirmed.take()?;

        if held.updated_by == host {
            Some(held)
        } else {
            debug!(
                "{} dropped a snapshot held from {}, who is not the host",
                self.identity, held.updated_by
            );
            None
        }
    }

    pub fn on_snapshot(
        &mut self,
        snapshot: PlaybackState,
        local: &LocalPlayback,
    ) -> Reconciliation {
        let snapshot = snapshot.sanitized();

        if let Some(reason) = self.discard_reason(&snapshot) {
            debug!("{} discarded snapshot: {:?}", self.identity, reason);
            return Reconciliation::Discarded(reason);
        }

        if self.host.is_none() {
            let is_newest = self
                .unconfirmed
                .as_ref()
                .map_or(true, |held| !snapshot.is_older_than(held));

            if is_newest {
                self.unconfirmed = Some(snapshot);
            }

            debug!("{} holds a snapshot until the host is known", self.identity);
            return Reconciliation::Deferred;
        }

        self.newest = Some(snapshot.clone());

        let commands = match self.phase.clone() {
            Phase::Loading(media) if media == snapshot.media_ref => {
                self.queued = Some(snapshot);
                return Reconciliation::Deferred;
            }
            Phase::Ready(media)
                if media == snapshot.media_ref && local.media.as_ref() == Some(&media) =>
            {
                self.converge(&snapshot, local)
            }
            Phase::Idle if local.media.as_ref() == Some(&snapshot.media_ref) => {
                match local.status {
                    PlayerStatus::Ready => {
                        self.phase = Phase::Ready(snapshot.media_ref.clone());
                        self.converge(&snapshot, local)
                    }
                    PlayerStatus::Buffering => {
                        self.phase = Phase::Loading(snapshot.media_ref.clone());
                        self.queued = Some(snapshot);
                        return Reconciliation::Deferred;
                    }
                    PlayerStatus::Unstarted => self.cut_to(snapshot),
                }
            }
            _ => self.cut_to(snapshot),
        };

        Reconciliation::Applied(commands)
    }

    /// Reacts to an event from the local player, returning the commands to issue.
    pub fn on_player_event(
        &mut self,
        event: &PlayerEvent,
        local: &LocalPlayback,
        visibility: Visibility,
    ) -> Vec<PlayerCommand> {
        match (event, &self.phase) {
            (PlayerEvent::Ready, Phase::Loading(media)) if local.media.as_ref() == Some(media) => {
                let media = media.clone();
                debug!("{} finished loading {}", self.identity, media);

                self.phase = Phase::Ready(media);

                match self.queued.take() {
                    Some(snapshot) => self.converge(&snapshot, local),
                    None => vec![],
                }
            }
            (PlayerEvent::Paused, Phase::Ready(media)) if visibility == Visibility::Background => {
                let wants_playing = self
                    .newest
                    .as_ref()
                    .is_some_and(|s| s.is_playing && &s.media_ref == media);

                if wants_playing {
                    info!(
                        "{} was paused in the background, resuming playback",
                        self.identity
                    );
                    vec![PlayerCommand::Play]
                } else {
                    vec![]
                }
            }
            (PlayerEvent::Error(error), _) => {
                // A load that errors never reports ready, so the queue stays put.
                warn!(
                    "{} player reported {:?} while {:?}",
                    self.identity, error, self.phase
                );
                vec![]
            }
            _ => vec![],
        }
    }

    /// The snapshot the follower is converging to, if any.
    pub fn target(&self) -> Option<&PlaybackState> {
        self.newest.as_ref()
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.phase, Phase::Loading(_))
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    fn discard_reason(&self, snapshot: &PlaybackState) -> Option<DiscardReason> {
        if snapshot.updated_by == self.identity {
            return Some(DiscardReason::OwnEcho);
        }

        if let Some(host) = &self.host {
            if &snapshot.updated_by != host {
                return Some(DiscardReason::NotFromHost {
                    updated_by: snapshot.updated_by.clone(),
                });
            }
        }

        match &self.newest {
            Some(newest) if snapshot.is_older_than(newest) => Some(DiscardReason::Stale {
                received: snapshot.last_updated,
                newest: newest.last_updated,
            }),
            _ => None,
        }
    }

    /// New media: drop everything about the previous one and load from the snapshot's position.
    fn cut_to(&mut self, snapshot: PlaybackState) -> Vec<PlayerCommand> {
        info!(
            "{} loading {} at {:.1}s",
            self.identity, snapshot.media_ref, snapshot.position_seconds
        );

        let command = PlayerCommand::Load {
            media: snapshot.media_ref.clone(),
            at_position: snapshot.position_seconds,
        };

        self.phase = Phase::Loading(snapshot.media_ref.clone());
        self.queued = Some(snapshot);

        vec![command]
    }

    fn converge(&self, snapshot: &PlaybackState, local: &LocalPlayback) -> Vec<PlayerCommand> {
        let mut commands = vec![];

        let target = if local.duration > 0. {
            snapshot.position_seconds.clamp(0., local.duration)
        } else {
            snapshot.position_seconds
        };

        let drift = (target - local.position).abs();

        // Seek goes first so that playback resumes at the right spot.
        if drift > self.config.drift_threshold_in_seconds {
            commands.push(PlayerCommand::Seek(target));
        }

        if snapshot.is_playing != local.is_playing {
            commands.push(if snapshot.is_playing {
                PlayerCommand::Play
            } else {
                PlayerCommand::Pause
            });
        }

        commands.push(PlayerCommand::SetVolume(snapshot.volume));
        commands
    }
}
