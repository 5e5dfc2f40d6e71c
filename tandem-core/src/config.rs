use std::{env, str::FromStr, time::Duration};

use log::warn;

use crate::Visibility;

/// The configuration of the sync engine
#[derive(Debug, Clone)]
pub struct Config {
    /// How far a follower may drift from the host before it seeks
    pub drift_threshold_in_seconds: f64,
    /// How often the host publishes while playing in the foreground
    pub heartbeat_interval_in_seconds: f32,
    /// How often the host publishes while playing in the background
    pub background_heartbeat_interval_in_seconds: f32,
    /// How long an empty session is kept around before it is removed
    pub reclamation_grace_in_seconds: f32,
    /// How often the local position is reported for display
    pub position_refresh_in_seconds: f32,
    /// The length of generated session codes
    pub session_code_length: usize,
    /// How many codes to try before giving up on creating a session
    pub max_code_attempts: usize,
    /// The volume local players start at
    pub default_volume: u8,
}

impl Config {
    /// Returns the heartbeat interval for the given visibility.
    /// Backgrounded hosts publish more often, since that is when throttling causes drift.
    pub fn heartbeat_interval(&self, visibility: Visibility) -> Duration {
        let seconds = match visibility {
            Visibility::Foreground => self.heartbeat_interval_in_seconds,
            Visibility::Background => self.background_heartbeat_interval_in_seconds,
        };

        seconds_to_duration(seconds)
    }

    pub fn reclamation_grace(&self) -> Duration {
        seconds_to_duration(self.reclamation_grace_in_seconds)
    }

    pub fn position_refresh_interval(&self) -> Duration {
        seconds_to_duration(self.position_refresh_in_seconds)
    }

    /// Returns the default config with any `TANDEM_*` environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        override_from_env(
            "TANDEM_DRIFT_THRESHOLD",
            &mut config.drift_threshold_in_seconds,
        );
        override_from_env(
            "TANDEM_HEARTBEAT_INTERVAL",
            &mut config.heartbeat_interval_in_seconds,
        );
        override_from_env(
            "TANDEM_BACKGROUND_HEARTBEAT_INTERVAL",
            &mut config.background_heartbeat_interval_in_seconds,
        );
        override_from_env(
            "TANDEM_RECLAMATION_GRACE",
            &mut config.reclamation_grace_in_seconds,
        );
        override_from_env("TANDEM_CODE_LENGTH", &mut config.session_code_length);

        config
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // Anything below this is hard to notice, and constant correction stutters
            drift_threshold_in_seconds: 2.0,
            heartbeat_interval_in_seconds: 5.0,
            background_heartbeat_interval_in_seconds: 2.0,
            // Long enough to absorb a page reload
            reclamation_grace_in_seconds: 1.0,
            position_refresh_in_seconds: 1.0,
            session_code_length: 6,
            max_code_attempts: 5,
            default_volume: 50,
        }
    }
}

fn seconds_to_duration(seconds: f32) -> Duration {
    if seconds.is_finite() {
        Duration::from_secs_f32(seconds.max(0.))
    } else {
        Duration::ZERO
    }
}

fn override_from_env<T>(key: &str, target: &mut T)
where
    T: FromStr,
{
    let Ok(raw) = env::var(key) else {
        return;
    };

    match raw.parse::<T>() {
        Ok(value) => *target = value,
        Err(_) => warn!("Ignoring {}: {:?} is not a valid value", key, raw),
    }
}
