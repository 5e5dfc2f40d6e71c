use std::fmt::Display;

use chrono::{DateTime, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

lazy_static! {
    static ref MEDIA_LINK_REGEX: Regex =
        Regex::new(r"^.*(youtu\.be/|v/|u/\w/|embed/|watch\?v=|&v=)([^#&?]*).*").unwrap();
    static ref MEDIA_ID_REGEX: Regex = Regex::new(r"^[A-Za-z0-9_-]{11}$").unwrap();
}

/// An opaque identifier of a playable media resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaRef(String);

impl MediaRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Parses a bare 11 character video id, or extracts one from a share, watch, or embed link.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();

        if MEDIA_ID_REGEX.is_match(input) {
            return Some(Self::new(input));
        }

        MEDIA_LINK_REGEX
            .captures(input)
            .and_then(|c| c.get(2))
            .map(|m| m.as_str())
            .filter(|id| MEDIA_ID_REGEX.is_match(id))
            .map(Self::new)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for MediaRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The single shared record of what is playing in a session, and where.
/// Only the host writes it; everyone else reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackState {
    pub media_ref: MediaRef,
    pub title: String,
    pub is_playing: bool,
    pub position_seconds: f64,
    /// 0 to 100
    pub volume: u8,
    pub duration_seconds: f64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_updated: DateTime<Utc>,
    /// The display name of the participant that wrote this snapshot
    pub updated_by: String,
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Snapshot is not an object")]
    NotAnObject,
    #[error("Snapshot is missing {0}")]
    MissingField(&'static str),
    #[error("Snapshot has an invalid timestamp: {0}")]
    InvalidTimestamp(i64),
    #[error("Snapshot could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
}

/// The snapshot as it may appear on the wire, where any field can be missing or out of range.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct WirePlaybackState {
    media_ref: Option<String>,
    title: Option<String>,
    is_playing: Option<bool>,
    position_seconds: Option<f64>,
    volume: Option<f64>,
    duration_seconds: Option<f64>,
    last_updated: Option<i64>,
    updated_by: Option<String>,
}

impl PlaybackState {
    pub const UNTITLED: &'static str = "Untitled";
    pub const MAX_VOLUME: u8 = 100;

    /// Decodes a snapshot from an untrusted payload, clamping anything out of range.
    pub fn from_value(value: Value) -> Result<Self, SnapshotError> {
        if !value.is_object() {
            return Err(SnapshotError::NotAnObject);
        }

        let wire: WirePlaybackState = serde_json::from_value(value)?;

        let media_ref = wire
            .media_ref
            .filter(|m| !m.is_empty())
            .ok_or(SnapshotError::MissingField("mediaRef"))?;
        let millis = wire
            .last_updated
            .ok_or(SnapshotError::MissingField("lastUpdated"))?;
        let last_updated = Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or(SnapshotError::InvalidTimestamp(millis))?;
        let updated_by = wire
            .updated_by
            .ok_or(SnapshotError::MissingField("updatedBy"))?;

        let volume = finite_or_zero(wire.volume.unwrap_or(0.))
            .round()
            .clamp(0., Self::MAX_VOLUME as f64) as u8;

        let state = Self {
            media_ref: MediaRef::new(media_ref),
            title: wire.title.unwrap_or_else(|| Self::UNTITLED.to_string()),
            is_playing: wire.is_playing.unwrap_or(false),
            position_seconds: wire.position_seconds.unwrap_or(0.),
            duration_seconds: wire.duration_seconds.unwrap_or(0.),
            volume,
            last_updated,
            updated_by,
        };

        Ok(state.sanitized())
    }

    /// Returns the snapshot with every field within its valid range.
    /// The position is clamped to the duration, if the duration is known.
    pub fn sanitized(mut self) -> Self {
        self.duration_seconds = finite_or_zero(self.duration_seconds).max(0.);
        self.position_seconds = self.clamp_position(self.position_seconds);
        self.volume = self.volume.min(Self::MAX_VOLUME);
        self
    }

    /// Clamps a position to `[0, duration]`, or to `[0, ∞)` if the duration is unknown.
    pub fn clamp_position(&self, position: f64) -> f64 {
        let position = finite_or_zero(position).max(0.);

        if self.duration_seconds > 0. {
            position.min(self.duration_seconds)
        } else {
            position
        }
    }

    /// Returns true if this snapshot was written before `other`.
    pub fn is_older_than(&self, other: &PlaybackState) -> bool {
        self.last_updated < other.last_updated
    }

    pub fn to_value(&self) -> Value {
        // A struct of plain fields always serializes
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.
    }
}
