mod handle;
mod membership;
mod participant;
mod session;

use std::fmt::Display;

pub use handle::*;
pub use membership::*;
pub use participant::*;
pub use session::*;

use serde::{Deserialize, Serialize};
use tandem_core::{InvalidCode, PublishError, SessionCode, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollabError {
    #[error("{display_name} is already in session {code}")]
    IdentityConflict {
        code: SessionCode,
        display_name: String,
    },
    #[error("Session could not be reached: {0}")]
    SessionUnreachable(StoreError),
    #[error("Session {0} already exists")]
    SessionExists(SessionCode),
    #[error("Invalid session code: {0}")]
    InvalidCode(#[from] InvalidCode),
    #[error("Invalid display name: {0}")]
    InvalidName(String),
    #[error("Could not find a free session code after {0} attempts")]
    CodeSpaceExhausted(usize),
    #[error("Only the host can control playback")]
    NotHost,
    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// Helper trait to reduce boilerplate
pub trait IntoCollabError<T> {
    /// Treats any store error as the session being unreachable
    fn or_unreachable(self) -> Result<T, CollabError>;
    /// Treats a rejected write as a conflicting identity, anything else as the session being unreachable
    fn or_conflict(self, code: &SessionCode, display_name: &DisplayName) -> Result<T, CollabError>;
}

impl<T> IntoCollabError<T> for Result<T, StoreError> {
    fn or_unreachable(self) -> Result<T, CollabError> {
        self.map_err(CollabError::SessionUnreachable)
    }

    fn or_conflict(self, code: &SessionCode, display_name: &DisplayName) -> Result<T, CollabError> {
        self.map_err(|e| match e {
            StoreError::Rejected { .. } => CollabError::IdentityConflict {
                code: code.clone(),
                display_name: display_name.to_string(),
            },
            e => CollabError::SessionUnreachable(e),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Host,
    Follower,
}

/// A participant's name, which is also their identity within a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DisplayName(String);

impl DisplayName {
    pub const MAX_LENGTH: usize = 32;
    /// Characters that can't appear in a store key
    const FORBIDDEN: [char; 6] = ['.', '#', '$', '[', ']', '/'];

    pub fn parse(input: &str) -> Result<Self, CollabError> {
        let name = input.trim();

        if name.is_empty() {
            return Err(CollabError::InvalidName("name is empty".to_string()));
        }

        if name.chars().count() > Self::MAX_LENGTH {
            return Err(CollabError::InvalidName(format!(
                "name is longer than {} characters",
                Self::MAX_LENGTH
            )));
        }

        if let Some(c) = name
            .chars()
            .find(|c| Self::FORBIDDEN.contains(c) || c.is_control())
        {
            return Err(CollabError::InvalidName(format!("name contains {:?}", c)));
        }

        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for DisplayName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
