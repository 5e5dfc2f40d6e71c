use std::fmt::Display;

use crate::SessionCode;

/// A slash-separated key path into the replicated store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct StorePath {
    segments: Vec<String>,
}

impl StorePath {
    const SESSIONS: &'static str = "session";
    const MEMBERS: &'static str = "members";
    const PLAYBACK: &'static str = "playback";

    /// The root of the store.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parses a path such as `session/ABC123/playback`. Empty segments are ignored.
    pub fn parse(path: &str) -> Self {
        Self {
            segments: path
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// Returns a new path with the given segment appended.
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());

        Self { segments }
    }

    /// `session/{code}`
    pub fn session(code: &SessionCode) -> Self {
        Self::root().child(Self::SESSIONS).child(code.as_str())
    }

    /// `session/{code}/members`
    pub fn members(code: &SessionCode) -> Self {
        Self::session(code).child(Self::MEMBERS)
    }

    /// `session/{code}/members/{display_name}`
    pub fn member(code: &SessionCode, display_name: &str) -> Self {
        Self::members(code).child(display_name)
    }

    /// `session/{code}/playback`
    pub fn playback(code: &SessionCode) -> Self {
        Self::session(code).child(Self::PLAYBACK)
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Returns this path nested under the given prefix.
    pub fn prefixed(&self, prefix: &StorePath) -> Self {
        let mut segments = prefix.segments.clone();
        segments.extend(self.segments.iter().cloned());

        Self { segments }
    }

    /// Returns true if `other` is this path or lies below it.
    pub fn contains(&self, other: &StorePath) -> bool {
        other.segments.starts_with(&self.segments)
    }

    /// Returns true if a change at one of the paths can affect the value at the other.
    pub fn overlaps(&self, other: &StorePath) -> bool {
        self.contains(other) || other.contains(self)
    }
}

impl Display for StorePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "/{}", self.segments.join("/"))
    }
}
