use std::fmt::Display;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A short, human-shareable code identifying a session.
/// Codes are case-insensitive and always stored upper-cased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionCode(String);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvalidCode {
    #[error("code must be {expected} characters long, got {actual}")]
    Length { expected: usize, actual: usize },
    #[error("code may only contain letters and digits")]
    Charset,
}

impl SessionCode {
    /// Parses user input into a code of the given length.
    /// Surrounding whitespace is ignored and letters are upper-cased.
    pub fn parse(input: &str, length: usize) -> Result<Self, InvalidCode> {
        let normalized = input.trim().to_ascii_uppercase();
        let actual = normalized.chars().count();

        if actual != length {
            return Err(InvalidCode::Length {
                expected: length,
                actual,
            });
        }

        if !normalized.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(InvalidCode::Charset);
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SessionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_normalizes() {
        let code = SessionCode::parse("  abc123 ", 6).unwrap();
        assert_eq!(code.as_str(), "ABC123");
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert_eq!(
            SessionCode::parse("ABC12", 6),
            Err(InvalidCode::Length {
                expected: 6,
                actual: 5
            })
        );
        assert_eq!(SessionCode::parse("ABC/12", 6), Err(InvalidCode::Charset));
    }
}
