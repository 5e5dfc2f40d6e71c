use chrono::{serde::ts_milliseconds, DateTime, TimeZone, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{DisplayName, Role};

/// A member record, stored at `session/{code}/members/{display_name}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub display_name: String,
    pub role: Role,
    #[serde(with = "ts_milliseconds")]
    pub joined_at: DateTime<Utc>,
}

impl Participant {
    pub fn new(display_name: &DisplayName, role: Role) -> Self {
        let now = Utc::now();

        Self {
            display_name: display_name.to_string(),
            role,
            // Stored as milliseconds, so keep it equal to what comes back
            joined_at: Utc
                .timestamp_millis_opt(now.timestamp_millis())
                .single()
                .unwrap_or(now),
        }
    }

    pub fn is_host(&self) -> bool {
        self.role == Role::Host
    }
}

/// Every participant of a session, ordered by when they joined.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemberSet {
    members: Vec<Participant>,
}

impl MemberSet {
    /// Builds a member set from the children of the members path.
    /// Records that can't be decoded are skipped.
    pub fn from_children(children: Vec<(String, Value)>) -> Self {
        let mut members: Vec<Participant> = children
            .into_iter()
            .filter_map(|(key, value)| {
                match serde_json::from_value::<Participant>(value) {
                    Ok(mut participant) => {
                        // The key is the identity
                        participant.display_name = key;
                        Some(participant)
                    }
                    Err(error) => {
                        warn!("Skipping malformed member record {}: {}", key, error);
                        None
                    }
                }
            })
            .collect();

        members.sort_by(|a, b| {
            a.joined_at
                .cmp(&b.joined_at)
                .then_with(|| a.display_name.cmp(&b.display_name))
        });

        Self { members }
    }

    /// Builds a member set from the value at the members path.
    pub fn from_value(value: Option<Value>) -> Self {
        match value {
            Some(Value::Object(map)) => Self::from_children(map.into_iter().collect()),
            _ => Self::default(),
        }
    }

    /// Returns the earliest participant with the host role.
    pub fn host(&self) -> Option<&Participant> {
        self.members.iter().find(|p| p.is_host())
    }

    pub fn get(&self, display_name: &str) -> Option<&Participant> {
        self.members.iter().find(|p| p.display_name == display_name)
    }

    pub fn contains(&self, display_name: &str) -> bool {
        self.get(display_name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.members.iter()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_member_set() {
        let members = MemberSet::from_children(vec![
            (
                "F1".to_string(),
                json!({ "displayName": "F1", "role": "follower", "joinedAt": 2000 }),
            ),
            (
                "H".to_string(),
                json!({ "displayName": "H", "role": "host", "joinedAt": 1000 }),
            ),
            ("broken".to_string(), json!({ "role": "nobody" })),
        ]);

        assert_eq!(members.len(), 2, "malformed record is skipped");
        assert_eq!(members.host().map(|p| p.display_name.as_str()), Some("H"));
        assert_eq!(
            members
                .iter()
                .map(|p| p.display_name.as_str())
                .collect::<Vec<_>>(),
            vec!["H", "F1"]
        );
        assert!(members.contains("F1"));
        assert!(!members.contains("broken"));
    }

    #[test]
    fn test_participant_wire_format() {
        let name = DisplayName::parse("Bob").unwrap();
        let participant = Participant::new(&name, Role::Follower);
        let value = serde_json::to_value(&participant).unwrap();

        assert_eq!(value["displayName"], json!("Bob"));
        assert_eq!(value["role"], json!("follower"));
        assert_eq!(
            value["joinedAt"],
            json!(participant.joined_at.timestamp_millis())
        );
        assert_eq!(
            serde_json::from_value::<Participant>(value).unwrap(),
            participant
        );
    }
}
