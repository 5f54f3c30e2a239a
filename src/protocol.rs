//! JSON shapes shared by the stream and the query endpoints.

use crate::state::{ApplicationSnapshot, HistoryPoint, PublishedState, SystemSnapshot};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Initial,
    Update,
}

/// One frame pushed to a stream subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub system: SystemSnapshot,
    pub application: ApplicationSnapshot,
}

impl StreamMessage {
    pub fn new(kind: MessageKind, state: &PublishedState) -> Self {
        Self {
            kind,
            system: state.system.clone(),
            application: state.application.clone(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedResponse {
    pub system: SystemSnapshot,
    pub application: ApplicationSnapshot,
}

impl From<&PublishedState> for CombinedResponse {
    fn from(value: &PublishedState) -> Self {
        Self {
            system: value.system.clone(),
            application: value.application.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub capacity: usize,
    pub points: Vec<HistoryPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotAvailableResponse {
    pub error: String,
    pub message: String,
}

impl NotAvailableResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: "not_yet_available".to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::fixtures;

    #[test]
    fn stream_message_has_fixed_shape() {
        let state = fixtures::published(3, 12.5);
        let text = StreamMessage::new(MessageKind::Initial, &state)
            .to_json()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();

        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 3);
        assert_eq!(object["type"], "initial");
        assert_eq!(object["system"]["cpu_percent"], 12.5);
        assert_eq!(object["application"]["connected"], true);
    }

    #[test]
    fn stream_message_parses_back() {
        let mut state = fixtures::published(4, 39.430133835633676);
        state.system.process_cpu_percent = 100.0 / 3.0;
        state.system.cpu_freq_mhz = 39.430133835633676 * 37.1;
        state.application.latency_ms = 2.0 / 3.0;

        let message = StreamMessage::new(MessageKind::Update, &state);
        let parsed: StreamMessage = serde_json::from_str(&message.to_json().unwrap()).unwrap();
        assert_eq!(parsed, message);
        assert_eq!(parsed.system, state.system);
        assert_eq!(parsed.application, state.application);
    }
}
