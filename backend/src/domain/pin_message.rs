//! Pin instruction published to the queue.
//!
//! The wire shape is camelCase JSON. Unknown fields are ignored so newer
//! producers can add data without breaking running consumers.

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use super::{ContentHash, Credits, NetworkName, UploadClaim, UploadKind, Username};

/// Reasons a payload cannot be turned into a [`PinRequestMessage`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PinMessageError {
    #[error("pin message is not valid JSON: {0}")]
    Malformed(String),
    #[error("pin message hold time must be positive")]
    ZeroHold,
}

/// Immutable fact describing one accepted pin.
///
/// # Examples
/// ```
/// use pinledger::domain::PinRequestMessage;
///
/// let body = br#"{"contentHash":"QmExampleHash0001","network":"public","username":"alice","holdMonths":1,"extra":true}"#;
/// let message = PinRequestMessage::decode(body).expect("valid payload");
/// assert_eq!(message.hold_months, 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinRequestMessage {
    pub content_hash: ContentHash,
    #[serde(default)]
    pub network: NetworkName,
    pub username: Username,
    pub hold_months: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_cost"
    )]
    pub cost: Option<Credits>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub kind: UploadKind,
    #[serde(default)]
    pub encrypted: bool,
}

impl PinRequestMessage {
    /// Parse and validate a queue payload.
    pub fn decode(body: &[u8]) -> Result<Self, PinMessageError> {
        let message: Self = serde_json::from_slice(body)
            .map_err(|err| PinMessageError::Malformed(err.to_string()))?;
        if message.hold_months == 0 {
            return Err(PinMessageError::ZeroHold);
        }
        Ok(message)
    }

    /// Serialise for publishing.
    pub fn encode(&self) -> Result<Vec<u8>, PinMessageError> {
        serde_json::to_vec(self).map_err(|err| PinMessageError::Malformed(err.to_string()))
    }

    /// The record update this message asks for.
    ///
    /// Messages without `createdAt` count from `received_at`.
    pub fn to_claim(&self, received_at: DateTime<Utc>) -> UploadClaim {
        UploadClaim {
            hash: self.content_hash.clone(),
            network: self.network.clone(),
            username: self.username.clone(),
            kind: self.kind,
            hold_months: self.hold_months,
            encrypted: self.encrypted,
            requested_at: self.created_at.unwrap_or(received_at),
        }
    }
}

/// Costs arrive either as a decimal string or a bare JSON number.
fn deserialize_cost<'de, D>(deserializer: D) -> Result<Option<Credits>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum CostRepr {
        Text(String),
        Number(serde_json::Number),
    }

    let Some(repr) = Option::<CostRepr>::deserialize(deserializer)? else {
        return Ok(None);
    };
    let text = match repr {
        CostRepr::Text(text) => text,
        CostRepr::Number(number) => number.to_string(),
    };
    text.parse().map(Some).map_err(D::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    const HASH: &str = "QmExampleHash0001";

    #[rstest]
    fn missing_optional_fields_take_defaults() {
        let body = format!(r#"{{"contentHash":"{HASH}","username":"alice","holdMonths":2}}"#);
        let message = PinRequestMessage::decode(body.as_bytes()).expect("valid payload");

        assert_eq!(message.network, NetworkName::public());
        assert_eq!(message.kind, UploadKind::Pin);
        assert_eq!(message.cost, None);
        assert!(!message.encrypted);
    }

    #[rstest]
    #[case(r#""10.5""#, 10_500_000)]
    #[case("10.5", 10_500_000)]
    #[case("3", 3_000_000)]
    fn cost_accepts_string_or_number(#[case] cost: &str, #[case] micros: i64) {
        let body = format!(
            r#"{{"contentHash":"{HASH}","username":"alice","holdMonths":1,"cost":{cost}}}"#
        );
        let message = PinRequestMessage::decode(body.as_bytes()).expect("valid payload");
        assert_eq!(message.cost.map(Credits::as_micros), Some(micros));
    }

    #[rstest]
    #[case(b"not json".as_slice())]
    #[case(br#"{"username":"alice","holdMonths":1}"#.as_slice())]
    #[case(br#"{"contentHash":"bad hash!","username":"alice","holdMonths":1}"#.as_slice())]
    fn malformed_payloads_are_rejected(#[case] body: &[u8]) {
        assert!(matches!(
            PinRequestMessage::decode(body),
            Err(PinMessageError::Malformed(_))
        ));
    }

    #[rstest]
    fn zero_hold_is_rejected() {
        let body = format!(r#"{{"contentHash":"{HASH}","username":"alice","holdMonths":0}}"#);
        assert_eq!(
            PinRequestMessage::decode(body.as_bytes()),
            Err(PinMessageError::ZeroHold)
        );
    }

    #[rstest]
    fn claim_prefers_message_timestamp() {
        let created = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().expect("valid time");
        let received = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).single().expect("valid time");
        let body = format!(
            r#"{{"contentHash":"{HASH}","username":"alice","holdMonths":1,"createdAt":"2026-01-01T00:00:00Z"}}"#
        );
        let message = PinRequestMessage::decode(body.as_bytes()).expect("valid payload");

        assert_eq!(message.to_claim(received).requested_at, created);
    }
}
