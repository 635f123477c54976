//! Message Protocol
//!
//! Defines the `{event, payload}` envelope exchanged with the feed server and
//! the codec that turns frames into envelopes and back.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ClientError, ParseError, Result};

/// Event names pushed by the feed server
pub mod events {
    /// Market tick matching the client's subscription
    pub const UPDATE: &str = "update";
    /// Informational status, sent once after the socket is accepted
    pub const STATUS: &str = "status";
    /// Server-side error, payload is a message
    pub const ERROR: &str = "error";
    /// Subscription acknowledgement, echoes the request
    pub const SUBSCRIBE: &str = "subscribe";
    /// Subscription update acknowledgement, echoes the request
    pub const UPDATE_SUBSCRIPTION: &str = "update_subscription";
    /// Acknowledgement of an unsubscribe request
    pub const UNSUBSCRIBED: &str = "unsubscribed";
}

/// The unit exchanged over the transport. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    event: String,
    payload: Value,
}

impl Envelope {
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn into_parts(self) -> (String, Value) {
        (self.event, self.payload)
    }
}

/// Wire shape used while decoding; both fields are checked before an
/// `Envelope` is built.
#[derive(Deserialize)]
struct WireEnvelope {
    event: String,
    #[serde(default)]
    payload: Option<Value>,
}

/// Encodes outbound envelopes and decodes inbound frames
pub struct MessageCodec;

impl MessageCodec {
    /// Encode an event and payload into a single text frame
    pub fn encode<P: Serialize + ?Sized>(event: &str, payload: &P) -> Result<String> {
        let payload = serde_json::to_value(payload).map_err(|e| ClientError::Encode {
            event: event.to_string(),
            reason: e.to_string(),
        })?;

        Self::encode_envelope(&Envelope::new(event, payload))
    }

    /// Encode an already built envelope
    pub fn encode_envelope(envelope: &Envelope) -> Result<String> {
        serde_json::to_string(envelope).map_err(|e| ClientError::Encode {
            event: envelope.event.clone(),
            reason: e.to_string(),
        })
    }

    /// Decode a text frame into an envelope.
    ///
    /// Rejects frames that are not a JSON object with a string `event`, an
    /// empty event name, and a missing or `null` payload.
    pub fn decode(frame: &str) -> std::result::Result<Envelope, ParseError> {
        let value: Value =
            serde_json::from_str(frame).map_err(|e| ParseError::Malformed(e.to_string()))?;
        if !value.is_object() {
            return Err(ParseError::Malformed("expected a JSON object".to_string()));
        }

        let wire: WireEnvelope =
            serde_json::from_value(value).map_err(|e| ParseError::Malformed(e.to_string()))?;

        if wire.event.is_empty() {
            return Err(ParseError::EmptyEvent);
        }

        match wire.payload {
            Some(payload) => Ok(Envelope::new(wire.event, payload)),
            None => Err(ParseError::MissingPayload(wire.event)),
        }
    }
}

/// Exchanges the feed server can stream from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Exchange {
    Company,
    Crypto,
    Forex,
}

impl std::fmt::Display for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Exchange::Company => write!(f, "company"),
            Exchange::Crypto => write!(f, "crypto"),
            Exchange::Forex => write!(f, "forex"),
        }
    }
}

/// Requests sent from the client to the feed server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum ClientRequest {
    /// Start streaming the given tickers
    Subscribe(SubscribeRequest),

    /// Replace the current subscription
    UpdateSubscription(SubscribeRequest),

    /// Drop the current subscription
    Unsubscribe(EmptyPayload),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    pub exchange: Exchange,
    pub filters: SubscriptionFilters,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SubscriptionFilters {
    pub ticker: Vec<String>,
}

/// Serializes as `{}`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EmptyPayload {}

impl ClientRequest {
    /// Create a subscribe request
    pub fn subscribe<I, S>(exchange: Exchange, tickers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ClientRequest::Subscribe(SubscribeRequest {
            exchange,
            filters: SubscriptionFilters {
                ticker: tickers.into_iter().map(Into::into).collect(),
            },
        })
    }

    /// Create an unsubscribe request
    pub fn unsubscribe() -> Self {
        ClientRequest::Unsubscribe(EmptyPayload::default())
    }

    /// Event name this request is sent under
    pub fn event(&self) -> &'static str {
        match self {
            ClientRequest::Subscribe(_) => events::SUBSCRIBE,
            ClientRequest::UpdateSubscription(_) => events::UPDATE_SUBSCRIPTION,
            ClientRequest::Unsubscribe(_) => "unsubscribe",
        }
    }

    /// Convert into a generic envelope
    pub fn into_envelope(self) -> Result<Envelope> {
        let event = self.event();
        let payload = match &self {
            ClientRequest::Subscribe(request) | ClientRequest::UpdateSubscription(request) => {
                serde_json::to_value(request)
            }
            ClientRequest::Unsubscribe(empty) => serde_json::to_value(empty),
        }
        .map_err(|e| ClientError::Encode {
            event: event.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Envelope::new(event, payload))
    }

    /// Serialize the request to a text frame
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_subscribe_frame() {
        let frame = MessageCodec::encode(
            "subscribe",
            &json!({"exchange": "crypto", "filters": {"ticker": ["BTCUSD"]}}),
        )
        .unwrap();

        assert_eq!(
            frame,
            r#"{"event":"subscribe","payload":{"exchange":"crypto","filters":{"ticker":["BTCUSD"]}}}"#
        );
    }

    #[test]
    fn test_decode_envelope() {
        let envelope = MessageCodec::decode(r#"{"event":"message","payload":{"text":"hi"}}"#).unwrap();
        assert_eq!(envelope.event(), "message");
        assert_eq!(envelope.payload(), &json!({"text": "hi"}));
    }

    #[test]
    fn test_round_trip_keeps_event_and_payload() {
        let payload = json!({
            "ticker": "btcusd",
            "ask_price": 64000.5,
            "last_price": null,
            "nested": [1, "two", {"three": true}]
        });

        let envelope = MessageCodec::decode(&MessageCodec::encode("update", &payload).unwrap()).unwrap();
        assert_eq!(envelope.event(), "update");
        assert_eq!(envelope.payload(), &payload);
    }

    #[test]
    fn test_decode_rejects_malformed_frames() {
        assert!(matches!(MessageCodec::decode("not-json"), Err(ParseError::Malformed(_))));
        assert!(matches!(
            MessageCodec::decode(r#"["update", {}]"#),
            Err(ParseError::Malformed(_))
        ));
        assert!(matches!(
            MessageCodec::decode(r#"{"event": 7, "payload": {}}"#),
            Err(ParseError::Malformed(_))
        ));
        assert!(matches!(
            MessageCodec::decode(r#"{"payload": {}}"#),
            Err(ParseError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_rejects_missing_payload() {
        assert_eq!(
            MessageCodec::decode(r#"{"event":"update"}"#),
            Err(ParseError::MissingPayload("update".to_string()))
        );
        assert_eq!(
            MessageCodec::decode(r#"{"event":"update","payload":null}"#),
            Err(ParseError::MissingPayload("update".to_string()))
        );
        assert_eq!(
            MessageCodec::decode(r#"{"event":"","payload":{}}"#),
            Err(ParseError::EmptyEvent)
        );
    }

    #[test]
    fn test_decode_accepts_scalar_status_payload() {
        let envelope =
            MessageCodec::decode(r#"{"event":"status","payload":"Connected to Market Screener WebSocket"}"#)
                .unwrap();
        assert_eq!(envelope.event(), events::STATUS);
        assert!(envelope.payload().is_string());
    }

    #[test]
    fn test_client_request_serialization() {
        let json = ClientRequest::subscribe(Exchange::Crypto, ["BTCUSD"]).to_json().unwrap();
        assert_eq!(
            json,
            r#"{"event":"subscribe","payload":{"exchange":"crypto","filters":{"ticker":["BTCUSD"]}}}"#
        );

        let json = ClientRequest::unsubscribe().to_json().unwrap();
        assert_eq!(json, r#"{"event":"unsubscribe","payload":{}}"#);
    }

    #[test]
    fn test_client_request_into_envelope() {
        let envelope = ClientRequest::UpdateSubscription(SubscribeRequest {
            exchange: Exchange::Forex,
            filters: SubscriptionFilters {
                ticker: vec!["EURUSD".to_string()],
            },
        })
        .into_envelope()
        .unwrap();

        assert_eq!(envelope.event(), "update_subscription");
        assert_eq!(envelope.payload()["exchange"], "forex");
    }

    #[test]
    fn test_request_event_matches_wire_tag() {
        for request in [
            ClientRequest::subscribe(Exchange::Company, ["AAPL"]),
            ClientRequest::UpdateSubscription(SubscribeRequest {
                exchange: Exchange::Crypto,
                filters: SubscriptionFilters::default(),
            }),
            ClientRequest::unsubscribe(),
        ] {
            let tagged: Value = serde_json::from_str(&request.to_json().unwrap()).unwrap();
            let event = request.event();
            let envelope = request.into_envelope().unwrap();

            assert_eq!(tagged["event"], event);
            assert_eq!(envelope.event(), event);
            assert_eq!(&tagged["payload"], envelope.payload());
        }
    }
}
