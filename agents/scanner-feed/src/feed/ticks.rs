//! Market Ticks
//!
//! Typed view of the `update` payload and the listener that feeds accepted
//! ticks into a shared window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::connection::protocol::events;
use crate::connection::transport::Transport;
use crate::connection::websocket::ConnectionController;
use crate::error::ParseError;
use crate::feed::listeners::ListenerId;
use crate::feed::window::SharedWindow;

/// Normalized quote or trade for one ticker. Any price or size may be null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketTick {
    pub ticker: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub exchange: String,
    /// `T` trade, `Q` quote, `B` break
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub tick_type: String,
    /// Milliseconds since the epoch, 0 when the upstream omitted it
    #[serde(default, deserialize_with = "epoch_millis")]
    pub timestamp: i64,
    pub ask_price: Option<f64>,
    pub ask_size: Option<f64>,
    pub bid_price: Option<f64>,
    pub bid_size: Option<f64>,
    pub last_price: Option<f64>,
    pub last_size: Option<f64>,
}

impl MarketTick {
    /// Parse an `update` payload. Only objects with a non-empty ticker are ticks.
    pub fn from_payload(payload: &Value) -> Result<Self, ParseError> {
        if !payload.is_object() {
            return Err(ParseError::InvalidTick("payload is not an object".to_string()));
        }

        let tick: MarketTick = serde_json::from_value(payload.clone())
            .map_err(|e| ParseError::InvalidTick(e.to_string()))?;

        if tick.ticker.trim().is_empty() {
            return Err(ParseError::InvalidTick("empty ticker".to_string()));
        }

        Ok(tick)
    }

    pub fn is_trade(&self) -> bool {
        self.tick_type == "T"
    }

    pub fn is_quote(&self) -> bool {
        self.tick_type == "Q"
    }

    pub fn time(&self) -> Option<DateTime<Utc>> {
        if self.timestamp == 0 {
            return None;
        }
        DateTime::from_timestamp_millis(self.timestamp)
    }

    /// Bid/ask spread when both sides are quoted
    pub fn spread(&self) -> Option<f64> {
        Some(self.ask_price? - self.bid_price?)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Integer or float milliseconds; fractions are truncated, null is 0
fn epoch_millis<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(number) = Option::<serde_json::Number>::deserialize(deserializer)? else {
        return Ok(0);
    };

    if let Some(millis) = number.as_i64() {
        return Ok(millis);
    }

    match number.as_f64() {
        Some(millis) if millis.is_finite() && millis.abs() < i64::MAX as f64 => Ok(millis as i64),
        _ => Err(serde::de::Error::custom(format!("timestamp out of range: {}", number))),
    }
}

/// Register the `update` listener that appends every valid tick to `window`.
/// Payloads that are not ticks are skipped.
pub fn record_ticks<T: Transport>(
    controller: &mut ConnectionController<T>,
    window: SharedWindow<MarketTick>,
) -> ListenerId {
    controller.add_listener(events::UPDATE, move |payload| {
        match MarketTick::from_payload(payload) {
            Ok(tick) => window.append(tick),
            Err(e) => debug!(error = %e, "Skipping update payload"),
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::transport::{ControllerEvent, EventSink, Socket, TransportEvent};
    use crate::error::TransportError;
    use serde_json::json;
    use std::num::NonZeroUsize;

    /// Sockets that accept every frame and never report anything
    struct NullTransport;

    struct NullSocket;

    impl Transport for NullTransport {
        fn open(&mut self, _url: &str, _events: EventSink) -> Box<dyn Socket> {
            Box::new(NullSocket)
        }
    }

    impl Socket for NullSocket {
        fn send_text(&mut self, _text: String) -> Result<(), TransportError> {
            Ok(())
        }

        fn close(&mut self) {}
    }

    fn btc_quote() -> Value {
        json!({
            "ticker": "btcusd",
            "exchange": "crypto",
            "type": "Q",
            "timestamp": 1_700_000_000_000_i64,
            "ask_price": 37012.5,
            "ask_size": 0.4,
            "bid_price": 37010.0,
            "bid_size": 1.2,
            "last_price": null,
            "last_size": null
        })
    }

    #[test]
    fn test_parse_quote_with_null_fields() {
        let tick = MarketTick::from_payload(&btc_quote()).unwrap();

        assert_eq!(tick.ticker, "btcusd");
        assert_eq!(tick.exchange, "crypto");
        assert!(tick.is_quote());
        assert!(!tick.is_trade());
        assert_eq!(tick.last_price, None);
        assert_eq!(tick.spread(), Some(2.5));
        assert_eq!(
            tick.time().map(|t| t.timestamp()),
            Some(1_700_000_000)
        );
    }

    #[test]
    fn test_missing_optional_fields_default() {
        let tick = MarketTick::from_payload(&json!({"ticker": "eurusd"})).unwrap();

        assert_eq!(tick.tick_type, "");
        assert_eq!(tick.time(), None);
        assert_eq!(tick.spread(), None);
    }

    #[test]
    fn test_null_metadata_fields_are_tolerated() {
        let tick = MarketTick::from_payload(&json!({
            "ticker": "btcusd",
            "exchange": null,
            "type": null,
            "timestamp": null,
            "last_price": 37011.0
        }))
        .unwrap();

        assert_eq!(tick.exchange, "");
        assert_eq!(tick.tick_type, "");
        assert_eq!(tick.timestamp, 0);
        assert_eq!(tick.last_price, Some(37011.0));
    }

    #[test]
    fn test_float_timestamp_is_accepted() {
        let tick = MarketTick::from_payload(&json!({
            "ticker": "btcusd",
            "timestamp": 1_700_000_000_000.0
        }))
        .unwrap();

        assert_eq!(tick.timestamp, 1_700_000_000_000);
        assert!(MarketTick::from_payload(&json!({"ticker": "btcusd", "timestamp": "soon"})).is_err());
    }

    #[tokio::test]
    async fn test_record_ticks_keeps_ticks_with_null_fields() {
        let mut controller = ConnectionController::new("ws://127.0.0.1:8000/ws", NullTransport).unwrap();
        let window = SharedWindow::new(NonZeroUsize::new(5).unwrap());
        record_ticks(&mut controller, window.clone());

        controller.connect();
        let socket = controller.socket_id().unwrap();
        for event in [
            TransportEvent::Opened,
            TransportEvent::Frame(
                json!({
                    "event": "update",
                    "payload": {"ticker": "ethusd", "exchange": null, "type": null, "timestamp": null}
                })
                .to_string(),
            ),
            TransportEvent::Frame(json!({"event": "update", "payload": {"exchange": "crypto"}}).to_string()),
        ] {
            controller.handle_event(ControllerEvent::Socket { socket, event });
        }

        let ticks = window.snapshot();
        assert_eq!(ticks.len(), 1);
        assert_eq!(ticks[0].ticker, "ethusd");
        assert_eq!(controller.diagnostics().listener_failures(), 0);
    }

    #[test]
    fn test_rejects_payloads_without_ticker() {
        for payload in [
            json!({}),
            json!({"ticker": ""}),
            json!({"ticker": null}),
            json!("btcusd"),
            json!([1, 2]),
        ] {
            assert!(
                matches!(MarketTick::from_payload(&payload), Err(ParseError::InvalidTick(_))),
                "accepted {}",
                payload
            );
        }
    }

    #[test]
    fn test_serializes_type_field_name() {
        let tick = MarketTick::from_payload(&btc_quote()).unwrap();
        let value = serde_json::to_value(&tick).unwrap();

        assert_eq!(value["type"], "Q");
        assert!(value.get("tick_type").is_none());
    }
}
