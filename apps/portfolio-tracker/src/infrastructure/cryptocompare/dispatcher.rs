//! Message Dispatcher
//!
//! Classifies inbound streamer frames by their discriminator field
//! (`MESSAGE`, falling back to `TYPE`) and normalizes ticker frames into
//! domain ticker updates.
//!
//! Classification is pure (`classify`); `MessageDispatcher::dispatch` adds
//! the per-category logging and metrics and never fails: malformed and
//! unrecognized frames are logged and dropped so the stream keeps going.

use serde_json::Value;

use super::messages::{
    ERROR, ERROR_TYPE_CODES, ErrorFrame, HEARTBEAT, LOAD_COMPLETE, STREAMER_WELCOME,
    SUBSCRIBE_COMPLETE, TICKER_TYPE, TickerFrame,
};
use crate::domain::streaming::TickerUpdate;
use crate::infrastructure::metrics::{self, FrameKind};

/// Frame classification errors.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Frame is not valid JSON or a field has the wrong type.
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame is valid JSON but not an object.
    #[error("frame is not a JSON object")]
    NotAnObject,

    /// Neither `MESSAGE` nor `TYPE` is present.
    #[error("frame has no MESSAGE or TYPE discriminator")]
    MissingDiscriminator,
}

impl ProtocolError {
    const fn reason(&self) -> &'static str {
        match self {
            Self::Json(_) => "malformed",
            Self::NotAnObject => "not_object",
            Self::MissingDiscriminator => "no_discriminator",
        }
    }
}

/// Classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// `STREAMERWELCOME`: the session is ready for subscriptions.
    SessionWelcome,
    /// `SUBSCRIBECOMPLETE`.
    SubscribeComplete,
    /// `LOADCOMPLETE`.
    LoadComplete,
    /// Ticker frame with non-zero price and timestamp.
    Ticker(TickerUpdate),
    /// Ticker frame lacking price or timestamp; no update is emitted.
    IncompleteTicker,
    /// Provider error.
    ProviderError(ErrorFrame),
    /// Provider keep-alive, counted as a pong.
    Heartbeat,
    /// Any other discriminator.
    Unrecognized(String),
}

/// Extract the discriminator: `MESSAGE` if present, else `TYPE`.
fn discriminator(value: &Value) -> Option<String> {
    ["MESSAGE", "TYPE"].iter().find_map(|field| match value.get(field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Classify one text frame.
///
/// # Errors
///
/// Returns an error if the frame is not a JSON object with a discriminator,
/// or a ticker frame has fields of the wrong type.
pub fn classify(text: &str) -> Result<FeedEvent, ProtocolError> {
    let value: Value = serde_json::from_str(text)?;
    if !value.is_object() {
        return Err(ProtocolError::NotAnObject);
    }
    let kind = discriminator(&value).ok_or(ProtocolError::MissingDiscriminator)?;

    let event = match kind.as_str() {
        STREAMER_WELCOME => FeedEvent::SessionWelcome,
        SUBSCRIBE_COMPLETE => FeedEvent::SubscribeComplete,
        LOAD_COMPLETE => FeedEvent::LoadComplete,
        TICKER_TYPE => {
            let frame: TickerFrame = serde_json::from_value(value)?;
            frame
                .into_ticker()
                .map_or(FeedEvent::IncompleteTicker, |t| FeedEvent::Ticker(t.into()))
        }
        ERROR => FeedEvent::ProviderError(serde_json::from_value(value)?),
        HEARTBEAT => FeedEvent::Heartbeat,
        other => {
            let frame: ErrorFrame = serde_json::from_value(value)?;
            if frame
                .type_code
                .as_deref()
                .is_some_and(|code| ERROR_TYPE_CODES.contains(&code))
            {
                FeedEvent::ProviderError(frame)
            } else {
                FeedEvent::Unrecognized(other.to_string())
            }
        }
    };

    Ok(event)
}

/// Classifies frames and records what came in.
#[derive(Debug, Default, Clone)]
pub struct MessageDispatcher;

impl MessageDispatcher {
    /// Create a new dispatcher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Classify, log and count one text frame.
    ///
    /// Returns `None` for frames that could not be classified.
    pub fn dispatch(&self, text: &str) -> Option<FeedEvent> {
        let event = match classify(text) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, frame = %truncate(text), "Dropping frame");
                metrics::record_frame_dropped(e.reason());
                return None;
            }
        };

        match &event {
            FeedEvent::SessionWelcome | FeedEvent::SubscribeComplete | FeedEvent::LoadComplete => {
                tracing::trace!(frame = %text, "Session control");
                metrics::record_frame_received(FrameKind::Control);
            }
            FeedEvent::Ticker(update) => {
                tracing::trace!(
                    from = %update.from,
                    to = %update.to,
                    price = update.price,
                    last_update = ?update.ticker.last_update(),
                    market = ?update.ticker.last_market,
                    "Ticker update"
                );
                metrics::record_frame_received(FrameKind::Ticker);
            }
            FeedEvent::IncompleteTicker => {
                tracing::trace!(frame = %text, "Ticker frame without price or timestamp");
                metrics::record_frame_received(FrameKind::Ticker);
            }
            FeedEvent::ProviderError(err) => {
                tracing::error!(
                    message = ?err.message,
                    parameter = ?err.parameter,
                    info = ?err.info,
                    "Streamer error"
                );
                metrics::record_frame_received(FrameKind::Error);
            }
            FeedEvent::Heartbeat => {
                tracing::trace!("Streamer heartbeat");
                metrics::record_frame_received(FrameKind::Heartbeat);
            }
            FeedEvent::Unrecognized(kind) => {
                tracing::warn!(kind = %kind, frame = %truncate(text), "Unknown message");
                metrics::record_frame_received(FrameKind::Unknown);
            }
        }

        Some(event)
    }
}

fn truncate(text: &str) -> &str {
    const MAX: usize = 200;
    match text.char_indices().nth(MAX) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(r#"{"TYPE":"20","MESSAGE":"STREAMERWELCOME","SERVER_UPTIME_SECONDS":1}"#, FeedEvent::SessionWelcome ; "welcome")]
    #[test_case(r#"{"TYPE":"16","MESSAGE":"SUBSCRIBECOMPLETE","SUB":"5~CCCAGG~BTC~USD"}"#, FeedEvent::SubscribeComplete ; "subscribe complete")]
    #[test_case(r#"{"TYPE":"3","MESSAGE":"LOADCOMPLETE"}"#, FeedEvent::LoadComplete ; "load complete")]
    #[test_case(r#"{"TYPE":"999","MESSAGE":"HEARTBEAT","TIMEMS":1}"#, FeedEvent::Heartbeat ; "heartbeat")]
    #[test_case(r#"{"TYPE":"5","FROMSYMBOL":"BTC","TOSYMBOL":"USD","VOLUME24HOUR":3.2}"#, FeedEvent::IncompleteTicker ; "partial ticker")]
    #[test_case(r#"{"TYPE":"42","MESSAGE":"SOMETHING"}"#, FeedEvent::Unrecognized("SOMETHING".to_string()) ; "unknown message")]
    #[test_case(r#"{"TYPE":7}"#, FeedEvent::Unrecognized("7".to_string()) ; "numeric type fallback")]
    fn classify_control_frames(frame: &str, expected: FeedEvent) {
        assert_eq!(classify(frame).unwrap(), expected);
    }

    #[test]
    fn classify_ticker_frame() {
        let event = classify(
            r#"{"TYPE":"5","MARKET":"CCCAGG","FROMSYMBOL":"BTC","TOSYMBOL":"USD","FLAGS":1,"PRICE":50000,"LASTUPDATE":1700000000}"#,
        )
        .unwrap();

        let FeedEvent::Ticker(update) = event else {
            panic!("expected ticker event, got {event:?}");
        };
        assert_eq!(update.from, "BTC");
        assert_eq!(update.to, "USD");
        assert!((update.price - 50_000.0).abs() < f64::EPSILON);
        assert_eq!(update.ticker.timestamp, 1_700_000_000);
    }

    #[test_case(r#"{"TYPE":"5","FROMSYMBOL":"BTC","TOSYMBOL":"USD","PRICE":0,"LASTUPDATE":1}"# ; "zero price")]
    #[test_case(r#"{"TYPE":"5","FROMSYMBOL":"BTC","TOSYMBOL":"USD","PRICE":1,"LASTUPDATE":0}"# ; "zero timestamp")]
    #[test_case(r#"{"TYPE":"5","FROMSYMBOL":"BTC","TOSYMBOL":"USD","LASTUPDATE":1}"# ; "missing price")]
    fn ticker_without_price_or_timestamp_emits_nothing(frame: &str) {
        assert_eq!(classify(frame).unwrap(), FeedEvent::IncompleteTicker);
    }

    #[test]
    fn classify_provider_errors() {
        let event = classify(r#"{"MESSAGE":"ERROR","INFO":"bad"}"#).unwrap();
        assert!(matches!(event, FeedEvent::ProviderError(ref e) if e.info.as_deref() == Some("bad")));

        let event =
            classify(r#"{"TYPE":"500","MESSAGE":"INVALID_SUB","PARAMETER":"5~CCCAGG~X~Y"}"#).unwrap();
        assert!(matches!(event, FeedEvent::ProviderError(ref e) if e.parameter.as_deref() == Some("5~CCCAGG~X~Y")));
    }

    #[test_case("not json" ; "garbage")]
    #[test_case("[1,2,3]" ; "array")]
    #[test_case(r#"{"PRICE":1}"# ; "no discriminator")]
    #[test_case(r#"{"TYPE":"5","PRICE":"expensive"}"# ; "wrong field type")]
    fn classify_rejects_malformed(frame: &str) {
        assert!(classify(frame).is_err());
    }

    #[test]
    fn dispatch_drops_malformed_frames() {
        let dispatcher = MessageDispatcher::new();
        assert!(dispatcher.dispatch("{").is_none());
        assert_eq!(
            dispatcher.dispatch(r#"{"MESSAGE":"HEARTBEAT"}"#),
            Some(FeedEvent::Heartbeat)
        );
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let long = "µ".repeat(300);
        assert_eq!(truncate(&long).chars().count(), 200);
        assert_eq!(truncate("short"), "short");
    }
}
