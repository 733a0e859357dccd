use serde::Deserialize;

use super::errors::GatewayError;

/// Message fragments the gateway uses when a `parent_order_id` no longer resolves to
/// a saved card. Matching is case-insensitive. The gateway exposes no structured
/// code for this, so the list is the only place that knows its wording.
const INSTRUMENT_NOT_FOUND_MARKERS: &[&str] = &[
    "instrument not found",
    "parent order not found",
    "parent_order_id not found",
    "parent order id not found",
    "card token not found",
    "token not found",
    "no saved instrument",
    "invalid parent order",
];

const MAX_MESSAGE_CHARS: usize = 500;

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    message: Option<String>,
    error: Option<ErrorDetail>,
    status: Option<StatusDetail>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorDetail {
    Text(String),
    Object { message: Option<String> },
}

#[derive(Debug, Deserialize)]
struct StatusDetail {
    #[serde(alias = "statusDesc")]
    status_desc: Option<String>,
    #[serde(alias = "statusCode")]
    status_code: Option<String>,
}

/// Pulls the human-readable message out of a non-2xx body, falling back to the raw
/// text (truncated) when the body is not the usual `{ "message": ... }` envelope.
pub fn extract_message(body: &str) -> String {
    let parsed = serde_json::from_str::<ErrorEnvelope>(body).ok().and_then(|envelope| {
        envelope
            .message
            .or(match envelope.error {
                Some(ErrorDetail::Text(text)) => Some(text),
                Some(ErrorDetail::Object { message }) => message,
                None => None,
            })
            .or_else(|| {
                envelope
                    .status
                    .and_then(|status| status.status_desc.or(status.status_code))
            })
    });

    let message = match parsed {
        Some(message) if !message.trim().is_empty() => message,
        _ if body.trim().is_empty() => "<empty response body>".to_string(),
        _ => body.to_string(),
    };

    message.chars().take(MAX_MESSAGE_CHARS).collect()
}

pub fn mentions_missing_instrument(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    INSTRUMENT_NOT_FOUND_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

/// Maps a non-2xx gateway response onto the typed taxonomy. `parent_order_id` is set
/// only for stored-instrument charges; other operations can never yield
/// `InstrumentNotFound`.
pub fn classify_failure(
    context: &'static str,
    status: u16,
    message: String,
    parent_order_id: Option<&str>,
) -> GatewayError {
    if status == 401 {
        return GatewayError::Unauthorized { context, status };
    }

    match parent_order_id {
        Some(parent) if mentions_missing_instrument(&message) => GatewayError::InstrumentNotFound {
            parent_order_id: parent.to_string(),
            message,
        },
        _ => GatewayError::Gateway {
            context,
            status,
            message,
        },
    }
}
