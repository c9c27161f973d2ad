//! Interpretation of broker status frames.
//!
//! Every non-heartbeat [`Status`] maps to one [`StatusDisposition`]. A
//! terminus quietly ends the current batch, a warning goes to the listener
//! without interrupting consumption, and an error is fatal for the pull.

use crate::frame::Status;

/// Heartbeat and flow-control frames.
pub const HEARTBEAT_CODE: u16 = 100;
/// Malformed pull request.
pub const BAD_REQUEST_CODE: u16 = 400;
/// No messages were available for a no-wait pull.
pub const NOT_FOUND_CODE: u16 = 404;
/// The pull request expired.
pub const REQUEST_TIMEOUT_CODE: u16 = 408;
/// The broker refused or ended the pull for a consumer-state reason.
pub const CONFLICT_CODE: u16 = 409;

pub const IDLE_HEARTBEAT_TEXT: &str = "Idle Heartbeat";
pub const NO_MESSAGES_TEXT: &str = "No Messages";
pub const REQUEST_TIMEOUT_TEXT: &str = "Request Timeout";
pub const BAD_REQUEST_TEXT: &str = "Bad Request";
pub const BATCH_COMPLETED_TEXT: &str = "Batch Completed";
pub const MESSAGE_SIZE_EXCEEDS_MAX_BYTES_TEXT: &str = "Message Size Exceeds MaxBytes";
pub const CONSUMER_DELETED_TEXT: &str = "Consumer Deleted";
pub const CONSUMER_IS_PUSH_BASED_TEXT: &str = "Consumer is push based";
pub const EXCEEDED_MAX_WAITING_TEXT: &str = "Exceeded MaxWaiting";
pub const EXCEEDED_MAX_REQUEST_BATCH_TEXT: &str = "Exceeded MaxRequestBatch";
pub const EXCEEDED_MAX_REQUEST_EXPIRES_TEXT: &str = "Exceeded MaxRequestExpires";
pub const EXCEEDED_MAX_REQUEST_MAX_BYTES_TEXT: &str = "Exceeded MaxRequestMaxBytes";

/// Prefix shared by every advisory conflict.
const EXCEEDED_MAX_PREFIX: &str = "Exceeded Max";

/// Header carrying the messages left unfulfilled when a request ended.
pub const PENDING_MESSAGES_HEADER: &str = "Nats-Pending-Messages";
/// Header carrying the bytes left unfulfilled when a request ended.
pub const PENDING_BYTES_HEADER: &str = "Nats-Pending-Bytes";

/// Outcome of interpreting a status frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusDisposition {
    /// The batch ended normally; a new pull may be issued.
    Terminus,
    /// Advisory conflict delivered to the warning callback.
    Warning,
    /// Fatal for the pull.
    Error,
}

impl StatusDisposition {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Terminus => "terminus",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

/// Classify a non-heartbeat status frame.
///
/// # Examples
///
/// ```
/// use pullwire::{
///     frame::Status,
///     status::{StatusDisposition, interpret},
/// };
///
/// assert_eq!(interpret(&Status::new(404, "No Messages")), StatusDisposition::Terminus);
/// assert_eq!(
///     interpret(&Status::new(409, "Exceeded MaxWaiting")),
///     StatusDisposition::Warning
/// );
/// assert_eq!(interpret(&Status::new(409, "Consumer Deleted")), StatusDisposition::Error);
/// ```
#[must_use]
pub fn interpret(status: &Status) -> StatusDisposition {
    match status.code() {
        NOT_FOUND_CODE | REQUEST_TIMEOUT_CODE => StatusDisposition::Terminus,
        CONFLICT_CODE => {
            let text = status.text();
            if text.starts_with(EXCEEDED_MAX_PREFIX) {
                StatusDisposition::Warning
            } else if text == BATCH_COMPLETED_TEXT || text == MESSAGE_SIZE_EXCEEDS_MAX_BYTES_TEXT {
                StatusDisposition::Terminus
            } else {
                StatusDisposition::Error
            }
        }
        _ => StatusDisposition::Error,
    }
}

/// True when a pull ended because the first message it would deliver is
/// larger than the request's byte budget.
#[must_use]
pub fn is_message_too_large(status: &Status) -> bool {
    status.code() == CONFLICT_CODE && status.text() == MESSAGE_SIZE_EXCEEDS_MAX_BYTES_TEXT
}

/// Authoritative pending counts carried by a status frame.
///
/// Returns `None` when the headers are absent or either value fails to parse;
/// the client's own estimate then stands.
#[must_use]
pub fn pending_counts(status: &Status) -> Option<(u64, u64)> {
    let headers = status.headers()?;
    let messages = headers.get_first(PENDING_MESSAGES_HEADER)?.trim().parse().ok()?;
    let bytes = headers.get_first(PENDING_BYTES_HEADER)?.trim().parse().ok()?;
    Some((messages, bytes))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::frame::Headers;

    #[rstest]
    #[case(NOT_FOUND_CODE, NO_MESSAGES_TEXT, StatusDisposition::Terminus)]
    #[case(REQUEST_TIMEOUT_CODE, REQUEST_TIMEOUT_TEXT, StatusDisposition::Terminus)]
    #[case(CONFLICT_CODE, BATCH_COMPLETED_TEXT, StatusDisposition::Terminus)]
    #[case(CONFLICT_CODE, MESSAGE_SIZE_EXCEEDS_MAX_BYTES_TEXT, StatusDisposition::Terminus)]
    #[case(CONFLICT_CODE, EXCEEDED_MAX_WAITING_TEXT, StatusDisposition::Warning)]
    #[case(CONFLICT_CODE, EXCEEDED_MAX_REQUEST_BATCH_TEXT, StatusDisposition::Warning)]
    #[case(CONFLICT_CODE, EXCEEDED_MAX_REQUEST_EXPIRES_TEXT, StatusDisposition::Warning)]
    #[case(CONFLICT_CODE, EXCEEDED_MAX_REQUEST_MAX_BYTES_TEXT, StatusDisposition::Warning)]
    #[case(CONFLICT_CODE, CONSUMER_DELETED_TEXT, StatusDisposition::Error)]
    #[case(CONFLICT_CODE, CONSUMER_IS_PUSH_BASED_TEXT, StatusDisposition::Error)]
    #[case(CONFLICT_CODE, "Something New", StatusDisposition::Error)]
    #[case(BAD_REQUEST_CODE, BAD_REQUEST_TEXT, StatusDisposition::Error)]
    #[case(503, "No Responders", StatusDisposition::Error)]
    fn classifies_status_vocabulary(
        #[case] code: u16,
        #[case] text: &str,
        #[case] expected: StatusDisposition,
    ) {
        assert_eq!(interpret(&Status::new(code, text)), expected);
    }

    #[rstest]
    #[case(CONFLICT_CODE, MESSAGE_SIZE_EXCEEDS_MAX_BYTES_TEXT, true)]
    #[case(CONFLICT_CODE, BATCH_COMPLETED_TEXT, false)]
    #[case(REQUEST_TIMEOUT_CODE, MESSAGE_SIZE_EXCEEDS_MAX_BYTES_TEXT, false)]
    fn recognises_oversized_first_message(#[case] code: u16, #[case] text: &str, #[case] expected: bool) {
        assert_eq!(is_message_too_large(&Status::new(code, text)), expected);
    }

    #[test]
    fn parses_pending_headers() {
        let status = Status::new(REQUEST_TIMEOUT_CODE, REQUEST_TIMEOUT_TEXT).with_headers(
            Headers::new()
                .with(PENDING_MESSAGES_HEADER, "7")
                .with(PENDING_BYTES_HEADER, "512"),
        );
        assert_eq!(pending_counts(&status), Some((7, 512)));
    }

    #[rstest]
    #[case::missing_bytes(Headers::new().with(PENDING_MESSAGES_HEADER, "7"))]
    #[case::malformed_messages(
        Headers::new()
            .with(PENDING_MESSAGES_HEADER, "seven")
            .with(PENDING_BYTES_HEADER, "1")
    )]
    #[case::negative(
        Headers::new()
            .with(PENDING_MESSAGES_HEADER, "-1")
            .with(PENDING_BYTES_HEADER, "1")
    )]
    fn ignores_malformed_pending_headers(#[case] headers: Headers) {
        let status = Status::new(REQUEST_TIMEOUT_CODE, REQUEST_TIMEOUT_TEXT).with_headers(headers);
        assert_eq!(pending_counts(&status), None);
    }
}
