//! Inbound frames delivered by the transport feed.
//!
//! A subscription receives an ordered sequence of [`Frame`]s: ordinary
//! [`Message`]s that consume demand, and protocol [`Status`] frames that do not
//! consume demand themselves but may carry authoritative pending counts.

mod headers;

use bytes::Bytes;
pub use headers::{HEADER_VERSION_LINE, Headers};

use crate::status::HEARTBEAT_CODE;

/// A stream message delivered in response to a pull.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    subject: String,
    headers: Option<Headers>,
    payload: Bytes,
    reply_to: Option<String>,
}

impl Message {
    /// Create a message with no headers and no reply subject.
    #[must_use]
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            headers: None,
            payload: payload.into(),
            reply_to: None,
        }
    }

    /// Attach headers.
    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = Some(headers);
        self
    }

    /// Attach the reply subject used for acknowledgements.
    #[must_use]
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    #[must_use]
    pub fn subject(&self) -> &str { &self.subject }

    #[must_use]
    pub fn headers(&self) -> Option<&Headers> { self.headers.as_ref() }

    #[must_use]
    pub fn payload(&self) -> &Bytes { &self.payload }

    #[must_use]
    pub fn reply_to(&self) -> Option<&str> { self.reply_to.as_deref() }

    /// Client-side estimate of the bytes this message counted against a
    /// request's byte budget.
    ///
    /// The broker charges subject, serialized headers, payload and reply
    /// subject. Drift from the broker's own count is corrected by the pending
    /// headers on terminal status frames.
    #[must_use]
    pub fn estimated_size(&self) -> usize {
        self.subject.len()
            + self.headers.as_ref().map_or(0, Headers::wire_len)
            + self.payload.len()
            + self.reply_to.as_ref().map_or(0, String::len)
    }
}

/// A protocol status frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Status {
    code: u16,
    text: String,
    headers: Option<Headers>,
}

impl Status {
    #[must_use]
    pub fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
            headers: None,
        }
    }

    /// Attach headers, typically the pending reconciliation counts.
    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = Some(headers);
        self
    }

    #[must_use]
    pub fn code(&self) -> u16 { self.code }

    #[must_use]
    pub fn text(&self) -> &str { &self.text }

    #[must_use]
    pub fn headers(&self) -> Option<&Headers> { self.headers.as_ref() }

    /// Heartbeat frames only prove the feed is alive.
    #[must_use]
    pub fn is_heartbeat(&self) -> bool { self.code == HEARTBEAT_CODE }
}

/// One unit delivered by the transport feed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Message(Message),
    Status(Status),
}

impl From<Message> for Frame {
    fn from(message: Message) -> Self { Frame::Message(message) }
}

impl From<Status> for Frame {
    fn from(status: Status) -> Self { Frame::Status(status) }
}
