//! Requests and responses exchanged over an MSRP session.
//!
//! A [`Request`] is a `SEND` carrying an optional plain text message, wrapped in a CPIM envelope
//! on the wire. A [`Response`] acknowledges a request by echoing its transaction id. Both keep the
//! exact bytes they were encoded to or decoded from, available through `body()`.

use crate::{
    address::{AddressKey, RoutingAddress},
    codec::{self, Content, CpimEnvelope},
    id,
};

/// Status code sent when acknowledging a request.
pub const STATUS_OK: u16 = 200;

/// An MSRP `SEND` request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    transaction_id: String,
    to_path: String,
    from_path: String,
    sender: String,
    recipient: String,
    message_id: Option<String>,
    text: String,
    is_cpim: bool,
    body: String,
}

impl Request {
    /// Creates a request for the conversation between `sender` and `recipient`.
    ///
    /// An empty `text` produces a bodiless `SEND`, which peers use to bind the session to the
    /// connection. Otherwise the text is wrapped in a CPIM envelope with a fresh timestamp and
    /// disposition notification id.
    ///
    /// ```
    /// use msrp::Request;
    ///
    /// let req = Request::new(
    ///     "msrp://localhost:9670/pxd512029144298;tcp",
    ///     "msrp://localhost:8881/71f1vpJTi3rhgHUHj;tcp",
    ///     "+8210",
    ///     "+8211",
    ///     "Hello!",
    /// );
    /// assert!(req.body().ends_with(&format!("-------{}$\r\n", req.transaction_id())));
    /// ```
    pub fn new(
        to_path: impl Into<String>,
        from_path: impl Into<String>,
        sender: impl Into<String>,
        recipient: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        let transaction_id = id::transaction_id();
        let to_path = to_path.into();
        let from_path = from_path.into();
        let text = text.into();

        let (message_id, body) = if text.is_empty() {
            let body = codec::encode_request(&transaction_id, &to_path, &from_path, None);
            (None, body)
        } else {
            let message_id = id::message_id();
            let cpim = CpimEnvelope::new(&text).encode();
            let body = codec::encode_request(
                &transaction_id,
                &to_path,
                &from_path,
                Some(Content {
                    message_id: &message_id,
                    cpim: &cpim,
                }),
            );
            (Some(message_id), body)
        };

        Request {
            transaction_id,
            to_path,
            from_path,
            sender: sender.into(),
            recipient: recipient.into(),
            message_id,
            is_cpim: !text.is_empty(),
            text,
            body,
        }
    }

    pub(crate) fn decoded(
        transaction_id: String,
        to_path: String,
        from_path: String,
        message_id: Option<String>,
        text: String,
        is_cpim: bool,
        body: String,
    ) -> Self {
        Request {
            transaction_id,
            to_path,
            from_path,
            sender: String::new(),
            recipient: String::new(),
            message_id,
            text,
            is_cpim,
            body,
        }
    }

    /// The transaction id framing this request.
    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    /// The To-Path header.
    pub fn to_path(&self) -> &str {
        &self.to_path
    }

    /// The From-Path header.
    pub fn from_path(&self) -> &str {
        &self.from_path
    }

    /// The sending party of the conversation.
    ///
    /// Empty for decoded requests, since the wire format does not carry it.
    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// The receiving party of the conversation.
    ///
    /// Empty for decoded requests, since the wire format does not carry it.
    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    /// The Message-ID header, present when the request carries content.
    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    /// The plain text message, empty for a bodiless `SEND`.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Returns `true` if the text travels inside a CPIM envelope.
    pub fn is_cpim(&self) -> bool {
        self.is_cpim
    }

    /// The request exactly as it appears on the wire.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// The routing address this request travels along.
    pub fn routing_address(&self) -> RoutingAddress {
        RoutingAddress::new(&self.to_path, &self.from_path)
    }

    /// The conversation this request belongs to.
    pub fn address_key(&self) -> AddressKey {
        AddressKey::new(&self.sender, &self.recipient)
    }
}

/// An MSRP response to a request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    transaction_id: String,
    to_path: String,
    from_path: String,
    status: u16,
    reason: String,
    body: String,
}

impl Response {
    /// Creates a `200 OK` response for the given transaction.
    pub fn ok(
        to_path: impl Into<String>,
        from_path: impl Into<String>,
        transaction_id: impl Into<String>,
    ) -> Self {
        let transaction_id = transaction_id.into();
        let to_path = to_path.into();
        let from_path = from_path.into();
        let reason = "OK".to_owned();
        let body =
            codec::encode_response(&transaction_id, &to_path, &from_path, STATUS_OK, &reason);

        Response {
            transaction_id,
            to_path,
            from_path,
            status: STATUS_OK,
            reason,
            body,
        }
    }

    /// Creates the `200 OK` acknowledging `request`, routed back along the reverse of the path
    /// the request travelled.
    pub fn acknowledge(request: &Request) -> Self {
        Response::ok(
            request.from_path(),
            request.to_path(),
            request.transaction_id(),
        )
    }

    pub(crate) fn decoded(
        transaction_id: String,
        to_path: String,
        from_path: String,
        status: u16,
        reason: String,
        body: String,
    ) -> Self {
        Response {
            transaction_id,
            to_path,
            from_path,
            status,
            reason,
            body,
        }
    }

    /// The transaction id of the acknowledged request.
    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    /// The To-Path header.
    pub fn to_path(&self) -> &str {
        &self.to_path
    }

    /// The From-Path header.
    pub fn from_path(&self) -> &str {
        &self.from_path
    }

    /// The numeric status code.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// The reason phrase following the status code, possibly empty.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Returns `true` for a 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The response exactly as it appears on the wire.
    pub fn body(&self) -> &str {
        &self.body
    }
}

/// A unit exchanged over a connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    /// A `SEND` request.
    Request(Request),
    /// A response to a request.
    Response(Response),
}

impl Message {
    /// The transaction id framing the message.
    pub fn transaction_id(&self) -> &str {
        match self {
            Message::Request(req) => req.transaction_id(),
            Message::Response(res) => res.transaction_id(),
        }
    }

    /// The message exactly as it appears on the wire.
    pub fn body(&self) -> &str {
        match self {
            Message::Request(req) => req.body(),
            Message::Response(res) => res.body(),
        }
    }

    /// Returns the request, if this is one.
    pub fn as_request(&self) -> Option<&Request> {
        match self {
            Message::Request(req) => Some(req),
            Message::Response(_) => None,
        }
    }

    /// Returns the response, if this is one.
    pub fn as_response(&self) -> Option<&Response> {
        match self {
            Message::Request(_) => None,
            Message::Response(res) => Some(res),
        }
    }
}

impl From<Request> for Message {
    fn from(req: Request) -> Self {
        Message::Request(req)
    }
}

impl From<Response> for Message {
    fn from(res: Response) -> Self {
        Message::Response(res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TO_PATH: &str = "msrp://localhost:9670/pxd512029144298;tcp";
    const FROM_PATH: &str = "msrp://localhost:8881/71f1vpJTi3rhgHUHj;tcp";

    fn byte_range_total(body: &str) -> usize {
        let line = body
            .lines()
            .find_map(|line| line.strip_prefix("Byte-Range: 1-"))
            .expect("Byte-Range header");
        let (end, total) = line.split_once('/').unwrap();
        assert_eq!(end, total);
        total.parse().unwrap()
    }

    #[test]
    fn empty_request_has_no_content_headers() {
        let req = Request::new(TO_PATH, FROM_PATH, "+8210", "+8211", "");
        let tid = req.transaction_id();

        assert_eq!(
            req.body(),
            format!(
                "MSRP {tid} SEND\r\nTo-Path: {TO_PATH}\r\nFrom-Path: {FROM_PATH}\r\n-------{tid}$\r\n"
            )
        );
        assert!(!req.body().contains("Message-ID"));
        assert!(!req.body().contains("Content-Type"));
        assert!(!req.is_cpim());
        assert_eq!(req.message_id(), None);
    }

    #[test]
    fn text_request_wraps_text_in_cpim() {
        let req = Request::new(TO_PATH, FROM_PATH, "+8210", "+8211", "Hello!");
        let body = req.body();

        assert!(req.is_cpim());
        assert!(body.starts_with(&format!("MSRP {} SEND\r\n", req.transaction_id())));
        assert!(body.contains("Content-Type: message/cpim\r\n\r\n"));
        assert!(body.contains(&format!("Message-ID: {}\r\n", req.message_id().unwrap())));
        assert!(body.contains("Content-Length: 6\r\n\r\nHello!\r\n"));
        assert!(body.ends_with(&format!("Hello!\r\n-------{}$\r\n", req.transaction_id())));
    }

    #[test]
    fn byte_range_counts_the_cpim_envelope() {
        let req = Request::new(TO_PATH, FROM_PATH, "+8210", "+8211", "Hello!");
        let body = req.body();

        let envelope_start = body.find("Content-Type: message/cpim\r\n\r\n").unwrap()
            + "Content-Type: message/cpim\r\n\r\n".len();
        let envelope_end = body.rfind("-------").unwrap();
        let envelope = &body[envelope_start..envelope_end];

        assert!(envelope.starts_with("From: <sip:anonymous@anonymous.invalid>\r\n"));
        assert_eq!(byte_range_total(body), envelope.len());
    }

    #[test]
    fn content_length_counts_bytes_not_chars() {
        let text = "안녕하세요";
        let req = Request::new(TO_PATH, FROM_PATH, "+8210", "+8211", text);
        assert!(req
            .body()
            .contains(&format!("Content-Length: {}\r\n", text.len())));
    }

    #[test]
    fn request_exposes_conversation_identity() {
        let req = Request::new(TO_PATH, FROM_PATH, "+8210", "+8211", "");
        assert_eq!(req.address_key(), AddressKey::new("+8210", "+8211"));
        assert_eq!(req.routing_address(), RoutingAddress::new(TO_PATH, FROM_PATH));
    }

    #[test]
    fn acknowledge_swaps_paths_and_keeps_transaction_id() {
        let req = Request::new(TO_PATH, FROM_PATH, "+8210", "+8211", "Hello!");
        let res = Response::acknowledge(&req);

        assert_eq!(res.transaction_id(), req.transaction_id());
        assert_eq!(res.to_path(), FROM_PATH);
        assert_eq!(res.from_path(), TO_PATH);
        assert!(res.is_success());
        assert_eq!(
            res.body(),
            format!(
                "MSRP {tid} 200 OK\r\nTo-Path: {FROM_PATH}\r\nFrom-Path: {TO_PATH}\r\n-------{tid}$\r\n",
                tid = req.transaction_id()
            )
        );
    }
}
