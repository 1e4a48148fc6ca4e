//! Wire encoding and decoding of MSRP messages.
//!
//! Messages are CRLF delimited text. The first line names the transaction and either the `SEND`
//! method or a status code, headers follow one per line, and the message ends with the end-line
//! `-------{transaction id}$`. Text content is nested in a CPIM envelope whose length is announced
//! in the `Byte-Range` header, so the envelope is always built before the outer message.
//!
//! Continuation end-lines (`+` and `#`) are never produced. When received they end the message
//! just like `$`. End-lines naming another transaction are treated as content.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    error::DecodeError,
    id,
    message::{Message, Request, Response},
};

/// Line terminator used throughout the protocol.
pub const CRLF: &str = "\r\n";

/// Prefix of every end-line, followed by the transaction id.
pub const END_LINE_PREFIX: &str = "-------";

const ANONYMOUS_URI: &str = "<sip:anonymous@anonymous.invalid>";
const CPIM_CONTENT_TYPE_LINE: &str = "Content-Type: message/cpim";
const IMDN_CONTENT_TYPE_LINE: &str = "Content-type: message/imdn+xml";

/// Text content of a request, already wrapped in its CPIM envelope.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Content<'a> {
    pub message_id: &'a str,
    pub cpim: &'a str,
}

/// The CPIM envelope a plain text message travels in.
#[derive(Clone, Debug)]
pub(crate) struct CpimEnvelope<'a> {
    datetime: String,
    imdn_message_id: String,
    text: &'a str,
}

impl<'a> CpimEnvelope<'a> {
    pub(crate) fn new(text: &'a str) -> Self {
        CpimEnvelope {
            datetime: id::datetime(),
            imdn_message_id: id::imdn_message_id(),
            text,
        }
    }

    pub(crate) fn encode(&self) -> String {
        format!(
            "From: {ANONYMOUS_URI}\r\n\
             To: {ANONYMOUS_URI}\r\n\
             DateTime: {datetime}\r\n\
             NS: imdn <urn:ietf:params:imdn>\r\n\
             imdn.Message-ID: {imdn_message_id}\r\n\
             imdn.Disposition-Notification: positive-delivery, display\r\n\
             \r\n\
             Content-type: text/plain;charset=UTF-8\r\n\
             Content-Length: {len}\r\n\
             \r\n\
             {text}\r\n",
            datetime = self.datetime,
            imdn_message_id = self.imdn_message_id,
            len = self.text.len(),
            text = self.text,
        )
    }
}

/// Encodes a `SEND` request.
pub(crate) fn encode_request(
    transaction_id: &str,
    to_path: &str,
    from_path: &str,
    content: Option<Content<'_>>,
) -> String {
    let mut out = format!(
        "MSRP {transaction_id} SEND\r\n\
         To-Path: {to_path}\r\n\
         From-Path: {from_path}\r\n"
    );
    if let Some(Content { message_id, cpim }) = content {
        let len = cpim.len();
        out.push_str(&format!(
            "Message-ID: {message_id}\r\n\
             Success-Report: no\r\n\
             Failure-Report: yes\r\n\
             Byte-Range: 1-{len}/{len}\r\n\
             {CPIM_CONTENT_TYPE_LINE}\r\n\
             \r\n"
        ));
        out.push_str(cpim);
    }
    out.push_str(&end_line(transaction_id));
    out
}

/// Encodes a response.
pub(crate) fn encode_response(
    transaction_id: &str,
    to_path: &str,
    from_path: &str,
    status: u16,
    reason: &str,
) -> String {
    let mut out = format!("MSRP {transaction_id} {status}");
    if !reason.is_empty() {
        out.push(' ');
        out.push_str(reason);
    }
    out.push_str(&format!(
        "\r\n\
         To-Path: {to_path}\r\n\
         From-Path: {from_path}\r\n"
    ));
    out.push_str(&end_line(transaction_id));
    out
}

/// Returns the end-line closing the given transaction, including its line terminator.
pub fn end_line(transaction_id: &str) -> String {
    format!("{END_LINE_PREFIX}{transaction_id}${CRLF}")
}

/// Writes a message and flushes the writer.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(message.body().as_bytes()).await?;
    writer.flush().await
}

/// Reads one message from `reader`.
///
/// Blank lines preceding the first line are skipped as keep-alives. Reading stops at the
/// end-line of the message, leaving any following bytes buffered in `reader`. No more than
/// `limit` bytes are accepted for a single message.
pub async fn read_message<R>(reader: &mut R, limit: usize) -> Result<Message, DecodeError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = LineReader::new(reader, limit);

    let first_line = loop {
        match lines.next_line().await? {
            None => return Err(DecodeError::EndOfStream),
            Some(line) if line.is_empty() => lines.reset(),
            Some(line) => break line,
        }
    };

    match StartLine::parse(&first_line)? {
        StartLine::Request { transaction_id } => read_request(lines, transaction_id).await,
        StartLine::Response {
            transaction_id,
            status,
            reason,
        } => read_response(lines, transaction_id, status, reason).await,
    }
}

#[derive(Debug, PartialEq, Eq)]
enum StartLine {
    Request {
        transaction_id: String,
    },
    Response {
        transaction_id: String,
        status: u16,
        reason: String,
    },
}

impl StartLine {
    fn parse(line: &str) -> Result<Self, DecodeError> {
        let framing = || DecodeError::Framing {
            line: line.to_owned(),
        };

        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 3 || tokens[0] != "MSRP" {
            return Err(framing());
        }

        let transaction_id = tokens[1].to_owned();
        if tokens[2] == "SEND" {
            return Ok(StartLine::Request { transaction_id });
        }

        match tokens[2].parse::<u16>() {
            Ok(status) if tokens[2].len() == 3 => Ok(StartLine::Response {
                transaction_id,
                status,
                reason: tokens[3..].join(" "),
            }),
            _ => Err(framing()),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Headers,
    /// Content-Length seen, waiting for the blank line before the text.
    Separator,
    Payload,
}

async fn read_request<R>(
    mut lines: LineReader<'_, R>,
    transaction_id: String,
) -> Result<Message, DecodeError>
where
    R: AsyncBufRead + Unpin,
{
    let mut to_path = String::new();
    let mut from_path = String::new();
    let mut message_id = None;
    let mut is_cpim = false;
    let mut content_length = None;
    let mut section = Section::Headers;
    let mut payload = String::new();

    loop {
        let line = lines
            .next_line()
            .await?
            .ok_or_else(|| DecodeError::Truncated {
                transaction_id: transaction_id.clone(),
            })?;
        if is_end_line(&line, &transaction_id) {
            break;
        }

        match section {
            // Text keeps the terminators it was sent with, so bare LFs survive.
            Section::Payload => payload.push_str(lines.terminated_line()),
            Section::Separator => {
                if !line.is_empty() {
                    payload.push_str(lines.terminated_line());
                }
                section = Section::Payload;
            }
            Section::Headers => {
                if let Some(value) = header_value(&line, "To-Path") {
                    to_path = value.to_owned();
                } else if let Some(value) = header_value(&line, "From-Path") {
                    from_path = value.to_owned();
                } else if let Some(value) = header_value(&line, "Message-ID") {
                    message_id = Some(value.to_owned());
                } else if let Some(value) = header_value(&line, "Content-Length") {
                    content_length = value.parse::<usize>().ok();
                    section = Section::Separator;
                } else if line.starts_with(CPIM_CONTENT_TYPE_LINE) {
                    is_cpim = true;
                } else if line.starts_with(IMDN_CONTENT_TYPE_LINE) {
                    is_cpim = false;
                }
            }
        }
    }

    let text = trim_payload(payload, content_length);
    let body = lines.into_raw();

    Ok(Message::Request(Request::decoded(
        transaction_id,
        to_path,
        from_path,
        message_id,
        text,
        is_cpim,
        body,
    )))
}

async fn read_response<R>(
    mut lines: LineReader<'_, R>,
    transaction_id: String,
    status: u16,
    reason: String,
) -> Result<Message, DecodeError>
where
    R: AsyncBufRead + Unpin,
{
    let mut to_path = String::new();
    let mut from_path = String::new();

    loop {
        let line = lines
            .next_line()
            .await?
            .ok_or_else(|| DecodeError::Truncated {
                transaction_id: transaction_id.clone(),
            })?;
        if is_end_line(&line, &transaction_id) {
            break;
        }

        if let Some(value) = header_value(&line, "To-Path") {
            to_path = value.to_owned();
        } else if let Some(value) = header_value(&line, "From-Path") {
            from_path = value.to_owned();
        }
    }

    let body = lines.into_raw();
    Ok(Message::Response(Response::decoded(
        transaction_id,
        to_path,
        from_path,
        status,
        reason,
        body,
    )))
}

fn is_end_line(line: &str, transaction_id: &str) -> bool {
    line.strip_prefix(END_LINE_PREFIX)
        .and_then(|rest| rest.strip_prefix(transaction_id))
        .is_some_and(|flag| matches!(flag, "$" | "+" | "#"))
}

fn header_value<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    line.strip_prefix(name)?.strip_prefix(':').map(str::trim)
}

/// Cuts the accumulated payload back to the announced Content-Length, falling back to dropping
/// the line terminator the encoder appends after the text.
fn trim_payload(mut payload: String, content_length: Option<usize>) -> String {
    match content_length {
        Some(len) if len <= payload.len() && payload.is_char_boundary(len) => {
            payload.truncate(len);
        }
        _ => {
            while payload.ends_with(CRLF) {
                payload.truncate(payload.len() - CRLF.len());
            }
        }
    }
    payload
}

/// Reads CRLF terminated lines while recording the raw bytes and enforcing the size limit.
struct LineReader<'a, R> {
    reader: &'a mut R,
    limit: usize,
    consumed: usize,
    raw: String,
    line: String,
}

impl<'a, R> LineReader<'a, R>
where
    R: AsyncBufRead + Unpin,
{
    fn new(reader: &'a mut R, limit: usize) -> Self {
        LineReader {
            reader,
            limit,
            consumed: 0,
            raw: String::new(),
            line: String::new(),
        }
    }

    /// Returns the next line without its terminator, or `None` at end of stream.
    async fn next_line(&mut self) -> Result<Option<String>, DecodeError> {
        self.line.clear();
        let remaining = (self.limit.saturating_sub(self.consumed) as u64).saturating_add(1);
        let read = (&mut *self.reader)
            .take(remaining)
            .read_line(&mut self.line)
            .await?;
        if read == 0 {
            return Ok(None);
        }

        self.consumed += read;
        if self.consumed > self.limit {
            return Err(DecodeError::TooLarge { limit: self.limit });
        }

        self.raw.push_str(&self.line);
        let line = self.line.strip_suffix('\n').unwrap_or(&self.line);
        let line = line.strip_suffix('\r').unwrap_or(line);
        Ok(Some(line.to_owned()))
    }

    /// The last line returned by `next_line`, terminator included.
    fn terminated_line(&self) -> &str {
        &self.line
    }

    /// Forgets everything read so far, used for keep-alive lines.
    fn reset(&mut self) {
        self.consumed = 0;
        self.raw.clear();
    }

    fn into_raw(self) -> String {
        self.raw
    }
}
