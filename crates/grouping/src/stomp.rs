//! Minimal STOMP 1.2 frame codec.
//!
//! Frames travel one per WebSocket text message:
//!
//! ```text
//! COMMAND\n
//! header:value\n
//! ...\n
//! \n
//! body^@
//! ```
//!
//! A message made only of EOLs is a heart-beat. Header values are escaped
//! (`\\`, `\n`, `\r`, `\c`) on every frame except `CONNECT` and `CONNECTED`.

use std::fmt;
use std::time::Duration;

/// Frame terminator.
const NUL: char = '\0';

/// Payload of an outgoing heart-beat.
pub const HEARTBEAT: &str = "\n";

/// STOMP commands used by the status channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Connected,
    Subscribe,
    Unsubscribe,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Connected => "CONNECTED",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Disconnect => "DISCONNECT",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "CONNECT" => Command::Connect,
            "CONNECTED" => Command::Connected,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "DISCONNECT" => Command::Disconnect,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            _ => return None,
        })
    }

    /// `CONNECT`/`CONNECTED` headers are never escaped.
    fn escapes_headers(self) -> bool {
        !matches!(self, Command::Connect | Command::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Append a header (builder style).
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Value of the first header named `name`. Repeated headers keep the
    /// first occurrence, as STOMP 1.2 requires.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Serialize into the wire representation, NUL terminator included.
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push(NUL);
        out
    }
}

/// Errors produced while decoding a frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StompError {
    #[error("Unknown STOMP command: {0}")]
    UnknownCommand(String),

    #[error("Malformed header line: {0}")]
    MalformedHeader(String),

    #[error("Invalid escape sequence in header: {0}")]
    InvalidEscape(String),

    #[error("Frame is missing the header/body separator")]
    MissingSeparator,

    #[error("Invalid content-length: {0}")]
    InvalidContentLength(String),
}

/// Decode one WebSocket text message.
///
/// Returns `Ok(None)` for heart-beats (EOL-only payloads).
pub fn parse_frame(text: &str) -> Result<Option<Frame>, StompError> {
    let text = text.trim_start_matches(['\r', '\n']);
    if text.is_empty() {
        return Ok(None);
    }

    let (head, rest) = split_head(text).ok_or(StompError::MissingSeparator)?;
    let mut lines = head.lines();

    let command_line = lines.next().unwrap_or_default().trim_end_matches('\r');
    let command = Command::parse(command_line)
        .ok_or_else(|| StompError::UnknownCommand(command_line.to_string()))?;

    let mut headers = Vec::new();
    for line in lines {
        let line = line.trim_end_matches('\r');
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| StompError::MalformedHeader(line.to_string()))?;
        if command.escapes_headers() {
            headers.push((unescape_header(name)?, unescape_header(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    let frame = Frame {
        command,
        headers,
        body: String::new(),
    };
    let body = match frame.get("content-length") {
        Some(len) => {
            let len: usize = len
                .trim()
                .parse()
                .map_err(|_| StompError::InvalidContentLength(len.to_string()))?;
            rest.get(..len)
                .ok_or_else(|| StompError::InvalidContentLength(len.to_string()))?
        }
        None => rest.split(NUL).next().unwrap_or_default(),
    };

    Ok(Some(Frame {
        body: body.to_string(),
        ..frame
    }))
}

/// Split at the first blank line, accepting both `\n\n` and `\r\n\r\n`.
fn split_head(text: &str) -> Option<(&str, &str)> {
    let lf = text.find("\n\n").map(|i| (i, 2));
    let crlf = text.find("\r\n\r\n").map(|i| (i, 4));
    let (idx, sep) = match (lf, crlf) {
        (Some(a), Some(b)) => {
            if a.0 < b.0 {
                a
            } else {
                b
            }
        }
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => return None,
    };
    Some((&text[..idx], &text[idx + sep..]))
}

fn escape_header(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(value: &str) -> Result<String, StompError> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            _ => return Err(StompError::InvalidEscape(value.to_string())),
        }
    }
    Ok(out)
}

/// Heart-beat intervals agreed with the broker.
///
/// `None` disables that direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Heartbeat {
    /// How often the client must send something.
    pub send_every: Option<Duration>,
    /// How often the broker promised to send something.
    pub expect_every: Option<Duration>,
}

/// Negotiate heart-beats from the client's wishes and the broker's
/// `heart-beat` header on `CONNECTED` (`"<sx>,<sy>"`, milliseconds).
///
/// Each direction uses the larger of the two values, or is disabled when
/// either side sends `0`. A missing or garbled header disables both.
pub fn negotiate_heartbeat(
    client_outgoing: Duration,
    client_incoming: Duration,
    server_header: Option<&str>,
) -> Heartbeat {
    let Some((sx, sy)) = server_header.and_then(|h| {
        let (sx, sy) = h.split_once(',')?;
        Some((sx.trim().parse::<u64>().ok()?, sy.trim().parse::<u64>().ok()?))
    }) else {
        return Heartbeat::default();
    };

    let pick = |ours: Duration, theirs: u64| {
        if ours.is_zero() || theirs == 0 {
            None
        } else {
            Some(ours.max(Duration::from_millis(theirs)))
        }
    };

    Heartbeat {
        send_every: pick(client_outgoing, sy),
        expect_every: pick(client_incoming, sx),
    }
}
