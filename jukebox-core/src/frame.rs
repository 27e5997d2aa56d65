use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const LINE_TERMINATOR: &str = "\r\n";
pub const FRAME_END: &str = "END";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Kind {
    Chat,
    Dir,
    Queue,
    NowPlaying,
    Skip,
    Init,
    Remove,
    /// Any token this client does not know about. Kept verbatim so it can be
    /// logged and skipped by the dispatcher.
    Other(String),
}

impl Kind {
    pub fn parse(token: &str) -> Self {
        match token {
            "CHAT" => Kind::Chat,
            "DIR" => Kind::Dir,
            "QUEUE" => Kind::Queue,
            "NOW_PLAYING" => Kind::NowPlaying,
            "SKIP" => Kind::Skip,
            "INIT" => Kind::Init,
            "REMOVE" => Kind::Remove,
            other => Kind::Other(other.to_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Kind::Chat => "CHAT",
            Kind::Dir => "DIR",
            Kind::Queue => "QUEUE",
            Kind::NowPlaying => "NOW_PLAYING",
            Kind::Skip => "SKIP",
            Kind::Init => "INIT",
            Kind::Remove => "REMOVE",
            Kind::Other(token) => token.as_str(),
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Kind {
    fn from(token: &str) -> Self {
        Kind::parse(token)
    }
}

/// Body of an outgoing frame: nothing, one line, or an ordered list of lines.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Payload {
    #[default]
    Empty,
    Single(String),
    Lines(Vec<String>),
}

impl Payload {
    pub fn into_lines(self) -> Vec<String> {
        match self {
            Payload::Empty => Vec::new(),
            Payload::Single(line) => vec![line],
            Payload::Lines(lines) => lines,
        }
    }
}

impl From<()> for Payload {
    fn from(_: ()) -> Self {
        Payload::Empty
    }
}

impl From<&str> for Payload {
    fn from(line: &str) -> Self {
        Payload::Single(line.to_owned())
    }
}

impl From<String> for Payload {
    fn from(line: String) -> Self {
        Payload::Single(line)
    }
}

impl From<Vec<String>> for Payload {
    fn from(lines: Vec<String>) -> Self {
        Payload::Lines(lines)
    }
}

impl From<&[&str]> for Payload {
    fn from(lines: &[&str]) -> Self {
        Payload::Lines(lines.iter().map(|line| (*line).to_owned()).collect())
    }
}

impl<T: Into<Payload>> From<Option<T>> for Payload {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: Kind,
    pub lines: Vec<String>,
}

impl Frame {
    pub fn new(kind: Kind, payload: impl Into<Payload>) -> Self {
        Self {
            kind,
            lines: payload.into().into_lines(),
        }
    }

    pub fn empty(kind: Kind) -> Self {
        Self {
            kind,
            lines: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    #[error("no frame kind at line {index}")]
    MissingKind { index: usize },
    #[error("invalid frame kind {0:?}")]
    InvalidKind(String),
    #[error("frame {kind} starting at line {start} has no END terminator")]
    MissingTerminator { kind: String, start: usize },
    #[error("payload line {index} is the reserved END terminator")]
    ReservedLine { index: usize },
    #[error("payload line {index} contains a line break")]
    LineBreakInPayload { index: usize },
}

/// Order in which payload lines travel on the wire relative to the order the
/// caller supplied them.
///
/// `AsEncoded` writes lines in caller order. `Reversed` writes them last to
/// first. Whichever is chosen, [`Framer::decode`] undoes exactly what
/// [`Framer::encode`] did, so callers always get their original order back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadOrder {
    #[default]
    AsEncoded,
    Reversed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub frame: Frame,
    /// Index of the first line after this frame's `END`.
    pub next_index: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Framer {
    order: PayloadOrder,
}

impl Framer {
    pub const fn new(order: PayloadOrder) -> Self {
        Self { order }
    }

    pub fn order(&self) -> PayloadOrder {
        self.order
    }

    pub fn encode(&self, kind: &Kind, payload: impl Into<Payload>) -> Result<String, FramingError> {
        let lines = payload.into().into_lines();
        self.encode_lines(kind, &lines)
    }

    pub fn encode_frame(&self, frame: &Frame) -> Result<String, FramingError> {
        self.encode_lines(&frame.kind, &frame.lines)
    }

    fn encode_lines(&self, kind: &Kind, lines: &[String]) -> Result<String, FramingError> {
        let token = kind.as_str();
        if token.is_empty() || token == FRAME_END || token.contains(['\r', '\n']) {
            return Err(FramingError::InvalidKind(token.to_owned()));
        }

        for (index, line) in lines.iter().enumerate() {
            if line == FRAME_END {
                return Err(FramingError::ReservedLine { index });
            }
            if line.contains(LINE_TERMINATOR) {
                return Err(FramingError::LineBreakInPayload { index });
            }
        }

        let body_len: usize = lines.iter().map(|line| line.len() + 2).sum();
        let mut out = String::with_capacity(token.len() + body_len + FRAME_END.len() + 4);
        out.push_str(token);
        out.push_str(LINE_TERMINATOR);

        let mut push_line = |line: &String| {
            out.push_str(line);
            out.push_str(LINE_TERMINATOR);
        };
        match self.order {
            PayloadOrder::AsEncoded => lines.iter().for_each(&mut push_line),
            PayloadOrder::Reversed => lines.iter().rev().for_each(&mut push_line),
        }

        out.push_str(FRAME_END);
        out.push_str(LINE_TERMINATOR);
        Ok(out)
    }

    /// Decodes the frame whose kind sits at `lines[start]`.
    ///
    /// Fails rather than returning a partial frame when the input runs out
    /// before an `END` line. An `END` in the kind position is rejected too.
    pub fn decode(&self, lines: &[&str], start: usize) -> Result<Decoded, FramingError> {
        let kind = *lines
            .get(start)
            .ok_or(FramingError::MissingKind { index: start })?;
        if kind == FRAME_END {
            return Err(FramingError::InvalidKind(kind.to_owned()));
        }

        let body_start = start + 1;
        let end_offset = lines[body_start..]
            .iter()
            .position(|line| *line == FRAME_END)
            .ok_or_else(|| FramingError::MissingTerminator {
                kind: kind.to_owned(),
                start,
            })?;
        let end = body_start + end_offset;

        let mut collected: Vec<String> = lines[body_start..end]
            .iter()
            .map(|line| (*line).to_owned())
            .collect();
        if self.order == PayloadOrder::Reversed {
            collected.reverse();
        }

        Ok(Decoded {
            frame: Frame {
                kind: Kind::parse(kind),
                lines: collected,
            },
            next_index: end + 1,
        })
    }
}
