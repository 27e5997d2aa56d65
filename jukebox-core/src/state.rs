use tracing::debug;

use crate::frame::{Frame, Kind};

pub const DEFAULT_NICKNAME: &str = "Anonymous";
const NICK_COMMAND: &str = "/nick";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatStyle {
    /// Message relayed by the server.
    Remote,
    /// Notice generated on this client, never sent over the wire.
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryListing {
    pub path: String,
    pub up_target: Option<String>,
    pub entries: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    /// 1-based display position.
    pub position: usize,
    pub name: String,
}

/// A raw user intent coming from whatever UI drives the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Chat(String),
    /// Click on a directory listing entry, relative to the current path.
    OpenEntry(String),
    GoUp,
    /// Click on a queue entry, by 1-based position.
    RemoveFromQueue(usize),
    Skip,
    RequestNowPlaying,
}

/// What an intent turns into: a frame for the server, a local notice, or
/// nothing at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    Send(Frame),
    Notice(String),
    Nothing,
}

pub fn init_frame() -> Frame {
    Frame::empty(Kind::Init)
}

pub fn skip_frame() -> Frame {
    Frame::empty(Kind::Skip)
}

pub fn now_playing_request() -> Frame {
    Frame::empty(Kind::NowPlaying)
}

pub fn remove_frame(position: usize) -> Frame {
    Frame::new(Kind::Remove, position.to_string())
}

/// Returns the new nickname when `raw` is a `/nick <name>` command.
pub fn parse_nick_command(raw: &str) -> Option<&str> {
    let rest = raw.trim().strip_prefix(NICK_COMMAND)?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let name = rest.trim();
    (!name.is_empty()).then_some(name)
}

/// Strips the last segment from `path`, keeping the trailing separator.
///
/// `/root/sub/` and `/root/sub` both yield `/root/`. Returns `None` once
/// there is nothing left to go up to.
pub fn parent_path(path: &str) -> Option<String> {
    let trimmed = path.strip_suffix('/').unwrap_or(path);
    if trimmed.is_empty() {
        return None;
    }
    let cut = trimmed.rfind('/')?;
    Some(trimmed[..=cut].to_owned())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientState {
    nickname: String,
    current_path: String,
    queue: Vec<String>,
    now_playing: Option<String>,
}

impl Default for ClientState {
    fn default() -> Self {
        Self::new(DEFAULT_NICKNAME)
    }
}

impl ClientState {
    pub fn new(nickname: impl Into<String>) -> Self {
        Self {
            nickname: nickname.into(),
            current_path: String::new(),
            queue: Vec::new(),
            now_playing: None,
        }
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub fn current_path(&self) -> &str {
        &self.current_path
    }

    pub fn queue(&self) -> &[String] {
        &self.queue
    }

    pub fn now_playing(&self) -> Option<&str> {
        self.now_playing.as_deref()
    }

    pub fn up_target(&self) -> Option<String> {
        parent_path(&self.current_path)
    }

    pub fn handle_intent(&mut self, intent: Intent) -> Outgoing {
        match intent {
            Intent::Chat(raw) => self.submit_chat(&raw),
            Intent::OpenEntry(name) => Outgoing::Send(self.open_entry(&name)),
            Intent::GoUp => self
                .up_target()
                .map(|target| Outgoing::Send(Frame::new(Kind::Dir, target)))
                .unwrap_or(Outgoing::Nothing),
            Intent::RemoveFromQueue(position) => {
                if position == 0 || position > self.queue.len() {
                    return Outgoing::Notice(format!("no queue entry at position {position}"));
                }
                Outgoing::Send(remove_frame(position))
            }
            Intent::Skip => Outgoing::Send(skip_frame()),
            Intent::RequestNowPlaying => Outgoing::Send(now_playing_request()),
        }
    }

    /// Handles a line typed into the chat box.
    ///
    /// `/nick <name>` only renames locally. Anything else is sent as a `CHAT`
    /// frame prefixed with the current nickname.
    pub fn submit_chat(&mut self, raw: &str) -> Outgoing {
        if let Some(name) = parse_nick_command(raw) {
            debug!(old = %self.nickname, new = %name, "nickname changed");
            self.nickname = name.to_owned();
            return Outgoing::Notice(format!("nickname set to {name}"));
        }

        if raw.trim().is_empty() {
            return Outgoing::Nothing;
        }

        let text = raw.trim_end_matches(['\r', '\n']);
        Outgoing::Send(Frame::new(Kind::Chat, format!("{}: {}", self.nickname, text)))
    }

    /// A name ending in `/` is a directory and is browsed into; anything else
    /// is a file and gets queued.
    pub fn open_entry(&self, name: &str) -> Frame {
        let target = format!("{}{}", self.current_path, name);
        if name.ends_with('/') {
            Frame::new(Kind::Dir, target)
        } else {
            Frame::new(Kind::Queue, target)
        }
    }

    /// The last entry is the new current path; the rest are file names
    /// relative to it.
    pub fn apply_directory_update(&mut self, mut entries: Vec<String>) -> DirectoryListing {
        if let Some(path) = entries.pop() {
            self.current_path = path;
        }
        DirectoryListing {
            path: self.current_path.clone(),
            up_target: self.up_target(),
            entries,
        }
    }

    pub fn apply_queue_update(&mut self, entries: Vec<String>) -> Vec<QueueEntry> {
        self.queue = entries;
        self.queue
            .iter()
            .enumerate()
            .map(|(index, name)| QueueEntry {
                position: index + 1,
                name: name.clone(),
            })
            .collect()
    }

    pub fn apply_now_playing_update(&mut self, entries: Vec<String>) -> Option<&str> {
        self.now_playing = entries.into_iter().last().filter(|track| !track.is_empty());
        self.now_playing.as_deref()
    }
}
