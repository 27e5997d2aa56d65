use std::io::Write;

use jukebox_core::{ChatStyle, Intent, QueueEntry, UiSink};

pub const HELP: &str = "commands: /nick <name>, /open <entry>, /up, /remove <n>, /skip, /np, /quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    Intent(Intent),
    Usage(&'static str),
    Help,
    Quit,
}

/// Maps a typed line to an intent. Lines that are not a console command,
/// `/nick` included, go to the chat path unchanged.
pub fn parse_input(line: &str) -> Option<ConsoleInput> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    let (command, arg) = match trimmed.split_once(char::is_whitespace) {
        Some((command, arg)) => (command, arg.trim()),
        None => (trimmed, ""),
    };

    let input = match command {
        "/quit" => ConsoleInput::Quit,
        "/help" => ConsoleInput::Help,
        "/up" => ConsoleInput::Intent(Intent::GoUp),
        "/skip" => ConsoleInput::Intent(Intent::Skip),
        "/np" => ConsoleInput::Intent(Intent::RequestNowPlaying),
        "/open" if arg.is_empty() => ConsoleInput::Usage("usage: /open <entry>"),
        "/open" => ConsoleInput::Intent(Intent::OpenEntry(arg.to_owned())),
        "/remove" => match arg.parse::<usize>() {
            Ok(position) => ConsoleInput::Intent(Intent::RemoveFromQueue(position)),
            Err(_) => ConsoleInput::Usage("usage: /remove <queue position>"),
        },
        _ => ConsoleInput::Intent(Intent::Chat(line.to_owned())),
    };
    Some(input)
}

/// Plain-text rendering of session updates.
pub struct Console<W: Write> {
    out: W,
}

impl<W: Write> Console<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn line(&mut self, text: &str) {
        let _ = writeln!(self.out, "{text}");
        let _ = self.out.flush();
    }
}

impl<W: Write> UiSink for Console<W> {
    fn on_chat_message(&mut self, text: &str, style: ChatStyle) {
        match style {
            ChatStyle::Remote => self.line(text),
            ChatStyle::Local => self.line(&format!("* {text}")),
        }
    }

    fn on_directory_listing(&mut self, path: &str, up_target: Option<&str>, entries: &[String]) {
        self.line(&format!("[dir] {path}"));
        if let Some(up) = up_target {
            self.line(&format!("  ..  ({up})"));
        }
        for entry in entries {
            self.line(&format!("  {entry}"));
        }
    }

    fn on_queue_listing(&mut self, entries: &[QueueEntry]) {
        self.line("[queue]");
        if entries.is_empty() {
            self.line("  (empty)");
        }
        for entry in entries {
            self.line(&format!("  {}. {}", entry.position, entry.name));
        }
    }

    fn on_now_playing(&mut self, track: Option<&str>) {
        self.line(&format!("[now playing] {}", track.unwrap_or("nothing")));
    }
}
