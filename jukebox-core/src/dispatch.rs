use std::iter::FusedIterator;

use tracing::{debug, trace};

use crate::frame::{Frame, Framer, FramingError, Kind, LINE_TERMINATOR};
use crate::state::{ChatStyle, ClientState, DirectoryListing, QueueEntry};

/// Receiver of typed updates, implemented by whatever renders the session.
pub trait UiSink {
    fn on_chat_message(&mut self, text: &str, style: ChatStyle);
    fn on_directory_listing(&mut self, path: &str, up_target: Option<&str>, entries: &[String]);
    fn on_queue_listing(&mut self, entries: &[QueueEntry]);
    fn on_now_playing(&mut self, track: Option<&str>);
}

/// Owned form of a [`UiSink`] call, for handing updates across tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    Chat { text: String, style: ChatStyle },
    Directory(DirectoryListing),
    Queue(Vec<QueueEntry>),
    NowPlaying(Option<String>),
}

impl Update {
    pub fn deliver(&self, sink: &mut dyn UiSink) {
        match self {
            Update::Chat { text, style } => sink.on_chat_message(text, *style),
            Update::Directory(listing) => sink.on_directory_listing(
                &listing.path,
                listing.up_target.as_deref(),
                &listing.entries,
            ),
            Update::Queue(entries) => sink.on_queue_listing(entries),
            Update::NowPlaying(track) => sink.on_now_playing(track.as_deref()),
        }
    }
}

impl UiSink for Vec<Update> {
    fn on_chat_message(&mut self, text: &str, style: ChatStyle) {
        self.push(Update::Chat {
            text: text.to_owned(),
            style,
        });
    }

    fn on_directory_listing(&mut self, path: &str, up_target: Option<&str>, entries: &[String]) {
        self.push(Update::Directory(DirectoryListing {
            path: path.to_owned(),
            up_target: up_target.map(str::to_owned),
            entries: entries.to_vec(),
        }));
    }

    fn on_queue_listing(&mut self, entries: &[QueueEntry]) {
        self.push(Update::Queue(entries.to_vec()));
    }

    fn on_now_playing(&mut self, track: Option<&str>) {
        self.push(Update::NowPlaying(track.map(str::to_owned)));
    }
}

/// Splits one socket message into lines. A single trailing terminator does
/// not produce an extra empty line.
pub fn split_lines(raw: &str) -> Vec<&str> {
    let body = raw.strip_suffix(LINE_TERMINATOR).unwrap_or(raw);
    if body.is_empty() {
        return Vec::new();
    }
    body.split(LINE_TERMINATOR).collect()
}

/// Lazy walk over the frames packed into one socket message.
///
/// Stops for good after the first framing error; whatever follows the broken
/// frame is never looked at.
#[derive(Debug)]
pub struct Frames<'a> {
    framer: Framer,
    lines: Vec<&'a str>,
    cursor: usize,
    failed: bool,
}

impl<'a> Frames<'a> {
    pub fn new(framer: Framer, raw: &'a str) -> Self {
        Self {
            framer,
            lines: split_lines(raw),
            cursor: 0,
            failed: false,
        }
    }
}

impl Iterator for Frames<'_> {
    type Item = Result<Frame, FramingError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        while self.lines.get(self.cursor).is_some_and(|line| line.is_empty()) {
            self.cursor += 1;
        }
        if self.cursor >= self.lines.len() {
            return None;
        }

        match self.framer.decode(&self.lines, self.cursor) {
            Ok(decoded) => {
                self.cursor = decoded.next_index;
                Some(Ok(decoded.frame))
            }
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

impl FusedIterator for Frames<'_> {}

#[derive(Debug, Clone, Copy, Default)]
pub struct Dispatcher {
    framer: Framer,
}

impl Dispatcher {
    pub fn new(framer: Framer) -> Self {
        Self { framer }
    }

    pub fn framer(&self) -> Framer {
        self.framer
    }

    pub fn frames<'a>(&self, raw: &'a str) -> Frames<'a> {
        Frames::new(self.framer, raw)
    }

    /// Decodes every frame in `raw` and routes each one to its handler.
    ///
    /// Frames handled before a framing error stay applied; the error is
    /// returned and the rest of `raw` is discarded.
    pub fn process_inbound(
        &self,
        raw: &str,
        state: &mut ClientState,
        sink: &mut dyn UiSink,
    ) -> Result<usize, FramingError> {
        let mut handled = 0;
        for frame in self.frames(raw) {
            let frame = frame.inspect_err(|_| debug!(handled, "framing error mid-message"))?;
            self.route(frame, state, sink);
            handled += 1;
        }
        Ok(handled)
    }

    pub fn route(&self, frame: Frame, state: &mut ClientState, sink: &mut dyn UiSink) {
        trace!(kind = %frame.kind, lines = frame.lines.len(), "inbound frame");
        match frame.kind {
            Kind::Chat => handle_chat(frame.lines, sink),
            Kind::Dir => handle_directory(frame.lines, state, sink),
            Kind::Queue => handle_queue(frame.lines, state, sink),
            Kind::NowPlaying => handle_now_playing(frame.lines, state, sink),
            other => debug!(kind = %other, "ignoring frame without a handler"),
        }
    }
}

fn handle_chat(lines: Vec<String>, sink: &mut dyn UiSink) {
    for line in &lines {
        sink.on_chat_message(line, ChatStyle::Remote);
    }
}

fn handle_directory(lines: Vec<String>, state: &mut ClientState, sink: &mut dyn UiSink) {
    let listing = state.apply_directory_update(lines);
    sink.on_directory_listing(
        &listing.path,
        listing.up_target.as_deref(),
        &listing.entries,
    );
}

fn handle_queue(lines: Vec<String>, state: &mut ClientState, sink: &mut dyn UiSink) {
    let entries = state.apply_queue_update(lines);
    sink.on_queue_listing(&entries);
}

fn handle_now_playing(lines: Vec<String>, state: &mut ClientState, sink: &mut dyn UiSink) {
    let track = state.apply_now_playing_update(lines);
    sink.on_now_playing(track);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PayloadOrder;

    fn encode_all(framer: Framer, frames: &[Frame]) -> String {
        frames
            .iter()
            .map(|frame| framer.encode_frame(frame).unwrap())
            .collect()
    }

    #[test]
    fn concatenated_frames_decode_in_order() {
        let framer = Framer::default();
        let frames = vec![
            Frame::new(Kind::Chat, "Ann: hi"),
            Frame::empty(Kind::Skip),
            Frame::new(
                Kind::Dir,
                vec!["a.ogg".to_owned(), "b.ogg".to_owned(), "/x/".to_owned()],
            ),
            Frame::new(Kind::Other("PING".to_owned()), ()),
        ];
        let raw = encode_all(framer, &frames);

        let decoded: Vec<Frame> = Dispatcher::new(framer)
            .frames(&raw)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(decoded, frames);
    }

    #[test]
    fn multiplexing_holds_under_reversed_order() {
        let framer = Framer::new(PayloadOrder::Reversed);
        let frames = vec![
            Frame::new(Kind::Queue, vec!["1".to_owned(), "2".to_owned()]),
            Frame::new(Kind::NowPlaying, "2"),
        ];
        let raw = encode_all(framer, &frames);
        let decoded: Vec<Frame> = Dispatcher::new(framer)
            .frames(&raw)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(decoded, frames);
    }

    #[test]
    fn empty_message_yields_no_frames() {
        let dispatcher = Dispatcher::default();
        assert_eq!(dispatcher.frames("").count(), 0);
        assert_eq!(dispatcher.frames("\r\n").count(), 0);
    }

    #[test]
    fn frames_stop_after_first_error() {
        let raw = "SKIP\r\nEND\r\nCHAT\r\nno terminator";
        let mut frames = Dispatcher::default().frames(raw);
        assert_eq!(frames.next(), Some(Ok(Frame::empty(Kind::Skip))));
        assert!(matches!(
            frames.next(),
            Some(Err(FramingError::MissingTerminator { .. }))
        ));
        assert_eq!(frames.next(), None);
    }

    #[test]
    fn blank_lines_between_frames_are_skipped() {
        let raw = "SKIP\r\nEND\r\n\r\nINIT\r\nEND\r\n";
        let kinds: Vec<Kind> = Dispatcher::default()
            .frames(raw)
            .map(|frame| frame.unwrap().kind)
            .collect();
        assert_eq!(kinds, vec![Kind::Skip, Kind::Init]);
    }

    #[test]
    fn inbound_frames_update_state_and_sink() {
        let raw = concat!(
            "CHAT\r\nAnn: hi\r\nBob: yo\r\nEND\r\n",
            "DIR\r\nfileA\r\nfileB\r\n/root/sub/\r\nEND\r\n",
            "QUEUE\r\n/root/sub/fileA\r\nEND\r\n",
            "NOW_PLAYING\r\nold\r\n/root/sub/fileA\r\nEND\r\n",
            "VOLUME\r\n11\r\nEND\r\n",
        );
        let mut state = ClientState::default();
        let mut updates: Vec<Update> = Vec::new();

        let handled = Dispatcher::default()
            .process_inbound(raw, &mut state, &mut updates)
            .unwrap();

        assert_eq!(handled, 5);
        assert_eq!(state.current_path(), "/root/sub/");
        assert_eq!(state.queue(), ["/root/sub/fileA".to_owned()].as_slice());
        assert_eq!(state.now_playing(), Some("/root/sub/fileA"));
        assert_eq!(
            updates,
            vec![
                Update::Chat {
                    text: "Ann: hi".to_owned(),
                    style: ChatStyle::Remote,
                },
                Update::Chat {
                    text: "Bob: yo".to_owned(),
                    style: ChatStyle::Remote,
                },
                Update::Directory(DirectoryListing {
                    path: "/root/sub/".to_owned(),
                    up_target: Some("/root/".to_owned()),
                    entries: vec!["fileA".to_owned(), "fileB".to_owned()],
                }),
                Update::Queue(vec![QueueEntry {
                    position: 1,
                    name: "/root/sub/fileA".to_owned(),
                }]),
                Update::NowPlaying(Some("/root/sub/fileA".to_owned())),
            ]
        );
    }

    #[test]
    fn framing_error_keeps_earlier_effects() {
        let raw = "QUEUE\r\na\r\nb\r\nEND\r\nDIR\r\nx\r\n/new/";
        let mut state = ClientState::default();
        let mut updates: Vec<Update> = Vec::new();

        let err = Dispatcher::default()
            .process_inbound(raw, &mut state, &mut updates)
            .unwrap_err();

        assert!(matches!(err, FramingError::MissingTerminator { .. }));
        assert_eq!(state.queue().len(), 2);
        assert_eq!(state.current_path(), "");
        assert_eq!(updates.len(), 1);
    }

    #[test]
    fn stray_terminator_does_not_swallow_the_next_frame() {
        let raw = "END\r\nCHAT\r\nhi\r\nEND\r\n";
        let mut state = ClientState::default();
        let mut updates: Vec<Update> = Vec::new();

        let err = Dispatcher::default()
            .process_inbound(raw, &mut state, &mut updates)
            .unwrap_err();

        assert_eq!(err, FramingError::InvalidKind("END".to_owned()));
        assert!(updates.is_empty());
    }

    #[test]
    fn update_delivery_replays_sink_calls() {
        let original = vec![
            Update::NowPlaying(None),
            Update::Chat {
                text: "nickname set to Bob".to_owned(),
                style: ChatStyle::Local,
            },
        ];
        let mut replayed: Vec<Update> = Vec::new();
        for update in &original {
            update.deliver(&mut replayed);
        }
        assert_eq!(replayed, original);
    }
}
