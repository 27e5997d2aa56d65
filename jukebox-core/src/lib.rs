//! Wire protocol and session state for the jukebox client.
//!
//! Everything here is synchronous and free of I/O: the framer turns frames
//! into text and back, the dispatcher routes inbound frames into
//! [`ClientState`] and a [`UiSink`], and the state builds outgoing frames
//! from user intents.

pub mod dispatch;
pub mod frame;
pub mod state;

pub use dispatch::{Dispatcher, Frames, UiSink, Update, split_lines};
pub use frame::{
    Decoded, FRAME_END, Frame, Framer, FramingError, Kind, LINE_TERMINATOR, Payload, PayloadOrder,
};
pub use state::{
    ChatStyle, ClientState, DEFAULT_NICKNAME, DirectoryListing, Intent, Outgoing, QueueEntry,
    init_frame, now_playing_request, parent_path, parse_nick_command, remove_frame, skip_frame,
};
