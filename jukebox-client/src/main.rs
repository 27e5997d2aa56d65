use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use clap::Parser;
use jukebox_client::{
    Backoff, ReconnectPolicy, SavedConfig,
    console::{Console, ConsoleInput, HELP, parse_input},
    open, resolve_config,
};
use jukebox_core::{ChatStyle, PayloadOrder, UiSink};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::fmt::MakeWriter;

#[derive(Parser, Debug, Clone)]
#[command(name = "jukebox")]
struct ClientArgs {
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    nick: Option<String>,
    /// JSON file with the same settings; flags given here win.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    retry_initial_ms: Option<u64>,
    #[arg(long)]
    retry_step_ms: Option<u64>,
    #[arg(long)]
    retry_max_attempts: Option<u32>,
    /// Wait the same delay between every readiness poll.
    #[arg(long, default_value_t = false)]
    constant_retry: bool,
    /// Reconnect after the socket closes, up to this many times in a row.
    #[arg(long)]
    reconnect: Option<u32>,
    #[arg(long)]
    now_playing_secs: Option<u64>,
    /// Send payload lines last-to-first (for servers that expect it).
    #[arg(long, default_value_t = false)]
    reversed_payload_order: bool,
    /// Write logs here instead of stderr.
    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl ClientArgs {
    fn overrides(&self) -> SavedConfig {
        SavedConfig {
            server_url: self.server_url.clone(),
            nickname: self.nick.clone(),
            retry_initial_ms: self.retry_initial_ms,
            retry_step_ms: self.retry_step_ms,
            retry_max_attempts: self.retry_max_attempts,
            retry_backoff: self.constant_retry.then_some(Backoff::Constant),
            reconnect: self
                .reconnect
                .map(|max_attempts| ReconnectPolicy::Backoff { max_attempts }),
            now_playing_secs: self.now_playing_secs,
            payload_order: self
                .reversed_payload_order
                .then_some(PayloadOrder::Reversed),
        }
    }
}

#[derive(Clone)]
struct FileMakeWriter {
    file: Arc<Mutex<File>>,
}

struct FileWriterGuard {
    file: Arc<Mutex<File>>,
}

impl Write for FileWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut locked = self
            .file
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;
        locked.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut locked = self
            .file
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;
        locked.flush()
    }
}

impl<'a> MakeWriter<'a> for FileMakeWriter {
    type Writer = FileWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        FileWriterGuard {
            file: Arc::clone(&self.file),
        }
    }
}

fn init_logging(log_path: Option<&Path>) {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();

    let Some(log_path) = log_path else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(io::stderr)
            .init();
        return;
    };

    let file = match OpenOptions::new().create(true).append(true).open(log_path) {
        Ok(file) => file,
        Err(err) => {
            eprintln!("failed to open log file {}: {err}", log_path.display());
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(io::stderr)
                .init();
            return;
        }
    };

    let make_writer = FileMakeWriter {
        file: Arc::new(Mutex::new(file)),
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(make_writer)
        .with_ansi(false)
        .init();
}

#[tokio::main]
async fn main() {
    let args = ClientArgs::parse();
    init_logging(args.log_file.as_deref());

    let config = match resolve_config(args.config.as_deref(), args.overrides()) {
        Ok(config) => config,
        Err(err) => {
            error!("invalid configuration: {}", err);
            eprintln!("invalid configuration: {err}");
            std::process::exit(2);
        }
    };

    info!(
        server_url = %config.server_url,
        nickname = %config.nickname,
        reconnect = ?config.reconnect,
        "client starting"
    );

    let (session, mut updates, mut finished) = open(config);
    let mut console = Console::new(io::stdout());
    console.line(HELP);

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            update = updates.recv() => {
                match update {
                    Some(update) => update.deliver(&mut console),
                    None => break,
                }
            }
            line = input.next_line() => {
                match line {
                    Ok(Some(line)) => match parse_input(&line) {
                        Some(ConsoleInput::Intent(intent)) => session.handle_intent(intent),
                        Some(ConsoleInput::Usage(usage)) => {
                            console.on_chat_message(usage, ChatStyle::Local)
                        }
                        Some(ConsoleInput::Help) => console.line(HELP),
                        Some(ConsoleInput::Quit) => break,
                        None => {}
                    },
                    Ok(None) => break,
                    Err(err) => {
                        warn!("stdin read failed: {}", err);
                        break;
                    }
                }
            }
            _ = &mut finished => {
                while let Ok(update) = updates.try_recv() {
                    update.deliver(&mut console);
                }
                break;
            }
        }
    }

    info!("client exiting");
}
