//! Headless Classboard client.
//!
//! Connects to a classroom server, drives the whiteboard from stdin
//! commands and relays audio between PCM files and the server.

mod console;
mod devices;

use clap::Parser;
use classboard_core::{
    AudioSession, AudioState, ClientConfig, ConfigError, SyncClient, SyncError, SyncEvent,
    TcpConnector, WebSocketChannel, Whiteboard,
};
use console::{AudioCommand, Command, parse_command};
use devices::{BlankPageRasterizer, FileAudioDevice, GrantedPermissions};
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, TryRecvError, channel};
use std::thread;
use thiserror::Error;

#[derive(Debug, Error)]
enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Whiteboard error: {0}")]
    Sync(#[from] SyncError),
}

#[derive(Parser, Debug)]
#[command(name = "classboard", version, about = "Classroom whiteboard and audio client")]
struct Args {
    /// JSON config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Server host, overrides the config file.
    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    whiteboard_port: Option<u16>,

    #[arg(long)]
    audio_port: Option<u16>,

    /// Raw PCM (22050 Hz mono s16le) streamed as the microphone.
    #[arg(long)]
    capture_file: Option<PathBuf>,

    /// Where the server's audio is written.
    #[arg(long)]
    playback_file: Option<PathBuf>,
}

fn load_config(args: &Args) -> Result<ClientConfig, ConfigError> {
    let mut config = match &args.config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::default(),
    };
    if let Some(host) = &args.host {
        config.server_host = host.clone();
    }
    if let Some(port) = args.whiteboard_port {
        config.whiteboard_port = port;
    }
    if let Some(port) = args.audio_port {
        config.audio_port = port;
    }
    config.validate()?;
    Ok(config)
}

/// Forward stdin lines to the main loop.
fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = channel();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    log::error!("Failed to read stdin: {e}");
                    break;
                }
            }
        }
    });
    rx
}

struct App {
    config: ClientConfig,
    board: Whiteboard<WebSocketChannel>,
    audio: AudioSession,
    /// Start talking as soon as the audio socket is up.
    audio_autostart: bool,
    audio_state: AudioState,
}

impl App {
    fn new(config: ClientConfig, args: &Args) -> Result<Self, AppError> {
        let channel = WebSocketChannel::from_config(&config)?;
        let sync = SyncClient::new(channel, Arc::new(BlankPageRasterizer))
            .with_render_dpi(config.render_dpi);
        let device = FileAudioDevice {
            capture: args.capture_file.clone(),
            playback: args.playback_file.clone(),
        };
        let audio = AudioSession::new(
            Arc::new(GrantedPermissions),
            Arc::new(device),
            Arc::new(TcpConnector::new(config.connect_timeout())),
        );
        Ok(Self {
            config,
            board: Whiteboard::new(sync),
            audio,
            audio_autostart: false,
            audio_state: AudioState::Disconnected,
        })
    }

    fn run(&mut self, commands: Receiver<String>) -> Result<(), AppError> {
        self.board.sync_mut().connect()?;
        loop {
            for event in self.board.poll() {
                report(&event);
            }
            self.poll_audio();

            loop {
                match commands.try_recv() {
                    Ok(line) => match parse_command(&line) {
                        Ok(Some(Command::Quit)) => return Ok(()),
                        Ok(Some(command)) => self.execute(command),
                        Ok(None) => {}
                        Err(e) => println!("{e}"),
                    },
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        log::info!("Input closed, exiting");
                        return Ok(());
                    }
                }
            }
            thread::sleep(self.config.poll_interval());
        }
    }

    fn poll_audio(&mut self) {
        let state = self.audio.poll();
        if state == AudioState::Connected && self.audio_autostart {
            self.audio_autostart = false;
            if let Err(e) = self.audio.start_communication() {
                println!("Could not start audio: {e}");
            }
        }
        let state = self.audio.state();
        if state != self.audio_state {
            match state.error_message() {
                Some(message) => println!("audio: {} ({message})", state.label()),
                None => println!("audio: {}", state.label()),
            }
            if state.is_error() {
                self.audio_autostart = false;
            }
            self.audio_state = state;
        }
    }

    fn execute(&mut self, command: Command) {
        let board = &mut self.board;
        match command {
            Command::Resize { width, height } => {
                board.resize(width, height);
            }
            Command::Down(point) => {
                if !board.pointer_down(point) {
                    println!("Drawing is not allowed right now");
                }
            }
            Command::Move(point) => board.pointer_move(point),
            Command::Up => {
                board.pointer_up();
            }
            Command::Undo => {
                board.undo();
            }
            Command::Clear => board.clear(),
            Command::Page(page) => {
                if !board.sync_mut().change_page(page) {
                    println!("Cannot switch to page {page}");
                }
            }
            Command::Next => {
                board.next_page();
            }
            Command::Previous => {
                board.previous_page();
            }
            Command::Ask(question) => {
                if !board.request_edit_permission(&question) {
                    println!("Not connected, request not sent");
                }
            }
            Command::Pen(color) => board.set_pen_color(color),
            Command::Width(width) => board.set_stroke_width(width),
            Command::Eraser(on) => board.set_erasing(on),
            Command::Audio(AudioCommand::Start) => self.start_audio(),
            Command::Audio(AudioCommand::Stop) => {
                self.audio_autostart = false;
                self.audio.stop_communication();
            }
            Command::Audio(AudioCommand::Retry) => {
                self.audio.retry();
            }
            Command::Status => self.print_status(),
            Command::Quit => {}
        }
    }

    fn start_audio(&mut self) {
        let result = match self.audio.state() {
            AudioState::Connected => self.audio.start_communication(),
            AudioState::Disconnected if !self.audio.is_connecting() => {
                self.audio_autostart = true;
                self.audio
                    .connect(&self.config.server_host, self.config.audio_port)
            }
            _ => Ok(()),
        };
        if let Err(e) = result {
            println!("Could not start audio: {e}");
        }
    }

    fn print_status(&self) {
        let sync = self.board.sync();
        let link = sync.link();
        let background = sync.background();
        println!(
            "whiteboard: {:?}, can edit: {}, page {}/{}",
            link.state(),
            link.can_edit(),
            background.current_page().saturating_add(1),
            background.total_pages().max(1)
        );
        if let Some(message) = link.status_message() {
            println!("status: {message}");
        }
        match background.image_size() {
            Some((width, height)) => println!("background: {width}x{height}"),
            None => println!("background: none"),
        }
        println!(
            "strokes: {} local, {} remote",
            self.board.strokes().completed().len() - 1,
            self.board.remote_strokes().completed().len() - 1
        );
        println!("audio: {}", self.audio.state().label());
    }

    fn shutdown(&mut self) {
        self.audio.stop_communication();
        self.board.close();
    }
}

fn report(event: &SyncEvent) {
    match event {
        SyncEvent::Connected => println!("Connected"),
        SyncEvent::Disconnected { reason } => println!("Disconnected: {reason}"),
        SyncEvent::ConnectFailed { message, attempt } => {
            println!("Connection attempt {attempt} failed: {message}")
        }
        SyncEvent::GaveUp { attempts } => println!("Gave up after {attempts} attempts"),
        SyncEvent::StatusChanged { can_edit, message } => {
            println!("Status: {message} (can edit: {can_edit})")
        }
        SyncEvent::DocumentLoaded { total_pages, current_page } => {
            println!(
                "Document loaded: page {} of {total_pages}",
                current_page.saturating_add(1)
            )
        }
        SyncEvent::PageChanged { page_number } => {
            println!("Page {}", page_number.saturating_add(1))
        }
        SyncEvent::BackgroundChanged { width, height, .. } => {
            println!("Background {width}x{height}")
        }
        SyncEvent::RenderFailed { page, message } => {
            println!("Could not render page {}: {message}", page.saturating_add(1))
        }
        SyncEvent::AnnotationsCleared => println!("Annotations cleared"),
        SyncEvent::RemoteStroke { .. } => {}
    }
}

fn main() {
    let args = Args::parse();
    env_logger::init();

    let result = load_config(&args)
        .map_err(AppError::from)
        .and_then(|config| {
            log::info!(
                "Starting Classboard, server {}:{}",
                config.server_host,
                config.whiteboard_port
            );
            App::new(config, &args)
        })
        .and_then(|mut app| {
            let result = app.run(spawn_stdin_reader());
            app.shutdown();
            result
        });

    if let Err(e) = result {
        log::error!("{e}");
        eprintln!("{e}");
        std::process::exit(1);
    }
}
