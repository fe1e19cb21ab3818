//! Two-way voice link with the classroom server.
//!
//! Raw PCM (22050 Hz, mono, signed 16-bit) is streamed over a plain TCP
//! socket. Once communication starts, one thread pumps the microphone into
//! the socket and another pumps the socket into the speaker. Platform audio
//! and permission checks sit behind traits so the session logic runs the
//! same everywhere.

use crate::connection::AudioState;
use crate::error::AudioError;
use crate::observable::{Observable, Observer};
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub const SAMPLE_RATE: u32 = 22_050;
pub const CHANNELS: u16 = 1;
pub const BITS_PER_SAMPLE: u16 = 16;
/// Bytes moved per read in each direction.
pub const AUDIO_BUFFER_SIZE: usize = 4096;

/// Microphone sample source.
pub type CaptureStream = Box<dyn Read + Send>;
/// Speaker sample sink.
pub type PlaybackStream = Box<dyn Write + Send>;

/// Runtime microphone permission.
pub trait PermissionGateway: Send + Sync {
    fn has_audio_permission(&self) -> bool;
}

/// Opens the platform's capture and playback devices.
///
/// Both streams carry PCM in the format given by [`SAMPLE_RATE`],
/// [`CHANNELS`] and [`BITS_PER_SAMPLE`]. Capture reads must return within
/// roughly one buffer period so the session can stop promptly. Dropping a
/// stream releases the device.
pub trait AudioDevice: Send + Sync {
    fn open_capture(&self) -> Result<CaptureStream, AudioError>;
    fn open_playback(&self) -> Result<PlaybackStream, AudioError>;
}

/// A connected byte stream that can be split between two threads.
pub trait DuplexStream: Read + Write + Send {
    /// Another handle to the same connection.
    fn try_clone_stream(&self) -> std::io::Result<Box<dyn DuplexStream>>;
    /// Shut both directions down, waking any blocked reader.
    fn shutdown_both(&self) -> std::io::Result<()>;
}

impl DuplexStream for TcpStream {
    fn try_clone_stream(&self) -> std::io::Result<Box<dyn DuplexStream>> {
        Ok(Box::new(self.try_clone()?))
    }

    fn shutdown_both(&self) -> std::io::Result<()> {
        self.shutdown(Shutdown::Both)
    }
}

/// Opens the audio socket.
pub trait AudioConnector: Send + Sync {
    fn connect(&self, host: &str, port: u16) -> Result<Box<dyn DuplexStream>, AudioError>;
}

/// [`AudioConnector`] over TCP.
#[derive(Debug, Clone, Copy)]
pub struct TcpConnector {
    pub timeout: Duration,
}

impl TcpConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl AudioConnector for TcpConnector {
    fn connect(&self, host: &str, port: u16) -> Result<Box<dyn DuplexStream>, AudioError> {
        let addrs = (host, port)
            .to_socket_addrs()
            .map_err(|e| AudioError::Connect(format!("{host}:{port}: {e}")))?;
        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    return Ok(Box::new(stream));
                }
                Err(e) => last_error = Some(e),
            }
        }
        Err(AudioError::Connect(match last_error {
            Some(e) => format!("{host}:{port}: {e}"),
            None => format!("{host}:{port}: no addresses"),
        }))
    }
}

type ConnectResult = Result<Box<dyn DuplexStream>, AudioError>;

/// The audio link's lifecycle.
///
/// `Disconnected -> Connected -> Communicating`, with `Error` reachable
/// from anywhere and left only through [`retry`](Self::retry). State is
/// only changed on the owner's thread; background results are applied in
/// [`poll`](Self::poll).
pub struct AudioSession {
    state: Observable<AudioState>,
    permissions: Arc<dyn PermissionGateway>,
    device: Arc<dyn AudioDevice>,
    connector: Arc<dyn AudioConnector>,
    pending: Option<Receiver<ConnectResult>>,
    stream: Option<Box<dyn DuplexStream>>,
    running: Arc<AtomicBool>,
    uplink: Option<JoinHandle<CaptureStream>>,
    downlink: Option<JoinHandle<PlaybackStream>>,
    failure_tx: Sender<String>,
    failure_rx: Receiver<String>,
}

impl AudioSession {
    pub fn new(
        permissions: Arc<dyn PermissionGateway>,
        device: Arc<dyn AudioDevice>,
        connector: Arc<dyn AudioConnector>,
    ) -> Self {
        let (failure_tx, failure_rx) = channel();
        Self {
            state: Observable::new(AudioState::Disconnected),
            permissions,
            device,
            connector,
            pending: None,
            stream: None,
            running: Arc::new(AtomicBool::new(false)),
            uplink: None,
            downlink: None,
            failure_tx,
            failure_rx,
        }
    }

    pub fn state(&self) -> AudioState {
        self.state.get()
    }

    pub fn state_observer(&self) -> Observer<AudioState> {
        self.state.observer()
    }

    /// A connection attempt is running in the background.
    pub fn is_connecting(&self) -> bool {
        self.pending.is_some()
    }

    /// Open the audio socket. Completes asynchronously; see [`poll`](Self::poll).
    pub fn connect(&mut self, host: &str, port: u16) -> Result<(), AudioError> {
        if !self.permissions.has_audio_permission() {
            log::warn!("Audio permission not granted");
            return Err(self.fail(AudioError::PermissionDenied));
        }
        if self.state.get() != AudioState::Disconnected || self.pending.is_some() {
            return Err(AudioError::Connect(format!(
                "cannot connect while {}",
                self.state.get().label()
            )));
        }

        log::info!("Connecting audio to {host}:{port}");
        let (tx, rx) = channel();
        let connector = Arc::clone(&self.connector);
        let host = host.to_string();
        thread::spawn(move || {
            let _ = tx.send(connector.connect(&host, port));
        });
        self.pending = Some(rx);
        Ok(())
    }

    /// Apply finished connection attempts and loop failures.
    pub fn poll(&mut self) -> AudioState {
        if let Some(rx) = &self.pending {
            match rx.try_recv() {
                Ok(Ok(stream)) => {
                    self.pending = None;
                    log::info!("Audio connected");
                    self.stream = Some(stream);
                    self.state.set(AudioState::Connected);
                }
                Ok(Err(e)) => {
                    self.pending = None;
                    log::error!("Audio connection failed: {e}");
                    self.fail(e);
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => {
                    self.pending = None;
                    self.fail(AudioError::Connect("connection attempt aborted".to_string()));
                }
            }
        }

        if let Ok(message) = self.failure_rx.try_recv() {
            if self.state.get() == AudioState::Communicating {
                log::error!("Audio communication failed: {message}");
                self.halt();
                self.state
                    .set(AudioState::Error(format!("Communication error: {message}")));
            }
            while self.failure_rx.try_recv().is_ok() {}
        }

        self.state.get()
    }

    /// Acquire microphone and speaker and start both pumps.
    ///
    /// On any acquisition failure whatever was already acquired is released
    /// and the session moves to `Error`.
    pub fn start_communication(&mut self) -> Result<(), AudioError> {
        if !self.state.get().can_start_communication() {
            log::warn!("Cannot start audio while {}", self.state.get().label());
            return Err(AudioError::NotConnected);
        }
        let Some(stream) = self.stream.as_ref() else {
            return Err(AudioError::NotConnected);
        };

        let split = stream
            .try_clone_stream()
            .and_then(|reader| Ok((reader, stream.try_clone_stream()?)));
        let (reader, writer) = match split {
            Ok(pair) => pair,
            Err(e) => return Err(self.fail(e.into())),
        };
        let capture = match self.device.open_capture() {
            Ok(capture) => capture,
            Err(e) => return Err(self.fail(e)),
        };
        let playback = match self.device.open_playback() {
            Ok(playback) => playback,
            Err(e) => {
                drop(capture);
                return Err(self.fail(e));
            }
        };

        self.running.store(true, Ordering::Release);
        let running = Arc::clone(&self.running);
        let failures = self.failure_tx.clone();
        self.uplink = Some(thread::spawn(move || {
            pump_uplink(capture, writer, &running, &failures)
        }));
        let running = Arc::clone(&self.running);
        let failures = self.failure_tx.clone();
        self.downlink = Some(thread::spawn(move || {
            pump_downlink(reader, playback, &running, &failures)
        }));

        log::info!("Audio communication started");
        self.state.set(AudioState::Communicating);
        Ok(())
    }

    /// Stop both pumps, release the devices and close the socket.
    pub fn stop_communication(&mut self) {
        self.halt();
        self.state.set_if_changed(AudioState::Disconnected);
        log::info!("Audio communication stopped");
    }

    /// Leave `Error` for `Disconnected`.
    pub fn retry(&mut self) -> bool {
        if self.state.get().is_error() {
            self.state.set(AudioState::Disconnected);
            true
        } else {
            false
        }
    }

    pub fn on_permission_granted(&mut self) {
        if self.state.get().is_error() {
            self.state.set(AudioState::Disconnected);
        }
    }

    pub fn on_permission_denied(&mut self) {
        self.halt();
        self.state
            .set(AudioState::Error("Audio permission denied".to_string()));
    }

    /// Tear everything down. Threads are joined before the devices are
    /// dropped, and the devices before the socket.
    fn halt(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(stream) = &self.stream {
            let _ = stream.shutdown_both();
        }
        let capture = self.uplink.take().and_then(|h| h.join().ok());
        let playback = self.downlink.take().and_then(|h| h.join().ok());
        drop(capture);
        drop(playback);
        self.stream = None;
        self.pending = None;
    }

    fn fail(&mut self, error: AudioError) -> AudioError {
        log::error!("Audio error: {error}");
        self.halt();
        self.state.set(AudioState::Error(error.to_string()));
        error
    }
}

impl Drop for AudioSession {
    fn drop(&mut self) {
        self.halt();
    }
}

fn pump_uplink(
    mut capture: CaptureStream,
    mut socket: Box<dyn DuplexStream>,
    running: &AtomicBool,
    failures: &Sender<String>,
) -> CaptureStream {
    let mut buffer = vec![0u8; AUDIO_BUFFER_SIZE];
    while running.load(Ordering::Acquire) {
        match capture.read(&mut buffer) {
            Ok(0) => thread::sleep(Duration::from_millis(5)),
            Ok(n) => {
                if let Err(e) = socket.write_all(&buffer[..n]) {
                    if running.load(Ordering::Acquire) {
                        let _ = failures.send(format!("send failed: {e}"));
                    }
                    break;
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                if running.load(Ordering::Acquire) {
                    let _ = failures.send(format!("capture failed: {e}"));
                }
                break;
            }
        }
    }
    capture
}

fn pump_downlink(
    mut socket: Box<dyn DuplexStream>,
    mut playback: PlaybackStream,
    running: &AtomicBool,
    failures: &Sender<String>,
) -> PlaybackStream {
    let mut buffer = vec![0u8; AUDIO_BUFFER_SIZE];
    while running.load(Ordering::Acquire) {
        match socket.read(&mut buffer) {
            Ok(0) => {
                if running.load(Ordering::Acquire) {
                    let _ = failures.send("server closed the audio stream".to_string());
                }
                break;
            }
            Ok(n) => {
                if let Err(e) = playback.write_all(&buffer[..n]) {
                    if running.load(Ordering::Acquire) {
                        let _ = failures.send(format!("playback failed: {e}"));
                    }
                    break;
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut
                ) => {}
            Err(e) => {
                if running.load(Ordering::Acquire) {
                    let _ = failures.send(format!("receive failed: {e}"));
                }
                break;
            }
        }
    }
    let _ = playback.flush();
    playback
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io;
    use std::os::unix::net::UnixStream;
    use std::sync::Mutex;
    use std::time::Instant;

    impl DuplexStream for UnixStream {
        fn try_clone_stream(&self) -> io::Result<Box<dyn DuplexStream>> {
            Ok(Box::new(self.try_clone()?))
        }

        fn shutdown_both(&self) -> io::Result<()> {
            self.shutdown(Shutdown::Both)
        }
    }

    struct Permission(bool);

    impl PermissionGateway for Permission {
        fn has_audio_permission(&self) -> bool {
            self.0
        }
    }

    /// Hands out one end of a socket pair.
    struct PairConnector {
        client: Mutex<Option<UnixStream>>,
    }

    impl AudioConnector for PairConnector {
        fn connect(&self, _host: &str, _port: u16) -> Result<Box<dyn DuplexStream>, AudioError> {
            match self.client.lock().unwrap().take() {
                Some(stream) => Ok(Box::new(stream)),
                None => Err(AudioError::Connect("refused".to_string())),
            }
        }
    }

    type EventLog = Arc<Mutex<Vec<&'static str>>>;

    struct MockCapture {
        released: Arc<AtomicBool>,
        log: EventLog,
    }

    impl Read for MockCapture {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            thread::sleep(Duration::from_millis(2));
            self.log.lock().unwrap().push("read");
            let chunk = b"mic!";
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            Ok(n)
        }
    }

    impl Drop for MockCapture {
        fn drop(&mut self) {
            self.log.lock().unwrap().push("capture released");
            self.released.store(true, Ordering::SeqCst);
        }
    }

    struct MockPlayback {
        played: Arc<Mutex<Vec<u8>>>,
        released: Arc<AtomicBool>,
        log: EventLog,
    }

    impl Write for MockPlayback {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.log.lock().unwrap().push("write");
            self.played.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Drop for MockPlayback {
        fn drop(&mut self) {
            self.log.lock().unwrap().push("playback released");
            self.released.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct MockDevice {
        capture_broken: bool,
        playback_broken: bool,
        capture_opened: AtomicBool,
        playback_opened: AtomicBool,
        capture_released: Arc<AtomicBool>,
        playback_released: Arc<AtomicBool>,
        played: Arc<Mutex<Vec<u8>>>,
        log: EventLog,
    }

    impl MockDevice {
        fn events(&self) -> Vec<&'static str> {
            self.log.lock().unwrap().clone()
        }
    }

    impl AudioDevice for MockDevice {
        fn open_capture(&self) -> Result<CaptureStream, AudioError> {
            if self.capture_broken {
                return Err(AudioError::Device("microphone busy".to_string()));
            }
            self.capture_opened.store(true, Ordering::SeqCst);
            self.capture_released.store(false, Ordering::SeqCst);
            Ok(Box::new(MockCapture {
                released: Arc::clone(&self.capture_released),
                log: Arc::clone(&self.log),
            }))
        }

        fn open_playback(&self) -> Result<PlaybackStream, AudioError> {
            if self.playback_broken {
                return Err(AudioError::Device("speaker busy".to_string()));
            }
            self.playback_opened.store(true, Ordering::SeqCst);
            self.playback_released.store(false, Ordering::SeqCst);
            Ok(Box::new(MockPlayback {
                played: Arc::clone(&self.played),
                released: Arc::clone(&self.playback_released),
                log: Arc::clone(&self.log),
            }))
        }
    }

    fn session(device: Arc<MockDevice>, permitted: bool) -> (AudioSession, UnixStream) {
        let (client, server) = UnixStream::pair().unwrap();
        server.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let connector = PairConnector {
            client: Mutex::new(Some(client)),
        };
        let session =
            AudioSession::new(Arc::new(Permission(permitted)), device, Arc::new(connector));
        (session, server)
    }

    fn wait_for_state(
        session: &mut AudioSession,
        done: impl Fn(&AudioState) -> bool,
    ) -> AudioState {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let state = session.poll();
            if done(&state) || Instant::now() > deadline {
                return state;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn connected(device: Arc<MockDevice>) -> (AudioSession, UnixStream) {
        let (mut session, server) = session(device, true);
        session.connect("classroom", 8000).unwrap();
        let state = wait_for_state(&mut session, |s| *s == AudioState::Connected);
        assert_eq!(state, AudioState::Connected);
        (session, server)
    }

    #[test]
    fn test_permission_required() {
        let (mut session, _server) = session(Arc::new(MockDevice::default()), false);
        assert!(matches!(
            session.connect("classroom", 8000),
            Err(AudioError::PermissionDenied)
        ));
        assert!(session.state().is_error());
        assert!(!session.is_connecting());
    }

    #[test]
    fn test_start_requires_connection() {
        let (mut session, _server) = session(Arc::new(MockDevice::default()), true);
        assert!(matches!(session.start_communication(), Err(AudioError::NotConnected)));
        assert_eq!(session.state(), AudioState::Disconnected);
    }

    #[test]
    fn test_full_duplex_and_stop() {
        let device = Arc::new(MockDevice::default());
        let (mut session, mut server) = connected(Arc::clone(&device));
        session.start_communication().unwrap();
        assert_eq!(session.state(), AudioState::Communicating);

        let mut uplink = [0u8; 4];
        server.read_exact(&mut uplink).unwrap();
        assert_eq!(&uplink, b"mic!");

        server.write_all(b"speaker").unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while device.played.lock().unwrap().len() < 7 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(device.played.lock().unwrap().as_slice(), b"speaker");

        session.stop_communication();
        assert_eq!(session.state(), AudioState::Disconnected);
        assert!(device.capture_released.load(Ordering::SeqCst));
        assert!(device.playback_released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_playback_failure_releases_capture() {
        let device = Arc::new(MockDevice {
            playback_broken: true,
            ..MockDevice::default()
        });
        let (mut session, _server) = connected(Arc::clone(&device));
        assert!(matches!(session.start_communication(), Err(AudioError::Device(_))));
        assert!(session.state().is_error());
        assert!(device.capture_released.load(Ordering::SeqCst));

        assert!(session.retry());
        assert_eq!(session.state(), AudioState::Disconnected);
        assert!(!session.retry());
    }

    #[test]
    fn test_server_hangup_is_an_error() {
        let device = Arc::new(MockDevice::default());
        let (mut session, server) = connected(Arc::clone(&device));
        session.start_communication().unwrap();
        drop(server);

        let state = wait_for_state(&mut session, AudioState::is_error);
        assert!(state.error_message().unwrap().starts_with("Communication error"));
        assert!(device.capture_released.load(Ordering::SeqCst));
        assert!(device.playback_released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_connect_failure() {
        let (mut session, _server) = session(Arc::new(MockDevice::default()), true);
        session.connect("classroom", 8000).unwrap();
        wait_for_state(&mut session, |s| *s == AudioState::Connected);
        session.stop_communication();

        // The pair is used up, so the next attempt is refused.
        session.connect("classroom", 8000).unwrap();
        let state = wait_for_state(&mut session, AudioState::is_error);
        assert_eq!(state.label(), "Error");
    }

    #[test]
    fn test_cannot_connect_twice() {
        let (mut session, _server) = connected(Arc::new(MockDevice::default()));
        assert!(matches!(session.connect("classroom", 8000), Err(AudioError::Connect(_))));
        assert_eq!(session.state(), AudioState::Connected);
    }

    #[test]
    fn test_permission_revoked() {
        let device = Arc::new(MockDevice::default());
        let (mut session, _server) = connected(Arc::clone(&device));
        session.start_communication().unwrap();
        session.on_permission_denied();
        assert!(session.state().is_error());
        assert!(device.capture_released.load(Ordering::SeqCst));
        session.on_permission_granted();
        assert_eq!(session.state(), AudioState::Disconnected);
    }

    #[test]
    fn test_stop_halts_pumps_before_release() {
        let device = Arc::new(MockDevice::default());
        let (mut session, mut server) = connected(Arc::clone(&device));
        session.start_communication().unwrap();

        // Keep the downlink busy while stopping.
        let mut feeder = server.try_clone().unwrap();
        let feeding = thread::spawn(move || {
            let chunk = [7u8; 256];
            while feeder.write_all(&chunk).is_ok() {
                thread::sleep(Duration::from_millis(1));
            }
        });
        let mut uplink = [0u8; 4];
        server.read_exact(&mut uplink).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while !device.events().contains(&"write") && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        session.stop_communication();
        drop(server);
        feeding.join().unwrap();

        let events = device.events();
        let capture_released = events.iter().position(|e| *e == "capture released").unwrap();
        let playback_released = events.iter().position(|e| *e == "playback released").unwrap();
        assert!(capture_released < playback_released);
        assert!(events.contains(&"read") && events.contains(&"write"));
        assert!(
            events[capture_released..]
                .iter()
                .all(|e| *e != "read" && *e != "write"),
            "pump still running after release: {:?}",
            &events[capture_released..]
        );
    }

    #[test]
    fn test_capture_failure_acquires_nothing() {
        let device = Arc::new(MockDevice {
            capture_broken: true,
            ..MockDevice::default()
        });
        let (mut session, mut server) = connected(Arc::clone(&device));
        assert!(matches!(session.start_communication(), Err(AudioError::Device(_))));
        assert!(session.state().is_error());
        assert!(!device.capture_opened.load(Ordering::SeqCst));
        assert!(!device.playback_opened.load(Ordering::SeqCst));

        // The socket is closed as well.
        let mut buf = [0u8; 1];
        assert_eq!(server.read(&mut buf).unwrap(), 0);
    }
}
