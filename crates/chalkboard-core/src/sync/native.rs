//! Blocking `tungstenite` client driven from a background thread.
//!
//! The thread alternates between writing every queued frame and one short
//! read, so outgoing strokes are never held behind the read timeout.

use std::net::TcpStream;
use std::ops::ControlFlow;
use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket, connect};
use url::Url;

use super::{ConnectionState, SyncError, Transport, TransportEvent, preview};

/// How long one read may block before queued frames get another chance.
const READ_SLICE: Duration = Duration::from_millis(50);
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

enum WsCommand {
    Send(String),
    Close,
}

/// The socket side of a connection, owned by the background thread.
struct SocketPump {
    socket: WebSocket<MaybeTlsStream<TcpStream>>,
    commands: Receiver<WsCommand>,
    events: Sender<TransportEvent>,
}

impl SocketPump {
    fn open(url: &str, commands: Receiver<WsCommand>, events: Sender<TransportEvent>) -> Option<Self> {
        let (mut socket, response) = match connect(url) {
            Ok(connected) => connected,
            Err(e) => {
                log::error!("Could not reach relay at {}: {}", url, e);
                let _ = events.send(TransportEvent::Error {
                    message: format!("Connection failed: {}", e),
                });
                return None;
            }
        };
        log::info!("Relay connection open ({})", response.status());

        if let MaybeTlsStream::Plain(tcp) = socket.get_mut() {
            let _ = tcp.set_read_timeout(Some(READ_SLICE));
            let _ = tcp.set_write_timeout(Some(WRITE_TIMEOUT));
        }
        let _ = events.send(TransportEvent::Connected);

        Some(Self {
            socket,
            commands,
            events,
        })
    }

    fn run(mut self) {
        while self.write_queued().is_continue() && self.read_once().is_continue() {}
        log::info!("Relay connection closed");
        let _ = self.events.send(TransportEvent::Disconnected);
    }

    /// Write every frame queued so far, then flush once.
    fn write_queued(&mut self) -> ControlFlow<()> {
        let mut written = 0usize;
        loop {
            match self.commands.try_recv() {
                Ok(WsCommand::Send(frame)) => {
                    log::debug!("Relay <- {}", preview(&frame));
                    if let Err(e) = self.socket.write(Message::Text(frame)) {
                        log::error!("Relay write failed: {}", e);
                        return ControlFlow::Break(());
                    }
                    written += 1;
                }
                Ok(WsCommand::Close) => {
                    let _ = self.socket.close(None);
                    let _ = self.socket.flush();
                    return ControlFlow::Break(());
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return ControlFlow::Break(()),
            }
        }

        if written > 0 {
            if let Err(e) = self.socket.flush() {
                log::error!("Relay flush failed after {} frames: {}", written, e);
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn read_once(&mut self) -> ControlFlow<()> {
        match self.socket.read() {
            Ok(Message::Text(frame)) => {
                log::debug!("Relay -> {}", preview(&frame));
                if self.events.send(TransportEvent::Message(frame)).is_err() {
                    return ControlFlow::Break(());
                }
            }
            Ok(Message::Close(_)) => return ControlFlow::Break(()),
            // Pongs are queued by tungstenite and go out with the next flush.
            Ok(_) => {}
            Err(tungstenite::Error::Io(e))
                if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {}
            Err(e) => {
                log::error!("Relay read failed: {}", e);
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }
}

/// WebSocket [`Transport`] for native targets.
pub struct NativeWebSocket {
    state: ConnectionState,
    events: Vec<TransportEvent>,
    cmd_tx: Option<Sender<WsCommand>>,
    event_rx: Option<Receiver<TransportEvent>>,
    worker: Option<JoinHandle<()>>,
}

impl NativeWebSocket {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            events: Vec::new(),
            cmd_tx: None,
            event_rx: None,
            worker: None,
        }
    }

    /// Start connecting to a `ws://` or `wss://` relay. Progress is reported
    /// through `poll_events`.
    pub fn connect(&mut self, url: &str) -> Result<(), SyncError> {
        if self.cmd_tx.is_some() {
            return Err(SyncError::AlreadyConnected);
        }

        let url = Url::parse(url)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(SyncError::InvalidScheme(url.scheme().to_string()));
        }

        let (cmd_tx, cmd_rx) = channel();
        let (event_tx, event_rx) = channel();
        let url = url.to_string();
        let worker = thread::spawn(move || {
            if let Some(pump) = SocketPump::open(&url, cmd_rx, event_tx) {
                pump.run();
            }
        });

        self.state = ConnectionState::Connecting;
        self.cmd_tx = Some(cmd_tx);
        self.event_rx = Some(event_rx);
        self.worker = Some(worker);
        Ok(())
    }
}

impl Transport for NativeWebSocket {
    fn send(&mut self, message: &str) -> Result<(), SyncError> {
        match self.cmd_tx {
            Some(ref tx) => tx
                .send(WsCommand::Send(message.to_string()))
                .map_err(|_| SyncError::ChannelClosed),
            None => Err(SyncError::NotConnected),
        }
    }

    fn poll_events(&mut self) -> Vec<TransportEvent> {
        let mut finished = false;
        if let Some(ref rx) = self.event_rx {
            while let Ok(event) = rx.try_recv() {
                match &event {
                    TransportEvent::Connected => self.state = ConnectionState::Connected,
                    TransportEvent::Disconnected => {
                        self.state = ConnectionState::Disconnected;
                        finished = true;
                    }
                    TransportEvent::Error { .. } => {
                        self.state = ConnectionState::Error;
                        finished = true;
                    }
                    TransportEvent::Message(_) => {}
                }
                self.events.push(event);
            }
        }

        // The worker is done; a fresh `connect` may follow.
        if finished {
            self.cmd_tx = None;
            self.event_rx = None;
            self.worker = None;
        }

        std::mem::take(&mut self.events)
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    fn disconnect(&mut self) {
        if let Some(tx) = self.cmd_tx.take() {
            let _ = tx.send(WsCommand::Close);
        }
        self.event_rx = None;
        self.worker = None;
        if self.state != ConnectionState::Disconnected {
            self.events.push(TransportEvent::Disconnected);
        }
        self.state = ConnectionState::Disconnected;
    }
}

impl Default for NativeWebSocket {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for NativeWebSocket {
    fn drop(&mut self) {
        self.disconnect();
    }
}
