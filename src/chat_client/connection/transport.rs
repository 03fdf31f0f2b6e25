//! Socket transport seam.
//!
//! A [`Connector`] opens a socket and hands back a [`SocketHandle`]
//! immediately, the way a browser `WebSocket` constructor does; the
//! outcome of the handshake arrives later as a [`SocketEvent`].

use std::sync::Once;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// Close code for an intentional shutdown
pub const NORMAL_CLOSURE: u16 = 1000;
/// Close code reported when no close frame was received
pub const NO_STATUS: u16 = 1005;
/// Close code for a connection that dropped without a close handshake
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Event reported by an open socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// Handshake completed
    Opened,
    /// Inbound text frame
    Frame(String),
    /// Socket closed; no further events follow
    Closed { code: u16, reason: String },
    /// Transport-level failure; a `Closed` event follows
    Error(String),
}

/// Instruction for an open socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketCommand {
    /// Write a text frame
    Send(String),
    /// Close with the given code
    Close { code: u16, reason: String },
}

/// Caller's side of a socket
#[derive(Debug)]
pub struct SocketHandle {
    pub commands: mpsc::UnboundedSender<SocketCommand>,
    pub events: mpsc::UnboundedReceiver<SocketEvent>,
}

/// Transport's side of a socket
#[derive(Debug)]
pub struct SocketEnds {
    pub commands: mpsc::UnboundedReceiver<SocketCommand>,
    pub events: mpsc::UnboundedSender<SocketEvent>,
}

impl SocketHandle {
    /// Create a connected handle/ends pair
    pub fn pair() -> (SocketHandle, SocketEnds) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            SocketHandle {
                commands: command_tx,
                events: event_rx,
            },
            SocketEnds {
                commands: command_rx,
                events: event_tx,
            },
        )
    }
}

/// Opens sockets for the connection manager
pub trait Connector: Send + Sync + 'static {
    /// Start opening a socket to `url`; must not block
    fn open(&self, url: &str) -> SocketHandle;
}

/// WebSocket connector over `tokio-tungstenite`
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteConnector;

impl Connector for TungsteniteConnector {
    fn open(&self, url: &str) -> SocketHandle {
        install_crypto_provider();
        let (handle, ends) = SocketHandle::pair();
        tokio::spawn(run_socket(url.to_string(), ends));
        handle
    }
}

/// `wss` handshakes need a process-wide rustls provider; more than one
/// provider may be compiled in, so pick ring explicitly.
fn install_crypto_provider() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        // Err means another provider is already installed, which is fine.
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

async fn run_socket(url: String, ends: SocketEnds) {
    let SocketEnds {
        mut commands,
        events,
    } = ends;

    let stream = tokio::select! {
        result = tokio_tungstenite::connect_async(url.as_str()) => match result {
            Ok((stream, _response)) => stream,
            Err(e) => {
                let _ = events.send(SocketEvent::Error(e.to_string()));
                let _ = events.send(SocketEvent::Closed {
                    code: ABNORMAL_CLOSURE,
                    reason: "handshake failed".to_string(),
                });
                return;
            }
        },
        command = commands.recv() => {
            // Closed (or dropped) while the handshake was still running.
            let (code, reason) = match command {
                Some(SocketCommand::Close { code, reason }) => (code, reason),
                _ => (ABNORMAL_CLOSURE, "closed before open".to_string()),
            };
            let _ = events.send(SocketEvent::Closed { code, reason });
            return;
        }
    };

    let _ = events.send(SocketEvent::Opened);
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(SocketCommand::Send(text)) => {
                    if let Err(e) = write.send(WsMessage::Text(text.into())).await {
                        let _ = events.send(SocketEvent::Error(e.to_string()));
                        let _ = events.send(SocketEvent::Closed {
                            code: ABNORMAL_CLOSURE,
                            reason: "write failed".to_string(),
                        });
                        return;
                    }
                }
                Some(SocketCommand::Close { code, reason }) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.clone().into(),
                    };
                    let _ = write.send(WsMessage::Close(Some(frame))).await;
                    let _ = write.close().await;
                    let _ = events.send(SocketEvent::Closed { code, reason });
                    return;
                }
                None => {
                    let _ = write.send(WsMessage::Close(None)).await;
                    return;
                }
            },
            inbound = read.next() => match inbound {
                Some(Ok(WsMessage::Text(text))) => {
                    let _ = events.send(SocketEvent::Frame(text.as_str().to_owned()));
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.as_str().to_owned()))
                        .unwrap_or((NO_STATUS, String::new()));
                    let _ = events.send(SocketEvent::Closed { code, reason });
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = events.send(SocketEvent::Error(e.to_string()));
                    let _ = events.send(SocketEvent::Closed {
                        code: ABNORMAL_CLOSURE,
                        reason: "read failed".to_string(),
                    });
                    return;
                }
                None => {
                    let _ = events.send(SocketEvent::Closed {
                        code: ABNORMAL_CLOSURE,
                        reason: "stream ended".to_string(),
                    });
                    return;
                }
            }
        }
    }
}
