//! In-memory `Connector` whose sockets are driven by the test.
//!
//! Every `open` is recorded; the test injects socket events and inspects
//! the commands the manager wrote.

use std::sync::{Arc, Mutex};

use medichat::chat_client::connection::{
    Connector, SocketCommand, SocketEvent, SocketHandle, ABNORMAL_CLOSURE,
};
use tokio::sync::mpsc;

/// How a freshly opened socket behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Stays connecting until the test calls `open()`
    Manual,
    /// Reports `Opened` immediately
    AutoOpen,
    /// Fails the handshake: `Error` then `Closed { 1006 }`
    Refuse,
}

/// Test side of one socket
#[derive(Clone)]
pub struct ScriptedSocket {
    pub url: String,
    events: mpsc::UnboundedSender<SocketEvent>,
    commands: Arc<Mutex<mpsc::UnboundedReceiver<SocketCommand>>>,
}

impl ScriptedSocket {
    pub fn open(&self) {
        let _ = self.events.send(SocketEvent::Opened);
    }

    pub fn frame(&self, raw: &str) {
        let _ = self.events.send(SocketEvent::Frame(raw.to_string()));
    }

    pub fn error(&self, detail: &str) {
        let _ = self.events.send(SocketEvent::Error(detail.to_string()));
    }

    pub fn close(&self, code: u16) {
        let _ = self.events.send(SocketEvent::Closed {
            code,
            reason: String::new(),
        });
    }

    /// Commands written since the last call
    pub fn drain_commands(&self) -> Vec<SocketCommand> {
        let mut commands = self.commands.lock().unwrap();
        let mut drained = Vec::new();
        while let Ok(command) = commands.try_recv() {
            drained.push(command);
        }
        drained
    }

    /// Text frames written since the last drain, parsed as JSON
    pub fn sent_frames(&self) -> Vec<serde_json::Value> {
        self.drain_commands()
            .into_iter()
            .filter_map(|command| match command {
                SocketCommand::Send(raw) => serde_json::from_str(&raw).ok(),
                SocketCommand::Close { .. } => None,
            })
            .collect()
    }

    /// Whether the manager has released this socket
    pub fn is_released(&self) -> bool {
        self.events.is_closed()
    }
}

#[derive(Clone)]
pub struct ScriptedConnector {
    behavior: Behavior,
    sockets: Arc<Mutex<Vec<ScriptedSocket>>>,
}

impl ScriptedConnector {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            sockets: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Number of sockets opened so far
    pub fn opened(&self) -> usize {
        self.sockets.lock().unwrap().len()
    }

    pub fn socket(&self, index: usize) -> ScriptedSocket {
        self.sockets.lock().unwrap()[index].clone()
    }

    pub fn last(&self) -> ScriptedSocket {
        self.sockets
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no socket opened yet")
    }
}

impl Connector for ScriptedConnector {
    fn open(&self, url: &str) -> SocketHandle {
        let (handle, ends) = SocketHandle::pair();
        let socket = ScriptedSocket {
            url: url.to_string(),
            events: ends.events,
            commands: Arc::new(Mutex::new(ends.commands)),
        };

        match self.behavior {
            Behavior::Manual => {}
            Behavior::AutoOpen => socket.open(),
            Behavior::Refuse => {
                socket.error("connection refused");
                socket.close(ABNORMAL_CLOSURE);
            }
        }

        self.sockets.lock().unwrap().push(socket);
        handle
    }
}
