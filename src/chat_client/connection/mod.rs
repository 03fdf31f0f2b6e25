//! # Connection Manager
//!
//! Owns at most one live socket for the active chat target and keeps it
//! alive: exponential-backoff reconnection, online/offline awareness and a
//! simulated mode when the backend is unreachable.
//!
//! ## Architecture
//!
//! A single spawned task owns the socket, the reconnect timer, and the
//! network and fallback receivers. It processes socket events, timer
//! expiry, connectivity changes and caller commands one at a time, in that
//! priority. The public [`ConnectionManager`] is a handle to that task.
//!
//! Sends do not go through the task: the task publishes the open socket's
//! writer, and [`ConnectionManager::send`] writes to it directly, so a send
//! answers synchronously.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use medichat::chat_client::connection::{ConnectionManager, TungsteniteConnector};
//! use medichat::shared::config::ClientConfig;
//!
//! # async fn run() -> Result<(), medichat::shared::error::ChatError> {
//! let config = ClientConfig::builder()
//!     .auth_token("token")
//!     .local_user_id("u1")
//!     .peer_id("d1")
//!     .build()?;
//! let manager = ConnectionManager::new(config, Arc::new(TungsteniteConnector));
//! let _messages = manager.on_message(|message| println!("{}", message.text));
//! manager.connect().await?;
//! manager.send("hello", "d1");
//! manager.dispose().await;
//! # Ok(())
//! # }
//! ```

pub mod state;
pub mod transport;

pub use state::{ConnectionState, Notice, NoticeLevel};
pub use transport::{
    Connector, SocketCommand, SocketEvent, SocketHandle, TungsteniteConnector, ABNORMAL_CLOSURE,
    NORMAL_CLOSURE,
};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::chat_client::messaging::listeners::{ListenerRegistry, Subscription};
use crate::chat_client::messaging::simulated::{EchoSimulator, DEFAULT_REPLY_DELAY};
use crate::chat_client::messaging::MessageChannel;
use crate::chat_client::offline::retry::{ReconnectBackoff, ReconnectPolicy};
use crate::chat_client::sync::network_monitor::{NetworkMonitor, NetworkStatus};
use crate::chat_client::sync::presence::FallbackMode;
use crate::shared::config::ClientConfig;
use crate::shared::error::ChatError;
use crate::shared::messaging::IncomingMessage;

/// Tunables and collaborators of a [`ConnectionManager`]
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub policy: ReconnectPolicy,
    /// Delay of the canned reply in simulated mode
    pub reply_delay: Duration,
    /// Source of online/offline signals
    pub network: Option<NetworkMonitor>,
    /// Shared simulated-mode flag
    pub fallback: FallbackMode,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            policy: ReconnectPolicy::default(),
            reply_delay: DEFAULT_REPLY_DELAY,
            network: None,
            fallback: FallbackMode::default(),
        }
    }
}

enum Command {
    Connect {
        reply: oneshot::Sender<Result<(), ChatError>>,
    },
    Retry {
        reply: oneshot::Sender<Result<(), ChatError>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Reconfigure {
        config: Box<ClientConfig>,
        reply: oneshot::Sender<()>,
    },
    SendFailed,
    Settle {
        reply: oneshot::Sender<()>,
    },
    Shutdown,
}

/// Where a send goes right now
#[derive(Debug, Clone)]
enum Link {
    Closed,
    Socket {
        writer: mpsc::UnboundedSender<SocketCommand>,
        local_user_id: String,
    },
    Simulated {
        local_user_id: String,
    },
}

#[derive(Debug)]
struct Shared {
    link: Mutex<Link>,
}

impl Shared {
    fn link(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_link(&self, link: Link) {
        *self.link() = link;
    }
}

/// Handle to the connection task
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    shared: Arc<Shared>,
    channel: MessageChannel,
    states: ListenerRegistry<ConnectionState>,
    notices: ListenerRegistry<Notice>,
    simulator: EchoSimulator,
    fallback: FallbackMode,
    task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl ConnectionManager {
    /// Create the manager and spawn its task. Must be called inside a
    /// Tokio runtime. No socket is opened until [`connect`](Self::connect).
    pub fn new(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        Self::with_options(config, connector, ConnectionOptions::default())
    }

    pub fn with_options(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        options: ConnectionOptions,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let shared = Arc::new(Shared {
            link: Mutex::new(Link::Closed),
        });
        let channel = MessageChannel::new();
        let states = ListenerRegistry::new();
        let notices = ListenerRegistry::new();
        let simulator = EchoSimulator::new(options.reply_delay);

        let actor = Actor {
            config,
            connector,
            backoff: ReconnectBackoff::new(options.policy),
            socket: None,
            reconnect_at: None,
            target: false,
            state: state_tx,
            shared: shared.clone(),
            channel: channel.clone(),
            states: states.clone(),
            notices: notices.clone(),
            simulator: simulator.clone(),
            network: options.network.as_ref().map(NetworkMonitor::subscribe),
            fallback_changes: Some(options.fallback.subscribe()),
            fallback: options.fallback.clone(),
        };
        let task = tokio::spawn(actor.run(command_rx));

        Self {
            commands: command_tx,
            state: state_rx,
            shared,
            channel,
            states,
            notices,
            simulator,
            fallback: options.fallback,
            task: Some(task),
        }
    }

    /// Open a socket to the configured target, closing any existing one
    /// first.
    ///
    /// Fails with [`ChatError::Configuration`] when the auth token or the
    /// local user id is missing; the state then becomes `error`.
    pub async fn connect(&self) -> Result<(), ChatError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Connect { reply }, rx)
            .await
            .unwrap_or_else(|| Err(ChatError::transport("connection task stopped")))
    }

    /// Reset the attempt counter and connect, for use after the reconnect
    /// cap was reached
    pub async fn retry(&self) -> Result<(), ChatError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Retry { reply }, rx)
            .await
            .unwrap_or_else(|| Err(ChatError::transport("connection task stopped")))
    }

    /// Close with a normal-closure code and cancel any pending reconnect.
    /// Registered listeners stay registered.
    pub async fn disconnect(&self) {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Disconnect { reply }, rx).await;
    }

    /// Replace the configuration used by the next connect. Leaves the
    /// `error` state.
    pub async fn reconfigure(&self, config: ClientConfig) {
        let (reply, rx) = oneshot::channel();
        self.request(
            Command::Reconfigure {
                config: Box::new(config),
                reply,
            },
            rx,
        )
        .await;
    }

    /// Wait until every command sent so far and every socket event already
    /// received has been processed
    pub async fn settle(&self) {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Settle { reply }, rx).await;
    }

    async fn request<T>(&self, command: Command, rx: oneshot::Receiver<T>) -> Option<T> {
        self.commands.send(command).ok()?;
        rx.await.ok()
    }

    /// Write `text` for `receiver_id` over the open socket.
    ///
    /// Returns `false` when nothing is open; in that case a reconnect is
    /// scheduled if the connection had dropped.
    pub fn send(&self, text: &str, receiver_id: &str) -> bool {
        match self.try_send(text, receiver_id) {
            Ok(()) => true,
            Err(e) => {
                warn!(receiver_id, error = %e, "Send failed");
                false
            }
        }
    }

    /// [`send`](Self::send) with the reason for a failure
    pub fn try_send(&self, text: &str, receiver_id: &str) -> Result<(), ChatError> {
        let link = self.shared.link().clone();
        match link {
            Link::Socket {
                writer,
                local_user_id,
            } => {
                let frame = MessageChannel::encode(text, &local_user_id, receiver_id)?;
                if writer.send(SocketCommand::Send(frame)).is_err() {
                    let _ = self.commands.send(Command::SendFailed);
                    return Err(ChatError::delivery("socket is closing"));
                }
                debug!(receiver_id, "Frame written");
                Ok(())
            }
            Link::Simulated { local_user_id } => {
                self.simulator
                    .respond(&self.channel, &local_user_id, receiver_id, text);
                Ok(())
            }
            Link::Closed => {
                let _ = self.commands.send(Command::SendFailed);
                Err(ChatError::delivery("socket is not open"))
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn channel(&self) -> &MessageChannel {
        &self.channel
    }

    pub fn fallback(&self) -> &FallbackMode {
        &self.fallback
    }

    pub fn on_message<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&IncomingMessage) + Send + Sync + 'static,
    {
        self.channel.on_message(callback)
    }

    pub fn on_connection_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&bool) + Send + Sync + 'static,
    {
        self.channel.on_connection_change(callback)
    }

    pub fn on_state_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ConnectionState) + Send + Sync + 'static,
    {
        self.states.subscribe(callback)
    }

    /// User-facing notices (the equivalent of toasts)
    pub fn on_notice<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Notice) + Send + Sync + 'static,
    {
        self.notices.subscribe(callback)
    }

    /// Raise a notice on behalf of a collaborator
    pub fn notify(&self, notice: Notice) {
        self.notices.emit(&notice);
    }

    /// Close the connection, cancel every timer and stop the task
    pub async fn dispose(mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.simulator.cancel();
        if self.task.is_some() {
            let _ = self.commands.send(Command::Shutdown);
        }
    }
}

struct ActiveSocket {
    writer: mpsc::UnboundedSender<SocketCommand>,
    events: mpsc::UnboundedReceiver<SocketEvent>,
    open: bool,
}

struct Actor {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    backoff: ReconnectBackoff,
    socket: Option<ActiveSocket>,
    reconnect_at: Option<Instant>,
    /// A connection has been requested and not withdrawn
    target: bool,
    state: watch::Sender<ConnectionState>,
    shared: Arc<Shared>,
    channel: MessageChannel,
    states: ListenerRegistry<ConnectionState>,
    notices: ListenerRegistry<Notice>,
    simulator: EchoSimulator,
    network: Option<watch::Receiver<NetworkStatus>>,
    fallback_changes: Option<watch::Receiver<bool>>,
    fallback: FallbackMode,
}

impl Actor {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                biased;
                event = next_event(&mut self.socket) => self.on_socket_event(event),
                _ = sleep_until(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.on_reconnect_timer();
                }
                status = next_change(&mut self.network) => match status {
                    Some(status) => self.on_network(status),
                    None => self.network = None,
                },
                enabled = next_change(&mut self.fallback_changes) => match enabled {
                    Some(enabled) => self.on_fallback(enabled),
                    None => self.fallback_changes = None,
                },
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => {
                        self.disconnect();
                        break;
                    }
                    Some(command) => self.on_command(command),
                },
            }
        }
        debug!("Connection task stopped");
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Connect { reply } => {
                let _ = reply.send(self.connect());
            }
            Command::Retry { reply } => {
                info!("Manual reconnect requested");
                self.backoff.reset();
                let _ = reply.send(self.connect());
            }
            Command::Disconnect { reply } => {
                self.disconnect();
                let _ = reply.send(());
            }
            Command::Reconfigure { config, reply } => {
                self.config = *config;
                if self.current_state() == ConnectionState::Error {
                    self.set_state(ConnectionState::Idle);
                }
                let _ = reply.send(());
            }
            Command::SendFailed => self.on_send_failed(),
            Command::Settle { reply } => {
                let _ = reply.send(());
            }
            Command::Shutdown => {}
        }
    }

    fn connect(&mut self) -> Result<(), ChatError> {
        if let Err(e) = self.config.credentials() {
            error!(error = %e, "Cannot connect");
            self.target = false;
            self.set_state(ConnectionState::Error);
            self.notices.emit(&Notice::error(e.to_string()));
            return Err(e);
        }

        self.target = true;
        self.cancel_reconnect();
        if self.close_socket(NORMAL_CLOSURE, "reconnecting") {
            self.channel.notify_connection(false);
        }

        if self.simulated() {
            self.enter_simulated();
            Ok(())
        } else {
            self.open_socket()
        }
    }

    fn open_socket(&mut self) -> Result<(), ChatError> {
        let url = self.config.socket_url()?;
        info!(url = %self.config.redacted_socket_url(), "Opening chat socket");

        self.simulator.cancel();
        self.shared.set_link(Link::Closed);
        let SocketHandle { commands, events } = self.connector.open(&url);
        self.socket = Some(ActiveSocket {
            writer: commands,
            events,
            open: false,
        });
        self.set_state(ConnectionState::Connecting);
        Ok(())
    }

    /// Close the current socket, if any. Its remaining events are never
    /// read. Returns whether it was open.
    fn close_socket(&mut self, code: u16, reason: &str) -> bool {
        self.shared.set_link(Link::Closed);
        match self.socket.take() {
            Some(socket) => {
                let _ = socket.writer.send(SocketCommand::Close {
                    code,
                    reason: reason.to_string(),
                });
                socket.open
            }
            None => false,
        }
    }

    fn disconnect(&mut self) {
        let was_up = matches!(
            self.current_state(),
            ConnectionState::Connected | ConnectionState::Connecting
        );

        self.target = false;
        self.cancel_reconnect();
        self.simulator.cancel();
        self.close_socket(NORMAL_CLOSURE, "client disconnect");

        if self.current_state() != ConnectionState::Idle {
            self.set_state(ConnectionState::Disconnected);
        }
        if was_up {
            info!("Disconnected");
            self.channel.notify_connection(false);
        }
    }

    fn on_socket_event(&mut self, event: SocketEvent) {
        match event {
            SocketEvent::Opened => {
                let writer = match self.socket.as_mut() {
                    Some(socket) => {
                        socket.open = true;
                        socket.writer.clone()
                    }
                    None => return,
                };
                info!("Chat socket connected");
                self.backoff.reset();
                self.shared.set_link(Link::Socket {
                    writer,
                    local_user_id: self.config.local_user_id.clone().unwrap_or_default(),
                });
                self.set_state(ConnectionState::Connected);
                self.channel.notify_connection(true);
            }
            SocketEvent::Frame(raw) => {
                self.channel.dispatch_frame(&raw);
            }
            SocketEvent::Error(detail) => {
                let error = ChatError::transport(detail);
                warn!(error = %error, "Socket error");
                self.channel.notify_connection(false);
            }
            SocketEvent::Closed { code, reason } => {
                info!(code, reason = %reason, "Chat socket closed");
                self.socket = None;
                self.shared.set_link(Link::Closed);
                self.set_state(ConnectionState::Disconnected);
                self.channel.notify_connection(false);
                if code != NORMAL_CLOSURE && self.target {
                    self.schedule_reconnect();
                }
            }
        }
    }

    fn schedule_reconnect(&mut self) {
        if self.reconnect_at.is_some() {
            return;
        }

        match self.backoff.next_delay() {
            Some(delay) => {
                info!(
                    attempt = self.backoff.attempts() + 1,
                    max_attempts = self.backoff.policy().max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling reconnect"
                );
                self.reconnect_at = Some(Instant::now() + delay);
            }
            None => {
                warn!(
                    attempts = self.backoff.attempts(),
                    "Max reconnect attempts reached"
                );
                self.notices
                    .emit(&Notice::error("Could not reconnect to chat service"));
            }
        }
    }

    fn cancel_reconnect(&mut self) {
        if self.reconnect_at.take().is_some() {
            debug!("Pending reconnect cancelled");
        }
    }

    fn on_reconnect_timer(&mut self) {
        self.backoff.record_attempt();
        if !self.target || self.socket.is_some() {
            return;
        }
        debug!(attempt = self.backoff.attempts(), "Reconnecting");
        if self.simulated() {
            self.enter_simulated();
        } else if let Err(e) = self.open_socket() {
            error!(error = %e, "Reconnect failed");
            self.set_state(ConnectionState::Error);
        }
    }

    fn on_send_failed(&mut self) {
        if self.target
            && self.socket.is_none()
            && self.reconnect_at.is_none()
            && self.current_state() == ConnectionState::Disconnected
        {
            self.notices
                .emit(&Notice::warning("Connection lost. Reconnecting..."));
            self.schedule_reconnect();
        }
    }

    fn on_network(&mut self, status: NetworkStatus) {
        match status {
            NetworkStatus::Offline => {
                info!("Network went offline");
                self.channel.notify_connection(false);
            }
            NetworkStatus::Online => {
                info!("Network back online");
                let open = self.socket.as_ref().is_some_and(|s| s.open);
                if !self.target || open || self.in_simulated_link() {
                    return;
                }
                self.backoff.reset();
                self.cancel_reconnect();
                self.close_socket(NORMAL_CLOSURE, "reconnecting");
                if let Err(e) = self.open_socket() {
                    error!(error = %e, "Reconnect failed");
                    self.set_state(ConnectionState::Error);
                }
            }
        }
    }

    fn on_fallback(&mut self, enabled: bool) {
        if !self.target {
            return;
        }
        let open = self.socket.as_ref().is_some_and(|s| s.open);

        if enabled && !open && !self.in_simulated_link() {
            self.cancel_reconnect();
            self.close_socket(NORMAL_CLOSURE, "switching to simulated mode");
            self.enter_simulated();
        } else if !enabled && self.in_simulated_link() && !self.config.simulated {
            info!("Leaving simulated mode");
            self.channel.notify_connection(false);
            if let Err(e) = self.open_socket() {
                error!(error = %e, "Reconnect failed");
                self.set_state(ConnectionState::Error);
            }
        }
    }

    fn enter_simulated(&mut self) {
        info!("Connected in simulated mode");
        self.backoff.reset();
        self.shared.set_link(Link::Simulated {
            local_user_id: self.config.local_user_id.clone().unwrap_or_default(),
        });
        self.set_state(ConnectionState::Connected);
        self.channel.notify_connection(true);
    }

    fn simulated(&self) -> bool {
        self.config.simulated || self.fallback.is_enabled()
    }

    fn in_simulated_link(&self) -> bool {
        matches!(*self.shared.link(), Link::Simulated { .. })
    }

    fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = %previous, to = %next, "Connection state changed");
            self.states.emit(&next);
        }
    }
}

async fn next_event(socket: &mut Option<ActiveSocket>) -> SocketEvent {
    match socket {
        Some(socket) => socket.events.recv().await.unwrap_or(SocketEvent::Closed {
            code: ABNORMAL_CLOSURE,
            reason: "transport stopped".to_string(),
        }),
        None => std::future::pending().await,
    }
}

async fn next_change<T: Copy>(receiver: &mut Option<watch::Receiver<T>>) -> Option<T> {
    match receiver {
        Some(receiver) => match receiver.changed().await {
            Ok(()) => Some(*receiver.borrow_and_update()),
            Err(_) => None,
        },
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
