//! Persistent broker connection with automatic reconnection.
//!
//! [`ConnectionManager`] owns the single live connection handle. Connect
//! attempts retry transient failures forever under a [`ReconnectPolicy`];
//! failure signals raised by the live handle make the manager drop it and
//! connect again in the background.
//!
//! Locking: `inner` guards the state machine and the handle and is never held
//! across an `.await`. `connect_gate` serializes connect attempts with each
//! other and is held for the whole attempt, retry waits included; `dispose`
//! does not take it. The watcher task is never aborted while it handles a
//! signal; `dispose` asks it to stop and an in-flight reconnect discards its
//! own handle when it sees the terminal state.

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ConnectionConfig;
use crate::error::{ConnectionError, Result};
use crate::policy::ReconnectPolicy;
use crate::transport::{
    BrokerChannel, BrokerConnection, ConnectionFactory, FailureSignal, FailureSink,
};

/// Callback fired once per failure episode after the connection is back.
pub type ReconnectListener = Arc<dyn Fn() + Send + Sync>;

/// Lifecycle of the managed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No live connection (startup, or after a failure signal)
    Disconnected,
    /// A connect attempt succeeded and the handle is in use
    Connected,
    /// Terminal: disposed, never reconnects again
    Disposed,
}

struct Inner {
    state: ConnectionState,
    connection: Option<Arc<dyn BrokerConnection>>,
    /// Bumped on every successful connect; failure sinks carry it
    generation: u64,
    /// Latched by a failure signal, cleared by the next successful connect
    failed: bool,
}

enum Commit {
    Connected { endpoint: String, reconnected: bool },
    Discard(Arc<dyn BrokerConnection>, &'static str),
}

/// Keeps one logical broker connection alive across network failures.
pub struct ConnectionManager {
    factory: Arc<dyn ConnectionFactory>,
    policy: ReconnectPolicy,
    inner: Mutex<Inner>,
    connect_gate: tokio::sync::Mutex<()>,
    signal_tx: mpsc::UnboundedSender<FailureSignal>,
    signal_rx: Mutex<Option<mpsc::UnboundedReceiver<FailureSignal>>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
    shutdown: Arc<Notify>,
    listeners: RwLock<Vec<ReconnectListener>>,
    this: Weak<ConnectionManager>,
}

impl ConnectionManager {
    /// Create a manager. No connection is attempted until [`try_connect`](Self::try_connect).
    pub fn new(factory: Arc<dyn ConnectionFactory>, policy: ReconnectPolicy) -> Arc<Self> {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();

        Arc::new_cyclic(|this| Self {
            factory,
            policy,
            inner: Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                connection: None,
                generation: 0,
                failed: false,
            }),
            connect_gate: tokio::sync::Mutex::new(()),
            signal_tx,
            signal_rx: Mutex::new(Some(signal_rx)),
            watcher: Mutex::new(None),
            shutdown: Arc::new(Notify::new()),
            listeners: RwLock::new(Vec::new()),
            this: this.clone(),
        })
    }

    /// Create a manager using the reconnect policy described by `config`.
    pub fn from_config(factory: Arc<dyn ConnectionFactory>, config: &ConnectionConfig) -> Arc<Self> {
        Self::new(factory, config.reconnect_policy())
    }

    /// True iff connected and the live handle reports itself open.
    pub fn is_connected(&self) -> bool {
        let inner = self.inner.lock();
        inner.state == ConnectionState::Connected
            && inner.connection.as_ref().is_some_and(|c| c.is_open())
    }

    /// Current state machine value.
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Endpoint of the live handle, if any.
    pub fn endpoint(&self) -> Option<String> {
        self.inner
            .lock()
            .connection
            .as_ref()
            .map(|c| c.endpoint().to_string())
    }

    /// The reconnect policy in use.
    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Register a callback for "reconnected after failure".
    ///
    /// Called synchronously on the task that completed the reconnect, with no
    /// manager lock held, so the callback may call back into the manager.
    pub fn on_reconnected<F>(&self, listener: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.listeners.write().push(Arc::new(listener));
    }

    /// Open a channel over the live connection.
    ///
    /// Fails with [`ConnectionError::Disposed`] once the manager is disposed
    /// and with [`ConnectionError::NotConnected`] while no open handle exists.
    pub async fn create_channel(&self) -> Result<Box<dyn BrokerChannel>> {
        let connection = {
            let inner = self.inner.lock();
            match (inner.state, inner.connection.as_ref()) {
                (ConnectionState::Disposed, _) => return Err(ConnectionError::Disposed),
                (ConnectionState::Connected, Some(c)) if c.is_open() => c.clone(),
                _ => return Err(ConnectionError::NotConnected),
            }
        };

        connection.create_channel().await
    }

    /// Connect, or force a reconnect if already connected.
    ///
    /// Transient failures are retried forever with the policy's delay between
    /// attempts; any other failure aborts and returns `false`. Returns `false`
    /// without doing anything once disposed.
    pub async fn try_connect(&self) -> bool {
        self.connect(None).await
    }

    /// Connect unless an open connection is already live.
    ///
    /// Waits for any connect attempt in progress and re-checks afterwards, so
    /// concurrent callers share one connection instead of replacing each
    /// other's. Returns `false` once disposed or when connecting failed.
    pub async fn ensure_connected(&self) -> bool {
        let _gate = self.connect_gate.lock().await;
        if self.is_connected() {
            return true;
        }
        self.connect_locked(None).await
    }

    /// Dispose the manager. Idempotent and terminal.
    ///
    /// Errors raised while releasing the handle are logged, never returned.
    pub async fn dispose(&self) {
        let connection = {
            let mut inner = self.inner.lock();
            if inner.state == ConnectionState::Disposed {
                return;
            }
            inner.state = ConnectionState::Disposed;
            inner.connection.take()
        };

        // notify_one keeps a permit, so a watcher busy with a signal still
        // stops once it is done.
        self.shutdown.notify_one();
        drop(self.watcher.lock().take());

        if let Some(connection) = connection {
            Self::release(connection).await;
        }

        info!("Broker connection manager disposed");
    }

    async fn connect(&self, expected_generation: Option<u64>) -> bool {
        let _gate = self.connect_gate.lock().await;
        self.connect_locked(expected_generation).await
    }

    /// Connect attempt body; the caller holds `connect_gate`.
    async fn connect_locked(&self, expected_generation: Option<u64>) -> bool {
        let previous = {
            let mut inner = self.inner.lock();
            if inner.state == ConnectionState::Disposed {
                info!("Broker client is disposed. No action will be taken.");
                return false;
            }
            if let Some(expected) = expected_generation {
                if inner.generation != expected {
                    debug!(
                        generation = inner.generation,
                        "Connection was replaced while the failure was queued"
                    );
                    return inner.state == ConnectionState::Connected;
                }
            }
            inner.state = ConnectionState::Disconnected;
            inner.connection.take()
        };

        if let Some(previous) = previous {
            Self::release(previous).await;
        }

        self.ensure_watcher();

        info!("Trying to connect to the broker...");

        let Some(connection) = self.connect_with_retry().await else {
            return false;
        };

        let commit = {
            let mut inner = self.inner.lock();
            if inner.state == ConnectionState::Disposed {
                Commit::Discard(connection, "disposed while connecting")
            } else if !connection.is_open() {
                inner.failed = true;
                Commit::Discard(connection, "connection closed right after opening")
            } else {
                inner.generation += 1;
                connection.register_failure_sink(FailureSink::new(
                    self.signal_tx.clone(),
                    inner.generation,
                ));
                let endpoint = connection.endpoint().to_string();
                inner.connection = Some(connection);
                inner.state = ConnectionState::Connected;
                Commit::Connected {
                    endpoint,
                    reconnected: std::mem::take(&mut inner.failed),
                }
            }
        };

        match commit {
            Commit::Connected {
                endpoint,
                reconnected,
            } => {
                info!(
                    endpoint = %endpoint,
                    "Broker client acquired a persistent connection and is subscribed to failure signals"
                );
                if reconnected {
                    self.notify_reconnected();
                }
                true
            }
            Commit::Discard(connection, reason) => {
                error!(reason, "Could not connect to the broker");
                Self::release(connection).await;
                false
            }
        }
    }

    async fn connect_with_retry(&self) -> Option<Arc<dyn BrokerConnection>> {
        let mut attempt: u32 = 0;

        loop {
            if self.state() == ConnectionState::Disposed {
                info!("Broker client was disposed while connecting");
                return None;
            }

            match self.factory.create_connection().await {
                Ok(connection) => return Some(connection),
                Err(e) if self.policy.should_retry(&e) => {
                    let delay = self.policy.delay_for_attempt(attempt);
                    warn!(
                        error = %e,
                        attempt = attempt + 1,
                        delay_secs = delay.as_secs_f64(),
                        "Broker client could not connect. Waiting to try again..."
                    );
                    tokio::time::sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(e) => {
                    error!(error = %e, "Could not connect to the broker");
                    return None;
                }
            }
        }
    }

    async fn handle_failure(&self, signal: FailureSignal) {
        {
            let mut inner = self.inner.lock();
            if inner.state == ConnectionState::Disposed {
                info!("Broker client is disposed. No action will be taken.");
                return;
            }
            if signal.generation != inner.generation {
                debug!(kind = %signal.kind, "Ignoring failure signal from a replaced connection");
                return;
            }
            inner.failed = true;
            inner.state = ConnectionState::Disconnected;
        }

        warn!(kind = %signal.kind, "Broker connection failed. Trying to re-connect...");

        if !self.connect(Some(signal.generation)).await {
            error!(kind = %signal.kind, "Re-connect after broker failure did not succeed");
        }
    }

    fn ensure_watcher(&self) {
        let Some(mut rx) = self.signal_rx.lock().take() else {
            return;
        };
        let this = self.this.clone();
        let shutdown = self.shutdown.clone();

        let handle = tokio::spawn(async move {
            loop {
                let signal = tokio::select! {
                    _ = shutdown.notified() => break,
                    signal = rx.recv() => match signal {
                        Some(signal) => signal,
                        None => break,
                    },
                };
                let Some(manager) = this.upgrade() else {
                    break;
                };
                manager.handle_failure(signal).await;
            }
            debug!("Failure watcher stopped");
        });

        *self.watcher.lock() = Some(handle);
    }

    fn notify_reconnected(&self) {
        let listeners: Vec<ReconnectListener> = self.listeners.read().clone();
        for listener in listeners {
            listener();
        }
    }

    async fn release(connection: Arc<dyn BrokerConnection>) {
        if let Err(e) = connection.close().await {
            error!(
                error = %e,
                endpoint = %connection.endpoint(),
                "Failed to release broker connection"
            );
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.get_mut().take() {
            watcher.abort();
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ConnectionManager")
            .field("state", &inner.state)
            .field("generation", &inner.generation)
            .field("failed", &inner.failed)
            .field("policy", &self.policy)
            .finish()
    }
}
