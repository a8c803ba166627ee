//! Server network layer handling TCP connections and game loop coordination
//!
//! Every connection gets a reader task that decodes newline-delimited JSON
//! into [`ClientMessage`]s and a writer task fed by an unbounded channel of
//! pre-encoded lines. The game loop and the ping task run on their own
//! intervals. All of them share the [`Session`] behind one mutex and a
//! [`Shutdown`] flag; messages are dispatched only after the session lock has
//! been released.

use crate::client_manager::ClientId;
use crate::config::ServerConfig;
use crate::session::{Outbound, Recipient, Session};
use log::{debug, error, info, warn};
use shared::{decode_message, encode_message, ClientMessage, MAX_MESSAGE_BYTES};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::AbortHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Running flag shared by every server task
#[derive(Debug)]
pub struct Shutdown {
    running: AtomicBool,
    notify: Notify,
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            notify: Notify::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Clears the flag and wakes every task waiting in [`Shutdown::stopped`].
    pub fn trigger(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Resolves once the flag has been cleared.
    pub async fn stopped(&self) {
        loop {
            let notified = self.notify.notified();
            if !self.is_running() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Outgoing half of a live connection
struct Connection {
    tx: mpsc::UnboundedSender<String>,
    reader: Option<AbortHandle>,
}

type Connections = Arc<Mutex<HashMap<ClientId, Connection>>>;

/// Main server coordinating networking and game simulation
pub struct Server {
    listener: TcpListener,
    session: Arc<Mutex<Session>>,
    connections: Connections,
    shutdown: Arc<Shutdown>,
    tick_duration: Duration,
    ping_interval: Duration,
}

impl Server {
    pub async fn bind(config: &ServerConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind(config.bind_addr()).await?;
        info!("Server listening on {}", listener.local_addr()?);

        Ok(Server {
            listener,
            session: Arc::new(Mutex::new(Session::new(config.session_config()))),
            connections: Arc::new(Mutex::new(HashMap::new())),
            shutdown: Arc::new(Shutdown::new()),
            tick_duration: config.tick_duration(),
            ping_interval: config.ping_interval,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle for stopping the server from another task
    pub fn shutdown_handle(&self) -> Arc<Shutdown> {
        Arc::clone(&self.shutdown)
    }

    pub fn session(&self) -> Arc<Mutex<Session>> {
        Arc::clone(&self.session)
    }

    /// Spawns the fixed-rate game loop
    fn spawn_game_loop(&self) -> tokio::task::JoinHandle<()> {
        let session = Arc::clone(&self.session);
        let connections = Arc::clone(&self.connections);
        let shutdown = Arc::clone(&self.shutdown);
        let tick_duration = self.tick_duration;

        tokio::spawn(async move {
            let mut ticker = interval(tick_duration);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut last_tick = Instant::now();

            loop {
                tokio::select! {
                    _ = shutdown.stopped() => break,
                    _ = ticker.tick() => {}
                }

                let now = Instant::now();
                let elapsed_ms = now.duration_since(last_tick).as_millis() as u64;
                last_tick = now;

                let outbound = session.lock().await.tick(now, elapsed_ms);
                dispatch(&connections, outbound).await;
            }
            debug!("Game loop stopped");
        })
    }

    /// Spawns the liveness task: pings everyone, drops silent clients
    fn spawn_ping_task(&self) -> tokio::task::JoinHandle<()> {
        let session = Arc::clone(&self.session);
        let connections = Arc::clone(&self.connections);
        let shutdown = Arc::clone(&self.shutdown);
        let ping_interval = self.ping_interval;

        tokio::spawn(async move {
            let mut ticker = interval(ping_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // the first tick fires immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.stopped() => break,
                    _ = ticker.tick() => {}
                }

                let (outbound, dropped) = session.lock().await.heartbeat(Instant::now());
                {
                    let mut connections = connections.lock().await;
                    for client_id in dropped {
                        if let Some(connection) = connections.remove(&client_id) {
                            if let Some(reader) = connection.reader {
                                reader.abort();
                            }
                        }
                    }
                }
                dispatch(&connections, outbound).await;
            }
            debug!("Ping task stopped");
        })
    }

    /// Registers a new connection and starts its reader and writer tasks
    async fn handle_connection(&self, mut stream: TcpStream, addr: SocketAddr) {
        let connected = self.session.lock().await.connect(addr, Instant::now());
        let (client_id, outbound) = match connected {
            Ok(accepted) => accepted,
            Err(rejection) => {
                if let Ok(line) = encode_message(&rejection) {
                    if let Err(e) = stream.write_all(line.as_bytes()).await {
                        debug!("Failed to send rejection to {}: {}", addr, e);
                    }
                }
                return;
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
        }
        let (read_half, mut write_half) = stream.into_split();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                if let Err(e) = write_half.write_all(line.as_bytes()).await {
                    debug!("Write to client {} failed: {}", client_id, e);
                    break;
                }
            }
            if let Err(e) = write_half.shutdown().await {
                debug!("Failed to close connection to client {}: {}", client_id, e);
            }
        });

        self.connections
            .lock()
            .await
            .insert(client_id, Connection { tx, reader: None });
        dispatch(&self.connections, outbound).await;

        let reader = self.spawn_reader(client_id, read_half);
        if let Some(connection) = self.connections.lock().await.get_mut(&client_id) {
            connection.reader = Some(reader);
        }
    }

    fn spawn_reader(&self, client_id: ClientId, read_half: tokio::net::tcp::OwnedReadHalf) -> AbortHandle {
        let session = Arc::clone(&self.session);
        let connections = Arc::clone(&self.connections);
        let shutdown = Arc::clone(&self.shutdown);

        let handle = tokio::spawn(async move {
            let mut reader = BufReader::new(read_half);
            let mut buf = Vec::new();

            loop {
                let next = tokio::select! {
                    _ = shutdown.stopped() => break,
                    next = read_message(&mut reader, &mut buf) => next,
                };

                match next {
                    Ok(Some(message)) => {
                        let outbound = session
                            .lock()
                            .await
                            .handle_message(client_id, message, Instant::now());
                        dispatch(&connections, outbound).await;
                    }
                    Ok(None) => {
                        debug!("Client {} closed the connection", client_id);
                        break;
                    }
                    Err(e) => {
                        warn!("Read from client {} failed: {}", client_id, e);
                        break;
                    }
                }
            }

            let outbound = session.lock().await.disconnect(client_id, Instant::now());
            connections.lock().await.remove(&client_id);
            dispatch(&connections, outbound).await;
        });
        handle.abort_handle()
    }

    /// Main server loop: accepts connections until the shutdown flag clears
    pub async fn run(self) -> std::io::Result<()> {
        let game_loop = self.spawn_game_loop();
        let ping_task = self.spawn_ping_task();

        info!("Server started successfully");

        loop {
            tokio::select! {
                _ = self.shutdown.stopped() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!("Accepted connection from {}", addr);
                        self.handle_connection(stream, addr).await;
                    }
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                },
            }
        }

        info!("Server shutting down");
        for (_, connection) in self.connections.lock().await.drain() {
            if let Some(reader) = connection.reader {
                reader.abort();
            }
        }
        let _ = game_loop.await;
        let _ = ping_task.await;
        Ok(())
    }
}

/// Reads lines until one decodes into a [`ClientMessage`]
///
/// At most `MAX_MESSAGE_BYTES` of a line are buffered; the rest of an
/// oversized line is skipped unread. Oversized, non-UTF-8 and malformed lines
/// are dropped. Returns `Ok(None)` at the end of the stream.
pub async fn read_message<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Option<ClientMessage>>
where
    R: AsyncBufRead + Unpin,
{
    let limit = MAX_MESSAGE_BYTES as u64 + 1;
    loop {
        buf.clear();
        if (&mut *reader).take(limit).read_until(b'\n', buf).await? == 0 {
            return Ok(None);
        }
        if !buf.ends_with(b"\n") && buf.len() as u64 >= limit {
            debug!("Dropping oversized message (over {} bytes)", MAX_MESSAGE_BYTES);
            if !skip_line(reader).await? {
                return Ok(None);
            }
            continue;
        }

        let line = match std::str::from_utf8(buf) {
            Ok(line) => line,
            Err(e) => {
                debug!("Dropping message that is not UTF-8: {}", e);
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match decode_message::<ClientMessage>(line) {
            Ok(message) => return Ok(Some(message)),
            Err(e) => debug!("Dropping malformed message: {}", e),
        }
    }
}

/// Discards input up to and including the next newline. Returns false if the
/// stream ended first.
async fn skip_line<R>(reader: &mut R) -> std::io::Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(false);
        }
        match available.iter().position(|byte| *byte == b'\n') {
            Some(end) => {
                reader.consume(end + 1);
                return Ok(true);
            }
            None => {
                let skipped = available.len();
                reader.consume(skipped);
            }
        }
    }
}

/// Encodes each message once and queues it on the matching connections
async fn dispatch(connections: &Mutex<HashMap<ClientId, Connection>>, outbound: Vec<Outbound>) {
    if outbound.is_empty() {
        return;
    }

    let connections = connections.lock().await;
    for Outbound { recipient, message } in outbound {
        let line = match encode_message(&message) {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to encode {:?}: {}", message, e);
                continue;
            }
        };

        match recipient {
            Recipient::Client(client_id) => {
                if let Some(connection) = connections.get(&client_id) {
                    let _ = connection.tx.send(line);
                }
            }
            Recipient::All => {
                for connection in connections.values() {
                    let _ = connection.tx.send(line.clone());
                }
            }
        }
    }
}
