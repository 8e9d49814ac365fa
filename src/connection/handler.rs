//! Client Connection
//!
//! One task per client: decode frames from the socket, execute them and
//! write the replies back.
//!
//! ## Pipelining
//!
//! ```text
//!   read_buf ──► decode ──► execute ──► reply buffer
//!                  ▲                        │
//!                  └── more frames? ◄───────┘
//!                           │ no
//!                           ▼
//!                  flush replies, read more
//! ```
//!
//! Replies to pipelined commands are batched into one write. `QUIT` flushes
//! and closes; a malformed frame gets an error reply before the connection is
//! dropped, since the rest of the stream can't be resynchronized.

use crate::commands::CommandHandler;
use crate::protocol::{ParseError, RespParser, RespValue};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

/// Largest amount of unparsed input held for one client (64 KB)
const MAX_BUFFER_SIZE: usize = 64 * 1024;

/// Initial read buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Counters shared by every connection of a server.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    connections_accepted: AtomicU64,
    active_connections: AtomicU64,
    commands_processed: AtomicU64,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
}

/// A point-in-time copy of [`ConnectionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub connections_accepted: u64,
    pub active_connections: u64,
    pub commands_processed: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            commands_processed: self.commands_processed.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }

    fn opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    fn closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Socket failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The client sent a malformed frame
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// The client closed the socket in the middle of a frame
    #[error("connection closed mid-frame ({0} bytes pending)")]
    UnexpectedEof(usize),

    /// The client sent more unparsed data than allowed
    #[error("read buffer limit of {0} bytes exceeded")]
    BufferFull(usize),
}

/// What the read loop should do after a batch of frames.
enum Flow {
    Continue,
    Quit,
}

/// Serves one client.
pub struct ConnectionHandler {
    stream: TcpStream,
    addr: SocketAddr,
    read_buf: BytesMut,
    write_buf: BytesMut,
    commands: CommandHandler,
    parser: RespParser,
    stats: Arc<ConnectionStats>,
}

impl ConnectionHandler {
    /// Wraps an accepted socket.
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        commands: CommandHandler,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.opened();

        Self {
            stream,
            addr,
            read_buf: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            write_buf: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            commands,
            parser: RespParser::new(),
            stats,
        }
    }

    /// Serves the client until it disconnects or fails.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        debug!(client = %self.addr, "Client connected");

        let result = self.serve().await;
        if let Err(e) = &result {
            warn!(client = %self.addr, error = %e, "Connection error");
        } else {
            debug!(client = %self.addr, "Client disconnected");
        }

        self.stats.closed();
        result
    }

    async fn serve(&mut self) -> Result<(), ConnectionError> {
        loop {
            let flow = match self.execute_buffered() {
                Ok(flow) => flow,
                Err(e) => {
                    self.queue(&RespValue::error(format_args!("protocol error: {}", e)));
                    self.flush().await?;
                    return Err(e.into());
                }
            };
            self.flush().await?;

            if let Flow::Quit = flow {
                return Ok(());
            }
            if !self.fill().await? {
                return Ok(());
            }
        }
    }

    /// Executes every complete frame in the read buffer.
    fn execute_buffered(&mut self) -> Result<Flow, ParseError> {
        while let Some(frame) = self.parser.decode(&mut self.read_buf)? {
            let quit = is_quit(&frame);
            let reply = self.commands.execute(frame);
            self.stats.commands_processed.fetch_add(1, Ordering::Relaxed);
            self.queue(&reply);

            if quit {
                return Ok(Flow::Quit);
            }
        }
        trace!(client = %self.addr, pending = self.read_buf.len(), "Waiting for more input");
        Ok(Flow::Continue)
    }

    fn queue(&mut self, reply: &RespValue) {
        reply.write_to(&mut self.write_buf);
    }

    async fn flush(&mut self) -> Result<(), ConnectionError> {
        if self.write_buf.is_empty() {
            return Ok(());
        }
        let len = self.write_buf.len();
        self.stream.write_all(&self.write_buf).await?;
        self.write_buf.clear();
        self.stats
            .bytes_written
            .fetch_add(len as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Reads more input; `false` on a clean close.
    async fn fill(&mut self) -> Result<bool, ConnectionError> {
        if self.read_buf.len() >= MAX_BUFFER_SIZE {
            return Err(ConnectionError::BufferFull(MAX_BUFFER_SIZE));
        }
        self.read_buf.reserve(INITIAL_BUFFER_SIZE);

        let n = self.stream.read_buf(&mut self.read_buf).await?;
        if n == 0 {
            return match self.read_buf.len() {
                0 => Ok(false),
                pending => Err(ConnectionError::UnexpectedEof(pending)),
            };
        }

        self.stats.bytes_read.fetch_add(n as u64, Ordering::Relaxed);
        Ok(true)
    }
}

fn is_quit(frame: &RespValue) -> bool {
    match frame {
        RespValue::Array(args) => args
            .first()
            .and_then(RespValue::as_str)
            .is_some_and(|name| name.eq_ignore_ascii_case("QUIT")),
        _ => false,
    }
}

/// Serves one accepted client to completion.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    commands: CommandHandler,
    stats: Arc<ConnectionStats>,
) {
    if let Err(ConnectionError::Io(e)) = ConnectionHandler::new(stream, addr, commands, stats)
        .run()
        .await
    {
        if e.kind() != std::io::ErrorKind::ConnectionReset {
            info!(client = %addr, error = %e, "Connection dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expire::{RecordAccessor, SweepCoordinator};
    use crate::storage::MemoryStore;
    use std::time::Duration;
    use tokio::net::TcpListener;

    async fn create_test_server() -> (SocketAddr, Arc<ConnectionStats>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accessor = RecordAccessor::with_system_clock(Arc::new(MemoryStore::new()));
        let commands = CommandHandler::new(Arc::new(SweepCoordinator::new(Arc::new(accessor))));
        let stats = Arc::new(ConnectionStats::new());

        let server_stats = Arc::clone(&stats);
        tokio::spawn(async move {
            while let Ok((stream, client_addr)) = listener.accept().await {
                tokio::spawn(handle_connection(
                    stream,
                    client_addr,
                    commands.clone(),
                    Arc::clone(&server_stats),
                ));
            }
        });

        (addr, stats)
    }

    /// A minimal client that decodes replies with the server's own parser.
    struct TestClient {
        stream: TcpStream,
        buf: BytesMut,
    }

    impl TestClient {
        async fn connect(addr: SocketAddr) -> Self {
            Self {
                stream: TcpStream::connect(addr).await.unwrap(),
                buf: BytesMut::new(),
            }
        }

        async fn send(&mut self, args: &[&str]) {
            let frame = RespValue::Array(args.iter().map(|a| RespValue::bulk_string(a.to_string())).collect());
            self.stream.write_all(&frame.serialize()).await.unwrap();
        }

        async fn reply(&mut self) -> Option<RespValue> {
            let parser = RespParser::new();
            loop {
                if let Some(frame) = parser.decode(&mut self.buf).unwrap() {
                    return Some(frame);
                }
                let read = self.stream.read_buf(&mut self.buf);
                match tokio::time::timeout(Duration::from_secs(2), read).await {
                    Ok(Ok(0)) | Err(_) => return None,
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => panic!("read failed: {}", e),
                }
            }
        }

        async fn call(&mut self, args: &[&str]) -> RespValue {
            self.send(args).await;
            self.reply().await.unwrap()
        }
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let (addr, _) = create_test_server().await;
        let mut client = TestClient::connect(addr).await;

        assert_eq!(client.call(&["PING"]).await, RespValue::pong());
    }

    #[tokio::test]
    async fn test_put_get_ttl() {
        let (addr, _) = create_test_server().await;
        let mut client = TestClient::connect(addr).await;

        assert_eq!(
            client.call(&["EBPUT", "test", "eb1", "A", "Hello World", "60"]).await,
            RespValue::ok()
        );
        assert_eq!(
            client.call(&["EBGET", "test", "eb1", "A"]).await,
            RespValue::Array(vec![RespValue::bulk_string("Hello World")])
        );
        assert_eq!(
            client.call(&["EBTTL", "test", "eb1", "A"]).await,
            RespValue::Integer(60)
        );
    }

    #[tokio::test]
    async fn test_pipelined_commands() {
        let (addr, _) = create_test_server().await;
        let mut client = TestClient::connect(addr).await;

        let mut batch = BytesMut::new();
        for args in [
            &["EBPUT", "test", "p", "a", "1", "KEEP"][..],
            &["EBPUT", "test", "p", "b", "2", "-1"][..],
            &["EBGET", "test", "p", "a", "b"][..],
        ] {
            RespValue::Array(args.iter().map(|a| RespValue::bulk_string(a.to_string())).collect())
                .write_to(&mut batch);
        }
        batch.extend_from_slice(b"EBTTL test p b\r\n");

        // Split the batch mid-frame so the server has to wait for the rest
        let (head, tail) = batch.split_at(20);
        client.stream.write_all(head).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        client.stream.write_all(tail).await.unwrap();

        assert_eq!(client.reply().await, Some(RespValue::ok()));
        assert_eq!(client.reply().await, Some(RespValue::ok()));
        assert_eq!(
            client.reply().await,
            Some(RespValue::Array(vec![
                RespValue::bulk_string("1"),
                RespValue::bulk_string("2"),
            ]))
        );
        assert_eq!(client.reply().await, Some(RespValue::Integer(-1)));
    }

    #[tokio::test]
    async fn test_quit_closes_connection() {
        let (addr, _) = create_test_server().await;
        let mut client = TestClient::connect(addr).await;

        assert_eq!(client.call(&["QUIT"]).await, RespValue::ok());
        assert_eq!(client.reply().await, None);
    }

    #[tokio::test]
    async fn test_protocol_error_reply() {
        let (addr, _) = create_test_server().await;
        let mut client = TestClient::connect(addr).await;

        client.stream.write_all(b"$-5\r\n").await.unwrap();
        let reply = client.reply().await.unwrap();
        assert_eq!(reply.error_code(), Some("ERR"));
        assert_eq!(client.reply().await, None);
    }

    #[tokio::test]
    async fn test_connection_stats() {
        let (addr, stats) = create_test_server().await;
        assert_eq!(stats.snapshot(), StatsSnapshot::default());

        let mut client = TestClient::connect(addr).await;
        client.call(&["PING"]).await;

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.connections_accepted, 1);
        assert_eq!(snapshot.active_connections, 1);
        assert_eq!(snapshot.commands_processed, 1);
        assert!(snapshot.bytes_read > 0);
        assert_eq!(snapshot.bytes_written, 7);

        drop(client);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(stats.snapshot().active_connections, 0);
    }
}
