//! Connection Module
//!
//! Client connection management: one tokio task per accepted socket, each
//! decoding RESP frames and answering them through a shared
//! [`CommandHandler`](crate::commands::CommandHandler).
//!
//! ## Example
//!
//! ```no_run
//! use binexpire::commands::CommandHandler;
//! use binexpire::connection::{handle_connection, ConnectionStats};
//! use binexpire::expire::{RecordAccessor, SweepCoordinator};
//! use binexpire::storage::MemoryStore;
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! # async fn serve() -> std::io::Result<()> {
//! let accessor = RecordAccessor::with_system_clock(Arc::new(MemoryStore::new()));
//! let handler = CommandHandler::new(Arc::new(SweepCoordinator::new(Arc::new(accessor))));
//! let stats = Arc::new(ConnectionStats::new());
//!
//! let listener = TcpListener::bind("127.0.0.1:6379").await?;
//! loop {
//!     let (stream, addr) = listener.accept().await?;
//!     tokio::spawn(handle_connection(stream, addr, handler.clone(), Arc::clone(&stats)));
//! }
//! # }
//! ```

pub mod handler;

pub use handler::{
    handle_connection, ConnectionError, ConnectionHandler, ConnectionStats, StatsSnapshot,
};
