//! Chunked request/response transfer between a streaming client and server.
//!
//! The client asks for one chunk at a time by sending its byte size. The server
//! answers with plain byte-stream segments; the client infers completion from
//! the byte count alone.

pub mod client;
pub mod server;
pub mod session;
pub mod wire;

pub use client::{Chunk, ChunkReceiver, CompletedChunk, ThroughputSample};
pub use server::{ChunkSender, SegmentSink, SendProgress};
pub use session::{SessionEffect, SessionEvent, SessionState, transition};
pub use wire::{CHUNK_REQUEST_LEN, ChunkRequest};

/// Errors from the chunk transfer protocol.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    /// A request was issued while another chunk was still in flight.
    #[error("Chunk {index} still outstanding: {received} of {requested} bytes received")]
    RequestOutstanding {
        index: u64,
        requested: u32,
        received: u64,
    },

    /// The connection closed before the outstanding chunk completed.
    #[error("Connection closed during chunk {index}: {received} of {requested} bytes received")]
    ConnectionClosed {
        index: u64,
        requested: u32,
        received: u64,
    },

    #[error("Malformed chunk request: {reason}")]
    Decode { reason: String },
}
