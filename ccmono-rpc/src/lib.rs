//! ccmono-rpc - Bidirectional RPC server for cc-mono
//!
//! Newline-delimited JSON over any byte stream: stdin/stdout, or WebSocket
//! frames via the HTTP front-end. Commands dispatch on their own tasks;
//! agent events are pushed asynchronously on the same connection.

pub mod http;
pub mod protocol;
pub mod server;
pub mod transport;

pub use http::{router, serve, HttpState};
pub use protocol::{
    command, BashResult, ModelInfo, RpcCommand, RpcEvent, RpcImage, RpcResponse, RpcSessionState,
    SessionStats,
};
pub use server::{serve_stdio, RpcServer, ServerError};
pub use transport::{LineReader, LineWriter, TransportError};
