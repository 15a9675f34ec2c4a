//! runbridge Core Types
//!
//! This crate provides the leaf types shared by the adapter layer:
//! - Error types
//! - The incoming invocation and its response/log sinks
//! - Header folding and outgoing header records
//! - One-shot body streams and blobs
//! - Abort controller and signal

pub mod abort;
pub mod body;
pub mod error;
pub mod headers;
pub mod invocation;
pub mod sink;

pub use abort::{AbortController, AbortSignal};
pub use body::{Blob, BodyStream, ByteStream};
pub use error::{Error, Result};
pub use headers::{OutgoingHeaderValue, OutgoingHeaders};
pub use invocation::{IncomingInvocation, InvocationContext};
pub use sink::{LogEntry, LogSink, OutgoingBody, ResponseSink, SinkGuard};
