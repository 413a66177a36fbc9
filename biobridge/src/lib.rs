//! The `biobridge` crate connects a byte-stream connection to OpenSSL,
//! which does its I/O through synchronous BIO callbacks (bound by the
//! `openssl-sys` crate).
//!
//! A [`WriteBio`] collects what the engine writes until the connection
//! owner [flushes](WriteBio::flush) it; a [`ReadBio`] holds what the
//! owner [pumped](ReadBio::read_from_conn_once) from the connection until
//! the engine reads it. With nothing to hand over, a read signals "retry"
//! through the BIO's flags rather than blocking the engine. [`Bridge`]
//! owns one such pair over a shared [`Conn`].
//!
//! The engine never holds a pointer to an adapter: each BIO carries a
//! [`Token`] resolved through a process-wide [`Registry`], so a BIO that
//! outlives its adapter fails cleanly instead of dangling.

#![warn(clippy::undocumented_unsafe_blocks)]
#![warn(missing_docs)]

mod bio;
mod bridge;
mod conn;
mod error;
mod ffi;
mod read_bio;
mod registry;
mod stream;
mod write_bio;

pub use bio::Bio;
pub use bridge::{Bridge, BridgeConfig};
pub use conn::Conn;
pub use read_bio::ReadBio;
pub use registry::{Registry, Token};
pub use stream::BioStream;
pub use write_bio::WriteBio;

pub use error::{Error, Poll, Result};

/// Room given to each read from the connection: one maximum-size TLS
/// record, `2^14` bytes.
///
/// > The length (in bytes) of the following TLSPlaintext.fragment. The
/// > length MUST NOT exceed 2^14.
/// - [source][0]
///
/// [0]: https://www.rfc-editor.org/rfc/rfc8446#section-5.1
pub const RECORD_SIZE: usize = 16 * 1024;

