//! Out-of-band connection setup.
//!
//! Two peers exchange [`QpHandshake`]s over an ordinary byte stream to bring
//! their queue pairs into a mutually routable state. The [`Acceptor`]
//! always receives before it sends and the [`Connector`] always sends
//! before it receives. Any failure aborts the attempt: the stream is
//! closed, the half-built queue pair is dropped, and nothing is retried.

mod acceptor;
mod connector;
mod handshake;

pub use self::acceptor::Acceptor;
pub use self::connector::Connector;
pub use self::handshake::*;
