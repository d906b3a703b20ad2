//! Crate-level error type.

use std::io;

use thiserror::Error;

use crate::config::ConfigError;
use crate::ctrl::HandshakeError;
use crate::exec::PollerError;
use crate::rdma::cq::{CqCreationError, WcStatus};
use crate::rdma::qp::QpCreationError;
use crate::rdma::type_alias::WrId;
use crate::utils::QueueClosed;

/// Error type of every fallible operation above the verbs layer.
#[derive(Debug, Error)]
pub enum Error {
    /// A posted operation completed with a non-success status.
    #[error("work request {wr_id} failed: {status}")]
    Completion { wr_id: WrId, status: WcStatus },

    /// Polling the completion queue itself failed.
    #[error("failed to poll completion queue")]
    Poll(#[source] io::Error),

    /// The executor no longer accepts completions.
    #[error(transparent)]
    QueueClosed(#[from] QueueClosed),

    /// Connection setup failed.
    #[error("handshake failed")]
    Handshake(#[from] HandshakeError),

    /// Completion queue could not be created.
    #[error("failed to create completion queue")]
    CqCreation(#[from] CqCreationError),

    /// Queue pair could not be created.
    #[error("failed to create queue pair")]
    QpCreation(#[from] QpCreationError),

    /// The device rejected a work request.
    #[error("failed to post work request")]
    Post(#[source] io::Error),

    /// The executor was torn down before the operation completed.
    #[error("operation cancelled by executor teardown")]
    Cancelled,

    /// Configuration could not be loaded.
    #[error("invalid configuration")]
    Config(#[from] ConfigError),

    /// A completion poller could not be started.
    #[error("completion poller error")]
    Poller(#[from] PollerError),
}

impl Error {
    /// Hardware status carried by a failed completion.
    pub fn wc_status(&self) -> Option<WcStatus> {
        match self {
            Error::Completion { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result type with [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;
