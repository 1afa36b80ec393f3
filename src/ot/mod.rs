//! Malicious-secure 1-out-of-2 OT extension.
//!
//! `baseot` runs the public-key bootstrap on the control channel,
//! `extension` holds the two-phase transfer core, and `session` wires both
//! into per-role session objects with an explicit state machine.

pub mod baseot;
pub mod extension;
pub mod mask;
pub mod session;

use crate::channel::ChannelError;
use crate::conn::ConnectionError;
use crate::group::GroupError;
use crate::ot::session::SessionState;

/// Extension OT indices covered by one block of second-level seeds.
pub const BLOCK_SIZE: usize = 4096;

/// Conservative default number of consistency checks per transfer slice.
pub const DEFAULT_NUM_CHECKS: usize = 380;

#[derive(thiserror::Error, Debug)]
pub enum OtError {
    #[error(transparent)]
    Connection {
        #[from]
        source: ConnectionError,
    },
    #[error(transparent)]
    Channel {
        #[from]
        source: ChannelError,
    },
    #[error(transparent)]
    Group {
        #[from]
        source: GroupError,
    },
    /// A malicious-security check failed; the peer is presumed cheating and
    /// the transfer must not return data.
    #[error("consistency check failed for base rows ({row_a}, {row_b}): peer is cheating")]
    Consistency { row_a: usize, row_b: usize },
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("session is in state {found:?}, expected {expected:?}")]
    State {
        expected: SessionState,
        found: SessionState,
    },
    #[error("transfer worker thread panicked")]
    WorkerPanic,
}

pub type OtResult<T> = Result<T, OtError>;
