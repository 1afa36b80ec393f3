//! Malicious-secure 1-out-of-2 OT extension over parallel TCP channels.
//!
//! A session pairs a listening sender with a connecting receiver, runs a
//! public-key base-OT bootstrap plus one role-inverted extension round to
//! derive per-session key material, and then serves bulk transfer calls in
//! the general, correlated or random variant.

pub mod bitvec;
pub mod channel;
pub mod config;
pub mod conn;
pub mod group;
pub mod limlee;
pub mod ot;
pub mod prg;
pub mod seed;

pub use bitvec::BitVector;
pub use channel::{AbstractChannel, Channel, ChannelError, TcpChannel};
pub use config::{OtVariant, Role, SessionConfig};
pub use conn::{ChannelPool, ConnectionError, ConnectionManager};
pub use ot::extension::{ExtensionReceiver, ExtensionSender, SenderInput, SenderOutput};
pub use ot::mask::{MaskingFunction, XorMasking};
pub use ot::session::{OtReceiverSession, OtSenderSession, SessionState};
pub use ot::{OtError, OtResult};
pub use seed::SessionSeeds;
