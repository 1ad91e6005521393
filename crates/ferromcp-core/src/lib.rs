//! Shared machinery for FerroMCP sessions.
//!
//! Home of the pieces both the server and the client build on: the ordered
//! [`features::FeatureSet`] registry, the opaque [`cursor`] codec, the
//! [`pagination`] engine combining the two, and the [`session`] primitives
//! (state machine, in-flight request table, arm-once keepalive handle).

pub mod cursor;
pub mod features;
pub mod pagination;
pub mod session;

pub use cursor::{decode_name_cursor, decode_sequence_cursor, encode_name_cursor, encode_sequence_cursor};
pub use features::FeatureSet;
pub use pagination::{paginate, Page};
pub use session::{InFlightTable, InitializedGate, KeepaliveHandle, SessionState, StateCell, WaitGroup};
