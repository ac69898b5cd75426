//! ganymede-core: Shared protocol library for the Ganymede directory client.
//!
//! Provides the error taxonomy, CBOR message envelopes, length-prefixed codec,
//! object identifiers, and query descriptors.

pub mod codec;
pub mod error;
pub mod invid;
pub mod messages;
pub mod query;

// Re-export commonly used items at crate root.
pub use codec::{cbor_decode, frame_encode, FrameDecoder};
pub use error::{GResult, GanymedeError};
pub use invid::Invid;
pub use messages::{
    Envelope, FieldValue, Message, ObjectHandle, ObjectView, Status, TypeRef, TypeSummary,
    PROTOCOL_VERSION,
};
pub use query::{Comparator, Query, QueryFilter};
