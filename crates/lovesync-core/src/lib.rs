//! lovesync-core: shared protocol library for the lovesync chat channel.
//!
//! Provides the message data model, the JSON envelope codec, the ordered
//! message store, the ephemeral notification queue, and envelope routing.
//! Nothing here performs I/O or depends on an async runtime.

pub mod codec;
pub mod error;
pub mod messages;
pub mod notify;
pub mod router;
pub mod store;

// Re-export commonly used items at crate root.
pub use codec::{decode, decode_history, encode, message_fingerprint, HistoryBatch};
pub use error::{DecodeError, SyncError, SyncResult};
pub use messages::{
    Alert, ChatMessage, ContentType, DeliveryState, Envelope, EnvelopeKind, OutboundFrame,
    Severity,
};
pub use notify::{Notification, NotificationId, NotificationQueue};
pub use router::{route, NoOpReason, RouteContext, RouterEffect};
pub use store::{MessageStore, SendOutcome};
