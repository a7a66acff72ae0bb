mod error;
mod memory;
mod record;
mod traits;

pub mod conformance;

pub use error::StorageError;
pub use memory::{MemorySnapshot, MemoryStore};
pub use record::{
    BlobRecord, DocumentFilter, DocumentRecord, DocumentStatus, EventRecord, FieldAnnotation,
    LinkRecord, MailPreferences, MailSubscription, MembershipRecord, NotificationRecord, Role,
    UserId, UserRecord,
};
pub use traits::AnswerStore;
