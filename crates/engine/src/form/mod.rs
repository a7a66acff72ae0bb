//! Form Engine: interprets a configuration into step forms and binds
//! submitted steps back into the answer payload.

pub mod conditions;
pub mod progress;
pub mod render;
pub mod validate;

pub use conditions::{field_state, group_active, FieldState};
pub use progress::{category_progress, document_progress, Progress};
pub use render::{
    render, ChoiceOption, FieldDescriptor, FormDescriptor, GroupDescriptor, InstanceDescriptor,
    RenderContext, TextOverlay, TranslationMode,
};
pub use validate::{bind, missing_for_submit, prune_hidden, validate_payload, BlobRef, Bound, LinkRef};
