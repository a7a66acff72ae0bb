//! qcat-engine: answer documents from first draft to publication.
//!
//! Binds form input to configurations, runs the review workflow with its
//! role gates and edit locks, keeps links between documents symmetric,
//! migrates payloads across editions and keeps the public search index in
//! step with the store.
//!
//! # Public API
//!
//! - [`AccessBoundary`] -- the single entry point for web and CLI callers
//! - [`Workflow`] -- drafts, steps, locks, transitions, forks, memberships
//! - [`LinkResolver`] -- link edges, read precedence and link search
//! - [`migrate()`] -- carry a payload across configuration editions
//! - [`QcatError`] -- error kinds surfaced to callers

pub mod admin;
pub mod blobs;
pub mod boundary;
pub mod clock;
pub mod directory;
pub mod error;
pub mod events;
pub mod form;
pub mod links;
pub mod mail;
pub mod migrate;
pub mod settings;
pub mod sync;
pub mod value;
pub mod viewer;
pub mod workflow;

pub use admin::{DataIssue, IndexRepair};
pub use blobs::BlobRegistry;
pub use boundary::{
    AccessBoundary, BoundaryParts, CategoryView, DocumentSummary, DocumentView, Member,
    VersionInfo,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use directory::{
    DirectoryClient, DirectorySettings, HttpDirectory, Session, StaticDirectory, UserCandidate,
    UserDirectory,
};
pub use error::{FieldDiagnostic, QcatError};
pub use events::{Event, EventBus, EventKind, EventSink};
pub use form::{FormDescriptor, Progress, TranslationMode};
pub use links::{LinkCandidate, LinkChanges, LinkResolver, LinkedDocument};
pub use mail::{DispatchReport, LogTransport, MailDispatcher, MailTransport, MemoryTransport, OutgoingMail};
pub use migrate::{migrate, Migration};
pub use settings::EngineSettings;
pub use sync::{NoIndex, PublicIndex, SearchSync, SyncReport};
pub use value::{AnswerValue, DisplayValue, ValueError};
pub use viewer::{Permission, Viewer};
pub use workflow::{
    EditLock, MembershipChange, ReviewAction, Selector, StepCommit, StepInput, Workflow,
};
