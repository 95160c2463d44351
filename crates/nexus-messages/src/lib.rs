//! Channel message view model: paginated history, live pushes and optimistic
//! sends merged into one list ordered newest first and unique by id.

pub mod backend;
pub mod config;
pub mod error;
pub mod list;
pub mod normalize;
pub mod send;
pub mod store;
pub mod users;

pub use backend::{Attachment, MessageBackend, NewChannelMessage, PageRequest};
pub use config::MessagesConfig;
pub use error::MessagesError;
pub use list::{MessageList, Reconciled};
pub use send::{Author, MessageComposer, SendOutcome};
pub use store::{FetchOutcome, MessagesEvent, MessagesSnapshot, Phase, PushOutcome, SkipReason, TextChannelMessages};
pub use users::{UNKNOWN_USER, UsernameCache, UsernameResolver};
