//! Client-side message pipeline.
//!
//! Bytes from the send endpoint flow through the [`frame::FrameDecoder`] into
//! the [`accumulator::StreamAccumulator`]; completed replies join the
//! [`ledger::OptimisticLedger`] until a refetched page 1 confirms them. The
//! [`controller::ConversationController`] owns that state machine without
//! doing any I/O, and [`session::ChatSession`] drives it over a
//! [`transport::ChatTransport`].

pub mod accumulator;
pub mod config;
pub mod controller;
pub mod error;
pub mod frame;
pub mod history;
pub mod ids;
pub mod ledger;
pub mod page_cache;
pub mod reconcile;
pub mod session;
pub mod transport;
pub mod types;

pub use config::ClientConfig;
pub use controller::{ChatStatus, ConversationController, ConversationView, Cue, SendRejected};
pub use error::{ChatError, ChatResult};
pub use history::materialize_history;
pub use reconcile::ViewEntry;
pub use session::{ChatSession, SendOutcome};
pub use transport::{ChatTransport, HttpChatTransport, NotesBackend, PageSource};
pub use types::{Message, MessageId, Page, Role};
