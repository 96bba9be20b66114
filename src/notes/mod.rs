//! Notes autosave channel.
//!
//! Independent of the message pipeline: edits to the scratchpad are coalesced
//! by a quiet window and written with last-write-wins semantics.

pub mod autosave;
pub mod debounce;

pub use autosave::{NotesAutosave, SaveStatus};
pub use debounce::Debouncer;
