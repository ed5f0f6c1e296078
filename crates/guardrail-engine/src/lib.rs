//! Operation safety engine for destructive quality commands.
//!
//! Before a format/cleanup/dedupe pass mutates a working tree, this crate
//! scores the operation's risk, takes an immutable snapshot of the tree's
//! text files, verifies the tree afterwards, and restores from the
//! snapshot when the operation goes wrong. Protected zones (a `.claude`
//! directory by default) always require confirmation. The actual
//! formatters, prompts, and VCS queries are collaborator traits supplied
//! by the caller.

pub mod classify;
pub mod config;
pub mod confirm;
pub mod controller;
pub mod errors;
pub mod lock;
pub mod risk;
pub mod rollback;
pub mod snapshot;
pub mod types;
pub mod verify;

pub use classify::*;
pub use config::*;
pub use confirm::*;
pub use controller::*;
pub use errors::*;
pub use lock::*;
pub use risk::*;
pub use rollback::*;
pub use snapshot::*;
pub use types::*;
pub use verify::*;
