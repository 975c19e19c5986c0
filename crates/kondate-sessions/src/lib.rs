//! Per-conversation session state.
//!
//! A session remembers the multi-stage menu dialog (main dish, side dish,
//! soup), the recipes proposed and selected so far, which inventory items
//! those recipes consumed, a pending clarification question if one is
//! outstanding, and a cache of the inventory list for follow-up turns.
//! The store linearizes mutations per session and evicts idle sessions.

pub mod error;
pub mod mapper;
pub mod store;
pub mod types;

pub use error::{Result, SessionError};
pub use store::SessionStore;
pub use types::{
    Candidate, Confirmation, MenuCategory, RecipeSource, Session, SessionContext, Stage, UrlRef,
};
