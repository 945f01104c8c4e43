//! Core types for Weaver.

pub mod content;
pub mod context;
pub mod message;

pub use content::*;
pub use context::*;
pub use message::*;
