//! Request handlers.

pub mod detect;
pub mod health;
pub mod videos;

pub use detect::*;
pub use health::*;
pub use videos::*;
