//! Core types, config, errors, and session model for Talkloop.

pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
pub mod types;

pub use error::{Result, TalkloopError};
