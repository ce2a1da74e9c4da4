//! An out-of-the-box agent that assembles built-in tools, configurable LLMs
//! and response caching.
//!
//! The crate includes a CLI tool for using in the terminal. And you can also
//! use it as a library to bring agent functionality into your own host apps.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

pub mod config;
pub mod llms;
mod session;
pub mod tools;

pub use session::{Session, SessionBuilder};

/// Re-exports of [`chainlet_core`] crate.
pub mod core {
    pub use chainlet_core::*;
}

/// Re-exports of [`chainlet_cache`] crate.
pub mod cache {
    pub use chainlet_cache::*;
}

/// Re-exports of [`chainlet_text_splitter`] crate.
pub mod text_splitter {
    pub use chainlet_text_splitter::*;
}
