//! The protocol spoken between the orchestration layer and LLMs.
//!
//! Agents, caches and tools only ever see the types defined here, so a
//! model wrapper can be swapped (or wrapped, e.g. by a cache) without the
//! rest of the stack noticing.
//!
//! Types in this crate carry no behavior of their own. They describe the
//! contract that model wrappers implement and that callers may rely on.

#![deny(missing_docs)]

mod error;
mod opaque;
mod provider;
mod request;
mod response;

pub use error::*;
pub use opaque::*;
pub use provider::*;
pub use request::*;
pub use response::*;
