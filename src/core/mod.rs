//! Core application primitives (HTTP surface, task queue, worker loop)

pub mod http;
pub mod queue;
pub mod worker;

pub use http::*;
pub use queue::*;
pub use worker::*;
