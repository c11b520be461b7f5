#![warn(clippy::unwrap_used)]

pub mod queue;

pub use queue::RequestQueue;
