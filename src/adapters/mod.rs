//! Adapters implementing the domain ports.

pub mod agents;
pub mod process;
pub mod storage;
pub mod terminal;
