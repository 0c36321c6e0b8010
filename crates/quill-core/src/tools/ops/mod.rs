//! Built-in tool operations.

pub mod edit;
pub mod fsmeta;
pub mod list;
pub mod read;
pub mod search;
pub mod shell;
pub mod write;
