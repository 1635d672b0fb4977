//! forge-platform: OS-level concerns for the forge build orchestrator.
//!
//! This crate keeps the rest of the workspace free of platform `#[cfg]`
//! blocks. It answers two questions:
//! - where do things live on this machine (home directory, temp root)?
//! - how is a shell command actually executed (captured vs. foreground)?

pub mod paths;
pub mod shell;
