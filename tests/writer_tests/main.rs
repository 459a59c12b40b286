//! Writer tests: append path, rotation policy, rotate-and-retry, vacuum

#[path = "../common/mod.rs"]
mod common;
