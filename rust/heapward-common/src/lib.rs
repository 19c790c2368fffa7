//! Error and result definitions shared by all heapward-* crates.

pub mod error;
pub mod result;

pub use error::{BorrowKind, ConflictReason, Error, ErrorKind};
pub use result::Result;
