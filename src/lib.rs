//! Chunk and segment access core for EWF (E01/Ex01) forensic images
//!
//! - [`ewf`]: segment table, chunk table, chunk groups and chunk data, plus
//!   the [`ewf::EwfHandle`] reader and the `info`/`verify` operations.
//! - [`common`]: file handle pool, slice decoding, hashing and segment file
//!   naming shared by the reader.
//! - [`logging`]: tracing subscriber setup.

pub mod common;
pub mod ewf;
pub mod logging;

pub use ewf::{EwfError, EwfHandle, EwfResult, ReaderConfig};
