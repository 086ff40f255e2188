//! Filesystem traversal and metadata capture.

pub mod metadata;
pub mod walker;
