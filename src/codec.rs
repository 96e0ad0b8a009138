//! Bidirectional mapping between the service's typed-attribute JSON envelope and native
//! values, plus a framed binary decoder for bulk reads.

pub mod attribute;
pub mod binary;
pub mod mtime;

pub use attribute::{AttributeValue, Item};
pub use mtime::ModificationTime;
