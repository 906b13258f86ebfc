//! Request and response body handling.
//!
//! Both directions move bytes through leases from the shared
//! [`BufferPool`](crate::pool::BufferPool).

pub mod reader;
pub mod writer;

pub use reader::{BodyReader, ReadResult};
pub use writer::{BodyWriter, WriteOutcome, WriteReport};
