//! Publisher implementations: S3 and in-memory.

pub mod memory;
pub mod s3;

pub use memory::MemoryPublisher;
pub use s3::S3Publisher;
