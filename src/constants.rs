//! Buffer sizes and thresholds shared by the body writer and reader.

/// Size of every buffer handed out by the [`BufferPool`](crate::pool::BufferPool).
pub const POOLED_BUFFER_SIZE: usize = 16 * 1024;

/// Largest single read issued while filling a known-length response body.
pub const PREFERRED_READ_SIZE: usize = POOLED_BUFFER_SIZE;

/// Bodies at or above this size are staged through pooled buffers instead of
/// being handed to the connection, or read from it, in one piece.
pub const LARGE_OBJECT_THRESHOLD: usize = 85 * 1000;

/// Capacity of the process-wide handler cache.
pub const SHARED_CACHE_CAPACITY: usize = 20;

/// Capacity of the handler cache owned by each transport.
pub const LOCAL_CACHE_CAPACITY: usize = 8;

/// How long the sender waits for a body write to report its outcome after the
/// engine has failed the exchange.
pub const WRITE_OUTCOME_GRACE: std::time::Duration = std::time::Duration::from_millis(50);

/// Shortest total timeout the transport will start an exchange with.
pub const MIN_TIMEOUT: std::time::Duration = std::time::Duration::from_millis(1);
