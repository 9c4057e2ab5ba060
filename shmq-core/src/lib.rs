//! Shmq Core Library
//!
//! Inter-process message queues in POSIX shared memory. Provides the queue
//! engine with type/priority selection, process-shared synchronization,
//! signal notification registry, and YAML queue manifests.

pub mod config;
pub mod error;
pub mod notify;
pub mod queue;
pub mod shm;
pub mod sync;
pub mod types;

// Re-export commonly used types
pub use config::{ConfigLoader, Manifest, QueueConfig, QueueDefinition};
pub use error::{HardValidationError, QueueError, QueueResult, SharedMemoryError};
pub use notify::{Registration, MAX_REGISTRATIONS};
pub use queue::MessageQueue;
pub use types::{
    AccessMode, BlockingMode, Message, OpenFlags, Permissions, QueueName, Received, Selector,
    SignalNumber,
};
