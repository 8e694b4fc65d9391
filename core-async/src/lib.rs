//! Async abstraction layer for the sync engine.
//!
//! All `core-*` crates depend on this crate instead of naming Tokio directly,
//! so the executor can be swapped or configured in one place.
//!
//! # Modules
//!
//! - `task`: Task spawning, join sets and execution
//! - `time`: Time-related operations (sleep, duration, instant)
//! - `sync`: Synchronization primitives (Mutex, RwLock, channels)
//! - `queue`: Bounded, closeable multi-producer/multi-consumer work queue
//! - `runtime`: Blocking entry points used by the attribute macros
//!
//! # Examples
//!
//! ```rust
//! use core_async::queue::WorkQueue;
//! use core_async::task;
//!
//! async fn example() {
//!     let queue = WorkQueue::bounded(8);
//!     let producer = queue.clone();
//!     task::spawn(async move {
//!         producer.push(42).await.ok();
//!         producer.close();
//!     });
//!
//!     while let Some(item) = queue.pop().await {
//!         assert_eq!(item, 42);
//!     }
//! }
//! ```

// Re-export the async entry-point/test macros so downstream crates never need
// direct Tokio dependencies.
pub use core_async_macros::{main, test};

// Lets the macros expand to `core_async::...` inside this crate's own tests.
extern crate self as core_async;

pub mod queue;
pub mod runtime;
pub mod sync;
pub mod task;
pub mod time;

pub use task::spawn;
pub use time::{sleep, Duration, Instant};
