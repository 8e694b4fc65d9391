//! Task spawning.
//!
//! Crawlers and the processor of a pass run as spawned tasks; worker pools
//! are [`JoinSet`]s so a pass can wait for all of them and collect their
//! tallies.
//!
//! ```rust
//! use core_async::task::{self, JoinSet};
//!
//! async fn run_workers() -> usize {
//!     let mut workers = JoinSet::new();
//!     for worker in 0..4usize {
//!         workers.spawn(async move { worker });
//!     }
//!
//!     let crawler = task::spawn(async { 10usize });
//!     let mut total = crawler.await.unwrap_or_default();
//!     while let Some(done) = workers.join_next().await {
//!         total += done.unwrap_or_default();
//!     }
//!     total
//! }
//! ```

pub use tokio::task::{spawn_blocking, yield_now, JoinError, JoinHandle, JoinSet};

/// Spawn `future` on the current runtime; it may run on another thread.
///
/// # Panics
///
/// Panics when called outside a runtime.
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: std::future::Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::task::spawn(future)
}
