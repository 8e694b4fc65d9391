//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! - `FileSystemAccess` using `tokio::fs`
//!
//! The remote repository client and the OS watcher are supplied by the host.
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::TokioFileSystem;
//! use std::sync::Arc;
//!
//! let fs: Arc<dyn bridge_traits::FileSystemAccess> = Arc::new(TokioFileSystem::new());
//! ```

mod filesystem;

pub use filesystem::TokioFileSystem;
