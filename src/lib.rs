//! Blocking Rust clients for paged REST APIs.
//!
//! The core of the crate is a batch-pagination engine that reads server-side collections
//! whose size is only known after the first page:
//!
//! - [`process_in_concurrent_batches`] fetches offset 0, sizes the run from its
//!   `total_count`, then spreads the remaining pages across a bounded [`WorkerPool`].
//! - [`process_in_consistent_batches`] reads page by page, pinning every request to the
//!   fingerprint (ETag) of the first page and failing with [`Error::Consistency`] if the
//!   resource changes mid-read.
//! - [`process_in_chunks`] feeds an in-memory slice to a callback in fixed-size chunks.
//!
//! [`Client`] puts the engine behind a small HTTP client for the dataset API and friends.
//!
//! ## Quick start
//! - Configure the API via environment variables (`DP_API_URL`, `DP_SERVICE_AUTH_TOKEN`) or a
//!   `.dpapirc` file (supported in the current directory and in your home directory).
//! - Call one of the `*_in_batches` helpers.
//!
//! ```no_run
//! use anyhow::Result;
//! use dp_api_clients::Client;
//! use serde_json::Value;
//!
//! fn main() -> Result<()> {
//!     let client = Client::from_env()?.with_batch_size(500).with_max_workers(4);
//!     let datasets: Vec<Value> = client.get_datasets_in_batches()?;
//!     println!("{} datasets", datasets.len());
//!     Ok(())
//! }
//! ```
//!
//! The engine works with any fetcher and consumer:
//!
//! ```
//! use dp_api_clients::{Fetched, Flow, OffsetCollector, process_in_concurrent_batches};
//!
//! let source: Vec<u32> = (0..25).collect();
//! let collector = OffsetCollector::new();
//!
//! process_in_concurrent_batches::<_, dp_api_clients::Error, _, _>(
//!     |offset| {
//!         let end = (offset + 10).min(source.len());
//!         Ok(Fetched::new((offset, source[offset..end].to_vec()), source.len()))
//!     },
//!     |(offset, items): (usize, Vec<u32>), _| {
//!         collector.place(offset, items)?;
//!         Ok(Flow::Continue(()))
//!     },
//!     10,
//!     3,
//! )
//! .unwrap();
//!
//! assert_eq!(collector.into_items(), source);
//! ```

#![forbid(unsafe_code)]

mod chunk;
mod client;
mod collect;
mod config;
mod contract;
mod error;
mod fingerprint;
mod orchestrator;
mod pool;
mod util;

pub use chunk::{ChunkError, process_in_chunks};
pub use client::{Client, ClientConfig, Page, PatchError};
pub use collect::OffsetCollector;
pub use config::{DEFAULT_BATCH_SIZE, DEFAULT_MAX_WORKERS};
pub use contract::{Fetched, Flow};
pub use error::Error;
pub use fingerprint::{FingerprintGuard, process_in_consistent_batches};
pub use orchestrator::process_in_concurrent_batches;
pub use pool::WorkerPool;
