//! Transfer providers
//!
//! A provider performs the network and file I/O of one task. The orchestrator
//! only talks to it through the [`Provider`] trait, so backends can be swapped
//! per task through the [`ProviderRegistry`].
//!
//! Built-in backends:
//!
//! - [`HttpBackend`] (`"http"`): one streamed GET, cannot pause
//! - [`RangedHttpBackend`] (`"http-ranged"`): pausable within the session
//!   using range requests

mod http;
mod ranged;
mod registry;
mod traits;

pub use http::{HttpBackend, HttpProvider};
pub use ranged::{RangedHttpBackend, RangedHttpProvider};
pub use registry::ProviderRegistry;
pub use traits::{ProgressCallback, Provider, ProviderBackend, ProviderInfo, TransferParams};
