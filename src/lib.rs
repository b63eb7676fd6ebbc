pub mod arch;
pub mod builtin;
pub mod error;
pub mod memdomain;
pub mod reference;
pub mod simulator;

pub use arch::accelerator::{Accelerator, RunReport};
pub use arch::cluster::Cluster;
pub use arch::systolic::{ArrayShape, Dataflow, MatMulJob, TilingStrategy};
pub use error::{Result, SimError};
pub use memdomain::{Cache, CacheConfig, MainMemory, SharedMemory, Storage, WORD_BYTES};
pub use simulator::utils::log;
