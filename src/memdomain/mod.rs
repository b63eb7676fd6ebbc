pub mod arbiter;
pub mod cache;
pub mod image;
pub mod memory;
pub mod port;

pub use arbiter::{RoundRobinArbiter, SharedMemory};
pub use cache::{Cache, CacheConfig, CacheStats};
pub use memory::{MainMemory, Storage, WORD_BYTES};
pub use port::{MemPort, ReadReq, ReadResp, WriteReq};
