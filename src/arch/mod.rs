pub mod accelerator;
pub mod cluster;
pub mod systolic;

pub use accelerator::{Accelerator, RunReport, TickSnapshot};
pub use cluster::Cluster;
