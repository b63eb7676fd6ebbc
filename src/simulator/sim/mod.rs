pub mod job;
pub mod mode;
pub mod shell;
pub mod trace;

pub use job::{JobFile, Workload};
pub use mode::StepMode;
pub use trace::TraceWriter;
