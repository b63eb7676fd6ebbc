pub mod dataflow;
pub mod grid;
pub mod pe;
pub mod schedule;
pub mod tile_buffer;
pub mod tiling;

pub use dataflow::{DataflowController, DataflowPhase, OsControl, PassShape};
pub use grid::{GridInputs, SystolicGrid};
pub use pe::{Dataflow, ProcessingElement};
pub use schedule::{ArrayShape, MatMulJob, TilingSchedule, TilingStrategy};
pub use tile_buffer::TileBuffer;
pub use tiling::{Operand, Target, TilePlan, TileStep, TilingController, TilingStats};
