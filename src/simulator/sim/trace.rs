use crate::arch::{Accelerator, RunReport};
use crate::error::Result;
use crate::memdomain::Storage;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// JSON-lines trace: one record per tick, plus start and finish events.
pub struct TraceWriter<W: Write = BufWriter<File>> {
  writer: W,
  include_pes: bool,
  records: u64,
}

impl TraceWriter {
  pub fn create(path: &Path, include_pes: bool) -> Result<Self> {
    let file = File::create(path)?;
    Ok(Self::new(BufWriter::new(file), include_pes))
  }
}

impl<W: Write> TraceWriter<W> {
  pub fn new(writer: W, include_pes: bool) -> Self {
    Self {
      writer,
      include_pes,
      records: 0,
    }
  }

  pub fn records(&self) -> u64 {
    self.records
  }

  pub fn job_started<S: Storage>(&mut self, accel: &Accelerator<S>) -> Result<()> {
    let entry = serde_json::json!({
      "event": "start",
      "cycle": accel.cycle(),
      "shape": accel.shape(),
      "plan_steps": accel.tiling().plan().len(),
    });
    self.write_line(&entry)
  }

  pub fn tick<S: Storage>(&mut self, accel: &Accelerator<S>) -> Result<()> {
    let snapshot = accel.snapshot(self.include_pes);
    self.write_line(&snapshot)
  }

  pub fn job_finished(&mut self, report: &RunReport) -> Result<()> {
    let entry = serde_json::json!({
      "event": "done",
      "report": report,
      "fetch_reduction_pct": report.fetch_reduction(),
    });
    self.write_line(&entry)?;
    self.flush()
  }

  pub fn flush(&mut self) -> Result<()> {
    self.writer.flush()?;
    Ok(())
  }

  pub fn into_inner(self) -> W {
    self.writer
  }

  fn write_line<T: serde::Serialize>(&mut self, value: &T) -> Result<()> {
    serde_json::to_writer(&mut self.writer, value)?;
    writeln!(self.writer)?;
    self.records += 1;
    Ok(())
  }
}
