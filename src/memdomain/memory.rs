/// Byte-addressed backing store for the accelerator
use super::cache::CacheStats;
use crate::error::{Result, SimError};

/// Size of one stored element (an IEEE single).
pub const WORD_BYTES: u32 = 4;

/// Read/write contract the tiling controller consumes.
///
/// Addresses are byte addresses and must be 4-byte aligned.
pub trait Storage {
  fn read(&mut self, addr: u32) -> Result<f32>;
  fn write(&mut self, addr: u32, value: f32) -> Result<()>;
  fn capacity_bytes(&self) -> usize;

  /// Whether an access to `addr` completes without the shared memory bus.
  fn is_local(&self, _addr: u32) -> bool {
    false
  }

  /// Write back anything held in front of the backing store and drop it.
  fn flush(&mut self) -> Result<()> {
    Ok(())
  }

  fn cache_stats(&self) -> Option<CacheStats> {
    None
  }
}

/// In-memory store of 32-bit words. Words that were never written read
/// back as 0.0 with a warning.
#[derive(Debug, Clone)]
pub struct MainMemory {
  words: Vec<Option<f32>>,
  reads: u64,
  writes: u64,
  uninit_reads: u64,
}

impl MainMemory {
  pub fn new(size_bytes: usize) -> Self {
    Self {
      words: vec![None; size_bytes / WORD_BYTES as usize],
      reads: 0,
      writes: 0,
      uninit_reads: 0,
    }
  }

  pub(crate) fn from_words(words: Vec<Option<f32>>) -> Self {
    Self {
      words,
      reads: 0,
      writes: 0,
      uninit_reads: 0,
    }
  }

  pub(crate) fn words(&self) -> &[Option<f32>] {
    &self.words
  }

  fn index(&self, addr: u32) -> Result<usize> {
    if addr % WORD_BYTES != 0 {
      return Err(SimError::Misaligned(addr));
    }
    let idx = (addr / WORD_BYTES) as usize;
    if idx >= self.words.len() {
      return Err(SimError::OutOfRange {
        addr,
        capacity: self.capacity_bytes(),
      });
    }
    Ok(idx)
  }

  /// Whether the word at `addr` has ever been written.
  pub fn is_initialized(&self, addr: u32) -> bool {
    self.index(addr).map(|idx| self.words[idx].is_some()).unwrap_or(false)
  }

  /// Store a row-major `rows`×`cols` matrix starting at byte `base`.
  /// Bypasses the access counters; used for test and job setup.
  pub fn load_matrix(&mut self, base: u32, rows: usize, cols: usize, data: &[f32]) -> Result<()> {
    if data.len() != rows * cols {
      return Err(SimError::InvalidJob(format!(
        "matrix data has {} elements, expected {}x{}",
        data.len(),
        rows,
        cols
      )));
    }
    for (i, value) in data.iter().enumerate() {
      let idx = self.index(base + i as u32 * WORD_BYTES)?;
      self.words[idx] = Some(*value);
    }
    Ok(())
  }

  /// Read back a row-major matrix. Uninitialized words come back as 0.0.
  pub fn read_matrix(&self, base: u32, rows: usize, cols: usize) -> Result<Vec<f32>> {
    (0..rows * cols)
      .map(|i| {
        let idx = self.index(base + i as u32 * WORD_BYTES)?;
        Ok(self.words[idx].unwrap_or(0.0))
      })
      .collect()
  }

  pub fn reads(&self) -> u64 {
    self.reads
  }

  pub fn writes(&self) -> u64 {
    self.writes
  }

  pub fn uninit_reads(&self) -> u64 {
    self.uninit_reads
  }

  pub fn reset_counters(&mut self) {
    self.reads = 0;
    self.writes = 0;
    self.uninit_reads = 0;
  }
}

impl Storage for MainMemory {
  fn read(&mut self, addr: u32) -> Result<f32> {
    let idx = self.index(addr)?;
    self.reads += 1;
    match self.words[idx] {
      Some(value) => Ok(value),
      None => {
        self.uninit_reads += 1;
        log::warn!("reading uninitialized memory at byte 0x{:08x}", addr);
        Ok(0.0)
      },
    }
  }

  fn write(&mut self, addr: u32, value: f32) -> Result<()> {
    let idx = self.index(addr)?;
    self.writes += 1;
    self.words[idx] = Some(value);
    Ok(())
  }

  fn capacity_bytes(&self) -> usize {
    self.words.len() * WORD_BYTES as usize
  }
}
