/// Set-associative write-back cache in front of a `Storage`
use super::memory::{Storage, WORD_BYTES};
use crate::error::{Result, SimError};
use serde::{Deserialize, Serialize};

/// Cache geometry. Lines hold a single word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct CacheConfig {
  #[serde(default)]
  pub enabled: bool,
  #[serde(default = "default_sets")]
  pub sets: usize,
  #[serde(default = "default_ways")]
  pub ways: usize,
}

fn default_sets() -> usize {
  16
}

fn default_ways() -> usize {
  4
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: false,
      sets: default_sets(),
      ways: default_ways(),
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
  pub hits: u64,
  pub misses: u64,
  /// Dirty lines written to the backing store, on eviction or flush
  pub writebacks: u64,
}

impl CacheStats {
  /// Counts accumulated after `earlier` was taken.
  pub fn since(&self, earlier: &CacheStats) -> CacheStats {
    CacheStats {
      hits: self.hits - earlier.hits,
      misses: self.misses - earlier.misses,
      writebacks: self.writebacks - earlier.writebacks,
    }
  }

  pub fn hit_rate(&self) -> f64 {
    let total = self.hits + self.misses;
    if total == 0 {
      return 0.0;
    }
    100.0 * self.hits as f64 / total as f64
  }
}

#[derive(Debug, Clone, Copy, Default)]
struct Line {
  valid: bool,
  dirty: bool,
  tag: usize,
  data: f32,
  // 0 = most recently used
  age: u32,
}

/// Write-back, write-allocate cache with LRU replacement. A disabled cache
/// passes every access straight to the backing store.
pub struct Cache<S: Storage> {
  backing: S,
  config: CacheConfig,
  lines: Vec<Line>,
  stats: CacheStats,
}

impl<S: Storage> Cache<S> {
  pub fn new(backing: S, config: CacheConfig) -> Self {
    assert!(
      !config.enabled || (config.sets > 0 && config.ways > 0),
      "cache needs at least one set and one way, got {}x{}",
      config.sets,
      config.ways
    );
    let lines = if config.enabled { config.sets * config.ways } else { 0 };
    Self {
      backing,
      config,
      lines: vec![Line::default(); lines],
      stats: CacheStats::default(),
    }
  }

  pub fn passthrough(backing: S) -> Self {
    Self::new(backing, CacheConfig::default())
  }

  pub fn config(&self) -> CacheConfig {
    self.config
  }

  pub fn stats(&self) -> CacheStats {
    self.stats
  }

  /// The backing store as it stands; dirty lines are not reflected.
  pub fn backing(&self) -> &S {
    &self.backing
  }

  /// Direct access that bypasses the cache, for setup between jobs.
  pub fn backing_mut(&mut self) -> &mut S {
    &mut self.backing
  }

  /// Flush and hand back the backing store.
  pub fn into_inner(mut self) -> Result<S> {
    self.flush()?;
    Ok(self.backing)
  }

  /// Whether a valid line holds `addr`.
  pub fn resident(&self, addr: u32) -> bool {
    self.lookup(addr).is_some()
  }

  pub fn is_dirty(&self, addr: u32) -> bool {
    self.lookup(addr).map(|idx| self.lines[idx].dirty).unwrap_or(false)
  }

  fn check(&self, addr: u32) -> Result<()> {
    if addr % WORD_BYTES != 0 {
      return Err(SimError::Misaligned(addr));
    }
    let capacity = self.backing.capacity_bytes();
    if addr as usize + WORD_BYTES as usize > capacity {
      return Err(SimError::OutOfRange { addr, capacity });
    }
    Ok(())
  }

  // (set, tag) of the word at `addr`
  fn split(&self, addr: u32) -> (usize, usize) {
    let word = (addr / WORD_BYTES) as usize;
    (word % self.config.sets, word / self.config.sets)
  }

  fn line_addr(&self, set: usize, tag: usize) -> u32 {
    ((tag * self.config.sets + set) as u32) * WORD_BYTES
  }

  fn lookup(&self, addr: u32) -> Option<usize> {
    if !self.config.enabled {
      return None;
    }
    let (set, tag) = self.split(addr);
    let base = set * self.config.ways;
    (base..base + self.config.ways).find(|&idx| self.lines[idx].valid && self.lines[idx].tag == tag)
  }

  fn touch(&mut self, set: usize, idx: usize) {
    let base = set * self.config.ways;
    for line in base..base + self.config.ways {
      if line == idx {
        self.lines[line].age = 0;
      } else {
        self.lines[line].age = self.lines[line].age.saturating_add(1);
      }
    }
  }

  /// First invalid way, else the oldest.
  fn victim(&self, set: usize) -> usize {
    let base = set * self.config.ways;
    let ways = base..base + self.config.ways;
    if let Some(idx) = ways.clone().find(|&idx| !self.lines[idx].valid) {
      return idx;
    }
    let mut oldest = base;
    for idx in ways {
      if self.lines[idx].age > self.lines[oldest].age {
        oldest = idx;
      }
    }
    oldest
  }

  /// Pick a way for `addr`, writing the evicted line back if it is dirty.
  fn allocate(&mut self, addr: u32) -> Result<usize> {
    let (set, tag) = self.split(addr);
    let idx = self.victim(set);
    let old = self.lines[idx];
    if old.valid && old.dirty {
      let wb_addr = self.line_addr(set, old.tag);
      log::trace!("cache: evict dirty 0x{:08x} for 0x{:08x}", wb_addr, addr);
      self.backing.write(wb_addr, old.data)?;
      self.stats.writebacks += 1;
    }
    self.lines[idx] = Line {
      valid: true,
      dirty: false,
      tag,
      data: 0.0,
      age: 0,
    };
    Ok(idx)
  }
}

impl<S: Storage> Storage for Cache<S> {
  fn read(&mut self, addr: u32) -> Result<f32> {
    if !self.config.enabled {
      return self.backing.read(addr);
    }
    self.check(addr)?;
    let (set, _) = self.split(addr);
    if let Some(idx) = self.lookup(addr) {
      self.stats.hits += 1;
      self.touch(set, idx);
      return Ok(self.lines[idx].data);
    }

    self.stats.misses += 1;
    let value = self.backing.read(addr)?;
    let idx = self.allocate(addr)?;
    self.lines[idx].data = value;
    self.touch(set, idx);
    Ok(value)
  }

  fn write(&mut self, addr: u32, value: f32) -> Result<()> {
    if !self.config.enabled {
      return self.backing.write(addr, value);
    }
    self.check(addr)?;
    let (set, _) = self.split(addr);
    let idx = match self.lookup(addr) {
      Some(idx) => {
        self.stats.hits += 1;
        idx
      },
      None => {
        // a one-word line is fully overwritten, so no fill
        self.stats.misses += 1;
        self.allocate(addr)?
      },
    };
    self.lines[idx].data = value;
    self.lines[idx].dirty = true;
    self.touch(set, idx);
    Ok(())
  }

  fn capacity_bytes(&self) -> usize {
    self.backing.capacity_bytes()
  }

  fn is_local(&self, addr: u32) -> bool {
    self.lookup(addr).is_some()
  }

  fn flush(&mut self) -> Result<()> {
    for idx in 0..self.lines.len() {
      let line = self.lines[idx];
      if line.valid && line.dirty {
        let addr = self.line_addr(idx / self.config.ways, line.tag);
        self.backing.write(addr, line.data)?;
        self.stats.writebacks += 1;
      }
      self.lines[idx] = Line::default();
    }
    self.backing.flush()
  }

  fn cache_stats(&self) -> Option<CacheStats> {
    self.config.enabled.then_some(self.stats)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::memdomain::MainMemory;

  fn cache(sets: usize, ways: usize) -> Cache<MainMemory> {
    let mut mem = MainMemory::new(1024);
    for word in 0..256u32 {
      mem.load_matrix(word * WORD_BYTES, 1, 1, &[word as f32]).unwrap();
    }
    Cache::new(mem, CacheConfig { enabled: true, sets, ways })
  }

  #[test]
  fn test_hit_after_miss() {
    let mut c = cache(4, 2);
    assert!(!c.is_local(8));
    assert_eq!(c.read(8).unwrap(), 2.0);
    assert!(c.is_local(8));
    assert_eq!(c.read(8).unwrap(), 2.0);

    assert_eq!(c.stats(), CacheStats { hits: 1, misses: 1, writebacks: 0 });
    assert_eq!(c.backing().reads(), 1);
  }

  #[test]
  fn test_lru_evicts_oldest_way() {
    // words 0, 4, 8 all map to set 0 of a 4-set cache
    let mut c = cache(4, 2);
    c.read(0).unwrap();
    c.read(16).unwrap();
    // word 0 becomes most recent, word 4 is now the victim
    c.read(0).unwrap();
    c.read(32).unwrap();

    assert!(c.resident(0));
    assert!(!c.resident(16));
    assert!(c.resident(32));
    assert_eq!(c.stats().misses, 3);
  }

  #[test]
  fn test_write_back_on_eviction() {
    let mut c = cache(1, 2);
    c.write(0, 100.0).unwrap();
    assert!(c.is_dirty(0));
    // write-back: memory still holds the old value
    assert_eq!(c.backing().read_matrix(0, 1, 1).unwrap(), vec![0.0]);
    assert_eq!(c.backing().writes(), 0);

    c.read(4).unwrap();
    c.read(8).unwrap();
    assert!(!c.resident(0));
    assert_eq!(c.stats().writebacks, 1);
    assert_eq!(c.backing().read_matrix(0, 1, 1).unwrap(), vec![100.0]);

    // clean lines leave without a write
    c.read(12).unwrap();
    assert_eq!(c.stats().writebacks, 1);
  }

  #[test]
  fn test_flush_empties_cache() {
    let mut c = cache(4, 4);
    c.write(4, -1.5).unwrap();
    c.write(20, 7.0).unwrap();
    c.read(40).unwrap();
    c.flush().unwrap();

    assert!(!c.resident(4) && !c.resident(40));
    assert_eq!(c.stats().writebacks, 2);
    let mem = c.into_inner().unwrap();
    assert_eq!(mem.read_matrix(4, 1, 1).unwrap(), vec![-1.5]);
    assert_eq!(mem.read_matrix(20, 1, 1).unwrap(), vec![7.0]);
  }

  #[test]
  fn test_errors_pass_through() {
    let mut c = cache(4, 2);
    assert!(matches!(c.read(6), Err(SimError::Misaligned(6))));
    assert!(matches!(c.write(1024, 1.0), Err(SimError::OutOfRange { addr: 1024, .. })));
    assert_eq!(c.stats(), CacheStats::default());
  }

  #[test]
  fn test_disabled_cache_is_transparent() {
    let mut c = Cache::passthrough(MainMemory::new(64));
    c.write(4, 3.0).unwrap();
    assert_eq!(c.read(4).unwrap(), 3.0);
    assert!(!c.is_local(4));
    assert!(c.cache_stats().is_none());
    assert_eq!((c.backing().reads(), c.backing().writes()), (1, 1));
  }
}
