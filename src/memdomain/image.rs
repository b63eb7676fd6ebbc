/// Text memory image: one `ADDRESS: VALUE` line per word, `XXXX` for
/// words that were never written. Addresses are zero-padded decimal bytes.
use super::memory::{MainMemory, WORD_BYTES};
use crate::error::{Result, SimError};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

const UNINIT: &str = "XXXX";

impl MainMemory {
  /// Write the whole store out as a text image.
  pub fn save_image(&self, path: &Path) -> Result<()> {
    let file = fs::File::create(path)?;
    let mut out = BufWriter::new(file);
    self.write_image(&mut out)?;
    out.flush()?;
    Ok(())
  }

  pub fn write_image<W: Write>(&self, out: &mut W) -> Result<()> {
    writeln!(out, "# Byte-Addressed Memory File")?;
    writeln!(out, "# Format: BYTE_ADDRESS: VALUE")?;
    writeln!(out, "# {} indicates uninitialized memory", UNINIT)?;
    writeln!(out, "#")?;
    for (idx, word) in self.words().iter().enumerate() {
      let addr = idx as u32 * WORD_BYTES;
      match word {
        Some(value) => writeln!(out, "{:08}: {:.6}", addr, value)?,
        None => writeln!(out, "{:08}: {}", addr, UNINIT)?,
      }
    }
    Ok(())
  }

  /// Rebuild a store of `capacity_bytes` from a text image. Words the image
  /// does not mention stay uninitialized.
  pub fn load_image(path: &Path, capacity_bytes: usize) -> Result<Self> {
    let content = fs::read_to_string(path)?;
    Self::parse_image(&content, capacity_bytes)
  }

  pub fn parse_image(content: &str, capacity_bytes: usize) -> Result<Self> {
    let mut words: Vec<Option<f32>> = vec![None; capacity_bytes / WORD_BYTES as usize];

    for (lineno, line) in content.lines().enumerate() {
      let line = line.trim();
      if line.is_empty() || line.starts_with('#') {
        continue;
      }
      let bad = |reason: &str| SimError::BadImage {
        line: lineno + 1,
        reason: reason.to_string(),
      };

      let (addr_str, value_str) = line.split_once(':').ok_or_else(|| bad("missing ':'"))?;
      let addr: u32 = addr_str.trim().parse().map_err(|_| bad("address is not a number"))?;
      if addr % WORD_BYTES != 0 {
        return Err(bad("address is not word aligned"));
      }

      let value_str = value_str.trim();
      let value = if value_str == UNINIT {
        None
      } else {
        Some(value_str.parse::<f32>().map_err(|_| bad("value is not a float"))?)
      };

      let idx = (addr / WORD_BYTES) as usize;
      let slot = words
        .get_mut(idx)
        .ok_or_else(|| bad(&format!("address {} beyond {} byte memory", addr, capacity_bytes)))?;
      *slot = value;
    }

    Ok(MainMemory::from_words(words))
  }
}
