// Fixed-size staging buffer for one tile of A, W or C

/// `dim`×`dim` row-major buffer with stride `dim`, sized to the grid no
/// matter how large the logical matrix is.
///
/// Only the top-left `rows`×`cols` window holds data; every entry outside it
/// is kept at exactly 0.0.
#[derive(Debug, Clone, PartialEq)]
pub struct TileBuffer {
  data: Vec<f32>,
  dim: usize,
  rows: usize,
  cols: usize,
}

impl TileBuffer {
  pub fn new(dim: usize) -> Self {
    Self {
      data: vec![0.0; dim * dim],
      dim,
      rows: 0,
      cols: 0,
    }
  }

  /// Zero the whole buffer and open a `rows`×`cols` window for new data.
  pub fn prepare(&mut self, rows: usize, cols: usize) {
    assert!(
      rows <= self.dim && cols <= self.dim,
      "tile extent {}x{} exceeds {}x{} buffer",
      rows,
      cols,
      self.dim,
      self.dim
    );
    self.data.fill(0.0);
    self.rows = rows;
    self.cols = cols;
  }

  pub fn dim(&self) -> usize {
    self.dim
  }

  pub fn stride(&self) -> usize {
    self.dim
  }

  /// Valid rows of the window
  pub fn rows(&self) -> usize {
    self.rows
  }

  /// Valid columns of the window
  pub fn cols(&self) -> usize {
    self.cols
  }

  /// Read any position of the buffer; padding reads as 0.0.
  pub fn get(&self, row: usize, col: usize) -> f32 {
    assert!(row < self.dim && col < self.dim, "({}, {}) outside tile buffer", row, col);
    self.data[row * self.dim + col]
  }

  pub fn set(&mut self, row: usize, col: usize, value: f32) {
    self.check_window(row, col);
    self.data[row * self.dim + col] = value;
  }

  pub fn add(&mut self, row: usize, col: usize, value: f32) {
    self.check_window(row, col);
    self.data[row * self.dim + col] += value;
  }

  /// Element-wise `self += other` over the valid window.
  pub fn accumulate(&mut self, other: &TileBuffer) {
    assert_eq!(
      (self.dim, self.rows, self.cols),
      (other.dim, other.rows, other.cols),
      "tile shapes differ"
    );
    for (dst, src) in self.data.iter_mut().zip(&other.data) {
      *dst += *src;
    }
  }

  /// True when nothing outside the valid window is non-zero.
  pub fn is_zero_padded(&self) -> bool {
    self.data.iter().enumerate().all(|(k, &v)| {
      let (r, c) = (k / self.dim, k % self.dim);
      (r < self.rows && c < self.cols) || v == 0.0
    })
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }

  fn check_window(&self, row: usize, col: usize) {
    assert!(
      row < self.rows && col < self.cols,
      "({}, {}) outside the {}x{} tile window",
      row,
      col,
      self.rows,
      self.cols
    );
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_prepare_zero_fills() {
    let mut tile = TileBuffer::new(3);
    tile.prepare(3, 3);
    tile.set(2, 2, 9.0);

    tile.prepare(2, 1);
    assert_eq!(tile.get(2, 2), 0.0);
    assert_eq!((tile.rows(), tile.cols(), tile.stride()), (2, 1, 3));
    assert!(tile.is_zero_padded());
  }

  #[test]
  #[should_panic(expected = "outside the 2x2 tile window")]
  fn test_write_outside_window_panics() {
    let mut tile = TileBuffer::new(4);
    tile.prepare(2, 2);
    tile.set(2, 0, 1.0);
  }

  #[test]
  fn test_accumulate() {
    let mut c = TileBuffer::new(2);
    let mut partial = TileBuffer::new(2);
    c.prepare(2, 1);
    partial.prepare(2, 1);
    c.set(0, 0, 1.0);
    partial.set(0, 0, 2.0);
    partial.add(1, 0, 4.0);

    c.accumulate(&partial);
    assert_eq!(c.as_slice(), &[3.0, 0.0, 4.0, 0.0]);
  }
}
