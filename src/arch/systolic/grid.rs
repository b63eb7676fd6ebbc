// Systolic grid: M×N processing elements in a 2-D mesh

use super::pe::{Dataflow, ProcessingElement};
use crate::builtin::Wire;

/// Boundary signals the controller drives into the grid for one tick.
#[derive(Debug, Clone)]
pub struct GridInputs {
  /// One per column, feeds row 0
  pub in_top: Vec<f32>,
  /// One per row, feeds column 0
  pub in_left: Vec<f32>,
  /// `valid` is the shared preload/drain strobe; `value[i * cols + j]` is
  /// the weight for PE(i, j)
  pub preload: Wire<Vec<f32>>,
  /// Synchronous reset pulse
  pub reset: bool,
}

impl GridInputs {
  pub fn new(rows: usize, cols: usize) -> Self {
    Self {
      in_top: vec![0.0; cols],
      in_left: vec![0.0; rows],
      preload: Wire::new(vec![0.0; rows * cols]),
      reset: false,
    }
  }

  /// Drive every port to its idle level.
  pub fn clear(&mut self) {
    self.in_top.fill(0.0);
    self.in_left.fill(0.0);
    self.preload.value.fill(0.0);
    self.preload.clear();
    self.reset = false;
  }
}

/// M-row × N-column grid.
///
/// PE(i, j) reads only from PE(i-1, j) and PE(i, j-1) (or the boundary)
/// and its outputs reach PE(i+1, j) and PE(i, j+1) on the next tick.
#[derive(Debug, Clone)]
pub struct SystolicGrid {
  rows: usize,
  cols: usize,
  /// Row-major, indexed by `i * cols + j`
  pes: Vec<ProcessingElement>,
  // registered outputs of the previous tick
  prev_right: Vec<f32>,
  prev_bottom: Vec<f32>,
}

impl SystolicGrid {
  pub fn new(rows: usize, cols: usize, mode: Dataflow) -> Self {
    assert!(rows > 0 && cols > 0, "grid must have at least one PE");
    let pes = (0..rows * cols)
      .map(|k| ProcessingElement::new(k / cols, k % cols, mode))
      .collect();
    Self {
      rows,
      cols,
      pes,
      prev_right: vec![0.0; rows * cols],
      prev_bottom: vec![0.0; rows * cols],
    }
  }

  pub fn rows(&self) -> usize {
    self.rows
  }

  pub fn cols(&self) -> usize {
    self.cols
  }

  pub fn mode(&self) -> Dataflow {
    self.pes[0].mode()
  }

  pub fn set_mode(&mut self, mode: Dataflow) {
    for pe in &mut self.pes {
      pe.set_mode(mode);
    }
  }

  pub fn pe(&self, row: usize, col: usize) -> &ProcessingElement {
    assert!(row < self.rows && col < self.cols, "PE ({}, {}) outside grid", row, col);
    &self.pes[row * self.cols + col]
  }

  pub fn pes(&self) -> &[ProcessingElement] {
    &self.pes
  }

  /// Registered value on the bottom boundary port of `col`.
  pub fn out_bottom(&self, col: usize) -> f32 {
    self.pe(self.rows - 1, col).out_bottom()
  }

  /// Registered value on the right boundary port of `row`.
  pub fn out_right(&self, row: usize) -> f32 {
    self.pe(row, self.cols - 1).out_right()
  }

  pub fn reset(&mut self) {
    for pe in &mut self.pes {
      pe.reset();
    }
  }

  /// Clock every PE once.
  pub fn step(&mut self, inputs: &GridInputs) {
    self.step_ordered(inputs, 0..self.pes.len());
  }

  /// Clock every PE once, evaluating them in `order`. Results do not depend
  /// on the order: all cells see the previous tick's registers.
  pub(crate) fn step_ordered<I: IntoIterator<Item = usize>>(&mut self, inputs: &GridInputs, order: I) {
    assert_eq!(inputs.in_top.len(), self.cols, "in_top width");
    assert_eq!(inputs.in_left.len(), self.rows, "in_left height");
    assert_eq!(inputs.preload.value.len(), self.pes.len(), "preload size");

    // phase 1: latch last tick's outputs
    for (k, pe) in self.pes.iter().enumerate() {
      self.prev_right[k] = pe.out_right();
      self.prev_bottom[k] = pe.out_bottom();
    }

    // phase 2: every PE steps against the latched values
    let preload_valid = inputs.preload.valid;
    for k in order {
      let (i, j) = (k / self.cols, k % self.cols);
      let pe = &mut self.pes[k];
      if inputs.reset {
        pe.reset();
        continue;
      }
      let in_left = if j == 0 { inputs.in_left[i] } else { self.prev_right[k - 1] };
      let in_top = if i == 0 { inputs.in_top[j] } else { self.prev_bottom[k - self.cols] };
      pe.step(in_top, in_left, preload_valid, inputs.preload.value[k]);
    }
  }
}
