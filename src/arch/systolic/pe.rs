// Processing element: one multiply-accumulate cell of the systolic grid

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Dataflow the grid is configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Dataflow {
  /// Weights are preloaded and held; activations stream left-to-right and
  /// partial sums flow top-to-bottom.
  #[default]
  #[serde(rename = "ws")]
  WeightStationary,
  /// Each cell accumulates one output element in place, then drains it
  /// down its column.
  #[serde(rename = "os")]
  OutputStationary,
}

impl fmt::Display for Dataflow {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Dataflow::WeightStationary => write!(f, "ws"),
      Dataflow::OutputStationary => write!(f, "os"),
    }
  }
}

impl FromStr for Dataflow {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "ws" | "weight_stationary" | "weight-stationary" => Ok(Dataflow::WeightStationary),
      "os" | "output_stationary" | "output-stationary" => Ok(Dataflow::OutputStationary),
      other => Err(format!("unknown dataflow mode: {}", other)),
    }
  }
}

/// Processing Element (PE)
///
/// Registers are only ever written by [`ProcessingElement::step`] or
/// [`ProcessingElement::reset`]; neighbours observe `out_right` and
/// `out_bottom` one tick later.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingElement {
  row: usize,
  col: usize,
  mode: Dataflow,
  weight_register: f32,
  accumulator: f32,
  out_right: f32,
  out_bottom: f32,
  /// OS drain: this cell already emitted its accumulator
  drain_sent: bool,
}

impl ProcessingElement {
  pub fn new(row: usize, col: usize, mode: Dataflow) -> Self {
    Self {
      row,
      col,
      mode,
      weight_register: 0.0,
      accumulator: 0.0,
      out_right: 0.0,
      out_bottom: 0.0,
      drain_sent: false,
    }
  }

  /// Zero every register. The mode is configuration, not state, and stays.
  pub fn reset(&mut self) {
    self.weight_register = 0.0;
    self.accumulator = 0.0;
    self.out_right = 0.0;
    self.out_bottom = 0.0;
    self.drain_sent = false;
  }

  /// Advance one clock tick.
  ///
  /// # Arguments
  /// * `in_top` - value from the cell above (or the grid's top port)
  /// * `in_left` - value from the cell to the left (or the grid's left port)
  /// * `preload_valid` - WS: latch `preload_data` as the weight. OS: drain
  /// * `preload_data` - weight for this cell
  ///
  /// # Returns
  /// The new `(out_right, out_bottom)` registers.
  pub fn step(&mut self, in_top: f32, in_left: f32, preload_valid: bool, preload_data: f32) -> (f32, f32) {
    match self.mode {
      Dataflow::WeightStationary => {
        // a weight loaded this tick is used this tick
        if preload_valid {
          self.weight_register = preload_data;
        }
        self.accumulator = in_left * self.weight_register + in_top;
        self.out_bottom = self.accumulator;
        self.out_right = in_left;
        self.drain_sent = false;
      },
      Dataflow::OutputStationary if preload_valid => {
        if self.drain_sent {
          self.out_bottom = in_top;
        } else {
          self.out_bottom = self.accumulator;
          self.drain_sent = true;
        }
        self.out_right = 0.0;
      },
      Dataflow::OutputStationary => {
        self.accumulator += in_top * in_left;
        self.out_right = in_left;
        self.out_bottom = in_top;
        self.drain_sent = false;
      },
    }
    (self.out_right, self.out_bottom)
  }

  pub fn set_mode(&mut self, mode: Dataflow) {
    self.mode = mode;
  }

  pub fn mode(&self) -> Dataflow {
    self.mode
  }

  pub fn row(&self) -> usize {
    self.row
  }

  pub fn col(&self) -> usize {
    self.col
  }

  pub fn weight(&self) -> f32 {
    self.weight_register
  }

  pub fn accumulator(&self) -> f32 {
    self.accumulator
  }

  pub fn out_right(&self) -> f32 {
    self.out_right
  }

  pub fn out_bottom(&self) -> f32 {
    self.out_bottom
  }

  pub fn drain_sent(&self) -> bool {
    self.drain_sent
  }
}
