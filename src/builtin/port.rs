/// Port and signal types for module interconnection

/// A wire/signal that carries data between modules.
/// Every wire carries its own valid flag.
#[derive(Clone, Debug)]
pub struct Wire<T: Clone> {
  pub value: T,
  pub valid: bool,
}

impl<T: Clone> Wire<T> {
  pub fn new(value: T) -> Self {
    Self { value, valid: false }
  }

  pub fn set(&mut self, value: T) {
    self.value = value;
    self.valid = true;
  }

  pub fn clear(&mut self) {
    self.valid = false;
  }

  /// Returns the value only when the wire is driven.
  pub fn get(&self) -> Option<&T> {
    if self.valid {
      Some(&self.value)
    } else {
      None
    }
  }
}

impl<T: Clone + Default> Default for Wire<T> {
  fn default() -> Self {
    Self {
      value: T::default(),
      valid: false,
    }
  }
}

/// A clocked hardware block.
///
/// `run` advances the block by exactly one clock tick. Composite blocks run
/// their children back-to-front so that each stage consumes what the
/// previous stage registered on the last tick.
pub trait Module {
  fn run(&mut self);
  fn reset(&mut self);
  fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_wire_valid_flag() {
    let mut wire: Wire<u32> = Wire::default();
    assert!(wire.get().is_none());

    wire.set(7);
    assert_eq!(wire.get(), Some(&7));

    wire.clear();
    assert!(wire.get().is_none());
    // value stays latched, only the valid flag drops
    assert_eq!(wire.value, 7);
  }
}
