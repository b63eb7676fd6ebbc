#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepMode {
  #[default]
  Continuous,
  Step,
}

impl From<bool> for StepMode {
  fn from(step: bool) -> Self {
    if step {
      StepMode::Step
    } else {
      StepMode::Continuous
    }
  }
}
