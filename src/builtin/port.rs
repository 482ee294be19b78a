/// Valid-tagged register carried between pipeline stages.
///
/// Clearing only drops the valid bit; the stale value stays behind, like a
/// hardware latch whose enable went low.
#[derive(Debug, Clone)]
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

  pub fn get(&self) -> Option<&T> {
    if self.valid {
      Some(&self.value)
    } else {
      None
    }
  }

  pub fn get_mut(&mut self) -> Option<&mut T> {
    if self.valid {
      Some(&mut self.value)
    } else {
      None
    }
  }

  /// Hand the value to the consumer and invalidate the register.
  pub fn take(&mut self) -> Option<T> {
    if self.valid {
      self.valid = false;
      Some(self.value.clone())
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
