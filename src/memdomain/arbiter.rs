/// Shared memory bus: one backing store behind several ports, granted one
/// requester per cycle in round-robin order
use super::cache::CacheStats;
use super::memory::Storage;
use crate::error::Result;
use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

/// Handle onto a store shared by several ports. Clones refer to the same
/// store.
pub struct SharedMemory<S: Storage> {
  inner: Rc<RefCell<S>>,
}

impl<S: Storage> Clone for SharedMemory<S> {
  fn clone(&self) -> Self {
    Self {
      inner: Rc::clone(&self.inner),
    }
  }
}

impl<S: Storage> SharedMemory<S> {
  pub fn new(storage: S) -> Self {
    Self {
      inner: Rc::new(RefCell::new(storage)),
    }
  }

  pub fn borrow(&self) -> Ref<'_, S> {
    self.inner.borrow()
  }

  pub fn borrow_mut(&self) -> RefMut<'_, S> {
    self.inner.borrow_mut()
  }

  /// Number of live handles, this one included.
  pub fn handles(&self) -> usize {
    Rc::strong_count(&self.inner)
  }

  /// Recover the store once every other handle is gone.
  pub fn try_unwrap(self) -> std::result::Result<S, Self> {
    Rc::try_unwrap(self.inner)
      .map(RefCell::into_inner)
      .map_err(|inner| Self { inner })
  }
}

impl<S: Storage> Storage for SharedMemory<S> {
  fn read(&mut self, addr: u32) -> Result<f32> {
    self.inner.borrow_mut().read(addr)
  }

  fn write(&mut self, addr: u32, value: f32) -> Result<()> {
    self.inner.borrow_mut().write(addr, value)
  }

  fn capacity_bytes(&self) -> usize {
    self.inner.borrow().capacity_bytes()
  }

  fn flush(&mut self) -> Result<()> {
    self.inner.borrow_mut().flush()
  }

  fn cache_stats(&self) -> Option<CacheStats> {
    self.inner.borrow().cache_stats()
  }
}

/// Round-robin bus arbiter. The search for the next grant starts one past
/// the last requester served.
#[derive(Debug, Clone)]
pub struct RoundRobinArbiter {
  next: usize,
  grants: Vec<u64>,
  contended: u64,
}

impl RoundRobinArbiter {
  pub fn new(clients: usize) -> Self {
    Self {
      next: 0,
      grants: vec![0; clients],
      contended: 0,
    }
  }

  pub fn clients(&self) -> usize {
    self.grants.len()
  }

  /// Grants handed to each client so far
  pub fn grants(&self) -> &[u64] {
    &self.grants
  }

  /// Cycles on which more than one client was requesting
  pub fn contended_cycles(&self) -> u64 {
    self.contended
  }

  /// Pick this cycle's bus owner among the raised `requests`.
  pub fn arbitrate(&mut self, requests: &[bool]) -> Option<usize> {
    assert_eq!(requests.len(), self.grants.len(), "one request line per client");
    let n = requests.len();
    let winner = (0..n).map(|offset| (self.next + offset) % n).find(|&idx| requests[idx])?;

    if requests.iter().filter(|&&r| r).count() > 1 {
      self.contended += 1;
    }
    self.grants[winner] += 1;
    self.next = (winner + 1) % n;
    log::trace!("arbiter: grant {} of {:?}", winner, requests);
    Some(winner)
  }

  pub fn reset(&mut self) {
    self.next = 0;
    self.grants.iter_mut().for_each(|g| *g = 0);
    self.contended = 0;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::memdomain::MainMemory;

  #[test]
  fn test_round_robin_rotates() {
    let mut arb = RoundRobinArbiter::new(3);
    let all = [true, true, true];
    let order: Vec<_> = (0..6).map(|_| arb.arbitrate(&all).unwrap()).collect();
    assert_eq!(order, vec![0, 1, 2, 0, 1, 2]);
    assert_eq!(arb.grants(), &[2, 2, 2]);
    assert_eq!(arb.contended_cycles(), 6);
  }

  #[test]
  fn test_idle_clients_are_skipped() {
    let mut arb = RoundRobinArbiter::new(4);
    assert_eq!(arb.arbitrate(&[false, false, false, false]), None);
    assert_eq!(arb.arbitrate(&[false, false, true, false]), Some(2));
    // search resumes after 2, wraps to 0
    assert_eq!(arb.arbitrate(&[true, false, true, false]), Some(0));
    assert_eq!(arb.arbitrate(&[true, false, true, false]), Some(2));
    assert_eq!(arb.contended_cycles(), 2);
  }

  #[test]
  fn test_no_client_starves() {
    let mut arb = RoundRobinArbiter::new(3);
    // every client asks on every cycle
    for _ in 0..300 {
      arb.arbitrate(&[true, true, true]);
    }
    let g = arb.grants();
    assert!(g.iter().all(|&n| n == 100), "{:?}", g);

    arb.reset();
    assert_eq!(arb.grants(), &[0, 0, 0]);
    assert_eq!(arb.arbitrate(&[false, true, true]), Some(1));
  }

  #[test]
  fn test_shared_handles_see_one_store() {
    let mem = SharedMemory::new(MainMemory::new(64));
    let mut a = mem.clone();
    let mut b = mem.clone();
    a.write(8, 4.0).unwrap();
    assert_eq!(b.read(8).unwrap(), 4.0);
    assert_eq!(mem.borrow().writes(), 1);
    assert_eq!(mem.handles(), 3);

    drop(a);
    let mem = mem.try_unwrap().err().unwrap();
    drop(b);
    let inner = mem.try_unwrap().ok().unwrap();
    assert_eq!(inner.reads(), 1);
  }
}
