/// One-tick-latency request/response port in front of a `Storage`
use super::memory::Storage;
use crate::builtin::{Module, Wire};
use crate::error::SimError;

/// Read request
#[derive(Clone, Debug, Default)]
pub struct ReadReq {
  pub addr: u32,
}

/// Read response
#[derive(Clone, Debug, Default)]
pub struct ReadResp {
  pub addr: u32,
  pub data: f32,
}

/// Write request
#[derive(Clone, Debug, Default)]
pub struct WriteReq {
  pub addr: u32,
  pub data: f32,
}

/// Memory port. A request driven on tick t is serviced when the port runs
/// on tick t+1; a read's response is valid for that one tick only.
///
/// Requests that need the shared bus wait while `grant` is low. A waiting
/// request stays on its wire until it is serviced.
pub struct MemPort<S: Storage> {
  name: String,

  // inputs, driven by the controller
  pub read_req: Wire<ReadReq>,
  pub write_req: Wire<WriteReq>,

  // output
  pub read_resp: Wire<ReadResp>,

  storage: S,
  fault: Option<SimError>,
  grant: bool,
  stall_cycles: u64,
}

impl<S: Storage> MemPort<S> {
  pub fn new(name: impl Into<String>, storage: S) -> Self {
    Self {
      name: name.into(),
      read_req: Wire::default(),
      write_req: Wire::default(),
      read_resp: Wire::default(),
      storage,
      fault: None,
      grant: true,
      stall_cycles: 0,
    }
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  pub fn storage_mut(&mut self) -> &mut S {
    &mut self.storage
  }

  pub fn into_storage(self) -> S {
    self.storage
  }

  /// No request is waiting to be serviced.
  pub fn is_idle(&self) -> bool {
    !self.read_req.valid && !self.write_req.valid
  }

  /// Bus grant for the coming tick. Ports that own their storage keep it high.
  pub fn set_grant(&mut self, grant: bool) {
    self.grant = grant;
  }

  /// A pending request that cannot be served locally.
  pub fn bus_request(&self) -> bool {
    let write = self.write_req.get().is_some_and(|req| !self.storage.is_local(req.addr));
    let read = self.read_req.get().is_some_and(|req| !self.storage.is_local(req.addr));
    write || read
  }

  /// Ticks a request spent waiting for the bus since the last reset.
  pub fn stall_cycles(&self) -> u64 {
    self.stall_cycles
  }

  /// Error raised by the last serviced request, if any.
  pub fn take_fault(&mut self) -> Option<SimError> {
    self.fault.take()
  }
}

impl<S: Storage> Module for MemPort<S> {
  fn run(&mut self) {
    if !self.grant && self.bus_request() {
      self.read_resp.clear();
      self.stall_cycles += 1;
      return;
    }

    // serviced requests are consumed; the controller drives the next one
    if let Some(req) = self.write_req.get().cloned() {
      if let Err(e) = self.storage.write(req.addr, req.data) {
        self.fault = Some(e);
      }
      self.write_req.clear();
    }

    match self.read_req.get().cloned() {
      Some(req) => {
        match self.storage.read(req.addr) {
          Ok(data) => self.read_resp.set(ReadResp { addr: req.addr, data }),
          Err(e) => {
            self.read_resp.clear();
            self.fault = Some(e);
          },
        }
        self.read_req.clear();
      },
      None => self.read_resp.clear(),
    }
  }

  fn reset(&mut self) {
    self.read_req = Wire::default();
    self.write_req = Wire::default();
    self.read_resp = Wire::default();
    self.fault = None;
    self.stall_cycles = 0;
  }

  fn name(&self) -> &str {
    &self.name
  }
}
