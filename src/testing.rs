//! Test doubles shared by the unit tests

use std::cell::RefCell;
use std::rc::Rc;

use crate::epd7in3e;
use crate::error::HardwareError;
use crate::traits::{PanelDriver, PanelMode};

/// One call that reached the driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Init,
    Clear,
    Display(usize),
    Sleep,
    Shutdown(bool),
}

#[derive(Default)]
struct Inner {
    calls: Vec<Call>,
    fail_next: Option<HardwareError>,
}

/// Records every call, clones share the same log
#[derive(Clone, Default)]
pub(crate) struct FakeDriver {
    inner: Rc<RefCell<Inner>>,
}

impl FakeDriver {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.inner.borrow().calls.clone()
    }

    pub(crate) fn count(&self, call: &Call) -> usize {
        self.inner.borrow().calls.iter().filter(|c| *c == call).count()
    }

    /// The next init/clear/display/sleep fails with `err`
    pub(crate) fn fail_next(&self, err: HardwareError) {
        self.inner.borrow_mut().fail_next = Some(err);
    }

    fn record(&mut self, call: Call) -> Result<(), HardwareError> {
        let mut inner = self.inner.borrow_mut();
        inner.calls.push(call);
        match inner.fail_next.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl PanelDriver for FakeDriver {
    fn mode(&self) -> PanelMode {
        epd7in3e::MODE
    }

    fn init(&mut self) -> Result<(), HardwareError> {
        self.record(Call::Init)
    }

    fn clear(&mut self) -> Result<(), HardwareError> {
        self.record(Call::Clear)
    }

    fn display(&mut self, buffer: &[u8]) -> Result<(), HardwareError> {
        self.record(Call::Display(buffer.len()))
    }

    fn sleep(&mut self) -> Result<(), HardwareError> {
        self.record(Call::Sleep)
    }

    fn shutdown(&mut self, cleanup: bool) {
        self.inner.borrow_mut().calls.push(Call::Shutdown(cleanup));
    }
}
