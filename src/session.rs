//! Lifecycle state machine around one physical panel
//!
//! ```text
//! Uninitialized --init--> Initialized --clear--> Cleared
//!                              |                   |  ^
//!                              +------display------+--+--> Displaying
//! Initialized | Cleared | Displaying --sleep--> Sleeping --init--> Initialized
//! any hardware failure --> Failed
//! any state --shutdown--> Released
//! ```

use tracing::{debug, warn};

use crate::error::{HardwareError, SessionError};
use crate::traits::{PanelDriver, PanelMode};

/// Where a [`PanelSession`] currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelState {
    /// Controller not configured yet
    Uninitialized,
    /// Controller configured, nothing written since
    Initialized,
    /// Blank frame on the panel
    Cleared,
    /// A frame was transmitted and refreshed
    Displaying,
    /// Controller in deep sleep, needs a fresh `init` to do anything
    Sleeping,
    /// A hardware operation failed, only `shutdown` is allowed
    Failed,
    /// Hardware handles were given back, the session is done
    Released,
}

const DRAWABLE: [PanelState; 3] = [
    PanelState::Initialized,
    PanelState::Cleared,
    PanelState::Displaying,
];

/// Exclusive owner of one panel driver
///
/// Enforces the legal order of operations and guarantees the hardware handles are
/// released exactly once, at the latest when the session is dropped.
pub struct PanelSession<D: PanelDriver> {
    driver: D,
    state: PanelState,
}

impl<D: PanelDriver> PanelSession<D> {
    /// Wraps a driver that has not been initialised yet
    pub fn new(driver: D) -> Self {
        PanelSession {
            driver,
            state: PanelState::Uninitialized,
        }
    }

    /// Current state
    pub fn state(&self) -> PanelState {
        self.state
    }

    /// Resolution and color depth of the wrapped panel
    pub fn mode(&self) -> PanelMode {
        self.driver.mode()
    }

    /// Exact byte count [`PanelSession::display`] accepts
    pub fn expected_len(&self) -> usize {
        self.mode().buffer_len()
    }

    /// Hardware bring-up: reset pulse and register configuration
    ///
    /// Legal from `Uninitialized` and from `Sleeping` (waking up needs a full
    /// re-init on these controllers).
    pub fn init(&mut self) -> Result<(), SessionError> {
        self.require(
            "init",
            &[PanelState::Uninitialized, PanelState::Sleeping],
        )?;
        self.hardware("init", PanelState::Initialized, |driver| driver.init())
    }

    /// Writes a blank frame and waits for the refresh to finish
    pub fn clear(&mut self) -> Result<(), SessionError> {
        self.require("clear", &DRAWABLE)?;
        self.hardware("clear", PanelState::Cleared, |driver| driver.clear())
    }

    /// Transmits `buffer` and waits for the refresh to finish
    ///
    /// A buffer of the wrong size is rejected before anything is sent.
    pub fn display(&mut self, buffer: &[u8]) -> Result<(), SessionError> {
        self.require("display", &DRAWABLE)?;
        let expected = self.expected_len();
        if buffer.len() != expected {
            return Err(SessionError::BufferSize {
                expected,
                actual: buffer.len(),
            });
        }
        self.hardware("display", PanelState::Displaying, |driver| {
            driver.display(buffer)
        })
    }

    /// Puts the controller into deep sleep, a no-op when it already sleeps
    pub fn sleep(&mut self) -> Result<(), SessionError> {
        if self.state == PanelState::Sleeping {
            return Ok(());
        }
        self.require("sleep", &DRAWABLE)?;
        self.hardware("sleep", PanelState::Sleeping, |driver| driver.sleep())
    }

    /// Releases the SPI and GPIO handles
    ///
    /// Allowed from every state. Only the first call reaches the driver.
    pub fn shutdown(&mut self, cleanup: bool) {
        if self.state == PanelState::Released {
            return;
        }
        if !matches!(
            self.state,
            PanelState::Sleeping | PanelState::Uninitialized | PanelState::Failed
        ) {
            warn!(state = ?self.state, "releasing a panel that is not asleep");
        }
        self.driver.shutdown(cleanup);
        self.transition("shutdown", PanelState::Released);
    }

    fn require(
        &self,
        operation: &'static str,
        allowed: &[PanelState],
    ) -> Result<(), SessionError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(SessionError::State {
                operation,
                state: self.state,
            })
        }
    }

    fn hardware<F>(
        &mut self,
        operation: &'static str,
        next: PanelState,
        f: F,
    ) -> Result<(), SessionError>
    where
        F: FnOnce(&mut D) -> Result<(), HardwareError>,
    {
        match f(&mut self.driver) {
            Ok(()) => {
                self.transition(operation, next);
                Ok(())
            }
            Err(err) => {
                self.transition(operation, PanelState::Failed);
                Err(SessionError::from_hardware(operation, err))
            }
        }
    }

    fn transition(&mut self, operation: &'static str, next: PanelState) {
        debug!(operation, from = ?self.state, to = ?next, "panel state");
        self.state = next;
    }
}

impl<D: PanelDriver> Drop for PanelSession<D> {
    fn drop(&mut self) {
        self.shutdown(true);
    }
}
