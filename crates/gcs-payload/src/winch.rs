use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Winch state, with the numeric codes reported over the relay and API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WinchState {
    Disconnected,
    Standby,
    InProgress,
    Error,
    Complete,
    EmergencyReel,
}

impl WinchState {
    pub fn code(self) -> u8 {
        match self {
            WinchState::Disconnected => 0,
            WinchState::Standby => 1,
            WinchState::InProgress => 2,
            WinchState::Error => 3,
            WinchState::Complete => 4,
            WinchState::EmergencyReel => 5,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => WinchState::Disconnected,
            1 => WinchState::Standby,
            2 => WinchState::InProgress,
            3 => WinchState::Error,
            4 => WinchState::Complete,
            5 => WinchState::EmergencyReel,
            _ => return None,
        })
    }

    /// A drop is underway or stuck part way.
    pub fn is_mid_operation(self) -> bool {
        matches!(self, WinchState::InProgress | WinchState::Error | WinchState::EmergencyReel)
    }
}

impl fmt::Display for WinchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WinchState::Disconnected => "disconnected",
            WinchState::Standby => "standby",
            WinchState::InProgress => "in progress",
            WinchState::Error => "error",
            WinchState::Complete => "complete",
            WinchState::EmergencyReel => "emergency reel",
        };
        f.write_str(s)
    }
}

/// Shared winch state. Every read-modify-write happens under one lock.
#[derive(Debug, Clone)]
pub struct WinchCell(Arc<Mutex<WinchState>>);

impl Default for WinchCell {
    fn default() -> Self {
        Self(Arc::new(Mutex::new(WinchState::Disconnected)))
    }
}

impl WinchCell {
    pub fn get(&self) -> WinchState {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set(&self, state: WinchState) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Apply `f` atomically; returns the new state.
    pub fn update(&self, f: impl FnOnce(WinchState) -> WinchState) -> WinchState {
        let mut guard = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = f(*guard);
        *guard
    }

    /// Operator cancel: reel in whatever is out. Returns the prior state.
    pub fn request_emergency_reel(&self) -> WinchState {
        let mut guard = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        let prev = *guard;
        *guard = WinchState::EmergencyReel;
        prev
    }

    /// Failsafe cancel: only flags the reel when a drop is underway.
    pub fn reel_if_mid_operation(&self) -> bool {
        let mut flagged = false;
        self.update(|s| {
            if s.is_mid_operation() {
                flagged = true;
                WinchState::EmergencyReel
            } else {
                s
            }
        });
        flagged
    }

    /// Leave `EmergencyReel` for `Standby`; false if someone else already did.
    pub(crate) fn clear_emergency_reel(&self) -> bool {
        let mut cleared = false;
        self.update(|s| {
            if s == WinchState::EmergencyReel {
                cleared = true;
                WinchState::Standby
            } else {
                s
            }
        });
        cleared
    }
}
