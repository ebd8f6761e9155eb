//! Irrigation decision logic: threshold-driven automatic control with a
//! remotely settable manual override.
//!
//! In automatic mode the motor runs while the raw reading is above the
//! threshold (higher reads drier). In manual mode the threshold is ignored
//! and the motor follows the remote `isOn` value a user set.
//!
//! Local state is authoritative. Every motor change is mirrored to the
//! remote store, but a failed mirror write never rolls the relay back.

use tracing::{debug, info, warn};

use crate::relay::{Relay, RelayPin};
use crate::store::{RemoteStore, MOTOR_IS_ON, MOTOR_MANUAL_MODE};

/// Process-lifetime controller state. Starts with the motor off, automatic
/// control, and no moisture reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IrrigationState {
    pub is_motor_on: bool,
    pub manual_mode: bool,
    /// Latest raw moisture reading.
    pub soil_moisture: i32,
}

pub struct IrrigationController<P, S> {
    state: IrrigationState,
    relay: Relay<P>,
    store: S,
    threshold: i32,
}

fn on_off(on: bool) -> &'static str {
    if on {
        "ON"
    } else {
        "OFF"
    }
}

impl<P: RelayPin, S: RemoteStore> IrrigationController<P, S> {
    pub fn new(relay: Relay<P>, store: S, threshold: i32) -> Self {
        Self {
            state: IrrigationState::default(),
            relay,
            store,
            threshold,
        }
    }

    pub fn state(&self) -> IrrigationState {
        self.state
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Record a moisture reading. Returns whether it differs from the last one.
    pub fn update_moisture(&mut self, value: i32) -> bool {
        let changed = value != self.state.soil_moisture;
        self.state.soil_moisture = value;
        changed
    }

    /// Drive the motor. A request matching the current state touches
    /// neither the relay nor the store.
    pub async fn set_motor(&mut self, on: bool) {
        if self.state.is_motor_on == on {
            debug!(motor = on_off(on), "motor already in requested state");
            return;
        }

        self.state.is_motor_on = on;
        self.relay.set(on);
        info!(motor = on_off(on), "motor switched");

        match self.store.set_bool(MOTOR_IS_ON, on).await {
            Ok(()) => debug!("motor state mirrored"),
            Err(e) => warn!(path = MOTOR_IS_ON, "motor state update failed: {e:#}"),
        }
        let manual = self.state.manual_mode;
        match self.store.set_bool(MOTOR_MANUAL_MODE, manual).await {
            Ok(()) => debug!("manual mode mirrored"),
            Err(e) => warn!(path = MOTOR_MANUAL_MODE, "manual mode update failed: {e:#}"),
        }
    }

    /// Pull the override flag from the store and, in manual mode, follow
    /// the remote motor state. Read failures keep the local values.
    pub async fn reconcile_from_remote(&mut self) {
        self.adopt_remote_manual_flag().await;
        if self.state.manual_mode {
            self.follow_remote_motor().await;
        }
    }

    /// End-of-pass check. Like [`reconcile_from_remote`], but the remote
    /// motor state is followed in either mode; in automatic mode a
    /// dashboard toggle holds until the next threshold decision.
    ///
    /// [`reconcile_from_remote`]: Self::reconcile_from_remote
    pub async fn follow_remote(&mut self) {
        self.adopt_remote_manual_flag().await;
        self.follow_remote_motor().await;
    }

    async fn adopt_remote_manual_flag(&mut self) {
        // Overwritten on every successful read, changed or not.
        match self.store.get_bool(MOTOR_MANUAL_MODE).await {
            Ok(manual) => self.state.manual_mode = manual,
            Err(e) => debug!("manual mode read skipped: {e:#}"),
        }
    }

    async fn follow_remote_motor(&mut self) {
        match self.store.get_bool(MOTOR_IS_ON).await {
            Ok(remote_on) if remote_on != self.state.is_motor_on => {
                info!(motor = on_off(remote_on), "following remote motor state");
                self.set_motor(remote_on).await;
            }
            Ok(_) => {}
            Err(e) => debug!("remote motor state read skipped: {e:#}"),
        }
    }

    /// Threshold control. Does nothing while manual mode is on.
    pub async fn run_auto_logic(&mut self) {
        if self.state.manual_mode {
            info!("manual mode on, ignoring auto logic");
            return;
        }

        let moisture = self.state.soil_moisture;
        let dry = moisture > self.threshold;
        debug!(
            moisture,
            threshold = self.threshold,
            "soil is {}",
            if dry { "dry" } else { "wet" }
        );
        self.set_motor(dry).await;
    }
}

// ===========================================================================
// Tests
// ===========================================================================
