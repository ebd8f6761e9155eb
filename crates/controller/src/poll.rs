//! The fixed-period driver. One iteration at a time, never overlapping:
//!
//! 1. every `poll_period` (and on the very first pass), if the store session
//!    is ready: reconcile, sample moisture and environment, run the
//!    threshold logic, publish telemetry;
//! 2. always: adopt the remote override flag and follow the remote motor
//!    state, in either mode;
//! 3. always: sleep the floor interval.

use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::TimingConfig;
use crate::controller::IrrigationController;
use crate::datetime::DateSource;
use crate::relay::RelayPin;
use crate::sensor::{Environment, SensorReader};
use crate::store::{fields, RemoteStore, ENVIRONMENT, MOISTURE_CURRENT, MOISTURE_LOG};
use crate::telemetry::{Sample, TelemetryPublisher};

/// Two decimals, like the telemetry fields.
fn reading(v: f32) -> Value {
    json!((f64::from(v) * 100.0).round() / 100.0)
}

pub struct PollLoop<P, S, R, T, D> {
    controller: IrrigationController<P, S>,
    sensors: R,
    telemetry: Option<T>,
    dates: D,
    period: Duration,
    floor_sleep: Duration,
    settle: Duration,
    last_run: Option<Instant>,
}

impl<P, S, R, T, D> PollLoop<P, S, R, T, D>
where
    P: RelayPin,
    S: RemoteStore,
    R: SensorReader,
    T: TelemetryPublisher,
    D: DateSource,
{
    /// `telemetry: None` disables publishing.
    pub fn new(
        controller: IrrigationController<P, S>,
        sensors: R,
        telemetry: Option<T>,
        dates: D,
        timing: &TimingConfig,
    ) -> Self {
        Self {
            controller,
            sensors,
            telemetry,
            dates,
            period: timing.poll_period(),
            floor_sleep: timing.floor_sleep(),
            settle: timing.sensor_settle(),
            last_run: None,
        }
    }

    /// Run forever. There is no shutdown path.
    pub async fn run(mut self) {
        info!(
            period_ms = self.period.as_millis() as u64,
            floor_ms = self.floor_sleep.as_millis() as u64,
            "poll loop started"
        );
        loop {
            self.tick().await;
        }
    }

    /// One loop iteration, trailing sleep included.
    pub async fn tick(&mut self) {
        if self.due() {
            if self.controller.store_mut().ready().await {
                self.last_run = Some(Instant::now());
                self.main_work().await;
            } else {
                warn!("store not ready, skipping sensor cycle");
            }
        }

        self.controller.follow_remote().await;
        sleep(self.floor_sleep).await;
    }

    fn due(&self) -> bool {
        self.last_run
            .map_or(true, |last| last.elapsed() > self.period)
    }

    async fn main_work(&mut self) {
        self.controller.reconcile_from_remote().await;
        self.sample_moisture().await;
        let environment = self.sample_environment().await;

        // Let the probe settle before the next access.
        if !self.settle.is_zero() {
            sleep(self.settle).await;
        }

        self.controller.run_auto_logic().await;
        self.sensors
            .observe_motor(self.controller.state().is_motor_on);

        self.publish_telemetry(environment).await;
    }

    async fn sample_moisture(&mut self) {
        let value = match self.sensors.read_moisture() {
            Ok(v) => v,
            Err(e) => {
                warn!("moisture read failed: {e:#}");
                return;
            }
        };

        if !self.controller.update_moisture(value) {
            return;
        }
        info!(moisture = value, "soil moisture changed");

        let store = self.controller.store_mut();
        if let Err(e) = store.set_int(MOISTURE_CURRENT, i64::from(value)).await {
            warn!(path = MOISTURE_CURRENT, "moisture update failed: {e:#}");
        }

        let datetime = self.dates.lookup().await;
        let entry = fields([("value", json!(value)), ("datetime", json!(datetime))]);
        if let Err(e) = self.controller.store_mut().append(MOISTURE_LOG, entry).await {
            warn!(path = MOISTURE_LOG, "moisture log append failed: {e:#}");
        }
    }

    async fn sample_environment(&mut self) -> Option<Environment> {
        let Some(env) = self.sensors.read_environment() else {
            warn!("failed to read from temperature/humidity probe");
            return None;
        };
        info!(
            temperature = env.temperature,
            humidity = env.humidity,
            "environment read"
        );

        let object = fields([
            ("temperature", reading(env.temperature)),
            ("humidity", reading(env.humidity)),
        ]);
        match self.controller.store_mut().set_object(ENVIRONMENT, object).await {
            Ok(()) => debug!("environment mirrored"),
            Err(e) => warn!(path = ENVIRONMENT, "environment update failed: {e:#}"),
        }
        Some(env)
    }

    async fn publish_telemetry(&mut self, environment: Option<Environment>) {
        let Some(publisher) = self.telemetry.as_mut() else {
            return;
        };
        let Some(env) = environment else {
            debug!("telemetry skipped: no valid environment reading");
            return;
        };

        let sample = Sample {
            temperature: env.temperature,
            humidity: env.humidity,
            moisture: self.controller.state().soil_moisture,
        };
        if let Err(e) = publisher.publish(&sample).await {
            warn!("telemetry publish failed: {e:#}");
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::{MockPin, Relay};
    use crate::store::{MemoryStore, MOTOR_IS_ON, MOTOR_MANUAL_MODE};
    use anyhow::{bail, Result};
    use std::collections::VecDeque;

    // -- Fakes ------------------------------------------------------------------

    /// Replays queued readings; repeats the last one when the queue runs dry.
    #[derive(Default)]
    struct ScriptedSensors {
        moisture: VecDeque<Option<i32>>,
        environment: VecDeque<Option<Environment>>,
        moisture_reads: usize,
        motor: Vec<bool>,
    }

    impl SensorReader for ScriptedSensors {
        fn read_moisture(&mut self) -> Result<i32> {
            self.moisture_reads += 1;
            let next = if self.moisture.len() > 1 {
                self.moisture.pop_front().flatten()
            } else {
                self.moisture.front().copied().flatten()
            };
            match next {
                Some(v) => Ok(v),
                None => bail!("i2c bus error"),
            }
        }

        fn read_environment(&mut self) -> Option<Environment> {
            if self.environment.len() > 1 {
                self.environment.pop_front().flatten()
            } else {
                self.environment.front().copied().flatten()
            }
        }

        fn observe_motor(&mut self, on: bool) {
            self.motor.push(on);
        }
    }

    #[derive(Default)]
    struct RecordingTelemetry {
        samples: Vec<Sample>,
        fail: bool,
    }

    impl TelemetryPublisher for RecordingTelemetry {
        async fn publish(&mut self, sample: &Sample) -> Result<()> {
            self.samples.push(*sample);
            if self.fail {
                bail!("no telemetry response within 5s");
            }
            Ok(())
        }
    }

    struct FixedDate(&'static str);

    impl DateSource for FixedDate {
        async fn lookup(&mut self) -> String {
            self.0.to_string()
        }
    }

    type TestLoop = PollLoop<MockPin, MemoryStore, ScriptedSensors, RecordingTelemetry, FixedDate>;

    fn env(temperature: f32, humidity: f32) -> Option<Environment> {
        Environment::from_raw(temperature, humidity)
    }

    fn timing() -> TimingConfig {
        TimingConfig {
            sensor_settle_ms: 0,
            ..TimingConfig::default()
        }
    }

    fn poll_loop(moisture: &[Option<i32>], environment: &[Option<Environment>]) -> TestLoop {
        let controller = IrrigationController::new(
            Relay::new(MockPin::default(), true),
            MemoryStore::new(),
            3500,
        );
        let sensors = ScriptedSensors {
            moisture: moisture.iter().copied().collect(),
            environment: environment.iter().copied().collect(),
            ..ScriptedSensors::default()
        };
        PollLoop::new(
            controller,
            sensors,
            Some(RecordingTelemetry::default()),
            FixedDate("2024-05-01T10:15:00+05:45"),
            &timing(),
        )
    }

    fn store(l: &mut TestLoop) -> &mut MemoryStore {
        l.controller.store_mut()
    }

    fn telemetry(l: &TestLoop) -> &[Sample] {
        &l.telemetry.as_ref().unwrap().samples
    }

    // -- Main work --------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn first_tick_mirrors_readings_and_irrigates_dry_soil() {
        let mut l = poll_loop(&[Some(4000)], &[env(22.0, 61.5)]);

        l.tick().await;

        assert!(l.controller.state().is_motor_on);
        let s = store(&mut l);
        assert_eq!(s.value(MOISTURE_CURRENT), Some(&json!(4000)));
        let log = s.log(MOISTURE_LOG);
        assert_eq!(log.len(), 1);
        assert_eq!(log[0]["value"], json!(4000));
        assert_eq!(log[0]["datetime"], json!("2024-05-01T10:15:00+05:45"));
        assert_eq!(
            s.value(ENVIRONMENT),
            Some(&json!({"temperature": 22.0, "humidity": 61.5}))
        );
        assert_eq!(s.value(MOTOR_IS_ON), Some(&json!(true)));

        assert_eq!(
            telemetry(&l),
            &[Sample {
                temperature: 22.0,
                humidity: 61.5,
                moisture: 4000
            }]
        );
        assert_eq!(l.sensors.motor, vec![true]);
    }

    #[tokio::test(start_paused = true)]
    async fn wet_soil_leaves_motor_off() {
        let mut l = poll_loop(&[Some(2000)], &[env(22.0, 60.0)]);
        l.tick().await;
        assert!(!l.controller.state().is_motor_on);
        assert!(store(&mut l).value(MOTOR_IS_ON).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_moisture_is_not_republished() {
        let mut l = poll_loop(&[Some(3000)], &[env(22.0, 60.0)]);

        l.tick().await;
        tokio::time::advance(Duration::from_secs(10)).await;
        l.tick().await;

        assert_eq!(l.sensors.moisture_reads, 2);
        assert_eq!(store(&mut l).log(MOISTURE_LOG).len(), 1);
        assert_eq!(telemetry(&l).len(), 2, "telemetry goes out every cycle");
    }

    #[tokio::test(start_paused = true)]
    async fn probe_fault_skips_environment_and_telemetry_only() {
        let mut l = poll_loop(&[Some(4000)], &[None]);

        l.tick().await;

        assert!(store(&mut l).value(ENVIRONMENT).is_none());
        assert!(telemetry(&l).is_empty());
        assert_eq!(
            store(&mut l).value(MOISTURE_CURRENT),
            Some(&json!(4000)),
            "moisture still mirrored"
        );
        assert!(l.controller.state().is_motor_on, "auto logic still runs");
    }

    #[tokio::test(start_paused = true)]
    async fn moisture_read_error_keeps_last_value() {
        let mut l = poll_loop(&[Some(4000), None], &[env(22.0, 60.0)]);

        l.tick().await;
        tokio::time::advance(Duration::from_secs(10)).await;
        l.tick().await;

        assert_eq!(l.controller.state().soil_moisture, 4000);
        assert_eq!(telemetry(&l).len(), 2);
        assert_eq!(telemetry(&l)[1].moisture, 4000);
    }

    #[tokio::test(start_paused = true)]
    async fn telemetry_failure_does_not_stop_the_loop() {
        let mut l = poll_loop(&[Some(4000), Some(2000)], &[env(22.0, 60.0)]);
        l.telemetry.as_mut().unwrap().fail = true;

        l.tick().await;
        tokio::time::advance(Duration::from_secs(10)).await;
        l.tick().await;

        assert_eq!(telemetry(&l).len(), 2);
        assert!(!l.controller.state().is_motor_on);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_telemetry_publishes_nothing() {
        let mut l = poll_loop(&[Some(4000)], &[env(22.0, 60.0)]);
        l.telemetry = None;
        l.tick().await;
        assert!(l.controller.state().is_motor_on);
    }

    #[tokio::test(start_paused = true)]
    async fn store_write_failures_are_swallowed() {
        let mut l = poll_loop(&[Some(4000)], &[env(22.0, 60.0)]);
        store(&mut l).fail_writes = true;

        l.tick().await;

        assert!(l.controller.state().is_motor_on);
        assert_eq!(l.controller.state().soil_moisture, 4000);
        assert_eq!(telemetry(&l).len(), 1);
    }

    // -- Gating -------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn main_work_runs_once_per_period() {
        let mut l = poll_loop(&[Some(3000)], &[env(22.0, 60.0)]);

        // 1 s floor sleep per tick; the gate opens strictly after 5 s.
        for _ in 0..7 {
            l.tick().await;
        }

        assert_eq!(l.sensors.moisture_reads, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn every_tick_ends_with_floor_sleep() {
        let mut l = poll_loop(&[Some(3000)], &[env(22.0, 60.0)]);
        l.tick().await;

        let start = Instant::now();
        l.tick().await; // gated off
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn settle_delay_follows_sensor_reads() {
        let mut l = poll_loop(&[Some(3000)], &[env(22.0, 60.0)]);
        l.settle = Duration::from_secs(2);

        let start = Instant::now();
        l.tick().await;
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn store_not_ready_skips_main_work_but_still_reconciles() {
        let mut l = poll_loop(&[Some(4000)], &[env(22.0, 60.0)]);
        {
            let s = store(&mut l);
            s.is_ready = false;
            s.seed(MOTOR_MANUAL_MODE, json!(true));
            s.seed(MOTOR_IS_ON, json!(true));
        }

        l.tick().await;

        assert_eq!(l.sensors.moisture_reads, 0);
        assert!(l.last_run.is_none(), "gate stays open for the next pass");
        assert!(telemetry(&l).is_empty());
        assert!(l.controller.state().manual_mode);
        assert!(l.controller.state().is_motor_on, "trailing reconcile ran");
    }

    #[tokio::test(start_paused = true)]
    async fn store_ready_again_runs_immediately() {
        let mut l = poll_loop(&[Some(4000)], &[env(22.0, 60.0)]);
        store(&mut l).is_ready = false;
        l.tick().await;

        store(&mut l).is_ready = true;
        l.tick().await;

        assert_eq!(l.sensors.moisture_reads, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gated_off_tick_follows_dashboard_toggle_in_auto_mode() {
        let mut l = poll_loop(&[Some(2000)], &[env(22.0, 60.0)]);
        l.tick().await;
        assert!(!l.controller.state().is_motor_on);

        {
            let s = store(&mut l);
            s.seed(MOTOR_MANUAL_MODE, json!(false));
            s.seed(MOTOR_IS_ON, json!(true));
        }
        l.tick().await;

        assert_eq!(l.sensors.moisture_reads, 1, "main work stayed gated off");
        assert!(!l.controller.state().manual_mode);
        assert!(l.controller.state().is_motor_on);
    }

    #[tokio::test(start_paused = true)]
    async fn dashboard_toggle_in_auto_mode_lasts_until_next_decision() {
        let mut l = poll_loop(&[Some(2000)], &[env(22.0, 60.0)]);
        l.tick().await;
        store(&mut l).seed(MOTOR_IS_ON, json!(true));
        l.tick().await;
        assert!(l.controller.state().is_motor_on);

        tokio::time::advance(Duration::from_secs(10)).await;
        l.tick().await;

        assert!(!l.controller.state().is_motor_on, "wet soil switches it back off");
        assert_eq!(store(&mut l).value(MOTOR_IS_ON), Some(&json!(false)));
    }

    // -- Manual override through the loop -----------------------------------------

    #[tokio::test(start_paused = true)]
    async fn manual_mode_holds_motor_against_dry_soil() {
        let mut l = poll_loop(&[Some(4000)], &[env(22.0, 60.0)]);
        {
            let s = store(&mut l);
            s.seed(MOTOR_MANUAL_MODE, json!(true));
            s.seed(MOTOR_IS_ON, json!(false));
        }

        l.tick().await;

        assert!(!l.controller.state().is_motor_on);
        assert_eq!(l.sensors.motor, vec![false]);
    }
}
