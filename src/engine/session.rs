//! Active session state and the per-sample detector chain

use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, warn};

use super::detectors;
use super::error::ProcessingError;
use super::listeners::Listeners;
use crate::config::EngineConfig;
use crate::storage::SessionStorage;
use crate::types::{AnomalyEvent, AnomalyKind, EngineEvent, Sample, SessionMeta};

/// Lifecycle phase of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionPhase {
    Idle,
    Active,
}

/// Scalars carried from one accepted sample to the next.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunningState {
    pub last_voltage: Option<f64>,
    pub last_impedance: Option<f64>,
    pub last_temperature: Option<f64>,
    /// Meaningful once `sample_count > 0`
    pub running_mean_impedance: f64,
    /// Impedance observations folded into the mean
    pub sample_count: u64,
    /// Samples written to storage
    pub accepted_count: u64,
    /// Samples that failed validation or processing
    pub rejected_count: u64,
}

/// Read-only view of the engine for observability and tests.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub meta: Option<SessionMeta>,
    pub running: Option<RunningState>,
    pub session_directory: Option<PathBuf>,
    pub stored_samples: Option<u64>,
}

impl SessionSnapshot {
    pub(crate) fn idle() -> Self {
        Self {
            phase: SessionPhase::Idle,
            meta: None,
            running: None,
            session_directory: None,
            stored_samples: None,
        }
    }
}

/// Result of one sample passing through the chain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SampleOutcome {
    pub impedance: f64,
    pub anomalies: usize,
}

pub(crate) struct ActiveSession {
    pub meta: SessionMeta,
    pub storage: Box<dyn SessionStorage>,
    pub running: RunningState,
}

impl ActiveSession {
    pub(crate) fn new(meta: SessionMeta, storage: Box<dyn SessionStorage>) -> Self {
        Self {
            meta,
            storage,
            running: RunningState::default(),
        }
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: SessionPhase::Active,
            meta: Some(self.meta.clone()),
            running: Some(self.running.clone()),
            session_directory: Some(self.storage.session_directory().to_path_buf()),
            stored_samples: Some(self.storage.sample_count()),
        }
    }

    /// Log a sample that will not complete the chain. Best effort: a failing
    /// reject sink is logged and does not mask the caller's error.
    pub(crate) fn record_rejection(&mut self, reason: &str, raw: &str) {
        self.running.rejected_count += 1;
        warn!(
            battery_id = %self.meta.battery_id,
            soc = self.meta.soc_percent,
            reason,
            "Sample rejected"
        );
        if let Err(e) = self.storage.store_rejected_sample(reason, raw) {
            warn!(error = %e, "Failed to record rejected sample");
        }
    }

    /// Run one validated sample through the detector chain.
    ///
    /// Running state advances as each step completes. A sample counts as
    /// accepted once it is stored, even if a later step fails.
    pub(crate) fn process(
        &mut self,
        sample: &Sample,
        config: &EngineConfig,
        listeners: &Listeners,
    ) -> Result<SampleOutcome, ProcessingError> {
        let mut anomalies = 0;

        // 1. Sensor bounds: analytics record plus reject, sample still stored
        for kind in detectors::sensor_violations(sample, &config.sensor_bounds) {
            let reason = detectors::out_of_bounds_reason(&kind).unwrap_or_default();
            self.raise(kind, listeners)?;
            self.storage
                .store_rejected_sample(&reason, &sample.raw_representation())?;
            anomalies += 1;
        }

        // 2. Persist
        self.storage.store_sample(sample)?;
        self.running.accepted_count += 1;

        // 3. Temperature
        let previous = self.running.last_temperature.replace(sample.t_deg_c);
        if let Some(d) =
            detectors::delta_exceeding(previous, sample.t_deg_c, config.temperature.spike_threshold_c)
        {
            self.raise(
                AnomalyKind::TemperatureSpike {
                    delta: d.delta,
                    previous: d.previous,
                    current: d.current,
                    direction: d.direction,
                    threshold: config.temperature.spike_threshold_c,
                    frequency_hz: sample.frequency_hz,
                },
                listeners,
            )?;
            anomalies += 1;
        }

        // 4. Voltage
        let previous = self.running.last_voltage.replace(sample.v);
        if let Some(d) = detectors::delta_exceeding(previous, sample.v, self.meta.v_threshold) {
            self.raise(
                AnomalyKind::VoltageSpike {
                    delta: d.delta,
                    previous: d.previous,
                    current: d.current,
                    direction: d.direction,
                    threshold: self.meta.v_threshold,
                },
                listeners,
            )?;
            anomalies += 1;
        }

        // 5. Impedance
        let z = sample.impedance();
        if !z.is_finite() {
            return Err(ProcessingError::new(
                format!("Processing error: impedance overflow for row {}", sample.row_index),
                format!("R_ohm={} X_ohm={} |Z|={z}", sample.r_ohm, sample.x_ohm),
            ));
        }

        // 6. Impedance jump against the previous sample
        if let Some(d) =
            detectors::delta_exceeding(self.running.last_impedance, z, self.meta.z_threshold)
        {
            self.raise(
                AnomalyKind::ImpedanceJump {
                    delta: d.delta,
                    previous: d.previous,
                    current: d.current,
                    direction: d.direction,
                    threshold: self.meta.z_threshold,
                },
                listeners,
            )?;
            anomalies += 1;
        }

        // 7. Running mean includes the current sample before the band check
        self.running.running_mean_impedance =
            detectors::fold_mean(self.running.running_mean_impedance, self.running.sample_count, z);
        self.running.sample_count += 1;
        self.running.last_impedance = Some(z);

        // 8. Out-of-band
        if let Some((side, bound)) = detectors::band_violation(
            z,
            self.running.running_mean_impedance,
            self.meta.deviation_percent,
        ) {
            self.raise(
                AnomalyKind::OutOfBandDeviation {
                    impedance: z,
                    running_mean: self.running.running_mean_impedance,
                    bound,
                    side,
                    deviation_percent: self.meta.deviation_percent,
                },
                listeners,
            )?;
            anomalies += 1;
        }

        listeners.dispatch(&EngineEvent::SampleAccepted {
            battery_id: self.meta.battery_id.clone(),
            soc_percent: self.meta.soc_percent,
            row_index: sample.row_index,
            impedance: z,
            accepted_count: self.running.accepted_count,
        });

        Ok(SampleOutcome {
            impedance: z,
            anomalies,
        })
    }

    /// Persist an anomaly, then dispatch it to listeners.
    fn raise(&mut self, kind: AnomalyKind, listeners: &Listeners) -> Result<(), ProcessingError> {
        let event = AnomalyEvent::new(&self.meta, kind);
        debug!(alert = event.alert_type(), value = event.magnitude(), "Anomaly detected");

        self.storage.store_analytics_event(
            event.alert_type(),
            &event.message,
            event.magnitude(),
            event.threshold(),
        )?;
        listeners.dispatch(&EngineEvent::Anomaly(event));
        Ok(())
    }

    /// Release storage without finalising. Errors are logged and swallowed.
    pub(crate) fn teardown(mut self) {
        if let Err(e) = self.storage.close() {
            warn!(
                battery_id = %self.meta.battery_id,
                error = %e,
                "Failed to release session storage"
            );
        }
    }
}
