//! Event listeners
//!
//! Listeners run synchronously, in registration order, inside the engine's
//! critical section. A failing or panicking listener is logged and skipped;
//! it never affects persistence or the caller's acknowledgement.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, info, warn};

use crate::types::EngineEvent;

/// Receives every [`EngineEvent`] the engine emits.
pub trait EventListener: Send {
    fn on_event(&self, event: &EngineEvent) -> anyhow::Result<()>;

    /// Name used when a failure is logged
    fn name(&self) -> &str {
        "listener"
    }
}

impl<F> EventListener for F
where
    F: Fn(&EngineEvent) -> anyhow::Result<()> + Send,
{
    fn on_event(&self, event: &EngineEvent) -> anyhow::Result<()> {
        self(event)
    }
}

/// Renders engine events as structured log lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingListener;

impl EventListener for TracingListener {
    fn on_event(&self, event: &EngineEvent) -> anyhow::Result<()> {
        match event {
            EngineEvent::SessionStarted {
                battery_id,
                test_id,
                soc_percent,
                message,
            } => {
                info!(battery_id = %battery_id, test_id = %test_id, soc = soc_percent, "{}", message);
            }
            EngineEvent::SampleAccepted {
                battery_id,
                soc_percent,
                row_index,
                impedance,
                accepted_count,
            } => {
                debug!(
                    battery_id = %battery_id,
                    soc = soc_percent,
                    row_index,
                    impedance,
                    accepted_count,
                    "Sample accepted"
                );
            }
            EngineEvent::Anomaly(anomaly) => {
                warn!(
                    battery_id = %anomaly.battery_id,
                    test_id = %anomaly.test_id,
                    soc = anomaly.soc_percent,
                    alert = anomaly.alert_type(),
                    value = anomaly.magnitude(),
                    threshold = anomaly.threshold(),
                    "{}",
                    anomaly.message
                );
            }
            EngineEvent::SessionCompleted {
                battery_id,
                test_id,
                soc_percent,
                accepted_count,
                message,
            } => {
                info!(
                    battery_id = %battery_id,
                    test_id = %test_id,
                    soc = soc_percent,
                    accepted_count,
                    "{}",
                    message
                );
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "tracing"
    }
}

/// Registered listeners, in registration order.
#[derive(Default)]
pub(crate) struct Listeners {
    inner: Vec<Box<dyn EventListener>>,
}

impl Listeners {
    pub(crate) fn push(&mut self, listener: Box<dyn EventListener>) {
        self.inner.push(listener);
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.len()
    }

    pub(crate) fn dispatch(&self, event: &EngineEvent) {
        for listener in &self.inner {
            // Unwinding here would poison the engine lock
            match catch_unwind(AssertUnwindSafe(|| listener.on_event(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(listener = listener.name(), error = %e, "Event listener failed, continuing");
                }
                Err(payload) => {
                    warn!(
                        listener = listener.name(),
                        error = %panic_message(payload.as_ref()),
                        "Event listener panicked, continuing"
                    );
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn started() -> EngineEvent {
        EngineEvent::SessionStarted {
            battery_id: "B01".to_string(),
            test_id: "Test_1".to_string(),
            soc_percent: 50,
            message: "started".to_string(),
        }
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut listeners = Listeners::default();
        for id in 0..3 {
            let seen = Arc::clone(&seen);
            listeners.push(Box::new(move |_: &EngineEvent| -> anyhow::Result<()> {
                seen.lock().unwrap().push(id);
                Ok(())
            }));
        }
        listeners.dispatch(&started());
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_failing_listener_does_not_stop_others() {
        let hits = Arc::new(Mutex::new(0));
        let mut listeners = Listeners::default();
        listeners.push(Box::new(|_: &EngineEvent| -> anyhow::Result<()> {
            anyhow::bail!("boom")
        }));
        let counter = Arc::clone(&hits);
        listeners.push(Box::new(move |_: &EngineEvent| -> anyhow::Result<()> {
            *counter.lock().unwrap() += 1;
            Ok(())
        }));
        listeners.push(Box::new(TracingListener));

        listeners.dispatch(&started());
        assert_eq!(*hits.lock().unwrap(), 1);
        assert_eq!(listeners.len(), 3);
    }

    #[test]
    fn test_panicking_listener_does_not_stop_others() {
        let hits = Arc::new(Mutex::new(0));
        let mut listeners = Listeners::default();
        listeners.push(Box::new(|_: &EngineEvent| -> anyhow::Result<()> {
            panic!("listener bug")
        }));
        let counter = Arc::clone(&hits);
        listeners.push(Box::new(move |_: &EngineEvent| -> anyhow::Result<()> {
            *counter.lock().unwrap() += 1;
            Ok(())
        }));

        listeners.dispatch(&started());
        listeners.dispatch(&started());
        assert_eq!(*hits.lock().unwrap(), 2);
    }

    #[test]
    fn test_panic_message_formats() {
        let text: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(text.as_ref()), "static");
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(owned.as_ref()), "owned");
        let other: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }
}
