//! Fonte de eventos de sensor.
//!
//! Uma única thread de entrega emite eventos de cada sensor habilitado na
//! sua própria cadência, como a plataforma faz com listeners registrados.
//! Os valores medidos não são modelados; só tipo e ordem de chegada.

use pulselink_core::config::SensorConfig;
use pulselink_core::controller::{SensorIntake, SensorRegistry};
use pulselink_core::types::{SensorEvent, SensorKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Espera quando nenhum sensor está habilitado.
const IDLE_SLEEP: Duration = Duration::from_millis(100);

struct HubShared {
    intake: Mutex<Option<SensorIntake>>,
    running: AtomicBool,
}

impl HubShared {
    fn intake(&self) -> MutexGuard<'_, Option<SensorIntake>> {
        self.intake.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Hub de sensores com thread de entrega própria.
pub struct SensorHub {
    shared: Arc<HubShared>,
    handle: Option<JoinHandle<()>>,
}

impl SensorHub {
    pub fn spawn(sensors: &[SensorConfig]) -> std::io::Result<Self> {
        let shared = Arc::new(HubShared {
            intake: Mutex::new(None),
            running: AtomicBool::new(true),
        });

        let schedule: Vec<(SensorKind, Duration)> = sensors
            .iter()
            .map(|s| (s.kind, Duration::from_micros(s.period_us.max(1))))
            .collect();
        for (kind, period) in &schedule {
            info!("Sensor {kind}: período {} µs", period.as_micros());
        }

        let thread_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("sensor-delivery".into())
            .spawn(move || delivery_loop(&thread_shared, &schedule))?;

        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }
}

impl SensorRegistry for SensorHub {
    fn register(&self, intake: SensorIntake) {
        *self.shared.intake() = Some(intake);
        debug!("Listeners de sensor registrados");
    }

    fn unregister(&self) {
        self.shared.intake().take();
        debug!("Listeners de sensor removidos");
    }
}

impl Drop for SensorHub {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn delivery_loop(shared: &HubShared, schedule: &[(SensorKind, Duration)]) {
    let start = Instant::now();
    let mut next_due: Vec<Instant> = schedule.iter().map(|(_, period)| start + *period).collect();
    let mut sequence = 0u64;

    while shared.running.load(Ordering::SeqCst) {
        let Some((idx, due)) = next_due
            .iter()
            .copied()
            .enumerate()
            .min_by_key(|(_, due)| *due)
        else {
            std::thread::sleep(IDLE_SLEEP);
            continue;
        };

        let now = Instant::now();
        if due > now {
            std::thread::sleep(due - now);
        }

        let (kind, period) = schedule[idx];
        next_due[idx] = due + period;

        // Clona o intake para não segurar o lock durante a entrega
        let intake = shared.intake().clone();
        if let Some(intake) = intake {
            intake.deliver(SensorEvent::new(kind, sequence));
            sequence += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulselink_core::clock::SystemClock;
    use pulselink_core::dispatch::strategy_for;
    use pulselink_core::transport::loopback::LoopbackNetwork;
    use pulselink_core::types::TransportPolicy;
    use pulselink_core::TransmissionController;

    #[test]
    fn hub_delivers_only_while_registered() {
        let hub = Arc::new(
            SensorHub::spawn(&[SensorConfig {
                kind: SensorKind::Gyroscope,
                period_us: 1_000,
            }])
            .unwrap(),
        );
        let net = Arc::new(LoopbackNetwork::with_nodes("watch", ["phone"]));
        let ctl = TransmissionController::new(
            strategy_for(TransportPolicy::Message, net.clone(), "p"),
            Arc::new(SystemClock),
            5,
            SensorKind::Gyroscope,
        )
        .unwrap()
        .with_registry(hub.clone());

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(ctl.stats().emitted, 0);

        ctl.start();
        std::thread::sleep(Duration::from_millis(200));
        ctl.stop();
        ctl.wait_idle();

        let emitted = ctl.stats().emitted;
        assert!(emitted > 0);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(ctl.stats().emitted, emitted, "nada após stop");
        assert_eq!(net.stats().messages, emitted);
    }
}
