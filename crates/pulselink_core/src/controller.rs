//! Controlador de transmissão.
//!
//! Liga a entrada de sensores ao transporte: decima os eventos, carimba o
//! timestamp, codifica e despacha pela estratégia configurada. Expõe à UI o
//! contrato `start()`/`stop()` e o estado observável de transmissão.
//!
//! Callbacks de sensor chegam numa thread da plataforma e só fazem trabalho
//! curto sob o lock de entrada; qualquer chamada de transporte vai para o
//! [`Worker`]. Falhas de transporte são registradas em log e nunca sobem:
//! a transmissão segue na próxima amostra e o payload perdido não é
//! reenviado.
//!
//! Cada transmissão tem uma geração. Jobs de payload carregam a geração em
//! que foram criados e são descartados se a transmissão já acabou, de modo
//! que nenhum canal é reaberto depois de `stop()`. A fila do worker é
//! limitada: com o transporte travado, payloads novos são descartados em vez
//! de acumular.

use crate::clock::Clock;
use crate::decimator::SampleDecimator;
use crate::dispatch::DispatchStrategy;
use crate::protocol::encode_timestamp;
use crate::types::{SensorEvent, SensorKind, TransmissionState};
use crate::worker::Worker;
use crossbeam_channel::{Receiver, Sender, unbounded};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, info, warn};

/// Capacidade da fila do worker.
const JOB_QUEUE: usize = 32;

/// Vagas da fila para payloads; o restante fica para start/stop.
const PAYLOAD_SLOTS: usize = 24;

/// Registro de listeners de sensor na plataforma.
///
/// O controlador registra a entrada ao iniciar e remove ao parar, de modo
/// que listeners só existem durante `Transmitting`.
pub trait SensorRegistry: Send + Sync {
    fn register(&self, intake: SensorIntake);
    fn unregister(&self);
}

/// Ponto de entrega de eventos para a plataforma. Não mantém o controlador
/// vivo.
#[derive(Clone)]
pub struct SensorIntake {
    shared: Weak<Shared>,
}

impl SensorIntake {
    pub fn deliver(&self, event: SensorEvent) {
        if let Some(shared) = self.shared.upgrade() {
            shared.on_sensor_event(event);
        }
    }
}

/// Contadores de payloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransmissionStats {
    /// Payloads gerados pela decimação
    pub emitted: u64,
    pub delivered: u64,
    pub failed: u64,
    /// Fila cheia ou transmissão encerrada antes do envio
    pub dropped: u64,
}

#[derive(Default)]
struct Counters {
    emitted: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn drop_payload(&self, timestamp: i64, reason: &str) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        debug!("Payload descartado (ts={timestamp}): {reason}");
    }
}

struct Intake {
    state: TransmissionState,
    decimator: SampleDecimator,
    generation: u64,
}

struct Shared {
    intake: Mutex<Intake>,
    /// Geração da transmissão em curso; 0 quando parado
    active: Arc<AtomicU64>,
    strategy: Arc<dyn DispatchStrategy>,
    clock: Arc<dyn Clock>,
    counters: Arc<Counters>,
    subscribers: Mutex<Vec<Sender<TransmissionState>>>,
    worker: Worker,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    fn on_sensor_event(&self, event: SensorEvent) {
        let mut intake = lock(&self.intake);
        if !intake.state.is_transmitting() || !intake.decimator.admit(&event) {
            return;
        }
        let timestamp = self.clock.now_millis();
        let payload = encode_timestamp(timestamp);
        self.counters.emitted.fetch_add(1, Ordering::Relaxed);

        if self.worker.pending() >= PAYLOAD_SLOTS {
            self.counters.drop_payload(timestamp, "fila cheia");
            return;
        }

        let generation = intake.generation;
        let active = Arc::clone(&self.active);
        let strategy = Arc::clone(&self.strategy);
        let counters = Arc::clone(&self.counters);
        // Ainda sob o lock: um stop() concorrente enfileira on_stop depois deste job
        let queued = self.worker.try_submit(move || {
            if active.load(Ordering::SeqCst) != generation {
                counters.drop_payload(timestamp, "transmissão encerrada");
                return;
            }
            match strategy.dispatch(&payload) {
                Ok(()) => {
                    counters.delivered.fetch_add(1, Ordering::Relaxed);
                    debug!("Payload enviado (ts={timestamp})");
                }
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    warn!("Falha ao enviar payload: {e}");
                }
            }
        });
        if !queued {
            self.counters.drop_payload(timestamp, "fila cheia");
        }
    }

    fn publish(&self, state: TransmissionState) {
        lock(&self.subscribers).retain(|tx| tx.send(state).is_ok());
    }
}

pub struct TransmissionController {
    shared: Arc<Shared>,
    registry: Option<Arc<dyn SensorRegistry>>,
}

impl TransmissionController {
    /// Cria o controlador e sua thread de trabalho.
    pub fn new(
        strategy: Arc<dyn DispatchStrategy>,
        clock: Arc<dyn Clock>,
        stride: u32,
        trigger: SensorKind,
    ) -> std::io::Result<Self> {
        let worker = Worker::spawn("pulselink-tx", JOB_QUEUE)?;
        Ok(Self {
            shared: Arc::new(Shared {
                intake: Mutex::new(Intake {
                    state: TransmissionState::Idle,
                    decimator: SampleDecimator::new(stride, trigger),
                    generation: 0,
                }),
                active: Arc::new(AtomicU64::new(0)),
                strategy,
                clock,
                counters: Arc::new(Counters::default()),
                subscribers: Mutex::new(Vec::new()),
                worker,
            }),
            registry: None,
        })
    }

    /// Define o registro de sensores usado em `start()`/`stop()`.
    pub fn with_registry(mut self, registry: Arc<dyn SensorRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// `Idle -> Transmitting`. Sem efeito se já estiver transmitindo.
    pub fn start(&self) {
        {
            let mut intake = lock(&self.shared.intake);
            if intake.state.is_transmitting() {
                return;
            }
            intake.state = TransmissionState::Transmitting;
            intake.decimator.reset();
            intake.generation += 1;
            self.shared.active.store(intake.generation, Ordering::SeqCst);
        }
        info!(
            "Transmissão iniciada ({:?})",
            self.shared.strategy.policy()
        );

        if let Some(registry) = &self.registry {
            registry.register(self.intake());
        }

        let strategy = Arc::clone(&self.shared.strategy);
        self.shared.worker.submit(move || {
            if let Err(e) = strategy.on_start() {
                warn!("Falha ao preparar transporte: {e}");
            }
        });
        self.shared.publish(TransmissionState::Transmitting);
    }

    /// `Transmitting -> Idle`. Sem efeito se já estiver parado.
    pub fn stop(&self) {
        {
            let mut intake = lock(&self.shared.intake);
            if !intake.state.is_transmitting() {
                return;
            }
            intake.state = TransmissionState::Idle;
            self.shared.active.store(0, Ordering::SeqCst);
        }
        info!("Transmissão parada");

        if let Some(registry) = &self.registry {
            registry.unregister();
        }

        // Uma abertura travada não pode segurar o fechamento na fila
        self.shared.strategy.cancel();

        let strategy = Arc::clone(&self.shared.strategy);
        self.shared.worker.submit(move || {
            if let Err(e) = strategy.on_stop() {
                warn!("Falha ao encerrar transporte: {e}");
            }
        });
        self.shared.publish(TransmissionState::Idle);
    }

    /// Alterna entre iniciar e parar, como o botão da UI.
    pub fn toggle(&self) -> TransmissionState {
        if self.is_transmitting() {
            self.stop();
        } else {
            self.start();
        }
        self.state()
    }

    pub fn state(&self) -> TransmissionState {
        lock(&self.shared.intake).state
    }

    pub fn is_transmitting(&self) -> bool {
        self.state().is_transmitting()
    }

    /// Recebe cada mudança de estado a partir de agora.
    pub fn subscribe(&self) -> Receiver<TransmissionState> {
        let (tx, rx) = unbounded();
        lock(&self.shared.subscribers).push(tx);
        rx
    }

    /// Ponto de entrega para a plataforma de sensores.
    pub fn intake(&self) -> SensorIntake {
        SensorIntake {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Processa um evento bruto de sensor.
    pub fn on_sensor_event(&self, event: SensorEvent) {
        self.shared.on_sensor_event(event);
    }

    /// Valor atual do contador de decimação.
    pub fn decimation_counter(&self) -> u32 {
        lock(&self.shared.intake).decimator.counter()
    }

    pub fn stats(&self) -> TransmissionStats {
        let c = &self.shared.counters;
        TransmissionStats {
            emitted: c.emitted.load(Ordering::Relaxed),
            delivered: c.delivered.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
        }
    }

    /// Bloqueia até o worker esvaziar a fila atual.
    pub fn wait_idle(&self) {
        self.shared.worker.wait_idle();
    }
}

impl Drop for TransmissionController {
    fn drop(&mut self) {
        self.stop();
    }
}
