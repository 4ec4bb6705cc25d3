//! Contexto de execução em segundo plano.
//!
//! Uma thread nomeada consome jobs de uma fila FIFO limitada. Os callbacks
//! de sensor apenas enfileiram; toda chamada bloqueante de transporte roda
//! aqui, em ordem de chegada. A thread vive enquanto o dono do [`Worker`]
//! viver.
//!
//! [`Worker::submit`] espera vaga na fila; [`Worker::try_submit`] descarta o
//! job se a fila estiver cheia.

use crossbeam_channel::{Sender, TrySendError, bounded};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread::JoinHandle;
use tracing::{debug, error};

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct Worker {
    name: String,
    tx: Option<Sender<Job>>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Inicia a thread com uma fila de até `capacity` jobs pendentes.
    pub fn spawn(name: &str, capacity: usize) -> std::io::Result<Self> {
        let (tx, rx) = bounded::<Job>(capacity.max(1));
        let thread_name = name.to_string();
        let handle = std::thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                for job in rx {
                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!("Job em pânico na thread {thread_name}");
                    }
                }
                debug!("Thread {thread_name} encerrada");
            })?;

        Ok(Self {
            name: name.to_string(),
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    /// Enfileira um job, esperando vaga se preciso. Retorna `false` se a
    /// thread já terminou.
    pub fn submit<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        match &self.tx {
            Some(tx) => tx.send(Box::new(job)).is_ok(),
            None => false,
        }
    }

    /// Enfileira sem esperar. Retorna `false` se a fila estiver cheia ou a
    /// thread já tiver terminado; o job é descartado.
    pub fn try_submit<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(tx) = &self.tx else {
            return false;
        };
        match tx.try_send(Box::new(job)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => false,
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Jobs na fila, sem contar o que está rodando.
    pub fn pending(&self) -> usize {
        self.tx.as_ref().map_or(0, |tx| tx.len())
    }

    /// Bloqueia até que todos os jobs enfileirados antes desta chamada
    /// terminem.
    pub fn wait_idle(&self) {
        let (done_tx, done_rx) = bounded::<()>(1);
        if self.submit(move || {
            let _ = done_tx.send(());
        }) {
            let _ = done_rx.recv();
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        // Fechar a fila encerra o loop depois dos jobs pendentes
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Thread {} terminou com pânico", self.name);
            }
        }
    }
}
