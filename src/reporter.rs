//! The reporter: lifecycle, worker loop, and tick execution.
//!
//! One background worker per reporter. Each tick walks every instrument
//! in the registry, appends one encoded record per instrument to the
//! packet, and ends with an unconditional flush. The packet buffer,
//! compression state, and transport are shared between the worker and
//! direct `flush`/`stop` callers, so all of them live in one `Core`
//! behind a mutex; exactly one path mutates at a time.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::config::ReporterConfig;
use crate::error::{ReporterError, Result};
use crate::extract::{SampleContext, sample};
use crate::instrument::Registry;
use crate::packet::{PacketBuilder, ThresholdPolicy};
use crate::schedule::Schedule;
use crate::transport::{Transport, UdpTransport};

/// Callback invoked with every tick-level failure. Errors are observable
/// only through this handler; the worker loop never dies on them.
pub type ErrorHandler = Arc<dyn Fn(&ReporterError) + Send + Sync>;

/// Shared mutable tick state: the packet, its compression state, and the
/// transport. Guarded by one mutex so worker ticks, manual flushes, and
/// the final flush on stop are serialized.
struct Core {
    packet: PacketBuilder,
    transport: Box<dyn Transport>,
    ctx: SampleContext,
    flush_delay: f64,
}

impl Core {
    /// Flush the packet: compress, send, record the achieved ratio,
    /// reset the buffer. No-op when the buffer is empty.
    async fn flush_packet(&mut self) -> Result<()> {
        if self.packet.is_empty() {
            return Ok(());
        }

        let ratio = self.transport.send(self.packet.bytes()).await?;
        self.packet.record_ratio(ratio);
        self.packet.clear();
        Ok(())
    }

    /// Run one tick: sample every instrument, flushing mid-tick whenever
    /// the threshold is crossed, then flush whatever remains.
    ///
    /// Any failure aborts the tick; records buffered earlier in the tick
    /// stay in the packet for the next flush attempt.
    async fn tick(&mut self, registry: &Registry) -> Result<()> {
        for (name, instrument) in registry.entries()? {
            let record = sample(&name, instrument.as_ref(), &self.ctx)?;
            let encoded = record.encode()?;
            self.packet.append(&encoded);

            if self.packet.should_flush() {
                debug!(
                    "Mid-tick flush at {} bytes (threshold {})",
                    self.packet.len(),
                    self.packet.threshold()
                );
                self.flush_packet().await?;

                // Spread the write load of reporters that would
                // otherwise flush in lockstep.
                if self.packet.policy() == ThresholdPolicy::Adaptive {
                    let jitter = self.flush_delay * rand::random::<f64>();
                    if jitter > 0.0 {
                        sleep(std::time::Duration::from_secs_f64(jitter)).await;
                    }
                }
            }
        }

        self.flush_packet().await
    }
}

struct Worker {
    shutdown: watch::Sender<bool>,
    done: watch::Receiver<bool>,
    handle: JoinHandle<()>,
}

/// A background exporter bound to one registry and one collector
/// address. See the crate docs for the tick/flush model.
pub struct Reporter {
    config: ReporterConfig,
    registry: Arc<Registry>,
    on_error: ErrorHandler,
    core: Arc<Mutex<Core>>,
    worker: Mutex<Option<Worker>>,
}

/// Builder for a [`Reporter`], allowing the transport and error handler
/// to be swapped out.
pub struct ReporterBuilder {
    config: ReporterConfig,
    registry: Arc<Registry>,
    transport: Option<Box<dyn Transport>>,
    on_error: Option<ErrorHandler>,
}

impl ReporterBuilder {
    pub fn new(config: ReporterConfig, registry: Arc<Registry>) -> Self {
        Self {
            config,
            registry,
            transport: None,
            on_error: None,
        }
    }

    /// Replace the UDP transport, e.g. with a capture transport in tests.
    pub fn transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Set the error handler. The default silently drops errors.
    pub fn on_error(mut self, handler: impl Fn(&ReporterError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(handler));
        self
    }

    pub fn build(self) -> Result<Reporter> {
        self.config.validate()?;

        let transport = self
            .transport
            .unwrap_or_else(|| Box::new(UdpTransport::new(self.config.host.clone(), self.config.port)));
        let on_error: ErrorHandler = self.on_error.unwrap_or_else(|| Arc::new(|_| {}));

        let extras = self
            .config
            .extras
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let ctx = SampleContext::new(self.config.effective_client_id(), extras);

        let core = Core {
            packet: PacketBuilder::new(self.config.max_packet_size, self.config.threshold),
            transport,
            ctx,
            flush_delay: self.config.flush_delay,
        };

        Ok(Reporter {
            config: self.config,
            registry: self.registry,
            on_error,
            core: Arc::new(Mutex::new(core)),
            worker: Mutex::new(None),
        })
    }
}

impl Reporter {
    /// Create a reporter with the default UDP transport and a silent
    /// error handler.
    pub fn new(config: ReporterConfig, registry: Arc<Registry>) -> Result<Self> {
        ReporterBuilder::new(config, registry).build()
    }

    pub fn builder(config: ReporterConfig, registry: Arc<Registry>) -> ReporterBuilder {
        ReporterBuilder::new(config, registry)
    }

    pub fn config(&self) -> &ReporterConfig {
        &self.config
    }

    /// Whether the background worker is currently running.
    pub async fn is_running(&self) -> bool {
        self.worker.lock().await.is_some()
    }

    /// The compression ratio observed by the most recent flush, if any.
    pub async fn last_compression_ratio(&self) -> Option<f64> {
        self.core.lock().await.packet.last_ratio()
    }

    /// Open the transport and spawn the background worker. No-op when
    /// already running.
    pub async fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            return Ok(());
        }

        self.core.lock().await.transport.open().await?;

        let schedule = Schedule::new(
            self.config.schedule,
            self.config.interval,
            self.config.interval_offset,
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (done_tx, done_rx) = watch::channel(false);

        let handle = tokio::spawn(worker_loop(
            Arc::clone(&self.core),
            Arc::clone(&self.registry),
            Arc::clone(&self.on_error),
            schedule,
            shutdown_rx,
            done_tx,
        ));

        info!(
            "Reporter started: {}:{} every {}s",
            self.config.host, self.config.port, self.config.interval
        );
        *worker = Some(Worker {
            shutdown: shutdown_tx,
            done: done_rx,
            handle,
        });
        Ok(())
    }

    /// Signal the worker to terminate, wait for it, run one final
    /// synchronous flush, and close the transport. No-op when already
    /// stopped; failures in the final flush go to the error handler.
    pub async fn stop(&self) {
        let worker = self.worker.lock().await.take();
        let Some(worker) = worker else {
            return;
        };

        let _ = worker.shutdown.send(true);
        if worker.handle.await.is_err() {
            warn!("Reporter worker terminated abnormally");
        }

        let mut core = self.core.lock().await;
        if let Err(err) = core.tick(&self.registry).await {
            dispatch_error(&self.on_error, &err);
        }
        if let Err(err) = core.transport.close().await {
            dispatch_error(&self.on_error, &err);
        }
        info!("Reporter stopped");
    }

    /// Run one tick synchronously, regardless of running state. Used for
    /// manual or forced export, e.g. at process shutdown. Failures go to
    /// the error handler.
    pub async fn flush(&self) {
        let mut core = self.core.lock().await;
        if let Err(err) = core.tick(&self.registry).await {
            dispatch_error(&self.on_error, &err);
        }
    }

    /// Stop then start.
    pub async fn restart(&self) -> Result<()> {
        self.stop().await;
        self.start().await
    }

    /// Block until the worker has exited. No-op if never started.
    pub async fn join(&self) {
        let done = match self.worker.lock().await.as_ref() {
            Some(worker) => worker.done.clone(),
            None => return,
        };

        let mut done = done;
        while !*done.borrow() {
            // A closed channel means the worker task is gone too.
            if done.changed().await.is_err() {
                break;
            }
        }
    }
}

async fn worker_loop(
    core: Arc<Mutex<Core>>,
    registry: Arc<Registry>,
    on_error: ErrorHandler,
    schedule: Schedule,
    mut shutdown: watch::Receiver<bool>,
    done: watch::Sender<bool>,
) {
    loop {
        let delay = schedule.delay_from(unix_now());

        tokio::select! {
            changed = shutdown.changed() => {
                // Either a stop signal or the reporter was dropped.
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = sleep(delay) => {
                let mut core = core.lock().await;
                if let Err(err) = core.tick(&registry).await {
                    dispatch_error(&on_error, &err);
                }
            }
        }
    }

    let _ = done.send(true);
}

/// Invoke the error handler under a best-effort guard: a panicking
/// handler must never kill the worker loop.
fn dispatch_error(handler: &ErrorHandler, err: &ReporterError) {
    warn!("Tick failed: {}", err);
    let _ = catch_unwind(AssertUnwindSafe(|| handler(err)));
}

fn unix_now() -> f64 {
    let now = Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1e6
}
