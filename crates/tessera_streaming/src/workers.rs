//! # Background Workers
//!
//! Two threads wired in series by channels:
//!
//! ```text
//! submit(coord) ─▶ [pending] ─▶ tessera-generate ─▶ [raw] ─▶ tessera-mesh ─▶ [finished]
//!                                                     ▲
//!                                     remesh(tile) ───┘
//! ```
//!
//! Tiles move between threads by value. Each worker waits on its input
//! with a short timeout and checks the shared cancellation flag on every
//! iteration, so shutdown never waits on an empty queue for long.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use tessera_procedural::{GenerationPipeline, Tile, TileCoord};

use crate::error::{StreamingError, StreamingResult};

/// Thread name of the data-stage worker.
pub const GENERATE_WORKER: &str = "tessera-generate";

/// Thread name of the mesh-stage worker.
pub const MESH_WORKER: &str = "tessera-mesh";

struct Worker {
    name: &'static str,
    handle: Option<JoinHandle<()>>,
}

/// The two background stages and their queues.
pub struct WorkerPipeline {
    cancel: Arc<AtomicBool>,
    pending_tx: Sender<TileCoord>,
    remesh_tx: Sender<Tile>,
    finished_rx: Receiver<Tile>,
    workers: Vec<Worker>,
}

impl WorkerPipeline {
    /// Starts both workers with custom stage functions.
    ///
    /// # Errors
    ///
    /// Returns [`StreamingError::Spawn`] if a thread cannot be created.
    pub fn spawn<G, M>(idle_poll: Duration, generate: G, mesh: M) -> StreamingResult<Self>
    where
        G: Fn(TileCoord) -> Tile + Send + 'static,
        M: Fn(Tile) -> Tile + Send + 'static,
    {
        let cancel = Arc::new(AtomicBool::new(false));
        let (pending_tx, pending_rx) = unbounded();
        let (raw_tx, raw_rx) = unbounded();
        let (finished_tx, finished_rx) = unbounded();

        let mut pipeline = Self {
            cancel: Arc::clone(&cancel),
            pending_tx,
            remesh_tx: raw_tx.clone(),
            finished_rx,
            workers: Vec::with_capacity(2),
        };

        let flag = Arc::clone(&cancel);
        pipeline.start(GENERATE_WORKER, move || {
            stage_loop(&flag, &pending_rx, &raw_tx, idle_poll, generate);
        })?;
        pipeline.start(MESH_WORKER, move || {
            stage_loop(&cancel, &raw_rx, &finished_tx, idle_poll, mesh);
        })?;

        tracing::info!("Started {} background workers", pipeline.workers.len());
        Ok(pipeline)
    }

    /// Starts both workers running `pipeline`'s stages.
    ///
    /// # Errors
    ///
    /// Returns [`StreamingError::Spawn`] if a thread cannot be created.
    pub fn for_pipeline(pipeline: Arc<GenerationPipeline>) -> StreamingResult<Self> {
        let idle_poll = Duration::from_millis(pipeline.config().streaming.idle_poll_ms);
        let data = Arc::clone(&pipeline);
        Self::spawn(
            idle_poll,
            move |coord| data.generate(coord).0,
            move |mut tile| {
                pipeline.build_referenced_meshes(&mut tile);
                tile
            },
        )
    }

    fn start<F>(&mut self, name: &'static str, body: F) -> StreamingResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = std::thread::Builder::new()
            .name(name.into())
            .spawn(body)
            .map_err(|source| StreamingError::Spawn { worker: name, source })?;
        self.workers.push(Worker {
            name,
            handle: Some(handle),
        });
        Ok(())
    }

    /// Queues a coordinate for the data stages.
    ///
    /// # Errors
    ///
    /// Returns [`StreamingError::ChannelClosed`] if the data worker is gone.
    pub fn submit(&self, coord: TileCoord) -> StreamingResult<()> {
        self.pending_tx
            .send(coord)
            .map_err(|_| StreamingError::ChannelClosed("pending"))
    }

    /// Queues a blended tile for the mesh stage.
    ///
    /// # Errors
    ///
    /// Returns [`StreamingError::ChannelClosed`] if the mesh worker is gone.
    pub fn remesh(&self, tile: Tile) -> StreamingResult<()> {
        self.remesh_tx
            .send(tile)
            .map_err(|_| StreamingError::ChannelClosed("raw"))
    }

    /// Next finished tile, without blocking.
    #[must_use]
    pub fn try_finished(&self) -> Option<Tile> {
        self.finished_rx.try_recv().ok()
    }

    /// Returns true once shutdown was requested.
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    /// Name of a worker that stopped without being asked to.
    #[must_use]
    pub fn stopped_worker(&self) -> Option<&'static str> {
        if self.is_cancelled() {
            return None;
        }
        self.workers
            .iter()
            .find(|w| w.handle.as_ref().is_some_and(JoinHandle::is_finished))
            .map(|w| w.name)
    }

    /// Signals cancellation and joins both workers.
    ///
    /// # Errors
    ///
    /// Returns [`StreamingError::WorkerPanicked`] naming the first worker
    /// that panicked. Every worker is joined either way.
    pub fn shutdown(&mut self) -> StreamingResult<()> {
        self.cancel.store(true, Ordering::Release);
        let mut result = Ok(());
        for worker in &mut self.workers {
            let Some(handle) = worker.handle.take() else {
                continue;
            };
            if handle.join().is_err() {
                tracing::error!("Worker '{}' panicked", worker.name);
                if result.is_ok() {
                    result = Err(StreamingError::WorkerPanicked { worker: worker.name });
                }
            }
        }
        result
    }
}

impl Drop for WorkerPipeline {
    fn drop(&mut self) {
        if self.shutdown().is_err() {
            tracing::warn!("Worker pipeline dropped after a worker panicked");
        }
    }
}

impl std::fmt::Debug for WorkerPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPipeline")
            .field("cancelled", &self.is_cancelled())
            .field("pending", &self.pending_tx.len())
            .field("finished", &self.finished_rx.len())
            .finish_non_exhaustive()
    }
}

fn stage_loop<I, O>(
    cancel: &AtomicBool,
    input: &Receiver<I>,
    output: &Sender<O>,
    idle_poll: Duration,
    work: impl Fn(I) -> O,
) {
    while !cancel.load(Ordering::Acquire) {
        match input.recv_timeout(idle_poll) {
            Ok(item) => {
                if output.send(work(item)).is_err() {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}
