use faceswap_core::{ServiceStatus, SwapRequest, SwapResult, SwapService};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Requests allowed to wait for a free worker before senders back off.
const QUEUE_DEPTH: usize = 16;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine workers exited")]
    ChannelClosed,
}

/// Messages sent from D-Bus handlers to the worker threads.
enum EngineRequest {
    Swap {
        request: SwapRequest,
        reply: oneshot::Sender<SwapResult>,
    },
}

/// Clone-safe handle to the worker pool.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    service: Arc<SwapService>,
    workers: usize,
}

impl EngineHandle {
    /// Queue a swap and wait for its result.
    pub async fn swap(&self, request: SwapRequest) -> Result<SwapResult, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Swap {
                request,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    pub fn status(&self) -> ServiceStatus {
        self.service.status()
    }

    pub fn workers(&self) -> usize {
        self.workers
    }
}

/// Spawn `workers` OS threads that run swaps against the shared service.
///
/// Models are not loaded here; the first request on each model pays the
/// load cost, and a missing model surfaces per request.
pub fn spawn_engine(service: Arc<SwapService>, workers: usize) -> Result<EngineHandle, EngineError> {
    let (tx, rx) = mpsc::channel::<EngineRequest>(QUEUE_DEPTH);
    let rx = Arc::new(Mutex::new(rx));

    for id in 0..workers {
        let rx = Arc::clone(&rx);
        let service = Arc::clone(&service);
        std::thread::Builder::new()
            .name(format!("faceswap-worker-{id}"))
            .spawn(move || worker_loop(id, &rx, &service))?;
    }
    tracing::info!(workers, "engine workers started");

    Ok(EngineHandle { tx, service, workers })
}

fn worker_loop(id: usize, rx: &Mutex<mpsc::Receiver<EngineRequest>>, service: &SwapService) {
    tracing::debug!(worker = id, "worker started");
    loop {
        // Idle workers queue on the mutex; only the holder waits on the channel.
        let next = rx.lock().unwrap_or_else(PoisonError::into_inner).blocking_recv();
        let Some(req) = next else {
            break;
        };
        match req {
            EngineRequest::Swap { request, reply } => {
                tracing::info!(
                    worker = id,
                    source = %request.source_path.display(),
                    target = %request.target_path.display(),
                    many_faces = request.many_faces,
                    "swap started"
                );
                let result = service.process(&request);
                tracing::info!(
                    worker = id,
                    success = result.success,
                    error_kind = ?result.error_kind,
                    "swap finished"
                );
                let _ = reply.send(result);
            }
        }
    }
    tracing::debug!(worker = id, "worker exiting");
}
