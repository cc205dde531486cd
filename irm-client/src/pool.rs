//! Worker pool.
//!
//! Starts one worker task per session. All workers take requests from one
//! shared queue and publish to one response channel and one report channel.

use crate::connection::{connect, ConnectionConfig, Session};
use crate::error::ClientError;
use crate::worker::{effective_client_id, Worker, WorkerConfig, WorkerReport, WorkerState};
use irm_protocol::IrmHeader;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

/// Default request queue depth.
pub const DEFAULT_QUEUE_DEPTH: usize = 256;

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub connection: ConnectionConfig,
    /// Number of concurrent sessions.
    pub sessions: usize,
    /// Capacity of the request, response and report channels.
    pub queue_depth: usize,
    pub worker: WorkerConfig,
}

impl PoolConfig {
    pub fn new(connection: ConnectionConfig) -> Self {
        Self {
            connection,
            sessions: 1,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            worker: WorkerConfig::default(),
        }
    }

    pub fn with_sessions(mut self, sessions: usize) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    pub fn with_worker(mut self, worker: WorkerConfig) -> Self {
        self.worker = worker;
        self
    }
}

/// Worker numbers for a pool of `sessions` workers.
///
/// A single worker is number 0 and keeps the template client id; larger
/// pools number their workers from 1.
pub fn worker_numbers(sessions: usize) -> Vec<usize> {
    if sessions == 1 {
        vec![0]
    } else {
        (1..=sessions).collect()
    }
}

/// The channel ends and tasks of a running pool.
pub struct PoolParts {
    pub requests: mpsc::Sender<String>,
    pub responses: mpsc::Receiver<String>,
    pub reports: mpsc::Receiver<WorkerReport>,
    pub handles: Vec<JoinHandle<()>>,
}

/// A set of running workers.
pub struct WorkerPool {
    requests: Option<mpsc::Sender<String>>,
    responses: mpsc::Receiver<String>,
    reports: mpsc::Receiver<WorkerReport>,
    states: Vec<(usize, watch::Receiver<WorkerState>)>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Connects `config.sessions` sessions and starts a worker on each.
    ///
    /// Client ids are checked before any connection is made.
    pub async fn start(config: &PoolConfig, template: Arc<IrmHeader>) -> Result<Self, ClientError> {
        if config.sessions == 0 {
            return Err(ClientError::Configuration(
                "at least one session is required".to_string(),
            ));
        }
        let numbers = worker_numbers(config.sessions);
        for &number in &numbers {
            effective_client_id(&template, number)?;
        }

        let mut sessions = Vec::with_capacity(numbers.len());
        for number in numbers {
            let session = connect(&config.connection).await?;
            sessions.push((number, session));
        }
        tracing::info!(
            "Started {} session(s) to {}",
            sessions.len(),
            config.connection.address()
        );

        Self::from_sessions(
            sessions,
            template,
            config.worker.clone(),
            config.queue_depth,
        )
    }

    /// Starts one worker on each already open session.
    pub fn from_sessions<S>(
        sessions: Vec<(usize, Session<S>)>,
        template: Arc<IrmHeader>,
        worker_config: WorkerConfig,
        queue_depth: usize,
    ) -> Result<Self, ClientError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let depth = queue_depth.max(1);
        let (request_tx, request_rx) = mpsc::channel(depth);
        let (response_tx, response_rx) = mpsc::channel(depth);
        let (report_tx, report_rx) = mpsc::channel(depth);
        let queue = Arc::new(Mutex::new(request_rx));

        let mut workers = Vec::with_capacity(sessions.len());
        for (number, session) in sessions {
            workers.push(Worker::new(
                number,
                Arc::clone(&template),
                session,
                worker_config.clone(),
            )?);
        }

        let mut states = Vec::with_capacity(workers.len());
        let mut handles = Vec::with_capacity(workers.len());
        for worker in workers {
            states.push((worker.number(), worker.state()));
            handles.push(tokio::spawn(worker.run(
                Arc::clone(&queue),
                response_tx.clone(),
                report_tx.clone(),
            )));
        }

        Ok(Self {
            requests: Some(request_tx),
            responses: response_rx,
            reports: report_rx,
            states,
            handles,
        })
    }

    /// Number of workers started.
    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Returns a sender for the request queue.
    pub fn sender(&self) -> Option<mpsc::Sender<String>> {
        self.requests.clone()
    }

    /// Queues one request.
    pub async fn submit(&self, request: impl Into<String>) -> Result<(), ClientError> {
        let requests = self.requests.as_ref().ok_or(ClientError::PoolClosed)?;
        requests
            .send(request.into())
            .await
            .map_err(|_| ClientError::PoolClosed)
    }

    /// Closes the request queue. Workers finish the queued requests and stop.
    pub fn close(&mut self) {
        self.requests = None;
    }

    pub async fn next_response(&mut self) -> Option<String> {
        self.responses.recv().await
    }

    pub async fn next_report(&mut self) -> Option<WorkerReport> {
        self.reports.recv().await
    }

    /// Current state of each worker, by worker number.
    pub fn states(&self) -> Vec<(usize, WorkerState)> {
        self.states
            .iter()
            .map(|(number, state)| (*number, *state.borrow()))
            .collect()
    }

    /// Splits the pool into its channels and task handles.
    ///
    /// Fails with [`ClientError::PoolClosed`] if the pool was already closed.
    pub fn into_parts(self) -> Result<PoolParts, ClientError> {
        Ok(PoolParts {
            requests: self.requests.ok_or(ClientError::PoolClosed)?,
            responses: self.responses,
            reports: self.reports,
            handles: self.handles,
        })
    }

    /// Waits for every worker task to end.
    pub async fn join(self) {
        drop(self.requests);
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!("worker task failed: {}", e);
            }
        }
    }
}
