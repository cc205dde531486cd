//! Transaction worker.
//!
//! A worker owns one session and drives transactions through it one at a
//! time: frame, send, read, parse, acknowledge, publish. Requests come from
//! a queue shared with the other workers of a pool.

use crate::ack::AckCoordinator;
use crate::connection::Session;
use crate::error::ClientError;
use bytes::BytesMut;
use irm_protocol::{
    encode_request, parse_response, FixedName, FrameOptions, IrmHeader, TransactionRequest,
};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch, Mutex};

/// Default send buffer size (4 KiB).
pub const DEFAULT_SEND_BUFFER_SIZE: usize = 4 * 1024;

/// Default receive buffer capacity and response size limit (256 KiB).
pub const DEFAULT_MAX_RESPONSE_SIZE: usize = 256 * 1024;

/// Request queue shared by the workers of a pool.
pub type RequestQueue = Arc<Mutex<mpsc::Receiver<String>>>;

/// Observable worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Sending,
    AwaitingResponse,
    AwaitingAck,
    Done,
}

/// Per-worker counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Requests taken from the queue.
    pub transactions: u64,
    /// Responses published.
    pub responses: u64,
    /// Requests answered with a `*REQSTS*` error.
    pub business_errors: u64,
    /// Requests rejected before sending (bad code, too large).
    pub rejected: u64,
    pub acks_sent: u64,
}

/// Message from a worker to its owner.
#[derive(Debug)]
pub enum WorkerReport {
    /// A request failed. When `error.is_fatal()` the worker has stopped.
    Error { worker: usize, error: ClientError },
    /// The request queue closed and the worker stopped cleanly.
    Finished { worker: usize, stats: WorkerStats },
}

/// Worker tuning.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub send_buffer_size: usize,
    pub max_response_size: usize,
    /// Use the NOWAIT timer on ACKs when IMS Connect allows it.
    pub ack_nowait: bool,
    pub framing: FrameOptions,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            send_buffer_size: DEFAULT_SEND_BUFFER_SIZE,
            max_response_size: DEFAULT_MAX_RESPONSE_SIZE,
            ack_nowait: true,
            framing: FrameOptions::default(),
        }
    }
}

/// Returns the client id worker `number` sends.
///
/// Worker 0 uses the template's id unchanged; worker `n` appends `n` to the
/// trimmed template id.
pub fn effective_client_id(template: &IrmHeader, number: usize) -> Result<FixedName, ClientError> {
    if number == 0 {
        return Ok(template.client_id);
    }
    let id = format!("{}{}", template.client_id.trimmed(), number);
    FixedName::new("client_id", &id)
        .map_err(|e| ClientError::Configuration(format!("worker {}: {}", number, e)))
}

/// Drives transactions over one session.
pub struct Worker<S> {
    number: usize,
    client_id: FixedName,
    template: Arc<IrmHeader>,
    session: Session<S>,
    config: WorkerConfig,
    acks: AckCoordinator,
    send_buf: BytesMut,
    recv_buf: BytesMut,
    state: watch::Sender<WorkerState>,
    stats: WorkerStats,
}

impl<S> Worker<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates worker `number` over an open session.
    ///
    /// Fails if the worker's client id does not fit the header.
    pub fn new(
        number: usize,
        template: Arc<IrmHeader>,
        session: Session<S>,
        config: WorkerConfig,
    ) -> Result<Self, ClientError> {
        let client_id = effective_client_id(&template, number)?;
        let (state, _) = watch::channel(WorkerState::Idle);
        let mut send_buf = BytesMut::with_capacity(config.send_buffer_size);
        send_buf.resize(config.send_buffer_size, 0);
        Ok(Self {
            number,
            client_id,
            acks: AckCoordinator::new(Arc::clone(&template), config.ack_nowait),
            template,
            session,
            recv_buf: BytesMut::with_capacity(config.max_response_size),
            send_buf,
            config,
            state,
            stats: WorkerStats::default(),
        })
    }

    pub fn number(&self) -> usize {
        self.number
    }

    pub fn client_id(&self) -> FixedName {
        self.client_id
    }

    /// Subscribes to state changes.
    pub fn state(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Runs one transaction and returns the response text.
    ///
    /// Lines of the response are joined with `\n`. The worker is back in
    /// [`WorkerState::Idle`] afterwards unless the error is fatal.
    pub async fn transact(&mut self, line: &str) -> Result<String, ClientError> {
        self.stats.transactions += 1;
        let result = self.exchange(line).await;
        match &result {
            Ok(_) => self.stats.responses += 1,
            Err(ClientError::Business(_)) => self.stats.business_errors += 1,
            Err(ClientError::Configuration(_)) | Err(ClientError::Capacity(_)) => {
                self.stats.rejected += 1
            }
            Err(_) => {}
        }
        if !matches!(&result, Err(e) if e.is_fatal()) {
            self.set_state(WorkerState::Idle);
        }
        result
    }

    async fn exchange(&mut self, line: &str) -> Result<String, ClientError> {
        let request = TransactionRequest::parse(line)?;
        let len = encode_request(
            &self.template,
            self.client_id,
            &request,
            &self.config.framing,
            &mut self.send_buf[..],
        )?;

        tracing::debug!(
            "worker {}: sending {} ({} bytes)",
            self.number,
            request.trancode.trimmed(),
            len
        );
        self.set_state(WorkerState::Sending);
        self.session.write_frame(&self.send_buf[..len]).await?;

        self.set_state(WorkerState::AwaitingResponse);
        let total = self
            .session
            .read_message(&mut self.recv_buf, self.config.max_response_size)
            .await?;
        let parsed = parse_response(&self.recv_buf[..total]);
        tracing::debug!(
            "worker {}: response of {} bytes, {} lines, ack_required={}",
            self.number,
            total,
            parsed.lines.len(),
            parsed.ack_required
        );

        if parsed.ack_required {
            self.set_state(WorkerState::AwaitingAck);
            self.acks
                .acknowledge(&mut self.session, parsed.ack_nowait, &mut self.recv_buf)
                .await?;
            self.stats.acks_sent += 1;
        }

        if let Some(status) = parsed.status {
            return Err(ClientError::Business(status));
        }

        Ok(parsed.text())
    }

    /// Serves requests until the queue closes or a fatal error occurs.
    ///
    /// Successful responses go to `responses`. Every failed request is
    /// reported on `reports`; the last report is either a fatal error or
    /// [`WorkerReport::Finished`].
    pub async fn run(
        mut self,
        requests: RequestQueue,
        responses: mpsc::Sender<String>,
        reports: mpsc::Sender<WorkerReport>,
    ) {
        let worker = self.number;
        tracing::debug!("worker {} started as {}", worker, self.client_id);

        loop {
            let next = requests.lock().await.recv().await;
            let Some(line) = next else {
                break;
            };

            match self.transact(&line).await {
                Ok(text) => {
                    if responses.send(text).await.is_err() {
                        tracing::debug!("worker {}: response receiver dropped", worker);
                        break;
                    }
                }
                Err(error) if error.is_fatal() => {
                    tracing::error!("worker {}: {}", worker, error);
                    self.set_state(WorkerState::Done);
                    let _ = reports.send(WorkerReport::Error { worker, error }).await;
                    return;
                }
                Err(error) => {
                    tracing::warn!("worker {}: {}", worker, error);
                    let _ = reports.send(WorkerReport::Error { worker, error }).await;
                }
            }
        }

        self.set_state(WorkerState::Done);
        let stats = self.stats.clone();
        if let Err(e) = self.session.close().await {
            tracing::debug!("worker {}: close failed: {}", worker, e);
        }
        tracing::debug!("worker {} finished: {:?}", worker, stats);
        let _ = reports.send(WorkerReport::Finished { worker, stats }).await;
    }

    /// Closes the session of a worker driven through [`Worker::transact`].
    pub async fn close(self) -> Result<WorkerStats, ClientError> {
        self.set_state(WorkerState::Done);
        self.session.close().await?;
        Ok(self.stats)
    }

    fn set_state(&self, state: WorkerState) {
        self.state.send_replace(state);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use irm_protocol::frame::{encode_ack, request_frame_len, ACK_FRAME_SIZE};
    use irm_protocol::response::{CSMOKY, REQSTS, SEG_ACK_NOWAIT, SEG_ACK_REQUIRED};
    use tokio_test::io::Builder;

    pub(crate) fn response(segments: &[(u16, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (flags, payload) in segments {
            body.extend_from_slice(&((payload.len() + 4) as u16).to_be_bytes());
            body.extend_from_slice(&flags.to_be_bytes());
            body.extend_from_slice(payload);
        }
        let mut out = ((body.len() + 4) as u32).to_be_bytes().to_vec();
        out.extend_from_slice(&body);
        out
    }

    pub(crate) fn request_frame(
        template: &IrmHeader,
        client_id: FixedName,
        line: &str,
    ) -> Vec<u8> {
        let req = TransactionRequest::parse(line).unwrap();
        let mut buf = vec![0u8; request_frame_len(line.len())];
        let options = FrameOptions::default();
        let len = encode_request(template, client_id, &req, &options, &mut buf).unwrap();
        buf.truncate(len);
        buf
    }

    fn ack_frame(template: &IrmHeader, nowait: bool) -> Vec<u8> {
        let mut buf = vec![0u8; ACK_FRAME_SIZE];
        encode_ack(template, nowait, &mut buf).unwrap();
        buf
    }

    fn status(rc: u32, rsn: u32) -> Vec<u8> {
        let mut p = REQSTS.to_vec();
        p.extend_from_slice(&rc.to_be_bytes());
        p.extend_from_slice(&rsn.to_be_bytes());
        p
    }

    fn worker(
        mock: tokio_test::io::Mock,
        template: &Arc<IrmHeader>,
    ) -> Worker<tokio_test::io::Mock> {
        Worker::new(
            0,
            Arc::clone(template),
            Session::new(mock, "test"),
            WorkerConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_effective_client_id() {
        let template = IrmHeader::new().with_client_id("INJ").unwrap();
        let id = |n| effective_client_id(&template, n).unwrap();
        assert_eq!(id(0).trimmed(), "INJ");
        assert_eq!(id(7).trimmed(), "INJ7");
        assert_eq!(id(12).trimmed(), "INJ12");

        let template = IrmHeader::new().with_client_id("CLIENT01").unwrap();
        let err = effective_client_id(&template, 3).unwrap_err();
        assert!(matches!(err, ClientError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_transaction_without_ack() {
        let template = Arc::new(IrmHeader::new());
        let mock = Builder::new()
            .write(&request_frame(&template, FixedName::BLANK, "PING hello"))
            .read(&response(&[(0, b"HELLO")]))
            .build();
        let mut worker = worker(mock, &template);
        let state = worker.state();

        assert_eq!(worker.transact("PING hello").await.unwrap(), "HELLO");
        assert_eq!(*state.borrow(), WorkerState::Idle);
        assert_eq!(worker.stats().responses, 1);
        assert_eq!(worker.stats().acks_sent, 0);
    }

    #[tokio::test]
    async fn test_lines_are_joined() {
        let template = Arc::new(IrmHeader::new());
        let mock = Builder::new()
            .write(&request_frame(&template, FixedName::BLANK, "IVTNO DISPLAY"))
            .read(&response(&[(0, b"LINE 1"), (0, b"LINE 2"), (0, CSMOKY)]))
            .build();
        let mut worker = worker(mock, &template);
        assert_eq!(
            worker.transact("IVTNO DISPLAY").await.unwrap(),
            "LINE 1\nLINE 2"
        );
    }

    #[tokio::test]
    async fn test_ack_nowait_after_response() {
        let template = Arc::new(IrmHeader::new());
        let mock = Builder::new()
            .write(&request_frame(&template, FixedName::BLANK, "IVTNO x"))
            .read(&response(&[
                (0, b"OUTPUT"),
                (SEG_ACK_REQUIRED | SEG_ACK_NOWAIT, CSMOKY),
            ]))
            .write(&ack_frame(&template, true))
            .build();
        let mut worker = worker(mock, &template);
        assert_eq!(worker.transact("IVTNO x").await.unwrap(), "OUTPUT");
        assert_eq!(worker.stats().acks_sent, 1);
    }

    #[tokio::test]
    async fn test_ack_waits_for_reply() {
        let template = Arc::new(IrmHeader::new());
        let mock = Builder::new()
            .write(&request_frame(&template, FixedName::BLANK, "IVTNO x"))
            .read(&response(&[(0, b"OUTPUT"), (SEG_ACK_REQUIRED, CSMOKY)]))
            .write(&ack_frame(&template, false))
            .read(&response(&[(0, CSMOKY)]))
            .build();
        let mut worker = worker(mock, &template);
        assert_eq!(worker.transact("IVTNO x").await.unwrap(), "OUTPUT");
        assert_eq!(worker.stats().acks_sent, 1);
    }

    #[tokio::test]
    async fn test_business_error_sends_no_ack() {
        let template = Arc::new(IrmHeader::new());
        // The mock fails the test if an unexpected ACK is written.
        let mock = Builder::new()
            .write(&request_frame(&template, FixedName::BLANK, "IVTNO x"))
            .read(&response(&[(0, &status(0x0008, 0x0024))]))
            .build();
        let mut worker = worker(mock, &template);
        let state = worker.state();

        let err = worker.transact("IVTNO x").await.unwrap_err();
        let status = err.status().unwrap();
        assert_eq!(status.return_code, 8);
        assert_eq!(status.reason_code, 0x24);
        assert!(!err.is_fatal());
        assert_eq!(*state.borrow(), WorkerState::Idle);
        assert_eq!(worker.stats().business_errors, 1);
    }

    #[tokio::test]
    async fn test_business_error_with_ack() {
        let template = Arc::new(IrmHeader::new());
        let mock = Builder::new()
            .write(&request_frame(&template, FixedName::BLANK, "IVTNO x"))
            .read(&response(&[(
                SEG_ACK_REQUIRED | SEG_ACK_NOWAIT,
                &status(0x000C, 0x0010),
            )]))
            .write(&ack_frame(&template, true))
            .build();
        let mut worker = worker(mock, &template);
        let err = worker.transact("IVTNO x").await.unwrap_err();
        assert!(err.to_string().contains("OTMA reason code 0010"));
        assert_eq!(worker.stats().acks_sent, 1);
    }

    #[tokio::test]
    async fn test_long_trancode_sends_nothing() {
        let template = Arc::new(IrmHeader::new());
        let mock = Builder::new().build();
        let mut worker = worker(mock, &template);
        let err = worker.transact("TOOLONGCODE data").await.unwrap_err();
        assert!(matches!(err, ClientError::Configuration(_)));
        assert_eq!(worker.stats().rejected, 1);
    }

    #[tokio::test]
    async fn test_oversize_request_is_capacity_error() {
        let template = Arc::new(IrmHeader::new());
        let mock = Builder::new().build();
        let mut worker = worker(mock, &template);
        let line = format!("BIG {}", "x".repeat(DEFAULT_SEND_BUFFER_SIZE));
        let err = worker.transact(&line).await.unwrap_err();
        assert!(matches!(err, ClientError::Capacity(_)));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_run_survives_request_errors() {
        let template = Arc::new(IrmHeader::new());
        let mock = Builder::new()
            .write(&request_frame(&template, FixedName::BLANK, "PING one"))
            .read(&response(&[(0, b"ONE")]))
            .build();
        let worker = worker(mock, &template);
        let mut state = worker.state();

        let (req_tx, req_rx) = mpsc::channel(8);
        let (resp_tx, mut resp_rx) = mpsc::channel(8);
        let (report_tx, mut report_rx) = mpsc::channel(8);
        req_tx.send("WAYTOOLONG x".to_string()).await.unwrap();
        req_tx.send("PING one".to_string()).await.unwrap();
        drop(req_tx);

        worker
            .run(Arc::new(Mutex::new(req_rx)), resp_tx, report_tx)
            .await;

        assert_eq!(resp_rx.recv().await.unwrap(), "ONE");
        assert!(matches!(
            report_rx.recv().await.unwrap(),
            WorkerReport::Error {
                worker: 0,
                error: ClientError::Configuration(_)
            }
        ));
        match report_rx.recv().await.unwrap() {
            WorkerReport::Finished { worker, stats } => {
                assert_eq!(worker, 0);
                assert_eq!(stats.transactions, 2);
                assert_eq!(stats.responses, 1);
                assert_eq!(stats.rejected, 1);
            }
            other => panic!("expected Finished, got {:?}", other),
        }
        assert!(report_rx.recv().await.is_none());
        state.changed().await.ok();
        assert_eq!(*state.borrow(), WorkerState::Done);
    }

    #[tokio::test]
    async fn test_run_stops_on_fatal_error() {
        let template = Arc::new(IrmHeader::new());
        // Peer closes the connection before answering.
        let mock = Builder::new()
            .write(&request_frame(&template, FixedName::BLANK, "PING one"))
            .build();
        let worker = worker(mock, &template);

        let (req_tx, req_rx) = mpsc::channel(8);
        let (resp_tx, mut resp_rx) = mpsc::channel(8);
        let (report_tx, mut report_rx) = mpsc::channel(8);
        req_tx.send("PING one".to_string()).await.unwrap();
        req_tx.send("PING two".to_string()).await.unwrap();

        worker
            .run(Arc::new(Mutex::new(req_rx)), resp_tx, report_tx)
            .await;

        match report_rx.recv().await.unwrap() {
            WorkerReport::Error { worker, error } => {
                assert_eq!(worker, 0);
                assert!(matches!(error, ClientError::ConnectionClosed));
            }
            other => panic!("expected fatal error, got {:?}", other),
        }
        // Reported once, no Finished afterwards.
        assert!(report_rx.recv().await.is_none());
        assert!(resp_rx.recv().await.is_none());
    }
}
