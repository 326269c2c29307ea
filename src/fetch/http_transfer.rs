//! Transfer engine backed by reqwest.
//!
//! Requests run as tasks on a private tokio runtime. Body chunks and
//! completions travel back over a channel, and a self-pipe wakes the reactor:
//! its read end is the only socket [`HttpTransfer`] asks to have watched.
//! Body bytes are written into each request's sink on the reactor thread,
//! inside [`socket_action`](TransferEngine::socket_action).

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::io::{self, Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::{Client, Proxy};
use tokio::runtime::Runtime;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, trace};
use url::Url;

use super::buffer::BodySink;
use super::constants::DEFAULT_MAX_CONNECTIONS;
use super::context::FetchId;
use super::error::{TransferError, TransferFailure};
use super::reactor::{Interest, Socket};
use super::resolve::ResolveHint;
use super::transfer::{ConnectionLimits, Finished, TransferEngine, TransferRequest, TransferSignal};

/// Options baked into a reqwest client; requests must match them to reuse it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClientKey {
    resolve: Vec<ResolveHint>,
    proxy: Option<String>,
    user_agent: String,
    tcp_keepalive: Option<Duration>,
    prefer_http2: bool,
}

impl ClientKey {
    fn new(request: &TransferRequest) -> Self {
        let mut resolve = request.resolve.clone();
        resolve.sort();
        resolve.dedup();
        Self {
            resolve,
            proxy: request.proxy.clone(),
            user_agent: request.user_agent.clone(),
            tcp_keepalive: request.tcp_keepalive,
            prefer_http2: request.prefer_http2,
        }
    }
}

enum TransferEvent {
    Data {
        id: FetchId,
        chunk: Vec<u8>,
    },
    Done {
        id: FetchId,
        outcome: Result<u16, TransferFailure>,
    },
}

struct CachedClient {
    key: ClientKey,
    client: Client,
}

struct ActiveTransfer {
    sink: BodySink,
    task: JoinHandle<()>,
    finished: bool,
}

/// reqwest-backed [`TransferEngine`].
///
/// Simultaneous transfers are bounded by a semaphore sized to
/// `max_total_connections`. Only one client pool is kept: a request with
/// different options replaces it, and the replaced pool closes its idle
/// connections once the transfers still holding it finish. Idle connections
/// per host never exceed the connection cap.
pub struct HttpTransfer {
    runtime: Option<Runtime>,
    client: Option<CachedClient>,
    clients_built: usize,
    permits: Arc<Semaphore>,
    max_total: usize,
    max_cached: usize,
    transfers: HashMap<FetchId, ActiveTransfer>,
    events_tx: mpsc::UnboundedSender<TransferEvent>,
    events_rx: mpsc::UnboundedReceiver<TransferEvent>,
    wake_rx: UnixStream,
    wake_tx: Arc<UnixStream>,
    signals: VecDeque<TransferSignal>,
    finished: VecDeque<Finished>,
}

impl HttpTransfer {
    /// Starts the transfer runtime and its wake-up pipe.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Io`] if the runtime or the pipe cannot be created.
    pub fn new() -> Result<Self, TransferError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("dohfetch-transfer")
            .enable_all()
            .build()?;

        let (wake_rx, wake_tx) = UnixStream::pair()?;
        wake_rx.set_nonblocking(true)?;
        wake_tx.set_nonblocking(true)?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Self {
            runtime: Some(runtime),
            client: None,
            clients_built: 0,
            permits: Arc::new(Semaphore::new(DEFAULT_MAX_CONNECTIONS)),
            max_total: DEFAULT_MAX_CONNECTIONS,
            max_cached: DEFAULT_MAX_CONNECTIONS,
            transfers: HashMap::new(),
            events_tx,
            events_rx,
            wake_rx,
            wake_tx: Arc::new(wake_tx),
            signals: VecDeque::new(),
            finished: VecDeque::new(),
        })
    }

    /// Returns the descriptor the reactor must watch for readability.
    #[must_use]
    pub fn wake_socket(&self) -> Socket {
        self.wake_rx.as_raw_fd()
    }

    /// Returns the number of client pools built so far.
    #[must_use]
    pub fn clients_built(&self) -> usize {
        self.clients_built
    }

    fn client_for(&mut self, request: &TransferRequest) -> Result<Client, TransferError> {
        let key = ClientKey::new(request);
        if let Some(cached) = self.client.as_ref().filter(|cached| cached.key == key) {
            return Ok(cached.client.clone());
        }

        let mut builder = Client::builder()
            .user_agent(key.user_agent.as_str())
            .tcp_keepalive(key.tcp_keepalive)
            .pool_max_idle_per_host(self.max_cached.min(self.max_total));
        if !key.prefer_http2 {
            builder = builder.http1_only();
        }
        for hint in &key.resolve {
            builder = builder.resolve(hint.host(), hint.socket_addr());
        }
        builder = match &key.proxy {
            Some(proxy) => builder.proxy(
                Proxy::all(proxy.as_str())
                    .map_err(|e| TransferError::invalid_option("proxy", e.to_string()))?,
            ),
            None => builder.no_proxy(),
        };
        let client = builder
            .build()
            .map_err(|e| TransferError::invalid_option("client", e.to_string()))?;

        self.clients_built += 1;
        debug!(
            hints = key.resolve.len(),
            proxy = key.proxy.as_deref().unwrap_or("none"),
            replaced = self.client.is_some(),
            built = self.clients_built,
            "created HTTP client pool"
        );
        self.client = Some(CachedClient {
            key,
            client: client.clone(),
        });
        Ok(client)
    }

    fn drain_wake_pipe(&self) -> io::Result<()> {
        let mut buf = [0u8; 64];
        let mut reader = &self.wake_rx;
        loop {
            match reader.read(&mut buf) {
                Ok(0) => return Ok(()),
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }

    fn process_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                TransferEvent::Data { id, chunk } => {
                    let Some(transfer) = self.transfers.get_mut(&id) else {
                        continue;
                    };
                    if transfer.finished {
                        continue;
                    }
                    if let Err(e) = transfer.sink.write(&chunk) {
                        debug!(fetch_id = %id, error = %e, "body sink refused chunk, aborting transfer");
                        transfer.task.abort();
                        transfer.finished = true;
                        self.finished.push_back(Finished {
                            id,
                            outcome: Err(TransferFailure::BodyRejected),
                        });
                    }
                }
                TransferEvent::Done { id, outcome } => {
                    let Some(transfer) = self.transfers.get_mut(&id) else {
                        continue;
                    };
                    if transfer.finished {
                        continue;
                    }
                    transfer.finished = true;
                    self.finished.push_back(Finished { id, outcome });
                }
            }
        }
    }

    fn running(&self) -> usize {
        self.transfers.values().filter(|t| !t.finished).count()
    }
}

impl TransferEngine for HttpTransfer {
    fn configure(&mut self, limits: &ConnectionLimits) -> Result<(), TransferError> {
        if limits.max_total_connections == 0 {
            return Err(TransferError::invalid_option(
                "max_total_connections",
                "must be at least 1",
            ));
        }
        self.permits = Arc::new(Semaphore::new(limits.max_total_connections));
        self.max_total = limits.max_total_connections;
        self.max_cached = limits.max_cached_connections;
        self.client = None;
        self.signals.push_back(TransferSignal::Watch {
            socket: self.wake_socket(),
            interest: Interest::READABLE,
        });
        Ok(())
    }

    #[instrument(level = "debug", skip(self, request), fields(fetch_id = %id, url = %request.url))]
    fn add(&mut self, id: FetchId, request: TransferRequest) -> Result<(), TransferError> {
        let url = Url::parse(&request.url).map_err(|e| TransferError::rejected(id, e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(TransferError::rejected(
                id,
                format!("unsupported scheme {}", url.scheme()),
            ));
        }
        let client = self
            .client_for(&request)
            .map_err(|e| TransferError::rejected(id, e.to_string()))?;
        let Some(runtime) = &self.runtime else {
            return Err(TransferError::Driver("transfer runtime stopped".to_string()));
        };

        let task = runtime.spawn(run_transfer(TransferTask {
            id,
            client,
            url,
            timeout: request.timeout,
            permits: Arc::clone(&self.permits),
            events: self.events_tx.clone(),
            wake: Arc::clone(&self.wake_tx),
        }));
        self.transfers.insert(
            id,
            ActiveTransfer {
                sink: request.sink,
                task,
                finished: false,
            },
        );
        Ok(())
    }

    fn remove(&mut self, id: FetchId) -> Result<(), TransferError> {
        if let Some(transfer) = self.transfers.remove(&id) {
            if !transfer.finished {
                transfer.task.abort();
            }
        }
        Ok(())
    }

    fn socket_action(
        &mut self,
        socket: Socket,
        readiness: Interest,
    ) -> Result<usize, TransferError> {
        if socket != self.wake_socket() {
            return Err(TransferError::Driver(format!(
                "readiness on foreign socket {socket}"
            )));
        }
        trace!(socket, %readiness, "wake pipe ready");
        self.drain_wake_pipe()?;
        self.process_events();
        Ok(self.running())
    }

    fn timeout_action(&mut self) -> Result<usize, TransferError> {
        self.process_events();
        Ok(self.running())
    }

    fn next_signal(&mut self) -> Option<TransferSignal> {
        self.signals.pop_front()
    }

    fn next_finished(&mut self) -> Option<Finished> {
        self.finished.pop_front()
    }
}

impl Drop for HttpTransfer {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl fmt::Debug for HttpTransfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransfer")
            .field("transfers", &self.transfers.len())
            .field("clients_built", &self.clients_built)
            .field("available_permits", &self.permits.available_permits())
            .field("wake_socket", &self.wake_socket())
            .finish_non_exhaustive()
    }
}

struct TransferTask {
    id: FetchId,
    client: Client,
    url: Url,
    timeout: Duration,
    permits: Arc<Semaphore>,
    events: mpsc::UnboundedSender<TransferEvent>,
    wake: Arc<UnixStream>,
}

/// Runs one request to completion; the timeout covers queueing for a permit too.
async fn run_transfer(task: TransferTask) {
    let outcome = match tokio::time::timeout(task.timeout, fetch(&task)).await {
        Ok(outcome) => outcome,
        Err(_) => Err(TransferFailure::TimedOut),
    };
    // The engine may already have dropped the receiver during shutdown.
    let _ = task.events.send(TransferEvent::Done {
        id: task.id,
        outcome,
    });
    wake_up(&task.wake);
}

async fn fetch(task: &TransferTask) -> Result<u16, TransferFailure> {
    let _permit = task
        .permits
        .acquire()
        .await
        .map_err(|_| TransferFailure::Other("connection pool closed".to_string()))?;

    let response = task
        .client
        .get(task.url.clone())
        .send()
        .await
        .map_err(classify)?;
    let status = response.status().as_u16();

    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(classify)?;
        let event = TransferEvent::Data {
            id: task.id,
            chunk: chunk.to_vec(),
        };
        if task.events.send(event).is_err() {
            return Err(TransferFailure::Other("transfer engine dropped".to_string()));
        }
        wake_up(&task.wake);
    }
    Ok(status)
}

fn classify(error: reqwest::Error) -> TransferFailure {
    if error.is_timeout() {
        TransferFailure::TimedOut
    } else if error.is_connect() {
        TransferFailure::Connect(error.to_string())
    } else {
        TransferFailure::Other(error.to_string())
    }
}

/// A full pipe already guarantees a pending wake-up.
fn wake_up(wake: &UnixStream) {
    let mut writer = wake;
    match writer.write(&[1]) {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
        Err(e) => trace!(error = %e, "wake pipe write failed"),
    }
}
