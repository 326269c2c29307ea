//! Shared fakes for engine tests.
//!
//! [`FakeTransfer`] is a scriptable transfer engine: tests queue steps to run
//! when a URL is added, when a socket is reported ready, or when the timer
//! fires. [`RecordingReactor`] keeps the subscription table and an operation
//! log. Both expose their state through `Rc` handles so tests can inspect it
//! after moving the fake into a `FetchEngine`.

#![allow(dead_code)]

pub mod counting_server;
pub mod socket_guard;

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::rc::Rc;
use std::time::Duration;

use dohfetch_core::fetch::{
    BodySink, ConnectionLimits, Finished, TransferEngine, TransferError, TransferFailure,
    TransferRequest, TransferSignal,
};
use dohfetch_core::{FetchConfig, FetchEngine, FetchId, FetchResult, Interest, Reactor, Socket};

/// One scripted action of the fake transfer engine.
#[derive(Debug, Clone)]
pub enum Step {
    /// Ask for `socket` to be watched.
    Watch(Socket, Interest),
    /// Ask for `socket` to be released.
    Unwatch(Socket),
    /// Ask for a timer change.
    Timer(Option<Duration>),
    /// Deliver body bytes for the transfer of `url`.
    Data(String, Vec<u8>),
    /// Finish the transfer of `url`.
    Finish(String, Result<u16, TransferFailure>),
}

impl Step {
    pub fn data(url: &str, body: &[u8]) -> Self {
        Self::Data(url.to_string(), body.to_vec())
    }

    pub fn ok(url: &str, status: u16) -> Self {
        Self::Finish(url.to_string(), Ok(status))
    }

    pub fn fail(url: &str, failure: TransferFailure) -> Self {
        Self::Finish(url.to_string(), Err(failure))
    }
}

/// What the engine handed over in `add`, minus the sink.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub id: FetchId,
    pub url: String,
    pub resolve: Vec<dohfetch_core::ResolveHint>,
    pub prefer_http2: bool,
    pub timeout: Duration,
    pub tcp_keepalive: Option<Duration>,
    pub user_agent: String,
    pub proxy: Option<String>,
}

#[derive(Default)]
pub struct FakeState {
    pub limits: Option<ConnectionLimits>,
    pub refuse_limits: bool,
    pub requests: Vec<SeenRequest>,
    pub removed: Vec<FetchId>,
    pub socket_actions: Vec<(Socket, Interest)>,
    pub timeout_actions: usize,
    refuse_urls: Vec<String>,
    ids: HashMap<String, FetchId>,
    sinks: HashMap<FetchId, BodySink>,
    finished_ids: Vec<FetchId>,
    on_add: HashMap<String, Vec<Step>>,
    on_socket: HashMap<Socket, VecDeque<Vec<Step>>>,
    on_timeout: VecDeque<Vec<Step>>,
    signals: VecDeque<TransferSignal>,
    finished: VecDeque<Finished>,
}

impl FakeState {
    fn run(&mut self, steps: Vec<Step>) {
        for step in steps {
            match step {
                Step::Watch(socket, interest) => {
                    self.signals.push_back(TransferSignal::Watch { socket, interest });
                }
                Step::Unwatch(socket) => self.signals.push_back(TransferSignal::Unwatch { socket }),
                Step::Timer(after) => self.signals.push_back(TransferSignal::Timer(after)),
                Step::Data(url, body) => {
                    let Some(id) = self.ids.get(&url).copied() else {
                        continue;
                    };
                    let Some(sink) = self.sinks.get(&id) else {
                        continue;
                    };
                    if sink.write(&body).is_err() {
                        self.finish(id, Err(TransferFailure::BodyRejected));
                    }
                }
                Step::Finish(url, outcome) => {
                    if let Some(id) = self.ids.get(&url).copied() {
                        self.finish(id, outcome);
                    }
                }
            }
        }
    }

    fn finish(&mut self, id: FetchId, outcome: Result<u16, TransferFailure>) {
        self.finished_ids.push(id);
        self.finished.push_back(Finished { id, outcome });
    }

    fn running(&self) -> usize {
        self.sinks
            .keys()
            .filter(|id| !self.finished_ids.contains(id))
            .count()
    }
}

/// Handle for scripting and inspecting a [`FakeTransfer`].
#[derive(Clone, Default)]
pub struct FakeHandle(pub Rc<RefCell<FakeState>>);

impl FakeHandle {
    /// Runs `steps` synchronously inside `add` for `url`.
    pub fn on_add(&self, url: &str, steps: Vec<Step>) {
        self.0.borrow_mut().on_add.insert(url.to_string(), steps);
    }

    /// Runs `steps` at the next readiness report for `socket`.
    pub fn on_socket(&self, socket: Socket, steps: Vec<Step>) {
        self.0
            .borrow_mut()
            .on_socket
            .entry(socket)
            .or_default()
            .push_back(steps);
    }

    /// Runs `steps` at the next timeout action.
    pub fn on_timeout(&self, steps: Vec<Step>) {
        self.0.borrow_mut().on_timeout.push_back(steps);
    }

    /// Runs `steps` now, outside any engine call.
    pub fn inject(&self, steps: Vec<Step>) {
        self.0.borrow_mut().run(steps);
    }

    /// Makes `add` fail for `url`.
    pub fn refuse(&self, url: &str) {
        self.0.borrow_mut().refuse_urls.push(url.to_string());
    }

    pub fn id_of(&self, url: &str) -> Option<FetchId> {
        self.0.borrow().ids.get(url).copied()
    }

    pub fn removed(&self) -> Vec<FetchId> {
        self.0.borrow().removed.clone()
    }

    pub fn requests(&self) -> Vec<SeenRequest> {
        self.0.borrow().requests.clone()
    }

    pub fn timeout_actions(&self) -> usize {
        self.0.borrow().timeout_actions
    }

    pub fn socket_actions(&self) -> Vec<(Socket, Interest)> {
        self.0.borrow().socket_actions.clone()
    }

    pub fn limits(&self) -> Option<ConnectionLimits> {
        self.0.borrow().limits
    }
}

/// Scriptable [`TransferEngine`].
pub struct FakeTransfer(FakeHandle);

impl FakeTransfer {
    pub fn new() -> (Self, FakeHandle) {
        let handle = FakeHandle::default();
        (Self(handle.clone()), handle)
    }
}

impl TransferEngine for FakeTransfer {
    fn configure(&mut self, limits: &ConnectionLimits) -> Result<(), TransferError> {
        let mut state = self.0.0.borrow_mut();
        if state.refuse_limits {
            return Err(TransferError::invalid_option(
                "max_total_connections",
                "refused by fake",
            ));
        }
        state.limits = Some(*limits);
        Ok(())
    }

    fn add(&mut self, id: FetchId, request: TransferRequest) -> Result<(), TransferError> {
        let mut state = self.0.0.borrow_mut();
        if state.refuse_urls.contains(&request.url) {
            return Err(TransferError::rejected(id, "refused by fake"));
        }
        state.requests.push(SeenRequest {
            id,
            url: request.url.clone(),
            resolve: request.resolve.clone(),
            prefer_http2: request.prefer_http2,
            timeout: request.timeout,
            tcp_keepalive: request.tcp_keepalive,
            user_agent: request.user_agent.clone(),
            proxy: request.proxy.clone(),
        });
        state.ids.insert(request.url.clone(), id);
        state.sinks.insert(id, request.sink);
        if let Some(steps) = state.on_add.remove(&request.url) {
            state.run(steps);
        }
        Ok(())
    }

    fn remove(&mut self, id: FetchId) -> Result<(), TransferError> {
        let mut state = self.0.0.borrow_mut();
        state.sinks.remove(&id);
        state.removed.push(id);
        Ok(())
    }

    fn socket_action(
        &mut self,
        socket: Socket,
        readiness: Interest,
    ) -> Result<usize, TransferError> {
        let mut state = self.0.0.borrow_mut();
        state.socket_actions.push((socket, readiness));
        let steps = state
            .on_socket
            .get_mut(&socket)
            .and_then(VecDeque::pop_front);
        if let Some(steps) = steps {
            state.run(steps);
        }
        Ok(state.running())
    }

    fn timeout_action(&mut self) -> Result<usize, TransferError> {
        let mut state = self.0.0.borrow_mut();
        state.timeout_actions += 1;
        if let Some(steps) = state.on_timeout.pop_front() {
            state.run(steps);
        }
        Ok(state.running())
    }

    fn next_signal(&mut self) -> Option<TransferSignal> {
        self.0.0.borrow_mut().signals.pop_front()
    }

    fn next_finished(&mut self) -> Option<Finished> {
        self.0.0.borrow_mut().finished.pop_front()
    }
}

/// Reactor operation as seen by [`RecordingReactor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactorOp {
    Watch(Socket, Interest),
    Unwatch(Socket),
    Arm(Duration),
    Disarm,
}

#[derive(Default)]
pub struct ReactorLog {
    pub ops: Vec<ReactorOp>,
    pub active: HashMap<Socket, Interest>,
    pub timer: Option<Duration>,
}

/// [`Reactor`] that only records what the engine asks of it.
#[derive(Clone, Default)]
pub struct RecordingReactor(pub Rc<RefCell<ReactorLog>>);

impl RecordingReactor {
    pub fn ops(&self) -> Vec<ReactorOp> {
        self.0.borrow().ops.clone()
    }

    pub fn active(&self) -> HashMap<Socket, Interest> {
        self.0.borrow().active.clone()
    }

    pub fn timer(&self) -> Option<Duration> {
        self.0.borrow().timer
    }

    pub fn clear_ops(&self) {
        self.0.borrow_mut().ops.clear();
    }
}

impl Reactor for RecordingReactor {
    fn watch_socket(&mut self, socket: Socket, interest: Interest) -> io::Result<()> {
        let mut log = self.0.borrow_mut();
        log.ops.push(ReactorOp::Watch(socket, interest));
        if log.active.insert(socket, interest).is_some() {
            return Err(io::Error::other(format!("socket {socket} watched twice")));
        }
        Ok(())
    }

    fn unwatch_socket(&mut self, socket: Socket) {
        let mut log = self.0.borrow_mut();
        log.ops.push(ReactorOp::Unwatch(socket));
        log.active.remove(&socket);
    }

    fn arm_timer(&mut self, after: Duration) {
        let mut log = self.0.borrow_mut();
        log.ops.push(ReactorOp::Arm(after));
        log.timer = Some(after);
    }

    fn disarm_timer(&mut self) {
        let mut log = self.0.borrow_mut();
        log.ops.push(ReactorOp::Disarm);
        log.timer = None;
    }
}

pub type TestEngine = FetchEngine<FakeTransfer, RecordingReactor>;

/// Builds an engine over fresh fakes.
pub fn engine_with(config: FetchConfig) -> (TestEngine, FakeHandle, RecordingReactor) {
    let (transfer, handle) = FakeTransfer::new();
    let reactor = RecordingReactor::default();
    let engine =
        FetchEngine::new(config, transfer, reactor.clone()).expect("engine should build over fakes");
    (engine, handle, reactor)
}

/// Collects every completion in order of delivery.
#[derive(Clone, Default)]
pub struct Completions(pub Rc<RefCell<Vec<(String, FetchResult)>>>);

impl Completions {
    pub fn callback(&self, url: &str) -> impl FnOnce(FetchResult) + 'static {
        let seen = Rc::clone(&self.0);
        let url = url.to_string();
        move |result| seen.borrow_mut().push((url, result))
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn count_for(&self, url: &str) -> usize {
        self.0.borrow().iter().filter(|(u, _)| u == url).count()
    }

    pub fn take(&self) -> Vec<(String, FetchResult)> {
        std::mem::take(&mut self.0.borrow_mut())
    }
}

/// Fields of one captured log event, `message` included.
#[derive(Debug, Default)]
pub struct CapturedEvent {
    pub level: Option<tracing::Level>,
    pub fields: HashMap<String, String>,
}

impl CapturedEvent {
    pub fn message(&self) -> &str {
        self.fields.get("message").map_or("", String::as_str)
    }
}

#[derive(Default)]
struct FieldVisitor {
    fields: HashMap<String, String>,
}

impl tracing::field::Visit for FieldVisitor {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.fields
            .insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.fields
            .insert(field.name().to_string(), format!("{value:?}"));
    }
}

#[derive(Clone)]
struct CaptureLayer {
    events: std::sync::Arc<std::sync::Mutex<Vec<CapturedEvent>>>,
}

impl<S> tracing_subscriber::Layer<S> for CaptureLayer
where
    S: tracing::Subscriber + for<'lookup> tracing_subscriber::registry::LookupSpan<'lookup>,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        self.events.lock().unwrap().push(CapturedEvent {
            level: Some(*event.metadata().level()),
            fields: visitor.fields,
        });
    }
}

/// Runs `f` with a subscriber that records every event at DEBUG and above.
pub fn capture_events<F: FnOnce()>(f: F) -> Vec<CapturedEvent> {
    use tracing_subscriber::prelude::*;

    let events = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let subscriber = tracing_subscriber::registry()
        .with(tracing_subscriber::filter::LevelFilter::DEBUG)
        .with(CaptureLayer {
            events: std::sync::Arc::clone(&events),
        });

    tracing::subscriber::with_default(subscriber, || {
        // Parallel tests may have cached callsite interest under the no-op dispatcher.
        tracing::callsite::rebuild_interest_cache();
        f();
    });

    std::mem::take(&mut *events.lock().unwrap())
}
