//! Scripted media engine for tests

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::RendererError;
use super::engine::{BusMessage, BusSender, BusEnvelope, BusWatch, Graph, GraphDescription, MediaEngine};
use super::types::{GraphState, InstanceId, Timestamp};
use crate::forward::FrameTap;

/// Everything a graph was asked to do, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    SetState(GraphState),
    Push { len: usize, pts: Option<Timestamp> },
    Eos,
    Seek(Timestamp),
    BusFlushing(bool),
}

pub struct MockGraphState {
    pub name: String,
    pub description: GraphDescription,
    pub tap: Option<FrameTap>,
    calls: Mutex<Vec<Call>>,
    state: Mutex<GraphState>,
    /// Null requests stay pending until `complete_null`
    defer_null: AtomicBool,
    null_pending: AtomicBool,
    /// Ready requests are accepted but never reached
    stuck_in_null: AtomicBool,
    base_time: Mutex<Option<Timestamp>>,
    duration: Mutex<Option<Timestamp>>,
    duration_queries: AtomicU64,
    position: Mutex<Option<Timestamp>>,
    seek_ok: AtomicBool,
    push_fails: AtomicBool,
    bus: Mutex<Option<(InstanceId, BusSender)>>,
    /// A flushing bus drops everything posted to it
    bus_flushing: AtomicBool,
}

impl MockGraphState {
    fn new(name: &str, description: GraphDescription, tap: Option<FrameTap>, base: Timestamp) -> Self {
        Self {
            name: name.to_string(),
            description,
            tap,
            calls: Mutex::new(Vec::new()),
            state: Mutex::new(GraphState::Null),
            defer_null: AtomicBool::new(false),
            null_pending: AtomicBool::new(false),
            stuck_in_null: AtomicBool::new(false),
            base_time: Mutex::new(Some(base)),
            duration: Mutex::new(None),
            duration_queries: AtomicU64::new(0),
            position: Mutex::new(None),
            seek_ok: AtomicBool::new(true),
            push_fails: AtomicBool::new(false),
            bus: Mutex::new(None),
            bus_flushing: AtomicBool::new(false),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == call).count()
    }

    pub fn set_state_calls(&self, state: GraphState) -> usize {
        self.count(&Call::SetState(state))
    }

    pub fn pushes(&self) -> Vec<(usize, Option<Timestamp>)> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                Call::Push { len, pts } => Some((*len, *pts)),
                _ => None,
            })
            .collect()
    }

    pub fn state(&self) -> GraphState {
        *self.state.lock().unwrap()
    }

    pub fn set_defer_null(&self, defer: bool) {
        self.defer_null.store(defer, Ordering::SeqCst);
    }

    pub fn set_stuck_in_null(&self, stuck: bool) {
        self.stuck_in_null.store(stuck, Ordering::SeqCst);
    }

    /// Finish a deferred null request.
    pub fn complete_null(&self) {
        if self.null_pending.swap(false, Ordering::SeqCst) {
            *self.state.lock().unwrap() = GraphState::Null;
        }
    }

    pub fn set_base_time(&self, base: Option<Timestamp>) {
        *self.base_time.lock().unwrap() = base;
    }

    pub fn set_duration(&self, duration: Option<Timestamp>) {
        *self.duration.lock().unwrap() = duration;
    }

    pub fn duration_queries(&self) -> u64 {
        self.duration_queries.load(Ordering::SeqCst)
    }

    pub fn set_position(&self, position: Option<Timestamp>) {
        *self.position.lock().unwrap() = position;
    }

    pub fn set_seek_ok(&self, ok: bool) {
        self.seek_ok.store(ok, Ordering::SeqCst);
    }

    pub fn set_push_fails(&self, fails: bool) {
        self.push_fails.store(fails, Ordering::SeqCst);
    }

    pub fn bus_flushing(&self) -> bool {
        self.bus_flushing.load(Ordering::SeqCst)
    }

    /// Post a message on this graph's bus, as the engine would. Returns
    /// false when the bus is flushing and the message was dropped.
    pub fn emit(&self, message: BusMessage) -> bool {
        if self.bus_flushing() {
            return false;
        }
        let bus = self.bus.lock().unwrap();
        let (instance, tx) = bus.as_ref().expect("bus is not watched");
        tx.send(BusEnvelope {
            instance: *instance,
            message,
        })
        .expect("bus receiver dropped");
        true
    }

    /// Pipeline-level state change message for this graph.
    pub fn state_changed(&self, old: GraphState, current: GraphState) -> BusMessage {
        BusMessage::StateChanged {
            src: self.name.clone(),
            old,
            current,
        }
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

pub struct MockGraph(pub Arc<MockGraphState>);

impl Graph for MockGraph {
    fn name(&self) -> &str {
        &self.0.name
    }

    fn has_ingestion(&self) -> bool {
        self.0.description.has_ingestion()
    }

    fn set_state(&self, target: GraphState) -> Result<(), RendererError> {
        let graph = &self.0;
        graph.record(Call::SetState(target));

        if target == GraphState::Null && graph.defer_null.load(Ordering::SeqCst) {
            graph.null_pending.store(true, Ordering::SeqCst);
            return Ok(());
        }
        if target == GraphState::Ready && graph.stuck_in_null.load(Ordering::SeqCst) {
            return Ok(());
        }

        graph.null_pending.store(false, Ordering::SeqCst);
        *graph.state.lock().unwrap() = target;
        Ok(())
    }

    fn current_state(&self, _timeout: Duration) -> Option<GraphState> {
        Some(self.0.state())
    }

    fn push_buffer(&self, data: &[u8], pts: Option<Timestamp>) -> Result<(), RendererError> {
        self.0.record(Call::Push { len: data.len(), pts });
        if self.0.push_fails.load(Ordering::SeqCst) {
            return Err(RendererError::Push {
                name: self.0.name.clone(),
                reason: "flushing".into(),
            });
        }
        Ok(())
    }

    fn end_of_stream(&self) -> Result<(), RendererError> {
        self.0.record(Call::Eos);
        Ok(())
    }

    fn query_duration(&self) -> Option<Timestamp> {
        self.0.duration_queries.fetch_add(1, Ordering::SeqCst);
        *self.0.duration.lock().unwrap()
    }

    fn query_position(&self) -> Option<Timestamp> {
        *self.0.position.lock().unwrap()
    }

    fn seek_simple(&self, position: Timestamp) -> bool {
        self.0.record(Call::Seek(position));
        self.0.seek_ok.load(Ordering::SeqCst)
    }

    fn base_time(&self) -> Option<Timestamp> {
        *self.0.base_time.lock().unwrap()
    }

    fn set_bus_flushing(&self, flushing: bool) {
        self.0.record(Call::BusFlushing(flushing));
        self.0.bus_flushing.store(flushing, Ordering::SeqCst);
    }

    fn watch_bus(&self, instance: InstanceId, tx: BusSender) -> Result<BusWatch, RendererError> {
        *self.0.bus.lock().unwrap() = Some((instance, tx));
        Ok(BusWatch::new(instance))
    }
}

/// Engine handing out [`MockGraph`]s and keeping a handle on each of them.
#[derive(Default)]
pub struct MockEngine {
    graphs: Mutex<Vec<Arc<MockGraphState>>>,
    stuck_in_null: Mutex<Vec<String>>,
    fail_launch: AtomicBool,
}

impl MockEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Graphs named `name` will never reach ready.
    pub fn never_ready(&self, name: &str) {
        self.stuck_in_null.lock().unwrap().push(name.to_string());
    }

    pub fn fail_launch(&self) {
        self.fail_launch.store(true, Ordering::SeqCst);
    }

    pub fn graph(&self, index: usize) -> Arc<MockGraphState> {
        self.graphs.lock().unwrap()[index].clone()
    }

    pub fn graph_count(&self) -> usize {
        self.graphs.lock().unwrap().len()
    }
}

impl MediaEngine for MockEngine {
    fn instantiate(
        &self,
        name: &str,
        description: &GraphDescription,
        tap: Option<FrameTap>,
    ) -> Result<Box<dyn Graph>, RendererError> {
        if self.fail_launch.load(Ordering::SeqCst) {
            return Err(RendererError::Launch {
                name: name.to_string(),
                reason: "no element \"bogus\"".into(),
            });
        }

        let mut graphs = self.graphs.lock().unwrap();
        // distinct base times make it visible which graph the clock follows
        let base = Timestamp::from_millis(1_000 * (graphs.len() as u64 + 1));
        let state = Arc::new(MockGraphState::new(name, description.clone(), tap, base));
        if self.stuck_in_null.lock().unwrap().iter().any(|n| n == name) {
            state.set_stuck_in_null(true);
        }
        graphs.push(state.clone());
        Ok(Box::new(MockGraph(state)))
    }
}
