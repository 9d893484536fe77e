//! Hierarchical operation trace.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use super::statistics::StoreResponseStatistics;

#[derive(Debug, Default)]
struct TraceState {
    duration: Option<Duration>,
    data: BTreeMap<String, Value>,
    children: Vec<Trace>,
    store_responses: Vec<StoreResponseStatistics>,
}

#[derive(Debug)]
struct TraceNode {
    name: String,
    started_at: DateTime<Utc>,
    started: Instant,
    /// Start of the root span; offsets are measured from here.
    origin: Instant,
    state: Mutex<TraceState>,
}

/// A named span with children, data and the attempts recorded under it.
///
/// Cloning shares the span. Hedge racers each own a child and record into it
/// concurrently.
#[derive(Debug, Clone)]
pub struct Trace {
    node: Arc<TraceNode>,
}

impl Trace {
    pub fn root(name: impl Into<String>) -> Self {
        let now = Instant::now();
        Self::with_origin(name.into(), now)
    }

    fn with_origin(name: String, origin: Instant) -> Self {
        Self {
            node: Arc::new(TraceNode {
                name,
                started_at: Utc::now(),
                started: Instant::now(),
                origin,
                state: Mutex::new(TraceState::default()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.node.name
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.node.started_at
    }

    pub fn child(&self, name: impl Into<String>) -> Trace {
        let child = Self::with_origin(name.into(), self.node.origin);
        if let Ok(mut state) = self.node.state.lock() {
            state.children.push(child.clone());
        }
        child
    }

    /// Set a key/value datum, replacing any previous value.
    pub fn add_datum(&self, key: impl Into<String>, value: impl Into<Value>) {
        if let Ok(mut state) = self.node.state.lock() {
            state.data.insert(key.into(), value.into());
        }
    }

    pub fn datum(&self, key: &str) -> Option<Value> {
        self.node.state.lock().ok()?.data.get(key).cloned()
    }

    /// Append an attempt, stamping its offset and latency.
    pub fn record_store_response(&self, stats: StoreResponseStatistics, started: Instant) {
        let offset = started.saturating_duration_since(self.node.origin);
        let stats = stats.with_timing(as_ms(offset), as_ms(started.elapsed()));
        if let Ok(mut state) = self.node.state.lock() {
            state.store_responses.push(stats);
        }
    }

    /// Close the span. Later calls keep the first duration.
    pub fn end(&self) {
        if let Ok(mut state) = self.node.state.lock() {
            if state.duration.is_none() {
                state.duration = Some(self.node.started.elapsed());
            }
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        self.node.state.lock().ok()?.duration
    }

    pub fn elapsed_since_origin(&self) -> Duration {
        self.node.origin.elapsed()
    }

    pub fn children(&self) -> Vec<Trace> {
        self.node
            .state
            .lock()
            .map(|state| state.children.clone())
            .unwrap_or_default()
    }

    pub fn store_responses(&self) -> Vec<StoreResponseStatistics> {
        self.node
            .state
            .lock()
            .map(|state| state.store_responses.clone())
            .unwrap_or_default()
    }

    /// Depth-first search for spans with this name, including self.
    pub fn find(&self, name: &str) -> Vec<Trace> {
        let mut found = Vec::new();
        self.walk(&mut |trace| {
            if trace.name() == name {
                found.push(trace.clone());
            }
        });
        found
    }

    /// Every attempt in the tree, ordered by start offset.
    pub fn all_store_responses(&self) -> Vec<StoreResponseStatistics> {
        let mut all = Vec::new();
        self.walk(&mut |trace| all.extend(trace.store_responses()));
        all.sort_by(|a, b| a.start_offset_ms.total_cmp(&b.start_offset_ms));
        all
    }

    /// Every datum with this key anywhere in the tree.
    pub fn find_data(&self, key: &str) -> Vec<Value> {
        let mut found = Vec::new();
        self.walk(&mut |trace| {
            if let Some(value) = trace.datum(key) {
                found.push(value);
            }
        });
        found
    }

    fn walk(&self, visit: &mut dyn FnMut(&Trace)) {
        visit(self);
        for child in self.children() {
            child.walk(visit);
        }
    }

    pub fn to_json(&self) -> Value {
        let (duration, data, children, responses) = match self.node.state.lock() {
            Ok(state) => (
                state.duration,
                state.data.clone(),
                state.children.clone(),
                state.store_responses.clone(),
            ),
            Err(_) => return json!({ "name": self.node.name }),
        };

        let mut out = json!({
            "name": self.node.name,
            "start datetime": self.node.started_at.to_rfc3339(),
            "duration in milliseconds": duration.map(as_ms),
        });
        if !data.is_empty() {
            out["data"] = json!(data);
        }
        if !responses.is_empty() {
            out["StoreResponseStatistics"] = json!(responses);
        }
        if !children.is_empty() {
            out["children"] = Value::Array(children.iter().map(Trace::to_json).collect());
        }
        out
    }
}

fn as_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
