use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicI64, AtomicU64, Ordering},
        Arc, Mutex, OnceLock,
    },
};

pub struct RelayMetrics {
    ws_events_total: Mutex<HashMap<String, u64>>,
    ws_event_errors_total: Mutex<HashMap<String, u64>>,
    ws_event_duration_sum_ms: Mutex<HashMap<String, u64>>,
    connections_total: Mutex<HashMap<String, u64>>,
    chat_persist_failures_total: AtomicU64,
    delivery_failures_total: AtomicU64,
    active_rooms: AtomicI64,
    active_sessions: AtomicI64,
}

const CONNECTION_OUTCOMES: [&str; 3] = ["accepted", "rejected_auth", "rejected_join"];
static GLOBAL_METRICS: OnceLock<Arc<RelayMetrics>> = OnceLock::new();

impl Default for RelayMetrics {
    fn default() -> Self {
        let mut connections_total = HashMap::new();
        for outcome in CONNECTION_OUTCOMES {
            connections_total.insert(outcome.to_string(), 0);
        }

        Self {
            ws_events_total: Mutex::new(HashMap::new()),
            ws_event_errors_total: Mutex::new(HashMap::new()),
            ws_event_duration_sum_ms: Mutex::new(HashMap::new()),
            connections_total: Mutex::new(connections_total),
            chat_persist_failures_total: AtomicU64::new(0),
            delivery_failures_total: AtomicU64::new(0),
            active_rooms: AtomicI64::new(0),
            active_sessions: AtomicI64::new(0),
        }
    }
}

pub fn set_global_metrics(metrics: Arc<RelayMetrics>) {
    let _ = GLOBAL_METRICS.set(metrics);
}

pub fn global_metrics() -> Option<&'static Arc<RelayMetrics>> {
    GLOBAL_METRICS.get()
}

pub fn record_ws_event(kind: &str, is_error: bool, latency_ms: u64) {
    if let Some(metrics) = global_metrics() {
        metrics.record_ws_event(kind, is_error, latency_ms);
    }
}

pub fn record_connection(outcome: &str) {
    if let Some(metrics) = global_metrics() {
        metrics.record_connection(outcome);
    }
}

pub fn increment_chat_persist_failures() {
    if let Some(metrics) = global_metrics() {
        metrics.chat_persist_failures_total.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn increment_delivery_failures(count: u64) {
    if let Some(metrics) = global_metrics() {
        metrics.delivery_failures_total.fetch_add(count, Ordering::SeqCst);
    }
}

pub fn set_room_gauges(rooms: usize, sessions: usize) {
    if let Some(metrics) = global_metrics() {
        metrics.set_room_gauges(rooms, sessions);
    }
}

impl RelayMetrics {
    pub fn record_ws_event(&self, kind: &str, is_error: bool, latency_ms: u64) {
        let label = normalize_label(kind);
        increment_label_counter(&self.ws_events_total, &label, 1);
        increment_label_counter(&self.ws_event_duration_sum_ms, &label, latency_ms);
        if is_error {
            increment_label_counter(&self.ws_event_errors_total, &label, 1);
        }
    }

    pub fn record_connection(&self, outcome: &str) {
        let normalized = normalize_label(outcome);
        let label = if CONNECTION_OUTCOMES.contains(&normalized.as_str()) {
            normalized
        } else {
            "unknown".to_string()
        };
        increment_label_counter(&self.connections_total, &label, 1);
    }

    pub fn set_room_gauges(&self, rooms: usize, sessions: usize) {
        self.active_rooms.store(rooms as i64, Ordering::SeqCst);
        self.active_sessions.store(sessions as i64, Ordering::SeqCst);
    }

    pub fn render_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP relay_ws_events_total Total websocket events by kind.\n");
        output.push_str("# TYPE relay_ws_events_total counter\n");
        append_label_counter_lines(&mut output, "relay_ws_events_total", "kind", &self.ws_events_total);

        output.push_str("# HELP relay_ws_event_errors_total Websocket events that failed, by kind.\n");
        output.push_str("# TYPE relay_ws_event_errors_total counter\n");
        append_label_counter_lines(
            &mut output,
            "relay_ws_event_errors_total",
            "kind",
            &self.ws_event_errors_total,
        );

        output.push_str("# HELP relay_ws_event_duration_ms_sum Sum of websocket event handling time in milliseconds by kind.\n");
        output.push_str("# TYPE relay_ws_event_duration_ms_sum counter\n");
        append_label_counter_lines(
            &mut output,
            "relay_ws_event_duration_ms_sum",
            "kind",
            &self.ws_event_duration_sum_ms,
        );

        output.push_str("# HELP relay_connections_total WebSocket connections by outcome.\n");
        output.push_str("# TYPE relay_connections_total counter\n");
        append_label_counter_lines(
            &mut output,
            "relay_connections_total",
            "outcome",
            &self.connections_total,
        );

        output.push_str("# HELP relay_chat_persist_failures_total Chat messages broadcast but not persisted.\n");
        output.push_str("# TYPE relay_chat_persist_failures_total counter\n");
        output.push_str(&format!(
            "relay_chat_persist_failures_total {}\n",
            self.chat_persist_failures_total.load(Ordering::SeqCst)
        ));

        output.push_str("# HELP relay_delivery_failures_total Recipients dropped because their connection was gone.\n");
        output.push_str("# TYPE relay_delivery_failures_total counter\n");
        output.push_str(&format!(
            "relay_delivery_failures_total {}\n",
            self.delivery_failures_total.load(Ordering::SeqCst)
        ));

        output.push_str("# HELP relay_active_rooms Rooms with at least one joined session.\n");
        output.push_str("# TYPE relay_active_rooms gauge\n");
        output.push_str(&format!("relay_active_rooms {}\n", self.active_rooms.load(Ordering::SeqCst)));

        output.push_str("# HELP relay_active_sessions Sessions joined to a room.\n");
        output.push_str("# TYPE relay_active_sessions gauge\n");
        output.push_str(&format!(
            "relay_active_sessions {}\n",
            self.active_sessions.load(Ordering::SeqCst)
        ));

        output
    }
}

fn normalize_label(label: &str) -> String {
    let normalized = label.trim().to_ascii_lowercase();
    if normalized.is_empty() {
        "unknown".to_string()
    } else {
        normalized
    }
}

fn increment_label_counter(map: &Mutex<HashMap<String, u64>>, label: &str, delta: u64) {
    let mut guard = map.lock().expect("metrics map lock poisoned");
    let value = guard.entry(label.to_string()).or_insert(0);
    *value = value.saturating_add(delta);
}

fn append_label_counter_lines(
    output: &mut String,
    metric_name: &str,
    label_name: &str,
    map: &Mutex<HashMap<String, u64>>,
) {
    let guard = map.lock().expect("metrics map lock poisoned");
    let mut entries: Vec<_> = guard.iter().collect();
    entries.sort_by(|(left, _), (right, _)| left.cmp(right));

    for (label, value) in entries {
        output.push_str(&format!(
            "{metric_name}{{{label_name}=\"{}\"}} {value}\n",
            escape_label_value(label),
        ));
    }
}

fn escape_label_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\n', "\\n").replace('"', "\\\"")
}
