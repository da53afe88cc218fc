use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicI64, AtomicU64, Ordering},
        Arc, Mutex, OnceLock,
    },
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EndpointMetricKey {
    endpoint: String,
    method: String,
}

#[derive(Default)]
pub struct HubMetrics {
    request_rate_total: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_errors_total: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_duration_sum_ms: Mutex<HashMap<EndpointMetricKey, u64>>,
    inbound_messages_total: Mutex<HashMap<String, u64>>,
    malformed_messages_total: AtomicU64,
    deliveries_total: AtomicU64,
    dropped_closed_total: AtomicU64,
    dropped_full_total: AtomicU64,
    evictions_total: AtomicU64,
    rejected_upgrades_total: AtomicU64,
    connections_active: AtomicI64,
}

/// Buckets for inbound `type` labels; free-form types collapse into `other`.
const KNOWN_MESSAGE_TYPES: [&str; 10] = [
    "typing_start",
    "typing_end",
    "annotation_created",
    "annotation_updated",
    "filter_change",
    "intelligence_created",
    "alert_created",
    "feedback_created",
    "user_active",
    "user_inactive",
];

static GLOBAL_METRICS: OnceLock<Arc<HubMetrics>> = OnceLock::new();

pub fn set_global_metrics(metrics: Arc<HubMetrics>) {
    let _ = GLOBAL_METRICS.set(metrics);
}

pub fn global_metrics() -> Option<&'static Arc<HubMetrics>> {
    GLOBAL_METRICS.get()
}

pub fn record_inbound_message(message_type: &str) {
    if let Some(metrics) = global_metrics() {
        metrics.record_inbound_message(message_type);
    }
}

pub fn increment_malformed_messages() {
    if let Some(metrics) = global_metrics() {
        metrics.malformed_messages_total.fetch_add(1, Ordering::Relaxed);
    }
}

pub fn record_fan_out(delivered: usize, dropped_closed: usize, dropped_full: usize) {
    if let Some(metrics) = global_metrics() {
        metrics.record_fan_out(delivered, dropped_closed, dropped_full);
    }
}

pub fn increment_evictions() {
    if let Some(metrics) = global_metrics() {
        metrics.evictions_total.fetch_add(1, Ordering::Relaxed);
    }
}

pub fn increment_rejected_upgrades() {
    if let Some(metrics) = global_metrics() {
        metrics.rejected_upgrades_total.fetch_add(1, Ordering::Relaxed);
    }
}

pub fn connection_opened() {
    if let Some(metrics) = global_metrics() {
        metrics.connections_active.fetch_add(1, Ordering::Relaxed);
    }
}

pub fn connection_closed() {
    if let Some(metrics) = global_metrics() {
        metrics.connections_active.fetch_sub(1, Ordering::Relaxed);
    }
}

impl HubMetrics {
    pub fn record_http_request(&self, method: &str, path: &str, status_code: u16, latency_ms: u64) {
        let key = EndpointMetricKey {
            endpoint: normalize_endpoint(path),
            method: method.to_ascii_uppercase(),
        };

        increment_counter(&self.request_rate_total, &key, 1);
        increment_counter(&self.request_duration_sum_ms, &key, latency_ms);
        if status_code >= 400 {
            increment_counter(&self.request_errors_total, &key, 1);
        }
    }

    pub fn record_inbound_message(&self, message_type: &str) {
        let label = if KNOWN_MESSAGE_TYPES.contains(&message_type) { message_type } else { "other" };
        let mut guard = self.inbound_messages_total.lock().expect("metrics map lock poisoned");
        let value = guard.entry(label.to_string()).or_insert(0);
        *value = value.saturating_add(1);
    }

    pub fn record_fan_out(&self, delivered: usize, dropped_closed: usize, dropped_full: usize) {
        self.deliveries_total.fetch_add(delivered as u64, Ordering::Relaxed);
        self.dropped_closed_total.fetch_add(dropped_closed as u64, Ordering::Relaxed);
        self.dropped_full_total.fetch_add(dropped_full as u64, Ordering::Relaxed);
    }

    pub fn render_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP hub_http_requests_total Total HTTP requests by endpoint.\n");
        output.push_str("# TYPE hub_http_requests_total counter\n");
        append_counter_lines(&mut output, "hub_http_requests_total", &self.request_rate_total);

        output.push_str("# HELP hub_http_errors_total Total HTTP error responses by endpoint.\n");
        output.push_str("# TYPE hub_http_errors_total counter\n");
        append_counter_lines(&mut output, "hub_http_errors_total", &self.request_errors_total);

        output.push_str("# HELP hub_http_duration_ms_sum Sum of HTTP request latency in milliseconds by endpoint.\n");
        output.push_str("# TYPE hub_http_duration_ms_sum counter\n");
        append_counter_lines(&mut output, "hub_http_duration_ms_sum", &self.request_duration_sum_ms);

        output.push_str("# HELP hub_inbound_messages_total Inbound websocket messages by type.\n");
        output.push_str("# TYPE hub_inbound_messages_total counter\n");
        append_label_counter_lines(
            &mut output,
            "hub_inbound_messages_total",
            "type",
            &self.inbound_messages_total,
        );

        append_scalar(
            &mut output,
            "hub_malformed_messages_total",
            "counter",
            "Inbound frames dropped because they could not be decoded.",
            self.malformed_messages_total.load(Ordering::Relaxed) as i64,
        );
        append_scalar(
            &mut output,
            "hub_deliveries_total",
            "counter",
            "Envelopes queued for delivery to a peer.",
            self.deliveries_total.load(Ordering::Relaxed) as i64,
        );

        output.push_str("# HELP hub_dropped_deliveries_total Envelopes not delivered, by reason.\n");
        output.push_str("# TYPE hub_dropped_deliveries_total counter\n");
        output.push_str(&format!(
            "hub_dropped_deliveries_total{{reason=\"closed\"}} {}\n",
            self.dropped_closed_total.load(Ordering::Relaxed)
        ));
        output.push_str(&format!(
            "hub_dropped_deliveries_total{{reason=\"full\"}} {}\n",
            self.dropped_full_total.load(Ordering::Relaxed)
        ));

        append_scalar(
            &mut output,
            "hub_evictions_total",
            "counter",
            "Connections closed for not draining their outbound buffer.",
            self.evictions_total.load(Ordering::Relaxed) as i64,
        );
        append_scalar(
            &mut output,
            "hub_rejected_upgrades_total",
            "counter",
            "Websocket upgrades refused for lack of a valid session.",
            self.rejected_upgrades_total.load(Ordering::Relaxed) as i64,
        );
        append_scalar(
            &mut output,
            "hub_connections_active",
            "gauge",
            "Currently registered connections.",
            self.connections_active.load(Ordering::Relaxed).max(0),
        );

        output
    }
}

fn normalize_endpoint(path: &str) -> String {
    let segments: Vec<&str> = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            if segment.chars().all(|character| character.is_ascii_digit()) {
                "{number}"
            } else {
                segment
            }
        })
        .collect();

    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

fn increment_counter(
    map: &Mutex<HashMap<EndpointMetricKey, u64>>,
    key: &EndpointMetricKey,
    delta: u64,
) {
    let mut guard = map.lock().expect("metrics map lock poisoned");
    let value = guard.entry(key.clone()).or_insert(0);
    *value = value.saturating_add(delta);
}

fn append_scalar(output: &mut String, name: &str, kind: &str, help: &str, value: i64) {
    output.push_str(&format!("# HELP {name} {help}\n"));
    output.push_str(&format!("# TYPE {name} {kind}\n"));
    output.push_str(&format!("{name} {value}\n"));
}

fn append_counter_lines(
    output: &mut String,
    metric_name: &str,
    map: &Mutex<HashMap<EndpointMetricKey, u64>>,
) {
    let guard = map.lock().expect("metrics map lock poisoned");
    let mut entries: Vec<_> = guard.iter().collect();
    entries.sort_by(|(left_key, _), (right_key, _)| {
        left_key
            .method
            .cmp(&right_key.method)
            .then_with(|| left_key.endpoint.cmp(&right_key.endpoint))
    });

    for (key, value) in entries {
        output.push_str(&format!(
            "{metric_name}{{method=\"{}\",endpoint=\"{}\"}} {value}\n",
            escape_label_value(&key.method),
            escape_label_value(&key.endpoint),
        ));
    }
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
