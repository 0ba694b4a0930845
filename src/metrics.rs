//! In-process Prometheus registry. Pull-only: nothing here pushes to a
//! remote collector, matching the source's no-exporter non-goal.

use prometheus::{CounterVec, Encoder, Gauge, HistogramVec, Opts, Registry, TextEncoder};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

const DURATION_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0];

pub struct Metrics {
    registry: Registry,
    requests_total: CounterVec,
    request_duration_seconds: HistogramVec,
    cache_outcomes_total: CounterVec,
    llm_tokens_total: CounterVec,
    llm_cost_total: prometheus::Counter,
    in_flight_requests: Gauge,
    breaker_state: Gauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let requests_total = CounterVec::new(Opts::new("requests_total", "Total requests by endpoint and outcome"), &["endpoint", "status"]).unwrap();
        let request_duration_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new("request_duration_seconds", "Request latency in seconds").buckets(DURATION_BUCKETS.to_vec()),
            &["endpoint"],
        )
        .unwrap();
        let cache_outcomes_total = CounterVec::new(Opts::new("cache_outcomes_total", "Cache outcomes by type"), &["type"]).unwrap();
        let llm_tokens_total = CounterVec::new(Opts::new("llm_tokens_total", "LLM tokens by direction"), &["direction"]).unwrap();
        let llm_cost_total = prometheus::Counter::new("llm_cost_total", "Cumulative LLM cost in currency units").unwrap();
        let in_flight_requests = Gauge::new("in_flight_requests", "Requests currently admitted but not yet complete").unwrap();
        let breaker_state = Gauge::new("breaker_state", "Circuit breaker state: 0=closed 1=half_open 2=open").unwrap();

        registry.register(Box::new(requests_total.clone())).unwrap();
        registry.register(Box::new(request_duration_seconds.clone())).unwrap();
        registry.register(Box::new(cache_outcomes_total.clone())).unwrap();
        registry.register(Box::new(llm_tokens_total.clone())).unwrap();
        registry.register(Box::new(llm_cost_total.clone())).unwrap();
        registry.register(Box::new(in_flight_requests.clone())).unwrap();
        registry.register(Box::new(breaker_state.clone())).unwrap();

        Self {
            registry,
            requests_total,
            request_duration_seconds,
            cache_outcomes_total,
            llm_tokens_total,
            llm_cost_total,
            in_flight_requests,
            breaker_state,
        }
    }

    pub fn record_request(&self, endpoint: &str, status: &str, duration_secs: f64) {
        self.requests_total.with_label_values(&[endpoint, status]).inc();
        self.request_duration_seconds.with_label_values(&[endpoint]).observe(duration_secs);
    }

    pub fn record_cache_outcome(&self, outcome: &str) {
        self.cache_outcomes_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_llm_usage(&self, input_tokens: u32, output_tokens: u32, cost: Decimal) {
        self.llm_tokens_total.with_label_values(&["input"]).inc_by(input_tokens as f64);
        self.llm_tokens_total.with_label_values(&["output"]).inc_by(output_tokens as f64);
        self.llm_cost_total.inc_by(cost.to_f64().unwrap_or(0.0));
    }

    pub fn set_in_flight(&self, count: i64) {
        self.in_flight_requests.set(count as f64);
    }

    pub fn set_breaker_state(&self, open: bool, half_open: bool) {
        let value = if half_open { 1.0 } else if open { 2.0 } else { 0.0 };
        self.breaker_state.set(value);
    }

    /// Renders the registry's current series in the scrape-compatible text
    /// exposition format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).expect("prometheus text encoding cannot fail");
        String::from_utf8(buffer).expect("prometheus text encoder emits valid utf-8")
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
