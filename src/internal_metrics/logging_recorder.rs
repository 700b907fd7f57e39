//! A metrics recorder that periodically logs the agent's counters.

use metrics::{Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit};
use metrics_util::registry::{AtomicStorage, Registry};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Keeps counters in memory and logs them, with the change since the
/// previous report, every `interval`.
pub struct LoggingRecorder {
    registry: Arc<Registry<Key, AtomicStorage>>,
    descriptions: Descriptions,
}

/// Counter descriptions by metric name, logged next to each value.
type Descriptions = Arc<Mutex<HashMap<String, String>>>;

impl LoggingRecorder {
    pub fn new(
        interval: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> (Self, JoinHandle<()>) {
        let registry = Arc::new(Registry::new(AtomicStorage));
        let descriptions = Descriptions::default();
        let recorder = Self {
            registry: registry.clone(),
            descriptions: descriptions.clone(),
        };

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately and would log an empty report.
            ticker.tick().await;
            let mut previous: HashMap<String, u64> = HashMap::new();
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        for (key, value, delta) in report(&registry, &mut previous) {
                            let description = description_of(&descriptions, &key);
                            tracing::info!(
                                counter = %key,
                                value,
                                delta,
                                %description,
                                "Metrics"
                            );
                        }
                    }
                }
            }
        });

        (recorder, handle)
    }

    /// Current counter values keyed by their rendered name and labels.
    pub fn counters(&self) -> HashMap<String, u64> {
        counter_values(&self.registry)
    }

    /// The description registered for the metric `name`, if any.
    pub fn description(&self, name: &str) -> Option<String> {
        lock(&self.descriptions).get(name).cloned()
    }
}

fn lock(descriptions: &Descriptions) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
    descriptions.lock().unwrap_or_else(|e| e.into_inner())
}

/// Looks up a rendered key (`name{labels}`) by its metric name.
fn description_of(descriptions: &Descriptions, rendered_key: &str) -> String {
    let name = rendered_key.split('{').next().unwrap_or(rendered_key);
    lock(descriptions).get(name).cloned().unwrap_or_default()
}

fn counter_values(registry: &Registry<Key, AtomicStorage>) -> HashMap<String, u64> {
    registry
        .get_counter_handles()
        .into_iter()
        .map(|(key, counter)| (render_key(&key), counter.load(Ordering::Relaxed)))
        .collect()
}

/// `name{label=value,...}`, or just `name` without labels.
fn render_key(key: &Key) -> String {
    let labels: Vec<String> = key
        .labels()
        .map(|label| format!("{}={}", label.key(), label.value()))
        .collect();
    if labels.is_empty() {
        key.name().to_string()
    } else {
        format!("{}{{{}}}", key.name(), labels.join(","))
    }
}

/// Sorted `(name, value, change)` triples; `previous` is updated in place.
fn report(
    registry: &Registry<Key, AtomicStorage>,
    previous: &mut HashMap<String, u64>,
) -> Vec<(String, u64, u64)> {
    let mut lines: Vec<_> = counter_values(registry)
        .into_iter()
        .map(|(name, value)| {
            let before = previous.insert(name.clone(), value).unwrap_or(0);
            (name, value, value.saturating_sub(before))
        })
        .collect();
    lines.sort();
    lines
}

impl Recorder for LoggingRecorder {
    fn describe_counter(&self, key: KeyName, _unit: Option<Unit>, description: SharedString) {
        lock(&self.descriptions).insert(key.as_str().to_string(), description.into_owned());
    }

    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        self.registry.get_or_create_counter(key, |c| c.clone().into())
    }

    fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        self.registry.get_or_create_gauge(key, |g| g.clone().into())
    }

    fn register_histogram(&self, key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        self.registry.get_or_create_histogram(key, |h| h.clone().into())
    }
}
