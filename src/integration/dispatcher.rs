//! Alert dispatch boundary: the adapter contract and a retrying queue.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::anomaly::{AnomalyEvent, Severity};
use crate::error::{ConfigError, DispatchError};

/// Adapter contract for forwarding anomaly events to external systems.
///
/// Called synchronously from camera pipelines, possibly from several threads
/// at once. Implementations must return quickly, queueing internally if
/// delivery is slow.
pub trait AlertDispatcher: Send + Sync {
    fn on_event(&self, event: AnomalyEvent) -> Result<(), DispatchError>;
}

/// A delivery target behind a [`RetryingDispatcher`]. May block.
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &str;

    fn deliver(&self, event: &AnomalyEvent) -> Result<(), DispatchError>;
}

impl<S: AlertSink + ?Sized> AlertSink for Arc<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn deliver(&self, event: &AnomalyEvent) -> Result<(), DispatchError> {
        (**self).deliver(event)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Events buffered before `on_event` reports the queue full
    pub queue_capacity: usize,
    /// Delivery attempts per sink before an event is dropped
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            max_attempts: 3,
            initial_backoff_ms: 50,
            max_backoff_ms: 2000,
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::invalid("dispatcher.queue_capacity", "must be at least 1"));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("dispatcher.max_attempts", "must be at least 1"));
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(ConfigError::invalid(
                "dispatcher.max_backoff_ms",
                "must not be below initial_backoff_ms",
            ));
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (1-based): doubles each time,
    /// capped at `max_backoff_ms`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(20);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// Delivery counters of a [`RetryingDispatcher`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    /// Successful sink deliveries
    pub delivered: u64,
    /// Sink deliveries abandoned after the last attempt
    pub dropped: u64,
    /// Events refused because the queue was full
    pub rejected: u64,
}

#[derive(Default)]
struct Counters {
    delivered: AtomicU64,
    dropped: AtomicU64,
    rejected: AtomicU64,
}

/// Queues events and delivers them to every sink from a worker thread,
/// retrying each failed delivery with bounded exponential backoff.
///
/// `on_event` never blocks: a full queue is reported as
/// [`DispatchError::QueueFull`]. Dropping the dispatcher drains the queue
/// and joins the worker.
pub struct RetryingDispatcher {
    sender: Option<Sender<AnomalyEvent>>,
    worker: Option<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl RetryingDispatcher {
    pub fn spawn(
        config: DispatcherConfig,
        sinks: Vec<Box<dyn AlertSink>>,
    ) -> std::io::Result<Self> {
        let (sender, receiver) = crossbeam_channel::bounded(config.queue_capacity.max(1));
        let counters = Arc::new(Counters::default());
        let worker_counters = Arc::clone(&counters);
        let worker = std::thread::Builder::new()
            .name("alert-dispatch".into())
            .spawn(move || dispatch_loop(receiver, sinks, config, worker_counters))?;
        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
            counters,
        })
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting events, deliver what is queued and wait for the worker.
    pub fn shutdown(mut self) -> DispatchStats {
        self.close();
        self.stats()
    }

    fn close(&mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("alert dispatch worker panicked");
            }
        }
    }
}

impl AlertDispatcher for RetryingDispatcher {
    fn on_event(&self, event: AnomalyEvent) -> Result<(), DispatchError> {
        let Some(sender) = &self.sender else {
            return Err(DispatchError::Disconnected);
        };
        match sender.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(event)) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    rule = %event.rule_id,
                    camera = %event.camera_id,
                    "alert queue full, event rejected"
                );
                Err(DispatchError::QueueFull)
            }
            Err(TrySendError::Disconnected(_)) => Err(DispatchError::Disconnected),
        }
    }
}

impl Drop for RetryingDispatcher {
    fn drop(&mut self) {
        self.close();
    }
}

fn dispatch_loop(
    receiver: Receiver<AnomalyEvent>,
    sinks: Vec<Box<dyn AlertSink>>,
    config: DispatcherConfig,
    counters: Arc<Counters>,
) {
    tracing::debug!(sinks = sinks.len(), "alert dispatch worker started");
    for event in receiver.iter() {
        for sink in &sinks {
            if deliver_with_retry(sink.as_ref(), &event, &config) {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
            } else {
                counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
    tracing::debug!("alert dispatch worker stopped");
}

fn deliver_with_retry(sink: &dyn AlertSink, event: &AnomalyEvent, config: &DispatcherConfig) -> bool {
    let mut attempt = 1;
    loop {
        match sink.deliver(event) {
            Ok(()) => return true,
            Err(e) if attempt >= config.max_attempts => {
                tracing::error!(
                    sink = sink.name(),
                    rule = %event.rule_id,
                    camera = %event.camera_id,
                    attempts = attempt,
                    error = %e,
                    "dropping alert after exhausting retries"
                );
                return false;
            }
            Err(e) => {
                let delay = config.backoff(attempt);
                tracing::warn!(
                    sink = sink.name(),
                    rule = %event.rule_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "alert delivery failed, retrying"
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
        }
    }
}

/// Writes every event to the `tracing` log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl AlertSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    fn deliver(&self, event: &AnomalyEvent) -> Result<(), DispatchError> {
        match event.severity {
            Severity::Critical | Severity::Warning => tracing::warn!(
                rule = %event.rule_id,
                camera = %event.camera_id,
                track = ?event.track_id,
                severity = %event.severity,
                "{}",
                event.message
            ),
            Severity::Info => tracing::info!(
                rule = %event.rule_id,
                camera = %event.camera_id,
                track = ?event.track_id,
                "{}",
                event.message
            ),
        }
        Ok(())
    }
}

/// Appends each event as one JSON line.
pub struct JsonLinesSink<W> {
    name: String,
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(name: impl Into<String>, writer: W) -> Self {
        Self {
            name: name.into(),
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W: Write + Send> AlertSink for JsonLinesSink<W> {
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver(&self, event: &AnomalyEvent) -> Result<(), DispatchError> {
        let sink_err = |reason: String| DispatchError::Sink {
            sink: self.name.clone(),
            reason,
        };
        let line = serde_json::to_string(event).map_err(|e| sink_err(e.to_string()))?;
        let mut writer = self.writer.lock();
        writeln!(writer, "{line}")
            .and_then(|()| writer.flush())
            .map_err(|e| sink_err(e.to_string()))
    }
}

/// Keeps delivered events in memory. Can be told to fail its next
/// deliveries, which is how retry behaviour is exercised.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<AnomalyEvent>>,
    failures_left: Mutex<u32>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose first `n` deliveries fail.
    pub fn failing(n: u32) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            failures_left: Mutex::new(n),
        }
    }

    pub fn events(&self) -> Vec<AnomalyEvent> {
        self.events.lock().clone()
    }
}

impl AlertSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn deliver(&self, event: &AnomalyEvent) -> Result<(), DispatchError> {
        {
            let mut left = self.failures_left.lock();
            if *left > 0 {
                *left -= 1;
                return Err(DispatchError::Sink {
                    sink: "memory".into(),
                    reason: "unavailable".into(),
                });
            }
        }
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Dispatcher that records events synchronously, in call order.
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    events: Mutex<Vec<AnomalyEvent>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AnomalyEvent> {
        self.events.lock().clone()
    }

    pub fn take(&self) -> Vec<AnomalyEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl AlertDispatcher for RecordingDispatcher {
    fn on_event(&self, event: AnomalyEvent) -> Result<(), DispatchError> {
        self.events.lock().push(event);
        Ok(())
    }
}

impl<D: AlertDispatcher + ?Sized> AlertDispatcher for Arc<D> {
    fn on_event(&self, event: AnomalyEvent) -> Result<(), DispatchError> {
        (**self).on_event(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn event(rule: &str) -> AnomalyEvent {
        AnomalyEvent {
            rule_id: rule.into(),
            track_id: None,
            camera_id: "cam".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
            severity: Severity::Warning,
            message: "test".into(),
        }
    }

    fn fast_config() -> DispatcherConfig {
        DispatcherConfig {
            queue_capacity: 16,
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
        }
    }

    /// Blocks every delivery until its gate is dropped.
    struct GatedSink {
        gate: Receiver<()>,
    }

    impl AlertSink for GatedSink {
        fn name(&self) -> &str {
            "gated"
        }

        fn deliver(&self, _event: &AnomalyEvent) -> Result<(), DispatchError> {
            let _ = self.gate.recv();
            Ok(())
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = DispatcherConfig::default();
        assert_eq!(config.backoff(1), Duration::from_millis(50));
        assert_eq!(config.backoff(2), Duration::from_millis(100));
        assert_eq!(config.backoff(3), Duration::from_millis(200));
        assert_eq!(config.backoff(10), Duration::from_millis(2000));
        assert_eq!(config.backoff(u32::MAX), Duration::from_millis(2000));
    }

    #[test]
    fn test_delivers_in_order() {
        let sink = Arc::new(MemorySink::new());
        let dispatcher =
            RetryingDispatcher::spawn(fast_config(), vec![Box::new(Arc::clone(&sink))]).unwrap();
        for rule in ["a", "b", "c"] {
            dispatcher.on_event(event(rule)).unwrap();
        }
        let stats = dispatcher.shutdown();
        assert_eq!(stats.delivered, 3);
        let rules: Vec<_> = sink.events().into_iter().map(|e| e.rule_id).collect();
        assert_eq!(rules, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_retries_until_success() {
        let sink = Arc::new(MemorySink::failing(2));
        let dispatcher =
            RetryingDispatcher::spawn(fast_config(), vec![Box::new(Arc::clone(&sink))]).unwrap();
        dispatcher.on_event(event("a")).unwrap();
        let stats = dispatcher.shutdown();
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.dropped, 0);
        assert_eq!(sink.events().len(), 1);
    }

    #[test]
    fn test_drops_after_max_attempts() {
        let flaky = Arc::new(MemorySink::failing(3));
        let healthy = Arc::new(MemorySink::new());
        let dispatcher = RetryingDispatcher::spawn(
            fast_config(),
            vec![Box::new(Arc::clone(&flaky)), Box::new(Arc::clone(&healthy))],
        )
        .unwrap();
        dispatcher.on_event(event("a")).unwrap();
        dispatcher.on_event(event("b")).unwrap();
        let stats = dispatcher.shutdown();
        // "a" exhausts the flaky sink, "b" gets through
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.delivered, 3);
        assert_eq!(flaky.events().len(), 1);
        assert_eq!(healthy.events().len(), 2);
    }

    #[test]
    fn test_full_queue_rejects_without_blocking() {
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
        let config = DispatcherConfig {
            queue_capacity: 1,
            ..fast_config()
        };
        let dispatcher =
            RetryingDispatcher::spawn(config, vec![Box::new(GatedSink { gate: gate_rx })]).unwrap();
        // one in flight at most, one queued: the third cannot fit
        let results: Vec<_> = ["a", "b", "c"]
            .into_iter()
            .map(|r| dispatcher.on_event(event(r)))
            .collect();
        assert!(results.contains(&Err(DispatchError::QueueFull)));
        drop(gate_tx);
        let stats = dispatcher.shutdown();
        assert!(stats.rejected >= 1);
    }

    #[test]
    fn test_json_lines_sink() {
        let sink = JsonLinesSink::new("file", Vec::new());
        sink.deliver(&event("a")).unwrap();
        sink.deliver(&event("b")).unwrap();
        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: AnomalyEvent = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.rule_id, "a");
    }

    #[test]
    fn test_recording_dispatcher() {
        let recorder = RecordingDispatcher::new();
        recorder.on_event(event("a")).unwrap();
        assert_eq!(recorder.take().len(), 1);
        assert!(recorder.events().is_empty());
    }
}
