use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};
use tether_channel::OpKind;
use tracing::info;

/// Counters of one operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpStats {
    pub count: u64,
    /// Wall time from dequeuing the request to storing its result.
    pub service: Duration,
    /// Part of `service` spent awaiting the backend, retry backoff included.
    pub backend_wait: Duration,
}

/// Codec counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodecStats {
    pub serialize_count: u64,
    pub serialize_time: Duration,
    pub deserialize_count: u64,
    pub deserialize_time: Duration,
}

/// Point-in-time copy of a proxy's metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub ops: BTreeMap<OpKind, OpStats>,
    /// Requests whose op code matched no operation.
    pub unknown: OpStats,
    pub codec: CodecStats,
}

impl MetricsSnapshot {
    #[must_use]
    pub fn op(&self, kind: OpKind) -> OpStats {
        self.ops.get(&kind).copied().unwrap_or_default()
    }

    #[must_use]
    pub fn total_requests(&self) -> u64 {
        self.ops.values().map(|stats| stats.count).sum::<u64>() + self.unknown.count
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<10} {:>8} {:>12} {:>12}", "op", "count", "service", "wait")?;
        for (kind, stats) in &self.ops {
            writeln!(
                f,
                "{:<10} {:>8} {:>12.3?} {:>12.3?}",
                kind.name(),
                stats.count,
                stats.service,
                stats.backend_wait
            )?;
        }
        if self.unknown.count > 0 {
            writeln!(f, "{:<10} {:>8} {:>12.3?}", "unknown", self.unknown.count, self.unknown.service)?;
        }
        write!(
            f,
            "codec: {} serialize ({:.3?}), {} deserialize ({:.3?})",
            self.codec.serialize_count,
            self.codec.serialize_time,
            self.codec.deserialize_count,
            self.codec.deserialize_time
        )
    }
}

/// Process-wide metrics of one proxy; shared between its dispatcher and supervisor.
#[derive(Debug, Default)]
pub struct Metrics {
    inner: Mutex<MetricsSnapshot>,
}

impl Metrics {
    pub(crate) fn record_op(&self, kind: OpKind, service: Duration, backend_wait: Duration) {
        let mut inner = self.inner.lock();
        let stats = inner.ops.entry(kind).or_default();
        stats.count += 1;
        stats.service += service;
        stats.backend_wait += backend_wait;
    }

    pub(crate) fn record_unknown(&self, service: Duration) {
        let mut inner = self.inner.lock();
        inner.unknown.count += 1;
        inner.unknown.service += service;
    }

    pub(crate) fn record_serialize(&self, elapsed: Duration) {
        let mut inner = self.inner.lock();
        inner.codec.serialize_count += 1;
        inner.codec.serialize_time += elapsed;
    }

    pub(crate) fn record_deserialize(&self, elapsed: Duration) {
        let mut inner = self.inner.lock();
        inner.codec.deserialize_count += 1;
        inner.codec.deserialize_time += elapsed;
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().clone()
    }

    pub fn reset(&self) {
        *self.inner.lock() = MetricsSnapshot::default();
    }

    /// Logs every counter at info level and returns them.
    pub fn dump(&self) -> MetricsSnapshot {
        let snapshot = self.snapshot();
        for (kind, stats) in &snapshot.ops {
            info!(
                op = kind.name(),
                count = stats.count,
                service_ms = stats.service.as_secs_f64() * 1e3,
                wait_ms = stats.backend_wait.as_secs_f64() * 1e3,
                "Operation metrics"
            );
        }
        if snapshot.unknown.count > 0 {
            info!(count = snapshot.unknown.count, "Requests with unknown op codes");
        }
        info!(
            serialize = snapshot.codec.serialize_count,
            deserialize = snapshot.codec.deserialize_count,
            serialize_ms = snapshot.codec.serialize_time.as_secs_f64() * 1e3,
            deserialize_ms = snapshot.codec.deserialize_time.as_secs_f64() * 1e3,
            "Codec metrics"
        );
        snapshot
    }
}

/// Awaits `fut` and reports how long it took.
pub(crate) async fn timed<F: Future>(fut: F) -> (F::Output, Duration) {
    let started = Instant::now();
    let output = fut.await;
    (output, started.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_snapshot_reset() {
        let metrics = Metrics::default();
        metrics.record_op(OpKind::Read, Duration::from_millis(4), Duration::from_millis(3));
        metrics.record_op(OpKind::Read, Duration::from_millis(2), Duration::ZERO);
        metrics.record_serialize(Duration::from_micros(5));
        metrics.record_unknown(Duration::from_micros(7));

        let snapshot = metrics.dump();
        let read = snapshot.op(OpKind::Read);
        assert_eq!(read.count, 2);
        assert_eq!(read.service, Duration::from_millis(6));
        assert_eq!(read.backend_wait, Duration::from_millis(3));
        assert_eq!(snapshot.codec.serialize_count, 1);
        assert_eq!(snapshot.unknown.count, 1);
        assert_eq!(snapshot.total_requests(), 3);
        assert!(snapshot.to_string().contains("read"));
        assert!(snapshot.to_string().contains("unknown"));

        metrics.reset();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }
}
