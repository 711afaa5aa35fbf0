//! Per-session event channel between frame intake and live viewers.
//!
//! Each capture session owns a bounded, ordered log of [`SessionEvent`]s.
//! Ingest appends; every viewer reads with its own cursor, so several
//! viewers of the same session each see the full sequence instead of
//! racing on a shared queue. When a log is full the oldest event is
//! evicted and late readers are told how many events they skipped.
//!
//! ```text
//!  ingest ──publish──▶ [ off 7 | off 8 | off 9 ]  (capacity 3)
//!                          ▲               ▲
//!                 viewer A cursor=7   viewer B cursor=9
//! ```
//!
//! Offsets are assigned per session, start at 0 and never repeat. They are
//! used as the SSE event id, which lets a reconnecting client resume with
//! `Last-Event-ID`. Logs live in memory only; a cursor ahead of a log (the
//! process restarted since the client last read) starts over at the oldest
//! retained event.
//!
//! Closed logs are kept for a retention period so late viewers still get
//! `stopped`, then dropped on the next `open` or `close`.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::models::BBox;

/// One detection as reported to live viewers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub label: String,
    pub conf: f64,
    pub bbox: BBox,
    pub norm: [f64; 4],
    pub track_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Results for one ingested frame.
    Detections {
        frame_id: i64,
        width: u32,
        height: u32,
        detections: Vec<DetectionEvent>,
    },
    /// The session was stopped; nothing follows.
    Stopped {
        frames_processed: i64,
        detections_count: i64,
    },
}

impl SessionEvent {
    /// SSE event name.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::Detections { .. } => "detections",
            SessionEvent::Stopped { .. } => "stopped",
        }
    }
}

/// An event together with its position in the session log.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub offset: u64,
    pub event: SessionEvent,
}

/// Result of one [`EventHub::read`].
#[derive(Debug, Clone, Default)]
pub struct EventBatch {
    pub events: Vec<Envelope>,
    /// Cursor to pass to the next read.
    pub next_cursor: u64,
    /// Events evicted before this reader got to them.
    pub skipped: u64,
    /// The log is closed and `next_cursor` is past its last event.
    pub finished: bool,
}

#[derive(Debug, Default)]
struct SessionLog {
    next_offset: u64,
    events: VecDeque<Envelope>,
    evicted: u64,
    closed_at: Option<Instant>,
}

impl SessionLog {
    fn first_offset(&self) -> u64 {
        self.next_offset - self.events.len() as u64
    }

    fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }
}

/// Shared registry of per-session event logs.
pub struct EventHub {
    capacity: usize,
    retain_closed: Duration,
    logs: Mutex<HashMap<String, SessionLog>>,
}

impl EventHub {
    /// Create a hub whose session logs hold at most `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self::with_retention(capacity, Duration::from_secs(60))
    }

    /// Like [`EventHub::new`], dropping closed logs after `retain_closed`.
    pub fn with_retention(capacity: usize, retain_closed: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            retain_closed,
            logs: Mutex::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, SessionLog>> {
        self.logs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register an empty log for a session unless it already has one.
    pub fn open(&self, session_id: &str) {
        let mut logs = self.lock();
        self.sweep(&mut logs);
        logs.entry(session_id.to_string()).or_default();
    }

    fn sweep(&self, logs: &mut HashMap<String, SessionLog>) {
        let before = logs.len();
        logs.retain(|_, log| {
            log.closed_at
                .map_or(true, |at| at.elapsed() < self.retain_closed)
        });
        let dropped = before - logs.len();
        if dropped > 0 {
            tracing::debug!(dropped, remaining = logs.len(), "dropped closed session logs");
        }
    }

    /// Append an event, evicting the oldest one when the log is full.
    ///
    /// Returns the number of events retained after the append. Publishing
    /// to a closed log is ignored and returns the current depth.
    pub fn publish(&self, session_id: &str, event: SessionEvent) -> usize {
        let mut logs = self.lock();
        let log = logs.entry(session_id.to_string()).or_default();
        self.append(session_id, log, event)
    }

    /// Append a final event and close the log in one step.
    ///
    /// Returns `false` without appending when the log is already closed.
    pub fn close(&self, session_id: &str, last: SessionEvent) -> bool {
        let mut logs = self.lock();
        self.sweep(&mut logs);
        let log = logs.entry(session_id.to_string()).or_default();
        if log.is_closed() {
            return false;
        }
        self.append(session_id, log, last);
        log.closed_at = Some(Instant::now());
        true
    }

    fn append(&self, session_id: &str, log: &mut SessionLog, event: SessionEvent) -> usize {
        if log.is_closed() {
            tracing::warn!(session_id, kind = event.kind(), "event after close dropped");
            return log.events.len();
        }
        if log.events.len() >= self.capacity {
            log.events.pop_front();
            log.evicted += 1;
            tracing::debug!(
                session_id,
                evicted = log.evicted,
                "session log full, evicted oldest event"
            );
        }
        let offset = log.next_offset;
        log.next_offset += 1;
        log.events.push_back(Envelope { offset, event });
        log.events.len()
    }

    /// Read up to `max` events starting at `cursor`.
    ///
    /// A cursor that points at evicted events is moved forward to the
    /// oldest retained event and the gap is reported in `skipped`. A cursor
    /// past the end of the log restarts at the oldest retained event.
    /// Unknown sessions read as an empty, open log.
    pub fn read(&self, session_id: &str, cursor: u64, max: usize) -> EventBatch {
        let logs = self.lock();
        let Some(log) = logs.get(session_id) else {
            return EventBatch {
                next_cursor: cursor,
                ..EventBatch::default()
            };
        };

        let first = log.first_offset();
        let cursor = if cursor > log.next_offset {
            tracing::info!(
                session_id,
                cursor,
                next_offset = log.next_offset,
                "stale cursor ahead of session log, restarting from oldest event"
            );
            first
        } else {
            cursor
        };
        let start = cursor.max(first);
        let skipped = start - cursor.min(start);
        let events: Vec<Envelope> = log
            .events
            .iter()
            .skip((start - first) as usize)
            .take(max)
            .cloned()
            .collect();
        let next_cursor = events.last().map(|e| e.offset + 1).unwrap_or(start);

        EventBatch {
            finished: log.is_closed() && next_cursor >= log.next_offset,
            events,
            next_cursor,
            skipped,
        }
    }

    /// Number of events currently retained for a session.
    pub fn depth(&self, session_id: &str) -> usize {
        self.lock()
            .get(session_id)
            .map(|log| log.events.len())
            .unwrap_or(0)
    }

    /// Whether a log is currently held for the session.
    pub fn contains(&self, session_id: &str) -> bool {
        self.lock().contains_key(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(frame_id: i64) -> SessionEvent {
        SessionEvent::Detections {
            frame_id,
            width: 100,
            height: 200,
            detections: vec![],
        }
    }

    fn frame_ids(batch: &EventBatch) -> Vec<i64> {
        batch
            .events
            .iter()
            .map(|e| match e.event {
                SessionEvent::Detections { frame_id, .. } => frame_id,
                SessionEvent::Stopped { .. } => -1,
            })
            .collect()
    }

    #[test]
    fn test_fifo_order() {
        let hub = EventHub::new(8);
        hub.open("s");
        for i in 0..3 {
            hub.publish("s", frame(i));
        }
        let batch = hub.read("s", 0, 10);
        assert_eq!(frame_ids(&batch), vec![0, 1, 2]);
        assert_eq!(batch.next_cursor, 3);
        assert_eq!(batch.skipped, 0);
        assert!(!batch.finished);
    }

    #[test]
    fn test_bounded_drop_oldest() {
        let hub = EventHub::new(3);
        for i in 0..5 {
            let depth = hub.publish("s", frame(i));
            assert!(depth <= 3);
        }
        assert_eq!(hub.depth("s"), 3);

        let batch = hub.read("s", 0, 10);
        assert_eq!(frame_ids(&batch), vec![2, 3, 4]);
        assert_eq!(batch.skipped, 2);
        assert_eq!(batch.events[0].offset, 2);
    }

    #[test]
    fn test_independent_cursors() {
        let hub = EventHub::new(8);
        hub.publish("s", frame(1));
        hub.publish("s", frame(2));

        let a = hub.read("s", 0, 1);
        assert_eq!(frame_ids(&a), vec![1]);
        let b = hub.read("s", 0, 10);
        assert_eq!(frame_ids(&b), vec![1, 2]);
        let a2 = hub.read("s", a.next_cursor, 10);
        assert_eq!(frame_ids(&a2), vec![2]);
    }

    #[test]
    fn test_sessions_are_isolated() {
        let hub = EventHub::new(8);
        hub.publish("a", frame(1));
        hub.publish("b", frame(2));
        assert_eq!(frame_ids(&hub.read("a", 0, 10)), vec![1]);
        assert_eq!(frame_ids(&hub.read("b", 0, 10)), vec![2]);
    }

    #[test]
    fn test_close_finishes_readers() {
        let hub = EventHub::new(8);
        hub.publish("s", frame(1));
        let stopped = SessionEvent::Stopped {
            frames_processed: 1,
            detections_count: 1,
        };
        assert!(hub.close("s", stopped.clone()));
        assert!(!hub.close("s", stopped));

        let batch = hub.read("s", 0, 10);
        assert_eq!(batch.events.len(), 2);
        assert_eq!(batch.events[1].event.kind(), "stopped");
        assert!(batch.finished);

        // Publishing after close is ignored
        assert_eq!(hub.publish("s", frame(9)), 2);
        let again = hub.read("s", batch.next_cursor, 10);
        assert!(again.events.is_empty());
        assert!(again.finished);
    }

    #[test]
    fn test_cursor_ahead_of_log_restarts() {
        let hub = EventHub::new(8);
        for i in 0..3 {
            hub.publish("s", frame(i));
        }
        let batch = hub.read("s", 10, 10);
        assert_eq!(frame_ids(&batch), vec![0, 1, 2]);
        assert_eq!(batch.next_cursor, 3);
        assert_eq!(batch.skipped, 0);

        // Caught-up cursor is not stale
        let caught_up = hub.read("s", 3, 10);
        assert!(caught_up.events.is_empty());
        assert_eq!(caught_up.next_cursor, 3);
    }

    #[test]
    fn test_cursor_ahead_of_closed_log_sees_stopped() {
        let hub = EventHub::new(8);
        hub.close(
            "s",
            SessionEvent::Stopped {
                frames_processed: 4,
                detections_count: 4,
            },
        );
        let batch = hub.read("s", 10, 10);
        assert_eq!(batch.events.len(), 1);
        assert_eq!(batch.events[0].event.kind(), "stopped");
        assert!(batch.finished);
    }

    #[test]
    fn test_closed_logs_dropped_after_retention() {
        let stopped = SessionEvent::Stopped {
            frames_processed: 0,
            detections_count: 0,
        };
        let hub = EventHub::with_retention(8, Duration::ZERO);
        hub.publish("a", frame(1));
        hub.close("a", stopped.clone());
        hub.open("b");
        assert!(!hub.contains("a"));
        assert!(hub.contains("b"));

        let kept = EventHub::with_retention(8, Duration::from_secs(3600));
        kept.close("a", stopped);
        kept.open("b");
        assert!(kept.contains("a"));
    }

    #[test]
    fn test_open_keeps_running_log() {
        let hub = EventHub::with_retention(8, Duration::ZERO);
        hub.publish("s", frame(1));
        hub.open("s");
        assert_eq!(hub.depth("s"), 1);
    }

    #[test]
    fn test_unknown_session_reads_empty() {
        let hub = EventHub::new(4);
        let batch = hub.read("missing", 5, 10);
        assert!(batch.events.is_empty());
        assert_eq!(batch.next_cursor, 5);
        assert!(!batch.finished);
        assert_eq!(hub.depth("missing"), 0);
    }

    #[test]
    fn test_detections_payload_shape() {
        let event = SessionEvent::Detections {
            frame_id: 1,
            width: 100,
            height: 200,
            detections: vec![DetectionEvent {
                label: "wrench".to_string(),
                conf: 0.9,
                bbox: BBox::new(0.0, 0.0, 10.0, 10.0),
                norm: [0.0, 0.0, 0.1, 0.05],
                track_id: "srv-0".to_string(),
            }],
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "detections");
        assert_eq!(json["frame_id"], 1);
        assert_eq!(json["detections"][0]["bbox"], serde_json::json!([0.0, 0.0, 10.0, 10.0]));
        assert_eq!(json["detections"][0]["norm"][3], 0.05);
        assert_eq!(json["detections"][0]["track_id"], "srv-0");
    }
}
