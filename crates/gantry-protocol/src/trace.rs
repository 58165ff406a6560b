// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request traces.
//!
//! A client can ask the server to record what happened while its request
//! was resolved by sending a trace level greater than zero. The server
//! appends timestamped messages at or below that level and returns the
//! whole tree in the response metadata, where it can be logged client-side
//! to debug subscription problems.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// One node in a trace tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceNode {
    /// Milliseconds since the Unix epoch when the node was recorded.
    #[serde(rename = "timestamp")]
    pub timestamp_ms: i64,
    /// Message text, absent for structural nodes such as the root.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub payload: Option<String>,
    /// Child nodes in recording order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    #[serde(default)]
    pub children: Vec<TraceNode>,
}

impl TraceNode {
    fn root() -> Self {
        Self {
            timestamp_ms: Utc::now().timestamp_millis(),
            payload: None,
            children: Vec::new(),
        }
    }
}

/// A trace tree with the level it was requested at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trace {
    /// Highest level of messages recorded in this trace.
    #[serde(rename = "traceLevel")]
    pub trace_level: u32,
    /// Root of the tree, with messages as children.
    pub root: TraceNode,
}

impl Trace {
    /// Creates an empty trace that records messages at or below `trace_level`.
    pub fn new(trace_level: u32) -> Self {
        Self {
            trace_level,
            root: TraceNode::root(),
        }
    }

    /// Creates a trace that records nothing.
    pub fn silent() -> Self {
        Self::new(0)
    }

    /// Whether a message at `level` would be recorded.
    pub fn should_trace(&self, level: u32) -> bool {
        level > 0 && level <= self.trace_level
    }

    /// Records a message at `level` if the trace level admits it.
    pub fn trace(&mut self, level: u32, message: impl Into<String>) {
        if !self.should_trace(level) {
            return;
        }
        self.root.children.push(TraceNode {
            timestamp_ms: Utc::now().timestamp_millis(),
            payload: Some(message.into()),
            children: Vec::new(),
        });
    }

    /// True if no messages have been recorded.
    pub fn is_empty(&self) -> bool {
        self.root.children.is_empty()
    }
}

impl Default for Trace {
    fn default() -> Self {
        Self::silent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_trace_boundary() {
        let trace = Trace::new(3);
        assert!(trace.should_trace(1));
        assert!(trace.should_trace(3));
        assert!(!trace.should_trace(4));
        assert!(!trace.should_trace(0));
    }

    #[test]
    fn test_silent_trace_records_nothing() {
        let mut trace = Trace::silent();
        trace.trace(1, "resolved from cache");
        assert!(trace.is_empty());
    }

    #[test]
    fn test_trace_records_at_or_below_level() {
        let mut trace = Trace::new(2);
        trace.trace(1, "validated request");
        trace.trace(2, "cache miss");
        trace.trace(3, "too detailed");
        assert_eq!(trace.root.children.len(), 2);
        assert_eq!(
            trace.root.children[0].payload.as_deref(),
            Some("validated request")
        );
        assert_eq!(trace.root.children[1].payload.as_deref(), Some("cache miss"));
    }

    #[test]
    fn test_trace_timestamps_are_monotonic_enough() {
        let mut trace = Trace::new(1);
        trace.trace(1, "first");
        trace.trace(1, "second");
        let first = trace.root.children[0].timestamp_ms;
        let second = trace.root.children[1].timestamp_ms;
        assert!(second >= first);
        assert!(first >= trace.root.timestamp_ms);
    }

    #[test]
    fn test_trace_serde_round_trip() {
        let mut trace = Trace::new(5);
        trace.trace(1, "resolved generation 7");
        let json = serde_json::to_value(&trace).unwrap();
        assert_eq!(json["traceLevel"], 5);
        assert_eq!(json["root"]["children"][0]["payload"], "resolved generation 7");

        let restored: Trace = serde_json::from_value(json).unwrap();
        assert_eq!(restored, trace);
    }

    #[test]
    fn test_trace_deserialize_without_children() {
        let trace: Trace =
            serde_json::from_str("{\"traceLevel\":0,\"root\":{\"timestamp\":12}}").unwrap();
        assert!(trace.is_empty());
        assert_eq!(trace.root.timestamp_ms, 12);
    }
}
