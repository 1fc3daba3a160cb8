//! Outbound event value types.

/// MQTT quality-of-service level for outbound events.
///
/// The bridge supports at-most-once and at-least-once delivery; exactly-once
/// is not offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qos {
    AtMostOnce,
    AtLeastOnce,
}

/// An outbound payload destined for a device topic.
///
/// Telemetry events carry no topic name and are published under the device's
/// events topic; topic events name an arbitrary base topic. Either kind may
/// append a sub-path. Events are immutable once constructed: the sub-path is
/// normalized up front so a non-empty sub-path always starts with `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicEvent {
    topic_name: Option<String>,
    subpath: String,
    data: Vec<u8>,
    qos: Qos,
}

impl TopicEvent {
    /// Create a telemetry event published under the device's events topic.
    pub fn new(data: impl Into<Vec<u8>>, subpath: Option<&str>, qos: Qos) -> Self {
        Self {
            topic_name: None,
            subpath: normalize_subpath(subpath),
            data: data.into(),
            qos,
        }
    }

    /// Create an event published under an arbitrary base topic.
    pub fn for_topic(
        topic_name: impl Into<String>,
        data: impl Into<Vec<u8>>,
        subpath: Option<&str>,
        qos: Qos,
    ) -> Self {
        Self {
            topic_name: Some(topic_name.into()),
            subpath: normalize_subpath(subpath),
            data: data.into(),
            qos,
        }
    }

    pub fn topic_name(&self) -> Option<&str> {
        self.topic_name.as_deref()
    }

    /// The normalized sub-path: empty, or starting with `/`.
    pub fn subpath(&self) -> &str {
        &self.subpath
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn qos(&self) -> Qos {
        self.qos
    }
}

fn normalize_subpath(subpath: Option<&str>) -> String {
    match subpath {
        None | Some("") => String::new(),
        Some(path) if path.starts_with('/') => path.to_string(),
        Some(path) => format!("/{path}"),
    }
}
