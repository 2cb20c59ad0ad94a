use std::fmt;

/// A destination topic name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic(String);

impl Topic {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The inbox every service consumes from by default: `inbox-<service>`.
    pub fn default_service_inbox(service_name: &str) -> Self {
        Self::service_inbox(service_name, "")
    }

    /// A named inbox of a service: `inbox_<inbox>-<service>`.
    pub fn service_inbox(service_name: &str, inbox_name: &str) -> Self {
        if inbox_name.is_empty() {
            Self(format!("inbox-{service_name}"))
        } else {
            Self(format!("inbox_{inbox_name}-{service_name}"))
        }
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Topic {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Wire identifier of a payload type: the fully qualified protobuf name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageType(String);

impl MessageType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn of<T: prost::Name>() -> Self {
        Self(T::full_name())
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageType {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}
