use std::fmt;

use serde::{Deserialize, Serialize};

use crate::payload::{self, PayloadSchema};

/// Identifier of a registered component.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentId(String);

impl ComponentId {
    pub fn generate() -> Self {
        Self(super::new_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ComponentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ComponentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tier a component belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ComponentType {
    /// Sensors and actuators facing the outside world.
    C0,
    /// Cognitive and protocol components.
    C1,
    /// Value and ethics evaluation.
    C2,
}

impl ComponentType {
    /// Name prefix that components of this type must carry (`c0_`, ...).
    pub fn name_prefix(self) -> &'static str {
        match self {
            Self::C0 => "c0_",
            Self::C1 => "c1_",
            Self::C2 => "c2_",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::C0 => "C0",
            Self::C1 => "C1",
            Self::C2 => "C2",
        }
    }
}

impl std::str::FromStr for ComponentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "C0" => Ok(Self::C0),
            "C1" => Ok(Self::C1),
            "C2" => Ok(Self::C2),
            other => Err(format!("unknown component type: {}", other)),
        }
    }
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named, unidirectional endpoint of a component.
///
/// A channel either publishes or subscribes; never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSchema {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish: Option<PayloadSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscribe: Option<PayloadSchema>,
}

impl ChannelSchema {
    /// Channel on which the component publishes `payload`.
    pub fn publisher(name: impl Into<String>, payload: PayloadSchema) -> Self {
        Self {
            name: name.into(),
            description: None,
            publish: Some(payload),
            subscribe: None,
        }
    }

    /// Channel on which the component consumes `payload`.
    pub fn subscriber(name: impl Into<String>, payload: PayloadSchema) -> Self {
        Self {
            name: name.into(),
            description: None,
            publish: None,
            subscribe: Some(payload),
        }
    }

    pub fn is_publisher(&self) -> bool {
        self.publish.is_some()
    }

    pub fn is_subscriber(&self) -> bool {
        self.subscribe.is_some()
    }

    /// Whether messages published here can be delivered to `other`.
    pub fn feeds(&self, other: &ChannelSchema) -> bool {
        match (&self.publish, &other.subscribe) {
            (Some(produced), Some(consumed)) => payload::matches(produced, consumed),
            _ => false,
        }
    }
}

/// A registered component and its channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    pub id: ComponentId,
    #[serde(rename = "type")]
    pub component_type: ComponentType,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub version: String,
    pub api_version: String,
    /// Registration time, epoch seconds.
    pub since: i64,
    /// Set once when the component stops; `None` while active.
    #[serde(default)]
    pub finished_time: Option<i64>,
    #[serde(default)]
    pub channels: Vec<ChannelSchema>,
}

impl Component {
    pub fn is_active(&self) -> bool {
        self.finished_time.is_none()
    }

    pub fn channel(&self, name: &str) -> Option<&ChannelSchema> {
        self.channels.iter().find(|c| c.name == name)
    }

    pub fn subscribers(&self) -> impl Iterator<Item = &ChannelSchema> {
        self.channels.iter().filter(|c| c.is_subscriber())
    }
}
