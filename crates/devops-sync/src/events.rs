//! Change notifications published to the presentation layer.

use devops_model::{EndpointGroup, EndpointId, EndpointState};
use serde::Serialize;

/// A state change caused by a health probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateTransition {
    /// The endpoint whose state moved.
    pub endpoint: EndpointId,
    /// State before the probe.
    pub from: EndpointState,
    /// State after the probe.
    pub to: EndpointState,
}

/// The coalesced "model changed" signal.
///
/// At most one is published per group per tick, carrying every endpoint
/// whose snapshot changed and every state transition observed in that tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelChanged {
    /// The group that was refreshed.
    pub group: EndpointGroup,
    /// Endpoints whose snapshot changed.
    pub changed: Vec<EndpointId>,
    /// Probe-driven state transitions.
    pub transitions: Vec<StateTransition>,
}

impl ModelChanged {
    /// An empty signal for `group`.
    #[must_use]
    pub fn new(group: EndpointGroup) -> Self {
        Self {
            group,
            changed: Vec::new(),
            transitions: Vec::new(),
        }
    }

    /// Whether anything happened worth telling the presentation layer.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.transitions.is_empty()
    }

    /// Whether `endpoint` is mentioned in this signal.
    #[must_use]
    pub fn touches(&self, endpoint: &EndpointId) -> bool {
        self.changed.contains(endpoint) || self.transitions.iter().any(|t| &t.endpoint == endpoint)
    }
}
