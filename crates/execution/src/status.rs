//! Per-binding lifecycle state.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Where a sensor binding is in its tick cycle.
///
/// `Idle → Evaluating → Dispatching → Idle`, until a fatal error moves the
/// binding to `Disabled` for good.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BindingState {
    /// Waiting for the next tick
    Idle,
    /// Reading the index and evaluating policies
    Evaluating,
    /// Handing requests to the dispatcher
    Dispatching,
    /// Stopped after an unrecoverable error
    Disabled {
        /// What went wrong
        reason: String,
    },
}

impl BindingState {
    /// Whether the binding stopped ticking.
    pub fn is_disabled(&self) -> bool {
        matches!(self, BindingState::Disabled { .. })
    }
}

impl fmt::Display for BindingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingState::Idle => write!(f, "idle"),
            BindingState::Evaluating => write!(f, "evaluating"),
            BindingState::Dispatching => write!(f, "dispatching"),
            BindingState::Disabled { reason } => write!(f, "disabled ({})", reason),
        }
    }
}

/// Shared view of every binding's state.
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    states: Arc<RwLock<BTreeMap<String, BindingState>>>,
}

impl StatusBoard {
    /// Create an empty board.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a binding's state. A disabled binding stays disabled.
    pub async fn set(&self, binding: &str, state: BindingState) {
        let mut states = self.states.write().await;
        if states.get(binding).is_some_and(BindingState::is_disabled) {
            return;
        }
        states.insert(binding.to_string(), state);
    }

    /// Current state of one binding.
    pub async fn get(&self, binding: &str) -> Option<BindingState> {
        self.states.read().await.get(binding).cloned()
    }

    /// Copy of every state.
    pub async fn snapshot(&self) -> BTreeMap<String, BindingState> {
        self.states.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_is_terminal() {
        let board = StatusBoard::new();
        board.set("a", BindingState::Evaluating).await;
        board
            .set("a", BindingState::Disabled { reason: "boom".into() })
            .await;
        board.set("a", BindingState::Idle).await;

        assert!(board.get("a").await.unwrap().is_disabled());
        assert_eq!(board.get("b").await, None);
    }
}
