//! Lifecycle events and event handling.
//!
//! The execution pool emits step-level events and the overseer emits mission
//! state transitions. Handlers are invoked sequentially in registration order.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::core::types::{MissionId, StepId};
use crate::mission::state::MissionState;

/// Lifecycle events emitted during mission execution.
#[derive(Debug, Clone)]
pub enum Event {
    /// A step was dispatched to a worker.
    StepStarted {
        mission_id: MissionId,
        step_id: StepId,
        timestamp: Instant,
    },

    /// A step returned successfully.
    StepCompleted {
        mission_id: MissionId,
        step_id: StepId,
        duration: Duration,
        timestamp: Instant,
    },

    /// A step returned an error or exceeded its deadline.
    StepFailed {
        mission_id: MissionId,
        step_id: StepId,
        error: String,
        timed_out: bool,
        timestamp: Instant,
    },

    /// A step was never dispatched.
    StepCancelled {
        mission_id: MissionId,
        step_id: StepId,
        reason: String,
        timestamp: Instant,
    },

    /// The overseer moved a mission between states.
    MissionTransition {
        mission_id: MissionId,
        from: MissionState,
        to: MissionState,
        attempt: u32,
        timestamp: Instant,
    },
}

impl Event {
    pub fn timestamp(&self) -> Instant {
        match self {
            Event::StepStarted { timestamp, .. } => *timestamp,
            Event::StepCompleted { timestamp, .. } => *timestamp,
            Event::StepFailed { timestamp, .. } => *timestamp,
            Event::StepCancelled { timestamp, .. } => *timestamp,
            Event::MissionTransition { timestamp, .. } => *timestamp,
        }
    }

    pub fn mission_id(&self) -> MissionId {
        match self {
            Event::StepStarted { mission_id, .. }
            | Event::StepCompleted { mission_id, .. }
            | Event::StepFailed { mission_id, .. }
            | Event::StepCancelled { mission_id, .. }
            | Event::MissionTransition { mission_id, .. } => *mission_id,
        }
    }

    pub fn step_started(mission_id: MissionId, step_id: StepId) -> Self {
        Event::StepStarted {
            mission_id,
            step_id,
            timestamp: Instant::now(),
        }
    }

    pub fn step_completed(mission_id: MissionId, step_id: StepId, duration: Duration) -> Self {
        Event::StepCompleted {
            mission_id,
            step_id,
            duration,
            timestamp: Instant::now(),
        }
    }

    pub fn step_failed(
        mission_id: MissionId,
        step_id: StepId,
        error: impl Into<String>,
        timed_out: bool,
    ) -> Self {
        Event::StepFailed {
            mission_id,
            step_id,
            error: error.into(),
            timed_out,
            timestamp: Instant::now(),
        }
    }

    pub fn step_cancelled(
        mission_id: MissionId,
        step_id: StepId,
        reason: impl Into<String>,
    ) -> Self {
        Event::StepCancelled {
            mission_id,
            step_id,
            reason: reason.into(),
            timestamp: Instant::now(),
        }
    }

    pub fn mission_transition(
        mission_id: MissionId,
        from: MissionState,
        to: MissionState,
        attempt: u32,
    ) -> Self {
        Event::MissionTransition {
            mission_id,
            from,
            to,
            attempt,
            timestamp: Instant::now(),
        }
    }
}

/// Handler for receiving lifecycle events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event.
    async fn handle(&self, event: &Event);
}

/// Event bus for distributing events to registered handlers.
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// Create a new event bus with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register an event handler.
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.push(handler);
    }

    /// Emit an event to all registered handlers.
    pub async fn emit(&self, event: Event) {
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            handler.handle(&event).await;
        }
    }

    /// Get the number of registered handlers.
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Writes every event to the `tracing` subscriber.
pub struct LoggingHandler;

#[async_trait]
impl EventHandler for LoggingHandler {
    async fn handle(&self, event: &Event) {
        match event {
            Event::StepStarted {
                mission_id,
                step_id,
                ..
            } => {
                info!(mission = %mission_id, step = %step_id, "step started");
            }
            Event::StepCompleted {
                mission_id,
                step_id,
                duration,
                ..
            } => {
                info!(
                    mission = %mission_id,
                    step = %step_id,
                    duration_ms = duration.as_millis() as u64,
                    "step completed"
                );
            }
            Event::StepFailed {
                mission_id,
                step_id,
                error,
                timed_out,
                ..
            } => {
                warn!(
                    mission = %mission_id,
                    step = %step_id,
                    timed_out,
                    "step failed: {}",
                    error
                );
            }
            Event::StepCancelled {
                mission_id,
                step_id,
                reason,
                ..
            } => {
                info!(mission = %mission_id, step = %step_id, "step cancelled: {}", reason);
            }
            Event::MissionTransition {
                mission_id,
                from,
                to,
                attempt,
                ..
            } => {
                info!(mission = %mission_id, attempt, "mission {} -> {}", from, to);
            }
        }
    }
}
