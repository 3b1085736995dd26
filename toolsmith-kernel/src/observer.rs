//! Hooks reporting the progress of an agent run.

use std::sync::{Arc, Mutex, PoisonError};

use toolsmith_primitives::RunId;
use tracing::{debug, info};

/// Step-level event emitted by the loop.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    /// The model answered a request.
    ModelResponded {
        /// Run the event belongs to.
        run_id: RunId,
        /// One-based model turn.
        step: usize,
        /// Text content of the reply.
        content: String,
        /// Operations the model requested.
        operations: Vec<String>,
    },
    /// An operation ran and its observation was appended to the conversation.
    OperationCompleted {
        /// Run the event belongs to.
        run_id: RunId,
        /// Model turn that requested the operation.
        step: usize,
        /// Operation name.
        operation: String,
        /// Observation handed back to the model.
        observation: String,
    },
    /// The model produced a final answer.
    Finished {
        /// Run the event belongs to.
        run_id: RunId,
        /// Number of model turns taken.
        steps: usize,
        /// Final answer.
        answer: String,
    },
}

/// Observer trait used to capture run progress (for logging, streaming, etc.).
pub trait TurnObserver: Send + Sync {
    /// Records one event.
    fn record(&self, event: TurnEvent);
}

/// Observer that logs to tracing.
#[derive(Debug, Default)]
pub struct TracingTurnObserver;

impl TurnObserver for TracingTurnObserver {
    fn record(&self, event: TurnEvent) {
        match event {
            TurnEvent::ModelResponded {
                run_id,
                step,
                content,
                operations,
            } => info!(
                %run_id,
                step,
                thought = %content,
                operations = ?operations,
                "model responded"
            ),
            TurnEvent::OperationCompleted {
                run_id,
                step,
                operation,
                observation,
            } => debug!(%run_id, step, %operation, %observation, "operation completed"),
            TurnEvent::Finished {
                run_id,
                steps,
                answer,
            } => info!(%run_id, steps, answer = %answer, "run finished"),
        }
    }
}

/// Observer used during testing to capture events.
#[derive(Debug, Default)]
pub struct CollectingObserver {
    events: Mutex<Vec<TurnEvent>>,
}

impl CollectingObserver {
    /// Creates a new collecting observer.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns and clears the collected events.
    #[must_use]
    pub fn drain(&self) -> Vec<TurnEvent> {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        events.drain(..).collect()
    }
}

impl TurnObserver for CollectingObserver {
    fn record(&self, event: TurnEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
