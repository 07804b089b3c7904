//! Execution identity and lifecycle tracking

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use tokio::sync::RwLock;

/// Unique execution identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionId(pub uuid::Uuid);

impl ExecutionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Hyphen-free form, used for work directory names
    pub fn simple(&self) -> String {
        self.0.simple().to_string()
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where an execution is in its lifecycle
///
/// ```text
/// Received -> Validating -> Rejected
///                        -> Spawning -> Running -> Completed | TimedOut | Crashed -> ResultCollected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    Received,
    Validating,
    Rejected,
    Spawning,
    Running,
    Completed,
    TimedOut,
    Crashed,
    ResultCollected,
}

impl ExecutionPhase {
    /// Whether moving from `self` to `next` is a legal step
    pub fn can_transition_to(self, next: ExecutionPhase) -> bool {
        use ExecutionPhase::*;
        matches!(
            (self, next),
            (Received, Validating)
                | (Validating, Rejected)
                | (Validating, Spawning)
                | (Spawning, Running)
                | (Spawning, Crashed)
                | (Running, Completed)
                | (Running, TimedOut)
                | (Running, Crashed)
                | (Completed, ResultCollected)
                | (TimedOut, ResultCollected)
                | (Crashed, ResultCollected)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ExecutionPhase::Rejected | ExecutionPhase::ResultCollected)
    }
}

/// Snapshot of one in-flight execution
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionState {
    pub id: ExecutionId,
    /// Sanitized session token
    pub session: String,
    pub phase: ExecutionPhase,
    pub started_at: SystemTime,
    #[serde(skip)]
    started: Instant,
}

impl ExecutionState {
    pub fn new(id: ExecutionId, session: impl Into<String>) -> Self {
        Self {
            id,
            session: session.into(),
            phase: ExecutionPhase::Received,
            started_at: SystemTime::now(),
            started: Instant::now(),
        }
    }

    /// Advance the phase, refusing illegal jumps
    pub fn advance(&mut self, next: ExecutionPhase) -> bool {
        if self.phase.can_transition_to(next) {
            self.phase = next;
            true
        } else {
            tracing::warn!(
                execution_id = %self.id,
                from = ?self.phase,
                to = ?next,
                "Ignoring illegal execution phase transition"
            );
            false
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

type Registry = Arc<RwLock<HashMap<ExecutionId, ExecutionState>>>;

/// In-flight executions, shared by the executor and its handles
#[derive(Debug, Clone, Default)]
pub struct ExecutionRegistry {
    executions: Registry,
}

impl ExecutionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new execution; the entry lives until the guard drops
    pub async fn register(&self, id: ExecutionId, session: &str) -> RegistrationGuard {
        self.executions
            .write()
            .await
            .insert(id, ExecutionState::new(id, session));
        RegistrationGuard {
            id,
            executions: Arc::clone(&self.executions),
        }
    }

    pub async fn advance(&self, id: ExecutionId, next: ExecutionPhase) -> bool {
        match self.executions.write().await.get_mut(&id) {
            Some(state) => state.advance(next),
            None => false,
        }
    }

    pub async fn get(&self, id: ExecutionId) -> Option<ExecutionState> {
        self.executions.read().await.get(&id).cloned()
    }

    /// List all in-flight executions
    pub async fn list(&self) -> Vec<ExecutionState> {
        self.executions.read().await.values().cloned().collect()
    }
}

/// Lets a runtime report phase changes for one execution
#[derive(Debug, Clone)]
pub struct PhaseReporter {
    id: ExecutionId,
    registry: ExecutionRegistry,
}

impl PhaseReporter {
    pub fn new(id: ExecutionId, registry: ExecutionRegistry) -> Self {
        Self { id, registry }
    }

    /// A reporter not attached to any shared registry
    pub fn detached(id: ExecutionId) -> Self {
        Self::new(id, ExecutionRegistry::new())
    }

    pub async fn advance(&self, next: ExecutionPhase) -> bool {
        self.registry.advance(self.id, next).await
    }
}

/// Removes its execution from the registry when dropped, including when the
/// owning future is cancelled mid-flight.
pub struct RegistrationGuard {
    id: ExecutionId,
    executions: Registry,
}

impl RegistrationGuard {
    pub fn id(&self) -> ExecutionId {
        self.id
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        let id = self.id;
        // Fast path; fall back to a task if the lock is contended
        if let Ok(mut map) = self.executions.try_write() {
            map.remove(&id);
            return;
        }
        let executions = Arc::clone(&self.executions);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                executions.write().await.remove(&id);
            });
        }
    }
}
