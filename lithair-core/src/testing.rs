//! A toy "todo list" application model, exercising the `Applier` triad
//! against a one-field state the same way this codebase's "Hello World"
//! fixture exercised the old `Event` trait — small enough to read in one
//! sitting, real enough that bootstrap/sync/GC scenarios aren't trivial.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::engine::{Applier, Event};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Todo {
    pub id: String,
    pub title: String,
    pub done: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TodoState {
    pub todos: HashMap<String, Todo>,
}

/// The payload carried in `Event.op.data`. `op.kind` still names the
/// event for logging/filtering purposes even though `type` is also
/// tagged here; the two are allowed to be redundant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TodoEvent {
    Created { id: String, title: String },
    Completed { id: String },
    Removed { id: String },
}

impl TodoEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            TodoEvent::Created { .. } => "todo.created",
            TodoEvent::Completed { .. } => "todo.completed",
            TodoEvent::Removed { .. } => "todo.removed",
        }
    }

    /// Convenience for callers that don't care to mint their own id.
    pub fn new_created(title: impl Into<String>) -> Self {
        TodoEvent::Created {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
        }
    }
}

/// Convenience for callers building the `(event_type, data)` pair
/// `Engine::record` expects out of a `TodoEvent`.
pub fn record_payload(event: &TodoEvent) -> (&'static str, serde_json::Value) {
    let kind = event.kind();
    let data = serde_json::to_value(event).expect("TodoEvent always serializes");
    (kind, data)
}

/// An `Applier` over `TodoState`, guarded by a plain `Mutex` since
/// `apply_event` takes `&self` — the engine never calls it concurrently
/// with itself, but the trait can't express that.
#[derive(Default)]
pub struct TodoApplier {
    state: Mutex<TodoState>,
    events_applied: Mutex<u64>,
}

impl TodoApplier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: TodoState) -> Self {
        Self {
            state: Mutex::new(state),
            events_applied: Mutex::new(0),
        }
    }

    pub fn state(&self) -> TodoState {
        self.state.lock().expect("todo state mutex poisoned").clone()
    }

    /// Number of times `apply_event` has actually run, for scenario
    /// assertions like "bootstrap via baseline applies zero events".
    pub fn events_applied(&self) -> u64 {
        *self.events_applied.lock().expect("counter mutex poisoned")
    }

    fn mutate(&self, todo_event: TodoEvent) {
        let mut state = self.state.lock().expect("todo state mutex poisoned");
        match todo_event {
            TodoEvent::Created { id, title } => {
                state.todos.insert(id.clone(), Todo { id, title, done: false });
            }
            TodoEvent::Completed { id } => {
                if let Some(todo) = state.todos.get_mut(&id) {
                    todo.done = true;
                }
            }
            TodoEvent::Removed { id } => {
                state.todos.remove(&id);
            }
        }
    }

    /// Applies a domain event directly, the way a host application
    /// mutates its own optimistic UI state at the moment of the user's
    /// action — independent of `Engine::record`, which only persists and
    /// replicates the already-applied mutation. Real callers of this
    /// engine are expected to apply locally like this; `apply_event`
    /// (the `Applier` trait method) exists for replaying *other* peers'
    /// events during bootstrap/sync.
    pub fn apply_local(&self, event: &TodoEvent) {
        self.mutate(event.clone());
    }
}

#[async_trait]
impl Applier for TodoApplier {
    async fn apply_event(&self, event: &Event) {
        let todo_event: TodoEvent = match serde_json::from_value(event.op.data.clone()) {
            Ok(parsed) => parsed,
            Err(err) => {
                log::warn!("skipping malformed todo event at increment {}: {err}", event.increment);
                return;
            }
        };
        self.mutate(todo_event);
        *self.events_applied.lock().expect("counter mutex poisoned") += 1;
    }

    async fn snapshot(&self) -> Option<serde_json::Value> {
        let state = self.state.lock().expect("todo state mutex poisoned").clone();
        Some(serde_json::to_value(state).expect("TodoState always serializes"))
    }

    async fn load_snapshot(&self, state: serde_json::Value) {
        match serde_json::from_value(state) {
            Ok(parsed) => *self.state.lock().expect("todo state mutex poisoned") = parsed,
            Err(err) => log::warn!("failed to load todo snapshot: {err}"),
        }
    }
}
