// # Progress
//
// Task-level progress for a processing run. Each long-running step (a part
// download, a duration decode, packaging the archive) is reported as a task
// that moves from Running to Completed or Failed. Events are pushed over an
// unbounded channel so reporting never blocks the run.

use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            TaskState::Running => "Running",
            TaskState::Completed => "Completed",
            TaskState::Failed => "Failed",
        };
        f.write_str(label)
    }
}

/// A unit of work shown to the user, e.g. `Part03` / `Download`
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: String,
    pub filename: String,
    pub task: String,
    pub state: TaskState,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    TaskAdded(Task),
    TaskUpdated {
        id: String,
        state: TaskState,
        error: Option<String>,
    },
}

/// Sender side of the progress channel; a reporter without a channel drops
/// every event
#[derive(Debug, Clone, Default)]
pub struct ProgressReporter {
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl ProgressReporter {
    pub fn new(tx: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Register a running task and return a handle to finish it
    pub fn start(&self, filename: &str, task: &str) -> TaskHandle {
        let id = Uuid::new_v4().to_string();
        self.send(ProgressEvent::TaskAdded(Task {
            id: id.clone(),
            filename: filename.to_string(),
            task: task.to_string(),
            state: TaskState::Running,
        }));
        TaskHandle {
            id,
            reporter: self.clone(),
        }
    }

    fn send(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            // receiver gone means nobody is listening anymore
            if tx.send(event).is_err() {
                debug!("Progress receiver dropped");
            }
        }
    }
}

/// A task that is still running
#[derive(Debug)]
pub struct TaskHandle {
    id: String,
    reporter: ProgressReporter,
}

impl TaskHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn complete(self) {
        self.reporter.send(ProgressEvent::TaskUpdated {
            id: self.id,
            state: TaskState::Completed,
            error: None,
        });
    }

    pub fn fail(self, error: &str) {
        self.reporter.send(ProgressEvent::TaskUpdated {
            id: self.id,
            state: TaskState::Failed,
            error: Some(error.to_string()),
        });
    }
}
