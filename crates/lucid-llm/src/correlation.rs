use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;

use lucid_core::ids::{EventId, RunId};
use lucid_store::SessionController;

/// Number of terminated run ids remembered for duplicate detection.
pub const TERMINATED_WINDOW: usize = 4096;

/// Kind of execution unit a run id belongs to.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum RunNamespace {
    Llm,
    Chain,
    Tool,
    Retriever,
}

impl RunNamespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Llm => "llm",
            Self::Chain => "chain",
            Self::Tool => "tool",
            Self::Retriever => "retriever",
        }
    }
}

impl fmt::Display for RunNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Unseen,
    Started,
    Terminated,
}

/// An open run: the event it created and where that event lives.
pub struct OpenRun {
    pub event_id: EventId,
    pub session: Arc<SessionController>,
    pub model: Option<String>,
    pub started: Instant,
}

type RunKey = (RunNamespace, RunId);

/// Run id → open event. Lock it for the whole start or end transition.
pub struct CorrelationTable {
    inner: Mutex<Correlations>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::with_window(TERMINATED_WINDOW)
    }

    pub fn with_window(terminated_window: usize) -> Self {
        Self {
            inner: Mutex::new(Correlations {
                open: HashMap::new(),
                terminated: VecDeque::new(),
                terminated_set: HashSet::new(),
                window: terminated_window.max(1),
            }),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, Correlations> {
        self.inner.lock().await
    }

    pub async fn in_flight(&self) -> usize {
        self.inner.lock().await.open.len()
    }
}

impl Default for CorrelationTable {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Correlations {
    open: HashMap<RunKey, OpenRun>,
    terminated: VecDeque<RunKey>,
    terminated_set: HashSet<RunKey>,
    window: usize,
}

impl Correlations {
    pub fn state(&self, ns: RunNamespace, id: &RunId) -> RunState {
        let key = (ns, id.clone());
        if self.open.contains_key(&key) {
            RunState::Started
        } else if self.terminated_set.contains(&key) {
            RunState::Terminated
        } else {
            RunState::Unseen
        }
    }

    /// Record a started run. Returns false if the id is not `Unseen`.
    pub fn open(&mut self, ns: RunNamespace, id: RunId, run: OpenRun) -> bool {
        if self.state(ns, &id) != RunState::Unseen {
            return false;
        }
        self.open.insert((ns, id), run);
        true
    }

    /// Consume a started run and mark it terminated. On failure returns the
    /// state the id was actually in.
    pub fn close(&mut self, ns: RunNamespace, id: &RunId) -> Result<OpenRun, RunState> {
        let key = (ns, id.clone());
        match self.open.remove(&key) {
            Some(run) => {
                self.remember(key);
                Ok(run)
            }
            None if self.terminated_set.contains(&key) => Err(RunState::Terminated),
            None => Err(RunState::Unseen),
        }
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    fn remember(&mut self, key: RunKey) {
        if self.terminated.len() == self.window {
            if let Some(old) = self.terminated.pop_front() {
                self.terminated_set.remove(&old);
            }
        }
        self.terminated_set.insert(key.clone());
        self.terminated.push_back(key);
    }
}
