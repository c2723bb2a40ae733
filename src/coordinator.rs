//! Declarative resource coordinator
//!
//! [`Deployment`] is the thin layer between a stack program and the
//! provisioning engine. `declare` (and its read-path twin `read`) returns a
//! deferred value for the resource's output attributes immediately; the
//! engine call itself runs in a spawned task once every deferred embedded in
//! the declaration's attributes has resolved. Engine failure settles the
//! result as failed rather than raising, so dependents fail cleanly through
//! the graph.
//!
//! The run terminates through [`Deployment::finish`]: every export must
//! resolve within the deadline, any failed export fails the run with the
//! originating fault and its dependency chain, and an export still pending at
//! the deadline is reported as such instead of silently succeeding.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::attrs::Attrs;
use crate::engine::{Engine, ResourceRequest};
use crate::error::StratusError;
use crate::output::{Fault, OutputHandle, Settled};

// ============================================================================
// RESOURCE OUTPUT
// ============================================================================

/// Deferred output attributes of one declared resource.
#[derive(Debug, Clone)]
pub struct ResourceOutput {
    handle: OutputHandle,
}

impl ResourceOutput {
    /// The full attribute object as a deferred value.
    pub fn handle(&self) -> &OutputHandle {
        &self.handle
    }

    /// Deferred projection of one output attribute by dotted path
    /// (e.g. `oidcIssuerProfile.issuerUrl`).
    pub fn attr(&self, path: &str) -> OutputHandle {
        let label = format!("{}.{}", self.handle.label(), path);
        let path = path.to_string();
        self.handle.map_value(label, move |value| {
            lookup(&value, &path)
                .ok_or_else(|| format!("output attribute '{}' not present", path))
        })
    }
}

fn lookup(value: &Value, path: &str) -> Option<Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current.clone())
}

// ============================================================================
// DEPLOYMENT
// ============================================================================

/// Outcome of a declaration, kept for end-of-run diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordState {
    InFlight,
    Created,
    Read,
    Failed(String),
}

#[derive(Clone, Copy)]
enum Op {
    Create,
    Read,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Create => write!(f, "create"),
            Op::Read => write!(f, "read"),
        }
    }
}

/// One program run against a provisioning engine.
///
/// Declarations are created during a single evaluation pass; settlement
/// happens out of program order as engine calls complete. Must be used from
/// within a tokio runtime.
pub struct Deployment {
    engine: Arc<dyn Engine>,
    records: Arc<DashMap<String, RecordState>>,
    exports: Mutex<Vec<(String, OutputHandle)>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Deployment {
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self {
            engine,
            records: Arc::new(DashMap::new()),
            exports: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Declare a resource to be created.
    ///
    /// Returns immediately with the resource's deferred output attributes.
    /// The engine call is issued once every deferred embedded in `attrs`
    /// resolves; if any of them fails, the resource fails without an engine
    /// call being made.
    pub fn declare(&self, kind: &str, name: &str, attrs: Attrs) -> ResourceOutput {
        self.submit(Op::Create, kind, name, attrs)
    }

    /// Declare a read of an existing resource. Same settlement contract as
    /// [`declare`](Self::declare).
    pub fn read(&self, kind: &str, name: &str, attrs: Attrs) -> ResourceOutput {
        self.submit(Op::Read, kind, name, attrs)
    }

    fn submit(&self, op: Op, kind: &str, name: &str, attrs: Attrs) -> ResourceOutput {
        let label = format!("{}/{}", kind, name);
        let result = OutputHandle::pending(label.clone());
        let inputs = attrs.join(format!("{}.inputs", label));
        self.records.insert(label.clone(), RecordState::InFlight);
        debug!(resource = %label, op = %op, "declared");

        let engine = Arc::clone(&self.engine);
        let records = Arc::clone(&self.records);
        let out = result.clone();
        let kind = kind.to_string();
        let name = name.to_string();
        let task = tokio::spawn(async move {
            match inputs.settled().await {
                Settled::Failed(fault) => {
                    debug!(resource = %label, "inputs failed: {}", fault);
                    records.insert(
                        label.clone(),
                        RecordState::Failed(fault.message().to_string()),
                    );
                    if let Err(e) = out.fail(fault.extended(&label)) {
                        warn!(resource = %label, "result already settled: {}", e);
                    }
                }
                Settled::Resolved(attributes) => {
                    info!(resource = %label, op = %op, "issuing engine call");
                    let request = ResourceRequest::new(kind, name).with_attributes(attributes);
                    let outcome = match op {
                        Op::Create => engine.create(request).await,
                        Op::Read => engine.read(request).await,
                    };
                    match outcome {
                        Ok(state) => {
                            records.insert(
                                label.clone(),
                                match op {
                                    Op::Create => RecordState::Created,
                                    Op::Read => RecordState::Read,
                                },
                            );
                            if let Err(e) = out.resolve(state.attributes) {
                                warn!(resource = %label, "result already settled: {}", e);
                            }
                        }
                        Err(e) => {
                            let message = format!("{:#}", e);
                            warn!(resource = %label, op = %op, "engine call failed: {}", message);
                            records.insert(label.clone(), RecordState::Failed(message.clone()));
                            if let Err(e) = out.fail(Fault::new(message, label.clone())) {
                                warn!(resource = %label, "result already settled: {}", e);
                            }
                        }
                    }
                }
            }
        });
        self.tasks.lock().unwrap().push(task);

        ResourceOutput { handle: result }
    }

    /// Register a named export. Reported (or failed over) at `finish`.
    pub fn export(&self, key: impl Into<String>, handle: &OutputHandle) {
        let key = key.into();
        debug!(export = %key, value = %handle.label(), "export registered");
        self.exports.lock().unwrap().push((key, handle.clone()));
    }

    /// Outcome of a declaration, by `kind/name` label.
    pub fn record(&self, label: &str) -> Option<RecordState> {
        self.records.get(label).map(|r| r.clone())
    }

    /// Wait for every export to settle.
    ///
    /// The run succeeds only if all exports resolve. The first failed export
    /// fails the run with its fault (including the dependency chain back to
    /// the originating resource). An export still pending when the deadline
    /// elapses yields a pending diagnostic. Non-exported declarations that
    /// ended failed or never completed are logged as side information.
    pub async fn finish(
        &self,
        deadline: Duration,
    ) -> Result<BTreeMap<String, Value>, StratusError> {
        let start = Instant::now();
        let exports: Vec<(String, OutputHandle)> = self.exports.lock().unwrap().clone();

        let mut resolved = BTreeMap::new();
        for (key, handle) in exports {
            let remaining = deadline.saturating_sub(start.elapsed());
            match tokio::time::timeout(remaining, handle.settled()).await {
                Err(_) => {
                    return Err(StratusError::ExportPending {
                        key,
                        label: handle.label().to_string(),
                        waited_secs: deadline.as_secs(),
                    });
                }
                Ok(Settled::Failed(fault)) => {
                    return Err(StratusError::ExportFailed { key, fault });
                }
                Ok(Settled::Resolved(value)) => {
                    info!(export = %key, "resolved");
                    resolved.insert(key, value);
                }
            }
        }

        // Give non-exported declarations a short grace period to settle, then
        // cut loose anything still running so the run can terminate.
        let mut tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock().unwrap());
        let grace = deadline
            .saturating_sub(start.elapsed())
            .min(Duration::from_millis(250));
        if tokio::time::timeout(grace, futures::future::join_all(tasks.iter_mut()))
            .await
            .is_err()
        {
            for task in &tasks {
                task.abort();
            }
        }

        for entry in self.records.iter() {
            match entry.value() {
                RecordState::Failed(message) => {
                    warn!(resource = %entry.key(), "declaration failed: {}", message);
                }
                RecordState::InFlight => {
                    warn!(resource = %entry.key(), "declaration never completed");
                }
                RecordState::Created | RecordState::Read => {}
            }
        }

        Ok(resolved)
    }
}

// ============================================================================
// TESTS
// ============================================================================
