//! Deferred value graph
//!
//! A deferred value (`OutputHandle`, or the typed `Output<T>` wrapper) is a
//! placeholder for a value produced by a provisioning call that has not
//! completed yet. Deferred values are settled exactly once, either resolved
//! with a `serde_json::Value` payload or failed with a [`Fault`].
//!
//! Derived values are built with [`OutputHandle::map_value`] and
//! [`OutputHandle::join`]. Each derivation registers a combinator holding a
//! pending count over its inputs; the combinator fires exactly once, when the
//! last input resolves, or fails eagerly on the first failed input. There is
//! no global topological sort: edges only point from existing values to a
//! freshly created one, so the graph is acyclic by construction.
//!
//! Settlement propagation is driven by an iterative work queue, never by
//! recursive calls, so long derivation chains cannot overflow the stack.
//! State transitions are serialized per value: under concurrent settlement
//! attempts exactly one wins and the rest are rejected.

use std::collections::VecDeque;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::StratusError;

// ============================================================================
// FAULT
// ============================================================================

/// Failure payload carried through the graph.
///
/// Records where the error arose and every label it propagated through, so a
/// failed export can be reported with the full dependency chain back to the
/// originating resource.
#[derive(Debug, Clone)]
pub struct Fault {
    message: String,
    origin: String,
    chain: Vec<String>,
}

impl Fault {
    pub fn new(message: impl Into<String>, origin: impl Into<String>) -> Self {
        let origin = origin.into();
        Self {
            message: message.into(),
            chain: vec![origin.clone()],
            origin,
        }
    }

    /// Copy of this fault with `label` appended to the propagation chain.
    pub fn extended(&self, label: &str) -> Self {
        let mut chain = self.chain.clone();
        chain.push(label.to_string());
        Self {
            message: self.message.clone(),
            origin: self.origin.clone(),
            chain,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Label of the deferred value where the error first arose.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Labels from the origin to the value that observed the fault.
    pub fn chain(&self) -> &[String] {
        &self.chain
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.chain.len() > 1 {
            write!(
                f,
                "{} (origin: {}; chain: {})",
                self.message,
                self.origin,
                self.chain.join(" -> ")
            )
        } else {
            write!(f, "{} (origin: {})", self.message, self.origin)
        }
    }
}

// ============================================================================
// NODE STATE
// ============================================================================

/// Final state of a deferred value.
#[derive(Debug, Clone)]
pub enum Settled {
    Resolved(Value),
    Failed(Fault),
}

impl Settled {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Settled::Resolved(_))
    }
}

enum NodeState {
    Pending {
        /// Combinators waiting on this value.
        waiters: Vec<Arc<Combinator>>,
        /// One-shot settlement notifications (register callback, return).
        callbacks: Vec<oneshot::Sender<Settled>>,
    },
    Settled(Settled),
}

struct Node {
    label: String,
    state: Mutex<NodeState>,
}

impl Node {
    fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            state: Mutex::new(NodeState::Pending {
                waiters: Vec::new(),
                callbacks: Vec::new(),
            }),
        }
    }

    fn settled(label: impl Into<String>, outcome: Settled) -> Self {
        Self {
            label: label.into(),
            state: Mutex::new(NodeState::Settled(outcome)),
        }
    }

    fn peek(&self) -> Option<Settled> {
        match &*self.state.lock().unwrap() {
            NodeState::Settled(s) => Some(s.clone()),
            NodeState::Pending { .. } => None,
        }
    }
}

/// Settle a node, returning the combinators that were waiting on it.
///
/// A second settlement attempt is rejected and the held value is untouched.
fn transition(node: &Node, outcome: &Settled) -> Result<Vec<Arc<Combinator>>, StratusError> {
    let waiters = {
        let mut st = node.state.lock().unwrap();
        match std::mem::replace(&mut *st, NodeState::Settled(outcome.clone())) {
            NodeState::Settled(prev) => {
                // the earlier settlement wins; put it back
                *st = NodeState::Settled(prev);
                return Err(StratusError::AlreadySettled {
                    label: node.label.clone(),
                });
            }
            NodeState::Pending { waiters, callbacks } => {
                drop(st);
                for cb in callbacks {
                    let _ = cb.send(outcome.clone());
                }
                waiters
            }
        }
    };
    Ok(waiters)
}

// ============================================================================
// COMBINATOR
// ============================================================================

type CombinatorFn = Box<dyn FnOnce(Vec<Value>) -> Result<Value, String> + Send>;

/// A derived computation over one or more deferred inputs.
///
/// Fires at most once: either when the pending count reaches zero (all inputs
/// resolved) or eagerly on the first failed input. The `fired` flag is the
/// race arbiter when two input settlements arrive concurrently.
struct Combinator {
    inputs: Vec<Arc<Node>>,
    remaining: AtomicUsize,
    fired: AtomicBool,
    target: Arc<Node>,
    func: Mutex<Option<CombinatorFn>>,
}

type WorkQueue = VecDeque<(Arc<Combinator>, Settled)>;

impl Combinator {
    fn fail(&self, fault: Fault, queue: &mut WorkQueue) {
        if self.fired.swap(true, Ordering::AcqRel) {
            return;
        }
        // the closure never runs once an input has failed
        let _ = self.func.lock().unwrap().take();
        let outcome = Settled::Failed(fault.extended(&self.target.label));
        settle_into_queue(&self.target, outcome, queue);
    }

    fn fire(&self, queue: &mut WorkQueue) {
        if self.fired.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(func) = self.func.lock().unwrap().take() else {
            return;
        };
        let mut values = Vec::with_capacity(self.inputs.len());
        for input in &self.inputs {
            match input.peek() {
                Some(Settled::Resolved(v)) => values.push(v),
                // unreachable when the pending count is maintained correctly
                _ => {
                    let fault = Fault::new(
                        format!("input '{}' not resolved at firing time", input.label),
                        self.target.label.clone(),
                    );
                    settle_into_queue(&self.target, Settled::Failed(fault), queue);
                    return;
                }
            }
        }
        let outcome = match func(values) {
            Ok(v) => Settled::Resolved(v),
            Err(msg) => Settled::Failed(Fault::new(msg, self.target.label.clone())),
        };
        settle_into_queue(&self.target, outcome, queue);
    }
}

fn settle_into_queue(node: &Arc<Node>, outcome: Settled, queue: &mut WorkQueue) {
    match transition(node, &outcome) {
        Ok(waiters) => {
            for w in waiters {
                queue.push_back((w, outcome.clone()));
            }
        }
        // combinator targets are settled only by their own combinator,
        // guarded by the fired flag
        Err(e) => tracing::debug!("settlement race on combinator target: {}", e),
    }
}

/// Drain the work queue until propagation stops. Iterative on purpose.
fn drain(mut queue: WorkQueue) {
    while let Some((comb, settled)) = queue.pop_front() {
        match settled {
            Settled::Failed(fault) => comb.fail(fault, &mut queue),
            Settled::Resolved(_) => {
                if comb.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    comb.fire(&mut queue);
                }
            }
        }
    }
}

/// Register a combinator over `inputs`, returning its target deferred value.
///
/// Inputs that are already settled at registration are accounted for up
/// front; a combinator whose inputs are all settled (including the zero-input
/// case) is immediately eligible to fire.
fn register(inputs: Vec<OutputHandle>, label: impl Into<String>, func: CombinatorFn) -> OutputHandle {
    let target = Arc::new(Node::new(label));
    let nodes: Vec<Arc<Node>> = inputs.iter().map(|h| Arc::clone(&h.node)).collect();
    let comb = Arc::new(Combinator {
        remaining: AtomicUsize::new(nodes.len()),
        fired: AtomicBool::new(false),
        target: Arc::clone(&target),
        func: Mutex::new(Some(func)),
        inputs: nodes,
    });

    let mut pre_resolved = 0usize;
    let mut first_fault: Option<Fault> = None;
    for node in &comb.inputs {
        let mut st = node.state.lock().unwrap();
        match &mut *st {
            NodeState::Pending { waiters, .. } => waiters.push(Arc::clone(&comb)),
            NodeState::Settled(Settled::Resolved(_)) => pre_resolved += 1,
            NodeState::Settled(Settled::Failed(f)) => {
                if first_fault.is_none() {
                    first_fault = Some(f.clone());
                }
            }
        }
    }

    let mut queue = WorkQueue::new();
    if let Some(fault) = first_fault {
        comb.fail(fault, &mut queue);
    } else if pre_resolved == comb.inputs.len() {
        // covers the zero-input combinator
        comb.fire(&mut queue);
    } else if pre_resolved > 0
        && comb.remaining.fetch_sub(pre_resolved, Ordering::AcqRel) == pre_resolved
    {
        comb.fire(&mut queue);
    }
    drain(queue);

    OutputHandle { node: target }
}

// ============================================================================
// UNTYPED HANDLE
// ============================================================================

/// Untyped deferred value over a `serde_json::Value` payload.
///
/// Cloning is cheap and shares the underlying state.
#[derive(Clone)]
pub struct OutputHandle {
    node: Arc<Node>,
}

impl OutputHandle {
    /// New pending deferred value. Settled later by its owner.
    pub fn pending(label: impl Into<String>) -> Self {
        Self {
            node: Arc::new(Node::new(label)),
        }
    }

    /// Deferred value already resolved with `value`.
    pub fn resolved(label: impl Into<String>, value: Value) -> Self {
        Self {
            node: Arc::new(Node::settled(label, Settled::Resolved(value))),
        }
    }

    /// Deferred value already failed with `fault`.
    pub fn failed(label: impl Into<String>, fault: Fault) -> Self {
        Self {
            node: Arc::new(Node::settled(label, Settled::Failed(fault))),
        }
    }

    pub fn label(&self) -> &str {
        &self.node.label
    }

    /// Current state without waiting. `None` while pending.
    pub fn peek(&self) -> Option<Settled> {
        self.node.peek()
    }

    /// Resolve this value. Exactly-once: a second settlement is rejected.
    pub fn resolve(&self, value: Value) -> Result<(), StratusError> {
        let outcome = Settled::Resolved(value);
        let waiters = transition(&self.node, &outcome)?;
        drain(waiters.into_iter().map(|w| (w, outcome.clone())).collect());
        Ok(())
    }

    /// Fail this value. Exactly-once: a second settlement is rejected.
    /// The fault propagates eagerly to every transitive dependent.
    pub fn fail(&self, fault: Fault) -> Result<(), StratusError> {
        let outcome = Settled::Failed(fault);
        let waiters = transition(&self.node, &outcome)?;
        drain(waiters.into_iter().map(|w| (w, outcome.clone())).collect());
        Ok(())
    }

    /// Wait for settlement. Registers a one-shot callback and returns; no
    /// lock is held across the await.
    pub async fn settled(&self) -> Settled {
        let rx = {
            let mut st = self.node.state.lock().unwrap();
            match &mut *st {
                NodeState::Settled(s) => return s.clone(),
                NodeState::Pending { callbacks, .. } => {
                    let (tx, rx) = oneshot::channel();
                    callbacks.push(tx);
                    rx
                }
            }
        };
        match rx.await {
            Ok(s) => s,
            Err(_) => Settled::Failed(Fault::new(
                "settlement channel closed",
                self.node.label.clone(),
            )),
        }
    }

    /// Derived value that applies `f` once this value resolves.
    ///
    /// `f` must be a pure function of its input; it runs at most once.
    pub fn map_value<F>(&self, label: impl Into<String>, f: F) -> OutputHandle
    where
        F: FnOnce(Value) -> Result<Value, String> + Send + 'static,
    {
        register(
            vec![self.clone()],
            label,
            Box::new(move |mut values| f(values.remove(0))),
        )
    }

    /// Derived value resolving to the ordered list of all input values.
    ///
    /// Short-circuits on the first failed input; later sibling settlements do
    /// not change the composite's state.
    pub fn join(label: impl Into<String>, inputs: &[OutputHandle]) -> OutputHandle {
        register(
            inputs.to_vec(),
            label,
            Box::new(|values| Ok(Value::Array(values))),
        )
    }

    /// General combinator registration: a derived value that applies `f` to
    /// the resolved input values (in input order) once all inputs resolve.
    ///
    /// A combinator with zero inputs is immediately eligible to run.
    pub fn combine<F>(label: impl Into<String>, inputs: &[OutputHandle], f: F) -> OutputHandle
    where
        F: FnOnce(Vec<Value>) -> Result<Value, String> + Send + 'static,
    {
        register(inputs.to_vec(), label, Box::new(f))
    }
}

impl fmt::Debug for OutputHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.peek() {
            None => "pending".to_string(),
            Some(Settled::Resolved(_)) => "resolved".to_string(),
            Some(Settled::Failed(fault)) => format!("failed: {}", fault.message()),
        };
        write!(f, "OutputHandle('{}', {})", self.node.label, state)
    }
}

// ============================================================================
// TYPED WRAPPER
// ============================================================================

/// Typed deferred value. Bridges to the untyped graph via serde at the seam.
pub struct Output<T> {
    handle: OutputHandle,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Output<T> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> Output<T> {
    pub fn from_handle(handle: OutputHandle) -> Self {
        Self {
            handle,
            _marker: PhantomData,
        }
    }

    pub fn handle(&self) -> &OutputHandle {
        &self.handle
    }

    pub fn pending(label: impl Into<String>) -> Self {
        Self::from_handle(OutputHandle::pending(label))
    }
}

impl<T> Output<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    /// Already-resolved value. An unencodable payload yields a failed value
    /// that propagates through the graph instead of panicking.
    pub fn literal(label: impl Into<String>, value: T) -> Self {
        let label = label.into();
        match serde_json::to_value(value) {
            Ok(v) => Self::from_handle(OutputHandle::resolved(label, v)),
            Err(e) => Self::from_handle(OutputHandle::failed(
                label.clone(),
                Fault::new(format!("encode literal: {}", e), label),
            )),
        }
    }

    pub fn resolve(&self, value: T) -> Result<(), StratusError> {
        match serde_json::to_value(value) {
            Ok(v) => self.handle.resolve(v),
            Err(e) => self.handle.fail(Fault::new(
                format!("encode: {}", e),
                self.handle.label().to_string(),
            )),
        }
    }

    pub fn fail(&self, fault: Fault) -> Result<(), StratusError> {
        self.handle.fail(fault)
    }

    /// Derived value applying the pure function `f` to the resolved input.
    pub fn map<U, F>(&self, label: impl Into<String>, f: F) -> Output<U>
    where
        U: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let handle = self.handle.map_value(label, move |value| {
            let input: T =
                serde_json::from_value(value).map_err(|e| format!("decode input: {}", e))?;
            serde_json::to_value(f(input)).map_err(|e| format!("encode result: {}", e))
        });
        Output::from_handle(handle)
    }

    /// Composite resolving to all input values in input order.
    pub fn all(label: impl Into<String>, items: &[Output<T>]) -> Output<Vec<T>> {
        let handles: Vec<OutputHandle> = items.iter().map(|o| o.handle.clone()).collect();
        Output::from_handle(OutputHandle::join(label, &handles))
    }

    /// Wait for settlement and decode the resolved payload.
    pub async fn get(&self) -> Result<T, Fault> {
        match self.handle.settled().await {
            Settled::Resolved(v) => serde_json::from_value(v).map_err(|e| {
                Fault::new(
                    format!("decode: {}", e),
                    self.handle.label().to_string(),
                )
            }),
            Settled::Failed(fault) => Err(fault),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
