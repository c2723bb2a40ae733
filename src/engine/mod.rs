//! # Provisioning Engine Boundary
//!
//! Trait and implementations for provisioning engines.
//!
//! The engine module defines how stratus talks to the system that actually
//! creates and reads cloud resources:
//!
//! - [`Engine`] - core trait with `create` and `read` operations
//! - [`SimEngine`] - in-process engine that synthesizes plausible resource
//!   state, with failure and latency injection for tests
//!
//! The core treats attributes as an opaque typed mapping and never inspects
//! provider-specific schemas. Retry and timeout policy for the underlying
//! network calls belongs to engine implementations, not to the caller.
//!
//! Use [`create_engine`] to instantiate an engine by name:
//!
//! ```rust
//! use stratus::engine::create_engine;
//!
//! let sim = create_engine("sim");
//! assert!(sim.is_ok());
//!
//! let unknown = create_engine("invalid");
//! assert!(unknown.is_err());
//! ```

mod sim;

pub use sim::{Operation, SimCall, SimEngine};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::error::StratusError;

// ============================================================================
// REQUEST/RESPONSE TYPES
// ============================================================================

/// Request to create or read one resource.
#[derive(Debug, Clone)]
pub struct ResourceRequest {
    /// Resource kind token, e.g. "network:Subnet".
    pub kind: String,

    /// Logical name within the stack program.
    pub name: String,

    /// Fully resolved input attributes (JSON object).
    pub attributes: Value,
}

impl ResourceRequest {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            attributes: Value::Object(serde_json::Map::new()),
        }
    }

    /// Set the resolved input attributes.
    pub fn with_attributes(mut self, attributes: Value) -> Self {
        self.attributes = attributes;
        self
    }
}

/// Observed state of a resource after a create or read.
#[derive(Debug, Clone)]
pub struct ResourceState {
    /// Resource kind token, echoed from the request.
    pub kind: String,

    /// Physical name assigned by the engine.
    pub name: String,

    /// Output attributes (JSON object, includes `id` and `name`).
    pub attributes: Value,
}

impl ResourceState {
    /// Look up an output attribute by dotted path.
    pub fn attr(&self, path: &str) -> Option<&Value> {
        let mut current = &self.attributes;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current)
    }
}

// ============================================================================
// ENGINE TRAIT (ASYNC)
// ============================================================================

/// Core trait that all provisioning engines must implement.
///
/// The Engine trait abstracts the actual cloud API, allowing the coordinator
/// to issue declarations without knowing which backend performs them.
/// All operations are async; real engines talk to remote control planes.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Engine name (e.g. "sim").
    fn name(&self) -> &str;

    /// Create a resource and return its observed state.
    async fn create(&self, request: ResourceRequest) -> Result<ResourceState>;

    /// Read an existing resource's state.
    async fn read(&self, request: ResourceRequest) -> Result<ResourceState>;

    /// Check if this engine can be used (e.g. credentials present).
    fn is_available(&self) -> bool {
        true
    }
}

// ============================================================================
// ENGINE FACTORY
// ============================================================================

/// Create an engine instance by name.
pub fn create_engine(name: &str) -> Result<Box<dyn Engine>, StratusError> {
    match name.to_lowercase().as_str() {
        "sim" => Ok(Box::new(SimEngine::new())),
        _ => Err(StratusError::UnknownEngine {
            name: name.to_string(),
        }),
    }
}

// ============================================================================
// TESTS
// ============================================================================
