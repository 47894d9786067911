//! Named continuation steps.
//!
//! A continuation does not capture a closure. It names a step by [`StepId`]
//! and carries its state in a [`Params`](crate::params::Params) bag; the
//! [`StepRegistry`] maps the name back to a handler when the next message
//! arrives. The registry is built at startup and read-only afterwards.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::handler::{BoxedHandler, Handler, into_handler};

/// Identifier of a registered step.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(Arc<str>);

impl StepId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StepId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for StepId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lookup table from step id to handler.
#[derive(Default, Clone)]
pub struct StepRegistry {
    steps: HashMap<StepId, BoxedHandler>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `id`, replacing any previous handler.
    pub fn register<H: Handler>(&mut self, id: impl Into<StepId>, handler: H) -> &mut Self {
        self.steps.insert(id.into(), into_handler(handler));
        self
    }

    /// Registers a handler, builder style.
    pub fn with<H: Handler>(mut self, id: impl Into<StepId>, handler: H) -> Self {
        self.register(id, handler);
        self
    }

    pub fn get(&self, id: &StepId) -> Option<&BoxedHandler> {
        self.steps.get(id)
    }

    pub fn contains(&self, id: &StepId) -> bool {
        self.steps.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.steps.keys().map(StepId::as_str).collect();
        ids.sort_unstable();
        f.debug_struct("StepRegistry").field("steps", &ids).finish()
    }
}
