//! Backend pool registry.

use crate::config::{BackendConfig, Role};
use crate::health::HealthCell;

/// A backend the proxy can route to.
///
/// Created once at startup; only the health cell mutates afterwards.
#[derive(Debug)]
pub struct Backend {
    name: String,
    address: String,
    role: Role,
    health: HealthCell,
}

impl Backend {
    pub fn new(name: impl Into<String>, address: impl Into<String>, role: Role) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            role,
            health: HealthCell::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `host:port` the backend listens on.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_primary(&self) -> bool {
        self.role == Role::Primary
    }

    pub(crate) fn health(&self) -> &HealthCell {
        &self.health
    }
}

/// Backends in preference order: the primary first, then the secondaries in
/// the order they were declared.
#[derive(Debug)]
pub struct Pool {
    backends: Vec<Backend>,
}

impl Pool {
    /// Build a pool from validated configuration.
    pub fn from_config(configs: &[BackendConfig]) -> Self {
        Self::new(
            configs
                .iter()
                .map(|c| Backend::new(c.name.clone(), c.address.clone(), c.role))
                .collect(),
        )
    }

    /// Build a pool, moving primaries ahead of secondaries (stable).
    pub fn new(mut backends: Vec<Backend>) -> Self {
        backends.sort_by_key(|b| !b.is_primary());
        Self { backends }
    }

    pub fn backends(&self) -> &[Backend] {
        &self.backends
    }

    pub fn primary(&self) -> Option<&Backend> {
        self.backends.iter().find(|b| b.is_primary())
    }

    pub fn get(&self, name: &str) -> Option<&Backend> {
        self.backends.iter().find(|b| b.name == name)
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}
