//! Session-scoped execution state

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

use hl_core::path::resolve_path;
use hl_core::CommandContext;

use crate::tunnel::TunnelRegistry;

/// How a chained session gets its state from its parent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateMode {
    /// Same state object; changes are visible on both sides
    Shared,
    /// Independent copy taken at chaining time
    Forked,
}

#[derive(Debug, Clone, Default)]
struct StateData {
    cwd: String,
    env: BTreeMap<String, String>,
    uid: Option<u32>,
    has_sudo: bool,
}

#[derive(Debug, Default)]
struct StateInner {
    data: RwLock<StateData>,
    tunnels: TunnelRegistry,
}

/// Working directory, environment, privileges and tunnels of a session
///
/// Cloning shares the underlying state. Use [`fork`](Self::fork) for an
/// independent copy.
#[derive(Debug, Clone, Default)]
pub struct ExecutionState {
    inner: Arc<StateInner>,
}

impl ExecutionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deep copy with an empty tunnel registry
    pub fn fork(&self) -> Self {
        let data = self.inner.data.read().clone();
        Self {
            inner: Arc::new(StateInner {
                data: RwLock::new(data),
                tunnels: TunnelRegistry::new(),
            }),
        }
    }

    /// Whether `other` is the same state object
    pub fn shares_with(&self, other: &ExecutionState) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Snapshot handed to a transport for one command
    pub fn context(&self) -> CommandContext {
        let data = self.inner.data.read();
        CommandContext {
            cwd: data.cwd.clone(),
            env: data.env.clone(),
        }
    }

    /// Tunnels registered by every session using this state
    pub fn tunnels(&self) -> &TunnelRegistry {
        &self.inner.tunnels
    }

    pub fn cwd(&self) -> String {
        self.inner.data.read().cwd.clone()
    }

    /// Change directory, resolving `path` against the current cwd
    pub fn set_cwd(&self, path: &str) {
        let mut data = self.inner.data.write();
        data.cwd = resolve_path(path, &data.cwd);
    }

    /// Remote uid, `None` until seeded or when `id -u` was unparsable
    pub fn uid(&self) -> Option<u32> {
        self.inner.data.read().uid
    }

    pub fn set_uid(&self, uid: Option<u32>) {
        self.inner.data.write().uid = uid;
    }

    pub fn is_root(&self) -> bool {
        self.uid() == Some(0)
    }

    pub fn has_sudo(&self) -> bool {
        self.inner.data.read().has_sudo
    }

    pub fn set_has_sudo(&self, has_sudo: bool) {
        self.inner.data.write().has_sudo = has_sudo;
    }

    pub fn env_get(&self, key: &str) -> Option<String> {
        self.inner.data.read().env.get(key).cloned()
    }

    pub fn env_set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.inner.data.write().env.insert(key.into(), value.into());
    }

    /// Remove `key`, returning its previous value
    pub fn env_unset(&self, key: &str) -> Option<String> {
        self.inner.data.write().env.remove(key)
    }

    /// Append `value` to a separator-delimited variable such as `PATH`
    pub fn env_append(&self, key: &str, value: &str, sep: &str) {
        let mut data = self.inner.data.write();
        let joined = match data.env.get(key) {
            Some(current) if !current.is_empty() => format!("{}{}{}", current, sep, value),
            _ => value.to_string(),
        };
        data.env.insert(key.to_string(), joined);
    }

    /// Prepend `value` to a separator-delimited variable
    pub fn env_prepend(&self, key: &str, value: &str, sep: &str) {
        let mut data = self.inner.data.write();
        let joined = match data.env.get(key) {
            Some(current) if !current.is_empty() => format!("{}{}{}", value, sep, current),
            _ => value.to_string(),
        };
        data.env.insert(key.to_string(), joined);
    }

    /// Drop every `value` entry from a separator-delimited variable
    pub fn env_remove_from_path(&self, key: &str, value: &str, sep: &str) {
        let mut data = self.inner.data.write();
        if let Some(current) = data.env.get_mut(key) {
            let kept: Vec<&str> = current.split(sep).filter(|part| *part != value).collect();
            *current = kept.join(sep);
        }
    }

    pub fn env_clear(&self) {
        self.inner.data.write().env.clear();
    }

    pub fn env_all(&self) -> BTreeMap<String, String> {
        self.inner.data.read().env.clone()
    }
}
