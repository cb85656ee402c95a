//! Name → factory registry of sources.
//!
//! Sources are registered once at start-up together with two flags:
//! whether they work without credentials (anonymous) and whether they are
//! unsafe for unattended use (destructive).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::agent::Agent;
use crate::agents;
use crate::error::SourceError;

/// Builds a fresh adapter instance.
pub type AgentFactory = Arc<dyn Fn() -> Arc<dyn Agent> + Send + Sync>;

/// Traits of a registered source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceFlags {
    /// Usable without credentials.
    pub anonymous: bool,
    /// Refused on its own and skipped during runs.
    pub destructive: bool,
}

impl SourceFlags {
    /// Needs credentials.
    pub const KEYED: Self = Self {
        anonymous: false,
        destructive: false,
    };

    /// Works without credentials.
    pub const ANONYMOUS: Self = Self {
        anonymous: true,
        destructive: false,
    };

    /// Works without credentials but must not run unattended.
    pub const DESTRUCTIVE: Self = Self {
        anonymous: true,
        destructive: true,
    };
}

#[derive(Clone)]
struct Registration {
    flags: SourceFlags,
    factory: AgentFactory,
}

/// A source selected for a run.
#[derive(Clone)]
pub struct ResolvedSource {
    /// Registry name.
    pub name: String,
    /// Registration flags.
    pub flags: SourceFlags,
    /// A fresh adapter instance.
    pub agent: Arc<dyn Agent>,
}

impl fmt::Debug for ResolvedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedSource")
            .field("name", &self.name)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

/// Registry of available sources.
#[derive(Clone, Default)]
pub struct Registry {
    entries: BTreeMap<String, Registration>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(name, reg)| (name, reg.flags)))
            .finish()
    }
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in source.
    pub fn with_builtin_sources() -> Self {
        let mut registry = Self::new();
        for (name, flags, factory) in agents::builtin() {
            if let Err(err) = registry.register(name, flags, factory) {
                tracing::warn!(source = name, error = %err, "skipping built-in source");
                debug_assert!(false, "duplicate built-in source {name}");
            }
        }
        registry
    }

    /// Register a source.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Config`] if `name` is already registered.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        flags: SourceFlags,
        factory: AgentFactory,
    ) -> Result<(), SourceError> {
        let name = name.into();
        if self.entries.contains_key(&name) {
            return Err(SourceError::Config(format!(
                "source {name} is already registered"
            )));
        }
        self.entries.insert(name, Registration { flags, factory });
        Ok(())
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Flags of `name`, if registered.
    pub fn flags(&self, name: &str) -> Option<SourceFlags> {
        self.entries.get(name).map(|reg| reg.flags)
    }

    /// Instantiate the requested sources, in request order.
    ///
    /// Names are trimmed and lowercased; unknown names are logged and
    /// skipped; repeated names resolve once.
    pub fn resolve<S: AsRef<str>>(&self, names: &[S]) -> Vec<ResolvedSource> {
        let mut resolved: Vec<ResolvedSource> = Vec::new();
        for raw in names {
            let name = raw.as_ref().trim().to_ascii_lowercase();
            if name.is_empty() || resolved.iter().any(|r| r.name == name) {
                continue;
            }
            match self.entries.get(&name) {
                Some(reg) => resolved.push(ResolvedSource {
                    agent: (reg.factory)(),
                    flags: reg.flags,
                    name,
                }),
                None => tracing::warn!(source = %name, "unknown source, skipping"),
            }
        }
        resolved
    }

    /// Every registered source name, sorted.
    pub fn all_sources(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// Sources usable without credentials, sorted.
    pub fn anonymous_sources(&self) -> Vec<&str> {
        self.filtered(|flags| flags.anonymous)
    }

    /// Destructive sources, sorted.
    pub fn destructive_sources(&self) -> Vec<&str> {
        self.filtered(|flags| flags.destructive)
    }

    fn filtered(&self, keep: impl Fn(SourceFlags) -> bool) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, reg)| keep(reg.flags))
            .map(|(name, _)| name.as_str())
            .collect()
    }
}
