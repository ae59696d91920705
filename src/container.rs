//! Dependency container
//!
//! A string-keyed registry of constant values and factories. Factories
//! declare the names they depend on; resolution walks those names depth
//! first, caches every instance for the life of the container and rejects
//! cycles instead of recursing forever.
//!
//! Callers never introspect anything at runtime: the typed accessors
//! ([`Container::get`], [`Resolved::get`]) downcast to the concrete type and
//! the application wires itself in [`crate::AppState::from_container`].

use std::any::{Any, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use thiserror::Error;

/// Dependency names used by the application wiring.
pub mod names {
    pub const CONFIG: &str = "config";
    pub const DATABASE: &str = "db";
    pub const HTTP_CLIENT: &str = "http_client";
    pub const GITHUB: &str = "github";
    pub const SESSION_CODEC: &str = "session_codec";
    pub const CSRF_GUARD: &str = "csrf_guard";
    pub const USERS: &str = "users";
    pub const REPOS: &str = "repos";
    pub const MODELS: &str = "models";
}

type Instance = Arc<dyn Any + Send + Sync>;
type Factory = Box<dyn Fn(&Resolved) -> anyhow::Result<Instance> + Send + Sync>;

/// Container errors
///
/// All of these are fatal when raised during startup wiring.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("dependency `{name}` not found (requested by {})", format_chain(.chain))]
    DependencyNotFound { name: String, chain: Vec<String> },

    #[error("circular dependency: {}", .chain.join(" -> "))]
    CircularDependency { chain: Vec<String> },

    #[error("dependency `{name}` is already registered")]
    DuplicateRegistration { name: String },

    #[error("dependency `{name}` is not a `{expected}`")]
    TypeMismatch {
        name: String,
        expected: &'static str,
    },

    #[error("factory for `{name}` failed: {source}")]
    Factory {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

fn format_chain(chain: &[String]) -> String {
    if chain.is_empty() {
        "<root>".to_string()
    } else {
        chain.join(" -> ")
    }
}

/// How an entry was registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Constant,
    Factory,
}

struct Entry {
    kind: EntryKind,
    deps: Vec<String>,
    build: Factory,
    instance: OnceLock<Instance>,
}

/// Process-wide dependency registry
pub struct Container {
    entries: HashMap<String, Entry>,
    /// Serializes first resolutions so each factory runs at most once.
    resolving: Mutex<()>,
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.entries.keys().collect();
        names.sort();
        f.debug_struct("Container").field("entries", &names).finish()
    }
}

impl Container {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            resolving: Mutex::new(()),
        }
    }

    /// Register a constant value under `name`.
    pub fn register_value<T>(&mut self, name: &str, value: T) -> Result<(), ContainerError>
    where
        T: Any + Send + Sync,
    {
        let instance: Instance = Arc::new(value);
        let cached = instance.clone();
        let slot = OnceLock::new();
        let _ = slot.set(cached);

        self.insert(
            name,
            Entry {
                kind: EntryKind::Constant,
                deps: Vec::new(),
                build: Box::new(move |_| Ok(instance.clone())),
                instance: slot,
            },
        )
    }

    /// Register a factory under `name`.
    ///
    /// `deps` lists the names the factory reads from its [`Resolved`]
    /// argument, in resolution order. The factory is invoked on first
    /// access only.
    pub fn register_factory<T, F>(
        &mut self,
        name: &str,
        deps: &[&str],
        factory: F,
    ) -> Result<(), ContainerError>
    where
        T: Any + Send + Sync,
        F: Fn(&Resolved) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.insert(
            name,
            Entry {
                kind: EntryKind::Factory,
                deps: deps.iter().map(|dep| dep.to_string()).collect(),
                build: Box::new(move |resolved| {
                    factory(resolved).map(|value| Arc::new(value) as Instance)
                }),
                instance: OnceLock::new(),
            },
        )
    }

    fn insert(&mut self, name: &str, entry: Entry) -> Result<(), ContainerError> {
        if self.entries.contains_key(name) {
            return Err(ContainerError::DuplicateRegistration {
                name: name.to_string(),
            });
        }
        self.entries.insert(name.to_string(), entry);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn kind(&self, name: &str) -> Option<EntryKind> {
        self.entries.get(name).map(|entry| entry.kind)
    }

    /// Resolve `name` and downcast it to `T`.
    ///
    /// Repeated calls return the same `Arc`.
    pub fn get<T>(&self, name: &str) -> Result<Arc<T>, ContainerError>
    where
        T: Any + Send + Sync,
    {
        let instance = self.instance(name)?;
        downcast(name, instance)
    }

    /// Resolve every name in `deps` and invoke `f` with them.
    pub fn resolve<R>(
        &self,
        deps: &[&str],
        f: impl FnOnce(&Resolved) -> R,
    ) -> Result<R, ContainerError> {
        let resolved = {
            let _guard = self.resolving.lock().unwrap_or_else(PoisonError::into_inner);
            let mut chain = Vec::new();
            let mut resolved = Resolved::default();
            for dep in deps {
                let instance = self.resolve_with_chain(dep, &mut chain)?;
                resolved.instances.insert(dep.to_string(), instance);
            }
            resolved
        };

        Ok(f(&resolved))
    }

    fn instance(&self, name: &str) -> Result<Instance, ContainerError> {
        if let Some(instance) = self
            .entries
            .get(name)
            .and_then(|entry| entry.instance.get())
        {
            return Ok(instance.clone());
        }

        let _guard = self.resolving.lock().unwrap_or_else(PoisonError::into_inner);
        self.resolve_with_chain(name, &mut Vec::new())
    }

    fn resolve_with_chain(
        &self,
        name: &str,
        chain: &mut Vec<String>,
    ) -> Result<Instance, ContainerError> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| ContainerError::DependencyNotFound {
                name: name.to_string(),
                chain: chain.clone(),
            })?;

        if chain.iter().any(|requested| requested == name) {
            let mut cycle = chain.clone();
            cycle.push(name.to_string());
            return Err(ContainerError::CircularDependency { chain: cycle });
        }

        if let Some(instance) = entry.instance.get() {
            return Ok(instance.clone());
        }

        chain.push(name.to_string());
        let mut resolved = Resolved::default();
        for dep in &entry.deps {
            let instance = self.resolve_with_chain(dep, chain)?;
            resolved.instances.insert(dep.clone(), instance);
        }
        chain.pop();

        let built = (entry.build)(&resolved).map_err(|source| ContainerError::Factory {
            name: name.to_string(),
            source,
        })?;
        let instance = entry.instance.get_or_init(|| built).clone();

        tracing::debug!(dependency = name, deps = ?entry.deps, "Dependency resolved");
        Ok(instance)
    }
}

/// Dependencies handed to a factory or a [`Container::resolve`] callback.
#[derive(Default)]
pub struct Resolved {
    instances: HashMap<String, Instance>,
}

impl Resolved {
    /// Fetch a declared dependency by name.
    ///
    /// Only names listed in the factory's `deps` are present.
    pub fn get<T>(&self, name: &str) -> Result<Arc<T>, ContainerError>
    where
        T: Any + Send + Sync,
    {
        let instance = self.instances.get(name).cloned().ok_or_else(|| {
            ContainerError::DependencyNotFound {
                name: name.to_string(),
                chain: Vec::new(),
            }
        })?;
        downcast(name, instance)
    }
}

fn downcast<T>(name: &str, instance: Instance) -> Result<Arc<T>, ContainerError>
where
    T: Any + Send + Sync,
{
    instance
        .downcast::<T>()
        .map_err(|_| ContainerError::TypeMismatch {
            name: name.to_string(),
            expected: type_name::<T>(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Greeting(String);

    #[test]
    fn get_returns_same_instance() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let mut container = Container::new();
        container
            .register_value("name", "trainyard".to_string())
            .unwrap();
        container
            .register_factory("greeting", &["name"], move |deps| {
                counter.fetch_add(1, Ordering::SeqCst);
                let name = deps.get::<String>("name")?;
                Ok(Greeting(format!("hello {name}")))
            })
            .unwrap();

        let first = container.get::<Greeting>("greeting").unwrap();
        let second = container.get::<Greeting>("greeting").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.0, "hello trainyard");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn constant_values_are_identity_stable() {
        let mut container = Container::new();
        container.register_value("port", 8080_u16).unwrap();

        let first = container.get::<u16>("port").unwrap();
        let second = container.get::<u16>("port").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(container.kind("port"), Some(EntryKind::Constant));
    }

    #[test]
    fn dependencies_resolve_before_dependents() {
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut container = Container::new();
        let log = order.clone();
        container
            .register_factory("app", &["db", "cache"], move |deps| {
                deps.get::<u8>("db")?;
                deps.get::<u16>("cache")?;
                log.lock().unwrap().push("app");
                Ok(())
            })
            .unwrap();
        let log = order.clone();
        container
            .register_factory("db", &[], move |_| {
                log.lock().unwrap().push("db");
                Ok(1_u8)
            })
            .unwrap();
        let log = order.clone();
        container
            .register_factory("cache", &["db"], move |_| {
                log.lock().unwrap().push("cache");
                Ok(2_u16)
            })
            .unwrap();

        container.get::<()>("app").unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["db", "cache", "app"]);
    }

    #[test]
    fn unregistered_name_is_not_found() {
        let container = Container::new();
        let error = container.get::<String>("missing").unwrap_err();
        assert!(matches!(
            error,
            ContainerError::DependencyNotFound { ref name, .. } if name == "missing"
        ));
    }

    #[test]
    fn missing_transitive_dependency_names_the_chain() {
        let mut container = Container::new();
        container
            .register_factory("repos", &["github"], |_| Ok(()))
            .unwrap();
        container
            .register_factory("github", &["http_client"], |_| Ok(()))
            .unwrap();

        let error = container.get::<()>("repos").unwrap_err();
        match error {
            ContainerError::DependencyNotFound { name, chain } => {
                assert_eq!(name, "http_client");
                assert_eq!(chain, vec!["repos".to_string(), "github".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn self_reference_is_circular() {
        let mut container = Container::new();
        container
            .register_factory("loop", &["loop"], |_| Ok(()))
            .unwrap();

        let error = container.get::<()>("loop").unwrap_err();
        assert!(matches!(
            error,
            ContainerError::CircularDependency { ref chain } if chain == &["loop", "loop"]
        ));
    }

    #[test]
    fn indirect_cycle_is_circular() {
        let mut container = Container::new();
        container.register_factory("a", &["b"], |_| Ok(())).unwrap();
        container.register_factory("b", &["c"], |_| Ok(())).unwrap();
        container.register_factory("c", &["a"], |_| Ok(())).unwrap();

        let error = container.get::<()>("a").unwrap_err();
        assert_eq!(error.to_string(), "circular dependency: a -> b -> c -> a");
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut container = Container::new();
        container.register_value("config", 1_u8).unwrap();
        let error = container.register_value("config", 2_u8).unwrap_err();
        assert!(matches!(error, ContainerError::DuplicateRegistration { .. }));
    }

    #[test]
    fn wrong_type_is_a_mismatch() {
        let mut container = Container::new();
        container.register_value("port", 8080_u16).unwrap();
        let error = container.get::<String>("port").unwrap_err();
        assert!(matches!(error, ContainerError::TypeMismatch { .. }));
    }

    #[test]
    fn factory_failure_is_reported_and_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let mut container = Container::new();
        container
            .register_factory("flaky", &[], move |_| -> anyhow::Result<u8> {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("not today")
            })
            .unwrap();

        assert!(matches!(
            container.get::<u8>("flaky"),
            Err(ContainerError::Factory { .. })
        ));
        assert!(container.get::<u8>("flaky").is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn resolve_invokes_callback_with_declared_names() {
        let mut container = Container::new();
        container.register_value("host", "127.0.0.1".to_string()).unwrap();
        container.register_value("port", 8080_u16).unwrap();

        let addr = container
            .resolve(&["host", "port"], |deps| {
                let host = deps.get::<String>("host").unwrap();
                let port = deps.get::<u16>("port").unwrap();
                format!("{host}:{port}")
            })
            .unwrap();
        assert_eq!(addr, "127.0.0.1:8080");
    }

    #[test]
    fn concurrent_first_resolution_runs_factory_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let mut container = Container::new();
        container
            .register_factory("slow", &[], move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(std::time::Duration::from_millis(20));
                Ok(42_u32)
            })
            .unwrap();
        let container = Arc::new(container);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let container = container.clone();
                std::thread::spawn(move || container.get::<u32>("slow").unwrap())
            })
            .collect();
        let values: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(values.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }
}
