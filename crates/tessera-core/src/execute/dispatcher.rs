//! Backend registry and failover.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashMap;
use tracing::{info, warn};

use super::context::UserIo;
use super::control::ExecutionControl;
use super::direct::DirectFactory;
use super::remote::RemoteFactory;
use super::spec::{ExecutionSpec, SpecEntry};
use crate::error::{Error, FailoverAttempt, Result};

/// What a backend factory gets besides its spec parameters.
#[derive(Clone)]
pub struct LaunchEnv {
    pub io: UserIo,
    /// Default bound on waiting for a backend to come up.
    pub launch_timeout: Duration,
    /// Worker binary override from configuration.
    pub worker_path: Option<PathBuf>,
}

impl LaunchEnv {
    pub fn new(io: UserIo) -> Self {
        Self {
            io,
            launch_timeout: Duration::from_millis(5000),
            worker_path: None,
        }
    }
}

/// Creates backends of one family.
pub trait BackendFactory: Send + Sync {
    /// Name used in spec strings.
    fn name(&self) -> &str;

    /// Start a backend. `entry` holds the parameters written in the spec.
    fn launch(&self, entry: &SpecEntry, env: &LaunchEnv) -> Result<Box<dyn ExecutionControl>>;
}

/// A started backend plus the chain entries that failed before it.
pub struct Started {
    pub control: Box<dyn ExecutionControl>,
    /// Name of the entry that succeeded.
    pub name: String,
    pub failed: Vec<FailoverAttempt>,
}

/// Named backend factories and the chain used when a spec is empty.
#[derive(Clone)]
pub struct BackendRegistry {
    factories: FxHashMap<String, Arc<dyn BackendFactory>>,
    default_chain: Vec<String>,
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl BackendRegistry {
    /// A registry with no factories.
    pub fn empty() -> Self {
        Self {
            factories: FxHashMap::default(),
            default_chain: Vec::new(),
        }
    }

    /// `remote` and `direct` (alias `local`), tried in that order.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        let direct: Arc<dyn BackendFactory> = Arc::new(DirectFactory);
        registry.register(RemoteFactory);
        registry.register_arc(direct.clone());
        registry.factories.insert("local".to_string(), direct);
        registry.default_chain = vec!["remote".to_string(), "direct".to_string()];
        registry
    }

    pub fn register(&mut self, factory: impl BackendFactory + 'static) {
        self.register_arc(Arc::new(factory));
    }

    pub fn register_arc(&mut self, factory: Arc<dyn BackendFactory>) {
        self.factories.insert(factory.name().to_string(), factory);
    }

    pub fn set_default_chain(&mut self, names: Vec<String>) {
        self.default_chain = names;
    }

    pub fn default_chain(&self) -> &[String] {
        &self.default_chain
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Resolve every entry's name. Nameless entries take the default chain
    /// name at their position (the last one past its end).
    fn resolve(&self, spec: &ExecutionSpec) -> Result<Vec<(String, SpecEntry)>> {
        let entries = if spec.is_empty() {
            self.default_chain.iter().map(|n| SpecEntry::named(n)).collect()
        } else {
            spec.entries.clone()
        };
        if entries.is_empty() {
            return Err(Error::UnknownBackend("no execution control configured".into()));
        }
        entries
            .into_iter()
            .enumerate()
            .map(|(i, entry)| {
                let name = match &entry.name {
                    Some(name) => name.clone(),
                    None => self
                        .default_chain
                        .get(i)
                        .or_else(|| self.default_chain.last())
                        .cloned()
                        .ok_or_else(|| Error::UnknownBackend("(nameless)".into()))?,
                };
                if !self.contains(&name) {
                    return Err(Error::UnknownBackend(name));
                }
                Ok((name, entry))
            })
            .collect()
    }

    /// Start the first backend of the chain that comes up.
    ///
    /// Names are checked before anything is launched. An invalid parameter
    /// is a configuration error and ends the search at once. Other failures
    /// are logged and recorded; if every entry fails the error lists them all.
    pub fn start(&self, spec: &ExecutionSpec, env: &LaunchEnv) -> Result<Started> {
        let chain = self.resolve(spec)?;
        let mut failed = Vec::new();
        for (name, entry) in chain {
            let Some(factory) = self.factories.get(&name) else {
                return Err(Error::UnknownBackend(name));
            };
            match factory.launch(&entry, env) {
                Ok(control) => {
                    info!(backend = %name, "execution control started");
                    return Ok(Started {
                        control,
                        name,
                        failed,
                    });
                }
                Err(e @ Error::InvalidParameter { .. }) => return Err(e),
                Err(e) => {
                    warn!(backend = %name, "execution control failed to start: {e}");
                    failed.push(FailoverAttempt {
                        name,
                        cause: e.to_string(),
                    });
                }
            }
        }
        Err(Error::FailoverExhausted(failed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Failing {
        name: &'static str,
        launched: Arc<Mutex<Vec<String>>>,
    }

    impl BackendFactory for Failing {
        fn name(&self) -> &str {
            self.name
        }

        fn launch(&self, _entry: &SpecEntry, _env: &LaunchEnv) -> Result<Box<dyn ExecutionControl>> {
            self.launched.lock().unwrap().push(self.name.to_string());
            Err(Error::Launch(format!("{} refuses", self.name)))
        }
    }

    fn registry(launched: &Arc<Mutex<Vec<String>>>) -> BackendRegistry {
        let mut registry = BackendRegistry::with_defaults();
        for name in ["bad1", "bad2"] {
            registry.register(Failing {
                name,
                launched: launched.clone(),
            });
        }
        registry
    }

    #[test]
    fn test_failover_to_direct() {
        let launched: Arc<Mutex<Vec<String>>> = Arc::default();
        let started = registry(&launched)
            .start(&ExecutionSpec::parse("bad1, bad2, direct").unwrap(), &LaunchEnv::new(UserIo::sink()))
            .unwrap();
        assert_eq!(started.name, "direct");
        let names: Vec<_> = started.failed.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["bad1", "bad2"]);
        let mut control = started.control;
        control.close();
    }

    #[test]
    fn test_unknown_name_checked_before_launch() {
        let launched: Arc<Mutex<Vec<String>>> = Arc::default();
        let err = registry(&launched)
            .start(&ExecutionSpec::parse("bad1, nope").unwrap(), &LaunchEnv::new(UserIo::sink()))
            .err()
            .unwrap();
        assert!(matches!(err, Error::UnknownBackend(name) if name == "nope"));
        assert!(launched.lock().unwrap().is_empty());
    }

    #[test]
    fn test_invalid_parameter_is_not_failed_over() {
        let launched: Arc<Mutex<Vec<String>>> = Arc::default();
        let err = registry(&launched)
            .start(
                &ExecutionSpec::parse("bad1, remote(timeout=abc), direct").unwrap(),
                &LaunchEnv::new(UserIo::sink()),
            )
            .err()
            .unwrap();
        assert!(matches!(err, Error::InvalidParameter { ref key, .. } if key == "timeout"));
        assert_eq!(*launched.lock().unwrap(), ["bad1"]);
    }

    #[test]
    fn test_exhausted_lists_every_attempt() {
        let launched: Arc<Mutex<Vec<String>>> = Arc::default();
        let err = registry(&launched)
            .start(&ExecutionSpec::parse("bad1,bad2").unwrap(), &LaunchEnv::new(UserIo::sink()))
            .err()
            .unwrap();
        match err {
            Error::FailoverExhausted(attempts) => {
                assert_eq!(attempts.len(), 2);
                assert_eq!(attempts[0].name, "bad1");
                assert!(attempts[1].cause.contains("bad2 refuses"));
            }
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn test_nameless_entry_takes_default_name() {
        let launched: Arc<Mutex<Vec<String>>> = Arc::default();
        let mut registry = registry(&launched);
        registry.set_default_chain(vec!["bad1".into(), "direct".into()]);
        let resolved = registry
            .resolve(&ExecutionSpec::parse("(x=1), (y=2), (z=3)").unwrap())
            .unwrap();
        let names: Vec<_> = resolved.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["bad1", "direct", "direct"]);
    }

    #[test]
    fn test_local_alias() {
        let registry = BackendRegistry::with_defaults();
        assert!(registry.contains("local"));
        assert_eq!(registry.default_chain(), ["remote", "direct"]);
    }
}
