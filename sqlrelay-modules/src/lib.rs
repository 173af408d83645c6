//! The plugin/module boundary: a process-wide registry enforcing
//! single-copy-by-name registration, plus the `lib<name>.so` search-order
//! logic expressed as a pure function over an injected filesystem probe so
//! it is testable without touching a real filesystem.
//!
//! Actually `dlopen`-ing a shared object is out of scope here; a [`Module`]
//! is whatever the host has already linked in or otherwise obtained, and
//! this crate only owns the load-once/registration contract around it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use lazy_static::lazy_static;
use log::{info, warn};

/// The opaque entry-point bundle a module hands back via `GetModuleObject`.
/// Intentionally has no required methods: callers downcast via
/// `std::any::Any` if they need a concrete type.
pub trait ModuleObject: Send + Sync + std::any::Any {
    fn as_any(&self) -> &dyn std::any::Any;
}

/// A module the host can load: required `version`/`get_module_object`
/// symbols, optional `module_init`.
pub trait Module: Send + Sync {
    fn version(&self) -> &str;
    fn get_module_object(&self) -> Arc<dyn ModuleObject>;
    /// Invoked at most once per process, the first time this module is
    /// loaded. Default is a no-op (most modules don't need one).
    fn module_init(&self) {}
}

struct Entry {
    version: String,
    object: Arc<dyn ModuleObject>,
}

/// Process-wide module registry. Written only during load (startup) or
/// unload (shutdown) under a single writer; readers after startup see an
/// immutable snapshot via `find_module`.
pub struct ModuleRegistry {
    entries: RwLock<HashMap<String, Entry>>,
}

impl ModuleRegistry {
    fn new() -> Self {
        ModuleRegistry {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the already-registered module object, if any, without
    /// invoking `module_init` or re-registering.
    pub fn find_module(&self, name: &str) -> Option<Arc<dyn ModuleObject>> {
        self.entries.read().unwrap().get(name).map(|e| e.object.clone())
    }

    /// Loads `module` under `name` if it is not already registered;
    /// otherwise returns the existing registration's object. Guarantees
    /// `module_init` runs at most once per process for a given name.
    pub fn load_module(&self, name: &str, module: &dyn Module) -> Arc<dyn ModuleObject> {
        if let Some(existing) = self.find_module(name) {
            return existing;
        }
        let mut entries = self.entries.write().unwrap();
        if let Some(existing) = entries.get(name) {
            return existing.object.clone();
        }
        module.module_init();
        let object = module.get_module_object();
        let version = module.version().to_string();
        info!("loaded module {}: {}", name, version);
        entries.insert(
            name.to_string(),
            Entry {
                version,
                object: object.clone(),
            },
        );
        object
    }

    pub fn unload_module(&self, name: &str) {
        let mut entries = self.entries.write().unwrap();
        if entries.remove(name).is_none() {
            warn!("unload_module: {} was not registered", name);
        }
    }

    pub fn version_of(&self, name: &str) -> Option<String> {
        self.entries.read().unwrap().get(name).map(|e| e.version.clone())
    }
}

lazy_static! {
    /// The single registry instance for the process; modules are loaded
    /// into it at startup and never concurrently mutated afterward.
    static ref REGISTRY: ModuleRegistry = ModuleRegistry::new();
}

pub fn registry() -> &'static ModuleRegistry {
    &REGISTRY
}

/// Probes whether a path exists, injected so module search order can be
/// unit-tested without touching a real filesystem.
pub trait FilesystemProbe {
    fn exists(&self, path: &str) -> bool;
}

/// Fallback directory baked in when `MAXSCALE_HOME` is unset, carried over
/// from the original loader for documentation purposes; this crate never
/// actually reads from it since dynamic loading itself is out of scope.
pub const DEFAULT_MODULE_HOME: &str = "/usr/local/skysql/MaxScale";

/// Resolves the library path for `module` by search order: `./lib<name>.so`
/// in the current directory, then `$MAXSCALE_HOME/modules/lib<name>.so`,
/// falling back to [`DEFAULT_MODULE_HOME`] when the environment variable is
/// unset. Returns `None` if neither candidate exists per `probe`.
pub fn resolve_module_path(
    module: &str,
    maxscale_home: Option<&str>,
    probe: &dyn FilesystemProbe,
) -> Option<String> {
    let cwd_candidate = format!("./lib{}.so", module);
    if probe.exists(&cwd_candidate) {
        return Some(cwd_candidate);
    }
    let home = maxscale_home.unwrap_or(DEFAULT_MODULE_HOME);
    let home_candidate = format!("{}/modules/lib{}.so", home, module);
    if probe.exists(&home_candidate) {
        return Some(home_candidate);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingObject;
    impl ModuleObject for CountingObject {
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    struct CountingModule {
        init_calls: AtomicUsize,
    }
    impl Module for CountingModule {
        fn version(&self) -> &str {
            "1.0.0-test"
        }
        fn get_module_object(&self) -> Arc<dyn ModuleObject> {
            Arc::new(CountingObject)
        }
        fn module_init(&self) {
            self.init_calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn find_module_before_registration_is_none() {
        let registry = ModuleRegistry::new();
        assert!(registry.find_module("not_loaded_yet").is_none());
    }

    #[test]
    fn load_module_registers_single_copy_by_name() {
        let registry = ModuleRegistry::new();
        let module = CountingModule {
            init_calls: AtomicUsize::new(0),
        };
        registry.load_module("readwritesplit", &module);
        registry.load_module("readwritesplit", &module);
        registry.load_module("readwritesplit", &module);

        assert_eq!(module.init_calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.version_of("readwritesplit").unwrap(), "1.0.0-test");
    }

    struct FakeFs {
        existing: Vec<&'static str>,
    }
    impl FilesystemProbe for FakeFs {
        fn exists(&self, path: &str) -> bool {
            self.existing.contains(&path)
        }
    }

    #[test]
    fn resolves_cwd_candidate_first() {
        let fs = FakeFs {
            existing: vec!["./libauth.so", "/opt/ms/modules/libauth.so"],
        };
        let resolved = resolve_module_path("auth", Some("/opt/ms"), &fs);
        assert_eq!(resolved.as_deref(), Some("./libauth.so"));
    }

    #[test]
    fn falls_back_to_maxscale_home() {
        let fs = FakeFs {
            existing: vec!["/opt/ms/modules/libauth.so"],
        };
        let resolved = resolve_module_path("auth", Some("/opt/ms"), &fs);
        assert_eq!(resolved.as_deref(), Some("/opt/ms/modules/libauth.so"));
    }

    #[test]
    fn falls_back_to_default_home_when_env_unset() {
        let default_candidate = format!("{}/modules/libauth.so", DEFAULT_MODULE_HOME);
        let fs = FakeFs {
            existing: vec![Box::leak(default_candidate.clone().into_boxed_str())],
        };
        let resolved = resolve_module_path("auth", None, &fs);
        assert_eq!(resolved, Some(default_candidate));
    }

    #[test]
    fn none_when_not_found_anywhere() {
        let fs = FakeFs { existing: vec![] };
        assert!(resolve_module_path("auth", Some("/opt/ms"), &fs).is_none());
    }
}
