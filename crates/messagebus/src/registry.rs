// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Backend module registry.
//!
//! Resolves a backend module name (`libplugin-<kind>`) to a cached
//! [`BackendFactory`]. Modules are registration-table entries rather than
//! shared objects: each one exports named entry points, and the registry
//! resolves [`PLUGIN_ENTRY_POINT`] from the first module found.
//!
//! # Architecture
//!
//! ```text
//! PluginRegistry (static global, or private via PluginRegistry::new)
//! +-- runtime: Mutex<HashMap<name, Module>>     searched first
//! +-- builtin: HashMap<name, Module>            compiled in (feature-gated)
//! +-- cache:   Mutex<HashMap<name, Arc<BackendFactory>>>
//! ```
//!
//! A loaded module stays cached for the lifetime of the registry; later
//! registrations under the same name do not replace it.

use crate::backend::Backend;
use crate::config::{PLUGIN_ENTRY_POINT, PLUGIN_PREFIX};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Entry point exported by a backend module: builds an unconnected backend.
pub type EntryPoint = Arc<dyn Fn() -> Box<dyn Backend> + Send + Sync>;

/// Where a module was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchLocation {
    /// Modules added with [`PluginRegistry::register_module`].
    Runtime,
    /// Modules compiled into this crate.
    Builtin,
}

/// Search order; the first location holding a module wins.
const SEARCH_ORDER: [SearchLocation; 2] = [SearchLocation::Runtime, SearchLocation::Builtin];

/// A backend module and the symbols it exports.
#[derive(Clone)]
pub struct Module {
    name: String,
    symbols: HashMap<String, EntryPoint>,
}

impl Module {
    /// Empty module named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            symbols: HashMap::new(),
        }
    }

    /// Export `entry` under `symbol`.
    pub fn export<F>(mut self, symbol: impl Into<String>, entry: F) -> Self
    where
        F: Fn() -> Box<dyn Backend> + Send + Sync + 'static,
    {
        self.symbols.insert(symbol.into(), Arc::new(entry));
        self
    }

    /// Export `entry` under the standard entry point name.
    pub fn with_entry_point<F>(name: impl Into<String>, entry: F) -> Self
    where
        F: Fn() -> Box<dyn Backend> + Send + Sync + 'static,
    {
        Self::new(name).export(PLUGIN_ENTRY_POINT, entry)
    }

    /// Module name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn resolve(&self, symbol: &str) -> Option<EntryPoint> {
        self.symbols.get(symbol).cloned()
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut symbols: Vec<&String> = self.symbols.keys().collect();
        symbols.sort();
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("symbols", &symbols)
            .finish()
    }
}

/// Resolved entry point of a loaded module.
pub struct BackendFactory {
    module: String,
    location: SearchLocation,
    entry: EntryPoint,
}

impl BackendFactory {
    /// Build a new, unconnected backend.
    pub fn instantiate(&self) -> Box<dyn Backend> {
        (self.entry)()
    }

    /// Name of the module this factory was loaded from.
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Location the module was found in.
    pub fn location(&self) -> SearchLocation {
        self.location
    }
}

impl fmt::Debug for BackendFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendFactory")
            .field("module", &self.module)
            .field("location", &self.location)
            .finish()
    }
}

/// Registry of backend modules with a load cache.
pub struct PluginRegistry {
    runtime: Mutex<HashMap<String, Module>>,
    builtin: HashMap<String, Module>,
    cache: Mutex<HashMap<String, Arc<BackendFactory>>>,
}

impl PluginRegistry {
    /// Registry holding only the builtin modules.
    pub fn new() -> Self {
        let builtin = builtin_modules()
            .into_iter()
            .map(|module| (module.name.clone(), module))
            .collect();
        Self {
            runtime: Mutex::new(HashMap::new()),
            builtin,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Process-wide registry.
    pub fn global() -> &'static PluginRegistry {
        static REGISTRY: OnceLock<PluginRegistry> = OnceLock::new();
        REGISTRY.get_or_init(PluginRegistry::new)
    }

    /// Add `module` to the runtime location, shadowing any builtin module of
    /// the same name. Has no effect on a module that is already loaded.
    pub fn register_module(&self, module: Module) {
        if !module.name.starts_with(PLUGIN_PREFIX) {
            log::warn!(
                "Backend module '{}' does not follow the '{}<kind>' naming",
                module.name,
                PLUGIN_PREFIX
            );
        }
        if self.is_loaded(&module.name) {
            log::warn!(
                "Backend module '{}' already loaded, cached factory kept",
                module.name
            );
        } else {
            log::debug!("Registered backend module '{}'", module.name);
        }
        self.runtime.lock().insert(module.name.clone(), module);
    }

    /// Load module `name` and resolve its entry point.
    ///
    /// Repeated loads return the same cached factory.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if no search location holds the module
    /// - [`Error::Symbol`] if the module does not export [`PLUGIN_ENTRY_POINT`]
    pub fn load(&self, name: &str) -> Result<Arc<BackendFactory>> {
        let mut cache = self.cache.lock();
        if let Some(factory) = cache.get(name) {
            return Ok(Arc::clone(factory));
        }

        let (location, module) = self
            .find(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        let entry = module
            .resolve(PLUGIN_ENTRY_POINT)
            .ok_or_else(|| Error::Symbol {
                module: name.to_string(),
                symbol: PLUGIN_ENTRY_POINT.to_string(),
            })?;

        let factory = Arc::new(BackendFactory {
            module: name.to_string(),
            location,
            entry,
        });
        cache.insert(name.to_string(), Arc::clone(&factory));
        log::debug!("Loaded backend module '{}' from {:?} location", name, location);
        Ok(factory)
    }

    /// True if `name` has been loaded.
    pub fn is_loaded(&self, name: &str) -> bool {
        self.cache.lock().contains_key(name)
    }

    /// Names of all loaded modules, sorted.
    pub fn loaded_modules(&self) -> Vec<String> {
        let mut names: Vec<String> = self.cache.lock().keys().cloned().collect();
        names.sort();
        names
    }

    fn find(&self, name: &str) -> Option<(SearchLocation, Module)> {
        SEARCH_ORDER.iter().find_map(|&location| {
            let module = match location {
                SearchLocation::Runtime => self.runtime.lock().get(name).cloned(),
                SearchLocation::Builtin => self.builtin.get(name).cloned(),
            };
            module.map(|module| (location, module))
        })
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builtin: Vec<&String> = self.builtin.keys().collect();
        builtin.sort();
        f.debug_struct("PluginRegistry")
            .field("builtin", &builtin)
            .field("loaded", &self.loaded_modules())
            .finish()
    }
}

fn builtin_modules() -> Vec<Module> {
    #[allow(unused_mut)]
    let mut modules = Vec::new();

    #[cfg(feature = "inproc")]
    {
        use crate::broker::BrokerBackend;
        use crate::transport::inproc::InprocDriver;

        modules.push(Module::with_entry_point(
            format!("{}inproc", PLUGIN_PREFIX),
            || Box::new(BrokerBackend::new(InprocDriver)),
        ));
    }

    modules
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Listener;
    use crate::message::Message;
    use std::time::Duration;

    /// Backend that accepts everything and does nothing.
    struct NullBackend;

    impl Backend for NullBackend {
        fn connect(&self, _connection: &str) -> Result<()> {
            Ok(())
        }
        fn request(&self, _queue: &str, _message: Message, _timeout: Duration) -> Result<Message> {
            Ok(Message::new())
        }
        fn subscribe(&self, _topic: &str, _listener: Listener) -> Result<()> {
            Ok(())
        }
        fn unsubscribe(&self, _topic: &str) -> Result<()> {
            Ok(())
        }
        fn publish(&self, _topic: &str, _message: Message) -> Result<()> {
            Ok(())
        }
        fn receive(&self, _queue: &str, _listener: Listener) -> Result<()> {
            Ok(())
        }
        fn send_reply(&self, _queue: &str, _message: Message) -> Result<()> {
            Ok(())
        }
        fn send_request(&self, _queue: &str, _message: Message) -> Result<()> {
            Ok(())
        }
        fn send_request_with_listener(
            &self,
            _queue: &str,
            _message: Message,
            _listener: Listener,
        ) -> Result<()> {
            Ok(())
        }
        fn identity(&self) -> String {
            "null".to_string()
        }
        fn close(&self) {}
    }

    fn null_module(name: &str) -> Module {
        Module::with_entry_point(name, || Box::new(NullBackend))
    }

    #[test]
    fn repeated_load_returns_cached_factory() {
        let registry = PluginRegistry::new();
        registry.register_module(null_module("libplugin-null"));

        let first = registry.load("libplugin-null").unwrap();
        let second = registry.load("libplugin-null").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.location(), SearchLocation::Runtime);
        assert_eq!(registry.loaded_modules(), vec!["libplugin-null".to_string()]);
    }

    #[test]
    fn unknown_module_is_not_found_without_side_effects() {
        let registry = PluginRegistry::new();
        let err = registry.load("libplugin-nonexistent").unwrap_err();
        assert_eq!(err, Error::NotFound("libplugin-nonexistent".into()));
        assert!(!registry.is_loaded("libplugin-nonexistent"));
        assert!(registry.loaded_modules().is_empty());
    }

    #[test]
    fn module_without_entry_point_is_symbol_error() {
        let registry = PluginRegistry::new();
        registry.register_module(Module::new("libplugin-empty").export("other_symbol", || {
            Box::new(NullBackend)
        }));

        assert_eq!(
            registry.load("libplugin-empty").unwrap_err(),
            Error::Symbol {
                module: "libplugin-empty".into(),
                symbol: PLUGIN_ENTRY_POINT.into(),
            }
        );
        assert!(!registry.is_loaded("libplugin-empty"));
    }

    #[test]
    fn loaded_module_is_not_replaced() {
        let registry = PluginRegistry::new();
        registry.register_module(null_module("libplugin-null"));
        let first = registry.load("libplugin-null").unwrap();

        registry.register_module(Module::new("libplugin-null"));
        let again = registry.load("libplugin-null").unwrap();
        assert!(Arc::ptr_eq(&first, &again));
    }

    #[cfg(feature = "inproc")]
    #[test]
    fn builtin_inproc_module_is_available() {
        let registry = PluginRegistry::new();
        let factory = registry.load("libplugin-inproc").unwrap();
        assert_eq!(factory.location(), SearchLocation::Builtin);
        assert_eq!(factory.instantiate().identity(), "");
    }

    #[cfg(feature = "inproc")]
    #[test]
    fn runtime_module_shadows_builtin() {
        let registry = PluginRegistry::new();
        registry.register_module(null_module("libplugin-inproc"));

        let factory = registry.load("libplugin-inproc").unwrap();
        assert_eq!(factory.location(), SearchLocation::Runtime);
        assert_eq!(factory.instantiate().identity(), "null");
    }

    #[test]
    fn global_registry_is_shared() {
        assert!(std::ptr::eq(PluginRegistry::global(), PluginRegistry::global()));
    }
}
