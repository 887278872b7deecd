//! Native call surface and lazy library handle.
//!
//! A backend library exports a set of named functions. `CallSurface::link`
//! binds every function a client declares: exported ones directly, missing
//! ones to a stub that returns 0, with a warning, so an older library
//! still links and the caller finds out at call time rather than at load.

use evbridge_core::error::{CoreError, Result};
use evbridge_core::frame::{CallFrame, NativeFn};

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Symbols exported by a loaded library.
#[derive(Default, Clone)]
pub struct Exports {
    symbols: HashMap<String, NativeFn>,
}

impl Exports {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) an exported function.
    pub fn export<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&CallFrame) -> i32 + Send + Sync + 'static,
    {
        self.symbols.insert(name.to_string(), Arc::new(f));
        self
    }

    pub fn get(&self, name: &str) -> Option<&NativeFn> {
        self.symbols.get(name)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// Functions a client may call, each bound or stubbed.
pub struct CallSurface {
    library: String,
    functions: HashMap<&'static str, NativeFn>,
    stubbed: Vec<&'static str>,
}

impl CallSurface {
    pub fn link(library: impl Into<String>, declared: &[&'static str], exports: &Exports) -> Self {
        let library = library.into();
        let mut functions = HashMap::with_capacity(declared.len());
        let mut stubbed = Vec::new();

        for &name in declared {
            let f = match exports.get(name) {
                Some(f) => f.clone(),
                None => {
                    tracing::warn!(function = name, library = %library, "unable to detect function, setting as no-op");
                    stubbed.push(name);
                    noop()
                }
            };
            functions.insert(name, f);
        }

        tracing::debug!(library = %library, bound = declared.len() - stubbed.len(), stubbed = stubbed.len(), "call surface linked");
        Self {
            library,
            functions,
            stubbed,
        }
    }

    pub fn library(&self) -> &str {
        &self.library
    }

    /// The bound function for `name`, or `None` if it was never declared.
    pub fn get(&self, name: &str) -> Option<NativeFn> {
        self.functions.get(name).cloned()
    }

    /// Like `get`, but an undeclared name yields a no-op stub.
    pub fn function(&self, name: &str) -> NativeFn {
        match self.get(name) {
            Some(f) => f,
            None => {
                tracing::warn!(function = name, library = %self.library, "call to undeclared function ignored");
                noop()
            }
        }
    }

    pub fn call(&self, name: &str, frame: &CallFrame) -> i32 {
        (self.function(name))(frame)
    }

    pub fn is_stubbed(&self, name: &str) -> bool {
        self.stubbed.iter().any(|s| *s == name)
    }

    pub fn stubbed(&self) -> &[&'static str] {
        &self.stubbed
    }
}

impl fmt::Debug for CallSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallSurface")
            .field("library", &self.library)
            .field("functions", &self.functions.len())
            .field("stubbed", &self.stubbed)
            .finish()
    }
}

fn noop() -> NativeFn {
    Arc::new(|_: &CallFrame| 0)
}

type Loader = Box<dyn Fn() -> Result<CallSurface> + Send + Sync>;

/// A library loaded at most once, on first use.
///
/// Passed explicitly to client constructors; every client built from the
/// same handle shares one `CallSurface`.
pub struct LibraryHandle {
    name: String,
    loader: Loader,
    surface: OnceLock<Arc<CallSurface>>,
}

impl LibraryHandle {
    pub fn new<F>(name: impl Into<String>, loader: F) -> Self
    where
        F: Fn() -> Result<CallSurface> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            loader: Box::new(loader),
            surface: OnceLock::new(),
        }
    }

    /// Handle around an already linked surface.
    pub fn linked(surface: CallSurface) -> Self {
        let handle = Self::new(surface.library().to_string(), || {
            Err(CoreError::Library("surface already linked".into()))
        });
        let _ = handle.surface.set(Arc::new(surface));
        handle
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_loaded(&self) -> bool {
        self.surface.get().is_some()
    }

    /// The linked surface, loading it on first call.
    ///
    /// A failed load is not cached; the next call tries again.
    pub fn surface(&self) -> Result<Arc<CallSurface>> {
        if let Some(surface) = self.surface.get() {
            return Ok(surface.clone());
        }
        let loaded = Arc::new((self.loader)()?);
        tracing::info!(library = %self.name, "native library loaded");
        // A concurrent loader may have won; keep whichever landed first.
        Ok(self.surface.get_or_init(|| loaded).clone())
    }
}

impl fmt::Debug for LibraryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LibraryHandle")
            .field("name", &self.name)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_missing_functions_are_stubbed() {
        let exports = Exports::new().export("get_all", |_| 7);
        let surface = CallSurface::link("libtest", &["get_all", "put"], &exports);

        assert_eq!(surface.call("get_all", &CallFrame::new()), 7);
        assert_eq!(surface.call("put", &CallFrame::new()), 0);
        assert!(surface.is_stubbed("put"));
        assert!(!surface.is_stubbed("get_all"));
        assert!(surface.get("info").is_none());
        assert_eq!(surface.call("info", &CallFrame::new()), 0);
    }

    #[test]
    fn test_library_loads_once() {
        let loads = Arc::new(AtomicUsize::new(0));
        let l = loads.clone();
        let handle = LibraryHandle::new("libtest", move || {
            l.fetch_add(1, Ordering::SeqCst);
            Ok(CallSurface::link("libtest", &["init"], &Exports::new()))
        });
        assert!(!handle.is_loaded());

        let a = handle.surface().unwrap();
        let b = handle.surface().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_load_retries() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let a = attempts.clone();
        let handle = LibraryHandle::new("libflaky", move || {
            if a.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(CoreError::Library("not found".into()))
            } else {
                Ok(CallSurface::link("libflaky", &[], &Exports::new()))
            }
        });
        assert!(matches!(handle.surface(), Err(CoreError::Library(_))));
        assert!(handle.surface().is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
