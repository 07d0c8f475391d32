// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Dynamic library loading for external fused kernels.

use std::collections::HashMap;
use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::Library;
use parking_lot::Mutex;

use crate::core::error::{InferError, Result};

/// Address of a resolved symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSymbol(*const c_void);

// Safety: a symbol address is immutable code/data in a mapped library.
unsafe impl Send for RawSymbol {}
unsafe impl Sync for RawSymbol {}

impl RawSymbol {
    /// Wrap a non-null symbol address.
    pub fn new(address: *const c_void) -> Option<Self> {
        (!address.is_null()).then_some(Self(address))
    }

    pub fn as_ptr(&self) -> *const c_void {
        self.0
    }
}

/// A dynamic library that stays mapped while this value is alive.
pub trait LoadedLibrary: Send + Sync {
    fn path(&self) -> &Path;

    /// Resolve `name`, failing with [`InferError::SymbolNotFound`] if absent.
    fn symbol(&self, name: &str) -> Result<RawSymbol>;
}

/// Opens dynamic libraries by path.
pub trait LibraryLoader: Send + Sync {
    /// Load the library at `path`, failing with [`InferError::LibraryLoad`].
    fn load_library(&self, path: &Path) -> Result<Arc<dyn LoadedLibrary>>;
}

struct DylibLibrary {
    path: PathBuf,
    library: Library,
}

impl LoadedLibrary for DylibLibrary {
    fn path(&self) -> &Path {
        &self.path
    }

    fn symbol(&self, name: &str) -> Result<RawSymbol> {
        let address = unsafe {
            let symbol = self
                .library
                .get::<*const c_void>(name.as_bytes())
                .map_err(|e| {
                    InferError::SymbolNotFound(format!(
                        "'{}' in '{}': {}",
                        name,
                        self.path.display(),
                        e
                    ))
                })?;
            *symbol
        };

        RawSymbol::new(address).ok_or_else(|| {
            InferError::SymbolNotFound(format!(
                "'{}' in '{}' resolved to null",
                name,
                self.path.display()
            ))
        })
    }
}

/// [`LibraryLoader`] backed by `libloading`.
///
/// Each path is opened at most once per loader; the library stays mapped as
/// long as the loader or any resolved function holds it.
#[derive(Default)]
pub struct DylibLoader {
    loaded_libraries: Mutex<HashMap<PathBuf, Arc<DylibLibrary>>>,
}

impl DylibLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct libraries opened so far.
    pub fn loaded_count(&self) -> usize {
        self.loaded_libraries.lock().len()
    }
}

impl LibraryLoader for DylibLoader {
    fn load_library(&self, path: &Path) -> Result<Arc<dyn LoadedLibrary>> {
        let mut loaded = self.loaded_libraries.lock();
        if let Some(library) = loaded.get(path) {
            return Ok(library.clone());
        }

        // Safety: running the library's initializers is the caller's trust
        // decision, made when the path was registered.
        let library = unsafe { Library::new(path) }.map_err(|e| {
            InferError::LibraryLoad(format!("'{}': {}", path.display(), e))
        })?;

        tracing::info!("Loaded fused kernel library '{}'", path.display());

        let library = Arc::new(DylibLibrary {
            path: path.to_path_buf(),
            library,
        });
        loaded.insert(path.to_path_buf(), library.clone());
        Ok(library)
    }
}
