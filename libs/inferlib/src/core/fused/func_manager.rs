// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Registry of fused compute functions.
//!
//! A fused function is registered either inline, as three callables, or as
//! a path to a dynamic library. Library-backed entries resolve their three
//! symbols on the first [`FusedFuncManager::get_funcs`] and cache the result,
//! so the library is opened and searched at most once per name.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use inferlib_kernel_abi::{
    symbol_names, ComputeFnC, CreateStateFnC, FunctionStateC, KernelApi, KernelContext,
    ReleaseStateFnC, KERNEL_STATUS_OK,
};
use parking_lot::{RwLock, RwLockUpgradableReadGuard};

use crate::core::error::{InferError, Result};
use crate::core::fused::library_loader::{DylibLoader, LibraryLoader, LoadedLibrary};
use crate::core::fused::state::{ComputeContext, FunctionState, FunctionStateGuard};

/// Runs one invocation of a fused function against its state.
pub type ComputeFunc =
    Arc<dyn Fn(FunctionState, *const KernelApi, *mut KernelContext) -> Result<()> + Send + Sync>;

/// Builds the per-node state of a fused function.
pub type CreateFunctionStateFunc =
    Arc<dyn Fn(&ComputeContext) -> Result<FunctionState> + Send + Sync>;

/// Releases a state built by the matching [`CreateFunctionStateFunc`].
pub type DestroyFunctionStateFunc = Arc<dyn Fn(FunctionState) + Send + Sync>;

/// The three entry points of a fused function.
#[derive(Clone)]
pub struct FusedFuncs {
    pub compute: ComputeFunc,
    pub create_state: CreateFunctionStateFunc,
    pub release_state: DestroyFunctionStateFunc,
}

impl FusedFuncs {
    pub fn new(
        compute: ComputeFunc,
        create_state: CreateFunctionStateFunc,
        release_state: DestroyFunctionStateFunc,
    ) -> Self {
        Self {
            compute,
            create_state,
            release_state,
        }
    }

    /// Adapt statically linked C entry points.
    pub fn from_c(
        name: &str,
        create: CreateStateFnC,
        compute: ComputeFnC,
        release: ReleaseStateFnC,
    ) -> Self {
        Self::from_symbols(Arc::new(CSymbols {
            name: name.to_string(),
            create,
            compute,
            release,
            _library: None,
        }))
    }

    fn from_symbols(symbols: Arc<CSymbols>) -> Self {
        let compute_symbols = symbols.clone();
        let compute: ComputeFunc = Arc::new(
            move |state: FunctionState, api: *const KernelApi, ctx: *mut KernelContext| {
                // Safety: the symbol was exported with the ComputeFnC signature.
                let status = unsafe { (compute_symbols.compute)(state.as_raw(), api, ctx) };
                compute_symbols.check("compute", status)
            },
        );

        let create_symbols = symbols.clone();
        let create_state: CreateFunctionStateFunc = Arc::new(move |ctx: &ComputeContext| {
            let mut raw_ctx = ctx.to_raw();
            let mut state: FunctionStateC = std::ptr::null_mut();
            // Safety: raw_ctx borrows ctx for the duration of the call only.
            let status = unsafe { (create_symbols.create)(&mut raw_ctx, &mut state) };
            if let Err(e) = create_symbols.check("create state", status) {
                // A failing kernel may still have handed back a partial state.
                if !state.is_null() {
                    // Safety: state came from the matching create symbol.
                    unsafe { (create_symbols.release)(state) };
                }
                return Err(e);
            }
            Ok(FunctionState::from_raw(state))
        });

        let release_symbols = symbols;
        let release_state: DestroyFunctionStateFunc = Arc::new(move |state: FunctionState| {
            // Safety: state was produced by the matching create symbol.
            unsafe { (release_symbols.release)(state.as_raw()) }
        });

        Self::new(compute, create_state, release_state)
    }

    /// Create the per-node state, wrapped so it is released exactly once.
    pub fn create_state_guarded(&self, ctx: &ComputeContext) -> Result<FunctionStateGuard> {
        let state = (self.create_state)(ctx)?;
        Ok(FunctionStateGuard::new(state, self.release_state.clone()))
    }
}

/// C entry points plus the library that keeps them mapped.
struct CSymbols {
    name: String,
    create: CreateStateFnC,
    compute: ComputeFnC,
    release: ReleaseStateFnC,
    _library: Option<Arc<dyn LoadedLibrary>>,
}

impl CSymbols {
    fn check(&self, phase: &str, status: libc::c_int) -> Result<()> {
        if status == KERNEL_STATUS_OK {
            return Ok(());
        }
        Err(InferError::KernelFailed(format!(
            "{} of '{}' returned status {}",
            phase, self.name, status
        )))
    }
}

enum FuncEntry {
    Unresolved(PathBuf),
    Resolved(FusedFuncs),
}

/// Registry of fused functions by name.
///
/// Registration takes `&mut self` and happens while the session is built.
/// Lookups take `&self` and may run from any number of threads; the first
/// lookup of a library-backed entry locks only that entry while it resolves.
pub struct FusedFuncManager {
    fused_funcs: HashMap<String, RwLock<FuncEntry>>,
    loader: Arc<dyn LibraryLoader>,
}

impl Default for FusedFuncManager {
    fn default() -> Self {
        Self::new()
    }
}

impl FusedFuncManager {
    pub fn new() -> Self {
        Self::with_loader(Arc::new(DylibLoader::new()))
    }

    pub fn with_loader(loader: Arc<dyn LibraryLoader>) -> Self {
        Self {
            fused_funcs: HashMap::new(),
            loader,
        }
    }

    /// Register `name` as backed by the library at `dll_path`.
    ///
    /// Nothing is loaded here; the library is opened on the first `get_funcs`.
    pub fn add_func_info_from_library(
        &mut self,
        name: impl Into<String>,
        dll_path: impl Into<PathBuf>,
    ) -> Result<()> {
        let name = name.into();
        self.check_unregistered(&name)?;

        let dll_path = dll_path.into();
        tracing::info!(
            "[add_func_info] fused function '{}' deferred to '{}'",
            name,
            dll_path.display()
        );
        self.fused_funcs
            .insert(name, RwLock::new(FuncEntry::Unresolved(dll_path)));
        Ok(())
    }

    /// Register `name` with in-process entry points. All three are required.
    pub fn add_func_info(
        &mut self,
        name: impl Into<String>,
        compute: Option<ComputeFunc>,
        create_state: Option<CreateFunctionStateFunc>,
        release_state: Option<DestroyFunctionStateFunc>,
    ) -> Result<()> {
        let name = name.into();
        self.check_unregistered(&name)?;

        let (Some(compute), Some(create_state), Some(release_state)) =
            (compute, create_state, release_state)
        else {
            let err = InferError::NullFunction(name);
            tracing::error!("{}", err);
            return Err(err);
        };

        tracing::info!("[add_func_info] fused function '{}' registered inline", name);
        self.fused_funcs.insert(
            name,
            RwLock::new(FuncEntry::Resolved(FusedFuncs::new(
                compute,
                create_state,
                release_state,
            ))),
        );
        Ok(())
    }

    fn check_unregistered(&self, name: &str) -> Result<()> {
        if self.fused_funcs.contains_key(name) {
            let err = InferError::FuncAlreadyExists(name.to_string());
            tracing::error!("{}", err);
            return Err(err);
        }
        Ok(())
    }

    /// Entry points of `name`, resolving them from its library on first use.
    pub fn get_funcs(&self, name: &str) -> Result<FusedFuncs> {
        let entry = self
            .fused_funcs
            .get(name)
            .ok_or_else(|| InferError::FuncNotFound(name.to_string()))?;

        if let FuncEntry::Resolved(funcs) = &*entry.read() {
            tracing::debug!("[get_funcs] '{}' served from cache", name);
            return Ok(funcs.clone());
        }

        // Only one upgradable reader at a time: a thread that loses the race
        // waits here and then sees the resolved entry.
        let guard = entry.upgradable_read();
        let dll_path = match &*guard {
            FuncEntry::Resolved(funcs) => return Ok(funcs.clone()),
            FuncEntry::Unresolved(dll_path) => dll_path.clone(),
        };

        let funcs = self.resolve(name, &dll_path).inspect_err(|e| {
            tracing::error!("Failed to resolve fused function '{}': {}", name, e);
        })?;

        let mut guard = RwLockUpgradableReadGuard::upgrade(guard);
        *guard = FuncEntry::Resolved(funcs.clone());
        Ok(funcs)
    }

    fn resolve(&self, name: &str, dll_path: &Path) -> Result<FusedFuncs> {
        let library = self.loader.load_library(dll_path)?;
        let [create_name, compute_name, release_name] = symbol_names(name);

        let create = library.symbol(&create_name)?;
        let compute = library.symbol(&compute_name)?;
        let release = library.symbol(&release_name)?;

        tracing::info!(
            "[get_funcs] resolved fused function '{}' from '{}'",
            name,
            library.path().display()
        );

        // Safety: symbols exported under these prefixes follow the kernel ABI.
        let symbols = unsafe {
            CSymbols {
                name: name.to_string(),
                create: std::mem::transmute::<*const libc::c_void, CreateStateFnC>(create.as_ptr()),
                compute: std::mem::transmute::<*const libc::c_void, ComputeFnC>(compute.as_ptr()),
                release: std::mem::transmute::<*const libc::c_void, ReleaseStateFnC>(
                    release.as_ptr(),
                ),
                _library: Some(library),
            }
        };

        Ok(FusedFuncs::from_symbols(Arc::new(symbols)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fused_funcs.contains_key(name)
    }

    /// Whether `name` has entry points available without touching a library.
    pub fn is_resolved(&self, name: &str) -> bool {
        self.fused_funcs
            .get(name)
            .is_some_and(|entry| matches!(&*entry.read(), FuncEntry::Resolved(_)))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fused_funcs.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fused_funcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fused_funcs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn inline_funcs(
        tag: usize,
        hits: Arc<AtomicUsize>,
    ) -> (ComputeFunc, CreateFunctionStateFunc, DestroyFunctionStateFunc) {
        let compute: ComputeFunc = Arc::new(
            move |_: FunctionState, _: *const KernelApi, _: *mut KernelContext| {
                hits.fetch_add(tag, Ordering::SeqCst);
                Ok(())
            },
        );
        let create: CreateFunctionStateFunc =
            Arc::new(|_: &ComputeContext| Ok(FunctionState::null()));
        let release: DestroyFunctionStateFunc = Arc::new(|_: FunctionState| {});
        (compute, create, release)
    }

    struct PanickingLoader;

    impl LibraryLoader for PanickingLoader {
        fn load_library(&self, path: &Path) -> Result<Arc<dyn LoadedLibrary>> {
            panic!("inline entries must not load '{}'", path.display());
        }
    }

    #[test]
    fn test_inline_requires_all_three() {
        let mut manager = FusedFuncManager::with_loader(Arc::new(PanickingLoader));
        let hits = Arc::new(AtomicUsize::new(0));
        let (compute, create, _) = inline_funcs(1, hits);

        let err = manager
            .add_func_info("Fuse1", Some(compute), Some(create), None)
            .unwrap_err();

        assert!(matches!(err, InferError::NullFunction(ref n) if n == "Fuse1"));
        assert!(!manager.contains("Fuse1"));
        assert!(manager.is_empty());
    }

    #[test]
    fn test_inline_never_touches_loader() {
        let mut manager = FusedFuncManager::with_loader(Arc::new(PanickingLoader));
        let hits = Arc::new(AtomicUsize::new(0));
        let (compute, create, release) = inline_funcs(1, hits.clone());
        manager
            .add_func_info("Fuse1", Some(compute), Some(create), Some(release))
            .unwrap();

        assert!(manager.is_resolved("Fuse1"));
        for _ in 0..3 {
            let funcs = manager.get_funcs("Fuse1").unwrap();
            (funcs.compute)(FunctionState::null(), std::ptr::null(), std::ptr::null_mut()).unwrap();
        }
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_duplicate_name_keeps_first_entry() {
        let mut manager = FusedFuncManager::with_loader(Arc::new(PanickingLoader));
        let hits = Arc::new(AtomicUsize::new(0));
        let (compute, create, release) = inline_funcs(1, hits.clone());
        manager
            .add_func_info("Fuse1", Some(compute), Some(create), Some(release))
            .unwrap();

        let err = manager
            .add_func_info_from_library("Fuse1", "lib.so")
            .unwrap_err();
        assert!(matches!(err, InferError::FuncAlreadyExists(_)));

        let (compute, create, release) = inline_funcs(100, hits.clone());
        let err = manager
            .add_func_info("Fuse1", Some(compute), Some(create), Some(release))
            .unwrap_err();
        assert!(matches!(err, InferError::FuncAlreadyExists(_)));

        let funcs = manager.get_funcs("Fuse1").unwrap();
        (funcs.compute)(FunctionState::null(), std::ptr::null(), std::ptr::null_mut()).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_unknown_name_is_not_found() {
        let manager = FusedFuncManager::with_loader(Arc::new(PanickingLoader));
        assert!(matches!(
            manager.get_funcs("missing"),
            Err(InferError::FuncNotFound(ref n)) if n == "missing"
        ));
    }

    #[test]
    fn test_registration_performs_no_io() {
        let mut manager = FusedFuncManager::with_loader(Arc::new(PanickingLoader));
        manager
            .add_func_info_from_library("Fuse1", "/does/not/exist.so")
            .unwrap();
        assert!(manager.contains("Fuse1"));
        assert!(!manager.is_resolved("Fuse1"));
        assert_eq!(manager.names().collect::<Vec<_>>(), vec!["Fuse1"]);
    }

    unsafe extern "C" fn failing_create(
        _ctx: *mut inferlib_kernel_abi::ComputeContextC,
        _state: *mut FunctionStateC,
    ) -> libc::c_int {
        3
    }

    unsafe extern "C" fn noop_compute(
        _state: FunctionStateC,
        _api: *const KernelApi,
        _ctx: *mut KernelContext,
    ) -> libc::c_int {
        KERNEL_STATUS_OK
    }

    unsafe extern "C" fn noop_release(_state: FunctionStateC) {}

    static PARTIAL_RELEASES: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "C" fn partial_create(
        _ctx: *mut inferlib_kernel_abi::ComputeContextC,
        state: *mut FunctionStateC,
    ) -> libc::c_int {
        unsafe { *state = Box::into_raw(Box::new(5u32)).cast() };
        9
    }

    unsafe extern "C" fn counting_release(state: FunctionStateC) {
        if !state.is_null() {
            drop(unsafe { Box::from_raw(state.cast::<u32>()) });
            PARTIAL_RELEASES.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_failed_create_releases_partial_state() {
        let funcs = FusedFuncs::from_c("Fuse1", partial_create, noop_compute, counting_release);
        let ctx = ComputeContext::new("node0", None).unwrap();

        let err = funcs.create_state_guarded(&ctx).err().unwrap();
        assert!(matches!(err, InferError::KernelFailed(ref msg) if msg.contains("status 9")));
        assert_eq!(PARTIAL_RELEASES.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_c_status_maps_to_kernel_failed() {
        let funcs = FusedFuncs::from_c("Fuse1", failing_create, noop_compute, noop_release);
        let ctx = ComputeContext::new("node0", None).unwrap();

        let err = funcs.create_state_guarded(&ctx).err().unwrap();
        assert!(matches!(err, InferError::KernelFailed(ref msg) if msg.contains("status 3")));
        assert!((funcs.compute)(FunctionState::null(), std::ptr::null(), std::ptr::null_mut()).is_ok());
    }
}
