// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::ffi::{c_void, CString};
use std::ptr::NonNull;

use inferlib_kernel_abi::{AllocatorHandleC, ComputeContextC, FunctionStateC};

use crate::core::allocator::AllocatorPtr;
use crate::core::error::{InferError, Result};
use crate::core::fused::DestroyFunctionStateFunc;

/// Opaque per-node state produced by a create-state function.
///
/// The manager never looks inside it. Whoever created it owns it and must
/// hand it to the matching release function exactly once, which
/// [`FunctionStateGuard`] does automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct FunctionState(FunctionStateC);

// Safety: the state is an opaque token; thread-safety of what it points to is
// part of the kernel's contract, as with any state shared across inference threads.
unsafe impl Send for FunctionState {}
unsafe impl Sync for FunctionState {}

impl FunctionState {
    pub fn null() -> Self {
        Self(std::ptr::null_mut())
    }

    pub fn from_raw(raw: FunctionStateC) -> Self {
        Self(raw)
    }

    pub fn as_raw(&self) -> FunctionStateC {
        self.0
    }

    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }
}

/// Everything a create-state function learns about the node it builds state for.
pub struct ComputeContext {
    node_name: CString,
    allocator: Option<AllocatorPtr>,
}

impl ComputeContext {
    pub fn new(node_name: &str, allocator: Option<AllocatorPtr>) -> Result<Self> {
        let node_name = CString::new(node_name).map_err(|e| {
            InferError::InvalidArgument(format!("node name '{}' contains NUL: {}", node_name, e))
        })?;
        Ok(Self {
            node_name,
            allocator,
        })
    }

    pub fn node_name(&self) -> &str {
        // Built from a &str in new().
        self.node_name.to_str().unwrap_or_default()
    }

    pub fn allocator(&self) -> Option<&AllocatorPtr> {
        self.allocator.as_ref()
    }

    /// C view of this context. Borrows `self`; valid while `self` is alive and unmoved.
    pub(crate) fn to_raw(&self) -> ComputeContextC {
        match &self.allocator {
            Some(allocator) => ComputeContextC {
                allocate_func: Some(host_allocate),
                release_func: Some(host_release),
                allocator_handle: std::ptr::from_ref(allocator).cast_mut().cast(),
                node_name: self.node_name.as_ptr(),
            },
            None => ComputeContextC {
                allocate_func: None,
                release_func: None,
                allocator_handle: std::ptr::null_mut(),
                node_name: self.node_name.as_ptr(),
            },
        }
    }
}

/// Returns null for zero-sized requests and for alignments the allocator
/// cannot honor.
unsafe extern "C" fn host_allocate(
    handle: AllocatorHandleC,
    size: libc::size_t,
    alignment: libc::size_t,
) -> *mut c_void {
    if handle.is_null() {
        return std::ptr::null_mut();
    }
    // Safety: handle was produced by ComputeContext::to_raw from a live AllocatorPtr.
    let allocator = unsafe { &*handle.cast::<AllocatorPtr>() };
    if !alignment.is_power_of_two() || alignment > allocator.alignment() {
        tracing::error!(
            "Kernel requested alignment {} from {}, which guarantees {}",
            alignment,
            allocator.info(),
            allocator.alignment()
        );
        return std::ptr::null_mut();
    }
    match allocator.alloc(size) {
        Ok(ptr) => ptr.as_ptr().cast(),
        Err(e) => {
            tracing::error!("Kernel allocation of {} bytes failed: {}", size, e);
            std::ptr::null_mut()
        }
    }
}

unsafe extern "C" fn host_release(handle: AllocatorHandleC, ptr: *mut c_void) {
    let Some(ptr) = NonNull::new(ptr.cast::<u8>()) else {
        return;
    };
    if handle.is_null() {
        return;
    }
    // Safety: see host_allocate; ptr came from the same allocator.
    unsafe {
        let allocator = &*handle.cast::<AllocatorPtr>();
        allocator.free(ptr);
    }
}

/// Owns a [`FunctionState`] and releases it exactly once on drop.
pub struct FunctionStateGuard {
    state: FunctionState,
    release: Option<DestroyFunctionStateFunc>,
}

impl FunctionStateGuard {
    pub fn new(state: FunctionState, release: DestroyFunctionStateFunc) -> Self {
        Self {
            state,
            release: Some(release),
        }
    }

    pub fn state(&self) -> FunctionState {
        self.state
    }

    /// Release the state now instead of at drop.
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if let Some(release) = self.release.take() {
            release(self.state);
        }
    }
}

impl Drop for FunctionStateGuard {
    fn drop(&mut self) {
        self.release_once();
    }
}
