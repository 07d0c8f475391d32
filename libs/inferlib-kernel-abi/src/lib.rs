// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! ABI-stable interface for externally compiled fused kernels.
//!
//! A fused kernel library is a plain dynamic library (.so/.dylib/.dll) that
//! exports three C symbols per fused function. For a function registered as
//! `name`, the host resolves:
//!
//! - `Create_State_<name>`: builds the per-node [`FunctionStateC`]
//! - `Compute_<name>`: runs one invocation against that state
//! - `Release_State_<name>`: releases the state exactly once
//!
//! # Example Kernel Library
//!
//! ```ignore
//! use inferlib_kernel_abi::{export_fused_kernel, ComputeContextC, FunctionStateC, KernelApi, KernelContext};
//!
//! unsafe extern "C" fn create(ctx: *mut ComputeContextC, state: *mut FunctionStateC) -> i32 {
//!     unsafe { *state = std::ptr::null_mut() };
//!     0
//! }
//!
//! unsafe extern "C" fn compute(state: FunctionStateC, api: *const KernelApi, ctx: *mut KernelContext) -> i32 {
//!     0
//! }
//!
//! unsafe extern "C" fn release(state: FunctionStateC) {}
//!
//! export_fused_kernel!("Fuse1", create, compute, release);
//! ```
//!
//! # Kernel Cargo.toml
//!
//! ```toml
//! [lib]
//! crate-type = ["cdylib"]
//!
//! [dependencies]
//! inferlib-kernel-abi = "0.1"
//! ```

pub use libc;

use libc::{c_char, c_int, c_void, size_t};

/// Symbol prefix of the state constructor.
pub const CREATE_STATE_SYMBOL_PREFIX: &str = "Create_State_";

/// Symbol prefix of the compute entry point.
pub const COMPUTE_SYMBOL_PREFIX: &str = "Compute_";

/// Symbol prefix of the state destructor.
pub const RELEASE_STATE_SYMBOL_PREFIX: &str = "Release_State_";

/// Status returned by kernel entry points on success. Any other value is a failure.
pub const KERNEL_STATUS_OK: c_int = 0;

/// Opaque per-node state owned by the kernel.
pub type FunctionStateC = *mut c_void;

/// Opaque handle to the allocator the host lends to a kernel.
pub type AllocatorHandleC = *mut c_void;

/// `allocate(allocator, size, alignment)`.
///
/// `alignment` must be a power of two no larger than the host allocator's
/// native alignment; otherwise the call returns null.
pub type AllocateFnC = unsafe extern "C" fn(AllocatorHandleC, size_t, size_t) -> *mut c_void;

/// `release(allocator, ptr)`.
pub type ReleaseFnC = unsafe extern "C" fn(AllocatorHandleC, *mut c_void);

/// Context handed to `Create_State_<name>`.
///
/// Every pointer is borrowed from the host and valid only for the duration
/// of the create call.
#[repr(C)]
pub struct ComputeContextC {
    pub allocate_func: Option<AllocateFnC>,
    pub release_func: Option<ReleaseFnC>,
    pub allocator_handle: AllocatorHandleC,
    /// NUL-terminated name of the fused node.
    pub node_name: *const c_char,
}

/// Host-side API table handed to `Compute_<name>`. Opaque to this crate.
#[repr(C)]
pub struct KernelApi {
    _private: [u8; 0],
}

/// Per-invocation host context handed to `Compute_<name>`. Opaque to this crate.
#[repr(C)]
pub struct KernelContext {
    _private: [u8; 0],
}

/// Signature of `Create_State_<name>`.
pub type CreateStateFnC = unsafe extern "C" fn(*mut ComputeContextC, *mut FunctionStateC) -> c_int;

/// Signature of `Compute_<name>`.
pub type ComputeFnC =
    unsafe extern "C" fn(FunctionStateC, *const KernelApi, *mut KernelContext) -> c_int;

/// Signature of `Release_State_<name>`.
pub type ReleaseStateFnC = unsafe extern "C" fn(FunctionStateC);

/// Mangled symbol names for a fused function, in resolution order
/// (create, compute, release).
pub fn symbol_names(name: &str) -> [String; 3] {
    [
        format!("{}{}", CREATE_STATE_SYMBOL_PREFIX, name),
        format!("{}{}", COMPUTE_SYMBOL_PREFIX, name),
        format!("{}{}", RELEASE_STATE_SYMBOL_PREFIX, name),
    ]
}

/// Mangled symbol name as a string literal, usable in attributes.
///
/// Must stay in step with the `*_SYMBOL_PREFIX` constants.
#[doc(hidden)]
#[macro_export]
macro_rules! fused_symbol_name {
    (create, $name:literal) => {
        concat!("Create_State_", $name)
    };
    (compute, $name:literal) => {
        concat!("Compute_", $name)
    };
    (release, $name:literal) => {
        concat!("Release_State_", $name)
    };
}

/// Export a fused kernel for dynamic loading.
///
/// Generates the three prefixed C symbols the host resolves for `$name`,
/// each forwarding to the given implementation.
///
/// # Example
///
/// ```ignore
/// export_fused_kernel!("Fuse1", create_state, compute, release_state);
/// ```
#[macro_export]
macro_rules! export_fused_kernel {
    ($name:literal, $create:path, $compute:path, $release:path $(,)?) => {
        const _: () = {
            #[unsafe(export_name = $crate::fused_symbol_name!(create, $name))]
            unsafe extern "C" fn __inferlib_create_state(
                ctx: *mut $crate::ComputeContextC,
                state: *mut $crate::FunctionStateC,
            ) -> $crate::libc::c_int {
                unsafe { $create(ctx, state) }
            }

            #[unsafe(export_name = $crate::fused_symbol_name!(compute, $name))]
            unsafe extern "C" fn __inferlib_compute(
                state: $crate::FunctionStateC,
                api: *const $crate::KernelApi,
                ctx: *mut $crate::KernelContext,
            ) -> $crate::libc::c_int {
                unsafe { $compute(state, api, ctx) }
            }

            #[unsafe(export_name = $crate::fused_symbol_name!(release, $name))]
            unsafe extern "C" fn __inferlib_release_state(state: $crate::FunctionStateC) {
                unsafe { $release(state) }
            }
        };
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_names_use_fixed_prefixes() {
        let [create, compute, release] = symbol_names("Fuse1");
        assert_eq!(create, "Create_State_Fuse1");
        assert_eq!(compute, "Compute_Fuse1");
        assert_eq!(release, "Release_State_Fuse1");
    }

    #[test]
    fn test_exported_names_match_symbol_names() {
        let [create, compute, release] = symbol_names("Fuse1");
        assert_eq!(crate::fused_symbol_name!(create, "Fuse1"), create);
        assert_eq!(crate::fused_symbol_name!(compute, "Fuse1"), compute);
        assert_eq!(crate::fused_symbol_name!(release, "Fuse1"), release);
    }

    unsafe extern "C" fn identity_create(
        _ctx: *mut ComputeContextC,
        state: *mut FunctionStateC,
    ) -> c_int {
        unsafe { *state = std::ptr::null_mut() };
        KERNEL_STATUS_OK
    }

    unsafe extern "C" fn identity_compute(
        _state: FunctionStateC,
        _api: *const KernelApi,
        _ctx: *mut KernelContext,
    ) -> c_int {
        KERNEL_STATUS_OK
    }

    unsafe extern "C" fn identity_release(_state: FunctionStateC) {}

    crate::export_fused_kernel!("AbiIdentity", identity_create, identity_compute, identity_release);

    #[test]
    fn test_compute_context_is_four_pointers() {
        assert_eq!(
            std::mem::size_of::<ComputeContextC>(),
            4 * std::mem::size_of::<usize>()
        );
    }
}
