// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

mod func_manager;
mod library_loader;
mod state;

pub use func_manager::{
    ComputeFunc, CreateFunctionStateFunc, DestroyFunctionStateFunc, FusedFuncManager, FusedFuncs,
};
pub use library_loader::{DylibLoader, LibraryLoader, LoadedLibrary, RawSymbol};
pub use state::{ComputeContext, FunctionState, FunctionStateGuard};
