// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

#![allow(clippy::type_complexity)] // Adapter closure types are clear in context
#![allow(clippy::missing_safety_doc)] // Safety documented in implementation comments

pub use inferlib_kernel_abi as kernel_abi;

pub mod core;

pub use core::{
    init_tracing, Allocator, AllocatorInfo, AllocatorMap, AllocatorPtr, AllocatorType,
    ComputeContext, ComputeFunc, CpuAllocator, CpuExecutionProvider, CpuProviderConfig,
    CreateFunctionStateFunc, DestroyFunctionStateFunc, DylibLoader, ExecutionProvider,
    ExecutionProviders, FunctionState, FunctionStateGuard, FusedFuncManager, FusedFuncs,
    GraphView, InferError, LibraryLoader, LoadedLibrary, MemType, NodeIndex, NodeView,
    RawSymbol, Result, SessionConfig, FusedFunctionConfig,
};
