// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use thiserror::Error;

#[derive(Error, Debug)]
pub enum InferError {
    #[error("Provider {0} has already been registered.")]
    DuplicateProvider(String),

    #[error("{0} allocator already registered.")]
    DuplicateAllocator(String),

    #[error("func info for node: {0} already exist.")]
    FuncAlreadyExists(String),

    #[error("Can't use func with null ptr: {0}")]
    NullFunction(String),

    #[error("func info for node: {0} not found.")]
    FuncNotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Library not found or failed to load: {0}")]
    LibraryLoad(String),

    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("Kernel failed: {0}")]
    KernelFailed(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, InferError>;
