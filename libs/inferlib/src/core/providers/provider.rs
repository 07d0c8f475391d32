// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use crate::core::allocator::{AllocatorMap, AllocatorPtr, MemType};
use crate::core::error::Result;

/// A pluggable execution backend.
///
/// The registry only relies on the provider's type string and the allocators
/// it owns; everything else about the backend stays opaque to it.
pub trait ExecutionProvider: Send + Sync {
    /// Provider id, e.g. `"CPUExecutionProvider"`.
    fn provider_type(&self) -> &str;

    /// Allocators this provider owns.
    fn allocator_map(&self) -> &AllocatorMap;

    fn get_allocator(&self, mem_type: MemType) -> Option<AllocatorPtr> {
        self.allocator_map().get(&mem_type).cloned()
    }

    /// Called before each inference run.
    fn on_run_start(&self) -> Result<()> {
        Ok(())
    }

    /// Called after each inference run, even if the run failed.
    fn on_run_end(&self) -> Result<()> {
        Ok(())
    }
}
