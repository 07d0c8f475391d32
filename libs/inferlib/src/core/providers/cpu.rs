// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::sync::Arc;

use serde::Deserialize;

use crate::core::allocator::{AllocatorInfo, AllocatorMap, AllocatorPtr, CpuAllocator, MemType};
use crate::core::providers::ExecutionProvider;

pub const CPU_EXECUTION_PROVIDER: &str = "CPUExecutionProvider";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CpuProviderConfig {
    /// Report the host allocator as arena-backed.
    pub create_arena: bool,
}

impl Default for CpuProviderConfig {
    fn default() -> Self {
        Self { create_arena: true }
    }
}

/// Built-in host backend owning a single [`CpuAllocator`].
pub struct CpuExecutionProvider {
    allocators: AllocatorMap,
}

impl CpuExecutionProvider {
    pub fn new(config: CpuProviderConfig) -> Self {
        let info = if config.create_arena {
            AllocatorInfo::cpu_arena()
        } else {
            AllocatorInfo::cpu_device()
        };

        let allocator: AllocatorPtr = Arc::new(CpuAllocator::new(info));
        let mut allocators = AllocatorMap::new();
        allocators.insert(MemType::Default, allocator);
        Self { allocators }
    }
}

impl Default for CpuExecutionProvider {
    fn default() -> Self {
        Self::new(CpuProviderConfig::default())
    }
}

impl ExecutionProvider for CpuExecutionProvider {
    fn provider_type(&self) -> &str {
        CPU_EXECUTION_PROVIDER
    }

    fn allocator_map(&self) -> &AllocatorMap {
        &self.allocators
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::allocator::AllocatorType;

    #[test]
    fn test_arena_flag_selects_allocator_type() {
        let arena = CpuExecutionProvider::default();
        let plain = CpuExecutionProvider::new(CpuProviderConfig {
            create_arena: false,
        });

        let arena_alloc = arena.get_allocator(MemType::Default).unwrap();
        let plain_alloc = plain.get_allocator(MemType::Default).unwrap();

        assert_eq!(arena_alloc.info().alloc_type, AllocatorType::Arena);
        assert_eq!(plain_alloc.info().alloc_type, AllocatorType::Device);
        assert!(arena.get_allocator(MemType::CpuInput).is_none());
    }
}
