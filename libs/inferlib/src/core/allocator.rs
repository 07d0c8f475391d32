// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Memory allocator identity and the allocator contract providers expose.

use std::alloc::Layout;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::core::error::{InferError, Result};

/// Allocator name of host memory.
pub const CPU: &str = "Cpu";
/// Allocator name of CUDA device memory.
pub const CUDA: &str = "Cuda";
/// Allocator name of page-locked host memory visible to CUDA.
pub const CUDA_PINNED: &str = "CudaPinned";

/// Alignment of every buffer handed out by [`CpuAllocator`].
pub const CPU_ALLOCATOR_ALIGNMENT: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AllocatorType {
    /// Direct device allocation, one request per buffer.
    Device,
    /// Pooled allocation carved out of a larger arena.
    Arena,
}

/// Which side of a kernel boundary the memory lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MemType {
    /// Host-accessible input memory for a non-CPU provider.
    CpuInput,
    /// Host-accessible output memory for a non-CPU provider.
    CpuOutput,
    /// The provider's native memory.
    Default,
}

/// Identity of a memory allocator: which device it serves and how.
///
/// Used as an ordered-map key. There is no canonical hash across backends, so
/// this type implements a total order instead of `Hash`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatorInfo {
    pub name: String,
    pub id: i32,
    pub mem_type: MemType,
    pub alloc_type: AllocatorType,
}

impl AllocatorInfo {
    pub fn new(
        name: impl Into<String>,
        alloc_type: AllocatorType,
        id: i32,
        mem_type: MemType,
    ) -> Self {
        Self {
            name: name.into(),
            id,
            mem_type,
            alloc_type,
        }
    }

    /// Host arena allocator on device 0.
    pub fn cpu_arena() -> Self {
        Self::new(CPU, AllocatorType::Arena, 0, MemType::Default)
    }

    /// Host allocator on device 0 without an arena.
    pub fn cpu_device() -> Self {
        Self::new(CPU, AllocatorType::Device, 0, MemType::Default)
    }
}

impl Ord for AllocatorInfo {
    fn cmp(&self, other: &Self) -> Ordering {
        self.alloc_type
            .cmp(&other.alloc_type)
            .then_with(|| self.mem_type.cmp(&other.mem_type))
            .then_with(|| self.id.cmp(&other.id))
            .then_with(|| self.name.cmp(&other.name))
    }
}

impl PartialOrd for AllocatorInfo {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for AllocatorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AllocatorInfo: [name:{} id:{} mem_type:{:?} type:{:?}]",
            self.name, self.id, self.mem_type, self.alloc_type
        )
    }
}

/// A memory allocator owned by an execution provider.
pub trait Allocator: Send + Sync {
    fn info(&self) -> &AllocatorInfo;

    /// Alignment guaranteed for every buffer returned by [`Allocator::alloc`].
    fn alignment(&self) -> usize;

    fn alloc(&self, size: usize) -> Result<NonNull<u8>>;

    /// Release a buffer previously returned by [`Allocator::alloc`].
    ///
    /// # Safety
    /// `ptr` must come from this allocator and must not be used afterwards.
    unsafe fn free(&self, ptr: NonNull<u8>);
}

pub type AllocatorPtr = Arc<dyn Allocator>;

/// Allocators exposed by a provider, keyed by memory type.
pub type AllocatorMap = BTreeMap<MemType, AllocatorPtr>;

/// Host heap allocator with cache-line alignment.
///
/// Each block is preceded by one alignment-sized header holding the requested
/// size, so `free` needs only the pointer.
pub struct CpuAllocator {
    info: AllocatorInfo,
}

impl CpuAllocator {
    pub fn new(info: AllocatorInfo) -> Self {
        Self { info }
    }

    fn layout(size: usize) -> Result<Layout> {
        if size == 0 {
            return Err(InferError::InvalidArgument(
                "zero-sized allocation requested".into(),
            ));
        }
        size.checked_add(CPU_ALLOCATOR_ALIGNMENT)
            .and_then(|total| Layout::from_size_align(total, CPU_ALLOCATOR_ALIGNMENT).ok())
            .ok_or_else(|| {
                InferError::InvalidArgument(format!("invalid allocation of {} bytes", size))
            })
    }
}

impl Default for CpuAllocator {
    fn default() -> Self {
        Self::new(AllocatorInfo::cpu_device())
    }
}

impl Allocator for CpuAllocator {
    fn info(&self) -> &AllocatorInfo {
        &self.info
    }

    fn alignment(&self) -> usize {
        CPU_ALLOCATOR_ALIGNMENT
    }

    fn alloc(&self, size: usize) -> Result<NonNull<u8>> {
        let layout = Self::layout(size)?;
        // SAFETY: layout has a non-zero size.
        let base = unsafe { std::alloc::alloc(layout) };
        if base.is_null() {
            return Err(InferError::Other(anyhow::anyhow!(
                "{} failed to allocate {} bytes",
                self.info,
                size
            )));
        }
        // SAFETY: base is aligned for usize and the header fits in the first
        // CPU_ALLOCATOR_ALIGNMENT bytes of the block.
        unsafe {
            base.cast::<usize>().write(size);
            Ok(NonNull::new_unchecked(base.add(CPU_ALLOCATOR_ALIGNMENT)))
        }
    }

    unsafe fn free(&self, ptr: NonNull<u8>) {
        // SAFETY: caller guarantees ptr came from alloc, so the header precedes it.
        unsafe {
            let base = ptr.as_ptr().sub(CPU_ALLOCATOR_ALIGNMENT);
            let size = base.cast::<usize>().read();
            match Self::layout(size) {
                Ok(layout) => std::alloc::dealloc(base, layout),
                Err(e) => tracing::error!("{}: corrupt block header: {}", self.info, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_is_total_and_field_sensitive() {
        let arena = AllocatorInfo::cpu_arena();
        let device = AllocatorInfo::cpu_device();
        let gpu = AllocatorInfo::new(CUDA, AllocatorType::Device, 0, MemType::Default);
        let gpu1 = AllocatorInfo::new(CUDA, AllocatorType::Device, 1, MemType::Default);

        assert_eq!(arena.cmp(&arena.clone()), Ordering::Equal);
        assert_ne!(arena.cmp(&device), Ordering::Equal);
        assert_ne!(device.cmp(&gpu), Ordering::Equal);
        assert_eq!(gpu.cmp(&gpu1), Ordering::Less);
        assert_eq!(gpu1.cmp(&gpu), Ordering::Greater);
    }

    #[test]
    fn test_usable_as_ordered_map_key() {
        let mut map = BTreeMap::new();
        map.insert(AllocatorInfo::cpu_arena(), 0usize);
        map.insert(AllocatorInfo::cpu_device(), 1usize);

        assert_eq!(map.get(&AllocatorInfo::cpu_arena()), Some(&0));
        assert_eq!(map.get(&AllocatorInfo::cpu_device()), Some(&1));
        assert_eq!(
            map.get(&AllocatorInfo::new(CPU, AllocatorType::Arena, 1, MemType::Default)),
            None
        );
    }

    #[test]
    fn test_display_names_every_field() {
        let text = AllocatorInfo::cpu_arena().to_string();
        assert!(text.contains("name:Cpu"));
        assert!(text.contains("id:0"));
        assert!(text.contains("Arena"));
    }

    #[test]
    fn test_cpu_allocator_alignment_and_roundtrip() {
        let allocator = CpuAllocator::default();
        let ptr = allocator.alloc(100).unwrap();
        assert_eq!(ptr.as_ptr() as usize % CPU_ALLOCATOR_ALIGNMENT, 0);
        unsafe {
            ptr.as_ptr().write_bytes(0xAB, 100);
            assert_eq!(*ptr.as_ptr().add(99), 0xAB);
            allocator.free(ptr);
        }
    }

    #[test]
    fn test_cpu_allocator_rejects_zero_size() {
        let allocator = CpuAllocator::default();
        assert!(matches!(
            allocator.alloc(0),
            Err(InferError::InvalidArgument(_))
        ));
    }
}
