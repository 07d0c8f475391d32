// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::core::allocator::{AllocatorInfo, AllocatorPtr};
use crate::core::error::{InferError, Result};
use crate::core::graph::{GraphView, NodeIndex, NodeView};
use crate::core::providers::ExecutionProvider;

/// Registry of the execution providers in a session.
///
/// Owns every provider and indexes it twice: by provider id for per-node
/// dispatch, and by allocator identity for per-allocation dispatch. Both
/// indices always point at live entries of `providers`.
#[derive(Default)]
pub struct ExecutionProviders {
    providers: Vec<Box<dyn ExecutionProvider>>,
    provider_idx_map: HashMap<String, usize>,
    // AllocatorInfo has an order but no hash.
    allocator_idx_map: BTreeMap<AllocatorInfo, usize>,
}

impl ExecutionProviders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under `provider_id`.
    ///
    /// Fails without changing anything if the id is taken or if any allocator
    /// the provider exposes is already owned by another provider.
    pub fn add(
        &mut self,
        provider_id: impl Into<String>,
        provider: Box<dyn ExecutionProvider>,
    ) -> Result<()> {
        let provider_id = provider_id.into();
        let mut staged = BTreeSet::new();

        if let Err(e) = self.validate(&provider_id, provider.as_ref(), &[], &mut staged) {
            tracing::error!("{}", e);
            return Err(e);
        }

        self.commit(provider_id, provider);
        Ok(())
    }

    /// Register several providers at once.
    ///
    /// Every id and allocator in the batch is validated against the registry
    /// and against the rest of the batch before the first one is inserted.
    pub fn add_all(
        &mut self,
        providers: Vec<(String, Box<dyn ExecutionProvider>)>,
    ) -> Result<()> {
        let mut staged_ids: Vec<&str> = Vec::with_capacity(providers.len());
        let mut staged_allocators = BTreeSet::new();

        for (provider_id, provider) in &providers {
            if let Err(e) = self.validate(
                provider_id,
                provider.as_ref(),
                &staged_ids,
                &mut staged_allocators,
            ) {
                tracing::error!("{}", e);
                return Err(e);
            }
            staged_ids.push(provider_id);
        }

        for (provider_id, provider) in providers {
            self.commit(provider_id, provider);
        }
        Ok(())
    }

    fn validate(
        &self,
        provider_id: &str,
        provider: &dyn ExecutionProvider,
        staged_ids: &[&str],
        staged_allocators: &mut BTreeSet<AllocatorInfo>,
    ) -> Result<()> {
        if self.provider_idx_map.contains_key(provider_id) || staged_ids.contains(&provider_id) {
            return Err(InferError::DuplicateProvider(provider_id.to_string()));
        }

        for allocator in provider.allocator_map().values() {
            let info = allocator.info();
            if self.allocator_idx_map.contains_key(info) || !staged_allocators.insert(info.clone())
            {
                return Err(InferError::DuplicateAllocator(info.to_string()));
            }
        }

        Ok(())
    }

    fn commit(&mut self, provider_id: String, provider: Box<dyn ExecutionProvider>) {
        let new_provider_idx = self.providers.len();

        for allocator in provider.allocator_map().values() {
            self.allocator_idx_map
                .insert(allocator.info().clone(), new_provider_idx);
        }

        tracing::info!(
            "[add] registered execution provider '{}' at index {}",
            provider_id,
            new_provider_idx
        );

        self.provider_idx_map.insert(provider_id, new_provider_idx);
        self.providers.push(provider);
    }

    /// Provider assigned to the node at `index` in `graph`.
    ///
    /// # Panics
    /// If `graph` has no node at `index`. That means the caller mixed up graph
    /// and node identity, which cannot be recovered from.
    pub fn get_for_node_index<G: GraphView + ?Sized>(
        &self,
        graph: &G,
        index: NodeIndex,
    ) -> Option<&dyn ExecutionProvider> {
        let node = graph
            .node(index)
            .unwrap_or_else(|| panic!("Node with id {} was not found in graph.", index));
        self.get_for_node(node)
    }

    /// Provider assigned to `node` by placement.
    pub fn get_for_node<N: NodeView + ?Sized>(&self, node: &N) -> Option<&dyn ExecutionProvider> {
        self.get(node.execution_provider_type())
    }

    pub fn get(&self, provider_id: &str) -> Option<&dyn ExecutionProvider> {
        self.provider_idx_map
            .get(provider_id)
            .map(|&idx| self.providers[idx].as_ref())
    }

    /// Provider that owns the allocator described by `allocator_info`.
    pub fn get_by_allocator(&self, allocator_info: &AllocatorInfo) -> Option<&dyn ExecutionProvider> {
        self.allocator_idx_map
            .get(allocator_info)
            .map(|&idx| self.providers[idx].as_ref())
    }

    /// The allocator instance described by `allocator_info`, borrowed from its owner.
    pub fn get_allocator(&self, allocator_info: &AllocatorInfo) -> Option<AllocatorPtr> {
        self.get_by_allocator(allocator_info)?
            .allocator_map()
            .values()
            .find(|allocator| allocator.info() == allocator_info)
            .cloned()
    }

    /// Registration index of `provider_id`.
    pub fn index_of(&self, provider_id: &str) -> Option<usize> {
        self.provider_idx_map.get(provider_id).copied()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Providers in registration order.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            inner: self.providers.iter(),
        }
    }

    /// Run every provider's start hook in registration order, stopping at the first failure.
    pub fn on_run_start(&self) -> Result<()> {
        for provider in self.iter() {
            provider.on_run_start()?;
        }
        Ok(())
    }

    /// Run every provider's end hook, returning the first failure after all have run.
    pub fn on_run_end(&self) -> Result<()> {
        let mut first_err = None;
        for provider in self.iter() {
            if let Err(e) = provider.on_run_end() {
                tracing::warn!(
                    "on_run_end failed for '{}': {}",
                    provider.provider_type(),
                    e
                );
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

pub struct Iter<'a> {
    inner: std::slice::Iter<'a, Box<dyn ExecutionProvider>>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a dyn ExecutionProvider;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|provider| provider.as_ref())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Iter<'_> {}

impl<'a> IntoIterator for &'a ExecutionProviders {
    type Item = &'a dyn ExecutionProvider;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Iter<'a> {
        self.iter()
    }
}
