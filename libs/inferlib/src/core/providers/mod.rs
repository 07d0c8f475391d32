// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

mod cpu;
mod execution_providers;
mod provider;

pub use cpu::{CpuExecutionProvider, CpuProviderConfig, CPU_EXECUTION_PROVIDER};
pub use execution_providers::ExecutionProviders;
pub use provider::ExecutionProvider;
