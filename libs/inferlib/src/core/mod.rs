// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

pub mod allocator;
pub mod config;
pub mod error;
pub mod fused;
pub mod graph;
pub mod logging;
pub mod providers;

pub use allocator::*;
pub use config::{FusedFunctionConfig, SessionConfig};
pub use error::*;
pub use fused::*;
pub use graph::*;
pub use logging::init_tracing;
pub use providers::*;
