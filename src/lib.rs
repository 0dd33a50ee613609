// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Arbor: category tree and filing engine for classified documents
//!
//! Files are sent to a classification service, the returned labels are
//! merged into a two-level category tree, and each file is moved into the
//! directory its category resolves to under a single base directory.

pub mod classifier;
pub mod config;
pub mod error;
pub mod history;
pub mod loader;
pub mod merger;
pub mod operations;
pub mod paths;
pub mod pipeline;
pub mod registry;
pub mod tree;
pub mod watcher;

pub use config::AppConfig;
pub use error::{ArborError, Result};
