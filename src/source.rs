// Copyright (c) 2024 Linaro LTD
// SPDX-License-Identifier: Apache-2.0

//! Log sources of the local domain.
//!
//! Sources are registered by name while the pipeline is being built and receive dense ids in
//! registration order.  The pipeline registers its own source, named [`CORE_SOURCE_NAME`], first.
//! Messages from other domains carry source ids that have no name here.

use std::collections::HashMap;

use crate::msg::{SourceId, DOMAIN_LOCAL};

/// Name of the source the pipeline itself logs as.
pub const CORE_SOURCE_NAME: &str = "log";

/// Name to id mapping of the local sources.
#[derive(Debug, Default, Clone)]
pub struct SourceRegistry {
    names: Vec<String>,
    ids: HashMap<String, SourceId>,
}

impl SourceRegistry {
    /// Register a source, or return the id it already has.
    ///
    /// Returns `None` once the id space is exhausted.
    pub(crate) fn register(&mut self, name: &str) -> Option<SourceId> {
        if let Some(id) = self.ids.get(name) {
            return Some(*id);
        }
        let id = SourceId::try_from(self.names.len()).ok()?;
        self.names.push(name.to_owned());
        self.ids.insert(name.to_owned(), id);
        Some(id)
    }

    /// Look up the id of a source by name.
    pub fn source_id(&self, name: &str) -> Option<SourceId> {
        self.ids.get(name).copied()
    }

    /// Look up the name of a source.
    pub fn source_name(&self, domain: u8, source: SourceId) -> Option<&str> {
        if domain != DOMAIN_LOCAL || source < 0 {
            return None;
        }
        self.names.get(source as usize).map(String::as_str)
    }

    /// Number of registered sources.
    pub fn source_count(&self) -> usize {
        self.names.len()
    }
}
