//! Per-tenant route table.
//!
//! Entries are kept sorted by `(priority, insertion order)`; the first entry
//! whose matcher accepts the whole path wins. Mutation is keyed by page slug
//! and serialized behind a write lock, reads share the lock.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::page::Page;
use crate::routing::matcher::{compile_pattern, PatternMatcher, RouteError};

/// A compiled route pointing at a page.
#[derive(Debug, Clone)]
pub struct RouteEntry {
    matcher: PatternMatcher,
    page: Arc<Page>,
    seq: u64,
}

impl RouteEntry {
    pub fn pattern(&self) -> &str {
        self.matcher.pattern()
    }

    pub fn params(&self) -> &[String] {
        self.matcher.params()
    }

    pub fn priority(&self) -> u32 {
        self.matcher.priority()
    }

    pub fn page(&self) -> &Arc<Page> {
        &self.page
    }

    pub fn matcher(&self) -> &PatternMatcher {
        &self.matcher
    }
}

/// Result of a successful lookup.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub page: Arc<Page>,
    pub pattern: String,
    pub params: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
pub struct RouteTable {
    entries: Vec<RouteEntry>,
    next_seq: u64,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a page under its URL pattern, replacing any entry with the
    /// same slug.
    pub fn add(&mut self, page: Arc<Page>) -> Result<(), RouteError> {
        let matcher = compile_pattern(&page.url)?;
        if let Some(other) = self
            .entries
            .iter()
            .find(|e| e.pattern() == matcher.pattern() && e.page.slug != page.slug)
        {
            return Err(RouteError::Duplicate {
                pattern: matcher.pattern().to_string(),
                slug: other.page.slug.clone(),
            });
        }

        self.entries.retain(|e| e.page.slug != page.slug);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(RouteEntry { matcher, page, seq });
        self.sort();
        Ok(())
    }

    /// Remove the entry for `slug`. Returns whether one existed.
    pub fn remove(&mut self, slug: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.page.slug != slug);
        self.sort();
        before != self.entries.len()
    }

    pub fn match_path(&self, path: &str) -> Result<RouteMatch, RouteError> {
        self.entries
            .iter()
            .find_map(|entry| {
                entry.matcher.matches(path).map(|params| RouteMatch {
                    page: Arc::clone(&entry.page),
                    pattern: entry.pattern().to_string(),
                    params: params.into_iter().collect(),
                })
            })
            .ok_or_else(|| RouteError::NotFound {
                path: path.to_string(),
            })
    }

    pub fn entries(&self) -> &[RouteEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn sort(&mut self) {
        self.entries.sort_by_key(|e| (e.priority(), e.seq));
    }
}

/// Shared, lock-protected route table for one tenant.
#[derive(Debug, Default)]
pub struct TenantRouter {
    routes: RwLock<RouteTable>,
}

impl TenantRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, page: Arc<Page>) -> Result<(), RouteError> {
        self.routes
            .write()
            .expect("route table lock poisoned")
            .add(page)
    }

    pub fn remove(&self, slug: &str) -> bool {
        self.routes
            .write()
            .expect("route table lock poisoned")
            .remove(slug)
    }

    pub fn match_path(&self, path: &str) -> Result<RouteMatch, RouteError> {
        self.routes
            .read()
            .expect("route table lock poisoned")
            .match_path(path)
    }

    /// Snapshot of the current entries in match order.
    pub fn entries(&self) -> Vec<RouteEntry> {
        self.routes
            .read()
            .expect("route table lock poisoned")
            .entries()
            .to_vec()
    }

    /// Pages currently routed, in match order.
    pub fn pages(&self) -> Vec<Arc<Page>> {
        self.routes
            .read()
            .expect("route table lock poisoned")
            .entries()
            .iter()
            .map(|e| Arc::clone(&e.page))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.routes.read().expect("route table lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
