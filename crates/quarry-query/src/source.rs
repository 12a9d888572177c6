//! Query source identity, item types and the clone context.
//!
//! Clauses that introduce items into a query (the main from clause, additional from
//! clauses and joins) are *query sources*. Expressions refer to them by
//! [`QuerySourceId`], never by item name: names are for readability only and need
//! not be unique within a model.

use quarry_core::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identity of a query source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QuerySourceId(u64);

impl QuerySourceId {
    /// Allocate a fresh identity, distinct from every identity allocated before.
    pub fn fresh() -> Self {
        Self(NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for QuerySourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Type of the items a query source produces (the mapped entity name).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemType {
    name: String,
}

impl ItemType {
    /// Create an item type for the named entity.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::invalid_argument(
                "item_type",
                "entity name cannot be empty",
            ));
        }
        Ok(Self { name })
    }

    /// Item type named after a Rust type (its last path segment, generics stripped).
    pub fn of<T: ?Sized>() -> Self {
        let full = std::any::type_name::<T>();
        let base = full.split('<').next().unwrap_or(full);
        let name = base.rsplit("::").next().unwrap_or(base);
        Self {
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Side mapping from original query sources to their clones.
///
/// Filled while a model (or a single clause) is cloned. Clauses cloned later consult
/// it so that references to an already-cloned source point at the clone rather than
/// the original. The mapping never owns either side.
#[derive(Debug, Default, Clone)]
pub struct CloneContext {
    mapping: HashMap<QuerySourceId, QuerySourceId>,
}

impl CloneContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `original` was cloned as `clone`.
    pub fn add_mapping(&mut self, original: QuerySourceId, clone: QuerySourceId) {
        self.mapping.insert(original, clone);
    }

    /// The clone registered for `original`, if any.
    pub fn lookup(&self, original: QuerySourceId) -> Option<QuerySourceId> {
        self.mapping.get(&original).copied()
    }

    /// Resolve a reference: the registered clone, or `id` itself when it was not cloned.
    pub fn resolve(&self, id: QuerySourceId) -> QuerySourceId {
        self.lookup(id).unwrap_or(id)
    }

    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_ids_are_distinct() {
        let a = QuerySourceId::fresh();
        let b = QuerySourceId::fresh();
        assert_ne!(a, b);
        assert!(b.get() > a.get());
    }

    #[test]
    fn test_item_type_rejects_empty() {
        assert!(ItemType::new("").unwrap_err().is_invalid_argument());
        assert!(ItemType::new("   ").is_err());
        assert_eq!(ItemType::new("Customer").unwrap().name(), "Customer");
    }

    #[test]
    fn test_item_type_of_rust_type() {
        struct Order;
        assert_eq!(ItemType::of::<Order>().name(), "Order");
        assert_eq!(ItemType::of::<Vec<u8>>().name(), "Vec");
    }

    #[test]
    fn test_clone_context_resolve() {
        let original = QuerySourceId::fresh();
        let clone = QuerySourceId::fresh();
        let untouched = QuerySourceId::fresh();

        let mut ctx = CloneContext::new();
        assert!(ctx.is_empty());
        ctx.add_mapping(original, clone);

        assert_eq!(ctx.resolve(original), clone);
        assert_eq!(ctx.resolve(untouched), untouched);
        assert_eq!(ctx.lookup(untouched), None);
        assert_eq!(ctx.len(), 1);
    }
}
