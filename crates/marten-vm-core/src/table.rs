//! Immutable, structurally shared property table.
//!
//! A table keeps every property in a reverse-chronological singly linked list
//! (the newest property at the head). Once it grows past `LIST_THRESHOLD`
//! entries it also keeps a power-of-two bucket array whose buckets are linked
//! lists of their own. Nodes are immutable and reference counted; adding,
//! removing or replacing a property copies only the prefix of each chain up to
//! the change and shares the rest, so older tables are never affected.

use crate::key::PropertyKey;
use crate::property::Property;
use rustc_hash::FxHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

/// Tables with fewer entries than this are searched linearly.
pub const LIST_THRESHOLD: usize = 8;

/// Smallest bucket array.
pub const INITIAL_BINS: usize = 32;

/// Bucket count for `n` entries: the power of two above `(n + n/2) | 31`.
fn bins_needed(n: usize) -> usize {
    (((n + (n >> 1)) | (INITIAL_BINS - 1)) + 1).next_power_of_two()
}

/// Rehash threshold for a bucket array of `n` buckets.
fn three_quarters(n: usize) -> usize {
    (n >> 1) + (n >> 2)
}

fn key_hash(key: &PropertyKey) -> u64 {
    let mut hasher = FxHasher::default();
    key.hash(&mut hasher);
    hasher.finish()
}

fn bin_index(bins: usize, key: &PropertyKey) -> usize {
    (key_hash(key) as usize) & (bins - 1)
}

struct Element {
    property: Arc<Property>,
    next: Option<Arc<Element>>,
}

impl Element {
    fn new(property: Arc<Property>, next: Option<Arc<Element>>) -> Arc<Self> {
        Arc::new(Self { property, next })
    }

    fn key(&self) -> &PropertyKey {
        self.property.key()
    }
}

impl Drop for Element {
    fn drop(&mut self) {
        // Unlink iteratively so long chains do not recurse.
        let mut next = self.next.take();
        while let Some(element) = next {
            match Arc::try_unwrap(element) {
                Ok(mut element) => next = element.next.take(),
                Err(_) => break,
            }
        }
    }
}

fn find_element<'a>(
    mut cursor: Option<&'a Arc<Element>>,
    key: &PropertyKey,
) -> Option<&'a Arc<Element>> {
    while let Some(element) = cursor {
        if element.key() == key {
            return Some(element);
        }
        cursor = element.next.as_ref();
    }
    None
}

/// Copy the chain up to the element for `key`, replacing that element with
/// `replacement` (or dropping it) and sharing everything after it.
fn rebuild_chain(
    list: Option<&Arc<Element>>,
    key: &PropertyKey,
    replacement: Option<Arc<Property>>,
) -> Option<Arc<Element>> {
    let mut prefix: Vec<&Arc<Element>> = Vec::new();
    let mut cursor = list;
    while let Some(element) = cursor {
        if element.key() == key {
            let mut tail = match replacement {
                Some(property) => Some(Element::new(property, element.next.clone())),
                None => element.next.clone(),
            };
            for copied in prefix.into_iter().rev() {
                tail = Some(Element::new(copied.property.clone(), tail));
            }
            return tail;
        }
        prefix.push(element);
        cursor = element.next.as_ref();
    }
    list.cloned()
}

fn rehash(list: Option<&Arc<Element>>, bins: usize) -> Vec<Option<Arc<Element>>> {
    let mut new_bins: Vec<Option<Arc<Element>>> = vec![None; bins];
    let mut cursor = list;
    while let Some(element) = cursor {
        let index = bin_index(bins, element.key());
        let chain = new_bins[index].take();
        new_bins[index] = Some(Element::new(element.property.clone(), chain));
        cursor = element.next.as_ref();
    }
    new_bins
}

/// Persistent map from key to property
#[derive(Clone)]
pub struct PropertyTable {
    size: usize,
    threshold: usize,
    bins: Option<Arc<[Option<Arc<Element>>]>>,
    list: Option<Arc<Element>>,
    ordered: OnceLock<Arc<[Arc<Property>]>>,
}

impl PropertyTable {
    /// Empty table
    pub fn new() -> Self {
        Self::from_parts(0, None, None)
    }

    /// Table holding `properties`, in order
    pub fn from_properties(properties: impl IntoIterator<Item = Property>) -> Self {
        properties
            .into_iter()
            .fold(Self::new(), |table, property| table.with_added(Arc::new(property)))
    }

    fn from_parts(
        size: usize,
        bins: Option<Vec<Option<Arc<Element>>>>,
        list: Option<Arc<Element>>,
    ) -> Self {
        let threshold = bins.as_ref().map_or(0, |bins| three_quarters(bins.len()));
        Self {
            size,
            threshold,
            bins: bins.map(Arc::from),
            list,
            ordered: OnceLock::new(),
        }
    }

    /// Number of properties
    pub fn size(&self) -> usize {
        self.size
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Whether the bucket array is in use
    pub fn is_hashed(&self) -> bool {
        self.bins.is_some()
    }

    /// Look up a property by key
    pub fn find(&self, key: &PropertyKey) -> Option<&Arc<Property>> {
        let chain = match &self.bins {
            Some(bins) => bins[bin_index(bins.len(), key)].as_ref(),
            None => self.list.as_ref(),
        };
        find_element(chain, key).map(|element| &element.property)
    }

    /// Check if a key is present
    pub fn contains(&self, key: &PropertyKey) -> bool {
        self.find(key).is_some()
    }

    /// Bucket array for a table of `new_size` entries: none while small, a fresh
    /// rehash when past the threshold, a copy of the current one otherwise.
    fn clone_bins(&self, new_size: usize) -> Option<Vec<Option<Arc<Element>>>> {
        if self.bins.is_none() && new_size <= LIST_THRESHOLD {
            None
        } else if new_size > self.threshold {
            Some(rehash(self.list.as_ref(), bins_needed(new_size)))
        } else {
            self.bins.as_ref().map(|bins| bins.to_vec())
        }
    }

    /// New table with `property` added. An existing entry for the same key is
    /// removed first, so the new one becomes the most recent.
    pub fn with_added(&self, property: Arc<Property>) -> Self {
        let key = property.key().clone();
        let mut size = self.size + 1;
        let mut bins = self.clone_bins(size);
        let mut list = self.list.clone();

        match bins.as_mut() {
            Some(bins) => {
                let index = bin_index(bins.len(), &key);
                let mut chain = bins[index].take();
                if find_element(chain.as_ref(), &key).is_some() {
                    size -= 1;
                    chain = rebuild_chain(chain.as_ref(), &key, None);
                    list = rebuild_chain(list.as_ref(), &key, None);
                }
                bins[index] = Some(Element::new(property.clone(), chain));
            }
            None => {
                if find_element(list.as_ref(), &key).is_some() {
                    size -= 1;
                    list = rebuild_chain(list.as_ref(), &key, None);
                }
            }
        }

        Self::from_parts(size, bins, Some(Element::new(property, list)))
    }

    /// New table without `key`. Returns an equal table when the key is absent.
    pub fn with_removed(&self, key: &PropertyKey) -> Self {
        if !self.contains(key) {
            return self.clone();
        }
        let size = self.size - 1;
        let list = rebuild_chain(self.list.as_ref(), key, None);
        let bins = match &self.bins {
            Some(bins) if size >= LIST_THRESHOLD => {
                let mut bins = bins.to_vec();
                let index = bin_index(bins.len(), key);
                bins[index] = rebuild_chain(bins[index].as_ref(), key, None);
                Some(bins)
            }
            _ => None,
        };
        Self::from_parts(size, bins, list)
    }

    /// New table with `old` replaced by `new`.
    ///
    /// # Panics
    /// If `old` is not in the table, if the keys differ, or if a same-kind
    /// replacement moves the property to another slot.
    pub fn with_replaced(&self, old: &Property, new: Arc<Property>) -> Self {
        assert!(
            old.key() == new.key(),
            "replacing {} with a property for {}",
            old.key(),
            new.key()
        );
        assert!(
            old.kind() != new.kind() || old.slot() == new.slot(),
            "replacement for {} changes slot {} to {}",
            old.key(),
            old.slot(),
            new.slot()
        );
        assert!(
            self.contains(old.key()),
            "replacing {} which is not in the table",
            old.key()
        );

        let key = old.key();
        let mut bins = self.clone_bins(self.size);
        if let Some(bins) = bins.as_mut() {
            let index = bin_index(bins.len(), key);
            bins[index] = rebuild_chain(bins[index].as_ref(), key, Some(new.clone()));
        }
        let list = rebuild_chain(self.list.as_ref(), key, Some(new));
        Self::from_parts(self.size, bins, list)
    }

    /// Properties in insertion order. Built once per table and cached.
    pub fn properties(&self) -> Arc<[Arc<Property>]> {
        self.ordered
            .get_or_init(|| {
                let mut properties = Vec::with_capacity(self.size);
                let mut cursor = self.list.as_ref();
                while let Some(element) = cursor {
                    properties.push(element.property.clone());
                    cursor = element.next.as_ref();
                }
                properties.reverse();
                properties.into()
            })
            .clone()
    }

    /// Keys in insertion order
    pub fn keys(&self) -> Vec<PropertyKey> {
        self.properties()
            .iter()
            .map(|property| property.key().clone())
            .collect()
    }

    /// Same keys mapped to structurally equal properties
    pub fn structurally_equals(&self, other: &PropertyTable) -> bool {
        self.size == other.size
            && self
                .properties()
                .iter()
                .all(|property| other.find(property.key()).is_some_and(|p| **p == **property))
    }
}

impl Default for PropertyTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PropertyTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.properties().iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::PropertyFlags;
    use crate::types::ValueType;

    fn prop(name: &str, slot: usize) -> Arc<Property> {
        Arc::new(Property::spill(
            PropertyKey::from(name),
            PropertyFlags::empty(),
            slot,
            ValueType::Object,
        ))
    }

    fn table_of(n: usize) -> PropertyTable {
        (0..n).fold(PropertyTable::new(), |table, i| {
            table.with_added(prop(&format!("p{}", i), i))
        })
    }

    #[test]
    fn test_bins_needed() {
        assert_eq!(bins_needed(8), 32);
        assert_eq!(bins_needed(21), 32);
        assert_eq!(bins_needed(22), 64);
        assert_eq!(bins_needed(43), 128);
        assert_eq!(three_quarters(32), 24);
    }

    #[test]
    fn test_small_tables_use_list_only() {
        let table = table_of(LIST_THRESHOLD);
        assert!(!table.is_hashed());
        let table = table.with_added(prop("extra", 99));
        assert!(table.is_hashed());
        assert_eq!(table.size(), LIST_THRESHOLD + 1);
        for i in 0..LIST_THRESHOLD {
            assert!(table.contains(&PropertyKey::from(format!("p{}", i))));
        }
    }

    #[test]
    fn test_rehash_past_threshold() {
        let table = table_of(100);
        assert_eq!(table.size(), 100);
        for i in 0..100 {
            let key = PropertyKey::from(format!("p{}", i));
            assert_eq!(table.find(&key).unwrap().slot(), i);
        }
        assert!(table.find(&PropertyKey::from("missing")).is_none());
    }

    #[test]
    fn test_add_then_remove_restores_structure() {
        for n in [0, 3, 7, 8, 30] {
            let table = table_of(n);
            let added = table.with_added(prop("x", 1000));
            let removed = added.with_removed(&PropertyKey::from("x"));
            assert!(removed.structurally_equals(&table), "size {}", n);
            assert!(!table.contains(&PropertyKey::from("x")));
            assert!(added.contains(&PropertyKey::from("x")));
        }
    }

    #[test]
    fn test_duplicate_key_last_add_wins() {
        let table = table_of(3).with_added(prop("p1", 42));
        assert_eq!(table.size(), 3);
        assert_eq!(table.find(&PropertyKey::from("p1")).unwrap().slot(), 42);
        assert_eq!(
            table.keys(),
            vec![
                PropertyKey::from("p0"),
                PropertyKey::from("p2"),
                PropertyKey::from("p1")
            ]
        );

        let hashed = table_of(20).with_added(prop("p5", 77));
        assert_eq!(hashed.size(), 20);
        assert_eq!(hashed.find(&PropertyKey::from("p5")).unwrap().slot(), 77);
        assert_eq!(hashed.properties().len(), 20);
    }

    #[test]
    fn test_remove_below_threshold_drops_bins() {
        let table = table_of(LIST_THRESHOLD);
        let hashed = table.with_added(prop("extra", 99));
        assert!(hashed.is_hashed());
        let shrunk = hashed
            .with_removed(&PropertyKey::from("extra"))
            .with_removed(&PropertyKey::from("p0"));
        assert!(!shrunk.is_hashed());
        assert_eq!(shrunk.size(), LIST_THRESHOLD - 1);
        assert!(shrunk.contains(&PropertyKey::from("p7")));
    }

    #[test]
    fn test_replace_keeps_order_and_leaves_original() {
        let table = table_of(12);
        let old = table.find(&PropertyKey::from("p4")).unwrap().clone();
        let widened = Arc::new(old.with_type(ValueType::Double));
        let replaced = table.with_replaced(&old, widened);
        assert_eq!(replaced.keys(), table.keys());
        assert_eq!(
            replaced.find(&PropertyKey::from("p4")).unwrap().current_type(),
            ValueType::Double
        );
        assert_eq!(
            table.find(&PropertyKey::from("p4")).unwrap().current_type(),
            ValueType::Object
        );
    }

    #[test]
    #[should_panic]
    fn test_replace_missing_property_panics() {
        let table = table_of(2);
        let stray = prop("nope", 0);
        table.with_replaced(&stray, stray.clone());
    }

    #[test]
    fn test_properties_cached_in_insertion_order() {
        let table = table_of(10);
        let first = table.properties();
        let second = table.properties();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first[0].key(), &PropertyKey::from("p0"));
        assert_eq!(first[9].key(), &PropertyKey::from("p9"));
    }

    #[test]
    fn test_long_table_drops_without_overflow() {
        let table = table_of(5_000);
        assert_eq!(table.size(), 5_000);
        drop(table);
    }
}
