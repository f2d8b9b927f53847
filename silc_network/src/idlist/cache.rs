use std::collections::HashMap;
use std::hash::Hash;

/// The keys an entry is cached under
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<I> {
    pub id: Option<I>,
    pub name: Option<String>,
}

/// One keyed collection of an ID list: lookups by unique ID, by (casefolded)
/// name, and by the entry's own handle. Entries without an ID yet, such as a
/// client that has connected but not registered, are reachable by handle only.
#[derive(Debug, Clone)]
pub struct IdCache<I, R> {
    by_id: HashMap<I, R>,
    by_name: HashMap<String, Vec<R>>,
    by_context: HashMap<R, CacheEntry<I>>,
}

impl<I, R> Default for IdCache<I, R> {
    fn default() -> Self {
        Self {
            by_id: HashMap::new(),
            by_name: HashMap::new(),
            by_context: HashMap::new(),
        }
    }
}

impl<I, R> IdCache<I, R>
where
    I: Eq + Hash + Copy,
    R: Eq + Hash + Copy,
{
    /// Returns false, changing nothing, if the ID or the handle is already cached.
    pub fn add(&mut self, name: Option<String>, id: Option<I>, context: R) -> bool {
        if self.by_context.contains_key(&context) {
            return false;
        }
        if let Some(id) = id {
            if self.by_id.contains_key(&id) {
                return false;
            }
            self.by_id.insert(id, context);
        }
        if let Some(name) = &name {
            self.by_name.entry(name.clone()).or_default().push(context);
        }
        self.by_context.insert(context, CacheEntry { id, name });
        true
    }

    pub fn find_by_id(&self, id: &I) -> Option<R> {
        self.by_id.get(id).copied()
    }

    pub fn find_by_name(&self, name: &str) -> &[R] {
        self.by_name.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn find_by_context(&self, context: R) -> Option<&CacheEntry<I>> {
        self.by_context.get(&context)
    }

    pub fn contains(&self, context: R) -> bool {
        self.by_context.contains_key(&context)
    }

    /// Detach every index entry for `context`
    pub fn del_by_context(&mut self, context: R) -> Option<CacheEntry<I>> {
        let entry = self.by_context.remove(&context)?;
        if let Some(id) = &entry.id {
            self.by_id.remove(id);
        }
        if let Some(name) = &entry.name {
            self.remove_name(name, context);
        }
        Some(entry)
    }

    /// Re-key an entry. Fails if the new ID belongs to a different entry.
    pub fn update_by_context(&mut self, context: R, new_id: Option<I>, new_name: Option<String>) -> bool {
        if let Some(id) = &new_id {
            match self.by_id.get(id) {
                Some(owner) if *owner != context => return false,
                _ => (),
            }
        }

        let old = match self.by_context.get(&context) {
            Some(old) => old.clone(),
            None => return false,
        };

        if let Some(id) = &old.id {
            self.by_id.remove(id);
        }
        if let Some(name) = &old.name {
            self.remove_name(name, context);
        }

        if let Some(id) = new_id {
            self.by_id.insert(id, context);
        }
        if let Some(name) = &new_name {
            self.by_name.entry(name.clone()).or_default().push(context);
        }
        self.by_context.insert(
            context,
            CacheEntry {
                id: new_id,
                name: new_name,
            },
        );
        true
    }

    fn remove_name(&mut self, name: &str, context: R) {
        if let Some(list) = self.by_name.get_mut(name) {
            list.retain(|c| *c != context);
            if list.is_empty() {
                self.by_name.remove(name);
            }
        }
    }

    pub fn contexts(&self) -> impl Iterator<Item = R> + '_ {
        self.by_context.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.by_context.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_context.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn update_rekeys_all_indexes() {
        let mut cache: IdCache<u32, u8> = IdCache::default();
        assert!(cache.add(Some("alice".into()), Some(1), 10));
        assert!(cache.update_by_context(10, Some(2), Some("bob".into())));

        assert_eq!(cache.find_by_id(&1), None);
        assert_eq!(cache.find_by_id(&2), Some(10));
        assert!(cache.find_by_name("alice").is_empty());
        assert_eq!(cache.find_by_name("bob"), &[10]);
    }

    #[test]
    fn duplicate_ids_are_refused() {
        let mut cache: IdCache<u32, u8> = IdCache::default();
        assert!(cache.add(None, Some(1), 10));
        assert!(!cache.add(None, Some(1), 11));
        assert!(cache.add(None, Some(2), 11));
        assert!(!cache.update_by_context(11, Some(1), None));
        assert_eq!(cache.find_by_id(&2), Some(11));
    }

    #[test]
    fn names_can_be_shared() {
        let mut cache: IdCache<u32, u8> = IdCache::default();
        cache.add(Some("x".into()), Some(1), 10);
        cache.add(Some("x".into()), Some(2), 11);
        cache.del_by_context(10);
        assert_eq!(cache.find_by_name("x"), &[11]);
    }
}
