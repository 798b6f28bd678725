//! Reader decoration
//!
//! Callers wrap raw `SegmentReader`s in their own query facilities through a
//! `ReaderDecorator`. Decorated values are cached per segment so that a
//! rebuilt reader is redecorated from its predecessor instead of from scratch.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::segment::SegmentReader;

/// Wraps segment readers into caller-defined values
pub trait ReaderDecorator<R>: Send + Sync {
    fn decorate(&self, reader: &SegmentReader) -> R;

    /// Build the value for a newer snapshot of a segment already decorated as `prior`
    fn redecorate(&self, prior: R, reader: &SegmentReader) -> R {
        let _ = prior;
        self.decorate(reader)
    }
}

/// Hands back the reader itself
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityDecorator;

impl ReaderDecorator<SegmentReader> for IdentityDecorator {
    fn decorate(&self, reader: &SegmentReader) -> SegmentReader {
        reader.clone()
    }
}

impl<R, F> ReaderDecorator<R> for F
where
    F: Fn(&SegmentReader) -> R + Send + Sync,
{
    fn decorate(&self, reader: &SegmentReader) -> R {
        self(reader)
    }
}

struct Decorated<R> {
    reader: SegmentReader,
    value: R,
}

/// Last decorated value per segment name
pub struct DecoratorCache<R> {
    decorator: Arc<dyn ReaderDecorator<R>>,
    entries: Mutex<HashMap<String, Decorated<R>>>,
}

impl<R: Clone> DecoratorCache<R> {
    pub fn new(decorator: Arc<dyn ReaderDecorator<R>>) -> Self {
        Self {
            decorator,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Decorate `readers` in order, reusing values whose snapshot and overlay
    /// did not change. Segments absent from `readers` are evicted.
    pub fn decorate_all(&self, readers: &[SegmentReader]) -> Vec<R> {
        let mut entries = self.entries.lock();
        let live: HashSet<&str> = readers.iter().map(|r| r.name()).collect();
        entries.retain(|name, _| live.contains(name.as_str()));

        readers
            .iter()
            .map(|reader| {
                let value = match entries.remove(reader.name()) {
                    Some(cached) if unchanged(&cached.reader, reader) => cached.value,
                    Some(cached) => self.decorator.redecorate(cached.value, reader),
                    None => self.decorator.decorate(reader),
                };
                entries.insert(
                    reader.name().to_string(),
                    Decorated {
                        reader: reader.clone(),
                        value: value.clone(),
                    },
                );
                value
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Forget every cached value, dropping the readers they hold
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

fn unchanged(cached: &SegmentReader, current: &SegmentReader) -> bool {
    if !cached.same_snapshot(current) {
        return false;
    }
    match (cached.overlay(), current.overlay()) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::Uid;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        decorated: AtomicUsize,
        redecorated: AtomicUsize,
    }

    impl ReaderDecorator<(String, u64)> for Counting {
        fn decorate(&self, reader: &SegmentReader) -> (String, u64) {
            self.decorated.fetch_add(1, Ordering::SeqCst);
            (reader.name().to_string(), reader.generation())
        }

        fn redecorate(&self, _prior: (String, u64), reader: &SegmentReader) -> (String, u64) {
            self.redecorated.fetch_add(1, Ordering::SeqCst);
            (reader.name().to_string(), reader.generation())
        }
    }

    #[test]
    fn test_unchanged_readers_reuse_values() {
        let counting = Arc::new(Counting::default());
        let cache = DecoratorCache::new(counting.clone() as Arc<dyn ReaderDecorator<(String, u64)>>);
        let readers = vec![SegmentReader::empty("a"), SegmentReader::empty("b")];

        let first = cache.decorate_all(&readers);
        let second = cache.decorate_all(&readers);
        assert_eq!(first, second);
        assert_eq!(counting.decorated.load(Ordering::SeqCst), 2);
        assert_eq!(counting.redecorated.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_new_snapshot_is_redecorated() {
        let counting = Arc::new(Counting::default());
        let cache = DecoratorCache::new(counting.clone() as Arc<dyn ReaderDecorator<(String, u64)>>);

        cache.decorate_all(&[SegmentReader::empty("a")]);
        cache.decorate_all(&[SegmentReader::empty("a")]);
        assert_eq!(counting.decorated.load(Ordering::SeqCst), 1);
        assert_eq!(counting.redecorated.load(Ordering::SeqCst), 1);

        let reader = SegmentReader::empty("a");
        let overlay: Arc<HashSet<Uid>> = Arc::new([7].into_iter().collect());
        cache.decorate_all(&[reader.clone()]);
        cache.decorate_all(&[reader.with_overlay(overlay)]);
        assert_eq!(counting.redecorated.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_missing_segments_are_evicted() {
        let cache = DecoratorCache::new(Arc::new(IdentityDecorator) as Arc<dyn ReaderDecorator<SegmentReader>>);
        cache.decorate_all(&[SegmentReader::empty("a"), SegmentReader::empty("b")]);
        assert_eq!(cache.len(), 2);
        cache.decorate_all(&[SegmentReader::empty("b")]);
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
