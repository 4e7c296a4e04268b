use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Merges runs that are each already sorted by `compare`.
///
/// The heap holds one head per run, so each output element costs
/// `O(log k)`. Ties go to the lower run index, which keeps the result
/// deterministic in shard order. The output length is the sum of the run
/// lengths.
pub fn k_way_merge<T, C>(runs: Vec<Vec<T>>, compare: C) -> Vec<T>
where
    C: Fn(&T, &T) -> Ordering,
{
    let total = runs.iter().map(Vec::len).sum();
    let mut runs: Vec<std::vec::IntoIter<T>> = runs.into_iter().map(Vec::into_iter).collect();
    let mut merged = Vec::with_capacity(total);

    let mut heap = BinaryHeap::with_capacity(runs.len());
    for (run, items) in runs.iter_mut().enumerate() {
        if let Some(item) = items.next() {
            heap.push(HeapEntry { item, run, compare: &compare });
        }
    }

    while let Some(HeapEntry { item, run, .. }) = heap.pop() {
        merged.push(item);
        if let Some(next) = runs[run].next() {
            heap.push(HeapEntry { item: next, run, compare: &compare });
        }
    }

    merged
}

struct HeapEntry<'a, T, C> {
    item: T,
    run: usize,
    compare: &'a C,
}

impl<T, C> HeapEntry<'_, T, C>
where
    C: Fn(&T, &T) -> Ordering,
{
    fn order(&self, other: &Self) -> Ordering {
        (self.compare)(&self.item, &other.item).then(self.run.cmp(&other.run))
    }
}

impl<T, C> PartialEq for HeapEntry<'_, T, C>
where
    C: Fn(&T, &T) -> Ordering,
{
    fn eq(&self, other: &Self) -> bool {
        self.order(other) == Ordering::Equal
    }
}

impl<T, C> Eq for HeapEntry<'_, T, C> where C: Fn(&T, &T) -> Ordering {}

impl<T, C> PartialOrd for HeapEntry<'_, T, C>
where
    C: Fn(&T, &T) -> Ordering,
{
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T, C> Ord for HeapEntry<'_, T, C>
where
    C: Fn(&T, &T) -> Ordering,
{
    // BinaryHeap pops the greatest entry; reversed so the smallest head wins.
    fn cmp(&self, other: &Self) -> Ordering {
        other.order(self)
    }
}
