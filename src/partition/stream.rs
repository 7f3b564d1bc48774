//! Streaming partitioner
//!
//! Cuts an input iterator into consecutive, non-empty partitions. The cut
//! oracle is consulted between elements, after the previous element has been
//! handed out (and so appended to the caller's sink), and before the next one
//! is handed out. When it says cut, the next element starts a new partition.
//!
//! Partitions borrow the partitioner mutably, so they are consumed one at a
//! time and in order. Dropping a partition early simply starts the next
//! partition at the first element not yet handed out.

/// Lazy sequence of partitions over `input`
pub struct StreamPartitioner<I: Iterator, F> {
    input: I,
    should_cut: F,
    /// Element pulled from `input` but not yet handed out
    pending: Option<I::Item>,
    exhausted: bool,
    partitions: usize,
}

/// Build a partitioner; see [`StreamPartitioner::next_partition`]
pub fn partition<I, F>(should_cut: F, input: I) -> StreamPartitioner<I::IntoIter, F>
where
    I: IntoIterator,
    F: FnMut() -> bool,
{
    StreamPartitioner::new(input.into_iter(), should_cut)
}

impl<I, F> StreamPartitioner<I, F>
where
    I: Iterator,
    F: FnMut() -> bool,
{
    pub fn new(input: I, should_cut: F) -> Self {
        StreamPartitioner {
            input,
            should_cut,
            pending: None,
            exhausted: false,
            partitions: 0,
        }
    }

    /// Next partition, or `None` once the input is exhausted
    ///
    /// Never yields an empty partition: empty input produces no partitions.
    pub fn next_partition(&mut self) -> Option<Partition<'_, I, F>> {
        if self.pending.is_none() {
            self.pending = self.pull();
        }
        self.pending.as_ref()?;
        self.partitions += 1;
        Some(Partition {
            owner: self,
            handed_out: 0,
            closed: false,
        })
    }

    /// Number of partitions started so far
    pub fn partitions_started(&self) -> usize {
        self.partitions
    }

    fn pull(&mut self) -> Option<I::Item> {
        if self.exhausted {
            return None;
        }
        let item = self.input.next();
        if item.is_none() {
            self.exhausted = true;
        }
        item
    }

    /// Drain into owned vectors (one per partition)
    pub fn collect_partitions(mut self) -> Vec<Vec<I::Item>> {
        let mut out = Vec::new();
        while let Some(part) = self.next_partition() {
            out.push(part.collect());
        }
        out
    }
}

/// One partition of a [`StreamPartitioner`]
pub struct Partition<'a, I: Iterator, F> {
    owner: &'a mut StreamPartitioner<I, F>,
    handed_out: usize,
    closed: bool,
}

impl<I, F> Partition<'_, I, F>
where
    I: Iterator,
    F: FnMut() -> bool,
{
    /// Elements handed out by this partition so far
    pub fn len(&self) -> usize {
        self.handed_out
    }

    pub fn is_empty(&self) -> bool {
        self.handed_out == 0
    }
}

impl<I, F> Iterator for Partition<'_, I, F>
where
    I: Iterator,
    F: FnMut() -> bool,
{
    type Item = I::Item;

    fn next(&mut self) -> Option<I::Item> {
        if self.closed {
            return None;
        }
        let item = match self.owner.pending.take() {
            Some(item) => item,
            None => match self.owner.pull() {
                Some(item) => item,
                None => {
                    self.closed = true;
                    return None;
                }
            },
        };

        // The first element of a partition is never cut away
        if self.handed_out > 0 && (self.owner.should_cut)() {
            self.owner.pending = Some(item);
            self.closed = true;
            return None;
        }

        self.handed_out += 1;
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_cut_every_three() {
        let appended = Cell::new(0usize);
        let mut partitioner = partition(|| appended.get() % 3 == 0, 1..=8);

        let mut parts = Vec::new();
        while let Some(part) = partitioner.next_partition() {
            let mut items = Vec::new();
            for x in part {
                items.push(x);
                appended.set(appended.get() + 1);
            }
            parts.push(items);
        }

        assert_eq!(parts, vec![vec![1, 2, 3], vec![4, 5, 6], vec![7, 8]]);
        assert_eq!(partitioner.partitions_started(), 3);
    }

    #[test]
    fn test_empty_input_has_no_partitions() {
        let parts = partition(|| true, Vec::<u8>::new()).collect_partitions();
        assert!(parts.is_empty());
    }

    #[test]
    fn test_always_cut_gives_singletons() {
        let parts = partition(|| true, vec!['a', 'b', 'c']).collect_partitions();
        assert_eq!(parts, vec![vec!['a'], vec!['b'], vec!['c']]);
    }

    #[test]
    fn test_never_cut_gives_one_partition() {
        let parts = partition(|| false, 0..100).collect_partitions();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].len(), 100);
    }

    #[test]
    fn test_dropped_partition_resumes_at_next_element() {
        let mut partitioner = partition(|| false, 0..5);
        {
            let mut first = partitioner.next_partition().unwrap();
            assert_eq!(first.next(), Some(0));
            assert_eq!(first.len(), 1);
        }
        let rest: Vec<_> = partitioner.next_partition().unwrap().collect();
        assert_eq!(rest, vec![1, 2, 3, 4]);
        assert!(partitioner.next_partition().is_none());
    }

    #[test]
    fn test_lazy_over_infinite_input() {
        let mut count = 0;
        let mut partitioner = partition(
            || {
                count += 1;
                count % 2 == 0
            },
            0u64..,
        );
        let first: Vec<_> = partitioner.next_partition().unwrap().collect();
        let second: Vec<_> = partitioner.next_partition().unwrap().collect();
        assert_eq!(first, vec![0, 1]);
        assert_eq!(second, vec![2, 3]);
    }
}
