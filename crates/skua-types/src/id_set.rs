/// Append-only set of job ids with a cheap write phase and a sorted query
/// phase.
///
/// The download engine records partial and failed job ids while the backup
/// runs, then calls [`finalize`](IdSet::finalize) once at termination. Before
/// finalization lookups scan linearly (they only happen in tests and
/// diagnostics); afterwards they binary-search.
#[derive(Debug, Default)]
pub struct IdSet {
    ids: Vec<u64>,
    finalized: bool,
}

impl IdSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an id. Duplicates are tolerated and collapsed by `finalize`.
    pub fn add(&mut self, id: u64) {
        debug_assert!(!self.finalized, "add after finalize");
        self.ids.push(id);
    }

    pub fn contains(&self, id: u64) -> bool {
        if self.finalized {
            self.ids.binary_search(&id).is_ok()
        } else {
            self.ids.contains(&id)
        }
    }

    /// Sort and deduplicate for fast queries. Idempotent.
    pub fn finalize(&mut self) {
        if !self.finalized {
            self.ids.sort_unstable();
            self.ids.dedup();
            self.finalized = true;
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.ids.iter().copied()
    }
}
