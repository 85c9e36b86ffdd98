//! The virtual Replica Exchange primary bag and secondary recycle FIFO,
//! one pair per nominal grid position (spec.md §4.5, grounded in
//! `vre.h`'s `popVRE`/`pushVRE`).

use rand::Rng;

use dr_types::{DEFAULT_VRE_PRIMARY_CAPACITY, DEFAULT_VRE_SECONDARY_CAPACITY};

#[derive(Debug, Clone, Copy, PartialEq)]
struct VreItem {
    value: f32,
    source: i64,
}

/// The result of a successful [`VreStore::pop`]. `source` is `None` when
/// the value came from the secondary bag rather than the primary one —
/// mirroring the original's `source = -1` sentinel, spelled as an
/// `Option` here instead of a magic number.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Popped {
    pub value: f32,
    pub source: Option<i64>,
}

#[derive(Debug, Clone)]
struct PrimaryBag {
    capacity: usize,
    items: Vec<VreItem>,
}

impl PrimaryBag {
    fn new(capacity: usize) -> Self {
        PrimaryBag {
            capacity,
            items: Vec::new(),
        }
    }

    /// Appends, or silently drops if full — not an error (spec.md §4.5).
    fn push(&mut self, source: i64, value: f32) {
        if self.items.len() < self.capacity {
            self.items.push(VreItem { value, source });
        }
    }

    /// Scans from the end for the last entry whose source differs from
    /// `requester`, swap-removes it.
    fn pop_not_from(&mut self, requester: i64) -> Option<VreItem> {
        let idx = self.items.iter().rposition(|item| item.source != requester)?;
        let last = self.items.len() - 1;
        self.items.swap(idx, last);
        self.items.pop()
    }
}

#[derive(Debug, Clone)]
struct SecondaryFifo {
    capacity: usize,
    items: Vec<f32>,
    recycle_cursor: Option<usize>,
}

impl SecondaryFifo {
    fn new(capacity: usize) -> Self {
        SecondaryFifo {
            capacity,
            items: Vec::new(),
            recycle_cursor: None,
        }
    }

    /// Appends if there's room; otherwise overwrites via a rotating
    /// cursor that advances past whatever it just overwrote, per the
    /// "cycle about used values" comment in `vre.h`.
    fn push(&mut self, value: f32) {
        if self.items.len() < self.capacity {
            self.items.push(value);
            return;
        }
        let cursor = match self.recycle_cursor {
            Some(c) if c < self.items.len() => c,
            _ => 0,
        };
        self.items[cursor] = value;
        self.recycle_cursor = Some(cursor + 1);
    }

    fn pop_uniform(&self, rng: &mut impl Rng) -> Option<f32> {
        if self.items.is_empty() {
            return None;
        }
        let idx = rng.gen_range(0..self.items.len());
        Some(self.items[idx])
    }
}

/// One primary/secondary pair per nominal grid position.
#[derive(Debug, Clone)]
pub struct VreStore {
    primary: Vec<PrimaryBag>,
    secondary: Vec<SecondaryFifo>,
}

impl VreStore {
    pub fn new(n_positions: usize, primary_capacity: Option<usize>, secondary_capacity: Option<usize>) -> Self {
        let primary_cap = primary_capacity.unwrap_or(DEFAULT_VRE_PRIMARY_CAPACITY);
        let secondary_cap = secondary_capacity.unwrap_or(DEFAULT_VRE_SECONDARY_CAPACITY);
        VreStore {
            primary: (0..n_positions).map(|_| PrimaryBag::new(primary_cap)).collect(),
            secondary: (0..n_positions).map(|_| SecondaryFifo::new(secondary_cap)).collect(),
        }
    }

    pub fn n_positions(&self) -> usize {
        self.primary.len()
    }

    pub fn push(&mut self, nominal: usize, source: i64, value: f32) {
        self.primary[nominal].push(source, value);
    }

    /// Pops a cancellation value for a proposed move to `target`. Tries
    /// the primary bag first; falls back to a uniform pick from the
    /// secondary FIFO; `None` means both are empty and the vRE move
    /// itself must be rejected.
    pub fn pop(&mut self, target: usize, requester: i64, rng: &mut impl Rng) -> Option<Popped> {
        if let Some(item) = self.primary[target].pop_not_from(requester) {
            self.secondary[target].push(item.value);
            return Some(Popped {
                value: item.value,
                source: Some(item.source),
            });
        }
        self.secondary[target].pop_uniform(rng).map(|value| Popped { value, source: None })
    }

    pub fn primary_len(&self, nominal: usize) -> usize {
        self.primary[nominal].items.len()
    }

    pub fn secondary_len(&self, nominal: usize) -> usize {
        self.secondary[nominal].items.len()
    }

    /// `(value, source)` pairs currently held in a position's primary bag,
    /// in storage order — used when serializing a snapshot.
    pub fn primary_items(&self, nominal: usize) -> Vec<(f32, i64)> {
        self.primary[nominal].items.iter().map(|item| (item.value, item.source)).collect()
    }

    /// Values currently held in a position's secondary FIFO, in storage
    /// order — used when serializing a snapshot.
    pub fn secondary_items(&self, nominal: usize) -> Vec<f32> {
        self.secondary[nominal].items.clone()
    }

    /// Rebuilds a store from snapshot-loaded contents. Capacities are
    /// fixed at the defaults; a restored bag that already holds more
    /// items than that (from a run with a larger configured capacity)
    /// keeps all of them; capacity is only enforced on subsequent pushes.
    pub fn from_raw_parts(primary: Vec<Vec<(f32, i64)>>, secondary: Vec<Vec<f32>>) -> Self {
        let primary = primary
            .into_iter()
            .map(|items| {
                let capacity = items.len().max(DEFAULT_VRE_PRIMARY_CAPACITY);
                PrimaryBag {
                    capacity,
                    items: items.into_iter().map(|(value, source)| VreItem { value, source }).collect(),
                }
            })
            .collect();
        let secondary = secondary
            .into_iter()
            .map(|items| {
                let capacity = items.len().max(DEFAULT_VRE_SECONDARY_CAPACITY);
                SecondaryFifo {
                    capacity,
                    items,
                    recycle_cursor: None,
                }
            })
            .collect();
        VreStore { primary, secondary }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn push_then_pop_from_primary_deposits_into_secondary() {
        let mut store = VreStore::new(2, Some(4), Some(4));
        store.push(0, 7, 1.5);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let popped = store.pop(0, 3, &mut rng).unwrap();
        assert_eq!(popped.value, 1.5);
        assert_eq!(popped.source, Some(7));
        assert_eq!(store.primary_len(0), 0);
        assert_eq!(store.secondary_len(0), 1);
    }

    #[test]
    fn pop_refuses_an_entry_from_the_requester_itself() {
        let mut store = VreStore::new(1, Some(4), Some(4));
        store.push(0, 5, 9.0);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        // only entry is from replica 5 itself; primary fails, secondary
        // is empty too, so the whole pop fails.
        assert!(store.pop(0, 5, &mut rng).is_none());
    }

    #[test]
    fn primary_push_silently_drops_when_full() {
        let mut store = VreStore::new(1, Some(1), Some(4));
        store.push(0, 1, 1.0);
        store.push(0, 2, 2.0);
        assert_eq!(store.primary_len(0), 1);
    }

    #[test]
    fn secondary_recycles_with_a_rotating_cursor_when_full() {
        let mut store = VreStore::new(1, Some(8), Some(2));
        store.push(0, 1, 10.0);
        store.push(0, 2, 20.0);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        // fills secondary with 10.0 and 20.0, then the third pop recycles.
        store.pop(0, 99, &mut rng);
        store.pop(0, 99, &mut rng);
        store.pop(0, 99, &mut rng);
        assert_eq!(store.secondary_len(0), 2);
    }
}
