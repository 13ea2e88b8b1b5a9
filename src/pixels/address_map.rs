use std::collections::BTreeMap;

use crate::scene::Fixture;

/// Strand lengths derived from the scene's fixture list.
///
/// A strand is as long as the furthest pixel any fixture on it owns. Fixture
/// ranges may overlap; that only affects which fixtures show the same pixels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressMap {
    lengths: BTreeMap<u8, usize>,
}

impl AddressMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixtures(fixtures: &[Fixture]) -> Self {
        let mut map = Self::new();
        map.rebuild(fixtures);
        map
    }

    /// Recompute every strand length from scratch.
    pub fn rebuild(&mut self, fixtures: &[Fixture]) {
        self.lengths.clear();
        // Zero-pixel fixtures own nothing, so their address does not extend the strand
        for fixture in fixtures.iter().filter(|f| f.pixels > 0) {
            let length = self.lengths.entry(fixture.strand).or_insert(0);
            *length = (*length).max(fixture.end());
        }
    }

    /// Length of a strand in pixels, 0 if no fixture uses it.
    pub fn strand_length(&self, strand: u8) -> usize {
        self.lengths.get(&strand).copied().unwrap_or(0)
    }

    /// `(strand, length)` pairs in strand order.
    pub fn strands(&self) -> impl Iterator<Item = (u8, usize)> + '_ {
        self.lengths.iter().map(|(&strand, &length)| (strand, length))
    }

    /// True if every strand in `other` exists here and is at least as long.
    pub fn covers(&self, other: &AddressMap) -> bool {
        other
            .strands()
            .all(|(strand, length)| self.strand_length(strand) >= length)
    }

    pub fn total_pixels(&self) -> usize {
        self.lengths.values().sum()
    }
}
