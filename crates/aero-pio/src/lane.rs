use core::fmt;

/// Index of one lane (state machine) in the block.
///
/// A lane owns exactly one bit of the event status word: lane `i` raises bit `1 << i`.
/// `LaneId`s are handed out by [`crate::LaneConfig::lane`] so they are always in range for the
/// configuration that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LaneId(u8);

impl LaneId {
    pub(crate) const fn new(index: u8) -> Self {
        Self(index)
    }

    pub const fn index(self) -> u8 {
        self.0
    }

    pub const fn status_bit(self) -> u32 {
        1u32 << self.0
    }
}

impl fmt::Display for LaneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lane{}", self.0)
    }
}

/// Iterates the lanes whose bits are set in `flags`, lowest first.
pub fn lanes_in(flags: u32) -> impl Iterator<Item = LaneId> {
    (0u8..32)
        .filter(move |bit| flags & (1u32 << bit) != 0)
        .map(LaneId::new)
}
