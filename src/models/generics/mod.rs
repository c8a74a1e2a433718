//! Generic models shared by many device types.
pub mod onoff;

/// Generic Default Transition Time / Transition Time encoding. 2-bit step resolution plus 6-bit
/// number of steps. `0x3F` steps means unknown.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Default)]
pub struct TransitionTime(u8);
impl TransitionTime {
    #[must_use]
    pub const fn new(raw: u8) -> Self {
        Self(raw)
    }
    #[must_use]
    pub const fn steps(self) -> u8 {
        self.0 & 0x3F
    }
    #[must_use]
    pub const fn resolution(self) -> u8 {
        self.0 >> 6
    }
    #[must_use]
    pub const fn is_unknown(self) -> bool {
        self.steps() == 0x3F
    }
    #[must_use]
    pub const fn value(self) -> u8 {
        self.0
    }
}
