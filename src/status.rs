use std::fmt::{Display, Formatter};
use std::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Not};

/// Lifecycle flags of an [`Exchange`](crate::exchange::Exchange).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ExchangeState(pub u8);

impl ExchangeState {
    pub const IN_FLIGHT: Self = Self(0);
    pub const COMPLETED: Self = Self(1);
    pub const ABORTED: Self = Self(1 << 1);
    pub const ERROR: Self = Self(1 << 2);
    pub const NOT_FOUND: Self = Self(1 << 3);

    pub fn any_flags(&self, flags: ExchangeState) -> bool {
        self.0 & flags.0 != 0
    }

    pub fn all_flags(&self, flags: ExchangeState) -> bool {
        self.0 & flags.0 == flags.0
    }

    pub fn all_flags_clear(&self, flags: ExchangeState) -> bool {
        self.0 & flags.0 == 0
    }

    pub fn is_in_flight(&self) -> bool {
        self.all_flags_clear(ExchangeState::COMPLETED | ExchangeState::ABORTED)
    }

    pub fn is_complete(&self) -> bool {
        self.all_flags(ExchangeState::COMPLETED)
    }

    pub fn is_error(&self) -> bool {
        self.any_flags(ExchangeState::ERROR)
    }
}

impl Display for ExchangeState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04b}", self.0)
    }
}

impl BitOrAssign for ExchangeState {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0
    }
}

impl BitAndAssign for ExchangeState {
    fn bitand_assign(&mut self, rhs: Self) {
        self.0 &= rhs.0
    }
}

impl Not for ExchangeState {
    type Output = Self;

    fn not(self) -> Self::Output {
        Self(!self.0)
    }
}

impl BitAnd for ExchangeState {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self::Output {
        Self(self.0 & rhs.0)
    }
}

impl BitOr for ExchangeState {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}
