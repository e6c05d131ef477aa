use std::fmt;

/// Correlation handle for one dispatched MPC computation.
///
/// The value is also the `computation_offset` instruction argument, so the cluster's
/// computation account (and the finalization event it emits) is keyed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComputationTicket(u64);

impl ComputationTicket {
    pub fn random() -> Self {
        Self(rand::random::<u64>())
    }

    pub const fn from_offset(offset: u64) -> Self {
        Self(offset)
    }

    pub const fn offset(&self) -> u64 {
        self.0
    }

    pub fn to_le_bytes(&self) -> [u8; 8] {
        self.0.to_le_bytes()
    }
}

impl fmt::Display for ComputationTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}
