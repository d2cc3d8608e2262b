//! Table metadata consumed by the record segments.

/// A table's storage descriptor: which segments hold its records and its
/// free-space inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub name: String,
    pub sp_segment: u16,
    pub fsi_segment: u16,
}

impl Table {
    pub fn new(name: impl Into<String>, sp_segment: u16, fsi_segment: u16) -> Self {
        Self {
            name: name.into(),
            sp_segment,
            fsi_segment,
        }
    }
}
