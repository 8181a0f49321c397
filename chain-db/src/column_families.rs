//! Column family definitions for the ledger database
//!
//! This module defines the column families used to organize data
//! in the key-value store.

/// Column family names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnFamily {
    /// Balances ((owner key, asset id) -> amount)
    Balances,
    /// Account statistics (account id -> pending fee totals)
    Statistics,
    /// Fee pools (asset id -> reserve and accumulated fees)
    FeePools,
    /// Execution results (result id -> result)
    Results,
    /// Attracted contracts per result (result id -> [contract id])
    Attracted,
    /// Reverse touch index ((contract id, result id) -> empty)
    Touches,
    /// Ledger undo log ((block number, sequence) -> delta)
    UndoLog,
    /// Engine metadata (name -> value)
    Meta,
}

impl ColumnFamily {
    /// Get the string name for this column family
    pub fn name(&self) -> &'static str {
        match self {
            ColumnFamily::Balances => "balances",
            ColumnFamily::Statistics => "statistics",
            ColumnFamily::FeePools => "fee_pools",
            ColumnFamily::Results => "results",
            ColumnFamily::Attracted => "attracted",
            ColumnFamily::Touches => "touches",
            ColumnFamily::UndoLog => "undo_log",
            ColumnFamily::Meta => "meta",
        }
    }

    /// Get all column families
    pub fn all() -> &'static [ColumnFamily] {
        &[
            ColumnFamily::Balances,
            ColumnFamily::Statistics,
            ColumnFamily::FeePools,
            ColumnFamily::Results,
            ColumnFamily::Attracted,
            ColumnFamily::Touches,
            ColumnFamily::UndoLog,
            ColumnFamily::Meta,
        ]
    }

    /// Get column family from name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::all().iter().copied().find(|cf| cf.name() == name)
    }
}

impl std::fmt::Display for ColumnFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_family_names() {
        assert_eq!(ColumnFamily::Balances.name(), "balances");
        assert_eq!(ColumnFamily::FeePools.name(), "fee_pools");
        assert_eq!(ColumnFamily::UndoLog.name(), "undo_log");
    }

    #[test]
    fn test_column_family_from_name() {
        for cf in ColumnFamily::all() {
            assert_eq!(ColumnFamily::from_name(cf.name()), Some(*cf));
        }
        assert_eq!(ColumnFamily::from_name("headers"), None);
    }
}
