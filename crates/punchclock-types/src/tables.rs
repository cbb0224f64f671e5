use std::fmt;

use serde::{Deserialize, Serialize};

/// Local storage key holding the (mocked) signed-in user id.
pub const CURRENT_USER_KEY: &str = "vc_current_user_id";

/// Hosted tables the core reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    SalaryRecords,
    SalaryPayments,
    TimeEntries,
    LeaveRequests,
    Notifications,
}

impl Table {
    pub const ALL: [Table; 5] = [
        Table::SalaryRecords,
        Table::SalaryPayments,
        Table::TimeEntries,
        Table::LeaveRequests,
        Table::Notifications,
    ];

    /// Table name on the hosted backend.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SalaryRecords => "salary_records",
            Self::SalaryPayments => "salary_payments",
            Self::TimeEntries => "time_entries",
            Self::LeaveRequests => "leave_requests",
            Self::Notifications => "notifications",
        }
    }

    /// Key of the local-storage mirror for this table.
    pub fn local_key(&self) -> &'static str {
        match self {
            Self::SalaryRecords => "vc_salary_records",
            Self::SalaryPayments => "vc_salary_payments",
            Self::TimeEntries => "vc_time_entries",
            Self::LeaveRequests => "vc_leave_requests",
            Self::Notifications => "vc_notifications",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_resolve_back_to_tables() {
        for table in Table::ALL {
            assert_eq!(Table::from_name(table.name()), Some(table));
            assert!(table.local_key().starts_with("vc_"));
        }
        assert_eq!(Table::from_name("users"), None);
    }
}
