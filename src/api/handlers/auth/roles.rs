//! Closed admin role set and allow-list checks.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Back-office roles. Stored as text in `admins.role`; parsing is strict so
/// an unknown value in the database surfaces as an error instead of a
/// silently unprivileged admin.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum AdminRole {
    SuperAdmin,
    FinanceAdmin,
    ApproverAdmin,
    ReporterAdmin,
}

impl AdminRole {
    pub const ALL: [Self; 4] = [
        Self::SuperAdmin,
        Self::FinanceAdmin,
        Self::ApproverAdmin,
        Self::ReporterAdmin,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SuperAdmin => "super-admin",
            Self::FinanceAdmin => "finance-admin",
            Self::ApproverAdmin => "approver-admin",
            Self::ReporterAdmin => "reporter-admin",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "super-admin" => Some(Self::SuperAdmin),
            "finance-admin" => Some(Self::FinanceAdmin),
            "approver-admin" => Some(Self::ApproverAdmin),
            "reporter-admin" => Some(Self::ReporterAdmin),
            _ => None,
        }
    }

    /// Allow-list membership check used by the permission gates.
    #[must_use]
    pub fn allowed(self, allow_list: &[Self]) -> bool {
        allow_list.contains(&self)
    }
}

impl std::fmt::Display for AdminRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips_every_role() {
        for role in AdminRole::ALL {
            assert_eq!(AdminRole::parse(role.as_str()), Some(role));
        }
    }

    #[test]
    fn parse_rejects_unknown_values() {
        assert_eq!(AdminRole::parse("root"), None);
        assert_eq!(AdminRole::parse("SUPER-ADMIN"), None);
        assert_eq!(AdminRole::parse(""), None);
    }

    #[test]
    fn allow_list_check() {
        let gate = [AdminRole::SuperAdmin];
        assert!(AdminRole::SuperAdmin.allowed(&gate));
        assert!(!AdminRole::ReporterAdmin.allowed(&gate));
        assert!(!AdminRole::FinanceAdmin.allowed(&gate));
    }

    #[test]
    fn serde_uses_kebab_case() {
        let value = serde_json::to_value(AdminRole::ApproverAdmin).expect("serialize");
        assert_eq!(value, serde_json::json!("approver-admin"));
        let parsed: AdminRole = serde_json::from_value(value).expect("deserialize");
        assert_eq!(parsed, AdminRole::ApproverAdmin);
    }
}
