//! # POS Functions
//!
//! The fixed registry of POS function keys and the role → function matrix
//! that decides whether a user may trigger one.
//!
//! ## Authorization
//! ```text
//! authorize(role, function, approver?)
//!   │
//!   ├─ role == admin ───────────────────────────────► Allow
//!   ├─ no mapping / allowed = false ────────────────► Deny (FUNCTION_NOT_ALLOWED)
//!   ├─ requires_approval = false ───────────────────► Allow
//!   ├─ approver role ∈ approver_roles(function) ────► Allow
//!   └─ otherwise ───────────────────────────────────► RequireApproval(approver_roles)
//!
//! approver_roles(f) = admin ∪ { r | r may use f without approval }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::types::Role;

// =============================================================================
// Registry
// =============================================================================

/// Function keys available on the terminal keyboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export)]
pub enum FunctionCode {
    F1,
    F2,
    F3,
    F4,
    F5,
    F6,
    F7,
    F8,
    F9,
    F10,
    F11,
    F12,
    AltF1,
    AltF2,
    AltF3,
    AltF4,
    AltF5,
    AltF6,
    CtrlF1,
    CtrlF2,
    CtrlF3,
    CtrlF4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum FunctionCategory {
    General,
    Billing,
    Payment,
    Session,
    Cash,
    Reports,
}

/// Registry entry for one function key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PosFunction {
    pub code: FunctionCode,
    pub name: &'static str,
    pub category: FunctionCategory,
    /// Critical functions need approval for plain cashiers.
    pub is_critical: bool,
}

const fn func(
    code: FunctionCode,
    name: &'static str,
    category: FunctionCategory,
    is_critical: bool,
) -> PosFunction {
    PosFunction {
        code,
        name,
        category,
        is_critical,
    }
}

/// Every function known to the system.
pub static REGISTRY: [PosFunction; 22] = {
    use FunctionCategory::*;
    use FunctionCode::*;
    [
        func(F1, "Help", General, false),
        func(F2, "Product Lookup", Billing, false),
        func(F3, "Customer Lookup", Billing, false),
        func(F4, "Change Quantity", Billing, false),
        func(F5, "Price Override", Billing, true),
        func(F6, "Line Discount", Billing, false),
        func(F7, "Void Line", Billing, true),
        func(F8, "Suspend Bill", Billing, false),
        func(F9, "Recall Bill", Billing, false),
        func(F10, "Tender Payment", Payment, false),
        func(F11, "Refund", Payment, true),
        func(F12, "Close Session", Session, false),
        func(AltF1, "Pay In", Cash, false),
        func(AltF2, "Pay Out", Cash, false),
        func(AltF3, "Interim Settlement", Cash, true),
        func(AltF4, "Suspend Session", Session, false),
        func(AltF5, "Resume Session", Session, false),
        func(AltF6, "Reprint Receipt", General, false),
        func(CtrlF1, "Void Bill", Billing, true),
        func(CtrlF2, "Force Quit", Session, true),
        func(CtrlF3, "Open Drawer", Cash, false),
        func(CtrlF4, "X Report", Reports, false),
    ]
};

impl FunctionCode {
    pub fn all() -> impl Iterator<Item = FunctionCode> {
        REGISTRY.iter().map(|f| f.code)
    }

    /// Registry entry for this code.
    pub fn definition(&self) -> &'static PosFunction {
        // REGISTRY lists every variant in declaration order
        &REGISTRY[*self as usize]
    }

    pub fn name(&self) -> &'static str {
        self.definition().name
    }

    pub fn is_critical(&self) -> bool {
        self.definition().is_critical
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            FunctionCode::F1 => "F1",
            FunctionCode::F2 => "F2",
            FunctionCode::F3 => "F3",
            FunctionCode::F4 => "F4",
            FunctionCode::F5 => "F5",
            FunctionCode::F6 => "F6",
            FunctionCode::F7 => "F7",
            FunctionCode::F8 => "F8",
            FunctionCode::F9 => "F9",
            FunctionCode::F10 => "F10",
            FunctionCode::F11 => "F11",
            FunctionCode::F12 => "F12",
            FunctionCode::AltF1 => "ALT_F1",
            FunctionCode::AltF2 => "ALT_F2",
            FunctionCode::AltF3 => "ALT_F3",
            FunctionCode::AltF4 => "ALT_F4",
            FunctionCode::AltF5 => "ALT_F5",
            FunctionCode::AltF6 => "ALT_F6",
            FunctionCode::CtrlF1 => "CTRL_F1",
            FunctionCode::CtrlF2 => "CTRL_F2",
            FunctionCode::CtrlF3 => "CTRL_F3",
            FunctionCode::CtrlF4 => "CTRL_F4",
        }
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Role Mapping
// =============================================================================

/// One cell of the role × function matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct RolePosFunctionMapping {
    pub role: Role,
    pub function_code: FunctionCode,
    pub allowed: bool,
    pub requires_approval: bool,
}

impl RolePosFunctionMapping {
    /// `requires_approval` only makes sense on an allowed function.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.requires_approval && !self.allowed {
            return Err(ValidationError::NotAllowed {
                field: "requires_approval".to_string(),
                reason: format!(
                    "{} for {} cannot require approval while not allowed",
                    self.function_code, self.role
                ),
            });
        }
        Ok(())
    }
}

/// Initial matrix for a fresh install.
///
/// admin and posmanager get everything (posmanager needs approval only for
/// Force Quit); posuser gets everything with approval on critical keys.
/// Back-office roles have no POS functions.
pub fn seeded_mappings() -> Vec<RolePosFunctionMapping> {
    let mut mappings = Vec::new();
    for function in REGISTRY.iter() {
        mappings.push(RolePosFunctionMapping {
            role: Role::Admin,
            function_code: function.code,
            allowed: true,
            requires_approval: false,
        });
        mappings.push(RolePosFunctionMapping {
            role: Role::PosManager,
            function_code: function.code,
            allowed: true,
            requires_approval: function.code == FunctionCode::CtrlF2,
        });
        mappings.push(RolePosFunctionMapping {
            role: Role::PosUser,
            function_code: function.code,
            allowed: true,
            requires_approval: function.is_critical,
        });
    }
    mappings
}

// =============================================================================
// Function Matrix
// =============================================================================

/// Result of an authorization request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionVerdict {
    Allow,
    RequireApproval { approver_roles: Vec<Role> },
    Deny { reason: String },
}

impl FunctionVerdict {
    pub fn into_result(self, function: FunctionCode, role: Role) -> CoreResult<()> {
        match self {
            FunctionVerdict::Allow => Ok(()),
            FunctionVerdict::RequireApproval { approver_roles } => Err(CoreError::ApprovalRequired {
                function: function.to_string(),
                approver_roles,
            }),
            FunctionVerdict::Deny { .. } => Err(CoreError::FunctionNotAllowed {
                function: function.to_string(),
                role,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Rule {
    allowed: bool,
    requires_approval: bool,
}

/// In-memory view of the role × function matrix.
#[derive(Debug, Clone, Default)]
pub struct FunctionMatrix {
    rules: HashMap<(Role, FunctionCode), Rule>,
}

impl FunctionMatrix {
    pub fn from_mappings<'a>(mappings: impl IntoIterator<Item = &'a RolePosFunctionMapping>) -> Self {
        let rules = mappings
            .into_iter()
            .map(|m| {
                (
                    (m.role, m.function_code),
                    Rule {
                        allowed: m.allowed,
                        requires_approval: m.requires_approval,
                    },
                )
            })
            .collect();
        FunctionMatrix { rules }
    }

    pub fn seeded() -> Self {
        Self::from_mappings(&seeded_mappings())
    }

    /// Whether `role` may use `function` with no approver present.
    pub fn allows_unapproved(&self, role: Role, function: FunctionCode) -> bool {
        if role.is_admin() {
            return true;
        }
        matches!(
            self.rules.get(&(role, function)),
            Some(Rule {
                allowed: true,
                requires_approval: false
            })
        )
    }

    /// Roles whose approval satisfies `function`, in ascending privilege.
    pub fn approver_roles(&self, function: FunctionCode) -> Vec<Role> {
        let mut roles: Vec<Role> = Role::ALL
            .into_iter()
            .filter(|r| self.allows_unapproved(*r, function))
            .collect();
        roles.sort_by_key(|r| privilege_rank(*r));
        roles
    }

    /// Decides whether `role` may trigger `function`, given the role of an
    /// already-verified approver (if one was supplied).
    pub fn authorize(
        &self,
        role: Role,
        function: FunctionCode,
        approver: Option<Role>,
    ) -> FunctionVerdict {
        if role.is_admin() {
            return FunctionVerdict::Allow;
        }

        let rule = match self.rules.get(&(role, function)) {
            Some(rule) if rule.allowed => *rule,
            _ => {
                return FunctionVerdict::Deny {
                    reason: format!("{} may not use {}", role, function),
                }
            }
        };

        if !rule.requires_approval {
            return FunctionVerdict::Allow;
        }

        let approver_roles = self.approver_roles(function);
        match approver {
            Some(approver) if approver_roles.contains(&approver) => FunctionVerdict::Allow,
            _ => FunctionVerdict::RequireApproval { approver_roles },
        }
    }

    /// Current mapping list, sorted by role then function.
    pub fn mappings(&self) -> Vec<RolePosFunctionMapping> {
        let mut list: Vec<RolePosFunctionMapping> = self
            .rules
            .iter()
            .map(|((role, code), rule)| RolePosFunctionMapping {
                role: *role,
                function_code: *code,
                allowed: rule.allowed,
                requires_approval: rule.requires_approval,
            })
            .collect();
        list.sort_by_key(|m| (m.role, m.function_code));
        list
    }
}

fn privilege_rank(role: Role) -> u8 {
    match role {
        Role::PosUser => 0,
        Role::BackOfficeUser => 1,
        Role::PosManager => 2,
        Role::BackOfficeManager => 3,
        Role::Admin => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_order_matches_enum() {
        for (i, f) in REGISTRY.iter().enumerate() {
            assert_eq!(f.code as usize, i, "{} out of order", f.code);
        }
        assert_eq!(FunctionCode::F11.name(), "Refund");
        assert_eq!(FunctionCode::AltF3.name(), "Interim Settlement");
    }

    #[test]
    fn test_critical_functions() {
        let critical: Vec<FunctionCode> = REGISTRY
            .iter()
            .filter(|f| f.is_critical)
            .map(|f| f.code)
            .collect();
        assert_eq!(
            critical,
            vec![
                FunctionCode::F5,
                FunctionCode::F7,
                FunctionCode::F11,
                FunctionCode::AltF3,
                FunctionCode::CtrlF1,
                FunctionCode::CtrlF2,
            ]
        );
    }

    #[test]
    fn test_function_code_serde() {
        assert_eq!(
            serde_json::to_string(&FunctionCode::AltF3).unwrap(),
            "\"ALT_F3\""
        );
        let code: FunctionCode = serde_json::from_str("\"CTRL_F2\"").unwrap();
        assert_eq!(code, FunctionCode::CtrlF2);
        assert_eq!(code.as_str(), "CTRL_F2");
    }

    #[test]
    fn test_posuser_refund_requires_approval() {
        let matrix = FunctionMatrix::seeded();
        let verdict = matrix.authorize(Role::PosUser, FunctionCode::F11, None);
        assert_eq!(
            verdict,
            FunctionVerdict::RequireApproval {
                approver_roles: vec![Role::PosManager, Role::Admin]
            }
        );
    }

    #[test]
    fn test_posuser_refund_with_manager_approval() {
        let matrix = FunctionMatrix::seeded();
        assert_eq!(
            matrix.authorize(Role::PosUser, FunctionCode::F11, Some(Role::PosManager)),
            FunctionVerdict::Allow
        );
    }

    #[test]
    fn test_approver_outside_set_still_requires_approval() {
        let matrix = FunctionMatrix::seeded();
        let verdict = matrix.authorize(Role::PosUser, FunctionCode::F11, Some(Role::PosUser));
        assert!(matches!(verdict, FunctionVerdict::RequireApproval { .. }));
    }

    #[test]
    fn test_force_quit_needs_admin_for_manager() {
        let matrix = FunctionMatrix::seeded();
        assert_eq!(
            matrix.approver_roles(FunctionCode::CtrlF2),
            vec![Role::Admin]
        );
        assert!(matches!(
            matrix.authorize(Role::PosManager, FunctionCode::CtrlF2, Some(Role::PosManager)),
            FunctionVerdict::RequireApproval { .. }
        ));
        assert_eq!(
            matrix.authorize(Role::PosManager, FunctionCode::CtrlF2, Some(Role::Admin)),
            FunctionVerdict::Allow
        );
    }

    #[test]
    fn test_back_office_roles_denied() {
        let matrix = FunctionMatrix::seeded();
        let verdict = matrix.authorize(Role::BackOfficeManager, FunctionCode::F10, None);
        assert!(matches!(verdict, FunctionVerdict::Deny { .. }));
        let err = verdict
            .into_result(FunctionCode::F10, Role::BackOfficeManager)
            .unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::FunctionNotAllowed);
    }

    #[test]
    fn test_admin_bypasses_empty_matrix() {
        let matrix = FunctionMatrix::default();
        assert_eq!(
            matrix.authorize(Role::Admin, FunctionCode::CtrlF2, None),
            FunctionVerdict::Allow
        );
        assert_eq!(matrix.approver_roles(FunctionCode::F1), vec![Role::Admin]);
    }

    #[test]
    fn test_mapping_validation() {
        let bad = RolePosFunctionMapping {
            role: Role::PosUser,
            function_code: FunctionCode::F5,
            allowed: false,
            requires_approval: true,
        };
        assert!(bad.validate().is_err());
        assert!(seeded_mappings().iter().all(|m| m.validate().is_ok()));
    }

    #[test]
    fn test_mappings_round_trip_through_matrix() {
        let seeded = seeded_mappings();
        let matrix = FunctionMatrix::from_mappings(&seeded);
        assert_eq!(matrix.mappings().len(), seeded.len());
    }
}
