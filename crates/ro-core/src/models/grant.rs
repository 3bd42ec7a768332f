//! Credit grants returned by the charging system

use serde::{Deserialize, Serialize};

/// Final-Unit-Action values (RFC 4006)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalUnitAction {
    Terminate,
    Redirect,
    RestrictAccess,
}

impl FinalUnitAction {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(FinalUnitAction::Terminate),
            1 => Some(FinalUnitAction::Redirect),
            2 => Some(FinalUnitAction::RestrictAccess),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> u32 {
        match self {
            FinalUnitAction::Terminate => 0,
            FinalUnitAction::Redirect => 1,
            FinalUnitAction::RestrictAccess => 2,
        }
    }
}

/// Where the call should be redirected once the final units are used
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectTarget {
    pub uri: String,
}

/// A validated grant: positive units and a success result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditGrant {
    /// Granted seconds, always > 0
    pub granted_secs: i64,
    /// Validity-Time, 0 when absent
    pub validity_secs: i64,
    pub final_unit_action: Option<FinalUnitAction>,
    pub redirect: Option<RedirectTarget>,
    pub result_code: u32,
}

impl CreditGrant {
    /// A grant flagged with Final-Unit-Action TERMINATE is the last one for the call
    pub fn is_final_allocation(&self) -> bool {
        self.final_unit_action == Some(FinalUnitAction::Terminate)
    }

    /// Grant window limited by validity when one is set
    pub fn effective_secs(&self) -> i64 {
        if self.validity_secs > 0 {
            self.granted_secs.min(self.validity_secs)
        } else {
            self.granted_secs
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_final_allocation_only_for_terminate() {
        let mut grant = CreditGrant {
            granted_secs: 10,
            validity_secs: 0,
            final_unit_action: Some(FinalUnitAction::Terminate),
            redirect: None,
            result_code: 2001,
        };
        assert!(grant.is_final_allocation());
        grant.final_unit_action = Some(FinalUnitAction::Redirect);
        assert!(!grant.is_final_allocation());
    }

    #[test]
    fn test_effective_secs_clamps_to_validity() {
        let grant = CreditGrant {
            granted_secs: 120,
            validity_secs: 60,
            final_unit_action: None,
            redirect: None,
            result_code: 2001,
        };
        assert_eq!(grant.effective_secs(), 60);
        assert_eq!(FinalUnitAction::from_u32(2), Some(FinalUnitAction::RestrictAccess));
    }
}
