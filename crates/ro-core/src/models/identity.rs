//! Party identities and call attributes supplied by the signaling layer

use serde::{Deserialize, Serialize};

use super::session::Direction;

/// Identities extracted from the call by the signaling layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PartyIdentities {
    /// P-Asserted-Identity of the caller
    pub asserted_identity: String,
    /// Identity of the called party
    pub called_asserted_identity: String,
    pub incoming_trunk_id: Option<String>,
    pub outgoing_trunk_id: Option<String>,
    /// P-Access-Network-Info
    pub access_network_info: Option<String>,
    /// Application-provided called party address
    pub app_provided_party: Option<String>,
    /// User-Equipment-Info MAC value
    pub mac: Option<String>,
    /// Charged subscriber set by routing logic, wins over both legs' identities
    pub custom_user: Option<String>,
}

impl PartyIdentities {
    pub fn new(asserted: impl Into<String>, called: impl Into<String>) -> Self {
        Self {
            asserted_identity: asserted.into(),
            called_asserted_identity: called.into(),
            ..Default::default()
        }
    }

    pub fn with_trunks(mut self, incoming: Option<String>, outgoing: Option<String>) -> Self {
        self.incoming_trunk_id = incoming;
        self.outgoing_trunk_id = outgoing;
        self
    }

    pub fn charged_identity(&self, direction: Direction) -> &str {
        if let Some(user) = self.custom_user.as_deref().filter(|u| !u.is_empty()) {
            return user;
        }
        match direction {
            Direction::Originating => &self.asserted_identity,
            Direction::Terminating => &self.called_asserted_identity,
        }
    }
}

/// P-Charging-Vector values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ChargingVector {
    /// IMS Charging Identifier
    pub icid: Option<String>,
    pub originating_ioi: Option<String>,
    pub terminating_ioi: Option<String>,
}

/// Media of the call, selects the default tariff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    #[default]
    Voice,
    Video,
}
