//! Diameter Ro Credit-Control Codec
//!
//! Structured building of Credit-Control-Request messages and parsing of
//! Credit-Control-Answer messages for online charging of IMS calls
//! (RFC 6733 framing, RFC 4006 credit control, 3GPP TS 32.299 groups).
//!
//! # Layout
//!
//! - `avp` / `message` - wire framing of AVPs and messages
//! - `dictionary` - AVP codes and enumerated values
//! - `ims` - Service-Information, IMS-Information and their subgroups
//! - `ccr` / `cca` - the request and answer models
//! - `peer` - the seam to whatever transport delivers requests to the OCS
//!
//! Everything here is stateless; callers own the message values.

pub mod avp;
pub mod cca;
pub mod ccr;
pub mod dictionary;
pub mod error;
pub mod ims;
pub mod message;
pub mod peer;

pub use avp::{Avp, AvpData};
pub use cca::{CreditControlAnswer, FinalUnitIndication, GrantRejection, MsccAnswer, RedirectServer};
pub use ccr::{AccountingRecordType, CcRequestType, CreditControlRequest, MsccRequest, VendorTermination};
pub use error::{DiameterError, DiameterResult, ResultCode};
pub use ims::{
    EventType, ImsInformation, InterOperatorIdentifier, ServiceInformation, ServiceSpecificInfo,
    SubscriptionId, SubscriptionIdType, TimeStamps,
};
pub use message::{DiameterHeader, DiameterMessage};
pub use peer::{CreditControlPeer, PeerError};

/// Diameter protocol version
pub const DIAMETER_VERSION: u8 = 1;

/// Credit-Control application (Ro/Gy)
pub const CREDIT_CONTROL_APPLICATION_ID: u32 = 4;

/// Credit-Control-Request/Answer command code
pub const CMD_CREDIT_CONTROL: u32 = 272;

/// 3GPP vendor identifier
pub const VENDOR_ID_3GPP: u32 = 10415;

/// Seconds between the NTP epoch (1900) and the Unix epoch
pub const NTP_UNIX_OFFSET: i64 = 2_208_988_800;
