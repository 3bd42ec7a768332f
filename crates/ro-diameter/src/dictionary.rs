//! AVP codes and enumerated values used on the Ro interface

/// Base protocol AVPs (RFC 6733)
pub mod base {
    pub const USER_NAME: u32 = 1;
    pub const EVENT_TIMESTAMP: u32 = 55;
    pub const AUTH_APPLICATION_ID: u32 = 258;
    pub const ACCT_APPLICATION_ID: u32 = 259;
    pub const VENDOR_SPECIFIC_APPLICATION_ID: u32 = 260;
    pub const SESSION_ID: u32 = 263;
    pub const ORIGIN_HOST: u32 = 264;
    pub const VENDOR_ID: u32 = 266;
    pub const RESULT_CODE: u32 = 268;
    pub const DESTINATION_REALM: u32 = 283;
    pub const DESTINATION_HOST: u32 = 293;
    pub const TERMINATION_CAUSE: u32 = 295;
    pub const ORIGIN_REALM: u32 = 296;
    pub const ACCOUNTING_RECORD_TYPE: u32 = 480;
    pub const ACCOUNTING_RECORD_NUMBER: u32 = 485;

    /// Termination-Cause DIAMETER_LOGOUT
    pub const TERMINATION_CAUSE_LOGOUT: i32 = 1;
}

/// Credit-control AVPs (RFC 4006)
pub mod cc {
    pub const CC_REQUEST_NUMBER: u32 = 415;
    pub const CC_REQUEST_TYPE: u32 = 416;
    pub const CC_TIME: u32 = 420;
    pub const FINAL_UNIT_INDICATION: u32 = 430;
    pub const GRANTED_SERVICE_UNIT: u32 = 431;
    pub const RATING_GROUP: u32 = 432;
    pub const REDIRECT_ADDRESS_TYPE: u32 = 433;
    pub const REDIRECT_SERVER: u32 = 434;
    pub const REDIRECT_SERVER_ADDRESS: u32 = 435;
    pub const REQUESTED_SERVICE_UNIT: u32 = 437;
    pub const SERVICE_IDENTIFIER: u32 = 439;
    pub const SUBSCRIPTION_ID: u32 = 443;
    pub const SUBSCRIPTION_ID_DATA: u32 = 444;
    pub const USED_SERVICE_UNIT: u32 = 446;
    pub const VALIDITY_TIME: u32 = 448;
    pub const FINAL_UNIT_ACTION: u32 = 449;
    pub const SUBSCRIPTION_ID_TYPE: u32 = 450;
    pub const MULTIPLE_SERVICES_INDICATOR: u32 = 455;
    pub const MULTIPLE_SERVICES_CREDIT_CONTROL: u32 = 456;
    pub const USER_EQUIPMENT_INFO: u32 = 458;
    pub const USER_EQUIPMENT_INFO_TYPE: u32 = 459;
    pub const USER_EQUIPMENT_INFO_VALUE: u32 = 460;
    pub const SERVICE_CONTEXT_ID: u32 = 461;

    /// Multiple-Services-Indicator MULTIPLE_SERVICES_SUPPORTED
    pub const MULTIPLE_SERVICES_SUPPORTED: i32 = 1;

    /// User-Equipment-Info-Type MAC
    pub const USER_EQUIPMENT_INFO_TYPE_MAC: i32 = 3;

    /// Redirect-Address-Type values
    pub const REDIRECT_ADDRESS_IPV4: i32 = 0;
    pub const REDIRECT_ADDRESS_IPV6: i32 = 1;
    pub const REDIRECT_ADDRESS_URL: i32 = 2;
    pub const REDIRECT_ADDRESS_SIP_URI: i32 = 3;
}

/// 3GPP charging AVPs (TS 32.299), vendor 10415
pub mod ims {
    pub const EVENT_TYPE: u32 = 823;
    pub const SIP_METHOD: u32 = 824;
    pub const EVENT: u32 = 825;
    pub const ROLE_OF_NODE: u32 = 829;
    pub const USER_SESSION_ID: u32 = 830;
    pub const CALLING_PARTY_ADDRESS: u32 = 831;
    pub const CALLED_PARTY_ADDRESS: u32 = 832;
    pub const TIME_STAMPS: u32 = 833;
    pub const SIP_REQUEST_TIMESTAMP: u32 = 834;
    pub const SIP_RESPONSE_TIMESTAMP: u32 = 835;
    pub const APPLICATION_PROVIDED_CALLED_PARTY_ADDRESS: u32 = 837;
    pub const INTER_OPERATOR_IDENTIFIER: u32 = 838;
    pub const ORIGINATING_IOI: u32 = 839;
    pub const TERMINATING_IOI: u32 = 840;
    pub const IMS_CHARGING_IDENTIFIER: u32 = 841;
    pub const TRUNK_GROUP_ID: u32 = 851;
    pub const INCOMING_TRUNK_GROUP_ID: u32 = 852;
    pub const OUTGOING_TRUNK_GROUP_ID: u32 = 853;
    pub const CAUSE_CODE: u32 = 861;
    pub const NODE_FUNCTIONALITY: u32 = 862;
    pub const SERVICE_SPECIFIC_DATA: u32 = 863;
    pub const SERVICE_INFORMATION: u32 = 873;
    pub const IMS_INFORMATION: u32 = 876;
    pub const EXPIRES: u32 = 888;
    pub const SERVICE_SPECIFIC_INFO: u32 = 1249;
    pub const SERVICE_SPECIFIC_TYPE: u32 = 1257;
    pub const ACCESS_NETWORK_INFORMATION: u32 = 1263;
    pub const OUTGOING_SESSION_ID: u32 = 2320;

    /// Role-Of-Node values
    pub const ROLE_ORIGINATING: i32 = 0;
    pub const ROLE_TERMINATING: i32 = 1;
}

/// Vendor-specific charge-info AVPs carried on STOP
pub mod vendor {
    pub const TERMINATION_REASON: u32 = 2;
    pub const TERMINATION_CODE: u32 = 3;
}
