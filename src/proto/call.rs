//! One-to-one call setup commands.

use serde::{Deserialize, Serialize};

use super::int_enum;

int_enum! {
    CallType {
        Undefined = 0,
        Invocation = 1,
        Cancel = 2,
    }
}

int_enum! {
    CallResponseType {
        Undefined = 0,
        AutoCall = 1,
        NotConnected = 2,
        Accept = 3,
        Refuse = 4,
        Busy = 5,
        Timeout = 6,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRequest {
    #[serde(default)]
    pub name: String,
    pub id: i64,
    #[serde(default)]
    pub connection_id: u32,
    #[serde(rename = "type")]
    pub call_type: CallType,
    #[serde(default)]
    pub time_limit: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallResponse {
    pub id: i64,
    #[serde(default)]
    pub connection_id: u32,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub response_type: CallResponseType,
    #[serde(default)]
    pub time_limit: u64,
}
