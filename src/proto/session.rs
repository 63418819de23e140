//! Session-control commands: connect, disconnect, keepalive and the
//! quality knobs the server turns at runtime.

use serde::{Deserialize, Serialize};

use super::int_enum;

int_enum! {
    ConnectResult {
        Undefined = 0,
        Ok = 1,
        InvalidCredentials = 2,
        UpdateRequired = 3,
        Redirect = 4,
        ServerFull = 5,
        InternalServerError = 6,
    }
}

int_enum! {
    /// Speak/silent flag mirrored to the roster UI.
    ActiveType {
        Undefined = 0,
        Silent = 1,
        Speak = 2,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectRequest {
    pub client_version: u32,
    #[serde(default)]
    pub system: String,
    pub login: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectResponse {
    pub result: ConnectResult,
    #[serde(default)]
    pub server_version: u32,
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub connection_id: i64,
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub redirect_url: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub secure_key: String,
    #[serde(default)]
    pub server_name: String,
    #[serde(default)]
    pub options: u32,
    #[serde(default)]
    pub grants: u32,
    #[serde(default)]
    pub max_output_bitrate: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeServer {
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetMaxBitrate {
    pub bitrate: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateGrants {
    pub grants: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionChange {
    pub id: u32,
    pub resolution: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MicrophoneActive {
    pub active_type: ActiveType,
    pub device_id: u32,
    #[serde(default)]
    pub client_id: i64,
}
