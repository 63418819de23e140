//! Conference lifecycle and membership commands.

use serde::{Deserialize, Serialize};

use super::int_enum;
use super::types::Conference;

int_enum! {
    ConferenceAction {
        Undefined = 0,
        Create = 1,
        Edit = 2,
        Delete = 3,
        AddMe = 4,
        DeleteMe = 5,
    }
}

int_enum! {
    ConferenceUpdateResult {
        Undefined = 0,
        Ok = 1,
        NotFound = 2,
        NotAllowed = 3,
        DuplicateTag = 4,
    }
}

int_enum! {
    ConnectToConferenceResult {
        Undefined = 0,
        Ok = 1,
        NotExists = 2,
        NotAllowed = 3,
        LicenseFull = 4,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConferenceUpdateRequest {
    pub action: ConferenceAction,
    pub conference: Conference,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConferenceUpdateResponse {
    #[serde(default)]
    pub id: i64,
    pub result: ConferenceUpdateResult,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTempConference {
    pub tag: String,
}

/// Server-side invitation to join a running conference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendConnectToConference {
    pub tag: String,
    #[serde(default)]
    pub connecter_id: i64,
    #[serde(default)]
    pub connecter_connection_id: u32,
    #[serde(default)]
    pub flags: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectToConferenceRequest {
    pub tag: String,
    #[serde(default)]
    pub connect_members: bool,
    #[serde(default)]
    pub has_camera: bool,
    #[serde(default)]
    pub has_microphone: bool,
    #[serde(default)]
    pub has_demonstration: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectToConferenceResponse {
    pub result: ConnectToConferenceResult,
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub grants: u32,
    #[serde(default)]
    pub founder_id: i64,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub temp: bool,
}
