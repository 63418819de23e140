//! In-conference roster commands: member state, moderation actions and
//! the want-speak hand raising.

use serde::{Deserialize, Serialize};

use super::int_enum;
use super::types::MemberState;

int_enum! {
    MemberActionKind {
        Undefined = 0,
        TurnCamera = 1,
        TurnMicrophone = 2,
        TurnDemonstration = 3,
        TurnSpeaker = 4,
        MoveToTop = 5,
        EnableRemoteControl = 6,
        DisableRemoteControl = 7,
        MuteMicrophone = 8,
        DisconnectFromConference = 9,
        ChangeGrants = 10,
    }
}

int_enum! {
    MemberActionResult {
        Undefined = 0,
        Ok = 1,
        NotAllowed = 2,
        Accepted = 3,
        Rejected = 4,
        Busy = 5,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeContactState {
    pub id: i64,
    pub state: MemberState,
}

/// Moderator action over a set of members, and the target's answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberAction {
    #[serde(default)]
    pub ids: Vec<i64>,
    #[serde(default)]
    pub action: MemberActionKind,
    #[serde(default)]
    pub result: MemberActionResult,
    #[serde(default)]
    pub actor_id: i64,
    #[serde(default)]
    pub actor_name: String,
    #[serde(default)]
    pub grants: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WantSpeak {
    pub user_id: i64,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub is_speak: bool,
}

/// Invitation to a scheduled conference, shown before auto-connect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConnect {
    pub tag: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub time_limit: u64,
}
