//! Account commands: registration, profile updates and autologin
//! credentials.

use serde::{Deserialize, Serialize};

use super::int_enum;

int_enum! {
    UserUpdateAction {
        Undefined = 0,
        Register = 1,
        ChangeMeta = 2,
    }
}

int_enum! {
    UserUpdateResult {
        Undefined = 0,
        Ok = 1,
        DuplicateName = 2,
        DuplicateLogin = 3,
        RegistrationDenied = 4,
    }
}

int_enum! {
    CredentialsResult {
        Undefined = 0,
        NotFound = 1,
        Ok = 2,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserUpdateRequest {
    pub action: UserUpdateAction,
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub login: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserUpdateResponse {
    #[serde(default)]
    pub action: UserUpdateAction,
    pub result: UserUpdateResult,
    #[serde(default)]
    pub user_id: i64,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialsRequest {
    pub guid: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialsResponse {
    pub result: CredentialsResult,
    #[serde(default)]
    pub login: String,
    #[serde(default)]
    pub password: String,
}
