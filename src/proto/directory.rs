//! Directory commands: contacts, groups and the conference catalogue.

use serde::{Deserialize, Serialize};

use super::int_enum;
use super::types::Member;

int_enum! {
    SortType {
        Undefined = 0,
        Name = 1,
        Number = 2,
    }
}

int_enum! {
    ContactsUpdateAction {
        Undefined = 0,
        Add = 1,
        Delete = 2,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactList {
    #[serde(default)]
    pub sort_type: SortType,
    #[serde(default)]
    pub show_numbers: bool,
    #[serde(default)]
    pub members: Vec<Member>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchContact {
    pub query: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactsUpdate {
    pub action: ContactsUpdateAction,
    pub client_id: i64,
}
