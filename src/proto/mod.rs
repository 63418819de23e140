//! Signalling command codec.
//!
//! A control message is one JSON object whose single top-level key is the
//! command name: `{"<name>": {…fields…}}`, or `{"<name>": […]}` for the
//! list-bearing commands. Protocol enums travel as bare integers. Parsing
//! defaults missing optional fields and ignores unknown ones; a missing
//! required field is a parse error.

mod call;
mod chat;
mod conference;
mod device;
mod directory;
mod media;
mod roster;
mod session;
mod types;
mod user;

pub use call::{CallRequest, CallResponse, CallResponseType, CallType};
pub use chat::LoadMessages;
pub use conference::{
    ConferenceAction, ConferenceUpdateRequest, ConferenceUpdateResponse, ConferenceUpdateResult,
    ConnectToConferenceRequest, ConnectToConferenceResponse, ConnectToConferenceResult,
    CreateTempConference, SendConnectToConference,
};
pub use device::{
    ConnectType, DeviceConnect, DeviceDisconnect, DeviceParams, RendererConnect,
    RendererDisconnect,
};
pub use directory::{ContactList, ContactsUpdate, ContactsUpdateAction, SearchContact, SortType};
pub use media::Media;
pub use roster::{
    ChangeContactState, MemberAction, MemberActionKind, MemberActionResult, ScheduleConnect,
    WantSpeak,
};
pub use session::{
    ActiveType, ChangeServer, ConnectRequest, ConnectResponse, ConnectResult, MicrophoneActive,
    ResolutionChange, SetMaxBitrate, UpdateGrants,
};
pub use types::{
    Blob, BlobAction, BlobStatus, BlobType, CallResult, Conference, ConferenceType, DeviceType,
    Grants, Group, Member, MemberState, Message, MessageStatus, MessageType,
};
pub use user::{
    CredentialsRequest, CredentialsResponse, CredentialsResult, UserUpdateAction,
    UserUpdateRequest, UserUpdateResponse, UserUpdateResult,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Integer-backed protocol enum: the first variant doubles as the
/// fallback for unknown wire values.
macro_rules! int_enum {
    ($(#[$meta:meta])* $name:ident {
        $first:ident = $first_value:expr,
        $($variant:ident = $value:expr),* $(,)?
    }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
        #[serde(from = "i32", into = "i32")]
        pub enum $name {
            $first = $first_value,
            $($variant = $value,)*
        }

        impl Default for $name {
            fn default() -> Self {
                Self::$first
            }
        }

        impl From<i32> for $name {
            fn from(value: i32) -> Self {
                $(
                    if value == $value {
                        return Self::$variant;
                    }
                )*
                Self::$first
            }
        }

        impl From<$name> for i32 {
            fn from(value: $name) -> i32 {
                value as i32
            }
        }
    };
}
pub(crate) use int_enum;

#[derive(Error, Debug)]
pub enum ProtoError {
    #[error("malformed command: {0}")]
    Malformed(String),
}

/// The full signalling catalogue. Names are wire-stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    #[serde(rename = "user_update_request")]
    UserUpdateRequest(UserUpdateRequest),
    #[serde(rename = "user_update_response")]
    UserUpdateResponse(UserUpdateResponse),
    #[serde(rename = "credentials_request")]
    CredentialsRequest(CredentialsRequest),
    #[serde(rename = "credentials_response")]
    CredentialsResponse(CredentialsResponse),
    #[serde(rename = "connect_request")]
    ConnectRequest(ConnectRequest),
    #[serde(rename = "connect_response")]
    ConnectResponse(ConnectResponse),
    #[serde(rename = "disconnect")]
    Disconnect {},
    #[serde(rename = "change_server")]
    ChangeServer(ChangeServer),
    #[serde(rename = "ping")]
    Ping {},
    #[serde(rename = "set_max_bitrate")]
    SetMaxBitrate(SetMaxBitrate),
    #[serde(rename = "update_grants")]
    UpdateGrants(UpdateGrants),
    #[serde(rename = "contact_list")]
    ContactList(ContactList),
    #[serde(rename = "search_contact")]
    SearchContact(SearchContact),
    #[serde(rename = "contacts_update")]
    ContactsUpdate(ContactsUpdate),
    #[serde(rename = "group_list")]
    GroupList(Vec<Group>),
    #[serde(rename = "conferences_list")]
    ConferencesList(Vec<Conference>),
    #[serde(rename = "device_params")]
    DeviceParams(DeviceParams),
    #[serde(rename = "device_connect")]
    DeviceConnect(DeviceConnect),
    #[serde(rename = "device_disconnect")]
    DeviceDisconnect(DeviceDisconnect),
    #[serde(rename = "renderer_connect")]
    RendererConnect(RendererConnect),
    #[serde(rename = "renderer_disconnect")]
    RendererDisconnect(RendererDisconnect),
    #[serde(rename = "resolution_change")]
    ResolutionChange(ResolutionChange),
    #[serde(rename = "microphone_active")]
    MicrophoneActive(MicrophoneActive),
    #[serde(rename = "call_request")]
    CallRequest(CallRequest),
    #[serde(rename = "call_response")]
    CallResponse(CallResponse),
    #[serde(rename = "conference_update_request")]
    ConferenceUpdateRequest(ConferenceUpdateRequest),
    #[serde(rename = "conference_update_response")]
    ConferenceUpdateResponse(ConferenceUpdateResponse),
    #[serde(rename = "create_temp_conference")]
    CreateTempConference(CreateTempConference),
    #[serde(rename = "send_connect_to_conference")]
    SendConnectToConference(SendConnectToConference),
    #[serde(rename = "connect_to_conference_request")]
    ConnectToConferenceRequest(ConnectToConferenceRequest),
    #[serde(rename = "connect_to_conference_response")]
    ConnectToConferenceResponse(ConnectToConferenceResponse),
    #[serde(rename = "disconnect_from_conference")]
    DisconnectFromConference {},
    #[serde(rename = "change_contact_state")]
    ChangeContactState(ChangeContactState),
    #[serde(rename = "turn_speaker")]
    TurnSpeaker {},
    #[serde(rename = "change_member_state")]
    ChangeMemberState(Vec<Member>),
    #[serde(rename = "member_action")]
    MemberAction(MemberAction),
    #[serde(rename = "want_speak")]
    WantSpeak(WantSpeak),
    #[serde(rename = "schedule_connect")]
    ScheduleConnect(ScheduleConnect),
    #[serde(rename = "delivery_messages")]
    DeliveryMessages(Vec<Message>),
    #[serde(rename = "load_messages")]
    LoadMessages(LoadMessages),
    #[serde(rename = "delivery_blobs")]
    DeliveryBlobs(Vec<Blob>),
    #[serde(rename = "load_blobs")]
    LoadBlobs(Vec<String>),
    #[serde(rename = "request_media_addresses")]
    RequestMediaAddresses {},
    #[serde(rename = "media_addresses_list")]
    MediaAddressesList(Vec<String>),
    #[serde(rename = "media")]
    Media(Media),
}

impl Command {
    pub fn parse(message: &str) -> Result<Self, ProtoError> {
        serde_json::from_str(message).map_err(|e| ProtoError::Malformed(e.to_string()))
    }

    pub fn serialize(&self) -> String {
        match serde_json::to_string(self) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!("command serialization failed: {}", e);
                String::new()
            }
        }
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            Self::UserUpdateRequest(_) => CommandKind::UserUpdateRequest,
            Self::UserUpdateResponse(_) => CommandKind::UserUpdateResponse,
            Self::CredentialsRequest(_) => CommandKind::CredentialsRequest,
            Self::CredentialsResponse(_) => CommandKind::CredentialsResponse,
            Self::ConnectRequest(_) => CommandKind::ConnectRequest,
            Self::ConnectResponse(_) => CommandKind::ConnectResponse,
            Self::Disconnect {} => CommandKind::Disconnect,
            Self::ChangeServer(_) => CommandKind::ChangeServer,
            Self::Ping {} => CommandKind::Ping,
            Self::SetMaxBitrate(_) => CommandKind::SetMaxBitrate,
            Self::UpdateGrants(_) => CommandKind::UpdateGrants,
            Self::ContactList(_) => CommandKind::ContactList,
            Self::SearchContact(_) => CommandKind::SearchContact,
            Self::ContactsUpdate(_) => CommandKind::ContactsUpdate,
            Self::GroupList(_) => CommandKind::GroupList,
            Self::ConferencesList(_) => CommandKind::ConferencesList,
            Self::DeviceParams(_) => CommandKind::DeviceParams,
            Self::DeviceConnect(_) => CommandKind::DeviceConnect,
            Self::DeviceDisconnect(_) => CommandKind::DeviceDisconnect,
            Self::RendererConnect(_) => CommandKind::RendererConnect,
            Self::RendererDisconnect(_) => CommandKind::RendererDisconnect,
            Self::ResolutionChange(_) => CommandKind::ResolutionChange,
            Self::MicrophoneActive(_) => CommandKind::MicrophoneActive,
            Self::CallRequest(_) => CommandKind::CallRequest,
            Self::CallResponse(_) => CommandKind::CallResponse,
            Self::ConferenceUpdateRequest(_) => CommandKind::ConferenceUpdateRequest,
            Self::ConferenceUpdateResponse(_) => CommandKind::ConferenceUpdateResponse,
            Self::CreateTempConference(_) => CommandKind::CreateTempConference,
            Self::SendConnectToConference(_) => CommandKind::SendConnectToConference,
            Self::ConnectToConferenceRequest(_) => CommandKind::ConnectToConferenceRequest,
            Self::ConnectToConferenceResponse(_) => CommandKind::ConnectToConferenceResponse,
            Self::DisconnectFromConference {} => CommandKind::DisconnectFromConference,
            Self::ChangeContactState(_) => CommandKind::ChangeContactState,
            Self::TurnSpeaker {} => CommandKind::TurnSpeaker,
            Self::ChangeMemberState(_) => CommandKind::ChangeMemberState,
            Self::MemberAction(_) => CommandKind::MemberAction,
            Self::WantSpeak(_) => CommandKind::WantSpeak,
            Self::ScheduleConnect(_) => CommandKind::ScheduleConnect,
            Self::DeliveryMessages(_) => CommandKind::DeliveryMessages,
            Self::LoadMessages(_) => CommandKind::LoadMessages,
            Self::DeliveryBlobs(_) => CommandKind::DeliveryBlobs,
            Self::LoadBlobs(_) => CommandKind::LoadBlobs,
            Self::RequestMediaAddresses {} => CommandKind::RequestMediaAddresses,
            Self::MediaAddressesList(_) => CommandKind::MediaAddressesList,
            Self::Media(_) => CommandKind::Media,
        }
    }
}

/// Command discriminator, resolvable from a raw message without parsing
/// the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Undefined,
    UserUpdateRequest,
    UserUpdateResponse,
    CredentialsRequest,
    CredentialsResponse,
    ConnectRequest,
    ConnectResponse,
    Disconnect,
    ChangeServer,
    Ping,
    SetMaxBitrate,
    UpdateGrants,
    ContactList,
    SearchContact,
    ContactsUpdate,
    GroupList,
    ConferencesList,
    DeviceParams,
    DeviceConnect,
    DeviceDisconnect,
    RendererConnect,
    RendererDisconnect,
    ResolutionChange,
    MicrophoneActive,
    CallRequest,
    CallResponse,
    ConferenceUpdateRequest,
    ConferenceUpdateResponse,
    CreateTempConference,
    SendConnectToConference,
    ConnectToConferenceRequest,
    ConnectToConferenceResponse,
    DisconnectFromConference,
    ChangeContactState,
    TurnSpeaker,
    ChangeMemberState,
    MemberAction,
    WantSpeak,
    ScheduleConnect,
    DeliveryMessages,
    LoadMessages,
    DeliveryBlobs,
    LoadBlobs,
    RequestMediaAddresses,
    MediaAddressesList,
    Media,
}

impl CommandKind {
    fn from_name(name: &str) -> Self {
        match name {
            "user_update_request" => Self::UserUpdateRequest,
            "user_update_response" => Self::UserUpdateResponse,
            "credentials_request" => Self::CredentialsRequest,
            "credentials_response" => Self::CredentialsResponse,
            "connect_request" => Self::ConnectRequest,
            "connect_response" => Self::ConnectResponse,
            "disconnect" => Self::Disconnect,
            "change_server" => Self::ChangeServer,
            "ping" => Self::Ping,
            "set_max_bitrate" => Self::SetMaxBitrate,
            "update_grants" => Self::UpdateGrants,
            "contact_list" => Self::ContactList,
            "search_contact" => Self::SearchContact,
            "contacts_update" => Self::ContactsUpdate,
            "group_list" => Self::GroupList,
            "conferences_list" => Self::ConferencesList,
            "device_params" => Self::DeviceParams,
            "device_connect" => Self::DeviceConnect,
            "device_disconnect" => Self::DeviceDisconnect,
            "renderer_connect" => Self::RendererConnect,
            "renderer_disconnect" => Self::RendererDisconnect,
            "resolution_change" => Self::ResolutionChange,
            "microphone_active" => Self::MicrophoneActive,
            "call_request" => Self::CallRequest,
            "call_response" => Self::CallResponse,
            "conference_update_request" => Self::ConferenceUpdateRequest,
            "conference_update_response" => Self::ConferenceUpdateResponse,
            "create_temp_conference" => Self::CreateTempConference,
            "send_connect_to_conference" => Self::SendConnectToConference,
            "connect_to_conference_request" => Self::ConnectToConferenceRequest,
            "connect_to_conference_response" => Self::ConnectToConferenceResponse,
            "disconnect_from_conference" => Self::DisconnectFromConference,
            "change_contact_state" => Self::ChangeContactState,
            "turn_speaker" => Self::TurnSpeaker,
            "change_member_state" => Self::ChangeMemberState,
            "member_action" => Self::MemberAction,
            "want_speak" => Self::WantSpeak,
            "schedule_connect" => Self::ScheduleConnect,
            "delivery_messages" => Self::DeliveryMessages,
            "load_messages" => Self::LoadMessages,
            "delivery_blobs" => Self::DeliveryBlobs,
            "load_blobs" => Self::LoadBlobs,
            "request_media_addresses" => Self::RequestMediaAddresses,
            "media_addresses_list" => Self::MediaAddressesList,
            "media" => Self::Media,
            _ => Self::Undefined,
        }
    }
}

/// Name of the command carried by `message`, read from the first (only)
/// top-level key. `Undefined` for empty or malformed objects.
pub fn command_kind(message: &str) -> CommandKind {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(message) else {
        return CommandKind::Undefined;
    };
    let Some(object) = value.as_object() else {
        return CommandKind::Undefined;
    };
    match object.keys().next() {
        Some(name) => CommandKind::from_name(name),
        None => CommandKind::Undefined,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(command: Command) -> Command {
        let json = command.serialize();
        let parsed = Command::parse(&json).unwrap();
        assert_eq!(parsed, command);
        parsed
    }

    #[test]
    fn envelope_is_the_command_name() {
        let json = Command::Ping {}.serialize();
        assert_eq!(json, r#"{"ping":{}}"#);

        let json = Command::SetMaxBitrate(SetMaxBitrate { bitrate: 512 }).serialize();
        assert_eq!(json, r#"{"set_max_bitrate":{"bitrate":512}}"#);
    }

    #[test]
    fn list_commands_carry_arrays() {
        let command = Command::ChangeMemberState(vec![Member::new(4, "bob")]);
        let json = command.serialize();
        assert!(json.starts_with(r#"{"change_member_state":["#), "{json}");
        roundtrip(command);

        let command = Command::MediaAddressesList(vec!["10.0.0.1:5000".into()]);
        assert_eq!(
            command.serialize(),
            r#"{"media_addresses_list":["10.0.0.1:5000"]}"#
        );
        roundtrip(command);
    }

    #[test]
    fn conference_update_request_roundtrip() {
        let command = Command::ConferenceUpdateRequest(ConferenceUpdateRequest {
            action: ConferenceAction::Create,
            conference: Conference {
                name: "N".into(),
                ..Conference::with_tag("T")
            },
        });
        roundtrip(command);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let json = r#"{"conference_update_request":{"action":1,"unknown_field":true,
            "conference":{"tag":"T","name":"N","surprise":[1,2,3]}}}"#;
        let parsed = Command::parse(json).unwrap();

        match parsed {
            Command::ConferenceUpdateRequest(request) => {
                assert_eq!(request.action, ConferenceAction::Create);
                assert_eq!(request.conference.tag, "T");
                assert_eq!(request.conference.name, "N");
            }
            other => panic!("wrong command: {other:?}"),
        }
    }

    #[test]
    fn missing_required_field_is_an_error() {
        // connect_request without login
        let json = r#"{"connect_request":{"client_version":1,"password":"p"}}"#;
        assert!(Command::parse(json).is_err());
    }

    #[test]
    fn enum_fields_travel_as_integers() {
        let command = Command::MicrophoneActive(MicrophoneActive {
            active_type: ActiveType::Speak,
            device_id: 3,
            client_id: 42,
        });
        let json = command.serialize();
        assert!(json.contains(r#""active_type":2"#), "{json}");
        roundtrip(command);
    }

    #[test]
    fn representative_catalogue_roundtrips() {
        roundtrip(Command::ConnectRequest(ConnectRequest {
            client_version: 20105,
            system: "linux x64".into(),
            login: "user".into(),
            password: "pass".into(),
        }));
        roundtrip(Command::ConnectResponse(ConnectResponse {
            result: ConnectResult::Ok,
            id: 10,
            access_token: "tok".into(),
            secure_key: "key".into(),
            grants: 0b1001,
            ..Default::default()
        }));
        roundtrip(Command::DeviceConnect(DeviceConnect {
            connect_type: ConnectType::CreatedDevice,
            device_type: DeviceType::Camera,
            device_id: 7,
            receiver_ssrc: 111,
            author_ssrc: 222,
            address: "192.168.0.2".into(),
            port: 30002,
            resolution: crate::video::Resolution::VGA.code(),
            my: true,
            ..Default::default()
        }));
        roundtrip(Command::CallRequest(CallRequest {
            name: "alice".into(),
            id: 5,
            connection_id: 2,
            call_type: CallType::Invocation,
            time_limit: 0,
        }));
        roundtrip(Command::DeliveryMessages(vec![Message {
            guid: "g-1".into(),
            message_type: MessageType::TextMessage,
            text: "hello".into(),
            ..Default::default()
        }]));
        roundtrip(Command::Media(Media::wrap(30002, 5000, &[1, 2, 3])));
        roundtrip(Command::Disconnect {});
        roundtrip(Command::RequestMediaAddresses {});
    }

    #[test]
    fn command_kind_reads_the_top_level_key() {
        assert_eq!(
            command_kind(r#"{"connect_request":{"client_version":1,"login":"l","password":"p"}}"#),
            CommandKind::ConnectRequest
        );
        assert_eq!(command_kind(r#"{"ping":{}}"#), CommandKind::Ping);
        assert_eq!(command_kind(r#"{}"#), CommandKind::Undefined);
        assert_eq!(command_kind("not json"), CommandKind::Undefined);
        assert_eq!(command_kind(r#"{"nonsense":{}}"#), CommandKind::Undefined);
        assert_eq!(command_kind(r#"[1,2]"#), CommandKind::Undefined);
    }
}
