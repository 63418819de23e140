use serde::{Deserialize, Serialize};

use super::int_enum;

int_enum! {
    /// Kind of device a stream originates from or renders to.
    DeviceType {
        Undefined = 0,
        Camera = 1,
        Demonstration = 2,
        Avatar = 3,
        Microphone = 4,
        VideoRenderer = 5,
        AudioRenderer = 6,
    }
}

int_enum! {
    MemberState {
        Undefined = 0,
        Offline = 1,
        Online = 2,
        Conferencing = 3,
    }
}

int_enum! {
    ConferenceType {
        Undefined = 0,
        Symmetric = 1,
        Asymmetric = 2,
        AsymmetricWithSymmetricSound = 3,
    }
}

int_enum! {
    MessageType {
        Undefined = 0,
        TextMessage = 1,
        Call = 2,
        Join = 3,
        Leave = 4,
        Image = 5,
        Document = 6,
        Forwarded = 7,
        Video = 8,
        VoiceMessage = 9,
        VideoMessage = 10,
        Typing = 11,
        RecordingVoice = 12,
        RecordingVideo = 13,
        ServiceMessage = 14,
    }
}

int_enum! {
    CallResult {
        Undefined = 0,
        Answered = 1,
        Missed = 2,
        Rejected = 3,
        Busy = 4,
        Offline = 5,
    }
}

int_enum! {
    MessageStatus {
        Undefined = 0,
        Created = 1,
        Sended = 2,
        Delivered = 3,
        Readed = 4,
        Modified = 5,
        Deleted = 6,
    }
}

int_enum! {
    BlobType {
        Undefined = 0,
        Image = 1,
        Document = 2,
        Voice = 3,
        CircleVideo = 4,
    }
}

int_enum! {
    BlobStatus {
        Undefined = 0,
        NotFound = 1,
        Created = 2,
        Received = 3,
        Modified = 4,
        Deleted = 5,
    }
}

int_enum! {
    BlobAction {
        Undefined = 0,
        SpeedTest = 1,
        Storage = 2,
        P2P = 3,
    }
}

/// Directory group; groups nest through `parent_id`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: i64,
    #[serde(default)]
    pub parent_id: i64,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub owner_id: i64,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub grants: u32,
    #[serde(default)]
    pub level: i32,
    #[serde(default)]
    pub deleted: bool,
}

/// Contact-list entry; also carried inside conference rosters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: i64,
    #[serde(default)]
    pub state: MemberState,
    #[serde(default)]
    pub login: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub number: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub max_input_bitrate: u32,
    #[serde(default)]
    pub order: u32,
    #[serde(default)]
    pub has_camera: bool,
    #[serde(default)]
    pub has_microphone: bool,
    #[serde(default)]
    pub has_demonstration: bool,
    #[serde(default)]
    pub grants: u32,
    #[serde(default)]
    pub deleted: bool,
}

impl Member {
    pub fn new(id: i64, name: &str) -> Self {
        Self {
            id,
            name: name.to_owned(),
            ..Default::default()
        }
    }
}

/// Conference record. The tag is the human-typed identifier, unique per
/// server; everything else may be defaulted on ingress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conference {
    #[serde(default)]
    pub id: i64,
    pub tag: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub descr: String,
    #[serde(default)]
    pub founder: String,
    #[serde(default)]
    pub founder_id: i64,
    #[serde(default, rename = "type")]
    pub conference_type: ConferenceType,
    #[serde(default)]
    pub grants: u32,
    #[serde(default)]
    pub duration: u64,
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub connect_members: bool,
    #[serde(default)]
    pub temp: bool,
    #[serde(default)]
    pub deleted: bool,
}

impl Conference {
    pub fn with_tag(tag: &str) -> Self {
        Self {
            tag: tag.to_owned(),
            ..Default::default()
        }
    }
}

/// Chat message. GUIDs come from the sender so delivery is idempotent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub guid: String,
    #[serde(default)]
    pub dt: i64,
    #[serde(default, rename = "type")]
    pub message_type: MessageType,
    #[serde(default)]
    pub author_id: i64,
    #[serde(default)]
    pub author_name: String,
    #[serde(default)]
    pub sender_id: i64,
    #[serde(default)]
    pub sender_name: String,
    #[serde(default)]
    pub subscriber_id: i64,
    #[serde(default)]
    pub subscriber_name: String,
    #[serde(default)]
    pub conference_tag: String,
    #[serde(default)]
    pub conference_name: String,
    #[serde(default)]
    pub status: MessageStatus,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub call_duration: i32,
    #[serde(default)]
    pub call_result: CallResult,
    #[serde(default)]
    pub preview: String,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub url: String,
}

impl Message {
    /// Fresh outgoing text message; the GUID makes delivery idempotent.
    pub fn text(author_id: i64, author_name: &str, conference_tag: &str, text: &str) -> Self {
        Self {
            guid: uuid::Uuid::new_v4().to_string(),
            dt: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0),
            message_type: MessageType::TextMessage,
            author_id,
            author_name: author_name.to_owned(),
            conference_tag: conference_tag.to_owned(),
            status: MessageStatus::Created,
            text: text.to_owned(),
            ..Default::default()
        }
    }
}

/// Large chat payload (image, document, voice note) referenced from
/// messages by GUID.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blob {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub owner_id: i64,
    pub guid: String,
    #[serde(default, rename = "type")]
    pub blob_type: BlobType,
    #[serde(default)]
    pub status: BlobStatus,
    #[serde(default)]
    pub action: BlobAction,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub preview: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub deleted: bool,
}

/// Per-user capability bitmask carried in `connect_response` and
/// `update_grants`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Grants {
    pub allowed_work: bool,
    pub free_license: bool,
    pub allowed_autonomous_work: bool,
    pub allowed_crypto: bool,
    pub allowed_record: bool,
    pub allowed_symmetric_conf: bool,
    pub allowed_asymmetric_conf: bool,
    pub allowed_creating_conferences: bool,
    pub deny_udp: bool,
}

impl Grants {
    pub fn parse(bits: u32) -> Self {
        let bit = |n: u32| bits & (1 << n) != 0;
        Self {
            allowed_work: bit(0),
            free_license: bit(1),
            allowed_autonomous_work: bit(2),
            allowed_crypto: bit(3),
            allowed_record: bit(10),
            allowed_symmetric_conf: bit(11),
            allowed_asymmetric_conf: bit(12),
            allowed_creating_conferences: bit(17),
            deny_udp: bit(30),
        }
    }

    pub fn serialize(self) -> u32 {
        let mut bits = 0u32;
        let mut set = |on: bool, n: u32| {
            if on {
                bits |= 1 << n;
            }
        };
        set(self.allowed_work, 0);
        set(self.free_license, 1);
        set(self.allowed_autonomous_work, 2);
        set(self.allowed_crypto, 3);
        set(self.allowed_record, 10);
        set(self.allowed_symmetric_conf, 11);
        set(self.allowed_asymmetric_conf, 12);
        set(self.allowed_creating_conferences, 17);
        set(self.deny_udp, 30);
        bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grants_bits_roundtrip() {
        let grants = Grants {
            allowed_work: true,
            allowed_crypto: true,
            allowed_creating_conferences: true,
            deny_udp: true,
            ..Default::default()
        };

        let bits = grants.serialize();
        assert_eq!(bits, 1 | (1 << 3) | (1 << 17) | (1 << 30));
        assert_eq!(Grants::parse(bits), grants);
    }

    #[test]
    fn int_enums_fall_back_to_undefined() {
        assert_eq!(MemberState::from(99), MemberState::Undefined);
        assert_eq!(i32::from(MemberState::Conferencing), 3);
    }

    #[test]
    fn member_parses_with_defaults() {
        let member: Member = serde_json::from_str(r#"{"id": 5, "name": "alice"}"#).unwrap();
        assert_eq!(member.id, 5);
        assert_eq!(member.state, MemberState::Undefined);
        assert!(member.groups.is_empty());

        // id is required
        assert!(serde_json::from_str::<Member>(r#"{"name": "x"}"#).is_err());
    }

    #[test]
    fn text_messages_get_unique_guids() {
        let a = Message::text(1, "alice", "standup", "hello");
        let b = Message::text(1, "alice", "standup", "hello");
        assert_ne!(a.guid, b.guid);
        assert_eq!(a.message_type, MessageType::TextMessage);
        assert_eq!(a.status, MessageStatus::Created);
    }

    #[test]
    fn conference_type_uses_wire_name() {
        let conference = Conference {
            conference_type: ConferenceType::Symmetric,
            ..Conference::with_tag("t1")
        };
        let json = serde_json::to_string(&conference).unwrap();
        assert!(json.contains(r#""type":1"#));
    }
}
