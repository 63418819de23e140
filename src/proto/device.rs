//! Device lifecycle commands: captured devices announce themselves with
//! `device_connect`, renderers subscribe to streams by SSRC.

use serde::{Deserialize, Serialize};

use super::int_enum;
use super::types::DeviceType;
use crate::video::ColorSpace;

int_enum! {
    ConnectType {
        Undefined = 0,
        CreatedDevice = 1,
        ConnectRenderer = 2,
    }
}

/// Announcement of a local device to the conference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceParams {
    pub id: u32,
    pub ssrc: u32,
    #[serde(default)]
    pub device_type: DeviceType,
    #[serde(default)]
    pub ord: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub metadata: String,
    #[serde(default)]
    pub resolution: u32,
    #[serde(default)]
    pub color_space: ColorSpace,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConnect {
    #[serde(default)]
    pub connect_type: ConnectType,
    #[serde(default)]
    pub device_type: DeviceType,
    pub device_id: u32,
    #[serde(default)]
    pub client_id: i64,
    #[serde(default)]
    pub metadata: String,
    #[serde(default)]
    pub receiver_ssrc: u32,
    #[serde(default)]
    pub author_ssrc: u32,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub resolution: u32,
    #[serde(default)]
    pub color_space: ColorSpace,
    #[serde(default)]
    pub my: bool,
    #[serde(default)]
    pub secure_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDisconnect {
    #[serde(default)]
    pub device_type: DeviceType,
    pub device_id: u32,
    #[serde(default)]
    pub client_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RendererConnect {
    pub device_id: u32,
    pub ssrc: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RendererDisconnect {
    pub device_id: u32,
    pub ssrc: u32,
}
