//! CameraRegistry Type Definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// カメラ状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraStatus {
    /// 発見済み（未接続）
    Discovered,
    /// ストリーム配信中
    Connected,
    /// 解決またはオープンに失敗
    Error,
    /// 直近の探索ラウンドで応答なし
    Offline,
}

impl fmt::Display for CameraStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Discovered => "discovered",
            Self::Connected => "connected",
            Self::Error => "error",
            Self::Offline => "offline",
        };
        f.write_str(s)
    }
}

/// カメラ認証情報
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// 発見済みカメラ1台分のレコード
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraRecord {
    /// ネットワークアドレス（一意キー）
    pub address: String,
    pub status: CameraStatus,
    /// 解決済みのRTSP URL（認証情報込み）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_source: Option<String>,
    /// 直近で使用した認証情報（シリアライズしない）
    #[serde(skip)]
    pub credentials: Option<Credentials>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl CameraRecord {
    pub(crate) fn discovered(
        address: &str,
        credentials: Option<Credentials>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            address: address.to_string(),
            status: CameraStatus::Discovered,
            video_source: None,
            credentials,
            first_seen: now,
            last_seen: now,
            connected: false,
            error_message: None,
        }
    }

    /// 表示名（ハンドオフ先での登録名）
    pub fn display_name(&self) -> String {
        format!("ONVIF Camera {}", self.address)
    }

    pub(crate) fn set_idle(&mut self) {
        self.connected = false;
        self.status = CameraStatus::Discovered;
        self.error_message = None;
    }

    pub(crate) fn set_error(&mut self, message: impl Into<String>) {
        self.connected = false;
        self.status = CameraStatus::Error;
        self.error_message = Some(message.into());
    }
}

/// apply_discovery の結果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiscoverySummary {
    /// 新規レコード数
    pub added: usize,
    /// 既知で今回も応答したレコード数
    pub seen: usize,
    /// 今回 offline になったレコード数
    pub went_offline: usize,
}
