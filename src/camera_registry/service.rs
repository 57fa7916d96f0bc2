//! CameraRegistry Service
//!
//! ## 処理フロー
//! 1. apply_discovery: 探索結果をレコードへマージ（新規 / 再発見 / offline）
//! 2. resolve: DeviceAdapter で映像ソースURLを取得
//! 3. generate_handoff_token: 外部システム向け登録コードを生成
//!
//! レコードの更新は全て `state` の書き込みロック内で完結させる。
//! ハンドルテーブルのロック内から呼ばれる `mark_*` 系もあるため、
//! レコードロックを保持したままハンドルテーブルに触れないこと。

use super::handoff::{HandoffPayload, HandoffToken};
use super::types::{CameraRecord, CameraStatus, Credentials, DiscoverySummary};
use crate::device_adapter::{DeviceAdapter, ResolveError};
use crate::error::{Error, Result};
use crate::stream_manager::HandleTable;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Default)]
struct RegistryState {
    records: HashMap<String, CameraRecord>,
    default_credentials: Option<Credentials>,
    last_discovery_at: Option<DateTime<Utc>>,
}

/// 発見済みカメラの一覧と状態を保持する
pub struct CameraRegistry {
    state: RwLock<RegistryState>,
    adapter: Arc<dyn DeviceAdapter>,
    handles: Arc<HandleTable>,
}

impl CameraRegistry {
    pub fn new(adapter: Arc<dyn DeviceAdapter>) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            adapter,
            handles: Arc::new(HandleTable::new()),
        }
    }

    /// StreamManager と共有するハンドルテーブル
    pub fn handle_table(&self) -> Arc<HandleTable> {
        self.handles.clone()
    }

    // ========================================
    // Discovery
    // ========================================

    /// 探索1ラウンド分の結果をマージ
    ///
    /// 同じ集合で何度呼んでも `last_seen` 以外は変化しない
    pub fn apply_discovery(&self, addresses: &[String]) -> DiscoverySummary {
        let now = Utc::now();
        let current: HashSet<&str> = addresses.iter().map(String::as_str).collect();
        let mut summary = DiscoverySummary::default();

        let mut state = self.state.write();
        let defaults = state.default_credentials.clone();

        let mut processed = HashSet::new();
        for address in addresses {
            if !processed.insert(address.as_str()) {
                continue;
            }
            if let Some(record) = state.records.get_mut(address) {
                record.last_seen = now;
                if record.status == CameraStatus::Offline {
                    record.status = CameraStatus::Discovered;
                    info!(address = %address, "Camera back online");
                }
                summary.seen += 1;
            } else {
                state.records.insert(
                    address.clone(),
                    CameraRecord::discovered(address, defaults.clone(), now),
                );
                summary.added += 1;
                info!(address = %address, "Camera discovered");
            }
        }

        for record in state.records.values_mut() {
            if current.contains(record.address.as_str()) || record.status == CameraStatus::Offline {
                continue;
            }
            record.status = CameraStatus::Offline;
            record.connected = false;
            summary.went_offline += 1;
            info!(address = %record.address, "Camera went offline");
        }

        state.last_discovery_at = Some(now);

        debug!(
            added = summary.added,
            seen = summary.seen,
            went_offline = summary.went_offline,
            total = state.records.len(),
            "Discovery results applied"
        );
        summary
    }

    pub fn last_discovery_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().last_discovery_at
    }

    // ========================================
    // Resolution
    // ========================================

    /// 映像ソースを解決してレコードに保存（映像はまだ開かない）
    pub async fn resolve(&self, address: &str, username: &str, password: &str) -> Result<String> {
        if !self.contains(address) {
            return Err(Error::NotFound(address.to_string()));
        }

        // 旧セッションは旧URLに紐づくため先に解放（開始中の start も無効化）
        let released = self.handles.release_with(address, |had_session| {
            if had_session {
                self.mark_session_ended(address);
            }
        });
        if released {
            info!(address = %address, "Released active stream before resolving");
        }

        let result = self.adapter.resolve(address, username, password).await;

        // 解決待ちの間に始まったセッションも旧URLを読んでいるので同様に破棄
        let (outcome, stale) = self.handles.with_lock(|map| {
            let cancelled = map.cancel_starts(address);
            let stale = map.take(address);
            let outcome = self.store_resolution(
                address,
                username,
                password,
                result,
                stale.is_some() || cancelled,
            );
            (outcome, stale)
        });
        if let Some(handle) = stale {
            info!(
                address = %address,
                session_id = %handle.session_id(),
                "Released stream started during resolution"
            );
            self.handles.dispose(handle);
        }
        outcome
    }

    /// 解決結果をレコードへ反映（ハンドルテーブルのロック内で呼ぶ）
    fn store_resolution(
        &self,
        address: &str,
        username: &str,
        password: &str,
        result: std::result::Result<String, ResolveError>,
        had_session: bool,
    ) -> Result<String> {
        let mut state = self.state.write();
        let record = state
            .records
            .get_mut(address)
            .ok_or_else(|| Error::NotFound(address.to_string()))?;
        if had_session {
            record.set_idle();
        }

        match result {
            Ok(url) => {
                record.video_source = Some(url.clone());
                record.credentials = Some(Credentials::new(username, password));
                record.error_message = None;
                if record.status == CameraStatus::Error {
                    record.status = CameraStatus::Discovered;
                }
                info!(address = %address, "Video source resolved");
                Ok(url)
            }
            Err(e) => {
                record.set_error(e.to_string());
                warn!(address = %address, error = %e, "Video source resolution failed");
                Err(e.into())
            }
        }
    }

    /// 外部システム向けハンドオフトークンを生成
    pub async fn generate_handoff_token(
        &self,
        address: &str,
        username: &str,
        password: &str,
    ) -> Result<HandoffToken> {
        let record = self
            .get(address)
            .ok_or_else(|| Error::NotFound(address.to_string()))?;

        let video_source = match record.video_source.clone() {
            Some(url) => url,
            None => self.resolve(address, username, password).await?,
        };

        let payload = HandoffPayload {
            ip: address.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            rtsp_url: video_source.clone(),
            timestamp: Utc::now(),
        };

        debug!(address = %address, "Handoff token generated");

        Ok(HandoffToken {
            code: payload.encode()?,
            camera_name: record.display_name(),
            video_source,
        })
    }

    // ========================================
    // Credentials
    // ========================================

    pub fn set_credentials(&self, credentials: Credentials) {
        info!(username = %credentials.username, "Default camera credentials set");
        self.state.write().default_credentials = Some(credentials);
    }

    pub fn default_credentials(&self) -> Option<Credentials> {
        self.state.read().default_credentials.clone()
    }

    pub fn has_credentials(&self) -> bool {
        self.state.read().default_credentials.is_some()
    }

    /// 全セッション停止・全レコード破棄・既定認証情報クリア
    pub fn clear_credentials(&self) {
        let released = self.handles.release_all_with(|_| {
            let mut state = self.state.write();
            state.records.clear();
            state.default_credentials = None;
            state.last_discovery_at = None;
        });
        info!(released_streams = released, "Credentials cleared, registry reset");
    }

    // ========================================
    // Queries
    // ========================================

    /// 全レコードのコピー（アドレス順）
    pub fn snapshot(&self) -> Vec<CameraRecord> {
        let mut records: Vec<CameraRecord> = self.state.read().records.values().cloned().collect();
        records.sort_by(|a, b| a.address.cmp(&b.address));
        records
    }

    pub fn get(&self, address: &str) -> Option<CameraRecord> {
        self.state.read().records.get(address).cloned()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.state.read().records.contains_key(address)
    }

    // ========================================
    // StreamManager hooks (called under the handle-table lock)
    // ========================================

    pub(crate) fn video_source(&self, address: &str) -> Result<String> {
        let state = self.state.read();
        let record = state
            .records
            .get(address)
            .ok_or_else(|| Error::NotFound(address.to_string()))?;
        record
            .video_source
            .clone()
            .ok_or_else(|| Error::NotResolved(address.to_string()))
    }

    /// 戻り値: レコードが存在したか
    pub(crate) fn mark_session_started(&self, address: &str) -> bool {
        let mut state = self.state.write();
        match state.records.get_mut(address) {
            Some(record) => {
                record.connected = true;
                record.status = CameraStatus::Connected;
                record.error_message = None;
                true
            }
            None => false,
        }
    }

    pub(crate) fn mark_session_ended(&self, address: &str) {
        if let Some(record) = self.state.write().records.get_mut(address) {
            record.set_idle();
        }
    }

    pub(crate) fn mark_open_failed(&self, address: &str, message: &str) {
        if let Some(record) = self.state.write().records.get_mut(address) {
            record.set_error(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device_adapter::ResolveError;
    use crate::test_support::StubAdapter;

    const CAM: &str = "10.0.0.5";
    const URL: &str = "rtsp://admin:pw@10.0.0.5:554/stream1";

    fn registry(adapter: StubAdapter) -> (CameraRegistry, Arc<StubAdapter>) {
        let adapter = Arc::new(adapter);
        (CameraRegistry::new(adapter.clone()), adapter)
    }

    fn addrs(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_apply_discovery_creates_records_with_defaults() {
        let (registry, _) = registry(StubAdapter::ok(URL));
        registry.set_credentials(Credentials::new("admin", "pw"));

        let summary = registry.apply_discovery(&addrs(&[CAM, "10.0.0.6"]));
        assert_eq!(summary.added, 2);
        assert!(registry.last_discovery_at().is_some());

        let record = registry.get(CAM).unwrap();
        assert_eq!(record.status, CameraStatus::Discovered);
        assert!(!record.connected);
        assert_eq!(record.credentials, Some(Credentials::new("admin", "pw")));
        assert!(record.video_source.is_none());
    }

    #[test]
    fn test_apply_discovery_is_idempotent_apart_from_last_seen() {
        let (registry, _) = registry(StubAdapter::ok(URL));
        registry.apply_discovery(&addrs(&[CAM]));
        let before = registry.snapshot();

        let summary = registry.apply_discovery(&addrs(&[CAM]));
        assert_eq!(summary, DiscoverySummary { added: 0, seen: 1, went_offline: 0 });

        let mut after = registry.snapshot();
        assert!(after[0].last_seen >= before[0].last_seen);
        after[0].last_seen = before[0].last_seen;
        assert_eq!(before, after);
    }

    #[test]
    fn test_duplicate_addresses_in_one_round() {
        let (registry, _) = registry(StubAdapter::ok(URL));
        let summary = registry.apply_discovery(&addrs(&[CAM, CAM]));
        assert_eq!(summary.added, 1);
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[test]
    fn test_missing_camera_goes_offline_and_comes_back() {
        let (registry, _) = registry(StubAdapter::ok(URL));
        registry.apply_discovery(&addrs(&[CAM, "10.0.0.6"]));
        assert!(registry.mark_session_started(CAM));

        let summary = registry.apply_discovery(&addrs(&["10.0.0.6"]));
        assert_eq!(summary.went_offline, 1);
        let record = registry.get(CAM).unwrap();
        assert_eq!(record.status, CameraStatus::Offline);
        assert!(!record.connected);

        // already offline: not counted again
        let summary = registry.apply_discovery(&addrs(&["10.0.0.6"]));
        assert_eq!(summary.went_offline, 0);

        registry.apply_discovery(&addrs(&[CAM, "10.0.0.6"]));
        assert_eq!(registry.get(CAM).unwrap().status, CameraStatus::Discovered);
    }

    #[test]
    fn test_snapshot_sorted_by_address() {
        let (registry, _) = registry(StubAdapter::ok(URL));
        registry.apply_discovery(&addrs(&["10.0.0.9", "10.0.0.1", "10.0.0.5"]));
        let order: Vec<String> = registry.snapshot().into_iter().map(|r| r.address).collect();
        assert_eq!(order, addrs(&["10.0.0.1", "10.0.0.5", "10.0.0.9"]));
    }

    #[tokio::test]
    async fn test_resolve_stores_video_source() {
        let (registry, _) = registry(StubAdapter::ok(URL));
        registry.apply_discovery(&addrs(&[CAM]));

        let url = registry.resolve(CAM, "admin", "pw").await.unwrap();
        assert_eq!(url, URL);

        let record = registry.get(CAM).unwrap();
        assert_eq!(record.video_source.as_deref(), Some(URL));
        assert_eq!(record.credentials, Some(Credentials::new("admin", "pw")));
        assert_eq!(record.status, CameraStatus::Discovered);
        assert!(!record.connected);
    }

    #[tokio::test]
    async fn test_resolve_unknown_address() {
        let (registry, adapter) = registry(StubAdapter::ok(URL));
        let err = registry.resolve("10.0.0.99", "admin", "pw").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(adapter.calls(), 0);
        assert!(registry.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_auth_failure_then_recovery() {
        let (registry, _) = registry(StubAdapter::failing(
            ResolveError::AuthenticationFailure("NotAuthorized".to_string()),
        ));
        registry.apply_discovery(&addrs(&[CAM]));

        let err = registry.resolve(CAM, "admin", "wrong").await.unwrap_err();
        assert_eq!(err.code(), "AUTHENTICATION_FAILURE");

        let record = registry.get(CAM).unwrap();
        assert_eq!(record.status, CameraStatus::Error);
        assert!(!record.connected);
        assert!(!record.error_message.unwrap_or_default().is_empty());

        // a later discovery round leaves the error in place
        registry.apply_discovery(&addrs(&[CAM]));
        assert_eq!(registry.get(CAM).unwrap().status, CameraStatus::Error);
    }

    #[tokio::test]
    async fn test_successful_resolve_clears_error() {
        let adapter = Arc::new(StubAdapter::ok(URL));
        let registry = CameraRegistry::new(adapter.clone());
        registry.apply_discovery(&addrs(&[CAM]));
        registry.mark_open_failed(CAM, "Stream open failed: refused");

        registry.resolve(CAM, "admin", "pw").await.unwrap();
        let record = registry.get(CAM).unwrap();
        assert_eq!(record.status, CameraStatus::Discovered);
        assert!(record.error_message.is_none());
    }

    #[tokio::test]
    async fn test_handoff_token_resolves_once() {
        let (registry, adapter) = registry(StubAdapter::ok(URL));
        registry.apply_discovery(&addrs(&[CAM]));

        let token = registry.generate_handoff_token(CAM, "admin", "pw").await.unwrap();
        assert_eq!(token.camera_name, "ONVIF Camera 10.0.0.5");
        assert_eq!(token.video_source, URL);
        assert_eq!(adapter.calls(), 1);

        let payload = HandoffPayload::decode(&token.code).unwrap();
        assert_eq!(payload.ip, CAM);
        assert_eq!(payload.username, "admin");
        assert_eq!(payload.password, "pw");
        assert_eq!(payload.rtsp_url, URL);

        // known source is reused
        registry.generate_handoff_token(CAM, "admin", "pw").await.unwrap();
        assert_eq!(adapter.calls(), 1);
    }

    #[tokio::test]
    async fn test_handoff_token_unknown_camera() {
        let (registry, _) = registry(StubAdapter::ok(URL));
        let err = registry
            .generate_handoff_token("10.0.0.99", "admin", "pw")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_clear_credentials_resets_everything() {
        let (registry, _) = registry(StubAdapter::ok(URL));
        registry.set_credentials(Credentials::new("admin", "pw"));
        registry.apply_discovery(&addrs(&[CAM]));
        assert!(registry.has_credentials());

        registry.clear_credentials();
        assert!(!registry.has_credentials());
        assert!(registry.default_credentials().is_none());
        assert!(registry.snapshot().is_empty());
        assert!(registry.last_discovery_at().is_none());
    }

    #[test]
    fn test_video_source_errors() {
        let (registry, _) = registry(StubAdapter::ok(URL));
        assert!(matches!(registry.video_source(CAM), Err(Error::NotFound(_))));
        registry.apply_discovery(&addrs(&[CAM]));
        assert!(matches!(registry.video_source(CAM), Err(Error::NotResolved(_))));
    }
}
