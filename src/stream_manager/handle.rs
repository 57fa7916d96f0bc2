//! HandleTable - カメラごとのストリームハンドル管理
//!
//! ## 不変条件
//!
//! - 1アドレスにつき生存ハンドルは最大1つ
//! - テーブルから取り出したハンドルは必ず `dispose()` で解放する
//! - ロックは同期 Mutex。保持したまま `.await` しない
//!
//! ロック順序: HandleTable → CameraRegistry のレコード。逆順で取得しないこと。

use super::capture::CaptureControl;
use super::StreamState;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

/// 開いているキャプチャ資源1つ分
pub struct StreamHandle {
    address: String,
    session_id: Uuid,
    active: bool,
    opened_at: DateTime<Utc>,
    control: Box<dyn CaptureControl>,
}

impl StreamHandle {
    pub(crate) fn new(address: &str, session_id: Uuid, control: Box<dyn CaptureControl>) -> Self {
        Self {
            address: address.to_string(),
            session_id,
            active: true,
            opened_at: Utc::now(),
            control,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }
}

/// ロック内でのみ触れるテーブル本体
#[derive(Default)]
pub(crate) struct HandleMap {
    handles: HashMap<String, StreamHandle>,
    starting: HashMap<String, usize>,
    stopping: HashMap<String, usize>,
    /// 実行中 start() の世代。stop / resolve / リセットで進む
    generations: HashMap<String, u64>,
}

impl HandleMap {
    /// 登録中ハンドルを無効化して取り出す（呼び出し側で dispose すること）
    pub fn take(&mut self, address: &str) -> Option<StreamHandle> {
        let handle = self.handles.remove(address)?;
        Some(self.detach(handle))
    }

    /// 未登録のハンドルを解放待ちとして扱う
    pub fn detach(&mut self, mut handle: StreamHandle) -> StreamHandle {
        handle.active = false;
        *self.stopping.entry(handle.address.clone()).or_default() += 1;
        handle
    }

    /// 指定セッションのハンドルがまだ登録されている場合のみ取り出す
    pub fn take_session(&mut self, address: &str, session_id: Uuid) -> Option<StreamHandle> {
        match self.handles.get(address) {
            Some(h) if h.session_id == session_id => self.take(address),
            _ => None,
        }
    }

    pub fn take_all(&mut self) -> Vec<StreamHandle> {
        let addresses: Vec<String> = self.handles.keys().cloned().collect();
        addresses.iter().filter_map(|a| self.take(a)).collect()
    }

    /// 新規ハンドルを登録。同時に登録されていた別ハンドルがあれば返す
    pub fn insert(&mut self, handle: StreamHandle) -> Option<StreamHandle> {
        let displaced = self.take(&handle.address);
        self.handles.insert(handle.address.clone(), handle);
        displaced
    }

    pub fn contains(&self, address: &str) -> bool {
        self.handles.contains_key(address)
    }

    pub fn is_active(&self, address: &str, session_id: Uuid) -> bool {
        self.handles
            .get(address)
            .map_or(false, |h| h.active && h.session_id == session_id)
    }

    /// 実行中の start() を無効化。戻り値: 対象があったか
    pub fn cancel_starts(&mut self, address: &str) -> bool {
        if !self.starting.contains_key(address) {
            return false;
        }
        *self.generations.entry(address.to_string()).or_default() += 1;
        true
    }

    pub fn cancel_all_starts(&mut self) {
        for address in self.starting.keys() {
            *self.generations.entry(address.clone()).or_default() += 1;
        }
    }

    fn generation(&self, address: &str) -> u64 {
        self.generations.get(address).copied().unwrap_or(0)
    }

    fn begin_start(&mut self, address: &str) -> u64 {
        *self.starting.entry(address.to_string()).or_default() += 1;
        self.generation(address)
    }

    fn end_start(&mut self, address: &str) {
        decrement(&mut self.starting, address);
        if !self.starting.contains_key(address) {
            self.generations.remove(address);
        }
    }

    fn end_stop(&mut self, address: &str) {
        decrement(&mut self.stopping, address);
    }

    fn state(&self, address: &str) -> StreamState {
        if self.handles.get(address).map_or(false, |h| h.active) {
            StreamState::Active
        } else if self.stopping.contains_key(address) {
            StreamState::Stopping
        } else if self.starting.contains_key(address) {
            StreamState::Starting
        } else {
            StreamState::Idle
        }
    }
}

fn decrement(counts: &mut HashMap<String, usize>, address: &str) {
    if let Some(n) = counts.get_mut(address) {
        *n -= 1;
        if *n == 0 {
            counts.remove(address);
        }
    }
}

/// アドレス → ハンドルの共有テーブル（CameraRegistry と StreamManager で共有）
#[derive(Default)]
pub struct HandleTable {
    map: Mutex<HandleMap>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// ロックを取得してクロージャを実行
    pub(crate) fn with_lock<R>(&self, f: impl FnOnce(&mut HandleMap) -> R) -> R {
        let mut map = self.map.lock();
        f(&mut map)
    }

    /// 登録中ハンドルを取り出して解放し、実行中の start() も無効化する
    ///
    /// `under_lock` はセッション有無（登録済み or 開始中）を受け取り、
    /// テーブルのロック内で実行される（レコード更新をハンドル操作と不可分にするため）。
    /// 戻り値: セッションが存在したか
    pub(crate) fn release_with(&self, address: &str, under_lock: impl FnOnce(bool)) -> bool {
        let (taken, cancelled) = self.with_lock(|map| {
            let cancelled = map.cancel_starts(address);
            let handle = map.take(address);
            under_lock(handle.is_some() || cancelled);
            (handle, cancelled)
        });
        if cancelled {
            tracing::debug!(address = %address, "Pending stream start cancelled");
        }
        match taken {
            Some(handle) => {
                self.dispose(handle);
                true
            }
            None => cancelled,
        }
    }

    /// 全ハンドルを取り出して解放（開始中の start() も全て無効化）。
    /// `under_lock` は取り出したアドレス一覧を受け取る
    pub(crate) fn release_all_with(&self, under_lock: impl FnOnce(&[String])) -> usize {
        let taken = self.with_lock(|map| {
            map.cancel_all_starts();
            let handles = map.take_all();
            let addresses: Vec<String> = handles.iter().map(|h| h.address.clone()).collect();
            under_lock(&addresses);
            handles
        });
        let count = taken.len();
        for handle in taken {
            self.dispose(handle);
        }
        count
    }

    /// 取り出し済みハンドルの資源を解放（ロック外で実行）
    ///
    /// 解放失敗はログのみ。呼び出し元へは伝播しない
    pub(crate) fn dispose(&self, handle: StreamHandle) {
        let StreamHandle {
            address,
            session_id,
            mut control,
            ..
        } = handle;

        match control.release() {
            Ok(()) => {
                tracing::debug!(address = %address, session_id = %session_id, "Capture released");
            }
            Err(e) => {
                tracing::warn!(
                    address = %address,
                    session_id = %session_id,
                    error = %e,
                    "Capture release failed"
                );
            }
        }

        self.with_lock(|map| map.end_stop(&address));
    }

    pub fn state(&self, address: &str) -> StreamState {
        self.with_lock(|map| map.state(address))
    }

    pub fn is_active(&self, address: &str, session_id: Uuid) -> bool {
        self.with_lock(|map| map.is_active(address, session_id))
    }

    pub fn active_addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> =
            self.with_lock(|map| map.handles.keys().cloned().collect());
        addresses.sort();
        addresses
    }
}

/// start() 実行中マーカー。Drop で解除（start のキャンセル時も含む）
pub(crate) struct StartingGuard<'a> {
    table: &'a HandleTable,
    address: String,
    generation: u64,
}

impl<'a> StartingGuard<'a> {
    /// `map` はロック取得済みのテーブル
    pub fn begin(table: &'a HandleTable, map: &mut HandleMap, address: &str) -> Self {
        let generation = map.begin_start(address);
        Self {
            table,
            address: address.to_string(),
            generation,
        }
    }

    /// 開始後に stop / resolve / リセットが入ったか
    pub fn is_cancelled(&self, map: &HandleMap) -> bool {
        map.generation(&self.address) != self.generation
    }
}

impl Drop for StartingGuard<'_> {
    fn drop(&mut self) {
        self.table.with_lock(|map| map.end_start(&self.address));
    }
}
