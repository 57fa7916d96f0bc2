//! CameraRegistry Module
//!
//! ## 概要
//! 探索で見つかったONVIFカメラをアドレス単位で管理する（メモリ内のみ、永続化なし）。
//!
//! ## モジュール構成
//! - `types`: レコード・状態・認証情報
//! - `service`: 探索結果マージ / 映像ソース解決 / 認証情報管理
//! - `handoff`: 外部システム向け登録コード
//!
//! ## 状態遷移
//! ```text
//! (new) → discovered ─start→ connected ─stop/end→ discovered
//!              │                 │
//!              ├─resolve失敗→ error ─resolve成功→ discovered
//!              └─探索で消失→ offline ─再発見→ discovered
//! ```
//!
//! ## 使用例
//! ```rust,ignore
//! let registry = Arc::new(CameraRegistry::new(adapter));
//! registry.set_credentials(Credentials::new("admin", "pw"));
//! registry.apply_discovery(&addresses);
//! let url = registry.resolve("192.168.1.20", "admin", "pw").await?;
//! ```

pub mod handoff;
pub mod service;
pub mod types;

// Re-exports
pub use handoff::{HandoffPayload, HandoffToken};
pub use service::CameraRegistry;
pub use types::*;
