//! DiscoveryEngine - ONVIF WS-Discovery over UDP broadcast
//!
//! ## 動作
//!
//! 1. Probe を 255.255.255.255:3702 へ送信（SO_BROADCAST / SO_REUSEADDR）
//! 2. 受信ウィンドウ（既定5秒）の間、応答を収集
//! 3. `NetworkVideoTransmitter` を含む応答の送信元アドレスを、初回応答順・重複なしで返す
//!
//! 送受信エラーはこの層で握りつぶす（ログのみ）。probe() は失敗しない。

mod probe;

pub use probe::{advertised_xaddrs, is_video_transmitter, probe_message, DEVICE_TYPE_MARKER, WS_DISCOVERY_PORT};

use crate::error::{Error, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use uuid::Uuid;

/// デフォルト受信ウィンドウ（5秒）
const DEFAULT_LISTEN_WINDOW: Duration = Duration::from_secs(5);

const RECV_BUFFER: usize = 65_535;

/// 受信エラー連続時の待機
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(50);

pub struct DiscoveryEngine {
    target: SocketAddr,
    listen_window: Duration,
}

impl Default for DiscoveryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscoveryEngine {
    pub fn new() -> Self {
        Self {
            target: SocketAddr::from((Ipv4Addr::BROADCAST, WS_DISCOVERY_PORT)),
            listen_window: DEFAULT_LISTEN_WINDOW,
        }
    }

    pub fn with_target(mut self, target: SocketAddr) -> Self {
        self.target = target;
        self
    }

    pub fn with_listen_window(mut self, window: Duration) -> Self {
        self.listen_window = window;
        self
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// 1ラウンド分の探索
    pub async fn probe(&self) -> Vec<String> {
        let socket = match self.open_socket() {
            Ok(socket) => socket,
            Err(e) => {
                tracing::warn!(error = %e, "Discovery socket setup failed");
                return Vec::new();
            }
        };

        let message_id = Uuid::new_v4();
        if let Err(e) = socket
            .send_to(probe_message(message_id).as_bytes(), self.target)
            .await
        {
            tracing::warn!(target = %self.target, error = %e, "Discovery probe send failed");
            return Vec::new();
        }
        tracing::debug!(target = %self.target, message_id = %message_id, "Discovery probe sent");

        let deadline = Instant::now() + self.listen_window;
        let mut found: Vec<String> = Vec::new();
        let mut buf = vec![0u8; RECV_BUFFER];

        loop {
            let received = match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
                Err(_) => break,
                Ok(received) => received,
            };

            match received {
                Ok((len, from)) => {
                    let body = String::from_utf8_lossy(&buf[..len]);
                    if !is_video_transmitter(&body) {
                        tracing::trace!(from = %from, "Ignoring non-camera discovery response");
                        continue;
                    }
                    let address = from.ip().to_string();
                    if found.contains(&address) {
                        continue;
                    }
                    tracing::info!(
                        address = %address,
                        xaddrs = ?advertised_xaddrs(&body),
                        "Found ONVIF device"
                    );
                    found.push(address);
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Error receiving discovery response");
                    tokio::time::sleep(RECV_ERROR_BACKOFF).await;
                }
            }
        }

        tracing::debug!(count = found.len(), "Discovery round finished");
        found
    }

    /// 定期探索ループ（終了しない）
    ///
    /// - 前ラウンド完了後に `interval` 待機（重複実行なし）
    /// - `is_enabled()` が false のラウンドはスキップ
    pub async fn run_periodic<E, F>(&self, interval: Duration, is_enabled: E, mut on_round: F)
    where
        E: Fn() -> bool,
        F: FnMut(Vec<String>),
    {
        tracing::info!(
            interval_sec = interval.as_secs(),
            target = %self.target,
            "Discovery loop started"
        );
        loop {
            if is_enabled() {
                let found = self.probe().await;
                on_round(found);
            } else {
                tracing::debug!("Discovery skipped: no credentials configured");
            }
            tokio::time::sleep(interval).await;
        }
    }

    fn open_socket(&self) -> Result<UdpSocket> {
        let transport = |e: std::io::Error| Error::DiscoveryTransport(e.to_string());

        let socket = Socket::new(Domain::for_address(self.target), Type::DGRAM, Some(Protocol::UDP))
            .map_err(transport)?;
        socket.set_reuse_address(true).map_err(transport)?;
        if self.target.is_ipv4() {
            socket.set_broadcast(true).map_err(transport)?;
        }
        socket.set_nonblocking(true).map_err(transport)?;

        let bind: SocketAddr = if self.target.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        socket.bind(&bind.into()).map_err(transport)?;

        let std_socket: std::net::UdpSocket = socket.into();
        UdpSocket::from_std(std_socket).map_err(transport)
    }
}
