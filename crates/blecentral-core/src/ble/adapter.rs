//! 平台 BLE 适配器接口
//!
//! 控制器只通过这里的 trait 访问无线电硬件。适配器的请求都是"发出即返回"的，
//! 结果通过 [`AdapterEventSender`] 以 [`AdapterEvent`] 的形式异步送回。
//!
//! 每个事件都带有创建它的适配器的代号 (generation)，适配器被替换后，
//! 旧适配器残留的事件会被控制器丢弃。

use crate::ble::central::Message;
use crate::ble::peripheral::{Advertisement, PeripheralId};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;
use uuid::Uuid;

/// 适配器电源/可用状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AdapterState {
    #[default]
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

impl AdapterState {
    pub fn is_powered_on(self) -> bool {
        self == AdapterState::PoweredOn
    }

    pub fn name(self) -> &'static str {
        match self {
            AdapterState::Unknown => "unknown",
            AdapterState::Resetting => "resetting",
            AdapterState::Unsupported => "unsupported",
            AdapterState::Unauthorized => "unauthorized",
            AdapterState::PoweredOff => "powered off",
            AdapterState::PoweredOn => "powered on",
        }
    }
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 适配器回调，全部在控制器任务上串行处理
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterEvent {
    StateChanged(AdapterState),
    Discovered {
        id: PeripheralId,
        advertisement: Advertisement,
        rssi: Option<i16>,
    },
    Connected {
        id: PeripheralId,
    },
    FailedToConnect {
        id: PeripheralId,
        error: Option<String>,
    },
    Disconnected {
        id: PeripheralId,
        error: Option<String>,
    },
    /// 进程恢复时仍处于连接状态的外设
    RestoreState {
        peripherals: Vec<PeripheralId>,
    },
}

/// 带代号的事件发送端，交给适配器工厂
#[derive(Debug, Clone)]
pub struct AdapterEventSender {
    generation: u64,
    tx: mpsc::UnboundedSender<Message>,
}

impl AdapterEventSender {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<Message>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// 发送事件；控制器已停止时返回 `false`
    pub fn send(&self, event: AdapterEvent) -> bool {
        self.tx
            .send(Message::Adapter {
                generation: self.generation,
                event,
            })
            .is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// 扫描选项
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryOptions {
    /// 同一外设的重复广播是否都上报
    pub allow_duplicates: bool,
    /// 蓝牙关闭时是否让系统提示用户
    pub show_power_alert: bool,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            allow_duplicates: true,
            show_power_alert: true,
        }
    }
}

/// 连接选项，平台不支持的字段会被忽略
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectOptions {
    pub notify_on_connection: bool,
    pub notify_on_disconnection: bool,
    pub notify_on_notification: bool,
}

/// 适配器错误
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("No Bluetooth adapters found")]
    NoAdapter,

    #[error("Adapter unavailable: {0}")]
    Unavailable(String),

    #[error("Unknown peripheral: {0}")]
    UnknownPeripheral(PeripheralId),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("btleplug error: {0}")]
    Btleplug(#[from] btleplug::Error),
}

/// 一个已创建的适配器
///
/// 所有请求都只是发出，不等待结果。
pub trait Adapter: Send {
    /// 平台当前报告的状态
    fn state(&self) -> AdapterState;

    fn start_discovery(
        &mut self,
        services: Option<&[Uuid]>,
        options: DiscoveryOptions,
    ) -> Result<(), AdapterError>;

    fn stop_discovery(&mut self) -> Result<(), AdapterError>;

    fn connect(
        &mut self,
        id: &PeripheralId,
        options: Option<&ConnectOptions>,
    ) -> Result<(), AdapterError>;

    /// 断开连接，或取消正在进行的连接尝试
    fn cancel_connection(&mut self, id: &PeripheralId) -> Result<(), AdapterError>;

    /// 停止投递回调，在适配器被替换前调用
    fn detach(&mut self);
}

/// 创建适配器
#[async_trait::async_trait]
pub trait AdapterFactory: Send + Sync {
    async fn create(
        &self,
        events: AdapterEventSender,
        restore_identifier: &str,
    ) -> Result<Box<dyn Adapter>, AdapterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_sender_tags_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sender = AdapterEventSender::new(3, tx);

        assert!(sender.send(AdapterEvent::StateChanged(AdapterState::PoweredOn)));
        match rx.try_recv().unwrap() {
            Message::Adapter { generation, event } => {
                assert_eq!(generation, 3);
                assert_eq!(event, AdapterEvent::StateChanged(AdapterState::PoweredOn));
            }
            other => panic!("unexpected message: {:?}", other),
        }

        drop(rx);
        assert!(sender.is_closed());
        assert!(!sender.send(AdapterEvent::StateChanged(AdapterState::PoweredOff)));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(AdapterState::default(), AdapterState::Unknown);
        assert_eq!(AdapterState::PoweredOn.to_string(), "powered on");
        assert!(AdapterState::PoweredOn.is_powered_on());
        assert!(!AdapterState::Resetting.is_powered_on());
    }
}
