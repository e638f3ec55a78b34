//! 外部协作者：设备生命周期和事件上报
//!
//! 断开连接之后要不要继续监控设备，由应用决定（设备是否被标记删除、
//! 应用是否处于后台）。控制器只负责在合适的时机询问和通知。

use crate::ble::peripheral::{PeripheralHandle, PeripheralId};
use serde::{Deserialize, Serialize};

/// 上报给外部事件日志的设备事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DeviceReport {
    Connected { id: PeripheralId },
    ConnectFailed { id: PeripheralId },
    Disconnected { id: PeripheralId, unexpected: bool },
}

/// 设备事件上报，发出即忘
pub trait EventReporter: Send + Sync {
    fn report(&self, report: DeviceReport);
}

/// 应用侧的设备生命周期
pub trait DeviceLifecycle: Send + Sync {
    /// 设备是否已被应用标记删除
    fn is_marked_for_deletion(&self, _id: &PeripheralId) -> bool {
        false
    }

    /// 应用是否处于后台运行模式
    fn is_background(&self) -> bool {
        false
    }

    /// 断开后开始监控（由应用安排定时器）
    fn start_monitoring(&self, _peripheral: &PeripheralHandle) {}
}

/// 默认实现：前台、不删除、不上报
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLifecycle;

impl DeviceLifecycle for NoopLifecycle {}

impl EventReporter for NoopLifecycle {
    fn report(&self, _report: DeviceReport) {}
}

/// 把设备事件写到日志的上报器
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl EventReporter for LogReporter {
    fn report(&self, report: DeviceReport) {
        match report {
            DeviceReport::Connected { id } => log::info!("Device {} connected", id),
            DeviceReport::ConnectFailed { id } => log::warn!("Device {} failed to connect", id),
            DeviceReport::Disconnected { id, unexpected } => {
                if unexpected {
                    log::warn!("Device {} disconnected unexpectedly", id);
                } else {
                    log::info!("Device {} disconnected", id);
                }
            }
        }
    }
}
