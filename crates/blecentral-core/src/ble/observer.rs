//! 观察者接口和领域事件
//!
//! 观察者的回调在控制器的串行任务上执行，**不能阻塞**：
//! 一个慢的观察者会拖住之后所有的适配器回调。需要做耗时工作的观察者
//! 应该使用 [`ChannelObserver`]，在自己的任务里消费事件。

use crate::ble::adapter::AdapterState;
use crate::ble::peripheral::PeripheralHandle;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// 分发给观察者的领域事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CentralEvent {
    Located {
        peripheral: PeripheralHandle,
    },
    Connected {
        peripheral: PeripheralHandle,
    },
    CouldNotConnect {
        peripheral: PeripheralHandle,
        error: Option<String>,
    },
    /// `error` 为 `None` 表示主动断开，否则为意外断开
    Disconnected {
        peripheral: PeripheralHandle,
        error: Option<String>,
    },
    Timeout,
    StateChanged {
        state: AdapterState,
    },
}

/// 中心设备观察者
///
/// 所有方法默认为空实现，只需覆盖关心的事件。
pub trait CentralObserver: Send + Sync {
    fn located(&self, _peripheral: &PeripheralHandle) {}

    fn connected(&self, _peripheral: &PeripheralHandle) {}

    fn could_not_connect(&self, _peripheral: &PeripheralHandle, _error: Option<&str>) {}

    fn disconnected(&self, _peripheral: &PeripheralHandle, _error: Option<&str>) {}

    /// 调用方的连接计时器超时
    fn timeout(&self) {}

    fn state_changed(&self, _state: AdapterState) {}
}

impl CentralEvent {
    /// 调用观察者上对应的方法
    pub fn deliver(&self, observer: &dyn CentralObserver) {
        match self {
            CentralEvent::Located { peripheral } => observer.located(peripheral),
            CentralEvent::Connected { peripheral } => observer.connected(peripheral),
            CentralEvent::CouldNotConnect { peripheral, error } => {
                observer.could_not_connect(peripheral, error.as_deref());
            }
            CentralEvent::Disconnected { peripheral, error } => {
                observer.disconnected(peripheral, error.as_deref());
            }
            CentralEvent::Timeout => observer.timeout(),
            CentralEvent::StateChanged { state } => observer.state_changed(*state),
        }
    }

    /// 事件关联的外设
    pub fn peripheral(&self) -> Option<&PeripheralHandle> {
        match self {
            CentralEvent::Located { peripheral }
            | CentralEvent::Connected { peripheral }
            | CentralEvent::CouldNotConnect { peripheral, .. }
            | CentralEvent::Disconnected { peripheral, .. } => Some(peripheral),
            CentralEvent::Timeout | CentralEvent::StateChanged { .. } => None,
        }
    }
}

/// 把事件转发到独立队列的观察者
///
/// 队列无界，发送永远不会阻塞控制器；接收端关闭后事件被丢弃。
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<CentralEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CentralEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: CentralEvent) {
        let _ = self.tx.send(event);
    }
}

impl CentralObserver for ChannelObserver {
    fn located(&self, peripheral: &PeripheralHandle) {
        self.forward(CentralEvent::Located {
            peripheral: peripheral.clone(),
        });
    }

    fn connected(&self, peripheral: &PeripheralHandle) {
        self.forward(CentralEvent::Connected {
            peripheral: peripheral.clone(),
        });
    }

    fn could_not_connect(&self, peripheral: &PeripheralHandle, error: Option<&str>) {
        self.forward(CentralEvent::CouldNotConnect {
            peripheral: peripheral.clone(),
            error: error.map(str::to_string),
        });
    }

    fn disconnected(&self, peripheral: &PeripheralHandle, error: Option<&str>) {
        self.forward(CentralEvent::Disconnected {
            peripheral: peripheral.clone(),
            error: error.map(str::to_string),
        });
    }

    fn timeout(&self) {
        self.forward(CentralEvent::Timeout);
    }

    fn state_changed(&self, state: AdapterState) {
        self.forward(CentralEvent::StateChanged { state });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_observer_forwards_every_event() {
        let (observer, mut rx) = ChannelObserver::new();
        let events = vec![
            CentralEvent::Located {
                peripheral: PeripheralHandle::attached("a".into()),
            },
            CentralEvent::CouldNotConnect {
                peripheral: PeripheralHandle::attached("a".into()),
                error: Some("refused".to_string()),
            },
            CentralEvent::Timeout,
            CentralEvent::StateChanged {
                state: AdapterState::PoweredOff,
            },
        ];

        for event in &events {
            event.deliver(&observer);
        }

        for expected in events {
            assert_eq!(rx.try_recv().unwrap(), expected);
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_receiver_is_ignored() {
        let (observer, rx) = ChannelObserver::new();
        drop(rx);
        // 不应 panic
        observer.timeout();
    }
}
