//! BLE Central Core Library
//!
//! 低功耗蓝牙中心设备的管理核心：扫描、连接、断开，以及进程恢复时的连接清理。
//!
//! # 模块
//!
//! - **ble**: 控制器、适配器接口、观察者注册表和 iBeacon 解码
//! - **config**: 持久化设置
//! - **logging**: 日志级别
//!
//! # 使用示例
//!
//! ```ignore
//! use blecentral_core::{
//!     BtleplugAdapterFactory, CentralController, CentralSettings, ChannelObserver,
//! };
//! use std::sync::Arc;
//!
//! let central = CentralController::new(Arc::new(BtleplugAdapterFactory), CentralSettings::load());
//!
//! // 1. 注册观察者
//! let (observer, mut events) = ChannelObserver::new();
//! central.register("scanner", Arc::new(observer));
//!
//! // 2. 创建适配器，等待上电后扫描
//! central.enable().await?;
//! central.scan(None, false);
//!
//! // 3. 处理事件
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! ```

pub mod ble;
pub mod config;
pub mod logging;

// BLE re-exports
pub use ble::{
    Adapter, AdapterError, AdapterEvent, AdapterEventSender, AdapterFactory, AdapterState,
    Advertisement, BeaconRecord, BtleplugAdapterFactory, CentralBuilder, CentralController,
    CentralError, CentralEvent, CentralObserver, CentralStatus, ChannelObserver, ConnectOptions,
    DelegateRegistry, DeviceLifecycle, DeviceReport, DiscoveryOptions, EventReporter,
    LogReporter, NoopLifecycle, PeripheralHandle, PeripheralId, decode_beacon,
};

// Config re-exports
pub use config::{CentralSettings, ConfigError, DEFAULT_RESTORE_IDENTIFIER};
pub use logging::LogLevel;
