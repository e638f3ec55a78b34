//! BLE 中心设备
//!
//! - [`beacon`]: iBeacon 广播解码
//! - [`peripheral`]: 外设句柄和广播数据
//! - [`registry`] / [`observer`]: 观察者注册和事件分发
//! - [`central`]: 控制器 actor
//! - [`adapter`] / [`platform`]: 适配器接口和 btleplug 实现

pub mod adapter;
pub mod beacon;
pub mod central;
pub mod lifecycle;
pub mod observer;
pub mod peripheral;
pub mod platform;
pub mod registry;

pub use adapter::{
    Adapter, AdapterError, AdapterEvent, AdapterEventSender, AdapterFactory, AdapterState,
    ConnectOptions, DiscoveryOptions,
};
pub use beacon::{BEACON_PAYLOAD_LEN, BeaconRecord, decode_beacon};
pub use central::{CentralBuilder, CentralController, CentralError, CentralStatus};
pub use lifecycle::{DeviceLifecycle, DeviceReport, EventReporter, LogReporter, NoopLifecycle};
pub use observer::{CentralEvent, CentralObserver, ChannelObserver};
pub use peripheral::{Advertisement, PeripheralHandle, PeripheralId};
pub use platform::BtleplugAdapterFactory;
pub use registry::DelegateRegistry;
