//! Central Controller - 中心设备状态机
//!
//! 控制器以单写者 actor 的形式运行：[`CentralController`] 只是一个可克隆的句柄，
//! 所有请求和所有适配器回调都进入同一个队列，由唯一的 [`CentralActor`] 任务按顺序处理。
//! 因此适配器、扫描状态和恢复集合都不需要额外的锁。
//!
//! # 请求语义
//!
//! - `enable` / `reset` / `status` / `shutdown`：调用方等待 actor 处理完成
//! - `scan` / `stop_scan` / `connect` / `disconnect` / `report_timeout`：
//!   放入队列后立即返回，结果通过观察者事件异步送达
//!
//! 前置条件不满足的请求（适配器未上电时扫描、对分离句柄连接）会被静默忽略，
//! 调用方应监听 `state_changed` 后重试。
//!
//! # 恢复
//!
//! 进程被系统恢复时，适配器会上报仍然连接着的外设。这些外设进入恢复集合并标记
//! `pending_disconnect`，等适配器上电后逐个断开，且每个外设只断开一次。
//! 本进程自己建立且尚未断开的连接不属于恢复，重建适配器时会被跳过。

use crate::ble::adapter::{
    Adapter, AdapterError, AdapterEvent, AdapterEventSender, AdapterFactory, AdapterState,
    ConnectOptions,
};
use crate::ble::lifecycle::{DeviceLifecycle, DeviceReport, EventReporter, NoopLifecycle};
use crate::ble::observer::{CentralEvent, CentralObserver};
use crate::ble::peripheral::{PeripheralHandle, PeripheralId};
use crate::ble::registry::DelegateRegistry;
use crate::config::CentralSettings;
use log::{debug, info, trace, warn};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// 控制器错误
#[derive(Debug, thiserror::Error)]
pub enum CentralError {
    #[error("Central controller has shut down")]
    Shutdown,

    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),
}

/// actor 队列中的消息：应用请求和适配器回调共用一个队列以保证全局顺序
#[derive(Debug)]
pub(crate) enum Message {
    Command(Command),
    Adapter { generation: u64, event: AdapterEvent },
}

#[derive(Debug)]
pub(crate) enum Command {
    Enable(oneshot::Sender<Result<(), CentralError>>),
    Reset(oneshot::Sender<Result<(), CentralError>>),
    Scan {
        services: Option<Vec<Uuid>>,
        stop_on_empty: bool,
    },
    StopScan,
    Connect {
        peripheral: PeripheralHandle,
        options: Option<ConnectOptions>,
    },
    Disconnect {
        peripheral: PeripheralHandle,
    },
    ReportTimeout,
    Status(oneshot::Sender<CentralStatus>),
    Shutdown(Option<oneshot::Sender<()>>),
}

/// 控制器状态快照
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CentralStatus {
    pub state: AdapterState,
    pub adapter_present: bool,
    pub scanning: bool,
    pub stop_on_empty: bool,
    /// 恢复集合，按 id 排序
    pub restored: Vec<PeripheralHandle>,
    /// 最近一次发现时的信号强度
    pub rssi: BTreeMap<PeripheralId, i16>,
    pub observers: usize,
}

/// 最后一个句柄被释放时通知 actor 退出
struct Inbox {
    tx: mpsc::UnboundedSender<Message>,
}

impl Drop for Inbox {
    fn drop(&mut self) {
        let _ = self.tx.send(Message::Command(Command::Shutdown(None)));
    }
}

/// 中心设备控制器句柄
///
/// 克隆开销很小，所有克隆共享同一个 actor 和观察者注册表。
#[derive(Clone)]
pub struct CentralController {
    inbox: Arc<Inbox>,
    registry: DelegateRegistry,
}

impl CentralController {
    /// 使用默认协作者启动控制器，必须在 tokio 运行时内调用
    pub fn new(factory: Arc<dyn AdapterFactory>, settings: CentralSettings) -> Self {
        Self::builder(factory).with_settings(settings).start()
    }

    pub fn builder(factory: Arc<dyn AdapterFactory>) -> CentralBuilder {
        CentralBuilder {
            factory,
            settings: CentralSettings::default(),
            registry: DelegateRegistry::new(),
            lifecycle: Arc::new(NoopLifecycle),
            reporter: Arc::new(NoopLifecycle),
        }
    }

    pub fn register(&self, key: impl Into<String>, observer: Arc<dyn CentralObserver>) {
        self.registry.register(key, observer);
    }

    pub fn unregister(&self, key: &str) -> bool {
        self.registry.unregister(key)
    }

    /// 创建适配器；已经上电时什么也不做
    pub async fn enable(&self) -> Result<(), CentralError> {
        self.request(Command::Enable).await?
    }

    /// 无条件重建适配器
    pub async fn reset(&self) -> Result<(), CentralError> {
        self.request(Command::Reset).await?
    }

    /// 开始扫描
    ///
    /// `stop_on_empty` 为 true 时，只要还有观察者注册，`stop_scan` 就会被忽略。
    pub fn scan(&self, services: Option<Vec<Uuid>>, stop_on_empty: bool) {
        self.post(Command::Scan {
            services,
            stop_on_empty,
        });
    }

    pub fn stop_scan(&self) {
        self.post(Command::StopScan);
    }

    pub fn connect(&self, peripheral: &PeripheralHandle, options: Option<ConnectOptions>) {
        self.post(Command::Connect {
            peripheral: peripheral.clone(),
            options,
        });
    }

    pub fn disconnect(&self, peripheral: &PeripheralHandle) {
        self.post(Command::Disconnect {
            peripheral: peripheral.clone(),
        });
    }

    /// 调用方的连接计时器超时，转发给所有观察者
    pub fn report_timeout(&self) {
        self.post(Command::ReportTimeout);
    }

    /// 获取状态快照，返回时之前发出的请求都已处理完毕
    pub async fn status(&self) -> Result<CentralStatus, CentralError> {
        self.request(Command::Status).await
    }

    /// 停止 actor 并释放适配器
    pub async fn shutdown(&self) -> Result<(), CentralError> {
        self.request(|tx| Command::Shutdown(Some(tx))).await
    }

    fn post(&self, command: Command) {
        if self.inbox.tx.send(Message::Command(command)).is_err() {
            warn!("Central controller has shut down, dropping request");
        }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, CentralError> {
        let (tx, rx) = oneshot::channel();
        self.inbox
            .tx
            .send(Message::Command(command(tx)))
            .map_err(|_| CentralError::Shutdown)?;
        rx.await.map_err(|_| CentralError::Shutdown)
    }
}

/// 控制器构建器
pub struct CentralBuilder {
    factory: Arc<dyn AdapterFactory>,
    settings: CentralSettings,
    registry: DelegateRegistry,
    lifecycle: Arc<dyn DeviceLifecycle>,
    reporter: Arc<dyn EventReporter>,
}

impl CentralBuilder {
    pub fn with_settings(mut self, settings: CentralSettings) -> Self {
        self.settings = settings;
        self
    }

    /// 使用已有的注册表（例如在启动前就注册好的观察者）
    pub fn with_registry(mut self, registry: DelegateRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_lifecycle(mut self, lifecycle: Arc<dyn DeviceLifecycle>) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn EventReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// 启动 actor 任务，必须在 tokio 运行时内调用
    pub fn start(self) -> CentralController {
        let (tx, rx) = mpsc::unbounded_channel();
        let actor = CentralActor {
            factory: self.factory,
            settings: self.settings,
            registry: self.registry.clone(),
            lifecycle: self.lifecycle,
            reporter: self.reporter,
            tx: tx.clone(),
            rx,
            adapter: None,
            generation: 0,
            state: AdapterState::Unknown,
            scanning: false,
            stop_on_empty: false,
            restored: HashSet::new(),
            session: HashSet::new(),
            rssi: BTreeMap::new(),
        };
        tokio::spawn(actor.run());

        CentralController {
            inbox: Arc::new(Inbox { tx }),
            registry: self.registry,
        }
    }
}

/// 持有适配器的唯一写者
struct CentralActor {
    factory: Arc<dyn AdapterFactory>,
    settings: CentralSettings,
    registry: DelegateRegistry,
    lifecycle: Arc<dyn DeviceLifecycle>,
    reporter: Arc<dyn EventReporter>,
    tx: mpsc::UnboundedSender<Message>,
    rx: mpsc::UnboundedReceiver<Message>,

    adapter: Option<Box<dyn Adapter>>,
    generation: u64,
    state: AdapterState,
    scanning: bool,
    stop_on_empty: bool,
    restored: HashSet<PeripheralHandle>,
    /// 本进程连接上、尚未断开的外设，跨适配器代号保留
    session: HashSet<PeripheralId>,
    rssi: BTreeMap<PeripheralId, i16>,
}

impl CentralActor {
    async fn run(mut self) {
        debug!("Central controller started");

        while let Some(message) = self.rx.recv().await {
            match message {
                Message::Command(command) => {
                    if !self.handle_command(command).await {
                        break;
                    }
                }
                Message::Adapter { generation, event } => {
                    self.handle_adapter_event(generation, event);
                }
            }
        }

        self.detach_adapter();
        info!("Central controller stopped");
    }

    fn detach_adapter(&mut self) {
        if let Some(mut adapter) = self.adapter.take() {
            debug!("Detaching adapter generation {}", self.generation);
            adapter.detach();
        }
    }

    /// 返回 false 表示退出
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Enable(reply) => {
                let result = self.enable().await;
                let _ = reply.send(result);
            }
            Command::Reset(reply) => {
                info!("Resetting adapter");
                let result = self.install_adapter().await;
                let _ = reply.send(result);
            }
            Command::Scan {
                services,
                stop_on_empty,
            } => self.scan(services, stop_on_empty),
            Command::StopScan => self.stop_scan(),
            Command::Connect {
                peripheral,
                options,
            } => self.connect(&peripheral, options.as_ref()),
            Command::Disconnect { peripheral } => self.disconnect(&peripheral),
            Command::ReportTimeout => {
                debug!("Connection timer fired");
                self.registry.dispatch(&CentralEvent::Timeout);
            }
            Command::Status(reply) => {
                let _ = reply.send(self.status());
            }
            Command::Shutdown(reply) => {
                self.detach_adapter();
                if let Some(reply) = reply {
                    let _ = reply.send(());
                }
                return false;
            }
        }
        true
    }

    async fn enable(&mut self) -> Result<(), CentralError> {
        if self.adapter.is_some() && self.state.is_powered_on() {
            debug!("Adapter already powered on, nothing to enable");
            return Ok(());
        }
        self.install_adapter().await
    }

    /// 分离旧适配器并创建新适配器
    async fn install_adapter(&mut self) -> Result<(), CentralError> {
        self.detach_adapter();

        self.generation += 1;
        self.state = AdapterState::Unknown;
        self.scanning = false;
        self.stop_on_empty = false;
        self.restored.clear();
        self.rssi.clear();

        let events = AdapterEventSender::new(self.generation, self.tx.clone());
        let adapter = self
            .factory
            .create(events, &self.settings.restore_identifier)
            .await?;

        info!(
            "Adapter generation {} created (restore id '{}', platform state: {})",
            self.generation,
            self.settings.restore_identifier,
            adapter.state()
        );
        self.adapter = Some(adapter);
        Ok(())
    }

    fn scan(&mut self, services: Option<Vec<Uuid>>, stop_on_empty: bool) {
        if !self.state.is_powered_on() {
            debug!("Ignoring scan request, adapter is {}", self.state);
            return;
        }
        if self.scanning {
            debug!("Already scanning");
            return;
        }
        let Some(adapter) = self.adapter.as_mut() else {
            return;
        };

        let options = self.settings.discovery_options();
        match adapter.start_discovery(services.as_deref(), options) {
            Ok(()) => {
                info!(
                    "Scan started (services={:?}, stop_on_empty={})",
                    services, stop_on_empty
                );
                self.scanning = true;
                self.stop_on_empty = stop_on_empty;
            }
            Err(e) => warn!("Failed to start discovery: {}", e),
        }
    }

    fn stop_scan(&mut self) {
        if self.stop_on_empty && !self.registry.is_empty() {
            debug!(
                "Keeping scan alive, {} observer(s) still registered",
                self.registry.len()
            );
            return;
        }

        self.stop_on_empty = false;
        if !self.scanning {
            return;
        }
        self.scanning = false;

        if let Some(adapter) = self.adapter.as_mut() {
            match adapter.stop_discovery() {
                Ok(()) => info!("Scan stopped"),
                Err(e) => warn!("Failed to stop discovery: {}", e),
            }
        }
    }

    fn connect(&mut self, peripheral: &PeripheralHandle, options: Option<&ConnectOptions>) {
        if !peripheral.is_attached() {
            debug!("Ignoring connect for detached peripheral {}", peripheral.id());
            return;
        }
        let Some(adapter) = self.adapter.as_mut() else {
            debug!("Ignoring connect for {}, no adapter", peripheral.id());
            return;
        };

        debug!("Connecting to {}", peripheral.id());
        if let Err(e) = adapter.connect(peripheral.id(), options) {
            warn!("Connect request for {} failed: {}", peripheral.id(), e);
        }
    }

    fn disconnect(&mut self, peripheral: &PeripheralHandle) {
        if !peripheral.is_attached() {
            debug!(
                "Ignoring disconnect for detached peripheral {}",
                peripheral.id()
            );
            return;
        }
        let Some(adapter) = self.adapter.as_mut() else {
            debug!("Ignoring disconnect for {}, no adapter", peripheral.id());
            return;
        };

        debug!("Disconnecting from {}", peripheral.id());
        if let Err(e) = adapter.cancel_connection(peripheral.id()) {
            warn!("Disconnect request for {} failed: {}", peripheral.id(), e);
        }
    }

    fn handle_adapter_event(&mut self, generation: u64, event: AdapterEvent) {
        if generation != self.generation || self.adapter.is_none() {
            trace!(
                "Dropping event from adapter generation {} (current {}): {:?}",
                generation, self.generation, event
            );
            return;
        }

        match event {
            AdapterEvent::StateChanged(state) => self.transition(state),
            AdapterEvent::Discovered {
                id,
                advertisement,
                rssi,
            } => {
                if let Some(rssi) = rssi {
                    self.rssi.insert(id.clone(), rssi);
                }
                let peripheral = PeripheralHandle::discovered(id, advertisement, rssi);
                trace!("Located {} rssi={:?}", peripheral.id(), rssi);
                self.registry.dispatch(&CentralEvent::Located { peripheral });
            }
            AdapterEvent::Connected { id } => {
                info!("Connected to {}", id);
                self.session.insert(id.clone());
                self.reporter.report(DeviceReport::Connected { id: id.clone() });
                self.registry.dispatch(&CentralEvent::Connected {
                    peripheral: PeripheralHandle::attached(id),
                });
            }
            AdapterEvent::FailedToConnect { id, error } => {
                warn!("Failed to connect to {}: {:?}", id, error);
                self.reporter.report(DeviceReport::ConnectFailed { id: id.clone() });
                self.registry.dispatch(&CentralEvent::CouldNotConnect {
                    peripheral: PeripheralHandle::attached(id),
                    error,
                });
            }
            AdapterEvent::Disconnected { id, error } => self.peripheral_disconnected(id, error),
            AdapterEvent::RestoreState { peripherals } => {
                info!(
                    "Restoring {} connected peripheral(s) from previous session",
                    peripherals.len()
                );
                for id in peripherals {
                    if self.session.contains(&id) {
                        debug!("{} was connected in this session, not restoring", id);
                        continue;
                    }
                    self.restored.replace(PeripheralHandle::restored(id));
                }
            }
        }
    }

    fn transition(&mut self, state: AdapterState) {
        let previous = std::mem::replace(&mut self.state, state);
        info!("Adapter state: {} -> {}", previous, state);

        if !state.is_powered_on() && self.scanning {
            debug!("Discovery halted by adapter state change");
            self.scanning = false;
        }

        self.registry.dispatch(&CentralEvent::StateChanged { state });

        if state.is_powered_on() {
            self.disconnect_restored();
        }
    }

    /// 断开恢复集合中仍待断开的外设，每个只断开一次
    fn disconnect_restored(&mut self) {
        let pending: Vec<PeripheralHandle> = self
            .restored
            .iter()
            .filter(|p| p.pending_disconnect())
            .cloned()
            .collect();
        let Some(adapter) = self.adapter.as_mut() else {
            return;
        };

        for peripheral in pending {
            info!("Disconnecting restored peripheral {}", peripheral.id());
            match adapter.cancel_connection(peripheral.id()) {
                Ok(()) => {
                    self.restored.replace(peripheral.disconnect_issued());
                }
                // 保留标记，下次上电再试
                Err(e) => warn!(
                    "Failed to disconnect restored peripheral {}: {}",
                    peripheral.id(),
                    e
                ),
            }
        }
    }

    fn peripheral_disconnected(&mut self, id: PeripheralId, error: Option<String>) {
        let unexpected = error.is_some();
        if unexpected {
            warn!("Disconnected from {}: {:?}", id, error);
        } else {
            info!("Disconnected from {}", id);
        }

        self.rssi.remove(&id);
        self.session.remove(&id);
        self.restored.retain(|p| p.id() != &id);

        let peripheral = PeripheralHandle::attached(id.clone());
        self.registry.dispatch(&CentralEvent::Disconnected {
            peripheral: peripheral.clone(),
            error,
        });
        self.reporter.report(DeviceReport::Disconnected {
            id: id.clone(),
            unexpected,
        });

        if self.lifecycle.is_marked_for_deletion(&id) {
            debug!("{} is marked for deletion, not monitoring", id);
            return;
        }
        if self.lifecycle.is_background() {
            debug!("Background mode, handing {} to the monitor", id);
            self.lifecycle.start_monitoring(&peripheral);
        }
    }

    fn status(&self) -> CentralStatus {
        let mut restored: Vec<PeripheralHandle> = self.restored.iter().cloned().collect();
        restored.sort_by(|a, b| a.id().cmp(b.id()));

        CentralStatus {
            state: self.state,
            adapter_present: self.adapter.is_some(),
            scanning: self.scanning,
            stop_on_empty: self.stop_on_empty,
            restored,
            rssi: self.rssi.clone(),
            observers: self.registry.len(),
        }
    }
}
