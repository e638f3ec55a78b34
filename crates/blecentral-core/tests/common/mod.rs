//! 测试用的适配器和协作者
//!
//! `MockFactory` 记录创建次数和适配器收到的请求，并允许测试注入适配器事件。

#![allow(dead_code)]

use blecentral_core::{
    Adapter, AdapterError, AdapterEvent, AdapterEventSender, AdapterFactory, AdapterState,
    CentralController, CentralEvent, ConnectOptions, DeviceLifecycle, DeviceReport,
    DiscoveryOptions, EventReporter, PeripheralHandle, PeripheralId,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::mpsc;
use uuid::Uuid;

/// 适配器收到的请求
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterCall {
    StartDiscovery(Option<Vec<Uuid>>),
    StopDiscovery,
    Connect(PeripheralId),
    CancelConnection(PeripheralId),
    Detach,
}

pub struct MockFactory {
    created: AtomicUsize,
    power_on: AtomicBool,
    fail: AtomicBool,
    restore: Mutex<Vec<PeripheralId>>,
    sender: Mutex<Option<AdapterEventSender>>,
    calls: Arc<Mutex<Vec<AdapterCall>>>,
}

impl MockFactory {
    /// 创建后立即上报 `PoweredOn`
    pub fn powered() -> Arc<Self> {
        Arc::new(Self {
            created: AtomicUsize::new(0),
            power_on: AtomicBool::new(true),
            fail: AtomicBool::new(false),
            restore: Mutex::new(Vec::new()),
            sender: Mutex::new(None),
            calls: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// 创建后不上报任何状态
    pub fn unpowered() -> Arc<Self> {
        let factory = Self::powered();
        factory.power_on.store(false, Ordering::SeqCst);
        factory
    }

    /// 下一次创建时上报这些仍连接着的外设
    pub fn restore_on_next_create(&self, ids: &[&str]) {
        *self.restore.lock() = ids.iter().map(|id| PeripheralId::from(*id)).collect();
    }

    pub fn fail_creation(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<AdapterCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, call: &AdapterCall) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }

    /// 最近一次创建时交给适配器的发送端
    pub fn sender(&self) -> AdapterEventSender {
        self.sender
            .lock()
            .clone()
            .expect("adapter has not been created")
    }

    /// 通过当前适配器注入事件
    pub fn emit(&self, event: AdapterEvent) {
        assert!(self.sender().send(event), "controller is gone");
    }
}

#[async_trait::async_trait]
impl AdapterFactory for MockFactory {
    async fn create(
        &self,
        events: AdapterEventSender,
        _restore_identifier: &str,
    ) -> Result<Box<dyn Adapter>, AdapterError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AdapterError::NoAdapter);
        }
        self.created.fetch_add(1, Ordering::SeqCst);

        let restored = std::mem::take(&mut *self.restore.lock());
        if !restored.is_empty() {
            events.send(AdapterEvent::RestoreState {
                peripherals: restored,
            });
        }
        let state = if self.power_on.load(Ordering::SeqCst) {
            events.send(AdapterEvent::StateChanged(AdapterState::PoweredOn));
            AdapterState::PoweredOn
        } else {
            AdapterState::Unknown
        };
        *self.sender.lock() = Some(events);

        Ok(Box::new(MockAdapter {
            state,
            calls: self.calls.clone(),
        }))
    }
}

struct MockAdapter {
    state: AdapterState,
    calls: Arc<Mutex<Vec<AdapterCall>>>,
}

impl Adapter for MockAdapter {
    fn state(&self) -> AdapterState {
        self.state
    }

    fn start_discovery(
        &mut self,
        services: Option<&[Uuid]>,
        _options: DiscoveryOptions,
    ) -> Result<(), AdapterError> {
        self.calls
            .lock()
            .push(AdapterCall::StartDiscovery(services.map(<[Uuid]>::to_vec)));
        Ok(())
    }

    fn stop_discovery(&mut self) -> Result<(), AdapterError> {
        self.calls.lock().push(AdapterCall::StopDiscovery);
        Ok(())
    }

    fn connect(
        &mut self,
        id: &PeripheralId,
        _options: Option<&ConnectOptions>,
    ) -> Result<(), AdapterError> {
        self.calls.lock().push(AdapterCall::Connect(id.clone()));
        Ok(())
    }

    fn cancel_connection(&mut self, id: &PeripheralId) -> Result<(), AdapterError> {
        self.calls
            .lock()
            .push(AdapterCall::CancelConnection(id.clone()));
        Ok(())
    }

    fn detach(&mut self) {
        self.calls.lock().push(AdapterCall::Detach);
    }
}

/// 可配置的生命周期，记录被监控的设备
#[derive(Default)]
pub struct TestLifecycle {
    pub background: bool,
    pub deleted: HashSet<PeripheralId>,
    pub monitored: Mutex<Vec<PeripheralId>>,
}

impl DeviceLifecycle for TestLifecycle {
    fn is_marked_for_deletion(&self, id: &PeripheralId) -> bool {
        self.deleted.contains(id)
    }

    fn is_background(&self) -> bool {
        self.background
    }

    fn start_monitoring(&self, peripheral: &PeripheralHandle) {
        self.monitored.lock().push(peripheral.id().clone());
    }
}

/// 记录所有设备上报
#[derive(Default)]
pub struct RecordingReporter {
    pub reports: Mutex<Vec<DeviceReport>>,
}

impl EventReporter for RecordingReporter {
    fn report(&self, report: DeviceReport) {
        self.reports.lock().push(report);
    }
}

/// 等待之前发出的请求和已入队的事件全部处理完毕
pub async fn settle(central: &CentralController) {
    central.status().await.expect("controller stopped");
}

/// 取出当前已送达的全部事件
pub fn drain(rx: &mut mpsc::UnboundedReceiver<CentralEvent>) -> Vec<CentralEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
