//! btleplug 适配器实现
//!
//! 把 btleplug 的异步 API 包装成"发出即返回"的 [`Adapter`]：
//! 每个请求在独立的 tokio 任务中执行，结果通过事件送回控制器。
//!
//! # 与平台回调的对应关系
//!
//! - `DeviceDiscovered` / `DeviceUpdated` → `Discovered`（`DeviceUpdated` 仅在允许重复时上报）
//! - `DeviceDisconnected` → `Disconnected`（btleplug 不提供断开原因）
//! - 连接任务的结果 → `Connected` / `FailedToConnect`
//!
//! btleplug 没有系统级的状态恢复，这里从不上报 `RestoreState`：
//! 系统里已经连接的外设（键盘、耳机等）不属于本进程，不能被断开。
//!
//! btleplug 拿到适配器即可使用，所以创建后立即上报 `PoweredOn`。

use crate::ble::adapter::{
    Adapter, AdapterError, AdapterEvent, AdapterEventSender, AdapterFactory, AdapterState,
    ConnectOptions, DiscoveryOptions,
};
use crate::ble::beacon::APPLE_COMPANY_ID;
use crate::ble::peripheral::{Advertisement, PeripheralId};
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter as PlatformAdapter, Manager, PeripheralId as PlatformId};
use futures_util::StreamExt;
use log::{debug, info, trace, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use uuid::Uuid;

type KnownPeripherals = Arc<Mutex<HashMap<PeripheralId, PlatformId>>>;

/// 使用系统第一个蓝牙适配器
#[derive(Debug, Default, Clone, Copy)]
pub struct BtleplugAdapterFactory;

#[async_trait::async_trait]
impl AdapterFactory for BtleplugAdapterFactory {
    async fn create(
        &self,
        events: AdapterEventSender,
        restore_identifier: &str,
    ) -> Result<Box<dyn Adapter>, AdapterError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(AdapterError::NoAdapter)?;

        let info = adapter.adapter_info().await?;
        info!("Using Bluetooth adapter: {}", info);
        debug!(
            "Restore identifier '{}' ignored, btleplug has no state restoration",
            restore_identifier
        );

        let known: KnownPeripherals = Arc::new(Mutex::new(HashMap::new()));
        let allow_duplicates = Arc::new(AtomicBool::new(true));

        let stream = adapter.events().await?;
        let pump = tokio::spawn(pump_events(
            adapter.clone(),
            stream,
            events.clone(),
            known.clone(),
            allow_duplicates.clone(),
        ));

        events.send(AdapterEvent::StateChanged(AdapterState::PoweredOn));

        Ok(Box::new(BtleplugAdapter {
            adapter,
            events,
            known,
            allow_duplicates,
            detached: false,
            pump,
        }))
    }
}

struct BtleplugAdapter {
    adapter: PlatformAdapter,
    events: AdapterEventSender,
    known: KnownPeripherals,
    allow_duplicates: Arc<AtomicBool>,
    detached: bool,
    pump: JoinHandle<()>,
}

impl BtleplugAdapter {
    fn lookup(&self, id: &PeripheralId) -> Result<PlatformId, AdapterError> {
        self.known
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| AdapterError::UnknownPeripheral(id.clone()))
    }

    fn ensure_attached(&self) -> Result<(), AdapterError> {
        if self.detached {
            return Err(AdapterError::Unavailable("adapter detached".to_string()));
        }
        Ok(())
    }
}

impl Adapter for BtleplugAdapter {
    fn state(&self) -> AdapterState {
        if self.detached {
            AdapterState::Unknown
        } else {
            AdapterState::PoweredOn
        }
    }

    fn start_discovery(
        &mut self,
        services: Option<&[Uuid]>,
        options: DiscoveryOptions,
    ) -> Result<(), AdapterError> {
        self.ensure_attached()?;
        self.allow_duplicates
            .store(options.allow_duplicates, Ordering::Relaxed);

        let filter = ScanFilter {
            services: services.map(<[Uuid]>::to_vec).unwrap_or_default(),
        };
        let adapter = self.adapter.clone();
        tokio::spawn(async move {
            if let Err(e) = adapter.start_scan(filter).await {
                warn!("btleplug start_scan failed: {}", e);
            }
        });
        Ok(())
    }

    fn stop_discovery(&mut self) -> Result<(), AdapterError> {
        self.ensure_attached()?;
        let adapter = self.adapter.clone();
        tokio::spawn(async move {
            if let Err(e) = adapter.stop_scan().await {
                warn!("btleplug stop_scan failed: {}", e);
            }
        });
        Ok(())
    }

    fn connect(
        &mut self,
        id: &PeripheralId,
        _options: Option<&ConnectOptions>,
    ) -> Result<(), AdapterError> {
        self.ensure_attached()?;
        let platform_id = self.lookup(id)?;
        let adapter = self.adapter.clone();
        let events = self.events.clone();
        let id = id.clone();

        tokio::spawn(async move {
            let result = match adapter.peripheral(&platform_id).await {
                Ok(peripheral) => peripheral.connect().await,
                Err(e) => Err(e),
            };
            let event = match result {
                Ok(()) => AdapterEvent::Connected { id },
                Err(e) => AdapterEvent::FailedToConnect {
                    id,
                    error: Some(e.to_string()),
                },
            };
            events.send(event);
        });
        Ok(())
    }

    fn cancel_connection(&mut self, id: &PeripheralId) -> Result<(), AdapterError> {
        self.ensure_attached()?;
        let platform_id = self.lookup(id)?;
        let adapter = self.adapter.clone();
        let id = id.clone();

        tokio::spawn(async move {
            let result = match adapter.peripheral(&platform_id).await {
                Ok(peripheral) => peripheral.disconnect().await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                warn!("Failed to disconnect {}: {}", id, e);
            }
        });
        Ok(())
    }

    fn detach(&mut self) {
        if !self.detached {
            debug!(
                "Detaching btleplug adapter (generation {})",
                self.events.generation()
            );
            self.detached = true;
            self.pump.abort();
        }
    }
}

impl Drop for BtleplugAdapter {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// 把 btleplug 的事件流转换为适配器事件
async fn pump_events(
    adapter: PlatformAdapter,
    mut stream: std::pin::Pin<Box<dyn futures_util::Stream<Item = CentralEvent> + Send>>,
    events: AdapterEventSender,
    known: KnownPeripherals,
    allow_duplicates: Arc<AtomicBool>,
) {
    while let Some(event) = stream.next().await {
        let forwarded = match event {
            CentralEvent::DeviceDiscovered(platform_id) => {
                discovered(&adapter, &known, platform_id).await
            }
            CentralEvent::DeviceUpdated(platform_id)
                if allow_duplicates.load(Ordering::Relaxed) =>
            {
                discovered(&adapter, &known, platform_id).await
            }
            CentralEvent::DeviceDisconnected(platform_id) => Some(AdapterEvent::Disconnected {
                id: remember(&known, platform_id),
                error: None,
            }),
            other => {
                trace!("Ignoring btleplug event: {:?}", other);
                None
            }
        };

        if let Some(event) = forwarded {
            if !events.send(event) {
                break;
            }
        }
    }
    debug!("btleplug event stream ended");
}

async fn discovered(
    adapter: &PlatformAdapter,
    known: &KnownPeripherals,
    platform_id: PlatformId,
) -> Option<AdapterEvent> {
    let peripheral = adapter.peripheral(&platform_id).await.ok()?;
    let properties = peripheral.properties().await.ok()??;

    let mut advertisement = Advertisement {
        local_name: properties.local_name.clone(),
        service_uuids: properties.services.clone(),
        tx_power_level: properties.tx_power_level,
        ..Default::default()
    };
    if let Some((company_id, data)) = pick_manufacturer_data(&properties.manufacturer_data) {
        advertisement = advertisement.with_manufacturer(company_id, data);
    }

    Some(AdapterEvent::Discovered {
        id: remember(known, platform_id),
        advertisement,
        rssi: properties.rssi,
    })
}

/// 选出要保留的厂商数据：优先 Apple，否则取公司 ID 最小的一条
fn pick_manufacturer_data(data: &HashMap<u16, Vec<u8>>) -> Option<(u16, &[u8])> {
    let apple = u16::from_le_bytes(APPLE_COMPANY_ID);
    data.get(&apple)
        .map(|bytes| (apple, bytes.as_slice()))
        .or_else(|| {
            data.iter()
                .min_by_key(|(company_id, _)| **company_id)
                .map(|(company_id, bytes)| (*company_id, bytes.as_slice()))
        })
}

/// 记录平台 ID，返回控制器使用的字符串 ID
fn remember(known: &KnownPeripherals, platform_id: PlatformId) -> PeripheralId {
    let id = PeripheralId::new(format!("{:?}", platform_id));
    known.lock().insert(id.clone(), platform_id);
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefers_apple_manufacturer_data() {
        let mut data = HashMap::new();
        data.insert(0x0006, vec![1, 2]);
        data.insert(0x004c, vec![0x02, 0x15]);

        let (company_id, bytes) = pick_manufacturer_data(&data).unwrap();
        assert_eq!(company_id, 0x004c);
        assert_eq!(bytes, &[0x02, 0x15]);
    }

    #[test]
    fn test_falls_back_to_lowest_company_id() {
        let mut data = HashMap::new();
        data.insert(0x0075, vec![9]);
        data.insert(0x0006, vec![1, 2]);

        let (company_id, bytes) = pick_manufacturer_data(&data).unwrap();
        assert_eq!(company_id, 0x0006);
        assert_eq!(bytes, &[1, 2]);

        assert!(pick_manufacturer_data(&HashMap::new()).is_none());
    }
}
