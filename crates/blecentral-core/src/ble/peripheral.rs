//! Peripheral 句柄
//!
//! 每个适配器事件都会生成一个新的 [`PeripheralHandle`]，句柄本身不可变。
//! 相等性和哈希只看 `id`，其余字段仅供参考。

use crate::ble::beacon::{BeaconRecord, decode_beacon};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// 适配器分配的设备标识（同一适配器会话内稳定）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeripheralId(String);

impl PeripheralId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeripheralId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// 发现时捕获的广播数据
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Advertisement {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_name: Option<String>,
    /// 原始厂商数据，包含开头 2 字节的公司 ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer_data: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub service_uuids: Vec<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_power_level: Option<i16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connectable: Option<bool>,
}

impl Advertisement {
    /// 用公司 ID 和数据拼出完整的厂商数据
    pub fn with_manufacturer(mut self, company_id: u16, data: &[u8]) -> Self {
        let mut raw = Vec::with_capacity(2 + data.len());
        raw.extend_from_slice(&company_id.to_le_bytes());
        raw.extend_from_slice(data);
        self.manufacturer_data = Some(raw);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeripheralHandle {
    id: PeripheralId,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    advertisement: Option<Advertisement>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    rssi: Option<i16>,
    #[serde(default)]
    pending_disconnect: bool,
    #[serde(skip)]
    attached: bool,
}

impl PeripheralHandle {
    /// 发现事件产生的句柄
    pub fn discovered(id: PeripheralId, advertisement: Advertisement, rssi: Option<i16>) -> Self {
        Self {
            id,
            advertisement: Some(advertisement),
            rssi,
            pending_disconnect: false,
            attached: true,
        }
    }

    /// 连接/断开等回调产生的句柄，不带广播和信号强度
    pub fn attached(id: PeripheralId) -> Self {
        Self {
            id,
            advertisement: None,
            rssi: None,
            pending_disconnect: false,
            attached: true,
        }
    }

    /// 恢复状态时重建的句柄，需要在适配器上电后断开
    pub fn restored(id: PeripheralId) -> Self {
        Self {
            pending_disconnect: true,
            ..Self::attached(id)
        }
    }

    /// 应用自行构造的句柄，没有对应的适配器外设
    ///
    /// 对这种句柄调用 connect/disconnect 会被忽略。
    pub fn detached(id: PeripheralId) -> Self {
        Self {
            attached: false,
            ..Self::attached(id)
        }
    }

    /// 返回清除了 `pending_disconnect` 的新句柄
    #[must_use]
    pub fn disconnect_issued(&self) -> Self {
        Self {
            pending_disconnect: false,
            ..self.clone()
        }
    }

    pub fn id(&self) -> &PeripheralId {
        &self.id
    }

    pub fn advertisement(&self) -> Option<&Advertisement> {
        self.advertisement.as_ref()
    }

    pub fn rssi(&self) -> Option<i16> {
        self.rssi
    }

    pub fn pending_disconnect(&self) -> bool {
        self.pending_disconnect
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn local_name(&self) -> Option<&str> {
        self.advertisement.as_ref()?.local_name.as_deref()
    }

    /// 从厂商数据解码 Beacon 记录
    pub fn beacon(&self) -> Option<BeaconRecord> {
        let data = self.advertisement.as_ref()?.manufacturer_data.as_deref()?;
        decode_beacon(data)
    }
}

impl PartialEq for PeripheralHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PeripheralHandle {}

impl Hash for PeripheralHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
