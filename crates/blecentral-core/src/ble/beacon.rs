//! 广播解码 - 从厂商数据中提取 iBeacon 记录
//!
//! # 数据格式
//!
//! 厂商数据 (Manufacturer Specific Data) 固定 25 字节：
//!
//! | 偏移 | 长度 | 内容 |
//! |------|------|------|
//! | 0    | 2    | 公司 ID (小端，Apple = `0x4C 0x00`) |
//! | 2    | 1    | 类型 `0x02` |
//! | 3    | 1    | 长度 `0x15` (后续 21 字节) |
//! | 4    | 16   | Proximity UUID |
//! | 20   | 2    | Major (大端) |
//! | 22   | 2    | Minor (大端) |
//! | 24   | 1    | Measured Power (有符号 dBm) |
//!
//! 这是一个过滤器而不是解析器：任何不匹配的输入都返回 `None`，不会报错。

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Apple 公司 ID，空中传输为小端
pub const APPLE_COMPANY_ID: [u8; 2] = [0x4c, 0x00];
/// iBeacon 类型标记
pub const BEACON_TYPE: u8 = 0x02;
/// iBeacon 长度标记
pub const BEACON_LENGTH: u8 = 0x15;
/// 厂商数据总长度
pub const BEACON_PAYLOAD_LEN: usize = 25;

/// 解码出的 Beacon 记录
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeaconRecord {
    pub uuid: Uuid,
    pub major: u16,
    pub minor: u16,
    /// 1 米处的参考信号强度
    pub measured_power: i8,
}

impl BeaconRecord {
    pub fn new(uuid: Uuid, major: u16, minor: u16) -> Self {
        Self {
            uuid,
            major,
            minor,
            measured_power: -59,
        }
    }

    /// 编码为 25 字节厂商数据
    pub fn encode(&self) -> [u8; BEACON_PAYLOAD_LEN] {
        let mut buf = [0u8; BEACON_PAYLOAD_LEN];
        buf[0..2].copy_from_slice(&APPLE_COMPANY_ID);
        buf[2] = BEACON_TYPE;
        buf[3] = BEACON_LENGTH;
        buf[4..20].copy_from_slice(self.uuid.as_bytes());
        buf[20..22].copy_from_slice(&self.major.to_be_bytes());
        buf[22..24].copy_from_slice(&self.minor.to_be_bytes());
        buf[24] = self.measured_power.to_be_bytes()[0];
        buf
    }
}

impl fmt::Display for BeaconRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.uuid, self.major, self.minor)
    }
}

/// 尝试从厂商数据中解码 Beacon 记录
pub fn decode_beacon(data: &[u8]) -> Option<BeaconRecord> {
    let data: &[u8; BEACON_PAYLOAD_LEN] = data.try_into().ok()?;

    if data[0..2] != APPLE_COMPANY_ID || data[2] != BEACON_TYPE || data[3] != BEACON_LENGTH {
        return None;
    }

    let uuid = Uuid::from_slice(&data[4..20]).ok()?;
    let major = u16::from_be_bytes([data[20], data[21]]);
    let minor = u16::from_be_bytes([data[22], data[23]]);
    let measured_power = i8::from_be_bytes([data[24]]);

    Some(BeaconRecord {
        uuid,
        major,
        minor,
        measured_power,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 手工构造的 fixture: UUID e2c56db5-dffb-48d2-b060-d0f5a71096e0, major 1, minor 2
    const FIXTURE: [u8; 25] = [
        0x4c, 0x00, 0x02, 0x15, // header
        0xe2, 0xc5, 0x6d, 0xb5, 0xdf, 0xfb, 0x48, 0xd2, // uuid
        0xb0, 0x60, 0xd0, 0xf5, 0xa7, 0x10, 0x96, 0xe0, //
        0x00, 0x01, // major
        0x00, 0x02, // minor
        0xc5, // measured power (-59)
    ];

    #[test]
    fn test_decode_fixture() {
        let record = decode_beacon(&FIXTURE).expect("fixture should decode");
        assert_eq!(
            record.uuid,
            Uuid::parse_str("e2c56db5-dffb-48d2-b060-d0f5a71096e0").unwrap()
        );
        assert_eq!(record.major, 1);
        assert_eq!(record.minor, 2);
        assert_eq!(record.measured_power, -59);
    }

    #[test]
    fn test_major_minor_big_endian() {
        let mut data = FIXTURE;
        data[20..22].copy_from_slice(&[0x12, 0x34]);
        data[22..24].copy_from_slice(&[0xab, 0xcd]);
        let record = decode_beacon(&data).unwrap();
        assert_eq!(record.major, 0x1234);
        assert_eq!(record.minor, 0xabcd);
    }

    #[test]
    fn test_wrong_length_is_none() {
        assert_eq!(decode_beacon(&[]), None);
        assert_eq!(decode_beacon(&FIXTURE[..24]), None);

        let mut longer = FIXTURE.to_vec();
        longer.push(0);
        assert_eq!(decode_beacon(&longer), None);

        for len in 0..64 {
            if len == BEACON_PAYLOAD_LEN {
                continue;
            }
            let data = vec![0x4c; len];
            assert_eq!(decode_beacon(&data), None, "len={}", len);
        }
    }

    #[test]
    fn test_header_mismatch_is_none() {
        // 公司 ID 字节序错误
        let mut data = FIXTURE;
        data[0..2].copy_from_slice(&[0x00, 0x4c]);
        assert_eq!(decode_beacon(&data), None);

        let mut data = FIXTURE;
        data[2] = 0x03;
        assert_eq!(decode_beacon(&data), None);

        let mut data = FIXTURE;
        data[3] = 0x14;
        assert_eq!(decode_beacon(&data), None);
    }

    #[test]
    fn test_encode_matches_fixture() {
        let record = decode_beacon(&FIXTURE).unwrap();
        assert_eq!(record.encode(), FIXTURE);
        assert_eq!(
            record.to_string(),
            "e2c56db5-dffb-48d2-b060-d0f5a71096e0 1/2"
        );
    }
}
