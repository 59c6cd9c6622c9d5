//! 强名称公钥记录（PublicKeyBlob）
//!
//! 记录格式为 `SigAlgId | HashAlgId | cbPublicKey | 公钥数据`，三个头字段都是小端 u32。
//! 对 1024 位 RSA 密钥，公钥数据本身又是一个 `PUBLICKEYSTRUC + RSAPUBKEY + 模数` 结构。

use crate::error::{Error, Result};
use crate::layout::{KEY_MATERIAL_LEN, KEY_RECORD_HEADER_LEN, KEY_RECORD_LEN};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// CALG_RSA_SIGN
pub const CALG_RSA_SIGN: u32 = 0x2400;

/// CALG_SHA1
pub const CALG_SHA1: u32 = 0x8004;

/// 已填充的测试公钥记录示例，只作为最终形态的参考，不会写入缓冲区
#[rustfmt::skip]
pub const REFERENCE_KEY_RECORD: [u8; KEY_RECORD_LEN] = [
    // SigAlgId
    0x00, 0x24, 0x00, 0x00,
    // HashAlgId
    0x04, 0x80, 0x00, 0x00,
    // cbPublicKey = 0x94
    0x94, 0x00, 0x00, 0x00,
    // 1024 位公钥
    0x06, 0x02, 0x00, 0x00, 0x00, 0x24, 0x00, 0x00, 0x52, 0x53, 0x41, 0x31, 0x00, 0x04, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00,
    0x0f, 0xc5, 0x99, 0x3e, 0x0f, 0x51, 0x1a, 0xd5, 0xe1, 0x6e, 0x8b, 0x22, 0x65, 0x53, 0x49, 0x3e, 0x09, 0x06, 0x7a, 0xfc,
    0x41, 0x03, 0x9f, 0x70, 0xda, 0xeb, 0x94, 0xa9, 0x68, 0xd6, 0x64, 0xf4, 0x0e, 0x69, 0xa4, 0x6b, 0x61, 0x7d, 0x15, 0xd3,
    0xd5, 0x32, 0x8b, 0xe7, 0xdb, 0xed, 0xd0, 0x59, 0xeb, 0x98, 0x49, 0x5a, 0x3b, 0x03, 0xcb, 0x4e, 0xa4, 0xba, 0x12, 0x74,
    0x44, 0x67, 0x1c, 0x3c, 0x84, 0xcb, 0xc1, 0xfd, 0xc3, 0x93, 0xd7, 0xe1, 0x0b, 0x5e, 0xe3, 0xf3, 0x1f, 0x5a, 0x29, 0xf0,
    0x05, 0xe5, 0xee, 0xd7, 0xe3, 0xc9, 0xc8, 0xaf, 0x74, 0xf4, 0x13, 0xf0, 0x00, 0x4f, 0x0c, 0x2c, 0xab, 0xb2, 0x2f, 0x9d,
    0xd4, 0xf7, 0x5a, 0x6f, 0x59, 0x97, 0x84, 0xe1, 0xba, 0xb7, 0x09, 0x85, 0xef, 0x81, 0x74, 0xca, 0x6c, 0x68, 0x42, 0x78,
    0xbe, 0x82, 0xce, 0x05, 0x5a, 0x03, 0xeb, 0xaf,
];

/// 强名称公钥记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    /// 签名算法标识，0 表示未设置
    pub sig_alg_id: u32,

    /// 哈希算法标识，0 表示未设置
    pub hash_alg_id: u32,

    /// 公钥数据，长度即 cbPublicKey
    pub public_key: Vec<u8>,
}

impl KeyRecord {
    /// 未设置的记录：算法为 0，cbPublicKey 预设为 0x94，公钥全 0
    pub fn empty() -> Self {
        Self {
            sig_alg_id: 0,
            hash_alg_id: 0,
            public_key: vec![0u8; KEY_MATERIAL_LEN],
        }
    }

    /// 解析记录，cbPublicKey 必须与剩余字节数完全一致
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < KEY_RECORD_HEADER_LEN {
            return Err(Error::Parse(format!(
                "公钥记录太短: {} < {}",
                data.len(),
                KEY_RECORD_HEADER_LEN
            )));
        }

        let sig_alg_id = read_u32_le(data, 0);
        let hash_alg_id = read_u32_le(data, 4);
        let cb_public_key = read_u32_le(data, 8) as usize;

        let material = &data[KEY_RECORD_HEADER_LEN..];
        if cb_public_key != material.len() {
            return Err(Error::SizeMismatch {
                expected: cb_public_key,
                actual: material.len(),
            });
        }

        Ok(Self {
            sig_alg_id,
            hash_alg_id,
            public_key: material.to_vec(),
        })
    }

    /// 序列化为 PublicKeyBlob
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(KEY_RECORD_HEADER_LEN + self.public_key.len());
        bytes.extend_from_slice(&self.sig_alg_id.to_le_bytes());
        bytes.extend_from_slice(&self.hash_alg_id.to_le_bytes());
        bytes.extend_from_slice(&self.cb_public_key().to_le_bytes());
        bytes.extend_from_slice(&self.public_key);
        bytes
    }

    pub fn cb_public_key(&self) -> u32 {
        self.public_key.len() as u32
    }

    /// 算法标识全为 0 且公钥全为 0
    pub fn is_unset(&self) -> bool {
        self.sig_alg_id == 0 && self.hash_alg_id == 0 && self.public_key.iter().all(|&b| b == 0)
    }

    /// 能否原地放进测试密钥槽位（cbPublicKey == 0x94）
    pub fn fits_test_key_slot(&self) -> bool {
        self.public_key.len() == KEY_MATERIAL_LEN
    }

    /// 能否作为信任依据：两个算法标识都已设置，公钥非全 0，且大小与槽位一致
    pub fn is_usable_test_key(&self) -> bool {
        self.sig_alg_id != 0
            && self.hash_alg_id != 0
            && self.fits_test_key_slot()
            && self.public_key.iter().any(|&b| b != 0)
    }

    /// 以 RSA1 公钥结构解析公钥数据
    pub fn rsa_public_key(&self) -> Result<RsaPublicKeyBlob> {
        RsaPublicKeyBlob::parse(&self.public_key)
    }

    /// 整条记录的 SHA-256（十六进制）
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.to_bytes());
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

/// `PUBLICKEYSTRUC` + `RSAPUBKEY` + 模数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsaPublicKeyBlob {
    pub blob_type: u8,
    pub version: u8,
    pub key_alg: u32,
    pub bit_len: u32,
    pub public_exponent: u32,
    /// 小端模数，长度为 bit_len / 8
    pub modulus: Vec<u8>,
}

impl RsaPublicKeyBlob {
    /// PUBLICKEYBLOB
    pub const BLOB_TYPE: u8 = 0x06;

    /// CUR_BLOB_VERSION
    pub const BLOB_VERSION: u8 = 0x02;

    pub const MAGIC: &'static [u8; 4] = b"RSA1";

    /// PUBLICKEYSTRUC(8) + RSAPUBKEY(12)
    pub const HEADER_LEN: usize = 20;

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::HEADER_LEN {
            return Err(Error::InvalidKey(format!(
                "RSA 公钥结构太短: {} < {}",
                data.len(),
                Self::HEADER_LEN
            )));
        }

        let blob_type = data[0];
        if blob_type != Self::BLOB_TYPE {
            return Err(Error::InvalidKey(format!(
                "不是 PUBLICKEYBLOB: bType = 0x{:02x}",
                blob_type
            )));
        }

        if &data[8..12] != Self::MAGIC {
            return Err(Error::InvalidKey(format!(
                "RSA 公钥魔数错误: {:02x?}",
                &data[8..12]
            )));
        }

        let bit_len = read_u32_le(data, 12);
        if bit_len == 0 || bit_len % 8 != 0 {
            return Err(Error::InvalidKey(format!("无效的密钥位数: {}", bit_len)));
        }

        let modulus = &data[Self::HEADER_LEN..];
        if modulus.len() != (bit_len / 8) as usize {
            return Err(Error::SizeMismatch {
                expected: (bit_len / 8) as usize,
                actual: modulus.len(),
            });
        }

        Ok(Self {
            blob_type,
            version: data[1],
            key_alg: read_u32_le(data, 4),
            bit_len,
            public_exponent: read_u32_le(data, 16),
            modulus: modulus.to_vec(),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::HEADER_LEN + self.modulus.len());
        bytes.push(self.blob_type);
        bytes.push(self.version);
        bytes.extend_from_slice(&[0, 0]);
        bytes.extend_from_slice(&self.key_alg.to_le_bytes());
        bytes.extend_from_slice(Self::MAGIC);
        bytes.extend_from_slice(&self.bit_len.to_le_bytes());
        bytes.extend_from_slice(&self.public_exponent.to_le_bytes());
        bytes.extend_from_slice(&self.modulus);
        bytes
    }
}

fn read_u32_le(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}
