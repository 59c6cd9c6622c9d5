//! 测试密钥缓冲区的二进制布局
//!
//! ```text
//! 偏移    长度  字段
//! 0       16    标记 GUID #1  {cd517db8-a1b1-44bf-aa64-bf66fefa3831}
//! 16      16    标记 GUID #2  {5f363032-eaaf-4103-b312-ab2c8e35cf58}
//! 32      4     SigAlgId      (LE u32)
//! 36      4     HashAlgId     (LE u32)
//! 40      4     cbPublicKey   (LE u32, 0x94)
//! 44      148   公钥数据
//! 192           结束
//! ```
//!
//! 盖章工具靠标记序列定位缓冲区，所以 32 字节的标记在最终镜像里只能出现一次。
//! 明文标记只在常量求值时存在：源码中保存的是按位取反后的字节，运行时经
//! `black_box` 还原，编译器无法把它折叠回 `.rodata` 中的第二份副本。

use crate::error::{Error, Result};
use std::mem::{offset_of, size_of};

/// 标记 GUID #1 的规范字符串形式
pub const MARKER_GUID_1: &str = "cd517db8-a1b1-44bf-aa64-bf66fefa3831";

/// 标记 GUID #2 的规范字符串形式
pub const MARKER_GUID_2: &str = "5f363032-eaaf-4103-b312-ab2c8e35cf58";

/// 标记序列长度（两个 GUID）
pub const MARKER_LEN: usize = 32;

pub const SIG_ALG_ID_OFFSET: usize = 32;
pub const HASH_ALG_ID_OFFSET: usize = 36;
pub const CB_PUBLIC_KEY_OFFSET: usize = 40;
pub const KEY_MATERIAL_OFFSET: usize = 44;

/// 1024 位 RSA 公钥数据的长度（0x94）
pub const KEY_MATERIAL_LEN: usize = 0x94;

/// 密钥记录头：SigAlgId + HashAlgId + cbPublicKey
pub const KEY_RECORD_HEADER_LEN: usize = 12;

/// 盖章时被覆盖的密钥记录长度，即 [32, 192)
pub const KEY_RECORD_LEN: usize = KEY_RECORD_HEADER_LEN + KEY_MATERIAL_LEN;

/// 整个缓冲区长度
pub const BUFFER_LEN: usize = MARKER_LEN + KEY_RECORD_LEN;

// 标记字节按运行时约定的写法排列：GUID 前三组以及第四组的前两个字节为小端
const MARKER_INVERTED: [u8; MARKER_LEN] = invert([
    0xb8, 0x7d, 0x51, 0xcd, 0xb1, 0xa1, 0xbf, 0x44, 0x64, 0xaa, 0xbf, 0x66, 0xfe, 0xfa, 0x38, 0x31,
    0x32, 0x30, 0x36, 0x5f, 0xaf, 0xea, 0x03, 0x41, 0x12, 0xb3, 0xab, 0x2c, 0x8e, 0x35, 0xcf, 0x58,
]);

const fn invert(mut bytes: [u8; MARKER_LEN]) -> [u8; MARKER_LEN] {
    let mut i = 0;
    while i < MARKER_LEN {
        bytes[i] = !bytes[i];
        i += 1;
    }
    bytes
}

/// 在运行时构造 32 字节的标记序列
///
/// 返回值只存在于栈上，不会在二进制中留下可被扫描到的副本。
pub fn marker_pattern() -> [u8; MARKER_LEN] {
    let mut marker = std::hint::black_box(MARKER_INVERTED);
    for b in marker.iter_mut() {
        *b = !*b;
    }
    marker
}

/// 编入镜像的测试密钥缓冲区
///
/// 字段全部是字节数组，对齐为 1，`repr(C)` 保证字段顺序且没有填充。
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TestKeyBuffer {
    marker: [u8; MARKER_LEN],
    sig_alg_id: [u8; 4],
    hash_alg_id: [u8; 4],
    cb_public_key: [u8; 4],
    key_material: [u8; KEY_MATERIAL_LEN],
}

const _: () = {
    assert!(size_of::<TestKeyBuffer>() == BUFFER_LEN);
    assert!(BUFFER_LEN == 192);
    assert!(offset_of!(TestKeyBuffer, marker) == 0);
    assert!(offset_of!(TestKeyBuffer, sig_alg_id) == SIG_ALG_ID_OFFSET);
    assert!(offset_of!(TestKeyBuffer, hash_alg_id) == HASH_ALG_ID_OFFSET);
    assert!(offset_of!(TestKeyBuffer, cb_public_key) == CB_PUBLIC_KEY_OFFSET);
    assert!(offset_of!(TestKeyBuffer, key_material) == KEY_MATERIAL_OFFSET);
};

/// 未盖章的缓冲区，只能用于初始化唯一的那个 static
pub(crate) const UNSTAMPED_BUFFER: TestKeyBuffer = TestKeyBuffer {
    marker: invert(MARKER_INVERTED),
    sig_alg_id: [0; 4],
    hash_alg_id: [0; 4],
    cb_public_key: (KEY_MATERIAL_LEN as u32).to_le_bytes(),
    key_material: [0; KEY_MATERIAL_LEN],
};

// cbPublicKey 必须等于预留的公钥区长度，盖章工具只覆盖公钥字节
const _: () = {
    assert!(u32::from_le_bytes(UNSTAMPED_BUFFER.cb_public_key) as usize == KEY_MATERIAL_LEN);
};

impl TestKeyBuffer {
    /// 运行时构造一个未盖章的缓冲区（不会产生常量副本）
    pub fn unstamped() -> Self {
        Self {
            marker: marker_pattern(),
            sig_alg_id: [0; 4],
            hash_alg_id: [0; 4],
            cb_public_key: (KEY_MATERIAL_LEN as u32).to_le_bytes(),
            key_material: [0; KEY_MATERIAL_LEN],
        }
    }

    /// 从镜像中截取的 192 字节构造缓冲区
    pub fn from_bytes(bytes: &[u8; BUFFER_LEN]) -> Self {
        let mut buffer = Self {
            marker: [0; MARKER_LEN],
            sig_alg_id: [0; 4],
            hash_alg_id: [0; 4],
            cb_public_key: [0; 4],
            key_material: [0; KEY_MATERIAL_LEN],
        };
        buffer.marker.copy_from_slice(&bytes[..SIG_ALG_ID_OFFSET]);
        buffer
            .sig_alg_id
            .copy_from_slice(&bytes[SIG_ALG_ID_OFFSET..HASH_ALG_ID_OFFSET]);
        buffer
            .hash_alg_id
            .copy_from_slice(&bytes[HASH_ALG_ID_OFFSET..CB_PUBLIC_KEY_OFFSET]);
        buffer
            .cb_public_key
            .copy_from_slice(&bytes[CB_PUBLIC_KEY_OFFSET..KEY_MATERIAL_OFFSET]);
        buffer
            .key_material
            .copy_from_slice(&bytes[KEY_MATERIAL_OFFSET..BUFFER_LEN]);
        buffer
    }

    /// 从任意切片构造缓冲区，长度必须正好是 192
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: &[u8; BUFFER_LEN] = bytes.try_into().map_err(|_| Error::SizeMismatch {
            expected: BUFFER_LEN,
            actual: bytes.len(),
        })?;
        Ok(Self::from_bytes(bytes))
    }

    /// 按布局表序列化
    pub fn to_bytes(&self) -> [u8; BUFFER_LEN] {
        let mut bytes = [0u8; BUFFER_LEN];
        bytes[..SIG_ALG_ID_OFFSET].copy_from_slice(&self.marker);
        bytes[SIG_ALG_ID_OFFSET..HASH_ALG_ID_OFFSET].copy_from_slice(&self.sig_alg_id);
        bytes[HASH_ALG_ID_OFFSET..CB_PUBLIC_KEY_OFFSET].copy_from_slice(&self.hash_alg_id);
        bytes[CB_PUBLIC_KEY_OFFSET..KEY_MATERIAL_OFFSET].copy_from_slice(&self.cb_public_key);
        bytes[KEY_MATERIAL_OFFSET..].copy_from_slice(&self.key_material);
        bytes
    }

    pub fn marker(&self) -> &[u8; MARKER_LEN] {
        &self.marker
    }

    pub fn sig_alg_id(&self) -> u32 {
        u32::from_le_bytes(self.sig_alg_id)
    }

    pub fn hash_alg_id(&self) -> u32 {
        u32::from_le_bytes(self.hash_alg_id)
    }

    pub fn cb_public_key(&self) -> u32 {
        u32::from_le_bytes(self.cb_public_key)
    }

    pub fn key_material(&self) -> &[u8; KEY_MATERIAL_LEN] {
        &self.key_material
    }

    /// 盖章工具覆盖的区域 [32, 192)
    pub fn key_record_bytes(&self) -> [u8; KEY_RECORD_LEN] {
        let mut bytes = [0u8; KEY_RECORD_LEN];
        bytes.copy_from_slice(&self.to_bytes()[SIG_ALG_ID_OFFSET..]);
        bytes
    }

    /// 算法标识全为 0 且公钥数据全为 0
    pub fn is_unstamped(&self) -> bool {
        self.sig_alg_id() == 0
            && self.hash_alg_id() == 0
            && self.key_material.iter().all(|&b| b == 0)
    }

    /// 检查标记完整且 cbPublicKey 与预留区域一致
    ///
    /// `offset` 只用于错误信息，表示缓冲区在镜像中的位置。
    pub fn validate(&self, offset: usize) -> Result<()> {
        if self.marker != marker_pattern() {
            return Err(Error::Parse(format!(
                "偏移 0x{:x} 处的标记序列已损坏",
                offset
            )));
        }

        if self.cb_public_key() as usize != KEY_MATERIAL_LEN {
            return Err(Error::MalformedBuffer {
                offset,
                cb_public_key: self.cb_public_key(),
            });
        }

        Ok(())
    }

    /// 用新的密钥记录覆盖 [32, 192)，标记保持不变
    pub(crate) fn overwrite_key_record(&mut self, record: &[u8; KEY_RECORD_LEN]) {
        let mut bytes = self.to_bytes();
        bytes[SIG_ALG_ID_OFFSET..].copy_from_slice(record);
        *self = Self::from_bytes(&bytes);
    }
}

impl std::fmt::Debug for TestKeyBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestKeyBuffer")
            .field("sig_alg_id", &format_args!("0x{:x}", self.sig_alg_id()))
            .field("hash_alg_id", &format_args!("0x{:x}", self.hash_alg_id()))
            .field("cb_public_key", &self.cb_public_key())
            .field("unstamped", &self.is_unstamped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 按运行时约定的规则把规范字符串转成字节
    fn guid_bytes(guid: &str) -> Vec<u8> {
        let groups: Vec<&str> = guid.split('-').collect();
        assert_eq!(groups.len(), 5);

        let mut bytes = Vec::new();
        bytes.extend(u32::from_str_radix(groups[0], 16).unwrap().to_le_bytes());
        bytes.extend(u16::from_str_radix(groups[1], 16).unwrap().to_le_bytes());
        bytes.extend(u16::from_str_radix(groups[2], 16).unwrap().to_le_bytes());
        bytes.extend(u16::from_str_radix(groups[3], 16).unwrap().to_le_bytes());
        for i in (0..groups[4].len()).step_by(2) {
            bytes.push(u8::from_str_radix(&groups[4][i..i + 2], 16).unwrap());
        }
        bytes
    }

    #[test]
    fn test_marker_matches_guid_strings() {
        let marker = marker_pattern();
        assert_eq!(&marker[..16], guid_bytes(MARKER_GUID_1).as_slice());
        assert_eq!(&marker[16..], guid_bytes(MARKER_GUID_2).as_slice());
    }

    #[test]
    fn test_unstamped_buffer() {
        let buffer = TestKeyBuffer::unstamped();
        assert!(buffer.is_unstamped());
        assert_eq!(buffer.cb_public_key(), 0x94);
        assert_eq!(buffer.cb_public_key() as usize, buffer.key_material().len());
        assert!(buffer.key_material().iter().all(|&b| b == 0));
        buffer.validate(0).unwrap();
    }

    #[test]
    fn test_offsets_in_serialized_form() {
        let bytes = TestKeyBuffer::unstamped().to_bytes();
        assert_eq!(bytes.len(), 192);
        assert_eq!(&bytes[..MARKER_LEN], &marker_pattern());
        assert_eq!(&bytes[32..36], &[0, 0, 0, 0]);
        assert_eq!(&bytes[36..40], &[0, 0, 0, 0]);
        assert_eq!(&bytes[40..44], &[0x94, 0, 0, 0]);
        assert!(bytes[44..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_overwrite_keeps_marker() {
        let mut buffer = TestKeyBuffer::unstamped();
        let mut record = [0xabu8; KEY_RECORD_LEN];
        record[8..12].copy_from_slice(&0x94u32.to_le_bytes());
        buffer.overwrite_key_record(&record);

        assert_eq!(buffer.marker(), &marker_pattern());
        assert_eq!(buffer.key_record_bytes(), record);
        assert_eq!(buffer.to_bytes().len(), BUFFER_LEN);
        assert!(!buffer.is_unstamped());
    }

    #[test]
    fn test_validate_rejects_wrong_length() {
        let mut bytes = TestKeyBuffer::unstamped().to_bytes();
        bytes[CB_PUBLIC_KEY_OFFSET..KEY_MATERIAL_OFFSET].copy_from_slice(&0x80u32.to_le_bytes());
        let buffer = TestKeyBuffer::from_bytes(&bytes);

        match buffer.validate(0x40) {
            Err(Error::MalformedBuffer {
                offset,
                cb_public_key,
            }) => {
                assert_eq!(offset, 0x40);
                assert_eq!(cb_public_key, 0x80);
            }
            other => panic!("期望 MalformedBuffer, 实际 {:?}", other),
        }
    }

    #[test]
    fn test_from_slice_size_check() {
        assert!(matches!(
            TestKeyBuffer::from_slice(&[0u8; 100]),
            Err(Error::SizeMismatch {
                expected: 192,
                actual: 100
            })
        ));
    }
}
