//! 盖章约定：在镜像中原地替换测试公钥
//!
//! 盖章只改写缓冲区的 [32, 192)，镜像长度、标记字节以及其他任何字节都保持不变。
//! 这里只提供盖章工具和测试都会用到的库函数，不包含命令行前端。

use crate::error::{Error, Result};
use crate::layout::{TestKeyBuffer, BUFFER_LEN, KEY_MATERIAL_LEN, KEY_RECORD_LEN};
use crate::locate::{locate_buffer, section_containing};
use crate::record::KeyRecord;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

/// 盖章选项
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StampOptions {
    /// 允许覆盖已经盖过章的缓冲区
    pub allow_restamp: bool,

    /// 要求公钥数据是合法的 RSA1 公钥结构
    pub require_rsa_blob: bool,
}

impl Default for StampOptions {
    fn default() -> Self {
        Self {
            allow_restamp: false,
            require_rsa_blob: true,
        }
    }
}

impl StampOptions {
    /// 从JSON字节反序列化，缺省字段取默认值
    pub fn from_json(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(Error::from)
    }
}

/// 镜像中缓冲区的状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BufferState {
    /// 仍是编译时的全 0 缓冲区
    Unstamped { offset: usize },

    /// 已写入测试公钥
    Stamped { offset: usize, record: KeyRecord },
}

impl BufferState {
    pub fn offset(&self) -> usize {
        match self {
            BufferState::Unstamped { offset } | BufferState::Stamped { offset, .. } => *offset,
        }
    }

    pub fn is_stamped(&self) -> bool {
        matches!(self, BufferState::Stamped { .. })
    }
}

/// 一次盖章的结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StampReport {
    /// 缓冲区在镜像中的文件偏移
    pub offset: usize,

    /// 缓冲区所在的 section（镜像不是目标文件时为空）
    pub section: Option<String>,

    /// 盖章前的公钥指纹，未盖章时为空
    pub previous_fingerprint: Option<String>,

    /// 新公钥记录的 SHA-256
    pub fingerprint: String,

    /// 镜像总长度（盖章前后相同）
    pub image_len: usize,
}

/// 读取镜像中的缓冲区状态
pub fn inspect(image: &[u8]) -> Result<BufferState> {
    let offset = locate_buffer(image)?;
    let buffer = TestKeyBuffer::from_slice(&image[offset..offset + BUFFER_LEN])?;
    buffer.validate(offset)?;

    if buffer.is_unstamped() {
        return Ok(BufferState::Unstamped { offset });
    }

    let record = KeyRecord::parse(&buffer.key_record_bytes())?;
    Ok(BufferState::Stamped { offset, record })
}

/// 在内存中的镜像上盖章
///
/// # 错误
///
/// - `MarkerNotFound` / `AmbiguousMarker` / `Truncated`：无法唯一定位缓冲区
/// - `MalformedBuffer`：镜像中的 cbPublicKey 不是 0x94
/// - `KeySizeMismatch`：新记录放不进槽位
/// - `InvalidKey`：新记录不能作为测试公钥
/// - `AlreadyStamped`：缓冲区已盖章且未允许覆盖
pub fn stamp_in_place(
    image: &mut [u8],
    record: &KeyRecord,
    options: &StampOptions,
) -> Result<StampReport> {
    let offset = locate_buffer(image)?;
    let mut buffer = TestKeyBuffer::from_slice(&image[offset..offset + BUFFER_LEN])?;
    buffer.validate(offset)?;

    check_record(record, options)?;

    let previous_fingerprint = if buffer.is_unstamped() {
        None
    } else {
        let previous = KeyRecord::parse(&buffer.key_record_bytes())?;
        if !options.allow_restamp {
            return Err(Error::AlreadyStamped { offset });
        }
        warn!(
            "覆盖偏移 0x{:x} 处已有的测试公钥 {}",
            offset,
            previous.fingerprint()
        );
        Some(previous.fingerprint())
    };

    let record_bytes: [u8; KEY_RECORD_LEN] =
        record
            .to_bytes()
            .try_into()
            .map_err(|bytes: Vec<u8>| Error::SizeMismatch {
                expected: KEY_RECORD_LEN,
                actual: bytes.len(),
            })?;

    buffer.overwrite_key_record(&record_bytes);
    image[offset..offset + BUFFER_LEN].copy_from_slice(&buffer.to_bytes());

    let section = section_containing(image, offset)?;
    let fingerprint = record.fingerprint();
    info!(
        "测试公钥已写入偏移 0x{:x}{}: {}",
        offset,
        section
            .as_deref()
            .map(|name| format!(" ({})", name))
            .unwrap_or_default(),
        fingerprint
    );

    Ok(StampReport {
        offset,
        section,
        previous_fingerprint,
        fingerprint,
        image_len: image.len(),
    })
}

/// 对磁盘上的镜像文件盖章，写入使用临时文件 + rename
pub fn stamp_file(
    path: impl AsRef<Path>,
    record: &KeyRecord,
    options: &StampOptions,
) -> Result<StampReport> {
    let path = path.as_ref();
    let mut image = fs::read(path)?;
    debug!("读取镜像 {} ({} 字节)", path.display(), image.len());

    let report = stamp_in_place(&mut image, record, options)?;
    atomic_write(path, &image)?;

    Ok(report)
}

/// 读取磁盘上镜像文件的缓冲区状态
pub fn inspect_file(path: impl AsRef<Path>) -> Result<BufferState> {
    let image = fs::read(path.as_ref())?;
    inspect(&image)
}

fn check_record(record: &KeyRecord, options: &StampOptions) -> Result<()> {
    if !record.fits_test_key_slot() {
        return Err(Error::KeySizeMismatch {
            expected: KEY_MATERIAL_LEN,
            actual: record.public_key.len(),
        });
    }

    if record.sig_alg_id == 0 || record.hash_alg_id == 0 {
        return Err(Error::InvalidKey(format!(
            "算法标识未设置: SigAlgId=0x{:x}, HashAlgId=0x{:x}",
            record.sig_alg_id, record.hash_alg_id
        )));
    }

    if record.public_key.iter().all(|&b| b == 0) {
        return Err(Error::InvalidKey("公钥数据全为 0".to_string()));
    }

    if options.require_rsa_blob {
        record.rsa_public_key()?;
    }

    Ok(())
}

/// 原子写入文件（使用临时文件 + rename）
fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let mut temp_name = OsString::from(path.as_os_str());
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    fs::write(&temp_path, data)?;

    // 保留原文件权限（可执行位）
    #[cfg(unix)]
    {
        let permissions = fs::metadata(path)?.permissions();
        fs::set_permissions(&temp_path, permissions)?;
    }

    fs::rename(&temp_path, path)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{marker_pattern, MARKER_LEN};
    use crate::record::REFERENCE_KEY_RECORD;

    fn image_with_buffer(offset: usize, len: usize) -> Vec<u8> {
        let mut image = vec![0xccu8; len];
        image[offset..offset + BUFFER_LEN].copy_from_slice(&TestKeyBuffer::unstamped().to_bytes());
        image
    }

    fn reference_record() -> KeyRecord {
        KeyRecord::parse(&REFERENCE_KEY_RECORD).unwrap()
    }

    #[test]
    fn test_stamp_keeps_length_and_marker() {
        let mut image = image_with_buffer(0x200, 0x1000);
        let original = image.clone();

        let report = stamp_in_place(&mut image, &reference_record(), &StampOptions::default())
            .unwrap();

        assert_eq!(report.offset, 0x200);
        assert_eq!(report.image_len, 0x1000);
        assert_eq!(report.previous_fingerprint, None);
        assert_eq!(image.len(), original.len());
        assert_eq!(&image[0x200..0x200 + MARKER_LEN], &marker_pattern());
        assert_eq!(&image[0x200 + 32..0x200 + BUFFER_LEN], &REFERENCE_KEY_RECORD);

        // 缓冲区之外的字节没有变化
        assert_eq!(&image[..0x200], &original[..0x200]);
        assert_eq!(&image[0x200 + BUFFER_LEN..], &original[0x200 + BUFFER_LEN..]);
    }

    #[test]
    fn test_inspect_before_and_after() {
        let mut image = image_with_buffer(0, 512);
        assert_eq!(inspect(&image).unwrap(), BufferState::Unstamped { offset: 0 });

        stamp_in_place(&mut image, &reference_record(), &StampOptions::default()).unwrap();
        match inspect(&image).unwrap() {
            BufferState::Stamped { offset, record } => {
                assert_eq!(offset, 0);
                assert_eq!(record, reference_record());
            }
            other => panic!("期望已盖章, 实际 {:?}", other),
        }
    }

    #[test]
    fn test_restamp_requires_option() {
        let mut image = image_with_buffer(64, 1024);
        let options = StampOptions::default();
        stamp_in_place(&mut image, &reference_record(), &options).unwrap();

        assert!(matches!(
            stamp_in_place(&mut image, &reference_record(), &options),
            Err(Error::AlreadyStamped { offset: 64 })
        ));

        let options = StampOptions {
            allow_restamp: true,
            ..StampOptions::default()
        };
        let report = stamp_in_place(&mut image, &reference_record(), &options).unwrap();
        assert_eq!(
            report.previous_fingerprint,
            Some(reference_record().fingerprint())
        );
    }

    #[test]
    fn test_rejects_other_key_sizes() {
        let mut image = image_with_buffer(0, 512);
        let record = KeyRecord {
            sig_alg_id: 0x2400,
            hash_alg_id: 0x8004,
            public_key: vec![1u8; 0x114],
        };

        assert!(matches!(
            stamp_in_place(&mut image, &record, &StampOptions::default()),
            Err(Error::KeySizeMismatch {
                expected: 0x94,
                actual: 0x114
            })
        ));
        assert_eq!(inspect(&image).unwrap(), BufferState::Unstamped { offset: 0 });
    }

    #[test]
    fn test_rejects_empty_key() {
        let mut image = image_with_buffer(0, 512);
        assert!(matches!(
            stamp_in_place(&mut image, &KeyRecord::empty(), &StampOptions::default()),
            Err(Error::InvalidKey(_))
        ));
    }

    #[test]
    fn test_rsa_blob_check_is_optional() {
        let record = KeyRecord {
            sig_alg_id: 0x2400,
            hash_alg_id: 0x8004,
            public_key: vec![0x5a; KEY_MATERIAL_LEN],
        };

        let mut image = image_with_buffer(0, 512);
        assert!(matches!(
            stamp_in_place(&mut image, &record, &StampOptions::default()),
            Err(Error::InvalidKey(_))
        ));

        let options = StampOptions {
            require_rsa_blob: false,
            ..StampOptions::default()
        };
        stamp_in_place(&mut image, &record, &options).unwrap();
    }

    #[test]
    fn test_malformed_buffer() {
        let mut image = image_with_buffer(0, 512);
        image[40..44].copy_from_slice(&0x90u32.to_le_bytes());

        assert!(matches!(
            inspect(&image),
            Err(Error::MalformedBuffer {
                offset: 0,
                cb_public_key: 0x90
            })
        ));
        assert!(matches!(
            stamp_in_place(&mut image, &reference_record(), &StampOptions::default()),
            Err(Error::MalformedBuffer { .. })
        ));
    }

    #[test]
    fn test_options_from_json() {
        let options = StampOptions::from_json(br#"{"allow_restamp": true}"#).unwrap();
        assert!(options.allow_restamp);
        assert!(options.require_rsa_blob);

        assert_eq!(StampOptions::from_json(b"{}").unwrap(), StampOptions::default());
        assert!(matches!(
            StampOptions::from_json(br#"{"unknown": 1}"#),
            Err(Error::Parse(_))
        ));
    }
}
