//! 程序集加载时的平台信任判断
//!
//! 程序集的签名公钥与平台公钥逐字节相同则获得平台信任。启用
//! `test-key-substitution` 时，与已盖章测试公钥相同的程序集也获得同等信任；
//! 未启用时这条分支不存在于编译产物中。

#[cfg(feature = "test-key-substitution")]
use crate::layout::TestKeyBuffer;
#[cfg(feature = "test-key-substitution")]
use crate::record::KeyRecord;
use log::trace;
use serde::Serialize;

/// 信任判断结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    /// 由平台公钥签名
    Platform,

    /// 由盖章的测试公钥签名，按平台代码对待
    #[cfg(feature = "test-key-substitution")]
    TestPlatform,

    /// 普通程序集
    Untrusted,
}

impl TrustLevel {
    pub fn is_platform(&self) -> bool {
        !matches!(self, TrustLevel::Untrusted)
    }
}

/// 平台信任策略
#[derive(Debug, Clone)]
pub struct TrustPolicy {
    platform_key: Vec<u8>,

    #[cfg(feature = "test-key-substitution")]
    test_key: Option<KeyRecord>,
}

impl TrustPolicy {
    /// 使用平台公钥（完整的 PublicKeyBlob）创建策略
    ///
    /// 启用测试密钥替换时，同时读取镜像中的测试密钥缓冲区。
    pub fn new(platform_key: impl Into<Vec<u8>>) -> Self {
        Self {
            platform_key: platform_key.into(),
            #[cfg(feature = "test-key-substitution")]
            test_key: crate::embed::embedded_test_key(),
        }
    }

    /// 使用指定的缓冲区代替镜像中的缓冲区，用于模拟盖章后的镜像
    #[cfg(feature = "test-key-substitution")]
    pub fn with_test_key_buffer(platform_key: impl Into<Vec<u8>>, buffer: &TestKeyBuffer) -> Self {
        let test_key = if buffer.validate(0).is_err() || buffer.is_unstamped() {
            None
        } else {
            KeyRecord::parse(&buffer.key_record_bytes())
                .ok()
                .filter(KeyRecord::is_usable_test_key)
        };

        Self {
            platform_key: platform_key.into(),
            test_key,
        }
    }

    /// 当前生效的测试公钥
    #[cfg(feature = "test-key-substitution")]
    pub fn test_key(&self) -> Option<&KeyRecord> {
        self.test_key.as_ref()
    }

    /// 判断签名公钥为 `assembly_key`（完整的 PublicKeyBlob）的程序集的信任级别
    ///
    /// 空公钥和全 0 公钥永远不匹配。
    pub fn evaluate(&self, assembly_key: &[u8]) -> TrustLevel {
        if is_blank(assembly_key) {
            trace!("程序集公钥为空或全 0");
            return TrustLevel::Untrusted;
        }

        if !is_blank(&self.platform_key) && assembly_key == self.platform_key.as_slice() {
            return TrustLevel::Platform;
        }

        self.evaluate_test_key(assembly_key)
    }

    #[cfg(feature = "test-key-substitution")]
    fn evaluate_test_key(&self, assembly_key: &[u8]) -> TrustLevel {
        match &self.test_key {
            Some(test_key) if assembly_key == test_key.to_bytes().as_slice() => {
                trace!("程序集由测试公钥 {} 签名", test_key.fingerprint());
                TrustLevel::TestPlatform
            }
            _ => TrustLevel::Untrusted,
        }
    }

    #[cfg(not(feature = "test-key-substitution"))]
    fn evaluate_test_key(&self, _assembly_key: &[u8]) -> TrustLevel {
        TrustLevel::Untrusted
    }
}

fn is_blank(key: &[u8]) -> bool {
    key.iter().all(|&b| b == 0)
}
