//! 错误类型定义

use std::fmt;

/// 库的错误类型
///
/// 除 `Io` 外，这里的错误都对应构建或集成缺陷，而不是运行时故障。
#[derive(Debug)]
pub enum Error {
    /// IO错误
    Io(std::io::Error),

    /// 数据解析错误
    Parse(String),

    /// 配置错误
    Config(String),

    /// 镜像中没有标记序列（功能开关未启用，或缓冲区被剥离）
    MarkerNotFound,

    /// 标记序列出现多次，无法判断哪一个是真正的缓冲区
    AmbiguousMarker { offsets: Vec<usize> },

    /// 标记之后的字节不足一个完整缓冲区
    Truncated { offset: usize, available: usize },

    /// 缓冲区中的 cbPublicKey 与预留的密钥区长度不一致
    MalformedBuffer { offset: usize, cb_public_key: u32 },

    /// 密钥记录的长度与测试密钥槽位不匹配
    KeySizeMismatch { expected: usize, actual: usize },

    /// 密钥记录不能作为测试公钥使用
    InvalidKey(String),

    /// 缓冲区已经盖过章
    AlreadyStamped { offset: usize },

    /// 数据大小不匹配
    SizeMismatch { expected: usize, actual: usize },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "IO错误: {}", e),
            Error::Parse(e) => write!(f, "解析错误: {}", e),
            Error::Config(e) => write!(f, "配置错误: {}", e),
            Error::MarkerNotFound => {
                write!(f, "未找到测试密钥缓冲区标记（test-key-substitution 未启用？）")
            }
            Error::AmbiguousMarker { offsets } => {
                write!(f, "测试密钥缓冲区标记出现 {} 次: ", offsets.len())?;
                for (i, offset) in offsets.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "0x{:x}", offset)?;
                }
                Ok(())
            }
            Error::Truncated { offset, available } => write!(
                f,
                "偏移 0x{:x} 处的缓冲区被截断: 仅剩 {} 字节",
                offset, available
            ),
            Error::MalformedBuffer {
                offset,
                cb_public_key,
            } => write!(
                f,
                "偏移 0x{:x} 处的缓冲区格式错误: cbPublicKey = 0x{:x}",
                offset, cb_public_key
            ),
            Error::KeySizeMismatch { expected, actual } => {
                write!(f, "公钥长度不匹配: 期望 {}, 实际 {}", expected, actual)
            }
            Error::InvalidKey(e) => write!(f, "无效的测试公钥: {}", e),
            Error::AlreadyStamped { offset } => {
                write!(f, "偏移 0x{:x} 处的缓冲区已经盖过章", offset)
            }
            Error::SizeMismatch { expected, actual } => {
                write!(f, "大小不匹配: 期望 {}, 实际 {}", expected, actual)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Parse(format!("JSON错误: {}", e))
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, Error>;
