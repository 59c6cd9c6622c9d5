//! # SN Test Key
//!
//! 强名称测试公钥替换：一个编入运行时镜像、可在构建后原地替换的公钥缓冲区。
//!
//! 只有平台公钥签名的程序集才能访问平台内部 API。测试程序集拿不到平台私钥，
//! 因此测试构建在镜像里放一块固定格式的缓冲区：两个标记 GUID 之后跟一条公钥记录。
//! 外部盖章工具按字节扫描找到标记，把其后的公钥记录换成测试团队自己的公钥；
//! 此后由该公钥签名的程序集在信任判断中与平台代码同等对待。
//!
//! ## 特性
//!
//! - **固定布局**: `repr(C)` 结构 + 编译期断言，偏移表在任何编译器下都不变
//! - **唯一标记**: 标记序列在镜像中只出现一次，`#[no_mangle]` 阻止重复定义
//! - **原地盖章**: 只改写 [32, 192)，长度和标记不变
//! - **默认无效**: 未盖章的全 0 缓冲区不会让任何程序集获得信任
//! - **构建开关**: 关闭 `test-key-substitution` 时缓冲区和测试信任分支都不存在
//!
//! ## 使用示例
//!
//! ```rust
//! use sn_testkey::{inspect, stamp_in_place, BufferState, KeyRecord, StampOptions, TestKeyBuffer};
//! use sn_testkey::REFERENCE_KEY_RECORD;
//!
//! # fn main() -> sn_testkey::Result<()> {
//! // 一个包含未盖章缓冲区的镜像
//! let mut image = vec![0u8; 1024];
//! image[256..448].copy_from_slice(&TestKeyBuffer::unstamped().to_bytes());
//!
//! let record = KeyRecord::parse(&REFERENCE_KEY_RECORD)?;
//! let report = stamp_in_place(&mut image, &record, &StampOptions::default())?;
//! assert_eq!(report.offset, 256);
//!
//! assert!(matches!(inspect(&image)?, BufferState::Stamped { .. }));
//! # Ok(())
//! # }
//! ```

// 内部模块
#[cfg(feature = "test-key-substitution")]
mod embed;
mod error;
mod layout;
mod locate;
mod record;
mod stamp;
mod trust;

// 公开导出
#[cfg(feature = "test-key-substitution")]
pub use embed::{embedded_buffer, embedded_test_key, SN_TEST_KEY_BUFFER};
pub use error::{Error, Result};
pub use layout::{
    marker_pattern, TestKeyBuffer, BUFFER_LEN, CB_PUBLIC_KEY_OFFSET, HASH_ALG_ID_OFFSET,
    KEY_MATERIAL_LEN, KEY_MATERIAL_OFFSET, KEY_RECORD_HEADER_LEN, KEY_RECORD_LEN, MARKER_GUID_1,
    MARKER_GUID_2, MARKER_LEN, SIG_ALG_ID_OFFSET,
};
pub use locate::{find_markers, locate_buffer, section_containing};
pub use record::{KeyRecord, RsaPublicKeyBlob, CALG_RSA_SIGN, CALG_SHA1, REFERENCE_KEY_RECORD};
pub use stamp::{
    inspect, inspect_file, stamp_file, stamp_in_place, BufferState, StampOptions, StampReport,
};
pub use trust::{TrustLevel, TrustPolicy};
