//! 编入镜像的测试密钥缓冲区
//!
//! 整个进程只有这一个定义。`#[no_mangle]` 让第二份定义在链接时报重复符号，
//! 从源头保证标记序列在最终镜像中只出现一次。盖章发生在构建之后、运行之前，
//! 运行期间没有任何写入者，所以读取不需要同步。

use crate::layout::{TestKeyBuffer, UNSTAMPED_BUFFER};
use crate::record::KeyRecord;

/// 测试密钥缓冲区，初始为未盖章状态，由外部工具在构建后原地改写
#[used]
#[no_mangle]
#[cfg_attr(target_os = "linux", link_section = ".sn_testkey")]
pub static SN_TEST_KEY_BUFFER: TestKeyBuffer = UNSTAMPED_BUFFER;

/// 读取当前镜像中的缓冲区
///
/// 编译器认为 static 的内容就是初始化值，普通读取可能被折叠成全 0 常量，
/// 看不到盖章后的字节，因此这里使用 volatile 读取。
pub fn embedded_buffer() -> TestKeyBuffer {
    // SAFETY: 指针来自一个 'static 引用，非空且对齐（对齐为 1），内容在进程内只读。
    unsafe { std::ptr::read_volatile(&SN_TEST_KEY_BUFFER) }
}

/// 镜像中已盖章的测试公钥
///
/// 未盖章或格式错误时返回 `None`，等同于关闭测试密钥信任。
pub fn embedded_test_key() -> Option<KeyRecord> {
    let buffer = embedded_buffer();

    if let Err(e) = buffer.validate(0) {
        log::warn!("忽略格式错误的测试密钥缓冲区: {}", e);
        return None;
    }

    if buffer.is_unstamped() {
        log::debug!("测试密钥缓冲区未盖章");
        return None;
    }

    let record = KeyRecord::parse(&buffer.key_record_bytes()).ok()?;
    if !record.is_usable_test_key() {
        log::warn!(
            "测试密钥缓冲区内容不可用: SigAlgId=0x{:x}, HashAlgId=0x{:x}",
            record.sig_alg_id,
            record.hash_alg_id
        );
        return None;
    }

    Some(record)
}
