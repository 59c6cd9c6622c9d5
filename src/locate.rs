//! 在二进制镜像中定位测试密钥缓冲区

use crate::error::{Error, Result};
use crate::layout::{marker_pattern, BUFFER_LEN, MARKER_LEN};
use log::{debug, trace, warn};
use object::{Object, ObjectSection};

/// 返回标记序列在镜像中出现的所有偏移
pub fn find_markers(image: &[u8]) -> Vec<usize> {
    let marker = marker_pattern();
    if image.len() < MARKER_LEN {
        return Vec::new();
    }

    let offsets: Vec<usize> = image
        .windows(MARKER_LEN)
        .enumerate()
        .filter(|(_, window)| **window == marker[..])
        .map(|(offset, _)| offset)
        .collect();

    for offset in &offsets {
        debug!("在偏移 0x{:x} 处发现测试密钥缓冲区标记", offset);
    }
    trace!("扫描 {} 字节，命中 {} 次", image.len(), offsets.len());

    offsets
}

/// 定位唯一的测试密钥缓冲区，返回其起始偏移
///
/// 没有命中说明构建时未启用缓冲区；多次命中说明缓冲区被重复编入，
/// 两种情况都无法安全盖章。
pub fn locate_buffer(image: &[u8]) -> Result<usize> {
    let offsets = find_markers(image);

    let offset = match offsets.as_slice() {
        [] => return Err(Error::MarkerNotFound),
        [offset] => *offset,
        _ => {
            warn!("测试密钥缓冲区标记出现 {} 次", offsets.len());
            return Err(Error::AmbiguousMarker { offsets });
        }
    };

    let available = image.len() - offset;
    if available < BUFFER_LEN {
        return Err(Error::Truncated { offset, available });
    }

    Ok(offset)
}

/// 查找包含指定文件偏移的 section 名称
///
/// 镜像不是可识别的目标文件格式时返回 `Ok(None)`。
pub fn section_containing(image: &[u8], offset: usize) -> Result<Option<String>> {
    let obj_file = match object::File::parse(image) {
        Ok(file) => file,
        Err(e) => {
            trace!("镜像不是可解析的目标文件: {}", e);
            return Ok(None);
        }
    };

    for section in obj_file.sections() {
        let Some((start, size)) = section.file_range() else {
            continue;
        };
        let (start, size) = (start as usize, size as usize);

        if offset >= start && offset < start + size {
            let name = section
                .name()
                .map_err(|e| Error::Parse(format!("无法读取 section 名称: {}", e)))?;
            return Ok(Some(name.to_string()));
        }
    }

    Ok(None)
}
