//! # 路径解析
//!
//! 以 `/` 开头的为绝对路径；相对路径对照调用线程的工作目录补全。
//! 打开文件表以绝对路径为键，所以任何进入表的名字都先经过这里。
//!
//! 本层的文件操作只收单段名字，多段路径仅由 `change_dir` 逐段行走。

use crate::error::Result;
use crate::FsError;

/// 把 `path` 对照工作目录 `cwd` 补全为绝对路径
pub(crate) fn absolutize(cwd: &str, path: &str) -> Result<String> {
    if path.is_empty() {
        return Err(FsError::InvalidPath);
    }

    if path.starts_with('/') {
        Ok(path.to_owned())
    } else if cwd == "/" {
        Ok(format!("/{path}"))
    } else {
        Ok(format!("{cwd}/{path}"))
    }
}

/// 拆出路径的各段；空段非法，"/" 拆出零段
pub(crate) fn segments(path: &str) -> Result<Vec<&str>> {
    if path.is_empty() {
        return Err(FsError::InvalidPath);
    }

    let trimmed = path.strip_prefix('/').unwrap_or(path);
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let segs: Vec<&str> = trimmed.split('/').collect();
    if segs.iter().any(|s| s.is_empty()) {
        return Err(FsError::InvalidPath);
    }
    Ok(segs)
}

/// 把绝对路径拆为（父目录绝对路径, 末段名字）
pub(crate) fn split_parent(abs: &str) -> Result<(&str, &str)> {
    debug_assert!(abs.starts_with('/'));

    let cut = abs.rfind('/').ok_or(FsError::InvalidPath)?;
    let name = &abs[cut + 1..];
    if name.is_empty() {
        return Err(FsError::InvalidPath);
    }

    let parent = if cut == 0 { "/" } else { &abs[..cut] };
    Ok((parent, name))
}

/// 校验本层操作收到的单段名字
pub(crate) fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') {
        return Err(FsError::InvalidPath);
    }
    Ok(())
}
