//! 可执行文件路径解析

use crate::error::{Result, WinsvcError};
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// 平台默认可执行文件扩展名
pub const DEFAULT_EXE_EXTENSION: &str = "exe";

/// 当前进程可执行文件的绝对路径
///
/// 以进程启动参数 argv[0] 为准解析。
pub fn app_path() -> Result<PathBuf> {
    let program = std::env::args_os()
        .next()
        .ok_or_else(|| WinsvcError::NotFound {
            target: "进程启动参数 argv[0]".to_string(),
        })?;
    resolve_app_path(program)
}

/// 将调用参数解析为可执行文件绝对路径
///
/// 路径指向目录时返回 `InvalidPath`。路径不存在且没有扩展名时，
/// 追加默认扩展名后再尝试一次，仍不存在则返回 `NotFound`。
pub fn resolve_app_path(program: impl AsRef<Path>) -> Result<PathBuf> {
    let path = std::path::absolute(program.as_ref())?;

    match check_file(&path) {
        Ok(()) => return Ok(path),
        Err(CheckError::Directory) => return Err(WinsvcError::InvalidPath { path }),
        Err(CheckError::Missing(_)) => {}
    }

    if path.extension().is_none() {
        let mut with_extension = OsString::from(path.as_os_str());
        with_extension.push(".");
        with_extension.push(DEFAULT_EXE_EXTENSION);
        let candidate = PathBuf::from(with_extension);

        return match check_file(&candidate) {
            Ok(()) => Ok(candidate),
            Err(CheckError::Directory) => Err(WinsvcError::InvalidPath { path: candidate }),
            Err(CheckError::Missing(e)) => Err(not_found(&path, e)),
        };
    }

    Err(WinsvcError::NotFound {
        target: path.display().to_string(),
    })
}

enum CheckError {
    Directory,
    Missing(io::Error),
}

fn check_file(path: &Path) -> std::result::Result<(), CheckError> {
    match fs::metadata(path) {
        Ok(metadata) if metadata.is_dir() => Err(CheckError::Directory),
        Ok(_) => Ok(()),
        Err(e) => Err(CheckError::Missing(e)),
    }
}

fn not_found(path: &Path, error: io::Error) -> WinsvcError {
    WinsvcError::NotFound {
        target: format!("{} ({error})", path.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_existing_file_resolves_to_itself() {
        let dir = TempDir::new().unwrap();
        let exe = dir.path().join("app.exe");
        fs::write(&exe, b"").unwrap();

        assert_eq!(resolve_app_path(&exe).unwrap(), exe);
    }

    #[test]
    fn test_missing_extension_is_appended() {
        let dir = TempDir::new().unwrap();
        let exe = dir.path().join("app.exe");
        fs::write(&exe, b"").unwrap();

        let resolved = resolve_app_path(dir.path().join("app")).unwrap();
        assert_eq!(resolved, exe);
        assert!(resolved.is_absolute());
    }

    #[test]
    fn test_directory_is_rejected() {
        let dir = TempDir::new().unwrap();
        let app = dir.path().join("app");
        fs::create_dir(&app).unwrap();

        let err = resolve_app_path(&app).unwrap_err();
        assert!(matches!(err, WinsvcError::InvalidPath { ref path } if *path == app));
    }

    #[test]
    fn test_directory_with_extension_appended_is_rejected() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("app.exe")).unwrap();

        let err = resolve_app_path(dir.path().join("app")).unwrap_err();
        assert!(matches!(err, WinsvcError::InvalidPath { .. }));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();

        assert!(resolve_app_path(dir.path().join("app"))
            .unwrap_err()
            .is_not_found());
        assert!(resolve_app_path(dir.path().join("app.bin"))
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_relative_path_becomes_absolute() {
        // cargo test 在包根目录下运行
        let resolved = resolve_app_path("Cargo.toml").unwrap();
        assert!(resolved.is_absolute());
        assert_eq!(resolved, std::env::current_dir().unwrap().join("Cargo.toml"));
    }
}
