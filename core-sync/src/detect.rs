//! Device classification and write-back prerequisites.

use bridge_traits::DeviceGeneration;
use std::path::Path;
use tracing::debug;

/// Control directories whose presence marks a mount as a supported device.
const CONTROL_DIRS: &[&str] = &["iTunes_Control", "iPod_Control", "iTunes/iTunes_Control"];

/// Directories (relative to the mount) that hold device support files.
const DEVICE_DIRS: &[&str] = &["iPod_Control/Device", "iTunes_Control/Device"];

/// Whether `mount_path` looks like a supported media player.
pub async fn is_supported_device(mount_path: &Path) -> bool {
    if mount_path.as_os_str().is_empty() {
        return false;
    }

    match tokio::fs::metadata(mount_path).await {
        Ok(meta) if meta.is_dir() => {}
        _ => return false,
    }

    for marker in CONTROL_DIRS {
        if tokio::fs::metadata(mount_path.join(marker))
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false)
        {
            return true;
        }
    }

    debug!(mount_path = %mount_path.display(), "No device control directory found");
    false
}

/// Support file a generation needs before its database may be rewritten.
pub fn write_prerequisite(generation: &DeviceGeneration) -> Option<&'static str> {
    use DeviceGeneration::*;

    match generation {
        Classic1 | Classic2 | Classic3 | Nano3 | Nano4 => Some("SysInfoExtended"),
        Nano5 | Touch1 | Touch2 | Touch3 | Iphone1 | Iphone2 | Iphone3 => Some("HashInfo"),
        _ => None,
    }
}

/// Outcome of the write-back capability check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteSupport {
    Enabled,
    /// The named support file is absent or empty
    Missing(&'static str),
}

impl WriteSupport {
    pub fn is_enabled(&self) -> bool {
        matches!(self, WriteSupport::Enabled)
    }
}

/// Check whether the device at `mount_path` can safely take a database
/// rewrite.
pub async fn check_write_support(mount_path: &Path, generation: &DeviceGeneration) -> WriteSupport {
    let Some(file) = write_prerequisite(generation) else {
        return WriteSupport::Enabled;
    };

    for dir in DEVICE_DIRS {
        let candidate = mount_path.join(dir).join(file);
        if let Ok(meta) = tokio::fs::metadata(&candidate).await {
            if meta.is_file() && meta.len() > 0 && tokio::fs::File::open(&candidate).await.is_ok()
            {
                return WriteSupport::Enabled;
            }
        }
    }

    WriteSupport::Missing(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_supported_device_markers() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_supported_device(dir.path()).await);

        std::fs::create_dir_all(dir.path().join("iPod_Control")).unwrap();
        assert!(is_supported_device(dir.path()).await);

        let touch = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(touch.path().join("iTunes/iTunes_Control")).unwrap();
        assert!(is_supported_device(touch.path()).await);
    }

    #[tokio::test]
    async fn test_unsupported_paths() {
        assert!(!is_supported_device(Path::new("")).await);
        assert!(!is_supported_device(Path::new("/definitely/not/mounted")).await);

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("iPod_Control");
        std::fs::write(&file, b"not a dir").unwrap();
        assert!(!is_supported_device(dir.path()).await);
    }

    #[test]
    fn test_write_prerequisites() {
        assert_eq!(
            write_prerequisite(&DeviceGeneration::Classic2),
            Some("SysInfoExtended")
        );
        assert_eq!(
            write_prerequisite(&DeviceGeneration::Nano4),
            Some("SysInfoExtended")
        );
        assert_eq!(write_prerequisite(&DeviceGeneration::Nano5), Some("HashInfo"));
        assert_eq!(write_prerequisite(&DeviceGeneration::Iphone2), Some("HashInfo"));
        assert_eq!(write_prerequisite(&DeviceGeneration::Video1), None);
        assert_eq!(write_prerequisite(&DeviceGeneration::Touch4), None);
    }

    #[tokio::test]
    async fn test_check_write_support() {
        let dir = tempfile::tempdir().unwrap();
        let device_dir = dir.path().join("iPod_Control/Device");
        std::fs::create_dir_all(&device_dir).unwrap();

        assert_eq!(
            check_write_support(dir.path(), &DeviceGeneration::Nano5).await,
            WriteSupport::Missing("HashInfo")
        );

        std::fs::write(device_dir.join("HashInfo"), b"").unwrap();
        assert!(!check_write_support(dir.path(), &DeviceGeneration::Nano5)
            .await
            .is_enabled());

        std::fs::write(device_dir.join("HashInfo"), b"hash").unwrap();
        assert!(check_write_support(dir.path(), &DeviceGeneration::Nano5)
            .await
            .is_enabled());

        assert!(check_write_support(dir.path(), &DeviceGeneration::Mini1)
            .await
            .is_enabled());
    }
}
