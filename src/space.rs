//! Disk space metadata and transfer admission.

use std::path::Path;
use std::sync::Arc;
use sysinfo::Disks;
use walkdir::WalkDir;

use crate::errors::{CopyError, CopyResult};

/// Used/free space lookups for a volume path. The seam lets tests and the
/// progress estimator run against synthetic numbers.
pub trait DiskSpace: Send + Sync {
    fn used_space(&self, path: &Path) -> CopyResult<u64>;
    fn free_space(&self, path: &Path) -> CopyResult<u64>;
}

/// Real implementation backed by the OS disk list, with a recursive-sum
/// fallback for source paths that are not themselves mount points.
pub struct SystemDiskSpace;

impl SystemDiskSpace {
    fn mounted_disk_space(path: &Path) -> Option<(u64, u64)> {
        let disks = Disks::new_with_refreshed_list();
        disks
            .list()
            .iter()
            .find(|disk| disk.mount_point() == path)
            .map(|disk| (disk.total_space(), disk.available_space()))
    }
}

impl DiskSpace for SystemDiskSpace {
    fn used_space(&self, path: &Path) -> CopyResult<u64> {
        if let Some((total, available)) = Self::mounted_disk_space(path) {
            return Ok(total.saturating_sub(available));
        }
        scan_tree_size(path)
    }

    fn free_space(&self, path: &Path) -> CopyResult<u64> {
        Self::mounted_disk_space(path)
            .map(|(_, available)| available)
            .ok_or_else(|| CopyError::DestinationStat {
                path: path.to_path_buf(),
                reason: "not a mounted volume".to_string(),
            })
    }
}

/// Sums regular file sizes under `root`. Any traversal fault surfaces as a
/// source read error rather than a partial count.
pub fn scan_tree_size(root: &Path) -> CopyResult<u64> {
    let mut total: u64 = 0;
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| CopyError::SourceRead {
            path: root.to_path_buf(),
            reason: e.to_string(),
        })?;
        if entry.file_type().is_file() {
            let metadata = entry.metadata().map_err(|e| CopyError::SourceRead {
                path: root.to_path_buf(),
                reason: e.to_string(),
            })?;
            total += metadata.len();
        }
    }
    Ok(total)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Ready { required: u64, available: u64 },
    InsufficientSpace { required: u64, available: u64 },
}

/// Pre-transfer admission control: the source's used space must fit in the
/// destination's free space. Equality admits.
pub struct CapacityGuard {
    space: Arc<dyn DiskSpace>,
}

impl CapacityGuard {
    pub fn new(space: Arc<dyn DiskSpace>) -> Self {
        Self { space }
    }

    pub fn admit(&self, source: &Path, dest: &Path) -> CopyResult<Admission> {
        let required = self.space.used_space(source)?;
        let available = self.space.free_space(dest)?;
        if required <= available {
            Ok(Admission::Ready {
                required,
                available,
            })
        } else {
            Ok(Admission::InsufficientSpace {
                required,
                available,
            })
        }
    }
}
