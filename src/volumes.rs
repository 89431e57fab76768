//! Volume discovery and role classification.
//!
//! A volume is any immediate subdirectory of the mount root. The marker file
//! at a volume's root is the sole persisted role signal: present means
//! destination, absent means source. Roles are recomputed on every scan and
//! never cached.

use std::fmt;
use std::path::PathBuf;

use crate::config::Config;
use crate::errors::{CopyError, CopyResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeRole {
    Source,
    Destination,
}

impl fmt::Display for VolumeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolumeRole::Source => write!(f, "source"),
            VolumeRole::Destination => write!(f, "destination"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeDescriptor {
    pub path: PathBuf,
    pub role: VolumeRole,
}

/// Scans the mount root and enforces the exactly-one-per-role invariant.
///
/// Only filesystem metadata is touched, so resolution is safe at any time,
/// including while a transfer is running.
pub struct VolumeResolver {
    mount_root: PathBuf,
    marker_name: String,
}

impl VolumeResolver {
    pub fn new(config: &Config) -> Self {
        Self {
            mount_root: config.mount_root.clone(),
            marker_name: config.marker_name.clone(),
        }
    }

    pub fn resolve_source(&self) -> CopyResult<VolumeDescriptor> {
        self.resolve(VolumeRole::Source)
    }

    pub fn resolve_destination(&self) -> CopyResult<VolumeDescriptor> {
        self.resolve(VolumeRole::Destination)
    }

    pub fn resolve(&self, role: VolumeRole) -> CopyResult<VolumeDescriptor> {
        let mut matches = Vec::new();
        for volume in self.list_volumes()? {
            let is_destination = volume.join(&self.marker_name).exists();
            let matched = match role {
                VolumeRole::Destination => is_destination,
                VolumeRole::Source => !is_destination,
            };
            if matched {
                matches.push(volume);
            }
        }

        match matches.len() {
            0 => Err(CopyError::AbsentVolume { role }),
            1 => Ok(VolumeDescriptor {
                path: matches.remove(0),
                role,
            }),
            count => Err(CopyError::AmbiguousVolume { role, count }),
        }
    }

    /// Every mounted volume regardless of role. A missing mount root counts
    /// as zero volumes, not an error.
    pub fn list_volumes(&self) -> CopyResult<Vec<PathBuf>> {
        let entries = match std::fs::read_dir(&self.mount_root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut volumes = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                volumes.push(entry.path());
            }
        }
        volumes.sort();
        Ok(volumes)
    }

    /// Whether exactly one volume currently fills the role. Drives the
    /// mount-presence lamps.
    pub fn present(&self, role: VolumeRole) -> bool {
        self.resolve(role).is_ok()
    }
}
