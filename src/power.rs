//! Volume ejection and appliance power-off.
//!
//! Both shell out to the host's own commands; the only policy here is
//! flushing filesystem buffers first and refusing to power off while
//! anything is still mounted.

use log::{debug, info, warn};
use tokio::process::Command;

use crate::errors::{CopyError, CopyResult};
use crate::volumes::{VolumeResolver, VolumeRole};

fn flush_disks() {
    #[cfg(unix)]
    unsafe {
        libc::sync();
    }
}

/// Unmounts the single volume currently filling `role`. Absence or
/// ambiguity just logs; the operator resolves it by re-seating media.
pub async fn eject(resolver: &VolumeResolver, role: VolumeRole) {
    let volume = match resolver.resolve(role) {
        Ok(volume) => volume,
        Err(err) => {
            warn!("nothing to eject: {err}");
            return;
        }
    };

    info!("ejecting {} volume {}", role, volume.path.display());
    flush_disks();
    match Command::new("umount").arg(&volume.path).output().await {
        Ok(output) => {
            for line in String::from_utf8_lossy(&output.stdout).lines() {
                debug!("umount: {line}");
            }
            if !output.status.success() {
                warn!(
                    "umount {} exited with {}: {}",
                    volume.path.display(),
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
            }
        }
        Err(e) => warn!("failed to run umount: {e}"),
    }
}

/// Shuts the host down, but only once no volume is mounted at all.
/// Returns whether the shutdown command was actually issued.
pub async fn power_off(resolver: &VolumeResolver) -> CopyResult<bool> {
    let volumes = resolver.list_volumes()?;
    if !volumes.is_empty() {
        warn!(
            "refusing to power off with {} volume(s) still mounted",
            volumes.len()
        );
        return Ok(false);
    }

    info!("powering off");
    flush_disks();
    Command::new("shutdown")
        .args(["-h", "now"])
        .status()
        .await
        .map_err(|e| CopyError::Tool {
            tool: "shutdown".to_string(),
            reason: e.to_string(),
        })?;
    Ok(true)
}
