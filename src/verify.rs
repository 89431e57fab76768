//! Post-transfer reconciliation.
//!
//! Two dry-run passes of the external tool, one per copy phase, each report
//! how many files would still be transferred. A zero total means the
//! destination holds everything the copy was responsible for.

use log::{debug, info};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::oneshot;

use crate::config::Config;
use crate::errors::{CopyError, CopyResult};
use crate::transfer::{build_args, Phase};

const SUMMARY_PREFIX: &str = "Number of regular files transferred:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Complete,
    Incomplete { out_of_sync: u64 },
}

#[derive(Clone)]
pub struct Verifier {
    config: Arc<Config>,
}

impl Verifier {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    /// Side-effect free beyond the dry runs themselves; safe to repeat.
    pub async fn verify(
        &self,
        source: &Path,
        dest_save_dir: &Path,
    ) -> CopyResult<TransferOutcome> {
        let structural = self
            .run_pass(source, dest_save_dir, Phase::Structural)
            .await?;
        let filtered = self
            .run_pass(source, dest_save_dir, Phase::FilteredLarge)
            .await?;

        let out_of_sync = structural + filtered;
        info!("reconciliation: {structural} structural + {filtered} filtered files out of sync");
        Ok(if out_of_sync == 0 {
            TransferOutcome::Complete
        } else {
            TransferOutcome::Incomplete { out_of_sync }
        })
    }

    async fn run_pass(
        &self,
        source: &Path,
        dest_save_dir: &Path,
        phase: Phase,
    ) -> CopyResult<u64> {
        let args = build_args(&self.config, source, dest_save_dir, phase, true);
        debug!("reconcile: {} {}", self.config.tool_path, args.join(" "));

        let output = Command::new(&self.config.tool_path)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| CopyError::Tool {
                tool: self.config.tool_path.clone(),
                reason: e.to_string(),
            })?;

        parse_transferred_count(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Extracts the transferred-file count from the tool's statistics block.
/// Anything other than a well-formed summary line is a hard parse error,
/// never a silent "incomplete".
pub fn parse_transferred_count(output: &str) -> CopyResult<u64> {
    for line in output.lines() {
        if let Some(rest) = line.trim().strip_prefix(SUMMARY_PREFIX) {
            let digits: String = rest.chars().filter(|c| !c.is_whitespace() && *c != ',').collect();
            return digits.parse().map_err(|_| {
                CopyError::VerificationParse(format!("unexpected count '{}'", rest.trim()))
            });
        }
    }
    Err(CopyError::VerificationParse(
        "summary line not found".to_string(),
    ))
}

/// Runs verification on its own task so the control loop never blocks on
/// it; the outcome lands on the returned channel exactly once.
pub fn spawn_verification(
    verifier: Verifier,
    source: PathBuf,
    dest_save_dir: PathBuf,
) -> oneshot::Receiver<CopyResult<TransferOutcome>> {
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let _ = tx.send(verifier.verify(&source, &dest_save_dir).await);
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn fake_tool(dir: &TempDir, body: &str) -> String {
        let path = dir.path().join("fake-rsync");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn verifier_with(tool_path: String) -> Verifier {
        Verifier::new(Arc::new(Config {
            tool_path,
            ..Config::default()
        }))
    }

    #[test]
    fn parses_plain_count() {
        let output = "sent 1,234 bytes\nNumber of regular files transferred: 3\ntotal size";
        assert_eq!(parse_transferred_count(output).unwrap(), 3);
    }

    #[test]
    fn parses_zero() {
        assert_eq!(
            parse_transferred_count("Number of regular files transferred: 0").unwrap(),
            0
        );
    }

    #[test]
    fn tolerates_thousands_separators() {
        assert_eq!(
            parse_transferred_count("Number of regular files transferred: 1,234").unwrap(),
            1_234
        );
    }

    #[test]
    fn missing_summary_line_is_a_parse_error() {
        assert!(matches!(
            parse_transferred_count("sent 0 bytes, received 0 bytes"),
            Err(CopyError::VerificationParse(_))
        ));
    }

    #[test]
    fn garbage_count_is_a_parse_error() {
        assert!(matches!(
            parse_transferred_count("Number of regular files transferred: lots"),
            Err(CopyError::VerificationParse(_))
        ));
    }

    #[tokio::test]
    async fn both_passes_zero_is_complete() {
        let dir = TempDir::new().unwrap();
        let tool = fake_tool(&dir, "echo 'Number of regular files transferred: 0'");
        let outcome = verifier_with(tool)
            .verify(Path::new("/src"), Path::new("/dst"))
            .await
            .unwrap();
        assert_eq!(outcome, TransferOutcome::Complete);
    }

    #[tokio::test]
    async fn nonzero_structural_pass_is_incomplete_with_the_sum() {
        let dir = TempDir::new().unwrap();
        // pass B carries --ignore-existing, pass A does not
        let tool = fake_tool(
            &dir,
            "case \"$*\" in *--ignore-existing*) n=0;; *) n=3;; esac; \
             echo \"Number of regular files transferred: $n\"",
        );
        let outcome = verifier_with(tool)
            .verify(Path::new("/src"), Path::new("/dst"))
            .await
            .unwrap();
        assert_eq!(outcome, TransferOutcome::Incomplete { out_of_sync: 3 });
    }

    #[tokio::test]
    async fn summaryless_tool_output_fails_verification() {
        let dir = TempDir::new().unwrap();
        let tool = fake_tool(&dir, "echo 'no stats today'");
        let result = verifier_with(tool)
            .verify(Path::new("/src"), Path::new("/dst"))
            .await;
        assert!(matches!(result, Err(CopyError::VerificationParse(_))));
    }

    #[tokio::test]
    async fn spawned_verification_delivers_on_the_channel() {
        let dir = TempDir::new().unwrap();
        let tool = fake_tool(&dir, "echo 'Number of regular files transferred: 0'");
        let rx = spawn_verification(
            verifier_with(tool),
            PathBuf::from("/src"),
            PathBuf::from("/dst"),
        );
        let outcome = rx.await.unwrap().unwrap();
        assert_eq!(outcome, TransferOutcome::Complete);
    }
}
