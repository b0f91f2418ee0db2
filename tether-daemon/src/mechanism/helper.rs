/*!
 * External pairing helper
 * Dedicated `pair-by-mac` / `unpair-by-mac` executable shipped next to the daemon
 */

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::{run_process, MechanismOutput, PairingMechanism};
use crate::config::PairingConfig;
use crate::error::MechanismError;
use crate::identity::DeviceIdentity;

pub struct PairingHelper {
    path: PathBuf,
}

impl PairingHelper {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn invoke(
        &self,
        verb: &str,
        identity: &DeviceIdentity,
    ) -> Result<MechanismOutput, MechanismError> {
        if !self.is_available().await {
            return Err(MechanismError::Unavailable(format!(
                "{} not found",
                self.path.display()
            )));
        }

        run_process(
            &self.path,
            [verb, "--mac", identity.as_str(), "--type", "Bluetooth"],
        )
        .await
    }
}

#[async_trait]
impl PairingMechanism for PairingHelper {
    fn id(&self) -> String {
        format!("helper:{}", self.path.display())
    }

    async fn is_available(&self) -> bool {
        tokio::fs::metadata(&self.path)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false)
    }

    async fn pair(&self, identity: &DeviceIdentity) -> Result<MechanismOutput, MechanismError> {
        self.invoke("pair-by-mac", identity).await
    }

    async fn unpair(&self, identity: &DeviceIdentity) -> Result<MechanismOutput, MechanismError> {
        self.invoke("unpair-by-mac", identity).await
    }
}

/// Every place the helper may live, in search order, without duplicates.
/// Configured directories come first, then the daemon's own directory and its
/// parent, then the working directory.
pub fn candidate_paths(config: &PairingConfig) -> Vec<PathBuf> {
    if config.helper_program.is_empty() {
        return Vec::new();
    }

    let program = Path::new(&config.helper_program);
    if program.is_absolute() {
        return vec![program.to_path_buf()];
    }

    let mut dirs: Vec<PathBuf> = config.helper_search_dirs.clone();
    if let Ok(exe) = std::env::current_exe() {
        if let Some(exe_dir) = exe.parent() {
            dirs.push(exe_dir.to_path_buf());
            if let Some(parent) = exe_dir.parent() {
                dirs.push(parent.to_path_buf());
            }
        }
    }
    if let Ok(cwd) = std::env::current_dir() {
        dirs.push(cwd);
    }

    let mut paths: Vec<PathBuf> = Vec::new();
    for dir in dirs {
        let candidate = dir.join(program);
        if !paths.contains(&candidate) {
            paths.push(candidate);
        }
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(program: &str, dirs: &[&str]) -> PairingConfig {
        PairingConfig {
            helper_program: program.to_string(),
            helper_search_dirs: dirs.iter().map(PathBuf::from).collect(),
            ..PairingConfig::default()
        }
    }

    #[test]
    fn configured_dirs_come_first_without_duplicates() {
        let paths = candidate_paths(&config("bt-pair-helper", &["/opt/tether", "/opt/tether"]));

        assert_eq!(paths[0], PathBuf::from("/opt/tether/bt-pair-helper"));
        assert_eq!(
            paths.iter().filter(|p| **p == paths[0]).count(),
            1,
            "duplicate candidates: {paths:?}"
        );
        let cwd = std::env::current_dir().unwrap().join("bt-pair-helper");
        assert!(paths.contains(&cwd));
    }

    #[test]
    fn absolute_program_is_the_only_candidate() {
        let paths = candidate_paths(&config("/usr/libexec/bt-pair-helper", &["/opt/tether"]));
        assert_eq!(paths, vec![PathBuf::from("/usr/libexec/bt-pair-helper")]);
    }

    #[test]
    fn empty_program_disables_the_helper() {
        assert!(candidate_paths(&config("", &["/opt/tether"])).is_empty());
    }

    #[tokio::test]
    async fn missing_helper_reports_unavailable() {
        let helper = PairingHelper::new("/nonexistent/bt-pair-helper");
        assert!(!helper.is_available().await);
        let result = helper.pair(&"aa:bb:cc:dd:ee:ff".into()).await;
        assert!(matches!(result, Err(MechanismError::Unavailable(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn helper_receives_verb_and_identity() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bt-pair-helper");
        std::fs::write(&path, "#!/bin/sh\necho \"$1 $3 $5\"\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

        let helper = PairingHelper::new(&path);
        let output = helper.unpair(&"AA-BB-CC-DD-EE-FF".into()).await.unwrap();
        assert_eq!(output.stdout.trim(), "unpair-by-mac aa:bb:cc:dd:ee:ff Bluetooth");
    }
}
