//! Pushes the restored master data to a git remote.
//!
//! Shells out to the `git` binary: commit anything dirty in the working
//! tree, then push the current branch. Credentials go through a throwaway
//! GIT_ASKPASS script so they never land on the command line.

use std::path::Path;
use std::process::Command;

use sekai_core::config::GitConfig;
use sekai_core::{Result, SekaiError};
use tracing::info;

pub struct GitHelper {
    username: String,
    email: String,
    password: String,
    proxy: Option<String>,
}

impl GitHelper {
    pub fn new(config: &GitConfig, proxy: Option<String>) -> Self {
        Self {
            username: config.username.clone(),
            email: config.email.clone(),
            password: config.password.clone(),
            proxy,
        }
    }

    /// Commits and pushes any pending changes in `repo_path`.
    ///
    /// Returns `Ok(false)` when there was nothing to commit or push.
    pub fn push_changes(&self, repo_path: &Path, data_version: &str) -> Result<bool> {
        if !repo_path.exists() {
            return Err(SekaiError::parse(format!(
                "repository path does not exist: {}",
                repo_path.display()
            )));
        }
        let status = self.run_git(repo_path, &["status", "--porcelain"])?;
        if status.trim().is_empty() {
            let unpushed = self.run_git(repo_path, &["log", "@{u}..", "--oneline"]);
            match unpushed {
                Ok(log) if !log.trim().is_empty() => {
                    info!("found unpushed commits");
                }
                _ => {
                    info!("no changes to commit or push");
                    return Ok(false);
                }
            }
        } else {
            self.run_git(repo_path, &["add", "-A"])?;
            let message = format!("Master data version {}", data_version);
            self.run_git(
                repo_path,
                &[
                    "-c",
                    &format!("user.name={}", self.username),
                    "-c",
                    &format!("user.email={}", self.email),
                    "commit",
                    "-m",
                    &message,
                ],
            )?;
            info!("committed changes: {}", message);
        }
        self.push(repo_path)?;
        Ok(true)
    }

    fn push(&self, repo_path: &Path) -> Result<()> {
        let branch = self.run_git(repo_path, &["rev-parse", "--abbrev-ref", "HEAD"])?;
        let branch = branch.trim().to_string();

        if self.password.is_empty() {
            self.run_git(repo_path, &["push", "origin", &branch])?;
            return Ok(());
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let script = format!("#!/bin/sh\necho '{}'", self.password.replace('\'', "'\\''"));
            let askpass = std::env::temp_dir().join("sekai-git-askpass.sh");
            std::fs::write(&askpass, script)
                .map_err(|e| SekaiError::Io(format!("failed to write askpass: {}", e)))?;
            std::fs::set_permissions(&askpass, std::fs::Permissions::from_mode(0o700))
                .map_err(|e| SekaiError::Io(e.to_string()))?;

            let mut cmd = Command::new("git");
            cmd.current_dir(repo_path)
                .args(["push", "origin", &branch])
                .env("GIT_ASKPASS", &askpass);
            self.apply_proxy(&mut cmd);
            let output = cmd
                .output()
                .map_err(|e| SekaiError::transport(format!("failed to run git push: {}", e)))?;
            let _ = std::fs::remove_file(&askpass);
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stderr.contains("up-to-date") {
                    return Err(SekaiError::transport(format!("git push failed: {}", stderr)));
                }
            }
            Ok(())
        }
        #[cfg(not(unix))]
        {
            self.run_git(repo_path, &["push", "origin", &branch])?;
            Ok(())
        }
    }

    fn apply_proxy(&self, cmd: &mut Command) {
        if let Some(ref proxy) = self.proxy
            && !proxy.is_empty()
        {
            cmd.env("HTTP_PROXY", proxy).env("HTTPS_PROXY", proxy);
        }
    }

    fn run_git(&self, repo_path: &Path, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new("git");
        cmd.current_dir(repo_path).args(args);
        self.apply_proxy(&mut cmd);
        let output = cmd
            .output()
            .map_err(|e| SekaiError::transport(format!("failed to run git: {}", e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.contains("nothing to commit") && !stderr.contains("up-to-date") {
                return Err(SekaiError::transport(format!(
                    "git command failed: {}",
                    stderr
                )));
            }
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}
