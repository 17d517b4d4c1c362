use crate::Fetcher;
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::instrument;

/// Runs a FanFicFare-compatible command line tool:
/// `<program> --personal-ini <credentials> --output-dir <dir> [args…] <url>`.
#[derive(Debug, Clone)]
pub struct CommandFetcher {
    program: Option<PathBuf>,
    credentials: PathBuf,
    args: Vec<String>,
}

impl CommandFetcher {
    /// Uses `program` if given, otherwise looks for the tool on `PATH` the
    /// first time it is needed.
    pub fn new(program: Option<PathBuf>, credentials: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self { program, credentials: credentials.into(), args }
    }

    /// The configured or discovered download tool.
    pub fn program(&self) -> Result<PathBuf> {
        match &self.program {
            Some(program) => Ok(program.clone()),
            None => Self::discover(),
        }
    }

    fn discover() -> Result<PathBuf> {
        let executables = ["fanficfare", "fff"];
        for exe in executables {
            if let Ok(path) = which::which(exe) {
                return Ok(path);
            }
        }
        tracing::info!("Download tool not found in PATH");
        exn::bail!(ErrorKind::ToolNotFound);
    }

    fn command(&self, program: &Path, url: &str, output_dir: &Path) -> Command {
        let mut command = Command::new(program);
        command
            .arg("--personal-ini")
            .arg(&self.credentials)
            .arg("--output-dir")
            .arg(output_dir)
            .args(&self.args)
            .arg(url)
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl Fetcher for CommandFetcher {
    fn name(&self) -> &str {
        "command"
    }

    #[instrument(skip(self))]
    async fn fetch(&self, url: &str, output_dir: &Path) -> Result<()> {
        let program = self.program()?;
        // Without its settings the tool would run with defaults and produce
        // something other than what the library expects.
        if !tokio::fs::try_exists(&self.credentials).await.unwrap_or(false) {
            exn::bail!(ErrorKind::Configuration(self.credentials.clone()));
        }
        tokio::fs::create_dir_all(output_dir).await.or_raise(|| ErrorKind::Io)?;

        tracing::debug!(program = %program.display(), "Running download tool");
        let output = self.command(&program, url, output_dir).output().await.or_raise(|| ErrorKind::Io)?;
        match output.status.code() {
            Some(0) => Ok(()),
            Some(code) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                tracing::warn!(code, stderr = %stderr.trim(), "Download tool failed");
                exn::bail!(ErrorKind::ToolFailed(code))
            },
            None => exn::bail!(ErrorKind::Terminated),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    /// Writes an executable shell script standing in for the download tool.
    fn script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("fake-fanficfare");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn credentials(dir: &Path) -> PathBuf {
        let path = dir.join("personal.ini");
        std::fs::write(&path, "[defaults]\n").unwrap();
        path
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let program = script(dir.path(), "exit 0");
        let fetcher = CommandFetcher::new(Some(program), dir.path().join("missing.ini"), vec![]);
        let err = fetcher.fetch("https://example.com/s/1", &dir.path().join("out")).await.unwrap_err();
        assert!(err.is_configuration_error());
        // The tool never ran, so the output directory was never created.
        assert!(!dir.path().join("out").exists());
    }

    #[tokio::test]
    async fn test_arguments() {
        let dir = tempfile::tempdir().unwrap();
        // Writes its arguments into the output directory (4th argument).
        let program = script(dir.path(), r#"echo "$@" > "$4/args.txt""#);
        let creds = credentials(dir.path());
        let output = dir.path().join("out");
        let fetcher = CommandFetcher::new(Some(program), &creds, vec!["--force".to_string()]);
        fetcher.fetch("https://example.com/s/1", &output).await.unwrap();
        let args = std::fs::read_to_string(output.join("args.txt")).unwrap();
        assert_eq!(
            args.trim(),
            format!("--personal-ini {} --output-dir {} --force https://example.com/s/1", creds.display(), output.display())
        );
    }

    #[tokio::test]
    async fn test_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let program = script(dir.path(), "echo 'story not found' >&2; exit 3");
        let fetcher = CommandFetcher::new(Some(program), credentials(dir.path()), vec![]);
        let err = fetcher.fetch("https://example.com/s/1", dir.path()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::ToolFailed(3)));
    }
}
