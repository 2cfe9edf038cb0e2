//! Effect executors
//!
//! The planner only declares effects; these traits carry them out. The host
//! implementations write files with `tokio::fs` and drive `systemctl` with
//! `tokio::process`.

use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::process::Output;

use async_trait::async_trait;
use nix::unistd::{chown, Gid, Group, Uid, User};
use tokio::process::Command;

use super::{FileEffect, FileState, ServiceEffect};

/// Search path for every systemctl invocation
pub const SEARCH_PATH: &str = "/bin:/usr/bin:/usr/local/bin";

/// Whether an executor had to modify the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Changed,
    Unchanged,
}

impl Change {
    pub fn changed(&self) -> bool {
        matches!(self, Change::Changed)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unknown {kind}: {name}")]
    UnknownPrincipal { kind: &'static str, name: String },

    #[error("Failed to look up {kind} {name}: {source}")]
    Lookup {
        kind: &'static str,
        name: String,
        #[source]
        source: nix::Error,
    },

    #[error("Failed to change ownership of {}: {source}", .path.display())]
    Chown {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },

    #[error("Failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` failed: {detail}")]
    Command { command: String, detail: String },
}

#[async_trait]
pub trait FileExecutor: Send + Sync {
    async fn apply(&self, effect: &FileEffect) -> Result<Change, ExecError>;
}

#[async_trait]
pub trait ServiceExecutor: Send + Sync {
    async fn apply(&self, effect: &ServiceEffect) -> Result<Change, ExecError>;
}

#[async_trait]
pub trait ReloadTrigger: Send + Sync {
    async fn reload(&self) -> Result<(), ExecError>;
}

/// Writes and removes unit files on the local filesystem
#[derive(Debug, Clone)]
pub struct HostFiles {
    manage_ownership: bool,
}

impl Default for HostFiles {
    fn default() -> Self {
        Self::new()
    }
}

impl HostFiles {
    pub fn new() -> Self {
        Self {
            manage_ownership: true,
        }
    }

    /// Leave owner/group untouched (unprivileged runs)
    pub fn without_ownership(mut self) -> Self {
        self.manage_ownership = false;
        self
    }

    async fn remove(&self, path: &Path) -> Result<Change, ExecError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                log::info!("Removed {}", path.display());
                Ok(Change::Changed)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Change::Unchanged),
            Err(e) => Err(io_error(path, e)),
        }
    }

    /// Owner and group ids, or None when ownership is not managed
    fn ownership(&self, effect: &FileEffect) -> Result<Option<(Uid, Gid)>, ExecError> {
        if !self.manage_ownership {
            return Ok(None);
        }
        let uid = principal("user", &effect.owner, User::from_name(&effect.owner))?.uid;
        let gid = principal("group", &effect.group, Group::from_name(&effect.group))?.gid;
        Ok(Some((uid, gid)))
    }

    /// New content is staged next to the target with its final mode and
    /// owner, then renamed over it. A failure leaves the old file in place.
    async fn write(&self, effect: &FileEffect, content: &str) -> Result<Change, ExecError> {
        let path = &effect.path;
        let ownership = self.ownership(effect)?;

        let current = match tokio::fs::read(path).await {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(io_error(path, e)),
        };
        if current.as_deref() == Some(content.as_bytes()) {
            return fix_attributes(path, effect.mode, ownership).await;
        }

        let staged = staging_path(path)?;
        if let Err(e) = stage(&staged, path, content, effect.mode, ownership).await {
            let _ = tokio::fs::remove_file(&staged).await;
            return Err(e);
        }
        log::info!("Wrote {}", path.display());
        Ok(Change::Changed)
    }
}

async fn stage(
    staged: &Path,
    path: &Path,
    content: &str,
    mode: u32,
    ownership: Option<(Uid, Gid)>,
) -> Result<(), ExecError> {
    tokio::fs::write(staged, content)
        .await
        .map_err(|e| io_error(staged, e))?;
    fix_attributes(staged, mode, ownership).await?;
    tokio::fs::rename(staged, path)
        .await
        .map_err(|e| io_error(path, e))
}

/// Bring mode and (optionally) ownership of an existing file in line
async fn fix_attributes(
    path: &Path,
    mode: u32,
    ownership: Option<(Uid, Gid)>,
) -> Result<Change, ExecError> {
    let mut change = Change::Unchanged;
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|e| io_error(path, e))?;

    if meta.permissions().mode() & 0o7777 != mode {
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
            .await
            .map_err(|e| io_error(path, e))?;
        log::debug!("{}: mode set to {:o}", path.display(), mode);
        change = Change::Changed;
    }

    if let Some((uid, gid)) = ownership {
        if meta.uid() != uid.as_raw() || meta.gid() != gid.as_raw() {
            chown(path, Some(uid), Some(gid)).map_err(|source| ExecError::Chown {
                path: path.to_path_buf(),
                source,
            })?;
            log::debug!("{}: owner set to {}:{}", path.display(), uid, gid);
            change = Change::Changed;
        }
    }

    Ok(change)
}

/// Hidden sibling of `path` used while staging new content
fn staging_path(path: &Path) -> Result<PathBuf, ExecError> {
    let Some(name) = path.file_name() else {
        return Err(io_error(
            path,
            std::io::Error::from(std::io::ErrorKind::InvalidInput),
        ));
    };
    Ok(path.with_file_name(format!(".{}.sysunit-new", name.to_string_lossy())))
}

#[async_trait]
impl FileExecutor for HostFiles {
    async fn apply(&self, effect: &FileEffect) -> Result<Change, ExecError> {
        match &effect.state {
            FileState::Present { content } => self.write(effect, content).await,
            FileState::Absent => self.remove(&effect.path).await,
        }
    }
}

fn io_error(path: &Path, source: std::io::Error) -> ExecError {
    ExecError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn principal<T>(
    kind: &'static str,
    name: &str,
    found: Result<Option<T>, nix::Error>,
) -> Result<T, ExecError> {
    match found {
        Ok(Some(entry)) => Ok(entry),
        Ok(None) => Err(ExecError::UnknownPrincipal {
            kind,
            name: name.to_string(),
        }),
        Err(source) => Err(ExecError::Lookup {
            kind,
            name: name.to_string(),
            source,
        }),
    }
}

/// Runs systemctl with the restricted search path
#[derive(Debug, Clone)]
struct SystemctlCommand {
    program: String,
}

impl SystemctlCommand {
    async fn output(&self, args: &[&str]) -> Result<Output, ExecError> {
        Command::new(&self.program)
            .args(args)
            .env("PATH", SEARCH_PATH)
            .output()
            .await
            .map_err(|source| ExecError::Spawn {
                command: self.describe(args),
                source,
            })
    }

    /// Exit status only; used for is-enabled / is-active probes
    async fn succeeds(&self, args: &[&str]) -> Result<bool, ExecError> {
        Ok(self.output(args).await?.status.success())
    }

    async fn run(&self, args: &[&str]) -> Result<(), ExecError> {
        let output = self.output(args).await?;
        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let detail = if stderr.is_empty() {
            output.status.to_string()
        } else {
            stderr
        };
        Err(ExecError::Command {
            command: self.describe(args),
            detail,
        })
    }

    fn describe(&self, args: &[&str]) -> String {
        std::iter::once(self.program.as_str())
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Enables and starts services through systemctl
#[derive(Debug, Clone)]
pub struct Systemctl {
    cmd: SystemctlCommand,
}

impl Default for Systemctl {
    fn default() -> Self {
        Self::with_program("systemctl")
    }
}

impl Systemctl {
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            cmd: SystemctlCommand {
                program: program.into(),
            },
        }
    }
}

#[async_trait]
impl ServiceExecutor for Systemctl {
    async fn apply(&self, effect: &ServiceEffect) -> Result<Change, ExecError> {
        let name = effect.name.as_str();
        let mut change = Change::Unchanged;

        if effect.enable && !self.cmd.succeeds(&["is-enabled", "--quiet", name]).await? {
            self.cmd.run(&["enable", name]).await?;
            log::info!("Enabled {}", name);
            change = Change::Changed;
        }

        if effect.running && !self.cmd.succeeds(&["is-active", "--quiet", name]).await? {
            self.cmd.run(&["start", name]).await?;
            log::info!("Started {}", name);
            change = Change::Changed;
        }

        Ok(change)
    }
}

/// `systemctl daemon-reload`
#[derive(Debug, Clone)]
pub struct SystemctlReload {
    cmd: SystemctlCommand,
}

impl Default for SystemctlReload {
    fn default() -> Self {
        Self::with_program("systemctl")
    }
}

impl SystemctlReload {
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            cmd: SystemctlCommand {
                program: program.into(),
            },
        }
    }
}

#[async_trait]
impl ReloadTrigger for SystemctlReload {
    async fn reload(&self) -> Result<(), ExecError> {
        self.cmd.run(&["daemon-reload"]).await?;
        log::info!("Reloaded systemd manager configuration");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::{FILE_GROUP, FILE_MODE, FILE_OWNER};
    use std::sync::atomic::{AtomicU32, Ordering};

    static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

    fn unique_test_dir() -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let dir = PathBuf::from(format!("/tmp/sysunit-exec-{}-{}", std::process::id(), id));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn file_effect(path: PathBuf, state: FileState) -> FileEffect {
        FileEffect {
            path,
            state,
            owner: FILE_OWNER.to_string(),
            group: FILE_GROUP.to_string(),
            mode: FILE_MODE,
        }
    }

    fn present(content: &str) -> FileState {
        FileState::Present {
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn test_write_then_unchanged() {
        let dir = unique_test_dir();
        let files = HostFiles::new().without_ownership();
        let effect = file_effect(dir.join("a.service"), present("[Unit]\n"));

        assert_eq!(files.apply(&effect).await.unwrap(), Change::Changed);
        assert_eq!(std::fs::read_to_string(&effect.path).unwrap(), "[Unit]\n");
        let mode = std::fs::metadata(&effect.path).unwrap().permissions().mode();
        assert_eq!(mode & 0o7777, 0o644);

        assert_eq!(files.apply(&effect).await.unwrap(), Change::Unchanged);
    }

    #[tokio::test]
    async fn test_content_drift_is_corrected() {
        let dir = unique_test_dir();
        let files = HostFiles::new().without_ownership();
        let effect = file_effect(dir.join("a.service"), present("new\n"));
        std::fs::write(&effect.path, "old\n").unwrap();
        std::fs::set_permissions(&effect.path, std::fs::Permissions::from_mode(0o644)).unwrap();

        assert_eq!(files.apply(&effect).await.unwrap(), Change::Changed);
        assert_eq!(std::fs::read_to_string(&effect.path).unwrap(), "new\n");
    }

    #[tokio::test]
    async fn test_mode_drift_is_corrected() {
        let dir = unique_test_dir();
        let files = HostFiles::new().without_ownership();
        let effect = file_effect(dir.join("a.service"), present("same\n"));
        std::fs::write(&effect.path, "same\n").unwrap();
        std::fs::set_permissions(&effect.path, std::fs::Permissions::from_mode(0o600)).unwrap();

        assert_eq!(files.apply(&effect).await.unwrap(), Change::Changed);
        let mode = std::fs::metadata(&effect.path).unwrap().permissions().mode();
        assert_eq!(mode & 0o7777, 0o644);
    }

    #[tokio::test]
    async fn test_remove() {
        let dir = unique_test_dir();
        let files = HostFiles::new().without_ownership();
        let effect = file_effect(dir.join("gone.service"), FileState::Absent);

        assert_eq!(files.apply(&effect).await.unwrap(), Change::Unchanged);
        std::fs::write(&effect.path, "x").unwrap();
        assert_eq!(files.apply(&effect).await.unwrap(), Change::Changed);
        assert!(!effect.path.exists());
    }

    #[tokio::test]
    async fn test_missing_directory_is_an_error() {
        let dir = unique_test_dir();
        let files = HostFiles::new().without_ownership();
        let effect = file_effect(dir.join("missing").join("a.service"), present("x"));

        let err = files.apply(&effect).await.unwrap_err();
        assert!(matches!(err, ExecError::Io { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_ownership_when_root() {
        if !Uid::effective().is_root() {
            return;
        }
        let dir = unique_test_dir();
        let effect = file_effect(dir.join("a.service"), present("x"));
        HostFiles::new().apply(&effect).await.unwrap();

        let meta = std::fs::metadata(&effect.path).unwrap();
        assert_eq!(meta.uid(), 0);
        assert_eq!(meta.gid(), 0);
    }

    #[tokio::test]
    async fn test_unknown_owner() {
        let dir = unique_test_dir();
        let mut effect = file_effect(dir.join("a.service"), present("x"));
        effect.owner = "no-such-user-sysunit".to_string();

        let err = HostFiles::new().apply(&effect).await.unwrap_err();
        assert!(matches!(err, ExecError::UnknownPrincipal { kind: "user", .. }));
    }

    #[tokio::test]
    async fn test_unknown_owner_keeps_old_content() {
        let dir = unique_test_dir();
        let mut effect = file_effect(dir.join("a.service"), present("new\n"));
        std::fs::write(&effect.path, "old\n").unwrap();
        effect.owner = "no-such-user-sysunit".to_string();

        assert!(HostFiles::new().apply(&effect).await.is_err());
        assert_eq!(std::fs::read_to_string(&effect.path).unwrap(), "old\n");
        assert!(!staging_path(&effect.path).unwrap().exists());

        // the change is still pending, so a later good run reports it
        let files = HostFiles::new().without_ownership();
        assert_eq!(files.apply(&effect).await.unwrap(), Change::Changed);
        assert_eq!(std::fs::read_to_string(&effect.path).unwrap(), "new\n");
    }

    #[test]
    fn test_lookup_failure_keeps_errno() {
        let err = principal::<User>("user", "root", Err(nix::Error::EACCES)).unwrap_err();
        assert!(matches!(
            err,
            ExecError::Lookup {
                kind: "user",
                source: nix::Error::EACCES,
                ..
            }
        ));
        assert!(std::error::Error::source(&err).is_some());

        let err = principal::<Group>("group", "nobody-here", Ok(None)).unwrap_err();
        assert!(matches!(err, ExecError::UnknownPrincipal { kind: "group", .. }));
    }

    #[test]
    fn test_staging_path_is_hidden_sibling() {
        assert_eq!(
            staging_path(Path::new("/etc/systemd/system/a.service")).unwrap(),
            PathBuf::from("/etc/systemd/system/.a.service.sysunit-new")
        );
    }

    fn service_effect(name: &str) -> ServiceEffect {
        ServiceEffect {
            name: name.to_string(),
            running: true,
            enable: true,
            provider: "systemd".to_string(),
        }
    }

    #[tokio::test]
    async fn test_service_already_in_state() {
        // `true` answers every probe with success
        let systemctl = Systemctl::with_program("/bin/true");
        let change = systemctl.apply(&service_effect("unittest")).await.unwrap();
        assert_eq!(change, Change::Unchanged);
    }

    #[tokio::test]
    async fn test_service_failure_is_reported() {
        let systemctl = Systemctl::with_program("/bin/false");
        let err = systemctl.apply(&service_effect("unittest")).await.unwrap_err();
        match err {
            ExecError::Command { command, .. } => assert_eq!(command, "/bin/false enable unittest"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_reload_command() {
        assert!(SystemctlReload::with_program("/bin/true").reload().await.is_ok());

        let err = SystemctlReload::with_program("/bin/false")
            .reload()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("/bin/false daemon-reload"));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let err = SystemctlReload::with_program("/nonexistent/systemctl")
            .reload()
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
    }
}
