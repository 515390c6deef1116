//! LibreOffice (`soffice --headless`) as the office engine.
//!
//! An application instance is an isolated user-profile directory; every
//! engine process for that instance runs against it, so concurrent jobs never
//! contend for the default profile's lock. Quitting removes the profile.
//! Each export runs one engine process to completion under a deadline. The
//! launcher runs in its own process group and forks the real engine into it;
//! on timeout or error the whole group is killed.

use super::{AutomationEngine, DocumentFamily, ExportFormat, OfficeApplication, OfficeDocument, OpenMode};
use crate::error::ConvertError;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, warn};

const ENGINE: &str = "soffice";
const TEXT_FILTER: &str = "txt:Text (encoded):UTF8";

/// [`AutomationEngine`] driving a LibreOffice binary.
#[derive(Debug, Clone)]
pub struct SofficeEngine {
    binary: PathBuf,
    timeout: Duration,
}

impl SofficeEngine {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

impl AutomationEngine for SofficeEngine {
    fn name(&self) -> &str {
        ENGINE
    }

    fn launch(&self, family: DocumentFamily) -> Result<Box<dyn OfficeApplication>, ConvertError> {
        let unavailable = |detail: String| ConvertError::AutomationUnavailable {
            engine: ENGINE.to_string(),
            detail,
        };

        // Run `--version` first so a missing install is reported as such rather
        // than as a failed conversion.
        let mut version = Command::new(&self.binary);
        version.arg("--version");
        let outcome = run(version, self.timeout)
            .map_err(|e| unavailable(format!("{}: {e}", self.binary.display())))?;
        if !outcome.status.success() {
            return Err(unavailable(format!(
                "{} --version exited with {}",
                self.binary.display(),
                outcome.status
            )));
        }

        let profile = tempfile::Builder::new()
            .prefix("docconv-soffice-")
            .tempdir()
            .map_err(|e| unavailable(format!("cannot create engine profile: {e}")))?;
        debug!("{ENGINE}: launched {family} instance, profile {}", profile.path().display());

        Ok(Box::new(SofficeApplication {
            session: Arc::new(Session {
                binary: self.binary.clone(),
                timeout: self.timeout,
                profile_dir: profile.path().to_path_buf(),
            }),
            profile: Some(profile),
        }))
    }
}

/// What every process of one instance shares.
#[derive(Debug)]
struct Session {
    binary: PathBuf,
    timeout: Duration,
    profile_dir: PathBuf,
}

impl Session {
    /// Run one headless conversion of `source` into `out_dir` and return the
    /// produced file.
    fn convert(&self, source: &Path, filter: &str, extension: &str, out_dir: &Path) -> Result<PathBuf, ConvertError> {
        let failed = |reason: String| ConvertError::ConversionFailed {
            document: source.display().to_string(),
            reason,
        };

        let mut cmd = Command::new(&self.binary);
        cmd.arg("--headless")
            .arg("--norestore")
            .arg("--nolockcheck")
            .arg(format!("-env:UserInstallation=file://{}", self.profile_dir.display()))
            .arg("--convert-to")
            .arg(filter)
            .arg("--outdir")
            .arg(out_dir)
            .arg(source);

        let outcome = run(cmd, self.timeout).map_err(|e| failed(e.to_string()))?;
        if !outcome.status.success() {
            return Err(failed(format!(
                "engine exited with {}: {}",
                outcome.status,
                outcome.stderr.trim()
            )));
        }

        let stem = source
            .file_stem()
            .ok_or_else(|| failed("source has no file name".into()))?;
        let produced = out_dir.join(format!("{}.{extension}", stem.to_string_lossy()));
        if !produced.is_file() {
            return Err(failed(format!(
                "engine produced no output: {}",
                outcome.stderr.trim()
            )));
        }
        Ok(produced)
    }
}

struct SofficeApplication {
    session: Arc<Session>,
    profile: Option<TempDir>,
}

impl OfficeApplication for SofficeApplication {
    fn open(&mut self, path: &Path, mode: OpenMode) -> Result<Box<dyn OfficeDocument>, ConvertError> {
        if self.profile.is_none() {
            return Err(ConvertError::ConversionFailed {
                document: path.display().to_string(),
                reason: "application has already quit".into(),
            });
        }
        std::fs::File::open(path).map_err(|e| ConvertError::ConversionFailed {
            document: path.display().to_string(),
            reason: format!("cannot open: {e}"),
        })?;
        Ok(Box::new(SofficeDocument {
            session: self.session.clone(),
            source: path.to_path_buf(),
            mode,
            open: true,
        }))
    }

    fn quit(&mut self) -> Result<(), ConvertError> {
        match self.profile.take() {
            Some(profile) => profile.close().map_err(|e| ConvertError::Internal(format!(
                "removing engine profile {}: {e}",
                self.session.profile_dir.display()
            ))),
            None => Ok(()),
        }
    }
}

impl Drop for SofficeApplication {
    fn drop(&mut self) {
        if self.profile.is_some() {
            warn!("{ENGINE}: instance dropped without quit; removing profile");
            let _ = self.quit();
        }
    }
}

struct SofficeDocument {
    session: Arc<Session>,
    source: PathBuf,
    mode: OpenMode,
    open: bool,
}

impl SofficeDocument {
    fn ensure_open(&self) -> Result<(), ConvertError> {
        if self.open {
            Ok(())
        } else {
            Err(ConvertError::ConversionFailed {
                document: self.source.display().to_string(),
                reason: "document is closed".into(),
            })
        }
    }
}

impl OfficeDocument for SofficeDocument {
    fn save_as(&mut self, dest: &Path, format: ExportFormat) -> Result<(), ConvertError> {
        self.ensure_open()?;
        let failed = |reason: String| ConvertError::ConversionFailed {
            document: self.source.display().to_string(),
            reason,
        };
        if self.mode != OpenMode::ForExport {
            return Err(failed("document was opened read-only".into()));
        }

        // Export next to the destination so the final rename stays on one
        // filesystem and the destination never holds a partial file.
        let parent = dest
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let staging = tempfile::Builder::new()
            .prefix(".export-")
            .tempdir_in(parent)
            .map_err(|e| failed(format!("cannot stage export in {}: {e}", parent.display())))?;

        let filter = format!("pdf:{}", format.filter_name());
        let produced = self
            .session
            .convert(&self.source, &filter, "pdf", staging.path())?;
        std::fs::rename(&produced, dest)
            .map_err(|e| failed(format!("moving export to {}: {e}", dest.display())))?;
        Ok(())
    }

    fn read_text(&mut self) -> Result<String, ConvertError> {
        self.ensure_open()?;
        let staging = tempfile::tempdir().map_err(|e| ConvertError::ConversionFailed {
            document: self.source.display().to_string(),
            reason: format!("cannot stage text export: {e}"),
        })?;
        let produced = self
            .session
            .convert(&self.source, TEXT_FILTER, "txt", staging.path())?;
        let bytes = std::fs::read(&produced).map_err(|e| ConvertError::ConversionFailed {
            document: self.source.display().to_string(),
            reason: format!("reading text export: {e}"),
        })?;
        Ok(String::from_utf8_lossy(&bytes)
            .trim_start_matches('\u{feff}')
            .to_string())
    }

    fn close(&mut self) -> Result<(), ConvertError> {
        self.open = false;
        Ok(())
    }
}

// ── Process control ──────────────────────────────────────────────────────

struct Outcome {
    status: ExitStatus,
    stderr: String,
}

/// Kills the process group of one engine run when dropped, unless disarmed.
struct GroupGuard(Option<u32>);

impl GroupGuard {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if let Some(pgid) = self.0.take() {
            warn!("{ENGINE}: killing engine process group {}", pgid);
            kill_group(pgid);
        }
    }
}

#[cfg(unix)]
fn kill_group(pgid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return;
    };
    // SAFETY: killpg only sends a signal; the group was created for this run.
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } != 0 {
        debug!("killpg({}): {}", pgid, io::Error::last_os_error());
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}

/// Run `cmd` to completion, killing its process group after `timeout`.
///
/// Called from blocking threads; the engine process is driven on a private
/// current-thread runtime so stderr is drained while the process runs.
fn run(cmd: Command, timeout: Duration) -> io::Result<Outcome> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(run_async(cmd, timeout))
}

async fn run_async(mut cmd: Command, timeout: Duration) -> io::Result<Outcome> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let mut cmd = tokio::process::Command::from(cmd);
    cmd.kill_on_drop(true);
    let child = cmd.spawn()?;
    let group = GroupGuard(child.id());

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => output?,
        Err(_) => {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("engine did not finish within {}s", timeout.as_secs()),
            ))
        }
    };
    group.disarm();

    Ok(Outcome {
        status: output.status,
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
