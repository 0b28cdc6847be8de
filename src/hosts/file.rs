//! File-backed host table.
//!
//! Bindings live in one marked block of a hosts file:
//!
//! ```text
//! # hostalias:begin (managed, do not edit)
//! 127.0.0.1 api.local
//! # hostalias:end
//! ```
//!
//! Lines outside the block are preserved byte-for-byte.

use std::fs;
use std::io::ErrorKind;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use crate::config::validation::check_hostname;
use crate::hosts::{Binding, HostTable, HostsError};

const BEGIN_MARKER: &str = "# hostalias:begin (managed, do not edit)";
const BEGIN_PREFIX: &str = "# hostalias:begin";
const END_MARKER: &str = "# hostalias:end";

/// Manages the hostalias block of a hosts file.
///
/// # Lifecycle
///
/// 1. [`clear`](HostTable::clear) and [`set`](HostTable::set) stage changes in memory.
/// 2. [`apply`](HostTable::apply) rewrites the file once.
///
/// A `set` without a prior `clear` starts from the block currently on disk,
/// so existing bindings survive.
///
/// # Permissions
///
/// `/etc/hosts` requires root. The caller must handle elevation.
#[derive(Debug)]
pub struct HostsFile {
    path: PathBuf,
    staged: Option<Vec<Binding>>,
}

impl HostsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            staged: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the committed bindings from disk.
    pub fn bindings(&self) -> Result<Vec<Binding>, HostsError> {
        let content = self.read()?;
        Ok(split_managed(&content, &self.path)?.1)
    }

    fn read(&self) -> Result<String, HostsError> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(source) => Err(self.io_error(source)),
        }
    }

    fn io_error(&self, source: std::io::Error) -> HostsError {
        HostsError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }

    /// Writes via a temp sibling + rename; falls back to an in-place write
    /// when the rename is refused (e.g. a bind-mounted `/etc/hosts`).
    fn write(&self, content: &str) -> Result<(), HostsError> {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "hosts".to_string());
        let tmp = self.path.with_file_name(format!(".{file_name}.hostalias.tmp"));

        let staged = fs::write(&tmp, content).and_then(|()| {
            if let Ok(meta) = fs::metadata(&self.path) {
                fs::set_permissions(&tmp, meta.permissions())?;
            }
            fs::rename(&tmp, &self.path)
        });

        if let Err(e) = staged {
            tracing::debug!(path = %self.path.display(), error = %e, "Atomic replace failed, writing in place");
            let _ = fs::remove_file(&tmp);
            fs::write(&self.path, content).map_err(|source| self.io_error(source))?;
        }
        Ok(())
    }
}

impl HostTable for HostsFile {
    fn clear(&mut self) -> Result<(), HostsError> {
        self.staged = Some(Vec::new());
        Ok(())
    }

    fn set(&mut self, ip: IpAddr, hostname: &str) -> Result<(), HostsError> {
        check_hostname(hostname).map_err(|reason| HostsError::InvalidHostname {
            hostname: hostname.to_string(),
            reason,
        })?;
        let hostname = hostname.to_ascii_lowercase();

        if self.staged.is_none() {
            self.staged = Some(self.bindings()?);
        }
        let staged = self.staged.get_or_insert_with(Vec::new);
        match staged.iter_mut().find(|b| b.hostname == hostname) {
            Some(existing) => existing.ip = ip,
            None => staged.push(Binding { ip, hostname }),
        }
        Ok(())
    }

    fn apply(&mut self) -> Result<(), HostsError> {
        let Some(staged) = self.staged.take() else {
            return Ok(());
        };

        let current = self.read()?;
        let (mut content, _) = split_managed(&current, &self.path)?;

        if !staged.is_empty() {
            if !content.is_empty() && !content.ends_with('\n') {
                content.push('\n');
            }
            content.push_str(BEGIN_MARKER);
            content.push('\n');
            for binding in &staged {
                content.push_str(&binding.to_string());
                content.push('\n');
            }
            content.push_str(END_MARKER);
            content.push('\n');
        }

        if content == current {
            tracing::debug!(path = %self.path.display(), "Hosts file already up to date");
            return Ok(());
        }

        self.write(&content)?;
        tracing::info!(
            path = %self.path.display(),
            bindings = staged.len(),
            "Hosts file updated"
        );
        Ok(())
    }
}

/// Splits a hosts file into the text outside the managed block and the
/// bindings inside it.
fn split_managed(content: &str, path: &Path) -> Result<(String, Vec<Binding>), HostsError> {
    let mut outside = String::with_capacity(content.len());
    let mut bindings = Vec::new();
    let mut in_block = false;

    for line in content.split_inclusive('\n') {
        let trimmed = line.trim();
        if !in_block {
            if trimmed.starts_with(BEGIN_PREFIX) {
                in_block = true;
            } else {
                outside.push_str(line);
            }
            continue;
        }

        if trimmed == END_MARKER {
            in_block = false;
            continue;
        }
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let mut fields = trimmed.split_whitespace();
        let ip = fields.next().and_then(|ip| ip.parse::<IpAddr>().ok());
        match ip {
            Some(ip) => bindings.extend(fields.map(|hostname| Binding {
                ip,
                hostname: hostname.to_ascii_lowercase(),
            })),
            None => tracing::warn!(line = %trimmed, "Skipping malformed line in managed hosts block"),
        }
    }

    if in_block {
        return Err(HostsError::Malformed {
            path: path.display().to_string(),
        });
    }
    Ok((outside, bindings))
}
