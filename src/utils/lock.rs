#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::{
    fs::{File, OpenOptions},
    io,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use fs2::FileExt;

use crate::utils::fsx::ensure_dir;

/// Exclusive advisory lock held for the lifetime of a run.
pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("path", &self.path)
            .finish()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

impl LockGuard {
    pub fn try_acquire(name: &str) -> Result<Self> {
        Self::try_acquire_in(&lock_dir(), name)
    }

    fn try_acquire_in(dir: &Path, name: &str) -> Result<Self> {
        ensure_dir(dir).with_context(|| format!("create lock dir {}", dir.display()))?;
        let path = dir.join(format!("{}.lock", sanitize_name(name)));
        let file = open_lockfile(&path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self { file, path }),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                bail!("another migration holds lock: {}", path.display())
            }
            Err(e) => Err(e).with_context(|| format!("flock {}", path.display())),
        }
    }
}

fn open_lockfile(path: &Path) -> Result<File> {
    let mut opts = OpenOptions::new();
    opts.read(true).write(true).create(true).truncate(false);
    #[cfg(unix)]
    {
        opts.mode(0o644);
    }
    opts.open(path)
        .with_context(|| format!("open lockfile {}", path.display()))
}

fn lock_dir() -> PathBuf {
    let var_lock = Path::new("/var/lock");
    if is_writable_dir(var_lock) {
        var_lock.to_path_buf()
    } else {
        std::env::temp_dir()
    }
}

fn is_writable_dir(dir: &Path) -> bool {
    if !dir.is_dir() {
        return false;
    }
    let marker = dir.join(".pvmigrate_lock_check");
    let ok = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&marker)
        .is_ok();
    if ok {
        let _ = std::fs::remove_file(marker);
    }
    ok
}

fn sanitize_name(s: &str) -> String {
    let filtered: String = s
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("pvmigrate_{filtered}")
}
