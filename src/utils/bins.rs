use std::{
    env,
    path::{Path, PathBuf},
};

use anyhow::{Result, bail};

/// Fails listing every binary that cannot be found on PATH.
pub fn ensure_bins<I, S>(bins: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let missing: Vec<String> = bins
        .into_iter()
        .filter(|b| which(b.as_ref()).is_none())
        .map(|b| b.as_ref().to_string())
        .collect();
    if !missing.is_empty() {
        bail!("missing required binaries in PATH: {}", missing.join(", "));
    }
    Ok(())
}

pub fn which(bin: &str) -> Option<PathBuf> {
    let p = Path::new(bin);
    if p.components().count() > 1 {
        return is_executable(p).then(|| p.to_path_buf());
    }
    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .map(|dir| dir.join(bin))
        .find(|cand| is_executable(cand))
}

fn is_executable(p: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(p) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}
