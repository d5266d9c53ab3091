//! Locate the debugger executable (`cdb.exe`) on disk.

use cdbg_config::ProcessConfig;
use std::path::{Path, PathBuf};

/// Ordered candidate locations probed when no explicit override is given,
/// covering the common "Debugging Tools for Windows" install layouts.
const CANDIDATES: &[&str] = &[
    r"C:\Program Files (x86)\Windows Kits\10\Debuggers\x64\cdb.exe",
    r"C:\Program Files\Windows Kits\10\Debuggers\x64\cdb.exe",
    r"C:\Program Files (x86)\Windows Kits\10\Debuggers\x86\cdb.exe",
    r"C:\Debuggers\cdb.exe",
];

#[derive(Debug, thiserror::Error)]
#[error("debugger executable not found; probed {probed:?}")]
pub struct NotFound {
    pub probed: Vec<PathBuf>,
}

/// Probe an ordered list of candidate filesystem locations for the
/// debugger executable. An explicit `config.executable_override` wins
/// outright. Falls back to `which::which("cdb")` so the crate is testable
/// on non-Windows hosts with a fake executable on `PATH`.
pub fn locate_debugger(config: &ProcessConfig) -> Result<PathBuf, NotFound> {
    if let Some(path) = &config.executable_override {
        return Ok(path.clone());
    }

    locate_in(CANDIDATES, |name| which::which(name).ok())
}

fn locate_in(
    candidates: &[&str],
    path_lookup: impl Fn(&str) -> Option<PathBuf>,
) -> Result<PathBuf, NotFound> {
    let mut probed = Vec::new();
    for candidate in candidates {
        let path = Path::new(candidate);
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        probed.push(path.to_path_buf());
    }

    if let Some(found) = path_lookup("cdb") {
        return Ok(found);
    }

    Err(NotFound { probed })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_override_wins() {
        let mut config = ProcessConfig::default();
        config.executable_override = Some(PathBuf::from("/opt/custom/cdb.exe"));
        let found = locate_debugger(&config).unwrap();
        assert_eq!(found, PathBuf::from("/opt/custom/cdb.exe"));
    }

    #[test]
    fn finds_existing_candidate_file() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("cdb.exe");
        std::fs::write(&fake, b"").unwrap();
        let candidate = fake.to_string_lossy().to_string();
        let found = locate_in(&[&candidate], |_| None).unwrap();
        assert_eq!(found, fake);
    }

    #[test]
    fn falls_back_to_path_lookup() {
        let found = locate_in(&["/definitely/not/real/cdb.exe"], |name| {
            assert_eq!(name, "cdb");
            Some(PathBuf::from("/usr/bin/cdb"))
        })
        .unwrap();
        assert_eq!(found, PathBuf::from("/usr/bin/cdb"));
    }

    #[test]
    fn not_found_lists_probed_candidates() {
        let err = locate_in(&["/nope/a", "/nope/b"], |_| None).unwrap_err();
        assert_eq!(err.probed.len(), 2);
    }
}
