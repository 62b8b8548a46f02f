use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "configsm.yaml";
pub const SYSTEM_CONFIG: &str = "/etc/fleet-maint/configsm.yaml";

/// Resolve the configuration file.
///
/// Priority:
/// 1. `--config` flag / `MAINT_CONFIG` env var (passed in as `explicit`)
/// 2. `configsm.yaml` in the current directory
/// 3. the system-wide file under `/etc/fleet-maint/`
/// 4. fall back to the current-directory path so the load error names it
pub fn resolve_config(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    resolve_from(&cwd, Path::new(SYSTEM_CONFIG))
}

fn resolve_from(cwd: &Path, system: &Path) -> PathBuf {
    let local = cwd.join(CONFIG_FILE);
    if local.is_file() {
        return local;
    }
    if system.is_file() {
        return system.to_path_buf();
    }
    local
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn explicit_path_wins() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("other.yaml");
        assert_eq!(resolve_config(Some(&path)), path);
    }

    #[test]
    fn local_file_before_system_file() {
        let cwd = TempDir::new().unwrap();
        let etc = TempDir::new().unwrap();
        let system = etc.path().join(CONFIG_FILE);
        std::fs::write(&system, "").unwrap();

        assert_eq!(resolve_from(cwd.path(), &system), system);

        std::fs::write(cwd.path().join(CONFIG_FILE), "").unwrap();
        assert_eq!(
            resolve_from(cwd.path(), &system),
            cwd.path().join(CONFIG_FILE)
        );
    }

    #[test]
    fn nothing_found_points_at_cwd() {
        let cwd = TempDir::new().unwrap();
        let missing = cwd.path().join("nope").join(CONFIG_FILE);
        assert_eq!(
            resolve_from(cwd.path(), &missing),
            cwd.path().join(CONFIG_FILE)
        );
    }
}
