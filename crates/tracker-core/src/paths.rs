//! Default on-disk locations for the stores.

use std::path::PathBuf;

const APP_DIR: &str = "support-tracker";

fn env_dir(var: &str) -> Result<Option<PathBuf>, std::io::Error> {
    match std::env::var_os(var) {
        Some(value) if value.is_empty() => Err(std::io::Error::other(format!(
            "{var} is set to an empty value"
        ))),
        Some(value) => Ok(Some(PathBuf::from(value))),
        None => Ok(None),
    }
}

/// The application directory under an XDG base, with the usual `$HOME`
/// fallback when the XDG variable is unset.
fn app_dir(xdg_var: &str, home_suffix: &str) -> Result<PathBuf, std::io::Error> {
    let base = match env_dir(xdg_var)? {
        Some(dir) => dir,
        None => {
            let home = env_dir("HOME")?
                .ok_or_else(|| std::io::Error::other("no home directory ($HOME is unset)"))?;
            home.join(home_suffix)
        }
    };
    Ok(base.join(APP_DIR))
}

/// Default path of the settings document.
pub fn settings_path() -> Result<PathBuf, std::io::Error> {
    Ok(app_dir("XDG_CONFIG_HOME", ".config")?.join("settings.json"))
}

/// Default path of the file-backed secret store.
pub fn secrets_path() -> Result<PathBuf, std::io::Error> {
    Ok(app_dir("XDG_CONFIG_HOME", ".config")?.join("secrets.json"))
}

/// Default path of the per-run report document.
pub fn report_path() -> Result<PathBuf, std::io::Error> {
    Ok(app_dir("XDG_STATE_HOME", ".local/state")?.join("report.json"))
}
