use directories::ProjectDirs;
use std::env;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::LazyLock;

const QUALIFIER: &str = "io";
const ORGANIZATION: &str = "statbridge";
const APPLICATION: &str = "statbridge";

const LOG_DIR_NAME: &str = "logs";

static PROJECT_DIRS: LazyLock<Option<ProjectDirs>> =
    LazyLock::new(|| ProjectDirs::from(QUALIFIER, ORGANIZATION, APPLICATION));

///
/// Per-user data directory, or a directory under the system temp dir when no home directory
/// can be determined
///
pub fn data_dir() -> PathBuf {
    match &*PROJECT_DIRS {
        Some(dirs) => dirs.data_dir().to_path_buf(),
        None => env::temp_dir().join(APPLICATION),
    }
}

pub fn log_dir() -> PathBuf {
    data_dir().join(LOG_DIR_NAME)
}

///
/// Log file base name in `dir`, unique per running process
///
pub fn log_basename(dir: &Path) -> PathBuf {
    let exe_name = env::current_exe()
        .ok()
        .and_then(|exe| exe.file_stem().and_then(|s| s.to_str()).map(str::to_owned))
        .unwrap_or_else(|| APPLICATION.to_owned());
    dir.join(format!("{}.{}", exe_name, process::id()))
}
