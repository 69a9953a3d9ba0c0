pub const APP_NAME: &str = "taskforge";

/// Extension of build definition files inside the builds directory.
pub const BUILD_FILE_EXTENSION: &str = "json";

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "TASKFORGE_DATA_DIR";

/// Environment variable listing project files, separated like `PATH`.
pub const PROJECT_ENV: &str = "TASKFORGE_PROJECT";

/// Environment variable overriding the statistics file.
pub const STATS_ENV: &str = "TASKFORGE_STATS";

/// Project file used when none is configured.
pub const DEFAULT_PROJECT_FILE: &str = "taskforge.json";
