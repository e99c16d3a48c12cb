use chrono::{DateTime, Local};
use std::sync::OnceLock;

static VERSION_INFO: OnceLock<String> = OnceLock::new();
static SHORT_VERSION: OnceLock<String> = OnceLock::new();

fn build_time_str(format: &str) -> String {
    let build_timestamp: i64 = env!("BUILD_TIME").parse().unwrap_or(0);
    let build_datetime: DateTime<Local> = DateTime::from_timestamp(build_timestamp, 0)
        .map(|utc| utc.with_timezone(&Local))
        .unwrap_or_else(Local::now);
    build_datetime.format(format).to_string()
}

pub fn get_version_info() -> &'static str {
    VERSION_INFO.get_or_init(|| {
        format!(
            "dispatchconsole {}\n\
         Build Time: {}\n\
         Git Commit: {}\n\
         Git Branch: {}\n\
         Git Status: {}",
            env!("CARGO_PKG_VERSION"),
            build_time_str("%Y-%m-%d %H:%M:%S %Z"),
            env!("GIT_COMMIT_HASH"),
            env!("GIT_BRANCH"),
            env!("GIT_DIRTY"),
        )
    })
}

pub fn get_short_version() -> &'static str {
    SHORT_VERSION.get_or_init(|| {
        let version = env!("CARGO_PKG_VERSION");
        let git_commit = env!("GIT_COMMIT_HASH");
        if env!("GIT_DIRTY") == "dirty" {
            format!("{}-{}-dirty", version, git_commit)
        } else {
            format!("{}-{}", version, git_commit)
        }
    })
}

/// Client identifier sent to the credential and signaling services.
pub fn get_useragent() -> String {
    format!(
        "dispatchconsole/{} (built {})",
        env!("CARGO_PKG_VERSION"),
        build_time_str("%Y-%m-%d")
    )
}
