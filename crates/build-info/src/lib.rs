//! Build metadata captured by `build.rs` and reported in startup logs.

use once_cell::sync::Lazy;

#[derive(Debug)]
struct BuildInfo {
    id: &'static str,
    timestamp: &'static str,
    revision: &'static str,
}

static INFO: Lazy<BuildInfo> = Lazy::new(|| BuildInfo {
    id: option_env!("GENRELAY_BUILD_ID").unwrap_or("unknown build"),
    timestamp: option_env!("GENRELAY_BUILD_TIME").unwrap_or("unknown time"),
    revision: option_env!("GENRELAY_BUILD_GIT").unwrap_or("unknown revision"),
});

/// Full build identifier, e.g. `2026-03-01 10:00:00 UTC | v0.1.0-3-g1a2b3c4`.
/// `GENRELAY_BUILD_ID_OVERRIDE` at build time replaces it verbatim.
pub fn build_id() -> &'static str {
    INFO.id
}

pub fn build_timestamp() -> &'static str {
    INFO.timestamp
}

/// `git describe` output, or `unknown` outside a checkout.
pub fn git_revision() -> &'static str {
    INFO.revision
}

/// One-line banner for the startup log.
pub fn formatted_banner(package: &str, version: &str) -> String {
    format!("{} {} | {}", package, version, build_id())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn banner_names_package_version_and_build() {
        let banner = formatted_banner("genrelay", "0.1.0");
        assert!(banner.starts_with("genrelay 0.1.0 | "));
        assert!(banner.ends_with(build_id()));
        assert!(!build_timestamp().is_empty());
        assert!(!git_revision().is_empty());
    }
}
