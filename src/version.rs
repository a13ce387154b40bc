//! Build metadata. `GCAL_GIT_SHA` and `GCAL_BUILD_DATE` are read from the build environment.

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn commit() -> &'static str {
    option_env!("GCAL_GIT_SHA").unwrap_or("unknown")
}

pub fn build_date() -> &'static str {
    option_env!("GCAL_BUILD_DATE").unwrap_or("unknown")
}

/// Version number only.
pub fn short() -> &'static str {
    VERSION
}

/// Version with build date and commit.
pub fn info() -> String {
    format!(
        "{} (Built on {} from Git SHA {})",
        VERSION,
        build_date(),
        commit()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_starts_with_short_version() {
        assert!(info().starts_with(short()));
        assert!(info().contains(commit()));
    }
}
