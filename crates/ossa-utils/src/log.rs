pub use log::{debug, error, info, trace, warn, Level, LevelFilter};

use simple_logger::SimpleLogger;

/// Installs the stderr logger used by ossa binaries and tests.
/// Returns false when a logger was already installed, which is not an error.
pub fn init(level: LevelFilter) -> bool {
    SimpleLogger::new().with_level(level).init().is_ok()
}

/// Dotted path of nested log scopes, e.g. `Project.BoneKey`.
pub fn scope_path(scopes: &[&str]) -> String {
    scopes.join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_twice_is_harmless() {
        init(LevelFilter::Warn);
        assert!(!init(LevelFilter::Warn));
    }

    #[test]
    fn scopes_are_dotted() {
        assert_eq!(scope_path(&[]), "");
        assert_eq!(scope_path(&["Project", "BoneKey"]), "Project.BoneKey");
    }
}
