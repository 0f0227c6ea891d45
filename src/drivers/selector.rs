use super::{CopyStrategy, filesystem::DirectCopy, sqlite::AttachCopy};
use crate::config::{BackupConfig, Method};

pub fn select_strategy(config: &BackupConfig) -> Box<dyn CopyStrategy> {
    match config.method {
        Method::DirectCopy => Box::new(DirectCopy),
        Method::AttachCopy => Box::new(AttachCopy::new(config.busy_timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selects_by_method() {
        for method in [Method::DirectCopy, Method::AttachCopy] {
            let config = BackupConfig::new("a.db", "b.db", method);
            assert_eq!(select_strategy(&config).method(), method);
        }
    }
}
