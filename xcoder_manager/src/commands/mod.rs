//! Registry commands. Each takes a [`Registry`](xcoder_core::Registry) and
//! writes its report to a writer so it can be checked without a terminal.

pub mod list;
pub mod remove;

use std::path::Path;
use xcoder_core::{RsrcConfig, XcoderResult};

/// Load `path` if given, else the defaults. `rsrc_dir` overrides the
/// directory the file names.
pub fn load_config(path: Option<&Path>, rsrc_dir: Option<&Path>) -> XcoderResult<RsrcConfig> {
    let mut config = match path {
        Some(path) => {
            log::debug!("loading config from {}", path.display());
            RsrcConfig::from_file(path)?
        }
        None => RsrcConfig::default(),
    };
    if let Some(dir) = rsrc_dir {
        config.rsrc_dir = Some(dir.to_path_buf());
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rsrc_dir_flag_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("rsrc.yaml");
        std::fs::write(&file, "rsrc_dir: /from/file\nretry_lock_attempts: 7\n").unwrap();

        let config = load_config(Some(&file), Some(Path::new("/from/flag"))).unwrap();
        assert_eq!(config.rsrc_dir.as_deref(), Some(Path::new("/from/flag")));
        assert_eq!(config.retry_lock_attempts, 7);

        let config = load_config(Some(&file), None).unwrap();
        assert_eq!(config.rsrc_dir.as_deref(), Some(Path::new("/from/file")));
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = load_config(Some(Path::new("/nonexistent/rsrc.yaml")), None).unwrap_err();
        assert!(matches!(err, xcoder_core::XcoderError::Config(_)));
    }
}
