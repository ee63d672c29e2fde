//! Resolution of secrets referenced by `*_env` / `*_file` settings.

use crate::secret::SecretString;
use std::path::{Path, PathBuf};

/// Reference to a secret held outside the configuration file.
///
/// The environment variable wins when it is set; otherwise the file is read
/// and trimmed. Inline secrets are not supported.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecretSource<'a> {
    pub name: &'a str,
    pub env: Option<&'a str>,
    pub file: Option<&'a Path>,
}

impl<'a> SecretSource<'a> {
    pub fn new(name: &'a str, env: Option<&'a String>, file: Option<&'a PathBuf>) -> Self {
        Self {
            name,
            env: env.map(String::as_str),
            file: file.map(PathBuf::as_path),
        }
    }

    /// Whether either reference is configured.
    pub fn is_configured(&self) -> bool {
        self.env.is_some() || self.file.is_some()
    }

    /// Resolve the secret.
    ///
    /// Returns `Ok(None)` when nothing is configured or the named variable is
    /// unset and no file is given. A configured file that cannot be read is an
    /// error, as is an empty value.
    pub fn resolve(&self) -> Result<Option<SecretString>, String> {
        if let Some(var) = self.env {
            if let Ok(value) = std::env::var(var) {
                let value = value.trim();
                if value.is_empty() {
                    return Err(format!("{} (env {}) is empty", self.name, var));
                }
                return Ok(Some(SecretString::new(value)));
            }
        }

        if let Some(path) = self.file {
            let content = std::fs::read_to_string(path).map_err(|e| {
                format!("{} (file {}) could not be read: {}", self.name, path.display(), e)
            })?;
            let value = content.trim();
            if value.is_empty() {
                return Err(format!("{} (file {}) is empty", self.name, path.display()));
            }
            return Ok(Some(SecretString::new(value)));
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_unconfigured_is_none() {
        let source = SecretSource::new("client_secret", None, None);
        assert!(!source.is_configured());
        assert_eq!(source.resolve().unwrap(), None);
    }

    #[test]
    fn test_reads_and_trims_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "  s3cret  ").unwrap();
        let path = file.path().to_path_buf();

        let source = SecretSource::new("client_secret", None, Some(&path));
        let secret = source.resolve().unwrap().unwrap();
        assert_eq!(secret.expose(), "s3cret");
    }

    #[test]
    fn test_missing_env_falls_back_to_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "from-file").unwrap();
        let path = file.path().to_path_buf();
        let var = "WARDEN_TEST_SECRET_THAT_IS_NEVER_SET".to_string();

        let source = SecretSource::new("password", Some(&var), Some(&path));
        assert_eq!(source.resolve().unwrap().unwrap().expose(), "from-file");
    }

    #[test]
    fn test_unreadable_file_is_error() {
        let path = PathBuf::from("/nonexistent/warden/secret");
        let source = SecretSource::new("password", None, Some(&path));
        let err = source.resolve().unwrap_err();
        assert!(err.contains("password"));
    }

    #[test]
    fn test_empty_file_is_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_path_buf();
        let source = SecretSource::new("password", None, Some(&path));
        assert!(source.resolve().is_err());
    }
}
