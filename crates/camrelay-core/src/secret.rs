//! Secret reference resolver for the shared device token.
//!
//! A `device_token` in a config file (or on the command line) may point at
//! the secret instead of containing it:
//!
//! - `pass::path/in/store` runs `pass show path/in/store` and keeps the first line
//! - `env::VAR_NAME` reads `$VAR_NAME`
//! - anything else is the token itself

use thiserror::Error;

/// Errors raised while resolving a secret reference.
#[derive(Debug, Error)]
pub enum SecretError {
    /// `pass` could not be started.
    #[error("failed to run `pass show {path}`: {source}")]
    PassSpawn {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// `pass` exited unsuccessfully or printed nothing.
    #[error("`pass show {path}` failed: {message}")]
    PassFailed { path: String, message: String },

    /// The referenced environment variable is unset.
    #[error("environment variable `{0}` is not set")]
    EnvMissing(String),
}

/// Resolves a value that may be a secret reference.
pub fn resolve_secret(value: &str) -> Result<String, SecretError> {
    if let Some(path) = value.strip_prefix("pass::") {
        resolve_pass(path)
    } else if let Some(var) = value.strip_prefix("env::") {
        std::env::var(var).map_err(|_| SecretError::EnvMissing(var.to_string()))
    } else {
        Ok(value.to_string())
    }
}

fn resolve_pass(path: &str) -> Result<String, SecretError> {
    let output = std::process::Command::new("pass")
        .arg("show")
        .arg(path)
        .output()
        .map_err(|source| SecretError::PassSpawn {
            path: path.to_string(),
            source,
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SecretError::PassFailed {
            path: path.to_string(),
            message: format!("exit {}: {}", output.status, stderr.trim()),
        });
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(str::to_string)
        .ok_or_else(|| SecretError::PassFailed {
            path: path.to_string(),
            message: "no output".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_token_passthrough() {
        assert_eq!(resolve_secret("hunter2").unwrap(), "hunter2");
        assert_eq!(resolve_secret("").unwrap(), "");
    }

    #[test]
    fn env_reference_resolves() {
        unsafe {
            std::env::set_var("_CAMRELAY_TEST_TOKEN", "from-env");
        }
        assert_eq!(
            resolve_secret("env::_CAMRELAY_TEST_TOKEN").unwrap(),
            "from-env"
        );
        unsafe {
            std::env::remove_var("_CAMRELAY_TEST_TOKEN");
        }
    }

    #[test]
    fn env_reference_missing_var_errors() {
        let err = resolve_secret("env::_CAMRELAY_NONEXISTENT_VAR_12345").unwrap_err();
        assert!(matches!(err, SecretError::EnvMissing(_)));
        assert!(err.to_string().contains("not set"));
    }

    #[test]
    fn pass_reference_errors_for_missing_entry() {
        // Fails whether or not `pass` is installed.
        let result = resolve_secret("pass::camrelay/nonexistent/entry/12345");
        assert!(result.is_err());
    }
}
