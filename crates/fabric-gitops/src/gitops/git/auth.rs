//! Credentials for git commands that talk to the remote.

use std::path::PathBuf;

use secrecy::{ExposeSecret, SecretString};

use crate::gitops::error::{GitOpsError, Result};
use crate::model::{GitAuth, GitAuthType};

/// Escapes a token for use inside a single-quoted shell string.
pub fn shell_escape_token(token: &str) -> String {
    token.replace('\'', "'\\''")
}

#[cfg(windows)]
fn escape_token_for_windows_batch(token: &str) -> String {
    let mut escaped = String::with_capacity(token.len() * 2);
    for ch in token.chars() {
        match ch {
            '%' => escaped.push_str("%%"),
            '^' | '&' | '|' | '<' | '>' | '(' | ')' | '"' => {
                escaped.push('^');
                escaped.push(ch);
            }
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Deletes the askpass script when dropped so the token never outlives
/// the command that needed it.
#[derive(Debug)]
pub struct AskpassCleanup {
    path: Option<PathBuf>,
}

impl AskpassCleanup {
    fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    fn empty() -> Self {
        Self { path: None }
    }
}

impl Drop for AskpassCleanup {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                log::warn!("Failed to clean up askpass script: {}", e);
            }
        }
    }
}

/// Environment for one authenticated git invocation. Keep it alive until
/// the child process has exited.
#[derive(Debug)]
pub struct AuthEnv {
    pub env_vars: Vec<(String, String)>,
    _cleanup: AskpassCleanup,
}

impl AuthEnv {
    fn plain(env_vars: Vec<(String, String)>) -> Self {
        Self {
            env_vars,
            _cleanup: AskpassCleanup::empty(),
        }
    }
}

pub fn build_auth_env(auth: &GitAuth) -> Result<AuthEnv> {
    // Never let git block on an interactive prompt inside a worker
    let mut env = vec![("GIT_TERMINAL_PROMPT".to_string(), "0".to_string())];

    match auth.auth_type {
        GitAuthType::None => Ok(AuthEnv::plain(env)),
        GitAuthType::Token => {
            let token = auth.token.resolve().map_err(|e| {
                GitOpsError::GitAuthFailed(format!(
                    "Failed to resolve git token: {}. Configure token value, file, or envVar.",
                    e
                ))
            })?;
            let (askpass_path, cleanup) = write_askpass_script(&token)?;
            env.push(("GIT_ASKPASS".to_string(), askpass_path));
            Ok(AuthEnv {
                env_vars: env,
                _cleanup: cleanup,
            })
        }
        GitAuthType::SshKey => {
            let key_path = resolve_ssh_key_path(&auth.ssh_key_path);
            if !key_path.exists() {
                return Err(GitOpsError::GitAuthFailed(format!(
                    "SSH key file not found: {}",
                    key_path.display()
                )));
            }

            let display = key_path.display().to_string().replace('\'', "'\\''");
            let quoted = if display.starts_with('-') {
                format!("'./{}'", display)
            } else {
                format!("'{}'", display)
            };

            env.push((
                "GIT_SSH_COMMAND".to_string(),
                format!(
                    "ssh -i {} -o StrictHostKeyChecking=accept-new -o BatchMode=yes",
                    quoted
                ),
            ));
            Ok(AuthEnv::plain(env))
        }
    }
}

fn resolve_ssh_key_path(configured: &str) -> PathBuf {
    if configured.is_empty() {
        return dirs::home_dir()
            .map(|h| h.join(".ssh").join("id_ed25519"))
            .unwrap_or_else(|| PathBuf::from(".ssh/id_ed25519"));
    }
    PathBuf::from(crate::secrets::expand_home(configured))
}

fn write_askpass_script(token: &SecretString) -> Result<(String, AskpassCleanup)> {
    let temp_dir = std::env::temp_dir();
    let suffix = uuid::Uuid::new_v4().to_string();

    #[cfg(unix)]
    let (path, script) = (
        temp_dir.join(format!(".fabric-askpass-{}.sh", suffix)),
        format!(
            "#!/bin/sh\necho '{}'\n",
            shell_escape_token(token.expose_secret())
        ),
    );

    #[cfg(windows)]
    let (path, script) = (
        temp_dir.join(format!(".fabric-askpass-{}.bat", suffix)),
        format!(
            "@echo off\r\necho {}\r\n",
            escape_token_for_windows_batch(token.expose_secret())
        ),
    );

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o700)
            .open(&path)?;
        std::io::Write::write_all(&mut file, script.as_bytes())?;
    }

    #[cfg(not(unix))]
    {
        std::fs::write(&path, &script)?;
    }

    let cleanup = AskpassCleanup::new(path.clone());
    let path_str = path
        .to_str()
        .ok_or_else(|| {
            GitOpsError::GitAuthFailed("Temp directory path is not valid UTF-8".to_string())
        })?
        .to_string();

    Ok((path_str, cleanup))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::SecretSource;

    #[test]
    fn test_auth_env_none_disables_prompt() {
        let auth = build_auth_env(&GitAuth::default()).unwrap();
        assert_eq!(
            auth.env_vars,
            vec![("GIT_TERMINAL_PROMPT".to_string(), "0".to_string())]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_token_askpass_script_removed_on_drop() {
        let settings = GitAuth {
            auth_type: GitAuthType::Token,
            token: SecretSource::from_value("ghp_it's-a-token"),
            ..GitAuth::default()
        };
        let auth = build_auth_env(&settings).unwrap();
        let askpass = auth
            .env_vars
            .iter()
            .find(|(k, _)| k == "GIT_ASKPASS")
            .map(|(_, v)| PathBuf::from(v))
            .unwrap();
        let script = std::fs::read_to_string(&askpass).unwrap();
        assert!(script.contains("ghp_it'\\''s-a-token"));

        drop(auth);
        assert!(!askpass.exists());
    }

    #[test]
    fn test_token_without_source_fails() {
        let settings = GitAuth {
            auth_type: GitAuthType::Token,
            ..GitAuth::default()
        };
        let err = build_auth_env(&settings).unwrap_err();
        assert!(matches!(err, GitOpsError::GitAuthFailed(_)));
    }

    #[test]
    fn test_ssh_key_not_found() {
        let settings = GitAuth {
            auth_type: GitAuthType::SshKey,
            ssh_key_path: "/nonexistent/path/id_ed25519".to_string(),
            ..GitAuth::default()
        };
        let err = build_auth_env(&settings).unwrap_err().to_string();
        assert!(err.contains("SSH key file not found"));
    }

    #[test]
    fn test_shell_escape_token() {
        assert_eq!(shell_escape_token("simple"), "simple");
        assert_eq!(shell_escape_token("a'b'c"), "a'\\''b'\\''c");
    }
}
