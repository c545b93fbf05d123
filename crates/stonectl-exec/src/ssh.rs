//! SSH command execution using russh crate

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use russh::keys::ssh_key;
use russh::keys::{PrivateKeyWithHashAlg, load_secret_key};
use russh::{ChannelMsg, Disconnect, client};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

use crate::error::ExecError;
use crate::result::{CommandResult, ConnectionInfo, RunMode, RunOptions};
use crate::traits::RemoteExecutor;

#[derive(Debug)]
struct SshClientHandler;

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // Every server key is accepted; there is no known_hosts check
        Ok(true)
    }
}

/// Render argv as a single remote command line
///
/// Detached commands are wrapped so the channel closes right after the
/// process has been forked.
#[must_use]
pub fn remote_command_line(argv: &[String], mode: RunMode) -> String {
    let line = shell_words::join(argv);
    match mode {
        RunMode::Wait => line,
        RunMode::Detach => format!("nohup {line} >/dev/null 2>&1 &"),
    }
}

/// SSH command executor for one host
///
/// The session is opened on first use and dropped after any transport
/// error, so the next call reconnects.
pub struct SshExecutor {
    conn_info: ConnectionInfo,
    session: Mutex<Option<client::Handle<SshClientHandler>>>,
}

impl std::fmt::Debug for SshExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshExecutor")
            .field("conn_info", &self.conn_info)
            .finish_non_exhaustive()
    }
}

impl SshExecutor {
    /// Create a new SSH executor
    ///
    /// # Errors
    /// Returns `ExecError::ConfigError` if no key path is configured
    pub fn new(conn_info: ConnectionInfo) -> Result<Self, ExecError> {
        if conn_info.ssh_key.is_none() {
            return Err(ExecError::ConfigError(format!(
                "no ssh key configured for {}",
                conn_info.host
            )));
        }
        Ok(Self {
            conn_info,
            session: Mutex::new(None),
        })
    }

    fn auth_error(&self, reason: impl Into<String>) -> ExecError {
        ExecError::Auth {
            host: self.conn_info.host.clone(),
            reason: reason.into(),
        }
    }

    async fn open_session(&self) -> Result<client::Handle<SshClientHandler>, ExecError> {
        info!(
            host = %self.conn_info.host,
            port = self.conn_info.port,
            user = %self.conn_info.user,
            "connecting to SSH"
        );

        let config = Arc::new(client::Config::default());
        let mut session = client::connect(
            config,
            (&self.conn_info.host[..], self.conn_info.port),
            SshClientHandler,
        )
        .await
        .map_err(|e| ExecError::Unreachable {
            host: self.conn_info.host.clone(),
            reason: e.to_string(),
        })?;

        let key_path = self
            .conn_info
            .ssh_key
            .as_deref()
            .map(PathBuf::from)
            .ok_or_else(|| self.auth_error("no key path"))?;
        let key_pair =
            load_secret_key(&key_path, None).map_err(|e| self.auth_error(e.to_string()))?;

        let hash_alg = session
            .best_supported_rsa_hash()
            .await
            .ok()
            .flatten()
            .flatten();
        let auth_res = session
            .authenticate_publickey(
                &self.conn_info.user,
                PrivateKeyWithHashAlg::new(Arc::new(key_pair), hash_alg),
            )
            .await
            .map_err(|e| self.auth_error(e.to_string()))?;

        if !auth_res.success() {
            return Err(self.auth_error("public key rejected"));
        }

        info!(host = %self.conn_info.host, "SSH connected and authenticated");
        Ok(session)
    }

    async fn execute_remote(&self, cmd: &str) -> Result<CommandResult, ExecError> {
        let mut session_lock = self.session.lock().await;
        if session_lock.is_none() {
            *session_lock = Some(self.open_session().await?);
        }
        let Some(session) = session_lock.as_mut() else {
            return Err(ExecError::Unreachable {
                host: self.conn_info.host.clone(),
                reason: "no session".to_string(),
            });
        };

        debug!(command = %cmd, "executing remote command");
        let start = Instant::now();

        let outcome = async {
            let mut channel = session
                .channel_open_session()
                .await
                .map_err(|e| ExecError::Io(e.to_string()))?;
            channel
                .exec(true, cmd)
                .await
                .map_err(|e| ExecError::Io(e.to_string()))?;

            let mut status = -1;
            let mut stdout = Vec::new();
            let mut stderr = Vec::new();
            loop {
                match channel.wait().await {
                    Some(ChannelMsg::Data { data }) => stdout.extend_from_slice(&data),
                    Some(ChannelMsg::ExtendedData { data, ext }) if ext == 1 => {
                        stderr.extend_from_slice(&data);
                    }
                    Some(ChannelMsg::ExitStatus { exit_status }) => {
                        status = exit_status.cast_signed();
                    }
                    Some(ChannelMsg::Eof) | None => break,
                    _ => {}
                }
            }
            Ok::<_, ExecError>((status, stdout, stderr))
        }
        .await;

        let (status, stdout, stderr) = match outcome {
            Ok(parts) => parts,
            Err(e) => {
                warn!(host = %self.conn_info.host, error = %e, "dropping SSH session");
                *session_lock = None;
                return Err(e);
            }
        };

        let duration = start.elapsed();
        debug!(status, duration = ?duration, "remote command completed");

        Ok(CommandResult {
            status,
            stdout: String::from_utf8_lossy(&stdout).to_string(),
            stderr: String::from_utf8_lossy(&stderr).to_string(),
            duration,
        })
    }

    /// Disconnect from remote host
    ///
    /// # Errors
    /// Returns `ExecError::Io` if disconnection fails
    pub async fn disconnect(&self) -> Result<(), ExecError> {
        let mut session_lock = self.session.lock().await;
        if let Some(session) = session_lock.take() {
            session
                .disconnect(Disconnect::ByApplication, "", "English")
                .await
                .map_err(|e| ExecError::Io(e.to_string()))?;
            info!(host = %self.conn_info.host, "SSH disconnected");
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    #[instrument(skip(self, argv, opts), fields(host = %self.conn_info.host))]
    async fn run(&self, argv: &[String], opts: RunOptions) -> Result<CommandResult, ExecError> {
        if argv.is_empty() {
            return Err(ExecError::EmptyCommand);
        }
        let cmd = remote_command_line(argv, opts.mode);

        let Some(limit) = opts.timeout else {
            return self.execute_remote(&cmd).await;
        };

        match timeout(limit, self.execute_remote(&cmd)).await {
            Ok(result) => result,
            Err(_) => {
                error!(command = %cmd, timeout = ?limit, "command timed out");
                // The session may be wedged mid-channel
                self.session.lock().await.take();
                Err(ExecError::Timeout { timeout: limit })
            }
        }
    }

    fn executor_type(&self) -> &'static str {
        "ssh"
    }

    async fn close(&self) {
        if let Err(e) = self.disconnect().await {
            warn!(host = %self.conn_info.host, error = %e, "SSH disconnect failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_command_line_quotes_arguments() {
        let line = remote_command_line(
            &argv(&["stoneadm", "deploy", "--meta-json", r#"{"service_name": "mon"}"#]),
            RunMode::Wait,
        );
        assert_eq!(
            line,
            r#"stoneadm deploy --meta-json '{"service_name": "mon"}'"#
        );
    }

    #[test]
    fn test_command_line_detached() {
        let line = remote_command_line(&argv(&["stoneadm", "ls"]), RunMode::Detach);
        assert_eq!(line, "nohup stoneadm ls >/dev/null 2>&1 &");
    }

    #[test]
    fn test_new_requires_key() {
        let result = SshExecutor::new(ConnectionInfo::new("host1", "root"));
        assert!(matches!(result, Err(ExecError::ConfigError(_))));
    }

    #[tokio::test]
    #[ignore = "requires SSH server"]
    async fn test_ssh_roundtrip() {
        let info = ConnectionInfo::new("127.0.0.1", "root").with_ssh_key("/root/.ssh/id_ed25519");
        let executor = SshExecutor::new(info).unwrap();
        let result = executor
            .run(&argv(&["true"]), RunOptions::wait())
            .await
            .unwrap();
        assert!(result.success());
    }
}
