//! Dual TCP + local-IPC listener
//!
//! Both listeners feed the same axum router; the IPC side tags its
//! connections as trusted local traffic and refuses peers running as a
//! different user.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::net::TcpListener;

use crate::error::{ServerError, ServerResult};

/// Where a connection came from; local-IPC connections get tray privileges
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionSource {
    Tcp,
    Tray,
}

/// Socket file name inside the data directory
pub const SOCKET_FILE: &str = "mcpproxy.sock";

/// Ensure the data directory exists, belongs to us, and is private.
///
/// A directory that is merely too permissive but owned by the current user
/// is tightened to 0700 and logged; anything else is fatal with the
/// offending path.
pub fn prepare_data_dir(path: &Path) -> ServerResult<()> {
    if !path.exists() {
        std::fs::create_dir_all(path).map_err(|e| ServerError::Permission {
            path: path.to_path_buf(),
            message: format!("cannot create data directory: {}", e),
        })?;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::{MetadataExt, PermissionsExt};

        let metadata = std::fs::metadata(path).map_err(|e| ServerError::Permission {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        // SAFETY: geteuid has no preconditions
        let our_uid = unsafe { libc::geteuid() };
        if metadata.uid() != our_uid {
            return Err(ServerError::Permission {
                path: path.to_path_buf(),
                message: format!(
                    "data directory is owned by uid {} but we run as uid {}",
                    metadata.uid(),
                    our_uid
                ),
            });
        }

        let mode = metadata.permissions().mode() & 0o777;
        if mode & 0o077 != 0 {
            let mut permissions = metadata.permissions();
            permissions.set_mode(0o700);
            std::fs::set_permissions(path, permissions).map_err(|e| ServerError::Permission {
                path: path.to_path_buf(),
                message: format!(
                    "data directory mode {:o} is too permissive and could not be tightened: {}",
                    mode, e
                ),
            })?;
            tracing::warn!(
                path = %path.display(),
                "tightened data directory permissions from {:o} to 0700",
                mode
            );
        }
    }

    Ok(())
}

/// Bind the TCP listener, probing up to `probe_window` adjacent ports when
/// the configured one is taken. The bound address may therefore differ
/// from the requested one and is surfaced via `/api/v1/info`.
pub async fn bind_tcp(
    host: &str,
    port: u16,
    probe_window: u16,
) -> ServerResult<(TcpListener, SocketAddr)> {
    let mut last_err = None;

    for offset in 0..=probe_window {
        let candidate = port.saturating_add(offset);
        let addr = format!("{}:{}", host, candidate);

        match TcpListener::bind(&addr).await {
            Ok(listener) => {
                let local = listener.local_addr()?;
                if offset > 0 {
                    tracing::warn!(
                        requested = port,
                        bound = candidate,
                        "configured port was taken; probed to a nearby port"
                    );
                }
                return Ok((listener, local));
            }
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                last_err = Some(ServerError::AddrInUse { addr });
            }
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return Err(ServerError::Permission {
                    path: PathBuf::from(addr),
                    message: e.to_string(),
                });
            }
            Err(e) => return Err(ServerError::Io(e)),
        }
    }

    Err(last_err.unwrap_or_else(|| ServerError::Internal("no ports probed".to_string())))
}

#[cfg(unix)]
pub use unix_ipc::{bind_ipc, GuardedUnixListener};

#[cfg(unix)]
mod unix_ipc {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tokio::net::{UnixListener, UnixStream};

    /// Unix socket listener that drops connections from other users.
    ///
    /// Peer credentials are checked at accept time; a mismatched UID is
    /// logged and the connection closed before it reaches the router.
    #[derive(Debug)]
    pub struct GuardedUnixListener {
        inner: UnixListener,
        socket_path: PathBuf,
        our_uid: u32,
    }

    impl GuardedUnixListener {
        pub fn path(&self) -> &Path {
            &self.socket_path
        }
    }

    impl axum::serve::Listener for GuardedUnixListener {
        type Io = UnixStream;
        type Addr = tokio::net::unix::SocketAddr;

        async fn accept(&mut self) -> (Self::Io, Self::Addr) {
            loop {
                match self.inner.accept().await {
                    Ok((stream, addr)) => {
                        match stream.peer_cred() {
                            Ok(cred) if cred.uid() == self.our_uid => return (stream, addr),
                            Ok(cred) => {
                                tracing::warn!(
                                    peer_uid = cred.uid(),
                                    our_uid = self.our_uid,
                                    "rejected IPC connection from another user"
                                );
                            }
                            Err(e) => {
                                tracing::warn!("rejected IPC connection without credentials: {}", e);
                            }
                        }
                        // Dropping the stream closes it
                    }
                    Err(e) => {
                        tracing::warn!("IPC accept failed: {}", e);
                        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                    }
                }
            }
        }

        fn local_addr(&self) -> std::io::Result<Self::Addr> {
            self.inner.local_addr()
        }
    }

    impl Drop for GuardedUnixListener {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }

    /// Bind the Unix socket at `<data_dir>/mcpproxy.sock` with mode 0600.
    ///
    /// A leftover socket file is removed only when nothing answers on it;
    /// a live listener means another instance owns the endpoint.
    pub fn bind_ipc(data_dir: &Path) -> ServerResult<GuardedUnixListener> {
        let socket_path = data_dir.join(SOCKET_FILE);

        if socket_path.exists() {
            match std::os::unix::net::UnixStream::connect(&socket_path) {
                Ok(_) => {
                    return Err(ServerError::AddrInUse {
                        addr: socket_path.display().to_string(),
                    });
                }
                Err(_) => {
                    tracing::info!(
                        path = %socket_path.display(),
                        "removing stale socket file"
                    );
                    std::fs::remove_file(&socket_path).map_err(|e| ServerError::Permission {
                        path: socket_path.clone(),
                        message: format!("cannot remove stale socket: {}", e),
                    })?;
                }
            }
        }

        let listener = UnixListener::bind(&socket_path).map_err(|e| ServerError::Permission {
            path: socket_path.clone(),
            message: format!("cannot bind unix socket: {}", e),
        })?;

        std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o600)).map_err(
            |e| ServerError::Permission {
                path: socket_path.clone(),
                message: format!("cannot set socket permissions: {}", e),
            },
        )?;

        // SAFETY: geteuid has no preconditions
        let our_uid = unsafe { libc::geteuid() };

        Ok(GuardedUnixListener {
            inner: listener,
            socket_path,
            our_uid,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_port_probing_on_conflict() {
        // Occupy a port, then ask for it with a probe window
        let (_occupier, taken) = bind_tcp("127.0.0.1", 0, 0).await.unwrap();

        let (probed, bound) = bind_tcp("127.0.0.1", taken.port(), 10).await.unwrap();
        assert_ne!(bound.port(), taken.port());
        assert!(bound.port() > taken.port());
        assert!(bound.port() <= taken.port() + 10);
        drop(probed);
    }

    #[tokio::test]
    async fn test_no_probe_window_fails_fast() {
        let (_occupier, taken) = bind_tcp("127.0.0.1", 0, 0).await.unwrap();

        let result = bind_tcp("127.0.0.1", taken.port(), 0).await;
        assert!(matches!(result, Err(ServerError::AddrInUse { .. })));
    }

    #[cfg(unix)]
    mod unix_tests {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        #[test]
        fn test_data_dir_created_private() {
            let tmp = tempfile::tempdir().unwrap();
            let dir = tmp.path().join("data");
            prepare_data_dir(&dir).unwrap();

            let mode = std::fs::metadata(&dir).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode & 0o077, 0);
        }

        #[test]
        fn test_permissive_data_dir_tightened() {
            let tmp = tempfile::tempdir().unwrap();
            let dir = tmp.path().join("data");
            std::fs::create_dir(&dir).unwrap();
            std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o755)).unwrap();

            prepare_data_dir(&dir).unwrap();

            let mode = std::fs::metadata(&dir).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o700);
        }

        #[tokio::test]
        async fn test_ipc_socket_mode_0600() {
            let tmp = tempfile::tempdir().unwrap();
            let listener = bind_ipc(tmp.path()).unwrap();

            let mode = std::fs::metadata(listener.path())
                .unwrap()
                .permissions()
                .mode()
                & 0o777;
            assert_eq!(mode, 0o600);
        }

        #[tokio::test]
        async fn test_stale_socket_removed_live_socket_refused() {
            let tmp = tempfile::tempdir().unwrap();

            // A dead socket file left behind
            {
                let _dead = std::os::unix::net::UnixListener::bind(tmp.path().join(SOCKET_FILE))
                    .unwrap();
            }
            assert!(tmp.path().join(SOCKET_FILE).exists());
            let listener = bind_ipc(tmp.path()).unwrap();

            // A second bind while the listener is alive must refuse
            let err = bind_ipc(tmp.path()).unwrap_err();
            assert!(matches!(err, ServerError::AddrInUse { .. }));
            drop(listener);
        }

        #[tokio::test]
        async fn test_socket_file_removed_on_drop() {
            let tmp = tempfile::tempdir().unwrap();
            let path = {
                let listener = bind_ipc(tmp.path()).unwrap();
                listener.path().to_path_buf()
            };
            assert!(!path.exists());
        }
    }
}
