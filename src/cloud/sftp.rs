use std::fs;
use std::io::{self, BufReader, Write};
use std::net::TcpStream;
use std::path::Path;
use std::time::Duration;

use log::{debug, info};
use ssh2::{DisconnectCode, ErrorCode, Session, Sftp};

use super::{Credentials, Health, RemoteSession, RemoteSink, RemoteTarget, SinkError};
use crate::constants::{
    ANONYMOUS_USER, DEFAULT_CONNECTION_TIMEOUT_SECS, ERROR_AUTHENTICATION_FAILED,
    ERROR_FAILED_TO_CREATE_SESSION, ERROR_FAILED_TO_CREATE_SFTP, LIBSSH2_ERROR_SOCKET_DISCONNECT,
    LIBSSH2_ERROR_SOCKET_RECV, LIBSSH2_ERROR_SOCKET_SEND, LIBSSH2_FX_CONNECTION_LOST,
    LIBSSH2_FX_NO_CONNECTION, REMOTE_DIR_MODE, STREAMING_BUFFER_SIZE,
};

/// Opens SFTP sessions over SSH.
#[derive(Clone, Debug)]
pub struct SftpSink {
    connection_timeout: Duration,
}

impl Default for SftpSink {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECTION_TIMEOUT_SECS)
    }
}

impl SftpSink {
    /// Create a sink whose sockets time out after `connection_timeout_sec`.
    pub fn new(connection_timeout_sec: u64) -> Self {
        Self {
            connection_timeout: Duration::from_secs(connection_timeout_sec),
        }
    }

    /// Create a new SSH session
    fn create_session(&self, target: &RemoteTarget) -> Result<Session, SinkError> {
        let address = target.address();
        let connect_error = |reason: String| SinkError::Connect {
            address: address.clone(),
            reason,
        };

        let tcp = TcpStream::connect(&address).map_err(|e| connect_error(e.to_string()))?;
        tcp.set_read_timeout(Some(self.connection_timeout))
            .map_err(|e| connect_error(format!("Failed to set read timeout: {}", e)))?;
        tcp.set_write_timeout(Some(self.connection_timeout))
            .map_err(|e| connect_error(format!("Failed to set write timeout: {}", e)))?;

        let mut session = Session::new()
            .map_err(|e| connect_error(format!("{}: {}", ERROR_FAILED_TO_CREATE_SESSION, e)))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(self.connection_timeout.as_millis().min(u32::MAX as u128) as u32);
        session
            .handshake()
            .map_err(|e| connect_error(format!("Failed to perform SSH handshake: {}", e)))?;

        authenticate(&session, target)?;
        Ok(session)
    }
}

impl RemoteSink for SftpSink {
    type Session = SftpSession;

    fn connect(&mut self, target: &RemoteTarget) -> Result<SftpSession, SinkError> {
        let session = self.create_session(target)?;
        let sftp = session.sftp().map_err(|e| SinkError::Connect {
            address: target.address(),
            reason: format!("{}: {}", ERROR_FAILED_TO_CREATE_SFTP, e),
        })?;

        let cwd = match sftp.realpath(Path::new(".")) {
            Ok(path) => path.to_string_lossy().into_owned(),
            Err(e) => {
                debug!("Could not resolve remote home directory ({}), using '.'", e);
                ".".to_string()
            }
        };

        info!("Opened SFTP session to {}", target.display_url());
        Ok(SftpSession { session, sftp, cwd })
    }
}

fn authenticate(session: &Session, target: &RemoteTarget) -> Result<(), SinkError> {
    let (user, result) = match &target.credentials {
        Some(Credentials {
            username,
            password: Some(password),
            ..
        }) => (
            username.as_str(),
            session
                .userauth_password(username, password)
                .map_err(|e| e.to_string()),
        ),
        Some(Credentials {
            username,
            private_key: Some(key),
            ..
        }) => (
            username.as_str(),
            session
                .userauth_pubkey_file(username, None, key, None)
                .map_err(|e| e.to_string()),
        ),
        Some(credentials) => (
            credentials.username.as_str(),
            session
                .userauth_agent(&credentials.username)
                .map_err(|e| e.to_string()),
        ),
        None => {
            // "none" authentication happens as a side effect of listing methods
            let methods = session.auth_methods(ANONYMOUS_USER);
            (ANONYMOUS_USER, anonymous_login(methods, session.authenticated()))
        }
    };

    let auth_error = |reason: String| SinkError::Auth {
        user: user.to_string(),
        host: target.host.clone(),
        reason,
    };

    result.map_err(auth_error)?;
    if !session.authenticated() {
        return Err(auth_error(ERROR_AUTHENTICATION_FAILED.to_string()));
    }
    Ok(())
}

/// Interpret the method listing that doubles as a "none" login attempt.
fn anonymous_login(methods: Result<&str, ssh2::Error>, authenticated: bool) -> Result<(), String> {
    match methods {
        _ if authenticated => Ok(()),
        Ok(offered) if offered.is_empty() => Err(ERROR_AUTHENTICATION_FAILED.to_string()),
        Ok(offered) => Err(format!(
            "{}: server requires one of {}",
            ERROR_AUTHENTICATION_FAILED, offered
        )),
        Err(e) => Err(e.to_string()),
    }
}

/// An authenticated SFTP session with a working directory.
///
/// SFTP has no server-side notion of a current directory, so the session
/// tracks it and resolves object names against it.
pub struct SftpSession {
    session: Session,
    sftp: Sftp,
    cwd: String,
}

impl RemoteSession for SftpSession {
    fn ensure_directory(&mut self, path: &str) -> Result<(), SinkError> {
        self.cwd = walk_directories(&self.sftp, &self.cwd, path)?;
        debug!("Remote working directory is {}", self.cwd);
        Ok(())
    }

    fn store(&mut self, local_file: &Path) -> Result<u64, SinkError> {
        let name = local_file
            .file_name()
            .ok_or_else(|| SinkError::LocalFile {
                path: local_file.to_path_buf(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"),
            })?
            .to_string_lossy()
            .into_owned();

        let source = fs::File::open(local_file).map_err(|source| SinkError::LocalFile {
            path: local_file.to_path_buf(),
            source,
        })?;

        let remote_path = join_remote(&self.cwd, &name);
        let mut remote_file = self
            .sftp
            .create(Path::new(&remote_path))
            .map_err(classify_ssh_error)?;

        let mut reader = BufReader::with_capacity(STREAMING_BUFFER_SIZE, source);
        let bytes = io::copy(&mut reader, &mut remote_file).map_err(classify_io_error)?;
        remote_file.flush().map_err(classify_io_error)?;

        debug!("Wrote {} bytes to {}", bytes, remote_path);
        Ok(bytes)
    }

    fn health_check(&mut self) -> Result<Health, SinkError> {
        match self.sftp.realpath(Path::new(".")) {
            Ok(_) => Ok(Health::Healthy),
            Err(e) => match classify_ssh_error(e) {
                SinkError::Stale => Ok(Health::Stale),
                other => Err(other),
            },
        }
    }
}

impl Drop for SftpSession {
    fn drop(&mut self) {
        let _ = self
            .session
            .disconnect(Some(DisconnectCode::ByApplication), "upload finished", None);
    }
}

/// Map a libssh2 error onto the sink taxonomy.
pub fn classify_ssh_error(err: ssh2::Error) -> SinkError {
    match err.code() {
        ErrorCode::Session(
            LIBSSH2_ERROR_SOCKET_DISCONNECT | LIBSSH2_ERROR_SOCKET_SEND | LIBSSH2_ERROR_SOCKET_RECV,
        ) => SinkError::Stale,
        ErrorCode::SFTP(LIBSSH2_FX_NO_CONNECTION | LIBSSH2_FX_CONNECTION_LOST) => SinkError::Stale,
        _ => SinkError::Transfer(err.to_string()),
    }
}

/// Map an I/O error raised mid-transfer onto the sink taxonomy.
pub fn classify_io_error(err: io::Error) -> SinkError {
    match err.kind() {
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => SinkError::Stale,
        _ => SinkError::Transfer(err.to_string()),
    }
}

/// Directory primitives needed to walk a remote path.
trait RemoteDirs {
    fn make_dir(&self, path: &str) -> Result<(), ssh2::Error>;
    fn is_dir(&self, path: &str) -> Result<bool, ssh2::Error>;
}

impl RemoteDirs for Sftp {
    fn make_dir(&self, path: &str) -> Result<(), ssh2::Error> {
        self.mkdir(Path::new(path), REMOTE_DIR_MODE)
    }

    fn is_dir(&self, path: &str) -> Result<bool, ssh2::Error> {
        self.stat(Path::new(path)).map(|stat| stat.is_dir())
    }
}

/// Create every missing segment of `path` below `cwd` (or `/` for absolute
/// paths) and return the resulting working directory.
fn walk_directories<D: RemoteDirs>(dirs: &D, cwd: &str, path: &str) -> Result<String, SinkError> {
    let absolute = path.starts_with('/');
    let chain = directory_chain(if absolute { "/" } else { cwd }, path);

    for dir in &chain {
        if let Err(e) = dirs.make_dir(dir) {
            accept_existing(dir, e, dirs.is_dir(dir))?;
        }
    }

    Ok(match chain.last() {
        Some(last) => last.clone(),
        None if absolute => "/".to_string(),
        None => cwd.to_string(),
    })
}

/// A failed `mkdir` is fine only when the path already is a directory.
fn accept_existing(
    dir: &str,
    mkdir_error: ssh2::Error,
    existing: Result<bool, ssh2::Error>,
) -> Result<(), SinkError> {
    match existing {
        Ok(true) => {
            debug!("Remote directory already exists ({})", dir);
            Ok(())
        }
        Ok(false) => Err(SinkError::Directory {
            path: dir.to_string(),
            reason: format!("{} (path exists and is not a directory)", mkdir_error),
        }),
        Err(stat_error) => Err(SinkError::Directory {
            path: dir.to_string(),
            reason: format!("{}; stat failed: {}", mkdir_error, stat_error),
        }),
    }
}

fn join_remote(base: &str, name: &str) -> String {
    if base.ends_with('/') {
        format!("{}{}", base, name)
    } else {
        format!("{}/{}", base, name)
    }
}

/// Every directory that has to exist for `path`, outermost first.
fn directory_chain(start: &str, path: &str) -> Vec<String> {
    let mut current = start.to_string();
    let mut chain = Vec::new();
    for segment in path.split('/').filter(|s| !s.is_empty() && *s != ".") {
        current = join_remote(&current, segment);
        chain.push(current.clone());
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    // SSH_FX_FAILURE, what servers answer to mkdir on an existing path
    const FX_FAILURE: i32 = 4;

    /// In-memory remote tree: path -> is_dir
    #[derive(Default)]
    struct FakeDirs {
        entries: RefCell<HashMap<String, bool>>,
        unreadable: Option<String>,
        mkdir_calls: RefCell<usize>,
    }

    impl RemoteDirs for FakeDirs {
        fn make_dir(&self, path: &str) -> Result<(), ssh2::Error> {
            *self.mkdir_calls.borrow_mut() += 1;
            let mut entries = self.entries.borrow_mut();
            if entries.contains_key(path) {
                return Err(ssh2::Error::new(ErrorCode::SFTP(FX_FAILURE), "failure"));
            }
            entries.insert(path.to_string(), true);
            Ok(())
        }

        fn is_dir(&self, path: &str) -> Result<bool, ssh2::Error> {
            if self.unreadable.as_deref() == Some(path) {
                return Err(ssh2::Error::new(ErrorCode::SFTP(3), "permission denied"));
            }
            self.entries
                .borrow()
                .get(path)
                .copied()
                .ok_or_else(|| ssh2::Error::new(ErrorCode::SFTP(2), "no such file"))
        }
    }

    fn mkdir_failure() -> ssh2::Error {
        ssh2::Error::new(ErrorCode::SFTP(FX_FAILURE), "failure")
    }

    #[test]
    fn test_existing_directory_is_accepted() {
        assert!(accept_existing("/srv/cam", mkdir_failure(), Ok(true)).is_ok());
    }

    #[test]
    fn test_existing_file_is_fatal() {
        match accept_existing("/srv/cam", mkdir_failure(), Ok(false)) {
            Err(err @ SinkError::Directory { .. }) => {
                assert!(err.is_fatal());
                assert!(err.to_string().contains("not a directory"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_failed_stat_is_fatal() {
        let stat_error = ssh2::Error::new(ErrorCode::SFTP(3), "permission denied");
        match accept_existing("/srv/cam", mkdir_failure(), Err(stat_error)) {
            Err(SinkError::Directory { path, reason }) => {
                assert_eq!(path, "/srv/cam");
                assert!(reason.contains("permission denied"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_walk_directories_is_idempotent() {
        let dirs = FakeDirs::default();

        let first = walk_directories(&dirs, "/home/pi", "timelapse/2024-01-01").unwrap();
        let second = walk_directories(&dirs, "/home/pi", "timelapse/2024-01-01").unwrap();

        assert_eq!(first, "/home/pi/timelapse/2024-01-01");
        assert_eq!(first, second);
        assert_eq!(*dirs.mkdir_calls.borrow(), 4);
        assert_eq!(dirs.entries.borrow().len(), 2);
    }

    #[test]
    fn test_walk_directories_absolute_and_empty() {
        let dirs = FakeDirs::default();
        assert_eq!(walk_directories(&dirs, "/home/pi", "/srv/cam").unwrap(), "/srv/cam");
        assert_eq!(walk_directories(&dirs, "/home/pi", "/").unwrap(), "/");
        assert_eq!(walk_directories(&dirs, "/home/pi", "").unwrap(), "/home/pi");
    }

    #[test]
    fn test_walk_directories_stops_at_file_in_the_way() {
        let dirs = FakeDirs::default();
        dirs.entries.borrow_mut().insert("/home/pi/timelapse".to_string(), false);

        let err = walk_directories(&dirs, "/home/pi", "timelapse/run").unwrap_err();
        assert!(matches!(err, SinkError::Directory { ref path, .. } if path == "/home/pi/timelapse"));
        assert!(!dirs.entries.borrow().contains_key("/home/pi/timelapse/run"));
    }

    #[test]
    fn test_walk_directories_unreadable_segment() {
        let dirs = FakeDirs {
            unreadable: Some("/srv".to_string()),
            ..Default::default()
        };
        dirs.entries.borrow_mut().insert("/srv".to_string(), true);

        let err = walk_directories(&dirs, "/", "/srv/cam").unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_anonymous_login_outcomes() {
        assert!(anonymous_login(Ok(""), true).is_ok());
        assert!(anonymous_login(Err(mkdir_failure()), true).is_ok());

        let reason = anonymous_login(Ok("publickey,password"), false).unwrap_err();
        assert!(reason.contains("publickey,password"));

        let dropped = ssh2::Error::new(
            ErrorCode::Session(LIBSSH2_ERROR_SOCKET_DISCONNECT),
            "connection closed by peer",
        );
        let reason = anonymous_login(Err(dropped), false).unwrap_err();
        assert!(reason.contains("connection closed by peer"));
    }

    #[test]
    fn test_directory_chain_relative() {
        let chain = directory_chain("/home/pi", "timelapse/2024-01-01");
        assert_eq!(
            chain,
            vec![
                "/home/pi/timelapse".to_string(),
                "/home/pi/timelapse/2024-01-01".to_string(),
            ]
        );
    }

    #[test]
    fn test_directory_chain_absolute() {
        let chain = directory_chain("/", "/srv//uploads/./cam/");
        assert_eq!(chain, vec!["/srv", "/srv/uploads", "/srv/uploads/cam"]);
    }

    #[test]
    fn test_directory_chain_empty() {
        assert!(directory_chain("/home/pi", "").is_empty());
        assert!(directory_chain("/", "/").is_empty());
    }

    #[test]
    fn test_join_remote() {
        assert_eq!(join_remote("/", "a.png"), "/a.png");
        assert_eq!(join_remote("/srv/cam", "a.png"), "/srv/cam/a.png");
        assert_eq!(join_remote(".", "a.png"), "./a.png");
    }

    #[test]
    fn test_classify_disconnect_as_stale() {
        let err = ssh2::Error::new(
            ErrorCode::Session(LIBSSH2_ERROR_SOCKET_DISCONNECT),
            "socket disconnect",
        );
        assert!(classify_ssh_error(err).is_stale());

        let err = ssh2::Error::new(ErrorCode::SFTP(LIBSSH2_FX_CONNECTION_LOST), "lost");
        assert!(classify_ssh_error(err).is_stale());
    }

    #[test]
    fn test_classify_permission_as_transfer() {
        // SSH_FX_PERMISSION_DENIED
        let err = ssh2::Error::new(ErrorCode::SFTP(3), "permission denied");
        match classify_ssh_error(err) {
            SinkError::Transfer(msg) => assert!(msg.contains("permission denied")),
            other => panic!("unexpected classification: {:?}", other),
        }
    }

    #[test]
    fn test_classify_io_errors() {
        let reset = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer");
        assert!(classify_io_error(reset).is_stale());

        let quota = io::Error::new(io::ErrorKind::Other, "quota exceeded");
        assert!(matches!(classify_io_error(quota), SinkError::Transfer(_)));
    }

    #[test]
    fn test_default_timeout() {
        let sink = SftpSink::default();
        assert_eq!(
            sink.connection_timeout,
            Duration::from_secs(DEFAULT_CONNECTION_TIMEOUT_SECS)
        );
    }

    #[test]
    fn test_connect_refused_is_fatal() {
        let mut sink = SftpSink::new(1);
        // Port 1 on loopback is not expected to run an SSH server
        let target = RemoteTarget::new("127.0.0.1", "uploads").with_port(1);
        match sink.connect(&target) {
            Err(err) => {
                assert!(err.is_fatal());
                assert!(matches!(err, SinkError::Connect { .. }));
            }
            Ok(_) => panic!("connection to port 1 unexpectedly succeeded"),
        }
    }
}
