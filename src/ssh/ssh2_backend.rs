use ssh2::{Channel, HashType};
use std::io::{self, Read};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::DeviceConfig;
use crate::error::{Error, Result};

/// An authenticated SSH session to the device.
///
/// The session is disconnected when dropped.
pub struct Session {
    inner: ssh2::Session,
    host: String,
}

impl Session {
    /// Open a TCP connection, perform the handshake and authenticate with the
    /// configured private key.
    ///
    /// If `host_key_sha256` is set, the server's host key must match it.
    /// Otherwise any host key is accepted.
    ///
    /// # Errors
    /// All failures are connection errors (`Connect`, `Handshake`,
    /// `HostKeyMismatch`).
    pub fn connect(cfg: &DeviceConfig) -> Result<Session> {
        let addr = format!("{}:{}", cfg.host, cfg.port);
        let timeout = cfg.timeout_secs.map(Duration::from_secs);
        let tcp = open_tcp(&addr, timeout).map_err(|source| Error::Connect {
            addr: addr.clone(),
            source,
        })?;

        let mut sess = ssh2::Session::new().map_err(|e| Error::handshake("init session", e))?;
        if let Some(t) = timeout {
            sess.set_timeout(u32::try_from(t.as_millis()).unwrap_or(u32::MAX));
        }
        sess.set_tcp_stream(tcp);
        sess.handshake()
            .map_err(|e| Error::handshake(format!("handshake with {}", addr), e))?;

        let actual = sess
            .host_key_hash(HashType::Sha256)
            .map(hex::encode)
            .unwrap_or_default();
        match cfg.host_key_sha256.as_deref() {
            Some(expected) if !fingerprint_matches(expected, &actual) => {
                return Err(Error::HostKeyMismatch {
                    expected: expected.to_string(),
                    actual,
                });
            }
            Some(_) => debug!(host = %cfg.host, "host key matches pinned fingerprint"),
            None => warn!(
                host = %cfg.host,
                fingerprint = %actual,
                "accepting unverified host key; set device.host_key_sha256 to pin it"
            ),
        }

        sess.userauth_pubkey_file(&cfg.username, None, &cfg.key_file, None)
            .map_err(|e| {
                Error::handshake(
                    format!(
                        "authenticate as {} with {}",
                        cfg.username,
                        cfg.key_file.display()
                    ),
                    e,
                )
            })?;
        debug!(host = %cfg.host, user = %cfg.username, "ssh session established");

        Ok(Session {
            inner: sess,
            host: cfg.host.clone(),
        })
    }

    /// Run `command` to completion and return its trimmed standard output.
    ///
    /// # Errors
    /// `Ssh` on channel failures, `Query` if the output cannot be read,
    /// `ExitStatus` if the command exits non-zero.
    pub fn query(&self, command: &str) -> Result<String> {
        read_trimmed(self.stream(command)?)
    }

    /// Start `command` and expose its standard output as a lazily read stream.
    ///
    /// The exit status is checked when the stream reaches end-of-file; a
    /// non-zero status surfaces as a read error there.
    pub fn stream(&self, command: &str) -> Result<RemoteOutput> {
        let mut channel = self
            .inner
            .channel_session()
            .map_err(|e| Error::ssh("open channel", e))?;
        channel
            .exec(command)
            .map_err(|e| Error::ssh(format!("exec `{}`", command), e))?;
        debug!(%command, "remote command started");
        Ok(RemoteOutput::new(channel, command))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.inner.disconnect(None, "backup finished", None) {
            debug!(host = %self.host, error = %e, "close ssh session");
        }
    }
}

/// The part of an SSH channel a running command needs.
pub trait CommandChannel: Read {
    /// Wait for the remote side to close and return the command's exit status.
    fn wait_exit(&mut self) -> std::result::Result<i32, ssh2::Error>;
    fn close(&mut self) -> std::result::Result<(), ssh2::Error>;
}

impl CommandChannel for Channel {
    fn wait_exit(&mut self) -> std::result::Result<i32, ssh2::Error> {
        self.wait_close()?;
        self.exit_status()
    }

    fn close(&mut self) -> std::result::Result<(), ssh2::Error> {
        Channel::close(self)
    }
}

/// Standard output of a remote command.
pub struct RemoteOutput<C: CommandChannel = Channel> {
    channel: C,
    command: String,
    finished: bool,
}

impl<C: CommandChannel> RemoteOutput<C> {
    pub(crate) fn new(channel: C, command: &str) -> Self {
        RemoteOutput {
            channel,
            command: command.to_string(),
            finished: false,
        }
    }

    /// Close the channel and turn a non-zero exit status into an error.
    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        let status = self
            .channel
            .wait_exit()
            .map_err(|e| Error::ssh(format!("exit status of `{}`", self.command), e))?;
        if status != 0 {
            return Err(Error::ExitStatus {
                command: self.command.clone(),
                status,
            });
        }
        Ok(())
    }
}

impl<C: CommandChannel> Read for RemoteOutput<C> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.finished {
            return Ok(0);
        }
        let n = self.channel.read(buf)?;
        if n == 0 && !buf.is_empty() {
            self.finish().map_err(io::Error::other)?;
        }
        Ok(n)
    }
}

impl<C: CommandChannel> Drop for RemoteOutput<C> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.channel.close() {
            debug!(command = %self.command, error = %e, "close remote channel");
        }
    }
}

/// Read a command's whole output, check its exit status and trim it.
fn read_trimmed<C: CommandChannel>(mut out: RemoteOutput<C>) -> Result<String> {
    let mut buf = String::new();
    out.channel
        .read_to_string(&mut buf)
        .map_err(|source| Error::Query {
            command: out.command.clone(),
            source,
        })?;
    out.finish()?;
    Ok(buf.trim().to_string())
}

fn open_tcp(addr: &str, timeout: Option<Duration>) -> io::Result<TcpStream> {
    let Some(t) = timeout else {
        return TcpStream::connect(addr);
    };
    let addrs: Vec<SocketAddr> = addr.to_socket_addrs()?.collect();
    let mut last = io::Error::new(io::ErrorKind::NotFound, "no addresses resolved");
    for a in addrs {
        match TcpStream::connect_timeout(&a, t) {
            Ok(s) => {
                s.set_read_timeout(Some(t))?;
                s.set_write_timeout(Some(t))?;
                return Ok(s);
            }
            Err(e) => last = e,
        }
    }
    Err(last)
}

/// Compare a configured fingerprint with the hex digest reported by the server.
///
/// Case and `:` separators in `expected` are ignored.
pub fn fingerprint_matches(expected: &str, actual_hex: &str) -> bool {
    let norm: String = expected
        .trim()
        .chars()
        .filter(|c| *c != ':')
        .map(|c| c.to_ascii_lowercase())
        .collect();
    !norm.is_empty() && norm == actual_hex.to_ascii_lowercase()
}

/// Check that the identifier reported by the device is safe as a file name.
///
/// # Errors
/// `BadIdentifier` if it is empty, `.`/`..`, or contains a path separator or
/// control character.
pub fn validate_identifier(id: &str) -> Result<&str> {
    let bad = id.is_empty()
        || id == "."
        || id == ".."
        || id.contains(['/', '\\'])
        || id.chars().any(char::is_control);
    if bad {
        return Err(Error::BadIdentifier(id.to_string()));
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::export::{LineFilter, copy_filtered};
    use std::cell::Cell;
    use std::io::Cursor;
    use std::net::TcpListener;
    use std::path::{Path, PathBuf};
    use std::rc::Rc;

    fn device(port: u16) -> DeviceConfig {
        DeviceConfig {
            host: "127.0.0.1".to_string(),
            port,
            username: "backup".to_string(),
            key_file: PathBuf::from("/nonexistent/key"),
            host_key_sha256: None,
            timeout_secs: Some(5),
        }
    }

    fn closed_port() -> u16 {
        let l = TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().port()
    }

    /// In-memory channel with a fixed exit status.
    struct FakeChannel {
        out: Cursor<Vec<u8>>,
        status: i32,
        closed: Rc<Cell<bool>>,
    }

    impl FakeChannel {
        fn new(out: &str, status: i32) -> Self {
            FakeChannel {
                out: Cursor::new(out.as_bytes().to_vec()),
                status,
                closed: Rc::new(Cell::new(false)),
            }
        }
    }

    impl Read for FakeChannel {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.out.read(buf)
        }
    }

    impl CommandChannel for FakeChannel {
        fn wait_exit(&mut self) -> std::result::Result<i32, ssh2::Error> {
            self.closed.set(true);
            Ok(self.status)
        }

        fn close(&mut self) -> std::result::Result<(), ssh2::Error> {
            self.closed.set(true);
            Ok(())
        }
    }

    #[test]
    fn query_output_is_trimmed() {
        let out = RemoteOutput::new(FakeChannel::new("  HEX0123ABC\r\n", 0), ":put serial");
        assert_eq!(read_trimmed(out).unwrap(), "HEX0123ABC");
    }

    #[test]
    fn query_with_failing_status_is_exec_error() {
        let out = RemoteOutput::new(FakeChannel::new("bad command\n", 1), ":put serial");
        let err = read_trimmed(out).unwrap_err();
        assert!(matches!(err, Error::ExitStatus { status: 1, .. }));
        assert_eq!(err.kind(), ErrorKind::Exec);
    }

    #[test]
    fn stream_reports_failing_status_at_end_of_output() {
        let mut out = RemoteOutput::new(FakeChannel::new("/ip address\n", 2), "/export");
        let mut buf = Vec::new();
        let err = out.read_to_end(&mut buf).unwrap_err();
        assert_eq!(buf, b"/ip address\n");
        assert!(err.to_string().contains("exited with status 2"));
        // later reads see a clean end
        assert_eq!(out.read(&mut [0u8; 8]).unwrap(), 0);
    }

    #[test]
    fn failing_export_is_an_export_read_error() {
        let out = RemoteOutput::new(FakeChannel::new("/ip address\n", 1), "/export");
        let err = copy_filtered(out, Vec::new(), &LineFilter::default(), Path::new("out"))
            .unwrap_err();
        assert!(matches!(err, Error::ExportRead(_)));
        assert_eq!(err.kind(), ErrorKind::Exec);
    }

    #[test]
    fn successful_stream_reads_to_end() {
        let mut out = RemoteOutput::new(FakeChannel::new("a\nb\n", 0), "/export");
        let mut s = String::new();
        out.read_to_string(&mut s).unwrap();
        assert_eq!(s, "a\nb\n");
    }

    #[test]
    fn unread_stream_closes_channel_on_drop() {
        let ch = FakeChannel::new("a\n", 0);
        let closed = ch.closed.clone();
        drop(RemoteOutput::new(ch, "/export"));
        assert!(closed.get());
    }

    #[test]
    fn fingerprint_comparison_ignores_case_and_colons() {
        assert!(fingerprint_matches("AB:cd:01", "abcd01"));
        assert!(fingerprint_matches(" abcd01 ", "ABCD01"));
        assert!(!fingerprint_matches("abcd02", "abcd01"));
        assert!(!fingerprint_matches("", ""));
    }

    #[test]
    fn identifier_validation() {
        assert_eq!(validate_identifier("HEX0123ABC").unwrap(), "HEX0123ABC");
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("..").is_err());
        assert!(validate_identifier("a/b").is_err());
        assert!(validate_identifier("a\\b").is_err());
        assert!(validate_identifier("a\nb").is_err());
        let err = validate_identifier(".").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Exec);
    }

    #[test]
    fn connect_to_closed_port_is_connection_error() {
        let err = Session::connect(&device(closed_port())).err().unwrap();
        assert!(matches!(err, Error::Connect { .. }));
        assert_eq!(err.kind(), ErrorKind::Connection);
    }

    #[test]
    fn connect_without_timeout_to_closed_port_fails() {
        let mut cfg = device(closed_port());
        cfg.timeout_secs = None;
        let err = Session::connect(&cfg).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Connection);
    }
}
