//! Minimal MPD line-protocol client.
//!
//! Just enough of the protocol for the web front end: plain commands, `idle`,
//! and chunked binary transfers (`albumart` / `readpicture`). Each
//! [`MpdClient`] owns one TCP connection, reconnecting lazily after the
//! previous one failed. `idle` occupies its connection until something
//! changes, so the watcher and the command proxy use separate clients.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use super::{DaemonClient, DaemonError, DaemonReply, DaemonResult, ACK_ERROR_NO_EXIST};
use crate::protocol_constants::{
    MAX_COVER_BYTES, MPD_ACK_PREFIX, MPD_CONNECT_TIMEOUT_SECS, MPD_GREETING_PREFIX, MPD_OK,
};

/// Commands that would wedge or close the shared proxy connection.
const FORBIDDEN_COMMANDS: [&str; 5] = [
    "idle",
    "noidle",
    "close",
    "command_list_begin",
    "command_list_ok_begin",
];

// ─────────────────────────────────────────────────────────────────────────────
// Connection
// ─────────────────────────────────────────────────────────────────────────────

/// One chunk of a binary response.
struct BinaryChunk {
    /// Total size announced by the daemon (`size:`), if any.
    total: Option<usize>,
    data: Bytes,
}

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    /// Set while a command is awaiting its reply. A connection dropped in this
    /// state (cancelled future) is out of sync and must not be reused.
    in_flight: bool,
}

impl Connection {
    async fn open(addr: &str, timeout: Duration) -> DaemonResult<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| DaemonError::ConnectTimeout(addr.to_string()))??;
        let (read, writer) = stream.into_split();
        let mut conn = Self {
            reader: BufReader::new(read),
            writer,
            in_flight: false,
        };

        let greeting = conn.read_line().await?;
        let version = greeting
            .strip_prefix(MPD_GREETING_PREFIX)
            .ok_or_else(|| DaemonError::Protocol(format!("unexpected greeting: {greeting}")))?;
        log::info!("[MPD] Connected to {} (protocol {})", addr, version);

        Ok(conn)
    }

    async fn read_line(&mut self) -> DaemonResult<String> {
        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Err(DaemonError::ConnectionClosed);
        }
        if line.ends_with('\n') {
            line.pop();
        }
        Ok(line)
    }

    async fn send(&mut self, command: &str) -> DaemonResult<()> {
        self.in_flight = true;
        self.writer.write_all(command.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn command(&mut self, command: &str) -> DaemonResult<DaemonReply> {
        self.send(command).await?;
        let mut reply = DaemonReply::default();
        loop {
            let line = self.read_line().await?;
            if line == MPD_OK {
                self.in_flight = false;
                return Ok(reply);
            }
            if let Some(rest) = line.strip_prefix(MPD_ACK_PREFIX) {
                self.in_flight = false;
                return Err(parse_ack(rest));
            }
            match DaemonReply::parse_line(&line) {
                Some((key, value)) => reply.push(key, value),
                None => return Err(DaemonError::Protocol(format!("malformed line: {line}"))),
            }
        }
    }

    async fn binary_chunk(&mut self, command: &str) -> DaemonResult<BinaryChunk> {
        self.send(command).await?;
        let mut total = None;
        let mut data = Bytes::new();
        loop {
            let line = self.read_line().await?;
            if line == MPD_OK {
                self.in_flight = false;
                return Ok(BinaryChunk { total, data });
            }
            if let Some(rest) = line.strip_prefix(MPD_ACK_PREFIX) {
                self.in_flight = false;
                return Err(parse_ack(rest));
            }
            let Some((key, value)) = DaemonReply::parse_line(&line) else {
                return Err(DaemonError::Protocol(format!("malformed line: {line}")));
            };
            match key.as_str() {
                "size" => {
                    let size = parse_len(&value)?;
                    if size > MAX_COVER_BYTES {
                        return Err(DaemonError::Protocol(format!(
                            "cover of {size} bytes exceeds limit of {MAX_COVER_BYTES}"
                        )));
                    }
                    total = Some(size);
                }
                "binary" => {
                    let len = parse_len(&value)?;
                    let limit = total.unwrap_or(MAX_COVER_BYTES);
                    if len > limit {
                        return Err(DaemonError::Protocol(format!(
                            "binary chunk of {len} bytes exceeds {limit}"
                        )));
                    }
                    let mut buf = vec![0u8; len];
                    self.reader.read_exact(&mut buf).await?;
                    data = Bytes::from(buf);
                    // Payload is followed by a bare newline.
                    let trailer = self.read_line().await?;
                    if !trailer.is_empty() {
                        return Err(DaemonError::Protocol(format!(
                            "expected newline after binary payload, got: {trailer}"
                        )));
                    }
                }
                _ => {}
            }
        }
    }

    async fn binary(&mut self, command: &str, uri: &str) -> DaemonResult<Bytes> {
        let mut image = BytesMut::new();
        loop {
            let line = format!("{} {} {}", command, quote(uri), image.len());
            let chunk = self.binary_chunk(&line).await?;
            let Some(total) = chunk.total else {
                break;
            };
            if chunk.data.is_empty() {
                break;
            }
            image.extend_from_slice(&chunk.data);
            if image.len() >= total {
                break;
            }
        }
        if image.is_empty() {
            return Err(DaemonError::MissingField("binary"));
        }
        Ok(image.freeze())
    }
}

/// Parses the part of an ACK line after `"ACK "`: `[code@index] {command} message`.
fn parse_ack(rest: &str) -> DaemonError {
    let parsed = (|| {
        let rest = rest.strip_prefix('[')?;
        let (code_part, rest) = rest.split_once(']')?;
        let code = code_part.split('@').next()?.parse().ok()?;
        let rest = rest.trim_start().strip_prefix('{')?;
        let (command, message) = rest.split_once('}')?;
        Some(DaemonError::Ack {
            code,
            command: command.to_string(),
            message: message.trim().to_string(),
        })
    })();
    parsed.unwrap_or_else(|| DaemonError::Protocol(format!("malformed ACK: {rest}")))
}

fn parse_len(value: &str) -> DaemonResult<usize> {
    value
        .parse()
        .map_err(|_| DaemonError::Protocol(format!("invalid length: {value}")))
}

/// Quotes a command argument.
fn quote(arg: &str) -> String {
    let mut out = String::with_capacity(arg.len() + 2);
    out.push('"');
    for c in arg.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Rejects commands that cannot be forwarded verbatim.
fn validate_command(command: &str) -> DaemonResult<()> {
    let trimmed = command.trim();
    if trimmed.is_empty() || command.contains(['\n', '\r']) {
        return Err(DaemonError::InvalidCommand(command.escape_debug().to_string()));
    }
    let name = trimmed.split_whitespace().next().unwrap_or_default();
    if FORBIDDEN_COMMANDS
        .iter()
        .any(|c| c.eq_ignore_ascii_case(name))
    {
        return Err(DaemonError::InvalidCommand(format!(
            "'{name}' is not allowed"
        )));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────────────────────────

/// MPD client owning a single lazily (re)established connection.
///
/// Calls are serialized on the connection. After a fatal error the connection
/// is discarded and the next call reconnects.
pub struct MpdClient {
    addr: String,
    connect_timeout: Duration,
    conn: Mutex<Option<Connection>>,
}

impl MpdClient {
    /// Creates a client for `addr` (`host:port`) without connecting.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout: Duration::from_secs(MPD_CONNECT_TIMEOUT_SECS),
            conn: Mutex::new(None),
        }
    }

    /// Creates a client and connects immediately, failing if MPD is unreachable.
    pub async fn connect(addr: impl Into<String>) -> DaemonResult<Self> {
        let client = Self::new(addr);
        {
            let mut slot = client.conn.lock().await;
            client.ensure_connected(&mut slot).await?;
        }
        Ok(client)
    }

    /// Returns the daemon address.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn ensure_connected<'a>(
        &self,
        slot: &'a mut Option<Connection>,
    ) -> DaemonResult<&'a mut Connection> {
        if slot.as_ref().is_some_and(|c| c.in_flight) {
            log::debug!("[MPD] Discarding out-of-sync connection to {}", self.addr);
            *slot = None;
        }
        if slot.is_none() {
            *slot = Some(Connection::open(&self.addr, self.connect_timeout).await?);
        }
        slot.as_mut().ok_or(DaemonError::ConnectionClosed)
    }

    fn discard_if_fatal<T>(&self, slot: &mut Option<Connection>, result: &DaemonResult<T>) {
        if let Err(e) = result {
            if e.is_fatal() && slot.take().is_some() {
                log::warn!("[MPD] Dropping connection to {}: {}", self.addr, e);
            }
        }
    }
}

#[async_trait]
impl DaemonClient for MpdClient {
    async fn request(&self, command: &str) -> DaemonResult<DaemonReply> {
        validate_command(command)?;
        let command = command.trim();
        let mut slot = self.conn.lock().await;
        let reused = slot.as_ref().is_some_and(|c| !c.in_flight);

        let conn = self.ensure_connected(&mut slot).await?;
        let result = conn.command(command).await;
        self.discard_if_fatal(&mut slot, &result);

        // MPD closes connections that sat unused past its connection_timeout;
        // that only shows up on the next write or read.
        match result {
            Err(DaemonError::ConnectionClosed | DaemonError::Io(_)) if reused => {
                log::debug!("[MPD] Stale connection to {}, reconnecting", self.addr);
                let conn = self.ensure_connected(&mut slot).await?;
                let result = conn.command(command).await;
                self.discard_if_fatal(&mut slot, &result);
                result
            }
            other => other,
        }
    }

    async fn idle(&self, subsystems: &[&str]) -> DaemonResult<Vec<String>> {
        let command = if subsystems.is_empty() {
            "idle".to_string()
        } else {
            format!("idle {}", subsystems.join(" "))
        };
        let mut slot = self.conn.lock().await;
        let conn = self.ensure_connected(&mut slot).await?;
        let result = conn
            .command(&command)
            .await
            .map(|reply| reply.get_all("changed").map(str::to_string).collect());
        self.discard_if_fatal(&mut slot, &result);
        result
    }

    async fn download_cover(&self, uri: &str) -> DaemonResult<Bytes> {
        let mut slot = self.conn.lock().await;
        let conn = self.ensure_connected(&mut slot).await?;
        // Folder art first, then art embedded in the file itself.
        let result = match conn.binary("albumart", uri).await {
            Err(DaemonError::Ack { code, .. }) if code == ACK_ERROR_NO_EXIST => {
                log::debug!("[MPD] No folder art for {}, trying embedded picture", uri);
                conn.binary("readpicture", uri).await
            }
            other => other,
        };
        self.discard_if_fatal(&mut slot, &result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    type Script = Vec<(&'static str, Vec<u8>)>;

    /// Spawns a fake MPD that serves one scripted connection per entry of
    /// `sessions`, answering each expected command with the paired raw
    /// response and hanging up when its script runs out.
    async fn fake_mpd_sessions(sessions: Vec<Script>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            for script in sessions {
                let (stream, _) = listener.accept().await.unwrap();
                let (read, mut write) = stream.into_split();
                let mut reader = BufReader::new(read);
                write.write_all(b"OK MPD 0.23.5\n").await.unwrap();
                for (expected, response) in script {
                    let mut line = String::new();
                    reader.read_line(&mut line).await.unwrap();
                    assert_eq!(line.trim_end(), expected);
                    write.write_all(&response).await.unwrap();
                }
            }
        });
        addr
    }

    async fn fake_mpd(script: Script) -> String {
        fake_mpd_sessions(vec![script]).await
    }

    #[tokio::test]
    async fn request_returns_pairs() {
        let addr = fake_mpd(vec![(
            "currentsong",
            b"file: Artist/Album/01.flac\nTitle: One\nOK\n".to_vec(),
        )])
        .await;
        let client = MpdClient::connect(addr).await.unwrap();

        let reply = client.request("currentsong").await.unwrap();

        assert_eq!(reply.get("file"), Some("Artist/Album/01.flac"));
        assert_eq!(reply.get("Title"), Some("One"));
    }

    #[tokio::test]
    async fn request_maps_ack_to_recoverable_error() {
        let addr = fake_mpd(vec![(
            "play 99",
            b"ACK [2@0] {play} Bad song index\n".to_vec(),
        )])
        .await;
        let client = MpdClient::connect(addr).await.unwrap();

        let err = client.request("play 99").await.unwrap_err();

        match &err {
            DaemonError::Ack {
                code,
                command,
                message,
            } => {
                assert_eq!(*code, 2);
                assert_eq!(command, "play");
                assert_eq!(message, "Bad song index");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn request_reconnects_once_after_daemon_hung_up() {
        let addr = fake_mpd_sessions(vec![
            vec![],
            vec![("status", b"state: stop\nOK\n".to_vec())],
        ])
        .await;
        let client = MpdClient::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let reply = client.request("status").await.unwrap();

        assert_eq!(reply.get("state"), Some("stop"));
    }

    #[tokio::test]
    async fn idle_returns_changed_subsystems() {
        let addr = fake_mpd(vec![("idle player", b"changed: player\nOK\n".to_vec())]).await;
        let client = MpdClient::connect(addr).await.unwrap();

        let changed = client.idle(&["player"]).await.unwrap();

        assert_eq!(changed, vec!["player".to_string()]);
    }

    #[tokio::test]
    async fn idle_reports_closed_connection_as_fatal() {
        let addr = fake_mpd(vec![]).await;
        let client = MpdClient::connect(addr).await.unwrap();

        let err = client.idle(&["player"]).await.unwrap_err();

        assert!(err.is_fatal(), "unexpected error: {err:?}");
    }

    #[tokio::test]
    async fn download_cover_reassembles_chunks() {
        let mut first = b"size: 6\nbinary: 4\n".to_vec();
        first.extend_from_slice(&[0xFF, 0xD8, 0xFF, 0xE0]);
        first.extend_from_slice(b"\nOK\n");
        let mut second = b"size: 6\nbinary: 2\n".to_vec();
        second.extend_from_slice(&[0x00, 0x10]);
        second.extend_from_slice(b"\nOK\n");

        let addr = fake_mpd(vec![
            ("albumart \"a/b.flac\" 0", first),
            ("albumart \"a/b.flac\" 4", second),
        ])
        .await;
        let client = MpdClient::connect(addr).await.unwrap();

        let cover = client.download_cover("a/b.flac").await.unwrap();

        assert_eq!(&cover[..], &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10]);
    }

    #[tokio::test]
    async fn download_cover_falls_back_to_embedded_picture() {
        let mut embedded = b"size: 2\ntype: image/png\nbinary: 2\n".to_vec();
        embedded.extend_from_slice(&[0x89, 0x50]);
        embedded.extend_from_slice(b"\nOK\n");

        let addr = fake_mpd(vec![
            (
                "albumart \"x.mp3\" 0",
                b"ACK [50@0] {albumart} No file exists\n".to_vec(),
            ),
            ("readpicture \"x.mp3\" 0", embedded),
        ])
        .await;
        let client = MpdClient::connect(addr).await.unwrap();

        let cover = client.download_cover("x.mp3").await.unwrap();

        assert_eq!(&cover[..], &[0x89, 0x50]);
    }

    #[tokio::test]
    async fn download_cover_without_any_picture_is_not_found() {
        let addr = fake_mpd(vec![
            (
                "albumart \"x.mp3\" 0",
                b"ACK [50@0] {albumart} No file exists\n".to_vec(),
            ),
            ("readpicture \"x.mp3\" 0", b"OK\n".to_vec()),
        ])
        .await;
        let client = MpdClient::connect(addr).await.unwrap();

        let err = client.download_cover("x.mp3").await.unwrap_err();

        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn oversized_binary_length_is_a_protocol_error() {
        let addr = fake_mpd(vec![(
            "albumart \"x.mp3\" 0",
            b"size: 10\nbinary: 18446744073709551615\n".to_vec(),
        )])
        .await;
        let client = MpdClient::connect(addr).await.unwrap();

        let err = client.download_cover("x.mp3").await.unwrap_err();

        assert!(matches!(err, DaemonError::Protocol(_)));
    }

    #[test]
    fn quote_escapes_specials() {
        assert_eq!(quote(r#"a "b"\c"#), r#""a \"b\"\\c""#);
    }

    #[test]
    fn validate_command_rejects_injection_and_idle() {
        assert!(validate_command("status").is_ok());
        assert!(validate_command("pause 1").is_ok());
        assert!(validate_command("status\nclose").is_err());
        assert!(validate_command("   ").is_err());
        assert!(validate_command("idle player").is_err());
        assert!(validate_command("NOIDLE").is_err());
    }

    #[test]
    fn parse_ack_handles_malformed_lines() {
        assert!(matches!(parse_ack("garbage"), DaemonError::Protocol(_)));
    }
}
