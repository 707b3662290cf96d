//! Byte sources for the decoder.
//!
//! - `data:` URLs are decoded in memory
//! - `file://` URLs open the local file
//! - finite HTTP(S) sources are downloaded whole so they stay seekable
//! - live HTTP(S) streams are pumped by a reader thread into a bounded channel

use std::fs::File;
use std::io::{self, Cursor, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use base64::Engine as _;
use crossbeam_channel::{Receiver, Sender};
use symphonia::core::io::{MediaSource, ReadOnlySource};

use crate::url::{infer_extension, is_data_url, is_live_stream_url};

const LIVE_READ_BYTES: usize = 16 * 1024;
const LIVE_QUEUE_BLOCKS: usize = 64;

/// An opened source plus the container hint derived from it.
pub struct OpenedSource {
    pub media: Box<dyn MediaSource>,
    pub extension: Option<String>,
    pub live: bool,
}

/// Open `url` for decoding. `cancel` stops a live reader thread.
pub fn open_url(url: &str, timeout: Duration, cancel: Arc<AtomicBool>) -> Result<OpenedSource> {
    if is_data_url(url) {
        let (bytes, extension) = decode_data_url(url)?;
        return Ok(OpenedSource {
            media: Box::new(Cursor::new(bytes)),
            extension,
            live: false,
        });
    }

    if let Some(path) = url.strip_prefix("file://") {
        let file = File::open(path).with_context(|| format!("open {path:?}"))?;
        return Ok(OpenedSource {
            media: Box::new(file),
            extension: infer_extension(path),
            live: false,
        });
    }

    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("unsupported URL scheme: {url}");
    }

    let extension = infer_extension(url);
    if is_live_stream_url(url) {
        let reader = LiveReader::spawn(url, timeout, cancel)?;
        return Ok(OpenedSource {
            media: Box::new(ReadOnlySource::new(reader)),
            extension,
            live: true,
        });
    }

    let bytes = fetch_bytes(url, timeout)?;
    Ok(OpenedSource {
        media: Box::new(Cursor::new(bytes)),
        extension,
        live: false,
    })
}

/// Download a whole resource.
pub fn fetch_bytes(url: &str, timeout: Duration) -> Result<Vec<u8>> {
    let started = std::time::Instant::now();
    let mut resp = ureq::get(url)
        .config()
        .timeout_global(Some(timeout.max(Duration::from_secs(30))))
        .timeout_connect(Some(timeout))
        .build()
        .call()
        .with_context(|| format!("GET {url}"))?;
    if !resp.status().is_success() {
        bail!("GET {url} failed with {}", resp.status());
    }
    let bytes = resp
        .body_mut()
        .with_config()
        .limit(512 * 1024 * 1024)
        .read_to_vec()
        .with_context(|| format!("read body of {url}"))?;
    tracing::debug!(
        url = %url,
        bytes = bytes.len(),
        took_ms = started.elapsed().as_millis() as u64,
        "fetched audio"
    );
    Ok(bytes)
}

/// Decode a `data:` URL into its bytes and a container hint from the media type.
pub fn decode_data_url(url: &str) -> Result<(Vec<u8>, Option<String>)> {
    let rest = url
        .get(5..)
        .ok_or_else(|| anyhow!("truncated data URL"))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| anyhow!("data URL without payload"))?;
    let is_base64 = meta
        .split(';')
        .any(|part| part.trim().eq_ignore_ascii_case("base64"));
    let mime = meta.split(';').next().unwrap_or("").trim().to_ascii_lowercase();

    let bytes = if is_base64 {
        base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .context("decode base64 data URL")?
    } else {
        payload.as_bytes().to_vec()
    };
    Ok((bytes, extension_for_mime(&mime).map(str::to_string)))
}

fn extension_for_mime(mime: &str) -> Option<&'static str> {
    match mime {
        "audio/mpeg" | "audio/mp3" => Some("mp3"),
        "audio/wav" | "audio/wave" | "audio/x-wav" => Some("wav"),
        "audio/ogg" | "audio/vorbis" => Some("ogg"),
        "audio/flac" | "audio/x-flac" => Some("flac"),
        "audio/mp4" | "audio/m4a" | "audio/x-m4a" => Some("m4a"),
        "audio/aac" => Some("aac"),
        _ => None,
    }
}

/// Blocking reader fed by a network thread.
struct LiveReader {
    rx: Receiver<Vec<u8>>,
    current: Vec<u8>,
    offset: usize,
    cancel: Arc<AtomicBool>,
}

impl LiveReader {
    fn spawn(url: &str, timeout: Duration, cancel: Arc<AtomicBool>) -> Result<Self> {
        let resp = ureq::get(url)
            .config()
            .timeout_connect(Some(timeout))
            .timeout_recv_response(Some(timeout))
            .build()
            .header("Icy-MetaData", "0")
            .call()
            .with_context(|| format!("GET {url}"))?;
        if !resp.status().is_success() {
            bail!("GET {url} failed with {}", resp.status());
        }
        let (_, body) = resp.into_parts();
        let (tx, rx) = crossbeam_channel::bounded(LIVE_QUEUE_BLOCKS);
        let cancel_thread = cancel.clone();
        let url_owned = url.to_string();
        thread::Builder::new()
            .name("calmwave-live".into())
            .spawn(move || pump(body.into_reader(), tx, cancel_thread, url_owned))
            .context("spawn live reader")?;
        Ok(Self {
            rx,
            current: Vec::new(),
            offset: 0,
            cancel,
        })
    }
}

fn pump(mut reader: impl Read, tx: Sender<Vec<u8>>, cancel: Arc<AtomicBool>, url: String) {
    let mut buf = vec![0u8; LIVE_READ_BYTES];
    while !cancel.load(Ordering::Relaxed) {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "live stream read failed");
                break;
            }
        }
    }
    tracing::debug!(url = %url, "live reader finished");
}

impl Read for LiveReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        while self.offset >= self.current.len() {
            if self.cancel.load(Ordering::Relaxed) {
                return Ok(0);
            }
            match self.rx.recv_timeout(Duration::from_millis(250)) {
                Ok(block) => {
                    self.current = block;
                    self.offset = 0;
                }
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => return Ok(0),
            }
        }
        let available = &self.current[self.offset..];
        let n = available.len().min(out.len());
        out[..n].copy_from_slice(&available[..n]);
        self.offset += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_base64_data_url() {
        let (bytes, ext) = decode_data_url("data:audio/wav;base64,UklGRg==").unwrap();
        assert_eq!(bytes, b"RIFF");
        assert_eq!(ext.as_deref(), Some("wav"));
    }

    #[test]
    fn plain_data_url_keeps_payload() {
        let (bytes, ext) = decode_data_url("data:,hello").unwrap();
        assert_eq!(bytes, b"hello");
        assert!(ext.is_none());
    }

    #[test]
    fn malformed_data_url_is_an_error() {
        assert!(decode_data_url("data:audio/wav;base64").is_err());
        assert!(decode_data_url("data:audio/wav;base64,@@@").is_err());
    }

    #[test]
    fn rejects_unknown_scheme() {
        let cancel = Arc::new(AtomicBool::new(false));
        let err = open_url("ftp://example.com/a.mp3", Duration::from_secs(1), cancel);
        assert!(err.is_err());
    }

    #[test]
    fn opens_local_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        std::fs::write(&path, b"RIFF").unwrap();
        let url = format!("file://{}", path.display());
        let opened = open_url(&url, Duration::from_secs(1), Arc::new(AtomicBool::new(false))).unwrap();
        assert_eq!(opened.extension.as_deref(), Some("wav"));
        assert!(!opened.live);
    }

    #[test]
    fn live_reader_drains_channel_then_ends() {
        let (tx, rx) = crossbeam_channel::bounded(4);
        tx.send(b"abc".to_vec()).unwrap();
        tx.send(b"de".to_vec()).unwrap();
        drop(tx);
        let mut reader = LiveReader {
            rx,
            current: Vec::new(),
            offset: 0,
            cancel: Arc::new(AtomicBool::new(false)),
        };
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abcde");
    }
}
