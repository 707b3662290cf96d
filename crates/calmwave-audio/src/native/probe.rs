//! Preload probe: fetch and decode the first packet without playing anything.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};
use crossbeam_channel::Sender;
use tracing::{debug, warn};

use crate::media::{MediaProbe, ProbeOutcome};

use super::decode::{SourceReader, hint_for_url};
use super::source::open_url;

/// Runs each probe on its own thread and reports on the outcome channel.
/// The caller owns the overall timeout; `fetch_timeout` only bounds the network.
pub struct NativeProbe {
    outcomes: Sender<ProbeOutcome>,
    fetch_timeout: Duration,
}

impl NativeProbe {
    pub(crate) fn new(outcomes: Sender<ProbeOutcome>, fetch_timeout: Duration) -> Self {
        Self {
            outcomes,
            fetch_timeout,
        }
    }
}

impl MediaProbe for NativeProbe {
    fn probe(&mut self, url: &str, request_id: u64) {
        let url = url.to_string();
        let outcomes = self.outcomes.clone();
        let timeout = self.fetch_timeout;
        let spawned = thread::Builder::new()
            .name("calmwave-probe".into())
            .spawn(move || {
                let playable = match probe_url(&url, timeout) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(url = %url, request_id, error = %e, "probe failed");
                        false
                    }
                };
                debug!(url = %url, request_id, playable, "probe finished");
                let _ = outcomes.send(ProbeOutcome {
                    request_id,
                    playable,
                });
            });
        if let Err(e) = spawned {
            warn!(request_id, error = %e, "failed to spawn probe thread");
            let _ = self.outcomes.send(ProbeOutcome {
                request_id,
                playable: false,
            });
        }
    }
}

/// Open `url` and decode one packet.
pub fn probe_url(url: &str, timeout: Duration) -> Result<()> {
    let cancel = Arc::new(AtomicBool::new(false));
    let result = (|| -> Result<()> {
        let opened = open_url(url, timeout, cancel.clone())?;
        let mut hint = hint_for_url(url);
        if let Some(ext) = &opened.extension {
            hint.with_extension(ext);
        }
        let mut reader = SourceReader::open(opened.media, hint, None)?;
        reader
            .next_chunk()?
            .map(|_| ())
            .ok_or_else(|| anyhow!("source has no audio"))
    })();
    // Stops the live reader thread, if one was started.
    cancel.store(true, Ordering::Relaxed);
    result
}
