//! Per-device input threads.
//!
//! Each input device gets a reader thread (blocking reads of fixed-size
//! records, forwarded as [`KeyEdge`]s) and a scheduler thread that owns the
//! device's [`RepeatScheduler`] and emits [`Activate`]s in order.

use std::fs::File;
use std::io::{self, Read};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Instant;

use super::{
    Activate, InputError, KeyEdge, RecordFormat, RepeatScheduler, RepeatTiming, Result,
    parse_record,
};

/// Read records from `reader` until EOF or error, forwarding key edges.
///
/// Returns `Ok(())` on a clean EOF or once the receiving side hangs up.
pub fn read_edges(
    mut reader: impl Read,
    format: RecordFormat,
    edges: &Sender<KeyEdge>,
) -> io::Result<()> {
    let mut buf = vec![0u8; format.record_size()];
    loop {
        match reader.read_exact(&mut buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e),
        }
        // read_exact guarantees a full record
        let Ok(Some(edge)) = parse_record(format, &buf) else {
            continue;
        };
        if edges.send(edge).is_err() {
            return Ok(());
        }
    }
}

/// Drive a [`RepeatScheduler`] from `edges`, sending activations to `out`.
///
/// Returns when the edge source closes or `out` hangs up.
pub fn run_scheduler<T: From<Activate>>(
    edges: &Receiver<KeyEdge>,
    timing: RepeatTiming,
    out: &Sender<T>,
) {
    let mut scheduler = RepeatScheduler::new(timing);
    loop {
        let edge = match scheduler.next_due() {
            Some(due) => {
                match edges.recv_timeout(due.saturating_duration_since(Instant::now())) {
                    Ok(edge) => Some(edge),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => return,
                }
            }
            None => match edges.recv() {
                Ok(edge) => Some(edge),
                Err(_) => return,
            },
        };
        let now = Instant::now();
        let activate = match edge {
            Some(edge) => scheduler.on_edge(edge, now),
            None => scheduler.on_timer(now),
        };
        if let Some(activate) = activate
            && out.send(activate.into()).is_err()
        {
            return;
        }
    }
}

/// Open `path` and start its reader and scheduler threads.
///
/// Returns the scheduler thread's handle; it exits once the device closes
/// or `out` hangs up.
pub fn spawn_stream<T>(
    path: &str,
    format: RecordFormat,
    timing: RepeatTiming,
    out: Sender<T>,
) -> Result<JoinHandle<()>>
where
    T: From<Activate> + Send + 'static,
{
    let file = File::open(path).map_err(|source| InputError::Open {
        path: path.to_string(),
        source,
    })?;
    let (edge_tx, edge_rx) = mpsc::channel();

    let reader_path = path.to_string();
    std::thread::Builder::new()
        .name(format!("input-read {path}"))
        .spawn(move || match read_edges(file, format, &edge_tx) {
            Ok(()) => log::warn!("[input] {reader_path} closed"),
            Err(e) => log::warn!("[input] {reader_path} read failed: {e}"),
        })
        .map_err(|source| InputError::Open {
            path: path.to_string(),
            source,
        })?;

    let handle = std::thread::Builder::new()
        .name(format!("input-repeat {path}"))
        .spawn(move || run_scheduler(&edge_rx, timing, &out))
        .map_err(|source| InputError::Open {
            path: path.to_string(),
            source,
        })?;

    log::info!("[input] reading {path} ({format})");
    Ok(handle)
}
