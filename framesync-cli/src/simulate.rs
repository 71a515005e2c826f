//! Synthetic decode session: one producer thread per stream, one consumer.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use framesync_core::{
    rescale, BufferConfig, BufferError, BufferStats, FrameBuffer, FrameCursor, FramePool,
    MediaKind, NextFrame, PoolStats, StreamConfig, Timebase,
};

/// Longest the consumer waits for a frame before giving up on the session
const STALL_TIMEOUT: Duration = Duration::from_secs(5);
const BACKPRESSURE_SLEEP: Duration = Duration::from_micros(200);

#[derive(Debug, Clone, PartialEq)]
pub struct SimulateOptions {
    pub config: Option<PathBuf>,
    /// Frames produced per stream
    pub frames: u64,
    /// Flush after this many consumed frames
    pub seek_at: Option<u64>,
    pub json: bool,
}

impl Default for SimulateOptions {
    fn default() -> Self {
        Self {
            config: None,
            frames: 240,
            seek_at: None,
            json: false,
        }
    }
}

#[derive(Debug, Serialize)]
struct ProducerReport {
    stream: usize,
    pushed: u64,
    backpressure_waits: u64,
    pool: PoolStats,
}

#[derive(Debug, Serialize)]
struct SessionReport {
    consumed: u64,
    consumed_per_stream: BTreeMap<usize, u64>,
    dropped_late: u64,
    flushed: usize,
    max_observed_duration: i64,
    elapsed_ms: u128,
    producers: Vec<ProducerReport>,
    buffer: BufferStats,
}

pub fn run(options: &SimulateOptions) -> Result<()> {
    let config = match &options.config {
        Some(path) => BufferConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => BufferConfig::default(),
    };
    let buffer = FrameBuffer::from_config(&config).context("building frame buffer")?;

    info!(
        "Simulating {} frames on {} streams, max span {}ms",
        options.frames,
        config.streams.len(),
        config.max_duration_ms
    );

    let report = run_session(&buffer, &config, options)?;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "consumed {} frames in {}ms ({} late, {} flushed)",
            report.consumed, report.elapsed_ms, report.dropped_late, report.flushed
        );
        for (stream, count) in &report.consumed_per_stream {
            println!("  stream #{}: {} frames", stream, count);
        }
        println!(
            "max buffered span {:.3}s, final: {}",
            buffer.timebase().to_seconds(report.max_observed_duration),
            report.buffer
        );
    }
    Ok(())
}

fn run_session(
    buffer: &FrameBuffer,
    config: &BufferConfig,
    options: &SimulateOptions,
) -> Result<SessionReport> {
    let start = Instant::now();
    let finished: Vec<AtomicBool> = config.streams.iter().map(|_| AtomicBool::new(false)).collect();
    let abort = AtomicBool::new(false);

    std::thread::scope(|s| {
        let producers: Vec<_> = config
            .streams
            .iter()
            .zip(&finished)
            .map(|(stream, done)| {
                let abort = &abort;
                s.spawn(move || produce(buffer, stream, options.frames, done, abort))
            })
            .collect();

        let consumed = consume(buffer, config, options, &finished);
        if consumed.is_err() {
            abort.store(true, Ordering::SeqCst);
        }

        let mut reports = Vec::with_capacity(producers.len());
        for handle in producers {
            let report = handle
                .join()
                .map_err(|_| anyhow::anyhow!("producer thread panicked"));
            reports.push(report);
        }

        let (consumed, consumed_per_stream, dropped_late, flushed, max_observed_duration) =
            consumed?;
        let producers = reports
            .into_iter()
            .map(|r| r.and_then(|inner| inner))
            .collect::<Result<Vec<_>>>()?;
        Ok(SessionReport {
            consumed,
            consumed_per_stream,
            dropped_late,
            flushed,
            max_observed_duration,
            elapsed_ms: start.elapsed().as_millis(),
            producers,
            buffer: buffer.stats(),
        })
    })
}

/// Ticks of the stream timebase one synthetic frame lasts
fn frame_step(stream: &StreamConfig) -> Result<i64> {
    let step = match stream.kind_or_data() {
        MediaKind::Video { .. } => stream
            .timebase
            .ticks_from_duration(Duration::from_millis(40)),
        MediaKind::Audio {
            sample_rate,
            samples,
            ..
        } => {
            let rate = i32::try_from(sample_rate).context("sample rate out of range")?;
            rescale(samples as i64, Timebase::new(1, rate)?, stream.timebase)
        }
        MediaKind::Data => stream
            .timebase
            .ticks_from_duration(Duration::from_millis(10)),
    };
    Ok(step.max(1))
}

fn produce(
    buffer: &FrameBuffer,
    stream: &StreamConfig,
    frames: u64,
    done: &AtomicBool,
    abort: &AtomicBool,
) -> Result<ProducerReport> {
    let step = frame_step(stream)?;
    let pool = FramePool::new(stream.kind_or_data(), 8);
    let mut pushed = 0;
    let mut backpressure_waits = 0;

    debug!("Producer for stream {} started, step {} ticks", stream.index, step);

    for n in 0..frames {
        let frame = pool.acquire(stream.index, n as i64 * step, stream.timebase);
        loop {
            match buffer.push(&frame) {
                Ok(()) => {
                    pushed += 1;
                    break;
                }
                Err(BufferError::BufferFull { .. }) => {
                    if abort.load(Ordering::SeqCst) {
                        anyhow::bail!("stream {} aborted at frame {}", stream.index, n);
                    }
                    backpressure_waits += 1;
                    std::thread::sleep(BACKPRESSURE_SLEEP);
                }
                Err(e) => return Err(e).context(format!("stream {} frame {}", stream.index, n)),
            }
        }
    }

    // Flag before closing so a concurrent seek can re-close the stream
    done.store(true, Ordering::SeqCst);
    buffer.close_stream(stream.index)?;
    debug!("Producer for stream {} finished", stream.index);

    Ok(ProducerReport {
        stream: stream.index,
        pushed,
        backpressure_waits,
        pool: pool.stats(),
    })
}

type ConsumeTotals = (u64, BTreeMap<usize, u64>, u64, usize, i64);

fn consume(
    buffer: &FrameBuffer,
    config: &BufferConfig,
    options: &SimulateOptions,
    finished: &[AtomicBool],
) -> Result<ConsumeTotals> {
    let mut cursor = FrameCursor::new(buffer).drop_late(true);
    let mut consumed = 0u64;
    let mut per_stream = BTreeMap::new();
    let mut flushed = 0;
    let mut max_duration = 0;
    let mut seek_pending = options.seek_at;

    loop {
        max_duration = max_duration.max(buffer.stats().duration);

        match cursor.wait(STALL_TIMEOUT) {
            NextFrame::Ready(frame) => {
                consumed += 1;
                *per_stream.entry(frame.stream_index()).or_insert(0u64) += 1;
                // frame released here
            }
            NextFrame::Drained => break,
            NextFrame::NotYetAvailable => {
                warn!("Consumer stalled: {}", buffer.stats());
                anyhow::bail!("no frame within {:?}", STALL_TIMEOUT);
            }
        }

        if seek_pending.is_some_and(|at| consumed >= at) {
            seek_pending = None;
            flushed += cursor.seek();
            // Producers that already closed their stream won't close it again
            for (stream, done) in config.streams.iter().zip(finished) {
                if done.load(Ordering::SeqCst) {
                    buffer.close_stream(stream.index)?;
                }
            }
            info!("Seek after {} frames, flushed {}", consumed, flushed);
        }
    }

    info!("Consumer drained: {}", buffer.stats());
    Ok((consumed, per_stream, cursor.dropped(), flushed, max_duration))
}
