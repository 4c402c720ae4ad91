//! Analysis pipeline
//!
//! Splits the trace on the calling thread, then decodes, tags and validates
//! transactions on a pool of scoped worker threads. Output is ordered by
//! transaction index.

use std::collections::BTreeMap;
use std::thread;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::AnalyzerConfig;
use crate::correlation::validate_packets;
use crate::error::SplitError;
use crate::splitter::{split_transactions, LogicalTransaction, TransactionKind};
use crate::tagger::{decode_transaction, TaggedTransaction, TransactionDecode, TransactionTag};
use crate::trace::UrbEvent;

/// Request to response latency over command transactions (seconds)
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatencyStats {
    pub count: u64,
    pub min: f64,
    pub mean: f64,
    pub max: f64,
}

/// Counters over one analysis run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalysisSummary {
    pub events: u64,
    pub transactions: u64,
    pub by_kind: BTreeMap<TransactionKind, u64>,
    pub by_tag: BTreeMap<TransactionTag, u64>,
    /// Decoder anomalies across all packets
    pub packet_anomalies: u64,
    /// Transactions with at least one decoder anomaly
    pub anomalous_transactions: u64,
    /// Payloads too short to decode
    pub decode_errors: u64,
    /// Transactions with at least one correlation finding
    pub correlation_failures: u64,
    pub cancelled: u64,
    pub latency: Option<LatencyStats>,
}

impl AnalysisSummary {
    pub fn from_transactions(events: usize, transactions: &[TaggedTransaction]) -> Self {
        let mut summary = Self {
            events: events as u64,
            transactions: transactions.len() as u64,
            ..Default::default()
        };
        let mut latencies = Vec::new();

        for tagged in transactions {
            *summary.by_kind.entry(tagged.transaction.kind).or_default() += 1;
            *summary.by_tag.entry(tagged.tag).or_default() += 1;

            let anomalies = tagged.anomaly_count() as u64;
            summary.packet_anomalies += anomalies;
            if anomalies > 0 {
                summary.anomalous_transactions += 1;
            }
            summary.decode_errors += tagged.decode_errors.len() as u64;
            if !tagged.findings.is_empty() {
                summary.correlation_failures += 1;
            }
            if tagged.transaction.is_cancelled() {
                summary.cancelled += 1;
            }
            if matches!(
                tagged.tag,
                TransactionTag::BulkCommandResponse | TransactionTag::BulkFragmentedResponse
            ) {
                if let Some(latency) = tagged.transaction.latency() {
                    latencies.push(latency);
                }
            }
        }

        if !latencies.is_empty() {
            let count = latencies.len();
            summary.latency = Some(LatencyStats {
                count: count as u64,
                min: latencies.iter().copied().fold(f64::INFINITY, f64::min),
                mean: latencies.iter().sum::<f64>() / count as f64,
                max: latencies.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            });
        }
        summary
    }

    pub fn count_tag(&self, tag: TransactionTag) -> u64 {
        self.by_tag.get(&tag).copied().unwrap_or(0)
    }

    pub fn print_summary(&self) {
        eprintln!("\nAnalysis summary:");
        eprintln!("  URB events:           {}", self.events);
        eprintln!("  Transactions:         {}", self.transactions);
        for (kind, count) in &self.by_kind {
            eprintln!("    {:<20}{}", kind.name(), count);
        }
        eprintln!("  Tags:");
        for (tag, count) in &self.by_tag {
            eprintln!("    {:<20}{}", tag.name(), count);
        }
        eprintln!("  Packet anomalies:     {}", self.packet_anomalies);
        eprintln!("    In transactions:    {}", self.anomalous_transactions);
        eprintln!("  Decode errors:        {}", self.decode_errors);
        eprintln!("  Correlation failures: {}", self.correlation_failures);
        eprintln!("  Cancelled:            {}", self.cancelled);
        if let Some(latency) = &self.latency {
            eprintln!(
                "  Latency (n={}):      min {:.3} ms, mean {:.3} ms, max {:.3} ms",
                latency.count,
                latency.min * 1000.0,
                latency.mean * 1000.0,
                latency.max * 1000.0
            );
        }
    }
}

/// Result of one analysis run
#[derive(Debug, Clone)]
pub struct Analysis {
    pub transactions: Vec<TaggedTransaction>,
    pub summary: AnalysisSummary,
}

/// Decode, tag and optionally validate one transaction
pub fn process_transaction(transaction: &LogicalTransaction, validate: bool) -> TransactionDecode {
    let mut decode = decode_transaction(transaction);
    if validate {
        if let (Some(request), Some(response)) = (&decode.request, &decode.response) {
            decode.findings = validate_packets(request, response);
        }
    }
    decode
}

fn process_chunk(chunk: &[LogicalTransaction], validate: bool) -> Vec<TransactionDecode> {
    chunk
        .iter()
        .map(|t| process_transaction(t, validate))
        .collect()
}

fn worker_count(configured: usize) -> usize {
    if configured > 0 {
        return configured;
    }
    thread::available_parallelism().map_or(1, |n| n.get())
}

/// Process transactions across `workers` scoped threads, preserving order.
///
/// A chunk whose thread cannot be spawned is processed on the caller.
fn process_parallel(
    transactions: &[LogicalTransaction],
    workers: usize,
    validate: bool,
) -> Vec<TransactionDecode> {
    if workers <= 1 || transactions.len() < 2 {
        return process_chunk(transactions, validate);
    }
    let chunk_size = transactions.len().div_ceil(workers);

    thread::scope(|scope| {
        let mut pending = Vec::new();
        for (i, chunk) in transactions.chunks(chunk_size).enumerate() {
            let spawned = thread::Builder::new()
                .name(format!("km003c-decode-{}", i))
                .spawn_scoped(scope, move || process_chunk(chunk, validate));
            match spawned {
                Ok(handle) => pending.push(Chunk::Running(handle)),
                Err(e) => {
                    warn!("Failed to spawn decode worker {}: {}", i, e);
                    pending.push(Chunk::Done(process_chunk(chunk, validate)));
                }
            }
        }

        pending
            .into_iter()
            .flat_map(|chunk| match chunk {
                Chunk::Done(done) => done,
                Chunk::Running(handle) => match handle.join() {
                    Ok(done) => done,
                    Err(panic) => std::panic::resume_unwind(panic),
                },
            })
            .collect()
    })
}

enum Chunk<'scope> {
    Running(thread::ScopedJoinHandle<'scope, Vec<TransactionDecode>>),
    Done(Vec<TransactionDecode>),
}

/// Split, decode, tag and validate a frame-ordered trace
pub fn analyze(events: Vec<UrbEvent>, config: &AnalyzerConfig) -> Result<Analysis, SplitError> {
    let event_count = events.len();
    let split = split_transactions(events, &config.splitter)?;
    let workers = worker_count(config.pipeline.workers);
    info!(
        "Split {} events into {} transactions; decoding on {} workers",
        event_count,
        split.len(),
        workers
    );

    let decodes = process_parallel(&split, workers, config.pipeline.validate);
    let mut transactions: Vec<TaggedTransaction> = split
        .into_iter()
        .zip(decodes)
        .map(|(transaction, decode)| TaggedTransaction::new(transaction, decode))
        .collect();
    transactions.sort_by_key(TaggedTransaction::index);

    let summary = AnalysisSummary::from_transactions(event_count, &transactions);
    info!(
        "Analysis complete: {} anomalies, {} correlation failures",
        summary.packet_anomalies, summary.correlation_failures
    );
    Ok(Analysis {
        transactions,
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::EventKind;
    use km003c_protocol::{Attribute, ControlRequest, DataPacketBuilder, GetData};

    fn exchange(frame: u64, t: f64, id: u8, rx: &str, next_rx: &str) -> Vec<UrbEvent> {
        let request = GetData::new(&[Attribute::Adc]).build(id);
        let response = DataPacketBuilder::new(id)
            .segment(Attribute::Adc, 0, vec![0; 44])
            .build()
            .unwrap();
        vec![
            UrbEvent::bulk(frame, t, 0x01, EventKind::Submit, "tx", request),
            UrbEvent::bulk(frame + 1, t + 0.0001, 0x01, EventKind::Complete, "tx", vec![]),
            UrbEvent::bulk(frame + 2, t + 0.002, 0x81, EventKind::Complete, rx, response),
            UrbEvent::bulk(frame + 3, t + 0.0021, 0x81, EventKind::Submit, next_rx, vec![]),
        ]
    }

    fn trace(n: usize) -> Vec<UrbEvent> {
        let ids = ["r0", "r1"];
        (0..n)
            .flat_map(|i| {
                exchange(
                    1 + 4 * i as u64,
                    i as f64 * 0.1,
                    i as u8,
                    ids[i % 2],
                    ids[(i + 1) % 2],
                )
            })
            .collect()
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let events = trace(37);
        let mut sequential = AnalyzerConfig::default();
        sequential.pipeline.workers = 1;
        let mut parallel = AnalyzerConfig::default();
        parallel.pipeline.workers = 4;

        let a = analyze(events.clone(), &sequential).unwrap();
        let b = analyze(events, &parallel).unwrap();
        assert_eq!(a.transactions.len(), 37);
        assert_eq!(a.summary, b.summary);
        for (x, y) in a.transactions.iter().zip(&b.transactions) {
            assert_eq!(x.index(), y.index());
            assert_eq!(x.tag, y.tag);
            assert_eq!(x.response, y.response);
        }
        let indices: Vec<usize> = b.transactions.iter().map(|t| t.index()).collect();
        assert_eq!(indices, (1..=37).collect::<Vec<_>>());
    }

    #[test]
    fn test_summary_counts() {
        let analysis = analyze(trace(3), &AnalyzerConfig::default()).unwrap();
        let summary = &analysis.summary;
        assert_eq!(summary.events, 12);
        assert_eq!(summary.transactions, 3);
        assert_eq!(summary.count_tag(TransactionTag::BulkCommandResponse), 3);
        assert_eq!(summary.correlation_failures, 0);
        assert_eq!(summary.packet_anomalies, 0);
        let latency = summary.latency.unwrap();
        assert_eq!(latency.count, 3);
        assert!((latency.mean - 0.002).abs() < 1e-9);
    }

    #[test]
    fn test_validation_flags_id_mismatch() {
        let mut events = trace(1);
        events[2].payload[1] = 0x7F;
        let analysis = analyze(events.clone(), &AnalyzerConfig::default()).unwrap();
        assert_eq!(analysis.summary.correlation_failures, 1);

        let mut config = AnalyzerConfig::default();
        config.pipeline.validate = false;
        let analysis = analyze(events, &config).unwrap();
        assert_eq!(analysis.summary.correlation_failures, 0);
    }

    #[test]
    fn test_out_of_order_is_an_error() {
        let mut events = trace(2);
        events.swap(0, 5);
        assert!(matches!(
            analyze(events, &AnalyzerConfig::default()),
            Err(SplitError::OutOfOrder { .. })
        ));
    }
}
