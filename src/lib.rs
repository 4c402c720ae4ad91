// POWER-Z KM003C capture analyzer - Shared Library
// URB trace loading, transaction splitting, tagging and correlation checks

pub mod config;
pub mod correlation;
pub mod error;
pub mod pipeline;
pub mod printer;
pub mod splitter;
pub mod tagger;
pub mod trace;

pub use config::{AnalyzerConfig, PipelineConfig, SplitterConfig};
pub use correlation::{
    requested_attributes, validate, validate_packets, CorrelationFinding, CorrelationRequest,
    CorrelationResponse,
};
pub use error::{SplitError, TraceError};
pub use pipeline::{analyze, Analysis, AnalysisSummary, LatencyStats};
pub use printer::{OutputFormat, Printer, TransactionFilter};
pub use splitter::{
    check_order, split_transactions, LogicalTransaction, TransactionKind, TransactionNote,
};
pub use tagger::{tag_transaction, TaggedTransaction, TransactionTag};
pub use trace::{
    load_trace, parse_record, parse_trace, ControlSetup, Direction, EventKind, RequestId,
    TransferType, UrbEvent, UrbStatus,
};

pub use km003c_protocol as protocol;
