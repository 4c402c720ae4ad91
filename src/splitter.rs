//! Transaction splitter
//!
//! Groups a frame-ordered URB stream into logical transactions in one
//! forward pass. Bulk command exchanges follow a four-event shape:
//!
//! ```text
//! S  OUT  command payload
//! C  OUT  (empty ack, same URB as the Submit)
//! C  IN   response payload (URB primed by the previous exchange)
//! S  IN   empty, primes the receive buffer for the next exchange
//! ```
//!
//! The last Submit belongs to the next exchange's receive path but is kept
//! with the current one. A response spread over several IN transfers adds
//! one `C IN` / `S IN` pair per extra fragment. URB ids are reused kernel addresses, so they are
//! only compared against the immediately neighbouring events and a small
//! window of outstanding IN buffers, never used as a lookup key.

use std::collections::VecDeque;

use serde::Serialize;
use tracing::{debug, trace};

use crate::config::SplitterConfig;
use crate::error::SplitError;
use crate::trace::{Direction, RequestId, TransferType, UrbEvent};

/// Structural shape of a reconstructed transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum TransactionKind {
    /// Control Submit through its terminal Complete
    Control,
    /// Full four-event bulk exchange
    BulkCommandResponse,
    /// Bulk exchange whose response spans several IN transfers, each
    /// followed by its own pre-positioning Submit
    BulkFragmentedResponse,
    /// Submit/Complete pair without a command payload
    BulkPollingOnly,
    /// Unmatched Submit or Complete
    Orphan,
    /// Partial shape, or a cancellation was observed
    Malformed,
}

impl TransactionKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Control => "Control",
            Self::BulkCommandResponse => "BulkCommandResponse",
            Self::BulkFragmentedResponse => "BulkFragmentedResponse",
            Self::BulkPollingOnly => "BulkPollingOnly",
            Self::Orphan => "Orphan",
            Self::Malformed => "Malformed",
        }
    }
}

/// Annotation left by the splitter on a transaction
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "note")]
pub enum TransactionNote {
    /// A member event reported an unlinked URB
    Cancelled { frame: u64 },
    /// Submit with no Complete before the pattern ended
    UnmatchedSubmit { frame: u64 },
    /// Complete with no Submit in this transaction
    UnmatchedComplete { frame: u64 },
    /// Command Submit not followed by its OUT Complete
    MissingAck,
    /// Command not followed by an IN Complete
    MissingResponse,
    /// Response not followed by a pre-positioning IN Submit in time
    MissingPreposition,
    /// Pre-positioning Submit arrived outside the latency window but before
    /// the boundary gap
    LatePreposition { gap_s: f64 },
    /// IN Complete whose URB was not among the outstanding primed buffers
    UnprimedResponse { frame: u64 },
}

/// One reconstructed request/response unit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogicalTransaction {
    /// 1-based, in order of first frame
    pub index: usize,
    pub events: Vec<UrbEvent>,
    pub kind: TransactionKind,
    pub notes: Vec<TransactionNote>,
}

impl LogicalTransaction {
    pub fn first_frame(&self) -> u64 {
        self.events.first().map_or(0, |e| e.frame_number)
    }

    pub fn last_frame(&self) -> u64 {
        self.events.last().map_or(0, |e| e.frame_number)
    }

    pub fn start_time(&self) -> f64 {
        self.events.first().map_or(0.0, |e| e.timestamp)
    }

    pub fn duration(&self) -> f64 {
        match (self.events.first(), self.events.last()) {
            (Some(first), Some(last)) => last.timestamp - first.timestamp,
            _ => 0.0,
        }
    }

    pub fn transfer_type(&self) -> Option<TransferType> {
        self.events.first().map(|e| e.transfer_type)
    }

    /// First non-empty OUT payload
    pub fn request_event(&self) -> Option<&UrbEvent> {
        self.events
            .iter()
            .find(|e| e.direction() == Direction::Out && e.has_payload())
    }

    /// First non-empty IN payload
    pub fn response_event(&self) -> Option<&UrbEvent> {
        self.events
            .iter()
            .find(|e| e.direction() == Direction::In && e.has_payload())
    }

    /// All non-empty IN payloads joined in frame order
    pub fn response_payload(&self) -> Option<Vec<u8>> {
        let mut fragments = self
            .events
            .iter()
            .filter(|e| e.direction() == Direction::In && e.has_payload())
            .peekable();
        fragments.peek()?;
        Some(fragments.flat_map(|e| e.payload.iter().copied()).collect())
    }

    /// Seconds from the request Submit to the response Complete
    pub fn latency(&self) -> Option<f64> {
        let request = self.request_event()?;
        let response = self.response_event()?;
        Some(response.timestamp - request.timestamp)
    }

    pub fn is_cancelled(&self) -> bool {
        self.notes
            .iter()
            .any(|n| matches!(n, TransactionNote::Cancelled { .. }))
    }
}

/// Transaction under construction: a run of `len` events from the cursor
struct Draft {
    len: usize,
    kind: TransactionKind,
    notes: Vec<TransactionNote>,
}

/// Per-pass state, local to one call of [`split_transactions`]
struct SplitState<'a> {
    config: &'a SplitterConfig,
    /// Running estimate of host-side gaps inside one exchange (seconds)
    latency: f64,
    /// Outstanding IN buffers, oldest first, at most `config.lookback`
    primed: VecDeque<RequestId>,
    drafts: Vec<Draft>,
}

impl<'a> SplitState<'a> {
    fn new(config: &'a SplitterConfig) -> Self {
        Self {
            config,
            latency: config.initial_latency_s,
            primed: VecDeque::with_capacity(config.lookback),
            drafts: Vec::new(),
        }
    }

    fn preposition_window(&self) -> f64 {
        (self.latency * self.config.preposition_latency_multiple)
            .max(self.config.min_preposition_window_s)
    }

    fn boundary_gap(&self) -> f64 {
        (self.latency * self.config.boundary_latency_multiple).max(self.preposition_window())
    }

    fn observe_gap(&mut self, gap: f64) {
        if gap.is_finite() && gap >= 0.0 {
            self.latency += (gap - self.latency) / 8.0;
        }
    }

    fn prime(&mut self, id: &RequestId) {
        if self.config.lookback == 0 {
            return;
        }
        if self.primed.len() == self.config.lookback {
            self.primed.pop_front();
        }
        self.primed.push_back(id.clone());
    }

    /// Consume a primed buffer. `None` when the window is empty (nothing to
    /// judge against, e.g. at the start of a capture).
    fn take_primed(&mut self, id: &RequestId) -> Option<bool> {
        if self.primed.is_empty() {
            return None;
        }
        match self.primed.iter().position(|p| p == id) {
            Some(pos) => {
                self.primed.remove(pos);
                Some(true)
            }
            None => Some(false),
        }
    }

    fn push(&mut self, draft: Draft) {
        if matches!(
            draft.kind,
            TransactionKind::Orphan | TransactionKind::Malformed
        ) {
            debug!(
                "Transaction {} is {}: {:?}",
                self.drafts.len() + 1,
                draft.kind.name(),
                draft.notes
            );
        }
        self.drafts.push(draft);
    }

    /// Attach a cancelled event to the transaction it follows, when it
    /// shares a URB with it or arrives within the boundary gap.
    fn attach_cancelled(&mut self, events: &[UrbEvent], cursor: usize) -> bool {
        let event = &events[cursor];
        let boundary = self.boundary_gap();
        let Some(last) = self.drafts.last_mut() else {
            return false;
        };
        let members = &events[cursor - last.len..cursor];
        let shares_urb = members.iter().any(|m| m.request_id == event.request_id);
        let close = members
            .last()
            .is_some_and(|m| event.timestamp - m.timestamp <= boundary);
        if !(shares_urb || close) {
            return false;
        }
        last.len += 1;
        last.kind = TransactionKind::Malformed;
        last.notes.push(TransactionNote::Cancelled {
            frame: event.frame_number,
        });
        debug!(
            "Cancelled frame {} attached to transaction {}",
            event.frame_number,
            self.drafts.len()
        );
        self.primed.retain(|p| *p != event.request_id);
        true
    }

    fn control(&self, events: &[UrbEvent], cursor: usize) -> Draft {
        let start = &events[cursor];
        if !start.is_submit() {
            return Draft {
                len: 1,
                kind: TransactionKind::Orphan,
                notes: vec![TransactionNote::UnmatchedComplete {
                    frame: start.frame_number,
                }],
            };
        }

        let mut len = 1;
        let mut completed = false;
        for event in &events[cursor + 1..] {
            if !event.is_control() || event.request_id != start.request_id {
                break;
            }
            len += 1;
            if event.is_complete() {
                completed = true;
                break;
            }
        }

        let mut notes = cancellations(&events[cursor..cursor + len]);
        let kind = if completed && notes.is_empty() {
            TransactionKind::Control
        } else if completed {
            TransactionKind::Malformed
        } else {
            notes.push(TransactionNote::UnmatchedSubmit {
                frame: start.frame_number,
            });
            incomplete_kind(events, cursor + len)
        };
        Draft { len, kind, notes }
    }

    fn command(&mut self, events: &[UrbEvent], cursor: usize) -> Draft {
        let cfg = self.config;
        let command = &events[cursor];
        let mut next = cursor + 1;
        let mut notes = Vec::new();
        let mut shape_complete = true;

        // Ack: OUT Complete of the same URB
        match events.get(next) {
            Some(e)
                if e.is_bulk()
                    && e.is_complete()
                    && e.endpoint_address == cfg.out_endpoint
                    && e.request_id == command.request_id =>
            {
                self.observe_gap(e.timestamp - command.timestamp);
                next += 1;
            }
            _ => {
                notes.push(TransactionNote::MissingAck);
                shape_complete = false;
            }
        }

        // Response: IN Complete on a previously primed buffer
        let mut responded = false;
        match events.get(next) {
            Some(e) if e.is_bulk() && e.is_complete() && e.endpoint_address == cfg.in_endpoint => {
                if self.take_primed(&e.request_id) == Some(false) {
                    notes.push(TransactionNote::UnprimedResponse {
                        frame: e.frame_number,
                    });
                }
                responded = true;
                next += 1;
            }
            _ => {
                notes.push(TransactionNote::MissingResponse);
                shape_complete = false;
            }
        }

        // Pre-positioning Submit for the next exchange
        let mut prepositioned = false;
        if responded {
            let window = self.preposition_window();
            let boundary = self.boundary_gap();
            let response_time = events[next - 1].timestamp;
            match events.get(next) {
                Some(e)
                    if e.is_bulk()
                        && e.is_submit()
                        && e.endpoint_address == cfg.in_endpoint
                        && !e.has_payload()
                        && e.timestamp - response_time <= boundary =>
                {
                    let gap = e.timestamp - response_time;
                    if gap <= window {
                        self.observe_gap(gap);
                    } else {
                        notes.push(TransactionNote::LatePreposition { gap_s: gap });
                    }
                    self.prime(&e.request_id);
                    prepositioned = true;
                    next += 1;
                }
                _ => {
                    notes.push(TransactionNote::MissingPreposition);
                    shape_complete = false;
                }
            }
        }

        // Further response transfers, each re-primed before the next command
        let mut fragments = 0;
        while prepositioned && self.continuation(events, next) {
            if self.take_primed(&events[next].request_id) == Some(false) {
                notes.push(TransactionNote::UnprimedResponse {
                    frame: events[next].frame_number,
                });
            }
            self.prime(&events[next + 1].request_id);
            fragments += 1;
            next += 2;
        }

        let len = next - cursor;
        let cancelled = cancellations(&events[cursor..next]);
        let kind = if !cancelled.is_empty() {
            TransactionKind::Malformed
        } else if shape_complete && fragments > 0 {
            TransactionKind::BulkFragmentedResponse
        } else if shape_complete {
            TransactionKind::BulkCommandResponse
        } else if len == 1 {
            notes = vec![TransactionNote::UnmatchedSubmit {
                frame: command.frame_number,
            }];
            incomplete_kind(events, next)
        } else {
            incomplete_kind(events, next)
        };
        notes.extend(cancelled);
        Draft { len, kind, notes }
    }

    /// An IN Complete carrying data right after a pre-positioning Submit,
    /// itself followed by the next pre-positioning Submit. Both must fall
    /// within the boundary gap of the event before them.
    fn continuation(&self, events: &[UrbEvent], at: usize) -> bool {
        let cfg = self.config;
        let boundary = self.boundary_gap();
        let (Some(previous), Some(data), Some(resubmit)) =
            (events.get(at.wrapping_sub(1)), events.get(at), events.get(at + 1))
        else {
            return false;
        };
        let is_data = data.is_bulk()
            && data.is_complete()
            && data.endpoint_address == cfg.in_endpoint
            && data.has_payload()
            && !data.status.is_cancelled()
            && data.timestamp - previous.timestamp <= boundary;
        let is_resubmit = resubmit.is_bulk()
            && resubmit.is_submit()
            && resubmit.endpoint_address == cfg.in_endpoint
            && !resubmit.has_payload()
            && resubmit.timestamp - data.timestamp <= boundary;
        is_data && is_resubmit
    }

    /// Bulk event that does not start a command exchange
    fn polling(&mut self, events: &[UrbEvent], cursor: usize) -> Draft {
        let cfg = self.config;
        let event = &events[cursor];

        if event.is_complete() {
            let mut notes = vec![TransactionNote::UnmatchedComplete {
                frame: event.frame_number,
            }];
            if event.endpoint_address == cfg.in_endpoint
                && self.take_primed(&event.request_id) != Some(true)
            {
                notes.push(TransactionNote::UnprimedResponse {
                    frame: event.frame_number,
                });
            }
            return Draft {
                len: 1,
                kind: TransactionKind::Orphan,
                notes,
            };
        }

        match events.get(cursor + 1) {
            Some(e)
                if e.is_bulk()
                    && e.is_complete()
                    && e.endpoint_address == event.endpoint_address
                    && e.request_id == event.request_id =>
            {
                let notes = cancellations(&events[cursor..cursor + 2]);
                let kind = if notes.is_empty() {
                    TransactionKind::BulkPollingOnly
                } else {
                    TransactionKind::Malformed
                };
                Draft {
                    len: 2,
                    kind,
                    notes,
                }
            }
            _ => {
                if event.endpoint_address == cfg.in_endpoint {
                    self.prime(&event.request_id);
                }
                Draft {
                    len: 1,
                    kind: TransactionKind::Orphan,
                    notes: vec![TransactionNote::UnmatchedSubmit {
                        frame: event.frame_number,
                    }],
                }
            }
        }
    }

    fn is_command(&self, event: &UrbEvent) -> bool {
        event.is_bulk()
            && event.is_submit()
            && event.endpoint_address == self.config.out_endpoint
            && event.has_payload()
    }
}

fn cancellations(members: &[UrbEvent]) -> Vec<TransactionNote> {
    members
        .iter()
        .filter(|e| e.status.is_cancelled())
        .map(|e| TransactionNote::Cancelled {
            frame: e.frame_number,
        })
        .collect()
}

/// A partial shape cut off by the end of the stream is an orphan; one cut
/// off by another transaction is malformed.
fn incomplete_kind(events: &[UrbEvent], next: usize) -> TransactionKind {
    if next >= events.len() {
        TransactionKind::Orphan
    } else {
        TransactionKind::Malformed
    }
}

/// Verify frame numbers strictly increase
pub fn check_order(events: &[UrbEvent]) -> Result<(), SplitError> {
    for (i, pair) in events.windows(2).enumerate() {
        if pair[1].frame_number <= pair[0].frame_number {
            return Err(SplitError::OutOfOrder {
                position: i + 1,
                previous: pair[0].frame_number,
                frame: pair[1].frame_number,
            });
        }
    }
    Ok(())
}

/// Split a frame-ordered URB stream into logical transactions.
///
/// Every event lands in exactly one transaction, and transactions are
/// contiguous runs of the input. Unexpected shapes become `Orphan` or
/// `Malformed` transactions; only out-of-order input is an error.
pub fn split_transactions(
    events: Vec<UrbEvent>,
    config: &SplitterConfig,
) -> Result<Vec<LogicalTransaction>, SplitError> {
    check_order(&events)?;

    let mut state = SplitState::new(config);
    let mut cursor = 0;
    while cursor < events.len() {
        let event = &events[cursor];

        if event.status.is_cancelled()
            && !state.is_command(event)
            && state.attach_cancelled(&events, cursor)
        {
            cursor += 1;
            continue;
        }

        let draft = if event.is_control() {
            state.control(&events, cursor)
        } else if state.is_command(event) {
            state.command(&events, cursor)
        } else {
            state.polling(&events, cursor)
        };
        trace!(
            "Frames {}..{} -> {}",
            event.frame_number,
            events[cursor + draft.len - 1].frame_number,
            draft.kind.name()
        );
        cursor += draft.len;
        state.push(draft);
    }

    let mut remaining = events.into_iter();
    Ok(state
        .drafts
        .into_iter()
        .enumerate()
        .map(|(i, draft)| LogicalTransaction {
            index: i + 1,
            events: remaining.by_ref().take(draft.len).collect(),
            kind: draft.kind,
            notes: draft.notes,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{ControlSetup, EventKind, UrbStatus};

    const OUT: u8 = 0x01;
    const IN: u8 = 0x81;

    /// Four-event exchange starting at `frame`/`t`; the response completes
    /// `rx` and the new buffer is `next_rx`
    fn exchange(frame: u64, t: f64, tx: &str, rx: &str, next_rx: &str) -> Vec<UrbEvent> {
        vec![
            UrbEvent::bulk(frame, t, OUT, EventKind::Submit, tx, vec![0x0C, 0x06, 0x02, 0x00]),
            UrbEvent::bulk(frame + 1, t + 0.0001, OUT, EventKind::Complete, tx, vec![]),
            UrbEvent::bulk(
                frame + 2,
                t + 0.0010,
                IN,
                EventKind::Complete,
                rx,
                vec![0x41, 0x06, 0x00, 0x00],
            ),
            UrbEvent::bulk(frame + 3, t + 0.0011, IN, EventKind::Submit, next_rx, vec![]),
        ]
    }

    fn split(events: Vec<UrbEvent>) -> Vec<LogicalTransaction> {
        split_transactions(events, &SplitterConfig::default()).unwrap()
    }

    #[test]
    fn test_single_exchange() {
        let txs = split(exchange(1, 0.0, "a", "b", "b"));
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].index, 1);
        assert_eq!(txs[0].kind, TransactionKind::BulkCommandResponse);
        assert_eq!(txs[0].events.len(), 4);
        assert!(txs[0].notes.is_empty());
    }

    #[test]
    fn test_reused_ids_across_exchanges() {
        // The buffer primed by exchange 1 ("b") completes in exchange 2,
        // and the command URB "a" is reused for every command.
        let mut events = exchange(1, 0.0, "a", "b", "b");
        events.extend(exchange(5, 0.2, "a", "b", "c"));
        events.extend(exchange(9, 0.4, "a", "c", "b"));
        let txs = split(events);
        assert_eq!(txs.len(), 3);
        for (i, tx) in txs.iter().enumerate() {
            assert_eq!(tx.index, i + 1);
            assert_eq!(tx.kind, TransactionKind::BulkCommandResponse);
            assert!(tx.notes.is_empty(), "{:?}", tx.notes);
        }
        assert_eq!(txs[1].first_frame(), 5);
        assert_eq!(txs[2].last_frame(), 12);
    }

    #[test]
    fn test_unprimed_response_noted() {
        let mut events = exchange(1, 0.0, "a", "b", "c");
        events.extend(exchange(5, 0.2, "a", "zz", "d"));
        let txs = split(events);
        assert_eq!(txs[1].kind, TransactionKind::BulkCommandResponse);
        assert_eq!(
            txs[1].notes,
            vec![TransactionNote::UnprimedResponse { frame: 7 }]
        );
    }

    #[test]
    fn test_late_preposition_becomes_own_transaction() {
        let mut events = exchange(1, 0.0, "a", "b", "c");
        events[3].timestamp = 0.5;
        let txs = split(events);
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].events.len(), 3);
        assert_eq!(txs[0].kind, TransactionKind::Malformed);
        assert!(txs[0].notes.contains(&TransactionNote::MissingPreposition));
        assert_eq!(txs[1].kind, TransactionKind::Orphan);
    }

    #[test]
    fn test_preposition_between_window_and_boundary() {
        let mut events = exchange(1, 0.0, "a", "b", "c");
        // Window is 2 ms, boundary 6.4 ms at the default latency
        events[3].timestamp = events[2].timestamp + 0.004;
        let txs = split(events);
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].kind, TransactionKind::BulkCommandResponse);
        assert!(matches!(
            txs[0].notes[..],
            [TransactionNote::LatePreposition { .. }]
        ));
    }

    #[test]
    fn test_command_without_complete_at_end() {
        let events = vec![UrbEvent::bulk(
            1,
            0.0,
            OUT,
            EventKind::Submit,
            "a",
            vec![0x0C, 0x01, 0x02, 0x00],
        )];
        let txs = split(events);
        assert_eq!(txs[0].kind, TransactionKind::Orphan);
        assert_eq!(txs[0].notes, vec![TransactionNote::UnmatchedSubmit { frame: 1 }]);
    }

    #[test]
    fn test_command_interrupted_by_next_command() {
        let mut events = vec![
            UrbEvent::bulk(1, 0.0, OUT, EventKind::Submit, "a", vec![0x0C, 0x01, 0x02, 0x00]),
            UrbEvent::bulk(2, 0.0001, OUT, EventKind::Complete, "a", vec![]),
        ];
        events.extend(exchange(3, 0.1, "a", "b", "c"));
        let txs = split(events);
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].kind, TransactionKind::Malformed);
        assert_eq!(txs[0].notes, vec![TransactionNote::MissingResponse]);
        assert_eq!(txs[1].kind, TransactionKind::BulkCommandResponse);
    }

    #[test]
    fn test_polling_pairs() {
        let events = vec![
            UrbEvent::bulk(1, 0.0, IN, EventKind::Submit, "p", vec![]),
            UrbEvent::bulk(2, 0.01, IN, EventKind::Complete, "p", vec![]),
            UrbEvent::bulk(3, 0.02, IN, EventKind::Submit, "p", vec![]),
            UrbEvent::bulk(4, 0.03, IN, EventKind::Complete, "p", vec![]),
        ];
        let txs = split(events);
        assert_eq!(txs.len(), 2);
        assert!(txs.iter().all(|t| t.kind == TransactionKind::BulkPollingOnly));
        assert!(txs.iter().all(|t| t.events.len() == 2));
    }

    #[test]
    fn test_stray_in_complete_is_orphan() {
        let events = vec![UrbEvent::bulk(
            1,
            0.0,
            IN,
            EventKind::Complete,
            "q",
            vec![0x41, 0, 0, 0],
        )];
        let txs = split(events);
        assert_eq!(txs[0].kind, TransactionKind::Orphan);
        assert_eq!(
            txs[0].notes,
            vec![
                TransactionNote::UnmatchedComplete { frame: 1 },
                TransactionNote::UnprimedResponse { frame: 1 }
            ]
        );
    }

    #[test]
    fn test_cancelled_buffer_attached_to_previous() {
        let mut events = exchange(1, 0.0, "a", "b", "c");
        events.push(
            UrbEvent::bulk(5, 3.0, IN, EventKind::Complete, "c", vec![])
                .with_status(UrbStatus::Cancelled),
        );
        let txs = split(events);
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].events.len(), 5);
        assert_eq!(txs[0].kind, TransactionKind::Malformed);
        assert!(txs[0].is_cancelled());
        assert_eq!(txs[0].notes, vec![TransactionNote::Cancelled { frame: 5 }]);
    }

    #[test]
    fn test_cancelled_response_inside_exchange() {
        let mut events = exchange(1, 0.0, "a", "b", "c");
        events[2].status = UrbStatus::Cancelled;
        let txs = split(events);
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].kind, TransactionKind::Malformed);
        assert_eq!(txs[0].notes, vec![TransactionNote::Cancelled { frame: 3 }]);
    }

    #[test]
    fn test_cancelled_command_starts_own_transaction() {
        let mut events = exchange(1, 0.0, "a", "b", "c");
        events.push(
            UrbEvent::bulk(5, 0.0015, OUT, EventKind::Submit, "a", vec![0x0C, 0x02, 0x02, 0x00])
                .with_status(UrbStatus::Cancelled),
        );
        let txs = split(events);
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].kind, TransactionKind::BulkCommandResponse);
        assert_eq!(txs[0].events.len(), 4);
        assert!(txs[0].notes.is_empty());
        assert_eq!(txs[1].kind, TransactionKind::Malformed);
        assert_eq!(txs[1].first_frame(), 5);
        assert_eq!(
            txs[1].notes,
            vec![
                TransactionNote::MissingAck,
                TransactionNote::MissingResponse,
                TransactionNote::Cancelled { frame: 5 },
            ]
        );
    }

    #[test]
    fn test_fragmented_response() {
        let mut events = exchange(1, 0.0, "a", "b", "c");
        events.push(UrbEvent::bulk(5, 0.0012, IN, EventKind::Complete, "c", vec![0; 8]));
        events.push(UrbEvent::bulk(6, 0.0013, IN, EventKind::Submit, "d", vec![]));
        events.extend(exchange(7, 0.5, "a", "d", "e"));
        let txs = split(events);
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].kind, TransactionKind::BulkFragmentedResponse);
        assert_eq!(txs[0].events.len(), 6);
        assert!(txs[0].notes.is_empty());
        assert_eq!(txs[0].response_payload().map(|p| p.len()), Some(12));
        // The last fragment's Submit primes the next exchange
        assert_eq!(txs[1].kind, TransactionKind::BulkCommandResponse);
        assert!(txs[1].notes.is_empty());
    }

    #[test]
    fn test_late_fragment_not_absorbed() {
        let mut events = exchange(1, 0.0, "a", "b", "c");
        events.push(UrbEvent::bulk(5, 2.0, IN, EventKind::Complete, "c", vec![0; 8]));
        events.push(UrbEvent::bulk(6, 2.0001, IN, EventKind::Submit, "d", vec![]));
        let txs = split(events);
        assert_eq!(txs[0].kind, TransactionKind::BulkCommandResponse);
        assert_eq!(txs[0].events.len(), 4);
        assert_eq!(txs[1].kind, TransactionKind::Orphan);
    }

    #[test]
    fn test_control_transfer() {
        let setup = ControlSetup {
            bm_request_type: 0x80,
            b_request: 6,
            w_value: 0x0100,
            w_index: 0,
            w_length: 18,
        };
        let events = vec![
            UrbEvent::control(1, 0.0, 0x80, EventKind::Submit, "c0").with_setup(setup),
            UrbEvent::control(2, 0.001, 0x80, EventKind::Complete, "c0")
                .with_payload(vec![0x12, 0x01]),
            UrbEvent::control(3, 0.002, 0x80, EventKind::Submit, "c0").with_setup(setup),
        ];
        let txs = split(events);
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].kind, TransactionKind::Control);
        assert_eq!(txs[0].events.len(), 2);
        assert_eq!(txs[1].kind, TransactionKind::Orphan);
    }

    #[test]
    fn test_out_of_order_rejected() {
        let mut events = exchange(1, 0.0, "a", "b", "c");
        events.swap(1, 2);
        let err = split_transactions(events, &SplitterConfig::default()).unwrap_err();
        assert_eq!(
            err,
            SplitError::OutOfOrder {
                position: 2,
                previous: 3,
                frame: 2
            }
        );
    }

    #[test]
    fn test_empty_input() {
        assert!(split(Vec::new()).is_empty());
    }
}
