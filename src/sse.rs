//! Server-Sent Events protocol
//!
//! Wire unit, incremental decoder, typed event catalogue, the per-connection
//! writer and the per-step progress heartbeat.

use crate::models::{ExecutionResult, PlanStep, ProviderTag};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::debug;

//
// ================= Wire unit =================
//

#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event: String,
    pub data: Value,
}

impl SseEvent {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// `event: <name>\ndata: <JSON>\n\n`
    pub fn encode(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.event, self.data)
    }
}

//
// ================= Decoder =================
//

/// Incremental SSE decoder.
///
/// Bytes may arrive split anywhere, including inside a UTF-8 sequence;
/// events are only decoded once their terminating blank line is buffered.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every event it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut events = Vec::new();
        while let Some(pos) = find_blank_line(&self.buffer) {
            let block: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            if let Some(event) = parse_block(&String::from_utf8_lossy(&block[..pos])) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing event that was not followed by a blank line
    pub fn finish(&mut self) -> Option<SseEvent> {
        let rest = std::mem::take(&mut self.buffer);
        parse_block(&String::from_utf8_lossy(&rest))
    }
}

fn find_blank_line(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event_name: Option<&str> = None;
    let mut data_lines: Vec<&str> = Vec::new();

    for line in block.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => event_name = Some(value.trim()),
            "data" => data_lines.push(value),
            _ => {}
        }
    }

    if event_name.is_none() && data_lines.is_empty() {
        return None;
    }

    let raw = data_lines.join("\n");
    let data = serde_json::from_str(&raw).unwrap_or(Value::String(raw));

    Some(SseEvent::new(event_name.unwrap_or("message"), data))
}

//
// ================= Event catalogue =================
//

/// Counters reported by the plan-run terminal event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunTotals {
    pub steps_completed: usize,
    pub steps_failed: usize,
    pub total_steps: usize,
}

#[derive(Debug, Clone)]
pub enum ResearchEvent {
    Status { message: String },
    Plan { steps: Vec<PlanStep> },
    StepStart { step_index: usize, total_steps: usize, step: PlanStep },
    StepProgress { step_index: usize, progress_message: String, elapsed_time: f64 },
    StepComplete { step_index: usize, step: PlanStep, provider: ProviderTag, summary: Option<String> },
    StepError { step_index: usize, step: PlanStep, error: String },
    ExecutionResults { results: Vec<ExecutionResult> },
    Summary { summary: String },
    Done { totals: RunTotals, run_id: String },
    Delta { content: String },
    AnswerDone { chunks: usize, characters: usize },
    Error { message: String },
}

impl ResearchEvent {
    pub fn status(message: impl Into<String>) -> Self {
        ResearchEvent::Status { message: message.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ResearchEvent::Error { message: message.into() }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ResearchEvent::Status { .. } => "status",
            ResearchEvent::Plan { .. } => "plan",
            ResearchEvent::StepStart { .. } => "stepStart",
            ResearchEvent::StepProgress { .. } => "stepProgress",
            ResearchEvent::StepComplete { .. } => "stepComplete",
            ResearchEvent::StepError { .. } => "stepError",
            ResearchEvent::ExecutionResults { .. } => "executionResults",
            ResearchEvent::Summary { .. } => "summary",
            ResearchEvent::Done { .. } | ResearchEvent::AnswerDone { .. } => "done",
            ResearchEvent::Delta { .. } => "delta",
            ResearchEvent::Error { .. } => "error",
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            ResearchEvent::Status { message } => json!({ "message": message }),
            ResearchEvent::Plan { steps } => json!({ "steps": steps }),
            ResearchEvent::StepStart { step_index, total_steps, step } => json!({
                "stepIndex": step_index,
                "totalSteps": total_steps,
                "step": step,
            }),
            ResearchEvent::StepProgress { step_index, progress_message, elapsed_time } => json!({
                "stepIndex": step_index,
                "progressMessage": progress_message,
                "elapsedTime": elapsed_time,
            }),
            ResearchEvent::StepComplete { step_index, step, provider, summary } => json!({
                "stepIndex": step_index,
                "step": step,
                "provider": provider,
                "summary": summary,
            }),
            ResearchEvent::StepError { step_index, step, error } => json!({
                "stepIndex": step_index,
                "step": step,
                "error": error,
            }),
            ResearchEvent::ExecutionResults { results } => json!({ "results": results }),
            ResearchEvent::Summary { summary } => json!({ "summary": summary }),
            ResearchEvent::Done { totals, run_id } => json!({
                "stepsCompleted": totals.steps_completed,
                "stepsFailed": totals.steps_failed,
                "totalSteps": totals.total_steps,
                "runId": run_id,
            }),
            ResearchEvent::Delta { content } => json!({ "content": content }),
            ResearchEvent::AnswerDone { chunks, characters } => json!({
                "chunks": chunks,
                "characters": characters,
            }),
            ResearchEvent::Error { message } => json!({ "message": message }),
        }
    }

    pub fn to_sse(&self) -> SseEvent {
        SseEvent::new(self.name(), self.payload())
    }
}

//
// ================= Writer =================
//

/// Clonable writer for one SSE connection.
///
/// Emitting after the client disconnected, or after `close`, is a silent no-op.
#[derive(Clone)]
pub struct EventSink {
    tx: Arc<Mutex<Option<UnboundedSender<SseEvent>>>>,
}

impl EventSink {
    pub fn channel() -> (Self, UnboundedReceiver<SseEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// Write one event; returns false once the stream is gone
    pub fn emit(&self, event: ResearchEvent) -> bool {
        let Ok(mut guard) = self.tx.lock() else {
            return false;
        };
        let Some(tx) = guard.as_ref() else {
            return false;
        };

        if tx.send(event.to_sse()).is_err() {
            debug!(event = event.name(), "client went away; dropping further events");
            *guard = None;
            return false;
        }
        true
    }

    pub fn is_closed(&self) -> bool {
        match self.tx.lock() {
            Ok(guard) => guard.as_ref().map_or(true, |tx| tx.is_closed()),
            Err(_) => true,
        }
    }

    /// Close the stream. Later calls do nothing.
    pub fn close(&self) {
        if let Ok(mut guard) = self.tx.lock() {
            guard.take();
        }
    }
}

//
// ================= Heartbeat =================
//

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Canned progress text for the time a step has been running
pub fn progress_message(elapsed: Duration) -> &'static str {
    match elapsed.as_secs() {
        0..=4 => "Analyzing data...",
        5..=9 => "Processing insights...",
        10..=14 => "Synthesizing findings...",
        _ => "Finalizing results...",
    }
}

/// Emits `stepProgress` for one running step until stopped
pub struct Heartbeat {
    handle: Option<JoinHandle<()>>,
}

impl Heartbeat {
    pub fn start(sink: EventSink, step_index: usize, started: Instant, period: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(
                tokio::time::Instant::from_std(started) + period,
                period,
            );
            loop {
                ticker.tick().await;
                let elapsed = started.elapsed();
                let delivered = sink.emit(ResearchEvent::StepProgress {
                    step_index,
                    progress_message: progress_message(elapsed).to_string(),
                    elapsed_time: round_secs(elapsed),
                });
                if !delivered {
                    break;
                }
            }
        });

        Self {
            handle: Some(handle),
        }
    }

    /// Cancel the timer and wait until it can no longer emit
    pub async fn stop(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Seconds with one decimal
pub fn round_secs(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_body() -> String {
        let events = vec![
            SseEvent::new("status", json!({ "message": "Planning research..." })),
            SseEvent::new("plan", json!({ "steps": [{ "title": "Get NVDA news" }] })),
            SseEvent::new("delta", json!({ "content": "Prix: 12 € - ok ✓" })),
            SseEvent::new("done", json!({ "totalSteps": 1 })),
        ];
        events.iter().map(SseEvent::encode).collect()
    }

    fn decode_all(chunks: &[&[u8]]) -> Vec<SseEvent> {
        let mut decoder = SseDecoder::new();
        let mut events = Vec::new();
        for chunk in chunks {
            events.extend(decoder.push(chunk));
        }
        events.extend(decoder.finish());
        events
    }

    #[test]
    fn test_encode_framing() {
        let event = SseEvent::new("delta", json!({ "content": "hi" }));
        assert_eq!(event.encode(), "event: delta\ndata: {\"content\":\"hi\"}\n\n");
    }

    #[test]
    fn test_split_at_every_byte_boundary() {
        let body = sample_body();
        let bytes = body.as_bytes();
        let expected = decode_all(&[bytes]);
        assert_eq!(expected.len(), 4);

        for split in 0..=bytes.len() {
            let (a, b) = bytes.split_at(split);
            assert_eq!(decode_all(&[a, b]), expected, "split at {}", split);
        }
    }

    #[test]
    fn test_one_byte_chunks() {
        let body = sample_body();
        let chunks: Vec<&[u8]> = body.as_bytes().chunks(1).collect();
        let events = decode_all(&chunks);
        assert_eq!(events.len(), 4);
        assert_eq!(events[2].data["content"], "Prix: 12 € - ok ✓");
    }

    #[test]
    fn test_crlf_comments_and_plain_data() {
        let body = ": OPENROUTER PROCESSING\r\n\r\ndata: {\"a\":1}\r\n\r\ndata: [DONE]\r\n\r\n";
        let events = decode_all(&[body.as_bytes()]);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, "message");
        assert_eq!(events[0].data["a"], 1);
        assert_eq!(events[1].data, Value::String("[DONE]".into()));
    }

    #[test]
    fn test_multiline_data_and_trailing_event() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: note\ndata: line one\ndata: line two").is_empty());
        let event = decoder.finish().unwrap();
        assert_eq!(event.event, "note");
        assert_eq!(event.data, Value::String("line one\nline two".into()));
    }

    #[test]
    fn test_progress_buckets() {
        assert_eq!(progress_message(Duration::from_secs(1)), "Analyzing data...");
        assert_eq!(progress_message(Duration::from_secs(7)), "Processing insights...");
        assert_eq!(progress_message(Duration::from_secs(12)), "Synthesizing findings...");
        assert_eq!(progress_message(Duration::from_secs(40)), "Finalizing results...");
    }

    #[test]
    fn test_done_event_names() {
        let plan_done = ResearchEvent::Done {
            totals: RunTotals { steps_completed: 1, steps_failed: 0, total_steps: 1 },
            run_id: "r".into(),
        };
        let answer_done = ResearchEvent::AnswerDone { chunks: 3, characters: 12 };
        assert_eq!(plan_done.name(), "done");
        assert_eq!(answer_done.name(), "done");
        assert_eq!(plan_done.payload()["stepsCompleted"], 1);
    }

    #[tokio::test]
    async fn test_sink_closes_once_and_tolerates_disconnect() {
        let (sink, mut rx) = EventSink::channel();
        assert!(sink.emit(ResearchEvent::status("one")));
        sink.close();
        sink.close();
        assert!(!sink.emit(ResearchEvent::status("two")));
        assert!(sink.is_closed());

        assert_eq!(rx.recv().await.unwrap().event, "status");
        assert!(rx.recv().await.is_none());

        let (sink, rx) = EventSink::channel();
        drop(rx);
        assert!(sink.is_closed());
        assert!(!sink.emit(ResearchEvent::status("nobody listening")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_stops_before_terminal_event() {
        let (sink, mut rx) = EventSink::channel();
        let heartbeat = Heartbeat::start(sink.clone(), 0, Instant::now(), HEARTBEAT_INTERVAL);

        tokio::time::sleep(Duration::from_millis(3500)).await;
        heartbeat.stop().await;
        sink.emit(ResearchEvent::status("step finished"));
        tokio::time::sleep(Duration::from_secs(5)).await;
        sink.close();

        let mut names = Vec::new();
        while let Some(event) = rx.recv().await {
            names.push(event.event);
        }
        assert_eq!(names.last().map(String::as_str), Some("status"));
        assert!(names.iter().filter(|n| *n == "stepProgress").count() >= 1);
    }
}
