//! Progress stream parsing.
//!
//! Structured `TrainerEvent`s are the preferred channel; the regex path
//! is a best-effort adapter for scripts that only write free text.
//! A line that matches nothing is kept verbatim in the log and ignored;
//! parsing never fails the stream.

use crate::launcher::{ProcessEvent, TrainerEvent};
use crate::process::TrainingProgress;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Instant;

static EPOCH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)epoch[\s:]+(\d+)").expect("epoch regex is valid"));
static STEPS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)steps?[\s:]+(\d+)\s*/\s*(\d+)").expect("steps regex is valid"));
static LOSS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:avr_)?loss[=:\s]+([0-9]*\.?[0-9]+)").expect("loss regex is valid")
});
static LR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\blr[=:\s]+([0-9]*\.?[0-9]+(?:e[+-]?\d+)?)").expect("lr regex is valid")
});
static SAMPLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)sav(?:ed|ing)\s+sample.*?(\S+\.(?:png|jpg|jpeg|webp))")
        .expect("sample regex is valid")
});
static FAILURE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:error|runtimeerror|traceback \(most recent call last\)|cuda out of memory)")
        .expect("failure regex is valid")
});

/// What one ingested event means for the owning process.
#[derive(Debug, Clone)]
pub enum ParseOutcome {
    /// The snapshot changed; publish it.
    Updated(TrainingProgress),
    /// Completion sentinel; authoritative over the exit code.
    Finished,
    /// Error sentinel; authoritative over the exit code.
    Failed(String),
    /// Nothing actionable (log-only line).
    Ignored,
}

/// Stateful per-process progress accumulator.
#[derive(Debug)]
pub struct ProgressParser {
    progress: TrainingProgress,
    started: Instant,
}

impl ProgressParser {
    /// `total_steps` is the UI-side estimate; a structured event or a
    /// `steps: x/y` line replaces it with the script's own count.
    #[must_use]
    pub fn new(total_steps: u64) -> Self {
        let progress = TrainingProgress { total_steps, ..TrainingProgress::default() };
        Self { progress, started: Instant::now() }
    }

    /// Latest snapshot, regardless of how it was assembled.
    #[must_use]
    pub fn snapshot(&self) -> TrainingProgress {
        self.progress.clone()
    }

    /// Ingests one event from the process stream.
    pub fn feed(&mut self, event: &ProcessEvent) -> ParseOutcome {
        match event {
            ProcessEvent::Structured(trainer_event) => self.feed_structured(trainer_event),
            ProcessEvent::Line(line) => self.feed_line(line),
            // Exit handling belongs to the manager; the parser only
            // tracks stream content.
            ProcessEvent::Exited { .. } => ParseOutcome::Ignored,
        }
    }

    fn feed_structured(&mut self, event: &TrainerEvent) -> ParseOutcome {
        match event {
            TrainerEvent::Progress { epoch, step, total_steps, loss, learning_rate } => {
                self.progress.epoch = *epoch;
                self.progress.step = *step;
                self.progress.total_steps = *total_steps;
                if loss.is_some() {
                    self.progress.loss = *loss;
                }
                if learning_rate.is_some() {
                    self.progress.learning_rate = *learning_rate;
                }
                self.refresh_timing();
                ParseOutcome::Updated(self.snapshot())
            }
            TrainerEvent::Sample { path } => {
                self.progress.samples_generated.push(path.into());
                ParseOutcome::Updated(self.snapshot())
            }
            TrainerEvent::Completed => ParseOutcome::Finished,
            TrainerEvent::Error { message } => ParseOutcome::Failed(message.clone()),
        }
    }

    fn feed_line(&mut self, line: &str) -> ParseOutcome {
        if line.trim().is_empty() {
            return ParseOutcome::Ignored;
        }
        self.progress.push_log(line);

        if FAILURE_RE.is_match(line.trim()) {
            return ParseOutcome::Failed(line.trim().to_string());
        }

        let mut matched = false;
        if let Some(caps) = EPOCH_RE.captures(line) {
            if let Ok(epoch) = caps[1].parse() {
                self.progress.epoch = epoch;
                matched = true;
            }
        }
        if let Some(caps) = STEPS_RE.captures(line) {
            if let (Ok(step), Ok(total)) = (caps[1].parse(), caps[2].parse()) {
                self.progress.step = step;
                self.progress.total_steps = total;
                matched = true;
            }
        }
        if let Some(caps) = LOSS_RE.captures(line) {
            if let Ok(loss) = caps[1].parse() {
                self.progress.loss = Some(loss);
                matched = true;
            }
        }
        if let Some(caps) = LR_RE.captures(line) {
            if let Ok(lr) = caps[1].parse() {
                self.progress.learning_rate = Some(lr);
                matched = true;
            }
        }
        if let Some(caps) = SAMPLE_RE.captures(line) {
            self.progress.samples_generated.push(caps[1].into());
            matched = true;
        }

        if matched {
            self.refresh_timing();
            ParseOutcome::Updated(self.snapshot())
        } else {
            // Preserved in the log above; otherwise ignored.
            ParseOutcome::Ignored
        }
    }

    fn refresh_timing(&mut self) {
        let elapsed = self.started.elapsed().as_secs();
        self.progress.elapsed_secs = elapsed;
        self.progress.eta_secs = if self.progress.step > 0
            && self.progress.total_steps > self.progress.step
        {
            let remaining = self.progress.total_steps - self.progress.step;
            Some(elapsed * remaining / self.progress.step)
        } else {
            None
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(s: &str) -> ProcessEvent {
        ProcessEvent::Line(s.to_string())
    }

    #[test]
    fn test_free_text_progress_line() {
        let mut parser = ProgressParser::new(0);
        let outcome = parser.feed(&line("epoch 2/10, steps: 150/1000, avr_loss=0.0821 lr: 1e-4"));
        let ParseOutcome::Updated(progress) = outcome else {
            panic!("expected update");
        };
        assert_eq!(progress.epoch, 2);
        assert_eq!(progress.step, 150);
        assert_eq!(progress.total_steps, 1000);
        assert_eq!(progress.loss, Some(0.0821));
        assert_eq!(progress.learning_rate, Some(1e-4));
    }

    #[test]
    fn test_unparsable_line_is_logged_and_ignored() {
        let mut parser = ProgressParser::new(100);
        let outcome = parser.feed(&line("loading checkpoint shards..."));
        assert!(matches!(outcome, ParseOutcome::Ignored));
        let snapshot = parser.snapshot();
        assert_eq!(snapshot.logs, vec!["loading checkpoint shards...".to_string()]);
        // The estimate survives until the script reports its own count.
        assert_eq!(snapshot.total_steps, 100);
    }

    #[test]
    fn test_structured_event_overwrites_snapshot() {
        let mut parser = ProgressParser::new(500);
        parser.feed(&ProcessEvent::Structured(TrainerEvent::Progress {
            epoch: 1,
            step: 10,
            total_steps: 200,
            loss: Some(0.5),
            learning_rate: None,
        }));
        parser.feed(&ProcessEvent::Structured(TrainerEvent::Progress {
            epoch: 1,
            step: 20,
            total_steps: 200,
            loss: Some(0.4),
            learning_rate: None,
        }));
        let snapshot = parser.snapshot();
        assert_eq!(snapshot.step, 20);
        assert_eq!(snapshot.loss, Some(0.4));
        assert_eq!(snapshot.total_steps, 200);
    }

    #[test]
    fn test_samples_accumulate() {
        let mut parser = ProgressParser::new(0);
        parser.feed(&line("saved sample image: out/sample_0001.png"));
        parser.feed(&ProcessEvent::Structured(TrainerEvent::Sample {
            path: "out/sample_0002.png".to_string(),
        }));
        assert_eq!(parser.snapshot().samples_generated.len(), 2);
    }

    #[test]
    fn test_sentinel_events() {
        let mut parser = ProgressParser::new(0);
        assert!(matches!(
            parser.feed(&ProcessEvent::Structured(TrainerEvent::Completed)),
            ParseOutcome::Finished
        ));
        match parser.feed(&ProcessEvent::Structured(TrainerEvent::Error {
            message: "boom".to_string(),
        })) {
            ParseOutcome::Failed(message) => assert_eq!(message, "boom"),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_textual_failure_markers() {
        let mut parser = ProgressParser::new(0);
        assert!(matches!(
            parser.feed(&line("RuntimeError: CUDA error: device-side assert triggered")),
            ParseOutcome::Failed(_)
        ));
        assert!(matches!(
            parser.feed(&line("Traceback (most recent call last):")),
            ParseOutcome::Failed(_)
        ));
        // The word "error" mid-sentence is not a failure marker.
        assert!(matches!(
            parser.feed(&line("tolerating a recoverable error in the dataloader")),
            ParseOutcome::Ignored
        ));
    }

    #[test]
    fn test_exit_event_is_not_parser_business() {
        let mut parser = ProgressParser::new(0);
        assert!(matches!(
            parser.feed(&ProcessEvent::Exited { code: Some(0) }),
            ParseOutcome::Ignored
        ));
    }
}
