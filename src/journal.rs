//! Conversation journal and daily reports.
//!
//! Each completed cycle becomes one JSON line in `<dir>/YYYY-MM-DD.jsonl`
//! (default dir `~/.mirai-history/`). Write failures are logged and never
//! interrupt the conversation.

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

use crate::config::JournalConfig;

/// One capture → reply cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub timestamp: String,
    pub mode: String,
    /// Raw transcript; `None` for typed input.
    pub transcript: Option<String>,
    pub command: String,
    pub reply: String,
    /// `answer`, `not_understood` or `apology`.
    pub reply_kind: String,
    pub transcription_latency_ms: Option<i64>,
    pub response_latency_ms: i64,
    pub speech_latency_ms: Option<i64>,
    pub total_latency_ms: i64,
    /// False when synthesis failed or was unavailable.
    pub spoken: bool,
}

impl TurnRecord {
    pub fn now_timestamp() -> String {
        Local::now().format("%Y-%m-%dT%H:%M:%S%.3f").to_string()
    }
}

#[derive(Debug, Clone)]
pub struct Journal {
    dir: PathBuf,
}

impl Journal {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `~/.mirai-history`, if there is a home directory.
    pub fn default_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".mirai-history"))
    }

    /// Journal for the configured directory. `None` when disabled.
    pub fn from_config(config: &JournalConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        match config.dir.clone().or_else(Self::default_dir) {
            Some(dir) => Some(Self::new(dir)),
            None => {
                warn!("Journal enabled but no home directory found; journal disabled");
                None
            }
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File for a date (`YYYY-MM-DD` or `today`).
    fn file_for(&self, date: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", resolve_date(date)))
    }

    /// Append a record to today's file.
    pub fn record(&self, record: &TurnRecord) {
        if let Err(e) = fs::create_dir_all(&self.dir) {
            error!("Failed to create journal dir: {e}");
            return;
        }

        let path = self.file_for("today");
        let json = match serde_json::to_string(record) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize turn record: {e}");
                return;
            }
        };

        match fs::OpenOptions::new().create(true).append(true).open(&path) {
            Ok(mut file) => {
                if let Err(e) = writeln!(file, "{json}") {
                    error!("Failed to write turn record: {e}");
                } else {
                    debug!("Saved turn record to {}", path.display());
                }
            }
            Err(e) => error!("Failed to open journal file: {e}"),
        }
    }

    /// All records for a date. Malformed lines are skipped.
    pub fn load_records(&self, date: &str) -> Vec<TurnRecord> {
        let path = self.file_for(date);
        if !path.exists() {
            return Vec::new();
        }

        let file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(e) => {
                error!("Failed to load journal records: {e}");
                return Vec::new();
            }
        };

        std::io::BufReader::new(file)
            .lines()
            .map_while(|line| line.ok())
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<TurnRecord>(line.trim()) {
                Ok(record) => Some(record),
                Err(e) => {
                    debug!("Skipping malformed journal line: {e}");
                    None
                }
            })
            .collect()
    }

    /// Dates with journal files, newest first.
    pub fn list_available_dates(&self) -> Vec<String> {
        let mut dates: Vec<String> = fs::read_dir(&self.dir)
            .into_iter()
            .flatten()
            .filter_map(|entry| {
                let name = entry.ok()?.file_name().to_string_lossy().to_string();
                name.strip_suffix(".jsonl").map(str::to_string)
            })
            .collect();

        dates.sort_by(|a, b| b.cmp(a));
        dates
    }

    /// Markdown summary of one day of conversation.
    pub fn generate_report(&self, date: &str) -> String {
        let records = self.load_records(date);
        let display_date = resolve_date(date);

        if records.is_empty() {
            return format!("# Mirai Report - {display_date}\n\nNo conversations recorded.");
        }

        let answered = records.iter().filter(|r| r.reply_kind == "answer").count();
        let apologies = records.iter().filter(|r| r.reply_kind == "apology").count();
        let spoken = records.iter().filter(|r| r.spoken).count();

        let transcription: Vec<i64> = records
            .iter()
            .filter_map(|r| r.transcription_latency_ms)
            .collect();
        let response: Vec<i64> = records.iter().map(|r| r.response_latency_ms).collect();
        let speech: Vec<i64> = records.iter().filter_map(|r| r.speech_latency_ms).collect();

        let mut lines = vec![
            format!("# Mirai Report - {display_date}"),
            String::new(),
            "## Summary".to_string(),
            format!("- **Turns**: {}", records.len()),
            format!("- **Answered**: {answered}"),
            format!("- **Apologies**: {apologies}"),
            format!("- **Spoken replies**: {spoken}"),
            String::new(),
            "## Latency Averages".to_string(),
        ];

        if let Some(avg) = average(&transcription) {
            lines.push(format!("- Transcription: {avg:.0}ms"));
        }
        if let Some(avg) = average(&response) {
            lines.push(format!("- Response: {avg:.0}ms"));
        }
        if let Some(avg) = average(&speech) {
            lines.push(format!("- Speech: {avg:.0}ms"));
        }

        lines.extend([
            String::new(),
            "## Conversation Log".to_string(),
            String::new(),
            "| Time | Mode | Command | Reply |".to_string(),
            "|------|------|---------|-------|".to_string(),
        ]);

        for r in &records {
            // HH:MM:SS out of the ISO timestamp
            let time: String = r.timestamp.chars().skip(11).take(8).collect();
            lines.push(format!(
                "| {time} | {} | {} | {} |",
                r.mode,
                truncate(&r.command, 30),
                truncate(&r.reply, 40)
            ));
        }

        lines.join("\n")
    }
}

fn resolve_date(date: &str) -> String {
    if date == "today" {
        Local::now().format("%Y-%m-%d").to_string()
    } else {
        date.to_string()
    }
}

fn average(values: &[i64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<i64>() as f64 / values.len() as f64)
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    let text = text.replace('|', "/");
    if text.chars().count() <= max_chars {
        text
    } else {
        let cut: String = text.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(command: &str, kind: &str) -> TurnRecord {
        TurnRecord {
            timestamp: "2026-03-14T09:26:53.589".into(),
            mode: "wake_word".into(),
            transcript: Some(format!("mirai {command}")),
            command: command.into(),
            reply: "Hai! São nove horas.".into(),
            reply_kind: kind.into(),
            transcription_latency_ms: Some(800),
            response_latency_ms: 1200,
            speech_latency_ms: Some(2000),
            total_latency_ms: 4000,
            spoken: true,
        }
    }

    #[test]
    fn test_record_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::new(dir.path());

        journal.record(&record("que horas são", "answer"));
        journal.record(&record("conta uma piada", "apology"));

        let records = journal.load_records("today");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].command, "que horas são");
        assert_eq!(records[1].reply_kind, "apology");
        assert_eq!(journal.list_available_dates(), vec![resolve_date("today")]);
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::new(dir.path());
        let line = serde_json::to_string(&record("oi", "answer")).unwrap();
        fs::write(
            dir.path().join("2026-03-14.jsonl"),
            format!("{line}\nnot json\n\n{line}\n"),
        )
        .unwrap();

        assert_eq!(journal.load_records("2026-03-14").len(), 2);
    }

    #[test]
    fn test_dates_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["2026-01-02.jsonl", "2026-03-01.jsonl", "notes.txt"] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        let journal = Journal::new(dir.path());
        assert_eq!(journal.list_available_dates(), vec!["2026-03-01", "2026-01-02"]);
    }

    #[test]
    fn test_report() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::new(dir.path());
        let empty = journal.generate_report("2026-03-14");
        assert!(empty.contains("No conversations recorded."));

        let lines = [record("que horas são", "answer"), record("piada", "apology")]
            .iter()
            .map(|r| serde_json::to_string(r).unwrap())
            .collect::<Vec<_>>()
            .join("\n");
        fs::write(dir.path().join("2026-03-14.jsonl"), lines).unwrap();

        let report = journal.generate_report("2026-03-14");
        assert!(report.starts_with("# Mirai Report - 2026-03-14"));
        assert!(report.contains("- **Turns**: 2"));
        assert!(report.contains("- **Apologies**: 1"));
        assert!(report.contains("- Response: 1200ms"));
        assert!(report.contains("| 09:26:53 | wake_word | que horas são |"));
    }

    #[test]
    fn test_disabled_journal() {
        assert!(Journal::from_config(&JournalConfig::default()).is_none());
        let config = JournalConfig {
            enabled: true,
            dir: Some(PathBuf::from("/tmp/mirai-journal")),
        };
        let journal = Journal::from_config(&config).unwrap();
        assert_eq!(journal.dir(), Path::new("/tmp/mirai-journal"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("a|b", 10), "a/b");
        assert_eq!(truncate("ããããããããããã", 6), "ããã...");
    }
}
