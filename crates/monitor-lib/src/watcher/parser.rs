//! OOM kill extraction from kernel log lines
//!
//! An OOM kill shows up as a burst of lines: the `invoked oom-killer` header,
//! memory statistics, a line naming the cgroups involved, and finally the
//! `Killed process` line. The parser keeps the header timestamp and fills in
//! the record as the burst goes by.

use crate::models::{KernelLogEntry, RawOomRecord};

const OOM_START: &str = "invoked oom-killer:";
const LEGACY_CONTAINER_LINE: &str = "Task in ";
const LEGACY_LIMIT_SEPARATOR: &str = " killed as a result of limit of ";
const OOM_KILL_LINE: &str = "oom-kill:";
const KILLED_PROCESS_LINE: &str = "Killed process ";

/// Stateful extractor turning kernel log entries into OOM records
#[derive(Debug, Default)]
pub struct OomParser {
    pending: Option<RawOomRecord>,
}

impl OomParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next kernel log entry; returns a record once a kill completes
    pub fn feed(&mut self, entry: &KernelLogEntry) -> Option<RawOomRecord> {
        let text = entry.text.as_str();

        if text.contains(OOM_START) {
            self.pending = Some(RawOomRecord {
                pid: 0,
                process_name: String::new(),
                victim_container_scope: "/".to_string(),
                killer_container_scope: "/".to_string(),
                time_of_death: entry.timestamp,
            });
            return None;
        }

        let pending = self.pending.as_mut()?;

        if let Some((victim, killer)) = parse_legacy_container_line(text) {
            pending.victim_container_scope = victim;
            pending.killer_container_scope = killer;
        } else if let Some(kill) = parse_oom_kill_line(text) {
            if let Some(victim) = kill.task_memcg {
                pending.victim_container_scope = victim;
            }
            if let Some(killer) = kill.oom_memcg {
                pending.killer_container_scope = killer;
            }
            if let Some(task) = kill.task {
                pending.process_name = task;
            }
            if let Some(pid) = kill.pid {
                pending.pid = pid;
            }
        } else if let Some((pid, name)) = parse_killed_process_line(text) {
            pending.pid = pid;
            pending.process_name = name;
            return self.pending.take();
        }

        None
    }

    /// True while an OOM burst has started but not completed
    pub fn in_progress(&self) -> bool {
        self.pending.is_some()
    }
}

/// Fields of an `oom-kill:` summary line
#[derive(Debug, Default, PartialEq, Eq)]
struct OomKillLine {
    oom_memcg: Option<String>,
    task_memcg: Option<String>,
    task: Option<String>,
    pid: Option<u32>,
}

/// `Task in <victim> killed as a result of limit of <killer>`
fn parse_legacy_container_line(text: &str) -> Option<(String, String)> {
    let start = text.find(LEGACY_CONTAINER_LINE)? + LEGACY_CONTAINER_LINE.len();
    let (victim, killer) = text[start..].split_once(LEGACY_LIMIT_SEPARATOR)?;
    Some((normalize_cgroup(victim), normalize_cgroup(killer)))
}

/// `oom-kill:constraint=...,oom_memcg=<killer>,task_memcg=<victim>,task=<name>,pid=<pid>,uid=<uid>`
fn parse_oom_kill_line(text: &str) -> Option<OomKillLine> {
    let start = text.find(OOM_KILL_LINE)? + OOM_KILL_LINE.len();
    let mut line = OomKillLine::default();

    for field in text[start..].split(',') {
        let Some((key, value)) = field.split_once('=') else {
            continue;
        };
        match key.trim() {
            "oom_memcg" => line.oom_memcg = Some(normalize_cgroup(value)),
            "task_memcg" => line.task_memcg = Some(normalize_cgroup(value)),
            "task" => line.task = Some(value.to_string()),
            "pid" => line.pid = value.trim().parse().ok(),
            _ => {}
        }
    }

    Some(line)
}

/// `Killed process <pid> (<name>) total-vm:...`
fn parse_killed_process_line(text: &str) -> Option<(u32, String)> {
    let start = text.find(KILLED_PROCESS_LINE)? + KILLED_PROCESS_LINE.len();
    let rest = &text[start..];

    let digits_end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    let pid = rest[..digits_end].parse().ok()?;

    let name_part = rest[digits_end..].trim_start().strip_prefix('(')?;
    let name_end = name_part.find(") ").or_else(|| name_part.rfind(')'))?;

    Some((pid, name_part[..name_end].to_string()))
}

/// Make a cgroup path absolute without trailing slashes
fn normalize_cgroup(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}
