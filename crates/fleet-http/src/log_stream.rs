//! The log-stream side channel (spec §4.5.1): query parsing, the
//! malformed-line / exclude-only filtering rule spec §9 leaves as an open
//! question (resolved here per the documented candidate default), and the
//! tailer itself (backward positioning for `backlog`, line-oriented follow,
//! `maxLines` counting of matching+emitted lines only).

use std::io::SeekFrom;
use std::path::Path;
use std::time::Duration;

use fleet_core::error::{codes, CoreError, ErrorCategory};
use serde::Serialize;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;
use tokio::time::sleep;

use crate::http_io::RequestHead;

const FOLLOW_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
}

impl Level {
    fn parse(s: &str) -> Option<Level> {
        match s {
            "TRACE" => Some(Level::Trace),
            "DEBUG" => Some(Level::Debug),
            "INFO" => Some(Level::Info),
            "WARNING" => Some(Level::Warning),
            "ERROR" => Some(Level::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogStreamQuery {
    pub include_entity: Vec<String>,
    pub exclude_entity: Vec<String>,
    pub include_module: Vec<String>,
    pub exclude_module: Vec<String>,
    pub max_lines: u64,
    pub backlog: u64,
    pub replay: bool,
    pub level: Option<Level>,
}

fn malformed_query(message: impl Into<String>) -> CoreError {
    CoreError::new(codes::INTERNAL, ErrorCategory::Internal, message.into())
}

fn parse_uint(value: Option<&str>) -> Result<u64, CoreError> {
    match value {
        None => Ok(0),
        Some(s) => s.parse::<u64>().map_err(|_| malformed_query(format!("not a uint: {s:?}"))),
    }
}

fn parse_bool(value: Option<&str>) -> Result<bool, CoreError> {
    match value {
        None => Ok(false),
        Some("true") | Some("1") => Ok(true),
        Some("false") | Some("0") => Ok(false),
        Some(s) => Err(malformed_query(format!("not a bool: {s:?}"))),
    }
}

/// Parse and validate the log-stream query parameters (spec §4.5.1). Invalid
/// values are reported as a whole-call error — the caller is expected to
/// frame it as the stream's single error line and close.
pub fn parse_query(head: &RequestHead) -> Result<LogStreamQuery, CoreError> {
    let level = match head.query_one("level") {
        Some(v) => Some(Level::parse(v).ok_or_else(|| malformed_query(format!("invalid level: {v:?}")))?),
        None => None,
    };
    Ok(LogStreamQuery {
        include_entity: head.query_many("includeEntity").to_vec(),
        exclude_entity: head.query_many("excludeEntity").to_vec(),
        include_module: head.query_many("includeModule").to_vec(),
        exclude_module: head.query_many("excludeModule").to_vec(),
        max_lines: parse_uint(head.query_one("maxLines"))?,
        backlog: parse_uint(head.query_one("backlog"))?,
        replay: parse_bool(head.query_one("replay"))?,
        level,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ParsedLine {
    agent: String,
    module: String,
    level: Option<Level>,
    malformed: bool,
}

/// `"<agent>: <date> <time> <LEVEL> <module> <file:line> <message>"`
/// (spec §6's log-file format). Anything that doesn't fit is treated as a
/// continuation/malformed line: empty agent and module, no level.
fn parse_line(line: &str) -> ParsedLine {
    if let Some((agent, rest)) = line.split_once(": ") {
        let mut tokens = rest.splitn(5, ' ');
        let date = tokens.next();
        let time = tokens.next();
        let level_tok = tokens.next();
        let module = tokens.next();
        if let (Some(_), Some(_), Some(level_tok), Some(module)) = (date, time, level_tok, module) {
            if let Some(level) = Level::parse(level_tok) {
                return ParsedLine {
                    agent: agent.to_string(),
                    module: module.to_string(),
                    level: Some(level),
                    malformed: false,
                };
            }
        }
    }
    ParsedLine {
        agent: String::new(),
        module: String::new(),
        level: None,
        malformed: true,
    }
}

fn entity_matches(value: &str, pattern: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => value.starts_with(prefix),
        None => value == pattern,
    }
}

fn module_matches(value: &str, pattern: &str) -> bool {
    value.starts_with(pattern)
}

/// The full filter pipeline (spec §4.5.1, §9's resolved open question):
/// include rules only apply to well-formed lines; exclude rules and the
/// level floor apply to every line, which is why a malformed line (empty
/// agent/module) sails through exclude rules but still needs an unset
/// `level` filter to pass.
fn matches(parsed: &ParsedLine, query: &LogStreamQuery) -> bool {
    if !parsed.malformed {
        if !query.include_entity.is_empty()
            && !query.include_entity.iter().any(|p| entity_matches(&parsed.agent, p))
        {
            return false;
        }
        if !query.include_module.is_empty()
            && !query.include_module.iter().any(|p| module_matches(&parsed.module, p))
        {
            return false;
        }
    }
    if query.exclude_entity.iter().any(|p| entity_matches(&parsed.agent, p)) {
        return false;
    }
    if query.exclude_module.iter().any(|p| module_matches(&parsed.module, p)) {
        return false;
    }
    match query.level {
        Some(min) => matches!(parsed.level, Some(lv) if lv >= min),
        None => true,
    }
}

fn io_err(err: std::io::Error) -> CoreError {
    CoreError::new(codes::INTERNAL, ErrorCategory::Transport, err.to_string()).with_cause(err)
}

/// Scan the whole file to find the byte offset that leaves `backlog`
/// filter-matching lines (or fewer, if the file doesn't have that many)
/// ahead of the first frame. `replay` always starts at offset 0; a
/// `backlog` of 0 starts at end-of-file (pure follow).
async fn compute_start_offset(path: &Path, query: &LogStreamQuery) -> Result<u64, CoreError> {
    if query.replay {
        return Ok(0);
    }
    let contents = tokio::fs::read(path).await.map_err(io_err)?;
    if query.backlog == 0 {
        return Ok(contents.len() as u64);
    }

    let mut line_bounds = Vec::new();
    let mut start = 0usize;
    for (i, &b) in contents.iter().enumerate() {
        if b == b'\n' {
            line_bounds.push((start, i));
            start = i + 1;
        }
    }

    let mut matched = 0u64;
    let mut cut = contents.len() as u64;
    for &(line_start, line_end) in line_bounds.iter().rev() {
        let line = String::from_utf8_lossy(&contents[line_start..line_end]);
        if matches(&parse_line(&line), query) {
            matched += 1;
            cut = line_start as u64;
            if matched >= query.backlog {
                break;
            }
        }
    }
    Ok(cut)
}

#[derive(Serialize)]
struct ErrorFrame {
    error: Option<ErrorBody>,
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

async fn write_error_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: Option<String>,
) -> std::io::Result<()> {
    let frame = ErrorFrame { error: message.map(|message| ErrorBody { message }) };
    let mut encoded = serde_json::to_vec(&frame).unwrap_or_else(|_| b"{\"error\":null}".to_vec());
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await
}

/// Run the tailer to completion: write the single leading error frame, then
/// stream matching lines until `maxLines` is reached, `cancel` fires, or the
/// file hits EOF and truncation is observed (treated as EOF, per spec
/// §4.5.1's "file rotation/truncation is not specifically handled").
///
/// `cancel` is expected to be notified by the connection's read side when it
/// observes the client closing its end of the socket.
pub async fn stream_log<W>(log_path: &Path, query: LogStreamQuery, writer: &mut W, cancel: &Notify) -> Result<(), CoreError>
where
    W: AsyncWrite + Unpin,
{
    let offset = compute_start_offset(log_path, &query).await?;
    let mut file = File::open(log_path).await.map_err(io_err)?;
    file.seek(SeekFrom::Start(offset)).await.map_err(io_err)?;

    write_error_frame(writer, None).await.map_err(io_err)?;

    let mut pending: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 8192];
    let mut emitted: u64 = 0;

    loop {
        tokio::select! {
            _ = cancel.notified() => return Ok(()),
            read = file.read(&mut chunk) => {
                let n = read.map_err(io_err)?;
                if n == 0 {
                    let position = file.stream_position().await.map_err(io_err)?;
                    let current_len = file.metadata().await.map_err(io_err)?.len();
                    if position > current_len {
                        // truncation: treat as EOF and stop following.
                        return Ok(());
                    }
                    sleep(FOLLOW_POLL_INTERVAL).await;
                    continue;
                }
                pending.extend_from_slice(&chunk[..n]);
                while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
                    let line_bytes: Vec<u8> = pending.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line_bytes[..line_bytes.len() - 1]).into_owned();
                    let parsed = parse_line(&line);
                    if matches(&parsed, &query) {
                        writer.write_all(line.as_bytes()).await.map_err(io_err)?;
                        writer.write_all(b"\n").await.map_err(io_err)?;
                        writer.flush().await.map_err(io_err)?;
                        emitted += 1;
                        if query.max_lines > 0 && emitted >= query.max_lines {
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn head_with_query(raw_query: &str) -> RequestHead {
        RequestHead {
            method: "GET".into(),
            path: "/log".into(),
            query: {
                let mut map = std::collections::BTreeMap::new();
                for pair in raw_query.split('&').filter(|s| !s.is_empty()) {
                    let (k, v) = pair.split_once('=').unwrap();
                    map.entry(k.to_string()).or_insert_with(Vec::new).push(v.to_string());
                }
                map
            },
            headers: Vec::new(),
            content_length: 0,
            leftover: Vec::new(),
        }
    }

    #[test]
    fn parses_a_well_formed_query() {
        let head = head_with_query("includeEntity=unit-a*&excludeModule=noisy&maxLines=5&level=WARNING");
        let query = parse_query(&head).unwrap();
        assert_eq!(query.include_entity, vec!["unit-a*".to_string()]);
        assert_eq!(query.exclude_module, vec!["noisy".to_string()]);
        assert_eq!(query.max_lines, 5);
        assert_eq!(query.level, Some(Level::Warning));
    }

    #[test]
    fn rejects_an_invalid_level() {
        let head = head_with_query("level=LOUD");
        assert!(parse_query(&head).is_err());
    }

    #[test]
    fn well_formed_lines_honor_include_and_exclude_rules() {
        let line = "unit-mysql-0: 2026-07-28 10:00:00 INFO db.query query.go:12 connected";
        let parsed = parse_line(line);
        assert!(!parsed.malformed);
        assert_eq!(parsed.agent, "unit-mysql-0");
        assert_eq!(parsed.module, "db.query");
        assert_eq!(parsed.level, Some(Level::Info));

        let mut query = LogStreamQuery { include_entity: vec!["unit-mysql-*".into()], ..Default::default() };
        assert!(matches(&parsed, &query));
        query.include_entity = vec!["unit-wordpress-*".into()];
        assert!(!matches(&parsed, &query));
    }

    #[test]
    fn malformed_lines_pass_through_unless_a_level_floor_is_set() {
        let parsed = parse_line("a continuation line with no header at all");
        assert!(parsed.malformed);

        let open = LogStreamQuery { include_entity: vec!["unit-mysql-*".into()], ..Default::default() };
        assert!(matches(&parsed, &open), "malformed lines bypass include rules");

        let leveled = LogStreamQuery { level: Some(Level::Info), ..Default::default() };
        assert!(!matches(&parsed, &leveled), "malformed lines carry no level, so a floor excludes them");
    }

    #[tokio::test]
    async fn compute_start_offset_counts_only_matching_lines_backward() {
        let dir = std::env::temp_dir().join(format!("fleet-http-test-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("all-machines.log");
        let body = concat!(
            "unit-a-0: 2026-07-28 10:00:00 INFO mod1 f:1 one\n",
            "unit-a-0: 2026-07-28 10:00:01 DEBUG mod1 f:2 two\n",
            "unit-a-0: 2026-07-28 10:00:02 INFO mod1 f:3 three\n",
        );
        tokio::fs::write(&path, body).await.unwrap();

        let query = LogStreamQuery { backlog: 1, level: Some(Level::Info), ..Default::default() };
        let offset = compute_start_offset(&path, &query).await.unwrap();
        let remainder = tokio::fs::read_to_string(&path).await.unwrap();
        let tail = &remainder[offset as usize..];
        assert!(tail.starts_with("unit-a-0: 2026-07-28 10:00:02 INFO"));

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn stream_log_stops_gracefully_at_max_lines() {
        let dir = std::env::temp_dir().join(format!("fleet-http-test-stream-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("all-machines.log");
        let body = concat!(
            "unit-a-0: 2026-07-28 10:00:00 INFO mod1 f:1 one\n",
            "unit-a-0: 2026-07-28 10:00:01 INFO mod1 f:2 two\n",
        );
        tokio::fs::write(&path, body).await.unwrap();

        let query = LogStreamQuery { replay: true, max_lines: 2, ..Default::default() };
        let mut out: Vec<u8> = Vec::new();
        let cancel = Arc::new(Notify::new());
        stream_log(&path, query, &mut out, &cancel).await.unwrap();

        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        let first = lines.next().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(first).unwrap();
        assert!(parsed["error"].is_null());
        assert_eq!(lines.clone().count(), 2);

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
