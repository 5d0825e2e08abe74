//! NDJSON archive files: one event per line, oldest first, with a trailing
//! `{"_checksum": "<hex>"}` line covering every byte written before it.
//! Used when a rebuild range reaches back past the live store's retention
//! window.

use ledger_core::artifact::content_sha256_hex;
use ledger_core::Event;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive file is missing its trailing checksum line: {path}")]
    MissingChecksum { path: PathBuf },

    #[error("archive file {path} failed checksum validation")]
    ChecksumMismatch { path: PathBuf },

    #[error("malformed event record in {path}")]
    MalformedEvent {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Writes `events` (already in `(ts, event_id)` order) to `path` as NDJSON
/// plus a trailing checksum line covering the event lines.
pub fn write_archive_file(path: &Path, events: &[Event]) -> Result<(), ArchiveError> {
    let mut body = Vec::new();
    for event in events {
        serde_json::to_writer(&mut body, event).expect("Event always serializes");
        body.push(b'\n');
    }
    let checksum = content_sha256_hex(&body);

    let mut out = body;
    out.extend_from_slice(format!("{{\"_checksum\":\"{checksum}\"}}\n").as_bytes());
    std::fs::write(path, out)?;
    Ok(())
}

/// Reads and validates one archive file, returning its events in file
/// order (oldest first). The trailing checksum line is required and
/// verified before any event is parsed.
pub fn read_archive_file(path: &Path) -> Result<Vec<Event>, ArchiveError> {
    let bytes = std::fs::read(path)?;
    let mut content: &[u8] = &bytes;
    if content.ends_with(b"\n") {
        content = &content[..content.len() - 1];
    }

    let split_at = content.iter().rposition(|&b| b == b'\n').map(|idx| idx + 1);
    let (body, checksum_line) = match split_at {
        Some(idx) => (&content[..idx], &content[idx..]),
        None => (&content[..0], content),
    };

    let checksum_json: serde_json::Value = serde_json::from_slice(checksum_line)
        .map_err(|source| ArchiveError::MalformedEvent { path: path.to_path_buf(), source })?;
    let expected = checksum_json
        .get("_checksum")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ArchiveError::MissingChecksum { path: path.to_path_buf() })?;

    let actual = content_sha256_hex(body);
    if actual != expected {
        return Err(ArchiveError::ChecksumMismatch { path: path.to_path_buf() });
    }

    let mut events = Vec::new();
    for line in body.split(|&b| b == b'\n') {
        if line.is_empty() {
            continue;
        }
        let event: Event = serde_json::from_slice(line)
            .map_err(|source| ArchiveError::MalformedEvent { path: path.to_path_buf(), source })?;
        events.push(event);
    }
    Ok(events)
}

/// The archive file name for one `(tenant_id, project_id, date)` shard,
/// matching the directory layout an archival job writes into.
pub fn archive_file_name(scope: &ledger_core::Scope, date: chrono::NaiveDate) -> String {
    format!("{}_{}_{}.ndjson", scope.tenant_id, scope.project_id, date.format("%Y-%m-%d"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::event::{CardCreated, SubjectIds};
    use ledger_core::{CardId, CardSpec, CorrelationId, EventBuilder, Priority, Producer, Scope, TenantId};

    fn sample_event() -> Event {
        let scope = Scope::new(TenantId::new(), ledger_core::ProjectId::new());
        let card_id = CardId::new();
        EventBuilder::new(scope, CorrelationId::new())
            .subjects(SubjectIds::card(card_id))
            .build(
                ledger_core::EventPayload::CardCreated(CardCreated {
                    card_id,
                    title: "t".into(),
                    spec: CardSpec { command_type: "x".into(), args: None, constraints: Default::default() },
                    priority: Priority::default(),
                    capabilities: None,
                }),
                chrono::Utc::now(),
                Producer { service: "test".into(), version: "0".into() },
            )
    }

    #[test]
    fn round_trips_events_through_a_checksummed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shard.ndjson");
        let events = vec![sample_event(), sample_event()];

        write_archive_file(&path, &events).unwrap();
        let read_back = read_archive_file(&path).unwrap();

        assert_eq!(read_back.len(), 2);
        assert_eq!(read_back[0].event_id, events[0].event_id);
        assert_eq!(read_back[1].event_id, events[1].event_id);
    }

    #[test]
    fn rejects_a_tampered_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shard.ndjson");
        write_archive_file(&path, &[sample_event()]).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        let tamper_at = bytes.iter().position(|&b| b == b't').unwrap();
        bytes[tamper_at] = b'z';
        std::fs::write(&path, &bytes).unwrap();

        assert!(matches!(read_archive_file(&path), Err(ArchiveError::ChecksumMismatch { .. })));
    }

    #[test]
    fn rejects_a_file_with_no_checksum_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shard.ndjson");
        std::fs::write(&path, b"not an event\n").unwrap();

        assert!(read_archive_file(&path).is_err());
    }
}
