//! Artifact Registry: content-addressed manifests with per-project dedup.

use chrono::{DateTime, Utc};
use ledger_core::artifact::{content_sha256_hex, decode_payload, ArtifactLinkRef, Provenance};
use ledger_core::event::{ArtifactProduced, SubjectIds};
use ledger_core::{
    Artifact, ArtifactId, AuthContext, CommandId, CoreResult, Encoding, EventBuilder,
    EventPayload, Producer, RunId,
};
use serde::{Deserialize, Serialize};

use crate::blob::BlobStore;
use crate::ledger::Ledger;

#[derive(Debug, Clone, Deserialize)]
pub struct ReportArtifactInput {
    pub correlation_id: ledger_core::CorrelationId,
    pub content: String,
    pub encoding: Encoding,
    pub media_type: String,
    pub logical_name: String,
    pub labels: Option<serde_json::Value>,
    pub command_id: Option<CommandId>,
    pub run_id: Option<RunId>,
    pub links: Option<Vec<ArtifactLinkRef>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportArtifactOutput {
    pub artifact_id: ArtifactId,
    pub deduplicated: bool,
}

/// `report_artifact` — roles `{bot, owner}`.
pub async fn report_artifact(
    ledger: &dyn Ledger,
    blobs: &dyn BlobStore,
    auth: &AuthContext,
    producer: &Producer,
    now: DateTime<Utc>,
    input: ReportArtifactInput,
) -> CoreResult<ReportArtifactOutput> {
    auth.require(&[ledger_core::Role::Bot])?;

    let bytes = decode_payload(input.encoding, &input.content).map_err(ledger_core::CoreError::Internal)?;
    let content_sha256 = content_sha256_hex(&bytes);

    if let Some(existing) = find_by_hash(ledger, auth, &content_sha256).await? {
        return Ok(ReportArtifactOutput {
            artifact_id: existing.artifact_id,
            deduplicated: true,
        });
    }

    let storage_pointer = blobs.put(&bytes).await?;
    let artifact_id = ArtifactId::new();
    let event_id = ledger_core::EventId::new();

    let mut builder = EventBuilder::new(auth.scope(), input.correlation_id);
    let mut subjects = SubjectIds::none();
    subjects.command_id = input.command_id;
    subjects.run_id = input.run_id;
    builder = builder.subjects(subjects);

    let event = builder.build_with_id(
        event_id,
        EventPayload::ArtifactProduced(ArtifactProduced {
            artifact_id,
            content_sha256: content_sha256.clone(),
            media_type: input.media_type,
            logical_name: input.logical_name,
            byte_size: bytes.len() as u64,
            labels: input.labels,
            provenance: Provenance {
                command_id: input.command_id,
                run_id: input.run_id,
                event_id,
            },
            storage_pointer,
            links: input.links,
        }),
        now,
        producer.clone(),
    );

    let written = ledger.commit(vec![event]).await?;
    if written.is_empty() {
        // Lost a race with a concurrent writer that produced the same
        // bytes first; fall back to whichever manifest is now on record.
        if let Some(existing) = find_by_hash(ledger, auth, &content_sha256).await? {
            return Ok(ReportArtifactOutput {
                artifact_id: existing.artifact_id,
                deduplicated: true,
            });
        }
    }

    Ok(ReportArtifactOutput {
        artifact_id,
        deduplicated: false,
    })
}

async fn find_by_hash(ledger: &dyn Ledger, auth: &AuthContext, content_sha256: &str) -> CoreResult<Option<Artifact>> {
    ledger.reads().get_artifact_by_hash(&auth.scope(), content_sha256).await
}

/// `get_artifact` — any role.
pub async fn get_artifact(ledger: &dyn Ledger, auth: &AuthContext, artifact_id: ArtifactId) -> CoreResult<Option<Artifact>> {
    ledger.reads().get_artifact(&auth.scope(), artifact_id).await
}

/// `artifacts_for_run` — any role.
pub async fn artifacts_for_run(ledger: &dyn Ledger, auth: &AuthContext, run_id: RunId) -> CoreResult<Vec<Artifact>> {
    ledger.reads().artifacts_for_run(&auth.scope(), run_id).await
}

/// `artifacts_for_command` — any role.
pub async fn artifacts_for_command(ledger: &dyn Ledger, auth: &AuthContext, command_id: CommandId) -> CoreResult<Vec<Artifact>> {
    ledger.reads().artifacts_for_command(&auth.scope(), command_id).await
}
