//!
//! src/handler.rs  Andrew Belles  Sept 14th, 2025
//!
//! Invocation entry points for the scheduler: each handler takes an
//! opaque trigger payload plus context and answers with a status code
//! and a message
//!

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

use crate::config::{self, Env, PROCESSED_DATA_PATH, RAW_DATA_PATH};
use crate::errors::{ErrorKind, EtlError};
use crate::extractor::Extractor;
use crate::fetch::SpotifyClient;
use crate::storage::{DiskStore, MemoryStore, ObjectStore};
use crate::transformer::{TransformSummary, Transformer};

#[derive(Debug, Clone)]
pub struct InvocationContext {
    pub request_id: Uuid,
    pub started_at: DateTime<Utc>,
    // keep everything in memory, nothing reaches disk
    pub dry_run: bool
}

impl InvocationContext {
    pub fn new(dry_run: bool) -> Self {
        Self { request_id: Uuid::new_v4(), started_at: Utc::now(), dry_run }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    pub status_code: u16,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "kind_name")]
    pub error_kind: Option<ErrorKind>
}

fn kind_name<S: serde::Serializer>(kind: &Option<ErrorKind>, s: S) -> Result<S::Ok, S::Error> {
    match kind {
        Some(k) => s.serialize_str(k.as_str()),
        None => s.serialize_none()
    }
}

impl Outcome {
    pub fn success(body: impl Into<String>) -> Self {
        Self { status_code: 200, body: body.into(), error_kind: None }
    }

    pub fn failure(err: &EtlError) -> Self {
        Self {
            status_code: 500,
            body: format!("Error processing data: {err}"),
            error_kind: Some(err.kind())
        }
    }

    pub fn is_success(&self) -> bool {
        self.status_code == 200
    }

    pub fn from_extract(result: Result<String, EtlError>) -> Self {
        match result {
            Ok(key) => Outcome::success(format!("Stored raw playlist snapshot at {key}")),
            Err(e) => Outcome::failure(&e)
        }
    }

    pub fn from_transform(result: Result<TransformSummary, EtlError>) -> Self {
        match result {
            Ok(TransformSummary::NoFiles) => Outcome::success("No files to process"),
            Ok(TransformSummary::Processed { files, .. }) =>
                Outcome::success(format!("Successfully processed {files} files")),
            Err(e) => Outcome::failure(&e)
        }
    }
}

///
/// In dry-run mode the in-memory store is handed back too so its
/// contents can be reported once the handler finishes. Objects under
/// `seed` are copied in from an existing bucket so the run sees real
/// input without touching it.
///
async fn open_store(storage: &config::StorageConfig, dry_run: bool, seed: &[&str]) ->
    Result<(Arc<dyn ObjectStore>, Option<Arc<MemoryStore>>), EtlError> {
    if dry_run {
        let scratch = Arc::new(MemoryStore::new(&storage.bucket));
        if storage.root.join(&storage.bucket).is_dir() {
            let disk = DiskStore::open(storage)?;
            for &prefix in seed {
                let copied = scratch.seed_from(&disk, prefix).await?;
                debug!(prefix, copied, "dry_run.seed");
            }
        }
        let store: Arc<dyn ObjectStore> = scratch.clone();
        return Ok((store, Some(scratch)));
    }
    let store: Arc<dyn ObjectStore> = Arc::new(DiskStore::open(storage)?);
    Ok((store, None))
}

fn report_dry_run(scratch: Option<Arc<MemoryStore>>) {
    if let Some(scratch) = scratch {
        info!(objects = ?scratch.keys(), "dry_run.objects");
    }
}

fn log_outcome(outcome: &Outcome) {
    match outcome.error_kind {
        None => info!(status = outcome.status_code, body = %outcome.body, "handler.done"),
        Some(kind) => error!(
            status = outcome.status_code,
            kind = kind.as_str(),
            body = %outcome.body,
            "handler.failed"
        )
    }
}

async fn run_extract(
    env: &impl Env,
    ctx: &InvocationContext,
    playlist: Option<String>
) -> Result<String, EtlError> {
    let cfg = config::extract_config_from(env, playlist)?;
    let (store, scratch) = open_store(&cfg.storage, ctx.dry_run, &[]).await?;
    let spotify = SpotifyClient::new(&cfg.http, &cfg.spotify)?;

    let key = Extractor::new(Arc::new(spotify), store, &cfg.spotify.playlist_id)
        .run(ctx.started_at)
        .await?;
    report_dry_run(scratch);
    Ok(key)
}

async fn run_transform(env: &impl Env, ctx: &InvocationContext) ->
    Result<TransformSummary, EtlError> {
    let cfg = config::transform_config_from(env)?;
    let seed = [RAW_DATA_PATH, PROCESSED_DATA_PATH];
    let (store, scratch) = open_store(&cfg.storage, ctx.dry_run, &seed).await?;

    let summary = Transformer::new(store).run(ctx.started_at).await?;
    report_dry_run(scratch);
    Ok(summary)
}

pub async fn extract_handler(
    env: &impl Env,
    event: &Value,
    ctx: &InvocationContext,
    playlist: Option<String>
) -> Outcome {
    let span = info_span!("extract", request_id = %ctx.request_id, dry_run = ctx.dry_run);
    async {
        info!(event = %event, "handler.invoked");
        let outcome = Outcome::from_extract(run_extract(env, ctx, playlist).await);
        log_outcome(&outcome);
        outcome
    }
    .instrument(span)
    .await
}

pub async fn transform_handler(
    env: &impl Env,
    event: &Value,
    ctx: &InvocationContext
) -> Outcome {
    let span = info_span!("transform", request_id = %ctx.request_id, dry_run = ctx.dry_run);
    async {
        info!(event = %event, "handler.invoked");
        let outcome = Outcome::from_transform(run_transform(env, ctx).await);
        log_outcome(&outcome);
        outcome
    }
    .instrument(span)
    .await
}
