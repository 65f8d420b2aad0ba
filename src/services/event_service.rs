//! One-shot processing of a trigger stored in a JSON file (`--event`).

use crate::{
    models::invocation::{Invocation, ReportPayload, TriggerEvent},
    services::{
        derivative_service::DerivativeGenerator, image_codec::ImageCodec,
        storage_service::ObjectStore,
    },
};
use anyhow::{Context, Result, bail};
use std::{fs, io::Write, path::Path};

/// Read the trigger at `path`, run it, and write the pretty-printed report to `out`.
///
/// The report is written even when the invocation fails; an `error` in the
/// report turns into `Err` afterwards.
pub async fn run_event_file<S, C>(
    generator: &DerivativeGenerator<S, C>,
    path: &Path,
    out: &mut impl Write,
) -> Result<ReportPayload>
where
    S: ObjectStore + 'static,
    C: ImageCodec + 'static,
{
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading trigger file {}", path.display()))?;
    let event: TriggerEvent = serde_json::from_str(&raw)
        .with_context(|| format!("parsing trigger file {}", path.display()))?;
    let invocation = Invocation::try_from(event)?;

    let payload = generator.run(&invocation).await?.to_payload();
    writeln!(out, "{}", serde_json::to_string_pretty(&payload)?)?;

    if let Some(err) = &payload.error {
        bail!("invocation failed: {}", err.message);
    }
    Ok(payload)
}
