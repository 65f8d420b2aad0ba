//! Invocation payloads: the trigger that starts a run and the report it returns.

use super::derivative::DerivativeSpec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The uploaded original that derivatives are produced from.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SourceObject {
    pub bucket: String,
    pub key: String,
}

impl SourceObject {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

/// Trigger payload accepted by `POST /invoke` and `--event`.
///
/// Either the flat form (`bucketName`, `objectKey`, `invocationLabel`) or an
/// S3 event notification carrying `Records[0].s3.bucket.name` and
/// `Records[0].s3.object.key`.
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum TriggerEvent {
    Direct(DirectTrigger),
    Notification(S3Notification),
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DirectTrigger {
    pub bucket_name: String,
    pub object_key: String,
    #[serde(default)]
    pub invocation_label: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct S3Notification {
    #[serde(rename = "Records")]
    pub records: Vec<S3EventRecord>,
    #[serde(default, rename = "invocationLabel")]
    pub invocation_label: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct S3EventRecord {
    pub s3: S3Entity,
}

#[derive(Deserialize, Debug, Clone)]
pub struct S3Entity {
    pub bucket: S3BucketRef,
    pub object: S3ObjectRef,
}

#[derive(Deserialize, Debug, Clone)]
pub struct S3BucketRef {
    pub name: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct S3ObjectRef {
    pub key: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TriggerError {
    #[error("event notification contains no records")]
    NoRecords,
    #[error("trigger is missing a {0}")]
    MissingField(&'static str),
}

/// A resolved trigger: what to process and how to label it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub source: SourceObject,
    pub label: Option<String>,
}

impl Invocation {
    /// Deployment stage encoded in the label, e.g. `s3image-dev-resize` -> `dev`.
    pub fn stage(&self) -> Option<&str> {
        self.label
            .as_deref()
            .and_then(|label| label.split('-').nth(1))
            .filter(|stage| !stage.is_empty())
    }
}

impl TryFrom<TriggerEvent> for Invocation {
    type Error = TriggerError;

    fn try_from(event: TriggerEvent) -> Result<Self, Self::Error> {
        let (bucket, key, label) = match event {
            TriggerEvent::Direct(t) => (t.bucket_name, t.object_key, t.invocation_label),
            TriggerEvent::Notification(n) => {
                // Only the first record is processed, one invocation per upload.
                let record = n.records.into_iter().next().ok_or(TriggerError::NoRecords)?;
                (record.s3.bucket.name, record.s3.object.key, n.invocation_label)
            }
        };
        if bucket.is_empty() {
            return Err(TriggerError::MissingField("bucket name"));
        }
        if key.is_empty() {
            return Err(TriggerError::MissingField("object key"));
        }
        Ok(Self {
            source: SourceObject::new(bucket, key),
            label,
        })
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    ObjectNotFound,
    PathConvention,
    Codec,
    Upload,
    CallerContract,
}

/// Serialisable description of a failure.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DerivativeStatus {
    Success,
    Failure,
}

/// Outcome of one spec.
#[derive(Serialize, Clone, Debug)]
pub struct DerivativeResult {
    pub spec: DerivativeSpec,
    pub destination_key: String,
    pub status: DerivativeStatus,
    pub error: Option<ErrorInfo>,
}

/// A single line of the invocation trace.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    /// Milliseconds since the invocation started.
    pub elapsed_millis: u64,
    pub message: String,
}

/// Everything one invocation produced.
#[derive(Serialize, Clone, Debug)]
pub struct InvocationReport {
    pub source: SourceObject,
    /// Parent directory of the source key.
    pub source_path: String,
    pub derivatives: Vec<DerivativeResult>,
    pub overall_error: Option<ErrorInfo>,
    pub elapsed_millis: u64,
    pub log: Vec<LogEntry>,
}

impl InvocationReport {
    pub fn succeeded(&self) -> usize {
        self.derivatives
            .iter()
            .filter(|d| d.status == DerivativeStatus::Success)
            .count()
    }

    pub fn to_payload(&self) -> ReportPayload {
        let message = match &self.overall_error {
            None => format!(
                "Resized {} of {} derivatives for {}/{}",
                self.succeeded(),
                self.derivatives.len(),
                self.source.bucket,
                self.source.key
            ),
            Some(err) => format!(
                "Unable to resize {}/{}: {}",
                self.source.bucket, self.source.key, err.message
            ),
        };

        ReportPayload {
            message,
            source_bucket: self.source.bucket.clone(),
            source_key: self.source.key.clone(),
            source_path: self.source_path.clone(),
            error: self.overall_error.clone(),
            log: self.log.iter().map(|e| e.message.clone()).collect(),
            derivatives: self
                .derivatives
                .iter()
                .map(|d| DerivativePayload {
                    name: d.spec.name.clone(),
                    width: d.spec.width,
                    height: d.spec.height,
                    destination_key: d.destination_key.clone(),
                    status: d.status,
                    error: d.error.clone(),
                })
                .collect(),
            elapsed_millis: self.elapsed_millis,
        }
    }
}

/// Wire shape of a report, as returned to the invoking context.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ReportPayload {
    pub message: String,
    pub source_bucket: String,
    pub source_key: String,
    pub source_path: String,
    pub error: Option<ErrorInfo>,
    pub log: Vec<String>,
    pub derivatives: Vec<DerivativePayload>,
    pub elapsed_millis: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DerivativePayload {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub destination_key: String,
    pub status: DerivativeStatus,
    pub error: Option<ErrorInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Result<Invocation, TriggerError> {
        let event: TriggerEvent = serde_json::from_str(raw).unwrap();
        Invocation::try_from(event)
    }

    #[test]
    fn direct_trigger_resolves_source_and_stage() {
        let inv = parse(
            r#"{"bucketName":"media","objectKey":"dev/incoming/abc123/original.jpg","invocationLabel":"s3image-dev-resize"}"#,
        )
        .unwrap();
        assert_eq!(inv.source, SourceObject::new("media", "dev/incoming/abc123/original.jpg"));
        assert_eq!(inv.stage(), Some("dev"));
    }

    #[test]
    fn s3_notification_uses_first_record() {
        let inv = parse(
            r#"{"Records":[
                {"eventName":"ObjectCreated:Put","s3":{"bucket":{"name":"media"},"object":{"key":"prod/incoming/x/original.png","size":10}}},
                {"s3":{"bucket":{"name":"other"},"object":{"key":"ignored"}}}
            ]}"#,
        )
        .unwrap();
        assert_eq!(inv.source, SourceObject::new("media", "prod/incoming/x/original.png"));
        assert_eq!(inv.stage(), None);
    }

    #[test]
    fn empty_notification_is_rejected() {
        assert_eq!(parse(r#"{"Records":[]}"#), Err(TriggerError::NoRecords));
    }

    #[test]
    fn empty_key_is_rejected() {
        assert_eq!(
            parse(r#"{"bucketName":"media","objectKey":""}"#),
            Err(TriggerError::MissingField("object key"))
        );
    }

    #[test]
    fn label_without_stage_component() {
        let inv = Invocation {
            source: SourceObject::new("b", "k"),
            label: Some("resize".into()),
        };
        assert_eq!(inv.stage(), None);
    }
}
