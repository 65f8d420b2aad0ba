//! src/services/derivative_service.rs
//!
//! DerivativeGenerator turns one uploaded original into a fixed set of
//! resized renditions.
//!
//! An invocation runs as a straight line: resolve the destination directory
//! from the source key, download the source once, then for each spec decode,
//! resize-and-crop, and upload. Specs run one at a time against the same
//! downloaded buffer. A failing spec is recorded and the loop moves on; only a
//! bad source key or a failed download abort the whole invocation.

use crate::models::{
    derivative::DerivativeSpec,
    invocation::{
        DerivativeResult, DerivativeStatus, ErrorInfo, ErrorKind, Invocation, InvocationReport,
        SourceObject,
    },
};
use crate::services::{
    image_codec::{CodecError, ImageCodec, OutputFormat},
    invocation_log::InvocationLog,
    storage_service::{ObjectStore, StorageError},
};
use bytes::Bytes;
use std::{collections::HashSet, sync::Arc};
use thiserror::Error;
use tracing::{Instrument, error, info, info_span, warn};

const INCOMING_SEGMENT: &str = "incoming";
const IMAGES_SEGMENT: &str = "images";

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("unable to fetch source `{bucket}/{key}`: {source}")]
    ObjectNotFound {
        bucket: String,
        key: String,
        #[source]
        source: StorageError,
    },
    #[error("source key `{0}` has no `incoming` segment in its parent directory")]
    PathConvention(String),
    #[error("{spec}: {source}")]
    Codec {
        spec: String,
        #[source]
        source: CodecError,
    },
    #[error("upload to `{key}` failed: {source}")]
    Upload {
        key: String,
        #[source]
        source: StorageError,
    },
    #[error("invalid derivative specs: {0}")]
    CallerContract(String),
}

impl GenerateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GenerateError::ObjectNotFound { .. } => ErrorKind::ObjectNotFound,
            GenerateError::PathConvention(_) => ErrorKind::PathConvention,
            GenerateError::Codec { .. } => ErrorKind::Codec,
            GenerateError::Upload { .. } => ErrorKind::Upload,
            GenerateError::CallerContract(_) => ErrorKind::CallerContract,
        }
    }
}

impl From<&GenerateError> for ErrorInfo {
    fn from(err: &GenerateError) -> Self {
        ErrorInfo {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Where a source key's derivatives go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationLayout {
    /// Parent directory of the source key, e.g. `dev/incoming/abc123`.
    pub source_path: String,
    /// Same directory with `incoming` swapped for `images`.
    pub destination_dir: String,
    /// Last segment of the source path, e.g. `abc123`.
    pub image_id: String,
}

/// Parent directory of a key, or `""` for a top-level key.
pub fn parent_dir(key: &str) -> &str {
    key.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
}

/// Derive the destination directory for `key`.
///
/// `dev/incoming/abc123/original.jpg` becomes `dev/images/abc123`. Only the
/// first `incoming` segment of the parent directory is replaced; a parent
/// without one is a [`GenerateError::PathConvention`].
pub fn destination_layout(key: &str) -> Result<DestinationLayout, GenerateError> {
    let source_path = parent_dir(key);
    let mut segments: Vec<&str> = source_path.split('/').collect();

    let incoming = segments
        .iter()
        .position(|segment| *segment == INCOMING_SEGMENT)
        .ok_or_else(|| GenerateError::PathConvention(key.to_string()))?;
    segments[incoming] = IMAGES_SEGMENT;

    Ok(DestinationLayout {
        source_path: source_path.to_string(),
        destination_dir: segments.join("/"),
        image_id: source_path.rsplit('/').next().unwrap_or_default().to_string(),
    })
}

pub fn destination_key(destination_dir: &str, spec: &DerivativeSpec, format: OutputFormat) -> String {
    format!(
        "{}/{}.{}",
        destination_dir,
        spec.destination_subpath,
        format.extension()
    )
}

/// Reject spec lists the generator cannot honour.
///
/// Requires at least one spec, non-zero sizes, and non-empty, unique
/// destination subpaths that stay inside the destination directory.
pub fn validate_specs(specs: &[DerivativeSpec]) -> Result<(), GenerateError> {
    if specs.is_empty() {
        return Err(GenerateError::CallerContract("at least one spec is required".into()));
    }

    let mut seen = HashSet::new();
    for spec in specs {
        if spec.width == 0 || spec.height == 0 {
            return Err(GenerateError::CallerContract(format!(
                "`{}` has a zero dimension ({}x{})",
                spec.name, spec.width, spec.height
            )));
        }
        let subpath = spec.destination_subpath.as_str();
        if subpath.is_empty() || subpath.starts_with('/') || subpath.contains("..") {
            return Err(GenerateError::CallerContract(format!(
                "`{}` has an invalid destination subpath `{}`",
                spec.name, subpath
            )));
        }
        if !seen.insert(subpath) {
            return Err(GenerateError::CallerContract(format!(
                "destination subpath `{}` is used more than once",
                subpath
            )));
        }
    }
    Ok(())
}

/// Produces every configured derivative of a source object.
pub struct DerivativeGenerator<S, C> {
    store: Arc<S>,
    codec: Arc<C>,
    format: OutputFormat,
    specs: Vec<DerivativeSpec>,
}

impl<S, C> DerivativeGenerator<S, C>
where
    S: ObjectStore + 'static,
    C: ImageCodec + 'static,
{
    /// Build a generator for `specs`, validated up front.
    pub fn new(
        store: Arc<S>,
        codec: Arc<C>,
        format: OutputFormat,
        specs: Vec<DerivativeSpec>,
    ) -> Result<Self, GenerateError> {
        validate_specs(&specs)?;
        Ok(Self {
            store,
            codec,
            format,
            specs,
        })
    }

    pub fn specs(&self) -> &[DerivativeSpec] {
        &self.specs
    }

    /// Run the configured specs for one trigger, inside a span carrying the
    /// source location and stage.
    pub async fn run(&self, invocation: &Invocation) -> Result<InvocationReport, GenerateError> {
        let source = &invocation.source;
        let span = info_span!(
            "invocation",
            bucket = %source.bucket,
            key = %source.key,
            stage = invocation.stage().unwrap_or("-"),
        );
        self.execute(source, &self.specs, invocation.stage())
            .instrument(span)
            .await
    }

    /// Produce `specs` from `source`.
    ///
    /// Returns `Err` only for an invalid `specs` list, before any I/O. Every
    /// other outcome, including a missing source, is described by the report.
    pub async fn generate(
        &self,
        source: &SourceObject,
        specs: &[DerivativeSpec],
    ) -> Result<InvocationReport, GenerateError> {
        self.execute(source, specs, None).await
    }

    async fn execute(
        &self,
        source: &SourceObject,
        specs: &[DerivativeSpec],
        stage: Option<&str>,
    ) -> Result<InvocationReport, GenerateError> {
        validate_specs(specs)?;
        let mut log = InvocationLog::start();

        let layout = match destination_layout(&source.key) {
            Ok(layout) => layout,
            Err(err) => {
                let source_path = parent_dir(&source.key).to_string();
                return Ok(abort(source, source_path, log, err));
            }
        };
        log.record(format!(
            "Image {} from {}, derivatives go to {} (stage {})",
            layout.image_id,
            layout.source_path,
            layout.destination_dir,
            stage.unwrap_or("-")
        ));

        // Fetched once; every spec below reads this buffer.
        log.record(format!("Downloading {}:{}", source.bucket, source.key));
        let source_bytes = match self.store.get(&source.bucket, &source.key).await {
            Ok(bytes) => bytes,
            Err(err) => {
                let err = GenerateError::ObjectNotFound {
                    bucket: source.bucket.clone(),
                    key: source.key.clone(),
                    source: err,
                };
                return Ok(abort(source, layout.source_path, log, err));
            }
        };
        log.record(format!("Downloaded {} bytes", source_bytes.len()));

        let mut derivatives = Vec::with_capacity(specs.len());
        for (index, spec) in specs.iter().enumerate() {
            if index > 0 {
                log.record(format!("Reusing {}:{}", source.bucket, source.key));
            }
            let key = destination_key(&layout.destination_dir, spec, self.format);

            let outcome = self
                .process_spec(index, spec, source, &source_bytes, &key, &mut log)
                .await;
            let result = match outcome {
                Ok(()) => DerivativeResult {
                    spec: spec.clone(),
                    destination_key: key,
                    status: DerivativeStatus::Success,
                    error: None,
                },
                Err(err) => {
                    warn!(spec = %spec.name, error = %err, "Derivative failed");
                    log.record(format!("Step {} ({}) failed: {}", index, spec.name, err));
                    DerivativeResult {
                        spec: spec.clone(),
                        destination_key: key,
                        status: DerivativeStatus::Failure,
                        error: Some(ErrorInfo::from(&err)),
                    }
                }
            };
            derivatives.push(result);

            let elapsed = log.elapsed_millis();
            log.record(format!("End of step {}. Exec time: {}", index, elapsed));
        }

        let overall_error = total_failure(&derivatives);
        match &overall_error {
            None => info!(
                succeeded = derivatives
                    .iter()
                    .filter(|d| d.status == DerivativeStatus::Success)
                    .count(),
                total = derivatives.len(),
                "Resized {}/{} into {}",
                source.bucket,
                source.key,
                layout.destination_dir
            ),
            Some(err) => error!(
                error = %err.message,
                "Unable to resize {}/{}",
                source.bucket,
                source.key
            ),
        }

        let total = log.elapsed_millis();
        log.record(format!("Total Exec time: {}", total));
        let (elapsed_millis, log) = log.finish();

        Ok(InvocationReport {
            source: source.clone(),
            source_path: layout.source_path,
            derivatives,
            overall_error,
            elapsed_millis,
            log,
        })
    }

    /// Decode, resize, and upload one spec. Any error stays local to the spec.
    async fn process_spec(
        &self,
        index: usize,
        spec: &DerivativeSpec,
        source: &SourceObject,
        source_bytes: &Bytes,
        destination_key: &str,
        log: &mut InvocationLog,
    ) -> Result<(), GenerateError> {
        let codec_error = |source: CodecError| GenerateError::Codec {
            spec: spec.name.clone(),
            source,
        };

        let (orig_w, orig_h) = self.codec.decode_size(source_bytes).map_err(codec_error)?;
        log.record(format!(
            "resize {} ({}) from {}x{} to width: {}, height: {}",
            index, spec.name, orig_w, orig_h, spec.width, spec.height
        ));

        // Bytes clones share the buffer, the source is never copied.
        let codec = Arc::clone(&self.codec);
        let bytes = source_bytes.clone();
        let (width, height, format) = (spec.width, spec.height, self.format);
        let resized = tokio::task::spawn_blocking(move || {
            codec.resize_crop_to_buffer(&bytes, width, height, format)
        })
        .await
        .map_err(|e| codec_error(CodecError::Task(e.to_string())))?
        .map_err(codec_error)?;

        log.record(format!("upload {} to path: {}", index, destination_key));
        self.store
            .put(
                &source.bucket,
                destination_key,
                resized,
                self.format.content_type(),
            )
            .await
            .map_err(|source| GenerateError::Upload {
                key: destination_key.to_string(),
                source,
            })?;
        Ok(())
    }
}

/// Overall error when not a single derivative was produced.
fn total_failure(derivatives: &[DerivativeResult]) -> Option<ErrorInfo> {
    if derivatives
        .iter()
        .any(|d| d.status == DerivativeStatus::Success)
    {
        return None;
    }
    let last = derivatives.iter().rev().find_map(|d| d.error.as_ref())?;
    Some(ErrorInfo {
        kind: last.kind,
        message: format!(
            "all {} derivatives failed; last error: {}",
            derivatives.len(),
            last.message
        ),
    })
}

/// Report for an invocation that stopped before any spec ran.
fn abort(
    source: &SourceObject,
    source_path: String,
    mut log: InvocationLog,
    err: GenerateError,
) -> InvocationReport {
    error!(error = %err, "Invocation aborted");
    log.record(err.to_string());
    let total = log.elapsed_millis();
    log.record(format!("Total Exec time: {}", total));
    let (elapsed_millis, log) = log.finish();

    InvocationReport {
        source: source.clone(),
        source_path,
        derivatives: Vec::new(),
        overall_error: Some(ErrorInfo::from(&err)),
        elapsed_millis,
        log,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::object::Object;
    use crate::services::image_codec::{RasterCodec, tests::png_fixture};
    use crate::services::storage_service::tests::test_storage;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    const SOURCE_KEY: &str = "dev/incoming/abc123/original.jpg";

    #[derive(Default)]
    struct MemoryStore {
        objects: Mutex<HashMap<(String, String), (Bytes, String)>>,
        gets: AtomicUsize,
        puts: AtomicUsize,
        fail_put_key: Option<String>,
    }

    impl MemoryStore {
        fn with_source(key: &str) -> Self {
            let store = Self::default();
            store.insert("media", key, Bytes::from_static(b"source"));
            store
        }

        fn insert(&self, bucket: &str, key: &str, body: Bytes) {
            self.objects
                .lock()
                .unwrap()
                .insert((bucket.into(), key.into()), (body, "image/png".into()));
        }

        fn keys(&self) -> Vec<String> {
            let mut keys: Vec<_> = self
                .objects
                .lock()
                .unwrap()
                .keys()
                .map(|(_, k)| k.clone())
                .collect();
            keys.sort();
            keys
        }
    }

    #[async_trait]
    impl ObjectStore for MemoryStore {
        async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StorageError> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            self.objects
                .lock()
                .unwrap()
                .get(&(bucket.to_string(), key.to_string()))
                .map(|(body, _)| body.clone())
                .ok_or_else(|| StorageError::ObjectNotFound {
                    bucket: bucket.into(),
                    key: key.into(),
                })
        }

        async fn put(
            &self,
            bucket: &str,
            key: &str,
            body: Bytes,
            content_type: &str,
        ) -> Result<Object, StorageError> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            if self.fail_put_key.as_deref() == Some(key) {
                return Err(StorageError::Io(std::io::Error::other("disk full")));
            }
            let size_bytes = body.len() as i64;
            self.objects
                .lock()
                .unwrap()
                .insert((bucket.into(), key.into()), (body, content_type.into()));
            Ok(Object {
                id: Uuid::new_v4(),
                bucket: bucket.into(),
                key: key.into(),
                filename: key.rsplit('/').next().unwrap_or(key).into(),
                content_type: Some(content_type.into()),
                size_bytes,
                etag: None,
                last_modified: Utc::now(),
            })
        }
    }

    /// Encodes the requested size as the output body; fails for `fail_width`.
    #[derive(Default)]
    struct FakeCodec {
        fail_width: Option<u32>,
        fail_decode: bool,
    }

    impl ImageCodec for FakeCodec {
        fn decode_size(&self, _source: &[u8]) -> Result<(u32, u32), CodecError> {
            if self.fail_decode {
                return Err(CodecError::Decode("truncated".into()));
            }
            Ok((640, 480))
        }

        fn resize_crop_to_buffer(
            &self,
            _source: &[u8],
            width: u32,
            height: u32,
            _format: OutputFormat,
        ) -> Result<Bytes, CodecError> {
            if self.fail_width == Some(width) {
                return Err(CodecError::Encode("injected".into()));
            }
            Ok(Bytes::from(format!("{}x{}", width, height)))
        }
    }

    fn build(
        store: MemoryStore,
        codec: FakeCodec,
    ) -> (DerivativeGenerator<MemoryStore, FakeCodec>, Arc<MemoryStore>) {
        let store = Arc::new(store);
        let generator = DerivativeGenerator::new(
            Arc::clone(&store),
            Arc::new(codec),
            OutputFormat::default(),
            DerivativeSpec::defaults(),
        )
        .unwrap();
        (generator, store)
    }

    fn statuses(report: &InvocationReport) -> Vec<DerivativeStatus> {
        report.derivatives.iter().map(|d| d.status).collect()
    }

    #[tokio::test]
    async fn fixed_table_produces_expected_destination_keys() {
        let (generator, store) = build(MemoryStore::with_source(SOURCE_KEY), FakeCodec::default());
        let report = generator
            .generate(&SourceObject::new("media", SOURCE_KEY), generator.specs())
            .await
            .unwrap();

        let keys: Vec<_> = report
            .derivatives
            .iter()
            .map(|d| d.destination_key.as_str())
            .collect();
        assert_eq!(
            keys,
            [
                "dev/images/abc123/thumbnail.jpg",
                "dev/images/abc123/medium.jpg",
                "dev/images/abc123/tiny.jpg",
            ]
        );
        assert_eq!(report.source_path, "dev/incoming/abc123");
        assert!(report.overall_error.is_none());
        assert_eq!(store.puts.load(Ordering::SeqCst), 3);

        let objects = store.objects.lock().unwrap();
        let (body, content_type) = &objects[&("media".to_string(), "dev/images/abc123/medium.jpg".to_string())];
        assert_eq!(body, &Bytes::from_static(b"400x400"));
        assert_eq!(content_type, "image/jpeg");
    }

    #[tokio::test]
    async fn source_is_fetched_once_regardless_of_spec_count() {
        for count in [1usize, 3, 7] {
            let (generator, store) =
                build(MemoryStore::with_source(SOURCE_KEY), FakeCodec::default());
            let specs: Vec<_> = (0..count)
                .map(|i| DerivativeSpec::new(format!("s{i}"), 10 + i as u32, 10, format!("s{i}")))
                .collect();

            let report = generator
                .generate(&SourceObject::new("media", SOURCE_KEY), &specs)
                .await
                .unwrap();

            assert_eq!(store.gets.load(Ordering::SeqCst), 1);
            assert_eq!(report.derivatives.len(), count);
        }
    }

    #[tokio::test]
    async fn missing_incoming_segment_aborts_before_fetch() {
        let key = "dev/uploads/abc123/original.jpg";
        let (generator, store) = build(MemoryStore::with_source(key), FakeCodec::default());

        let report = generator
            .generate(&SourceObject::new("media", key), generator.specs())
            .await
            .unwrap();

        let err = report.overall_error.expect("overall error");
        assert_eq!(err.kind, ErrorKind::PathConvention);
        assert!(report.derivatives.is_empty());
        assert_eq!(report.source_path, "dev/uploads/abc123");
        assert_eq!(store.gets.load(Ordering::SeqCst), 0);
        assert_eq!(store.puts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_fetch_reports_object_not_found_and_never_uploads() {
        let (generator, store) = build(MemoryStore::default(), FakeCodec::default());

        let report = generator
            .generate(&SourceObject::new("media", SOURCE_KEY), generator.specs())
            .await
            .unwrap();

        assert_eq!(
            report.overall_error.as_ref().map(|e| e.kind),
            Some(ErrorKind::ObjectNotFound)
        );
        assert!(report.derivatives.is_empty());
        assert_eq!(store.gets.load(Ordering::SeqCst), 1);
        assert_eq!(store.puts.load(Ordering::SeqCst), 0);
        assert!(report.log.iter().any(|e| e.message.starts_with("Total Exec time")));
    }

    #[tokio::test]
    async fn codec_failure_is_local_to_its_spec() {
        let codec = FakeCodec {
            fail_width: Some(400),
            ..FakeCodec::default()
        };
        let (generator, store) = build(MemoryStore::with_source(SOURCE_KEY), codec);

        let report = generator
            .generate(&SourceObject::new("media", SOURCE_KEY), generator.specs())
            .await
            .unwrap();

        assert_eq!(
            statuses(&report),
            [
                DerivativeStatus::Success,
                DerivativeStatus::Failure,
                DerivativeStatus::Success
            ]
        );
        assert_eq!(
            report.derivatives[1].error.as_ref().map(|e| e.kind),
            Some(ErrorKind::Codec)
        );
        assert!(report.overall_error.is_none());
        assert_eq!(store.puts.load(Ordering::SeqCst), 2);
        assert!(!store.keys().contains(&"dev/images/abc123/medium.jpg".to_string()));
    }

    #[tokio::test]
    async fn upload_failure_is_local_to_its_spec() {
        let store = MemoryStore {
            fail_put_key: Some("dev/images/abc123/tiny.jpg".into()),
            ..MemoryStore::with_source(SOURCE_KEY)
        };
        let (generator, _store) = build(store, FakeCodec::default());

        let report = generator
            .generate(&SourceObject::new("media", SOURCE_KEY), generator.specs())
            .await
            .unwrap();

        assert_eq!(
            statuses(&report),
            [
                DerivativeStatus::Success,
                DerivativeStatus::Success,
                DerivativeStatus::Failure
            ]
        );
        assert_eq!(
            report.derivatives[2].error.as_ref().map(|e| e.kind),
            Some(ErrorKind::Upload)
        );
        assert!(report.overall_error.is_none());
    }

    #[tokio::test]
    async fn every_spec_failing_sets_overall_error() {
        let codec = FakeCodec {
            fail_decode: true,
            ..FakeCodec::default()
        };
        let (generator, store) = build(MemoryStore::with_source(SOURCE_KEY), codec);

        let report = generator
            .generate(&SourceObject::new("media", SOURCE_KEY), generator.specs())
            .await
            .unwrap();

        assert_eq!(report.derivatives.len(), 3);
        assert!(statuses(&report).iter().all(|s| *s == DerivativeStatus::Failure));
        let err = report.overall_error.expect("overall error");
        assert_eq!(err.kind, ErrorKind::Codec);
        assert!(err.message.starts_with("all 3 derivatives failed"));
        assert_eq!(store.puts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn invalid_specs_fail_before_any_io() {
        let (generator, store) = build(MemoryStore::with_source(SOURCE_KEY), FakeCodec::default());
        let source = SourceObject::new("media", SOURCE_KEY);

        let cases = [
            vec![],
            vec![DerivativeSpec::new("flat", 0, 10, "flat")],
            vec![
                DerivativeSpec::new("a", 10, 10, "same"),
                DerivativeSpec::new("b", 20, 20, "same"),
            ],
            vec![DerivativeSpec::new("escape", 10, 10, "../x")],
        ];
        for specs in cases {
            let err = generator.generate(&source, &specs).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::CallerContract);
        }
        assert_eq!(store.gets.load(Ordering::SeqCst), 0);

        let built = DerivativeGenerator::new(
            Arc::new(MemoryStore::default()),
            Arc::new(FakeCodec::default()),
            OutputFormat::default(),
            Vec::new(),
        );
        assert!(matches!(built, Err(GenerateError::CallerContract(_))));
    }

    #[tokio::test]
    async fn reinvoking_overwrites_the_same_keys() {
        let (generator, store) = build(MemoryStore::with_source(SOURCE_KEY), FakeCodec::default());
        let source = SourceObject::new("media", SOURCE_KEY);

        let first = generator.generate(&source, generator.specs()).await.unwrap();
        let second = generator.generate(&source, generator.specs()).await.unwrap();

        let keys = |r: &InvocationReport| {
            r.derivatives
                .iter()
                .map(|d| d.destination_key.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(keys(&first), keys(&second));
        // Source plus three derivatives, nothing versioned.
        assert_eq!(store.keys().len(), 4);
    }

    #[tokio::test]
    async fn log_traces_every_step() {
        let (generator, _store) = build(MemoryStore::with_source(SOURCE_KEY), FakeCodec::default());
        let invocation = Invocation {
            source: SourceObject::new("media", SOURCE_KEY),
            label: Some("s3image-dev-resize".into()),
        };

        let report = generator.run(&invocation).await.unwrap();
        let messages: Vec<_> = report.log.iter().map(|e| e.message.as_str()).collect();

        assert_eq!(
            messages[0],
            "Image abc123 from dev/incoming/abc123, derivatives go to dev/images/abc123 (stage dev)"
        );
        assert_eq!(messages[1], "Downloading media:dev/incoming/abc123/original.jpg");
        assert_eq!(
            messages.iter().filter(|m| m.starts_with("Reusing ")).count(),
            2
        );
        assert!(messages.contains(&"upload 0 to path: dev/images/abc123/thumbnail.jpg"));
        assert!(messages.iter().any(|m| m.starts_with("End of step 2.")));
        assert!(messages.last().unwrap().starts_with("Total Exec time: "));
    }

    #[tokio::test]
    async fn real_codec_and_store_produce_exact_dimensions() {
        let (storage, _dir) = test_storage().await;
        let storage = Arc::new(storage);
        storage
            .put(
                "media",
                "dev/incoming/abc123/original.png",
                Bytes::from(png_fixture(640, 360)),
                "image/png",
            )
            .await
            .unwrap();

        let codec = Arc::new(RasterCodec::default());
        let generator = DerivativeGenerator::new(
            Arc::clone(&storage),
            Arc::clone(&codec),
            OutputFormat::default(),
            DerivativeSpec::defaults(),
        )
        .unwrap();

        let report = generator
            .generate(
                &SourceObject::new("media", "dev/incoming/abc123/original.png"),
                generator.specs(),
            )
            .await
            .unwrap();
        assert!(report.overall_error.is_none());

        for derivative in &report.derivatives {
            let body = storage
                .get("media", &derivative.destination_key)
                .await
                .unwrap();
            assert_eq!(
                codec.decode_size(&body).unwrap(),
                (derivative.spec.width, derivative.spec.height)
            );
        }
    }

    #[test]
    fn layout_replaces_only_the_incoming_segment() {
        let layout = destination_layout("dev/incoming/abc123/original.jpg").unwrap();
        assert_eq!(
            layout,
            DestinationLayout {
                source_path: "dev/incoming/abc123".into(),
                destination_dir: "dev/images/abc123".into(),
                image_id: "abc123".into(),
            }
        );

        let nested = destination_layout("a/incoming/b/incoming/original.jpg").unwrap();
        assert_eq!(nested.destination_dir, "a/images/b/incoming");
    }

    #[test]
    fn layout_requires_incoming_in_parent_directory() {
        for key in [
            "original.jpg",
            "dev/abc123/incoming.jpg",
            "dev/incomingx/abc123/original.jpg",
        ] {
            let err = destination_layout(key).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::PathConvention, "{key}");
        }
    }
}
