// File Ingestion
//
// Intercepts operations on the file table and persists the file they
// describe before the record is committed. The transient `name`,
// `fileData` and `url` fields are consumed here; the operation leaves
// with the stored file's uid and only its remaining metadata fields.

use std::sync::Arc;

use tracing::debug;

use crate::event::{BeforeRecordOperationEvent, BeforeRecordOperationEventHandler};
use crate::mapping::RemoteIdMappingRepository;
use crate::operation::config::{parse_depth, PersistenceSettings, TemplateResolver};
use crate::operation::{OperationError, OperationKind, RecordOperation};
use crate::storage::{Folder, ResourceStore, StoredFile};

pub mod http;
pub mod media;
pub mod source;

use http::HttpClient;
use media::OnlineMediaRegistry;
use source::{
    AcquisitionRequest, Acquired, ContentSource, DownloadSource, InlineSource, OnlineMediaSource,
};

/// Table whose records describe stored files.
pub const FILE_TABLE: &str = "file";

/// Key under which download validators are kept in the mapping metadata.
pub const HANDLER_KEY: &str = "persist-file-data";

/// Fields consumed by the handler and never committed as record data.
const TRANSIENT_FIELDS: [&str; 3] = ["fileData", "url", "name"];

/// Hex characters of MD5(`name`) naming the hashed subfolders, one per
/// level, outermost first.
pub fn resolve_subfolder_path(name: &str, depth: usize) -> Vec<String> {
    let hash = format!("{:x}", md5::compute(name.as_bytes()));
    hash.chars().take(depth).map(String::from).collect()
}

pub struct PersistFileDataEventHandler {
    resources: Arc<ResourceStore>,
    mapping: Arc<dyn RemoteIdMappingRepository>,
    resolver: Arc<dyn TemplateResolver>,
    settings: PersistenceSettings,
    sources: Vec<Box<dyn ContentSource>>,
}

impl PersistFileDataEventHandler {
    /// Handler with the standard source order: inline data, online
    /// media, direct download.
    pub fn new(
        resources: Arc<ResourceStore>,
        mapping: Arc<dyn RemoteIdMappingRepository>,
        resolver: Arc<dyn TemplateResolver>,
        http: Arc<dyn HttpClient>,
        settings: PersistenceSettings,
    ) -> Self {
        let sources: Vec<Box<dyn ContentSource>> = vec![
            Box::new(InlineSource),
            Box::new(OnlineMediaSource::new(
                resources.clone(),
                OnlineMediaRegistry::with_default_helpers(),
            )),
            Box::new(DownloadSource::new(http, mapping.clone())),
        ];

        Self {
            resources,
            mapping,
            resolver,
            settings,
            sources,
        }
    }

    /// Base folder from settings, then one hashed subfolder per level.
    fn target_folder(
        &self,
        operation: &RecordOperation,
        base_name: &str,
    ) -> Result<Folder, OperationError> {
        let identifier = self
            .resolver
            .resolve(&self.settings.file_upload_folder_path, operation);
        let depth = parse_depth(
            &self
                .resolver
                .resolve(&self.settings.hashed_subfolders, operation),
        );

        let mut folder = self.resources.folder_or_create(&identifier)?;

        for segment in resolve_subfolder_path(base_name, depth) {
            folder = match self.resources.subfolder(&folder, &segment)? {
                Some(existing) => existing,
                None => self.resources.create_subfolder(&folder, &segment)?,
            };
        }

        debug!(folder = %folder.identifier(), depth, name = base_name, "resolved target folder");
        Ok(folder)
    }

    fn acquire(&self, request: &AcquisitionRequest<'_>) -> Result<Option<Acquired>, OperationError> {
        for source in &self.sources {
            if let Some(acquired) = source.try_acquire(request)? {
                debug!(source = source.name(), remote_id = request.remote_id, "content acquired");
                return Ok(Some(acquired));
            }
        }
        Ok(None)
    }

    /// New file for creates; the mapped file, renamed if needed, otherwise.
    fn resolve_file(
        &self,
        operation: &RecordOperation,
        folder: &Folder,
        base_name: &str,
    ) -> Result<StoredFile, OperationError> {
        if operation.is_create() {
            return Ok(self.resources.create_file(folder, base_name)?);
        }

        let remote_id = operation.remote_id();
        let uid = self.mapping.get(operation.table(), remote_id).ok_or_else(|| {
            OperationError::NotFound(format!(
                "The file with remote ID \"{remote_id}\" does not exist."
            ))
        })?;

        let file = self.resources.file(uid)?.ok_or_else(|| {
            OperationError::NotFound(format!(
                "The file with remote ID \"{remote_id}\" and UID \"{uid}\" does not exist."
            ))
        })?;

        if self.resources.sanitize_file_name(base_name) != file.name {
            return Ok(self.resources.rename_file(&file, base_name)?);
        }

        Ok(file)
    }
}

impl BeforeRecordOperationEventHandler for PersistFileDataEventHandler {
    fn name(&self) -> &'static str {
        "persist-file-data"
    }

    fn handle(&self, event: &mut BeforeRecordOperationEvent<'_>) -> Result<(), OperationError> {
        let operation = event.operation_mut();

        if operation.kind() == OperationKind::Delete || operation.table() != FILE_TABLE {
            return Ok(());
        }

        let base_name = operation.string_field("name").unwrap_or_default().to_string();
        if !self.resources.validator().is_valid(&base_name) {
            return Err(OperationError::InvalidName(base_name));
        }

        let folder = self.target_folder(operation, &base_name)?;

        if operation.is_create() && self.resources.has_file_in_folder(&base_name, &folder)? {
            return Err(OperationError::IdentityConflict(format!(
                "File \"{base_name}\" already exists in \"{}\".",
                folder.identifier()
            )));
        }

        let request = AcquisitionRequest {
            kind: operation.kind(),
            remote_id: operation.remote_id(),
            base_name: &base_name,
            file_data: operation.string_field("fileData"),
            url: operation.string_field("url"),
            folder: &folder,
        };

        let (file, contents) = match self.acquire(&request)? {
            Some(Acquired::Materialized(file)) => (file, None),
            Some(Acquired::Content(bytes)) => {
                (self.resolve_file(operation, &folder, &base_name)?, Some(bytes))
            }
            Some(Acquired::NotModified) => (self.resolve_file(operation, &folder, &base_name)?, None),
            None if operation.is_create() => {
                return Err(OperationError::MissingArgument(
                    "Cannot download file. Missing property \"url\" in the data.".into(),
                ))
            }
            None => (self.resolve_file(operation, &folder, &base_name)?, None),
        };

        if let Some(bytes) = contents.filter(|b| !b.is_empty()) {
            self.resources.set_contents(&file, &bytes)?;
        }

        for field in TRANSIENT_FIELDS {
            operation.remove_field(field);
        }
        operation.set_uid(file.uid);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventPipeline;
    use crate::ingest::http::{HttpError, HttpResponse};
    use crate::mapping::{MappingRepository, Metadata};
    use crate::operation::config::{PlaceholderResolver, DEFAULT_DENY_PATTERN};
    use crate::operation::RecordData;
    use crate::storage::index::FileIndex;
    use crate::storage::{FileNameValidator, LocalBackend};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::{BTreeMap, VecDeque};

    /// Scripted HTTP client that records the headers it was sent.
    #[derive(Default)]
    struct FakeHttp {
        responses: Mutex<VecDeque<HttpResponse>>,
        requests: Mutex<Vec<(String, Vec<(String, String)>)>>,
    }

    impl FakeHttp {
        fn respond(&self, status: u16, headers: &[(&str, &str)], body: &[u8]) {
            self.responses.lock().push_back(HttpResponse {
                status,
                headers: headers
                    .iter()
                    .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
                    .collect::<BTreeMap<_, _>>(),
                body: body.to_vec(),
            });
        }

        fn last_headers(&self) -> Vec<(String, String)> {
            self.requests.lock().last().map(|(_, h)| h.clone()).unwrap_or_default()
        }
    }

    impl HttpClient for FakeHttp {
        fn get(&self, url: &str, headers: &[(&str, String)]) -> Result<HttpResponse, HttpError> {
            self.requests.lock().push((
                url.to_string(),
                headers.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            ));
            self.responses
                .lock()
                .pop_front()
                .ok_or_else(|| HttpError::Transport("connection refused".into()))
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        root: std::path::PathBuf,
        resources: Arc<ResourceStore>,
        mapping: Arc<MappingRepository>,
        http: Arc<FakeHttp>,
        pipeline: EventPipeline,
    }

    fn fixture(depth: &str) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();

        let mut resources = ResourceStore::new(
            "local",
            FileIndex::in_memory(),
            FileNameValidator::new(DEFAULT_DENY_PATTERN).unwrap(),
        );
        resources.register("local", LocalBackend::new(&root));
        let resources = Arc::new(resources);
        let mapping = Arc::new(MappingRepository::in_memory());
        let http = Arc::new(FakeHttp::default());

        let settings = PersistenceSettings {
            file_upload_folder_path: "local:/interest/".into(),
            hashed_subfolders: depth.into(),
        };

        let mut pipeline = EventPipeline::new();
        pipeline.register(PersistFileDataEventHandler::new(
            resources.clone(),
            mapping.clone(),
            Arc::new(PlaceholderResolver),
            http.clone(),
            settings,
        ));

        Fixture {
            _dir: dir,
            root,
            resources,
            mapping,
            http,
            pipeline,
        }
    }

    fn data(value: serde_json::Value) -> RecordData {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn subfolder_path_is_md5_prefix() {
        let hash = format!("{:x}", md5::compute(b"report.pdf"));
        let path = resolve_subfolder_path("report.pdf", 2);

        assert_eq!(hash, "5c6813f49dfba292cc1008edce1c90e2");
        assert_eq!(path, vec!["5".to_string(), "c".to_string()]);
        assert_eq!(path, resolve_subfolder_path("report.pdf", 2));
        assert!(resolve_subfolder_path("report.pdf", 0).is_empty());
        assert_eq!(resolve_subfolder_path("report.pdf", 32).concat(), hash);
    }

    #[test]
    fn create_from_inline_data() {
        let f = fixture("0");

        let op = f
            .pipeline
            .dispatch(RecordOperation::create(
                FILE_TABLE,
                "logo",
                data(json!({ "name": "logo.png", "fileData": "UE5HREFUQQ==", "title": "Logo" })),
            ))
            .unwrap();

        let file = f.resources.file(op.uid().unwrap()).unwrap().unwrap();
        assert_eq!(file.name, "logo.png");
        assert_eq!(file.folder.identifier(), "local:/interest/");
        assert_eq!(std::fs::read(f.root.join("interest/logo.png")).unwrap(), b"PNGDATA");
        assert_eq!(op.data(), &data(json!({ "title": "Logo" })));
    }

    #[test]
    fn create_places_file_in_hashed_subfolders() {
        let f = fixture("2");
        let hash = format!("{:x}", md5::compute(b"report.pdf"));

        f.pipeline
            .dispatch(RecordOperation::create(
                FILE_TABLE,
                "report",
                data(json!({ "name": "report.pdf", "fileData": "JVBERg==" })),
            ))
            .unwrap();

        let expected = f
            .root
            .join("interest")
            .join(&hash[0..1])
            .join(&hash[1..2])
            .join("report.pdf");
        assert_eq!(std::fs::read(expected).unwrap(), b"%PDF");
    }

    #[test]
    fn create_with_existing_name_conflicts() {
        let f = fixture("0");
        let create = |remote_id: &str| {
            RecordOperation::create(
                FILE_TABLE,
                remote_id,
                data(json!({ "name": "logo.png", "fileData": "UE5HREFUQQ==" })),
            )
        };

        f.pipeline.dispatch(create("a")).unwrap();
        let err = f.pipeline.dispatch(create("b")).unwrap_err();

        assert!(matches!(err.source, OperationError::IdentityConflict(_)));
        assert!(err.to_string().contains("logo.png"));
    }

    #[test]
    fn create_without_content_source_is_missing_argument() {
        let f = fixture("0");

        let err = f
            .pipeline
            .dispatch(RecordOperation::create(
                FILE_TABLE,
                "empty",
                data(json!({ "name": "empty.txt", "url": "" })),
            ))
            .unwrap_err();

        assert!(matches!(err.source, OperationError::MissingArgument(_)));
        assert!(!f.root.join("interest/empty.txt").exists());
    }

    #[test]
    fn invalid_names_are_rejected() {
        let f = fixture("0");

        for name in ["../escape.txt", "shell.php", "", "..."] {
            let err = f
                .pipeline
                .dispatch(RecordOperation::create(
                    FILE_TABLE,
                    "bad",
                    data(json!({ "name": name, "fileData": "eA==" })),
                ))
                .unwrap_err();
            assert!(matches!(err.source, OperationError::InvalidName(_)), "{name}");
        }
    }

    #[test]
    fn malformed_base64_aborts() {
        let f = fixture("0");

        let err = f
            .pipeline
            .dispatch(RecordOperation::create(
                FILE_TABLE,
                "broken",
                data(json!({ "name": "broken.bin", "fileData": "%%%" })),
            ))
            .unwrap_err();

        assert!(matches!(err.source, OperationError::Decode(_)));
    }

    #[test]
    fn update_of_unmapped_remote_id_is_not_found() {
        let f = fixture("0");

        let err = f
            .pipeline
            .dispatch(RecordOperation::update(
                FILE_TABLE,
                "ghost",
                data(json!({ "name": "ghost.txt", "fileData": "eA==" })),
            ))
            .unwrap_err();

        assert!(matches!(err.source, OperationError::NotFound(ref m) if m.contains("ghost")));
    }

    #[test]
    fn update_of_missing_stored_file_names_both_ids() {
        let f = fixture("0");
        f.mapping.set(FILE_TABLE, "lost", 41).unwrap();

        let err = f
            .pipeline
            .dispatch(RecordOperation::update(
                FILE_TABLE,
                "lost",
                data(json!({ "name": "lost.txt" })),
            ))
            .unwrap_err();

        assert!(
            matches!(err.source, OperationError::NotFound(ref m) if m.contains("lost") && m.contains("41"))
        );
    }

    #[test]
    fn update_renames_and_keeps_content_without_source() {
        let f = fixture("0");
        let created = f
            .pipeline
            .dispatch(RecordOperation::create(
                FILE_TABLE,
                "doc",
                data(json!({ "name": "draft.txt", "fileData": "aGVsbG8=" })),
            ))
            .unwrap();
        let uid = created.uid().unwrap();
        f.mapping.set(FILE_TABLE, "doc", uid).unwrap();

        let updated = f
            .pipeline
            .dispatch(RecordOperation::update(
                FILE_TABLE,
                "doc",
                data(json!({ "name": "final.txt", "title": "Final" })),
            ))
            .unwrap();

        assert_eq!(updated.uid(), Some(uid));
        let file = f.resources.file(uid).unwrap().unwrap();
        assert_eq!(file.name, "final.txt");
        assert_eq!(f.resources.contents(&file).unwrap(), b"hello");
        assert!(!f.root.join("interest/draft.txt").exists());
    }

    #[test]
    fn download_stores_validators_and_content() {
        let f = fixture("0");
        f.http.respond(
            200,
            &[("Date", "Mon, 01 Jan 2024 00:00:00 GMT"), ("ETag", "\"v1\"")],
            b"JPEGDATA",
        );

        let op = f
            .pipeline
            .dispatch(RecordOperation::create(
                FILE_TABLE,
                "img",
                data(json!({ "name": "img.jpg", "url": "http://x/img.jpg" })),
            ))
            .unwrap();

        let file = f.resources.file(op.uid().unwrap()).unwrap().unwrap();
        assert_eq!(f.resources.contents(&file).unwrap(), b"JPEGDATA");
        assert!(f.http.last_headers().is_empty());

        let mut expected = Metadata::new();
        expected.insert("date".into(), "Mon, 01 Jan 2024 00:00:00 GMT".into());
        expected.insert("etag".into(), "\"v1\"".into());
        assert_eq!(f.mapping.metadata("img", HANDLER_KEY), Some(expected));
    }

    #[test]
    fn create_ignores_stale_validators_for_remote_id() {
        let f = fixture("0");
        let mut stale = Metadata::new();
        stale.insert("etag".into(), "\"v1\"".into());
        f.mapping.set_metadata("img", HANDLER_KEY, stale).unwrap();
        f.http.respond(200, &[("ETag", "\"v2\"")], b"FRESH");

        let op = f
            .pipeline
            .dispatch(RecordOperation::create(
                FILE_TABLE,
                "img",
                data(json!({ "name": "again.jpg", "url": "http://x/img.jpg" })),
            ))
            .unwrap();

        assert!(f.http.last_headers().is_empty());
        let file = f.resources.file(op.uid().unwrap()).unwrap().unwrap();
        assert_eq!(f.resources.contents(&file).unwrap(), b"FRESH");
    }

    #[test]
    fn not_modified_on_create_aborts() {
        let f = fixture("0");
        f.http.respond(304, &[], b"");

        let err = f
            .pipeline
            .dispatch(RecordOperation::create(
                FILE_TABLE,
                "img",
                data(json!({ "name": "img.jpg", "url": "http://x/img.jpg" })),
            ))
            .unwrap_err();

        assert!(matches!(err.source, OperationError::Transport(_)));
        assert!(!f.root.join("interest/img.jpg").exists());
    }

    #[test]
    fn not_modified_update_keeps_content_and_validators() {
        let f = fixture("0");
        let created = f
            .pipeline
            .dispatch(RecordOperation::create(
                FILE_TABLE,
                "img",
                data(json!({ "name": "img.jpg", "fileData": "T0xE" })),
            ))
            .unwrap();
        f.mapping.set(FILE_TABLE, "img", created.uid().unwrap()).unwrap();

        let mut validators = Metadata::new();
        validators.insert("etag".into(), "abc".into());
        f.mapping.set_metadata("img", HANDLER_KEY, validators.clone()).unwrap();
        f.http.respond(304, &[], b"");

        f.pipeline
            .dispatch(RecordOperation::update(
                FILE_TABLE,
                "img",
                data(json!({ "name": "img.jpg", "url": "http://x/img.jpg" })),
            ))
            .unwrap();

        assert_eq!(
            f.http.last_headers(),
            vec![("If-None-Match".to_string(), "abc".to_string())]
        );
        let file = f.resources.file(created.uid().unwrap()).unwrap().unwrap();
        assert_eq!(f.resources.contents(&file).unwrap(), b"OLD");
        assert_eq!(f.mapping.metadata("img", HANDLER_KEY), Some(validators));
    }

    #[test]
    fn modified_download_replaces_validators() {
        let f = fixture("0");
        let created = f
            .pipeline
            .dispatch(RecordOperation::create(
                FILE_TABLE,
                "img",
                data(json!({ "name": "img.jpg", "fileData": "T0xE" })),
            ))
            .unwrap();
        f.mapping.set(FILE_TABLE, "img", created.uid().unwrap()).unwrap();

        let mut old = Metadata::new();
        old.insert("etag".into(), "abc".into());
        old.insert("date".into(), "Mon, 01 Jan 2024 00:00:00 GMT".into());
        f.mapping.set_metadata("img", HANDLER_KEY, old).unwrap();
        f.http.respond(200, &[("ETag", "def")], b"NEW");

        f.pipeline
            .dispatch(RecordOperation::update(
                FILE_TABLE,
                "img",
                data(json!({ "name": "img.jpg", "url": "http://x/img.jpg" })),
            ))
            .unwrap();

        let headers = f.http.last_headers();
        assert!(headers.contains(&("If-Modified-Since".to_string(), "Mon, 01 Jan 2024 00:00:00 GMT".to_string())));
        assert!(headers.contains(&("If-None-Match".to_string(), "abc".to_string())));

        let mut expected = Metadata::new();
        expected.insert("etag".into(), "def".into());
        assert_eq!(f.mapping.metadata("img", HANDLER_KEY), Some(expected));

        let file = f.resources.file(created.uid().unwrap()).unwrap().unwrap();
        assert_eq!(f.resources.contents(&file).unwrap(), b"NEW");
    }

    #[test]
    fn error_status_is_not_found() {
        let f = fixture("0");
        f.http.respond(404, &[], b"missing");

        let err = f
            .pipeline
            .dispatch(RecordOperation::create(
                FILE_TABLE,
                "img",
                data(json!({ "name": "img.jpg", "url": "http://x/missing.jpg" })),
            ))
            .unwrap_err();

        assert!(matches!(
            err.source,
            OperationError::NotFound(ref m) if m.contains("http://x/missing.jpg") && m.contains("404")
        ));
    }

    #[test]
    fn online_media_create_skips_download() {
        let f = fixture("0");

        let op = f
            .pipeline
            .dispatch(RecordOperation::create(
                FILE_TABLE,
                "clip",
                data(json!({ "name": "intro.mp4", "url": "https://youtu.be/dQw4w9WgXcQ" })),
            ))
            .unwrap();

        let file = f.resources.file(op.uid().unwrap()).unwrap().unwrap();
        assert_eq!(file.name, "intro.youtube");
        assert_eq!(f.resources.contents(&file).unwrap(), b"dQw4w9WgXcQ");
        assert!(f.http.requests.lock().is_empty());
    }

    #[test]
    fn other_tables_and_deletes_pass_through() {
        let f = fixture("0");
        let page = RecordOperation::create("pages", "p1", data(json!({ "name": "../x" })));
        let delete = RecordOperation::delete(FILE_TABLE, "logo");

        assert_eq!(f.pipeline.dispatch(page.clone()).unwrap(), page);
        assert_eq!(f.pipeline.dispatch(delete.clone()).unwrap(), delete);
    }
}
