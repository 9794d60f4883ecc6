//! Drives the example extension through a real host over an in-memory link.

use std::{
    collections::VecDeque,
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use picteus_extension_sdk::{
    ApiClients, ApiError, ExtensionRuntime, ExtensionRuntimeConfig, ImageApi, ImageFeature,
    ImageSummary, Intent, LogLevel, RepositoryApi, RepositorySummary,
};
use picteus_extensions::load_and_validate_extension_manifest;
use picteus_host::{
    ExtensionHost, ExtensionIdentity, ExtensionStatus, HostConfig, HostEvent, IntentPresenter,
    IntentRequest, PresentationOutcome,
};
use picteus_transport::{memory_link_pair, TransportChannel};
use serde_json::{json, Value};

use super::{ExampleExtension, DEFAULT_EMBEDDING_DIMENSIONS, EXAMPLE_EXTENSION_ID};

const API_KEY: &str = "example-key";

#[derive(Default)]
struct ScriptedPresenter {
    answers: Mutex<VecDeque<PresentationOutcome>>,
    seen: Mutex<Vec<Intent>>,
}

impl ScriptedPresenter {
    fn answering(answers: Vec<PresentationOutcome>) -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(answers.into()),
            seen: Mutex::default(),
        })
    }

    fn seen(&self) -> Vec<Intent> {
        self.seen.lock().expect("seen lock").clone()
    }
}

#[async_trait]
impl IntentPresenter for ScriptedPresenter {
    async fn present(&self, request: IntentRequest) -> PresentationOutcome {
        self.seen.lock().expect("seen lock").push(request.intent);
        self.answers
            .lock()
            .expect("answers lock")
            .pop_front()
            .unwrap_or(PresentationOutcome::Cancelled {
                reason: "Cancelled".to_string(),
            })
    }
}

#[derive(Default)]
struct FakeLibrary {
    tags: Mutex<Vec<(String, Vec<String>)>>,
    features: Mutex<Vec<(String, Vec<ImageFeature>)>>,
    embeddings: Mutex<Vec<(String, usize)>>,
    stored: Mutex<Vec<String>>,
}

fn summary(id: &str) -> ImageSummary {
    ImageSummary {
        id: id.to_string(),
        repository_id: "repo-1".to_string(),
        name: format!("{id}.jpeg"),
        format: "jpeg".to_string(),
        width: 640,
        height: 480,
        tags: vec![],
    }
}

#[async_trait]
impl ImageApi for FakeLibrary {
    async fn get(&self, image_id: &str) -> Result<ImageSummary, ApiError> {
        Ok(summary(image_id))
    }

    async fn download(
        &self,
        image_id: &str,
        _format: Option<&str>,
        _width: Option<u32>,
        _height: Option<u32>,
    ) -> Result<Vec<u8>, ApiError> {
        Ok(image_id.as_bytes().to_vec())
    }

    async fn set_tags(
        &self,
        _extension_id: &str,
        image_id: &str,
        tags: Vec<String>,
    ) -> Result<(), ApiError> {
        self.tags
            .lock()
            .expect("tags lock")
            .push((image_id.to_string(), tags));
        Ok(())
    }

    async fn set_features(
        &self,
        _extension_id: &str,
        image_id: &str,
        features: Vec<ImageFeature>,
    ) -> Result<(), ApiError> {
        self.features
            .lock()
            .expect("features lock")
            .push((image_id.to_string(), features));
        Ok(())
    }

    async fn set_embeddings(
        &self,
        _extension_id: &str,
        image_id: &str,
        embeddings: Vec<f32>,
    ) -> Result<(), ApiError> {
        self.embeddings
            .lock()
            .expect("embeddings lock")
            .push((image_id.to_string(), embeddings.len()));
        Ok(())
    }

    async fn search(&self, _text: &str, _limit: usize) -> Result<Vec<ImageSummary>, ApiError> {
        Ok(vec![summary("img-1")])
    }
}

#[async_trait]
impl RepositoryApi for FakeLibrary {
    async fn list(&self) -> Result<Vec<RepositorySummary>, ApiError> {
        Ok(vec![RepositorySummary {
            id: "repo-1".to_string(),
            name: "Photos".to_string(),
        }])
    }

    async fn ensure(
        &self,
        technical_id: &str,
        name: &str,
    ) -> Result<RepositorySummary, ApiError> {
        Ok(RepositorySummary {
            id: technical_id.to_string(),
            name: name.to_string(),
        })
    }

    async fn store_image(
        &self,
        _repository_id: &str,
        name: &str,
        _bytes: Vec<u8>,
    ) -> Result<ImageSummary, ApiError> {
        let mut stored = self.stored.lock().expect("stored lock");
        stored.push(name.to_string());
        Ok(summary(&format!("converted-{}", stored.len())))
    }
}

struct Harness {
    host: ExtensionHost,
    library: Arc<FakeLibrary>,
}

impl Harness {
    async fn start(presenter: Arc<dyn IntentPresenter>) -> Self {
        let manifest_path = Path::new(env!("CARGO_MANIFEST_DIR")).join("extension.json");
        let (manifest, _) =
            load_and_validate_extension_manifest(&manifest_path).expect("bundled manifest");
        let host = ExtensionHost::new(HostConfig::default(), presenter);
        host.register_extension(ExtensionIdentity::from_manifest(manifest), API_KEY)
            .expect("register");
        let mut events = host.subscribe();

        let library = Arc::new(FakeLibrary::default());
        let apis = ApiClients::default()
            .with_images(library.clone())
            .with_repositories(library.clone());
        let (host_link, extension_link) = memory_link_pair();
        let attaching = host.clone();
        let attach = tokio::spawn(async move {
            attaching
                .attach(TransportChannel::new("host:example", host_link))
                .await
        });
        tokio::spawn(
            ExtensionRuntime::new(ExtensionRuntimeConfig::new(EXAMPLE_EXTENSION_ID, API_KEY))
                .with_api_clients(apis)
                .run(
                    ExampleExtension::new(),
                    TransportChannel::new("extension:example", extension_link),
                ),
        );
        assert_eq!(
            with_timeout(attach).await.expect("join").expect("attach"),
            EXAMPLE_EXTENSION_ID
        );
        with_timeout(async {
            loop {
                if let Ok(HostEvent::StatusChanged {
                    status: ExtensionStatus::Ready,
                    ..
                }) = events.recv().await
                {
                    return;
                }
            }
        })
        .await;
        Self { host, library }
    }

    async fn wait_for_log(&self, needle: &str) -> LogLevel {
        with_timeout(async {
            loop {
                if let Some(entry) = self
                    .host
                    .logs(Some(EXAMPLE_EXTENSION_ID))
                    .into_iter()
                    .find(|entry| entry.message.contains(needle))
                {
                    return entry.level;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
    }
}

async fn with_timeout<F: std::future::Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("operation should finish in time")
}

#[tokio::test]
async fn functional_extension_announces_readiness() {
    let harness = Harness::start(ScriptedPresenter::answering(vec![])).await;
    assert_eq!(
        harness.wait_for_log("The extension 'example' is ready").await,
        LogLevel::Info
    );
}

#[tokio::test]
async fn functional_image_created_sets_tags_and_features() {
    let harness = Harness::start(ScriptedPresenter::answering(vec![])).await;

    let reply = harness
        .host
        .request(EXAMPLE_EXTENSION_ID, "image.created", json!({"id": "img-7"}))
        .await
        .expect("image.created");
    assert_eq!(reply, Value::Null);
    assert_eq!(
        harness.library.tags.lock().expect("tags").clone(),
        vec![("img-7".to_string(), vec!["example".to_string()])]
    );
    assert_eq!(harness.library.features.lock().expect("features").len(), 1);
    harness.wait_for_log("The image with id 'img-7' was touched").await;
}

#[tokio::test]
async fn functional_embeddings_share_one_model_load() {
    let harness = Harness::start(ScriptedPresenter::answering(vec![])).await;

    let (first, second) = tokio::join!(
        harness.host.request(
            EXAMPLE_EXTENSION_ID,
            "text.computeEmbeddings",
            json!({"text": "a red bicycle"})
        ),
        harness.host.request(
            EXAMPLE_EXTENSION_ID,
            "text.computeEmbeddings",
            json!({"text": "a red bicycle"})
        ),
    );
    let first = first.expect("first embeddings");
    assert_eq!(first, second.expect("second embeddings"));
    assert_eq!(
        first.as_array().map(Vec::len),
        Some(DEFAULT_EMBEDDING_DIMENSIONS)
    );

    harness
        .host
        .request(
            EXAMPLE_EXTENSION_ID,
            "image.computeEmbeddings",
            json!({"id": "img-3"}),
        )
        .await
        .expect("image embeddings");
    assert_eq!(
        harness.library.embeddings.lock().expect("embeddings").clone(),
        vec![("img-3".to_string(), DEFAULT_EMBEDDING_DIMENSIONS)]
    );

    harness.wait_for_log("Loading the embedding model").await;
    let loads = harness
        .host
        .logs(Some(EXAMPLE_EXTENSION_ID))
        .into_iter()
        .filter(|entry| entry.message.contains("Loading the embedding model"))
        .count();
    assert_eq!(loads, 1);
}

#[tokio::test]
async fn functional_ask_for_something_opens_ui_for_chocolate_lovers() {
    let presenter = ScriptedPresenter::answering(vec![
        PresentationOutcome::Submitted(json!({"favoriteColor": "blue", "likeChocolate": true})),
        PresentationOutcome::Submitted(Value::Null),
    ]);
    let harness = Harness::start(presenter.clone()).await;

    let reply = harness
        .host
        .run_process_command("askForSomething", json!({}))
        .await
        .expect("askForSomething");
    assert_eq!(reply["favoriteColor"], "blue");
    let seen = presenter.seen();
    assert_eq!(seen.len(), 2);
    assert!(matches!(seen[0], Intent::Parameters(_)));
    assert!(matches!(seen[1], Intent::Ui(_)));
}

#[tokio::test]
async fn regression_cancelled_dialog_is_logged_at_error_level() {
    let harness = Harness::start(ScriptedPresenter::answering(vec![])).await;

    let reply = harness
        .host
        .run_process_command("dialog", json!({}))
        .await
        .expect("cancellation is handled by the extension");
    assert_eq!(reply, Value::Null);
    assert_eq!(
        harness.wait_for_log("with reason 'Cancelled'").await,
        LogLevel::Error
    );
}

#[tokio::test]
async fn functional_dialog_reports_clicked_button() {
    let harness =
        Harness::start(ScriptedPresenter::answering(vec![PresentationOutcome::answer(false)])).await;

    let reply = harness
        .host
        .run_process_command("dialog", json!({}))
        .await
        .expect("dialog");
    assert_eq!(reply, json!({"confirmed": false}));
    harness.wait_for_log("clicked the 'No' button").await;
}

#[tokio::test]
async fn functional_show_resolves_repository_target() {
    let presenter = ScriptedPresenter::answering(vec![PresentationOutcome::Submitted(Value::Null)]);
    let harness = Harness::start(presenter.clone()).await;

    let reply = harness
        .host
        .run_process_command("show", json!({"type": "repository"}))
        .await
        .expect("show");
    assert_eq!(reply, json!({"shown": "repo-1"}));
    match &presenter.seen()[..] {
        [Intent::Show(show)] => assert_eq!(show.id, "repo-1"),
        other => panic!("unexpected intents {other:?}"),
    }
}

#[tokio::test]
async fn functional_convert_stores_and_shows_new_images() {
    let presenter = ScriptedPresenter::answering(vec![PresentationOutcome::Submitted(Value::Null)]);
    let harness = Harness::start(presenter.clone()).await;

    let reply = harness
        .host
        .run_image_command(
            "convert",
            vec!["img-1".to_string(), "img-2".to_string()],
            json!({"format": "PNG", "stripMetadata": true}),
        )
        .await
        .expect("convert");
    assert_eq!(reply, json!({"converted": ["converted-1", "converted-2"]}));
    assert_eq!(
        harness.library.stored.lock().expect("stored").clone(),
        vec!["img-1.png".to_string(), "img-2.png".to_string()]
    );
    match &presenter.seen()[..] {
        [Intent::Images(images)] => assert_eq!(images.images.len(), 2),
        other => panic!("unexpected intents {other:?}"),
    }
}

#[tokio::test]
async fn regression_convert_with_dimensions_requires_stripped_metadata() {
    let presenter = ScriptedPresenter::answering(vec![PresentationOutcome::answer(true)]);
    let harness = Harness::start(presenter.clone()).await;

    let reply = harness
        .host
        .run_image_command(
            "convert",
            vec!["img-1".to_string()],
            json!({"format": "png", "width": 100}),
        )
        .await
        .expect("convert");
    assert_eq!(reply, Value::Null);
    assert!(harness.library.stored.lock().expect("stored").is_empty());
    assert!(matches!(presenter.seen()[..], [Intent::Dialog(_)]));
}

#[tokio::test]
async fn regression_image_event_without_id_is_a_decode_error() {
    let harness = Harness::start(ScriptedPresenter::answering(vec![])).await;

    let error = harness
        .host
        .request(EXAMPLE_EXTENSION_ID, "image.computeTags", json!({}))
        .await
        .expect_err("missing id");
    assert!(error.to_string().contains("has no image id"));
}
