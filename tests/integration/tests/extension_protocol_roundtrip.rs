use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use picteus_extension_sdk::{
    Communicator, ErrorKind, ExtensionError, ExtensionRuntime, ExtensionRuntimeConfig, Intent,
    LifecycleState, NotificationEvent, PicteusExtension, RunReport, TerminationCause,
};
use picteus_extensions::{
    CommandTarget, ExtensionCommand, ExtensionEnvironment, ExtensionManifest, ExtensionRuntimeSpec,
};
use picteus_host::{
    ExtensionHost, ExtensionIdentity, ExtensionStatus, HostConfig, HostError, IntentPresenter,
    IntentRequest, PresentationOutcome,
};
use picteus_transport::{memory_link_pair, TransportChannel};
use serde_json::{json, Value};
use tokio::{
    sync::{mpsc, Semaphore},
    task::JoinHandle,
};

const EXTENSION_ID: &str = "recorder";
const API_KEY: &str = "recorder-key";
const LAUNCH_COMMAND: &str = "launch";

#[derive(Debug, Clone, PartialEq)]
enum HookCall {
    Ready(Value),
    Event(String, Value),
    Settings(Value),
    Terminated,
}

/// Records every hook call and launches the intents it is asked to.
struct RecordingExtension {
    calls: mpsc::UnboundedSender<HookCall>,
    gate: Arc<Semaphore>,
}

#[async_trait]
impl PicteusExtension for RecordingExtension {
    async fn on_ready(&self, communicator: &Communicator) -> Result<(), ExtensionError> {
        let _ = self.calls.send(HookCall::Ready(communicator.settings()));
        Ok(())
    }

    async fn on_settings(
        &self,
        _communicator: &Communicator,
        settings: &Value,
    ) -> Result<(), ExtensionError> {
        let _ = self.calls.send(HookCall::Settings(settings.clone()));
        Ok(())
    }

    async fn on_event(
        &self,
        communicator: &Communicator,
        event: &NotificationEvent,
        value: Value,
    ) -> Result<Option<Value>, ExtensionError> {
        let _ = self
            .calls
            .send(HookCall::Event(event.to_string(), value.clone()));
        match event {
            NotificationEvent::ImageCreated if value["block"] == json!(true) => {
                let _permit = self
                    .gate
                    .acquire()
                    .await
                    .map_err(|error| ExtensionError::handler(error.to_string()))?;
                Ok(None)
            }
            NotificationEvent::ImageDeleted => Err(ExtensionError::handler("cannot delete")),
            NotificationEvent::ImageUpdated if value["explode"] == json!(true) => {
                panic!("handler exploded")
            }
            NotificationEvent::ProcessRunCommand => {
                let intent = Intent::from_value(&value["parameters"]["intent"])?;
                match communicator.launch_intent::<Value>(intent).await {
                    Ok(result) => Ok(Some(json!({ "result": result }))),
                    Err(error) => Ok(Some(json!({
                        "errorKind": error.kind().as_str(),
                        "reason": error.cancellation_reason(),
                    }))),
                }
            }
            _ => Ok(None),
        }
    }

    async fn on_terminate(&self) -> Result<(), ExtensionError> {
        let _ = self.calls.send(HookCall::Terminated);
        Ok(())
    }
}

#[derive(Default)]
struct QueuedPresenter {
    answers: Mutex<VecDeque<PresentationOutcome>>,
    presented: AtomicUsize,
}

impl QueuedPresenter {
    fn answering(answers: Vec<PresentationOutcome>) -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(answers.into()),
            presented: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl IntentPresenter for QueuedPresenter {
    async fn present(&self, _request: IntentRequest) -> PresentationOutcome {
        self.presented.fetch_add(1, Ordering::SeqCst);
        self.answers
            .lock()
            .expect("answers lock")
            .pop_front()
            .unwrap_or(PresentationOutcome::Cancelled {
                reason: "Cancelled".to_string(),
            })
    }
}

fn recording_manifest() -> ExtensionManifest {
    ExtensionManifest {
        schema_version: 1,
        id: EXTENSION_ID.to_string(),
        name: "Recorder".to_string(),
        version: "0.1.0".to_string(),
        description: None,
        runtime: ExtensionRuntimeSpec {
            environment: ExtensionEnvironment::Process,
            entrypoint: "bin/recorder".to_string(),
            args: vec![],
        },
        events: [
            "image.created",
            "image.updated",
            "image.deleted",
            "process.runCommand",
        ]
        .iter()
        .map(|event| event.to_string())
        .collect(),
        commands: vec![ExtensionCommand {
            id: LAUNCH_COMMAND.to_string(),
            on: CommandTarget::Process,
            label: "Launch an intent".to_string(),
            parameters: None,
        }],
        settings: json!({
            "type": "object",
            "properties": {"threshold": {"type": "integer"}}
        }),
        ui: vec![],
        terminate_grace_ms: 1_000,
    }
}

async fn with_timeout<F: std::future::Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("operation should finish in time")
}

struct Session {
    host: ExtensionHost,
    presenter: Arc<QueuedPresenter>,
    calls: mpsc::UnboundedReceiver<HookCall>,
    gate: Arc<Semaphore>,
    runtime: JoinHandle<Result<RunReport, ExtensionError>>,
}

impl Session {
    async fn start(answers: Vec<PresentationOutcome>) -> Self {
        let presenter = QueuedPresenter::answering(answers);
        let host = ExtensionHost::new(HostConfig::default(), presenter.clone());
        host.register_extension(ExtensionIdentity::from_manifest(recording_manifest()), API_KEY)
            .expect("register recorder");
        let mut events = host.subscribe();

        let (calls_sender, calls) = mpsc::unbounded_channel();
        let gate = Arc::new(Semaphore::new(0));
        let extension = RecordingExtension {
            calls: calls_sender,
            gate: Arc::clone(&gate),
        };
        let (host_link, extension_link) = memory_link_pair();
        let attaching = host.clone();
        let attach = tokio::spawn(async move {
            attaching
                .attach(TransportChannel::new("host:recorder", host_link))
                .await
        });
        let runtime = tokio::spawn(
            ExtensionRuntime::new(ExtensionRuntimeConfig::new(EXTENSION_ID, API_KEY)).run(
                extension,
                TransportChannel::new("extension:recorder", extension_link),
            ),
        );
        assert_eq!(
            with_timeout(attach).await.expect("join").expect("attach"),
            EXTENSION_ID
        );
        with_timeout(async {
            while host.status(EXTENSION_ID) != Some(ExtensionStatus::Ready) {
                let _ = events.recv().await;
            }
        })
        .await;

        let mut session = Self {
            host,
            presenter,
            calls,
            gate,
            runtime,
        };
        assert!(matches!(session.next_call().await, HookCall::Ready(_)));
        session
    }

    async fn next_call(&mut self) -> HookCall {
        with_timeout(self.calls.recv())
            .await
            .expect("hook call channel open")
    }

    async fn launch(&self, intent: Value) -> Value {
        with_timeout(
            self.host
                .run_process_command(LAUNCH_COMMAND, json!({ "intent": intent })),
        )
        .await
        .expect("launch command reply")
    }
}

#[tokio::test]
async fn integration_event_without_reply_runs_handler_once() {
    let mut session = Session::start(vec![]).await;

    let delivered = session
        .host
        .broadcast("image.created", json!({"id": "img-1"}));
    assert_eq!(delivered, vec![EXTENSION_ID.to_string()]);
    assert_eq!(
        session.next_call().await,
        HookCall::Event("image.created".to_string(), json!({"id": "img-1"}))
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(session.calls.try_recv().is_err());
}

#[tokio::test]
async fn integration_events_on_one_channel_arrive_in_send_order() {
    let mut session = Session::start(vec![]).await;

    for sequence in 0..20 {
        session
            .host
            .broadcast("image.created", json!({"id": format!("img-{sequence}")}));
    }
    for sequence in 0..20 {
        assert_eq!(
            session.next_call().await,
            HookCall::Event(
                "image.created".to_string(),
                json!({"id": format!("img-{sequence}")})
            )
        );
    }
}

#[tokio::test]
async fn integration_dialog_answer_reaches_extension() {
    let session = Session::start(vec![PresentationOutcome::answer(true)]).await;

    let reply = session
        .launch(json!({"dialog": {
            "type": "Question",
            "title": "Proceed?",
            "description": "Apply the tags",
            "buttons": {"yes": "Yes", "no": "No"}
        }}))
        .await;
    assert_eq!(reply, json!({"result": true}));
    assert_eq!(session.presenter.presented.load(Ordering::SeqCst), 1);
    assert!(session.host.open_intents(EXTENSION_ID).is_empty());
}

#[tokio::test]
async fn integration_cancelled_parameters_surface_as_user_cancelled() {
    let session = Session::start(vec![PresentationOutcome::Cancelled {
        reason: "Cancelled".to_string(),
    }])
    .await;

    let reply = session
        .launch(json!({"parameters": {
            "type": "object",
            "properties": {"name": {"type": "string"}}
        }}))
        .await;
    assert_eq!(
        reply,
        json!({"errorKind": ErrorKind::UserCancelled.as_str(), "reason": "Cancelled"})
    );
}

#[tokio::test]
async fn integration_second_channel_is_observed_while_first_handler_blocks() {
    let mut session = Session::start(vec![]).await;

    session
        .host
        .broadcast("image.created", json!({"id": "a", "block": true}));
    session.host.broadcast("image.updated", json!({"id": "b"}));
    assert_eq!(
        session.next_call().await,
        HookCall::Event("image.created".to_string(), json!({"id": "a", "block": true}))
    );
    assert_eq!(
        session.next_call().await,
        HookCall::Event("image.updated".to_string(), json!({"id": "b"}))
    );

    session.gate.add_permits(1);
    session.host.broadcast("image.created", json!({"id": "c"}));
    assert_eq!(
        session.next_call().await,
        HookCall::Event("image.created".to_string(), json!({"id": "c"}))
    );
}

#[tokio::test]
async fn regression_intent_with_two_branches_is_rejected_before_any_ui() {
    let session = Session::start(vec![PresentationOutcome::answer(true)]).await;

    let error = with_timeout(session.host.run_process_command(
        LAUNCH_COMMAND,
        json!({"intent": {
            "show": {"type": "Image", "id": "img-1"},
            "dialog": {
                "type": "Info",
                "title": "t",
                "description": "d",
                "buttons": {"yes": "Ok"}
            }
        }}),
    ))
    .await
    .expect_err("malformed intent");
    match error {
        HostError::Extension(error) => assert_eq!(error.kind(), ErrorKind::MalformedIntent),
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(session.presenter.presented.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn regression_failing_and_panicking_handlers_do_not_stop_dispatch() {
    let mut session = Session::start(vec![]).await;

    let failure = with_timeout(session.host.request(
        EXTENSION_ID,
        "image.deleted",
        json!({"id": "gone"}),
    ))
    .await
    .expect_err("handler error");
    match failure {
        HostError::Extension(error) => assert_eq!(error.kind(), ErrorKind::Handler),
        other => panic!("unexpected error {other:?}"),
    }
    let panic = with_timeout(session.host.request(
        EXTENSION_ID,
        "image.updated",
        json!({"id": "boom", "explode": true}),
    ))
    .await
    .expect_err("panicking handler");
    assert!(matches!(panic, HostError::Extension(ref error) if error.kind() == ErrorKind::Handler));

    assert!(matches!(session.next_call().await, HookCall::Event(ref channel, _) if channel == "image.deleted"));
    assert!(matches!(session.next_call().await, HookCall::Event(ref channel, _) if channel == "image.updated"));
    session
        .host
        .broadcast("image.created", json!({"id": "still-alive"}));
    assert_eq!(
        session.next_call().await,
        HookCall::Event("image.created".to_string(), json!({"id": "still-alive"}))
    );
    assert_eq!(session.host.status(EXTENSION_ID), Some(ExtensionStatus::Ready));
}

#[tokio::test]
async fn integration_settings_and_terminate_complete_the_lifecycle() {
    let mut session = Session::start(vec![]).await;

    with_timeout(
        session
            .host
            .set_settings(EXTENSION_ID, json!({"threshold": 3})),
    )
    .await
    .expect("push settings");
    assert_eq!(
        session.next_call().await,
        HookCall::Settings(json!({"threshold": 3}))
    );

    let acknowledged = with_timeout(session.host.terminate(EXTENSION_ID))
        .await
        .expect("terminate");
    assert!(acknowledged);
    assert_eq!(session.next_call().await, HookCall::Terminated);

    let report = with_timeout(session.runtime)
        .await
        .expect("join runtime")
        .expect("runtime report");
    assert_eq!(report.extension_id, EXTENSION_ID);
    assert_eq!(report.final_state, LifecycleState::Terminated);
    assert_eq!(report.cause, TerminationCause::HostRequest);
    assert!(!report.terminate_timed_out);

    let mut events = session.host.subscribe();
    with_timeout(async {
        while session.host.status(EXTENSION_ID) == Some(ExtensionStatus::Ready) {
            let _ = events.recv().await;
        }
    })
    .await;
    assert!(session
        .host
        .broadcast("image.created", json!({"id": "late"}))
        .is_empty());
}
