//! Test doubles and builders shared by the pipeline tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use tryon_pipeline::{
    config::GenerationSettings,
    error::PipelineError,
    models::tryon::{ImageUpload, TryOnJobCreated, TryOnJobStatus},
    services::{
        generation::GenerationClient,
        job_store::InMemoryJobStore,
        pipeline::TryOnPipeline,
        retry::RetryPolicy,
        transport::{HttpTransport, TransportError},
        tryon_engine::TryOnEngineClient,
    },
};

pub const GENERATED_URL: &str = "https://cdn.deapi.test/out/garment-1.png";

/// Transport that replays canned replies in order and records request URLs.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Result<(u16, String), TransportError>>>,
    urls: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, status: u16, body: &str) -> Self {
        self.replies
            .lock()
            .unwrap()
            .push_back(Ok((status, body.to_string())));
        self
    }

    pub fn fail(self, err: TransportError) -> Self {
        self.replies.lock().unwrap().push_back(Err(err));
        self
    }

    pub fn call_count(&self) -> usize {
        self.urls.lock().unwrap().len()
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: reqwest::Request) -> Result<reqwest::Response, TransportError> {
        self.urls.lock().unwrap().push(request.url().to_string());
        let (status, body) = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .expect("scripted transport ran out of replies")?;
        let response = http::Response::builder()
            .status(status)
            .body(body)
            .unwrap();
        Ok(reqwest::Response::from(response))
    }
}

/// Try-on engine double: a scripted start result and a queue of statuses.
pub struct FakeTryOnEngine {
    start: Mutex<Option<Result<TryOnJobCreated, PipelineError>>>,
    statuses: Mutex<VecDeque<Result<TryOnJobStatus, PipelineError>>>,
    start_calls: Mutex<usize>,
    status_calls: Mutex<usize>,
}

impl FakeTryOnEngine {
    pub fn new() -> Self {
        Self {
            start: Mutex::new(None),
            statuses: Mutex::new(VecDeque::new()),
            start_calls: Mutex::new(0),
            status_calls: Mutex::new(0),
        }
    }

    pub fn starting(self, job_id: &str) -> Self {
        *self.start.lock().unwrap() = Some(Ok(TryOnJobCreated {
            job_id: job_id.to_string(),
            status_url: Some(format!("/tryon/{job_id}")),
        }));
        self
    }

    pub fn start_error(self, err: PipelineError) -> Self {
        *self.start.lock().unwrap() = Some(Err(err));
        self
    }

    pub fn status(self, status: &str, image_url: Option<&str>, error: Option<&str>) -> Self {
        self.statuses.lock().unwrap().push_back(Ok(TryOnJobStatus {
            status: status.to_string(),
            image_url: image_url.map(str::to_string),
            error: error.map(str::to_string),
            ..Default::default()
        }));
        self
    }

    pub fn status_error(self, err: PipelineError) -> Self {
        self.statuses.lock().unwrap().push_back(Err(err));
        self
    }

    pub fn start_calls(&self) -> usize {
        *self.start_calls.lock().unwrap()
    }

    pub fn status_calls(&self) -> usize {
        *self.status_calls.lock().unwrap()
    }
}

#[async_trait]
impl TryOnEngineClient for FakeTryOnEngine {
    async fn start_try_on(
        &self,
        _person: &ImageUpload,
        _garment: &ImageUpload,
        _cancel: &CancellationToken,
    ) -> Result<TryOnJobCreated, PipelineError> {
        *self.start_calls.lock().unwrap() += 1;
        self.start
            .lock()
            .unwrap()
            .take()
            .expect("fake engine has no scripted start")
    }

    async fn get_status(
        &self,
        _job_id: &str,
        _cancel: &CancellationToken,
    ) -> Result<TryOnJobStatus, PipelineError> {
        *self.status_calls.lock().unwrap() += 1;
        self.statuses
            .lock()
            .unwrap()
            .pop_front()
            .expect("fake engine ran out of statuses")
    }
}

pub struct Harness {
    pub pipeline: TryOnPipeline,
    pub transport: Arc<ScriptedTransport>,
    pub engine: Arc<FakeTryOnEngine>,
    pub jobs: Arc<InMemoryJobStore>,
}

/// Pipeline over an in-memory store, a scripted generation service and a
/// fake try-on engine.
pub fn harness(transport: ScriptedTransport, engine: FakeTryOnEngine) -> Harness {
    let transport = Arc::new(transport);
    let engine = Arc::new(engine);
    let jobs = Arc::new(InMemoryJobStore::new());

    let settings = GenerationSettings::new(
        "test-key",
        "https://deapi.test/api/v1",
        "QwenImageEdit_Plus_NF4",
        20,
        42,
    )
    .unwrap();
    let generation = GenerationClient::with_transport(
        reqwest::Client::new(),
        transport.clone(),
        settings,
        RetryPolicy::default(),
    );

    let pipeline = TryOnPipeline::new(Arc::new(generation), engine.clone(), jobs.clone());
    Harness {
        pipeline,
        transport,
        engine,
        jobs,
    }
}

/// Generation service replies for an accepted request that finishes on the
/// first poll.
pub fn successful_generation(transport: ScriptedTransport) -> ScriptedTransport {
    transport
        .reply(200, r#"{"data":{"request_id":"req-1"}}"#)
        .reply(
            200,
            &format!(r#"{{"data":{{"status":"done","result_url":"{GENERATED_URL}"}}}}"#),
        )
}

pub fn garment_image() -> ImageUpload {
    ImageUpload::new(b"\x89PNG\r\n\x1a\nhoodie".to_vec(), "hoodie.png")
}

pub fn person_image() -> ImageUpload {
    ImageUpload::new(b"\xff\xd8\xff\xe0person".to_vec(), "person.jpg")
}
