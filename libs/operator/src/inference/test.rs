use crate::controller::Context;
use crate::crd::inference_service::{InferenceService, InferenceServiceSpec};
use crate::crd::model::{Accelerator, HardwareSpec, Model, ModelPhase, ModelSpec, ModelStatus};
use crate::error::Result;
use crate::inference::reconcile::reconcile_inference_service;

use std::sync::Arc;

use http::{Request, Response};
use kube::{client::Body, Resource, ResourceExt};

impl InferenceService {
    fn test() -> Self {
        let mut s = InferenceService::new(
            "chat",
            InferenceServiceSpec {
                model_ref: "llama-3".to_owned(),
                ..Default::default()
            },
        );
        s.meta_mut().namespace = Some("default".into());
        s.meta_mut().generation = Some(1);
        s
    }
}

fn ready_model(accelerator: Accelerator) -> Model {
    let mut m = Model::new(
        "llama-3",
        ModelSpec {
            source: "https://example.test/m.gguf".to_owned(),
            hardware: Some(HardwareSpec {
                accelerator,
                gpu: None,
            }),
            ..Default::default()
        },
    );
    m.meta_mut().namespace = Some("default".into());
    m.status = Some(ModelStatus {
        phase: Some(ModelPhase::Ready),
        path: Some("/var/lib/llmkube/cache/abc/model.gguf".to_owned()),
        ..Default::default()
    });
    m
}

type ApiServerHandle = tower_test::mock::Handle<Request<Body>, Response<Body>>;

struct ApiServerVerifier(ApiServerHandle);

async fn timeout_after_1s(handle: tokio::task::JoinHandle<()>) {
    tokio::time::timeout(std::time::Duration::from_secs(1), handle)
        .await
        .expect("timeout on mock apiserver")
        .expect("scenario completed");
}

impl ApiServerVerifier {
    async fn handle_model_get(mut self, model: Option<Model>) -> Result<Self> {
        let (request, send) = self.0.next_request().await.expect("service not called");
        assert_eq!(request.method(), http::Method::GET);
        assert!(request.uri().path().ends_with("/models/llama-3"));
        let response = match &model {
            Some(m) => Response::builder().body(Body::from(serde_json::to_vec(m).unwrap())).unwrap(),
            None => Response::builder()
                .status(404)
                .body(Body::from(
                    serde_json::to_vec(&serde_json::json!({
                        "kind": "Status",
                        "apiVersion": "v1",
                        "status": "Failure",
                        "code": 404,
                        "reason": "NotFound",
                    }))
                    .unwrap(),
                ))
                .unwrap(),
        };
        send.send_response(response);
        Ok(self)
    }

    async fn handle_apply_patch(mut self, path_suffix: &str) -> Result<Self> {
        let (request, send) = self.0.next_request().await.expect("service not called");
        assert_eq!(request.method(), http::Method::PATCH);
        assert!(request.uri().path().ends_with(path_suffix), "{}", request.uri());
        let body = request.into_body().collect_bytes().await.unwrap();
        send.send_response(Response::builder().body(Body::from(body.to_vec())).unwrap());
        Ok(self)
    }

    async fn handle_pvc_get(mut self) -> Result<Self> {
        let (request, send) = self.0.next_request().await.expect("service not called");
        assert_eq!(request.method(), http::Method::GET);
        assert!(request.uri().path().ends_with("/llmkube-model-cache"));
        send.send_response(
            Response::builder()
                .status(404)
                .body(Body::from(
                    serde_json::to_vec(&serde_json::json!({
                        "kind": "Status",
                        "apiVersion": "v1",
                        "status": "Failure",
                        "code": 404,
                        "reason": "NotFound",
                    }))
                    .unwrap(),
                ))
                .unwrap(),
        );
        Ok(self)
    }

    async fn handle_pvc_create(mut self) -> Result<Self> {
        let (request, send) = self.0.next_request().await.expect("service not called");
        assert_eq!(request.method(), http::Method::POST);
        assert!(request.uri().path().ends_with("/persistentvolumeclaims"));
        let body = request.into_body().collect_bytes().await.unwrap();
        send.send_response(Response::builder().body(Body::from(body.to_vec())).unwrap());
        Ok(self)
    }

    async fn handle_pod_list(mut self) -> Result<Self> {
        let (request, send) = self.0.next_request().await.expect("service not called");
        assert_eq!(request.method(), http::Method::GET);
        assert!(request.uri().path().ends_with("/pods"));
        let list = serde_json::json!({
            "apiVersion": "v1",
            "kind": "PodList",
            "items": [],
            "metadata": {},
        });
        send.send_response(
            Response::builder()
                .body(Body::from(serde_json::to_vec(&list).unwrap()))
                .unwrap(),
        );
        Ok(self)
    }

    async fn handle_status_patch(mut self, svc: InferenceService, expect_phase: &str) -> Result<Self> {
        let (request, send) = self.0.next_request().await.expect("service not called");
        assert_eq!(request.method(), http::Method::PATCH);
        assert!(request.uri().path().ends_with(&format!(
            "/inferenceservices/{}/status",
            svc.name_any()
        )));
        let req_body = request.into_body().collect_bytes().await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&req_body).expect("valid json");
        let phase = json["status"]["phase"].as_str().expect("phase present");
        assert_eq!(phase.to_lowercase(), expect_phase.to_lowercase());

        let response = serde_json::to_vec(&svc).unwrap();
        send.send_response(Response::builder().body(Body::from(response)).unwrap());
        Ok(self)
    }
}

#[tokio::test]
async fn missing_model_marks_pending() {
    let svc = InferenceService::test();
    let (ctx, handle) = Context::test();

    let verifier = ApiServerVerifier(handle);
    let svc_for_second = svc.clone();
    let mock_srv = tokio::spawn(async move {
        verifier
            .handle_model_get(None)
            .await
            .unwrap()
            .handle_status_patch(svc_for_second, "pending")
            .await
            .unwrap();
    });

    let action = reconcile_inference_service(Arc::new(svc), ctx).await;
    assert!(action.is_ok());
    timeout_after_1s(mock_srv).await;
}

#[tokio::test]
async fn containerized_model_with_no_pods_yet_is_creating() {
    let svc = InferenceService::test();
    let model = ready_model(Accelerator::Cpu);
    let (ctx, handle) = Context::test();

    let verifier = ApiServerVerifier(handle);
    let svc_for_last = svc.clone();
    let mock_srv = tokio::spawn(async move {
        verifier
            .handle_model_get(Some(model))
            .await
            .unwrap()
            .handle_pvc_get()
            .await
            .unwrap()
            .handle_pvc_create()
            .await
            .unwrap()
            .handle_apply_patch("/deployments/chat")
            .await
            .unwrap()
            .handle_apply_patch("/services/chat")
            .await
            .unwrap()
            .handle_pod_list()
            .await
            .unwrap()
            .handle_status_patch(svc_for_last, "creating")
            .await
            .unwrap();
    });

    let action = reconcile_inference_service(Arc::new(svc), ctx).await;
    assert!(action.is_ok());
    timeout_after_1s(mock_srv).await;
}

#[tokio::test]
async fn metal_model_reaches_ready_via_service_apply_and_status_patch() {
    let svc = InferenceService::test();
    let model = ready_model(Accelerator::Metal);
    let (ctx, handle) = Context::test();

    let verifier = ApiServerVerifier(handle);
    let svc_for_last = svc.clone();
    let mock_srv = tokio::spawn(async move {
        verifier
            .handle_model_get(Some(model))
            .await
            .unwrap()
            .handle_apply_patch("/services/chat")
            .await
            .unwrap()
            .handle_status_patch(svc_for_last, "ready")
            .await
            .unwrap();
    });

    let action = reconcile_inference_service(Arc::new(svc), ctx).await;
    assert!(action.is_ok());
    timeout_after_1s(mock_srv).await;
}
