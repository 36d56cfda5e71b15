#[cfg(all(test, feature = "e2e-tests"))]
mod test {
    use std::time::Duration;

    use k8s_openapi::api::apps::v1::Deployment;
    use kube::api::{Api, Patch, PatchParams, PostParams};
    use kube::client::Client;
    use kube::runtime::wait::{await_condition, conditions, Condition};
    use kube::ResourceExt;
    use llmkube_operator::crd::inference_service::{
        InferenceService, InferenceServicePhase, InferenceServiceSpec,
    };
    use llmkube_operator::crd::model::{Model, ModelPhase, ModelSpec};
    use serde_json::json;
    use tokio::time::timeout;

    /// A zero-byte artifact local to every test runner, so these tests never
    /// depend on network access to exercise the reconcile loop.
    const LOCAL_SOURCE: &str = "/dev/null";

    fn is_model_ready() -> impl Condition<Model> {
        |obj: Option<&Model>| {
            obj.and_then(|m| m.status.as_ref())
                .map(|s| matches!(s.phase, Some(ModelPhase::Ready)))
                .unwrap_or(false)
        }
    }

    fn is_service_ready() -> impl Condition<InferenceService> {
        |obj: Option<&InferenceService>| {
            obj.and_then(|s| s.status.as_ref())
                .map(|s| matches!(s.phase, Some(InferenceServicePhase::Ready)))
                .unwrap_or(false)
        }
    }

    fn is_service_not_ready() -> impl Condition<InferenceService> {
        |obj: Option<&InferenceService>| {
            obj.and_then(|s| s.status.as_ref())
                .map(|s| !matches!(s.phase, Some(InferenceServicePhase::Ready)))
                .unwrap_or(true)
        }
    }

    fn is_deployment_ready() -> impl Condition<Deployment> {
        |obj: Option<&Deployment>| {
            if let Some(deployment) = &obj {
                if let Some(status) = &deployment.status {
                    return status.replicas == status.updated_replicas
                        && status.replicas == status.ready_replicas;
                }
            }
            false
        }
    }

    async fn wait_for<R, C>(api: Api<R>, name: &str, condition: C)
    where
        R: kube::Resource
            + Clone
            + std::fmt::Debug
            + for<'de> k8s_openapi::serde::Deserialize<'de>
            + 'static
            + Send,
        C: Condition<R>,
    {
        timeout(
            Duration::from_secs(30),
            await_condition(api, name, condition),
        )
        .await
        .unwrap()
        .unwrap();
    }

    async fn setup(name: &str) -> (Api<Model>, Api<InferenceService>, Api<Deployment>) {
        let client = Client::try_default().await.unwrap();
        let model_api = Api::<Model>::namespaced(client.clone(), "default");
        let service_api = Api::<InferenceService>::namespaced(client.clone(), "default");
        let deployment_api = Api::<Deployment>::namespaced(client.clone(), "default");

        let model = Model::new(
            name,
            ModelSpec { source: LOCAL_SOURCE.to_owned(), ..Default::default() },
        );
        model_api.create(&PostParams::default(), &model).await.unwrap();
        wait_for(model_api.clone(), name, is_model_ready()).await;

        let service = InferenceService::new(
            name,
            InferenceServiceSpec { model_ref: name.to_owned(), ..Default::default() },
        );
        service_api.create(&PostParams::default(), &service).await.unwrap();

        wait_for(deployment_api.clone(), name, is_deployment_ready()).await;
        wait_for(service_api.clone(), name, is_service_ready()).await;
        (model_api, service_api, deployment_api)
    }

    #[tokio::test]
    async fn inference_service_create() {
        let name = "test-create";
        setup(name).await;
    }

    #[tokio::test]
    async fn inference_service_delete_deployment_is_recreated() {
        let name = "test-delete-deployment";
        let (_model_api, service_api, deployment_api) = setup(name).await;

        let deploy = deployment_api.get(name).await.unwrap();
        deployment_api.delete(name, &Default::default()).await.unwrap();

        wait_for(
            deployment_api.clone(),
            name,
            conditions::is_deleted(&deploy.uid().unwrap()),
        )
        .await;
        wait_for(deployment_api.clone(), name, is_deployment_ready()).await;
        wait_for(service_api.clone(), name, is_service_ready()).await;
    }

    #[tokio::test]
    async fn inference_service_delete_cascades_to_deployment_and_service() {
        let name = "test-delete-inference-service";
        let (_model_api, service_api, deployment_api) = setup(name).await;

        let deploy = deployment_api.get(name).await.unwrap();
        let svc = service_api.get(name).await.unwrap();
        service_api.delete(name, &Default::default()).await.unwrap();

        wait_for(
            service_api.clone(),
            name,
            conditions::is_deleted(&svc.uid().unwrap()),
        )
        .await;
        wait_for(
            deployment_api.clone(),
            name,
            conditions::is_deleted(&deploy.uid().unwrap()),
        )
        .await;
    }

    #[tokio::test]
    async fn inference_service_scale_replicas() {
        let name = "test-scale-replicas";
        let (_model_api, service_api, deployment_api) = setup(name).await;

        let mut svc = service_api.get(name).await.unwrap();
        svc.spec.replicas = Some(2);
        svc.metadata.managed_fields = None;
        service_api
            .patch(name, &PatchParams::apply("e2e-tests").force(), &Patch::Apply(&svc))
            .await
            .unwrap();

        wait_for(service_api.clone(), name, is_service_not_ready()).await;
        wait_for(service_api.clone(), name, is_service_ready()).await;

        let deploy = deployment_api.get(name).await.unwrap();
        assert_eq!(deploy.spec.unwrap().replicas.unwrap(), 2);
    }

    #[tokio::test]
    async fn inference_service_pending_until_model_is_missing() {
        let name = "test-missing-model";
        let client = Client::try_default().await.unwrap();
        let service_api = Api::<InferenceService>::namespaced(client, "default");

        let service = InferenceService::new(
            name,
            InferenceServiceSpec { model_ref: "does-not-exist".to_owned(), ..Default::default() },
        );
        service_api.create(&PostParams::default(), &service).await.unwrap();

        let svc = timeout(Duration::from_secs(10), async {
            loop {
                let svc = service_api.get(name).await.unwrap();
                if svc.status.is_some() {
                    return svc;
                }
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(svc.status.unwrap().phase, Some(InferenceServicePhase::Pending));
    }

    #[tokio::test]
    async fn inference_service_deployment_already_exists() {
        let name = "test-deployment-already-exists";
        let deployment = json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": name },
            "spec": {
                "replicas": 1,
                "selector": { "matchLabels": { "app": name } },
                "template": {
                    "metadata": { "labels": { "app": name } },
                    "spec": {
                        "containers": [{ "name": name, "image": "busybox:latest" }]
                    }
                }
            }
        });
        let deployment_api =
            Api::<Deployment>::namespaced(Client::try_default().await.unwrap(), "default");
        deployment_api
            .create(&PostParams::default(), &serde_json::from_value(deployment).unwrap())
            .await
            .unwrap();

        setup(name).await;
    }
}
