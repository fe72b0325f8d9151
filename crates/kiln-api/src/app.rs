use axum::middleware;
use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::auth::require_bearer_token;
use crate::handlers;
use crate::state::AppState;
use crate::version;

pub fn build_app(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        // ImageBuilds
        .route(
            "/orgs/:org/imagebuilds",
            post(handlers::create_build).get(handlers::list_builds),
        )
        .route(
            "/orgs/:org/imagebuilds/:name",
            get(handlers::get_build)
                .put(handlers::replace_build)
                .delete(handlers::delete_build),
        )
        .route("/orgs/:org/imagebuilds/:name/status", patch(handlers::patch_build_status))
        .route("/orgs/:org/imagebuilds/:name/logs", get(handlers::get_build_logs))
        // ImageExports
        .route(
            "/orgs/:org/imageexports",
            post(handlers::create_export).get(handlers::list_exports),
        )
        .route(
            "/orgs/:org/imageexports/:name",
            get(handlers::get_export)
                .put(handlers::replace_export)
                .delete(handlers::delete_export),
        )
        .route("/orgs/:org/imageexports/:name/status", patch(handlers::patch_export_status))
        .route("/orgs/:org/imageexports/:name/logs", get(handlers::get_export_logs))
        // Pipelines
        .route("/orgs/:org/imagepipelines", post(handlers::create_pipeline))
        // Auth applies to all routes above; the version check wraps auth.
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer_token))
        .route_layer(middleware::from_fn(version::require_api_version))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use base64::Engine as _;
    use serde_json::{json, Value};
    use tower::util::ServiceExt;
    use uuid::Uuid;

    use kiln_bus::{InMemoryBus, InMemoryLogStream};
    use kiln_engine::{ResourceService, TaskRegistry};
    use kiln_store::InMemoryStore;

    const TEST_TOKEN: &str = "test-token";

    fn test_app() -> Router {
        let store = Arc::new(InMemoryStore::new());
        let bus = Arc::new(InMemoryBus::new());
        let stream = Arc::new(InMemoryLogStream::new());
        let registry = Arc::new(TaskRegistry::new());
        let service = Arc::new(ResourceService::new(store, bus, stream, registry));
        build_app(AppState { service, auth_token: Arc::new(TEST_TOKEN.to_string()) })
    }

    fn org() -> Uuid {
        Uuid::nil()
    }

    fn request(method: Method, uri: &str) -> axum::http::request::Builder {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("Authorization", format!("Bearer {TEST_TOKEN}"))
            .header("API-Version", "v1")
    }

    fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
        request(method, uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn build_payload(name: &str) -> Value {
        json!({
            "metadata": { "name": name },
            "spec": {
                "sourceImage": "quay.io/acme/base:9",
                "destinationImage": format!("quay.io/acme/{name}:latest"),
            }
        })
    }

    fn export_payload(name: &str, build_ref: &str) -> Value {
        json!({
            "metadata": { "name": name },
            "spec": {
                "source": { "imageBuildRef": build_ref },
                "destinationImage": format!("quay.io/acme/{name}-disk"),
                "format": "qcow2",
            }
        })
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    // ── Auth & versioning ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn unauthenticated_request_returns_401() {
        let app = test_app();
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header("API-Version", "v1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn wrong_token_returns_401() {
        let app = test_app();
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header("API-Version", "v1")
                    .header("Authorization", "Bearer wrong-token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn basic_auth_with_token_as_password_is_accepted() {
        let app = test_app();
        let credentials =
            base64::engine::general_purpose::STANDARD.encode(format!("kiln:{TEST_TOKEN}"));
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header("API-Version", "v1")
                    .header("Authorization", format!("Basic {credentials}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_api_version_returns_400() {
        let app = test_app();
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header("Authorization", format!("Bearer {TEST_TOKEN}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(resp.headers().contains_key("API-Versions-Supported"));
    }

    #[tokio::test]
    async fn unsupported_api_version_returns_400() {
        let app = test_app();
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header("Authorization", format!("Bearer {TEST_TOKEN}"))
                    .header("API-Version", "v0")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn deprecated_version_gets_a_deprecation_header() {
        let app = test_app();
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header("Authorization", format!("Bearer {TEST_TOKEN}"))
                    .header("API-Version", "v1beta1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let deprecation = resp.headers().get("Deprecation").unwrap().to_str().unwrap();
        assert!(deprecation.starts_with('@'));
    }

    #[tokio::test]
    async fn current_version_has_no_deprecation_header() {
        let app = test_app();
        let resp = app
            .oneshot(request(Method::GET, "/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(!resp.headers().contains_key("Deprecation"));
        assert_eq!(
            resp.headers().get("API-Versions-Supported").unwrap().to_str().unwrap(),
            "v1beta1, v1"
        );
    }

    // ── CRUD ──────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn create_build_returns_201_with_seeded_metadata() {
        let app = test_app();
        let uri = format!("/orgs/{}/imagebuilds", org());
        let resp = app
            .oneshot(json_request(Method::POST, &uri, build_payload("b1")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body = body_json(resp).await;
        assert_eq!(body["metadata"]["generation"], json!(1));
        assert_eq!(body["metadata"]["resourceVersion"], json!("1"));
        assert_eq!(body["status"]["conditions"][0]["reason"], json!("Pending"));
    }

    #[tokio::test]
    async fn duplicate_create_returns_409() {
        let app = test_app();
        let uri = format!("/orgs/{}/imagebuilds", org());
        let resp = app
            .clone()
            .oneshot(json_request(Method::POST, &uri, build_payload("b1")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let resp = app
            .oneshot(json_request(Method::POST, &uri, build_payload("b1")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn invalid_name_returns_400() {
        let app = test_app();
        let uri = format!("/orgs/{}/imagebuilds", org());
        let resp = app
            .oneshot(json_request(Method::POST, &uri, build_payload("Not Valid")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn get_missing_build_returns_404() {
        let app = test_app();
        let uri = format!("/orgs/{}/imagebuilds/ghost", org());
        let resp = app
            .oneshot(request(Method::GET, &uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn list_builds_pages_with_a_continue_cursor() {
        let app = test_app();
        let create = format!("/orgs/{}/imagebuilds", org());
        for name in ["b1", "b2", "b3"] {
            let resp = app
                .clone()
                .oneshot(json_request(Method::POST, &create, build_payload(name)))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::CREATED);
        }

        let uri = format!("/orgs/{}/imagebuilds?limit=2", org());
        let resp = app
            .clone()
            .oneshot(request(Method::GET, &uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(resp).await;
        assert_eq!(body["items"].as_array().unwrap().len(), 2);
        assert_eq!(body["continue"], json!("b2"));

        let uri = format!("/orgs/{}/imagebuilds?limit=2&continue=b2", org());
        let resp = app
            .oneshot(request(Method::GET, &uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(resp).await;
        assert_eq!(body["items"][0]["metadata"]["name"], json!("b3"));
    }

    #[tokio::test]
    async fn invalid_field_selector_returns_400() {
        let app = test_app();
        let uri = format!("/orgs/{}/imageexports?fieldSelector=status.phase%3DPending", org());
        let resp = app
            .oneshot(request(Method::GET, &uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn replace_with_mismatched_name_returns_400() {
        let app = test_app();
        let create = format!("/orgs/{}/imagebuilds", org());
        app.clone()
            .oneshot(json_request(Method::POST, &create, build_payload("b1")))
            .await
            .unwrap();

        let uri = format!("/orgs/{}/imagebuilds/b1", org());
        let resp = app
            .oneshot(json_request(Method::PUT, &uri, build_payload("b2")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn replace_bumps_generation_on_spec_change() {
        let app = test_app();
        let create = format!("/orgs/{}/imagebuilds", org());
        app.clone()
            .oneshot(json_request(Method::POST, &create, build_payload("b1")))
            .await
            .unwrap();

        let uri = format!("/orgs/{}/imagebuilds/b1", org());
        let mut changed = build_payload("b1");
        changed["spec"]["sourceImage"] = json!("quay.io/acme/base:10");
        let resp = app
            .oneshot(json_request(Method::PUT, &uri, changed))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["metadata"]["generation"], json!(2));
    }

    #[tokio::test]
    async fn status_patch_updates_conditions_without_generation_bump() {
        let app = test_app();
        let create = format!("/orgs/{}/imagebuilds", org());
        app.clone()
            .oneshot(json_request(Method::POST, &create, build_payload("b1")))
            .await
            .unwrap();

        let uri = format!("/orgs/{}/imagebuilds/b1/status", org());
        let patch = json!({
            "conditions": [{
                "type": "Ready",
                "status": "False",
                "reason": "Building",
                "message": "build started",
            }]
        });
        let resp = app
            .oneshot(json_request(Method::PATCH, &uri, patch))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["metadata"]["generation"], json!(1));
        assert_eq!(body["status"]["conditions"][0]["reason"], json!("Building"));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let app = test_app();
        let create = format!("/orgs/{}/imagebuilds", org());
        app.clone()
            .oneshot(json_request(Method::POST, &create, build_payload("b1")))
            .await
            .unwrap();

        let uri = format!("/orgs/{}/imagebuilds/b1", org());
        let resp = app
            .clone()
            .oneshot(request(Method::DELETE, &uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(resp).await["deleted"], json!(true));

        let resp = app
            .oneshot(request(Method::DELETE, &uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(resp).await["deleted"], json!(false));
    }

    // ── Pipelines ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn pipeline_with_invalid_export_rolls_back_both() {
        let app = test_app();
        let uri = format!("/orgs/{}/imagepipelines", org());
        let mut export = export_payload("e1", "ignored");
        export["spec"]["destinationImage"] = json!("");
        let body = json!({ "imageBuild": build_payload("b1"), "imageExport": export });
        let resp = app.clone().oneshot(json_request(Method::POST, &uri, body)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        // Neither resource exists afterwards.
        let get_build = format!("/orgs/{}/imagebuilds/b1", org());
        let resp = app
            .clone()
            .oneshot(request(Method::GET, &get_build).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let get_export = format!("/orgs/{}/imageexports/e1", org());
        let resp = app
            .oneshot(request(Method::GET, &get_export).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn pipeline_rewrites_the_export_source() {
        let app = test_app();
        let uri = format!("/orgs/{}/imagepipelines", org());
        // The caller's direct source is overridden with the build reference.
        let mut export = export_payload("e1", "whatever");
        export["spec"]["source"] = json!({ "image": "quay.io/other/image" });
        let body = json!({ "imageBuild": build_payload("b1"), "imageExport": export });
        let resp = app.oneshot(json_request(Method::POST, &uri, body)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body = body_json(resp).await;
        assert_eq!(body["imageExport"]["spec"]["source"]["imageBuildRef"], json!("b1"));
        assert_eq!(body["imageExport"]["metadata"]["owner"], json!("ImageBuild/b1"));
    }

    // ── Logs ──────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn logs_endpoint_returns_plain_text() {
        let app = test_app();
        let create = format!("/orgs/{}/imagebuilds", org());
        app.clone()
            .oneshot(json_request(Method::POST, &create, build_payload("b1")))
            .await
            .unwrap();

        let uri = format!("/orgs/{}/imagebuilds/b1/logs", org());
        let resp = app
            .oneshot(request(Method::GET, &uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/plain"));
    }

    #[tokio::test]
    async fn logs_for_missing_resource_return_404() {
        let app = test_app();
        let uri = format!("/orgs/{}/imagebuilds/ghost/logs", org());
        let resp = app
            .oneshot(request(Method::GET, &uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
