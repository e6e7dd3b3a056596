//! REST request routing and dispatch.
//!
//! Routes:
//!
//! ```text
//! POST /api/WorkflowDefinitions                  create a definition
//! GET  /api/WorkflowDefinitions                  list definitions
//! GET  /api/WorkflowDefinitions/{id}             get a definition
//! POST /api/WorkflowInstances                    start an instance
//! GET  /api/WorkflowInstances[?definitionId=..]  list instances
//! GET  /api/WorkflowInstances/{id}[/state]       get an instance
//! POST /api/WorkflowInstances/{id}/actions       execute an action
//! GET  /api/WorkflowInstances/{id}/actions       list available actions
//! GET  /health                                   liveness check
//! ```
//!
//! Path segments are matched without regard to ASCII case; ids are taken
//! verbatim.

use crate::dto::{ApiResponse, ExecuteActionRequest, HealthStatus, StartInstanceRequest};
use crate::error::ServiceError;
use crate::metrics::Metrics;
use crate::service::WorkflowService;
use flowstate_core::{DefinitionId, InstanceId, NewDefinition};
use hyper::body::Bytes;
use hyper::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

const DEFINITIONS: &str = "WorkflowDefinitions";
const INSTANCES: &str = "WorkflowInstances";

/// A recognised API endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Health,
    CreateDefinition,
    ListDefinitions,
    GetDefinition(DefinitionId),
    StartInstance,
    ListInstances(Option<DefinitionId>),
    GetInstance(InstanceId),
    ExecuteAction(InstanceId),
    AvailableActions(InstanceId),
}

impl Route {
    /// Operation label used in logs and metrics.
    pub fn operation_name(&self) -> &'static str {
        match self {
            Route::Health => "health",
            Route::CreateDefinition => "create_definition",
            Route::ListDefinitions => "list_definitions",
            Route::GetDefinition(_) => "get_definition",
            Route::StartInstance => "start_instance",
            Route::ListInstances(_) => "list_instances",
            Route::GetInstance(_) => "get_instance",
            Route::ExecuteAction(_) => "execute_action",
            Route::AvailableActions(_) => "available_actions",
        }
    }
}

/// Why a request matched no route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteError {
    NotFound,
    MethodNotAllowed,
}

/// Resolves a method and path (plus optional query string) to a route.
pub fn route(method: &Method, path: &str, query: Option<&str>) -> Result<Route, RouteError> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let get_only = |route: Route| {
        if *method == Method::GET {
            Ok(route)
        } else {
            Err(RouteError::MethodNotAllowed)
        }
    };

    match segments.as_slice() {
        [health] if health.eq_ignore_ascii_case("health") => get_only(Route::Health),
        [api, collection, rest @ ..] if api.eq_ignore_ascii_case("api") => {
            if collection.eq_ignore_ascii_case(DEFINITIONS) {
                route_definitions(method, rest)
            } else if collection.eq_ignore_ascii_case(INSTANCES) {
                route_instances(method, rest, query)
            } else {
                Err(RouteError::NotFound)
            }
        }
        _ => Err(RouteError::NotFound),
    }
}

fn route_definitions(method: &Method, rest: &[&str]) -> Result<Route, RouteError> {
    match (rest, method) {
        ([], &Method::POST) => Ok(Route::CreateDefinition),
        ([], &Method::GET) => Ok(Route::ListDefinitions),
        ([id], &Method::GET) => Ok(Route::GetDefinition(DefinitionId::from(*id))),
        ([] | [_], _) => Err(RouteError::MethodNotAllowed),
        _ => Err(RouteError::NotFound),
    }
}

fn route_instances(method: &Method, rest: &[&str], query: Option<&str>) -> Result<Route, RouteError> {
    match (rest, method) {
        ([], &Method::POST) => Ok(Route::StartInstance),
        ([], &Method::GET) => Ok(Route::ListInstances(
            query_param(query, "definitionId").map(DefinitionId::from),
        )),
        ([id], &Method::GET) => Ok(Route::GetInstance(InstanceId::from(*id))),
        ([id, sub], &Method::GET) if sub.eq_ignore_ascii_case("state") => {
            Ok(Route::GetInstance(InstanceId::from(*id)))
        }
        ([id, sub], &Method::GET) if sub.eq_ignore_ascii_case("actions") => {
            Ok(Route::AvailableActions(InstanceId::from(*id)))
        }
        ([id, sub], &Method::POST) if sub.eq_ignore_ascii_case("actions") => {
            Ok(Route::ExecuteAction(InstanceId::from(*id)))
        }
        ([] | [_], _) => Err(RouteError::MethodNotAllowed),
        ([_, sub], _) if sub.eq_ignore_ascii_case("state") || sub.eq_ignore_ascii_case("actions") => {
            Err(RouteError::MethodNotAllowed)
        }
        _ => Err(RouteError::NotFound),
    }
}

/// Returns the first non-empty value of `key` in a query string.
fn query_param<'a>(query: Option<&'a str>, key: &str) -> Option<&'a str> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, v)| k.eq_ignore_ascii_case(key) && !v.is_empty())
        .map(|(_, v)| v)
}

/// A response ready to be written to the wire.
#[derive(Debug, Clone)]
pub struct ApiReply {
    pub status: StatusCode,
    pub body: Bytes,
}

impl ApiReply {
    fn json<T: Serialize>(status: StatusCode, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self {
                status,
                body: Bytes::from(body),
            },
            Err(e) => {
                tracing::error!("Failed to serialize response: {}", e);
                Self {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    body: Bytes::from_static(br#"{"success":false,"error":"internal error"}"#),
                }
            }
        }
    }

    pub fn not_found() -> Self {
        Self::json(StatusCode::NOT_FOUND, &ApiResponse::<()>::error("Not Found"))
    }

    pub fn method_not_allowed() -> Self {
        Self::json(
            StatusCode::METHOD_NOT_ALLOWED,
            &ApiResponse::<()>::error("Method Not Allowed"),
        )
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::json(StatusCode::BAD_REQUEST, &ApiResponse::<()>::error(message))
    }

    pub fn payload_too_large() -> Self {
        Self::json(
            StatusCode::PAYLOAD_TOO_LARGE,
            &ApiResponse::<()>::error("request body too large"),
        )
    }

    fn from_error(err: &ServiceError) -> Self {
        let status =
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = match err {
            ServiceError::Validation(errors) => ApiResponse::<()>::validation(errors.clone()),
            ServiceError::Storage(_) => {
                ApiResponse::error("internal storage failure")
            }
            other => ApiResponse::error(other.to_string()),
        };
        Self::json(status, &body)
    }
}

/// Dispatches routed requests to the [`WorkflowService`].
pub struct ApiHandler {
    service: Arc<WorkflowService>,
}

impl ApiHandler {
    pub fn new(service: Arc<WorkflowService>) -> Self {
        Self { service }
    }

    fn metrics(&self) -> Option<&Arc<Metrics>> {
        self.service.metrics()
    }

    /// Handles one request and returns the reply.
    pub async fn handle(&self, method: &Method, path: &str, query: Option<&str>, body: Bytes) -> ApiReply {
        let route = match route(method, path, query) {
            Ok(route) => route,
            Err(RouteError::NotFound) => return ApiReply::not_found(),
            Err(RouteError::MethodNotAllowed) => return ApiReply::method_not_allowed(),
        };

        let op_name = route.operation_name();
        let timer = self.metrics().map(|m| {
            m.request_duration
                .with_label_values(&[op_name])
                .start_timer()
        });

        let result = self.dispatch(route, body).await;

        if let Some(metrics) = self.metrics() {
            metrics.requests_total.with_label_values(&[op_name]).inc();
            if let Err(ref e) = result {
                metrics.errors_total.with_label_values(&[e.error_code()]).inc();
            }
        }
        drop(timer);

        match result {
            Ok(reply) => reply,
            Err(e) => {
                if e.is_internal() {
                    tracing::error!("{} failed: {}", op_name, e);
                } else {
                    tracing::debug!("{} refused: {}", op_name, e);
                }
                ApiReply::from_error(&e)
            }
        }
    }

    async fn dispatch(&self, route: Route, body: Bytes) -> Result<ApiReply, ServiceError> {
        match route {
            Route::Health => Ok(ApiReply::json(StatusCode::OK, &HealthStatus::healthy())),
            Route::CreateDefinition => {
                let request: NewDefinition = parse_body(&body)?;
                let created = self.blocking(move |s| s.create_definition(request)).await?;
                Ok(ok(&created))
            }
            Route::ListDefinitions => {
                let definitions = self.blocking(|s| s.list_definitions()).await?;
                Ok(ok(&definitions))
            }
            Route::GetDefinition(id) => {
                let definition = self.blocking(move |s| s.get_definition(&id)).await?;
                Ok(ok(&definition))
            }
            Route::StartInstance => {
                let request: StartInstanceRequest = parse_body(&body)?;
                let instance = self
                    .blocking(move |s| s.start_instance(&request.definition_id))
                    .await?;
                Ok(ok(&instance))
            }
            Route::ListInstances(definition_id) => {
                let instances = self
                    .blocking(move |s| s.list_instances(definition_id.as_ref()))
                    .await?;
                Ok(ok(&instances))
            }
            Route::GetInstance(id) => {
                let instance = self.blocking(move |s| s.get_instance(&id)).await?;
                Ok(ok(&instance))
            }
            Route::ExecuteAction(id) => {
                let request: ExecuteActionRequest = parse_body(&body)?;
                let instance = self
                    .blocking(move |s| s.execute_action(&id, &request.action_id))
                    .await?;
                Ok(ok(&instance))
            }
            Route::AvailableActions(id) => {
                let actions = self.blocking(move |s| s.available_actions(&id)).await?;
                Ok(ok(&actions))
            }
        }
    }

    /// Runs a service call off the async workers. Repository calls may block
    /// on disk and on the instance lock.
    async fn blocking<T, F>(&self, f: F) -> Result<T, ServiceError>
    where
        F: FnOnce(&WorkflowService) -> Result<T, ServiceError> + Send + 'static,
        T: Send + 'static,
    {
        let service = self.service.clone();
        tokio::task::spawn_blocking(move || f(&service))
            .await
            .map_err(|e| ServiceError::Structural(format!("service task failed: {}", e)))?
    }
}

fn ok<T: Serialize>(data: &T) -> ApiReply {
    ApiReply::json(StatusCode::OK, &ApiResponse::ok(data))
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ServiceError> {
    if body.is_empty() {
        return Err(ServiceError::InvalidRequest("request body is required".to_string()));
    }
    serde_json::from_slice(body)
        .map_err(|e| ServiceError::InvalidRequest(format!("invalid request body: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowstate_storage::InMemoryRepository;
    use serde_json::{json, Value};

    fn handler() -> ApiHandler {
        let service = WorkflowService::new(Arc::new(InMemoryRepository::new()));
        ApiHandler::new(Arc::new(service))
    }

    async fn call(handler: &ApiHandler, method: Method, uri: &str, body: Value) -> (StatusCode, Value) {
        let (path, query) = match uri.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (uri, None),
        };
        let body = if body.is_null() {
            Bytes::new()
        } else {
            Bytes::from(serde_json::to_vec(&body).unwrap())
        };
        let reply = handler.handle(&method, path, query, body).await;
        (reply.status, serde_json::from_slice(&reply.body).unwrap())
    }

    fn approval() -> Value {
        json!({
            "name": "approval",
            "states": [
                {"id": "draft", "name": "Draft", "isInitial": true},
                {"id": "review", "name": "Review"},
                {"id": "approved", "name": "Approved", "isFinal": true}
            ],
            "actions": [
                {"id": "submit", "name": "Submit", "fromStates": ["draft"], "toState": "review"},
                {"id": "approve", "name": "Approve", "fromStates": ["review"], "toState": "approved"}
            ]
        })
    }

    #[test]
    fn test_routing() {
        assert_eq!(route(&Method::GET, "/health", None), Ok(Route::Health));
        assert_eq!(
            route(&Method::POST, "/api/workflowdefinitions", None),
            Ok(Route::CreateDefinition)
        );
        assert_eq!(
            route(&Method::GET, "/api/WorkflowDefinitions/d-1/", None),
            Ok(Route::GetDefinition(DefinitionId::from("d-1")))
        );
        assert_eq!(
            route(&Method::GET, "/api/WorkflowInstances/i-1/state", None),
            Ok(Route::GetInstance(InstanceId::from("i-1")))
        );
        assert_eq!(
            route(&Method::GET, "/api/WorkflowInstances", Some("definitionId=d-1")),
            Ok(Route::ListInstances(Some(DefinitionId::from("d-1"))))
        );
        assert_eq!(
            route(&Method::GET, "/api/WorkflowInstances", Some("definitionId=")),
            Ok(Route::ListInstances(None))
        );
        assert_eq!(
            route(&Method::DELETE, "/api/WorkflowInstances/i-1", None),
            Err(RouteError::MethodNotAllowed)
        );
        assert_eq!(
            route(&Method::PUT, "/api/WorkflowInstances/i-1/actions", None),
            Err(RouteError::MethodNotAllowed)
        );
        assert_eq!(
            route(&Method::GET, "/api/Unknown", None),
            Err(RouteError::NotFound)
        );
        assert_eq!(
            route(&Method::GET, "/api/WorkflowInstances/i-1/history", None),
            Err(RouteError::NotFound)
        );
    }

    #[tokio::test]
    async fn test_full_approval_flow() {
        let handler = handler();

        let (status, body) = call(&handler, Method::POST, "/api/WorkflowDefinitions", approval()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        let def_id = body["data"]["id"].as_str().unwrap().to_string();

        let (status, body) = call(
            &handler,
            Method::POST,
            "/api/WorkflowInstances",
            json!({"definitionId": def_id}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["currentState"], "draft");
        let inst_id = body["data"]["id"].as_str().unwrap().to_string();

        let actions_uri = format!("/api/WorkflowInstances/{}/actions", inst_id);
        let (status, body) = call(&handler, Method::POST, &actions_uri, json!({"actionId": "submit"})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["currentState"], "review");
        assert_eq!(body["data"]["history"][0]["fromState"], "draft");

        let (_, body) = call(&handler, Method::GET, &actions_uri, Value::Null).await;
        assert_eq!(body["data"][0]["id"], "approve");

        let (status, body) = call(&handler, Method::POST, &actions_uri, json!({"actionId": "approve"})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["currentState"], "approved");

        let state_uri = format!("/api/WorkflowInstances/{}/state", inst_id);
        let (_, body) = call(&handler, Method::GET, &state_uri, Value::Null).await;
        assert_eq!(body["data"]["history"].as_array().unwrap().len(), 2);

        let list_uri = format!("/api/WorkflowInstances?definitionId={}", def_id);
        let (_, body) = call(&handler, Method::GET, &list_uri, Value::Null).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_definition_reports_all_errors() {
        let handler = handler();
        let mut definition = approval();
        definition["states"][0]["isInitial"] = json!(false);
        definition["actions"][1]["toState"] = json!("ghost");

        let (status, body) = call(&handler, Method::POST, "/api/WorkflowDefinitions", definition).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(
            body["validationErrors"],
            json!([
                "Workflow must have exactly one initial state",
                "Action 'approve' references unknown toState: ghost"
            ])
        );

        let (_, body) = call(&handler, Method::GET, "/api/WorkflowDefinitions", Value::Null).await;
        assert_eq!(body["data"], json!([]));
    }

    #[tokio::test]
    async fn test_rejected_transition() {
        let handler = handler();
        let (_, body) = call(&handler, Method::POST, "/api/WorkflowDefinitions", approval()).await;
        let def_id = body["data"]["id"].clone();
        let (_, body) = call(
            &handler,
            Method::POST,
            "/api/WorkflowInstances",
            json!({"definitionId": def_id}),
        )
        .await;
        let inst_id = body["data"]["id"].as_str().unwrap().to_string();

        let uri = format!("/api/WorkflowInstances/{}/actions", inst_id);
        let (status, body) = call(&handler, Method::POST, &uri, json!({"actionId": "approve"})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body["validationErrors"][0],
            "Action 'approve' cannot be executed from current state 'draft'"
        );

        let (status, body) = call(&handler, Method::POST, &uri, json!({"actionId": "teleport"})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body["validationErrors"],
            json!(["Action 'teleport' not found in workflow definition"])
        );
    }

    #[tokio::test]
    async fn test_not_found_and_bad_requests() {
        let handler = handler();

        let (status, body) = call(&handler, Method::GET, "/api/WorkflowInstances/missing", Value::Null).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Workflow instance 'missing' not found");

        let (status, _) = call(
            &handler,
            Method::POST,
            "/api/WorkflowInstances",
            json!({"definitionId": "missing"}),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(&handler, Method::POST, "/api/WorkflowInstances", Value::Null).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid request: request body is required");

        let (status, _) = call(&handler, Method::POST, "/api/WorkflowDefinitions", json!({"name": 5})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&handler, Method::GET, "/nowhere", Value::Null).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&handler, Method::PATCH, "/api/WorkflowDefinitions", Value::Null).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = call(&handler(), Method::GET, "/health", Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "Healthy");
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_request_metrics() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let service = WorkflowService::new(Arc::new(InMemoryRepository::new()))
            .with_metrics(metrics.clone());
        let handler = ApiHandler::new(Arc::new(service));

        call(&handler, Method::GET, "/api/WorkflowDefinitions", Value::Null).await;
        call(&handler, Method::GET, "/api/WorkflowDefinitions/nope", Value::Null).await;

        let encoded = String::from_utf8(metrics.encode()).unwrap();
        assert!(encoded.contains(r#"flowstate_requests_total{operation="list_definitions"} 1"#));
        assert!(encoded.contains(r#"flowstate_errors_total{code="DEFINITION_NOT_FOUND"} 1"#));
    }
}
