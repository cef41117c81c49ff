use crate::AppState;
use actix_web::http::header::LOCATION;
use actix_web::{delete, get, post, put, route, web, HttpResponse, Responder, Result as ActixResult};
use actix_ws::Message;
use bpmcore::{
    EngineError, InstanceRepository, ProcessConfig, ProcessConfigStore, ProcessError,
    StartRequest, SOURCE_API,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Error response
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_body(status: actix_web::http::StatusCode, message: impl Into<String>) -> HttpResponse {
    HttpResponse::build(status).json(ErrorResponse {
        error: message.into(),
    })
}

/// Map engine errors onto HTTP statuses
fn engine_error(e: EngineError) -> HttpResponse {
    use actix_web::http::StatusCode;
    match &e {
        EngineError::Process(ProcessError::NotFound(_)) => error_body(StatusCode::NOT_FOUND, e.to_string()),
        EngineError::Process(ProcessError::AlreadyExists(_)) => error_body(StatusCode::CONFLICT, e.to_string()),
        EngineError::Process(_) => error_body(StatusCode::BAD_REQUEST, e.to_string()),
        _ => {
            error!("Request failed: {}", e);
            error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartProcessResponse {
    correlation_id: String,
    process_public_id: String,
    status: &'static str,
    message: String,
    queued_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProcessSummary {
    id: Uuid,
    public_id: String,
    name: String,
    description: Option<String>,
    version: u32,
    is_active: bool,
    steps_count: usize,
    created_at: DateTime<Utc>,
}

impl From<&ProcessConfig> for ProcessSummary {
    fn from(config: &ProcessConfig) -> Self {
        Self {
            id: config.id,
            public_id: config.public_id.clone(),
            name: config.name.clone(),
            description: config.description.clone(),
            version: config.version,
            is_active: config.is_active,
            steps_count: config.steps.len(),
            created_at: config.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RecentQuery {
    count: Option<usize>,
}

/// Health check endpoint
#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "bpm-engine"
    }))
}

/// Queue a process run; the outcome is available later via the status routes
#[post("/api/process/start")]
async fn start_process(
    data: web::Data<AppState>,
    request: web::Json<StartRequest>,
) -> ActixResult<impl Responder> {
    let mut request = request.into_inner();
    if request.process_public_id.trim().is_empty() {
        return Ok(error_body(
            actix_web::http::StatusCode::BAD_REQUEST,
            "processPublicId is required",
        ));
    }

    let correlation_id = request.ensure_correlation_id().to_string();
    request.source = Some(SOURCE_API.to_string());
    request.created_at = Utc::now();

    info!(
        process_id = %request.process_public_id,
        correlation_id = %correlation_id,
        "Start request received"
    );

    let response = StartProcessResponse {
        correlation_id,
        process_public_id: request.process_public_id.clone(),
        status: "Accepted",
        message: "Process start request accepted".to_string(),
        queued_at: request.created_at,
    };
    data.runtime.submit(request);

    Ok(HttpResponse::Accepted().json(response))
}

/// Run a stored process inline and return its full report
#[post("/api/process/run/{public_id}")]
async fn run_process(
    data: web::Data<AppState>,
    path: web::Path<String>,
    input: Option<web::Json<Value>>,
) -> ActixResult<impl Responder> {
    let public_id = path.into_inner();
    let input = input.map(web::Json::into_inner).unwrap_or_else(|| json!({}));

    match data.runtime.execute_process(&public_id, input).await {
        Ok(report) => {
            let error = report.result.as_ref().err().map(|e| e.to_string());
            Ok(HttpResponse::Ok().json(json!({
                "instanceId": report.state.instance_id,
                "success": report.is_success(),
                "output": report.output(),
                "error": error,
                "state": report.state,
            })))
        }
        Err(e) => Ok(engine_error(e)),
    }
}

#[get("/api/process/queue/count")]
async fn queue_count(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(json!({
        "pendingCount": data.runtime.queue().len(),
        "timestamp": Utc::now(),
    }))
}

#[get("/api/process/ping")]
async fn ping() -> impl Responder {
    HttpResponse::Ok().json(json!({
        "status": "OK",
        "service": "BPM Engine",
        "timestamp": Utc::now(),
    }))
}

#[get("/api/process/status/{correlation_id}")]
async fn status_by_correlation(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ActixResult<impl Responder> {
    let correlation_id = path.into_inner();
    match data.runtime.history().get_by_correlation_id(&correlation_id).await {
        Ok(Some(instance)) => Ok(HttpResponse::Ok().json(instance)),
        Ok(None) => Ok(error_body(
            actix_web::http::StatusCode::NOT_FOUND,
            format!("No run with correlationId '{}'", correlation_id),
        )),
        Err(e) => Ok(engine_error(e)),
    }
}

#[get("/api/process/instance/{instance_id}")]
async fn status_by_instance(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ActixResult<impl Responder> {
    let raw = path.into_inner();
    let not_found = || {
        error_body(
            actix_web::http::StatusCode::NOT_FOUND,
            format!("Instance '{}' not found", raw),
        )
    };

    let Ok(instance_id) = Uuid::parse_str(&raw) else {
        return Ok(not_found());
    };
    match data.runtime.history().get_by_instance_id(instance_id).await {
        Ok(Some(instance)) => Ok(HttpResponse::Ok().json(instance)),
        Ok(None) => Ok(not_found()),
        Err(e) => Ok(engine_error(e)),
    }
}

#[get("/api/process/recent")]
async fn recent_runs(
    data: web::Data<AppState>,
    query: web::Query<RecentQuery>,
) -> ActixResult<impl Responder> {
    let count = query.count.unwrap_or(10);
    match data.runtime.history().recent(count).await {
        Ok(instances) => Ok(HttpResponse::Ok().json(instances)),
        Err(e) => Ok(engine_error(e)),
    }
}

#[get("/api/process/history/{process_public_id}")]
async fn process_history(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ActixResult<impl Responder> {
    match data.runtime.history().list_by_process(&path.into_inner()).await {
        Ok(instances) => Ok(HttpResponse::Ok().json(instances)),
        Err(e) => Ok(engine_error(e)),
    }
}

#[post("/api/configure/process")]
async fn create_process(
    data: web::Data<AppState>,
    config: web::Json<ProcessConfig>,
) -> ActixResult<impl Responder> {
    match data.runtime.configs().create(config.into_inner()).await {
        Ok(created) => Ok(HttpResponse::Created()
            .insert_header((LOCATION, format!("/api/configure/process/{}", created.public_id)))
            .json(created)),
        Err(e) => {
            warn!("Rejected process definition: {}", e);
            Ok(engine_error(e))
        }
    }
}

#[get("/api/configure/process/{public_id}")]
async fn get_process(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ActixResult<impl Responder> {
    let public_id = path.into_inner();
    match data.runtime.configs().get_by_public_id(&public_id).await {
        Ok(Some(config)) => Ok(HttpResponse::Ok().json(config)),
        Ok(None) => Ok(engine_error(ProcessError::NotFound(public_id).into())),
        Err(e) => Ok(engine_error(e)),
    }
}

#[route("/api/configure/process/{public_id}", method = "HEAD")]
async fn process_exists(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ActixResult<impl Responder> {
    match data.runtime.configs().exists(&path.into_inner()).await {
        Ok(true) => Ok(HttpResponse::Ok().finish()),
        Ok(false) => Ok(HttpResponse::NotFound().finish()),
        Err(e) => Ok(engine_error(e)),
    }
}

/// Summaries of active definitions, without their steps
#[get("/api/configure/processes")]
async fn list_processes(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    match data.runtime.configs().list_active().await {
        Ok(configs) => {
            let summaries: Vec<ProcessSummary> = configs.iter().map(ProcessSummary::from).collect();
            Ok(HttpResponse::Ok().json(summaries))
        }
        Err(e) => Ok(engine_error(e)),
    }
}

#[put("/api/configure/process/{public_id}")]
async fn update_process(
    data: web::Data<AppState>,
    path: web::Path<String>,
    config: web::Json<ProcessConfig>,
) -> ActixResult<impl Responder> {
    let mut config = config.into_inner();
    config.public_id = path.into_inner();

    match data.runtime.configs().update(config).await {
        Ok(updated) => Ok(HttpResponse::Ok().json(updated)),
        Err(e) => Ok(engine_error(e)),
    }
}

#[delete("/api/configure/process/{public_id}")]
async fn delete_process(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ActixResult<impl Responder> {
    let public_id = path.into_inner();
    match data.runtime.configs().delete(&public_id).await {
        Ok(true) => {
            info!(process_id = %public_id, "Deleted process definition");
            Ok(HttpResponse::NoContent().finish())
        }
        Ok(false) => Ok(engine_error(ProcessError::NotFound(public_id).into())),
        Err(e) => Ok(engine_error(e)),
    }
}

/// List available step types
#[get("/api/steps")]
async fn list_step_types(data: web::Data<AppState>) -> impl Responder {
    let registry = data.runtime.registry();
    let steps: Vec<_> = registry
        .list_step_types()
        .iter()
        .map(|step_type| {
            let metadata = registry.get_metadata(step_type);
            json!({
                "type": step_type,
                "description": metadata.as_ref().map(|m| m.description.clone()).unwrap_or_default(),
                "category": metadata.as_ref().map(|m| m.category.clone()).unwrap_or_default(),
            })
        })
        .collect();

    HttpResponse::Ok().json(steps)
}

/// WebSocket endpoint for real-time execution events
#[get("/api/events")]
async fn websocket_events(
    req: actix_web::HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let (res, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;

    info!("WebSocket client connected");
    let mut events = data.runtime.subscribe_events();

    actix_web::rt::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Ok(event) => {
                            if let Ok(json) = serde_json::to_string(&event) {
                                if session.text(json).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "WebSocket client lagging, events dropped");
                        }
                        Err(_) => break,
                    }
                }

                Some(Ok(msg)) = msg_stream.recv() => {
                    match msg {
                        Message::Ping(bytes) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }

                else => break,
            }
        }

        info!("WebSocket client disconnected");
        let _ = session.close(None).await;
    });

    Ok(res)
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health_check)
        .service(start_process)
        .service(run_process)
        .service(queue_count)
        .service(ping)
        .service(status_by_correlation)
        .service(status_by_instance)
        .service(recent_runs)
        .service(process_history)
        .service(create_process)
        .service(process_exists)
        .service(get_process)
        .service(list_processes)
        .service(update_process)
        .service(delete_process)
        .service(list_step_types)
        .service(websocket_events);
}
