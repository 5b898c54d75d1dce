use std::sync::atomic::Ordering;
use std::sync::Arc;

use admissions::admissions::{
    validate_format, ActorId, AdmissionId, AdmissionRecord, AdmissionStatus,
    AdmissionStatusView, AdmissionWorkflowEngine, EnrollmentOutcome, InterviewFeedback, InterviewSchedule, NewInquiry,
    PreviousSchooling, RequestContext, SequentialCode, TestResult, TestSchedule,
};
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::AppError;
use crate::infra::AppState;

pub(crate) const ACTOR_HEADER: &str = "x-actor-id";

type Engine = State<Arc<AdmissionWorkflowEngine>>;

/// Admission workflow endpoints. Every write is attributed to the `x-actor-id` header.
pub(crate) fn admission_router(engine: Arc<AdmissionWorkflowEngine>) -> Router {
    Router::new()
        .route(
            "/api/v1/admissions",
            post(create_inquiry).get(list_admissions),
        )
        .route("/api/v1/admissions/:admission_id", get(get_admission))
        .route(
            "/api/v1/admissions/:admission_id/transitions",
            get(allowed_transitions),
        )
        .route(
            "/api/v1/admissions/:admission_id/application",
            post(convert_to_application),
        )
        .route(
            "/api/v1/admissions/:admission_id/test-schedule",
            post(schedule_test),
        )
        .route(
            "/api/v1/admissions/:admission_id/test-result",
            post(record_test_score),
        )
        .route(
            "/api/v1/admissions/:admission_id/interview-schedule",
            post(schedule_interview),
        )
        .route(
            "/api/v1/admissions/:admission_id/interview-result",
            post(record_interview),
        )
        .route("/api/v1/admissions/:admission_id/admit", post(admit))
        .route("/api/v1/admissions/:admission_id/enroll", post(enroll))
        .route("/api/v1/admissions/:admission_id/reject", post(reject))
        .route("/api/v1/admissions/:admission_id/withdraw", post(withdraw))
        .route("/api/v1/student-codes/:year", get(student_code_summary))
        .route(
            "/api/v1/student-codes/validate/:code",
            get(validate_student_code),
        )
        .with_state(engine)
}

pub(crate) fn with_admission_routes(engine: Arc<AdmissionWorkflowEngine>) -> Router {
    admission_router(engine)
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReasonRequest {
    pub(crate) reason: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ListQuery {
    #[serde(default)]
    pub(crate) status: Option<AdmissionStatus>,
    #[serde(default)]
    pub(crate) temporary_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct StudentCodeSummary {
    pub(crate) year: i32,
    pub(crate) issued: u32,
    /// Preview only; the code is assigned at enrollment.
    pub(crate) next_sequence: u32,
}

#[derive(Debug, Serialize)]
pub(crate) struct CodeValidation {
    pub(crate) code: String,
    pub(crate) valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) sequence: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) error: Option<String>,
}

fn request_context(headers: &HeaderMap) -> RequestContext {
    let actor = headers
        .get(ACTOR_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| ActorId(value.to_string()))
        .unwrap_or_else(ActorId::system);
    RequestContext::new(actor)
}

fn admission_id(raw: &str) -> Result<AdmissionId, AppError> {
    AdmissionId::parse(raw)
        .ok_or_else(|| AppError::BadRequest(format!("'{raw}' is not a valid admission id")))
}

async fn create_inquiry(
    State(engine): Engine,
    headers: HeaderMap,
    Json(inquiry): Json<NewInquiry>,
) -> Result<(StatusCode, Json<AdmissionRecord>), AppError> {
    let record = engine
        .create_inquiry(&request_context(&headers), inquiry)
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// Summaries only; the full record with its history is served per admission.
async fn list_admissions(
    State(engine): Engine,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<AdmissionStatusView>>, AppError> {
    let records = if let Some(temporary_id) = query.temporary_id {
        engine
            .find_by_temporary_id(&temporary_id)
            .await?
            .into_iter()
            .collect()
    } else {
        let status = query.status.ok_or_else(|| {
            AppError::BadRequest("either 'status' or 'temporary_id' is required".to_string())
        })?;
        engine.list_by_status(status).await?
    };
    Ok(Json(records.iter().map(AdmissionRecord::status_view).collect()))
}

async fn get_admission(
    State(engine): Engine,
    Path(raw): Path<String>,
) -> Result<Json<AdmissionRecord>, AppError> {
    Ok(Json(engine.get(admission_id(&raw)?).await?))
}

async fn allowed_transitions(
    State(engine): Engine,
    Path(raw): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = admission_id(&raw)?;
    let next = engine.allowed_transitions(id).await?;
    Ok(Json(json!({
        "admission_id": id,
        "allowed": next.iter().map(|status| status.label()).collect::<Vec<_>>(),
    })))
}

async fn convert_to_application(
    State(engine): Engine,
    headers: HeaderMap,
    Path(raw): Path<String>,
    Json(schooling): Json<PreviousSchooling>,
) -> Result<Json<AdmissionRecord>, AppError> {
    let record = engine
        .convert_to_application(&request_context(&headers), admission_id(&raw)?, schooling)
        .await?;
    Ok(Json(record))
}

async fn schedule_test(
    State(engine): Engine,
    headers: HeaderMap,
    Path(raw): Path<String>,
    Json(schedule): Json<TestSchedule>,
) -> Result<Json<AdmissionRecord>, AppError> {
    let record = engine
        .schedule_test(&request_context(&headers), admission_id(&raw)?, schedule)
        .await?;
    Ok(Json(record))
}

async fn record_test_score(
    State(engine): Engine,
    headers: HeaderMap,
    Path(raw): Path<String>,
    Json(result): Json<TestResult>,
) -> Result<Json<AdmissionRecord>, AppError> {
    let record = engine
        .record_test_score(&request_context(&headers), admission_id(&raw)?, result)
        .await?;
    Ok(Json(record))
}

async fn schedule_interview(
    State(engine): Engine,
    headers: HeaderMap,
    Path(raw): Path<String>,
    Json(schedule): Json<InterviewSchedule>,
) -> Result<Json<AdmissionRecord>, AppError> {
    let record = engine
        .schedule_interview(&request_context(&headers), admission_id(&raw)?, schedule)
        .await?;
    Ok(Json(record))
}

async fn record_interview(
    State(engine): Engine,
    headers: HeaderMap,
    Path(raw): Path<String>,
    Json(feedback): Json<InterviewFeedback>,
) -> Result<Json<AdmissionRecord>, AppError> {
    let record = engine
        .record_interview(&request_context(&headers), admission_id(&raw)?, feedback)
        .await?;
    Ok(Json(record))
}

async fn admit(
    State(engine): Engine,
    headers: HeaderMap,
    Path(raw): Path<String>,
) -> Result<Json<AdmissionRecord>, AppError> {
    let record = engine
        .admit(&request_context(&headers), admission_id(&raw)?)
        .await?;
    Ok(Json(record))
}

/// The only response that ever carries plaintext temporary passwords.
async fn enroll(
    State(engine): Engine,
    headers: HeaderMap,
    Path(raw): Path<String>,
) -> Result<(StatusCode, Json<EnrollmentOutcome>), AppError> {
    let outcome = engine
        .enroll(&request_context(&headers), admission_id(&raw)?)
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

async fn reject(
    State(engine): Engine,
    headers: HeaderMap,
    Path(raw): Path<String>,
    Json(request): Json<ReasonRequest>,
) -> Result<Json<AdmissionRecord>, AppError> {
    let record = engine
        .reject(&request_context(&headers), admission_id(&raw)?, &request.reason)
        .await?;
    Ok(Json(record))
}

async fn withdraw(
    State(engine): Engine,
    headers: HeaderMap,
    Path(raw): Path<String>,
    Json(request): Json<ReasonRequest>,
) -> Result<Json<AdmissionRecord>, AppError> {
    let record = engine
        .withdraw(&request_context(&headers), admission_id(&raw)?, &request.reason)
        .await?;
    Ok(Json(record))
}

async fn student_code_summary(
    State(engine): Engine,
    Path(year): Path<i32>,
) -> Result<Json<StudentCodeSummary>, AppError> {
    Ok(Json(StudentCodeSummary {
        year,
        issued: engine.count_issued(year).await?,
        next_sequence: engine.peek_next(year).await?,
    }))
}

async fn validate_student_code(Path(code): Path<String>) -> Json<CodeValidation> {
    let validation = match SequentialCode::parse(&code) {
        Ok(parsed) => CodeValidation {
            valid: validate_format(&code),
            prefix: Some(parsed.prefix().to_string()),
            year: Some(parsed.year()),
            sequence: Some(parsed.sequence()),
            error: None,
            code,
        },
        Err(err) => CodeValidation {
            valid: false,
            prefix: None,
            year: None,
            sequence: None,
            error: Some(err.to_string()),
            code,
        },
    };
    Json(validation)
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::in_memory_engine;
    use admissions::admissions::FixedClock;
    use admissions::config::AdmissionsConfig;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use axum::response::Response;
    use chrono::NaiveDate;
    use serde_json::Value;
    use tower::ServiceExt;

    fn router() -> Router {
        let clock = FixedClock::on(NaiveDate::from_ymd_opt(2024, 5, 6).expect("valid date"));
        let (engine, _) = in_memory_engine(&AdmissionsConfig::default(), Arc::new(clock));
        admission_router(engine).route("/health", get(healthcheck))
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .header(ACTOR_HEADER, "registrar-1")
            .body(Body::from(body.to_string()))
            .expect("request builds")
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).expect("request builds")
    }

    async fn read_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body readable");
        serde_json::from_slice(&bytes).expect("json body")
    }

    fn inquiry_body() -> Value {
        json!({
            "applicant": {
                "first_name": "Aarav",
                "last_name": "Shah",
                "applying_for_class": "5"
            },
            "guardian": {
                "name": "Nisha Shah",
                "contact": { "phone": "+91 98111 22233" }
            }
        })
    }

    async fn create(router: &Router) -> String {
        let response = router
            .clone()
            .oneshot(post_json("/api/v1/admissions", inquiry_body()))
            .await
            .expect("route executes");
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = read_json(response).await;
        assert_eq!(body["temporary_id"], "SCH-INQ-2024-0001");
        assert_eq!(body["history"][0]["actor"], "registrar-1");
        body["admission_id"].as_str().expect("id").to_string()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let response = router()
            .oneshot(get_request("/health"))
            .await
            .expect("route executes");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn illegal_transition_maps_to_conflict() {
        let router = router();
        let id = create(&router).await;
        let uri = format!("/api/v1/admissions/{id}/application");

        let first = router
            .clone()
            .oneshot(post_json(&uri, json!({})))
            .await
            .expect("route executes");
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(read_json(first).await["status"], "applied");

        let second = router
            .clone()
            .oneshot(post_json(&uri, json!({})))
            .await
            .expect("route executes");
        assert_eq!(second.status(), StatusCode::CONFLICT);
        assert_eq!(
            read_json(second).await["error"],
            "Cannot convert to application from status: applied"
        );
    }

    #[tokio::test]
    async fn unknown_and_malformed_ids_are_distinguished() {
        let router = router();

        let missing = router
            .clone()
            .oneshot(get_request(&format!(
                "/api/v1/admissions/{}",
                AdmissionId::new()
            )))
            .await
            .expect("route executes");
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let malformed = router
            .oneshot(get_request("/api/v1/admissions/not-a-uuid"))
            .await
            .expect("route executes");
        assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn blank_rejection_reason_is_bad_input() {
        let router = router();
        let id = create(&router).await;

        let response = router
            .oneshot(post_json(
                &format!("/api/v1/admissions/{id}/reject"),
                json!({ "reason": " " }),
            ))
            .await
            .expect("route executes");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn enrollment_returns_credentials_once() {
        let router = router();
        let id = create(&router).await;
        for step in ["application", "admit"] {
            let response = router
                .clone()
                .oneshot(post_json(&format!("/api/v1/admissions/{id}/{step}"), json!({})))
                .await
                .expect("route executes");
            assert_eq!(response.status(), StatusCode::OK, "{step}");
        }

        let enrolled = router
            .clone()
            .oneshot(post_json(&format!("/api/v1/admissions/{id}/enroll"), json!({})))
            .await
            .expect("route executes");
        assert_eq!(enrolled.status(), StatusCode::CREATED);
        let body = read_json(enrolled).await;
        assert_eq!(body["student"]["student_code"], "SCH-2024-0001");
        assert_eq!(body["credentials"]["student"]["username"], "sch.2024.0001");
        assert!(body["credentials"]["parent"]["temporary_password"].is_string());

        let summary = router
            .oneshot(get_request("/api/v1/student-codes/2024"))
            .await
            .expect("route executes");
        let summary = read_json(summary).await;
        assert_eq!(summary["issued"], 1);
        assert_eq!(summary["next_sequence"], 2);
    }

    #[tokio::test]
    async fn code_validation_reports_parts() {
        let response = router()
            .oneshot(get_request("/api/v1/student-codes/validate/SCH-2024-0042"))
            .await
            .expect("route executes");
        let body = read_json(response).await;
        assert_eq!(body["valid"], true);
        assert_eq!(body["year"], 2024);
        assert_eq!(body["sequence"], 42);

        let response = router()
            .oneshot(get_request("/api/v1/student-codes/validate/sch-2024-42"))
            .await
            .expect("route executes");
        assert_eq!(read_json(response).await["valid"], false);
    }

    #[tokio::test]
    async fn admissions_can_be_listed_by_status() {
        let router = router();
        create(&router).await;

        let response = router
            .oneshot(get_request("/api/v1/admissions?status=inquiry"))
            .await
            .expect("route executes");
        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        assert_eq!(body.as_array().map(Vec::len), Some(1));
        assert_eq!(body[0]["status"], "inquiry");
        assert_eq!(body[0]["applicant_name"], "Aarav Shah");
        assert!(body[0].get("history").is_none());
    }
}
