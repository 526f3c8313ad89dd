//! HTTP request handlers
//!
//! Thin handlers over the [`crate::ceremony::CeremonyCoordinator`]: they
//! derive the relying-party context from the request, delegate, and map
//! errors onto HTTP responses. Response bodies only ever carry
//! [`crate::errors::CeremonyError::user_message`]; the distinct error
//! kind stays in the server log.

use actix_web::{web, HttpRequest, HttpResponse};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;

use crate::ceremony::CeremonyCoordinator;
use crate::context::RequestContext;
use crate::errors::CeremonyError;
use crate::webauthn::{AuthenticationResponse, RegistrationResponse};

/// Body of `POST /attend/register/start`
#[derive(Deserialize)]
pub struct RegisterStartRequest {
    pub username: String,
}

/// Body of `POST /attend/auth/start`
#[derive(Deserialize)]
pub struct AuthStartRequest {
    /// Absent for the discoverable-credential flow
    pub username: Option<String>,
}

/// Body of `POST /attend/auth/complete`
#[derive(Deserialize)]
pub struct AuthCompleteRequest {
    /// Session the attendance record is filed under
    pub session_id: String,
    pub credential: AuthenticationResponse,
}

/// Convert a `CeremonyError` to an HTTP response.
///
/// Verification failures of every kind map to 401 with one generic
/// body; which check rejected the ceremony is never disclosed.
fn error_to_response(error: &CeremonyError) -> HttpResponse {
    log::debug!("Ceremony rejected: {error}");
    let body = json!({ "error": error.user_message() });
    match error {
        CeremonyError::MalformedResponse(_) => HttpResponse::BadRequest().json(body),
        CeremonyError::UsernameTaken | CeremonyError::CredentialAlreadyRegistered => {
            HttpResponse::Conflict().json(body)
        }
        CeremonyError::EntropySourceUnavailable => {
            log::error!("Entropy source unavailable; refusing to issue challenges");
            HttpResponse::ServiceUnavailable().json(body)
        }
        _ => HttpResponse::Unauthorized().json(body),
    }
}

fn request_context(req: &HttpRequest) -> RequestContext {
    RequestContext::from_host(req.connection_info().host())
}

/// Start a registration ceremony
pub async fn start_registration(
    req: HttpRequest,
    body: web::Json<RegisterStartRequest>,
    coordinator: web::Data<CeremonyCoordinator>,
) -> HttpResponse {
    let context = request_context(&req);
    match coordinator.begin_registration(&body.username, &context).await {
        Ok(options) => HttpResponse::Ok().json(options),
        Err(error) => error_to_response(&error),
    }
}

/// Complete a registration ceremony
pub async fn complete_registration(
    req: HttpRequest,
    body: web::Json<RegistrationResponse>,
    coordinator: web::Data<CeremonyCoordinator>,
) -> HttpResponse {
    let context = request_context(&req);
    match coordinator.finish_registration(&body, &context).await {
        Ok(outcome) => HttpResponse::Ok().json(json!({
            "user_id": outcome.user_id,
            "username": outcome.username,
            "credential_id": URL_SAFE_NO_PAD.encode(&outcome.credential_id),
        })),
        Err(error) => error_to_response(&error),
    }
}

/// Start an authentication ceremony
pub async fn start_authentication(
    req: HttpRequest,
    body: web::Json<AuthStartRequest>,
    coordinator: web::Data<CeremonyCoordinator>,
) -> HttpResponse {
    let context = request_context(&req);
    match coordinator
        .begin_authentication(body.username.as_deref(), &context)
        .await
    {
        Ok(options) => HttpResponse::Ok().json(options),
        Err(error) => error_to_response(&error),
    }
}

/// Complete an authentication ceremony and record attendance
pub async fn complete_authentication(
    req: HttpRequest,
    body: web::Json<AuthCompleteRequest>,
    coordinator: web::Data<CeremonyCoordinator>,
) -> HttpResponse {
    let context = request_context(&req);
    match coordinator
        .finish_authentication(&body.credential, &context, &body.session_id)
        .await
    {
        Ok(outcome) => HttpResponse::Ok().json(json!({
            "user_id": outcome.user_id,
            "session_id": outcome.attendance.session_id,
            "timestamp": outcome.attendance.timestamp,
        })),
        Err(error) => error_to_response(&error),
    }
}

/// Liveness probe
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "version": crate::VERSION,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attendance::InMemoryAttendanceLog;
    use crate::challenge::InMemoryChallengeStore;
    use crate::credentials::{CredentialRepository, InMemoryCredentialRepository};
    use crate::settings::RollcallSettings;
    use actix_web::{test, App};
    use std::sync::Arc;

    fn coordinator_with_repo() -> (
        web::Data<CeremonyCoordinator>,
        Arc<InMemoryCredentialRepository>,
    ) {
        let credentials = Arc::new(InMemoryCredentialRepository::new());
        let coordinator = CeremonyCoordinator::new(
            Arc::new(InMemoryChallengeStore::new()),
            Arc::clone(&credentials) as Arc<dyn CredentialRepository>,
            Arc::new(InMemoryAttendanceLog::new()),
            RollcallSettings::default(),
        );
        (web::Data::new(coordinator), credentials)
    }

    macro_rules! init_app {
        ($coordinator:expr) => {
            test::init_service(
                App::new()
                    .app_data($coordinator)
                    .route("/ping", web::get().to(health))
                    .route(
                        "/attend/register/start",
                        web::post().to(start_registration),
                    )
                    .route("/attend/auth/start", web::post().to(start_authentication))
                    .route(
                        "/attend/auth/complete",
                        web::post().to(complete_authentication),
                    ),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn health_endpoint_reports_version() {
        let (coordinator, _) = coordinator_with_repo();
        let app = init_app!(coordinator);
        let req = test::TestRequest::get().uri("/ping").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], crate::VERSION);
    }

    #[actix_web::test]
    async fn registration_start_returns_creation_options() {
        let (coordinator, _) = coordinator_with_repo();
        let app = init_app!(coordinator);
        let req = test::TestRequest::post()
            .uri("/attend/register/start")
            .set_json(json!({ "username": "alice" }))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["user"]["name"], "alice");
        assert_eq!(body["attestation"], "none");
        assert!(body["challenge"].as_str().is_some());
    }

    #[actix_web::test]
    async fn taken_username_maps_to_conflict() {
        let (coordinator, credentials) = coordinator_with_repo();
        let app = init_app!(coordinator);
        let alice = credentials.find_or_create_user("alice").await;
        credentials
            .insert(alice.id, b"cid1", b"pk", 0)
            .await
            .unwrap();

        let req = test::TestRequest::post()
            .uri("/attend/register/start")
            .set_json(json!({ "username": "alice" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::CONFLICT);
    }

    #[actix_web::test]
    async fn unknown_username_maps_to_unauthorized_with_generic_body() {
        let (coordinator, _) = coordinator_with_repo();
        let app = init_app!(coordinator);
        let req = test::TestRequest::post()
            .uri("/attend/auth/start")
            .set_json(json!({ "username": "nobody" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::UNAUTHORIZED);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "verification failed");
    }

    #[actix_web::test]
    async fn garbage_completion_does_not_leak_the_failed_check() {
        let (coordinator, _) = coordinator_with_repo();
        let app = init_app!(coordinator);
        let req = test::TestRequest::post()
            .uri("/attend/auth/complete")
            .set_json(json!({
                "session_id": "session-1",
                "credential": {
                    "id": "AAAA",
                    "rawId": "AAAA",
                    "type": "public-key",
                    "response": {
                        "clientDataJSON": "!!!",
                        "authenticatorData": "",
                        "signature": "",
                        "userHandle": null,
                    },
                },
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "verification failed");
    }
}
