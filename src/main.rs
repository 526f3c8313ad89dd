#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![deny(warnings)]
#![allow(clippy::multiple_crate_versions)]

use std::sync::Arc;

use actix_web::{middleware::Logger, web, App, HttpServer};
use rollcall::{
    attendance::InMemoryAttendanceLog,
    challenge::InMemoryChallengeStore,
    credentials::InMemoryCredentialRepository,
    handlers::{
        complete_authentication, complete_registration, health, start_authentication,
        start_registration,
    },
    CeremonyCoordinator, RollcallSettings,
};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load configuration from Settings.toml and environment variables
    let settings = RollcallSettings::load()
        .map_err(|e| std::io::Error::other(format!("Failed to load settings: {e}")))?;

    env_logger::Builder::new()
        .parse_filters(&settings.logging.level)
        .init();

    let coordinator = web::Data::new(CeremonyCoordinator::new(
        Arc::new(InMemoryChallengeStore::new()),
        Arc::new(InMemoryCredentialRepository::new()),
        Arc::new(InMemoryAttendanceLog::new()),
        settings.clone(),
    ));

    let bind_address = settings.get_bind_address();
    print_startup_info(&bind_address, &settings);

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(coordinator.clone())
            .route("/ping", web::get().to(health))
            .route(
                "/attend/register/start",
                web::post().to(start_registration),
            )
            .route(
                "/attend/register/complete",
                web::post().to(complete_registration),
            )
            .route("/attend/auth/start", web::post().to(start_authentication))
            .route(
                "/attend/auth/complete",
                web::post().to(complete_authentication),
            )
    })
    .bind(bind_address)?
    .run()
    .await
}

fn print_startup_info(bind_address: &str, settings: &RollcallSettings) {
    println!("rollcall {} listening on {bind_address}", rollcall::VERSION);
    println!(
        "  relying party: {} (user verification: {})",
        settings.relying_party.name, settings.relying_party.user_verification
    );
    println!(
        "  ceremony timeout: {}s",
        settings.relying_party.timeout_seconds
    );
}
