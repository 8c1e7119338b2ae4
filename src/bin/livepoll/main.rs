use actix_web::middleware::{DefaultHeaders, Logger};
use actix_web::web::Data;
use actix_web::{App, HttpServer};
use env_logger::Env;
use livepoll::app_config;
use livepoll::auth::{IdentityProvider, JwtIdentityProvider};
use livepoll::db::{get_db_pool, init_db};
use livepoll::storage::create_repository;
use livepoll::LivePoll;
use std::io;
use std::sync::Arc;

#[actix_web::main]
async fn main() -> io::Result<()> {
    init_lib_mods();
    app_config::init();
    let config = app_config::get_config();

    let db = if config.storage.backend == "postgres" {
        init_db(config.database.url.clone(), config.database.max_connections)
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        Some(get_db_pool().to_owned())
    } else {
        None
    };

    let repo = create_repository(&config.storage.backend, db)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;

    if config.auth.jwt_secret.len() < 32 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "LIVEPOLL_AUTH__JWT_SECRET must be set to at least 32 bytes",
        ));
    }
    let identity: Arc<dyn IdentityProvider> = Arc::new(JwtIdentityProvider::new(
        config.auth.jwt_secret.as_bytes(),
        config.auth.token_ttl_minutes,
    ));

    // Starts the notifier actor on this arbiter; workers share its address.
    let service = LivePoll::start(repo, &config);
    let bind_address = config.server.bind_address.clone();
    log::info!("Live poll service listening on {}", bind_address);

    HttpServer::new(move || {
        // Order of middleware IS IMPORTANT and is in REVERSE EXECUTION ORDER.
        App::new()
            .app_data(Data::new(service.clone()))
            .app_data(Data::new(identity.clone()))
            .wrap(
                DefaultHeaders::new()
                    .add(("X-Content-Type-Options", "nosniff"))
                    .add(("Cache-Control", "no-store")),
            )
            .wrap(Logger::new("%a %r %s %Dms"))
            .configure(livepoll::web::configure)
    })
    .bind(bind_address)?
    .run()
    .await
}

/// Initialize third party crates we rely on but don't have control over.
pub fn init_lib_mods() {
    // A missing .env file is fine; the environment may already be set.
    if let Err(e) = dotenv::dotenv() {
        eprintln!("No .env file loaded: {}", e);
    }
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
}
