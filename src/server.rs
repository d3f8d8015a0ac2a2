use actix_web::{middleware, web, App, HttpServer};
use imci_api::{configure, AdminConfig, AppState};
use imci_persistence::Database;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Servidor HTTP de exportación: `GET /api/flows` y `GET /health`.
#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Los registros del facade `log` de las librerías llegan al mismo subscriber
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = AdminConfig::from_env();
    let db = Database::from_env()?;
    let state = web::Data::new(AppState::from_database(&db, &config)?);
    info!("database ready, migrations applied");

    let bind_address = config.bind_address.clone();
    info!("IMCI export server starting on http://{}", bind_address);

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(middleware::Logger::default())
            .configure(configure)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    Ok(())
}
