#![allow(clippy::too_many_arguments, clippy::manual_div_ceil)]

pub mod api;
pub mod domain;
pub mod shared;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use axum::body::Body;
    use axum::http::{header, Method, Request};
    use axum::middleware::{self, Next};
    use axum::response::Response;
    use axum::{
        routing::{get, post, put},
        Router,
    };
    use std::net::SocketAddr;
    use tokio::net::TcpListener;
    use tower_http::cors::{Any, CorsLayer};
    use tower_http::services::ServeDir;
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    use crate::api::handlers;

    // Создаем директорию для логов
    let log_dir = std::path::Path::new("target").join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file_path = log_dir.join("backend.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file_path)?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| {
                // Отключаем логи SQL запросов, но оставляем логи приложения
                "info,sqlx=warn,sea_orm=warn".into()
            }),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::sync::Arc::new(log_file))
                .with_ansi(false),
        )
        .init();

    // Простой middleware для логирования запросов
    async fn request_logger(req: Request<Body>, next: Next) -> Response {
        use chrono::Utc;

        let start = std::time::Instant::now();
        let method = req.method().clone();
        let uri = req.uri().clone();

        let response = next.run(req).await;

        let duration = start.elapsed();
        let status = response.status().as_u16();
        let timestamp = Utc::now() + chrono::Duration::hours(3);

        // Голубой для 2xx, коричневый для остальных
        let color_code = if (200..300).contains(&status) {
            "36"
        } else {
            "33"
        };

        println!(
            "\x1b[{}m{}\x1b[0m | {:>5}ms | {} {:>6} {}",
            color_code,
            timestamp.format("%H:%M:%S"),
            duration.as_millis(),
            status,
            method,
            uri.path()
        );

        response
    }

    // Load config and initialize database
    let config = shared::config::load_config()?;
    let db_path = shared::config::get_database_path(&config)?;
    shared::data::db::initialize_database(db_path.to_str())
        .await
        .map_err(|e| anyhow::anyhow!("db init failed: {e}"))?;

    // Чистим устаревшие записи леджера идемпотентности
    match domain::a002_return_case::idempotency::purge_stale(shared::data::db::get_connection())
        .await
    {
        Ok(purged) if purged > 0 => {
            tracing::info!("Purged {} stale idempotency records", purged);
        }
        Ok(_) => {}
        Err(e) => tracing::warn!("Failed to purge idempotency ledger: {}", e),
    }

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::AUTHORIZATION]);

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        // ========================================
        // A001 PARCEL ROUTES
        // ========================================
        .route(
            "/api/a001/parcels",
            get(handlers::a001_parcel::list_all).post(handlers::a001_parcel::upsert),
        )
        .route(
            "/api/a001/parcels/testdata",
            post(handlers::a001_parcel::insert_test_data),
        )
        .route(
            "/api/a001/parcels/:id",
            get(handlers::a001_parcel::get_by_id).delete(handlers::a001_parcel::delete),
        )
        .route(
            "/api/a001/parcels/:id/status",
            post(handlers::a001_parcel::set_status),
        )
        .route(
            "/api/a001/parcels/:id/can-register-return",
            get(handlers::a001_parcel::can_register_return),
        )
        // ========================================
        // A002 RETURN CASE ROUTES
        // Обе поверхности UI (модальное окно и строка списка) ходят
        // через одни и те же команды
        // ========================================
        .route(
            "/api/a002/return-cases",
            get(handlers::a002_return_case::list_cases),
        )
        .route(
            "/api/a002/return-cases/events",
            get(handlers::a002_return_case::list_events),
        )
        .route(
            "/api/a002/return-cases/:parcel_id",
            post(handlers::a002_return_case::create_case),
        )
        .route(
            "/api/a002/return-cases/:parcel_id/history",
            get(handlers::a002_return_case::history),
        )
        .route(
            "/api/a002/return-cases/:parcel_id/:case_id",
            get(handlers::a002_return_case::get_case),
        )
        .route(
            "/api/a002/return-cases/:parcel_id/:case_id/launch-exchange",
            post(handlers::a002_return_case::launch_exchange),
        )
        .route(
            "/api/a002/return-cases/:parcel_id/:case_id/exchange-parcel",
            post(handlers::a002_return_case::create_exchange_parcel),
        )
        .route(
            "/api/a002/return-cases/:parcel_id/:case_id/convert-to-return",
            post(handlers::a002_return_case::convert_to_return),
        )
        .route(
            "/api/a002/return-cases/:parcel_id/:case_id/close",
            post(handlers::a002_return_case::close_case),
        )
        .route(
            "/api/a002/return-cases/:parcel_id/:case_id/reverse-track",
            put(handlers::a002_return_case::update_reverse_track),
        )
        .route(
            "/api/a002/return-cases/:parcel_id/:case_id/confirm-receipt",
            post(handlers::a002_return_case::confirm_receipt),
        )
        .fallback_service(ServeDir::new("dist"))
        .layer(middleware::from_fn(request_logger))
        .layer(cors);

    let addr: SocketAddr = ([0, 0, 0, 0], config.server.port).into();

    tracing::info!("Attempting to bind server to http://{}", addr);
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => {
            tracing::info!("Server successfully bound to {}", addr);
            listener
        }
        Err(e) => {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                tracing::error!(
                    "Error: Port {} is already in use. Please ensure no other process is using this port.",
                    config.server.port
                );
            } else {
                tracing::error!("Failed to bind to port {}. Error: {}", config.server.port, e);
            }
            // Propagate the error to stop the application
            return Err(e.into());
        }
    };

    axum::serve(listener, app).await?;

    Ok(())
}
