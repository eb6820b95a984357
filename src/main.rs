use std::net::SocketAddr;
use std::sync::Arc;

use achados::catalog::{Catalog, CodeGenerator};
use achados::config::Config;
use achados::db::{create_pool, run_migrations, PgStore};
use achados::middleware::AuthLayer;
use achados::proto::auth::auth_service_server::AuthServiceServer;
use achados::proto::categories::categories_service_server::CategoriesServiceServer;
use achados::proto::health::health_server::HealthServer;
use achados::proto::items::items_service_server::ItemsServiceServer;
use achados::services::auth_service::TokenIssuer;
use achados::services::{
    AuthServiceImpl, CategoriesServiceImpl, HealthServiceImpl, ItemsServiceImpl,
};

use tonic::transport::Server;
use tonic_reflection::server::Builder as ReflectionBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Include file descriptor for gRPC reflection
pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("achados_descriptor");

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "achados=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().map_err(|e| {
        tracing::error!("Failed to load configuration (DATABASE_URL and JWT_SECRET are required): {}", e);
        e
    })?;

    tracing::info!("Starting achados gRPC server...");
    tracing::info!("Connecting to database...");

    let pool = create_pool(&config.database_url).await?;
    tracing::info!("Database connection established");

    if config.run_migrations {
        run_migrations(&pool).await?;
        tracing::info!("Database migrations applied");
    }

    let store = Arc::new(PgStore::new(pool.clone()));
    let tokens = TokenIssuer::from_config(&config);
    let catalog = Arc::new(Catalog::new(store.clone(), CodeGenerator::from_entropy()));

    // Create services
    let items_service = ItemsServiceImpl::new(catalog);
    let categories_service = CategoriesServiceImpl::new(store.clone());
    let auth_service = AuthServiceImpl::new(store, tokens.clone());
    let health_service = HealthServiceImpl::with_database(pool);

    // CORS layer for gRPC-Web
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods(Any)
        .expose_headers(Any);

    // Build reflection service
    let reflection_service = ReflectionBuilder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    let addr: SocketAddr = config.server_addr().parse()?;
    tracing::info!("Listening on {}", addr);

    Server::builder()
        .accept_http1(true) // Required for gRPC-Web
        .layer(cors)
        .layer(tonic_web::GrpcWebLayer::new())
        .layer(AuthLayer::new(tokens))
        .add_service(reflection_service)
        .add_service(AuthServiceServer::new(auth_service))
        .add_service(ItemsServiceServer::new(items_service))
        .add_service(CategoriesServiceServer::new(categories_service))
        .add_service(HealthServer::new(health_service))
        .serve_with_shutdown(addr, shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
