use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Result;
use axum::{
    Router,
    http::{
        Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::get,
};
use tokio::net::TcpListener;
use tower_http::{
    cors::CorsLayer, limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer,
};
use tracing::{error, info};

use crate::{
    axum_http::{default_routers, routers},
    config::config_model::DotEnvyConfig,
    usecases::{
        billing_run::BillingRunUseCase, checkout::SubscriptionCheckoutUseCase,
        gateway_callback::GatewayCallbackUseCase, reactivation::SubscriptionReactivationUseCase,
    },
};

#[derive(Clone)]
pub struct HttpUseCases {
    pub gateway_callback: Arc<GatewayCallbackUseCase>,
    pub checkout: Arc<SubscriptionCheckoutUseCase>,
    pub reactivation: Arc<SubscriptionReactivationUseCase>,
    pub billing_run: Arc<BillingRunUseCase>,
}

pub fn app(config: Arc<DotEnvyConfig>, usecases: HttpUseCases) -> Result<Router> {
    let router = Router::new()
        .fallback(default_routers::not_found)
        .nest(
            "/internal/gateway",
            routers::gateway_callback::routes(usecases.gateway_callback),
        )
        .nest(
            "/internal/v1/subscriptions",
            routers::subscriptions_admin::routes(
                Arc::clone(&config),
                usecases.checkout,
                usecases.reactivation,
            ),
        )
        .route("/health-check", get(default_routers::health_check))
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.worker_server.timeout,
        )))
        // Nested after the timeout: a billing run drains its whole due set.
        .nest(
            "/internal/v1/billing",
            routers::billing_runs::routes(Arc::clone(&config), usecases.billing_run),
        )
        .layer(RequestBodyLimitLayer::new(
            (config.worker_server.body_limit * 1024 * 1024).try_into()?,
        ))
        .layer(
            CorsLayer::new()
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([AUTHORIZATION, CONTENT_TYPE]),
        )
        .layer(TraceLayer::new_for_http());

    Ok(router)
}

pub async fn start(config: Arc<DotEnvyConfig>, usecases: HttpUseCases) -> Result<()> {
    let app = app(Arc::clone(&config), usecases)?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.worker_server.port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "http_serve: billing worker listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "http_serve: failed to listen for ctrl+c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "http_serve: failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("http_serve: received ctrl+c"),
        _ = terminate => info!("http_serve: received SIGTERM"),
    }
}
