use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use billing_core::{
    domain::repositories::{
        notifications::UserNotifier, payments::PaymentRepository,
        subscriptions::SubscriptionRepository,
    },
    infra::{
        db::{
            postgres::postgres_connection,
            repositories::{payments::PaymentPostgres, subscriptions::SubscriptionPostgres},
        },
        notifications::push_http::PushNotificationClient,
    },
    payments::{
        credential_cache::{CredentialCache, GatewayCredentials},
        gateway::PaymentGateway,
        gateway_client::GatewayClient,
    },
};
use billing_worker::{
    axum_http::{self, http_serve::HttpUseCases},
    billing_scheduler, config,
    usecases::{
        billing_run::{BillingRunSettings, BillingRunUseCase},
        checkout::{CheckoutSettings, SubscriptionCheckoutUseCase},
        gateway_callback::GatewayCallbackUseCase,
        reactivation::SubscriptionReactivationUseCase,
    },
};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(error) = run().await {
        error!(error = ?error, "billing worker exited with error");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    billing_core::observability::init_observability("billing-worker")?;

    let dotenvy_env = Arc::new(config::config_loader::load()?);
    info!("ENV has been loaded");

    // Missing gateway credentials stop the process here, before anything is scheduled.
    let gateway_env = &dotenvy_env.gateway;
    let request_timeout = Duration::from_secs(gateway_env.request_timeout_secs);
    let credentials = GatewayCredentials::new(
        gateway_env.token_url.clone(),
        gateway_env.client_id.clone(),
        gateway_env.client_secret.clone(),
    )
    .context("gateway credentials")?;
    let credential_cache = Arc::new(CredentialCache::new(credentials, request_timeout)?);
    let gateway: Arc<dyn PaymentGateway> = Arc::new(GatewayClient::new(
        gateway_env.api_base_url.clone(),
        credential_cache,
        request_timeout,
    )?);
    info!(api_base_url = %gateway_env.api_base_url, "Gateway client has been configured");

    let postgres_pool = postgres_connection::establish_connection(
        &dotenvy_env.database.url,
        dotenvy_env.database.max_pool_size,
    )?;
    info!("Postgres connection has been established");
    let db_pool_arc = Arc::new(postgres_pool);

    let subscription_repository: Arc<dyn SubscriptionRepository + Send + Sync> =
        Arc::new(SubscriptionPostgres::new(Arc::clone(&db_pool_arc)));
    let payment_repository: Arc<dyn PaymentRepository + Send + Sync> =
        Arc::new(PaymentPostgres::new(Arc::clone(&db_pool_arc)));
    let notifier: Arc<dyn UserNotifier + Send + Sync> = Arc::new(PushNotificationClient::new(
        dotenvy_env.notifications.push_url.clone(),
        Duration::from_secs(dotenvy_env.notifications.timeout_secs),
    )?);

    let billing_run_usecase = Arc::new(BillingRunUseCase::new(
        Arc::clone(&subscription_repository),
        Arc::clone(&payment_repository),
        Arc::clone(&gateway),
        Arc::clone(&notifier),
        BillingRunSettings {
            worker_id: dotenvy_env.billing.worker_id.clone(),
            claim_ttl: chrono::Duration::seconds(dotenvy_env.billing.claim_ttl_secs),
        },
    ));

    let gateway_callback_usecase = Arc::new(GatewayCallbackUseCase::new(
        Arc::clone(&subscription_repository),
        Arc::clone(&payment_repository),
        Arc::clone(&gateway),
        Arc::clone(&notifier),
        gateway_env.callback_secret.clone(),
    ));

    let checkout_usecase = Arc::new(SubscriptionCheckoutUseCase::new(
        Arc::clone(&payment_repository),
        Arc::clone(&gateway),
        CheckoutSettings {
            notify_url: gateway_env.notify_url.clone(),
            continue_url: gateway_env.continue_url.clone(),
        },
    ));

    let reactivation_usecase = Arc::new(SubscriptionReactivationUseCase::new(Arc::clone(
        &subscription_repository,
    )));

    let billing_loop = tokio::spawn(billing_scheduler::worker::run(
        Arc::clone(&billing_run_usecase),
        Duration::from_secs(dotenvy_env.billing.interval_secs),
    ));

    let server_config = Arc::clone(&dotenvy_env);
    let http_server = tokio::spawn(async move {
        axum_http::http_serve::start(
            server_config,
            HttpUseCases {
                gateway_callback: gateway_callback_usecase,
                checkout: checkout_usecase,
                reactivation: reactivation_usecase,
                billing_run: billing_run_usecase,
            },
        )
        .await
    });

    tokio::select! {
        result = billing_loop => result??,
        result = http_server => result??,
    };
    Ok(())
}
