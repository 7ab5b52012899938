#![warn(clippy::pedantic, clippy::all, clippy::nursery)]

use axum::http::HeaderValue;
use matricula::{
    auth::ensure_bootstrap_accounts,
    config::{RuntimeConfiguration, StoreBackend},
    cors_layer,
    data::{memory::MemoryStore, postgres::PostgresStore},
    notify::{LogSink, Notifier},
    router,
    state::MatriculaState,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::{net::TcpListener, signal};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[macro_use]
extern crate tracing;

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    warn!("signal received, starting graceful shutdown");
}

#[tokio::main]
async fn main() {
    let env_file = dotenvy::dotenv();

    tracing::subscriber::set_global_default(
        FmtSubscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .finish(),
    )
    .expect("unable to set tracing subscriber");

    info!("`tracing` online");
    match env_file {
        Ok(path) => info!(?path, "Loaded env file"),
        Err(e) => debug!(?e, "No env file loaded, using process environment"),
    }

    let config = RuntimeConfiguration::new().expect("unable to create config");
    let notifier = Notifier::spawn(LogSink);

    let (state, postgres) = match config.store() {
        StoreBackend::Postgres(db) => {
            let options = PgPoolOptions::new().max_connections(db.max_connections());
            let store = Arc::new(
                PostgresStore::connect(options, db)
                    .await
                    .expect("unable to connect to database"),
            );
            (MatriculaState::new(store.clone(), notifier), Some(store))
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory store, nothing will survive a restart");
            (
                MatriculaState::new(Arc::new(MemoryStore::default()), notifier),
                None,
            )
        }
    };

    ensure_bootstrap_accounts(
        state.users(),
        config.bootstrap_accounts(),
        config.bcrypt_cost(),
    )
    .await
    .expect("unable to create bootstrap accounts");

    let mut app = router(state);
    if let Some(origin) = config.cors_origin() {
        let origin = HeaderValue::from_str(origin).expect("invalid MATRICULA_CORS_ORIGIN");
        app = app.layer(cors_layer(origin));
    }

    let server_ip = config.server_ip();
    let listener = TcpListener::bind(server_ip)
        .await
        .expect("unable to listen on server ip");

    info!(?server_ip, "Listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("unable to serve app");

    if let Some(postgres) = postgres {
        postgres.close().await;
    }
    info!("Shut down");
}
