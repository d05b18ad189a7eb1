use std::{future::IntoFuture, net::SocketAddr, process, sync::Arc, time::Duration};

use axum::Router;
use newsdeck::{
    application::{
        commands::ArticleCommandService,
        error::AppError,
        listing::ArticleListingService,
        pagination::PaginationResolver,
        repos::{ArticleStore, ArticleWriteRepo},
    },
    cache::{
        CacheInvalidator, CacheKeyBuilder, EvictionSubscriber, LayeredCache, Namespace,
        RedisBroadcaster,
    },
    config::{self, StoreBackend},
    infra::{
        db::PostgresArticleStore,
        error::InfraError,
        http::{self, HttpState},
        memory_store::InMemoryArticleStore,
        telemetry,
    },
};
use redis::aio::ConnectionManager;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;
use uuid::Uuid;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Purge(args) => run_purge(settings, args).await,
    }
}

struct Stores {
    reader: Arc<dyn ArticleStore>,
    writer: Arc<dyn ArticleWriteRepo>,
    db: Option<Arc<PostgresArticleStore>>,
}

struct RedisHandles {
    client: redis::Client,
    conn: ConnectionManager,
}

struct CacheContext {
    cache: Option<Arc<LayeredCache>>,
    invalidator: Option<Arc<CacheInvalidator>>,
    keys: CacheKeyBuilder,
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let stores = init_stores(&settings).await?;
    let redis = connect_redis(&settings).await?;
    let caching = build_cache(&settings, redis.as_ref())?;

    let subscription = match (&caching.invalidator, &redis) {
        (Some(invalidator), Some(redis)) if settings.redis.broadcast => Some(
            EvictionSubscriber::new(redis.client.clone(), settings.redis.channel.clone())
                .spawn(invalidator.clone())
                .await?,
        ),
        _ => None,
    };

    let resolver = PaginationResolver::new(stores.reader.clone(), settings.pagination);
    let listing = ArticleListingService::new(
        stores.reader.clone(),
        resolver,
        caching.cache.clone(),
        caching.keys.clone(),
    );
    let commands = ArticleCommandService::new(stores.writer.clone(), caching.invalidator.clone());

    let state = HttpState {
        listing: Arc::new(listing),
        commands: Arc::new(commands),
        cache: caching.cache,
        invalidator: caching.invalidator,
        db: stores.db,
    };

    let result = serve_http(
        settings.server.addr,
        http::build_router(state),
        settings.server.graceful_shutdown,
    )
    .await;

    if let Some(handle) = subscription {
        handle.abort();
    }
    result
}

async fn run_purge(settings: config::Settings, args: config::PurgeArgs) -> Result<(), AppError> {
    let namespace: Namespace = args.namespace.parse()?;
    let redis = connect_redis(&settings).await?;
    if redis.is_none() {
        warn!("No redis configured; only this process's empty memory tiers can be purged");
    }
    let caching = build_cache(&settings, redis.as_ref())?;

    let Some(invalidator) = caching.invalidator else {
        info!(%namespace, "Cache disabled; nothing to purge");
        return Ok(());
    };

    let report = invalidator.purge_namespace(namespace).await;
    info!(
        %namespace,
        evicted = report.evicted,
        broadcast = report.broadcast,
        failures = report.errors.len(),
        "Purge finished"
    );
    if let Some(first) = report.errors.into_iter().next() {
        return Err(AppError::unexpected(format!("purge incomplete: {first}")));
    }
    Ok(())
}

async fn init_stores(settings: &config::Settings) -> Result<Stores, AppError> {
    match settings.store {
        StoreBackend::Memory => {
            info!("Serving articles from the in-memory store");
            let store = Arc::new(InMemoryArticleStore::new());
            Ok(Stores {
                reader: store.clone(),
                writer: store,
                db: None,
            })
        }
        StoreBackend::Postgres => {
            let database_url = settings
                .database
                .url
                .as_ref()
                .ok_or_else(|| InfraError::configuration("database url is not configured"))?;

            let pool =
                PostgresArticleStore::connect(database_url, settings.database.max_connections.get())
                    .await
                    .map_err(InfraError::from)?;
            if settings.database.run_migrations {
                PostgresArticleStore::run_migrations(&pool)
                    .await
                    .map_err(InfraError::from)?;
            }

            let store = Arc::new(PostgresArticleStore::new(pool));
            Ok(Stores {
                reader: store.clone(),
                writer: store.clone(),
                db: Some(store),
            })
        }
    }
}

async fn connect_redis(settings: &config::Settings) -> Result<Option<RedisHandles>, AppError> {
    let Some(url) = settings.redis.url.as_deref() else {
        return Ok(None);
    };
    let client = redis::Client::open(url).map_err(InfraError::from)?;
    let conn = ConnectionManager::new(client.clone())
        .await
        .map_err(InfraError::from)?;
    info!("Connected to redis");
    Ok(Some(RedisHandles { client, conn }))
}

fn build_cache(
    settings: &config::Settings,
    redis: Option<&RedisHandles>,
) -> Result<CacheContext, AppError> {
    let keys = CacheKeyBuilder::new(settings.cache.key_prefix.clone());
    let cache = settings
        .cache
        .build(redis.map(|r| &r.conn))?
        .map(Arc::new);

    let invalidator = cache.clone().map(|cache| {
        let invalidator = CacheInvalidator::new(cache, keys.clone());
        let invalidator = match redis {
            Some(redis) if settings.redis.broadcast => {
                invalidator.with_broadcaster(Arc::new(RedisBroadcaster::new(
                    redis.conn.clone(),
                    settings.redis.channel.clone(),
                    Uuid::new_v4(),
                )))
            }
            _ => invalidator,
        };
        Arc::new(invalidator)
    });

    Ok(CacheContext {
        cache,
        invalidator,
        keys,
    })
}

async fn serve_http(addr: SocketAddr, router: Router, grace: Duration) -> Result<(), AppError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(InfraError::from)?;
    info!(%addr, "HTTP server listening");

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = stop_rx.await;
        })
        .into_future();
    let mut server = std::pin::pin!(server);

    tokio::select! {
        result = &mut server => {
            return result.map_err(|err| AppError::from(InfraError::from(err)));
        }
        () = shutdown_signal() => {}
    }

    let _ = stop_tx.send(());
    match tokio::time::timeout(grace, server).await {
        Ok(result) => result.map_err(|err| AppError::from(InfraError::from(err))),
        Err(_) => {
            warn!(grace_secs = grace.as_secs(), "Graceful shutdown timed out");
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received; draining connections");
}
