use std::{collections::HashMap, process, sync::Arc};

use serde_json::{Value, json};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

use pooldash::{
    application::{
        error::AppError,
        live::LiveBroadcaster,
        pages::PageCache,
        refresh,
        resolver::{CoinEndpoint, KeyPage, VersionByteResolver, resolve_and_render},
        stats::StatsProvider,
    },
    config,
    domain::{template::Template, types::PageId},
    infra::{
        error::InfraError,
        http::{HttpState, build_router},
        rpc::{DaemonEndpoint, HttpDaemonRpc},
        stats::HttpStatsClient,
        store::RedbVersionByteStore,
        telemetry,
        templates::TemplateLoader,
        watch,
    },
};

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
    let (_cli, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    run_serve(settings).await
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let page_table: HashMap<String, PageId> = settings
        .website
        .pages
        .iter()
        .map(|(file, id)| (file.clone(), PageId::new(id.clone())))
        .collect();

    let loader = Arc::new(TemplateLoader::new(
        settings.website.template_dir.clone(),
        settings.website.frame_file.clone(),
        settings.website.key_file.clone(),
        page_table.clone(),
    ));
    let loaded = loader
        .load_all()
        .await
        .map_err(|err| AppError::unexpected(format!("startup template load failed: {err}")))?;

    let stats: Arc<dyn StatsProvider> = Arc::new(
        HttpStatsClient::new(settings.stats.api_url.clone(), settings.stats.fetch_timeout)
            .map_err(AppError::from)?,
    );

    let cache = Arc::new(PageCache::new(
        loaded.frame,
        loaded.pages,
        portal_context(&settings),
        pool_context(&settings),
    ));

    let initial = match stats.global_stats().await {
        Ok(snapshot) => snapshot,
        Err(error) => {
            warn!(%error, "Initial statistics fetch failed; rendering with empty statistics");
            json!({})
        }
    };
    cache.rebuild_all(initial);
    info!(pages = cache.page_ids().len(), "Initial page render published");

    let live = Arc::new(LiveBroadcaster::new());
    let key_page = Arc::new(KeyPage::new());

    spawn_resolver(&settings, loaded.key, key_page.clone());

    let _watch = watch::spawn(
        settings.website.template_dir.clone(),
        settings.website.frame_file.clone(),
        page_table,
        cache.clone(),
    )
    .map_err(AppError::from)?;

    let refresh_handle = refresh::spawn(
        cache.clone(),
        stats.clone(),
        live.clone(),
        settings.stats.update_interval,
        settings.stats.fetch_timeout,
    );

    let state = HttpState {
        cache,
        stats,
        live,
        key_page,
        loader,
        admin_password: settings
            .website
            .admin
            .as_ref()
            .map(|admin| Arc::from(admin.password.as_str())),
        wallet_schemes: Arc::new(wallet_schemes(&settings)),
    };

    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(addr = %settings.server.addr, "Dashboard listening");

    let result = axum::serve(listener, router.into_make_service())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")));

    refresh_handle.abort();
    let _ = refresh_handle.await;

    result
}

/// Portal half of the static render context. Only presentation-safe fields
/// are exposed to templates.
fn portal_context(settings: &config::Settings) -> Value {
    json!({
        "name": settings.website.name,
        "stats_update_interval": settings.stats.update_interval.as_secs(),
        "admin_enabled": settings.website.admin.is_some(),
    })
}

/// Pool half of the static render context. Daemon credentials never enter
/// the render context.
fn pool_context(settings: &config::Settings) -> Value {
    let pools: serde_json::Map<String, Value> = settings
        .pools
        .iter()
        .map(|(symbol, pool)| {
            (
                symbol.clone(),
                json!({
                    "enabled": pool.enabled,
                    "funding_address": pool.funding_address,
                    "wallet_scheme": pool.wallet_scheme,
                }),
            )
        })
        .collect();
    Value::Object(pools)
}

fn wallet_schemes(settings: &config::Settings) -> HashMap<String, String> {
    settings
        .pools
        .iter()
        .filter_map(|(symbol, pool)| {
            pool.wallet_scheme
                .as_ref()
                .map(|scheme| (symbol.clone(), scheme.clone()))
        })
        .collect()
}

/// Start the version byte resolution pass in the background.
///
/// Resolution failures leave the key derivation page unavailable; they never
/// take the process down.
fn spawn_resolver(
    settings: &config::Settings,
    key_template: Option<Template>,
    key_page: Arc<KeyPage>,
) {
    let Some(template) = key_template else {
        warn!("No key template deployed; key derivation page disabled");
        return;
    };

    let coins: Vec<CoinEndpoint> = settings
        .pools
        .iter()
        .filter(|(_, pool)| pool.enabled)
        .map(|(symbol, pool)| CoinEndpoint {
            symbol: symbol.clone(),
            funding_address: pool.funding_address.clone(),
        })
        .collect();

    let daemons: HashMap<String, DaemonEndpoint> = settings
        .pools
        .iter()
        .filter(|(_, pool)| pool.enabled)
        .map(|(symbol, pool)| {
            (
                symbol.clone(),
                DaemonEndpoint {
                    url: pool.daemon.url.clone(),
                    username: pool.daemon.username.clone(),
                    password: pool.daemon.password.clone(),
                },
            )
        })
        .collect();

    let store = match RedbVersionByteStore::open(&settings.store.path) {
        Ok(store) => Arc::new(store),
        Err(error) => {
            error!(%error, "Version byte store unavailable; key derivation page disabled");
            return;
        }
    };

    let rpc = match HttpDaemonRpc::new(daemons, settings.resolver.rpc_timeout) {
        Ok(rpc) => Arc::new(rpc),
        Err(error) => {
            error!(%error, "Daemon RPC client could not be built; key derivation page disabled");
            return;
        }
    };

    let resolver = VersionByteResolver::new(store, rpc, coins, settings.resolver.rpc_timeout);
    tokio::spawn(async move {
        if let Err(error) = resolve_and_render(&resolver, &template, &key_page).await {
            error!(%error, "Version byte resolution failed; key derivation page unavailable");
        }
    });
}
