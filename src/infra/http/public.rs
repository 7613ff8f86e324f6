//! Public request handlers.
//!
//! Every rendered page comes straight out of the page cache; the only
//! handlers that do work per request are the ones that need request-scoped
//! statistics first (miner balance, coin share totals), and those render a
//! detached copy so the shared cache is never rewritten on a request path.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use async_stream::stream;
use axum::{
    Router,
    extract::{Path, Query, State},
    http::{
        HeaderName, HeaderValue, StatusCode,
        header::{CONTENT_TYPE, LOCATION},
    },
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::{
    application::{
        error::AppError,
        live::{ConnectionId, LiveBroadcaster, SinkClosed, StatSink},
        pages::PageCache,
        resolver::KeyPage,
        stats::StatsProvider,
    },
    domain::types::PageId,
    infra::templates::TemplateLoader,
};

#[derive(Clone)]
pub struct HttpState {
    pub cache: Arc<PageCache>,
    pub stats: Arc<dyn StatsProvider>,
    pub live: Arc<LiveBroadcaster>,
    pub key_page: Arc<KeyPage>,
    pub loader: Arc<TemplateLoader>,
    /// Shared secret for administrative actions; `None` disables them.
    pub admin_password: Option<Arc<str>>,
    /// Coin symbol → wallet URI scheme for the donation redirect.
    pub wallet_schemes: Arc<HashMap<String, String>>,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/", get(landing))
        .route("/get-page", get(page_partial))
        .route("/key.html", get(key_page))
        .route("/live-stats", get(live_stats))
        .route("/workers/{address}", get(miner_page))
        .route("/user_shares/{coin}", get(user_shares))
        .route("/payout/{address}", get(payout))
        .route("/donate/{coin}/{address}", get(donate))
        .route("/admin/{action}", post(super::admin::admin_action))
        .route("/{page}", get(page))
        .fallback(not_found)
        .with_state(state)
}

fn html_response(body: &str) -> Response {
    (
        [(CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"))],
        body.to_owned(),
    )
        .into_response()
}

async fn landing(State(state): State<HttpState>) -> Response {
    serve_framed(&state, &PageId::landing())
}

async fn page(State(state): State<HttpState>, Path(page): Path<String>) -> Response {
    serve_framed(&state, &PageId::new(page))
}

fn serve_framed(state: &HttpState, id: &PageId) -> Response {
    match state.cache.get(id) {
        Some(body) => html_response(&body),
        None => AppError::NotFound.into_response(),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PagePartialQuery {
    id: Option<String>,
}

/// Bare page body for partial-content fetches (`/get-page?id=`).
async fn page_partial(
    State(state): State<HttpState>,
    Query(query): Query<PagePartialQuery>,
) -> Response {
    let id = PageId::new(query.id.unwrap_or_default());
    match state.cache.get_raw(&id) {
        Some(body) => html_response(&body),
        None => AppError::NotFound.into_response(),
    }
}

async fn key_page(State(state): State<HttpState>) -> Response {
    match state.key_page.get() {
        Some(body) => html_response(&body),
        None => AppError::Unavailable("key derivation page").into_response(),
    }
}

/// Miner statistics with a freshly fetched balance. The worker suffix after
/// the first `.` is dropped so any worker name resolves to its miner.
async fn miner_page(State(state): State<HttpState>, Path(address): Path<String>) -> Response {
    let address = address.split('.').next().unwrap_or_default().to_string();
    if address.is_empty() {
        return AppError::NotFound.into_response();
    }

    let balances = match state.stats.balance_by_address(&address).await {
        Ok(balances) => balances,
        Err(err) => return AppError::from(err).into_response(),
    };

    let extra = json!({ "address": address, "balances": balances });
    match state
        .cache
        .render_detached(&PageId::new("miner-statistics"), extra)
    {
        Some(body) => html_response(&body),
        None => AppError::NotFound.into_response(),
    }
}

async fn user_shares(State(state): State<HttpState>, Path(coin): Path<String>) -> Response {
    let totals = match state.stats.coin_totals(&coin, None).await {
        Ok(totals) => totals,
        Err(err) => return AppError::from(err).into_response(),
    };

    let extra = json!({ "coin": coin, "coin_totals": totals });
    match state
        .cache
        .render_detached(&PageId::new("user_shares"), extra)
    {
        Some(body) => html_response(&body),
        None => AppError::NotFound.into_response(),
    }
}

async fn payout(State(state): State<HttpState>, Path(address): Path<String>) -> Response {
    match state.stats.payout(&address).await {
        Ok(Value::String(amount)) => amount.into_response(),
        Ok(value) => value.to_string().into_response(),
        Err(err) => AppError::from(err).into_response(),
    }
}

/// 301 to a wallet URI, kept out of robot indexes.
async fn donate(
    State(state): State<HttpState>,
    Path((coin, address)): Path<(String, String)>,
) -> Response {
    let Some(scheme) = state.wallet_schemes.get(&coin.to_lowercase()) else {
        return AppError::NotFound.into_response();
    };

    let Ok(location) = HeaderValue::from_str(&format!("{scheme}:{address}")) else {
        return AppError::NotFound.into_response();
    };

    (
        StatusCode::MOVED_PERMANENTLY,
        [
            (LOCATION, location),
            (
                HeaderName::from_static("x-robots-tag"),
                HeaderValue::from_static("none"),
            ),
        ],
    )
        .into_response()
}

struct ChannelSink {
    tx: mpsc::UnboundedSender<String>,
}

impl StatSink for ChannelSink {
    fn write(&self, payload: &str) -> Result<(), SinkClosed> {
        self.tx.send(payload.to_string()).map_err(|_| SinkClosed)
    }
}

/// Unsubscribes promptly when the response stream is dropped; a connection
/// that lingers past that is still reaped on its next failed write.
struct SubscriptionGuard {
    live: Arc<LiveBroadcaster>,
    id: ConnectionId,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.live.unsubscribe(self.id);
    }
}

async fn live_stats(State(state): State<HttpState>) -> Response {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let id = state.live.subscribe(Box::new(ChannelSink { tx }));
    let guard = SubscriptionGuard {
        live: state.live.clone(),
        id,
    };

    let stream = stream! {
        let _guard = guard;
        while let Some(payload) = rx.recv().await {
            yield Ok::<Event, Infallible>(Event::default().data(payload));
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new()).into_response()
}

async fn not_found() -> Response {
    AppError::NotFound.into_response()
}
