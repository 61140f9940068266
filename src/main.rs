//! Digistore - Self-hosted Digital Goods Storefront

use anyhow::Result;
use axum::{extract::{Path, Query, State}, http::StatusCode, routing::{get, patch, post}, Json, Router};
use chrono::{DateTime, Utc};
use digistore::{Cart, CartOutcome, CartService, CartServiceError, Config, Money, NoticeLevel, Notifier, OwnerId, PgCartStore, ProductRef};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Product {
    pub id: Uuid, pub sku: String, pub name: String, pub description: Option<String>,
    pub price: i64, pub currency: String, pub status: String, pub download_url: Option<String>,
    pub images: Vec<String>, pub tags: Vec<String>, pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>, pub updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct AppState { pub db: sqlx::PgPool, pub carts: Arc<CartService<PgCartStore>> }

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();
    let config = Config::from_env()?;

    let db = PgPoolOptions::new().max_connections(10).connect(&config.database_url).await?;
    sqlx::migrate!("./migrations").run(&db).await?;

    let nats = match &config.nats_url {
        Some(url) => match async_nats::connect(url).await {
            Ok(client) => Some(client),
            Err(e) => { tracing::warn!(error = %e, "NATS unavailable, cart events disabled"); None }
        },
        None => None,
    };

    let notices = Notifier::new(64);
    spawn_notice_log(&notices);

    let store = Arc::new(PgCartStore::connect(db.clone()).await?);
    let carts = Arc::new(CartService::new(store, notices, nats, &config.currency, config.op_timeout));
    let state = AppState { db, carts };

    let app = Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "digistore"})) }))
        .route("/api/v1/products", get(list_products).post(create_product))
        .route("/api/v1/products/:id", get(get_product).put(update_product).delete(delete_product))
        .route("/api/v1/cart/:owner", get(get_cart).delete(clear_cart))
        .route("/api/v1/cart/:owner/items", post(add_cart_item))
        .route("/api/v1/cart/:owner/items/:product_id", patch(update_cart_item).delete(remove_cart_item))
        .route("/api/v1/cart/:owner/checkout", post(checkout))
        .route("/api/v1/coupons/preview", post(preview_coupon))
        .layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive()).with_state(state);

    tracing::info!("Digistore listening on 0.0.0.0:{}", config.port);
    axum::serve(tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?, app).await?;
    Ok(())
}

/// Bridges the user-notice side channel into the service log.
fn spawn_notice_log(notices: &Notifier) {
    let mut rx = notices.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(n) if n.level == NoticeLevel::Error => tracing::warn!(notice = %n.message, "user notice"),
                Ok(n) => tracing::info!(notice = %n.message, "user notice"),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });
}

fn service_error(e: CartServiceError) -> (StatusCode, String) {
    match e {
        CartServiceError::EmptyCart => (StatusCode::BAD_REQUEST, e.to_string()),
        CartServiceError::Timeout => (StatusCode::GATEWAY_TIMEOUT, e.to_string()),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Products
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)] pub struct ListParams { pub page: Option<u32>, pub per_page: Option<u32>, pub search: Option<String> }
#[derive(Debug, Serialize)] pub struct PaginatedResponse<T> { pub data: Vec<T>, pub total: i64, pub page: u32 }

async fn list_products(State(s): State<AppState>, Query(p): Query<ListParams>) -> Result<Json<PaginatedResponse<Product>>, (StatusCode, String)> {
    let page = p.page.unwrap_or(1).max(1); let per_page = p.per_page.unwrap_or(20).min(100);
    let products = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE status = 'active' ORDER BY created_at DESC LIMIT $1 OFFSET $2")
        .bind(per_page as i64).bind(((page-1)*per_page) as i64).fetch_all(&s.db).await.map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM products WHERE status = 'active'").fetch_one(&s.db).await.map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(PaginatedResponse { data: products, total: total.0, page }))
}

async fn get_product(State(s): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Product>, (StatusCode, String)> {
    sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1").bind(id).fetch_optional(&s.db).await.map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?.map(Json).ok_or((StatusCode::NOT_FOUND, "Not found".to_string()))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateProductRequest {
    #[validate(length(min = 1))] pub name: String,
    pub description: Option<String>,
    #[validate(range(min = 0))] pub price: i64,
    pub download_url: Option<String>,
}

async fn create_product(State(s): State<AppState>, Json(r): Json<CreateProductRequest>) -> Result<(StatusCode, Json<Product>), (StatusCode, String)> {
    r.validate().map_err(|e| (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;
    let suffix = Uuid::new_v4().simple().to_string();
    let sku = format!("SKU-{}", suffix[..8].to_uppercase());
    let p = sqlx::query_as::<_, Product>("INSERT INTO products (id, sku, name, description, price, currency, status, download_url, images, tags, metadata, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, 'INR', 'active', $6, '{}', '{}', '{}', NOW(), NOW()) RETURNING *")
        .bind(Uuid::now_v7()).bind(&sku).bind(&r.name).bind(&r.description).bind(r.price).bind(&r.download_url)
        .fetch_one(&s.db).await.map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok((StatusCode::CREATED, Json(p)))
}

async fn update_product(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<CreateProductRequest>) -> Result<Json<Product>, (StatusCode, String)> {
    r.validate().map_err(|e| (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;
    let p = sqlx::query_as::<_, Product>("UPDATE products SET name = $2, description = $3, price = $4, download_url = $5, updated_at = NOW() WHERE id = $1 RETURNING *")
        .bind(id).bind(&r.name).bind(&r.description).bind(r.price).bind(&r.download_url)
        .fetch_optional(&s.db).await.map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?.ok_or((StatusCode::NOT_FOUND, "Not found".to_string()))?;
    Ok(Json(p))
}

async fn delete_product(State(s): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode, (StatusCode, String)> {
    sqlx::query("UPDATE products SET status = 'archived', updated_at = NOW() WHERE id = $1").bind(id).execute(&s.db).await.map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Cart
// ---------------------------------------------------------------------------

/// Full-state cart response: the snapshot plus the derived consumer values.
#[derive(Debug, Serialize)]
pub struct CartView { pub cart: Option<Cart>, pub cart_count: u32, pub cart_total: String }

impl CartView {
    fn of(cart: Option<Cart>) -> Self {
        Self {
            cart_count: cart.as_ref().map_or(0, Cart::item_count),
            cart_total: cart.as_ref().map_or_else(|| "0.00".to_string(), |c| c.total_amount().formatted()),
            cart,
        }
    }
}

async fn get_cart(State(s): State<AppState>, Path(owner): Path<String>) -> Result<Json<CartView>, (StatusCode, String)> {
    let cart = s.carts.refresh_cart(&OwnerId::new(owner)).await.map_err(service_error)?;
    Ok(Json(CartView::of(cart)))
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddItemRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1))] pub quantity: Option<u32>,
}

async fn add_cart_item(State(s): State<AppState>, Path(owner): Path<String>, Json(r): Json<AddItemRequest>) -> Result<(StatusCode, Json<CartView>), (StatusCode, String)> {
    r.validate().map_err(|e| (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;
    let p = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1 AND status = 'active'").bind(r.product_id)
        .fetch_optional(&s.db).await.map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or((StatusCode::NOT_FOUND, "Product not found".to_string()))?;
    let product = ProductRef { id: p.id, name: p.name.clone(), price: Money::from_minor(p.price, &p.currency), image: p.images.first().cloned() };
    let cart = s.carts.add_to_cart(&OwnerId::new(owner), product, r.quantity.unwrap_or(1)).await.map_err(service_error)?;
    Ok((StatusCode::CREATED, Json(CartView::of(Some(cart)))))
}

#[derive(Debug, Deserialize)] pub struct UpdateItemRequest { pub change: i64 }

async fn update_cart_item(State(s): State<AppState>, Path((owner, product_id)): Path<(String, Uuid)>, Json(r): Json<UpdateItemRequest>) -> Result<Json<CartView>, (StatusCode, String)> {
    let owner = OwnerId::new(owner);
    match s.carts.update_quantity(&owner, product_id, r.change).await.map_err(service_error)? {
        CartOutcome::Updated(cart) => Ok(Json(CartView::of(Some(cart)))),
        CartOutcome::NoChange => Ok(Json(CartView::of(s.carts.refresh_cart(&owner).await.map_err(service_error)?))),
    }
}

async fn remove_cart_item(State(s): State<AppState>, Path((owner, product_id)): Path<(String, Uuid)>) -> Result<Json<CartView>, (StatusCode, String)> {
    let owner = OwnerId::new(owner);
    match s.carts.remove_item(&owner, product_id).await.map_err(service_error)? {
        CartOutcome::Updated(cart) => Ok(Json(CartView::of(Some(cart)))),
        CartOutcome::NoChange => Ok(Json(CartView::of(s.carts.refresh_cart(&owner).await.map_err(service_error)?))),
    }
}

async fn clear_cart(State(s): State<AppState>, Path(owner): Path<String>) -> Result<Json<CartView>, (StatusCode, String)> {
    let owner = OwnerId::new(owner);
    match s.carts.clear_cart(&owner).await.map_err(service_error)? {
        CartOutcome::Updated(cart) => Ok(Json(CartView::of(Some(cart)))),
        CartOutcome::NoChange => Ok(Json(CartView::of(None))),
    }
}

#[derive(Debug, Deserialize)] pub struct CheckoutRequest { pub coupon_code: Option<String> }

async fn checkout(State(s): State<AppState>, Path(owner): Path<String>, Json(r): Json<CheckoutRequest>) -> Result<(StatusCode, Json<digistore::Receipt>), (StatusCode, String)> {
    let receipt = s.carts.checkout(&OwnerId::new(owner), r.coupon_code.as_deref()).await.map_err(service_error)?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

// ---------------------------------------------------------------------------
// Coupons
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)] pub struct PreviewCouponRequest { pub code: String, pub subtotal: Decimal }

#[derive(Debug, Serialize)]
pub struct CouponPreview { pub code: &'static str, pub kind: digistore::CouponKind, pub discount_amount: String, pub formatted_discount: String, pub final_total: String }

async fn preview_coupon(Json(r): Json<PreviewCouponRequest>) -> Result<Json<CouponPreview>, (StatusCode, String)> {
    let coupon = digistore::find_coupon(&r.code).await
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("\"{}\" is not a valid coupon code. Try {}.", r.code.trim(), digistore::registry()[0].code)))?;
    Ok(Json(CouponPreview {
        code: coupon.code,
        kind: coupon.kind,
        discount_amount: digistore::format_amount(coupon.discount_amount(r.subtotal)),
        formatted_discount: coupon.formatted_discount(r.subtotal),
        final_total: coupon.final_total(r.subtotal),
    }))
}
