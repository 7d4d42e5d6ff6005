use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result as AnyResult};
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{delete, get, post},
};
use courier_core::time::{format_db, parse_db};
use courier_core::{
    Clock, CommissionHistory, Customer, CustomerProfile, Driver, DriverProfile, LedgerError,
    Neighborhood, NewPayment, Order, OrderDraft, OrderEdit, OrderWithNames, PaymentWithDriverName,
    SystemClock,
};
use courier_platform::{
    AuthError, AuthSession, ChangePasscodeRequest, CreateNeighborhoodRequest,
    CreatePaymentRequest, CreatedResponse, ListResponse, LoadDriverRequest, PasscodePolicy,
    ServiceConfig, SessionPaymentRequest, SessionPaymentResponse, SettleResponse, UnlockRequest,
    UnlockResponse,
};
use courier_reports::{
    ReportPeriod, ReportSummary, calculate_summary, export_file_name, filter_orders,
    write_orders_csv,
};
use courier_settlement::{
    PaymentCap, PaymentRequest, ReconcilerConfig, SessionState, SettlementSession,
};
use courier_store::SqliteLedgerStore;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{error, info};

type ApiError = (StatusCode, String);

#[derive(Clone)]
struct AppState {
    store: Arc<SqliteLedgerStore>,
    clock: Arc<dyn Clock>,
    session: Arc<Mutex<SettlementSession<SqliteLedgerStore>>>,
    auth: Arc<AuthSession>,
}

#[derive(Debug, Clone, Deserialize)]
struct SummaryQuery {
    period: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct SummaryResponse {
    period: ReportPeriod,
    #[serde(flatten)]
    summary: ReportSummary,
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| {
            "courier_gateway=info,courier_settlement=info,courier_store=info".to_string()
        }))
        .init();

    let config = ServiceConfig::from_env("127.0.0.1:8080")?;
    let store = Arc::new(
        SqliteLedgerStore::open(&config.database_url)
            .await
            .context("failed to open the ledger database")?,
    );
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let auth = AuthSession::open(
        Arc::clone(&store),
        Arc::clone(&clock),
        PasscodePolicy::with_iterations(config.passcode_iterations),
    )
    .await
    .context("failed to prepare the passcode gate")?;
    let session = SettlementSession::new(
        Arc::clone(&store),
        Arc::clone(&clock),
        ReconcilerConfig {
            coalesce_window: config.settle_coalesce,
        },
    );

    let state = AppState {
        store,
        clock,
        session: Arc::new(Mutex::new(session)),
        auth: Arc::new(auth),
    };
    let router = build_router(state);

    let addr: SocketAddr = config.http_addr.parse()?;
    info!("gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/drivers", get(list_drivers).post(create_driver))
        .route(
            "/drivers/{driver_id}",
            get(get_driver).put(update_driver).delete(delete_driver),
        )
        .route(
            "/drivers/{driver_id}/commission-history",
            get(commission_history),
        )
        .route("/customers", get(list_customers).post(create_customer))
        .route(
            "/customers/{customer_id}",
            get(get_customer).put(update_customer).delete(delete_customer),
        )
        .route(
            "/neighborhoods",
            get(list_neighborhoods).post(create_neighborhood),
        )
        .route(
            "/neighborhoods/{neighborhood_id}",
            delete(delete_neighborhood),
        )
        .route("/orders", get(list_orders).post(place_order))
        .route(
            "/orders/{order_id}",
            get(get_order).put(update_order).delete(delete_order),
        )
        .route("/payments", get(list_payments).post(create_payment))
        .route("/reports/summary", get(report_summary))
        .route("/exports/orders.csv", get(export_orders))
        .route("/auth/unlock", post(unlock))
        .route("/auth/passcode", post(change_passcode))
        .route("/auth/lock", post(lock))
        .route(
            "/settlement/session",
            get(session_state)
                .post(load_session)
                .delete(unload_session),
        )
        .route("/settlement/session/decline", post(decline_settlement))
        .route("/settlement/session/settle", post(commit_settlement))
        .route("/settlement/session/payments", post(session_payment))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn list_drivers(
    State(state): State<AppState>,
) -> Result<Json<ListResponse<Driver>>, ApiError> {
    let drivers = state.store.list_drivers().await.map_err(ledger_error)?;
    Ok(Json(drivers.into()))
}

async fn create_driver(
    State(state): State<AppState>,
    Json(payload): Json<DriverProfile>,
) -> Result<(StatusCode, Json<CreatedResponse>), ApiError> {
    let id = state
        .store
        .insert_driver(&payload)
        .await
        .map_err(ledger_error)?;
    Ok((StatusCode::CREATED, Json(CreatedResponse { id })))
}

async fn get_driver(
    State(state): State<AppState>,
    Path(driver_id): Path<i64>,
) -> Result<Json<Driver>, ApiError> {
    state
        .store
        .get_driver(driver_id)
        .await
        .map_err(ledger_error)?
        .map(Json)
        .ok_or_else(|| ledger_error(LedgerError::not_found("driver", driver_id)))
}

async fn update_driver(
    State(state): State<AppState>,
    Path(driver_id): Path<i64>,
    Json(payload): Json<DriverProfile>,
) -> Result<Json<Driver>, ApiError> {
    let driver = state
        .store
        .update_driver(driver_id, &payload, &state.clock.now_db())
        .await
        .map_err(ledger_error)?;
    Ok(Json(driver))
}

async fn delete_driver(
    State(state): State<AppState>,
    Path(driver_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state
        .store
        .delete_driver(driver_id)
        .await
        .map_err(ledger_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn commission_history(
    State(state): State<AppState>,
    Path(driver_id): Path<i64>,
) -> Result<Json<ListResponse<CommissionHistory>>, ApiError> {
    let history = state
        .store
        .commission_history(driver_id)
        .await
        .map_err(ledger_error)?;
    Ok(Json(history.into()))
}

async fn list_customers(
    State(state): State<AppState>,
) -> Result<Json<ListResponse<Customer>>, ApiError> {
    let customers = state.store.list_customers().await.map_err(ledger_error)?;
    Ok(Json(customers.into()))
}

async fn create_customer(
    State(state): State<AppState>,
    Json(payload): Json<CustomerProfile>,
) -> Result<(StatusCode, Json<CreatedResponse>), ApiError> {
    let id = state
        .store
        .insert_customer(&payload)
        .await
        .map_err(ledger_error)?;
    Ok((StatusCode::CREATED, Json(CreatedResponse { id })))
}

async fn get_customer(
    State(state): State<AppState>,
    Path(customer_id): Path<i64>,
) -> Result<Json<Customer>, ApiError> {
    state
        .store
        .get_customer(customer_id)
        .await
        .map_err(ledger_error)?
        .map(Json)
        .ok_or_else(|| ledger_error(LedgerError::not_found("customer", customer_id)))
}

async fn update_customer(
    State(state): State<AppState>,
    Path(customer_id): Path<i64>,
    Json(payload): Json<CustomerProfile>,
) -> Result<Json<Customer>, ApiError> {
    let customer = state
        .store
        .update_customer(customer_id, &payload)
        .await
        .map_err(ledger_error)?;
    Ok(Json(customer))
}

async fn delete_customer(
    State(state): State<AppState>,
    Path(customer_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state
        .store
        .delete_customer(customer_id)
        .await
        .map_err(ledger_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_neighborhoods(
    State(state): State<AppState>,
) -> Result<Json<ListResponse<Neighborhood>>, ApiError> {
    let neighborhoods = state
        .store
        .list_neighborhoods()
        .await
        .map_err(ledger_error)?;
    Ok(Json(neighborhoods.into()))
}

async fn create_neighborhood(
    State(state): State<AppState>,
    Json(payload): Json<CreateNeighborhoodRequest>,
) -> Result<(StatusCode, Json<CreatedResponse>), ApiError> {
    let id = state
        .store
        .insert_neighborhood(&payload.name)
        .await
        .map_err(ledger_error)?;
    Ok((StatusCode::CREATED, Json(CreatedResponse { id })))
}

async fn delete_neighborhood(
    State(state): State<AppState>,
    Path(neighborhood_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state
        .store
        .delete_neighborhood(neighborhood_id)
        .await
        .map_err(ledger_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_orders(
    State(state): State<AppState>,
) -> Result<Json<ListResponse<OrderWithNames>>, ApiError> {
    let orders = state
        .store
        .list_orders_with_names()
        .await
        .map_err(ledger_error)?;
    Ok(Json(orders.into()))
}

async fn place_order(
    State(state): State<AppState>,
    Json(payload): Json<OrderDraft>,
) -> Result<(StatusCode, Json<CreatedResponse>), ApiError> {
    let id = state
        .store
        .place_order(&payload, &state.clock.now_db())
        .await
        .map_err(ledger_error)?;
    Ok((StatusCode::CREATED, Json(CreatedResponse { id })))
}

async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<i64>,
) -> Result<Json<OrderWithNames>, ApiError> {
    state
        .store
        .get_order(order_id)
        .await
        .map_err(ledger_error)?
        .map(Json)
        .ok_or_else(|| ledger_error(LedgerError::not_found("order", order_id)))
}

async fn update_order(
    State(state): State<AppState>,
    Path(order_id): Path<i64>,
    Json(payload): Json<OrderEdit>,
) -> Result<Json<Order>, ApiError> {
    let order = state
        .store
        .update_order(order_id, &payload)
        .await
        .map_err(ledger_error)?;
    Ok(Json(order))
}

async fn delete_order(
    State(state): State<AppState>,
    Path(order_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state
        .store
        .delete_order(order_id)
        .await
        .map_err(ledger_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_payments(
    State(state): State<AppState>,
) -> Result<Json<ListResponse<PaymentWithDriverName>>, ApiError> {
    let payments = state
        .store
        .list_payments_with_driver()
        .await
        .map_err(ledger_error)?;
    Ok(Json(payments.into()))
}

async fn create_payment(
    State(state): State<AppState>,
    Json(payload): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<CreatedResponse>), ApiError> {
    let date_time = match payload.date_time {
        Some(raw) => {
            let at = parse_db(&raw).ok_or_else(|| {
                ledger_error(LedgerError::validation(
                    "date_time must use yyyy-MM-dd HH:mm:ss",
                ))
            })?;
            format_db(at)
        }
        None => state.clock.now_db(),
    };

    let id = state
        .store
        .insert_payment(&NewPayment {
            driver_id: payload.driver_id,
            amount: payload.amount,
            method: payload.method,
            date_time,
        })
        .await
        .map_err(ledger_error)?;
    Ok((StatusCode::CREATED, Json(CreatedResponse { id })))
}

async fn report_summary(
    State(state): State<AppState>,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<SummaryResponse>, ApiError> {
    let period = match query.period.as_deref() {
        Some(raw) => raw.parse::<ReportPeriod>().map_err(ledger_error)?,
        None => ReportPeriod::Today,
    };

    let orders = state.store.list_orders().await.map_err(ledger_error)?;
    let drivers = state.store.list_drivers().await.map_err(ledger_error)?;
    let in_period = filter_orders(&orders, period, state.clock.now());
    let summary = calculate_summary(in_period, &drivers)
        .map_err(|err| ledger_error(LedgerError::from(err)))?;

    Ok(Json(SummaryResponse { period, summary }))
}

async fn export_orders(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let orders = state
        .store
        .list_orders_with_names()
        .await
        .map_err(ledger_error)?;

    let mut body = Vec::new();
    write_orders_csv(&mut body, &orders).map_err(internal_error)?;
    let file_name = export_file_name(state.clock.now());
    info!(orders = orders.len(), %file_name, "orders exported");

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        body,
    ))
}

async fn unlock(
    State(state): State<AppState>,
    Json(payload): Json<UnlockRequest>,
) -> Result<Json<UnlockResponse>, ApiError> {
    let outcome = state
        .auth
        .unlock(&payload.passcode)
        .await
        .map_err(auth_error)?;
    Ok(Json(UnlockResponse {
        authenticated: true,
        needs_change: outcome.needs_change,
    }))
}

async fn change_passcode(
    State(state): State<AppState>,
    Json(payload): Json<ChangePasscodeRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .auth
        .change_passcode(&payload.current_passcode, &payload.new_passcode)
        .await
        .map_err(auth_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn lock(State(state): State<AppState>) -> StatusCode {
    state.auth.lock();
    state.session.lock().await.unload();
    StatusCode::NO_CONTENT
}

async fn session_state(State(state): State<AppState>) -> Result<Json<SessionState>, ApiError> {
    require_unlocked(&state)?;
    Ok(Json(state.session.lock().await.state()))
}

async fn load_session(
    State(state): State<AppState>,
    Json(payload): Json<LoadDriverRequest>,
) -> Result<Json<SessionState>, ApiError> {
    require_unlocked(&state)?;
    let mut session = state.session.lock().await;
    session
        .load_driver(payload.driver_id)
        .await
        .map_err(ledger_error)?;
    Ok(Json(session.state()))
}

async fn unload_session(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    require_unlocked(&state)?;
    state.session.lock().await.unload();
    Ok(StatusCode::NO_CONTENT)
}

async fn decline_settlement(
    State(state): State<AppState>,
) -> Result<Json<SessionState>, ApiError> {
    require_unlocked(&state)?;
    let session = state.session.lock().await;
    if !session.decline_settlement() {
        return Err((
            StatusCode::CONFLICT,
            "no settlement is being offered".to_string(),
        ));
    }
    Ok(Json(session.state()))
}

async fn commit_settlement(
    State(state): State<AppState>,
) -> Result<Json<SettleResponse>, ApiError> {
    require_unlocked(&state)?;
    let settled_orders = state
        .session
        .lock()
        .await
        .commit_settlement()
        .await
        .map_err(ledger_error)?;
    Ok(Json(SettleResponse { settled_orders }))
}

async fn session_payment(
    State(state): State<AppState>,
    Json(payload): Json<SessionPaymentRequest>,
) -> Result<(StatusCode, Json<SessionPaymentResponse>), ApiError> {
    require_unlocked(&state)?;
    let session = state.session.lock().await;

    let cap = if payload.cap_to_balance {
        PaymentCap::CurrentBalance
    } else {
        PaymentCap::Unbounded
    };
    let receipt = session
        .record_payment(PaymentRequest {
            amount: payload.amount,
            method: payload.method,
            cap,
        })
        .await
        .map_err(ledger_error)?;

    let mut response = SessionPaymentResponse {
        receipt,
        settled_orders: None,
        settlement_error: None,
    };
    if payload.settle_when_cleared && receipt.clears_balance {
        match session.commit_settlement().await {
            Ok(rows) => response.settled_orders = Some(rows),
            Err(err) => {
                error!(payment_id = receipt.payment_id, "settlement after payment failed: {err:#}");
                response.settlement_error = Some(err.to_string());
            }
        }
    }

    Ok((StatusCode::CREATED, Json(response)))
}

fn require_unlocked(state: &AppState) -> Result<(), ApiError> {
    if state.auth.is_authenticated() {
        Ok(())
    } else {
        Err((StatusCode::UNAUTHORIZED, "unlock required".to_string()))
    }
}

fn ledger_error(err: LedgerError) -> ApiError {
    let status = match &err {
        LedgerError::Validation(_) => StatusCode::BAD_REQUEST,
        LedgerError::Conflict(_) | LedgerError::Referenced { .. } => StatusCode::CONFLICT,
        LedgerError::NotFound { .. } => StatusCode::NOT_FOUND,
        LedgerError::Money(_) => StatusCode::UNPROCESSABLE_ENTITY,
        LedgerError::Storage(_) => {
            error!("storage failure: {err:#}");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, err.to_string())
}

fn auth_error(err: AuthError) -> ApiError {
    match err {
        AuthError::Ledger(err) => ledger_error(err),
        AuthError::Rejected { .. } => (StatusCode::UNAUTHORIZED, err.to_string()),
        AuthError::LockedOut { .. } => (StatusCode::LOCKED, err.to_string()),
        AuthError::TooShort => (StatusCode::BAD_REQUEST, err.to_string()),
        AuthError::CorruptCredential | AuthError::Hashing(_) => {
            error!("passcode gate failure: {err:#}");
            internal_error(err)
        }
    }
}

fn internal_error<E: std::fmt::Display>(err: E) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}
