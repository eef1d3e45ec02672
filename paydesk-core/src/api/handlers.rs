use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::accounts;
use crate::api::AppState;
use crate::auth::CurrentUser;
use crate::clients;
use crate::error::BillingResult;
use crate::invoices;
use crate::models::client::{Client, NewClient};
use crate::models::invoice::{Invoice, InvoiceDetail, NewInvoice, StatusUpdate};
use crate::models::user::{CreateUser, Credentials, UserResponse};
use crate::payments::PayableReference;

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserResponse,
}

pub async fn register(
    State(state): State<AppState>,
    Json(input): Json<CreateUser>,
) -> BillingResult<(StatusCode, Json<AuthResponse>)> {
    let user = accounts::register(&state.db, input, state.settings.free_plan_invoice_cap).await?;
    let token = state.tokens.issue(user.id)?;
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            token,
            user: user.into(),
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(credentials): Json<Credentials>,
) -> BillingResult<Json<AuthResponse>> {
    let user = accounts::authenticate(&state.db, credentials).await?;
    let token = state.tokens.issue(user.id)?;
    info!(user_id = %user.id, "User logged in");
    Ok(Json(AuthResponse {
        token,
        user: user.into(),
    }))
}

pub async fn list_clients(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> BillingResult<Json<Vec<Client>>> {
    Ok(Json(clients::list_clients(&state.db, user_id).await?))
}

pub async fn create_client(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(input): Json<NewClient>,
) -> BillingResult<(StatusCode, Json<Client>)> {
    let client = clients::create_client(&state.db, user_id, &input).await?;
    Ok((StatusCode::CREATED, Json(client)))
}

pub async fn get_client(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(client_id): Path<Uuid>,
) -> BillingResult<Json<Client>> {
    Ok(Json(clients::get_client(&state.db, user_id, client_id).await?))
}

/// Archives the client. Clients with invoices are never hard-deleted.
pub async fn archive_client(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(client_id): Path<Uuid>,
) -> BillingResult<Json<Client>> {
    Ok(Json(clients::archive_client(&state.db, user_id, client_id).await?))
}

pub async fn list_invoices(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> BillingResult<Json<Vec<Invoice>>> {
    Ok(Json(invoices::list_invoices(&state.db, user_id).await?))
}

pub async fn create_invoice(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(input): Json<NewInvoice>,
) -> BillingResult<(StatusCode, Json<InvoiceDetail>)> {
    let detail = invoices::create_invoice(&state.db, user_id, input).await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(invoice_id): Path<Uuid>,
) -> BillingResult<Json<InvoiceDetail>> {
    Ok(Json(invoices::get_invoice(&state.db, user_id, invoice_id).await?))
}

pub async fn update_status(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(invoice_id): Path<Uuid>,
    Json(update): Json<StatusUpdate>,
) -> BillingResult<Json<Invoice>> {
    let invoice = invoices::transition_status(&state.db, user_id, invoice_id, update.status).await?;
    Ok(Json(invoice))
}

pub async fn send_invoice(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(invoice_id): Path<Uuid>,
) -> BillingResult<Json<Invoice>> {
    let invoice = invoices::send_invoice(
        &state.db,
        state.mailer.as_ref(),
        &state.settings.sender_name,
        user_id,
        invoice_id,
        state.settings.external_timeout,
    )
    .await?;
    Ok(Json(invoice))
}

pub async fn payment_link(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(invoice_id): Path<Uuid>,
) -> BillingResult<Json<PayableReference>> {
    let reference = state
        .collector
        .collect_for_invoice(&state.db, user_id, invoice_id)
        .await?;
    Ok(Json(reference))
}
