//! Payout destination onboarding and bank-link routes.

use std::sync::Arc;

use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};

use crate::api::AppState;
use crate::auth::CurrentUser;
use crate::banking::{self, BankAccount, BankLinkProvider, LinkToken};
use crate::error::{BillingError, BillingResult};
use crate::models::bank_link::BankLink;
use crate::models::payout::PayoutDestination;
use crate::payouts::destination;

#[derive(Debug, Serialize)]
pub struct DestinationResponse {
    pub destination: Option<PayoutDestination>,
    pub ready: bool,
}

#[derive(Debug, Serialize)]
pub struct OnboardingResponse {
    pub destination: PayoutDestination,
    pub onboarding_url: String,
}

#[derive(Debug, Deserialize)]
pub struct ExchangeRequest {
    pub public_token: String,
}

fn bank_link(state: &AppState) -> BillingResult<&Arc<dyn BankLinkProvider>> {
    state
        .bank_link
        .as_ref()
        .ok_or(BillingError::Unavailable("bank linking"))
}

pub async fn get_destination(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> BillingResult<Json<DestinationResponse>> {
    let destination = destination::find_destination(&state.db, user_id).await?;
    let ready = destination.as_ref().map(|d| d.is_ready()).unwrap_or(false);
    Ok(Json(DestinationResponse { destination, ready }))
}

pub async fn setup_destination(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> BillingResult<Json<OnboardingResponse>> {
    let (destination, link) = destination::setup_destination(
        &state.db,
        state.collector.processor().as_ref(),
        user_id,
        &state.settings.onboarding_return_url,
    )
    .await?;
    Ok(Json(OnboardingResponse {
        destination,
        onboarding_url: link.url,
    }))
}

pub async fn refresh_destination(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> BillingResult<Json<PayoutDestination>> {
    let destination =
        destination::refresh_destination(&state.db, state.collector.processor().as_ref(), user_id).await?;
    Ok(Json(destination))
}

pub async fn create_link_token(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> BillingResult<Json<LinkToken>> {
    let provider = bank_link(&state)?;
    Ok(Json(provider.create_link_token(user_id).await?))
}

pub async fn exchange_public_token(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(request): Json<ExchangeRequest>,
) -> BillingResult<Json<BankLink>> {
    let provider = bank_link(&state)?;
    let link = banking::exchange_and_store(&state.db, provider.as_ref(), user_id, &request.public_token).await?;
    Ok(Json(link))
}

pub async fn bank_accounts(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> BillingResult<Json<Vec<BankAccount>>> {
    let provider = bank_link(&state)?;
    Ok(Json(banking::refresh_accounts(&state.db, provider.as_ref(), user_id).await?))
}
