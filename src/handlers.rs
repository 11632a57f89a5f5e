use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    AppState,
    errors::{AppError, AppResult},
    lifecycle::{Actor, BorrowCommand, BorrowOutcome, ReturnReceipt},
    models::{
        Book, BookListing, BorrowDetails, BorrowRecord, BorrowRequestBody, BorrowStatus, CreateBookRequest,
        LoginRequest, RegisterRequest, Role, SearchQuery, StatusQuery, TokenResponse, User, UserResponse,
    },
    notifications::{self, Audience, NotificationFeed},
    ranking::{self, LeaderboardEntry},
    store::{DashboardCounts, RecordFilter},
    utils::{create_jwt_tokens, hash_password, verify_password},
};

/// Health check endpoint.
#[must_use]
#[allow(clippy::unused_async)]
pub async fn health_check() -> &'static str { "OK" }

/// Register a new reader account.
///
/// # Errors
/// Returns validation errors, hashing errors, conflicts on a taken e-mail, or database errors.
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<UserResponse>)> {
    let payload = payload.normalized();
    payload
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let RegisterRequest { name, email, password } = payload;
    let role = if state.config.bootstrap_admin_email.as_deref() == Some(email.as_str()) {
        Role::Admin
    } else {
        Role::Reader
    };
    let password_hash = hash_password(&password)?;

    let user = User::new(name, email, password_hash, role, state.engine.now());
    state.store.insert_user(&user).await?;
    tracing::info!(user_id = %user.id, role = ?user.role, "account registered");

    Ok((StatusCode::CREATED, Json(user.into())))
}

/// Authenticate a user and return JWT tokens.
///
/// # Errors
/// Returns validation, invalid credentials, or database errors.
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<(StatusCode, Json<TokenResponse>)> {
    payload
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let user = state
        .store
        .find_user_by_email(&payload.email.trim().to_lowercase())
        .await?
        .ok_or(AppError::InvalidCredentials)?;

    if !verify_password(&payload.password, &user.password_hash)? {
        return Err(AppError::InvalidCredentials);
    }

    let (access, refresh) = create_jwt_tokens(user.id, user.role, &state.config)?;
    Ok((
        StatusCode::OK,
        Json(TokenResponse {
            access_token: access,
            refresh_token: refresh,
        }),
    ))
}

/// Refresh JWT tokens using a refresh token. The role is re-read from the account.
///
/// # Errors
/// Returns unauthorized errors, token decoding errors or database errors.
pub async fn refresh_token(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TokenResponse>,
) -> AppResult<Json<TokenResponse>> {
    let claims = crate::utils::decode_jwt(&body.refresh_token, &state.config)?;
    if !claims.refresh { return Err(AppError::Unauthorized); }
    let user = state.store.find_user(claims.sub).await?.ok_or(AppError::Unauthorized)?;
    let (access, refresh) = create_jwt_tokens(user.id, user.role, &state.config)?;
    Ok(Json(TokenResponse { access_token: access, refresh_token: refresh }))
}

/// The caller's own account, including points.
///
/// # Errors
/// Returns not found or database errors.
pub async fn me(
    State(state): State<Arc<AppState>>,
    axum::Extension(actor): axum::Extension<Actor>,
) -> AppResult<Json<UserResponse>> {
    let user = state.store.find_user(actor.user_id).await?.ok_or(AppError::NotFound("user"))?;
    Ok(Json(user.into()))
}

/// List the catalogue, flagging entries the caller already has an open request for.
///
/// # Errors
/// Returns database errors.
pub async fn list_books(
    State(state): State<Arc<AppState>>,
    axum::Extension(actor): axum::Extension<Actor>,
    Query(query): Query<SearchQuery>,
) -> AppResult<Json<Vec<BookListing>>> {
    let books = state.store.list_books(query.search.as_deref()).await?;
    let open = RecordFilter {
        user_id: Some(actor.user_id),
        statuses: vec![BorrowStatus::Pending, BorrowStatus::Approved],
        limit: None,
    };
    let requested: Vec<Uuid> = state
        .store
        .list_borrows(&open)
        .await?
        .into_iter()
        .map(|b| b.record.book_id)
        .collect();

    let resp = books
        .into_iter()
        .map(|book| BookListing { requested_by_me: requested.contains(&book.id), book })
        .collect();
    Ok(Json(resp))
}

/// Add a catalogue entry.
///
/// # Errors
/// Returns validation errors, conflicts on a duplicate ISBN, or database errors.
pub async fn create_book(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateBookRequest>,
) -> AppResult<(StatusCode, Json<Book>)> {
    payload
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let book = Book::new(payload, state.engine.now());
    state.store.insert_book(&book).await?;
    tracing::info!(book_id = %book.id, isbn = %book.isbn, "book added to catalogue");
    Ok((StatusCode::CREATED, Json(book)))
}

/// Get a single book by id.
///
/// # Errors
/// Returns not found or database errors.
pub async fn get_book(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Book>> {
    let book = state.store.find_book(id).await?.ok_or(AppError::NotFound("book"))?;
    Ok(Json(book))
}

/// Ask to borrow a book.
///
/// # Errors
/// Returns not found, conflict or database errors.
pub async fn request_borrow(
    State(state): State<Arc<AppState>>,
    axum::Extension(actor): axum::Extension<Actor>,
    Json(body): Json<BorrowRequestBody>,
) -> AppResult<(StatusCode, Json<BorrowRecord>)> {
    let record = state.engine.request(&actor, body.book_id).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// Run any lifecycle command; the engine enforces who may do what.
///
/// # Errors
/// Returns the mapped lifecycle error.
pub async fn transition_borrow(
    State(state): State<Arc<AppState>>,
    axum::Extension(actor): axum::Extension<Actor>,
    Json(command): Json<BorrowCommand>,
) -> AppResult<Json<BorrowOutcome>> {
    let outcome = state.engine.execute(&actor, command).await?;
    Ok(Json(outcome))
}

/// Books the caller currently has out, most recently approved first.
///
/// # Errors
/// Returns database errors.
pub async fn my_borrows(
    State(state): State<Arc<AppState>>,
    axum::Extension(actor): axum::Extension<Actor>,
) -> AppResult<Json<Vec<BorrowDetails>>> {
    let filter = RecordFilter::with_status(BorrowStatus::Approved).for_user(actor.user_id);
    let mut borrows = state.store.list_borrows(&filter).await?;
    borrows.sort_by(|a, b| b.record.approved_at.cmp(&a.record.approved_at));
    Ok(Json(borrows))
}

/// Return one of the caller's borrowed books.
///
/// # Errors
/// Returns not found, forbidden, invalid state or database errors.
pub async fn return_borrow(
    State(state): State<Arc<AppState>>,
    axum::Extension(actor): axum::Extension<Actor>,
    Path(record_id): Path<Uuid>,
) -> AppResult<Json<ReturnReceipt>> {
    let receipt = state.engine.return_book(&actor, record_id, None).await?;
    Ok(Json(receipt))
}

/// The caller's returned borrows, most recent return first.
///
/// # Errors
/// Returns database errors.
pub async fn my_history(
    State(state): State<Arc<AppState>>,
    axum::Extension(actor): axum::Extension<Actor>,
) -> AppResult<Json<Vec<BorrowDetails>>> {
    let filter = RecordFilter::with_status(BorrowStatus::Returned).for_user(actor.user_id);
    let mut history = state.store.list_borrows(&filter).await?;
    history.sort_by(|a, b| b.record.returned_at.cmp(&a.record.returned_at));
    Ok(Json(history))
}

/// Reader leaderboard.
///
/// # Errors
/// Returns database errors.
pub async fn leaderboard(State(state): State<Arc<AppState>>) -> AppResult<Json<Vec<LeaderboardEntry>>> {
    let board = ranking::leaderboard(state.store.as_ref()).await?;
    Ok(Json(board))
}

/// Due-date alerts for the caller's own borrows.
///
/// # Errors
/// Returns database errors.
pub async fn my_notifications(
    State(state): State<Arc<AppState>>,
    axum::Extension(actor): axum::Extension<Actor>,
) -> AppResult<Json<NotificationFeed>> {
    let feed = notifications::feed(
        state.store.as_ref(),
        Audience::Reader(actor.user_id),
        state.engine.now(),
        state.engine.offset(),
    )
    .await?;
    Ok(Json(feed))
}

/// Due-date alerts across the library plus recent pending requests.
///
/// # Errors
/// Returns database errors.
pub async fn admin_notifications(State(state): State<Arc<AppState>>) -> AppResult<Json<NotificationFeed>> {
    let feed = notifications::feed(
        state.store.as_ref(),
        Audience::Admin,
        state.engine.now(),
        state.engine.offset(),
    )
    .await?;
    Ok(Json(feed))
}

/// All borrow requests, optionally filtered by status, newest first.
///
/// # Errors
/// Returns database errors.
pub async fn list_borrow_requests(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatusQuery>,
) -> AppResult<Json<Vec<BorrowDetails>>> {
    let filter = query.status.map(RecordFilter::with_status).unwrap_or_default();
    let requests = state.store.list_borrows(&filter).await?;
    Ok(Json(requests))
}

/// Catalogue and circulation counters.
///
/// # Errors
/// Returns database errors.
pub async fn dashboard(State(state): State<Arc<AppState>>) -> AppResult<Json<DashboardCounts>> {
    let counts = state.store.dashboard_counts(state.engine.now()).await?;
    Ok(Json(counts))
}
