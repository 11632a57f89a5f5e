use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Reader,
    Admin,
}

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub points: i64,
    pub created_at: DateTime<Utc>,
}

impl User {
    #[must_use]
    pub fn new(name: String, email: String, password_hash: String, role: Role, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            email,
            password_hash,
            role,
            points: 0,
            created_at: now,
        }
    }
}

/// Availability of a catalogue entry. Each entry is a single lendable copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "book_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BookStatus {
    Available,
    Borrowed,
}

#[derive(sqlx::FromRow, Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Book {
    pub id: Uuid,
    pub isbn: String,
    pub title: String,
    pub author: String,
    pub category: String,
    pub published_date: String,
    pub status: BookStatus,
    pub borrowed_by: Option<Uuid>,
    pub borrowed_at: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Book {
    #[must_use]
    pub fn new(payload: CreateBookRequest, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            isbn: payload.isbn,
            title: payload.title,
            author: payload.author,
            category: payload.category,
            published_date: payload.published_date,
            status: BookStatus::Available,
            borrowed_by: None,
            borrowed_at: None,
            due_date: None,
            created_at: now,
        }
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        self.status == BookStatus::Available
    }

    /// Mark the copy as lent out; borrower and due date always travel with `Borrowed`.
    pub fn lend(&mut self, borrower: Uuid, at: DateTime<Utc>, due_date: DateTime<Utc>) {
        self.status = BookStatus::Borrowed;
        self.borrowed_by = Some(borrower);
        self.borrowed_at = Some(at);
        self.due_date = Some(due_date);
    }

    pub fn release(&mut self) {
        self.status = BookStatus::Available;
        self.borrowed_by = None;
        self.borrowed_at = None;
        self.due_date = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "borrow_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BorrowStatus {
    Pending,
    Approved,
    Rejected,
    Returned,
}

impl BorrowStatus {
    /// Pending and approved requests block a second request for the same book.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Approved)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Returned => "returned",
        }
    }
}

impl fmt::Display for BorrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(sqlx::FromRow, Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BorrowRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub book_id: Uuid,
    pub status: BorrowStatus,
    pub requested_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub returned_at: Option<DateTime<Utc>>,
    pub days_late: i64,
    pub late_fee: i64,
    pub notes: Option<String>,
}

impl BorrowRecord {
    #[must_use]
    pub fn pending(user_id: Uuid, book_id: Uuid, requested_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            book_id,
            status: BorrowStatus::Pending,
            requested_at,
            approved_at: None,
            due_date: None,
            returned_at: None,
            days_late: 0,
            late_fee: 0,
            notes: None,
        }
    }
}

/// A borrow record joined with the names needed to display it.
#[derive(sqlx::FromRow, Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BorrowDetails {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub record: BorrowRecord,
    pub book_title: String,
    pub borrower_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: Role,
    pub exp: usize,
    pub refresh: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8))]
    pub password: String,
}

impl RegisterRequest {
    /// Trim the name and lower-case the e-mail so validation sees what gets stored.
    #[must_use]
    pub fn normalized(self) -> Self {
        Self {
            name: self.name.trim().to_string(),
            email: self.email.trim().to_lowercase(),
            password: self.password,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub points: i64,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            role: user.role,
            points: user.points,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8))]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateBookRequest {
    #[validate(length(min = 1))]
    pub title: String,
    #[validate(length(min = 1))]
    pub author: String,
    #[validate(length(min = 1))]
    pub category: String,
    #[validate(length(min = 4))]
    pub published_date: String,
    #[validate(length(min = 10, max = 17))]
    pub isbn: String,
}

/// Catalogue entry as seen by a reader.
#[derive(Debug, Serialize)]
pub struct BookListing {
    #[serde(flatten)]
    pub book: Book,
    pub requested_by_me: bool,
}

#[derive(Debug, Deserialize)]
pub struct BorrowRequestBody {
    pub book_id: Uuid,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    pub search: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusQuery {
    pub status: Option<BorrowStatus>,
}
