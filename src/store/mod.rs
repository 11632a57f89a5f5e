//! Persistence for catalogue entries, borrow records and reader accounts.
//!
//! Reads go straight through [`LibraryStore`]. Every lifecycle transition runs
//! inside a [`StoreTx`]: rows read through it stay locked until the transaction
//! ends, and nothing written through it is visible unless [`StoreTx::commit`]
//! succeeds. Dropping a transaction rolls it back.

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Book, BorrowDetails, BorrowRecord, BorrowStatus, User};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error")]
    Database(#[from] sqlx::Error),
    #[error("duplicate {0}")]
    Duplicate(&'static str),
}

/// Which borrow records a listing returns. Results are newest request first.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub user_id: Option<Uuid>,
    /// Empty means every status.
    pub statuses: Vec<BorrowStatus>,
    pub limit: Option<i64>,
}

impl RecordFilter {
    #[must_use]
    pub fn with_status(status: BorrowStatus) -> Self {
        Self {
            statuses: vec![status],
            ..Self::default()
        }
    }

    #[must_use]
    pub fn for_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn matches(&self, record: &BorrowRecord) -> bool {
        self.user_id.is_none_or(|id| id == record.user_id)
            && (self.statuses.is_empty() || self.statuses.contains(&record.status))
    }
}

/// Completed borrows of one user, split by punctuality.
#[derive(Debug, Clone, Default, PartialEq, Eq, sqlx::FromRow)]
pub struct ReturnTally {
    pub user_id: Uuid,
    pub total: i64,
    pub on_time: i64,
    pub late: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct DashboardCounts {
    pub total_books: i64,
    pub borrowed_books: i64,
    pub pending_requests: i64,
    pub overdue_borrows: i64,
    pub readers: i64,
}

#[async_trait]
pub trait LibraryStore: Send + Sync {
    /// Open a unit of work for a lifecycle transition.
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;

    async fn insert_user(&self, user: &User) -> Result<(), StoreError>;
    async fn find_user(&self, id: Uuid) -> Result<Option<User>, StoreError>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn list_readers(&self) -> Result<Vec<User>, StoreError>;

    async fn insert_book(&self, book: &Book) -> Result<(), StoreError>;
    async fn find_book(&self, id: Uuid) -> Result<Option<Book>, StoreError>;
    /// Newest first; `search` matches title, author or category, case-insensitively.
    async fn list_books(&self, search: Option<&str>) -> Result<Vec<Book>, StoreError>;

    async fn list_borrows(&self, filter: &RecordFilter) -> Result<Vec<BorrowDetails>, StoreError>;
    /// One row per user with at least one returned borrow.
    async fn return_tallies(&self) -> Result<Vec<ReturnTally>, StoreError>;
    async fn dashboard_counts(&self, now: DateTime<Utc>) -> Result<DashboardCounts, StoreError>;
}

#[async_trait]
pub trait StoreTx: Send {
    async fn lock_book(&mut self, id: Uuid) -> Result<Option<Book>, StoreError>;
    async fn lock_record(&mut self, id: Uuid) -> Result<Option<BorrowRecord>, StoreError>;
    /// Whether `user_id` holds a pending or approved request for `book_id`.
    async fn has_active_request(&mut self, user_id: Uuid, book_id: Uuid) -> Result<bool, StoreError>;

    async fn insert_record(&mut self, record: &BorrowRecord) -> Result<(), StoreError>;
    async fn update_record(&mut self, record: &BorrowRecord) -> Result<(), StoreError>;
    async fn update_book(&mut self, book: &Book) -> Result<(), StoreError>;
    /// Adds `delta` to the user's points and returns the new total, `None` for an unknown user.
    async fn add_points(&mut self, user_id: Uuid, delta: i64) -> Result<Option<i64>, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
