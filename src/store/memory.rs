use std::{
    collections::HashMap,
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{DashboardCounts, LibraryStore, RecordFilter, ReturnTally, StoreError, StoreTx};
use crate::models::{Book, BookStatus, BorrowDetails, BorrowRecord, BorrowStatus, Role, User};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    users: HashMap<Uuid, User>,
    books: HashMap<Uuid, Book>,
    records: HashMap<Uuid, BorrowRecord>,
}

impl MemoryState {
    fn has_active_request(&self, user_id: Uuid, book_id: Uuid) -> bool {
        self.records
            .values()
            .any(|r| r.user_id == user_id && r.book_id == book_id && r.status.is_active())
    }

    fn details(&self, record: &BorrowRecord) -> BorrowDetails {
        BorrowDetails {
            record: record.clone(),
            book_title: self
                .books
                .get(&record.book_id)
                .map(|b| b.title.clone())
                .unwrap_or_default(),
            borrower_name: self
                .users
                .get(&record.user_id)
                .map(|u| u.name.clone())
                .unwrap_or_default(),
        }
    }
}

/// Process-local store. A transaction holds the lock for its whole lifetime and
/// works on a staged copy that replaces the live state on commit.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LibraryStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryTx { guard, staged }))
    }

    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Duplicate("email"));
        }
        state.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn find_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.state.lock().await.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.users.values().find(|u| u.email == email).cloned())
    }

    async fn list_readers(&self) -> Result<Vec<User>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .values()
            .filter(|u| u.role == Role::Reader)
            .cloned()
            .collect())
    }

    async fn insert_book(&self, book: &Book) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.books.values().any(|b| b.isbn == book.isbn) {
            return Err(StoreError::Duplicate("isbn"));
        }
        state.books.insert(book.id, book.clone());
        Ok(())
    }

    async fn find_book(&self, id: Uuid) -> Result<Option<Book>, StoreError> {
        Ok(self.state.lock().await.books.get(&id).cloned())
    }

    async fn list_books(&self, search: Option<&str>) -> Result<Vec<Book>, StoreError> {
        let needle = search
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);
        let state = self.state.lock().await;
        let mut books: Vec<Book> = state
            .books
            .values()
            .filter(|b| {
                needle.as_deref().is_none_or(|n| {
                    [&b.title, &b.author, &b.category]
                        .iter()
                        .any(|field| field.to_lowercase().contains(n))
                })
            })
            .cloned()
            .collect();
        books.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(books)
    }

    async fn list_borrows(&self, filter: &RecordFilter) -> Result<Vec<BorrowDetails>, StoreError> {
        let state = self.state.lock().await;
        let mut rows: Vec<BorrowDetails> = state
            .records
            .values()
            .filter(|r| filter.matches(r))
            .map(|r| state.details(r))
            .collect();
        rows.sort_by(|a, b| b.record.requested_at.cmp(&a.record.requested_at));
        if let Some(limit) = filter.limit {
            rows.truncate(usize::try_from(limit).unwrap_or(0));
        }
        Ok(rows)
    }

    async fn return_tallies(&self) -> Result<Vec<ReturnTally>, StoreError> {
        let state = self.state.lock().await;
        let mut tallies: HashMap<Uuid, ReturnTally> = HashMap::new();
        for record in state.records.values().filter(|r| r.status == BorrowStatus::Returned) {
            let tally = tallies.entry(record.user_id).or_insert_with(|| ReturnTally {
                user_id: record.user_id,
                ..ReturnTally::default()
            });
            tally.total += 1;
            if record.days_late > 0 {
                tally.late += 1;
            } else {
                tally.on_time += 1;
            }
        }
        Ok(tallies.into_values().collect())
    }

    async fn dashboard_counts(&self, now: DateTime<Utc>) -> Result<DashboardCounts, StoreError> {
        let state = self.state.lock().await;
        let count = |n: usize| i64::try_from(n).unwrap_or(i64::MAX);
        Ok(DashboardCounts {
            total_books: count(state.books.len()),
            borrowed_books: count(state.books.values().filter(|b| b.status == BookStatus::Borrowed).count()),
            pending_requests: count(
                state.records.values().filter(|r| r.status == BorrowStatus::Pending).count(),
            ),
            overdue_borrows: count(
                state
                    .records
                    .values()
                    .filter(|r| r.status == BorrowStatus::Approved && r.due_date.is_some_and(|d| d < now))
                    .count(),
            ),
            readers: count(state.users.values().filter(|u| u.role == Role::Reader).count()),
        })
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn lock_book(&mut self, id: Uuid) -> Result<Option<Book>, StoreError> {
        Ok(self.staged.books.get(&id).cloned())
    }

    async fn lock_record(&mut self, id: Uuid) -> Result<Option<BorrowRecord>, StoreError> {
        Ok(self.staged.records.get(&id).cloned())
    }

    async fn has_active_request(&mut self, user_id: Uuid, book_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.staged.has_active_request(user_id, book_id))
    }

    async fn insert_record(&mut self, record: &BorrowRecord) -> Result<(), StoreError> {
        if record.status.is_active() && self.staged.has_active_request(record.user_id, record.book_id) {
            return Err(StoreError::Duplicate("active borrow request"));
        }
        self.staged.records.insert(record.id, record.clone());
        Ok(())
    }

    async fn update_record(&mut self, record: &BorrowRecord) -> Result<(), StoreError> {
        self.staged.records.insert(record.id, record.clone());
        Ok(())
    }

    async fn update_book(&mut self, book: &Book) -> Result<(), StoreError> {
        self.staged.books.insert(book.id, book.clone());
        Ok(())
    }

    async fn add_points(&mut self, user_id: Uuid, delta: i64) -> Result<Option<i64>, StoreError> {
        Ok(self.staged.users.get_mut(&user_id).map(|user| {
            user.points += delta;
            user.points
        }))
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let Self { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }
}
