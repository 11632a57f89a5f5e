use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{DashboardCounts, LibraryStore, RecordFilter, ReturnTally, StoreError, StoreTx};
use crate::models::{Book, BorrowDetails, BorrowRecord, User};

const USER_COLUMNS: &str = "id, name, email, password_hash, role, points, created_at";
const BOOK_COLUMNS: &str = "id, isbn, title, author, category, published_date, status, borrowed_by, borrowed_at, due_date, created_at";
const RECORD_COLUMNS: &str = "id, user_id, book_id, status, requested_at, approved_at, due_date, returned_at, days_late, late_fee, notes";

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn unique_violation(err: sqlx::Error, what: &'static str) -> StoreError {
    match err {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => StoreError::Duplicate(what),
        other => StoreError::Database(other),
    }
}

fn like_pattern(search: &str) -> String {
    let escaped = search
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

#[async_trait]
impl LibraryStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(&format!("INSERT INTO users ({USER_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)"))
            .bind(user.id)
            .bind(&user.name)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(user.role)
            .bind(user.points)
            .bind(user.created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| unique_violation(e, "email"))?;
        Ok(())
    }

    async fn find_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1"))
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn list_readers(&self) -> Result<Vec<User>, StoreError> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE role = 'reader' ORDER BY points DESC, name ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn insert_book(&self, book: &Book) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO books ({BOOK_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
        ))
        .bind(book.id)
        .bind(&book.isbn)
        .bind(&book.title)
        .bind(&book.author)
        .bind(&book.category)
        .bind(&book.published_date)
        .bind(book.status)
        .bind(book.borrowed_by)
        .bind(book.borrowed_at)
        .bind(book.due_date)
        .bind(book.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| unique_violation(e, "isbn"))?;
        Ok(())
    }

    async fn find_book(&self, id: Uuid) -> Result<Option<Book>, StoreError> {
        let book = sqlx::query_as::<_, Book>(&format!("SELECT {BOOK_COLUMNS} FROM books WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(book)
    }

    async fn list_books(&self, search: Option<&str>) -> Result<Vec<Book>, StoreError> {
        let pattern = search.map(str::trim).filter(|s| !s.is_empty()).map(like_pattern);
        let books = sqlx::query_as::<_, Book>(&format!(
            "SELECT {BOOK_COLUMNS} FROM books
             WHERE $1::text IS NULL OR title ILIKE $1 OR author ILIKE $1 OR category ILIKE $1
             ORDER BY created_at DESC"
        ))
        .bind(pattern)
        .fetch_all(&self.pool)
        .await?;
        Ok(books)
    }

    async fn list_borrows(&self, filter: &RecordFilter) -> Result<Vec<BorrowDetails>, StoreError> {
        let rows = sqlx::query_as::<_, BorrowDetails>(
            "SELECT r.id, r.user_id, r.book_id, r.status, r.requested_at, r.approved_at, r.due_date,
                    r.returned_at, r.days_late, r.late_fee, r.notes,
                    b.title AS book_title, u.name AS borrower_name
             FROM borrow_records r
             JOIN books b ON b.id = r.book_id
             JOIN users u ON u.id = r.user_id
             WHERE ($1::uuid IS NULL OR r.user_id = $1)
               AND (cardinality($2::borrow_status[]) = 0 OR r.status = ANY($2))
             ORDER BY r.requested_at DESC
             LIMIT $3",
        )
        .bind(filter.user_id)
        .bind(&filter.statuses)
        .bind(filter.limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn return_tallies(&self) -> Result<Vec<ReturnTally>, StoreError> {
        let tallies = sqlx::query_as::<_, ReturnTally>(
            "SELECT user_id,
                    COUNT(*) AS total,
                    COUNT(*) FILTER (WHERE days_late = 0) AS on_time,
                    COUNT(*) FILTER (WHERE days_late > 0) AS late
             FROM borrow_records
             WHERE status = 'returned'
             GROUP BY user_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(tallies)
    }

    async fn dashboard_counts(&self, now: DateTime<Utc>) -> Result<DashboardCounts, StoreError> {
        let counts = sqlx::query_as::<_, DashboardCounts>(
            "SELECT (SELECT COUNT(*) FROM books) AS total_books,
                    (SELECT COUNT(*) FROM books WHERE status = 'borrowed') AS borrowed_books,
                    (SELECT COUNT(*) FROM borrow_records WHERE status = 'pending') AS pending_requests,
                    (SELECT COUNT(*) FROM borrow_records
                      WHERE status = 'approved' AND due_date < $1) AS overdue_borrows,
                    (SELECT COUNT(*) FROM users WHERE role = 'reader') AS readers",
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(counts)
    }
}

struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn lock_book(&mut self, id: Uuid) -> Result<Option<Book>, StoreError> {
        let book = sqlx::query_as::<_, Book>(&format!("SELECT {BOOK_COLUMNS} FROM books WHERE id = $1 FOR UPDATE"))
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(book)
    }

    async fn lock_record(&mut self, id: Uuid) -> Result<Option<BorrowRecord>, StoreError> {
        let record = sqlx::query_as::<_, BorrowRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM borrow_records WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(record)
    }

    async fn has_active_request(&mut self, user_id: Uuid, book_id: Uuid) -> Result<bool, StoreError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (
                SELECT 1 FROM borrow_records
                WHERE user_id = $1 AND book_id = $2 AND status IN ('pending', 'approved'))",
        )
        .bind(user_id)
        .bind(book_id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(exists)
    }

    async fn insert_record(&mut self, record: &BorrowRecord) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO borrow_records ({RECORD_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
        ))
        .bind(record.id)
        .bind(record.user_id)
        .bind(record.book_id)
        .bind(record.status)
        .bind(record.requested_at)
        .bind(record.approved_at)
        .bind(record.due_date)
        .bind(record.returned_at)
        .bind(record.days_late)
        .bind(record.late_fee)
        .bind(&record.notes)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| unique_violation(e, "active borrow request"))?;
        Ok(())
    }

    async fn update_record(&mut self, record: &BorrowRecord) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE borrow_records
             SET status = $2, approved_at = $3, due_date = $4, returned_at = $5,
                 days_late = $6, late_fee = $7, notes = $8
             WHERE id = $1",
        )
        .bind(record.id)
        .bind(record.status)
        .bind(record.approved_at)
        .bind(record.due_date)
        .bind(record.returned_at)
        .bind(record.days_late)
        .bind(record.late_fee)
        .bind(&record.notes)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_book(&mut self, book: &Book) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE books SET status = $2, borrowed_by = $3, borrowed_at = $4, due_date = $5 WHERE id = $1",
        )
        .bind(book.id)
        .bind(book.status)
        .bind(book.borrowed_by)
        .bind(book.borrowed_at)
        .bind(book.due_date)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn add_points(&mut self, user_id: Uuid, delta: i64) -> Result<Option<i64>, StoreError> {
        let total = sqlx::query_scalar::<_, i64>("UPDATE users SET points = points + $2 WHERE id = $1 RETURNING points")
            .bind(user_id)
            .bind(delta)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(total)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}
