//! Borrow request state machine and return accounting.
//!
//! ```text
//! pending --approve--> approved --return--> returned
//! pending --reject-->  rejected
//! ```
//!
//! Each transition reads the record (and the book, and for returns the
//! borrower's points) through one [`StoreTx`] and commits all of it together or
//! not at all. "Now" is read once per call from the injected clock.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{
    errors::BorrowError,
    models::{BorrowRecord, BorrowStatus, Role},
    policy,
    store::{LibraryStore, StoreTx},
};

pub type SharedClock = Arc<dyn Clock + Send + Sync>;

const MAX_NOTES_LEN: usize = 500;

/// The authenticated caller of an engine operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Uuid,
    pub role: Role,
}

impl Actor {
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// One lifecycle operation and exactly the fields it needs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BorrowCommand {
    Request {
        book_id: Uuid,
    },
    Approve {
        record_id: Uuid,
        #[serde(default)]
        notes: Option<String>,
    },
    Reject {
        record_id: Uuid,
        #[serde(default)]
        notes: Option<String>,
    },
    Return {
        record_id: Uuid,
        #[serde(default)]
        notes: Option<String>,
    },
    /// Notes are the only thing that may still change on a closed record.
    Annotate {
        record_id: Uuid,
        notes: String,
    },
}

impl BorrowCommand {
    /// # Errors
    /// Returns `Validation` for blank or overlong notes.
    pub fn validate(&self) -> Result<(), BorrowError> {
        let notes = match self {
            Self::Request { .. } => None,
            Self::Approve { notes, .. } | Self::Reject { notes, .. } | Self::Return { notes, .. } => {
                notes.as_deref()
            }
            Self::Annotate { notes, .. } => Some(notes.as_str()),
        };
        match notes {
            Some(n) if n.trim().is_empty() => Err(BorrowError::Validation("notes must not be blank".into())),
            Some(n) if n.chars().count() > MAX_NOTES_LEN => Err(BorrowError::Validation(format!(
                "notes must be at most {MAX_NOTES_LEN} characters"
            ))),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReturnReceipt {
    pub record: BorrowRecord,
    pub days_late: i64,
    pub late_fee: i64,
    pub points_delta: i64,
    pub points_total: i64,
    pub on_time: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BorrowOutcome {
    Requested { record: BorrowRecord },
    Approved { record: BorrowRecord },
    Rejected { record: BorrowRecord },
    Returned { receipt: ReturnReceipt },
    Annotated { record: BorrowRecord },
}

pub struct LifecycleEngine {
    store: Arc<dyn LibraryStore>,
    clock: SharedClock,
    offset: FixedOffset,
}

impl LifecycleEngine {
    #[must_use]
    pub fn new(store: Arc<dyn LibraryStore>, clock: SharedClock, offset: FixedOffset) -> Self {
        Self { store, clock, offset }
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.utc()
    }

    #[must_use]
    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Validate and run one command on behalf of `actor`.
    ///
    /// # Errors
    /// Any [`BorrowError`]; on error nothing has been written.
    pub async fn execute(&self, actor: &Actor, command: BorrowCommand) -> Result<BorrowOutcome, BorrowError> {
        command.validate()?;
        match command {
            BorrowCommand::Request { book_id } => {
                let record = self.request(actor, book_id).await?;
                Ok(BorrowOutcome::Requested { record })
            }
            BorrowCommand::Approve { record_id, notes } => {
                let record = self.approve(actor, record_id, notes).await?;
                Ok(BorrowOutcome::Approved { record })
            }
            BorrowCommand::Reject { record_id, notes } => {
                let record = self.reject(actor, record_id, notes).await?;
                Ok(BorrowOutcome::Rejected { record })
            }
            BorrowCommand::Return { record_id, notes } => {
                let receipt = self.return_book(actor, record_id, notes).await?;
                Ok(BorrowOutcome::Returned { receipt })
            }
            BorrowCommand::Annotate { record_id, notes } => {
                let record = self.annotate(actor, record_id, notes).await?;
                Ok(BorrowOutcome::Annotated { record })
            }
        }
    }

    /// Open a pending request by `actor` for `book_id`.
    ///
    /// # Errors
    /// `NotFound` for an unknown book, `Conflict` if it is lent out or the
    /// actor already has an open request for it.
    pub async fn request(&self, actor: &Actor, book_id: Uuid) -> Result<BorrowRecord, BorrowError> {
        let now = self.now();
        let mut tx = self.store.begin().await?;

        let book = tx.lock_book(book_id).await?.ok_or(BorrowError::NotFound("book"))?;
        if !book.is_available() {
            return Err(BorrowError::Conflict("book is already borrowed"));
        }
        if tx.has_active_request(actor.user_id, book_id).await? {
            return Err(BorrowError::Conflict("you already have a request for this book"));
        }

        let record = BorrowRecord::pending(actor.user_id, book_id, now);
        tx.insert_record(&record).await?;
        tx.commit().await?;

        info!(record_id = %record.id, book_id = %book_id, user_id = %actor.user_id, "borrow requested");
        Ok(record)
    }

    /// Approve a pending request, lending the book until the policy due date.
    ///
    /// # Errors
    /// `Forbidden` for non-admins, `NotFound`, `InvalidState` unless pending,
    /// `Conflict` if the book was lent to someone else meanwhile.
    pub async fn approve(
        &self,
        actor: &Actor,
        record_id: Uuid,
        notes: Option<String>,
    ) -> Result<BorrowRecord, BorrowError> {
        require_admin(actor)?;
        let now = self.now();
        let mut tx = self.store.begin().await?;

        let mut record = lock_in_status(tx.as_mut(), record_id, BorrowStatus::Pending, "approve").await?;
        let mut book = tx.lock_book(record.book_id).await?.ok_or(BorrowError::NotFound("book"))?;
        if !book.is_available() {
            return Err(BorrowError::Conflict("book is already borrowed"));
        }

        let due = policy::due_date(now, self.offset);
        record.status = BorrowStatus::Approved;
        record.approved_at = Some(now);
        record.due_date = Some(due);
        if notes.is_some() {
            record.notes = notes;
        }
        book.lend(record.user_id, now, due);

        tx.update_record(&record).await?;
        tx.update_book(&book).await?;
        tx.commit().await?;

        info!(record_id = %record.id, book_id = %book.id, user_id = %record.user_id, due_date = %due, "borrow approved");
        Ok(record)
    }

    /// Reject a pending request. The book was never lent, so it is not touched.
    ///
    /// # Errors
    /// `Forbidden` for non-admins, `NotFound`, `InvalidState` unless pending.
    pub async fn reject(
        &self,
        actor: &Actor,
        record_id: Uuid,
        notes: Option<String>,
    ) -> Result<BorrowRecord, BorrowError> {
        require_admin(actor)?;
        let mut tx = self.store.begin().await?;

        let mut record = lock_in_status(tx.as_mut(), record_id, BorrowStatus::Pending, "reject").await?;
        record.status = BorrowStatus::Rejected;
        if notes.is_some() {
            record.notes = notes;
        }

        tx.update_record(&record).await?;
        tx.commit().await?;

        info!(record_id = %record.id, book_id = %record.book_id, user_id = %record.user_id, "borrow rejected");
        Ok(record)
    }

    /// Close an approved borrow: fix days late and fee, move the borrower's
    /// points, and put the book back on the shelf.
    ///
    /// # Errors
    /// `NotFound`, `Forbidden` unless the actor owns the record or is an admin
    /// (only admins may attach notes), `InvalidState` unless approved.
    pub async fn return_book(
        &self,
        actor: &Actor,
        record_id: Uuid,
        notes: Option<String>,
    ) -> Result<ReturnReceipt, BorrowError> {
        if notes.is_some() {
            require_admin(actor)?;
        }
        let now = self.now();
        let mut tx = self.store.begin().await?;

        let mut record = tx.lock_record(record_id).await?.ok_or(BorrowError::NotFound("borrow request"))?;
        if !actor.is_admin() && record.user_id != actor.user_id {
            return Err(BorrowError::Forbidden("borrow request belongs to another user"));
        }
        if record.status != BorrowStatus::Approved {
            return Err(BorrowError::InvalidState { status: record.status, action: "return" });
        }
        let due = record.due_date.ok_or(BorrowError::InvalidState {
            status: record.status,
            action: "return",
        })?;
        let mut book = tx.lock_book(record.book_id).await?.ok_or(BorrowError::NotFound("book"))?;

        let assessment = policy::assess_return(due, now, self.offset);
        record.status = BorrowStatus::Returned;
        record.returned_at = Some(now);
        record.days_late = assessment.days_late;
        record.late_fee = assessment.late_fee;
        if notes.is_some() {
            record.notes = notes;
        }
        book.release();

        let points_total = tx
            .add_points(record.user_id, assessment.points_delta)
            .await?
            .ok_or(BorrowError::NotFound("user"))?;
        tx.update_record(&record).await?;
        tx.update_book(&book).await?;
        tx.commit().await?;

        info!(
            record_id = %record.id,
            book_id = %book.id,
            user_id = %record.user_id,
            days_late = assessment.days_late,
            late_fee = assessment.late_fee,
            points_delta = assessment.points_delta,
            "borrow returned"
        );
        Ok(ReturnReceipt {
            record,
            days_late: assessment.days_late,
            late_fee: assessment.late_fee,
            points_delta: assessment.points_delta,
            points_total,
            on_time: assessment.on_time(),
        })
    }

    /// Replace the administrative notes of a record in any status.
    ///
    /// # Errors
    /// `Forbidden` for non-admins, `NotFound`.
    pub async fn annotate(&self, actor: &Actor, record_id: Uuid, notes: String) -> Result<BorrowRecord, BorrowError> {
        require_admin(actor)?;
        let mut tx = self.store.begin().await?;

        let mut record = tx.lock_record(record_id).await?.ok_or(BorrowError::NotFound("borrow request"))?;
        record.notes = Some(notes);
        tx.update_record(&record).await?;
        tx.commit().await?;

        info!(record_id = %record.id, status = %record.status, "borrow notes updated");
        Ok(record)
    }
}

fn require_admin(actor: &Actor) -> Result<(), BorrowError> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(BorrowError::Forbidden("admin role required"))
    }
}

async fn lock_in_status(
    tx: &mut dyn StoreTx,
    record_id: Uuid,
    expected: BorrowStatus,
    action: &'static str,
) -> Result<BorrowRecord, BorrowError> {
    let record = tx.lock_record(record_id).await?.ok_or(BorrowError::NotFound("borrow request"))?;
    if record.status == expected {
        Ok(record)
    } else {
        Err(BorrowError::InvalidState { status: record.status, action })
    }
}
