mod common;

use chrono::{NaiveDate, TimeDelta, Timelike};
use common::{Harness, t0, utc_offset};
use library_circulation::{
    Actor, BookStatus, BorrowCommand, BorrowError, BorrowOutcome, BorrowStatus, Role,
    notifications::{self, Audience, NotificationKind, Priority},
    ranking,
    store::{LibraryStore, RecordFilter},
};
use uuid::Uuid;

#[tokio::test]
async fn request_opens_a_pending_record_and_leaves_the_book_available() {
    let h = Harness::new().await;
    let ann = h.reader("Ann").await;
    let book = h.book("Dune", "9780441013593").await;

    let record = h.engine.request(&ann, book.id).await.unwrap();

    assert_eq!(record.status, BorrowStatus::Pending);
    assert_eq!(record.requested_at, t0());
    assert_eq!((record.days_late, record.late_fee), (0, 0));
    let stored = h.store.find_book(book.id).await.unwrap().unwrap();
    assert_eq!(stored.status, BookStatus::Available);
}

#[tokio::test]
async fn request_for_an_unknown_book_is_not_found() {
    let h = Harness::new().await;
    let ann = h.reader("Ann").await;

    let err = h.engine.request(&ann, Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, BorrowError::NotFound("book")));
}

#[tokio::test]
async fn a_second_open_request_for_the_same_book_conflicts() {
    let h = Harness::new().await;
    let ann = h.reader("Ann").await;
    let bob = h.reader("Bob").await;
    let book = h.book("Dune", "9780441013593").await;

    h.engine.request(&ann, book.id).await.unwrap();
    let err = h.engine.request(&ann, book.id).await.unwrap_err();
    assert!(matches!(err, BorrowError::Conflict(_)));

    // Another reader may still queue a request while the book is on the shelf.
    h.engine.request(&bob, book.id).await.unwrap();
}

#[tokio::test]
async fn requesting_a_lent_book_conflicts_and_records_nothing() {
    let h = Harness::new().await;
    let ann = h.reader("Ann").await;
    let bob = h.reader("Bob").await;
    let book = h.book("Dune", "9780441013593").await;
    let pending = h.engine.request(&ann, book.id).await.unwrap();
    h.engine.approve(&h.admin, pending.id, None).await.unwrap();

    let err = h.engine.request(&bob, book.id).await.unwrap_err();

    assert!(matches!(err, BorrowError::Conflict("book is already borrowed")));
    let bobs = h.store.list_borrows(&RecordFilter::default().for_user(bob.user_id)).await.unwrap();
    assert!(bobs.is_empty());
    assert_eq!(h.store.list_borrows(&RecordFilter::default()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn approve_lends_the_book_until_fourteen_days_later() {
    let h = Harness::new().await;
    let ann = h.reader("Ann").await;
    let book = h.book("Dune", "9780441013593").await;
    let pending = h.engine.request(&ann, book.id).await.unwrap();

    let approved = h.engine.approve(&h.admin, pending.id, None).await.unwrap();

    let due = approved.due_date.unwrap();
    assert_eq!(approved.status, BorrowStatus::Approved);
    assert_eq!(approved.approved_at, Some(t0()));
    assert_eq!(due.date_naive(), NaiveDate::from_ymd_opt(2025, 3, 17).unwrap());
    assert_eq!((due.hour(), due.minute(), due.second()), (23, 59, 59));

    let lent = h.store.find_book(book.id).await.unwrap().unwrap();
    assert_eq!(lent.status, BookStatus::Borrowed);
    assert_eq!(lent.borrowed_by, Some(ann.user_id));
    assert_eq!(lent.due_date, Some(due));
}

#[tokio::test]
async fn a_record_cannot_be_approved_twice() {
    let h = Harness::new().await;
    let ann = h.reader("Ann").await;
    let book = h.book("Dune", "9780441013593").await;
    let pending = h.engine.request(&ann, book.id).await.unwrap();

    h.engine.approve(&h.admin, pending.id, None).await.unwrap();
    let err = h.engine.approve(&h.admin, pending.id, None).await.unwrap_err();

    assert!(matches!(
        err,
        BorrowError::InvalidState { status: BorrowStatus::Approved, action: "approve" }
    ));
}

#[tokio::test]
async fn concurrent_approvals_of_one_record_commit_once() {
    let h = Harness::new().await;
    let ann = h.reader("Ann").await;
    let book = h.book("Dune", "9780441013593").await;
    let pending = h.engine.request(&ann, book.id).await.unwrap();

    let (first, second) = tokio::join!(
        h.engine.approve(&h.admin, pending.id, None),
        h.engine.approve(&h.admin, pending.id, None),
    );

    assert_eq!(usize::from(first.is_ok()) + usize::from(second.is_ok()), 1);
}

#[tokio::test]
async fn approving_a_request_for_a_lent_book_conflicts() {
    let h = Harness::new().await;
    let ann = h.reader("Ann").await;
    let bob = h.reader("Bob").await;
    let book = h.book("Dune", "9780441013593").await;
    let first = h.engine.request(&ann, book.id).await.unwrap();
    let second = h.engine.request(&bob, book.id).await.unwrap();

    h.engine.approve(&h.admin, first.id, None).await.unwrap();
    let err = h.engine.approve(&h.admin, second.id, None).await.unwrap_err();

    assert!(matches!(err, BorrowError::Conflict(_)));
    let records = h.store.list_borrows(&RecordFilter::default().for_user(bob.user_id)).await.unwrap();
    assert_eq!(records[0].record.status, BorrowStatus::Pending);
}

#[tokio::test]
async fn readers_cannot_approve_or_reject() {
    let h = Harness::new().await;
    let ann = h.reader("Ann").await;
    let book = h.book("Dune", "9780441013593").await;
    let pending = h.engine.request(&ann, book.id).await.unwrap();

    assert!(matches!(
        h.engine.approve(&ann, pending.id, None).await,
        Err(BorrowError::Forbidden(_))
    ));
    assert!(matches!(
        h.engine.reject(&ann, pending.id, None).await,
        Err(BorrowError::Forbidden(_))
    ));
}

#[tokio::test]
async fn reject_closes_the_request_without_touching_the_book() {
    let h = Harness::new().await;
    let ann = h.reader("Ann").await;
    let book = h.book("Dune", "9780441013593").await;
    let pending = h.engine.request(&ann, book.id).await.unwrap();

    let rejected = h
        .engine
        .reject(&h.admin, pending.id, Some("reserved for class".into()))
        .await
        .unwrap();

    assert_eq!(rejected.status, BorrowStatus::Rejected);
    assert_eq!(rejected.notes.as_deref(), Some("reserved for class"));
    assert_eq!(h.store.find_book(book.id).await.unwrap().unwrap(), book);

    let err = h.engine.reject(&h.admin, pending.id, None).await.unwrap_err();
    assert!(matches!(err, BorrowError::InvalidState { status: BorrowStatus::Rejected, .. }));

    // A rejected request no longer blocks a new one.
    h.engine.request(&ann, book.id).await.unwrap();
}

#[tokio::test]
async fn late_return_charges_fees_and_costs_points() {
    let h = Harness::new().await;
    let ann = h.reader("Ann").await;
    let book = h.book("Dune", "9780441013593").await;
    let pending = h.engine.request(&ann, book.id).await.unwrap();
    h.engine.approve(&h.admin, pending.id, None).await.unwrap();

    h.clock.advance(TimeDelta::days(20));
    let receipt = h.engine.return_book(&ann, pending.id, None).await.unwrap();

    assert_eq!(receipt.days_late, 6);
    assert_eq!(receipt.late_fee, 600);
    assert_eq!(receipt.points_delta, -60);
    assert_eq!(receipt.points_total, -60);
    assert!(!receipt.on_time);
    assert_eq!(receipt.record.status, BorrowStatus::Returned);
    assert_eq!(receipt.record.returned_at, Some(t0() + TimeDelta::days(20)));
    assert_eq!(h.points(&ann).await, -60);
}

#[tokio::test]
async fn returning_on_the_due_day_at_any_hour_is_on_time() {
    let h = Harness::new().await;
    let ann = h.reader("Ann").await;
    let book = h.book("Dune", "9780441013593").await;
    let pending = h.engine.request(&ann, book.id).await.unwrap();
    let approved = h.engine.approve(&h.admin, pending.id, None).await.unwrap();

    // Last minute of the due day.
    h.clock.set(approved.due_date.unwrap() - TimeDelta::seconds(30));
    let receipt = h.engine.return_book(&ann, pending.id, None).await.unwrap();

    assert_eq!((receipt.days_late, receipt.late_fee, receipt.points_delta), (0, 0, 100));
    assert!(receipt.on_time);
    assert_eq!(h.points(&ann).await, 100);
}

#[tokio::test]
async fn return_puts_the_book_back_on_the_shelf() {
    let h = Harness::new().await;
    let ann = h.reader("Ann").await;
    let book = h.book("Dune", "9780441013593").await;
    let pending = h.engine.request(&ann, book.id).await.unwrap();
    h.engine.approve(&h.admin, pending.id, None).await.unwrap();

    h.clock.advance(TimeDelta::days(3));
    h.engine.return_book(&ann, pending.id, None).await.unwrap();

    let shelved = h.store.find_book(book.id).await.unwrap().unwrap();
    assert_eq!(shelved.status, BookStatus::Available);
    assert_eq!((shelved.borrowed_by, shelved.borrowed_at, shelved.due_date), (None, None, None));
}

#[tokio::test]
async fn only_the_borrower_or_an_admin_may_return() {
    let h = Harness::new().await;
    let ann = h.reader("Ann").await;
    let bob = h.reader("Bob").await;
    let book = h.book("Dune", "9780441013593").await;
    let pending = h.engine.request(&ann, book.id).await.unwrap();
    h.engine.approve(&h.admin, pending.id, None).await.unwrap();

    let err = h.engine.return_book(&bob, pending.id, None).await.unwrap_err();
    assert!(matches!(err, BorrowError::Forbidden(_)));
    assert_eq!(h.points(&ann).await, 0);

    // Readers may not attach notes; admins may mark the return themselves.
    assert!(matches!(
        h.engine.return_book(&ann, pending.id, Some("late".into())).await,
        Err(BorrowError::Forbidden(_))
    ));
    let receipt = h
        .engine
        .return_book(&h.admin, pending.id, Some("returned at front desk".into()))
        .await
        .unwrap();
    assert_eq!(receipt.record.notes.as_deref(), Some("returned at front desk"));
    assert_eq!(h.points(&ann).await, 100);
}

#[tokio::test]
async fn only_approved_records_can_be_returned() {
    let h = Harness::new().await;
    let ann = h.reader("Ann").await;
    let book = h.book("Dune", "9780441013593").await;
    let pending = h.engine.request(&ann, book.id).await.unwrap();

    let err = h.engine.return_book(&ann, pending.id, None).await.unwrap_err();
    assert!(matches!(err, BorrowError::InvalidState { status: BorrowStatus::Pending, action: "return" }));

    h.engine.approve(&h.admin, pending.id, None).await.unwrap();
    h.engine.return_book(&ann, pending.id, None).await.unwrap();
    let err = h.engine.return_book(&ann, pending.id, None).await.unwrap_err();
    assert!(matches!(err, BorrowError::InvalidState { status: BorrowStatus::Returned, .. }));
    assert_eq!(h.points(&ann).await, 100);
}

#[tokio::test]
async fn a_failed_return_leaves_record_book_and_points_untouched() {
    let h = Harness::new().await;
    // A borrower whose account is missing makes the points update fail last.
    let ghost = Actor { user_id: Uuid::new_v4(), role: Role::Reader };
    let book = h.book("Dune", "9780441013593").await;
    let pending = h.engine.request(&ghost, book.id).await.unwrap();
    h.engine.approve(&h.admin, pending.id, None).await.unwrap();

    h.clock.advance(TimeDelta::days(30));
    let err = h.engine.return_book(&ghost, pending.id, None).await.unwrap_err();
    assert!(matches!(err, BorrowError::NotFound("user")));

    let records = h.store.list_borrows(&RecordFilter::default()).await.unwrap();
    assert_eq!(records[0].record.status, BorrowStatus::Approved);
    assert_eq!(records[0].record.days_late, 0);
    let still_lent = h.store.find_book(book.id).await.unwrap().unwrap();
    assert_eq!(still_lent.status, BookStatus::Borrowed);
}

#[tokio::test]
async fn closed_records_only_accept_admin_notes() {
    let h = Harness::new().await;
    let ann = h.reader("Ann").await;
    let book = h.book("Dune", "9780441013593").await;
    let pending = h.engine.request(&ann, book.id).await.unwrap();
    h.engine.reject(&h.admin, pending.id, None).await.unwrap();

    let outcome = h
        .engine
        .execute(&h.admin, BorrowCommand::Annotate { record_id: pending.id, notes: "duplicate".into() })
        .await
        .unwrap();
    let BorrowOutcome::Annotated { record } = outcome else {
        panic!("expected an annotation outcome");
    };
    assert_eq!(record.status, BorrowStatus::Rejected);
    assert_eq!(record.notes.as_deref(), Some("duplicate"));

    let err = h
        .engine
        .execute(&ann, BorrowCommand::Annotate { record_id: pending.id, notes: "mine".into() })
        .await
        .unwrap_err();
    assert!(matches!(err, BorrowError::Forbidden(_)));
}

#[tokio::test]
async fn execute_validates_before_touching_the_store() {
    let h = Harness::new().await;
    let err = h
        .engine
        .execute(&h.admin, BorrowCommand::Reject { record_id: Uuid::new_v4(), notes: Some(" ".into()) })
        .await
        .unwrap_err();
    assert!(matches!(err, BorrowError::Validation(_)));
}

#[tokio::test]
async fn leaderboard_reflects_returns_and_is_stable() {
    let h = Harness::new().await;
    let ann = h.reader("Ann").await;
    let bob = h.reader("Bob").await;
    let cy = h.reader("Cy").await;
    let dune = h.book("Dune", "9780441013593").await;
    let emma = h.book("Emma", "9780141439587").await;

    // Ann: one on-time return. Bob: one on-time return. Cy: one return 6 days late.
    for (actor, book) in [(&ann, &dune), (&bob, &emma)] {
        let r = h.engine.request(actor, book.id).await.unwrap();
        h.engine.approve(&h.admin, r.id, None).await.unwrap();
        h.engine.return_book(actor, r.id, None).await.unwrap();
    }
    let r = h.engine.request(&cy, dune.id).await.unwrap();
    h.engine.approve(&h.admin, r.id, None).await.unwrap();
    h.clock.advance(TimeDelta::days(20));
    h.engine.return_book(&cy, r.id, None).await.unwrap();

    let board = ranking::leaderboard(h.store.as_ref()).await.unwrap();
    let rows: Vec<_> = board
        .iter()
        .map(|e| (e.rank, e.name.as_str(), e.points, e.total_borrows, e.on_time_returns, e.late_returns))
        .collect();
    assert_eq!(
        rows,
        vec![
            (1, "Ann", 100, 1, 1, 0),
            (2, "Bob", 100, 1, 1, 0),
            (3, "Cy", -60, 1, 0, 1),
        ]
    );

    let again = ranking::leaderboard(h.store.as_ref()).await.unwrap();
    assert_eq!(board, again);
}

#[tokio::test]
async fn notifications_follow_the_clock() {
    let h = Harness::new().await;
    let ann = h.reader("Ann").await;
    let bob = h.reader("Bob").await;
    let book = h.book("Dune", "9780441013593").await;
    let pending = h.engine.request(&ann, book.id).await.unwrap();
    h.engine.approve(&h.admin, pending.id, None).await.unwrap();

    let feed_at = |audience| notifications::feed(h.store.as_ref(), audience, h.engine.now(), utc_offset());

    // Due 17 March; on 15 March it is due in two days.
    h.clock.set(t0() + TimeDelta::days(12));
    let feed = feed_at(Audience::Reader(ann.user_id)).await.unwrap();
    assert_eq!(feed.notifications.len(), 1);
    assert_eq!((feed.notifications[0].kind, feed.notifications[0].priority), (NotificationKind::DueSoon, Priority::Low));

    // 18 March: overdue.
    h.clock.set(t0() + TimeDelta::days(15));
    let feed = feed_at(Audience::Reader(ann.user_id)).await.unwrap();
    assert_eq!(feed.notifications.len(), 1);
    assert_eq!((feed.notifications[0].kind, feed.notifications[0].priority), (NotificationKind::Overdue, Priority::High));
    assert_eq!(feed.summary.overdue, 1);

    // Other readers see nothing; admins see everyone's.
    assert!(feed_at(Audience::Reader(bob.user_id)).await.unwrap().notifications.is_empty());
    assert_eq!(feed_at(Audience::Admin).await.unwrap().summary.overdue, 1);

    // Once returned the alert disappears.
    h.engine.return_book(&ann, pending.id, None).await.unwrap();
    assert!(feed_at(Audience::Reader(ann.user_id)).await.unwrap().notifications.is_empty());
}
