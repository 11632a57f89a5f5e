//! Due-date alerts derived from approved borrows on every call.
//!
//! Overdue day counts here advance continuously with elapsed time since the
//! due instant. They are not the `days_late` fixed by a return, which compares
//! calendar days.

use chrono::{DateTime, FixedOffset, TimeDelta, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    models::{BorrowDetails, BorrowStatus},
    policy,
    store::{LibraryStore, RecordFilter, StoreError},
};

const DUE_SOON_WINDOW_DAYS: i64 = 3;
const PENDING_ALERT_LIMIT: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Borrow,
    Overdue,
    DueToday,
    DueSoon,
}

/// Declaration order is display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// One reader's own borrows.
    Reader(Uuid),
    /// Every borrow, plus pending requests awaiting a decision.
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    /// Id of the borrow record the alert is about.
    pub id: Uuid,
    pub kind: NotificationKind,
    pub priority: Priority,
    pub message: String,
    pub book_title: String,
    pub borrower_name: String,
    pub due_date: Option<DateTime<Utc>>,
    pub read: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NotificationSummary {
    pub overdue: usize,
    pub due_today: usize,
    pub due_soon: usize,
    pub pending: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationFeed {
    pub notifications: Vec<Notification>,
    pub unread_count: usize,
    pub summary: NotificationSummary,
}

fn plural_days(n: i64) -> &'static str {
    if n == 1 { "day" } else { "days" }
}

/// Classify one approved borrow; anything due later than the window yields `None`.
///
/// Due-soon distance is counted in local calendar days, so a borrow due
/// tomorrow is one day away (`medium`) whatever the hour.
#[must_use]
pub fn classify(
    borrow: &BorrowDetails,
    audience: Audience,
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> Option<Notification> {
    if borrow.record.status != BorrowStatus::Approved {
        return None;
    }
    let due = borrow.record.due_date?;
    let title = &borrow.book_title;
    let who = &borrow.borrower_name;
    let admin = audience == Audience::Admin;
    let today = policy::local_day(now, offset);

    let (kind, priority, message) = if due < now {
        let days = (now - due).num_days();
        let fee = policy::late_fee(days);
        let message = match (admin, days) {
            (true, 0) => format!("{who} is overdue returning \"{title}\""),
            (false, 0) => format!("\"{title}\" is overdue!"),
            (true, _) => format!(
                "{who} is {days} {} overdue returning \"{title}\" (late fee so far: {fee})",
                plural_days(days)
            ),
            (false, _) => format!("\"{title}\" is {days} {} overdue! Late fee: {fee}", plural_days(days)),
        };
        (NotificationKind::Overdue, Priority::High, message)
    } else if due <= policy::end_of_day(today, offset) {
        let message = if admin {
            format!("\"{title}\" borrowed by {who} is due today")
        } else {
            format!("\"{title}\" is due today! Return it to avoid late fees.")
        };
        (NotificationKind::DueToday, Priority::High, message)
    } else if due <= now + TimeDelta::days(DUE_SOON_WINDOW_DAYS) {
        let days = (policy::local_day(due, offset) - today).num_days();
        let priority = if days == 1 { Priority::Medium } else { Priority::Low };
        let message = if admin {
            format!("\"{title}\" borrowed by {who} is due in {days} {}", plural_days(days))
        } else {
            format!("\"{title}\" is due in {days} {}", plural_days(days))
        };
        (NotificationKind::DueSoon, priority, message)
    } else {
        return None;
    };

    Some(Notification {
        id: borrow.record.id,
        kind,
        priority,
        message,
        book_title: title.clone(),
        borrower_name: who.clone(),
        due_date: Some(due),
        read: false,
    })
}

fn pending_alert(borrow: &BorrowDetails) -> Notification {
    Notification {
        id: borrow.record.id,
        kind: NotificationKind::Borrow,
        priority: Priority::Medium,
        message: format!("{} requested to borrow \"{}\"", borrow.borrower_name, borrow.book_title),
        book_title: borrow.book_title.clone(),
        borrower_name: borrow.borrower_name.clone(),
        due_date: None,
        read: false,
    }
}

/// Build the feed: high before medium before low, then by due date ascending.
/// Pending-request alerts (admin only) trail their tier in the order given.
#[must_use]
pub fn build_feed(
    approved: &[BorrowDetails],
    pending: &[BorrowDetails],
    audience: Audience,
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> NotificationFeed {
    let mut notifications: Vec<Notification> = approved
        .iter()
        .filter_map(|b| classify(b, audience, now, offset))
        .collect();
    if audience == Audience::Admin {
        notifications.extend(pending.iter().map(pending_alert));
    }
    notifications.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| a.due_date.is_none().cmp(&b.due_date.is_none()))
            .then_with(|| a.due_date.cmp(&b.due_date))
    });

    let count = |kind| notifications.iter().filter(|n| n.kind == kind).count();
    let summary = NotificationSummary {
        overdue: count(NotificationKind::Overdue),
        due_today: count(NotificationKind::DueToday),
        due_soon: count(NotificationKind::DueSoon),
        pending: count(NotificationKind::Borrow),
    };
    NotificationFeed {
        unread_count: notifications.len(),
        notifications,
        summary,
    }
}

/// Read the active borrows in scope and derive the feed for `audience`.
///
/// # Errors
/// Propagates store failures.
pub async fn feed(
    store: &dyn LibraryStore,
    audience: Audience,
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> Result<NotificationFeed, StoreError> {
    let approved = match audience {
        Audience::Reader(user_id) => RecordFilter::with_status(BorrowStatus::Approved).for_user(user_id),
        Audience::Admin => RecordFilter::with_status(BorrowStatus::Approved),
    };
    let approved = store.list_borrows(&approved).await?;
    let pending = match audience {
        Audience::Admin => {
            store
                .list_borrows(&RecordFilter::with_status(BorrowStatus::Pending).limit(PENDING_ALERT_LIMIT))
                .await?
        }
        Audience::Reader(_) => Vec::new(),
    };
    Ok(build_feed(&approved, &pending, audience, now, offset))
}
