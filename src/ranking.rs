//! Reader leaderboard.

use std::collections::HashMap;

use serde::Serialize;
use uuid::Uuid;

use crate::{
    models::{Role, User},
    store::{LibraryStore, ReturnTally, StoreError},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub points: i64,
    pub total_borrows: i64,
    pub on_time_returns: i64,
    pub late_returns: i64,
}

/// Order readers by points (highest first), then name; ranks are 1-based
/// positions, so tied points still get distinct consecutive ranks.
#[must_use]
pub fn rank_readers(mut readers: Vec<User>, tallies: &[ReturnTally]) -> Vec<LeaderboardEntry> {
    readers.retain(|u| u.role == Role::Reader);
    readers.sort_by(|a, b| {
        b.points
            .cmp(&a.points)
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.id.cmp(&b.id))
    });

    let by_user: HashMap<Uuid, &ReturnTally> = tallies.iter().map(|t| (t.user_id, t)).collect();
    readers
        .into_iter()
        .enumerate()
        .map(|(index, user)| {
            let tally = by_user.get(&user.id);
            LeaderboardEntry {
                rank: index + 1,
                user_id: user.id,
                points: user.points,
                total_borrows: tally.map_or(0, |t| t.total),
                on_time_returns: tally.map_or(0, |t| t.on_time),
                late_returns: tally.map_or(0, |t| t.late),
                name: user.name,
                email: user.email,
            }
        })
        .collect()
}

/// Recompute the leaderboard from two batch reads.
///
/// # Errors
/// Propagates store failures.
pub async fn leaderboard(store: &dyn LibraryStore) -> Result<Vec<LeaderboardEntry>, StoreError> {
    let readers = store.list_readers().await?;
    let tallies = store.return_tallies().await?;
    Ok(rank_readers(readers, &tallies))
}
