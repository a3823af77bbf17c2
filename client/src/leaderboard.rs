//! Top scores across every mirrored car plus the local one

use shared::{ClientId, PlayerRecord};

pub const LEADERBOARD_SIZE: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct LeaderboardRow {
    pub client_id: ClientId,
    pub username: String,
    pub highscore: f64,
    pub is_local: bool,
}

/// Builds the leaderboard: highest score first, ties broken by the lower
/// client id, at most [`LEADERBOARD_SIZE`] rows
pub fn leaderboard<'a, I>(remote: I, local: Option<&PlayerRecord>) -> Vec<LeaderboardRow>
where
    I: IntoIterator<Item = &'a PlayerRecord>,
{
    let row = |record: &PlayerRecord, is_local: bool| LeaderboardRow {
        client_id: record.id,
        username: record.username.clone(),
        highscore: record.highscore,
        is_local,
    };

    let mut rows: Vec<LeaderboardRow> = remote
        .into_iter()
        .map(|record| row(record, false))
        .chain(local.map(|record| row(record, true)))
        .collect();

    rows.sort_by(|a, b| {
        b.highscore
            .total_cmp(&a.highscore)
            .then(a.client_id.cmp(&b.client_id))
    });
    rows.truncate(LEADERBOARD_SIZE);
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(id: ClientId, highscore: f64) -> PlayerRecord {
        let mut record = PlayerRecord::new(id);
        record.highscore = highscore;
        record
    }

    fn scores(rows: &[LeaderboardRow]) -> Vec<f64> {
        rows.iter().map(|row| row.highscore).collect()
    }

    #[test]
    fn test_top_five_descending() {
        let remote: Vec<PlayerRecord> = [30.0, 10.0, 50.0, 20.0, 40.0]
            .iter()
            .enumerate()
            .map(|(i, score)| scored(i as ClientId + 2, *score))
            .collect();
        let local = scored(1, 5.0);

        let rows = leaderboard(&remote, Some(&local));

        assert_eq!(scores(&rows), vec![50.0, 40.0, 30.0, 20.0, 10.0]);
        assert!(rows.iter().all(|row| !row.is_local));
    }

    #[test]
    fn test_ties_ordered_by_client_id() {
        let remote = vec![scored(7, 12.5), scored(3, 12.5)];
        let local = scored(5, 12.5);

        let ids: Vec<ClientId> = leaderboard(&remote, Some(&local))
            .iter()
            .map(|row| row.client_id)
            .collect();

        assert_eq!(ids, vec![3, 5, 7]);
    }

    #[test]
    fn test_local_row_is_flagged() {
        let local = scored(1, 99.0);
        let rows = leaderboard(&Vec::<PlayerRecord>::new(), Some(&local));

        assert_eq!(rows.len(), 1);
        assert!(rows[0].is_local);
        assert_eq!(rows[0].username, "Guest");
    }

    #[test]
    fn test_empty_without_players() {
        assert!(leaderboard(&Vec::<PlayerRecord>::new(), None).is_empty());
    }
}
