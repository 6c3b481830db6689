use std::collections::HashSet;

use super::record::CatalogRecord;
use crate::api::{ExternalMovie, LocalMovie};

/// Merge the two sources into one deduplicated view.
///
/// Local movies come first, unchanged and in fetch order. External movies
/// follow in fetch order, minus any whose external id is already saved.
/// Local always wins a collision. Blank or absent ids never match anything.
///
/// # Arguments
///
/// * `local` - The saved snapshot, in fetch order
/// * `external` - The latest external search snapshot, in fetch order
///
/// # Returns
///
/// `local.len()` records plus every external movie not already saved. Calling
/// it twice with the same inputs yields equal output.
pub fn merge(local: &[LocalMovie], external: &[ExternalMovie]) -> Vec<CatalogRecord> {
    let saved = saved_ids(local);

    let mut merged = Vec::with_capacity(local.len() + external.len());
    merged.extend(local.iter().cloned().map(CatalogRecord::Local));
    merged.extend(
        external
            .iter()
            .filter(|m| !saved.contains(m.external_id.as_str()))
            .cloned()
            .map(CatalogRecord::External),
    );
    merged
}

/// Size of the merged view without building it (dashboard "total movies").
pub fn total_available(local: &[LocalMovie], external: &[ExternalMovie]) -> usize {
    let saved = saved_ids(local);
    local.len()
        + external
            .iter()
            .filter(|m| !saved.contains(m.external_id.as_str()))
            .count()
}

fn saved_ids(local: &[LocalMovie]) -> HashSet<&str> {
    local
        .iter()
        .filter_map(|m| m.external_id.as_deref())
        .filter(|id| !id.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::WatchStatus;
    use pretty_assertions::assert_eq;

    fn local(id: i64, external_id: Option<&str>) -> LocalMovie {
        LocalMovie {
            id,
            external_id: external_id.map(str::to_string),
            title: format!("Local {id}"),
            genre: "drama".into(),
            year: Some(2001),
            status: WatchStatus::Unwatched,
            rating: None,
            plot: None,
            poster: None,
        }
    }

    fn external(external_id: &str, title: &str) -> ExternalMovie {
        ExternalMovie {
            external_id: external_id.into(),
            title: title.into(),
            genre: None,
            year: None,
            rating: None,
            plot: None,
            poster: None,
        }
    }

    #[test]
    fn test_local_wins_collision() {
        let local = vec![local(1, Some("tt1"))];
        let external = vec![external("tt1", "A"), external("tt2", "B")];

        let merged = merge(&local, &external);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0], CatalogRecord::Local(local[0].clone()));
        assert_eq!(merged[1], CatalogRecord::External(external[1].clone()));
        assert_eq!(total_available(&local, &external), 2);
    }

    #[test]
    fn test_hand_entered_local_never_suppresses() {
        let local = vec![local(1, None), local(2, Some(""))];
        let external = vec![external("", "Blank"), external("tt9", "Nine")];

        let merged = merge(&local, &external);
        assert_eq!(merged.len(), 4);
    }

    #[test]
    fn test_empty_inputs() {
        assert!(merge(&[], &[]).is_empty());
        assert_eq!(merge(&[], &[external("tt1", "A")]).len(), 1);
        assert_eq!(merge(&[local(1, Some("tt1"))], &[]).len(), 1);
    }
}
