// Pagination and sort parsing shared by the catalog and leaderboard listings.
// Both endpoints return the same envelope: a page of items plus
// {total, skip, limit, hasMoreData}.

use std::cmp::Ordering;

/// Page size used when the client sends no limit (or limit 0)
pub const DEFAULT_PAGE_LIMIT: u64 = 10;

/// Normalized pagination parameters for one listing request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageRequest {
    pub skip: u64,
    pub limit: u64,
}

/// Normalize raw query parameters.
/// Missing skip means 0; missing or zero limit means the default page size
/// (zero is treated as unset, matching the gateway's `parseInt(..) || 10`).
pub fn page_request(limit: Option<u64>, skip: Option<u64>) -> PageRequest {
    PageRequest {
        skip: skip.unwrap_or(0),
        limit: limit.filter(|l| *l > 0).unwrap_or(DEFAULT_PAGE_LIMIT),
    }
}

/// Whether a further page exists past this one: total - (skip + limit) > 0
pub fn has_more_data(total: u64, skip: u64, limit: u64) -> bool {
    total > skip.saturating_add(limit)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    /// Apply this direction to an ascending key comparison
    pub fn apply(self, ord: Ordering) -> Ordering {
        match self {
            SortDirection::Ascending => ord,
            SortDirection::Descending => ord.reverse(),
        }
    }
}

/// A parsed sort parameter: field key plus direction.
/// Uses the Mongo query convention the original clients send:
/// "totalPoints" ascending, "-totalPoints" descending.
#[derive(Debug, Clone, PartialEq)]
pub struct SortSpec {
    pub key: String,
    pub direction: SortDirection,
}

/// Parse a raw sort string, falling back to `default` (itself in raw form,
/// e.g. "-totalPoints") when absent or blank. Unknown keys are left for the
/// call site to map; comparators fall back to their default field.
pub fn parse_sort(raw: Option<&str>, default: &str) -> SortSpec {
    let raw = match raw.map(str::trim) {
        Some(s) if !s.is_empty() => s,
        _ => default,
    };
    match raw.strip_prefix('-') {
        Some(key) => SortSpec {
            key: key.to_string(),
            direction: SortDirection::Descending,
        },
        None => SortSpec {
            key: raw.to_string(),
            direction: SortDirection::Ascending,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_defaults_when_absent_or_zero() {
        assert_eq!(page_request(None, None), PageRequest { skip: 0, limit: 10 });
        assert_eq!(page_request(Some(0), Some(5)), PageRequest { skip: 5, limit: 10 });
        assert_eq!(page_request(Some(25), Some(50)), PageRequest { skip: 50, limit: 25 });
    }

    #[test]
    fn has_more_data_matches_contract() {
        // hasMoreData == (total - (skip + limit) > 0) for any inputs
        for total in 0..40u64 {
            for skip in 0..40u64 {
                for limit in 0..40u64 {
                    let expected = (total as i64) - (skip as i64 + limit as i64) > 0;
                    assert_eq!(has_more_data(total, skip, limit), expected);
                }
            }
        }
    }

    #[test]
    fn full_first_page_has_no_more_data() {
        // skip=0, limit=total must report no further pages
        assert!(!has_more_data(10, 0, 10));
        assert!(has_more_data(11, 0, 10));
        assert!(!has_more_data(0, 0, 10));
    }

    #[test]
    fn parse_sort_directions() {
        let desc = parse_sort(Some("-totalPoints"), "-totalPoints");
        assert_eq!(desc.key, "totalPoints");
        assert_eq!(desc.direction, SortDirection::Descending);

        let asc = parse_sort(Some("username"), "-totalPoints");
        assert_eq!(asc.key, "username");
        assert_eq!(asc.direction, SortDirection::Ascending);
    }

    #[test]
    fn parse_sort_falls_back_to_default() {
        for raw in [None, Some(""), Some("   ")] {
            let spec = parse_sort(raw, "-totalPoints");
            assert_eq!(spec.key, "totalPoints");
            assert_eq!(spec.direction, SortDirection::Descending);
        }
        let spec = parse_sort(None, "-dateCreated");
        assert_eq!(spec.key, "dateCreated");
        assert_eq!(spec.direction, SortDirection::Descending);
    }
}
