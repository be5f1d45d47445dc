//! Limit/offset pagination shared by every list endpoint.

use serde::Deserialize;

use crate::error::LedgerError;

/// Largest page a caller may request.
pub const MAX_PAGE_SIZE: i64 = 100;

/// Query-string pagination, e.g. `?limit=20&offset=40`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Page {
    #[serde(default = "default_limit")]
    pub limit: i64,

    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    10
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            offset: 0,
        }
    }
}

impl Page {
    pub fn new(limit: i64, offset: i64) -> Self {
        Self { limit, offset }
    }

    /// Rejects pages outside `1..=MAX_PAGE_SIZE` or with a negative offset.
    pub fn validate(self) -> Result<Self, LedgerError> {
        if !(1..=MAX_PAGE_SIZE).contains(&self.limit) {
            return Err(LedgerError::InvalidArgument(format!(
                "limit must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        if self.offset < 0 {
            return Err(LedgerError::InvalidArgument(
                "offset must not be negative".to_string(),
            ));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1, 0)]
    #[case(10, 5)]
    #[case(MAX_PAGE_SIZE, 1_000)]
    fn accepts_valid_pages(#[case] limit: i64, #[case] offset: i64) {
        assert_eq!(Page::new(limit, offset).validate().unwrap(), Page::new(limit, offset));
    }

    #[rstest]
    #[case(0, 0)]
    #[case(-1, 0)]
    #[case(MAX_PAGE_SIZE + 1, 0)]
    #[case(10, -1)]
    fn rejects_invalid_pages(#[case] limit: i64, #[case] offset: i64) {
        assert!(matches!(
            Page::new(limit, offset).validate(),
            Err(LedgerError::InvalidArgument(_))
        ));
    }

    #[test]
    fn query_defaults() {
        let page: Page = serde_json::from_str("{}").unwrap();
        assert_eq!(page, Page::default());
    }
}
