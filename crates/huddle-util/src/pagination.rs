use serde::Deserialize;

pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 100;

/// `?limit=&offset=` query parameters for history reads.
#[derive(Debug, Default, Deserialize)]
pub struct OffsetParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl OffsetParams {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}
