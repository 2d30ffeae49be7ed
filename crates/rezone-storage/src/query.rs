//! Read-only conveniences over [`RecordsRepository::get_records`].

use rezone_core::{Record, RecordType};
use uuid::Uuid;

use crate::{CityFilter, RecordsFilter, RecordsPage, RecordsRepository, StoreError, StoreResult, TypeFilter};

/// Offset/limit window applied after filtering; `total` still counts the whole match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Page {
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

impl Page {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self {
            offset: Some(offset),
            limit: Some(limit),
        }
    }

    fn apply(&self, data: Vec<Record>) -> Vec<Record> {
        let offset = self.offset.unwrap_or(0);
        let limit = self.limit.unwrap_or(usize::MAX);
        data.into_iter().skip(offset).take(limit).collect()
    }
}

#[derive(Debug, Clone)]
pub struct RecordsQuery {
    repository: RecordsRepository,
}

impl RecordsQuery {
    pub fn new(repository: RecordsRepository) -> Self {
        Self { repository }
    }

    pub fn repository(&self) -> &RecordsRepository {
        &self.repository
    }

    pub async fn records(
        &self,
        type_filter: TypeFilter,
        filter: &RecordsFilter,
        page: Page,
    ) -> StoreResult<RecordsPage> {
        let RecordsPage { total, data } = self.repository.get_records(type_filter, filter).await?;
        Ok(RecordsPage {
            total,
            data: page.apply(data),
        })
    }

    pub async fn rezonings(&self, city: Option<CityFilter>, page: Page) -> StoreResult<RecordsPage> {
        let filter = RecordsFilter { city, id: None };
        self.records(RecordType::Rezoning.into(), &filter, page).await
    }

    pub async fn development_permits(
        &self,
        city: Option<CityFilter>,
        page: Page,
    ) -> StoreResult<RecordsPage> {
        let filter = RecordsFilter { city, id: None };
        self.records(RecordType::DevelopmentPermit.into(), &filter, page)
            .await
    }

    pub async fn record_by_id(&self, id: Uuid) -> StoreResult<Record> {
        self.repository
            .get_records(TypeFilter::All, &RecordsFilter::id(id))
            .await?
            .data
            .into_iter()
            .next()
            .ok_or(StoreError::NotFound {
                tier: self.repository.tier(),
                id,
            })
    }
}
