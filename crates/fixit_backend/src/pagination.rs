//! Page arithmetic and sort keys for list endpoints.

use std::{cmp::Ordering, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    config::PaginationConfig,
    error::{ApiError, FieldError},
    models::{Issue, User},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }

    pub fn apply(&self, ordering: Ordering) -> Ordering {
        match self {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IssueSort {
    #[default]
    CreatedAt,
    UpdatedAt,
    Priority,
    Status,
    Category,
    Title,
}

impl FromStr for IssueSort {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "createdAt" => Ok(IssueSort::CreatedAt),
            "updatedAt" => Ok(IssueSort::UpdatedAt),
            "priority" => Ok(IssueSort::Priority),
            "status" => Ok(IssueSort::Status),
            "category" => Ok(IssueSort::Category),
            "title" => Ok(IssueSort::Title),
            _ => Err(()),
        }
    }
}

impl IssueSort {
    pub const NAMES: &'static [&'static str] = &[
        "createdAt",
        "updatedAt",
        "priority",
        "status",
        "category",
        "title",
    ];

    pub fn compare(&self, a: &Issue, b: &Issue) -> Ordering {
        match self {
            IssueSort::CreatedAt => a.created_at.cmp(&b.created_at),
            IssueSort::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            IssueSort::Priority => a.priority.rank().cmp(&b.priority.rank()),
            IssueSort::Status => a.status.as_str().cmp(b.status.as_str()),
            IssueSort::Category => a.category.as_str().cmp(b.category.as_str()),
            IssueSort::Title => a.title.cmp(&b.title),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UserSort {
    #[default]
    CreatedAt,
    Name,
    Email,
    Role,
}

impl FromStr for UserSort {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "createdAt" => Ok(UserSort::CreatedAt),
            "name" => Ok(UserSort::Name),
            "email" => Ok(UserSort::Email),
            "role" => Ok(UserSort::Role),
            _ => Err(()),
        }
    }
}

impl UserSort {
    pub const NAMES: &'static [&'static str] = &["createdAt", "name", "email", "role"];

    pub fn compare(&self, a: &User, b: &User) -> Ordering {
        match self {
            UserSort::CreatedAt => a.created_at.cmp(&b.created_at),
            UserSort::Name => a.name.cmp(&b.name),
            UserSort::Email => a.email.cmp(&b.email),
            UserSort::Role => a.role.as_str().cmp(b.role.as_str()),
        }
    }
}

/// Raw pagination parameters as they arrive in a query string
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub sort_by: Option<String>,
    pub sort_order: Option<SortOrder>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest<S> {
    /// 1-based page number
    pub page: u64,
    pub limit: u64,
    pub sort: S,
    pub order: SortOrder,
}

impl<S> PageRequest<S> {
    /// Rows to skip, capped at the largest START the database accepts
    pub fn offset(&self) -> u64 {
        self.page
            .saturating_sub(1)
            .saturating_mul(self.limit)
            .min(i64::MAX as u64)
    }
}

impl PageQuery {
    /// Clamp page and limit into range and resolve the sort key. An unknown
    /// sort field is a validation error, the rest never fails.
    pub fn resolve<S>(
        &self,
        limits: &PaginationConfig,
        allowed: &[&str],
    ) -> Result<PageRequest<S>, ApiError>
    where
        S: FromStr + Default,
    {
        let sort = match self.sort_by.as_deref().map(str::trim) {
            None | Some("") => S::default(),
            Some(name) => name.parse::<S>().map_err(|_| {
                ApiError::validation(vec![FieldError::new(
                    "sortBy",
                    format!("Sort field must be one of: {}", allowed.join(", ")),
                )])
            })?,
        };

        Ok(PageRequest {
            page: self.page.unwrap_or(1).max(1),
            limit: self
                .limit
                .unwrap_or(limits.default_limit)
                .clamp(1, limits.max_limit),
            sort,
            order: self.sort_order.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub current_page: u64,
    pub total_pages: u64,
    pub total_items: u64,
    pub items_per_page: u64,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}

impl Pagination {
    pub fn new(page: u64, limit: u64, total_items: u64) -> Pagination {
        let total_pages = if limit == 0 {
            0
        } else {
            (total_items + limit - 1) / limit
        };
        Pagination {
            current_page: page,
            total_pages,
            total_items,
            items_per_page: limit,
            has_next_page: page < total_pages,
            has_prev_page: page > 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

impl<T> Page<T> {
    pub fn new<S>(items: Vec<T>, total: u64, request: &PageRequest<S>) -> Page<T> {
        Page {
            items,
            pagination: Pagination::new(request.page, request.limit, total),
        }
    }

    pub fn empty<S>(request: &PageRequest<S>) -> Page<T> {
        Page::new(vec![], 0, request)
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            pagination: self.pagination,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_page_and_limit() {
        let limits = PaginationConfig::default();
        let query = PageQuery {
            page: Some(0),
            limit: Some(1000),
            ..Default::default()
        };
        let request: PageRequest<IssueSort> = query.resolve(&limits, IssueSort::NAMES).unwrap();

        assert_eq!(request.page, 1);
        assert_eq!(request.limit, 100);
        assert_eq!(request.sort, IssueSort::CreatedAt);
        assert_eq!(request.order, SortOrder::Desc);

        let request: PageRequest<IssueSort> = PageQuery {
            limit: Some(0),
            ..Default::default()
        }
        .resolve(&limits, IssueSort::NAMES)
        .unwrap();
        assert_eq!(request.limit, 1);
    }

    #[test]
    fn unknown_sort_field_is_rejected() {
        let query = PageQuery {
            sort_by: Some("password".into()),
            ..Default::default()
        };
        let err = query
            .resolve::<UserSort>(&PaginationConfig::default(), UserSort::NAMES)
            .unwrap_err();

        match err {
            ApiError::BadRequest { errors, .. } => assert_eq!(errors[0].field, "sortBy"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn pagination_flags() {
        let p = Pagination::new(2, 10, 25);
        assert_eq!(p.total_pages, 3);
        assert!(p.has_next_page);
        assert!(p.has_prev_page);

        let p = Pagination::new(1, 10, 0);
        assert_eq!(p.total_pages, 0);
        assert!(!p.has_next_page);
        assert!(!p.has_prev_page);

        let p = Pagination::new(3, 10, 30);
        assert!(!p.has_next_page);
    }

    #[test]
    fn offset_is_zero_based() {
        let request = PageRequest {
            page: 3,
            limit: 20,
            sort: UserSort::Name,
            order: SortOrder::Asc,
        };
        assert_eq!(request.offset(), 40);
    }

    #[test]
    fn huge_page_numbers_saturate() {
        let request: PageRequest<IssueSort> = PageQuery {
            page: Some(1_000_000_000_000_000_000),
            limit: Some(100),
            ..Default::default()
        }
        .resolve(&PaginationConfig::default(), IssueSort::NAMES)
        .unwrap();
        assert_eq!(request.offset(), i64::MAX as u64);

        let request = PageRequest { page: u64::MAX, ..request };
        assert_eq!(request.offset(), i64::MAX as u64);
    }
}
