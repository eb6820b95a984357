use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lifecycle state of an item. Persisted and transmitted as the literal
/// strings `DISPONIVEL` and `RESGATADO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ItemStatus {
    #[default]
    #[serde(rename = "DISPONIVEL")]
    Available,
    #[serde(rename = "RESGATADO")]
    Claimed,
}

impl ItemStatus {
    pub const ALL: [ItemStatus; 2] = [ItemStatus::Available, ItemStatus::Claimed];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Available => "DISPONIVEL",
            ItemStatus::Claimed => "RESGATADO",
        }
    }

    /// Comma-separated list of the accepted wire values.
    pub fn accepted_values() -> String {
        Self::ALL
            .iter()
            .map(ItemStatus::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown item status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for ItemStatus {
    type Err = UnknownStatus;

    /// Exact match only: no trimming, no case folding.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

impl TryFrom<String> for ItemStatus {
    type Error = UnknownStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A found item as stored, joined with its category name.
#[derive(Debug, Clone, FromRow)]
pub struct ItemModel {
    pub id: i64,
    pub code: String,
    pub title: String,
    pub category_id: Option<i64>,
    pub category_name: Option<String>,
    pub description: String,
    pub photo: Option<String>,
    #[sqlx(try_from = "String")]
    pub status: ItemStatus,
    pub found_on: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ItemModel {
    /// Copies the editable fields onto this item. Code and timestamps are
    /// never touched here.
    pub fn apply(&mut self, fields: ItemFields) {
        self.title = fields.title;
        self.category_id = fields.category_id;
        self.description = fields.description;
        self.photo = fields.photo;
        self.found_on = fields.found_on;
    }
}

/// Caller-editable item fields. Codes are only ever produced by the
/// generator.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemFields {
    pub title: String,
    pub category_id: Option<i64>,
    pub description: String,
    pub photo: Option<String>,
    pub found_on: NaiveDate,
}

impl ItemFields {
    pub fn validate(&self) -> crate::AppResult<()> {
        if self.title.trim().is_empty() {
            return Err(crate::AppError::MissingParameter("title"));
        }
        if self.title.chars().count() > 255 {
            return Err(crate::AppError::InvalidInput(
                "title must be at most 255 characters".to_string(),
            ));
        }
        if self.description.trim().is_empty() {
            return Err(crate::AppError::MissingParameter("description"));
        }
        if let Some(photo) = &self.photo {
            if photo.chars().count() > 255 {
                return Err(crate::AppError::InvalidInput(
                    "photo must be at most 255 characters".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Row to insert: editable fields plus the generated code.
#[derive(Debug, Clone)]
pub struct NewItem {
    pub code: String,
    pub fields: ItemFields,
}

/// Listing filter. `code` is an exact match. `search` is split into terms on
/// whitespace and commas; each term must be a case-insensitive substring of
/// the code, title or description.
#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    pub code: Option<String>,
    pub search: Option<String>,
}

impl ItemFilter {
    /// Non-empty search terms, in query order.
    pub fn search_terms(&self) -> Vec<&str> {
        self.search
            .as_deref()
            .map(|s| {
                s.split(|c: char| c.is_whitespace() || c == ',')
                    .filter(|term| !term.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn matches(&self, item: &ItemModel) -> bool {
        if let Some(code) = &self.code {
            if item.code != *code {
                return false;
            }
        }
        let haystacks = [&item.code, &item.title, &item.description].map(|f| f.to_lowercase());
        self.search_terms().iter().all(|term| {
            let needle = term.to_lowercase();
            haystacks.iter().any(|field| field.contains(&needle))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ItemModel {
        let now = Utc::now();
        ItemModel {
            id: 1,
            code: "AB12CD34".to_string(),
            title: "Blue umbrella".to_string(),
            category_id: None,
            category_name: None,
            description: "Left at the library".to_string(),
            photo: None,
            status: ItemStatus::Available,
            found_on: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_status_wire_values() {
        assert_eq!(ItemStatus::Available.as_str(), "DISPONIVEL");
        assert_eq!(ItemStatus::Claimed.as_str(), "RESGATADO");
        assert_eq!("RESGATADO".parse::<ItemStatus>(), Ok(ItemStatus::Claimed));
        assert_eq!(ItemStatus::default(), ItemStatus::Available);
        assert_eq!(ItemStatus::accepted_values(), "DISPONIVEL, RESGATADO");
    }

    #[test]
    fn test_status_parse_is_exact() {
        assert!("resgatado".parse::<ItemStatus>().is_err());
        assert!(" RESGATADO".parse::<ItemStatus>().is_err());
        assert!("CLAIMED".parse::<ItemStatus>().is_err());
        assert!("".parse::<ItemStatus>().is_err());
    }

    #[test]
    fn test_status_serde() {
        let json = serde_json::to_string(&ItemStatus::Claimed).unwrap();
        assert_eq!(json, "\"RESGATADO\"");
    }

    #[test]
    fn test_filter_code_is_exact_and_case_sensitive() {
        let item = sample();
        let exact = ItemFilter {
            code: Some("AB12CD34".to_string()),
            search: None,
        };
        let lower = ItemFilter {
            code: Some("ab12cd34".to_string()),
            search: None,
        };
        let partial = ItemFilter {
            code: Some("AB12".to_string()),
            search: None,
        };
        assert!(exact.matches(&item));
        assert!(!lower.matches(&item));
        assert!(!partial.matches(&item));
    }

    #[test]
    fn test_filter_search_is_substring() {
        let item = sample();
        for needle in ["ab12", "UMBRELLA", "library"] {
            let filter = ItemFilter {
                code: None,
                search: Some(needle.to_string()),
            };
            assert!(filter.matches(&item), "{needle} should match");
        }
        let miss = ItemFilter {
            code: None,
            search: Some("wallet".to_string()),
        };
        assert!(!miss.matches(&item));
    }

    #[test]
    fn test_filter_search_terms_must_each_match_a_field() {
        let item = sample();
        for query in ["umbrella library", "Blue,library", "  ab12   LEFT ", "umbrella, at"] {
            let filter = ItemFilter {
                code: None,
                search: Some(query.to_string()),
            };
            assert!(filter.matches(&item), "{query:?} should match");
        }
        let partial = ItemFilter {
            code: None,
            search: Some("umbrella wallet".to_string()),
        };
        assert!(!partial.matches(&item));
    }

    #[test]
    fn test_filter_blank_search_matches_everything() {
        let filter = ItemFilter {
            code: None,
            search: Some(" , ".to_string()),
        };
        assert!(filter.search_terms().is_empty());
        assert!(filter.matches(&sample()));
        assert_eq!(
            ItemFilter {
                code: None,
                search: Some("a,b  c".to_string()),
            }
            .search_terms(),
            vec!["a", "b", "c"]
        );
    }

    #[test]
    fn test_fields_validation() {
        let mut fields = ItemFields {
            title: "Keys".to_string(),
            category_id: None,
            description: "Three keys on a ring".to_string(),
            photo: None,
            found_on: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        };
        assert!(fields.validate().is_ok());

        fields.title = "  ".to_string();
        assert!(matches!(
            fields.validate(),
            Err(crate::AppError::MissingParameter("title"))
        ));
    }
}
