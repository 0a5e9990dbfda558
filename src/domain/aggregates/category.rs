//! Category and SubCategory

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;
use crate::domain::value_objects::{not_blank, CatalogStatus};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub image: Option<String>,
    pub status: CatalogStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubCategory {
    pub id: Uuid,
    pub category_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub image: Option<String>,
    pub status: CatalogStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize, Validate)]
pub struct CategoryDraft {
    #[validate(length(min = 1, max = 100, message = "name is required"), custom = "not_blank")]
    pub name: String,
    pub description: Option<String>,
    #[validate(url(message = "image must be a URL"))]
    pub image: Option<String>,
    #[serde(default)]
    pub status: CatalogStatus,
}

#[derive(Clone, Debug, Deserialize, Validate)]
pub struct SubCategoryDraft {
    pub category_id: Uuid,
    #[validate(length(min = 1, max = 100, message = "name is required"), custom = "not_blank")]
    pub name: String,
    pub description: Option<String>,
    #[validate(url(message = "image must be a URL"))]
    pub image: Option<String>,
    #[serde(default)]
    pub status: CatalogStatus,
}

impl Category {
    pub fn create(draft: CategoryDraft) -> Self {
        let now = Utc::now();
        let mut c = Self { id: Uuid::now_v7(), name: String::new(), description: None, image: None, status: draft.status, created_at: now, updated_at: now };
        c.apply(draft);
        c
    }

    pub fn apply(&mut self, d: CategoryDraft) {
        self.name = d.name.trim().to_string();
        self.description = d.description;
        self.image = d.image;
        self.status = d.status;
        self.updated_at = Utc::now();
    }
}

impl SubCategory {
    pub fn create(draft: SubCategoryDraft) -> Self {
        let now = Utc::now();
        let mut s = Self {
            id: Uuid::now_v7(), category_id: draft.category_id, name: String::new(), description: None, image: None,
            status: draft.status, created_at: now, updated_at: now,
        };
        s.apply(draft);
        s
    }

    pub fn apply(&mut self, d: SubCategoryDraft) {
        self.category_id = d.category_id;
        self.name = d.name.trim().to_string();
        self.description = d.description;
        self.image = d.image;
        self.status = d.status;
        self.updated_at = Utc::now();
    }
}
