//! Read-only restaurant and table reference data.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::model::{Restaurant, RestaurantId, Table, TableId};

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("cannot read directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid directory document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("duplicate restaurant id {0}")]
    DuplicateRestaurant(RestaurantId),
    #[error("duplicate table id {0}")]
    DuplicateTable(TableId),
    #[error("table {table} references unknown restaurant {restaurant}")]
    UnknownRestaurant {
        table: TableId,
        restaurant: RestaurantId,
    },
    #[error("table {0} not found")]
    TableNotFound(TableId),
}

/// On-disk shape of the reference data.
#[derive(Debug, Default, Deserialize)]
struct DirectoryDocument {
    #[serde(default)]
    restaurants: Vec<Restaurant>,
    #[serde(default)]
    tables: Vec<Table>,
}

#[derive(Debug, Default)]
pub struct TableDirectory {
    restaurants: HashMap<RestaurantId, Restaurant>,
    tables: HashMap<TableId, Table>,
}

impl TableDirectory {
    pub fn new(restaurants: Vec<Restaurant>, tables: Vec<Table>) -> Result<Self, DirectoryError> {
        let mut dir = Self::default();
        for r in restaurants {
            let id = r.id;
            if dir.restaurants.insert(id, r).is_some() {
                return Err(DirectoryError::DuplicateRestaurant(id));
            }
        }
        for t in tables {
            if !dir.restaurants.contains_key(&t.restaurant_id) {
                return Err(DirectoryError::UnknownRestaurant {
                    table: t.id,
                    restaurant: t.restaurant_id,
                });
            }
            let id = t.id;
            if dir.tables.insert(id, t).is_some() {
                return Err(DirectoryError::DuplicateTable(id));
            }
        }
        Ok(dir)
    }

    pub fn from_json(doc: &str) -> Result<Self, DirectoryError> {
        let doc: DirectoryDocument = serde_json::from_str(doc)?;
        Self::new(doc.restaurants, doc.tables)
    }

    pub fn load(path: &Path) -> Result<Self, DirectoryError> {
        let doc = std::fs::read_to_string(path)?;
        Self::from_json(&doc)
    }

    pub fn exists(&self, id: TableId) -> bool {
        self.tables.contains_key(&id)
    }

    pub fn restaurant_of(&self, id: TableId) -> Result<RestaurantId, DirectoryError> {
        self.tables
            .get(&id)
            .map(|t| t.restaurant_id)
            .ok_or(DirectoryError::TableNotFound(id))
    }

    pub fn table(&self, id: TableId) -> Option<&Table> {
        self.tables.get(&id)
    }

    pub fn restaurant(&self, id: RestaurantId) -> Option<&Restaurant> {
        self.restaurants.get(&id)
    }

    /// All tables sorted by id, optionally restricted to one restaurant.
    pub fn tables(&self, restaurant: Option<RestaurantId>) -> Vec<Table> {
        let mut out: Vec<Table> = self
            .tables
            .values()
            .filter(|t| restaurant.is_none_or(|r| t.restaurant_id == r))
            .cloned()
            .collect();
        out.sort_by_key(|t| t.id);
        out
    }

    pub fn restaurants(&self) -> Vec<Restaurant> {
        let mut out: Vec<Restaurant> = self.restaurants.values().cloned().collect();
        out.sort_by_key(|r| r.id);
        out
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
        "restaurants": [
            {"id": 1, "name": "Cantina", "address": "Rua A, 10", "phone": "1130000000", "capacity": 40},
            {"id": 2, "name": "Bistro", "address": "Rua B, 20", "phone": "1140000000", "capacity": 12}
        ],
        "tables": [
            {"id": 5, "number": 1, "capacity": 4, "restaurant_id": 1},
            {"id": 6, "number": 2, "capacity": 2, "restaurant_id": 1},
            {"id": 9, "number": 1, "capacity": 6, "restaurant_id": 2}
        ]
    }"#;

    #[test]
    fn lookups() {
        let dir = TableDirectory::from_json(DOC).unwrap();
        assert!(dir.exists(TableId(5)));
        assert!(!dir.exists(TableId(7)));
        assert_eq!(dir.restaurant_of(TableId(9)).unwrap(), RestaurantId(2));
        assert!(matches!(
            dir.restaurant_of(TableId(7)),
            Err(DirectoryError::TableNotFound(TableId(7)))
        ));
        assert_eq!(dir.table(TableId(6)).unwrap().capacity, 2);
        assert_eq!(dir.restaurant(RestaurantId(1)).unwrap().name, "Cantina");
        assert_eq!(dir.table_count(), 3);
    }

    #[test]
    fn listings_are_sorted_and_filterable() {
        let dir = TableDirectory::from_json(DOC).unwrap();
        let ids: Vec<_> = dir.tables(None).iter().map(|t| t.id.0).collect();
        assert_eq!(ids, vec![5, 6, 9]);
        let ids: Vec<_> = dir.tables(Some(RestaurantId(1))).iter().map(|t| t.id.0).collect();
        assert_eq!(ids, vec![5, 6]);
        let ids: Vec<_> = dir.restaurants().iter().map(|r| r.id.0).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn rejects_table_with_unknown_restaurant() {
        let doc = r#"{"restaurants": [], "tables": [{"id": 5, "number": 1, "capacity": 4, "restaurant_id": 3}]}"#;
        assert!(matches!(
            TableDirectory::from_json(doc),
            Err(DirectoryError::UnknownRestaurant { table: TableId(5), restaurant: RestaurantId(3) })
        ));
    }

    #[test]
    fn rejects_duplicates() {
        let doc = r#"{"restaurants": [
            {"id": 1, "name": "A", "address": "x", "phone": "1", "capacity": 1},
            {"id": 1, "name": "B", "address": "y", "phone": "2", "capacity": 1}
        ]}"#;
        assert!(matches!(
            TableDirectory::from_json(doc),
            Err(DirectoryError::DuplicateRestaurant(RestaurantId(1)))
        ));

        let doc = r#"{"restaurants": [{"id": 1, "name": "A", "address": "x", "phone": "1", "capacity": 1}],
            "tables": [
                {"id": 5, "number": 1, "capacity": 4, "restaurant_id": 1},
                {"id": 5, "number": 2, "capacity": 4, "restaurant_id": 1}
            ]}"#;
        assert!(matches!(
            TableDirectory::from_json(doc),
            Err(DirectoryError::DuplicateTable(TableId(5)))
        ));
    }

    #[test]
    fn rejects_bad_json() {
        assert!(matches!(
            TableDirectory::from_json("{\"tables\": 3}"),
            Err(DirectoryError::Json(_))
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let path = std::env::temp_dir().join("tablebook_test_directory_missing.json");
        let _ = std::fs::remove_file(&path);
        assert!(matches!(TableDirectory::load(&path), Err(DirectoryError::Io(_))));
    }
}
