use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Local product as stored in the CRM.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProductRow {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub current_stock: i32,
    pub category: String,
    pub images: serde_json::Value,
    pub attributes: serde_json::Value,
    pub meli_item_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ProductRow {
    pub fn snapshot(&self) -> ProductSnapshot {
        let images = match &self.images {
            serde_json::Value::Array(items) => items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
            _ => Vec::new(),
        };

        ProductSnapshot {
            name: self.name.clone(),
            description: self.description.clone(),
            price: self.price,
            current_stock: self.current_stock,
            category: self.category.clone(),
            images,
            attributes: self.attributes.clone(),
        }
    }
}

/// The local fields that are pushed to the marketplace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub current_stock: i32,
    pub category: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub attributes: serde_json::Value,
}

/// Partial update from the product edit form. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Decimal>,
    pub current_stock: Option<i32>,
    pub category: Option<String>,
    pub images: Option<Vec<String>>,
    pub attributes: Option<serde_json::Value>,
}

impl ProductUpdate {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err("name must not be empty".into());
            }
        }
        if let Some(price) = self.price {
            if price.is_sign_negative() {
                return Err("price must not be negative".into());
            }
        }
        if let Some(stock) = self.current_stock {
            if stock < 0 {
                return Err("current_stock must not be negative".into());
            }
        }
        if let Some(attrs) = &self.attributes {
            if !attrs.is_object() {
                return Err("attributes must be a JSON object".into());
            }
        }
        Ok(())
    }
}
