use rust_decimal::prelude::ToPrimitive;
use serde_json::{json, Value};

use crate::models::product::ProductSnapshot;

/// Category used when the local category has no marketplace mapping.
pub const DEFAULT_CATEGORY_ID: &str = "MLA1234";

pub fn map_category(local: &str) -> &'static str {
    match local.trim().to_lowercase().as_str() {
        "supplements" => "MLA1234",
        "equipment" => "MLA5678",
        "clothing" => "MLA9012",
        _ => DEFAULT_CATEGORY_ID,
    }
}

pub fn format_pictures(images: &[String]) -> Value {
    Value::Array(
        images
            .iter()
            .map(|url| url.trim())
            .filter(|url| !url.is_empty())
            .map(|url| json!({ "source": url }))
            .collect(),
    )
}

/// `{"brand": "Star"}` → `[{"id": "BRAND", "value_name": "Star"}]`, sorted by id.
pub fn format_attributes(attributes: &Value) -> Value {
    let Value::Object(map) = attributes else {
        return Value::Array(Vec::new());
    };

    let mut formatted: Vec<(String, String)> = map
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(name, value)| {
            let id = name.trim().to_uppercase().replace([' ', '-'], "_");
            let value_name = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (id, value_name)
        })
        .collect();
    formatted.sort_by(|a, b| a.0.cmp(&b.0));

    Value::Array(
        formatted
            .into_iter()
            .map(|(id, value_name)| json!({ "id": id, "value_name": value_name }))
            .collect(),
    )
}

/// Translate a local product into the marketplace item schema. No side effects.
pub fn build_item_payload(product: &ProductSnapshot) -> Value {
    json!({
        "title": product.name,
        "description": { "plain_text": product.description.clone().unwrap_or_default() },
        "price": product.price.to_f64().unwrap_or(0.0),
        "available_quantity": product.current_stock.max(0),
        "category_id": map_category(&product.category),
        "pictures": format_pictures(&product.images),
        "attributes": format_attributes(&product.attributes),
    })
}
