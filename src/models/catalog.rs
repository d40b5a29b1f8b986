//! Catalog models with schema-typed accessors.

use super::{JsonModel, SyncModel};

/// A product, cacheable and requested with prices and images expanded.
#[derive(Debug, Clone)]
pub struct Product {
  model: JsonModel,
}

impl Product {
  pub fn new() -> Self {
    Self {
      model: JsonModel::new("product")
        .with_collection_type("products")
        .with_query_param("expand", "availability,images,prices")
        .cached(),
    }
  }

  /// Members of a batch response, after a batch call.
  pub fn members(&self) -> &[serde_json::Value] {
    self.model.items()
  }
}

impl Default for Product {
  fn default() -> Self {
    Self::new()
  }
}

crate::json_backed_model!(Product, model);

crate::typed_accessors! {
  Product {
    id / set_id / has_id: String = "id",
    name / set_name / has_name: String = "name",
    short_description / set_short_description / has_short_description: String = "short_description",
    price / set_price / has_price: f64 = "price",
    currency / set_currency / has_currency: String = "currency",
    primary_category_id / set_primary_category_id / has_primary_category_id: String = "primary_category_id",
  }
}

/// A catalog category.
#[derive(Debug, Clone)]
pub struct Category {
  model: JsonModel,
}

impl Category {
  pub fn new() -> Self {
    Self {
      model: JsonModel::new("category")
        .with_collection_type("categories")
        .cached(),
    }
  }
}

impl Default for Category {
  fn default() -> Self {
    Self::new()
  }
}

crate::json_backed_model!(Category, model);

crate::typed_accessors! {
  Category {
    id / set_id / has_id: String = "id",
    name / set_name / has_name: String = "name",
    parent_category_id / set_parent_category_id / has_parent_category_id: String = "parent_category_id",
  }
}

/// Pick the model for a resource path.
pub fn model_for(resource: &str) -> Box<dyn SyncModel> {
  match resource.trim_matches('/') {
    "products" => Box::new(Product::new()),
    "categories" => Box::new(Category::new()),
    other => Box::new(JsonModel::new(other).cached()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_typed_accessors() {
    let mut product = Product::new();
    assert!(!product.has_name());

    product.set(&json!({"id": "A", "name": "Shirt", "price": 19.5}), false);
    assert_eq!(product.id().as_deref(), Some("A"));
    assert_eq!(product.name().as_deref(), Some("Shirt"));
    assert_eq!(product.price(), Some(19.5));
    assert!(!product.has_currency());

    product.set_currency("USD".to_string());
    assert_eq!(product.currency().as_deref(), Some("USD"));
  }

  #[test]
  fn test_product_contributes_expand() {
    let product = Product::new();
    assert!(product.cache_eligible());
    assert_eq!(
      product.query_params().get("expand").map(String::as_str),
      Some("availability,images,prices")
    );
  }

  #[test]
  fn test_model_for() {
    assert_eq!(model_for("products").name(), "product");
    assert_eq!(model_for("/categories/").name(), "category");
    assert_eq!(model_for("stores").name(), "stores");
  }
}
