//! Compile-time accessors for models backed by [`super::JsonModel`].

/// Generate typed `get`/`set`/`has` methods for a fixed list of schema
/// fields. The type must implement `AsRef<JsonModel>` and `AsMut<JsonModel>`.
///
/// ```ignore
/// typed_accessors! {
///   Product {
///     name / set_name / has_name: String = "name",
///     price / set_price / has_price: f64 = "price",
///   }
/// }
/// ```
#[macro_export]
macro_rules! typed_accessors {
  ($model:ty { $($get:ident / $set:ident / $has:ident : $ty:ty = $key:literal),* $(,)? }) => {
    impl $model {
      $(
        pub fn $get(&self) -> Option<$ty> {
          ::std::convert::AsRef::<$crate::models::JsonModel>::as_ref(self).get_as($key)
        }

        pub fn $set(&mut self, value: $ty) {
          ::std::convert::AsMut::<$crate::models::JsonModel>::as_mut(self).set_field($key, value)
        }

        pub fn $has(&self) -> bool {
          ::std::convert::AsRef::<$crate::models::JsonModel>::as_ref(self).has($key)
        }
      )*
    }
  };
}

/// Implement [`super::SyncModel`] for a newtype over `JsonModel` by
/// delegating to the named field.
#[macro_export]
macro_rules! json_backed_model {
  ($model:ty, $field:ident) => {
    impl ::std::convert::AsRef<$crate::models::JsonModel> for $model {
      fn as_ref(&self) -> &$crate::models::JsonModel {
        &self.$field
      }
    }

    impl ::std::convert::AsMut<$crate::models::JsonModel> for $model {
      fn as_mut(&mut self) -> &mut $crate::models::JsonModel {
        &mut self.$field
      }
    }

    impl $crate::models::SyncModel for $model {
      fn name(&self) -> &str {
        $crate::models::SyncModel::name(&self.$field)
      }

      fn collection_type(&self) -> &str {
        $crate::models::SyncModel::collection_type(&self.$field)
      }

      fn cache_eligible(&self) -> bool {
        $crate::models::SyncModel::cache_eligible(&self.$field)
      }

      fn is_secure(&self) -> bool {
        $crate::models::SyncModel::is_secure(&self.$field)
      }

      fn timeout(&self) -> Option<::std::time::Duration> {
        $crate::models::SyncModel::timeout(&self.$field)
      }

      fn validate_tls(&self) -> Option<bool> {
        $crate::models::SyncModel::validate_tls(&self.$field)
      }

      fn query_params(&self) -> ::std::collections::BTreeMap<String, String> {
        $crate::models::SyncModel::query_params(&self.$field)
      }

      fn to_json(&self) -> ::serde_json::Value {
        $crate::models::SyncModel::to_json(&self.$field)
      }

      fn clear(&mut self, silent: bool) {
        $crate::models::SyncModel::clear(&mut self.$field, silent)
      }

      fn set(&mut self, attributes: &::serde_json::Value, silent: bool) {
        $crate::models::SyncModel::set(&mut self.$field, attributes, silent)
      }

      fn reset(&mut self, response: &::serde_json::Value) {
        $crate::models::SyncModel::reset(&mut self.$field, response)
      }

      fn normalize(&self, response: ::serde_json::Value) -> ::serde_json::Value {
        $crate::models::SyncModel::normalize(&self.$field, response)
      }

      fn set_etag(&mut self, etag: &str) {
        $crate::models::SyncModel::set_etag(&mut self.$field, etag)
      }

      fn set_auth_token(&mut self, token: &str) {
        $crate::models::SyncModel::set_auth_token(&mut self.$field, token)
      }
    }
  };
}
