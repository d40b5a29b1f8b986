//! Canonical URL construction for logical resource requests.

use std::collections::BTreeMap;
use std::fmt;

use crate::cache::{encode_id, BatchUrl};
use crate::config::ApiConfig;

/// Header carrying the real verb when a request is tunnelled through POST.
pub const METHOD_OVERRIDE_HEADER: &str = "x-dw-http-method-override";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
  Get,
  Post,
  Put,
  Patch,
  Delete,
}

impl HttpMethod {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Get => "GET",
      Self::Post => "POST",
      Self::Put => "PUT",
      Self::Patch => "PATCH",
      Self::Delete => "DELETE",
    }
  }

  /// Verbs the gateway only reliably accepts as POST.
  pub fn needs_override(&self) -> bool {
    matches!(self, Self::Put | Self::Patch | Self::Delete)
  }
}

impl fmt::Display for HttpMethod {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Caller-supplied query parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
  pub locale: Option<String>,
  pub currency: Option<String>,
  pub country: Option<String>,
  pub client_id: Option<String>,
  /// Free-form filters such as `expand` or `refine`
  pub filters: BTreeMap<String, String>,
}

impl QueryParams {
  pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
    self.locale = Some(locale.into());
    self
  }

  pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
    self.currency = Some(currency.into());
    self
  }

  pub fn with_country(mut self, country: impl Into<String>) -> Self {
    self.country = Some(country.into());
    self
  }

  pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
    self.client_id = Some(client_id.into());
    self
  }

  pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.filters.insert(key.into(), value.into());
    self
  }

  /// Write the set parameters into `out`, overwriting existing keys.
  fn write_into(&self, out: &mut BTreeMap<String, String>) {
    let named = [
      ("locale", &self.locale),
      ("currency", &self.currency),
      ("country", &self.country),
      ("client_id", &self.client_id),
    ];
    for (key, value) in named {
      if let Some(value) = value {
        out.insert(key.to_string(), value.clone());
      }
    }
    for (key, value) in &self.filters {
      out.insert(key.clone(), value.clone());
    }
  }
}

/// A logical request: which resource, which ids, which parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRequest {
  /// Resource path below the API base, e.g. `products` or `categories`
  pub resource: String,
  /// No ids addresses the resource itself, one a single entity, more a batch
  pub ids: Vec<String>,
  pub params: QueryParams,
}

impl ResourceRequest {
  pub fn new(resource: impl Into<String>) -> Self {
    Self {
      resource: resource.into(),
      ids: Vec::new(),
      params: QueryParams::default(),
    }
  }

  pub fn with_id(mut self, id: impl Into<String>) -> Self {
    self.ids.push(id.into());
    self
  }

  pub fn with_ids<I, S>(mut self, ids: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.ids.extend(ids.into_iter().map(Into::into));
    self
  }

  pub fn with_params(mut self, params: QueryParams) -> Self {
    self.params = params;
    self
  }
}

/// A canonical URL and, for batch requests, its decomposition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltUrl {
  pub url: String,
  pub batch: Option<BatchUrl>,
}

impl BuiltUrl {
  pub fn is_collection(&self) -> bool {
    self.batch.is_some()
  }
}

/// Builds canonical request URLs against one API base.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
  base_url: String,
  defaults: QueryParams,
  method_override: bool,
}

impl RequestBuilder {
  pub fn new(base_url: impl Into<String>, defaults: QueryParams) -> Self {
    Self {
      base_url: base_url.into().trim_end_matches('/').to_string(),
      defaults,
      method_override: true,
    }
  }

  pub fn from_config(api: &ApiConfig) -> Self {
    let defaults = QueryParams {
      locale: api.locale.clone(),
      currency: api.currency.clone(),
      country: api.country.clone(),
      client_id: Some(api.client_id.clone()),
      filters: BTreeMap::new(),
    };
    Self::new(api.base_url.clone(), defaults).with_method_override(api.method_override)
  }

  pub fn with_method_override(mut self, enabled: bool) -> Self {
    self.method_override = enabled;
    self
  }

  pub fn base_url(&self) -> &str {
    &self.base_url
  }

  /// Build the canonical URL for `request`.
  ///
  /// Parameters are merged as defaults, then `model_params`, then the
  /// request's own, and emitted in key order so the same logical request
  /// always yields the same URL.
  pub fn build(
    &self,
    request: &ResourceRequest,
    model_params: &BTreeMap<String, String>,
  ) -> BuiltUrl {
    let resource = request.resource.trim_matches('/');
    let base = format!("{}/{}/", self.base_url, resource);

    let mut params = BTreeMap::new();
    self.defaults.write_into(&mut params);
    params.extend(model_params.iter().map(|(k, v)| (k.clone(), v.clone())));
    request.params.write_into(&mut params);

    let query_suffix = if params.is_empty() {
      String::new()
    } else {
      let query = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params.iter())
        .finish();
      format!("?{}", query)
    };

    // Batch shape comes from the id count, never from parsing the path
    match request.ids.as_slice() {
      [] => BuiltUrl {
        url: format!("{}/{}{}", self.base_url, resource, query_suffix),
        batch: None,
      },
      [id] => BuiltUrl {
        url: format!("{}{}{}", base, encode_id(id), query_suffix),
        batch: None,
      },
      ids => {
        let batch = BatchUrl {
          base,
          ids: ids.to_vec(),
          query_suffix,
        };
        BuiltUrl {
          url: batch.url(),
          batch: Some(batch),
        }
      }
    }
  }

  /// The verb to put on the wire, adding the override header if needed.
  pub fn outbound_method(
    &self,
    method: HttpMethod,
    headers: &mut Vec<(String, String)>,
  ) -> HttpMethod {
    if !self.method_override || !method.needs_override() {
      return method;
    }

    headers.retain(|(name, _)| !name.eq_ignore_ascii_case(METHOD_OVERRIDE_HEADER));
    headers.push((METHOD_OVERRIDE_HEADER.to_string(), method.as_str().to_string()));
    HttpMethod::Post
  }
}
