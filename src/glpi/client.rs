use std::sync::Arc;

use reqwest::Method;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::api_types::ApiSearchResponse;
use super::fields::{raw_record, FieldMap, RawRecord};
use super::session::{SessionManager, UpstreamResponse};
use super::types::{ContentRange, EntityType, PageRange, SearchResult, TicketRecord};
use crate::error::{Error, Result};

/// GLPI search operators we use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchType {
  Equals,
  MoreThan,
  LessThan,
}

impl SearchType {
  fn as_str(&self) -> &'static str {
    match self {
      Self::Equals => "equals",
      Self::MoreThan => "morethan",
      Self::LessThan => "lessthan",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Criterion {
  pub field: u32,
  pub searchtype: SearchType,
  pub value: String,
}

/// Field-indexed search criteria, AND-linked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
  pub criteria: Vec<Criterion>,
  pub forcedisplay: Vec<u32>,
}

impl SearchQuery {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn and(mut self, field: u32, searchtype: SearchType, value: impl ToString) -> Self {
    self.criteria.push(Criterion {
      field,
      searchtype,
      value: value.to_string(),
    });
    self
  }

  pub fn display(mut self, fields: impl IntoIterator<Item = u32>) -> Self {
    self.forcedisplay.extend(fields);
    self
  }

  /// Render as `criteria[n][...]`, `forcedisplay[n]` and `range` query parameters.
  pub fn to_params(&self, range: PageRange) -> Vec<(String, String)> {
    let mut params = Vec::new();

    for (i, criterion) in self.criteria.iter().enumerate() {
      if i > 0 {
        params.push((format!("criteria[{}][link]", i), "AND".to_string()));
      }
      params.push((format!("criteria[{}][field]", i), criterion.field.to_string()));
      params.push((
        format!("criteria[{}][searchtype]", i),
        criterion.searchtype.as_str().to_string(),
      ));
      params.push((format!("criteria[{}][value]", i), criterion.value.clone()));
    }

    for (i, field) in self.forcedisplay.iter().enumerate() {
      params.push((format!("forcedisplay[{}]", i), field.to_string()));
    }

    params.push(("range".to_string(), range.to_string()));
    params
  }
}

/// GLPI REST client. All calls go through the shared session.
#[derive(Clone)]
pub struct GlpiClient {
  session: Arc<SessionManager>,
  fields: FieldMap,
}

impl GlpiClient {
  pub fn new(session: Arc<SessionManager>, fields: FieldMap) -> Self {
    Self { session, fields }
  }

  pub fn fields(&self) -> &FieldMap {
    &self.fields
  }

  /// Run a search and return raw field-indexed rows.
  pub async fn search(
    &self,
    entity_type: EntityType,
    query: &SearchQuery,
    range: PageRange,
  ) -> Result<SearchResult<RawRecord>> {
    let path = format!("search/{}", entity_type);
    let response = self
      .session
      .authenticated_request(Method::GET, &path, &query.to_params(range))
      .await?;

    let result = parse_search(&response)?;
    debug!(
      entity = %entity_type,
      range = %range,
      count = result.count,
      total = result.total_count,
      partial = result.is_partial,
      "Search page fetched"
    );
    Ok(result)
  }

  /// Search tickets and map rows through the field map. Rows that fail
  /// validation are dropped; `count` still reflects what upstream sent.
  pub async fn search_tickets(
    &self,
    query: &SearchQuery,
    range: PageRange,
  ) -> Result<SearchResult<TicketRecord>> {
    let query = query.clone().display(self.fields.display_fields());
    let result = self.search(EntityType::Ticket, &query, range).await?;

    Ok(result.map_records(|rows| {
      let mut dropped = 0usize;
      let tickets: Vec<TicketRecord> = rows
        .iter()
        .filter_map(|row| match self.fields.to_ticket(row) {
          Ok(ticket) => Some(ticket),
          Err(reason) => {
            dropped += 1;
            debug!("Dropping search row: {}", reason);
            None
          }
        })
        .collect();

      if dropped > 0 {
        warn!(
          dropped,
          field_map = %self.fields.version,
          "Search rows did not match the field map"
        );
      }
      tickets
    }))
  }

  /// Fetch a single item. Any non-200 answer from GLPI means absent.
  pub async fn get_item<T: DeserializeOwned>(
    &self,
    entity_type: EntityType,
    id: u64,
  ) -> Result<Option<T>> {
    let path = format!("{}/{}", entity_type, id);
    let response = match self
      .session
      .authenticated_request(Method::GET, &path, &[])
      .await
    {
      Ok(response) => response,
      Err(Error::UpstreamUnavailable {
        status: Some(status),
        ..
      }) if !matches!(status, 429 | 500..=599) => {
        debug!(%entity_type, id, status, "Item not available");
        return Ok(None);
      }
      Err(e) => return Err(e),
    };

    if response.status != 200 {
      return Ok(None);
    }
    response.json().map(Some)
  }
}

/// Interpret a successful search response.
fn parse_search(response: &UpstreamResponse) -> Result<SearchResult<RawRecord>> {
  let body: ApiSearchResponse = if response.body.trim().is_empty() {
    ApiSearchResponse::default()
  } else {
    response.json()?
  };
  let content_range = response.header("Content-Range").and_then(ContentRange::parse);

  let rows = body.data.len();
  let count = body.count.map(|c| c as usize).unwrap_or(rows);

  let total_count = match (body.totalcount, content_range) {
    (0, Some(cr)) => cr.total as usize,
    (0, None) => count,
    (total, _) => total as usize,
  };

  let is_partial = response.status == 206 || content_range.map_or(false, |cr| cr.is_truncated());

  Ok(SearchResult {
    records: body.data.into_iter().map(raw_record).collect(),
    count,
    total_count,
    is_partial,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::{Credentials, HttpConfig};
  use crate::glpi::session::{create_http_client, SessionSettings};
  use crate::glpi::types::{StatusBucket, Ticket};
  use serde_json::json;
  use wiremock::matchers::{method, path, query_param};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  async fn client(server: &MockServer) -> GlpiClient {
    Mock::given(path("/initSession"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "session_token": "tok" })))
      .mount(server)
      .await;

    let session = SessionManager::new(
      create_http_client(&HttpConfig::default()).unwrap(),
      SessionSettings {
        base_url: server.uri(),
        credentials: Credentials::UserToken("t".into()),
        app_token: None,
        session_lifetime: None,
        max_retries: 0,
      },
    );
    GlpiClient::new(Arc::new(session), FieldMap::default())
  }

  #[test]
  fn test_query_params() {
    let query = SearchQuery::new()
      .and(8, SearchType::Equals, 89)
      .and(12, SearchType::Equals, 2)
      .display([2, 12]);
    let params = query.to_params(PageRange::first(50));

    assert!(params.contains(&("criteria[0][field]".into(), "8".into())));
    assert!(params.contains(&("criteria[0][value]".into(), "89".into())));
    assert!(params.contains(&("criteria[1][link]".into(), "AND".into())));
    assert!(params.contains(&("criteria[1][searchtype]".into(), "equals".into())));
    assert!(params.contains(&("forcedisplay[1]".into(), "12".into())));
    assert_eq!(params.last(), Some(&("range".into(), "0-49".into())));
    assert!(!params.iter().any(|(k, _)| k == "criteria[0][link]"));
  }

  #[tokio::test]
  async fn test_partial_content_is_reported_not_failed() {
    let server = MockServer::start().await;
    let rows: Vec<_> = (1..=50).map(|id| json!({ "2": id, "12": 1 })).collect();
    Mock::given(method("GET"))
      .and(path("/search/Ticket"))
      .and(query_param("range", "0-49"))
      .respond_with(
        ResponseTemplate::new(206)
          .insert_header("Content-Range", "0-49/200")
          .set_body_json(json!({ "totalcount": 200, "count": 50, "data": rows })),
      )
      .mount(&server)
      .await;

    let client = client(&server).await;
    let result = client
      .search_tickets(&SearchQuery::new(), PageRange::first(50))
      .await
      .unwrap();

    assert!(result.is_partial);
    assert_eq!(result.total_count, 200);
    assert_eq!(result.count, 50);
    assert_eq!(result.records.len(), 50);
    assert_eq!(result.records[0].status, StatusBucket::New);
  }

  #[tokio::test]
  async fn test_content_range_alone_marks_partial() {
    let server = MockServer::start().await;
    Mock::given(path("/search/Ticket"))
      .respond_with(
        ResponseTemplate::new(200)
          .insert_header("Content-Range", "0-1/7")
          .set_body_json(json!({ "count": 2, "data": [{ "2": 1 }, { "2": 2 }] })),
      )
      .mount(&server)
      .await;

    let result = client(&server)
      .await
      .search(EntityType::Ticket, &SearchQuery::new(), PageRange::first(2))
      .await
      .unwrap();
    assert!(result.is_partial);
    assert_eq!(result.total_count, 7);
  }

  #[tokio::test]
  async fn test_complete_result() {
    let server = MockServer::start().await;
    Mock::given(path("/search/Ticket"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "totalcount": 2,
        "count": 2,
        "data": [{ "2": 1, "12": 5 }, { "2": 2 }]
      })))
      .mount(&server)
      .await;

    let result = client(&server)
      .await
      .search_tickets(&SearchQuery::new(), PageRange::first(50))
      .await
      .unwrap();
    assert!(!result.is_partial);
    assert_eq!(result.total_count, 2);
    // the row without a status is dropped, but still counted as returned
    assert_eq!(result.count, 2);
    assert_eq!(result.records.len(), 1);
  }

  #[tokio::test]
  async fn test_get_item() {
    let server = MockServer::start().await;
    Mock::given(path("/Ticket/5"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "id": 5,
        "name": "VPN down",
        "status": 2
      })))
      .mount(&server)
      .await;
    Mock::given(path("/Ticket/6"))
      .respond_with(ResponseTemplate::new(404).set_body_json(json!(["ERROR_ITEM_NOT_FOUND", ""])))
      .mount(&server)
      .await;

    let client = client(&server).await;
    let ticket: Option<Ticket> = client.get_item(EntityType::Ticket, 5).await.unwrap();
    assert_eq!(ticket.unwrap().name, "VPN down");

    let missing: Option<Ticket> = client.get_item(EntityType::Ticket, 6).await.unwrap();
    assert!(missing.is_none());
  }
}
