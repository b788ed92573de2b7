//! Smartsheet REST API 2.0 client.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::{OutboundRow, RejectedRow, SheetClient, SheetRow, WriteAck};
use crate::config::SmartsheetConfig;
use crate::errors::{FetchError, WriteError};
use crate::mapper;
use crate::models::SyncType;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sheet {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub total_row_count: Option<i64>,
    #[serde(default)]
    pub columns: Vec<SheetColumn>,
    #[serde(default)]
    pub rows: Vec<SheetApiRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetColumn {
    pub id: i64,
    pub title: String,
    #[serde(rename = "type", default)]
    pub column_type: Option<String>,
    #[serde(default)]
    pub primary: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetApiRow {
    pub id: i64,
    #[serde(default)]
    pub row_number: Option<i64>,
    #[serde(default)]
    pub cells: Vec<SheetCell>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetCell {
    pub column_id: i64,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
    #[serde(default)]
    pub display_value: Option<String>,
}

impl Sheet {
    /// Convert API rows into title-keyed [`SheetRow`]s.
    pub fn to_rows(&self) -> Vec<SheetRow> {
        let titles: HashMap<i64, &str> = self
            .columns
            .iter()
            .map(|c| (c.id, c.title.as_str()))
            .collect();

        self.rows
            .iter()
            .map(|api_row| {
                let mut row = SheetRow::new(api_row.id);
                row.row_number = api_row.row_number;
                for cell in &api_row.cells {
                    let Some(title) = titles.get(&cell.column_id) else {
                        continue;
                    };
                    let value = match (&cell.value, &cell.display_value) {
                        (Some(v), _) if !v.is_null() => v.clone(),
                        (_, Some(d)) => serde_json::Value::String(d.clone()),
                        _ => continue,
                    };
                    row.set(title, value);
                }
                row
            })
            .collect()
    }

    fn column_id(&self, title: &str) -> Option<i64> {
        self.columns
            .iter()
            .find(|c| c.title.trim().eq_ignore_ascii_case(title.trim()))
            .map(|c| c.id)
    }

    /// Resolve an outbound column title the way the importer reads it: the
    /// canonical title first, then each of its aliases in order.
    pub fn column_for(&self, sync_type: SyncType, title: &str) -> Option<i64> {
        if let Some(id) = self.column_id(title) {
            return Some(id);
        }
        let column = mapper::known_columns(sync_type)
            .iter()
            .find(|c| c.title.eq_ignore_ascii_case(title.trim()))?;
        column.aliases.iter().find_map(|alias| self.column_id(alias))
    }

    /// Split outbound rows into updates of rows already on the sheet and
    /// appends, rejecting rows the sheet has no key column for.
    fn plan_writes(&self, sync_type: SyncType, rows: Vec<OutboundRow>) -> WritePlan {
        let existing: HashMap<String, i64> = self
            .to_rows()
            .iter()
            .filter_map(|r| mapper::natural_key_of(sync_type, r).map(|k| (k, r.row_id)))
            .collect();

        let mut plan = WritePlan::default();
        for row in rows {
            if self.column_for(sync_type, &row.key_column).is_none() {
                plan.rejected.push(RejectedRow {
                    natural_key: row.natural_key,
                    reason: format!("sheet has no '{}' column", row.key_column),
                });
                continue;
            }
            let mut cells = Vec::with_capacity(row.cells.len());
            for (title, value) in &row.cells {
                match self.column_for(sync_type, title) {
                    Some(column_id) => cells.push(CellWrite {
                        column_id,
                        value: value.clone(),
                    }),
                    None => debug!(%sync_type, column = %title, "sheet lacks column, cell skipped"),
                }
            }

            match existing.get(&row.natural_key) {
                Some(&id) => plan.updates.push(RowUpdate { id, cells }),
                None => plan.inserts.push(RowInsert {
                    to_bottom: true,
                    cells,
                }),
            }
        }
        plan
    }
}

#[derive(Debug, Default)]
struct WritePlan {
    updates: Vec<RowUpdate>,
    inserts: Vec<RowInsert>,
    rejected: Vec<RejectedRow>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CellWrite {
    column_id: i64,
    value: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RowUpdate {
    id: i64,
    cells: Vec<CellWrite>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RowInsert {
    to_bottom: bool,
    cells: Vec<CellWrite>,
}

/// Asynchronous Smartsheet client with one sheet per data type.
#[derive(Clone)]
pub struct SmartsheetClient {
    http: reqwest::Client,
    api_url: String,
    token: String,
    sheets: BTreeMap<SyncType, String>,
}

impl SmartsheetClient {
    pub fn new(
        api_url: impl Into<String>,
        token: impl Into<String>,
        sheets: BTreeMap<SyncType, String>,
    ) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("converge-sync/0.1"));
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "falling back to default HTTP client");
                reqwest::Client::new()
            });
        info!(api_url = %api_url, sheets = sheets.len(), "created SmartsheetClient");
        Self {
            http,
            api_url,
            token: token.into(),
            sheets,
        }
    }

    /// Build a client from the `[smartsheet]` config section.
    pub fn from_config(config: &SmartsheetConfig) -> Self {
        Self::new(
            config.api_url.clone(),
            config.token.clone().unwrap_or_default(),
            config.sheets.configured(),
        )
    }

    pub fn sheet_id(&self, sync_type: SyncType) -> Option<&str> {
        self.sheets.get(&sync_type).map(String::as_str)
    }

    /// Fetch full sheet metadata and rows.
    #[instrument(skip(self))]
    pub async fn get_sheet(&self, sync_type: SyncType) -> Result<Sheet, FetchError> {
        let sheet_id = self
            .sheet_id(sync_type)
            .ok_or(FetchError::NotConfigured(sync_type))?;
        let url = format!("{}/sheets/{}", self.api_url, sheet_id);
        let resp = self.http.get(&url).bearer_auth(&self.token).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FetchError::Api {
                status: status.as_u16(),
                body,
            });
        }
        let sheet: Sheet = resp
            .json()
            .await
            .map_err(|e| FetchError::Parse(e.to_string()))?;
        debug!(
            sheet = %sheet.name,
            columns = sheet.columns.len(),
            rows = sheet.rows.len(),
            "fetched sheet"
        );
        Ok(sheet)
    }

    async fn send_rows<T: Serialize + ?Sized>(
        &self,
        method: reqwest::Method,
        sheet_id: &str,
        body: &T,
    ) -> Result<(), WriteError> {
        let url = format!("{}/sheets/{}/rows", self.api_url, sheet_id);
        let resp = self
            .http
            .request(method, &url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(WriteError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SheetClient for SmartsheetClient {
    async fn list_rows(&self, sync_type: SyncType) -> Result<Vec<SheetRow>, FetchError> {
        let sheet = self.get_sheet(sync_type).await?;
        Ok(sheet.to_rows())
    }

    #[instrument(skip(self, rows), fields(count = rows.len()))]
    async fn write_rows(
        &self,
        sync_type: SyncType,
        rows: Vec<OutboundRow>,
    ) -> Result<WriteAck, WriteError> {
        let sheet_id = self
            .sheet_id(sync_type)
            .ok_or(WriteError::NotConfigured(sync_type))?
            .to_string();
        let sheet = self.get_sheet(sync_type).await?;
        let WritePlan {
            updates,
            inserts,
            rejected,
        } = sheet.plan_writes(sync_type, rows);
        let mut ack = WriteAck {
            rejected,
            ..WriteAck::default()
        };

        if !updates.is_empty() {
            self.send_rows(reqwest::Method::PUT, &sheet_id, &updates)
                .await?;
            ack.updated = updates.len();
        }
        if !inserts.is_empty() {
            self.send_rows(reqwest::Method::POST, &sheet_id, &inserts)
                .await?;
            ack.created = inserts.len();
        }

        info!(
            %sync_type,
            updated = ack.updated,
            created = ack.created,
            rejected = ack.rejected.len(),
            "wrote rows to sheet"
        );
        Ok(ack)
    }

    fn is_configured(&self, sync_type: SyncType) -> bool {
        self.sheets.contains_key(&sync_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_sheet() -> Sheet {
        serde_json::from_value(json!({
            "id": 3279253824032644i64,
            "name": "Event Schedule",
            "totalRowCount": 2,
            "columns": [
                { "id": 11, "title": "Session ID", "type": "TEXT_NUMBER", "primary": true },
                { "id": 12, "title": "Capacity", "type": "TEXT_NUMBER" },
                { "id": 13, "title": "Requires RSVP", "type": "CHECKBOX" }
            ],
            "rows": [
                { "id": 901, "rowNumber": 1, "cells": [
                    { "columnId": 11, "value": "S-1", "displayValue": "S-1" },
                    { "columnId": 12, "value": 40.0 },
                    { "columnId": 13, "value": true }
                ]},
                { "id": 902, "rowNumber": 2, "cells": [
                    { "columnId": 11, "displayValue": "S-2" },
                    { "columnId": 12 },
                    { "columnId": 99, "value": "orphan" }
                ]}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_sheet_to_rows_keys_cells_by_title() {
        let rows = sample_sheet().to_rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].row_id, 901);
        assert_eq!(rows[0].row_number, Some(1));
        assert_eq!(rows[0].text(&["Session ID"]).as_deref(), Some("S-1"));
        assert_eq!(rows[0].text(&["Capacity"]).as_deref(), Some("40"));
        assert_eq!(rows[0].text(&["Requires RSVP"]).as_deref(), Some("true"));

        // display value fallback, empty and unknown-column cells dropped
        assert_eq!(rows[1].text(&["Session ID"]).as_deref(), Some("S-2"));
        assert_eq!(rows[1].cells.len(), 1);
    }

    #[test]
    fn test_column_lookup_ignores_case() {
        let sheet = sample_sheet();
        assert_eq!(sheet.column_id("session id"), Some(11));
        assert_eq!(sheet.column_id("Location"), None);
    }

    fn partner_sheet_with_aliases() -> Sheet {
        serde_json::from_value(json!({
            "id": 6623099790249860i64,
            "name": "Industry Partners",
            "columns": [
                { "id": 21, "title": "Company Name", "primary": true },
                { "id": 22, "title": "Focus Areas" },
                { "id": 23, "title": "Notes" }
            ],
            "rows": [
                { "id": 701, "rowNumber": 1, "cells": [
                    { "columnId": 21, "value": "Acme Robotics" },
                    { "columnId": 22, "value": "Autonomy, Sensing" }
                ]}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_column_for_follows_import_aliases() {
        let sheet = partner_sheet_with_aliases();
        assert_eq!(sheet.column_for(SyncType::Partners, "Organization"), Some(21));
        assert_eq!(
            sheet.column_for(SyncType::Partners, "Technology Focus Areas"),
            Some(22)
        );
        assert_eq!(sheet.column_for(SyncType::Partners, "Website"), None);
        assert_eq!(sheet.column_for(SyncType::Partners, "Notes"), Some(23));
    }

    #[test]
    fn test_plan_writes_on_alias_titled_sheet() {
        let sheet = partner_sheet_with_aliases();
        let rows = sheet.to_rows();
        let mut entity = mapper::map_sheet_row(SyncType::Partners, &rows[0]).unwrap();
        if let crate::entities::InternalEntity::Partner(p) = &mut entity {
            p.focus_areas.push("Energy".to_string());
        }
        let fresh = mapper::map_sheet_row(
            SyncType::Partners,
            &SheetRow::from_pairs(0, &[("Organization", "Blue Water Labs")]),
        )
        .unwrap();

        let plan = sheet.plan_writes(
            SyncType::Partners,
            vec![mapper::to_outbound(&entity), mapper::to_outbound(&fresh)],
        );
        assert!(plan.rejected.is_empty());

        assert_eq!(plan.updates.len(), 1);
        let update = &plan.updates[0];
        assert_eq!(update.id, 701);
        let written: Vec<i64> = update.cells.iter().map(|c| c.column_id).collect();
        assert!(written.contains(&21));
        assert!(written.contains(&22));

        assert_eq!(plan.inserts.len(), 1);
        assert!(plan.inserts[0].cells.iter().any(|c| c.column_id == 21
            && c.value == json!("Blue Water Labs")));
    }

    #[test]
    fn test_plan_writes_rejects_sheet_without_key_column() {
        let sheet = sample_sheet();
        let partner = mapper::map_sheet_row(
            SyncType::Partners,
            &SheetRow::from_pairs(0, &[("Organization", "Acme Robotics")]),
        )
        .unwrap();
        let plan = sheet.plan_writes(SyncType::Partners, vec![mapper::to_outbound(&partner)]);
        assert!(plan.updates.is_empty() && plan.inserts.is_empty());
        assert_eq!(plan.rejected.len(), 1);
        assert_eq!(plan.rejected[0].natural_key, "acme-robotics");
    }

    #[test]
    fn test_unconfigured_type() {
        let mut sheets = BTreeMap::new();
        sheets.insert(SyncType::Sessions, "1".to_string());
        let client = SmartsheetClient::new("https://api.smartsheet.com/2.0/", "tok", sheets);
        assert!(client.is_configured(SyncType::Sessions));
        assert!(!client.is_configured(SyncType::Opportunities));
        assert_eq!(client.api_url, "https://api.smartsheet.com/2.0");
    }

    #[tokio::test]
    async fn test_list_rows_unconfigured_is_fetch_error() {
        let client = SmartsheetClient::new("http://127.0.0.1:9", "tok", BTreeMap::new());
        let err = client.list_rows(SyncType::Projects).await.unwrap_err();
        assert!(matches!(err, FetchError::NotConfigured(SyncType::Projects)));
    }
}
