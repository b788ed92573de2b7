//! Subcommands that act on the sync database or Smartsheet.

pub mod failed;
pub mod import;
pub mod inspect;
pub mod runs;
pub mod status;

use anyhow::Result;

use converge_sync_core::models::SyncType;

/// Parse a sync type argument.
pub fn parse_type(raw: &str) -> Result<SyncType> {
    Ok(raw.parse::<SyncType>()?)
}

/// Parse an optional sync type argument.
pub fn parse_optional_type(raw: Option<&str>) -> Result<Option<SyncType>> {
    raw.map(parse_type).transpose()
}

/// Render an optional timestamp as `YYYY-MM-DD HH:MM:SS`.
pub fn when(ts: Option<chrono::DateTime<chrono::Utc>>) -> String {
    ts.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "—".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_type_accepts_singular() {
        assert_eq!(parse_type("Partner").unwrap(), SyncType::Partners);
        assert!(parse_type("widgets").is_err());
        assert_eq!(parse_optional_type(None).unwrap(), None);
    }
}
