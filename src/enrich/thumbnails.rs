use crate::config::ThumbnailConfig;
use crate::database::{Database, VideoEntry};
use crate::index::is_crn;
use anyhow::Result;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

const THUMB_FIELDS: &[&str] = &["thumb", "thumbnail", "image"];
const SEARCH_LIST_KEYS: &[&str] = &["programs", "items", "results"];

/// Catalog number: trailing `_<5+ digits>`, optionally followed by `.mp4`
pub fn extract_crn(text: &str) -> Option<&str> {
    let stem = text.strip_suffix(".mp4").unwrap_or(text);
    let (_, tail) = stem.rsplit_once('_')?;
    is_crn(tail).then_some(tail)
}

/// First catalog number found in `fields`, in order
pub fn crn_for_fields(fields: &[&str]) -> Option<String> {
    fields.iter().find_map(|field| extract_crn(field)).map(str::to_string)
}

pub fn crn_for_entry(entry: &VideoEntry) -> Option<String> {
    crn_for_fields(&[&entry.video_id, &entry.title, &entry.video_file])
}

pub fn imgix_thumb_url(crn: &str) -> String {
    format!("https://bibeltv.imgix.net/{}.jpg", crn)
}

fn thumb_field(item: &Value) -> Option<String> {
    THUMB_FIELDS
        .iter()
        .find_map(|field| item.get(field).and_then(Value::as_str))
        .filter(|thumb| !thumb.is_empty())
        .map(str::to_string)
}

fn id_matches(value: Option<&Value>, crn: &str) -> bool {
    match value {
        Some(Value::String(s)) => s == crn,
        Some(Value::Number(n)) => n.to_string() == crn,
        _ => false,
    }
}

/// Thumbnail of the search hit whose `crn` or `id` equals `crn`
pub fn thumb_from_search(data: &Value, crn: &str) -> Option<String> {
    let items = match data {
        Value::Array(items) => items,
        Value::Object(map) => SEARCH_LIST_KEYS
            .iter()
            .find_map(|key| map.get(*key))
            .and_then(Value::as_array)?,
        _ => return None,
    };

    items
        .iter()
        .filter(|item| id_matches(item.get("crn"), crn) || id_matches(item.get("id"), crn))
        .find_map(thumb_field)
}

/// Looks up thumbnails in the program catalog
pub struct ThumbnailFetcher {
    client: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
}

impl ThumbnailFetcher {
    pub fn new(config: &ThumbnailConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            base_url: Url::parse(&config.base_url)?,
            api_key: config.resolve_api_key(),
        })
    }

    async fn fetch_json(&self, url: Url) -> Option<Value> {
        let mut request = self.client.get(url.clone()).header("Accept", "application/json");
        if let Some(key) = &self.api_key {
            request = request
                .header("X-API-KEY", key)
                .header("Authorization", format!("Bearer {}", key));
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => response.json().await.ok(),
            Ok(response) => {
                debug!("{} -> {}", url, response.status());
                None
            }
            Err(e) => {
                debug!("{} failed: {}", url, e);
                None
            }
        }
    }

    /// Search first, then the program endpoints; any failure means no thumbnail
    pub async fn thumb_for_crn(&self, crn: &str) -> Option<String> {
        if let Ok(mut search) = self.base_url.join("search.json") {
            search.query_pairs_mut().append_pair("query", crn);
            if let Some(thumb) = self.fetch_json(search).await.and_then(|data| thumb_from_search(&data, crn)) {
                return Some(thumb);
            }
        }

        for path in [format!("programs/{}.json", crn), format!("programs/{}", crn)] {
            let Ok(url) = self.base_url.join(&path) else {
                continue;
            };
            if let Some(thumb) = self
                .fetch_json(url)
                .await
                .filter(Value::is_object)
                .and_then(|data| thumb_field(&data))
            {
                return Some(thumb);
            }
        }

        None
    }
}

/// Unique catalog numbers over every entry of both indices, sorted
pub fn collect_crns(database: &Database) -> BTreeSet<String> {
    database.video_entries().filter_map(crn_for_entry).collect()
}

/// Write found thumbnails onto every matching entry; returns the number of patched entries
pub fn apply_thumbnails(database: &mut Database, thumbs: &BTreeMap<String, String>) -> usize {
    let mut patched = 0;
    for entry in database.video_entries_mut() {
        if let Some(thumb) = crn_for_entry(entry).and_then(|crn| thumbs.get(&crn)) {
            entry.thumb = Some(thumb.clone());
            patched += 1;
        }
    }
    patched
}

/// Look up every catalog number once and patch the database
pub async fn fetch_thumbnails(fetcher: &ThumbnailFetcher, database: &mut Database) -> (usize, usize, usize) {
    let crns = collect_crns(database);
    info!("🖼️ Fetching thumbnails for {} unique videos", crns.len());

    let mut thumbs = BTreeMap::new();
    for crn in &crns {
        match fetcher.thumb_for_crn(crn).await {
            Some(thumb) => {
                info!("  ✅ CRN {}: {}", crn, thumb);
                thumbs.insert(crn.clone(), thumb);
            }
            None => info!("  ❌ CRN {}: not found", crn),
        }
    }

    let patched = apply_thumbnails(database, &thumbs);
    (thumbs.len(), crns.len(), patched)
}
