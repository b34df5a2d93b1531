use std::{collections::HashSet, time::Duration};

use chrono::Utc;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};

use crate::config::RemoteConfig;

use super::{backend::*, errors::AppError, state::SyncStore};

const SERVICE: &str = "remote index";
const TABLE: &str = "bookmarks";

/// PostgREST client for the hosted bookmark table.
pub struct AppRemote {
    client: reqwest::blocking::Client,
    remote_addr: String,
    api_key: String,
    store: SyncStore,
}

impl AppRemote {
    pub fn new(
        config: &RemoteConfig,
        api_key: &str,
        store: SyncStore,
        timeout: Duration,
    ) -> Result<AppRemote, AppError> {
        let remote_addr = config.url.trim_end_matches('/').to_string();
        let client = reqwest::blocking::Client::builder().timeout(timeout).build()?;

        Ok(AppRemote {
            client,
            remote_addr,
            api_key: api_key.to_string(),
            store,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::blocking::RequestBuilder {
        log::info!("{method} {}{}", self.remote_addr, path);
        let url = format!("{}{}", self.remote_addr, path);
        // the signed-in user's token when there is one, the anon key otherwise
        let bearer = match self.store.user() {
            Ok(Some(user)) => user.access_token.unwrap_or_else(|| self.api_key.clone()),
            _ => self.api_key.clone(),
        };

        self.client
            .request(method, &url)
            .header("apikey", &self.api_key)
            .bearer_auth(bearer)
    }

    fn get(&self, path: &str) -> reqwest::blocking::RequestBuilder {
        self.request(reqwest::Method::GET, path)
    }

    fn post(&self, path: &str) -> reqwest::blocking::RequestBuilder {
        self.request(reqwest::Method::POST, path)
    }

    fn patch(&self, path: &str) -> reqwest::blocking::RequestBuilder {
        self.request(reqwest::Method::PATCH, path)
    }

    fn rpc<T: DeserializeOwned>(&self, function: &str, args: Value) -> Result<T, AppError> {
        let resp = self
            .post(&format!("/rest/v1/rpc/{function}"))
            .json(&args)
            .send()?;
        handle_response(resp)
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    error: Option<String>,
}

/// Turns a PostgREST response into `T`, or into [`AppError::Http`] for
/// non-2xx statuses.
fn handle_response<T>(response: reqwest::blocking::Response) -> Result<T, AppError>
where
    T: DeserializeOwned,
{
    let status = response.status();
    let text = response.text()?;

    if !status.is_success() {
        let message = serde_json::from_str::<ErrorBody>(&text)
            .ok()
            .and_then(|body| body.message.or(body.error))
            .unwrap_or(text);
        log::error!("{SERVICE} call failed: {status} {message}");
        return Err(AppError::Http {
            service: SERVICE,
            status: status.as_u16(),
            message,
        });
    }

    // rpc returning void answers with an empty body
    let text = if text.trim().is_empty() { "null" } else { text.as_str() };

    serde_json::from_str::<T>(text).map_err(|err| {
        log::error!("{err}. tried to parse: {text:?}");
        err.into()
    })
}

fn eq(value: &str) -> String {
    format!("eq.{}", value)
}

impl RemoteIndex for AppRemote {
    fn active_urls(&self, user_id: &str) -> Result<HashSet<String>, AppError> {
        #[derive(Deserialize)]
        struct UrlRow {
            url: String,
        }

        let resp = self
            .get(&format!("/rest/v1/{TABLE}"))
            .query(&[
                ("select", "url".to_string()),
                ("user_id", eq(user_id)),
                ("is_delete", "eq.false".to_string()),
            ])
            .send()?;

        let rows: Vec<UrlRow> = handle_response(resp)?;
        Ok(rows.into_iter().map(|row| row.url).collect())
    }

    fn find_by_url(&self, url: &str) -> Result<Option<ReusableEnrichment>, AppError> {
        let resp = self
            .get(&format!("/rest/v1/{TABLE}"))
            .query(&[
                ("select", "summary,key_info,embedding".to_string()),
                ("url", eq(url)),
                ("limit", "1".to_string()),
            ])
            .send()?;

        let rows: Vec<ReusableEnrichment> = handle_response(resp)?;
        Ok(rows.into_iter().next())
    }

    fn upsert(&self, entry: NewRemoteEntry) -> Result<RemoteBookmarkEntry, AppError> {
        let resp = self
            .post(&format!("/rest/v1/{TABLE}"))
            .query(&[("on_conflict", "user_id,url")])
            .header("Prefer", "return=representation,resolution=merge-duplicates")
            .json(&[&entry])
            .send()?;

        let rows: Vec<RemoteBookmarkEntry> = handle_response(resp)?;
        rows.into_iter()
            .next()
            .ok_or_else(|| AppError::Malformed(format!("upsert of {} returned no row", entry.url)))
    }

    fn associate_tags(
        &self,
        bookmark_id: &RemoteId,
        user_id: &str,
        tags: &[String],
    ) -> Result<(), AppError> {
        let _: Value = self.rpc(
            "insert_bookmark_tags",
            json!({
                "p_bookmark_id": bookmark_id,
                "p_user_id": user_id,
                "p_tag_names": tags,
            }),
        )?;
        Ok(())
    }

    fn soft_delete(&self, browser_bookmark_id: &str, user_id: &str) -> Result<usize, AppError> {
        let resp = self
            .patch(&format!("/rest/v1/{TABLE}"))
            .query(&[
                ("browser_bookmark_id", eq(browser_bookmark_id)),
                ("user_id", eq(user_id)),
            ])
            .header("Prefer", "return=representation")
            .json(&json!({
                "is_delete": true,
                "updated_at": Utc::now(),
            }))
            .send()?;

        let rows: Vec<Value> = handle_response(resp)?;
        Ok(rows.len())
    }

    fn search_by_tag(
        &self,
        user_id: &str,
        tag_name: &str,
    ) -> Result<Vec<MatchedBookmark>, AppError> {
        let rows: Option<Vec<MatchedBookmark>> = self.rpc(
            "get_bookmarks_by_tag_name",
            json!({
                "tag_name_param": tag_name,
                "user_id_param": user_id,
            }),
        )?;
        Ok(rows.unwrap_or_default())
    }

    fn match_hybrid(&self, query: HybridMatch) -> Result<Vec<MatchedBookmark>, AppError> {
        log::debug!(
            "match_bookmarks_hybrid: threshold={} count={}",
            query.match_threshold,
            query.match_count
        );
        let rows: Option<Vec<MatchedBookmark>> =
            self.rpc("match_bookmarks_hybrid", serde_json::to_value(&query)?)?;
        Ok(rows.unwrap_or_default())
    }
}
