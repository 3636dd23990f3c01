use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::domain::{Account, Artifact, CreatedStudy, Project, RecipeRef, Run, Study};
use crate::error::StudyError;
use crate::path::RequestParams;

pub const DEFAULT_HOST: &str = "https://api.pollination.cloud";
pub const TOKEN_HEADER: &str = "x-pollination-token";

/// Status and body of a plain GET, before any status check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Authenticated access to the Pollination API. Implementors provide the
/// three transport calls; the listing helpers are built on top of them.
pub trait CloudApi: Send + Sync {
    fn host(&self) -> &str;

    fn get(&self, path: &str, query: &[(String, String)]) -> Result<Value, StudyError>;

    fn post(&self, path: &str, body: &Value) -> Result<Value, StudyError>;

    /// GET against an absolute URL with the client's auth headers attached.
    fn fetch(&self, url: &str) -> Result<RawResponse, StudyError>;

    fn current_user(&self) -> Result<Account, StudyError> {
        let value = self.get("/user", &[])?;
        serde_json::from_value(value).map_err(|err| StudyError::UnexpectedPayload(err.to_string()))
    }

    fn organizations(&self, member: &str, params: &RequestParams) -> Result<Vec<Account>, StudyError> {
        let mut query = params.to_query();
        query.push(("member".to_string(), member.to_string()));
        parse_resources(self.get("/orgs", &query)?)
    }

    fn projects(&self, owner: &str, params: &RequestParams) -> Result<Vec<Project>, StudyError> {
        let mut query = params.to_query();
        query.push(("owner".to_string(), owner.to_string()));
        parse_resources(self.get("/projects", &query)?)
    }

    fn project_recipes(
        &self,
        owner: &str,
        project: &str,
        params: &RequestParams,
    ) -> Result<Vec<RecipeRef>, StudyError> {
        let path = format!("/projects/{owner}/{project}/recipes");
        parse_resources(self.get(&path, &params.to_query())?)
    }

    fn studies(
        &self,
        owner: &str,
        project: &str,
        params: &RequestParams,
    ) -> Result<Vec<Study>, StudyError> {
        let path = format!("/projects/{owner}/{project}/jobs");
        parse_resources(self.get(&path, &params.to_query())?)
    }

    fn study(&self, owner: &str, project: &str, study_id: &str) -> Result<Study, StudyError> {
        let value = self.get(&format!("/projects/{owner}/{project}/jobs/{study_id}"), &[])?;
        serde_json::from_value(value).map_err(|err| StudyError::UnexpectedPayload(err.to_string()))
    }

    fn runs(
        &self,
        owner: &str,
        project: &str,
        study_id: &str,
        params: &RequestParams,
    ) -> Result<Vec<Run>, StudyError> {
        let path = format!("/projects/{owner}/{project}/runs");
        let mut query = params.to_query();
        query.push(("job_id".to_string(), study_id.to_string()));
        parse_resources(self.get(&path, &query)?)
    }

    fn artifacts(&self, artifacts_path: &str, params: &RequestParams) -> Result<Vec<Artifact>, StudyError> {
        parse_resources(self.get(artifacts_path, &params.to_query())?)
    }

    fn create_study(&self, jobs_path: &str, spec: &Value) -> Result<CreatedStudy, StudyError> {
        let value = self.post(jobs_path, spec)?;
        serde_json::from_value(value).map_err(|err| StudyError::UnexpectedPayload(err.to_string()))
    }
}

/// List endpoints answer with either a bare array or a page object holding
/// a `resources` array.
pub fn parse_resources<T: DeserializeOwned>(value: Value) -> Result<Vec<T>, StudyError> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut page) => match page.remove("resources") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(StudyError::UnexpectedPayload(
                    "page object without resources".to_string(),
                ));
            }
        },
        other => {
            return Err(StudyError::UnexpectedPayload(format!(
                "expected a list, got {other}"
            )));
        }
    };
    items
        .into_iter()
        .map(|item| {
            serde_json::from_value(item).map_err(|err| StudyError::UnexpectedPayload(err.to_string()))
        })
        .collect()
}

#[derive(Clone)]
pub struct PollinationHttpClient {
    client: Client,
    host: String,
}

impl PollinationHttpClient {
    pub fn new(host: &str, api_key: Option<&str>, timeout: Duration) -> Result<Self, StudyError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("pstudy/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| StudyError::ApiHttp(err.to_string()))?,
        );
        if let Some(api_key) = api_key.map(str::trim).filter(|key| !key.is_empty()) {
            let mut value =
                HeaderValue::from_str(api_key).map_err(|err| StudyError::ApiHttp(err.to_string()))?;
            value.set_sensitive(true);
            headers.insert(TOKEN_HEADER, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| StudyError::ApiHttp(err.to_string()))?;

        Ok(Self {
            client,
            host: host.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.host, path.trim_start_matches('/'))
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, StudyError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "Pollination request failed".to_string());
        Err(StudyError::ApiStatus { status, message })
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, StudyError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        tracing::debug!(status, attempt, "retrying Pollination request");
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        tracing::debug!(error = %err, attempt, "retrying Pollination request");
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(StudyError::ApiHttp(err.to_string()));
                }
            }
        }
    }
}

impl CloudApi for PollinationHttpClient {
    fn host(&self) -> &str {
        &self.host
    }

    fn get(&self, path: &str, query: &[(String, String)]) -> Result<Value, StudyError> {
        let url = self.url(path);
        tracing::debug!(%url, "GET");
        let response = self.send_with_retries(|| self.client.get(&url).query(query))?;
        let response = Self::handle_status(response)?;
        response
            .json()
            .map_err(|err| StudyError::UnexpectedPayload(err.to_string()))
    }

    fn post(&self, path: &str, body: &Value) -> Result<Value, StudyError> {
        let url = self.url(path);
        tracing::debug!(%url, "POST");
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .map_err(|err| StudyError::ApiHttp(err.to_string()))?;
        let response = Self::handle_status(response)?;
        response
            .json()
            .map_err(|err| StudyError::UnexpectedPayload(err.to_string()))
    }

    fn fetch(&self, url: &str) -> Result<RawResponse, StudyError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| StudyError::ApiHttp(err.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .map_err(|err| StudyError::ApiHttp(err.to_string()))?;
        Ok(RawResponse {
            status,
            body: body.to_vec(),
        })
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
