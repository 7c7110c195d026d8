//! Jenkins REST client implementing [`CiAdapter`].

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use autodeploy_core::{
    AdapterError, AdapterResult, BuildId, BuildState, BuildStatus, CiAdapter, CredentialProvider,
    DeployError, JenkinsSettings, Secret, SecretKey,
};
use regex::Regex;
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::build_ref::{job_segments, BuildRef};

const QUEUE_LOCATION: &str = r"/queue/item/(\d+)";

/// Client for one Jenkins controller.
#[derive(Clone)]
pub struct JenkinsClient {
    base: Url,
    http: reqwest::Client,
    auth: Option<(String, Secret)>,
}

impl std::fmt::Debug for JenkinsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JenkinsClient")
            .field("base", &self.base.as_str())
            .field("authenticated", &self.auth.is_some())
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct Crumb {
    #[serde(rename = "crumbRequestField")]
    field: String,
    crumb: String,
}

#[derive(Debug, Deserialize)]
struct JobInfo {
    #[serde(default)]
    property: Vec<JobProperty>,
}

#[derive(Debug, Deserialize)]
struct JobProperty {
    #[serde(rename = "_class", default)]
    class: String,
}

#[derive(Debug, Deserialize)]
struct QueueItem {
    #[serde(default)]
    cancelled: bool,
    executable: Option<Executable>,
    why: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Executable {
    number: u64,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BuildInfo {
    #[serde(default)]
    building: bool,
    result: Option<String>,
    url: Option<String>,
}

impl JenkinsClient {
    /// Basic auth is used when both the Jenkins user and token are present.
    pub fn new(
        settings: &JenkinsSettings,
        credentials: &dyn CredentialProvider,
    ) -> Result<Self, DeployError> {
        let base = Url::parse(&settings.url)
            .map_err(|e| DeployError::Config(format!("jenkins url {}: {e}", settings.url)))?;
        if base.cannot_be_a_base() {
            return Err(DeployError::Config(format!(
                "jenkins url {} cannot be a base URL",
                settings.url
            )));
        }

        let auth = match (
            credentials.get(SecretKey::JenkinsUser),
            credentials.get(SecretKey::JenkinsToken),
        ) {
            (Some(user), Some(token)) => Some((user.expose().to_string(), token)),
            _ => {
                debug!(url = %base, "no Jenkins credentials, using anonymous access");
                None
            }
        };

        let http = reqwest::Client::builder()
            .user_agent(concat!("autodeploy-ci/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| DeployError::Adapter(format!("jenkins http client: {e}")))?;

        Ok(Self { base, http, auth })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn url<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> AdapterResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| AdapterError::internal(format!("{} cannot be a base URL", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn job_url(&self, job: &str, tail: &[&str]) -> AdapterResult<Url> {
        let mut segments = job_segments(job);
        segments.extend_from_slice(tail);
        self.url(segments)
    }

    fn build_url(&self, job: &str, number: u64, tail: &[&str]) -> AdapterResult<Url> {
        let number = number.to_string();
        let mut segments = job_segments(job);
        segments.push(&number);
        segments.extend_from_slice(tail);
        self.url(segments)
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> AdapterResult<Response> {
        let request = match &self.auth {
            Some((user, token)) => request.basic_auth(user, Some(token.expose())),
            None => request,
        };
        request
            .send()
            .await
            .map_err(|e| AdapterError::ci_unavailable(format!("{what}: {e}")))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: Url,
        what: &str,
    ) -> AdapterResult<T> {
        let response = self.send(self.http.get(url), what).await?;
        let response = ensure_success(response, what)?;
        response
            .json()
            .await
            .map_err(|e| AdapterError::internal(format!("{what}: malformed response: {e}")))
    }

    /// CSRF crumb; controllers with CSRF protection disabled answer 404.
    async fn crumb(&self) -> AdapterResult<Option<Crumb>> {
        let url = self.url(["crumbIssuer", "api", "json"])?;
        let response = self.send(self.http.get(url), "fetching crumb").await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let crumb = ensure_success(response, "fetching crumb")?
            .json()
            .await
            .map_err(|e| AdapterError::internal(format!("malformed crumb: {e}")))?;
        Ok(Some(crumb))
    }

    /// POST with a fresh crumb attached.
    async fn post(&self, url: Url, what: &str) -> AdapterResult<Response> {
        let mut request = self.http.post(url);
        if let Some(crumb) = self.crumb().await? {
            request = request.header(crumb.field, crumb.crumb);
        }
        self.send(request, what).await
    }

    async fn is_parameterized(&self, job: &str) -> AdapterResult<bool> {
        let url = self.job_url(job, &["api", "json"])?;
        let response = self.send(self.http.get(url), "reading job").await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(AdapterError::job_not_found(format!(
                "Jenkins job {job} does not exist"
            )));
        }
        let info: JobInfo = ensure_success(response, "reading job")?
            .json()
            .await
            .map_err(|e| AdapterError::internal(format!("reading job {job}: {e}")))?;
        Ok(info
            .property
            .iter()
            .any(|p| p.class.contains("ParametersDefinitionProperty")))
    }

    async fn poll_queue(&self, job: &str, item: u64) -> AdapterResult<BuildStatus> {
        let item_str = item.to_string();
        let url = self.url(["queue", "item", item_str.as_str(), "api", "json"])?;
        let queued: QueueItem = self.get_json(url, "reading queue item").await?;

        if let Some(executable) = queued.executable {
            let build = BuildRef::Build {
                job: job.to_string(),
                number: executable.number,
            };
            debug!(job, queue_item = item, build = executable.number, "queue item started");
            let status = BuildStatus::new(build.to_id(), BuildState::Running);
            return Ok(match executable.url {
                Some(url) => status.with_log_ref(console_ref(&url)),
                None => status,
            });
        }

        let queue_id = BuildRef::Queued {
            job: job.to_string(),
            item,
        }
        .to_id();
        if queued.cancelled {
            warn!(job, queue_item = item, "queue item cancelled");
            return Ok(BuildStatus::new(queue_id, BuildState::Failed));
        }
        debug!(job, queue_item = item, why = ?queued.why, "still queued");
        Ok(BuildStatus::new(queue_id, BuildState::Pending))
    }

    async fn poll_build(&self, job: &str, number: u64) -> AdapterResult<BuildStatus> {
        let url = self.build_url(job, number, &["api", "json"])?;
        let info: BuildInfo = self.get_json(url, "reading build").await?;
        let id = BuildRef::Build {
            job: job.to_string(),
            number,
        }
        .to_id();
        let status = BuildStatus::new(id, build_state(info.building, info.result.as_deref()));
        Ok(match info.url {
            Some(url) => status.with_log_ref(console_ref(&url)),
            None => status,
        })
    }
}

#[async_trait]
impl CiAdapter for JenkinsClient {
    async fn trigger(
        &self,
        job: &str,
        git_ref: &str,
        params: &BTreeMap<String, String>,
    ) -> AdapterResult<BuildId> {
        let parameterized = self.is_parameterized(job).await?;
        let response = if parameterized {
            let mut url = self.job_url(job, &["buildWithParameters"])?;
            url.query_pairs_mut().extend_pairs(params.iter());
            self.post(url, "triggering build").await?
        } else {
            if !params.is_empty() {
                warn!(job, "job takes no parameters, ignoring {} value(s)", params.len());
            }
            self.post(self.job_url(job, &["build"])?, "triggering build")
                .await?
        };
        let response = ensure_success(response, "triggering build")?;

        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AdapterError::internal("Jenkins returned no queue location"))?;
        let item = queue_item(location)?;
        info!(event = "jenkins.queued", job, git_ref, queue_item = item, parameterized);

        Ok(BuildRef::Queued {
            job: job.to_string(),
            item,
        }
        .to_id())
    }

    async fn poll(&self, id: &BuildId) -> AdapterResult<BuildStatus> {
        match BuildRef::parse(id)? {
            BuildRef::Queued { job, item } => self.poll_queue(&job, item).await,
            BuildRef::Build { job, number } => self.poll_build(&job, number).await,
        }
    }

    async fn log_excerpt(&self, id: &BuildId) -> AdapterResult<Option<String>> {
        let BuildRef::Build { job, number } = BuildRef::parse(id)? else {
            return Ok(None);
        };
        let url = self.build_url(&job, number, &["consoleText"])?;
        let response = self.send(self.http.get(url), "reading console").await?;
        let text = ensure_success(response, "reading console")?
            .text()
            .await
            .map_err(|e| AdapterError::ci_unavailable(format!("reading console: {e}")))?;
        Ok(Some(text))
    }

    async fn abort(&self, id: &BuildId) -> AdapterResult<()> {
        let url = match BuildRef::parse(id)? {
            BuildRef::Queued { item, .. } => {
                let mut url = self.url(["queue", "cancelItem"])?;
                url.query_pairs_mut().append_pair("id", &item.to_string());
                url
            }
            BuildRef::Build { job, number } => self.build_url(&job, number, &["stop"])?,
        };
        let response = self.post(url, "aborting build").await?;
        ensure_success(response, "aborting build")?;
        info!(event = "jenkins.aborted", build = %id);
        Ok(())
    }
}

fn ensure_success(response: Response, what: &str) -> AdapterResult<Response> {
    let status = response.status();
    if status.is_success() || status.is_redirection() {
        Ok(response)
    } else {
        Err(status_error(status, what))
    }
}

/// Maps a Jenkins HTTP status onto the pipeline error taxonomy.
pub(crate) fn status_error(status: StatusCode, what: &str) -> AdapterError {
    let message = format!("{what}: Jenkins answered {status}");
    match status.as_u16() {
        401 | 403 => AdapterError::unauthorized(message),
        404 => AdapterError::job_not_found(message),
        429 | 500..=599 => AdapterError::ci_unavailable(message),
        _ => AdapterError::internal(message),
    }
}

/// `UNSTABLE`, `ABORTED` and `NOT_BUILT` all count as failures.
pub(crate) fn build_state(building: bool, result: Option<&str>) -> BuildState {
    if building {
        return BuildState::Running;
    }
    match result {
        None => BuildState::Running,
        Some("SUCCESS") => BuildState::Success,
        Some("FAILURE" | "UNSTABLE" | "ABORTED" | "NOT_BUILT") => BuildState::Failed,
        Some(_) => BuildState::Unknown,
    }
}

pub(crate) fn queue_item(location: &str) -> AdapterResult<u64> {
    let pattern = Regex::new(QUEUE_LOCATION).map_err(|e| AdapterError::internal(e.to_string()))?;
    pattern
        .captures(location)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .ok_or_else(|| AdapterError::internal(format!("unexpected queue location {location}")))
}

fn console_ref(build_url: &str) -> String {
    format!("{}/console", build_url.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use autodeploy_core::{ErrorKind, StaticCredentials};

    #[test]
    fn results_map_to_states() {
        assert_eq!(build_state(true, None), BuildState::Running);
        assert_eq!(build_state(false, None), BuildState::Running);
        assert_eq!(build_state(false, Some("SUCCESS")), BuildState::Success);
        assert_eq!(build_state(false, Some("FAILURE")), BuildState::Failed);
        assert_eq!(build_state(false, Some("UNSTABLE")), BuildState::Failed);
        assert_eq!(build_state(false, Some("ABORTED")), BuildState::Failed);
        assert_eq!(build_state(false, Some("SOMETHING_NEW")), BuildState::Unknown);
    }

    #[test]
    fn status_codes_map_to_kinds() {
        let kind = |code: u16| status_error(StatusCode::from_u16(code).unwrap(), "x").kind;
        assert_eq!(kind(401), ErrorKind::Unauthorized);
        assert_eq!(kind(403), ErrorKind::Unauthorized);
        assert_eq!(kind(404), ErrorKind::JobNotFound);
        assert_eq!(kind(429), ErrorKind::CiUnavailable);
        assert_eq!(kind(503), ErrorKind::CiUnavailable);
        assert_eq!(kind(400), ErrorKind::Internal);
    }

    #[test]
    fn queue_location_is_parsed() {
        assert_eq!(
            queue_item("https://ci.example.com/queue/item/321/").unwrap(),
            321
        );
        assert!(queue_item("https://ci.example.com/job/app/").is_err());
    }

    #[test]
    fn urls_keep_base_path() {
        let settings = JenkinsSettings {
            url: "https://ci.example.com/jenkins/".to_string(),
        };
        let client = JenkinsClient::new(&settings, &StaticCredentials::new()).unwrap();
        let url = client.build_url("team/app", 7, &["api", "json"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://ci.example.com/jenkins/job/team/job/app/7/api/json"
        );
    }

    #[test]
    fn rejects_unusable_url() {
        let settings = JenkinsSettings {
            url: "not a url".to_string(),
        };
        assert!(JenkinsClient::new(&settings, &StaticCredentials::new()).is_err());
    }

    #[test]
    fn debug_hides_credentials() {
        let creds = StaticCredentials::new()
            .with(SecretKey::JenkinsUser, "deployer")
            .with(SecretKey::JenkinsToken, "s3cret-token");
        let client = JenkinsClient::new(&JenkinsSettings::default(), &creds).unwrap();
        let shown = format!("{client:?}");
        assert!(shown.contains("authenticated: true"));
        assert!(!shown.contains("s3cret-token"));
    }
}
