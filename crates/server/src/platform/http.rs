//! HTTP clients for the platform and the compute backend.

use super::{
    Allocation, CommitResolver, ComputeBackend, PlatformError, PlatformResult, ProjectRepo,
    ProjectSummary, RepoDirFile, UserRepo,
};
use async_trait::async_trait;
use ember_core::config::{BackendConfig, PlatformConfig};
use ember_core::{Account, CommitHash, InstanceInfo, ProjectId, ProjectRef, ResourceLevel};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Shared JSON-over-HTTP plumbing.
#[derive(Clone)]
struct JsonClient {
    http: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl JsonClient {
    fn new(base_url: &str, token: Option<String>, timeout_secs: u64) -> PlatformResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| PlatformError::Transport(format!("invalid base url {base_url}: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url,
            token,
        })
    }

    /// Build a URL from percent-encoded path segments.
    fn endpoint(&self, segments: &[&str]) -> PlatformResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                PlatformError::Transport(format!("base url cannot be a base: {}", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> PlatformResult<reqwest::Response> {
        let response = self.authorize(req).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            let body = response.text().await.unwrap_or_default();
            return Err(PlatformError::NotFound(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PlatformError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
    ) -> PlatformResult<T> {
        Ok(self.send(req).await?.json::<T>().await?)
    }
}

// =============================================================================
// Platform
// =============================================================================

#[derive(Debug, Deserialize)]
struct ProjectSummaryBody {
    owner: String,
    id: String,
    name: String,
    #[serde(default)]
    is_private: bool,
}

#[derive(Debug, Deserialize)]
struct ResourceLevelBody {
    #[serde(default)]
    level: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DirFileBody {
    #[serde(default)]
    commit: Option<String>,
    found: bool,
}

#[derive(Debug, Deserialize)]
struct PlatformTokenBody {
    token: String,
}

/// Client for the project, repository and user APIs of the platform.
#[derive(Clone)]
pub struct HttpPlatform {
    client: JsonClient,
}

impl HttpPlatform {
    pub fn new(config: &PlatformConfig) -> PlatformResult<Self> {
        Ok(Self {
            client: JsonClient::new(
                &config.base_url,
                config.token.clone(),
                config.request_timeout_secs,
            )?,
        })
    }
}

#[async_trait]
impl ProjectRepo for HttpPlatform {
    async fn get_summary(&self, owner: &Account, id: &ProjectId) -> PlatformResult<ProjectSummary> {
        let url = self
            .client
            .endpoint(&["v1", "projects", owner.as_str(), id.as_str()])?;
        let body: ProjectSummaryBody = self.client.send_json(self.client.http.get(url)).await?;

        Ok(ProjectSummary {
            project: ProjectRef::new(Account::parse(body.owner)?, ProjectId::parse(body.id)?),
            name: body.name,
            is_private: body.is_private,
        })
    }

    async fn resource_level(&self, project: &ProjectRef) -> PlatformResult<Option<ResourceLevel>> {
        let url = self.client.endpoint(&[
            "v1",
            "projects",
            project.owner.as_str(),
            project.id.as_str(),
            "resource-level",
        ])?;
        let body: ResourceLevelBody = match self.client.send_json(self.client.http.get(url)).await {
            Ok(body) => body,
            Err(PlatformError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        Ok(body
            .level
            .filter(|level| !level.is_empty())
            .map(ResourceLevel::parse)
            .transpose()?)
    }
}

#[async_trait]
impl CommitResolver for HttpPlatform {
    async fn resolve(&self, file: &RepoDirFile) -> PlatformResult<Option<CommitHash>> {
        let mut url = self.client.endpoint(&[
            "v1",
            "repos",
            file.owner.as_str(),
            &file.repo_name,
            "dir-file",
        ])?;
        url.query_pairs_mut()
            .append_pair("dir", &file.dir)
            .append_pair("file", &file.file);

        let body: DirFileBody = self.client.send_json(self.client.http.get(url)).await?;
        if !body.found {
            return Ok(None);
        }
        let commit = body
            .commit
            .ok_or_else(|| PlatformError::Decode("found file without commit".to_string()))?;
        Ok(Some(CommitHash::parse(commit)?))
    }
}

#[async_trait]
impl UserRepo for HttpPlatform {
    async fn platform_token(&self, account: &Account) -> PlatformResult<String> {
        let url = self
            .client
            .endpoint(&["v1", "users", account.as_str(), "platform-token"])?;
        let body: PlatformTokenBody = self.client.send_json(self.client.http.get(url)).await?;
        Ok(body.token)
    }
}

// =============================================================================
// Compute backend
// =============================================================================

#[derive(Debug, Serialize)]
struct AllocateBody<'a> {
    instance_id: String,
    owner: &'a str,
    project_id: &'a str,
    project_name: &'a str,
    last_commit: &'a str,
    resource_level: Option<&'a str>,
    requester: &'a str,
    user_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct AllocationBody {
    survival_secs: u64,
    #[serde(default)]
    access_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SurvivalTimeBody {
    survival_secs: u64,
}

#[derive(Debug, Serialize)]
struct ExtendBody {
    extension_secs: i64,
}

/// Client for the compute provisioning backend.
#[derive(Clone)]
pub struct HttpComputeBackend {
    client: JsonClient,
}

impl HttpComputeBackend {
    pub fn new(config: &BackendConfig) -> PlatformResult<Self> {
        Ok(Self {
            client: JsonClient::new(&config.base_url, None, config.request_timeout_secs)?,
        })
    }
}

#[async_trait]
impl ComputeBackend for HttpComputeBackend {
    async fn allocate(
        &self,
        instance: &InstanceInfo,
        user_token: &str,
    ) -> PlatformResult<Allocation> {
        let url = self.client.endpoint(&["v1", "instances"])?;
        let fingerprint = &instance.fingerprint;
        let body = AllocateBody {
            instance_id: instance.id.to_string(),
            owner: fingerprint.project.owner.as_str(),
            project_id: fingerprint.project.id.as_str(),
            project_name: &instance.project_name,
            last_commit: fingerprint.last_commit.as_str(),
            resource_level: instance.resource_level.as_ref().map(|level| level.as_str()),
            requester: instance.requester.as_str(),
            user_token,
        };

        let allocation: AllocationBody = self
            .client
            .send_json(self.client.http.post(url).json(&body))
            .await?;

        Ok(Allocation {
            lease_secs: allocation.survival_secs,
            access_url: allocation.access_url.filter(|url| !url.is_empty()),
        })
    }

    async fn survival_time(&self, instance: &InstanceInfo) -> PlatformResult<u64> {
        let id = instance.id.to_string();
        let url = self
            .client
            .endpoint(&["v1", "instances", &id, "survival-time"])?;
        let body: SurvivalTimeBody = self.client.send_json(self.client.http.get(url)).await?;
        Ok(body.survival_secs)
    }

    async fn extend(&self, instance: &InstanceInfo, extension_secs: i64) -> PlatformResult<()> {
        let id = instance.id.to_string();
        let url = self.client.endpoint(&["v1", "instances", &id, "extend"])?;
        self.client
            .send(self.client.http.post(url).json(&ExtendBody { extension_secs }))
            .await?;
        Ok(())
    }
}
