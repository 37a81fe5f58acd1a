//! Compute Engine access.
//!
//! `ComputeApi` is the narrow surface the updater needs. `GceClient` implements
//! it against the metadata server and the Compute Engine v1 REST API.

use std::time::{Duration, Instant as Deadline};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;

use crate::config::GclbConfig;
use crate::gclb::types::{CloudError, CloudResult, Instance, InstanceGroup};

const METADATA_FLAVOR: (&str, &str) = ("Metadata-Flavor", "Google");
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Calls the attacher makes against the cloud.
#[async_trait]
pub trait ComputeApi: Send + Sync {
    /// Resolve the identity of the instance this process runs on.
    async fn self_instance(&self) -> CloudResult<Instance>;

    /// Instance groups in `project`/`zone` whose name starts with `prefix`.
    async fn find_instance_groups(
        &self,
        project: &str,
        zone: &str,
        prefix: &str,
    ) -> CloudResult<Vec<InstanceGroup>>;

    async fn is_member(&self, instance: &Instance, group: &str) -> CloudResult<bool>;

    async fn add_instance(&self, instance: &Instance, group: &str) -> CloudResult<()>;

    async fn remove_instance(&self, instance: &Instance, group: &str) -> CloudResult<()>;
}

#[derive(Debug, Deserialize)]
struct AccessToken {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Page<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GroupItem {
    name: String,
}

#[derive(Debug, Deserialize)]
struct MemberItem {
    instance: String,
}

#[derive(Debug, Deserialize)]
struct Operation {
    name: String,
    status: String,
    error: Option<OperationErrors>,
}

#[derive(Debug, Deserialize)]
struct OperationErrors {
    #[serde(default)]
    errors: Vec<OperationErrorItem>,
}

#[derive(Debug, Deserialize)]
struct OperationErrorItem {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// REST client for the metadata server and Compute Engine.
pub struct GceClient {
    http: Client,
    metadata_url: String,
    compute_url: String,
    operation_timeout: Duration,
    token: Mutex<Option<(String, Deadline)>>,
}

impl GceClient {
    pub fn new(config: &GclbConfig) -> CloudResult<Self> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            metadata_url: config.metadata_url.trim_end_matches('/').to_string(),
            compute_url: config.compute_url.trim_end_matches('/').to_string(),
            operation_timeout: config.operation_timeout(),
            token: Mutex::new(None),
        })
    }

    async fn metadata(&self, path: &str) -> CloudResult<String> {
        let url = format!("{}/{}", self.metadata_url, path);
        let response = self
            .http
            .get(&url)
            .header(METADATA_FLAVOR.0, METADATA_FLAVOR.1)
            .send()
            .await
            .map_err(|e| CloudError::Metadata(format!("{}: {}", path, e)))?;
        if !response.status().is_success() {
            return Err(CloudError::Metadata(format!(
                "{}: status {}",
                path,
                response.status()
            )));
        }
        let body = response
            .text()
            .await
            .map_err(|e| CloudError::Metadata(format!("{}: {}", path, e)))?;
        Ok(body.trim().to_string())
    }

    /// A bearer token for the default service account, cached until shortly before expiry.
    async fn access_token(&self) -> CloudResult<String> {
        let mut cached = self.token.lock().await;
        if let Some((token, expires)) = cached.as_ref() {
            if Deadline::now() < *expires {
                return Ok(token.clone());
            }
        }

        let body = self.metadata("instance/service-accounts/default/token").await?;
        let token: AccessToken = serde_json::from_str(&body)
            .map_err(|e| CloudError::Metadata(format!("unreadable access token: {}", e)))?;
        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        *cached = Some((token.access_token.clone(), Deadline::now() + lifetime));
        Ok(token.access_token)
    }

    fn zone_url(&self, project: &str, zone: &str) -> String {
        format!("{}/projects/{}/zones/{}", self.compute_url, project, zone)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> CloudResult<T> {
        let token = self.access_token().await?;
        let response = request.bearer_auth(token).send().await?;
        decode(response).await
    }

    /// Wait, bounded by the operation timeout, for a zonal operation to finish and surface its errors.
    async fn wait_for(&self, instance: &Instance, operation: Operation) -> CloudResult<()> {
        let name = operation.name.clone();
        let operation = tokio::time::timeout(self.operation_timeout, self.poll_until_done(instance, operation))
            .await
            .map_err(|_| {
                CloudError::Operation(format!("{}: not done after {:?}", name, self.operation_timeout))
            })??;

        match operation.error {
            Some(errors) if !errors.errors.is_empty() => {
                let message = errors
                    .errors
                    .iter()
                    .map(|e| format!("{}: {}", e.code, e.message))
                    .collect::<Vec<_>>()
                    .join(", ");
                Err(CloudError::Operation(format!("{}: {}", operation.name, message)))
            }
            _ => Ok(()),
        }
    }

    async fn poll_until_done(&self, instance: &Instance, mut operation: Operation) -> CloudResult<Operation> {
        while operation.status != "DONE" {
            tracing::debug!(operation = %operation.name, status = %operation.status, "Waiting for operation");
            let url = format!(
                "{}/operations/{}/wait",
                self.zone_url(&instance.project, &instance.zone),
                operation.name
            );
            operation = self.send(self.http.post(url)).await?;
        }
        Ok(operation)
    }

    async fn change_membership(&self, instance: &Instance, group: &str, action: &str) -> CloudResult<()> {
        let url = format!(
            "{}/instanceGroups/{}/{}",
            self.zone_url(&instance.project, &instance.zone),
            group,
            action
        );
        let body = json!({ "instances": [{ "instance": instance.self_link(&self.compute_url) }] });
        let operation: Operation = self.send(self.http.post(url).json(&body)).await?;
        self.wait_for(instance, operation).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> CloudResult<T> {
    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(CloudError::Api {
            status: status.as_u16(),
            message: message.trim().to_string(),
        });
    }
    Ok(response.json().await?)
}

/// The last segment of a resource path such as `projects/123/zones/europe-west1-b`.
fn last_segment(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[async_trait]
impl ComputeApi for GceClient {
    async fn self_instance(&self) -> CloudResult<Instance> {
        let project = self.metadata("project/project-id").await?;
        let zone = self.metadata("instance/zone").await?;
        let name = self.metadata("instance/name").await?;
        let id = self.metadata("instance/id").await?;
        Ok(Instance {
            project,
            zone: last_segment(&zone).to_string(),
            name,
            id,
        })
    }

    async fn find_instance_groups(
        &self,
        project: &str,
        zone: &str,
        prefix: &str,
    ) -> CloudResult<Vec<InstanceGroup>> {
        let url = format!("{}/instanceGroups", self.zone_url(project, zone));
        let filter = format!("name eq \"{}.*\"", prefix);
        let mut groups = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut request = self.http.get(&url).query(&[("filter", filter.as_str())]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }
            let page: Page<GroupItem> = self.send(request).await?;
            groups.extend(
                page.items
                    .into_iter()
                    .filter(|g| g.name.starts_with(prefix))
                    .map(|g| InstanceGroup::new(g.name)),
            );
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        Ok(groups)
    }

    async fn is_member(&self, instance: &Instance, group: &str) -> CloudResult<bool> {
        let url = format!(
            "{}/instanceGroups/{}/listInstances",
            self.zone_url(&instance.project, &instance.zone),
            group
        );
        let mut page_token: Option<String> = None;
        loop {
            let mut request = self.http.post(&url).json(&json!({ "instanceState": "ALL" }));
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }
            let page: Page<MemberItem> = self.send(request).await?;
            if page
                .items
                .iter()
                .any(|member| last_segment(&member.instance) == instance.name)
            {
                return Ok(true);
            }
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => return Ok(false),
            }
        }
    }

    async fn add_instance(&self, instance: &Instance, group: &str) -> CloudResult<()> {
        self.change_membership(instance, group, "addInstances").await
    }

    async fn remove_instance(&self, instance: &Instance, group: &str) -> CloudResult<()> {
        self.change_membership(instance, group, "removeInstances").await
    }
}
