use async_trait::async_trait;
use log::debug;
use reqwest::{Certificate, Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::fs;
use std::time::Duration;

use super::api::ClusterApi;
use super::error::{classify_status, ClusterError, Result};
use super::kinds::KindMapping;
use crate::config::ClusterConfig;
use crate::model::ClusterEndpoint;
use crate::sanitize::redact_url;

/// [`ClusterApi`] over HTTPS with a bearer token. Every request is bounded
/// by the configured timeout and connections come from a small idle pool.
pub struct RestClusterClient {
    client: Client,
    base_url: String,
    token: Option<SecretString>,
}

impl RestClusterClient {
    pub fn new(endpoint: &ClusterEndpoint, config: &ClusterConfig) -> Result<Self> {
        let base_url = endpoint.endpoint.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(ClusterError::NotConfigured);
        }
        if !base_url.starts_with("https://") && !base_url.starts_with("http://") {
            return Err(ClusterError::InvalidConfig(format!(
                "endpoint '{}' must be an http(s) URL",
                redact_url(&base_url)
            )));
        }

        let token = endpoint.token.resolve_optional()?;

        let mut builder = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .pool_max_idle_per_host(config.pool_max_idle_per_host);

        if let Some(ca_path) = endpoint.ca_cert_path.as_deref().filter(|p| !p.is_empty()) {
            let pem = fs::read(ca_path).map_err(|e| {
                ClusterError::InvalidConfig(format!("cannot read CA certificate '{}': {}", ca_path, e))
            })?;
            let certificate = Certificate::from_pem(&pem).map_err(|e| {
                ClusterError::InvalidConfig(format!("invalid CA certificate '{}': {}", ca_path, e))
            })?;
            builder = builder.add_root_certificate(certificate);
        }

        let client = builder
            .build()
            .map_err(|e| ClusterError::InvalidConfig(format!("Failed to create HTTP client: {}", e)))?;

        debug!("Cluster client for {}", redact_url(&base_url));
        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    /// Sends the request and decodes a JSON body. `resource` names the
    /// target in errors; the URL is never included since it may carry
    /// credentials.
    async fn send(&self, request: RequestBuilder, resource: &str) -> Result<Value> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| ClusterError::from_reqwest(e, resource))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ClusterError::from_reqwest(e, resource))?;

        if !status.is_success() {
            return Err(classify_status(status.as_u16(), resource, &body));
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body)
            .map_err(|e| ClusterError::InvalidResponse(format!("{}: {}", resource, e)))
    }
}

#[async_trait]
impl ClusterApi for RestClusterClient {
    async fn list(&self, mapping: &KindMapping, namespace: &str) -> Result<Vec<Value>> {
        let resource = format!("{}/{}", mapping.plural, namespace);
        let body = self
            .send(self.client.get(self.url(&mapping.collection_path(namespace))), &resource)
            .await?;

        let items = match body.get("items") {
            Some(Value::Array(items)) => items.clone(),
            Some(Value::Null) | None => Vec::new(),
            Some(_) => {
                return Err(ClusterError::InvalidResponse(format!(
                    "{}: items is not a list",
                    resource
                )))
            }
        };

        // list items omit apiVersion and kind
        Ok(items
            .into_iter()
            .map(|mut item| {
                if let Some(object) = item.as_object_mut() {
                    object
                        .entry("apiVersion")
                        .or_insert_with(|| Value::String(mapping.api_version()));
                    object
                        .entry("kind")
                        .or_insert_with(|| Value::String(mapping.kind.clone()));
                }
                item
            })
            .collect())
    }

    async fn get(&self, mapping: &KindMapping, namespace: &str, name: &str) -> Result<Option<Value>> {
        let resource = format!("{}/{}/{}", mapping.kind, namespace, name);
        let request = self
            .client
            .get(self.url(&mapping.resource_path(namespace, name)));
        match self.send(request, &resource).await {
            Ok(value) => Ok(Some(value)),
            Err(ClusterError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create(&self, mapping: &KindMapping, namespace: &str, body: &Value) -> Result<Value> {
        let name = body
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let resource = format!("{}/{}/{}", mapping.kind, namespace, name);
        let request = self
            .client
            .post(self.url(&mapping.collection_path(namespace)))
            .json(body);
        self.send(request, &resource).await
    }

    async fn update(
        &self,
        mapping: &KindMapping,
        namespace: &str,
        name: &str,
        body: &Value,
    ) -> Result<Value> {
        let resource = format!("{}/{}/{}", mapping.kind, namespace, name);
        let request = self
            .client
            .put(self.url(&mapping.resource_path(namespace, name)))
            .json(body);
        self.send(request, &resource).await
    }

    async fn test_connection(&self) -> Result<String> {
        let body = self.send(self.client.get(self.url("/version")), "version").await?;
        Ok(body
            .get("gitVersion")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string())
    }
}
