//! Registry REST client — spec.md §6's "Registry REST API (consumed by C12)".

use super::model::{ClientAccessConfig, RouteDefinition};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryClientError {
    #[error("registry request failed: {0}")]
    Request(String),
    #[error("route not found: {0}")]
    NotFound(String),
    #[error("registry returned malformed payload: {0}")]
    Decode(String),
}

/// CRUD surface the Route Refresh Service (C12) and Registry Event
/// Publisher (C15) consume. The Registry's own implementation is out of
/// scope; this is the interface boundary.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    async fn list_routes(&self) -> Result<Vec<RouteDefinition>, RegistryClientError>;
    async fn get_route(&self, name: &str) -> Result<Option<RouteDefinition>, RegistryClientError>;
    async fn put_route(&self, route: RouteDefinition) -> Result<RouteDefinition, RegistryClientError>;
    async fn delete_route(&self, name: &str) -> Result<(), RegistryClientError>;

    async fn list_client_access(
        &self,
        include_inactive: bool,
    ) -> Result<Vec<ClientAccessConfig>, RegistryClientError>;
    async fn put_client_access(
        &self,
        configs: Vec<ClientAccessConfig>,
    ) -> Result<Vec<String>, RegistryClientError>;
    async fn delete_client_access(&self, client_id: &str) -> Result<(), RegistryClientError>;

    async fn health(&self) -> Result<bool, RegistryClientError>;
}

/// `reqwest`-backed client against a real Registry deployment.
pub struct HttpRegistryClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRegistryClient {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: base_url.into(),
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn list_routes(&self) -> Result<Vec<RouteDefinition>, RegistryClientError> {
        let resp = self
            .client
            .get(self.url("/api/v1/routes"))
            .send()
            .await
            .map_err(|e| RegistryClientError::Request(e.to_string()))?;
        resp.json()
            .await
            .map_err(|e| RegistryClientError::Decode(e.to_string()))
    }

    async fn get_route(&self, name: &str) -> Result<Option<RouteDefinition>, RegistryClientError> {
        let resp = self
            .client
            .get(self.url(&format!("/api/v1/routes/{}", name)))
            .send()
            .await
            .map_err(|e| RegistryClientError::Request(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        resp.json()
            .await
            .map(Some)
            .map_err(|e| RegistryClientError::Decode(e.to_string()))
    }

    async fn put_route(&self, route: RouteDefinition) -> Result<RouteDefinition, RegistryClientError> {
        let resp = self
            .client
            .post(self.url("/api/v1/routes"))
            .json(&route)
            .send()
            .await
            .map_err(|e| RegistryClientError::Request(e.to_string()))?;
        resp.json()
            .await
            .map_err(|e| RegistryClientError::Decode(e.to_string()))
    }

    async fn delete_route(&self, name: &str) -> Result<(), RegistryClientError> {
        self.client
            .delete(self.url(&format!("/api/v1/routes/{}", name)))
            .send()
            .await
            .map_err(|e| RegistryClientError::Request(e.to_string()))?;
        Ok(())
    }

    async fn list_client_access(
        &self,
        include_inactive: bool,
    ) -> Result<Vec<ClientAccessConfig>, RegistryClientError> {
        let resp = self
            .client
            .get(self.url(&format!(
                "/v1/config/client-access-control?includeInactive={}",
                include_inactive
            )))
            .send()
            .await
            .map_err(|e| RegistryClientError::Request(e.to_string()))?;
        resp.json()
            .await
            .map_err(|e| RegistryClientError::Decode(e.to_string()))
    }

    async fn put_client_access(
        &self,
        configs: Vec<ClientAccessConfig>,
    ) -> Result<Vec<String>, RegistryClientError> {
        #[derive(serde::Deserialize)]
        struct Created {
            created: Vec<String>,
        }
        let resp = self
            .client
            .post(self.url("/v1/config/client-access-control"))
            .json(&configs)
            .send()
            .await
            .map_err(|e| RegistryClientError::Request(e.to_string()))?;
        let created: Created = resp
            .json()
            .await
            .map_err(|e| RegistryClientError::Decode(e.to_string()))?;
        Ok(created.created)
    }

    async fn delete_client_access(&self, client_id: &str) -> Result<(), RegistryClientError> {
        self.client
            .delete(self.url(&format!("/v1/config/client-access-control/{}", client_id)))
            .send()
            .await
            .map_err(|e| RegistryClientError::Request(e.to_string()))?;
        Ok(())
    }

    async fn health(&self) -> Result<bool, RegistryClientError> {
        let resp = self
            .client
            .get(self.url("/v1/health"))
            .send()
            .await
            .map_err(|e| RegistryClientError::Request(e.to_string()))?;
        Ok(resp.status().is_success())
    }
}

/// In-memory test double used by unit and integration tests.
#[derive(Default, Clone)]
pub struct InMemoryRegistryClient {
    routes: Arc<DashMap<String, RouteDefinition>>,
    client_access: Arc<DashMap<String, ClientAccessConfig>>,
}

impl InMemoryRegistryClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_route(&self, route: RouteDefinition) {
        self.routes.insert(route.id.clone(), route);
    }

    pub fn seed_client_access(&self, config: ClientAccessConfig) {
        self.client_access.insert(config.client_id.clone(), config);
    }
}

#[async_trait]
impl RegistryClient for InMemoryRegistryClient {
    async fn list_routes(&self) -> Result<Vec<RouteDefinition>, RegistryClientError> {
        Ok(self.routes.iter().map(|e| e.value().clone()).collect())
    }

    async fn get_route(&self, name: &str) -> Result<Option<RouteDefinition>, RegistryClientError> {
        Ok(self.routes.get(name).map(|e| e.value().clone()))
    }

    async fn put_route(&self, route: RouteDefinition) -> Result<RouteDefinition, RegistryClientError> {
        self.routes.insert(route.id.clone(), route.clone());
        Ok(route)
    }

    async fn delete_route(&self, name: &str) -> Result<(), RegistryClientError> {
        self.routes.remove(name);
        Ok(())
    }

    async fn list_client_access(
        &self,
        include_inactive: bool,
    ) -> Result<Vec<ClientAccessConfig>, RegistryClientError> {
        Ok(self
            .client_access
            .iter()
            .map(|e| e.value().clone())
            .filter(|c| include_inactive || c.active)
            .collect())
    }

    async fn put_client_access(
        &self,
        configs: Vec<ClientAccessConfig>,
    ) -> Result<Vec<String>, RegistryClientError> {
        let mut created = Vec::with_capacity(configs.len());
        for config in configs {
            created.push(config.client_id.clone());
            self.client_access.insert(config.client_id.clone(), config);
        }
        Ok(created)
    }

    async fn delete_client_access(&self, client_id: &str) -> Result<(), RegistryClientError> {
        self.client_access.remove(client_id);
        Ok(())
    }

    async fn health(&self) -> Result<bool, RegistryClientError> {
        Ok(true)
    }
}
