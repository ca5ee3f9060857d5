//! Business-domain endpoints of the sales pipeline
//!
//! Each pipeline stage is exposed as a conventional REST collection with
//! list/get/create/update/delete. Payloads stay as JSON values; callers that
//! want typed records can use [`AuthClient::execute`] directly.

use super::transport::ApiRequest;
use super::{AuthClient, ClientError};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// A pipeline collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Leads,
    Qualifications,
    Opportunities,
    Proposals,
    Contracts,
    Invoices,
}

impl Resource {
    pub const ALL: [Self; 6] = [
        Self::Leads,
        Self::Qualifications,
        Self::Opportunities,
        Self::Proposals,
        Self::Contracts,
        Self::Invoices,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Leads => "leads",
            Self::Qualifications => "qualifications",
            Self::Opportunities => "opportunities",
            Self::Proposals => "proposals",
            Self::Contracts => "contracts",
            Self::Invoices => "invoices",
        }
    }

    const fn singular(self) -> &'static str {
        match self {
            Self::Leads => "lead",
            Self::Qualifications => "qualification",
            Self::Opportunities => "opportunity",
            Self::Proposals => "proposal",
            Self::Contracts => "contract",
            Self::Invoices => "invoice",
        }
    }

    pub fn path(self) -> String {
        format!("/{}", self.name())
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Resource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|resource| {
                resource.name() == wanted || resource.singular() == wanted
            })
            .ok_or_else(|| {
                let names: Vec<&str> = Self::ALL.iter().map(|r| r.name()).collect();
                format!("unknown resource {s:?}, expected one of {}", names.join(", "))
            })
    }
}

/// Paging and search parameters for list calls
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub search: Option<String>,
}

impl ListQuery {
    fn pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        if let Some(page) = self.page {
            pairs.push(("page".to_string(), page.to_string()));
        }
        if let Some(page_size) = self.page_size {
            pairs.push(("pageSize".to_string(), page_size.to_string()));
        }
        if let Some(search) = self.search.as_ref().filter(|s| !s.is_empty()) {
            pairs.push(("search".to_string(), search.clone()));
        }
        pairs
    }
}

/// CRUD calls against one [`Resource`]
pub struct ResourceClient<'a> {
    client: &'a AuthClient,
    resource: Resource,
}

impl ResourceClient<'_> {
    pub async fn list(&self, query: &ListQuery) -> Result<Value, ClientError> {
        let request = ApiRequest::get(self.resource.path()).query(query.pairs());
        self.fetch(request).await
    }

    pub async fn get(&self, id: &str) -> Result<Value, ClientError> {
        self.fetch(ApiRequest::get(self.item_path(id))).await
    }

    pub async fn create(&self, body: Value) -> Result<Value, ClientError> {
        self.fetch(ApiRequest::post(self.resource.path()).with_body(body))
            .await
    }

    pub async fn update(&self, id: &str, body: Value) -> Result<Value, ClientError> {
        self.fetch(ApiRequest::put(self.item_path(id)).with_body(body))
            .await
    }

    pub async fn delete(&self, id: &str) -> Result<(), ClientError> {
        let envelope = self
            .client
            .execute_envelope::<Value>(ApiRequest::delete(self.item_path(id)))
            .await?;
        Ok(envelope.into_unit_result()?)
    }

    fn item_path(&self, id: &str) -> String {
        format!("{}/{}", self.resource.path(), id.trim_matches('/'))
    }

    async fn fetch(&self, request: ApiRequest) -> Result<Value, ClientError> {
        let envelope = self.client.execute_envelope::<Value>(request).await?;
        Ok(envelope.into_result_or_default()?)
    }
}

impl AuthClient {
    /// CRUD access to a pipeline collection
    pub const fn resource(&self, resource: Resource) -> ResourceClient<'_> {
        ResourceClient {
            client: self,
            resource,
        }
    }

    /// Read-only analytics report, e.g. `pipeline-summary`
    pub async fn analytics(
        &self,
        report: &str,
        params: &[(String, String)],
    ) -> Result<Value, ClientError> {
        let request = ApiRequest::get(format!("/analytics/{}", report.trim_matches('/')))
            .query(params.iter().cloned());
        let envelope = self.execute_envelope::<Value>(request).await?;
        Ok(envelope.into_result_or_default()?)
    }
}
