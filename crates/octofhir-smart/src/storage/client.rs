//! Client registry.
//!
//! Stores relying-party registrations. Mutation only happens through explicit
//! registration calls; the authorization flow only reads from it.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::SmartResult;
use crate::error::SmartError;
use crate::types::{ClientRegistration, RegisteredClient};

// =============================================================================
// Client Registry Trait
// =============================================================================

/// Registry operations for relying-party clients.
#[async_trait]
pub trait ClientRegistry: Send + Sync {
    /// Looks up a client by id.
    async fn get_client(&self, client_id: &str) -> SmartResult<Option<RegisteredClient>>;

    /// Registers a new client.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` if the registration is incomplete or the
    /// `client_id` is taken. A failed call leaves the registry unchanged.
    async fn add_client(&self, registration: ClientRegistration) -> SmartResult<RegisteredClient>;

    /// Removes a client. Removing an unknown id is not an error.
    ///
    /// Returns `true` if a client was removed.
    async fn remove_client(&self, client_id: &str) -> SmartResult<bool>;

    /// Lists all registered clients, ordered by client id.
    async fn list_clients(&self) -> SmartResult<Vec<RegisteredClient>>;
}

// =============================================================================
// In-memory Registry
// =============================================================================

/// In-memory [`ClientRegistry`].
///
/// Uniqueness is checked and the entry inserted under the same shard lock, so
/// concurrent registrations of one id cannot both succeed.
#[derive(Debug, Default)]
pub struct InMemoryClientRegistry {
    clients: DashMap<String, RegisteredClient>,
}

impl InMemoryClientRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClientRegistry for InMemoryClientRegistry {
    async fn get_client(&self, client_id: &str) -> SmartResult<Option<RegisteredClient>> {
        Ok(self.clients.get(client_id).map(|c| c.clone()))
    }

    async fn add_client(&self, registration: ClientRegistration) -> SmartResult<RegisteredClient> {
        let client = registration.validate()?;

        match self.clients.entry(client.client_id.clone()) {
            Entry::Occupied(_) => {
                tracing::warn!("Rejected duplicate client registration: {}", client.client_id);
                Err(SmartError::invalid_request(format!(
                    "Client {} is already registered",
                    client.client_id
                )))
            }
            Entry::Vacant(slot) => {
                tracing::info!(
                    client_id = %client.client_id,
                    redirect_uris = client.redirect_uris.len(),
                    "Registered client"
                );
                slot.insert(client.clone());
                Ok(client)
            }
        }
    }

    async fn remove_client(&self, client_id: &str) -> SmartResult<bool> {
        if self.clients.remove(client_id).is_some() {
            tracing::info!(client_id, "Removed client");
            Ok(true)
        } else {
            tracing::warn!(client_id, "Client not found for removal");
            Ok(false)
        }
    }

    async fn list_clients(&self) -> SmartResult<Vec<RegisteredClient>> {
        let mut clients: Vec<_> = self.clients.iter().map(|c| c.value().clone()).collect();
        clients.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        Ok(clients)
    }
}
