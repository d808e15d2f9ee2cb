//! Scripted message gateway.

use std::collections::HashMap;

use async_trait::async_trait;
use herald_delivery::{DeliveryError, MessageGateway, TemplateSendRequest};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Gateway that records every request and answers from a script.
///
/// Sends succeed with ids `wamid.1`, `wamid.2`, ... unless the destination
/// phone has a scripted failure.
#[derive(Debug, Default)]
pub struct ScriptedGateway {
    requests: RwLock<Vec<TemplateSendRequest>>,
    failures: RwLock<HashMap<String, DeliveryError>>,
    cancel_after: RwLock<Option<(usize, CancellationToken)>>,
}

impl ScriptedGateway {
    /// Creates a gateway where every send succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails every send to `phone_number` with `error`.
    pub async fn fail_phone(&self, phone_number: impl Into<String>, error: DeliveryError) {
        self.failures.write().await.insert(phone_number.into(), error);
    }

    /// Raises `token` once `sends` requests have been made, simulating a
    /// shutdown signal arriving mid-run.
    pub async fn cancel_after(&self, sends: usize, token: CancellationToken) {
        *self.cancel_after.write().await = Some((sends, token));
    }

    /// Requests received so far.
    pub async fn requests(&self) -> Vec<TemplateSendRequest> {
        self.requests.read().await.clone()
    }

    /// Destination phones in send order.
    pub async fn sent_to(&self) -> Vec<String> {
        self.requests.read().await.iter().map(|r| r.to.clone()).collect()
    }

    /// Number of send attempts.
    pub async fn send_count(&self) -> usize {
        self.requests.read().await.len()
    }
}

#[async_trait]
impl MessageGateway for ScriptedGateway {
    async fn send_template(&self, request: TemplateSendRequest) -> herald_delivery::Result<String> {
        let phone_number = request.to.clone();
        let count = {
            let mut requests = self.requests.write().await;
            requests.push(request);
            requests.len()
        };

        if let Some((after, token)) = self.cancel_after.read().await.as_ref() {
            if count >= *after {
                token.cancel();
            }
        }

        if let Some(error) = self.failures.read().await.get(&phone_number) {
            return Err(error.clone());
        }

        Ok(format!("wamid.{count}"))
    }
}
