use std::sync::Arc;
use tonic::{Request, Response, Status};

use crate::engine::MoneyMovementEngine;
use crate::proto::money_movement_service_server::{self, MoneyMovementServiceServer};
use crate::proto::{AuthorizePayload, AuthorizeResponse, CapturePayload, Empty};

/// gRPC front of the engine; the gateway is its only caller
pub struct MoneyMovementService {
    engine: Arc<MoneyMovementEngine>,
}

impl MoneyMovementService {
    pub fn new(engine: Arc<MoneyMovementEngine>) -> Self {
        Self { engine }
    }

    pub fn into_server(self) -> MoneyMovementServiceServer<Self> {
        MoneyMovementServiceServer::new(self)
    }
}

#[tonic::async_trait]
impl money_movement_service_server::MoneyMovementService for MoneyMovementService {
    async fn authorize(&self, request: Request<AuthorizePayload>) -> Result<Response<AuthorizeResponse>, Status> {
        let payload = request.into_inner();
        tracing::debug!(
            customer = %payload.customer_wallet_user_id,
            merchant = %payload.merchant_wallet_user_id,
            cents = payload.cents,
            currency = %payload.currency,
            "Authorize request"
        );

        let pid = self
            .engine
            .authorize(
                &payload.customer_wallet_user_id,
                &payload.merchant_wallet_user_id,
                payload.cents,
                &payload.currency,
            )
            .await?;

        Ok(Response::new(AuthorizeResponse { pid }))
    }

    async fn capture(&self, request: Request<CapturePayload>) -> Result<Response<Empty>, Status> {
        let payload = request.into_inner();
        tracing::debug!(pid = %payload.pid, "Capture request");

        self.engine.capture(&payload.pid).await?;
        Ok(Response::new(Empty {}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventEmitter;
    use crate::messaging::InMemoryPublisher;
    use crate::metrics::Metrics;
    use crate::models::{AccountType, WalletType};
    use crate::proto::money_movement_service_server::MoneyMovementService as _;
    use crate::store::MemoryStore;
    use tonic::Code;

    async fn service() -> MoneyMovementService {
        let store = MemoryStore::new();
        store
            .provision_wallet(
                "alice",
                WalletType::Customer,
                &[(AccountType::Default, 5000), (AccountType::Payment, 0)],
            )
            .await;
        store
            .provision_wallet("shop", WalletType::Merchant, &[(AccountType::Incoming, 0)])
            .await;

        let metrics = Arc::new(Metrics::new().unwrap());
        let emitter = Arc::new(EventEmitter::new(
            Arc::new(InMemoryPublisher::new()),
            Arc::new(store.clone()),
            metrics.clone(),
        ));
        MoneyMovementService::new(Arc::new(MoneyMovementEngine::new(Arc::new(store), emitter, metrics)))
    }

    fn authorize_request(cents: i64, currency: &str) -> Request<AuthorizePayload> {
        Request::new(AuthorizePayload {
            customer_wallet_user_id: "alice".into(),
            merchant_wallet_user_id: "shop".into(),
            cents,
            currency: currency.into(),
        })
    }

    #[tokio::test]
    async fn test_authorize_then_capture() {
        let service = service().await;

        let pid = service
            .authorize(authorize_request(1200, "USD"))
            .await
            .unwrap()
            .into_inner()
            .pid;
        assert!(!pid.is_empty());

        service
            .capture(Request::new(CapturePayload { pid }))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_status_codes() {
        let service = service().await;

        let status = service.authorize(authorize_request(100, "GBP")).await.unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);

        let status = service.authorize(authorize_request(9000, "USD")).await.unwrap_err();
        assert_eq!(status.code(), Code::Aborted);

        let status = service
            .capture(Request::new(CapturePayload { pid: "missing".into() }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::NotFound);
    }
}
