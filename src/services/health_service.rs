use sqlx::PgPool;
use tonic::{Request, Response, Status};

use crate::proto::health::{
    health_check_response::ServingStatus, health_server::Health, HealthCheckRequest,
    HealthCheckResponse,
};

/// Service names answered by the health check; empty means the whole server.
const KNOWN_SERVICES: &[&str] = &[
    "",
    "achados.auth.AuthService",
    "achados.items.ItemsService",
    "achados.categories.CategoriesService",
];

#[derive(Debug, Default)]
pub struct HealthServiceImpl {
    pool: Option<PgPool>,
}

impl HealthServiceImpl {
    pub fn new() -> Self {
        Self { pool: None }
    }

    /// Reports NOT_SERVING while the database does not answer.
    pub fn with_database(pool: PgPool) -> Self {
        Self { pool: Some(pool) }
    }

    async fn status_for(&self, service: &str) -> ServingStatus {
        if !KNOWN_SERVICES.contains(&service) {
            return ServingStatus::ServiceUnknown;
        }
        match &self.pool {
            Some(pool) => match sqlx::query("SELECT 1").execute(pool).await {
                Ok(_) => ServingStatus::Serving,
                Err(e) => {
                    tracing::warn!("Health check database ping failed: {}", e);
                    ServingStatus::NotServing
                }
            },
            None => ServingStatus::Serving,
        }
    }
}

#[tonic::async_trait]
impl Health for HealthServiceImpl {
    async fn check(
        &self,
        request: Request<HealthCheckRequest>,
    ) -> Result<Response<HealthCheckResponse>, Status> {
        let service = &request.get_ref().service;
        match self.status_for(service).await {
            ServingStatus::ServiceUnknown => {
                Err(Status::not_found(format!("unknown service: {}", service)))
            }
            status => Ok(Response::new(HealthCheckResponse {
                status: status.into(),
            })),
        }
    }

    type WatchStream = tokio_stream::wrappers::ReceiverStream<Result<HealthCheckResponse, Status>>;

    async fn watch(
        &self,
        request: Request<HealthCheckRequest>,
    ) -> Result<Response<Self::WatchStream>, Status> {
        let status = self.status_for(&request.get_ref().service).await;
        let (tx, rx) = tokio::sync::mpsc::channel(1);

        tokio::spawn(async move {
            let _ = tx
                .send(Ok(HealthCheckResponse {
                    status: status.into(),
                }))
                .await;
        });

        Ok(Response::new(tokio_stream::wrappers::ReceiverStream::new(rx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn test_check_serving() {
        let service = HealthServiceImpl::new();
        let res = service
            .check(Request::new(HealthCheckRequest {
                service: String::new(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(res.status, ServingStatus::Serving as i32);
    }

    #[tokio::test]
    async fn test_check_unknown_service() {
        let service = HealthServiceImpl::new();
        let status = service
            .check(Request::new(HealthCheckRequest {
                service: "nope.Service".to_string(),
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::NotFound);
    }

    #[tokio::test]
    async fn test_watch_unknown_service_reports_status() {
        let service = HealthServiceImpl::new();
        let mut stream = service
            .watch(Request::new(HealthCheckRequest {
                service: "nope.Service".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.status, ServingStatus::ServiceUnknown as i32);
    }

    #[tokio::test]
    async fn test_watch_emits_status() {
        let service = HealthServiceImpl::new();
        let mut stream = service
            .watch(Request::new(HealthCheckRequest {
                service: "achados.items.ItemsService".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.status, ServingStatus::Serving as i32);
    }
}
