use std::sync::RwLock;

use rastreo_protocol::ids::{CancellationRequestId, OrderId};
use rastreo_protocol::order::{CancellationRequest, Order, OrderStatus};
use rastreo_protocol::rest::{
    AppendTrackingEventRequest, CreateOrderRequest, DecideCancellationRequest, ErrorBody,
    SubmitCancellationRequest, UpdateStatusRequest,
};
use rastreo_protocol::tracking::{TrackingFields, TrackingSnapshot};
use reqwest::StatusCode;

use crate::error::{ClientError, ClientResult};

/// Bearer-authenticated REST client for the order API.
///
/// Every 401 clears the stored token and surfaces `SessionExpired`, which
/// the embedding UI treats as "redirect to login", the same global
/// contract the browser client applies.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: RwLock<Option<String>>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self {
            http: reqwest::Client::new(),
            base_url,
            token: RwLock::new(token),
        }
    }

    pub fn set_token(&self, token: impl Into<String>) {
        let mut slot = self.token.write().expect("token lock poisoned");
        *slot = Some(token.into());
    }

    pub fn token(&self) -> Option<String> {
        self.token.read().expect("token lock poisoned").clone()
    }

    pub async fn fetch_tracking(&self, order_id: &OrderId) -> ClientResult<TrackingSnapshot> {
        let url = self.url(&format!("/api/pedidos/{order_id}/seguimiento"));
        let response = self.send(self.http.get(url)).await?;
        decode(response).await
    }

    pub async fn update_status(
        &self,
        order_id: &OrderId,
        estado: OrderStatus,
        notas: Option<String>,
    ) -> ClientResult<TrackingSnapshot> {
        let url = self.url(&format!("/api/pedidos/{order_id}/estado"));
        let body = UpdateStatusRequest { estado, notas };
        let response = self.send(self.http.put(url).json(&body)).await?;
        decode(response).await
    }

    pub async fn update_tracking(
        &self,
        order_id: &OrderId,
        fields: &TrackingFields,
    ) -> ClientResult<TrackingSnapshot> {
        let url = self.url(&format!("/api/pedidos/{order_id}/seguimiento"));
        let response = self.send(self.http.put(url).json(fields)).await?;
        decode(response).await
    }

    pub async fn append_tracking_event(
        &self,
        order_id: &OrderId,
        estado: impl Into<String>,
    ) -> ClientResult<TrackingSnapshot> {
        let url = self.url(&format!("/api/pedidos/{order_id}/seguimiento/evento"));
        let body = AppendTrackingEventRequest {
            estado: estado.into(),
        };
        let response = self.send(self.http.post(url).json(&body)).await?;
        decode(response).await
    }

    pub async fn submit_cancellation(
        &self,
        order_id: &OrderId,
        motivo: impl Into<String>,
    ) -> ClientResult<CancellationRequest> {
        let url = self.url(&format!("/api/pedidos/{order_id}/solicitudes-cancelacion"));
        let body = SubmitCancellationRequest {
            motivo: motivo.into(),
        };
        let response = self.send(self.http.post(url).json(&body)).await?;
        decode(response).await
    }

    pub async fn list_cancellations(&self) -> ClientResult<Vec<CancellationRequest>> {
        let url = self.url("/api/solicitudes-cancelacion");
        let response = self.send(self.http.get(url)).await?;
        decode(response).await
    }

    pub async fn decide_cancellation(
        &self,
        request_id: &CancellationRequestId,
        aprobar: bool,
    ) -> ClientResult<CancellationRequest> {
        let url = self.url(&format!("/api/solicitudes-cancelacion/{request_id}"));
        let body = DecideCancellationRequest { aprobar };
        let response = self.send(self.http.put(url).json(&body)).await?;
        decode(response).await
    }

    pub async fn create_order(&self, request: &CreateOrderRequest) -> ClientResult<Order> {
        let url = self.url("/api/pedidos");
        let response = self.send(self.http.post(url).json(request)).await?;
        decode(response).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> ClientResult<reqwest::Response> {
        let builder = match self.token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        };
        let response = builder
            .send()
            .await
            .map_err(|err| ClientError::Http(err.to_string()))?;

        if response.status() == StatusCode::UNAUTHORIZED {
            let mut slot = self.token.write().expect("token lock poisoned");
            *slot = None;
            return Err(ClientError::SessionExpired);
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = match response.json::<ErrorBody>().await {
                Ok(body) => body.error,
                Err(_) => "request failed".to_owned(),
            };
            return Err(ClientError::Api { status, message });
        }
        Ok(response)
    }
}

async fn decode<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> ClientResult<T> {
    response
        .json()
        .await
        .map_err(|err| ClientError::Malformed(err.to_string()))
}
