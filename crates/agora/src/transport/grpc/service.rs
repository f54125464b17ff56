// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `Agora` trait implementation — all gRPC RPC handlers, each a thin
//! translation between wire messages and a [`ClusterHandler`] call.

use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};

use super::convert::{envelope_to_event, event_to_envelope};
use super::{proto, AgoraGrpc, ClusterHandler, GrpcStream};

fn payload_or_empty(field: impl Into<String>) -> String {
    field.into()
}

#[tonic::async_trait]
impl<H: ClusterHandler + 'static> proto::agora_server::Agora for AgoraGrpc<H> {
    async fn register_worker(
        &self,
        request: Request<proto::RegisterWorkerRequest>,
    ) -> Result<Response<proto::RegisterWorkerResponse>, Status> {
        let req = request.into_inner();
        match self.handler.register_worker(req.worker_id, req.address, req.capacity).await {
            Ok(directory_version) => {
                Ok(Response::new(proto::RegisterWorkerResponse {
                    accepted: true,
                    directory_version,
                    error: String::new(),
                }))
            }
            Err(code) => Ok(Response::new(proto::RegisterWorkerResponse {
                accepted: false,
                directory_version: 0,
                error: payload_or_empty(code.as_str()),
            })),
        }
    }

    async fn heartbeat(
        &self,
        request: Request<proto::HeartbeatRequest>,
    ) -> Result<Response<proto::HeartbeatResponse>, Status> {
        let req = request.into_inner();
        let directory_version = self
            .handler
            .heartbeat(req.worker_id, req.timestamp_ms, req.local_agent_count)
            .await
            .map_err(|code| code.to_grpc_status("heartbeat rejected"))?;
        Ok(Response::new(proto::HeartbeatResponse { acknowledged: true, directory_version }))
    }

    async fn assign_agents(
        &self,
        request: Request<proto::AssignAgentsRequest>,
    ) -> Result<Response<proto::AssignAgentsResponse>, Status> {
        let req = request.into_inner();
        let accepted = self
            .handler
            .assign_agents(req.worker_id, req.agent_ids, req.directory_version)
            .await
            .is_ok();
        Ok(Response::new(proto::AssignAgentsResponse { accepted }))
    }

    async fn dispatch_event(
        &self,
        request: Request<proto::DispatchEventRequest>,
    ) -> Result<Response<proto::DispatchEventResponse>, Status> {
        let envelope = request.into_inner().event.ok_or_else(|| Status::invalid_argument("missing event"))?;
        let event = envelope_to_event(envelope).map_err(|e| Status::invalid_argument(e.to_string()))?;
        match self.handler.dispatch_event(event).await {
            Ok(()) => Ok(Response::new(proto::DispatchEventResponse { accepted: true, error: String::new() })),
            Err(code) => Ok(Response::new(proto::DispatchEventResponse {
                accepted: false,
                error: payload_or_empty(code.as_str()),
            })),
        }
    }

    async fn forward_broadcast(
        &self,
        request: Request<proto::ForwardBroadcastRequest>,
    ) -> Result<Response<proto::ForwardBroadcastResponse>, Status> {
        let envelope = request.into_inner().event.ok_or_else(|| Status::invalid_argument("missing event"))?;
        let event = envelope_to_event(envelope).map_err(|e| Status::invalid_argument(e.to_string()))?;
        let delivered_count = self
            .handler
            .forward_broadcast(event)
            .await
            .map_err(|code| code.to_grpc_status("broadcast forward failed"))?;
        Ok(Response::new(proto::ForwardBroadcastResponse { delivered_count }))
    }

    type StreamForwardsStream = GrpcStream<proto::DispatchEventRequest>;

    async fn stream_forwards(
        &self,
        request: Request<proto::StreamForwardsRequest>,
    ) -> Result<Response<Self::StreamForwardsStream>, Status> {
        let req = request.into_inner();
        let mut rx = self.handler.subscribe_forwards(req.from_node_id, req.to_node_id).await;
        let (tx, out_rx) = tokio::sync::mpsc::channel(64);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let envelope = match event_to_envelope(&event) {
                    Ok(envelope) => envelope,
                    Err(_) => continue,
                };
                if tx.send(Ok(proto::DispatchEventRequest { event: Some(envelope) })).await.is_err() {
                    break;
                }
            }
        });
        Ok(Response::new(Box::pin(ReceiverStream::new(out_rx))))
    }

    async fn lock_request(
        &self,
        request: Request<proto::LockRequestMessage>,
    ) -> Result<Response<proto::LockRequestResponse>, Status> {
        let req = request.into_inner();
        match self
            .handler
            .lock_request(
                req.key,
                req.requester_id,
                std::time::Duration::from_millis(req.lease_ttl_ms),
                std::time::Duration::from_millis(req.timeout_ms),
            )
            .await
        {
            Ok(lease) => Ok(Response::new(proto::LockRequestResponse {
                granted: true,
                fence_token: lease.fence_token,
                error: String::new(),
            })),
            Err(err) => Ok(Response::new(proto::LockRequestResponse {
                granted: false,
                fence_token: 0,
                error: err.to_string(),
            })),
        }
    }

    async fn lock_release(
        &self,
        request: Request<proto::LockReleaseMessage>,
    ) -> Result<Response<proto::LockReleaseResponse>, Status> {
        let req = request.into_inner();
        self.handler.lock_release(req.key, req.requester_id, req.fence_token).await;
        Ok(Response::new(proto::LockReleaseResponse { released: true }))
    }

    async fn data_get(
        &self,
        request: Request<proto::DataGetRequest>,
    ) -> Result<Response<proto::DataGetResponse>, Status> {
        let req = request.into_inner();
        let default = req
            .default_json
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(|e: serde_json::Error| Status::invalid_argument(e.to_string()))?;
        match self.handler.data_get(req.source_kind, req.target_kind, req.key.clone(), default).await {
            Ok(value) => {
                let value_json = value.map(|v| serde_json::to_string(&v)).transpose().ok().flatten();
                Ok(Response::new(proto::DataGetResponse { key: req.key, value_json, ok: true, error: String::new() }))
            }
            Err(code) => Ok(Response::new(proto::DataGetResponse {
                key: req.key,
                value_json: None,
                ok: false,
                error: payload_or_empty(code.as_str()),
            })),
        }
    }

    async fn data_set(
        &self,
        request: Request<proto::DataSetRequest>,
    ) -> Result<Response<proto::DataSetResponse>, Status> {
        let req = request.into_inner();
        let value: serde_json::Value =
            serde_json::from_str(&req.value_json).map_err(|e| Status::invalid_argument(e.to_string()))?;
        match self
            .handler
            .data_set(req.source_kind, req.target_kind, req.key.clone(), value, req.fence_token)
            .await
        {
            Ok(()) => Ok(Response::new(proto::DataSetResponse { key: req.key, ok: true, error: String::new() })),
            Err(code) => Ok(Response::new(proto::DataSetResponse {
                key: req.key,
                ok: false,
                error: payload_or_empty(code.as_str()),
            })),
        }
    }

    async fn shutdown(
        &self,
        request: Request<proto::ShutdownRequest>,
    ) -> Result<Response<proto::ShutdownResponse>, Status> {
        let req = request.into_inner();
        self.handler
            .shutdown(req.reason, std::time::Duration::from_millis(req.grace_period_ms))
            .await
            .map_err(|code| code.to_grpc_status("shutdown failed"))?;
        Ok(Response::new(proto::ShutdownResponse { acknowledged: true }))
    }
}

