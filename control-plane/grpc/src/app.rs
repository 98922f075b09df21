use crate::{
    api::{
        self,
        app_service_server::{AppService, AppServiceServer},
    },
    caller, convert, error,
    metrics::{Call, RpcMetrics},
    unary, ServerConfig,
};
use futures::prelude::*;
use loco_control_plane_core::{registry::RegistryTokens, AppRef};
use loco_control_plane_deploy::{Deployer, Scale};
use loco_control_plane_k8s_api::Cluster;
use loco_control_plane_k8s_logs::{self as logs, LogSource, LogStream, Output};
use std::pin::Pin;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

const SERVICE: &str = "loco.v1.AppService";

#[derive(Debug)]
pub struct AppServer<C, R, S> {
    deployer: Deployer<C, R>,
    logs: S,
    metrics: RpcMetrics,
    config: ServerConfig,
    drain: drain::Watch,
}

type BoxLogStream = Pin<Box<dyn Stream<Item = Result<api::LogEntry, tonic::Status>> + Send>>;

// === impl AppServer ===

impl<C, R, S> AppServer<C, R, S>
where
    C: Cluster,
    R: RegistryTokens,
    S: LogSource + Clone,
{
    pub fn new(
        deployer: Deployer<C, R>,
        logs: S,
        metrics: RpcMetrics,
        config: ServerConfig,
        drain: drain::Watch,
    ) -> Self {
        Self {
            deployer,
            logs,
            metrics,
            config,
            drain,
        }
    }

    pub fn svc(self) -> AppServiceServer<Self> {
        AppServiceServer::new(self)
    }
}

/// Resolves the app `name` owned by the caller of `req`.
fn app<T>(req: &tonic::Request<T>, name: &str) -> Result<AppRef, tonic::Status> {
    let user = caller(req)?;
    AppRef::new(name, &user).map_err(error::invalid)
}

#[async_trait::async_trait]
impl<C, R, S> AppService for AppServer<C, R, S>
where
    C: Cluster,
    R: RegistryTokens,
    S: LogSource + Clone,
{
    async fn status(
        &self,
        req: tonic::Request<api::StatusRequest>,
    ) -> Result<tonic::Response<api::StatusResponse>, tonic::Status> {
        unary(
            self.metrics.unary(SERVICE, "Status"),
            self.config.unary_timeout,
            async move {
                let app = app(&req, &req.get_ref().name)?;
                let status = self.deployer.status(&app).await.map_err(error::status)?;
                Ok(convert::status(status))
            },
        )
        .await
    }

    type LogsStream = BoxLogStream;

    async fn logs(
        &self,
        req: tonic::Request<api::LogsRequest>,
    ) -> Result<tonic::Response<BoxLogStream>, tonic::Status> {
        let call = self.metrics.server_stream(SERVICE, "Logs").start();
        let app = match app(&req, &req.get_ref().name) {
            Ok(app) => app,
            Err(status) => {
                call.end(status.code());
                return Err(status);
            }
        };
        let api::LogsRequest {
            tail_lines, since, ..
        } = req.into_inner();

        let config = logs::Config {
            namespace: Some(app.namespace.clone()),
            selector: Some(app.instance_selector()),
            follow: true,
            timestamps: true,
            tail_lines,
            since: since.and_then(convert::datetime),
            ..Default::default()
        };
        let started = LogStream::new(config, self.logs.clone()).and_then(|(stream, output)| {
            let token = CancellationToken::new();
            stream.start(&token)?;
            Ok((stream, output, token))
        });
        let (stream, output, token) = match started {
            Ok(started) => started,
            Err(error) => {
                let status = tonic::Status::internal(format!("failed to stream logs: {error}"));
                call.end(status.code());
                return Err(status);
            }
        };

        tracing::info!(namespace = %app.namespace, "Streaming logs");
        Ok(tonic::Response::new(log_entries(
            self.drain.clone(),
            stream,
            output,
            token,
            call,
        )))
    }

    async fn scale(
        &self,
        req: tonic::Request<api::ScaleRequest>,
    ) -> Result<tonic::Response<api::ScaleResponse>, tonic::Status> {
        unary(
            self.metrics.unary(SERVICE, "Scale"),
            self.config.unary_timeout,
            async move {
                let app = app(&req, &req.get_ref().name)?;
                let api::ScaleRequest {
                    replicas,
                    cpu,
                    memory,
                    ..
                } = req.into_inner();
                self.deployer
                    .scale(
                        &app,
                        Scale {
                            replicas,
                            cpu,
                            memory,
                        },
                    )
                    .await
                    .map_err(error::status)?;
                Ok(api::ScaleResponse {})
            },
        )
        .await
    }

    async fn update_env(
        &self,
        req: tonic::Request<api::UpdateEnvRequest>,
    ) -> Result<tonic::Response<api::UpdateEnvResponse>, tonic::Status> {
        unary(
            self.metrics.unary(SERVICE, "UpdateEnv"),
            self.config.unary_timeout,
            async move {
                let app = app(&req, &req.get_ref().name)?;
                let api::UpdateEnvRequest { env, restart, .. } = req.into_inner();
                let env = env.into_iter().map(|v| (v.name, v.value)).collect();
                self.deployer
                    .update_env(&app, env, restart)
                    .await
                    .map_err(error::status)?;
                Ok(api::UpdateEnvResponse {})
            },
        )
        .await
    }

    async fn destroy(
        &self,
        req: tonic::Request<api::DestroyRequest>,
    ) -> Result<tonic::Response<api::DestroyResponse>, tonic::Status> {
        unary(
            self.metrics.unary(SERVICE, "Destroy"),
            self.config.unary_timeout,
            async move {
                let app = app(&req, &req.get_ref().name)?;
                self.deployer.destroy(&app).await.map_err(error::status)?;
                Ok(api::DestroyResponse {})
            },
        )
        .await
    }
}

/// Forwards entries until the client goes away, the multiplexer finishes or
/// the server starts shutting down.
fn log_entries<S: LogSource>(
    drain: drain::Watch,
    stream: LogStream<S>,
    output: Output,
    token: CancellationToken,
    call: Call,
) -> BoxLogStream {
    let span = tracing::Span::current();
    Box::pin(async_stream::stream! {
        // Dropping the response stream cancels every follow task.
        let _cancel = token.drop_guard();
        let Output { mut entries, mut errors } = output;
        tokio::pin! {
            let shutdown = drain.signaled();
        }

        loop {
            tokio::select! {
                entry = entries.recv() => match entry {
                    Some(entry) => {
                        call.msg_sent();
                        yield Ok::<_, tonic::Status>(convert::log_entry(entry));
                    }
                    None => break,
                },

                Some(error) = errors.recv() => {
                    tracing::debug!(parent: &span, %error, "Container logs interrupted");
                }

                // Don't hold the server open.
                _ = &mut shutdown => break,
            }
        }

        stream.stop().instrument(span).await;
        call.end(tonic::Code::Ok);
    })
}
