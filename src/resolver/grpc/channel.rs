//! 负载均衡的 gRPC 通道
//!
//! 实现 `tower::Service`，可直接交给 tonic 生成的客户端使用。
//! 每个请求从扩展里读取 `SelectOptions`，选出子连接后转发。
//! `DoneFunc` 在响应流结束时回调，状态取自 trailers；trailers-only 响应在收到响应头时回调。

use bytes::Bytes;
use futures::future::BoxFuture;
use http_body::{Body as HttpBody, Frame, SizeHint};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tonic::body::Body;
use tower::{Service, ServiceExt};

use super::picker::PickResult;
use super::pool::{Connector, SubConnPool, TonicConnector};
use crate::selector::{DoneFunc, DoneInfo, SelectOptions};

pub struct BalancedChannel<K: Connector = TonicConnector> {
    pool: Arc<SubConnPool<K>>,
}

impl<K: Connector> Clone for BalancedChannel<K> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
        }
    }
}

impl<K: Connector> BalancedChannel<K> {
    pub fn new(pool: Arc<SubConnPool<K>>) -> Self {
        Self { pool }
    }
}

/// 非 0 的 `grpc-status` 视为调用失败
fn grpc_status_error(md: &http::HeaderMap) -> Option<String> {
    let status = md.get("grpc-status")?.to_str().ok()?;
    if status == "0" {
        return None;
    }
    let message = md
        .get("grpc-message")
        .and_then(|m| m.to_str().ok())
        .unwrap_or_default();
    Some(format!("grpc-status {}: {}", status, message))
}

fn completed(headers: &http::HeaderMap, trailers: Option<&http::HeaderMap>) -> DoneInfo {
    let mut reply_md = headers.clone();
    let err = match trailers {
        Some(trailers) => {
            reply_md.extend(trailers.clone());
            grpc_status_error(trailers)
        }
        None => grpc_status_error(headers),
    };
    DoneInfo {
        err,
        bytes_sent: true,
        bytes_received: true,
        reply_md: Some(reply_md),
    }
}

/// 保证 `DoneFunc` 恰好回调一次；未完成就被丢弃时按取消上报
struct DoneGuard {
    done: Option<DoneFunc>,
}

impl DoneGuard {
    fn new(done: DoneFunc) -> Self {
        Self { done: Some(done) }
    }

    fn finish_with(&mut self, info: impl FnOnce() -> DoneInfo) {
        if let Some(done) = self.done.take() {
            done(info());
        }
    }
}

impl Drop for DoneGuard {
    fn drop(&mut self) {
        self.finish_with(|| DoneInfo::with_error("cancelled"));
    }
}

/// 包装响应体，在流结束（或出错）时回调 `DoneFunc`
struct DoneBody {
    inner: Pin<Box<Body>>,
    headers: http::HeaderMap,
    guard: DoneGuard,
}

impl HttpBody for DoneBody {
    type Data = Bytes;
    type Error = tonic::Status;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, tonic::Status>>> {
        let this = self.get_mut();
        let polled = this.inner.as_mut().poll_frame(cx);
        match &polled {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(trailers) = frame.trailers_ref() {
                    this.guard
                        .finish_with(|| completed(&this.headers, Some(trailers)));
                }
            }
            Poll::Ready(Some(Err(status))) => {
                this.guard.finish_with(|| DoneInfo {
                    err: Some(status.to_string()),
                    bytes_sent: true,
                    bytes_received: true,
                    reply_md: Some(this.headers.clone()),
                });
            }
            Poll::Ready(None) => {
                this.guard.finish_with(|| completed(&this.headers, None));
            }
            Poll::Pending => {}
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for DoneBody {
    fn drop(&mut self) {
        // 数据已读完只是没再轮询结束帧，按成功处理
        if self.inner.is_end_stream() {
            let headers = &self.headers;
            self.guard.finish_with(|| completed(headers, None));
        }
    }
}

impl<K> Service<http::Request<Body>> for BalancedChannel<K>
where
    K: Connector,
    K::Conn: Service<http::Request<Body>, Response = http::Response<Body>> + Send + 'static,
    <K::Conn as Service<http::Request<Body>>>::Error: Into<tower::BoxError>,
    <K::Conn as Service<http::Request<Body>>>::Future: Send,
{
    type Response = http::Response<Body>;
    type Error = tower::BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<Body>) -> Self::Future {
        let opts = req
            .extensions()
            .get::<SelectOptions>()
            .cloned()
            .unwrap_or_default();
        // 选中即持有 guard，future 在首次轮询前被丢弃也会回调
        let picked = self
            .pool
            .picker()
            .pick(&opts)
            .map(|PickResult { conn, done, .. }| (conn, DoneGuard::new(done)));

        Box::pin(async move {
            let (mut conn, mut guard) = picked?;

            if let Err(e) = conn.ready().await {
                let e: tower::BoxError = e.into();
                guard.finish_with(|| DoneInfo::with_error(e.to_string()));
                return Err(e);
            }

            match conn.call(req).await {
                Ok(resp) => {
                    // trailers-only 响应或空响应体，响应头即是结果
                    if resp.headers().contains_key("grpc-status") || resp.body().is_end_stream() {
                        guard.finish_with(|| completed(resp.headers(), None));
                        return Ok(resp);
                    }

                    let (parts, body) = resp.into_parts();
                    let body = DoneBody {
                        inner: Box::pin(body),
                        headers: parts.headers.clone(),
                        guard,
                    };
                    Ok(http::Response::from_parts(parts, Body::new(body)))
                }
                Err(e) => {
                    let e: tower::BoxError = e.into();
                    guard.finish_with(|| DoneInfo {
                        err: Some(e.to_string()),
                        bytes_sent: true,
                        bytes_received: false,
                        reply_md: None,
                    });
                    Err(e)
                }
            }
        })
    }
}
