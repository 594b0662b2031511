/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

//! Streaming structured traffic log. Requests and responses are broken
//! into header and data frames (see [`frame`]) and pushed through a
//! bounded queue drained by a single writer task, so producers stay
//! decoupled from the sink up to the queue capacity and block once it is
//! full. Blocking (rather than dropping) keeps the data-frame index
//! sequence intact.

use std::pin::Pin;
use std::task::{Poll, ready};

use log::debug;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::PollSender;

use mitm_http::{Body, Request, Response};

pub mod frame;
use frame::{MessageType, encode_data_frame, encode_header_frame, frame_id};

mod logger;
pub use logger::TrafficLogger;

const FRAME_QUEUE_SIZE: usize = 64;

enum SinkCmd {
    Frame(Vec<u8>),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to a traffic log stream. Clones share one writer task; frame
/// order from a single producer is preserved.
#[derive(Clone)]
pub struct TrafficStream {
    sender: mpsc::Sender<SinkCmd>,
}

impl TrafficStream {
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (sender, receiver) = mpsc::channel(FRAME_QUEUE_SIZE);
        tokio::spawn(Sinker { receiver, writer }.into_running());
        TrafficStream { sender }
    }

    async fn send_frame(&self, frame: Vec<u8>) {
        // a send failure means the writer task is gone; logging just stops
        let _ = self.sender.send(SinkCmd::Frame(frame)).await;
    }

    async fn send_header(&self, id: [u8; 8], mt: MessageType, name: &str, value: &str) {
        self.send_frame(encode_header_frame(id, mt, name, value))
            .await;
    }

    /// Signal the writer task to stop and wait until it has acknowledged.
    pub async fn close(&self) {
        let (tx, rx) = oneshot::channel();
        if self.sender.send(SinkCmd::Shutdown(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Emit the header frames for `req` and wrap its body so every read
    /// produces a data frame, the last one marked terminal.
    pub async fn log_request(&self, id: &str, req: &mut Request, api: bool) {
        let id = frame_id(id);
        let mt = MessageType::Request;

        self.send_header(id, mt, ":method", req.method.as_str()).await;
        self.send_header(id, mt, ":scheme", req.uri.scheme_str().unwrap_or(""))
            .await;
        self.send_header(id, mt, ":authority", &req.host).await;
        self.send_header(id, mt, ":path", req.uri.path()).await;
        self.send_header(id, mt, ":query", req.uri.query().unwrap_or(""))
            .await;
        self.send_header(id, mt, ":proto", req.proto_str()).await;
        self.send_header(id, mt, ":remote", &req.remote_addr).await;
        let ts = chrono::Utc::now().timestamp_millis().to_string();
        self.send_header(id, mt, ":timestamp", &ts).await;
        if api {
            self.send_header(id, mt, ":api", "true").await;
        }
        for (name, value) in &req.headers {
            self.send_header(id, mt, name.as_str(), value.to_str().unwrap_or(""))
                .await;
        }

        let inner = req.body.take().into_reader();
        req.body = Body::streaming(FrameLoggingReader::new(
            inner,
            self.sender.clone(),
            id,
            mt,
        ));
    }

    /// Response-side counterpart of [`TrafficStream::log_request`].
    pub async fn log_response(&self, id: &str, res: &mut Response, api: bool) {
        let id = frame_id(id);
        let mt = MessageType::Response;

        self.send_header(id, mt, ":proto", res.proto_str()).await;
        self.send_header(id, mt, ":status", res.status.as_str()).await;
        self.send_header(id, mt, ":reason", res.status.canonical_reason().unwrap_or(""))
            .await;
        let ts = chrono::Utc::now().timestamp_millis().to_string();
        self.send_header(id, mt, ":timestamp", &ts).await;
        if api {
            self.send_header(id, mt, ":api", "true").await;
        }
        for (name, value) in &res.headers {
            self.send_header(id, mt, name.as_str(), value.to_str().unwrap_or(""))
                .await;
        }

        let inner = res.body.take().into_reader();
        res.body = Body::streaming(FrameLoggingReader::new(
            inner,
            self.sender.clone(),
            id,
            mt,
        ));
    }
}

struct Sinker<W> {
    receiver: mpsc::Receiver<SinkCmd>,
    writer: W,
}

impl<W: AsyncWrite + Unpin> Sinker<W> {
    async fn into_running(mut self) {
        while let Some(cmd) = self.receiver.recv().await {
            match cmd {
                SinkCmd::Frame(frame) => {
                    if let Err(e) = self.writer.write_all(&frame).await {
                        debug!("traffic sink write error: {e}");
                    }
                }
                SinkCmd::Shutdown(ack) => {
                    let _ = self.writer.flush().await;
                    let _ = ack.send(());
                    return;
                }
            }
        }
        let _ = self.writer.flush().await;
    }
}

/// Wraps a body so that every read emits a data frame with an increasing
/// sequence index; the read observing end-of-stream emits the terminal
/// frame. Queue space is reserved before the inner read, so a slow sink
/// back-pressures the body reader instead of losing frames.
struct FrameLoggingReader {
    inner: Box<dyn AsyncRead + Send + Unpin>,
    sender: PollSender<SinkCmd>,
    id: [u8; 8],
    mt: MessageType,
    index: u32,
    finished: bool,
    sink_gone: bool,
}

impl FrameLoggingReader {
    fn new(
        inner: Box<dyn AsyncRead + Send + Unpin>,
        sender: mpsc::Sender<SinkCmd>,
        id: [u8; 8],
        mt: MessageType,
    ) -> Self {
        FrameLoggingReader {
            inner,
            sender: PollSender::new(sender),
            id,
            mt,
            index: 0,
            finished: false,
            sink_gone: false,
        }
    }
}

impl AsyncRead for FrameLoggingReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();

        if !this.finished && !this.sink_gone {
            if ready!(this.sender.poll_reserve(cx)).is_err() {
                this.sink_gone = true;
            }
        }

        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        let nr = buf.filled().len() - before;

        if this.finished || this.sink_gone {
            return Poll::Ready(Ok(()));
        }

        let terminal = nr == 0;
        let frame = encode_data_frame(
            this.id,
            this.mt,
            this.index,
            terminal,
            &buf.filled()[before..],
        );
        this.index += 1;
        if this.sender.send_item(SinkCmd::Frame(frame)).is_err() {
            this.sink_gone = true;
        }
        if terminal {
            this.finished = true;
        }
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::frame::{Frame, FrameReader};
    use super::*;
    use bytes::Bytes;
    use http::{Method, Uri};
    use std::collections::HashMap;
    use tokio::io::AsyncReadExt;

    async fn collect_frames(
        mut server: tokio::io::DuplexStream,
    ) -> (HashMap<String, String>, Vec<Frame>) {
        let mut raw = Vec::new();
        server.read_to_end(&mut raw).await.unwrap();
        let mut reader = FrameReader::new(&raw[..]);
        let mut headers = HashMap::new();
        let mut data = Vec::new();
        while let Some(frame) = reader.next_frame().unwrap() {
            match frame {
                Frame::Header { name, value, .. } => {
                    headers.insert(name, value);
                }
                f @ Frame::Data { .. } => data.push(f),
            }
        }
        (headers, data)
    }

    #[tokio::test]
    async fn request_log_round_trip() {
        let (client, server) = tokio::io::duplex(1 << 16);
        let stream = TrafficStream::new(client);

        let mut req = Request::new(
            Method::POST,
            Uri::from_static("http://example.com/upload?kind=test"),
        );
        req.remote_addr = "10.1.1.1:9000".to_string();
        req.headers
            .insert("x-flavor", http::HeaderValue::from_static("plain"));
        req.body = Body::full(Bytes::from_static(b"frame me"));

        stream.log_request("0011223344556677", &mut req, false).await;

        // drive the wrapped body to completion, then once more past EOF
        let data = req.body.read_all().await.unwrap();
        assert_eq!(&data[..], b"frame me");

        stream.close().await;
        drop(stream);

        let (headers, frames) = collect_frames(server).await;
        assert_eq!(headers.get(":method").unwrap(), "POST");
        assert_eq!(headers.get(":authority").unwrap(), "example.com");
        assert_eq!(headers.get(":path").unwrap(), "/upload");
        assert_eq!(headers.get(":query").unwrap(), "kind=test");
        assert_eq!(headers.get(":remote").unwrap(), "10.1.1.1:9000");
        assert_eq!(headers.get("x-flavor").unwrap(), "plain");
        assert!(headers.contains_key(":timestamp"));
        assert!(!headers.contains_key(":api"));

        // indices strictly increase and exactly the last frame is terminal
        let mut payload = Vec::new();
        for (i, frame) in frames.iter().enumerate() {
            let Frame::Data {
                index,
                terminal,
                data,
                ..
            } = frame
            else {
                panic!("expected data frame");
            };
            assert_eq!(*index, i as u32);
            assert_eq!(*terminal, i == frames.len() - 1);
            payload.extend_from_slice(data);
        }
        assert_eq!(payload, b"frame me");
    }

    #[tokio::test]
    async fn response_log_emits_status_headers() {
        let (client, server) = tokio::io::duplex(1 << 16);
        let stream = TrafficStream::new(client);

        let req = Request::new(Method::GET, Uri::from_static("http://example.com/"));
        let mut res = Response::new(
            http::StatusCode::NOT_FOUND,
            Body::full(Bytes::from_static(b"missing")),
            std::sync::Arc::new(req.head()),
        );

        stream.log_response("ffee", &mut res, true).await;
        let _ = res.body.read_all().await.unwrap();
        stream.close().await;
        drop(stream);

        let (headers, frames) = collect_frames(server).await;
        assert_eq!(headers.get(":status").unwrap(), "404");
        assert_eq!(headers.get(":reason").unwrap(), "Not Found");
        assert_eq!(headers.get(":api").unwrap(), "true");
        assert!(!frames.is_empty());
    }
}
