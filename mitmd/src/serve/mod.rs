/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

//! The proxy loop: accept connections, upgrade CONNECT tunnels with
//! on-the-fly certificates, and run every decrypted or plaintext exchange
//! through the modifier pipeline around an upstream round trip.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use bytes::Bytes;
use http::{HeaderValue, Method, StatusCode, header};
use log::{debug, info, warn};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_rustls::{TlsAcceptor, TlsConnector};

use mitm_cert::{CertificateAuthority, Host, tls};
use mitm_http::{
    Body, Request, Response, read_request_body, read_request_head, read_response_body,
    read_response_head, write_body_full, write_request_head, write_response_head,
};

use crate::modifier::{ModifierGroup, RequestModifier, ResponseModifier};
use crate::session::{Context, Session, SessionStream};

mod rewind;
use rewind::PrefixedStream;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_ACCEPT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ProxyServer {
    authority: Arc<CertificateAuthority>,
    modifiers: Arc<ModifierGroup>,
    upstream_tls: Option<Arc<rustls::ClientConfig>>,
    body_limit: usize,
    connect_timeout: Duration,
    accept_timeout: Duration,
}

impl ProxyServer {
    pub fn new(
        authority: Arc<CertificateAuthority>,
        modifiers: Arc<ModifierGroup>,
        upstream_ca_pem: Option<&[u8]>,
        body_limit: usize,
    ) -> anyhow::Result<Self> {
        let upstream_tls = if authority.skip_verify() || upstream_ca_pem.is_some() {
            Some(tls::upstream_client_config(&authority, upstream_ca_pem)?)
        } else {
            None
        };
        Ok(ProxyServer {
            authority,
            modifiers,
            upstream_tls,
            body_limit,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            accept_timeout: DEFAULT_ACCEPT_TIMEOUT,
        })
    }

    pub fn set_connect_timeout(&mut self, timeout: Duration) {
        self.connect_timeout = timeout;
    }

    /// Accept connections forever, one task per connection.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> anyhow::Result<()> {
        info!("proxy listening on {}", listener.local_addr()?);
        loop {
            let (stream, peer) = listener.accept().await?;
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream, peer).await {
                    debug!("connection from {peer} ended: {e:#}");
                }
            });
        }
    }

    async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) -> anyhow::Result<()> {
        let session = Arc::new(Session::new(None)?);
        self.serve_stream(Box::new(stream), session, peer).await
    }

    // boxed future: the CONNECT upgrade path re-enters this function on
    // the decrypted stream
    fn serve_stream<'a>(
        &'a self,
        stream: Box<dyn SessionStream>,
        session: Arc<Session>,
        peer: SocketAddr,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let remote_addr = peer.to_string();
            let mut reader = BufReader::new(stream);
            loop {
                let Some(mut req) = read_request_head(&mut reader, &remote_addr).await? else {
                    return Ok(());
                };
                debug!("{remote_addr}: {} {}", req.method, req.uri);

                if req.method == Method::CONNECT {
                    let authority = req.host.clone();
                    if authority.is_empty() {
                        return Err(anyhow!("CONNECT request without authority"));
                    }
                    reader
                        .get_mut()
                        .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
                        .await?;
                    reader.get_mut().flush().await?;

                    // the buffered reader may already hold the start of
                    // the TLS client hello
                    let buffered = Bytes::copy_from_slice(reader.buffer());
                    let stream = PrefixedStream::new(buffered, reader.into_inner());

                    session.mark_secure();
                    let config = tls::server_config_for_host(
                        self.authority.clone(),
                        Host::strip_port(&authority).to_string(),
                    );
                    let tls_stream = timeout(
                        self.accept_timeout,
                        TlsAcceptor::from(config).accept(stream),
                    )
                    .await
                    .map_err(|_| anyhow!("tls handshake with client timed out"))?
                    .map_err(|e| anyhow!("tls handshake with client failed: {e}"))?;

                    return self
                        .serve_stream(Box::new(tls_stream), session, peer)
                        .await;
                }

                read_request_body(&mut reader, &mut req, self.body_limit).await?;
                let close = wants_close(&req);

                let ctx = Context::new(session.clone())?;
                let head = Arc::new(req.head());

                let mut rsp = match self.modifiers.modify_request(&ctx, &mut req).await {
                    Err(e) => {
                        warn!("request pipeline failed for {}: {e}", req.uri);
                        error_response(&e, head.clone())
                    }
                    Ok(()) => {
                        if ctx.skipping_round_trip() {
                            Response::new(StatusCode::OK, Body::empty(), head.clone())
                        } else {
                            match self.round_trip(&session, &mut req).await {
                                Ok(rsp) => rsp,
                                Err(e) => {
                                    warn!("round trip to {} failed: {e:#}", req.host);
                                    error_response(&e, head.clone())
                                }
                            }
                        }
                    }
                };

                if let Err(e) = self.modifiers.modify_response(&ctx, &mut rsp).await {
                    warn!("response pipeline failed for {}: {e}", head.uri);
                    rsp = error_response(&e, head);
                }

                if session.hijacked() {
                    // a modifier took over the exchange; stop driving the
                    // connection
                    return Ok(());
                }

                let data = rsp
                    .body
                    .read_all()
                    .await
                    .map_err(|e| anyhow!("failed to read response body: {e}"))?;
                // an empty buffer may mean a body-less message (HEAD, 204),
                // whose declared Content-Length must survive untouched
                if !rsp.chunked && !data.is_empty() {
                    rsp.content_length = Some(data.len() as u64);
                }
                let mut out = Vec::with_capacity(512 + data.len());
                write_response_head(&rsp, &mut out);
                write_body_full(&data, rsp.chunked, &rsp.trailer, &mut out);
                reader.get_mut().write_all(&out).await?;
                reader.get_mut().flush().await?;

                if close {
                    // send close_notify on TLS streams
                    let _ = reader.get_mut().shutdown().await;
                    return Ok(());
                }
            }
        })
    }

    /// Forward the request upstream and read the response. A fresh
    /// connection is dialed per exchange; TLS is used when the client leg
    /// was a CONNECT tunnel.
    async fn round_trip(
        &self,
        session: &Arc<Session>,
        req: &mut Request,
    ) -> anyhow::Result<Response> {
        if req.host.is_empty() {
            return Err(anyhow!("request has no upstream host"));
        }
        let secure = session.is_secure();
        let default_port = if secure { 443 } else { 80 };
        let (hostname, port) = split_host_port(&req.host, default_port);

        let tcp = timeout(
            self.connect_timeout,
            TcpStream::connect((hostname.as_str(), port)),
        )
        .await
        .map_err(|_| anyhow!("connect to {hostname}:{port} timed out"))?
        .map_err(|e| anyhow!("connect to {hostname}:{port} failed: {e}"))?;

        strip_hop_by_hop(req);

        if secure {
            let config = self.upstream_tls.clone().ok_or_else(|| {
                anyhow!("no upstream CA bundle configured; use an upstream CA or insecure mode")
            })?;
            let server_name = rustls_pki_types::ServerName::try_from(hostname.clone())
                .map_err(|e| anyhow!("invalid tls server name {hostname}: {e}"))?;
            let tls_stream = TlsConnector::from(config)
                .connect(server_name, tcp)
                .await
                .map_err(|e| anyhow!("tls handshake with {hostname} failed: {e}"))?;
            self.exchange(Box::new(tls_stream), req).await
        } else {
            self.exchange(Box::new(tcp), req).await
        }
    }

    async fn exchange(
        &self,
        stream: Box<dyn SessionStream>,
        req: &mut Request,
    ) -> anyhow::Result<Response> {
        let data = req.body.read_all().await?;
        if !req.chunked && (req.content_length.is_some() || !data.is_empty()) {
            req.content_length = Some(data.len() as u64);
        }
        let mut out = Vec::with_capacity(512 + data.len());
        write_request_head(req, &mut out);
        write_body_full(&data, req.chunked, &req.trailer, &mut out);

        let mut reader = BufReader::new(stream);
        reader.get_mut().write_all(&out).await?;
        reader.get_mut().flush().await?;

        let head = Arc::new(req.head());
        let mut rsp = read_response_head(&mut reader, head).await?;
        read_response_body(&mut reader, &mut rsp, self.body_limit).await?;
        Ok(rsp)
    }
}

fn wants_close(req: &Request) -> bool {
    let connection = req
        .headers
        .get(header::CONNECTION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if connection
        .split(',')
        .any(|t| t.trim().eq_ignore_ascii_case("close"))
    {
        return true;
    }
    if req.version == http::Version::HTTP_10 {
        return !connection
            .split(',')
            .any(|t| t.trim().eq_ignore_ascii_case("keep-alive"));
    }
    false
}

fn strip_hop_by_hop(req: &mut Request) {
    for name in [
        "connection",
        "proxy-connection",
        "keep-alive",
        "te",
        "upgrade",
        "proxy-authorization",
    ] {
        req.headers.remove(name);
    }
}

fn split_host_port(host: &str, default_port: u16) -> (String, u16) {
    let name = Host::strip_port(host).to_string();
    if let Some(p) = host.find("]:") {
        let port = host[p + 2..].parse::<u16>().unwrap_or(default_port);
        return (name, port);
    }
    if !host.starts_with('[') && host.bytes().filter(|b| *b == b':').count() == 1 {
        if let Some((_, p)) = host.rsplit_once(':') {
            return (name, p.parse::<u16>().unwrap_or(default_port));
        }
    }
    (name, default_port)
}

/// A 502 with the failure recorded in a Warning-style header; the failed
/// request is never forwarded half-modified.
fn error_response(err: &anyhow::Error, head: Arc<mitm_http::RequestHead>) -> Response {
    let mut rsp = Response::new(StatusCode::BAD_GATEWAY, Body::empty(), head);
    let msg = err.to_string().replace(['\r', '\n'], " ").replace('"', "'");
    if let Ok(value) = HeaderValue::from_str(&format!("199 \"mitmd\" \"{msg}\"")) {
        rsp.headers.insert(header::WARNING, value);
    }
    rsp
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modifier::header::SetHeaderModifier;
    use http::HeaderName;
    use mitm_cert::builder::RootCertBuilder;
    use rustls::RootCertStore;
    use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

    fn test_authority() -> CertificateAuthority {
        let mut builder = RootCertBuilder::new(Duration::from_secs(24 * 3600)).unwrap();
        builder
            .subject_builder_mut()
            .set_common_name("proxy test authority".to_string());
        let root = builder.build().unwrap();
        let root_key = builder.pkey().to_owned();
        CertificateAuthority::new(root, root_key).unwrap()
    }

    async fn read_head<S: AsyncRead + Unpin>(s: &mut S) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut byte = [0u8; 1];
        while !buf.ends_with(b"\r\n\r\n") {
            if s.read(&mut byte).await.unwrap() == 0 {
                break;
            }
            buf.push(byte[0]);
        }
        buf
    }

    // echoes the received request head back as the response body
    async fn echo_origin<S: AsyncRead + AsyncWrite + Unpin>(mut stream: S) {
        let head = read_head(&mut stream).await;
        let rsp = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n",
            head.len()
        );
        stream.write_all(rsp.as_bytes()).await.unwrap();
        stream.write_all(&head).await.unwrap();
        stream.flush().await.unwrap();
    }

    fn test_server(authority: CertificateAuthority) -> Arc<ProxyServer> {
        let group = ModifierGroup::new();
        group.add_request_modifier(Arc::new(SetHeaderModifier::new(
            HeaderName::from_static("x-injected"),
            HeaderValue::from_static("on"),
        )));
        group.add_response_modifier(Arc::new(SetHeaderModifier::new(
            HeaderName::from_static("x-proxied"),
            HeaderValue::from_static("yes"),
        )));
        Arc::new(ProxyServer::new(Arc::new(authority), Arc::new(group), None, 0).unwrap())
    }

    #[tokio::test]
    async fn proxies_plain_http_exchanges() {
        let origin = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let origin_addr = origin.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = origin.accept().await.unwrap();
            echo_origin(stream).await;
        });

        let server = test_server(test_authority());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = listener.local_addr().unwrap();
        tokio::spawn(server.serve(listener));

        let mut client = TcpStream::connect(proxy_addr).await.unwrap();
        let req = format!(
            "GET http://{origin_addr}/hello HTTP/1.1\r\nHost: {origin_addr}\r\nConnection: close\r\n\r\n"
        );
        client.write_all(req.as_bytes()).await.unwrap();
        let mut rsp = Vec::new();
        client.read_to_end(&mut rsp).await.unwrap();
        let text = String::from_utf8_lossy(&rsp);

        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        // the response modifier ran on the way back
        assert!(text.contains("x-proxied: yes\r\n"));
        // the request modifier ran before forwarding, visible in the echo
        assert!(text.contains("x-injected: on"));
        assert!(text.contains("GET /hello HTTP/1.1"));
    }

    #[tokio::test]
    async fn intercepts_connect_tunnels() {
        // a TLS origin with its own authority
        let origin_authority = Arc::new(test_authority());
        let origin_cfg =
            tls::server_config_for_host(origin_authority, "origin.test".to_string());
        let origin = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let origin_addr = origin.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = origin.accept().await.unwrap();
            let stream = TlsAcceptor::from(origin_cfg).accept(tcp).await.unwrap();
            echo_origin(stream).await;
        });

        // the proxy cannot verify the origin's private authority
        let mut proxy_authority = test_authority();
        proxy_authority.set_skip_verify(true);
        let proxy_root = proxy_authority.root().to_der().unwrap();
        let server = test_server(proxy_authority);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = listener.local_addr().unwrap();
        tokio::spawn(server.serve(listener));

        let mut client = TcpStream::connect(proxy_addr).await.unwrap();
        let connect = format!(
            "CONNECT {origin_addr} HTTP/1.1\r\nHost: {origin_addr}\r\n\r\n"
        );
        client.write_all(connect.as_bytes()).await.unwrap();
        let established = read_head(&mut client).await;
        assert!(established.starts_with(b"HTTP/1.1 200 Connection established"));

        // the client trusts the proxy's root, so the interception leaf
        // must verify for the tunnel target
        let mut roots = RootCertStore::empty();
        roots
            .add(rustls_pki_types::CertificateDer::from(proxy_root))
            .unwrap();
        let client_cfg = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let server_name = rustls_pki_types::ServerName::try_from("127.0.0.1").unwrap();
        let mut tls_client = TlsConnector::from(Arc::new(client_cfg))
            .connect(server_name, client)
            .await
            .unwrap();

        let req = format!(
            "GET /secret HTTP/1.1\r\nHost: {origin_addr}\r\nConnection: close\r\n\r\n"
        );
        tls_client.write_all(req.as_bytes()).await.unwrap();
        let mut rsp = Vec::new();
        tls_client.read_to_end(&mut rsp).await.unwrap();
        let text = String::from_utf8_lossy(&rsp);

        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("x-proxied: yes\r\n"));
        assert!(text.contains("x-injected: on"));
        assert!(text.contains("GET /secret HTTP/1.1"));
    }

    #[tokio::test]
    async fn pipeline_error_yields_502() {
        struct FailingModifier;

        #[async_trait::async_trait]
        impl RequestModifier for FailingModifier {
            async fn modify_request(
                &self,
                _ctx: &Context,
                _req: &mut Request,
            ) -> anyhow::Result<()> {
                Err(anyhow!("rejected by policy"))
            }
        }

        let group = ModifierGroup::new();
        group.add_request_modifier(Arc::new(FailingModifier));
        let server = Arc::new(
            ProxyServer::new(
                Arc::new(test_authority()),
                Arc::new(group),
                None,
                0,
            )
            .unwrap(),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = listener.local_addr().unwrap();
        tokio::spawn(server.serve(listener));

        let mut client = TcpStream::connect(proxy_addr).await.unwrap();
        client
            .write_all(b"GET http://nowhere.invalid/ HTTP/1.1\r\nHost: nowhere.invalid\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut rsp = Vec::new();
        client.read_to_end(&mut rsp).await.unwrap();
        let text = String::from_utf8_lossy(&rsp);

        assert!(text.starts_with("HTTP/1.1 502 Bad Gateway\r\n"));
        assert!(text.contains("rejected by policy"));
    }

    #[test]
    fn split_host_port_forms() {
        assert_eq!(
            split_host_port("example.com", 80),
            ("example.com".to_string(), 80)
        );
        assert_eq!(
            split_host_port("example.com:8443", 443),
            ("example.com".to_string(), 8443)
        );
        assert_eq!(
            split_host_port("[::1]:9000", 443),
            ("::1".to_string(), 9000)
        );
        assert_eq!(split_host_port("[::1]", 443), ("::1".to_string(), 443));
    }

    #[test]
    fn close_semantics() {
        let mut req = Request::new(Method::GET, http::Uri::from_static("http://h/"));
        assert!(!wants_close(&req));
        req.headers
            .insert(header::CONNECTION, HeaderValue::from_static("close"));
        assert!(wants_close(&req));

        let mut req = Request::new(Method::GET, http::Uri::from_static("http://h/"));
        req.version = http::Version::HTTP_10;
        assert!(wants_close(&req));
        req.headers
            .insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        assert!(!wants_close(&req));
    }

    #[test]
    fn error_response_carries_warning() {
        let req = Request::new(Method::GET, http::Uri::from_static("http://h/"));
        let err = anyhow!("first\nsecond");
        let rsp = error_response(&err, Arc::new(req.head()));
        assert_eq!(rsp.status, StatusCode::BAD_GATEWAY);
        let warning = rsp.headers.get(header::WARNING).unwrap().to_str().unwrap();
        assert!(warning.starts_with("199 \"mitmd\""));
        assert!(warning.contains("first second"));
    }
}
