//! Transport variants beneath one request.
//!
//! The transport is a closed set of layerings: direct TCP, TCP through a
//! SOCKS5 proxy, and TLS over either. A plain HTTP proxy needs no layer of
//! its own — the request is rewritten to the absolute form and the proxy is
//! dialed like an origin — while an HTTP proxy in front of TLS gets a
//! `CONNECT` tunnel before the handshake.
//!
//! [`StreamConnector`] captures everything a dial needs (proxy, TLS config
//! and SNI name, local bind address, SOCKS5 remote-resolution name) so the
//! connection machinery can retry endpoints with a single call per attempt.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpSocket, TcpStream};
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::ClientConfig;
use tokio_rustls::TlsConnector;
use tracing::trace;

use crate::proxy::{ProxyKind, ProxySettings};
use crate::url::base64_encode;

/// One live transport.
pub enum HttpStream {
    /// Direct TCP.
    Plain(TcpStream),
    /// TCP through a SOCKS5 proxy, handshake already completed.
    Socks5(TcpStream),
    /// TLS over either lower layer.
    Tls(Box<TlsStream<TcpStream>>),
}

impl HttpStream {
    /// Read some bytes, returning 0 at end of stream.
    pub async fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            HttpStream::Plain(s) => s.read(buf).await,
            HttpStream::Socks5(s) => s.read(buf).await,
            HttpStream::Tls(s) => s.read(buf).await,
        }
    }

    /// Write the whole buffer.
    pub async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            HttpStream::Plain(s) => s.write_all(buf).await,
            HttpStream::Socks5(s) => s.write_all(buf).await,
            HttpStream::Tls(s) => s.write_all(buf).await,
        }
    }

    /// Graceful shutdown; sends the TLS close_notify where applicable.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        match self {
            HttpStream::Plain(s) => s.shutdown().await,
            HttpStream::Socks5(s) => s.shutdown().await,
            HttpStream::Tls(s) => s.shutdown().await,
        }
    }
}

/// Everything one dial attempt needs.
pub struct StreamConnector {
    /// Proxy snapshot; `ProxyKind::None` dials the target directly.
    pub proxy: ProxySettings,
    /// TLS configuration plus the SNI / certificate verification name.
    pub tls: Option<(Arc<ClientConfig>, String)>,
    /// Local address to bind before connecting.
    pub bind_addr: Option<IpAddr>,
    /// Destination name for SOCKS5 remote resolution instead of an address.
    pub socks5_dst_name: Option<String>,
    /// Origin host, used for the CONNECT tunnel request line.
    pub origin_host: String,
    /// Origin port, used with `socks5_dst_name` and the CONNECT tunnel.
    pub origin_port: u16,
}

impl StreamConnector {
    /// Dial `target` through the configured layers.
    pub async fn connect(&self, target: SocketAddr) -> io::Result<HttpStream> {
        let socks = self.proxy.is_socks5();
        let tunnel = self.proxy.is_http() && self.tls.is_some();

        let tcp_target = if socks || tunnel {
            self.proxy_addr().await?
        } else {
            target
        };

        let mut tcp = self.tcp_connect(tcp_target).await?;
        if socks {
            self.socks5_handshake(&mut tcp, target).await?;
        } else if tunnel {
            self.connect_tunnel(&mut tcp).await?;
        }

        match &self.tls {
            Some((config, hostname)) => {
                let connector = TlsConnector::from(config.clone());
                let name = ServerName::try_from(hostname.clone())
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
                let tls = connector.connect(name, tcp).await?;
                Ok(HttpStream::Tls(Box::new(tls)))
            }
            None if socks => Ok(HttpStream::Socks5(tcp)),
            None => Ok(HttpStream::Plain(tcp)),
        }
    }

    async fn proxy_addr(&self) -> io::Result<SocketAddr> {
        if let Ok(ip) = self.proxy.host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, self.proxy.port));
        }
        lookup_host((self.proxy.host.as_str(), self.proxy.port))
            .await?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no addresses for proxy {}", self.proxy.host),
                )
            })
    }

    async fn tcp_connect(&self, addr: SocketAddr) -> io::Result<TcpStream> {
        let v4 = match self.bind_addr {
            Some(local) => local.is_ipv4(),
            None => addr.is_ipv4(),
        };
        let socket = if v4 {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        if let Some(local) = self.bind_addr {
            socket.bind(SocketAddr::new(local, 0))?;
        }
        socket.connect(addr).await
    }

    /// RFC 1928 handshake plus RFC 1929 username/password subnegotiation.
    async fn socks5_handshake(&self, tcp: &mut TcpStream, target: SocketAddr) -> io::Result<()> {
        let with_auth = self.proxy.kind == ProxyKind::Socks5Pw;

        if with_auth {
            tcp.write_all(&[0x05, 0x02, 0x00, 0x02]).await?;
        } else {
            tcp.write_all(&[0x05, 0x01, 0x00]).await?;
        }

        let mut reply = [0u8; 2];
        tcp.read_exact(&mut reply).await?;
        if reply[0] != 0x05 {
            return Err(proto_err("not a SOCKS5 proxy"));
        }
        match reply[1] {
            0x00 => {}
            0x02 if with_auth => {
                let user = self.proxy.username.as_bytes();
                let pass = self.proxy.password.as_bytes();
                if user.len() > 255 || pass.len() > 255 {
                    return Err(proto_err("SOCKS5 credentials too long"));
                }
                let mut req = Vec::with_capacity(3 + user.len() + pass.len());
                req.push(0x01);
                req.push(user.len() as u8);
                req.extend_from_slice(user);
                req.push(pass.len() as u8);
                req.extend_from_slice(pass);
                tcp.write_all(&req).await?;

                let mut status = [0u8; 2];
                tcp.read_exact(&mut status).await?;
                if status[1] != 0x00 {
                    return Err(proto_err("SOCKS5 authentication rejected"));
                }
            }
            _ => return Err(proto_err("SOCKS5 method rejected")),
        }

        let mut req = vec![0x05, 0x01, 0x00];
        match &self.socks5_dst_name {
            Some(name) => {
                if name.len() > 255 {
                    return Err(proto_err("SOCKS5 destination name too long"));
                }
                trace!(name = %name, "socks5 remote-name connect");
                req.push(0x03);
                req.push(name.len() as u8);
                req.extend_from_slice(name.as_bytes());
                req.extend_from_slice(&self.origin_port.to_be_bytes());
            }
            None => {
                match target.ip() {
                    IpAddr::V4(ip) => {
                        req.push(0x01);
                        req.extend_from_slice(&ip.octets());
                    }
                    IpAddr::V6(ip) => {
                        req.push(0x04);
                        req.extend_from_slice(&ip.octets());
                    }
                }
                req.extend_from_slice(&target.port().to_be_bytes());
            }
        }
        tcp.write_all(&req).await?;

        let mut head = [0u8; 4];
        tcp.read_exact(&mut head).await?;
        if head[1] != 0x00 {
            return Err(proto_err(format!("SOCKS5 connect refused ({})", head[1])));
        }
        // bound address, discarded
        let addr_len = match head[3] {
            0x01 => 4,
            0x04 => 16,
            0x03 => {
                let mut len = [0u8; 1];
                tcp.read_exact(&mut len).await?;
                len[0] as usize
            }
            _ => return Err(proto_err("bad SOCKS5 reply address type")),
        };
        let mut bound = vec![0u8; addr_len + 2];
        tcp.read_exact(&mut bound).await?;
        Ok(())
    }

    /// `CONNECT host:port` through an HTTP proxy, consuming the reply head.
    async fn connect_tunnel(&self, tcp: &mut TcpStream) -> io::Result<()> {
        let mut req = format!(
            "CONNECT {0}:{1} HTTP/1.1\r\nHost: {0}:{1}\r\n",
            self.origin_host, self.origin_port
        );
        if self.proxy.kind == ProxyKind::HttpPw {
            req.push_str("Proxy-Authorization: Basic ");
            req.push_str(&base64_encode(&self.proxy.credentials()));
            req.push_str("\r\n");
        }
        req.push_str("\r\n");
        tcp.write_all(req.as_bytes()).await?;

        let mut head = Vec::with_capacity(256);
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            if head.len() > 8192 {
                return Err(proto_err("oversized CONNECT reply"));
            }
            let n = tcp.read(&mut byte).await?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "proxy closed during CONNECT",
                ));
            }
            head.push(byte[0]);
        }

        let line = head.split(|&b| b == b'\r').next().unwrap_or(&[]);
        let ok = std::str::from_utf8(line)
            .ok()
            .and_then(|l| l.split_ascii_whitespace().nth(1))
            .is_some_and(|code| code == "200");
        if !ok {
            return Err(proto_err("proxy refused CONNECT"));
        }
        Ok(())
    }
}

fn proto_err(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}
