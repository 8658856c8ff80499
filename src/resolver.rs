//! Hostname resolution seam.
//!
//! The connection only needs "name to addresses"; ordering is irrelevant
//! because the endpoint list is shuffled afterwards.

use std::future::Future;
use std::io;
use std::net::IpAddr;
use std::ops::BitOr;

/// Flags forwarded to the resolver service. Opaque to the connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveFlags(u32);

impl ResolveFlags {
    /// Answer only from the resolver's cache, never hit the network.
    pub const CACHE_ONLY: ResolveFlags = ResolveFlags(1);
    /// Abandon the lookup when the owning service shuts down.
    pub const ABORT_ON_SHUTDOWN: ResolveFlags = ResolveFlags(1 << 1);

    /// Whether every flag in `other` is set.
    pub fn contains(self, other: ResolveFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ResolveFlags {
    type Output = ResolveFlags;

    fn bitor(self, rhs: ResolveFlags) -> ResolveFlags {
        ResolveFlags(self.0 | rhs.0)
    }
}

/// Asynchronous hostname resolution.
pub trait Resolver {
    /// Resolve `host` to its addresses. An empty result is an error.
    fn resolve(
        &self,
        host: &str,
        flags: ResolveFlags,
    ) -> impl Future<Output = io::Result<Vec<IpAddr>>> + Send;
}

/// Resolver backed by the operating system, via tokio's thread-pool lookup.
/// [`ResolveFlags`] are accepted but have no effect here.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl Resolver for SystemResolver {
    async fn resolve(&self, host: &str, _flags: ResolveFlags) -> io::Result<Vec<IpAddr>> {
        let addrs: Vec<IpAddr> = tokio::net::lookup_host((host, 0u16))
            .await?
            .map(|sa| sa.ip())
            .collect();
        if addrs.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses for {host}"),
            ));
        }
        Ok(addrs)
    }
}
