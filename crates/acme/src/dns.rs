//! dns-01 propagation check.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use tokio::time::Instant;
use tracing::debug;

use crate::AcmeError;

pub const DEFAULT_PROPAGATION_TIMEOUT: Duration = Duration::from_secs(120);
const POLL_INTERVAL: Duration = Duration::from_secs(5);

fn resolver(nameservers: &[String]) -> Result<TokioAsyncResolver, AcmeError> {
    let mut opts = ResolverOpts::default();
    opts.cache_size = 0;

    if nameservers.is_empty() {
        return TokioAsyncResolver::tokio_from_system_conf()
            .or_else(|_| Ok(TokioAsyncResolver::tokio(ResolverConfig::default(), opts)));
    }

    let ips = nameservers
        .iter()
        .map(|ns| {
            ns.parse::<IpAddr>()
                .or_else(|_| ns.parse::<SocketAddr>().map(|addr| addr.ip()))
                .map_err(|_| AcmeError::Config(format!("nameserver '{ns}' is not an ip address")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let group = NameServerConfigGroup::from_ips_clear(&ips, 53, true);
    Ok(TokioAsyncResolver::tokio(
        ResolverConfig::from_parts(None, vec![], group),
        opts,
    ))
}

/// Poll `record` until one of its TXT values equals `expected` or `timeout`
/// elapses.
pub async fn wait_for_txt(
    record: &str,
    expected: &str,
    nameservers: &[String],
    timeout: Duration,
) -> Result<(), AcmeError> {
    let resolver = resolver(nameservers)?;
    let deadline = Instant::now() + timeout;

    loop {
        match resolver.txt_lookup(record).await {
            Ok(lookup) => {
                let found = lookup.iter().any(|txt| {
                    let value: String = txt
                        .txt_data()
                        .iter()
                        .map(|part| String::from_utf8_lossy(part))
                        .collect();
                    value == expected
                });
                if found {
                    debug!(record, "txt record propagated");
                    return Ok(());
                }
            }
            Err(e) => debug!(record, error = %e, "txt lookup failed"),
        }

        if Instant::now() + POLL_INTERVAL > deadline {
            return Err(AcmeError::Challenge(format!(
                "txt record {record} not propagated within {}s",
                timeout.as_secs()
            )));
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
