//! DNS-blocklist scanning
//!
//! A scan resolves the reversed checked address against every configured
//! DNSBL provider, fanning the lookups over a bounded pool of concurrent
//! tasks. Providers that answer are collected (with their TXT reason
//! when available), sorted by provider name, and handed back to the
//! insight detector through a one-slot mailbox.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use postwatch_common::time::TimeInterval;
use postwatch_common::Result;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use trust_dns_resolver::error::ResolveErrorKind;
use trust_dns_resolver::TokioAsyncResolver;

/// One listing found during a scan
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentElement {
    pub rbl: String,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct ScanResults {
    pub interval: TimeInterval,
    pub rbls: Vec<ContentElement>,
    /// Set when the scan as a whole failed (every lookup errored)
    pub error: Option<String>,
}

/// Pluggable scanner surface; the insight detector only sees this
pub trait Checker: Send + Sync {
    fn checked_ip(&self) -> IpAddr;

    /// Ask for a scan to start at `now`. Never blocks.
    fn notify_new_scan(&self, now: DateTime<Utc>);

    /// Take the most recent finished scan, when one is waiting
    fn take_result(&self) -> Option<ScanResults>;
}

/// Well-known public DNSBL providers, scanned by default
pub const DEFAULT_PROVIDERS: &[&str] = &[
    "zen.spamhaus.org",
    "bl.spamcop.net",
    "b.barracudacentral.org",
    "dnsbl.sorbs.net",
    "spam.dnsbl.sorbs.net",
    "ips.backscatterer.org",
    "dnsbl-1.uceprotect.net",
    "psbl.surriel.com",
    "db.wpbl.info",
    "ix.dnsbl.manitu.net",
];

#[derive(Debug, Clone)]
pub struct Options {
    pub checked_ip: IpAddr,
    pub providers: Vec<String>,
    pub number_of_workers: usize,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            checked_ip: IpAddr::from([127, 0, 0, 1]),
            providers: DEFAULT_PROVIDERS.iter().map(|s| s.to_string()).collect(),
            number_of_workers: 10,
        }
    }
}

pub struct DnsChecker {
    options: Options,
    scan_tx: mpsc::Sender<DateTime<Utc>>,
    result: Arc<Mutex<Option<ScanResults>>>,
}

impl DnsChecker {
    /// Create the checker and spawn its scan loop
    pub fn start(options: Options) -> Result<Arc<DnsChecker>> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf()
            .map_err(|e| postwatch_common::Error::Config(format!("resolver setup: {}", e)))?;

        let (scan_tx, mut scan_rx) = mpsc::channel::<DateTime<Utc>>(1);
        let result = Arc::new(Mutex::new(None));

        let checker = Arc::new(DnsChecker {
            options,
            scan_tx,
            result,
        });

        let worker = checker.clone();
        tokio::spawn(async move {
            while let Some(started_at) = scan_rx.recv().await {
                let results = worker.scan(&resolver, started_at).await;
                *worker.result.lock().unwrap() = Some(results);
            }
        });

        Ok(checker)
    }

    async fn scan(&self, resolver: &TokioAsyncResolver, started_at: DateTime<Utc>) -> ScanResults {
        info!(ip = %self.options.checked_ip, "starting blocklist scan");

        let query_suffixes: Vec<String> = self
            .options
            .providers
            .iter()
            .map(|provider| reverse_query(self.options.checked_ip, provider))
            .collect();

        let lookups = stream::iter(
            self.options
                .providers
                .iter()
                .cloned()
                .zip(query_suffixes.into_iter()),
        )
        .map(|(provider, query)| async move {
            (provider.clone(), lookup_provider(resolver, &query).await)
        })
        .buffer_unordered(self.options.number_of_workers.max(1))
        .collect::<Vec<_>>()
        .await;

        let mut listed = Vec::new();
        let mut failures = 0;

        for (provider, outcome) in &lookups {
            match outcome {
                Ok(Some(text)) => listed.push(ContentElement {
                    rbl: provider.clone(),
                    text: text.clone(),
                }),
                Ok(None) => debug!(provider = %provider, "not listed"),
                Err(e) => {
                    warn!(provider = %provider, error = %e, "blocklist lookup failed");
                    failures += 1;
                }
            }
        }

        listed.sort();

        let error = if failures == lookups.len() && !lookups.is_empty() {
            Some("all blocklist lookups failed".to_owned())
        } else {
            None
        };

        ScanResults {
            interval: TimeInterval {
                from: started_at,
                to: Utc::now(),
            },
            rbls: listed,
            error,
        }
    }
}

impl Checker for DnsChecker {
    fn checked_ip(&self) -> IpAddr {
        self.options.checked_ip
    }

    fn notify_new_scan(&self, now: DateTime<Utc>) {
        // a scan already in flight absorbs the request
        let _ = self.scan_tx.try_send(now);
    }

    fn take_result(&self) -> Option<ScanResults> {
        self.result.lock().unwrap().take()
    }
}

/// `a.b.c.d` checked against `provider` queries `d.c.b.a.provider`
fn reverse_query(ip: IpAddr, provider: &str) -> String {
    match ip {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            format!("{}.{}.{}.{}.{}", o[3], o[2], o[1], o[0], provider)
        }
        IpAddr::V6(v6) => {
            // nibble-reversed per DNSBL convention
            let mut nibbles = Vec::with_capacity(32);
            for byte in v6.octets().iter().rev() {
                nibbles.push(format!("{:x}", byte & 0x0f));
                nibbles.push(format!("{:x}", byte >> 4));
            }
            format!("{}.{}", nibbles.join("."), provider)
        }
    }
}

/// `Ok(Some(text))` when listed, `Ok(None)` when clean
async fn lookup_provider(
    resolver: &TokioAsyncResolver,
    query: &str,
) -> std::result::Result<Option<String>, String> {
    match resolver.lookup_ip(query).await {
        Ok(_) => {
            // listed; the TXT record usually explains why
            let text = match resolver.txt_lookup(query).await {
                Ok(txt) => txt
                    .iter()
                    .map(|r| r.to_string())
                    .collect::<Vec<_>>()
                    .join(" "),
                Err(_) => String::new(),
            };
            Ok(Some(text))
        }
        Err(e) => match e.kind() {
            ResolveErrorKind::NoRecordsFound { .. } => Ok(None),
            _ => Err(e.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reverses_ipv4_queries() {
        assert_eq!(
            reverse_query("11.22.33.44".parse().unwrap(), "zen.spamhaus.org"),
            "44.33.22.11.zen.spamhaus.org"
        );
    }

    #[test]
    fn content_elements_sort_by_provider() {
        let mut elements = vec![
            ContentElement { rbl: "z.example".into(), text: "b".into() },
            ContentElement { rbl: "a.example".into(), text: "a".into() },
        ];
        elements.sort();
        assert_eq!(elements[0].rbl, "a.example");
    }
}
