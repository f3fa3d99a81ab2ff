//! Read-only aggregations over the delivery database
//!
//! Four queries back the dashboard API, all scoped by a time interval
//! and ignoring deliveries relayed through loopback (local hand-offs
//! between MTA instances would otherwise double-count). Top-domain
//! queries return at most 20 rows, count descending, ties broken by
//! ascending domain; a delivery with no recorded domain is reported as
//! the literal `<none>`.

use postwatch_common::time::TimeInterval;
use postwatch_common::Result;
use postwatch_parser::SmtpStatus;
use serde::Serialize;
use sqlx::SqlitePool;

/// Key/value row of a dashboard listing. Serialized capitalized, which
/// is what the dashboard frontend expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pair {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Value")]
    pub value: i64,
}

#[derive(Debug, Clone)]
pub struct Dashboard {
    pool: SqlitePool,
}

const LOOPBACK_FILTER: &str =
    "(nr.id IS NULL OR (nr.hostname != '127.0.0.1' AND (nr.ip IS NULL OR nr.ip != '127.0.0.1')))";

impl Dashboard {
    /// `pool` should be a read-only pool over the delivery database
    pub fn new(pool: SqlitePool) -> Dashboard {
        Dashboard { pool }
    }

    pub async fn count_by_status(&self, status: SmtpStatus, interval: TimeInterval) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(&format!(
            r#"
            SELECT COUNT(*) FROM deliveries d
            LEFT JOIN next_relays nr ON d.next_relay_id = nr.id
            WHERE d.status = ? AND d.delivery_ts BETWEEN ? AND ? AND {}
            "#,
            LOOPBACK_FILTER
        ))
        .bind(status.as_i64())
        .bind(interval.from.timestamp())
        .bind(interval.to.timestamp())
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Delivery counts grouped by status, ordered by the durable status
    /// value
    pub async fn delivery_status(&self, interval: TimeInterval) -> Result<Vec<Pair>> {
        let rows: Vec<(i64, i64)> = sqlx::query_as(&format!(
            r#"
            SELECT d.status, COUNT(d.status) AS c FROM deliveries d
            LEFT JOIN next_relays nr ON d.next_relay_id = nr.id
            WHERE d.delivery_ts BETWEEN ? AND ? AND {}
            GROUP BY d.status
            ORDER BY d.status
            "#,
            LOOPBACK_FILTER
        ))
        .bind(interval.from.timestamp())
        .bind(interval.to.timestamp())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(status, count)| Pair {
                key: SmtpStatus::from_i64(status)
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| status.to_string()),
                value: count,
            })
            .collect())
    }

    pub async fn top_busiest_domains(&self, interval: TimeInterval) -> Result<Vec<Pair>> {
        self.top_domains(None, interval).await
    }

    pub async fn top_bounced_domains(&self, interval: TimeInterval) -> Result<Vec<Pair>> {
        self.top_domains(Some(SmtpStatus::Bounced), interval).await
    }

    pub async fn top_deferred_domains(&self, interval: TimeInterval) -> Result<Vec<Pair>> {
        self.top_domains(Some(SmtpStatus::Deferred), interval).await
    }

    async fn top_domains(
        &self,
        status: Option<SmtpStatus>,
        interval: TimeInterval,
    ) -> Result<Vec<Pair>> {
        let status_filter = match status {
            Some(_) => "d.status = ? AND",
            None => "",
        };

        // sort on the placeholder-mapped domain so `<none>` ties break as
        // the literal string
        let sql = format!(
            r#"
            SELECT CASE WHEN rd.domain IS NULL OR rd.domain = '' THEN '<none>' ELSE rd.domain END AS domain,
                   COUNT(*) AS c
            FROM deliveries d
            LEFT JOIN remote_domains rd ON d.recipient_domain_part_id = rd.id
            LEFT JOIN next_relays nr ON d.next_relay_id = nr.id
            WHERE {} d.delivery_ts BETWEEN ? AND ? AND {}
            GROUP BY domain
            ORDER BY c DESC, domain ASC
            LIMIT 20
            "#,
            status_filter, LOOPBACK_FILTER
        );

        let mut query = sqlx::query_as::<_, (String, i64)>(&sql);
        if let Some(status) = status {
            query = query.bind(status.as_i64());
        }

        let rows = query
            .bind(interval.from.timestamp())
            .bind(interval.to.timestamp())
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(domain, count)| Pair {
                key: domain,
                value: count,
            })
            .collect())
    }
}
