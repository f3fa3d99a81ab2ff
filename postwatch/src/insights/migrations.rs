//! Insight tables of the master database
//!
//! Insight rows are immutable after insert. The detector execution
//! cursors live next to them so an insight and its cursor update commit
//! under the same transaction.

use postwatch_common::db::Migration;

pub const MIGRATIONS: &[Migration] = &[Migration {
    name: "2_insights",
    up: &[
        r#"
        CREATE TABLE insights (
            id INTEGER PRIMARY KEY,
            time INTEGER NOT NULL,
            category INTEGER NOT NULL,
            rating INTEGER NOT NULL,
            content_type INTEGER NOT NULL,
            content TEXT NOT NULL
        )
        "#,
        "CREATE INDEX insights_time_index ON insights(time)",
        "CREATE INDEX insights_content_type_time_index ON insights(content_type, time)",
        r#"
        CREATE TABLE last_detector_execution (
            kind TEXT NOT NULL UNIQUE,
            ts INTEGER NOT NULL
        )
        "#,
    ],
    down: &[
        "DROP TABLE last_detector_execution",
        "DROP TABLE insights",
    ],
}];
