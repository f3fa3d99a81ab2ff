//! Schema of the tracking database (`logtracker.db`)
//!
//! The entity tables form a cyclic graph in memory; rows are arena
//! entries keyed by dense integer ids with explicit usage counters. The
//! store does not enforce referential integrity, the tracker does.

use postwatch_common::db::Migration;

pub const DATABASE_NAME: &str = "logtracker";

pub const MIGRATIONS: &[Migration] = &[Migration {
    name: "1_tracking",
    up: &[
        r#"
        CREATE TABLE pids (
            id INTEGER PRIMARY KEY,
            host TEXT NOT NULL,
            pid INTEGER NOT NULL,
            usage_counter INTEGER NOT NULL
        )
        "#,
        "CREATE INDEX pids_host_pid_index ON pids(host, pid)",
        r#"
        CREATE TABLE connections (
            id INTEGER PRIMARY KEY,
            pid_id INTEGER NOT NULL,
            usage_counter INTEGER NOT NULL
        )
        "#,
        "CREATE INDEX connections_pid_id_index ON connections(pid_id)",
        r#"
        CREATE TABLE connection_data (
            id INTEGER PRIMARY KEY,
            connection_id INTEGER NOT NULL,
            key INTEGER NOT NULL,
            value
        )
        "#,
        "CREATE INDEX connection_data_connection_id_index ON connection_data(connection_id)",
        r#"
        CREATE TABLE queues (
            id INTEGER PRIMARY KEY,
            connection_id INTEGER,
            messageid_id INTEGER,
            queue TEXT NOT NULL,
            usage_counter INTEGER NOT NULL
        )
        "#,
        "CREATE INDEX queues_text_index ON queues(queue)",
        "CREATE INDEX queues_connection_id_index ON queues(connection_id)",
        r#"
        CREATE TABLE queue_data (
            id INTEGER PRIMARY KEY,
            queue_id INTEGER NOT NULL,
            key INTEGER NOT NULL,
            value
        )
        "#,
        "CREATE INDEX queue_data_queue_id_index ON queue_data(queue_id)",
        r#"
        CREATE TABLE queue_parenting (
            id INTEGER PRIMARY KEY,
            orig_queue_id INTEGER NOT NULL,
            new_queue_id INTEGER NOT NULL,
            parenting_type INTEGER NOT NULL
        )
        "#,
        "CREATE INDEX queue_parenting_orig_queue_id_index ON queue_parenting(orig_queue_id)",
        "CREATE INDEX queue_parenting_new_queue_id_index ON queue_parenting(new_queue_id)",
        r#"
        CREATE TABLE messageids (
            id INTEGER PRIMARY KEY,
            value TEXT NOT NULL,
            usage_counter INTEGER NOT NULL
        )
        "#,
        "CREATE INDEX messageids_value_index ON messageids(value)",
        r#"
        CREATE TABLE results (
            id INTEGER PRIMARY KEY,
            queue_id INTEGER NOT NULL
        )
        "#,
        r#"
        CREATE TABLE result_data (
            id INTEGER PRIMARY KEY,
            result_id INTEGER NOT NULL,
            key INTEGER NOT NULL,
            value
        )
        "#,
        "CREATE INDEX result_data_result_id_index ON result_data(result_id)",
        r#"
        CREATE TABLE notification_queues (
            id INTEGER PRIMARY KEY,
            result_id INTEGER NOT NULL,
            line INTEGER NOT NULL,
            filename TEXT
        )
        "#,
        r#"
        CREATE TABLE processed_queues (
            id INTEGER PRIMARY KEY,
            queue_id INTEGER NOT NULL
        )
        "#,
        "CREATE INDEX processed_queues_queue_id_index ON processed_queues(queue_id)",
    ],
    down: &[
        "DROP TABLE processed_queues",
        "DROP TABLE notification_queues",
        "DROP TABLE result_data",
        "DROP TABLE results",
        "DROP TABLE messageids",
        "DROP TABLE queue_parenting",
        "DROP TABLE queue_data",
        "DROP TABLE queues",
        "DROP TABLE connection_data",
        "DROP TABLE connections",
        "DROP TABLE pids",
    ],
}];
