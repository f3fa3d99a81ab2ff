//! Schema of the delivery database (`logs.db`)

use postwatch_common::db::Migration;

pub const DATABASE_NAME: &str = "logs";

pub const MIGRATIONS: &[Migration] = &[Migration {
    name: "1_delivery_tables",
    up: &[
        r#"
        CREATE TABLE deliveries (
            id INTEGER PRIMARY KEY,
            status INTEGER NOT NULL,
            delivery_ts INTEGER NOT NULL,
            direction INTEGER NOT NULL,
            sender_domain_part_id INTEGER,
            recipient_domain_part_id INTEGER,
            orig_recipient_domain_part_id INTEGER,
            message_id INTEGER,
            conn_ts_begin INTEGER,
            queue_ts_begin INTEGER,
            orig_msg_size INTEGER,
            nrcpt INTEGER,
            delivery_server_id INTEGER NOT NULL,
            delay DOUBLE,
            delay_smtpd DOUBLE,
            delay_cleanup DOUBLE,
            delay_qmgr DOUBLE,
            delay_smtp DOUBLE,
            next_relay_id INTEGER,
            sender_local_part TEXT,
            recipient_local_part TEXT,
            orig_recipient_local_part TEXT,
            client_hostname TEXT,
            client_ip TEXT,
            dsn TEXT
        )
        "#,
        "CREATE INDEX deliveries_ts_index ON deliveries(delivery_ts, direction)",
        "CREATE INDEX deliveries_status_ts_index ON deliveries(status, delivery_ts, direction)",
        r#"
        CREATE TABLE messageids (
            id INTEGER PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
        "CREATE INDEX messageids_value_index ON messageids(value)",
        r#"
        CREATE TABLE remote_domains (
            id INTEGER PRIMARY KEY,
            domain TEXT NOT NULL
        )
        "#,
        "CREATE INDEX remote_domains_domain_index ON remote_domains(domain)",
        r#"
        CREATE TABLE next_relays (
            id INTEGER PRIMARY KEY,
            hostname TEXT NOT NULL,
            ip TEXT,
            port INTEGER
        )
        "#,
        "CREATE INDEX next_relays_index ON next_relays(hostname, ip, port)",
        r#"
        CREATE TABLE delivery_server (
            id INTEGER PRIMARY KEY,
            hostname TEXT NOT NULL
        )
        "#,
        "CREATE INDEX delivery_server_hostname_index ON delivery_server(hostname)",
    ],
    down: &[
        "DROP TABLE delivery_server",
        "DROP TABLE next_relays",
        "DROP TABLE remote_domains",
        "DROP TABLE messageids",
        "DROP TABLE deliveries",
    ],
}];
