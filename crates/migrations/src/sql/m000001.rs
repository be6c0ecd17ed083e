use indoc::indoc;

use super::DelayedWorkerMigration;

// Timestamps are BIGINT milliseconds since the Unix epoch in every dialect.
pub const M000001_MIGRATION: DelayedWorkerMigration = DelayedWorkerMigration {
    name: "m000001",
    number: 1,
    postgres: &[
        indoc! {r#"
            create table if not exists :DELAYED_JOBS_TABLE (
                id bigserial primary key,
                priority bigint not null default 0,
                repeat_count bigint not null default 0,
                repeat_interval text,
                attempts bigint not null default 0,
                max_attempts bigint not null default -1,
                queue text,
                handler text not null,
                handler_id varchar(255) not null,
                last_error text,
                run_at bigint,
                locked_at bigint,
                failed_at bigint,
                locked_by varchar(255),
                created_at bigint not null,
                updated_at bigint not null
            );
        "#},
        indoc! {r#"
            create unique index if not exists :DELAYED_JOBS_NAME_handler_id_idx
                on :DELAYED_JOBS_TABLE (handler_id);
        "#},
        indoc! {r#"
            create index if not exists :DELAYED_JOBS_NAME_priority_run_at_idx
                on :DELAYED_JOBS_TABLE (priority, run_at);
        "#},
    ],
    sqlite: &[
        indoc! {r#"
            create table if not exists :DELAYED_JOBS_TABLE (
                id integer primary key autoincrement,
                priority integer not null default 0,
                repeat_count integer not null default 0,
                repeat_interval text,
                attempts integer not null default 0,
                max_attempts integer not null default -1,
                queue text,
                handler text not null,
                handler_id text not null,
                last_error text,
                run_at integer,
                locked_at integer,
                failed_at integer,
                locked_by text,
                created_at integer not null,
                updated_at integer not null
            );
        "#},
        indoc! {r#"
            create unique index if not exists :DELAYED_JOBS_NAME_handler_id_idx
                on :DELAYED_JOBS_TABLE (handler_id);
        "#},
        indoc! {r#"
            create index if not exists :DELAYED_JOBS_NAME_priority_run_at_idx
                on :DELAYED_JOBS_TABLE (priority, run_at);
        "#},
    ],
    // MySQL has no `create index if not exists`, the indexes live in the table definition
    mysql: &[indoc! {r#"
        create table if not exists :DELAYED_JOBS_TABLE (
            id bigint not null auto_increment primary key,
            priority bigint not null default 0,
            repeat_count bigint not null default 0,
            repeat_interval varchar(255),
            attempts bigint not null default 0,
            max_attempts bigint not null default -1,
            queue varchar(255),
            handler longtext not null,
            handler_id varchar(255) not null,
            last_error text,
            run_at bigint,
            locked_at bigint,
            failed_at bigint,
            locked_by varchar(255),
            created_at bigint not null,
            updated_at bigint not null,
            unique key :DELAYED_JOBS_NAME_handler_id_idx (handler_id),
            key :DELAYED_JOBS_NAME_priority_run_at_idx (priority, run_at)
        );
    "#}],
};
