use indoc::indoc;

use super::DelayedWorkerMigration;

/// Lock lookups by worker name (`clear_locks`, crash-resume)
pub const M000002_MIGRATION: DelayedWorkerMigration = DelayedWorkerMigration {
    name: "m000002",
    number: 2,
    postgres: &[indoc! {r#"
        create index if not exists :DELAYED_JOBS_NAME_locked_by_idx
            on :DELAYED_JOBS_TABLE (locked_by);
    "#}],
    sqlite: &[indoc! {r#"
        create index if not exists :DELAYED_JOBS_NAME_locked_by_idx
            on :DELAYED_JOBS_TABLE (locked_by);
    "#}],
    mysql: &[indoc! {r#"
        create index :DELAYED_JOBS_NAME_locked_by_idx
            on :DELAYED_JOBS_TABLE (locked_by);
    "#}],
};
