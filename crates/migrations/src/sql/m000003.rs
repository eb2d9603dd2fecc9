use indoc::indoc;

use super::AlbumlistMigration;

pub const M000003_MIGRATION: AlbumlistMigration = AlbumlistMigration {
    name: "m000003",
    stmts: &[
        indoc! {r#"
            create table :ALBUMLIST_SCHEMA.album_users (
                album varchar not null references :ALBUMLIST_SCHEMA.albums (id) on delete cascade,
                user_id varchar not null,
                constraint album_user unique (album, user_id)
            );
        "#},
        indoc! {r#"
            create index album_users_user_idx on :ALBUMLIST_SCHEMA.album_users (user_id);
        "#},
    ],
};
