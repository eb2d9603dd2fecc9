use indoc::indoc;

use super::AlbumlistMigration;

pub const M000002_MIGRATION: AlbumlistMigration = AlbumlistMigration {
    name: "m000002",
    stmts: &[
        indoc! {r#"
            create table :ALBUMLIST_SCHEMA.tags (
                tag varchar primary key
            );
        "#},
        indoc! {r#"
            create table :ALBUMLIST_SCHEMA.album_tags (
                album varchar not null references :ALBUMLIST_SCHEMA.albums (id) on delete cascade,
                tag varchar not null references :ALBUMLIST_SCHEMA.tags (tag),
                constraint id_tag unique (album, tag)
            );
        "#},
    ],
};
