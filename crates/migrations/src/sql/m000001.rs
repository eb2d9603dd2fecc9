use indoc::indoc;

use super::AlbumlistMigration;

pub const M000001_MIGRATION: AlbumlistMigration = AlbumlistMigration {
    name: "m000001",
    stmts: &[
        indoc! {r#"
            create table :ALBUMLIST_SCHEMA.list (
                id serial primary key,
                album varchar not null,
                constraint list_album_key unique (album)
            );
        "#},
        indoc! {r#"
            create table :ALBUMLIST_SCHEMA.albums (
                id varchar primary key,
                artist varchar not null default '',
                name varchar not null default '',
                url varchar not null default '',
                img varchar not null default '',
                channel varchar not null default '',
                available boolean not null default true,
                added timestamptz not null default now()
            );
        "#},
        indoc! {r#"
            create index alb_lo_name on :ALBUMLIST_SCHEMA.albums (lower(name));
        "#},
        indoc! {r#"
            create index albums_url_idx on :ALBUMLIST_SCHEMA.albums (url);
        "#},
    ],
};
