use std::collections::HashSet;

use albumlist_worker_migrations::migrate;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indoc::formatdoc;
use sqlx::{query, query_as, query_scalar, PgPool};
use tracing::{debug, info};

use crate::services::{Album, AlbumMetadata, AlbumStore, StoreError};

/// Escapes `identifier` for use as a schema name in generated SQL.
pub async fn escape_identifier(pool: &PgPool, identifier: &str) -> Result<String, StoreError> {
    let escaped: String = query_scalar("select format('%I', $1::text)")
        .bind(identifier)
        .fetch_one(pool)
        .await?;
    Ok(escaped)
}

/// [`AlbumStore`] over the Postgres tables created by the
/// `albumlist_worker_migrations` crate.
///
/// Admission relies on the unique constraint on `list.album`: of two
/// concurrent `list_add` calls for the same id, exactly one reports `true`.
#[derive(Debug, Clone)]
pub struct PgAlbumStore {
    pool: PgPool,
    escaped_schema: String,
}

impl PgAlbumStore {
    /// Escapes `schema`, migrates it and returns a store bound to it.
    pub async fn connect(pool: PgPool, schema: &str) -> Result<Self, StoreError> {
        let escaped_schema = escape_identifier(&pool, schema).await?;
        migrate(&pool, &escaped_schema)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        info!(schema = %escaped_schema, "Album store ready");
        Ok(Self {
            pool,
            escaped_schema,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn select_albums(&self, clause: &str) -> String {
        let schema = &self.escaped_schema;
        formatdoc!(
            r#"
                select a.id, a.name, a.artist, a.url, a.img, a.channel, a.available, a.added,
                    coalesce(array_agg(distinct t.tag) filter (where t.tag is not null), '{{}}') as tags,
                    coalesce(array_agg(distinct u.user_id) filter (where u.user_id is not null), '{{}}') as users
                from {schema}.albums as a
                left join {schema}.album_tags as t on t.album = a.id
                left join {schema}.album_users as u on u.album = a.id
                {clause}
                group by a.id
                order by a.added
            "#
        )
    }

    async fn update_album(&self, set: &str, album_id: &str, value: &str) -> Result<(), StoreError> {
        let sql = format!(
            "update {}.albums set {set} = $2 where id = $1",
            self.escaped_schema
        );
        query(&sql)
            .bind(album_id)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl AlbumStore for PgAlbumStore {
    async fn list_contains(&self, album_id: &str) -> Result<bool, StoreError> {
        let sql = format!(
            "select exists (select 1 from {}.list where album = $1)",
            self.escaped_schema
        );
        let exists: bool = query_scalar(&sql)
            .bind(album_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn list_add(&self, album_id: &str) -> Result<bool, StoreError> {
        let sql = format!(
            "insert into {}.list (album) values ($1) on conflict (album) do nothing",
            self.escaped_schema
        );
        let result = query(&sql).bind(album_id).execute(&self.pool).await?;
        debug!(album_id, added = result.rows_affected(), "Updated list");
        Ok(result.rows_affected() == 1)
    }

    async fn all_tracked_ids(&self) -> Result<HashSet<String>, StoreError> {
        let sql = format!("select album from {}.list", self.escaped_schema);
        let ids: Vec<String> = query_scalar(&sql).fetch_all(&self.pool).await?;
        Ok(ids.into_iter().collect())
    }

    async fn record_album(
        &self,
        album_id: &str,
        metadata: &AlbumMetadata,
        channel: &str,
    ) -> Result<(), StoreError> {
        let sql = formatdoc!(
            r#"
                insert into {schema}.albums (id, artist, name, url, channel)
                values ($1, $2, $3, $4, $5)
                on conflict (id) do update set
                    artist = excluded.artist,
                    name = excluded.name,
                    url = excluded.url,
                    channel = case
                        when excluded.channel = '' then albums.channel
                        else excluded.channel
                    end
            "#,
            schema = self.escaped_schema
        );
        query(&sql)
            .bind(album_id)
            .bind(&metadata.artist)
            .bind(&metadata.title)
            .bind(&metadata.canonical_url)
            .bind(channel)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_tags(&self, album_id: &str, tags: &[String]) -> Result<(), StoreError> {
        let schema = &self.escaped_schema;
        let insert_tags = format!(
            "insert into {schema}.tags (tag) select unnest($1::varchar[]) on conflict do nothing"
        );
        let insert_album_tags = format!(
            "insert into {schema}.album_tags (album, tag) select $1, unnest($2::varchar[]) on conflict do nothing"
        );

        let mut tx = self.pool.begin().await?;
        query(&insert_tags).bind(tags).execute(tx.as_mut()).await?;
        query(&insert_album_tags)
            .bind(album_id)
            .bind(tags)
            .execute(tx.as_mut())
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn set_availability(&self, album_id: &str, available: bool) -> Result<(), StoreError> {
        let sql = format!(
            "update {}.albums set available = $2 where id = $1",
            self.escaped_schema
        );
        query(&sql)
            .bind(album_id)
            .bind(available)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_album_url(&self, album_id: &str, url: &str) -> Result<(), StoreError> {
        self.update_album("url", album_id, url).await
    }

    async fn set_cover(&self, album_id: &str, img: &str) -> Result<(), StoreError> {
        self.update_album("img", album_id, img).await
    }

    async fn set_added(&self, album_id: &str, added: DateTime<Utc>) -> Result<(), StoreError> {
        let sql = format!(
            "update {}.albums set added = $2 where id = $1",
            self.escaped_schema
        );
        query(&sql)
            .bind(album_id)
            .bind(added)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn album(&self, album_id: &str) -> Result<Option<Album>, StoreError> {
        let sql = self.select_albums("where a.id = $1");
        let album = query_as::<_, Album>(&sql)
            .bind(album_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(album)
    }

    async fn album_by_url(&self, url: &str) -> Result<Option<Album>, StoreError> {
        let sql = self.select_albums("where a.url = $1");
        let album = query_as::<_, Album>(&sql)
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(album)
    }

    async fn albums(&self) -> Result<Vec<Album>, StoreError> {
        let sql = self.select_albums("");
        Ok(query_as::<_, Album>(&sql).fetch_all(&self.pool).await?)
    }

    async fn albums_without_covers(&self) -> Result<Vec<Album>, StoreError> {
        let sql = self.select_albums("where a.img = ''");
        Ok(query_as::<_, Album>(&sql).fetch_all(&self.pool).await?)
    }

    async fn random_available_album(&self) -> Result<Option<Album>, StoreError> {
        let clause = format!(
            "where a.id = (select id from {}.albums where available order by random() limit 1)",
            self.escaped_schema
        );
        let sql = self.select_albums(&clause);
        Ok(query_as::<_, Album>(&sql).fetch_optional(&self.pool).await?)
    }

    async fn ids_without_details(&self) -> Result<Vec<String>, StoreError> {
        let sql = formatdoc!(
            r#"
                select l.album
                from {schema}.list as l
                left join {schema}.albums as a on a.id = l.album
                where a.id is null
                order by l.id
            "#,
            schema = self.escaped_schema
        );
        Ok(query_scalar(&sql).fetch_all(&self.pool).await?)
    }

    async fn delete_album(&self, album_id: &str) -> Result<(), StoreError> {
        let schema = &self.escaped_schema;
        let delete_from_list = format!("delete from {schema}.list where album = $1");
        let delete_from_albums = format!("delete from {schema}.albums where id = $1");

        let mut tx = self.pool.begin().await?;
        query(&delete_from_list)
            .bind(album_id)
            .execute(tx.as_mut())
            .await?;
        query(&delete_from_albums)
            .bind(album_id)
            .execute(tx.as_mut())
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn add_user_to_album(&self, album_id: &str, user_id: &str) -> Result<(), StoreError> {
        let sql = format!(
            "insert into {}.album_users (album, user_id) values ($1, $2) on conflict do nothing",
            self.escaped_schema
        );
        query(&sql)
            .bind(album_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn remove_user_from_album(
        &self,
        album_id: &str,
        user_id: &str,
    ) -> Result<(), StoreError> {
        let sql = format!(
            "delete from {}.album_users where album = $1 and user_id = $2",
            self.escaped_schema
        );
        query(&sql)
            .bind(album_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
