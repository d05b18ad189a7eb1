use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::{ArticleStore, ArticleWriteRepo, RangeWindow, StoreError};
use crate::domain::articles::{
    Article, ArticleFilter, ArticleUpdate, NewArticle, SortDirection, SortField, SortSpec,
    SortValue, TagCount,
};

use super::PostgresArticleStore;
use super::util::{contains_pattern, map_sqlx_error};

const ARTICLE_COLUMNS: &str = "a.id, a.title, a.summary, a.source, a.url, a.tags, \
     a.published_at, a.created_at, a.updated_at";

const RETURNING_COLUMNS: &str =
    "id, title, summary, source, url, tags, published_at, created_at, updated_at";

#[derive(sqlx::FromRow)]
pub(crate) struct ArticleRow {
    pub(crate) id: Uuid,
    pub(crate) title: String,
    pub(crate) summary: String,
    pub(crate) source: String,
    pub(crate) url: String,
    pub(crate) tags: Vec<String>,
    pub(crate) published_at: OffsetDateTime,
    pub(crate) created_at: OffsetDateTime,
    pub(crate) updated_at: OffsetDateTime,
}

impl From<ArticleRow> for Article {
    fn from(row: ArticleRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            summary: row.summary,
            source: row.source,
            url: row.url,
            tags: row.tags,
            published_at: row.published_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TagRow {
    tag: String,
    count: i64,
}

/// Titles compare bytewise so database order matches `SortSpec::compare`.
fn sort_column(field: SortField) -> &'static str {
    match field {
        SortField::PublishedAt => "a.published_at",
        SortField::CreatedAt => "a.created_at",
        SortField::UpdatedAt => "a.updated_at",
        SortField::Title => "a.title COLLATE \"C\"",
    }
}

fn apply_filter(qb: &mut QueryBuilder<'static, Postgres>, filter: &ArticleFilter) {
    if let Some(source) = filter.source.as_ref() {
        qb.push(" AND a.source = ");
        qb.push_bind(source.clone());
    }

    if !filter.tags.is_empty() {
        qb.push(" AND a.tags @> ");
        qb.push_bind(filter.tags.clone());
    }

    if let Some(search) = filter.search.as_ref() {
        let pattern = contains_pattern(search);
        qb.push(" AND (a.title ILIKE ");
        qb.push_bind(pattern.clone());
        qb.push(" OR a.summary ILIKE ");
        qb.push_bind(pattern);
        qb.push(")");
    }

    if let Some(user_id) = filter.favorited_by {
        qb.push(" AND EXISTS (SELECT 1 FROM favorites f WHERE f.article_id = a.id AND f.user_id = ");
        qb.push_bind(user_id);
        qb.push(")");
    }
}

pub(crate) fn build_count_query(filter: &ArticleFilter) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM articles a WHERE 1=1");
    apply_filter(&mut qb, filter);
    qb
}

/// `(column, id)` ordering in one direction, seeking past a keyset position
/// with a row-value comparison or skipping rows by offset.
pub(crate) fn build_range_query(
    filter: &ArticleFilter,
    sort: SortSpec,
    window: &RangeWindow,
    limit: u32,
) -> QueryBuilder<'static, Postgres> {
    let column = sort_column(sort.field);
    let (direction, seek) = match sort.direction {
        SortDirection::Asc => ("ASC", ">"),
        SortDirection::Desc => ("DESC", "<"),
    };

    let mut qb = QueryBuilder::new("SELECT ");
    qb.push(ARTICLE_COLUMNS);
    qb.push(" FROM articles a WHERE 1=1");
    apply_filter(&mut qb, filter);

    if let RangeWindow::After(position) = window {
        qb.push(format!(" AND ({column}, a.id) {seek} ("));
        match &position.value {
            SortValue::Time(at) => {
                qb.push_bind(*at);
            }
            SortValue::Text(text) => {
                qb.push_bind(text.clone());
            }
        }
        qb.push(", ");
        qb.push_bind(position.id);
        qb.push(")");
    }

    qb.push(format!(
        " ORDER BY {column} {direction}, a.id {direction} LIMIT "
    ));
    qb.push_bind(i64::from(limit));

    if let RangeWindow::Offset(skip) = window
        && *skip > 0
    {
        qb.push(" OFFSET ");
        qb.push_bind(i64::try_from(*skip).unwrap_or(i64::MAX));
    }
    qb
}

#[async_trait]
impl ArticleStore for PostgresArticleStore {
    async fn count(&self, filter: &ArticleFilter) -> Result<u64, StoreError> {
        let total: i64 = build_count_query(filter)
            .build_query_scalar()
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Self::convert_count(total)
    }

    async fn find_range(
        &self,
        filter: &ArticleFilter,
        sort: SortSpec,
        window: &RangeWindow,
        limit: u32,
    ) -> Result<Vec<Article>, StoreError> {
        let rows = build_range_query(filter, sort, window, limit)
            .build_query_as::<ArticleRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(Article::from).collect())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Article>, StoreError> {
        let row = sqlx::query_as::<_, ArticleRow>(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles a WHERE a.id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(row.map(Article::from))
    }

    async fn favorited_among(&self, user_id: Uuid, ids: &[Uuid]) -> Result<Vec<Uuid>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        sqlx::query_scalar::<_, Uuid>(
            "SELECT article_id FROM favorites WHERE user_id = $1 AND article_id = ANY($2) \
             ORDER BY article_id",
        )
        .bind(user_id)
        .bind(ids.to_vec())
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn tag_counts(&self) -> Result<Vec<TagCount>, StoreError> {
        let rows = sqlx::query_as::<_, TagRow>(
            "SELECT t.tag, COUNT(*) AS count \
             FROM articles a CROSS JOIN LATERAL unnest(a.tags) AS t(tag) \
             GROUP BY t.tag \
             ORDER BY count DESC, t.tag COLLATE \"C\" ASC",
        )
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter()
            .map(|row| {
                Ok(TagCount {
                    tag: row.tag,
                    count: Self::convert_count(row.count)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl ArticleWriteRepo for PostgresArticleStore {
    async fn insert_article(&self, article: NewArticle) -> Result<Article, StoreError> {
        let article = article.into_article(Uuid::new_v4(), OffsetDateTime::now_utc());
        let row = insert_query(&article)
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(Article::from(row))
    }

    async fn update_article(&self, id: Uuid, update: ArticleUpdate) -> Result<Article, StoreError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        let mut article: Article = sqlx::query_as::<_, ArticleRow>(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles a WHERE a.id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?
        .ok_or(StoreError::NotFound)?
        .into();

        update.apply(&mut article, OffsetDateTime::now_utc());

        let row = sqlx::query_as::<_, ArticleRow>(&format!(
            "UPDATE articles SET title = $2, summary = $3, source = $4, url = $5, tags = $6, \
             published_at = $7, updated_at = $8 WHERE id = $1 RETURNING {RETURNING_COLUMNS}"
        ))
        .bind(article.id)
        .bind(article.title)
        .bind(article.summary)
        .bind(article.source)
        .bind(article.url)
        .bind(article.tags)
        .bind(article.published_at)
        .bind(article.updated_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(Article::from(row))
    }

    async fn delete_article(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM articles WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn import_articles(&self, articles: Vec<NewArticle>) -> Result<u64, StoreError> {
        let now = OffsetDateTime::now_utc();
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;
        let mut imported = 0;
        for article in articles {
            let article = article.into_article(Uuid::new_v4(), now);
            insert_query(&article)
                .fetch_one(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
            imported += 1;
        }
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(imported)
    }

    async fn rename_tag(&self, from: &str, to: &str) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE articles \
             SET tags = ARRAY(SELECT DISTINCT t FROM unnest(array_replace(tags, $1, $2)) AS t ORDER BY t), \
                 updated_at = now() \
             WHERE $1 = ANY(tags)",
        )
        .bind(from)
        .bind(to)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    async fn set_favorite(
        &self,
        user_id: Uuid,
        article_id: Uuid,
        favorite: bool,
    ) -> Result<bool, StoreError> {
        let statement = if favorite {
            "INSERT INTO favorites (user_id, article_id) VALUES ($1, $2) ON CONFLICT DO NOTHING"
        } else {
            "DELETE FROM favorites WHERE user_id = $1 AND article_id = $2"
        };
        let result = sqlx::query(statement)
            .bind(user_id)
            .bind(article_id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 && !favorite {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM articles WHERE id = $1)")
                    .bind(article_id)
                    .fetch_one(self.pool())
                    .await
                    .map_err(map_sqlx_error)?;
            if !exists {
                return Err(StoreError::NotFound);
            }
        }
        Ok(result.rows_affected() > 0)
    }
}

fn insert_query(
    article: &Article,
) -> sqlx::query::QueryAs<'static, Postgres, ArticleRow, sqlx::postgres::PgArguments> {
    sqlx::query_as::<_, ArticleRow>(INSERT_ARTICLE)
        .bind(article.id)
        .bind(article.title.clone())
        .bind(article.summary.clone())
        .bind(article.source.clone())
        .bind(article.url.clone())
        .bind(article.tags.clone())
        .bind(article.published_at)
        .bind(article.created_at)
        .bind(article.updated_at)
}

const INSERT_ARTICLE: &str = "INSERT INTO articles \
     (id, title, summary, source, url, tags, published_at, created_at, updated_at) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
     RETURNING id, title, summary, source, url, tags, published_at, created_at, updated_at";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::articles::Keyset;
    use time::macros::datetime;

    #[test]
    fn offset_query_orders_by_column_then_id() {
        let qb = build_range_query(
            &ArticleFilter::default(),
            SortSpec::default(),
            &RangeWindow::Offset(40),
            20,
        );
        let sql = qb.sql();
        assert!(sql.contains("ORDER BY a.published_at DESC, a.id DESC LIMIT $1"));
        assert!(sql.ends_with("OFFSET $2"));
        assert!(!sql.contains("a.id) <"));
    }

    #[test]
    fn keyset_query_uses_row_value_comparison() {
        let sort = SortSpec::new(SortField::Title, SortDirection::Asc);
        let position = Keyset {
            value: SortValue::Text("Middle".into()),
            id: Uuid::nil(),
        };
        let filter = ArticleFilter {
            source: Some("wire".into()),
            tags: vec!["rust".into()],
            ..Default::default()
        };
        let qb = build_range_query(&filter, sort, &RangeWindow::After(position), 11);
        let sql = qb.sql();
        assert!(sql.contains("a.source = $1"));
        assert!(sql.contains("a.tags @> $2"));
        assert!(sql.contains("AND (a.title COLLATE \"C\", a.id) > ($3, $4)"));
        assert!(sql.contains("ORDER BY a.title COLLATE \"C\" ASC, a.id ASC LIMIT $5"));
        assert!(!sql.contains("OFFSET"));
    }

    #[test]
    fn descending_keyset_seeks_backward() {
        let position = Keyset {
            value: SortValue::Time(datetime!(2024-01-01 00:00 UTC)),
            id: Uuid::nil(),
        };
        let qb = build_range_query(
            &ArticleFilter::default(),
            SortSpec::default(),
            &RangeWindow::After(position),
            5,
        );
        assert!(qb.sql().contains("(a.published_at, a.id) < ($1, $2)"));
    }

    #[test]
    fn favorites_and_search_filters_bind_parameters() {
        let filter = ArticleFilter {
            search: Some("tokio".into()),
            favorited_by: Some(Uuid::nil()),
            ..Default::default()
        };
        let qb = build_count_query(&filter);
        let sql = qb.sql();
        assert!(sql.starts_with("SELECT COUNT(*) FROM articles a WHERE 1=1"));
        assert!(sql.contains("(a.title ILIKE $1 OR a.summary ILIKE $2)"));
        assert!(sql.contains("f.user_id = $3)"));
    }
}
