use crate::error::{Error, Result};
use crate::model::Announcement;
use rusqlite::{params, Connection};
use time::OffsetDateTime;
use uuid::Uuid;

/// Publish an announcement. Records are immutable after creation.
pub fn create_announcement(
    conn: &Connection,
    title: &str,
    content: &str,
    created_by: &str,
    important: bool,
) -> Result<Announcement> {
    if title.trim().is_empty() {
        return Err(Error::Validation("empty_title"));
    }
    if content.trim().is_empty() {
        return Err(Error::Validation("empty_content"));
    }
    let id = Uuid::new_v4();
    let now = OffsetDateTime::now_utc().unix_timestamp();
    conn.execute(
        "INSERT INTO announcements (id, title, content, created_by, important, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            id.to_string(),
            title,
            content,
            created_by,
            important as i64,
            now
        ],
    )?;
    Ok(Announcement {
        id,
        title: title.into(),
        content: content.into(),
        created_by: created_by.into(),
        important,
        created_at: now,
    })
}

fn row_to_announcement(row: &rusqlite::Row<'_>) -> rusqlite::Result<Announcement> {
    Ok(Announcement {
        id: Uuid::parse_str(row.get::<_, String>(0)?.as_str()).unwrap(),
        title: row.get(1)?,
        content: row.get(2)?,
        created_by: row.get(3)?,
        important: row.get::<_, i64>(4)? != 0,
        created_at: row.get(5)?,
    })
}

/// List announcements newest first, with an optional importance filter and
/// a case-insensitive substring match over title and content.
pub fn list_announcements(
    conn: &Connection,
    important_only: bool,
    q: Option<&str>,
) -> Result<Vec<Announcement>> {
    let mut stmt = conn.prepare(
        "SELECT id, title, content, created_by, important, created_at \
         FROM announcements ORDER BY created_at DESC",
    )?;
    let mut list = stmt
        .query_map([], row_to_announcement)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if important_only {
        list.retain(|a| a.important);
    }
    if let Some(q) = q.map(str::to_lowercase).filter(|q| !q.is_empty()) {
        list.retain(|a| {
            a.title.to_lowercase().contains(&q) || a.content.to_lowercase().contains(&q)
        });
    }
    Ok(list)
}
