use crate::error::{Error, Result};
use crate::model::{Role, User};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

/// Provision a user account, ensuring a unique email.
pub fn create_user(
    conn: &Connection,
    name: &str,
    email: &str,
    role: Role,
    password_hash: &str,
    profile_image: Option<&str>,
    room_id: Option<&Uuid>,
) -> Result<User> {
    if name.trim().is_empty() {
        return Err(Error::Validation("empty_name"));
    }
    if email.trim().is_empty() || !email.contains('@') {
        return Err(Error::Validation("invalid_email"));
    }
    let id = Uuid::new_v4();
    let res = conn.execute(
        "INSERT INTO users (id, name, email, role, password_hash, profile_image, room_id) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            id.to_string(),
            name,
            email,
            role.as_str(),
            password_hash,
            profile_image,
            room_id.map(|r| r.to_string())
        ],
    );
    match res {
        Ok(_) => Ok(User {
            id,
            name: name.into(),
            email: email.into(),
            role,
            profile_image: profile_image.map(|s| s.into()),
            room_id: room_id.copied(),
        }),
        Err(e) => {
            if matches!(
                e.sqlite_error_code(),
                Some(rusqlite::ErrorCode::ConstraintViolation)
            ) {
                Err(Error::Conflict("duplicate_email"))
            } else {
                Err(e.into())
            }
        }
    }
}

pub(crate) fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: Uuid::parse_str(row.get::<_, String>(0)?.as_str()).unwrap(),
        name: row.get(1)?,
        email: row.get(2)?,
        role: row.get::<_, String>(3)?.parse().unwrap(),
        profile_image: row.get(4)?,
        room_id: row
            .get::<_, Option<String>>(5)?
            .and_then(|s| Uuid::parse_str(&s).ok()),
    })
}

const USER_COLS: &str = "id, name, email, role, profile_image, room_id";

/// Fetch a user by id.
pub fn find_user(conn: &Connection, id: &Uuid) -> Result<Option<User>> {
    let mut stmt = conn.prepare(&format!("SELECT {USER_COLS} FROM users WHERE id = ?1"))?;
    let user = stmt
        .query_row([id.to_string()], row_to_user)
        .optional()?;
    Ok(user)
}

/// Fetch a user and their password hash by email.
pub fn find_by_email(conn: &Connection, email: &str) -> Result<Option<(User, String)>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {USER_COLS}, password_hash FROM users WHERE email = ?1"
    ))?;
    let found = stmt
        .query_row([email], |row| Ok((row_to_user(row)?, row.get::<_, String>(6)?)))
        .optional()?;
    Ok(found)
}

/// Resolve the warden identity by role. Role-derived, not stored by
/// reference anywhere.
pub fn find_warden(conn: &Connection) -> Result<Option<User>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {USER_COLS} FROM users WHERE role = 'warden' ORDER BY rowid LIMIT 1"
    ))?;
    let warden = stmt.query_row([], row_to_user).optional()?;
    Ok(warden)
}

/// List all student accounts.
pub fn list_students(conn: &Connection) -> Result<Vec<User>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {USER_COLS} FROM users WHERE role = 'student' ORDER BY name"
    ))?;
    let students = stmt
        .query_map([], row_to_user)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(students)
}

/// Number of provisioned accounts, used to decide whether to apply the
/// one-shot bootstrap admin from config.
pub fn count_users(conn: &Connection) -> Result<i64> {
    let count = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
    Ok(count)
}
