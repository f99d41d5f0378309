use crate::error::{Error, Result};
use crate::model::{Room, RoomView, User};
use crate::users::row_to_user;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

/// Create a room ensuring a unique number. Capacity must be positive, but
/// nothing ever enforces it against the occupant count.
pub fn create_room(
    conn: &Connection,
    number: &str,
    capacity: i64,
    block: &str,
    floor: i64,
) -> Result<Room> {
    if number.trim().is_empty() {
        return Err(Error::Validation("empty_number"));
    }
    if capacity <= 0 {
        return Err(Error::Validation("invalid_capacity"));
    }
    let id = Uuid::new_v4();
    let res = conn.execute(
        "INSERT INTO rooms (id, number, capacity, block, floor) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![id.to_string(), number, capacity, block, floor],
    );
    match res {
        Ok(_) => Ok(Room {
            id,
            number: number.into(),
            capacity,
            block: block.into(),
            floor,
        }),
        Err(e) => {
            if matches!(
                e.sqlite_error_code(),
                Some(rusqlite::ErrorCode::ConstraintViolation)
            ) {
                Err(Error::Conflict("duplicate_number"))
            } else {
                Err(e.into())
            }
        }
    }
}

fn row_to_room(row: &rusqlite::Row<'_>) -> rusqlite::Result<Room> {
    Ok(Room {
        id: Uuid::parse_str(row.get::<_, String>(0)?.as_str()).unwrap(),
        number: row.get(1)?,
        capacity: row.get(2)?,
        block: row.get(3)?,
        floor: row.get(4)?,
    })
}

fn occupants(conn: &Connection, room_id: &Uuid) -> Result<Vec<User>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, email, role, profile_image, room_id FROM users \
         WHERE role = 'student' AND room_id = ?1 ORDER BY name",
    )?;
    let users = stmt
        .query_map([room_id.to_string()], row_to_user)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(users)
}

/// List every room with its derived occupants. Full scan, no pagination.
pub fn list_rooms(conn: &Connection) -> Result<Vec<RoomView>> {
    let mut stmt =
        conn.prepare("SELECT id, number, capacity, block, floor FROM rooms ORDER BY number")?;
    let rooms = stmt
        .query_map([], row_to_room)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let mut views = Vec::with_capacity(rooms.len());
    for room in rooms {
        let occupants = occupants(conn, &room.id)?;
        views.push(RoomView { room, occupants });
    }
    Ok(views)
}

/// Resolve the room a student is assigned to, with the same occupant-joined
/// view. An unknown or unassigned student yields no room, which is not an
/// error.
pub fn room_for_student(conn: &Connection, student_id: &Uuid) -> Result<Option<RoomView>> {
    let room_id: Option<Option<String>> = conn
        .query_row(
            "SELECT room_id FROM users WHERE id = ?1",
            [student_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    let Some(Some(room_id)) = room_id else {
        return Ok(None);
    };
    let room_id = match Uuid::parse_str(&room_id) {
        Ok(id) => id,
        Err(_) => return Ok(None),
    };
    let mut stmt =
        conn.prepare("SELECT id, number, capacity, block, floor FROM rooms WHERE id = ?1")?;
    let Some(room) = stmt
        .query_row([room_id.to_string()], row_to_room)
        .optional()?
    else {
        return Ok(None);
    };
    let occupants = occupants(conn, &room.id)?;
    Ok(Some(RoomView { room, occupants }))
}
