use axum::http::StatusCode;
use hostelcore::{
    api::{build_router, AppState},
    config::{Bootstrap, Config},
    notify::MemoryNotifier,
};
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use tokio::task::JoinHandle;

async fn spawn_server() -> (
    SocketAddr,
    JoinHandle<()>,
    Arc<MemoryNotifier>,
    tempfile::TempDir,
) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    listener.set_nonblocking(true).unwrap();

    let tmp = tempfile::tempdir().unwrap();
    let config = Config {
        bind: addr.to_string(),
        data_dir: tmp.path().to_path_buf(),
        logging_enabled: false,
        smtp: None,
        bootstrap: Some(Bootstrap {
            name: "Admin User".into(),
            email: "admin@hostel.com".into(),
            password: "changeme".into(),
        }),
    };
    let notifier = Arc::new(MemoryNotifier::new());
    let state = AppState::new(config).unwrap().with_notifier(notifier.clone());
    let app = build_router(state);
    let server = tokio::spawn(async move {
        axum::Server::from_tcp(listener)
            .unwrap()
            .serve(app.into_make_service())
            .await
            .unwrap();
    });
    (addr, server, notifier, tmp)
}

async fn create_user(
    client: &reqwest::Client,
    addr: SocketAddr,
    name: &str,
    email: &str,
    role: &str,
    room_id: Option<&str>,
) -> serde_json::Value {
    let mut body = serde_json::json!({
        "name": name,
        "email": email,
        "role": role,
        "password": "password",
    });
    if let Some(room_id) = room_id {
        body["roomId"] = serde_json::json!(room_id);
    }
    let resp = client
        .post(format!("http://{}/api/users", addr))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    resp.json().await.unwrap()
}

#[tokio::test]
async fn health_login_and_identity() {
    let (addr, server, _notifier, _tmp) = spawn_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("http://{}/api/health", addr))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());

    // bootstrap admin can log in
    let resp = client
        .post(format!("http://{}/api/users/login", addr))
        .json(&serde_json::json!({"email":"admin@hostel.com","password":"changeme"}))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let v: serde_json::Value = resp.json().await.unwrap();
    let token = v["token"].as_str().unwrap().to_string();
    assert_eq!(v["user"]["role"], "admin");
    assert!(v["user"].get("passwordHash").is_none());

    // wrong password
    let resp = client
        .post(format!("http://{}/api/users/login", addr))
        .json(&serde_json::json!({"email":"admin@hostel.com","password":"wrong"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // unknown account
    let resp = client
        .post(format!("http://{}/api/users/login", addr))
        .json(&serde_json::json!({"email":"nobody@hostel.com","password":"password"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // empty credentials are a validation failure
    let resp = client
        .post(format!("http://{}/api/users/login", addr))
        .json(&serde_json::json!({"email":"","password":""}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    // identity echo
    let resp = client
        .get(format!("http://{}/api/me", addr))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let me: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(me["email"], "admin@hostel.com");

    let resp = client
        .get(format!("http://{}/api/me", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // duplicate email conflicts
    create_user(&client, addr, "John Doe", "john@student.com", "student", None).await;
    let resp = client
        .post(format!("http://{}/api/users", addr))
        .json(&serde_json::json!({
            "name":"Other","email":"john@student.com","role":"student","password":"pw"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    server.abort();
}

#[tokio::test]
async fn query_lifecycle() {
    let (addr, server, _notifier, _tmp) = spawn_server().await;
    let client = reqwest::Client::new();

    let student = create_user(&client, addr, "John Doe", "john@student.com", "student", None).await;
    let student_id = student["id"].as_str().unwrap().to_string();

    // validation failure persists nothing
    let resp = client
        .post(format!("http://{}/api/queries", addr))
        .json(&serde_json::json!({
            "studentId": student_id, "studentName": "John Doe",
            "subject": "", "description": "x"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let err: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(err["message"], "empty_subject");

    // create starts pending with an empty reply log
    let resp = client
        .post(format!("http://{}/api/queries", addr))
        .json(&serde_json::json!({
            "studentId": student_id, "studentName": "John Doe",
            "subject": "Leaky tap", "description": "Room 12 tap leaks"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let q: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(q["status"], "pending");
    assert_eq!(q["replies"].as_array().unwrap().len(), 0);
    let qid = q["id"].as_str().unwrap().to_string();

    // reply advances pending -> in-progress
    let resp = client
        .post(format!("http://{}/api/queries/{}/replies", addr, qid))
        .json(&serde_json::json!({
            "userId": student_id, "userName": "Warden Smith",
            "userRole": "warden", "message": "We'll send a plumber"
        }))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let q: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(q["status"], "in-progress");
    assert_eq!(q["replies"].as_array().unwrap().len(), 1);
    assert_eq!(q["replies"][0]["message"], "We'll send a plumber");

    // a second reply leaves the status alone
    let resp = client
        .post(format!("http://{}/api/queries/{}/replies", addr, qid))
        .json(&serde_json::json!({
            "userId": student_id, "userName": "John Doe",
            "userRole": "student", "message": "Thanks"
        }))
        .send()
        .await
        .unwrap();
    let q: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(q["status"], "in-progress");
    assert_eq!(q["replies"].as_array().unwrap().len(), 2);

    // explicit status update
    let resp = client
        .patch(format!("http://{}/api/queries/{}/status", addr, qid))
        .json(&serde_json::json!({"status": "resolved"}))
        .send()
        .await
        .unwrap();
    let q: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(q["status"], "resolved");

    // out-of-enum status is rejected and the record is untouched
    let resp = client
        .patch(format!("http://{}/api/queries/{}/status", addr, qid))
        .json(&serde_json::json!({"status": "escalated"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let resp = client
        .get(format!("http://{}/api/queries/{}", addr, qid))
        .send()
        .await
        .unwrap();
    let q: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(q["status"], "resolved");

    // unknown id is a 404 with a message body
    let resp = client
        .get(format!("http://{}/api/queries/{}", addr, uuid::Uuid::new_v4()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let err: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(err["message"], "query_not_found");

    // list filter
    let resp = client
        .get(format!("http://{}/api/queries?status=resolved", addr))
        .send()
        .await
        .unwrap();
    let list: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(list.as_array().unwrap().len(), 1);
    let resp = client
        .get(format!("http://{}/api/queries?status=pending", addr))
        .send()
        .await
        .unwrap();
    let list: serde_json::Value = resp.json().await.unwrap();
    assert!(list.as_array().unwrap().is_empty());

    server.abort();
}

#[tokio::test]
async fn attendance_flow_notifies_warden_and_student() {
    let (addr, server, notifier, _tmp) = spawn_server().await;
    let client = reqwest::Client::new();

    create_user(&client, addr, "Warden Smith", "warden@hostel.com", "warden", None).await;
    let student = create_user(&client, addr, "John Doe", "john@student.com", "student", None).await;
    let student_id = student["id"].as_str().unwrap().to_string();

    // end before start never persists
    let resp = client
        .post(format!("http://{}/api/attendance", addr))
        .json(&serde_json::json!({
            "studentId": student_id, "studentName": "John Doe", "type": "outing",
            "startDate": "2024-01-10T18:00:00Z", "endDate": "2024-01-10T09:00:00Z",
            "reason": "city visit"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let list: serde_json::Value = client
        .get(format!("http://{}/api/attendance", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(list.as_array().unwrap().is_empty());

    // valid create: pending, one mail to the warden
    let resp = client
        .post(format!("http://{}/api/attendance", addr))
        .json(&serde_json::json!({
            "studentId": student_id, "studentName": "John Doe", "type": "outing",
            "startDate": "2024-01-10T09:00:00Z", "endDate": "2024-01-10T18:00:00Z",
            "reason": "city visit"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let a: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(a["status"], "pending");
    let aid = a["id"].as_str().unwrap().to_string();

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let sent = notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "warden@hostel.com");
    assert_eq!(sent[0].subject, "New outing Request");
    assert!(sent[0].body.contains("John Doe"));
    assert!(sent[0].body.contains("city visit"));

    // approval: exactly one mail to the student, subject mentions approval
    let resp = client
        .patch(format!("http://{}/api/attendance/{}", addr, aid))
        .json(&serde_json::json!({"status": "approved"}))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let a: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(a["status"], "approved");

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let sent = notifier.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].to, "john@student.com");
    assert!(sent[1].subject.contains("Approved"));

    // re-deciding is allowed, the second write wins, and a rejection
    // sends nothing
    let resp = client
        .patch(format!("http://{}/api/attendance/{}", addr, aid))
        .json(&serde_json::json!({"status": "rejected"}))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let a: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(a["status"], "rejected");
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(notifier.sent().len(), 2);

    // decision outside the two-value enum is rejected
    let resp = client
        .patch(format!("http://{}/api/attendance/{}", addr, aid))
        .json(&serde_json::json!({"status": "pending"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    // unknown request
    let resp = client
        .patch(format!(
            "http://{}/api/attendance/{}",
            addr,
            uuid::Uuid::new_v4()
        ))
        .json(&serde_json::json!({"status": "approved"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    // per-student listing
    let list: serde_json::Value = client
        .get(format!(
            "http://{}/api/attendance/student/{}",
            addr, student_id
        ))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list.as_array().unwrap().len(), 1);

    server.abort();
}

#[tokio::test]
async fn room_occupancy_is_derived() {
    let (addr, server, _notifier, _tmp) = spawn_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{}/api/rooms", addr))
        .json(&serde_json::json!({"number":"A-101","capacity":2,"block":"A","floor":1}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let room: serde_json::Value = resp.json().await.unwrap();
    let room_id = room["id"].as_str().unwrap().to_string();

    // duplicate number conflicts
    let resp = client
        .post(format!("http://{}/api/rooms", addr))
        .json(&serde_json::json!({"number":"A-101","capacity":3,"block":"A","floor":1}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    create_user(&client, addr, "John", "john@student.com", "student", Some(&room_id)).await;
    create_user(&client, addr, "Jane", "jane@student.com", "student", Some(&room_id)).await;

    let rooms: serde_json::Value = client
        .get(format!("http://{}/api/rooms", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let a101 = &rooms.as_array().unwrap()[0];
    assert_eq!(a101["capacity"], 2);
    assert_eq!(a101["occupants"].as_array().unwrap().len(), 2);

    // a third assignment is never blocked; the view just reports three
    let mike = create_user(&client, addr, "Mike", "mike@student.com", "student", Some(&room_id)).await;
    let rooms: serde_json::Value = client
        .get(format!("http://{}/api/rooms", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(
        rooms.as_array().unwrap()[0]["occupants"]
            .as_array()
            .unwrap()
            .len(),
        3
    );

    // student room view
    let view: serde_json::Value = client
        .get(format!(
            "http://{}/api/rooms/student/{}",
            addr,
            mike["id"].as_str().unwrap()
        ))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(view["number"], "A-101");
    assert_eq!(view["occupants"].as_array().unwrap().len(), 3);

    // unassigned student gets a "no room" answer, not an error
    let sarah = create_user(&client, addr, "Sarah", "sarah@student.com", "student", None).await;
    let resp = client
        .get(format!(
            "http://{}/api/rooms/student/{}",
            addr,
            sarah["id"].as_str().unwrap()
        ))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let view: serde_json::Value = resp.json().await.unwrap();
    assert!(view.is_null());

    server.abort();
}

#[tokio::test]
async fn announcements_filtering() {
    let (addr, server, _notifier, _tmp) = spawn_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{}/api/announcements", addr))
        .json(&serde_json::json!({
            "title": "Maintenance Schedule",
            "content": "Water supply off on Friday morning",
            "createdBy": "Warden Smith",
            "important": true
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    client
        .post(format!("http://{}/api/announcements", addr))
        .json(&serde_json::json!({
            "title": "New Mess Menu",
            "content": "Menu changes from next week",
            "createdBy": "Admin User"
        }))
        .send()
        .await
        .unwrap();

    // empty title rejected
    let resp = client
        .post(format!("http://{}/api/announcements", addr))
        .json(&serde_json::json!({
            "title": "", "content": "x", "createdBy": "Admin User"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let all: serde_json::Value = client
        .get(format!("http://{}/api/announcements", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(all.as_array().unwrap().len(), 2);

    let important: serde_json::Value = client
        .get(format!("http://{}/api/announcements?important=true", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(important.as_array().unwrap().len(), 1);
    assert_eq!(important.as_array().unwrap()[0]["title"], "Maintenance Schedule");

    let found: serde_json::Value = client
        .get(format!("http://{}/api/announcements?q=menu", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(found.as_array().unwrap().len(), 1);
    assert_eq!(found.as_array().unwrap()[0]["title"], "New Mess Menu");

    server.abort();
}
