use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use reservd::auth::Passwords;
use reservd::engine::{CapacityPolicy, Engine};
use reservd::wire;

// ── Test infrastructure ──────────────────────────────────────

fn passwords() -> Passwords {
    Passwords {
        admin: "admin-pw".into(),
        editor: "editor-pw".into(),
        user: "reservd".into(),
    }
}

async fn start_test_server() -> (SocketAddr, Arc<Engine>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("reservd_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Arc::new(Engine::new(dir.join("reservations.wal"), CapacityPolicy::default()).unwrap());

    let served = engine.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = served.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine, passwords(), None).await;
            });
        }
    });

    (addr, engine)
}

async fn connect(addr: SocketAddr, user: &str, password: &str) -> Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("reservd")
        .user(user)
        .password(password);

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(connection);
    client
}

async fn guest(addr: SocketAddr) -> Client {
    connect(addr, "guest", "reservd").await
}

async fn admin(addr: SocketAddr) -> Client {
    connect(addr, "admin", "admin-pw").await
}

async fn rows(client: &Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

async fn sqlstate(client: &Client, sql: &str) -> String {
    let err = client.simple_query(sql).await.unwrap_err();
    err.as_db_error()
        .map(|db| db.code().code().to_string())
        .unwrap_or_else(|| panic!("expected a server error, got {err}"))
}

fn insert_sql(date: &str, time: &str, people: u32) -> String {
    format!(
        "INSERT INTO reservations (full_name, email, phone, date, time, number_of_people, notes) \
         VALUES ('Ada Lovelace', 'ada@example.com', '555-0100', '{date}', '{time}', {people}, NULL)"
    )
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn guest_books_and_sees_availability() {
    let (addr, _engine) = start_test_server().await;
    let client = guest(addr).await;

    let created = rows(&client, &insert_sql("2030-06-01", "18:00", 4)).await;
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].get("status"), Some("pending"));
    assert_eq!(created[0].get("time"), Some("18:00"));
    assert_eq!(created[0].get("notes"), None);
    assert!(Ulid::from_string(created[0].get("id").unwrap()).is_ok());

    let days = rows(
        &client,
        r#"SELECT * FROM availability WHERE start >= '2030-06-01' AND "end" <= '2030-06-02'"#,
    )
    .await;
    assert_eq!(days.len(), 2);
    assert_eq!(days[0].get("date"), Some("2030-06-01"));
    assert_eq!(days[0].get("total_used"), Some("4"));
    assert_eq!(days[1].get("total_used"), Some("0"));

    let slots: serde_json::Value = serde_json::from_str(days[0].get("slots").unwrap()).unwrap();
    assert_eq!(slots["18:00"]["used"], 4);
    assert_eq!(slots["18:00"]["remaining"], 16);
    assert_eq!(slots["12:00"]["is_available"], true);
}

#[tokio::test]
async fn over_capacity_is_refused_with_remaining() {
    let (addr, _engine) = start_test_server().await;
    let client = guest(addr).await;
    rows(&client, &insert_sql("2030-06-01", "18:00", 4)).await;

    let err = client
        .simple_query(&insert_sql("2030-06-01", "18:00", 2))
        .await
        .unwrap_err();
    let db = err.as_db_error().unwrap();
    assert_eq!(db.code().code(), "53400");
    assert!(db.message().contains("1 remaining"), "{}", db.message());

    assert_eq!(rows(&client, &insert_sql("2030-06-01", "18:00", 1)).await.len(), 1);
}

#[tokio::test]
async fn invalid_requests_map_to_data_errors() {
    let (addr, _engine) = start_test_server().await;
    let client = guest(addr).await;
    assert_eq!(sqlstate(&client, &insert_sql("2030-06-01", "18:00", 0)).await, "22023");
    assert_eq!(sqlstate(&client, &insert_sql("2030-06-01", "13:00", 2)).await, "22023");
    assert_eq!(sqlstate(&client, &insert_sql("someday", "18:00", 2)).await, "22023");
    assert_eq!(sqlstate(&client, "SELECT * FROM bookings").await, "42601");
}

#[tokio::test]
async fn operator_commands_require_admin() {
    let (addr, _engine) = start_test_server().await;
    let client = guest(addr).await;
    let id = Ulid::new();

    assert_eq!(sqlstate(&client, "SELECT * FROM reservations").await, "42501");
    assert_eq!(
        sqlstate(&client, &format!("UPDATE reservations SET status = 'confirmed' WHERE id = '{id}'")).await,
        "42501"
    );
    assert_eq!(
        sqlstate(&client, &format!("DELETE FROM reservations WHERE id = '{id}'")).await,
        "42501"
    );

    let editor = connect(addr, "editor", "editor-pw").await;
    assert_eq!(sqlstate(&editor, "SELECT * FROM reservations").await, "42501");
}

#[tokio::test]
async fn wrong_password_is_rejected() {
    let (addr, _engine) = start_test_server().await;
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .user("admin")
        .password("reservd");
    assert!(config.connect(NoTls).await.is_err());
}

#[tokio::test]
async fn admin_manages_lifecycle() {
    let (addr, _engine) = start_test_server().await;
    let client = guest(addr).await;
    let operator = admin(addr).await;

    let first = rows(&client, &insert_sql("2030-06-01", "12:00", 2)).await;
    let first_id = first[0].get("id").unwrap().to_string();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = rows(&client, &insert_sql("2030-06-02", "20:00", 3)).await;
    let second_id = second[0].get("id").unwrap().to_string();

    let listed = rows(&operator, "SELECT * FROM reservations").await;
    let ids: Vec<&str> = listed.iter().filter_map(|r| r.get("id")).collect();
    assert_eq!(ids, vec![second_id.as_str(), first_id.as_str()]);

    let confirmed = rows(
        &operator,
        &format!("UPDATE reservations SET status = 'onaylandı' WHERE id = '{first_id}'"),
    )
    .await;
    assert_eq!(confirmed[0].get("status"), Some("confirmed"));

    rows(
        &operator,
        &format!("UPDATE reservations SET status = 'completed' WHERE id = '{first_id}'"),
    )
    .await;
    assert_eq!(
        sqlstate(&operator, &format!("DELETE FROM reservations WHERE id = '{first_id}'")).await,
        "55000"
    );

    rows(
        &operator,
        &format!("UPDATE reservations SET status = 'cancelled' WHERE id = '{second_id}'"),
    )
    .await;
    let deleted = rows(&operator, &format!("DELETE FROM reservations WHERE id = '{second_id}'")).await;
    assert_eq!(deleted[0].get("status"), Some("cancelled"));

    assert!(rows(&operator, &format!("SELECT * FROM reservations WHERE id = '{second_id}'"))
        .await
        .is_empty());
    assert_eq!(
        sqlstate(&operator, &format!("DELETE FROM reservations WHERE id = '{second_id}'")).await,
        "P0002"
    );
}

#[tokio::test]
async fn extended_protocol_binds_parameters() {
    let (addr, engine) = start_test_server().await;
    let client = guest(addr).await;
    rows(&client, &insert_sql("2030-07-01", "14:00", 5)).await;

    let stmt = client
        .prepare(r#"SELECT * FROM availability WHERE start >= $1 AND "end" <= $2"#)
        .await
        .unwrap();
    assert_eq!(stmt.columns().len(), 5);
    assert_eq!(stmt.columns()[0].name(), "date");

    let insert = client
        .prepare(
            "INSERT INTO reservations (full_name, email, phone, date, time, number_of_people, notes) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .await
        .unwrap();
    let notes = "will pay $1 deposit, O'Brien's table";
    let created = client
        .query(
            &insert,
            &[&"Ada Lovelace", &"ada@example.com", &"555-0100", &"2030-07-02", &"18:00", &"2", &notes],
        )
        .await
        .unwrap();
    assert_eq!(created.len(), 1);
    let id: &str = created[0].get("id");
    assert_eq!(created[0].get::<_, &str>("full_name"), "Ada Lovelace");
    assert_eq!(created[0].get::<_, Option<&str>>("notes"), Some(notes));
    let id = Ulid::from_string(id).unwrap();

    let operator = admin(addr).await;
    let update = operator
        .prepare("UPDATE reservations SET status = $1 WHERE id = $2")
        .await
        .unwrap();
    let updated = operator
        .query(&update, &[&"confirmed", &id.to_string()])
        .await
        .unwrap();
    assert_eq!(updated[0].get::<_, &str>("status"), "confirmed");

    let stored = engine.get_reservation(id).await.unwrap();
    assert_eq!(stored.status, reservd::model::Status::Confirmed);
    assert_eq!(stored.notes.as_deref(), Some(notes));
    assert_eq!(stored.party_size, 2);
    assert_eq!(engine.list_reservations().await.len(), 2);
}
