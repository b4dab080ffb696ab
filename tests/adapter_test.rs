use pretty_assertions::assert_eq;
use querent::adapter::State;
use querent::prelude::*;
use querent::query::{join, select};
use serde::Deserialize;

#[derive(Debug, Deserialize, PartialEq)]
struct User {
    id: i64,
    name: String,
    age: Option<i64>,
}

async fn setup() -> SqlxAdapter {
    let mut adapter = SqlxAdapter::new(Dialect::Generic);
    adapter.open("sqlite::memory:").await.expect("Failed to open sqlite");

    adapter
        .exec(
            "CREATE TABLE teams (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL)",
            &[],
        )
        .await
        .unwrap();
    adapter
        .exec(
            "CREATE TABLE users (\
             id INTEGER PRIMARY KEY AUTOINCREMENT, \
             name TEXT NOT NULL UNIQUE, \
             age INTEGER, \
             team_id INTEGER)",
            &[],
        )
        .await
        .unwrap();

    adapter
}

fn user(name: &str, age: i64) -> Changes {
    Changes::new().set("name", name).set("age", age)
}

fn users() -> Query {
    querent::query::from("users")
}

#[tokio::test]
async fn test_open_infers_dialect() {
    let adapter = setup().await;
    assert_eq!(adapter.builder().dialect(), Dialect::Sqlite);
    assert_eq!(adapter.state(), State::Connected);
}

#[tokio::test]
async fn test_insert_and_find() {
    let mut adapter = setup().await;

    let first = adapter.insert(&users(), &user("alice", 30)).await.unwrap();
    assert_eq!(first.rows_affected, 1);
    assert_eq!(first.last_insert_id, Some(1));

    let second = adapter.insert(&users(), &user("bob", 25)).await.unwrap();
    assert_eq!(second.last_insert_id, Some(2));

    let rows = adapter
        .find(&compose("users", [Fragment::from(gt("age", 20)), sort_asc("name").into()]))
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["name"], "alice");
    assert_eq!(rows[1]["name"], "bob");

    let bob: User = adapter
        .find_one_as(&compose("users", [eq("name", "bob")]))
        .await
        .unwrap();
    assert_eq!(
        bob,
        User {
            id: 2,
            name: "bob".into(),
            age: Some(25),
        }
    );
}

#[tokio::test]
async fn test_null_round_trip() {
    let mut adapter = setup().await;
    adapter
        .insert(&users(), &Changes::new().set("name", "carol").set("age", Value::Null))
        .await
        .unwrap();

    let carol: User = adapter
        .find_one_as(&compose("users", [is_nil("age")]))
        .await
        .unwrap();
    assert_eq!(carol.age, None);
}

#[tokio::test]
async fn test_duplicate_is_normalized() {
    let mut adapter = setup().await;
    adapter.insert(&users(), &user("alice", 30)).await.unwrap();

    let err = adapter.insert(&users(), &user("alice", 31)).await.unwrap_err();
    assert!(err.is_duplicate(), "expected duplicate, got {:?}", err);
    assert!(err.to_string().contains("UNIQUE"));
}

#[tokio::test]
async fn test_find_one_without_rows_is_not_found() {
    let mut adapter = setup().await;

    let err = adapter
        .find_one(&compose("users", [eq("id", 42)]))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_syntax_error_is_unexpected() {
    let mut adapter = setup().await;
    let err = adapter.exec("SELEC nothing", &[]).await.unwrap_err();
    assert!(err.is_unexpected());
}

#[tokio::test]
async fn test_update_and_delete_counts() {
    let mut adapter = setup().await;
    for (name, age) in [("a", 10), ("b", 20), ("c", 30)] {
        adapter.insert(&users(), &user(name, age)).await.unwrap();
    }

    let older = compose("users", [gte("age", 20)]);
    let updated = adapter
        .update(&older, &Changes::new().set("age", 99))
        .await
        .unwrap();
    assert_eq!(updated.rows_affected, 2);

    let noop = adapter.update(&older, &Changes::new()).await.unwrap();
    assert_eq!(noop, ExecResult::default());

    let deleted = adapter
        .delete(&compose("users", [eq("age", 99)]))
        .await
        .unwrap();
    assert_eq!(deleted.rows_affected, 2);

    let left = adapter.find(&users()).await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0]["name"], "a");
}

#[tokio::test]
async fn test_implicit_join() {
    let mut adapter = setup().await;
    let team = adapter
        .insert(
            &querent::query::from("teams"),
            &Changes::new().set("name", "core"),
        )
        .await
        .unwrap();
    let team_id = team.last_insert_id.unwrap();

    adapter
        .insert(&users(), &user("alice", 30).set("team_id", team_id))
        .await
        .unwrap();
    adapter.insert(&users(), &user("bob", 25)).await.unwrap();

    let rows = adapter
        .find(&compose(
            "users",
            [
                Fragment::from(select(["users.name"])),
                join("teams").into(),
                eq("teams.name", "core").into(),
            ],
        ))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"], "alice");
}

#[tokio::test]
async fn test_rollback_discards_writes() {
    let mut adapter = setup().await;

    adapter.begin().await.unwrap();
    assert_eq!(adapter.state(), State::InTransaction);
    adapter.insert(&users(), &user("ghost", 1)).await.unwrap();
    assert_eq!(adapter.find(&users()).await.unwrap().len(), 1);
    adapter.rollback().await.unwrap();

    assert_eq!(adapter.state(), State::Connected);
    assert!(adapter.find(&users()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_commit_keeps_writes() {
    let mut adapter = setup().await;

    adapter.begin().await.unwrap();
    adapter.insert(&users(), &user("kept", 1)).await.unwrap();
    adapter.commit().await.unwrap();

    assert_eq!(adapter.find(&users()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_nested_begin_is_rejected() {
    let mut adapter = setup().await;
    adapter.begin().await.unwrap();

    let err = adapter.begin().await.unwrap_err();
    assert!(err.is_unexpected());
    assert_eq!(adapter.state(), State::InTransaction);

    adapter.rollback().await.unwrap();
}

#[tokio::test]
async fn test_commit_and_rollback_without_transaction() {
    let mut adapter = setup().await;
    adapter.commit().await.unwrap();
    adapter.rollback().await.unwrap();
    assert_eq!(adapter.state(), State::Connected);
}

#[tokio::test]
async fn test_disconnected_adapter() {
    let mut adapter = SqlxAdapter::new(Dialect::Sqlite);
    assert!(adapter.exec("SELECT 1", &[]).await.unwrap_err().is_unexpected());
    assert!(adapter.query("SELECT 1", &[]).await.unwrap_err().is_unexpected());
    assert!(adapter.begin().await.unwrap_err().is_unexpected());

    let mut adapter = setup().await;
    adapter.close().await.unwrap();
    assert_eq!(adapter.state(), State::Disconnected);
    assert!(adapter.find(&users()).await.unwrap_err().is_unexpected());
}

#[tokio::test]
async fn test_connect_from_config() {
    let config = Config::builder().database("sqlite::memory:").build();
    let mut adapter = SqlxAdapter::connect(&config).await.unwrap();
    assert_eq!(adapter.state(), State::Connected);
    assert_eq!(adapter.builder().dialect(), Dialect::Sqlite);
    adapter.close().await.unwrap();

    let err = SqlxAdapter::connect(&Config::default()).await.err().unwrap();
    assert!(matches!(err, Error::Config(_)));
}

#[tokio::test]
async fn test_chained_join_without_compose() {
    let mut adapter = setup().await;
    let team = adapter
        .insert(&querent::query::from("teams"), &Changes::new().set("name", "core"))
        .await
        .unwrap();
    adapter
        .insert(&users(), &user("alice", 30).set("team_id", team.last_insert_id))
        .await
        .unwrap();

    let query = users()
        .select(["users.name"])
        .join("teams")
        .and_where(eq("teams.name", "core"));
    let rows = adapter.find(&query).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"], "alice");
}

#[tokio::test]
async fn test_offset_without_limit() {
    let mut adapter = setup().await;
    for (name, age) in [("a", 1), ("b", 2), ("c", 3)] {
        adapter.insert(&users(), &user(name, age)).await.unwrap();
    }

    let rows = adapter
        .find(&compose("users", [Fragment::from(sort_asc("name")), offset(1)]))
        .await
        .unwrap();
    let names: Vec<_> = rows.iter().map(|r| r["name"].clone()).collect();
    assert_eq!(names, vec!["b", "c"]);
}

#[tokio::test]
async fn test_date_like_text_is_stored_verbatim() {
    let mut adapter = setup().await;
    let changes: Changes = serde_json::from_str(r#"{"name": "2024-05-01T10:00:00Z", "age": 1}"#).unwrap();
    adapter.insert(&users(), &changes).await.unwrap();

    let filter: Query = serde_json::from_str(
        r#"{"collection": "users", "filter": {"kind": "eq", "field": "name", "values": ["2024-05-01T10:00:00Z"]}}"#,
    )
    .unwrap();
    let row = adapter.find_one(&filter).await.unwrap();
    assert_eq!(row["name"], "2024-05-01T10:00:00Z");
}

#[tokio::test]
async fn test_find_as() {
    let mut adapter = setup().await;
    adapter.insert(&users(), &user("alice", 30)).await.unwrap();
    adapter.insert(&users(), &user("bob", 25)).await.unwrap();

    let found: Vec<User> = adapter
        .find_as(&compose("users", [sort_desc("age")]))
        .await
        .unwrap();
    let names: Vec<&str> = found.iter().map(|u| u.name.as_str()).collect();
    assert_eq!(names, vec!["alice", "bob"]);
}

#[tokio::test]
async fn test_query_path_normalizes_errors() {
    let mut adapter = setup().await;
    let insert = "INSERT INTO users (name, age) VALUES (?, ?) RETURNING id";
    let args = [Value::from("alice"), Value::from(30)];

    let row = adapter.query_one(insert, &args).await.unwrap();
    assert!(row.contains_key("id"));

    let err = adapter.query_one(insert, &args).await.unwrap_err();
    assert!(err.is_duplicate(), "expected duplicate, got {:?}", err);

    let err = adapter.query(insert, &args).await.unwrap_err();
    assert!(err.is_duplicate(), "expected duplicate, got {:?}", err);

    let err = adapter
        .query_one("SELECT id FROM users WHERE id = ?", &[Value::from(42)])
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}
