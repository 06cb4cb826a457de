//! Result set navigation tests against the in-process server

mod common;

use std::sync::{Arc, Mutex};

use common::{int_col, start, text_col, MemTable, Reply};
use dualsql::constants::column_flags;
use dualsql::messages::Request;
use dualsql::{
    Concurrency, Config, Connection, CursorKind, Dialect, Error, Holdability, Position, ResultSet,
    ResultSetType, Row, StatementHandle, Value, STREAMING_FETCH_SIZE,
};

fn numbers(n: i64) -> Reply {
    Reply::Rows {
        columns: vec![int_col("N")],
        rows: (1..=n).map(|i| Row::new(vec![Value::Int(i)])).collect(),
    }
}

fn users() -> MemTable {
    let mut table = MemTable::new(vec![
        int_col("ID")
            .with_table("USERS")
            .with_flags(column_flags::PRIMARY_KEY),
        text_col("NAME").with_table("USERS"),
    ]);
    for name in ["ann", "bob", "cid"] {
        let id = table.next_id as i64;
        table.insert(vec![Value::Int(id), Value::String(name.into())]);
    }
    table
}

/// Answers key lookups from refresh and full scans from everything else
fn users_server(config: Config) -> (Connection, Arc<Mutex<MemTable>>) {
    let table = Arc::new(Mutex::new(users()));
    let shared = Arc::clone(&table);
    let (conn, _server) = start(config, move |exec| {
        let table = shared.lock().unwrap();
        if exec.sql.contains("WHERE") {
            let rows = table.find(&exec.params()[0]).cloned().into_iter().collect();
            Reply::Rows {
                columns: table.columns.clone(),
                rows,
            }
        } else {
            table.reply()
        }
    });
    (conn, table)
}

/// The statement is returned too: dropping it closes the result set
async fn scrollable(conn: &Connection, sql: &str) -> (StatementHandle, ResultSet) {
    let mut stmt = conn
        .create_statement_with(ResultSetType::ScrollInsensitive, Concurrency::ReadOnly)
        .unwrap();
    let rs = stmt.execute_query_sql(sql).await.unwrap();
    (stmt, rs)
}

mod cursor_tests {
    use super::*;

    #[tokio::test]
    async fn test_absolute_out_of_range_positions() {
        let (conn, _server) = start(Config::default(), |_| numbers(5));
        let (_stmt, mut rs) = scrollable(&conn, "SELECT n FROM t").await;
        assert_eq!(rs.kind(), CursorKind::ScrollInsensitive);

        assert!(!rs.absolute(6).await.unwrap());
        assert!(rs.is_after_last().unwrap());
        assert_eq!(rs.get_row().unwrap(), 0);

        assert!(rs.absolute(-1).await.unwrap());
        assert_eq!(rs.get_row().unwrap(), 5);
        assert_eq!(rs.get_i64(1).unwrap(), Some(5));

        assert!(!rs.absolute(-6).await.unwrap());
        assert!(rs.is_before_first().unwrap());

        assert!(rs.absolute(2).await.unwrap());
        assert!(matches!(rs.absolute(0).await, Err(Error::InvalidArgument(_))));
        assert_eq!(rs.position().unwrap(), Position::OnRow(2));
    }

    #[tokio::test]
    async fn test_scrolling_in_both_directions() {
        let (conn, _server) = start(Config::default(), |_| numbers(4));
        let (_stmt, mut rs) = scrollable(&conn, "SELECT n FROM t").await;

        assert!(rs.last().await.unwrap());
        assert!(rs.is_last().await.unwrap());
        assert!(rs.previous().await.unwrap());
        assert_eq!(rs.get_i64("n").unwrap(), Some(3));
        assert!(rs.relative(-2).await.unwrap());
        assert!(rs.is_first().unwrap());
        assert!(!rs.previous().await.unwrap());
        assert!(rs.is_before_first().unwrap());
        assert!(rs.relative(3).await.unwrap());
        assert_eq!(rs.get_row().unwrap(), 3);

        rs.after_last().await.unwrap();
        assert!(!rs.next().await.unwrap());
        rs.before_first().await.unwrap();
        assert!(rs.next().await.unwrap());
        assert_eq!(rs.get_row().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_forward_only_rejects_scrolling() {
        let (conn, _server) = start(Config::default(), |_| numbers(3));
        let mut stmt = conn.create_statement().unwrap();
        let mut rs = stmt.execute_query_sql("SELECT n FROM t").await.unwrap();

        assert!(rs.next().await.unwrap());
        assert!(matches!(rs.previous().await, Err(Error::ForwardOnly("previous"))));
        assert!(matches!(rs.absolute(1).await, Err(Error::ForwardOnly(_))));
        assert!(matches!(rs.first().await, Err(Error::ForwardOnly(_))));
        assert!(rs.next().await.unwrap());
        assert!(rs.next().await.unwrap());
        assert!(!rs.next().await.unwrap());
        assert!(!rs.next().await.unwrap());
    }

    #[tokio::test]
    async fn test_closed_result_set() {
        let (conn, _server) = start(Config::default(), |_| numbers(2));
        let mut stmt = conn.create_statement().unwrap();
        let mut rs = stmt.execute_query_sql("SELECT n FROM t").await.unwrap();
        let holdability = rs.holdability();
        rs.close();
        rs.close();

        assert!(rs.is_closed());
        assert!(matches!(rs.next().await, Err(Error::ResultSetClosed)));
        assert!(matches!(rs.get_i64(1), Err(Error::ResultSetClosed)));
        assert!(matches!(rs.metadata(), Err(Error::ResultSetClosed)));
        assert!(rs.warnings().is_none());
        assert_eq!(rs.holdability(), holdability);
        assert_eq!(holdability, Holdability::CloseCursorsAtCommit);
    }

    #[tokio::test]
    async fn test_new_execution_closes_previous_result() {
        let (conn, _server) = start(Config::default(), |_| numbers(2));
        let mut stmt = conn.create_statement().unwrap();
        let mut first = stmt.execute_query_sql("SELECT n FROM t").await.unwrap();
        let mut second = stmt.execute_query_sql("SELECT n FROM t").await.unwrap();

        assert!(first.is_closed());
        assert!(matches!(first.next().await, Err(Error::ResultSetClosed)));
        assert!(second.next().await.unwrap());

        stmt.close();
        assert!(second.is_closed());
    }

    #[tokio::test]
    async fn test_cursor_fetch_pages_through_rows() {
        let config = Config::new(Dialect::Oracle).with_cursor_fetch(true);
        let (conn, server) = start(config, |_| numbers(5));
        let mut stmt = conn.prepare("SELECT n FROM t").unwrap();
        stmt.set_fetch_size(2).unwrap();
        let mut rs = stmt.execute_query().await.unwrap();
        assert_eq!(rs.kind(), CursorKind::CursorFetch);

        let mut seen = Vec::new();
        while rs.next().await.unwrap() {
            seen.push((rs.get_row().unwrap(), rs.get_i64(1).unwrap().unwrap()));
        }
        assert_eq!(seen, vec![(1, 1), (2, 2), (3, 3), (4, 4), (5, 5)]);
        assert!(matches!(rs.previous().await, Err(Error::ForwardOnly(_))));

        let fetches: Vec<u32> = server
            .requests()
            .into_iter()
            .filter_map(|r| match r {
                Request::Fetch(f) => Some(f.num_rows),
                _ => None,
            })
            .collect();
        assert_eq!(fetches, vec![2, 2]);
    }

    #[tokio::test]
    async fn test_streaming_result_fetches_row_by_row() {
        let config = Config::default().with_extended_result_class(true);
        let (conn, server) = start(config, |_| numbers(3));
        let mut stmt = conn.create_statement().unwrap();
        stmt.set_fetch_size(STREAMING_FETCH_SIZE).unwrap();
        let mut rs = stmt.execute_query_sql("SELECT n FROM t").await.unwrap();

        let mut total = 0;
        while rs.next().await.unwrap() {
            total += rs.get_i64(1).unwrap().unwrap();
        }
        assert_eq!(total, 6);
        let fetches = server
            .requests()
            .iter()
            .filter(|r| matches!(r, Request::Fetch(f) if f.num_rows == 1))
            .count();
        assert_eq!(fetches, 2);
    }

    #[tokio::test]
    async fn test_closing_an_open_cursor_releases_it() {
        let config = Config::default().with_extended_result_class(true);
        let (conn, server) = start(config, |_| numbers(10));
        let mut stmt = conn.create_statement().unwrap();
        stmt.set_fetch_size(STREAMING_FETCH_SIZE).unwrap();
        let mut rs = stmt.execute_query_sql("SELECT n FROM t").await.unwrap();
        assert!(rs.next().await.unwrap());
        rs.close();

        conn.ping().await.unwrap();
        let requests = server.requests();
        let released: Vec<&Vec<u32>> = requests
            .iter()
            .filter_map(|r| match r {
                Request::CloseCursors(ids) => Some(ids),
                _ => None,
            })
            .collect();
        assert_eq!(released, vec![&vec![101u32]]);
        assert_eq!(requests.last(), Some(&Request::Ping));
    }

    #[tokio::test]
    async fn test_refresh_row_sees_updates_and_deletes() {
        let (conn, table) = users_server(Config::default());
        let mut stmt = conn
            .create_statement_with(ResultSetType::ScrollInsensitive, Concurrency::Updatable)
            .unwrap();
        let mut rs = stmt.execute_query_sql("SELECT id, name FROM users").await.unwrap();
        assert_eq!(rs.concurrency().unwrap(), Concurrency::Updatable);

        assert!(rs.absolute(2).await.unwrap());
        table.lock().unwrap().rows[1] = Row::new(vec![Value::Int(2), Value::String("bea".into())]);
        assert_eq!(rs.get_string("NAME").unwrap().as_deref(), Some("bob"));
        rs.refresh_row().await.unwrap();
        assert_eq!(rs.get_string("NAME").unwrap().as_deref(), Some("bea"));

        table.lock().unwrap().rows.remove(2);
        assert!(rs.absolute(3).await.unwrap());
        assert!(matches!(rs.refresh_row().await, Err(Error::RowDeleted)));
        assert_eq!(rs.get_string(2).unwrap().as_deref(), Some("cid"));
    }

    #[tokio::test]
    async fn test_refresh_row_requirements() {
        let (conn, _table) = users_server(Config::default());

        let (_read_only_stmt, mut read_only) = scrollable(&conn, "SELECT id, name FROM users").await;
        assert!(read_only.first().await.unwrap());
        assert!(matches!(read_only.refresh_row().await, Err(Error::NotUpdatable(_))));

        let mut stmt = conn
            .create_statement_with(ResultSetType::ScrollInsensitive, Concurrency::Updatable)
            .unwrap();
        let mut rs = stmt.execute_query_sql("SELECT id, name FROM users").await.unwrap();
        assert!(matches!(rs.refresh_row().await, Err(Error::InvalidCursor(_))));

        let mut forward = conn.create_statement().unwrap();
        let mut rs = forward.execute_query_sql("SELECT id, name FROM users").await.unwrap();
        assert!(rs.next().await.unwrap());
        assert!(matches!(rs.refresh_row().await, Err(Error::ForwardOnly(_))));
    }

    #[tokio::test]
    async fn test_updatable_request_downgrades_without_key() {
        let (conn, _server) = start(Config::default(), |_| numbers(1));
        let mut stmt = conn
            .create_statement_with(ResultSetType::ScrollInsensitive, Concurrency::Updatable)
            .unwrap();
        let rs = stmt.execute_query_sql("SELECT n FROM t").await.unwrap();
        assert_eq!(rs.concurrency().unwrap(), Concurrency::ReadOnly);
    }

    #[tokio::test]
    async fn test_metadata_reports_columns() {
        let (conn, _table) = users_server(Config::default());
        let mut stmt = conn.create_statement().unwrap();
        let rs = stmt.execute_query_sql("SELECT id, name FROM users").await.unwrap();
        let meta = rs.metadata().unwrap();

        assert_eq!(meta.column_count(), 2);
        assert_eq!(meta.column_name(1).unwrap(), "ID");
        assert_eq!(meta.table_name(2).unwrap(), "USERS");
        assert!(meta.is_primary_key(1).unwrap());
        assert!(!meta.is_primary_key(2).unwrap());
        assert!(meta.column_name(3).is_err());
        assert_eq!(rs.find_column("name").unwrap(), 2);
        assert!(rs.find_column("missing").is_err());
    }
}
