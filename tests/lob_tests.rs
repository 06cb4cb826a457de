//! LOB upload and read-back tests against the in-process server

mod common;

use std::io::Read;
use std::sync::{Arc, Mutex};

use common::{int_col, start, MemTable, Reply};
use dualsql::{ColumnInfo, Config, Connection, Dialect, Lob, LobKind, Outcome, SqlType, Value};

const PIECE: usize = 4;

fn documents() -> MemTable {
    MemTable::new(vec![
        int_col("ID"),
        ColumnInfo::new("DOC", SqlType::Clob),
        ColumnInfo::new("DATA", SqlType::Blob),
    ])
}

/// INSERT stores the bound row, SELECT returns the table
fn table_server(config: Config) -> (Connection, common::MockServer, Arc<Mutex<MemTable>>) {
    let table = Arc::new(Mutex::new(documents()));
    let shared = Arc::clone(&table);
    let (conn, server) = start(config, move |exec| {
        let mut table = shared.lock().unwrap();
        if exec.sql.starts_with("INSERT") {
            table.insert(exec.params().to_vec());
            Reply::update(1)
        } else {
            table.reply()
        }
    });
    (conn, server, table)
}

fn piece_config() -> Config {
    Config::new(Dialect::Oracle)
        .with_piece_data(true)
        .with_piece_size(PIECE)
}

mod lob_tests {
    use super::*;

    #[tokio::test]
    async fn test_multibyte_clob_crosses_piece_boundaries() {
        common::init_tracing();
        let (conn, server, table) = table_server(piece_config());
        let text = "Grüße aus Köln ✓ ü";
        let data: Vec<u8> = (0u8..=20).collect();

        let mut stmt = conn.prepare("INSERT INTO docs (id, doc, data) VALUES (?, ?, ?)").unwrap();
        stmt.bind(1, 1).unwrap();
        stmt.bind(2, Lob::clob(text, PIECE)).unwrap();
        stmt.bind(3, Lob::blob(data.clone(), PIECE)).unwrap();
        assert_eq!(stmt.execute_update().await.unwrap(), 1);

        let expected_pieces = text.len().div_ceil(PIECE) + data.len().div_ceil(PIECE);
        assert_eq!(server.piece_count(), expected_pieces);

        let execute = server.executes().pop().unwrap();
        assert_eq!(execute.rows[0][1], Value::Piece(2));
        assert_eq!(execute.rows[0][2], Value::Piece(3));
        assert_eq!(execute.binds[1].sql_type, SqlType::Clob);
        assert_eq!(execute.binds[2].sql_type, SqlType::Blob);

        let stored = table.lock().unwrap().rows[0].clone();
        match stored.get(1) {
            Some(Value::Clob(buffer)) => assert_eq!(buffer.to_text().unwrap(), text),
            other => panic!("stored {other:?}"),
        }

        let mut select = conn.prepare("SELECT id, doc, data FROM docs").unwrap();
        let mut rs = select.execute_query().await.unwrap();
        assert!(rs.next().await.unwrap());
        assert_eq!(rs.get_string("DOC").unwrap().as_deref(), Some(text));
        assert_eq!(rs.get_bytes(3).unwrap(), Some(data.clone()));

        let mut reader = rs.get_character_stream(2).unwrap().unwrap();
        assert_eq!(reader.read_to_text().unwrap(), text);

        let mut binary = Vec::new();
        rs.get_binary_stream(3)
            .unwrap()
            .unwrap()
            .read_to_end(&mut binary)
            .unwrap();
        assert_eq!(binary, data);
    }

    #[tokio::test]
    async fn test_lob_batch_uploads_pieces_per_row() {
        let config = piece_config().with_rewrite_batched_statements(true);
        let (conn, server, table) = table_server(config);
        let text = "abcdefghijklmnopq";
        assert!(text.len() > PIECE);

        let mut stmt = conn.prepare("INSERT INTO docs (id, doc, data) VALUES (?, ?, ?)").unwrap();
        for id in 1..=3 {
            stmt.bind(1, id).unwrap();
            stmt.bind(2, Lob::clob(text, PIECE)).unwrap();
            stmt.bind_null(3).unwrap();
            stmt.add_batch().unwrap();
        }
        let result = stmt.execute_batch().await.unwrap();
        assert_eq!(result.outcomes, vec![Outcome::UpdateCount(1); 3]);

        assert_eq!(server.piece_count(), 3 * text.len().div_ceil(PIECE));
        let executes = server.executes();
        assert_eq!(executes.len(), 3);
        assert!(executes.iter().all(|e| e.rows.len() == 1 && e.rows[0][1] == Value::Piece(2)));

        let table = table.lock().unwrap();
        assert_eq!(table.rows.len(), 3);
        for row in &table.rows {
            match row.get(1) {
                Some(Value::Clob(buffer)) => assert_eq!(buffer.to_text().unwrap(), text),
                other => panic!("stored {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_empty_and_null_lobs() {
        let (conn, server, _table) = table_server(piece_config());

        let mut stmt = conn.prepare("INSERT INTO docs (id, doc, data) VALUES (?, ?, ?)").unwrap();
        stmt.bind(1, 2).unwrap();
        stmt.bind(2, Lob::clob("", PIECE)).unwrap();
        stmt.bind(3, Lob::blob(Vec::<u8>::new(), PIECE)).unwrap();
        stmt.execute_update().await.unwrap();
        // one empty final piece per empty value
        assert_eq!(server.piece_count(), 2);

        stmt.bind(1, 3).unwrap();
        stmt.bind_null(2).unwrap();
        stmt.bind(3, None::<Lob>).unwrap();
        stmt.execute_update().await.unwrap();
        assert_eq!(server.piece_count(), 2);

        let mut select = conn.prepare("SELECT id, doc, data FROM docs").unwrap();
        let mut rs = select.execute_query().await.unwrap();

        assert!(rs.next().await.unwrap());
        assert_eq!(rs.get_string(2).unwrap().as_deref(), Some(""));
        assert!(!rs.was_null().unwrap());
        assert_eq!(rs.get_bytes(3).unwrap(), Some(Vec::new()));

        assert!(rs.next().await.unwrap());
        assert_eq!(rs.get_string(2).unwrap(), None);
        assert!(rs.was_null().unwrap());
        assert!(rs.get_lob(3).unwrap().is_none());
        assert!(rs.get_character_stream(2).unwrap().is_none());

        assert!(!rs.next().await.unwrap());
    }

    #[tokio::test]
    async fn test_lobs_inline_without_piece_mode() {
        let (conn, server, _table) = table_server(Config::new(Dialect::Oracle));
        let text = "x".repeat(100);

        let mut stmt = conn.prepare("INSERT INTO docs (id, doc, data) VALUES (?, ?, ?)").unwrap();
        stmt.bind(1, 1).unwrap();
        stmt.bind(2, Lob::clob(text.clone(), PIECE)).unwrap();
        stmt.bind(3, Lob::blob(vec![1u8, 2, 3], PIECE)).unwrap();
        stmt.execute_update().await.unwrap();

        assert_eq!(server.piece_count(), 0);
        let execute = server.executes().pop().unwrap();
        assert!(matches!(&execute.rows[0][1], Value::Clob(c) if c.len() == 100));

        let mut select = conn.prepare("SELECT id, doc, data FROM docs").unwrap();
        let mut rs = select.execute_query().await.unwrap();
        assert!(rs.next().await.unwrap());
        let lob = rs.get_lob(2).unwrap().unwrap();
        assert_eq!(lob.kind(), LobKind::Clob);
        assert_eq!(lob.len(), 100);
        assert_eq!(rs.get_string(2).unwrap(), Some(text));
    }

    #[tokio::test]
    async fn test_bind_stream_reads_the_source() {
        let (conn, server, table) = table_server(piece_config());
        let source = std::io::Cursor::new(b"streamed content".to_vec());

        let mut stmt = conn.prepare("INSERT INTO docs (id, doc, data) VALUES (?, ?, ?)").unwrap();
        stmt.bind(1, 9).unwrap();
        stmt.bind_stream(2, LobKind::Clob, source).unwrap();
        stmt.bind_null(3).unwrap();
        stmt.execute_update().await.unwrap();

        assert_eq!(server.piece_count(), "streamed content".len().div_ceil(PIECE));
        let stored = table.lock().unwrap().rows[0].clone();
        assert!(matches!(stored.get(1), Some(Value::Clob(c)) if c.to_text().unwrap() == "streamed content"));
        assert_eq!(stored.get(2), Some(&Value::Null));
    }

    #[tokio::test]
    async fn test_same_lob_bound_twice_is_read_from_the_start() {
        let (conn, _server, table) = table_server(piece_config());
        let lob = Lob::clob("shared value", PIECE);

        let mut stmt = conn.prepare("INSERT INTO docs (id, doc, data) VALUES (?, ?, ?)").unwrap();
        for id in 1..=2 {
            stmt.bind(1, id).unwrap();
            stmt.bind(2, &lob).unwrap();
            stmt.bind_null(3).unwrap();
            stmt.execute_update().await.unwrap();
        }

        let table = table.lock().unwrap();
        for row in &table.rows {
            assert!(matches!(row.get(1), Some(Value::Clob(c)) if c.to_text().unwrap() == "shared value"));
        }
    }
}
