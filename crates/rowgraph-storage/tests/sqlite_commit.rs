//! Commits against a real SQLite database, where the engine itself enforces
//! the foreign keys.

mod common;

use rowgraph_core::Value;
use rowgraph_storage::{
    grow, store, CommitError, ModificationKind, RowStore, SqliteConfig, SqliteStore,
    StorageError, StoreMode,
};

use common::{graph, named, record, schema};

fn db() -> SqliteStore {
    SqliteStore::in_memory(schema()).unwrap()
}

#[test]
fn cycle_satisfies_engine_foreign_keys() {
    let mut graph = graph();
    let mut db = db();
    let site = named(&mut graph, "SITE", "s");
    let contact = named(&mut graph, "CONTACT", "c");
    graph.put_link(contact, "ID_SITE", site).unwrap();
    graph.put_link(site, "ID_CONTACT_RAPPORT", contact).unwrap();
    graph.put_link(site, "ID_CONTACT_UTILE", contact).unwrap();

    let outcome = store(&mut graph, site, &mut db, StoreMode::Commit).unwrap();

    assert_eq!(outcome.count(ModificationKind::RowUpdated), 1);
    let site_id = outcome.row(site).unwrap().id;
    let contact_id = outcome.row(contact).unwrap().id;
    let stored = db.fetch("SITE", site_id).unwrap().unwrap();
    assert_eq!(stored.get("ID_CONTACT_RAPPORT"), Some(&Value::from(contact_id)));
    assert_eq!(stored.get("ID_CONTACT_UTILE"), Some(&Value::from(contact_id)));
    let stored = db.fetch("CONTACT", contact_id).unwrap().unwrap();
    assert_eq!(stored.get("ID_SITE"), Some(&Value::from(site_id)));
}

#[test]
fn engine_refusal_rolls_back_earlier_writes() {
    let mut graph = graph();
    let mut db = db();
    let seen = record(&mut db, &["BATIMENT", "LOCAL"]);
    let b = named(&mut graph, "BATIMENT", "b");
    let l = named(&mut graph, "LOCAL", "l");
    graph.put_link(l, "ID_BATIMENT", b).unwrap();
    // a raw key to a room that does not exist
    graph.put(l, "ID_LOCAL_PARENT", 999).unwrap();

    let err = store(&mut graph, b, &mut db, StoreMode::Commit).unwrap_err();

    assert!(matches!(err, CommitError::Store(StorageError::Sqlite(_))), "{err}");
    assert_eq!(db.row_count("BATIMENT").unwrap(), 0);
    assert_eq!(db.row_count("LOCAL").unwrap(), 0);
    assert!(seen.lock().unwrap().is_empty());
}

#[test]
fn committed_graph_can_be_grown_back_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let config = SqliteConfig::at(dir.path().join("rows.db"));

    let local_id = {
        let mut graph = graph();
        let mut db = SqliteStore::open(&config, schema()).unwrap();
        let site = named(&mut graph, "SITE", "Lyon");
        let b = named(&mut graph, "BATIMENT", "b");
        let l = named(&mut graph, "LOCAL", "l");
        graph.put_link(b, "ID_SITE", site).unwrap();
        graph.put_link(l, "ID_BATIMENT", b).unwrap();
        store(&mut graph, l, &mut db, StoreMode::Commit)
            .unwrap()
            .row(l)
            .unwrap()
            .id
    };

    let db = SqliteStore::open(&config, schema()).unwrap();
    let mut graph = graph();
    let shape = graph.create_with("LOCAL", [("DESIGNATION", "")]).unwrap();
    let bat = graph.create_with("BATIMENT", [("DESIGNATION", "")]).unwrap();
    let site = graph.create_with("SITE", [("NOM", "")]).unwrap();
    graph.put_link(shape, "ID_BATIMENT", bat).unwrap();
    graph.put_link(bat, "ID_SITE", site).unwrap();
    let target = graph.create_with("LOCAL", [("ID", Value::from(local_id))]).unwrap();

    grow(&mut graph, &db, shape, target, true).unwrap();

    let b = graph.foreign(target, "ID_BATIMENT").unwrap().unwrap();
    let s = graph.foreign(b, "ID_SITE").unwrap().unwrap();
    assert_eq!(graph.node(s).unwrap().scalar("NOM"), Some(&Value::Text("Lyon".into())));
    assert_eq!(graph.contains(target, shape, true).unwrap(), None);
}
