use std::path::PathBuf;
use stratus_db::storage::page::index_page::RecordId;
use stratus_db::storage::transaction::Transaction;
use stratus_db::storage::{StorageConfig, StorageEngine};

fn main() {
    tracing_subscriber::fmt().init();

    let config = StorageConfig::new(PathBuf::from("demo_db"));
    let mut engine = StorageEngine::new(config).expect("start storage engine");
    let mut index = engine.open_index("demo_index");

    for key in [42, 7, 19, 3, 88] {
        index.insert(key, RecordId { page_id: 1, slot_id: key as u8 });
    }
    println!("lookup 19 -> {:?}", index.get_value(19));

    let mut txn = Transaction::new();
    index.remove(19, &mut txn);
    println!("after remove 19 -> {:?}", index.get_value(19));

    let keys: Vec<i64> = index.begin().map(|(key, _)| key).collect();
    println!("keys in order: {:?}", keys);

    engine.deactivate();
}
